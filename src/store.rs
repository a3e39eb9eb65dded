// src/store.rs
//! Storage port for questions, choices, votes, users and sessions.
//!
//! [`PgStore`](crate::db::PgStore) backs it with PostgreSQL; [`MemoryStore`]
//! keeps everything in process and is used by tests and database-less runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{validate_text, Choice, NewChoice, NewQuestion, Question, User, Vote, MAX_TEXT_LEN};
use crate::poll::{self, Ballot};

#[async_trait]
pub trait PollStore: Send + Sync {
    /// Questions with `publish_time <= now`, newest first.
    async fn latest_published(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Question>, AppError>;
    async fn question(&self, id: i32) -> Result<Option<Question>, AppError>;
    /// Choices of a question, ordered by id, with their tallies.
    async fn choices(&self, question_id: i32) -> Result<Vec<Choice>, AppError>;
    async fn user_vote(&self, user_id: i32, question_id: i32) -> Result<Option<Vote>, AppError>;
    /// Applies [`poll::resolve`] and its writes as one atomic step per (user, question).
    /// Fails with [`AppError::NotFound`] when the choice does not belong to the question.
    async fn cast_vote(&self, user_id: i32, question_id: i32, choice_id: i32) -> Result<Ballot, AppError>;

    async fn create_question(&self, question: NewQuestion) -> Result<Question, AppError>;
    async fn add_choice(&self, choice: NewChoice) -> Result<Choice, AppError>;
    /// Creates a question and its choices, in order, all or nothing.
    async fn create_poll(&self, question: NewQuestion, choices: Vec<String>) -> Result<(Question, Vec<Choice>), AppError>;

    async fn create_user(&self, username: &str, password_hash: &str) -> Result<User, AppError>;
    async fn user_by_username(&self, username: &str) -> Result<Option<User>, AppError>;

    /// Opens a session and drops every session already expired at `now`.
    async fn create_session(&self, user_id: i32, now: DateTime<Utc>, expires_at: DateTime<Utc>) -> Result<Uuid, AppError>;
    /// The user owning an unexpired session.
    async fn session_user(&self, token: Uuid, now: DateTime<Utc>) -> Result<Option<User>, AppError>;
    async fn delete_session(&self, token: Uuid) -> Result<(), AppError>;
}

#[derive(Debug, Clone)]
struct ChoiceRow {
    id: i32,
    question_id: i32,
    text: String,
}

#[derive(Debug, Clone)]
struct SessionRow {
    token: Uuid,
    user_id: i32,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Tables {
    questions: Vec<Question>,
    choices: Vec<ChoiceRow>,
    votes: Vec<Vote>,
    users: Vec<User>,
    sessions: Vec<SessionRow>,
    next_id: i32,
}

impl Tables {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn tally(&self, row: &ChoiceRow) -> Choice {
        Choice {
            id: row.id,
            question_id: row.question_id,
            text: row.text.clone(),
            votes: self.votes.iter().filter(|v| v.choice_id == row.id).count() as i64,
        }
    }

    fn choice(&self, question_id: i32, choice_id: i32) -> Option<Choice> {
        self.choices
            .iter()
            .find(|c| c.id == choice_id && c.question_id == question_id)
            .map(|row| self.tally(row))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PollStore for MemoryStore {
    async fn latest_published(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Question>, AppError> {
        let tables = self.tables.read();
        let mut published: Vec<Question> = tables.questions.iter().filter(|q| q.is_published(now)).cloned().collect();
        published.sort_by(|a, b| b.publish_time.cmp(&a.publish_time).then(b.id.cmp(&a.id)));
        published.truncate(limit.max(0) as usize);
        Ok(published)
    }

    async fn question(&self, id: i32) -> Result<Option<Question>, AppError> {
        Ok(self.tables.read().questions.iter().find(|q| q.id == id).cloned())
    }

    async fn choices(&self, question_id: i32) -> Result<Vec<Choice>, AppError> {
        let tables = self.tables.read();
        Ok(tables
            .choices
            .iter()
            .filter(|c| c.question_id == question_id)
            .map(|row| tables.tally(row))
            .collect())
    }

    async fn user_vote(&self, user_id: i32, question_id: i32) -> Result<Option<Vote>, AppError> {
        let tables = self.tables.read();
        Ok(tables
            .votes
            .iter()
            .find(|v| v.user_id == user_id && v.question_id == question_id)
            .cloned())
    }

    async fn cast_vote(&self, user_id: i32, question_id: i32, choice_id: i32) -> Result<Ballot, AppError> {
        let mut tables = self.tables.write();
        let selected = tables.choice(question_id, choice_id).ok_or(AppError::NotFound)?;
        let existing = tables
            .votes
            .iter()
            .position(|v| v.user_id == user_id && v.question_id == question_id);
        let current = existing.and_then(|idx| tables.choice(question_id, tables.votes[idx].choice_id));

        let ballot = poll::resolve(current, selected);
        if ballot.is_accepted() {
            if let Some(idx) = existing {
                tables.votes.remove(idx);
            }
            let id = tables.next_id();
            tables.votes.push(Vote {
                id,
                user_id,
                question_id,
                choice_id,
            });
        }
        Ok(ballot)
    }

    async fn create_question(&self, question: NewQuestion) -> Result<Question, AppError> {
        question.validate()?;
        let mut tables = self.tables.write();
        let question = Question {
            id: tables.next_id(),
            text: question.text,
            publish_time: question.publish_time,
            end_time: question.end_time,
        };
        tables.questions.push(question.clone());
        Ok(question)
    }

    async fn add_choice(&self, choice: NewChoice) -> Result<Choice, AppError> {
        choice.validate()?;
        let mut tables = self.tables.write();
        if !tables.questions.iter().any(|q| q.id == choice.question_id) {
            return Err(AppError::NotFound);
        }
        let row = ChoiceRow {
            id: tables.next_id(),
            question_id: choice.question_id,
            text: choice.text,
        };
        let created = tables.tally(&row);
        tables.choices.push(row);
        Ok(created)
    }

    async fn create_poll(&self, question: NewQuestion, choices: Vec<String>) -> Result<(Question, Vec<Choice>), AppError> {
        question.validate()?;
        for text in &choices {
            validate_text("choice text", text, MAX_TEXT_LEN)?;
        }

        let mut tables = self.tables.write();
        let question = Question {
            id: tables.next_id(),
            text: question.text,
            publish_time: question.publish_time,
            end_time: question.end_time,
        };
        tables.questions.push(question.clone());
        let mut created = Vec::with_capacity(choices.len());
        for text in choices {
            let row = ChoiceRow {
                id: tables.next_id(),
                question_id: question.id,
                text,
            };
            created.push(tables.tally(&row));
            tables.choices.push(row);
        }
        Ok((question, created))
    }

    async fn create_user(&self, username: &str, password_hash: &str) -> Result<User, AppError> {
        let mut tables = self.tables.write();
        if tables.users.iter().any(|u| u.username == username) {
            return Err(AppError::Conflict(format!("user {username}")));
        }
        let user = User {
            id: tables.next_id(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
        };
        tables.users.push(user.clone());
        Ok(user)
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        Ok(self.tables.read().users.iter().find(|u| u.username == username).cloned())
    }

    async fn create_session(&self, user_id: i32, now: DateTime<Utc>, expires_at: DateTime<Utc>) -> Result<Uuid, AppError> {
        let token = Uuid::new_v4();
        let mut tables = self.tables.write();
        tables.sessions.retain(|s| s.expires_at > now);
        tables.sessions.push(SessionRow {
            token,
            user_id,
            expires_at,
        });
        Ok(token)
    }

    async fn session_user(&self, token: Uuid, now: DateTime<Utc>) -> Result<Option<User>, AppError> {
        let tables = self.tables.read();
        let Some(session) = tables.sessions.iter().find(|s| s.token == token && s.expires_at > now) else {
            return Ok(None);
        };
        Ok(tables.users.iter().find(|u| u.id == session.user_id).cloned())
    }

    async fn delete_session(&self, token: Uuid) -> Result<(), AppError> {
        self.tables.write().sessions.retain(|s| s.token != token);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    async fn seeded() -> (MemoryStore, Question, Choice, Choice, User) {
        let store = MemoryStore::new();
        let question = store
            .create_question(NewQuestion {
                text: "Tabs or spaces?".into(),
                publish_time: Utc::now() - Duration::days(30),
                end_time: None,
            })
            .await
            .unwrap();
        let a = store
            .add_choice(NewChoice {
                question_id: question.id,
                text: "Tabs".into(),
            })
            .await
            .unwrap();
        let b = store
            .add_choice(NewChoice {
                question_id: question.id,
                text: "Spaces".into(),
            })
            .await
            .unwrap();
        let user = store.create_user("tester", "hash").await.unwrap();
        (store, question, a, b, user)
    }

    fn tally(choices: &[Choice], id: i32) -> i64 {
        choices.iter().find(|c| c.id == id).map(|c| c.votes).unwrap()
    }

    #[tokio::test]
    async fn test_cast_vote_transitions() {
        let (store, question, a, b, user) = seeded().await;

        let first = store.cast_vote(user.id, question.id, a.id).await.unwrap();
        assert!(matches!(first, Ballot::Recorded { .. }));
        let choices = store.choices(question.id).await.unwrap();
        assert_eq!(tally(&choices, a.id), 1);

        let again = store.cast_vote(user.id, question.id, a.id).await.unwrap();
        assert!(matches!(again, Ballot::Unchanged { .. }));
        let choices = store.choices(question.id).await.unwrap();
        assert_eq!(tally(&choices, a.id), 1);

        let changed = store.cast_vote(user.id, question.id, b.id).await.unwrap();
        assert!(matches!(changed, Ballot::Changed { ref from, ref to } if from.id == a.id && to.id == b.id));
        let choices = store.choices(question.id).await.unwrap();
        assert_eq!(tally(&choices, a.id), 0);
        assert_eq!(tally(&choices, b.id), 1);

        let vote = store.user_vote(user.id, question.id).await.unwrap().unwrap();
        assert_eq!(vote.choice_id, b.id);
    }

    #[tokio::test]
    async fn test_cast_vote_rejects_foreign_choice() {
        let (store, question, _, _, user) = seeded().await;
        let other = store
            .create_question(NewQuestion {
                text: "Other?".into(),
                publish_time: Utc::now(),
                end_time: None,
            })
            .await
            .unwrap();
        let foreign = store
            .add_choice(NewChoice {
                question_id: other.id,
                text: "Elsewhere".into(),
            })
            .await
            .unwrap();

        let result = store.cast_vote(user.id, question.id, foreign.id).await;
        assert!(matches!(result, Err(AppError::NotFound)));
        assert!(store.user_vote(user.id, question.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_published_filters_and_orders() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for days in [-30, -5, 30, -1, -2, -3, -4] {
            store
                .create_question(NewQuestion {
                    text: format!("{days} days"),
                    publish_time: now + Duration::days(days),
                    end_time: None,
                })
                .await
                .unwrap();
        }

        let latest = store.latest_published(now, 5).await.unwrap();
        let texts: Vec<&str> = latest.iter().map(|q| q.text.as_str()).collect();
        assert_eq!(texts, vec!["-1 days", "-2 days", "-3 days", "-4 days", "-5 days"]);
    }

    #[tokio::test]
    async fn test_sessions_expire_and_delete() {
        let (store, _, _, _, user) = seeded().await;
        let now = Utc::now();
        let token = store.create_session(user.id, now, now + Duration::hours(1)).await.unwrap();

        assert_eq!(store.session_user(token, now).await.unwrap().map(|u| u.id), Some(user.id));
        assert!(store.session_user(token, now + Duration::hours(2)).await.unwrap().is_none());

        store.delete_session(token).await.unwrap();
        assert!(store.session_user(token, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_new_session_purges_expired_ones() {
        let (store, _, _, _, user) = seeded().await;
        let start = Utc::now();
        for hours in 1..=3 {
            store
                .create_session(user.id, start, start + Duration::hours(hours))
                .await
                .unwrap();
        }
        assert_eq!(store.tables.read().sessions.len(), 3);

        let later = start + Duration::hours(2);
        let live = store.create_session(user.id, later, later + Duration::hours(1)).await.unwrap();
        let remaining: Vec<Uuid> = store.tables.read().sessions.iter().map(|s| s.token).collect();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.contains(&live));
        assert_eq!(store.session_user(live, later).await.unwrap().map(|u| u.id), Some(user.id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_votes_keep_one_row() {
        let (store, question, a, b, user) = seeded().await;
        let store = Arc::new(store);

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                let choice_id = if i % 2 == 0 { a.id } else { b.id };
                tokio::spawn(async move { store.cast_vote(user.id, question.id, choice_id).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let rows = store
            .tables
            .read()
            .votes
            .iter()
            .filter(|v| v.user_id == user.id && v.question_id == question.id)
            .count();
        assert_eq!(rows, 1);
        let choices = store.choices(question.id).await.unwrap();
        assert_eq!(choices.iter().map(|c| c.votes).sum::<i64>(), 1);
    }

    #[tokio::test]
    async fn test_create_poll_is_all_or_nothing() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let result = store
            .create_poll(
                NewQuestion {
                    text: "Half a poll?".into(),
                    publish_time: now,
                    end_time: None,
                },
                vec!["Fine".into(), "x".repeat(MAX_TEXT_LEN + 1)],
            )
            .await;
        assert!(matches!(result, Err(AppError::Invalid(_))));
        let tables = store.tables.read();
        assert!(tables.questions.is_empty());
        assert!(tables.choices.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_username_conflicts() {
        let (store, _, _, _, _) = seeded().await;
        assert!(matches!(store.create_user("tester", "x").await, Err(AppError::Conflict(_))));
    }
}

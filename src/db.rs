// src/db.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{query, query_as, query_scalar, PgPool};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{validate_text, Choice, NewChoice, NewQuestion, Question, User, Vote, MAX_TEXT_LEN};
use crate::poll::{self, Ballot};
use crate::store::PollStore;

const CHOICE_WITH_TALLY: &str = r#"
    SELECT c.id, c.question_id, c.text,
           (SELECT COUNT(*) FROM votes v WHERE v.choice_id = c.id) AS votes
    FROM choices c
"#;

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects and brings the schema up to date.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, AppError> {
        let pool = create_pool(database_url, max_connections).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("database migrations applied");
        Ok(Self::new(pool))
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

#[async_trait]
impl PollStore for PgStore {
    async fn latest_published(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Question>, AppError> {
        let questions = query_as(
            r#"
            SELECT id, text, publish_time, end_time
            FROM questions
            WHERE publish_time <= $1
            ORDER BY publish_time DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(questions)
    }

    async fn question(&self, id: i32) -> Result<Option<Question>, AppError> {
        let question = query_as("SELECT id, text, publish_time, end_time FROM questions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(question)
    }

    async fn choices(&self, question_id: i32) -> Result<Vec<Choice>, AppError> {
        let choices = query_as(&format!("{CHOICE_WITH_TALLY} WHERE c.question_id = $1 ORDER BY c.id"))
            .bind(question_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(choices)
    }

    async fn user_vote(&self, user_id: i32, question_id: i32) -> Result<Option<Vote>, AppError> {
        let vote = query_as("SELECT id, user_id, question_id, choice_id FROM votes WHERE user_id = $1 AND question_id = $2")
            .bind(user_id)
            .bind(question_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(vote)
    }

    async fn cast_vote(&self, user_id: i32, question_id: i32, choice_id: i32) -> Result<Ballot, AppError> {
        let mut tx = self.pool.begin().await?;

        // Serialises concurrent submissions of the same user on the same question.
        query("SELECT pg_advisory_xact_lock($1, $2)")
            .bind(user_id)
            .bind(question_id)
            .execute(&mut *tx)
            .await?;

        let selected: Choice = query_as(&format!("{CHOICE_WITH_TALLY} WHERE c.id = $1 AND c.question_id = $2"))
            .bind(choice_id)
            .bind(question_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AppError::NotFound)?;

        let existing: Option<Vote> =
            query_as("SELECT id, user_id, question_id, choice_id FROM votes WHERE user_id = $1 AND question_id = $2 FOR UPDATE")
                .bind(user_id)
                .bind(question_id)
                .fetch_optional(&mut *tx)
                .await?;

        let current: Option<Choice> = match &existing {
            Some(vote) => {
                query_as(&format!("{CHOICE_WITH_TALLY} WHERE c.id = $1"))
                    .bind(vote.choice_id)
                    .fetch_optional(&mut *tx)
                    .await?
            }
            None => None,
        };

        let ballot = poll::resolve(current, selected);
        if !ballot.is_accepted() {
            tx.rollback().await?;
            return Ok(ballot);
        }

        if let Some(vote) = existing {
            query("DELETE FROM votes WHERE id = $1").bind(vote.id).execute(&mut *tx).await?;
        }
        query("INSERT INTO votes (user_id, question_id, choice_id) VALUES ($1, $2, $3)")
            .bind(user_id)
            .bind(question_id)
            .bind(choice_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(ballot)
    }

    async fn create_question(&self, question: NewQuestion) -> Result<Question, AppError> {
        question.validate()?;
        let created = query_as(
            r#"
            INSERT INTO questions (text, publish_time, end_time)
            VALUES ($1, $2, $3)
            RETURNING id, text, publish_time, end_time
            "#,
        )
        .bind(question.text)
        .bind(question.publish_time)
        .bind(question.end_time)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn add_choice(&self, choice: NewChoice) -> Result<Choice, AppError> {
        choice.validate()?;
        let created = query_as(
            r#"
            INSERT INTO choices (question_id, text)
            VALUES ($1, $2)
            RETURNING id, question_id, text, 0::BIGINT AS votes
            "#,
        )
        .bind(choice.question_id)
        .bind(choice.text)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| if is_foreign_key_violation(&e) { AppError::NotFound } else { e.into() })?;
        Ok(created)
    }

    async fn create_poll(&self, question: NewQuestion, choices: Vec<String>) -> Result<(Question, Vec<Choice>), AppError> {
        question.validate()?;
        for text in &choices {
            validate_text("choice text", text, MAX_TEXT_LEN)?;
        }

        let mut tx = self.pool.begin().await?;
        let question: Question = query_as(
            r#"
            INSERT INTO questions (text, publish_time, end_time)
            VALUES ($1, $2, $3)
            RETURNING id, text, publish_time, end_time
            "#,
        )
        .bind(question.text)
        .bind(question.publish_time)
        .bind(question.end_time)
        .fetch_one(&mut *tx)
        .await?;

        let mut created = Vec::with_capacity(choices.len());
        for text in choices {
            let choice: Choice = query_as(
                r#"
                INSERT INTO choices (question_id, text)
                VALUES ($1, $2)
                RETURNING id, question_id, text, 0::BIGINT AS votes
                "#,
            )
            .bind(question.id)
            .bind(text)
            .fetch_one(&mut *tx)
            .await?;
            created.push(choice);
        }

        tx.commit().await?;
        Ok((question, created))
    }

    async fn create_user(&self, username: &str, password_hash: &str) -> Result<User, AppError> {
        let user = query_as("INSERT INTO users (username, password_hash) VALUES ($1, $2) RETURNING id, username, password_hash")
            .bind(username)
            .bind(password_hash)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::Conflict(format!("user {username}"))
                } else {
                    e.into()
                }
            })?;
        Ok(user)
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        let user = query_as("SELECT id, username, password_hash FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn create_session(&self, user_id: i32, now: DateTime<Utc>, expires_at: DateTime<Utc>) -> Result<Uuid, AppError> {
        let mut tx = self.pool.begin().await?;
        let purged = query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if purged > 0 {
            tracing::debug!(purged, "expired sessions removed");
        }

        let token = query_scalar("INSERT INTO sessions (token, user_id, expires_at) VALUES ($1, $2, $3) RETURNING token")
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(expires_at)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(token)
    }

    async fn session_user(&self, token: Uuid, now: DateTime<Utc>) -> Result<Option<User>, AppError> {
        let user = query_as(
            r#"
            SELECT u.id, u.username, u.password_hash
            FROM sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.token = $1 AND s.expires_at > $2
            "#,
        )
        .bind(token)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn delete_session(&self, token: Uuid) -> Result<(), AppError> {
        query("DELETE FROM sessions WHERE token = $1").bind(token).execute(&self.pool).await?;
        Ok(())
    }
}

// models.rs
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const MAX_TEXT_LEN: usize = 200;
pub const MAX_USERNAME_LEN: usize = 150;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Question {
    pub id: i32,
    pub text: String,
    pub publish_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Question {
    /// True once `publish_time` has been reached.
    pub fn is_published(&self, now: DateTime<Utc>) -> bool {
        now >= self.publish_time
    }

    /// Published and not past `end_time`. Voting is still open at the exact end instant.
    pub fn can_vote(&self, now: DateTime<Utc>) -> bool {
        self.is_published(now) && self.end_time.map_or(true, |end| now <= end)
    }

    pub fn was_published_recently(&self, now: DateTime<Utc>) -> bool {
        now - Duration::days(1) <= self.publish_time && self.publish_time <= now
    }
}

/// A choice with its tally. `votes` is counted from the vote rows at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Choice {
    pub id: i32,
    pub question_id: i32,
    pub text: String,
    pub votes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Vote {
    pub id: i32,
    pub user_id: i32,
    pub question_id: i32,
    pub choice_id: i32,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewQuestion {
    pub text: String,
    pub publish_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl NewQuestion {
    pub fn validate(&self) -> Result<(), AppError> {
        validate_text("question text", &self.text, MAX_TEXT_LEN)?;
        if let Some(end) = self.end_time {
            if end < self.publish_time {
                return Err(AppError::Invalid(format!(
                    "end time {end} is before publish time {}",
                    self.publish_time
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewChoice {
    pub question_id: i32,
    pub text: String,
}

impl NewChoice {
    pub fn validate(&self) -> Result<(), AppError> {
        validate_text("choice text", &self.text, MAX_TEXT_LEN)
    }
}

pub fn validate_text(field: &str, value: &str, max: usize) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Invalid(format!("{field} must not be empty")));
    }
    if value.chars().count() > max {
        return Err(AppError::Invalid(format!("{field} is longer than {max} characters")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 10, 10, 12, 20, 0).unwrap()
    }

    fn question(publish_time: DateTime<Utc>, end_time: Option<DateTime<Utc>>) -> Question {
        Question {
            id: 1,
            text: "What's up?".into(),
            publish_time,
            end_time,
        }
    }

    #[test]
    fn test_was_published_recently_with_future_question() {
        let q = question(now() + Duration::days(30), None);
        assert!(!q.was_published_recently(now()));
    }

    #[test]
    fn test_was_published_recently_with_old_question() {
        let q = question(now() - Duration::days(1) - Duration::seconds(1), None);
        assert!(!q.was_published_recently(now()));
    }

    #[test]
    fn test_was_published_recently_bounds_are_inclusive() {
        assert!(question(now(), None).was_published_recently(now()));
        assert!(question(now() - Duration::days(1), None).was_published_recently(now()));
        let recent = now() - Duration::hours(23) - Duration::minutes(59) - Duration::seconds(59);
        assert!(question(recent, None).was_published_recently(now()));
    }

    #[test]
    fn test_can_vote_with_future_question_ignores_end_time() {
        let publish = now() + Duration::seconds(1);
        assert!(!question(publish, None).can_vote(now()));
        assert!(!question(publish, Some(publish + Duration::days(3))).can_vote(now()));
    }

    #[test]
    fn test_can_vote_on_exactly_publish_time() {
        assert!(question(now(), None).can_vote(now()));
    }

    #[test]
    fn test_can_vote_on_exactly_end_time() {
        let q = question(now() - Duration::days(2), Some(now()));
        assert!(q.can_vote(now()));
        assert!(!q.can_vote(now() + Duration::nanoseconds(1)));
    }

    #[test]
    fn test_can_vote_after_end_time() {
        let q = question(now() - Duration::days(2), Some(now() - Duration::days(1)));
        assert!(!q.can_vote(now()));
    }

    #[test]
    fn test_can_vote_with_no_end_time() {
        let q = question(now() - Duration::days(2), None);
        assert!(q.can_vote(now()));
        assert!(q.can_vote(now() + Duration::days(3650)));
    }

    #[test]
    fn test_is_published() {
        assert!(!question(now() + Duration::days(30), None).is_published(now()));
        assert!(question(now() - Duration::days(1), None).is_published(now()));
    }

    #[test]
    fn test_new_question_rejects_end_before_publish() {
        let new = NewQuestion {
            text: "Backwards?".into(),
            publish_time: now(),
            end_time: Some(now() - Duration::minutes(1)),
        };
        assert!(matches!(new.validate(), Err(AppError::Invalid(_))));

        let same = NewQuestion { end_time: Some(now()), ..new };
        assert!(same.validate().is_ok());
    }

    #[test]
    fn test_text_validation() {
        assert!(validate_text("choice text", "   ", MAX_TEXT_LEN).is_err());
        assert!(validate_text("choice text", &"x".repeat(201), MAX_TEXT_LEN).is_err());
        assert!(validate_text("choice text", &"x".repeat(200), MAX_TEXT_LEN).is_ok());
    }
}

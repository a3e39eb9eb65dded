// services.rs
//! Administrative operations shared by the CLI and tests.

use crate::auth::hash_password;
use crate::error::AppError;
use crate::models::{validate_text, Choice, NewChoice, NewQuestion, Question, User, MAX_USERNAME_LEN};
use crate::store::PollStore;

pub async fn create_user(store: &dyn PollStore, username: &str, password: &str) -> Result<User, AppError> {
    validate_text("username", username, MAX_USERNAME_LEN)?;
    if password.is_empty() {
        return Err(AppError::Invalid("password must not be empty".into()));
    }
    let hash = hash_password(password)?;
    store.create_user(username, &hash).await
}

/// Creates a question together with its choices, in order. Nothing is written
/// unless every part is valid.
pub async fn create_poll(
    store: &dyn PollStore,
    question: NewQuestion,
    choices: &[String],
) -> Result<(Question, Vec<Choice>), AppError> {
    store.create_poll(question, choices.to_vec()).await
}

pub async fn add_choice(store: &dyn PollStore, question_id: i32, text: String) -> Result<Choice, AppError> {
    if store.question(question_id).await?.is_none() {
        return Err(AppError::NotFound);
    }
    store.add_choice(NewChoice { question_id, text }).await
}

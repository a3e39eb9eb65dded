// handlers.rs
use axum::{
    extract::{rejection::FormRejection, Path, Query, State},
    response::Response,
    Form,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::{self, LOGIN_URL};
use crate::error::AppError;
use crate::models::{Choice, Question};
use crate::poll::Ballot;
use crate::response::{found, redirect_with_notice, render, with_cookie};
use crate::session::{expired_cookie, session_cookie, Notice, Visitor, SESSION_COOKIE};
use crate::state::AppState;

pub const INDEX_URL: &str = "/polls/";
pub const LATEST_LIMIT: i64 = 5;

pub const NO_POLLS: &str = "No polls are available.";
pub const QUESTION_MISSING: &str = "The question you're looking for does not exist.";
pub const VOTING_NOT_ALLOWED: &str = "Voting is not allowed for this question.";
pub const NO_CHOICE: &str = "You didn't select a choice.";
pub const BAD_CREDENTIALS: &str = "Please enter a correct username and password.";

pub fn detail_url(id: i32) -> String {
    format!("/polls/{id}/")
}

pub fn results_url(id: i32) -> String {
    format!("/polls/{id}/results/")
}

pub fn vote_url(id: i32) -> String {
    format!("/polls/{id}/vote/")
}

/// Question id from a path segment. Anything that is not an id a question
/// could have, such as `abc` or `3000000000`, names no question.
fn parse_question_id(raw: &str) -> Option<i32> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

#[derive(Debug, Serialize)]
pub struct QuestionSummary {
    pub id: i32,
    pub text: String,
    pub publish_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub can_vote: bool,
    pub was_published_recently: bool,
    pub url: String,
}

impl QuestionSummary {
    fn new(question: &Question, now: DateTime<Utc>) -> Self {
        Self {
            id: question.id,
            text: question.text.clone(),
            publish_time: question.publish_time,
            end_time: question.end_time,
            can_vote: question.can_vote(now),
            was_published_recently: question.was_published_recently(now),
            url: detail_url(question.id),
        }
    }
}

#[derive(Debug, Serialize)]
struct IndexView {
    latest_question_list: Vec<QuestionSummary>,
    empty_message: Option<&'static str>,
    user: Option<String>,
    messages: Vec<Notice>,
}

#[derive(Debug, Serialize)]
struct ChoiceOption {
    id: i32,
    text: String,
}

#[derive(Debug, Serialize)]
struct DetailView {
    question: Question,
    choices: Vec<ChoiceOption>,
    current_vote: Option<i32>,
    error_message: Option<String>,
    vote_url: String,
    user: Option<String>,
    messages: Vec<Notice>,
}

#[derive(Debug, Serialize)]
struct ResultsView {
    question: Question,
    choices: Vec<Choice>,
    total_votes: i64,
    user: Option<String>,
    messages: Vec<Notice>,
}

#[derive(Debug, Serialize)]
struct LoginView {
    next: Option<String>,
    error_message: Option<&'static str>,
    user: Option<String>,
    messages: Vec<Notice>,
}

fn render_detail(
    state: &AppState,
    visitor: &Visitor,
    question: Question,
    choices: Vec<Choice>,
    current_vote: Option<i32>,
    error_message: Option<String>,
) -> Response {
    let view = DetailView {
        vote_url: vote_url(question.id),
        question,
        choices: choices.into_iter().map(|c| ChoiceOption { id: c.id, text: c.text }).collect(),
        current_vote,
        error_message,
        user: visitor.username(),
        messages: visitor.notices.clone(),
    };
    render(&view, visitor, &state.config)
}

pub async fn root() -> Response {
    found(INDEX_URL)
}

/// The most recently published questions, newest first.
pub async fn index(State(state): State<AppState>, visitor: Visitor) -> Result<Response, AppError> {
    let now = state.clock.now();
    let questions = state.store.latest_published(now, LATEST_LIMIT).await?;
    let view = IndexView {
        empty_message: questions.is_empty().then_some(NO_POLLS),
        latest_question_list: questions.iter().map(|q| QuestionSummary::new(q, now)).collect(),
        user: visitor.username(),
        messages: visitor.notices.clone(),
    };
    Ok(render(&view, &visitor, &state.config))
}

pub async fn detail(State(state): State<AppState>, Path(raw_id): Path<String>, visitor: Visitor) -> Result<Response, AppError> {
    let question = match parse_question_id(&raw_id) {
        Some(id) => state.store.question(id).await?,
        None => None,
    };
    let Some(question) = question else {
        return Ok(redirect_with_notice(INDEX_URL, &visitor, Notice::error(QUESTION_MISSING), &state.config));
    };
    if !question.can_vote(state.clock.now()) {
        return Ok(redirect_with_notice(INDEX_URL, &visitor, Notice::error(VOTING_NOT_ALLOWED), &state.config));
    }

    let choices = state.store.choices(question.id).await?;
    let current_vote = match &visitor.user {
        Some(user) => state.store.user_vote(user.id, question.id).await?.map(|v| v.choice_id),
        None => None,
    };
    Ok(render_detail(&state, &visitor, question, choices, current_vote, None))
}

/// Tallies of a published question. Unpublished questions do not exist here.
pub async fn results(State(state): State<AppState>, Path(raw_id): Path<String>, visitor: Visitor) -> Result<Response, AppError> {
    let now = state.clock.now();
    let id = parse_question_id(&raw_id).ok_or(AppError::NotFound)?;
    let question = state
        .store
        .question(id)
        .await?
        .filter(|q| q.is_published(now))
        .ok_or(AppError::NotFound)?;
    let choices = state.store.choices(id).await?;
    let view = ResultsView {
        total_votes: choices.iter().map(|c| c.votes).sum(),
        question,
        choices,
        user: visitor.username(),
        messages: visitor.notices.clone(),
    };
    Ok(render(&view, &visitor, &state.config))
}

#[derive(Debug, Deserialize)]
pub struct VoteForm {
    choice: Option<String>,
}

pub async fn vote(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    visitor: Visitor,
    form: Result<Form<VoteForm>, FormRejection>,
) -> Result<Response, AppError> {
    let id = parse_question_id(&raw_id);
    let Some(user) = visitor.user.clone() else {
        let next = id.map(vote_url).unwrap_or_else(|| INDEX_URL.to_string());
        return Ok(found(&auth::login_url(&next)));
    };
    let question = match id {
        Some(id) => state.store.question(id).await?,
        None => None,
    };
    let Some(question) = question else {
        return Ok(redirect_with_notice(INDEX_URL, &visitor, Notice::error(QUESTION_MISSING), &state.config));
    };
    let question_id = question.id;
    if !question.can_vote(state.clock.now()) {
        warn!(user_id = user.id, question_id, "vote outside the voting window");
        return Ok(redirect_with_notice(INDEX_URL, &visitor, Notice::error(VOTING_NOT_ALLOWED), &state.config));
    }

    let choices = state.store.choices(question_id).await?;
    let selected = form
        .ok()
        .and_then(|Form(form)| form.choice)
        .and_then(|raw| raw.trim().parse::<i32>().ok())
        .filter(|id| choices.iter().any(|c| c.id == *id));
    let Some(choice_id) = selected else {
        let current_vote = state.store.user_vote(user.id, question_id).await?.map(|v| v.choice_id);
        return Ok(render_detail(&state, &visitor, question, choices, current_vote, Some(NO_CHOICE.to_string())));
    };

    // The choice can vanish between the listing above and the write.
    let ballot = match state.store.cast_vote(user.id, question_id, choice_id).await {
        Err(AppError::NotFound) => {
            warn!(user_id = user.id, question_id, choice_id, "choice gone before the vote landed");
            let current_vote = state.store.user_vote(user.id, question_id).await?.map(|v| v.choice_id);
            let choices = state.store.choices(question_id).await?;
            return Ok(render_detail(&state, &visitor, question, choices, current_vote, Some(NO_CHOICE.to_string())));
        }
        outcome => outcome?,
    };
    info!(user_id = user.id, question_id, choice_id, accepted = ballot.is_accepted(), "ballot cast");
    match ballot {
        Ballot::Unchanged { ref choice } => {
            let current_vote = Some(choice.id);
            Ok(render_detail(&state, &visitor, question, choices, current_vote, Some(ballot.message())))
        }
        Ballot::Recorded { .. } | Ballot::Changed { .. } => Ok(redirect_with_notice(
            &results_url(question_id),
            &visitor,
            Notice::success(ballot.message()),
            &state.config,
        )),
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    next: Option<String>,
}

pub async fn login_page(State(state): State<AppState>, Query(query): Query<LoginQuery>, visitor: Visitor) -> Response {
    let view = LoginView {
        next: query.next,
        error_message: None,
        user: visitor.username(),
        messages: visitor.notices.clone(),
    };
    render(&view, &visitor, &state.config)
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    next: Option<String>,
}

pub async fn login(State(state): State<AppState>, visitor: Visitor, Form(form): Form<LoginForm>) -> Result<Response, AppError> {
    let user = state
        .store
        .user_by_username(&form.username)
        .await?
        .filter(|user| auth::verify_password(&form.password, &user.password_hash));
    let Some(user) = user else {
        warn!(username = %form.username, "failed login");
        let view = LoginView {
            next: form.next,
            error_message: Some(BAD_CREDENTIALS),
            user: None,
            messages: visitor.notices.clone(),
        };
        return Ok(render(&view, &visitor, &state.config));
    };

    if let Some(previous) = visitor.token {
        state.store.delete_session(previous).await?;
    }
    let now = state.clock.now();
    let expires_at = now + state.config.session_ttl;
    let token = state.store.create_session(user.id, now, expires_at).await?;
    info!(user_id = user.id, "logged in");

    let target = auth::safe_next(form.next.as_deref()).unwrap_or(INDEX_URL);
    Ok(with_cookie(found(target), &session_cookie(token, &state.config)))
}

pub async fn logout(State(state): State<AppState>, visitor: Visitor) -> Result<Response, AppError> {
    if let Some(token) = visitor.token {
        state.store.delete_session(token).await?;
    }
    if let Some(user) = &visitor.user {
        info!(user_id = user.id, "logged out");
    }
    Ok(with_cookie(found(LOGIN_URL), &expired_cookie(SESSION_COOKIE, &state.config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_question_id() {
        assert_eq!(parse_question_id("42"), Some(42));
        assert_eq!(parse_question_id("3000000000"), None);
        assert_eq!(parse_question_id("-1"), None);
        assert_eq!(parse_question_id("+1"), None);
        assert_eq!(parse_question_id("abc"), None);
        assert_eq!(parse_question_id(""), None);
    }
}

//! Poll questions with time-boxed voting, one vote per user per question.
//!
//! Visitors list published questions, open the ones currently accepting votes,
//! and see tallies once a question is published. Signed-in users cast a vote,
//! repeat it (rejected) or change it to another choice.

pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod poll;
pub mod response;
pub mod routes;
pub mod services;
pub mod session;
pub mod state;
pub mod store;

pub use error::AppError;
pub use routes::create_routes;
pub use state::AppState;

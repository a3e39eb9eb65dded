// routes.rs
use axum::{
    routing::{get, post},
    Router,
};
use http::{header::CONTENT_TYPE, Method};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::handlers;
use crate::state::AppState;

pub fn create_routes(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/", get(handlers::root))
        .route("/polls/", get(handlers::index))
        .route("/polls/{id}/", get(handlers::detail))
        .route("/polls/{id}/results/", get(handlers::results))
        .route("/polls/{id}/vote/", post(handlers::vote))
        .route("/accounts/login/", get(handlers::login_page).post(handlers::login))
        .route("/accounts/logout/", get(handlers::logout).post(handlers::logout))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

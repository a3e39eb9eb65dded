// src/response.rs
use axum::{
    response::{IntoResponse, Response},
    Json,
};
use http::{header, HeaderValue, StatusCode};
use serde::Serialize;

use crate::config::Config;
use crate::session::{expired_cookie, notices_cookie, Notice, Visitor, MESSAGES_COOKIE};

/// 302 to `location`.
pub fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

pub fn with_cookie(mut response: Response, cookie: &str) -> Response {
    match HeaderValue::from_str(cookie) {
        Ok(value) => {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
        Err(e) => tracing::warn!(error = %e, "dropping unencodable cookie"),
    }
    response
}

/// Redirect that queues `notice` behind any notices the visitor has not seen yet.
pub fn redirect_with_notice(location: &str, visitor: &Visitor, notice: Notice, config: &Config) -> Response {
    let mut pending = visitor.notices.clone();
    pending.push(notice);
    with_cookie(found(location), &notices_cookie(&pending, config))
}

/// Renders a view model. Notices the visitor carried in are part of the view,
/// so their cookie is cleared.
pub fn render<T: Serialize>(view: &T, visitor: &Visitor, config: &Config) -> Response {
    let response = (StatusCode::OK, Json(view)).into_response();
    if visitor.notices.is_empty() {
        response
    } else {
        with_cookie(response, &expired_cookie(MESSAGES_COOKIE, config))
    }
}

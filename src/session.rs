// src/session.rs
//! Cookie-backed session and flash notices.
//!
//! The `sessionid` cookie carries an opaque token resolved through the
//! [`PollStore`](crate::store::PollStore). The `messages` cookie carries notices
//! queued by a redirect; they are shown by the next rendered view and cleared.

use axum::extract::FromRequestParts;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use http::{header, request::Parts, HeaderMap};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppError;
use crate::models::User;
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "sessionid";
pub const MESSAGES_COOKIE: &str = "messages";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: Level,
    pub text: String,
}

impl Notice {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            level: Level::Success,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: Level::Error,
            text: text.into(),
        }
    }
}

/// The caller of a request: who they are, and what notices are waiting for them.
#[derive(Debug, Clone, Default)]
pub struct Visitor {
    pub user: Option<User>,
    pub token: Option<Uuid>,
    pub notices: Vec<Notice>,
}

impl Visitor {
    pub fn username(&self) -> Option<String> {
        self.user.as_ref().map(|u| u.username.clone())
    }
}

impl FromRequestParts<AppState> for Visitor {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = cookie(&parts.headers, SESSION_COOKIE).and_then(|raw| Uuid::parse_str(&raw).ok());
        let user = match token {
            Some(token) => state.store.session_user(token, state.clock.now()).await?,
            None => None,
        };
        let notices = cookie(&parts.headers, MESSAGES_COOKIE)
            .map(|raw| decode_notices(&raw))
            .unwrap_or_default();

        Ok(Self { user, token, notices })
    }
}

/// Value of the first cookie called `name` across all `Cookie` headers.
pub fn cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key.trim() == name).then(|| value.trim().to_string())
        })
}

pub fn encode_notices(notices: &[Notice]) -> String {
    let json = serde_json::to_vec(notices).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

/// Undecodable cookies yield no notices.
pub fn decode_notices(raw: &str) -> Vec<Notice> {
    URL_SAFE_NO_PAD
        .decode(raw)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .unwrap_or_default()
}

fn build_cookie(name: &str, value: &str, max_age: i64, config: &Config) -> String {
    let mut cookie = format!("{name}={value}; Path=/; Max-Age={max_age}; HttpOnly; SameSite=Lax");
    if config.secure_cookies {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn session_cookie(token: Uuid, config: &Config) -> String {
    build_cookie(SESSION_COOKIE, &token.to_string(), config.session_ttl.num_seconds(), config)
}

pub fn notices_cookie(notices: &[Notice], config: &Config) -> String {
    build_cookie(MESSAGES_COOKIE, &encode_notices(notices), 3600, config)
}

pub fn expired_cookie(name: &str, config: &Config) -> String {
    build_cookie(name, "", 0, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_cookie_lookup_across_headers() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("theme=dark; lang=en"));
        headers.append(header::COOKIE, HeaderValue::from_static("sessionid = abc ;other=1"));

        assert_eq!(cookie(&headers, "lang").as_deref(), Some("en"));
        assert_eq!(cookie(&headers, SESSION_COOKIE).as_deref(), Some("abc"));
        assert_eq!(cookie(&headers, "missing"), None);
    }

    #[test]
    fn test_notices_survive_cookie_encoding() {
        let notices = vec![
            Notice::success("Your vote changed from \"A; B\" to \"C\"."),
            Notice::error("Voting is not allowed for this question."),
        ];
        let encoded = encode_notices(&notices);
        assert!(!encoded.contains(';'));
        assert_eq!(decode_notices(&encoded), notices);
    }

    #[test]
    fn test_garbage_notices_are_dropped() {
        assert!(decode_notices("%%%not-base64").is_empty());
        assert!(decode_notices(&URL_SAFE_NO_PAD.encode(b"{\"not\":\"a list\"}")).is_empty());
    }

    #[test]
    fn test_secure_flag_follows_config() {
        let mut config = Config::default();
        assert!(!session_cookie(Uuid::nil(), &config).contains("Secure"));
        config.secure_cookies = true;
        let cookie = session_cookie(Uuid::nil(), &config);
        assert!(cookie.starts_with("sessionid=00000000-0000-0000-0000-000000000000;"));
        assert!(cookie.contains("Max-Age=1209600"));
        assert!(cookie.ends_with("; Secure"));
    }
}

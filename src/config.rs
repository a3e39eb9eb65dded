// src/config.rs
use std::{env, fmt::Display, str::FromStr};

use chrono::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub session_ttl: Duration,
    pub secure_cookies: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3030,
            database_url: None,
            max_connections: 5,
            session_ttl: Duration::hours(336),
            secure_cookies: false,
        }
    }
}

impl Config {
    /// Reads the process environment, after loading `.env` if present.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let database_url = var("DATABASE_URL").filter(|url| !url.trim().is_empty());
        if database_url.is_none() {
            warn!("DATABASE_URL not set, polls are kept in memory and lost on exit");
        }

        Self {
            port: try_load("PORT", defaults.port),
            database_url,
            max_connections: try_load("DATABASE_MAX_CONNECTIONS", defaults.max_connections),
            session_ttl: Duration::hours(try_load("SESSION_TTL_HOURS", defaults.session_ttl.num_hours())),
            secure_cookies: try_load("SECURE_COOKIES", defaults.secure_cookies),
        }
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn try_load<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match var(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
            default
        }),
        None => {
            info!("{key} not set, using default: {default}");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_load_falls_back_on_garbage() {
        env::set_var("POLLS_TEST_PORT_GARBAGE", "not-a-port");
        assert_eq!(try_load("POLLS_TEST_PORT_GARBAGE", 3030u16), 3030);
    }

    #[test]
    fn test_try_load_parses_value() {
        env::set_var("POLLS_TEST_TTL", " 12 ");
        assert_eq!(try_load("POLLS_TEST_TTL", 336i64), 12);
    }

    #[test]
    fn test_var_reads_set_and_unset() {
        assert_eq!(var("POLLS_TEST_VAR_UNSET"), None);
        env::set_var("POLLS_TEST_VAR_SET", "postgres://localhost/polls");
        assert_eq!(var("POLLS_TEST_VAR_SET").as_deref(), Some("postgres://localhost/polls"));
    }

    #[test]
    fn test_try_load_missing_uses_default() {
        assert!(!try_load("POLLS_TEST_DEFINITELY_UNSET", false));
    }
}

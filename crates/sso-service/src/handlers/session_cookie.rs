//! The `session_id` cookie tying a browser to its login session.

use crate::errors::SsoError;
use axum::http::{header::COOKIE, HeaderMap, HeaderValue};

pub const SESSION_COOKIE: &str = "session_id";

#[derive(Debug, Clone, Copy)]
pub struct SessionCookie {
    max_age_seconds: i64,
    secure: bool,
}

impl SessionCookie {
    pub fn new(max_age_seconds: i64, secure: bool) -> Self {
        Self {
            max_age_seconds,
            secure,
        }
    }

    /// `Set-Cookie` value for a live session.
    pub fn issue(&self, session_id: &str) -> Result<HeaderValue, SsoError> {
        HeaderValue::from_str(&self.render(session_id, self.max_age_seconds))
            .map_err(|e| SsoError::Internal(format!("Invalid session cookie: {e}")))
    }

    /// `Set-Cookie` value that makes the browser drop the cookie.
    pub fn clear(&self) -> Result<HeaderValue, SsoError> {
        HeaderValue::from_str(&self.render("", 0))
            .map_err(|e| SsoError::Internal(format!("Invalid session cookie: {e}")))
    }

    fn render(&self, value: &str, max_age: i64) -> String {
        let mut cookie = format!(
            "{SESSION_COOKIE}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}"
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

/// Session id from the request's `Cookie` headers, if present and non-empty.
pub fn session_id_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

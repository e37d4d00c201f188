// Authentication types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Standard time-based claims read from a session token
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenClaims {
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub nbf: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
}

impl TokenClaims {
    /// Expiration as a timestamp, if the token carries one
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
    }
}

/// Session create request (`POST /api/v1/session`)
///
/// Borrows the credentials for the duration of the call only.
#[derive(Serialize)]
pub struct SessionCreateRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Session create response
#[derive(Deserialize)]
pub struct SessionResponse {
    #[serde(default)]
    pub token: String,
}

/// Identity the server associates with a bearer token
/// (`GET /api/v1/session/userinfo`)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    #[serde(default)]
    pub logged_in: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub iss: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

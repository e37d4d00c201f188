// Authentication module
// Manages the session token lifecycle against the Argo CD API server

mod credentials;
mod manager;
mod types;
mod validator;

pub use credentials::Credentials;
pub use manager::{RefreshMode, SessionManager};
pub use types::{SessionCreateRequest, SessionResponse, TokenClaims, UserInfo};
pub use validator::{validate, InvalidReason, TokenValidity};

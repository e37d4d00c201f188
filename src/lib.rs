// Argo CD session client - library root

pub mod auth;
pub mod config;
pub mod error;
pub mod http_client;

pub use auth::{Credentials, RefreshMode, SessionManager};
pub use error::SessionError;
pub use http_client::{ClientFactory, Connection, ConnectionKind, TransportOptions, TransportSecurity};

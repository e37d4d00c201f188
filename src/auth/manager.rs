use std::str::FromStr;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use super::credentials::Credentials;
use super::validator::{self, TokenValidity};
use crate::error::{Result, SessionError};
use crate::http_client::{ClientFactory, Connection};

/// How concurrent refreshes are coordinated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshMode {
    /// One caller logs in, concurrent callers wait and reuse its token
    #[default]
    SingleFlight,
    /// Every caller that finds no valid token logs in on its own
    Independent,
}

impl FromStr for RefreshMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single-flight" | "single_flight" | "singleflight" => Ok(RefreshMode::SingleFlight),
            "independent" => Ok(RefreshMode::Independent),
            other => Err(format!(
                "unknown refresh mode '{}' (expected single-flight or independent)",
                other
            )),
        }
    }
}

/// Session manager
/// Owns the current bearer token and logs in again when it is missing or stale
pub struct SessionManager {
    /// Login credentials and server address
    credentials: Credentials,

    /// Builds the bootstrap and authenticated connections
    factory: ClientFactory,

    /// Current bearer token
    current_token: RwLock<Option<String>>,

    /// Held for the duration of a refresh in single-flight mode
    refresh_gate: Mutex<()>,

    refresh_mode: RefreshMode,
}

impl SessionManager {
    /// Create a new SessionManager. No token is held until the first call.
    pub fn new(credentials: Credentials, factory: ClientFactory, refresh_mode: RefreshMode) -> Self {
        Self {
            credentials,
            factory,
            current_token: RwLock::new(None),
            refresh_gate: Mutex::new(()),
            refresh_mode,
        }
    }

    pub fn server_address(&self) -> &str {
        self.credentials.server_address()
    }

    pub fn refresh_mode(&self) -> RefreshMode {
        self.refresh_mode
    }

    /// Get a valid bearer token, logging in if necessary
    pub async fn get_valid_token(&self, cancel: &CancellationToken) -> Result<String> {
        if let Some(token) = self.held_valid_token().await {
            return Ok(token);
        }

        match self.refresh_mode {
            RefreshMode::SingleFlight => {
                let _gate = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(SessionError::cancelled("token refresh")),
                    gate = self.refresh_gate.lock() => gate,
                };

                // Another caller may have refreshed while we waited on the gate
                if let Some(token) = self.held_valid_token().await {
                    tracing::debug!("Reusing token refreshed by a concurrent caller");
                    return Ok(token);
                }

                self.refresh(cancel).await
            }
            RefreshMode::Independent => self.refresh(cancel).await,
        }
    }

    /// Get a valid token and build an authenticated connection carrying it
    pub async fn authenticated_connection(&self, cancel: &CancellationToken) -> Result<Connection> {
        let token = self.get_valid_token(cancel).await?;
        self.factory
            .build_authenticated_connection(self.credentials.server_address(), &token)
    }

    /// Drop the held token so the next acquisition logs in again.
    /// Used after the server rejects a token that still looked valid locally.
    pub async fn invalidate(&self) {
        let mut held = self.current_token.write().await;
        if held.take().is_some() {
            tracing::info!("Session token invalidated");
        }
    }

    /// Held token, if it still passes local validation
    async fn held_valid_token(&self) -> Option<String> {
        let held = self.current_token.read().await;
        let token = held.as_ref()?;

        match validator::validate(token).into_result() {
            Ok(_) => Some(token.clone()),
            Err(SessionError::TokenInvalid(reason)) => {
                tracing::info!(%reason, "Held session token is not usable, a new one is needed");
                None
            }
            Err(_) => None,
        }
    }

    /// Log in and replace the held token
    async fn refresh(&self, cancel: &CancellationToken) -> Result<String> {
        tracing::info!(
            server = %self.credentials.server_address(),
            "Either the token is absent or invalid, creating a new session"
        );

        let result = self.login(cancel).await;
        let mut held = self.current_token.write().await;

        match result {
            Ok(token) => {
                *held = Some(token.clone());
                Ok(token)
            }
            Err(e) => {
                tracing::error!("Session refresh failed: {}", e);

                // Keep a good token a concurrent refresh may have stored
                if held.as_deref().is_some_and(|t| !validator::validate(t).is_valid()) {
                    *held = None;
                }

                Err(e)
            }
        }
    }

    /// Call the login endpoint over a bootstrap connection scoped to this call
    async fn login(&self, cancel: &CancellationToken) -> Result<String> {
        const OPERATION: &str = "session create";

        let bootstrap = self
            .factory
            .build_bootstrap_connection(self.credentials.server_address())?;

        let result = bootstrap
            .create_session(
                self.credentials.username(),
                self.credentials.password(),
                cancel,
            )
            .await;
        bootstrap.close();

        let token = result?;

        match validator::validate(&token) {
            TokenValidity::Valid(claims) => {
                match claims.expires_at() {
                    Some(expires_at) => tracing::info!(
                        "Session created, token expires: {}",
                        expires_at.to_rfc3339()
                    ),
                    None => tracing::info!("Session created, token carries no expiry"),
                }
                Ok(token)
            }
            TokenValidity::Invalid(reason) => Err(SessionError::protocol(
                OPERATION,
                format!("server issued a token that is {}", reason),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::{TransportOptions, TransportSecurity};
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;
    use std::time::{Duration, Instant};

    fn mint(exp_offset_secs: i64) -> String {
        encode(
            &Header::default(),
            &json!({ "sub": "arlon", "iss": "argocd", "exp": Utc::now().timestamp() + exp_offset_secs }),
            &EncodingKey::from_secret(b"server-side-secret"),
        )
        .unwrap()
    }

    fn manager(server_address: &str, token: Option<String>) -> SessionManager {
        manager_with_mode(server_address, token, RefreshMode::SingleFlight)
    }

    fn manager_with_mode(
        server_address: &str,
        token: Option<String>,
        mode: RefreshMode,
    ) -> SessionManager {
        let factory = ClientFactory::new(TransportOptions {
            security: TransportSecurity::Plaintext,
            request_timeout: Duration::from_secs(30),
            ..Default::default()
        });
        let manager = SessionManager::new(
            Credentials::new("arlon", "secret", server_address),
            factory,
            mode,
        );
        *manager.current_token.try_write().unwrap() = token;
        manager
    }

    /// Accepts connections and never answers
    async fn silent_server() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                open.push(socket);
            }
        });
        address
    }

    async fn cancel_during_login(mode: RefreshMode) {
        let manager = manager_with_mode(&silent_server().await, Some(mint(-10)), mode);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = tokio_test::assert_err!(manager.get_valid_token(&cancel).await);

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(err, SessionError::Connection { .. }));
        assert_eq!(err.operation(), Some("session create"));
        assert!(err.to_string().contains("cancelled"));
        assert!(manager.current_token.read().await.is_none());
    }

    #[test]
    fn test_refresh_mode_from_str() {
        assert_eq!("single-flight".parse::<RefreshMode>(), Ok(RefreshMode::SingleFlight));
        assert_eq!("Single_Flight".parse::<RefreshMode>(), Ok(RefreshMode::SingleFlight));
        assert_eq!("INDEPENDENT".parse::<RefreshMode>(), Ok(RefreshMode::Independent));
        assert!("sometimes".parse::<RefreshMode>().is_err());
        assert_eq!(RefreshMode::default(), RefreshMode::SingleFlight);
    }

    #[tokio::test]
    async fn test_valid_held_token_skips_login() {
        let mut server = mockito::Server::new_async().await;
        let login = server
            .mock("POST", "/api/v1/session")
            .expect(0)
            .create_async()
            .await;

        let held = mint(3600);
        let manager = manager(&server.host_with_port(), Some(held.clone()));

        let token = manager.get_valid_token(&CancellationToken::new()).await.unwrap();
        assert_eq!(token, held);
        login.assert_async().await;
    }

    #[tokio::test]
    async fn test_expired_held_token_triggers_one_refresh() {
        let mut server = mockito::Server::new_async().await;
        let fresh = mint(3600);
        let login = server
            .mock("POST", "/api/v1/session")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "token": fresh }).to_string())
            .expect(1)
            .create_async()
            .await;

        let manager = manager(&server.host_with_port(), Some(mint(-10)));
        let cancel = CancellationToken::new();

        assert_eq!(manager.get_valid_token(&cancel).await.unwrap(), fresh);
        assert_eq!(manager.get_valid_token(&cancel).await.unwrap(), fresh);
        login.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_refresh_clears_stale_token() {
        let mut server = mockito::Server::new_async().await;
        let _login = server
            .mock("POST", "/api/v1/session")
            .with_status(401)
            .with_body(r#"{"error":"Invalid username or password","code":16}"#)
            .create_async()
            .await;

        let manager = manager(&server.host_with_port(), Some(mint(-10)));

        let err = manager
            .get_valid_token(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Authentication { .. }));
        assert!(manager.current_token.read().await.is_none());
    }

    #[tokio::test]
    async fn test_expired_token_from_server_is_protocol_error() {
        let mut server = mockito::Server::new_async().await;
        let _login = server
            .mock("POST", "/api/v1/session")
            .with_status(200)
            .with_body(json!({ "token": mint(-60) }).to_string())
            .create_async()
            .await;

        let manager = manager(&server.host_with_port(), None);

        let err = manager
            .get_valid_token(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Protocol { .. }));
        assert!(err.to_string().contains("expired"));
        assert!(manager.current_token.read().await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_forces_login() {
        let mut server = mockito::Server::new_async().await;
        let login = server
            .mock("POST", "/api/v1/session")
            .with_status(200)
            .with_body(json!({ "token": mint(3600) }).to_string())
            .expect(1)
            .create_async()
            .await;

        let manager = manager(&server.host_with_port(), Some(mint(3600)));
        manager.invalidate().await;
        assert!(manager.current_token.read().await.is_none());

        manager.get_valid_token(&CancellationToken::new()).await.unwrap();
        login.assert_async().await;
    }

    #[tokio::test]
    async fn test_cancelled_before_refresh() {
        let manager = manager("127.0.0.1:9", None);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = tokio_test::assert_err!(manager.get_valid_token(&cancel).await);
        assert!(matches!(err, SessionError::Connection { .. }));
        assert!(err.to_string().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_cancel_during_login_single_flight() {
        cancel_during_login(RefreshMode::SingleFlight).await;
    }

    #[tokio::test]
    async fn test_cancel_during_login_independent() {
        cancel_during_login(RefreshMode::Independent).await;
    }

    #[tokio::test]
    async fn test_authenticated_connection() {
        let manager = manager("svc:80", Some(mint(3600)));

        let conn = manager
            .authenticated_connection(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(conn.kind(), crate::http_client::ConnectionKind::Authenticated);
        assert_eq!(conn.base_url().as_str(), "http://svc:80/");
    }
}

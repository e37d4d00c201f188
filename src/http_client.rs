use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::auth::{SessionCreateRequest, SessionResponse, UserInfo};
use crate::error::{Result, SessionError};

const SESSION_PATH: &str = "/api/v1/session";
const USER_INFO_PATH: &str = "/api/v1/session/userinfo";

/// How the transport to the API server is secured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportSecurity {
    /// TLS with certificate verification
    #[default]
    Tls,
    /// TLS without certificate verification
    TlsSkipVerify,
    /// Plain HTTP, no TLS at all
    Plaintext,
}

impl TransportSecurity {
    pub fn is_insecure(self) -> bool {
        !matches!(self, TransportSecurity::Tls)
    }

    fn scheme(self) -> &'static str {
        match self {
            TransportSecurity::Plaintext => "http",
            TransportSecurity::Tls | TransportSecurity::TlsSkipVerify => "https",
        }
    }
}

/// Options applied to every connection a factory builds
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub security: TransportSecurity,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            security: TransportSecurity::Tls,
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Whether a connection carries a bearer token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    /// No credential; only used to request a new token
    Bootstrap,
    /// Carries a bearer token on every request
    Authenticated,
}

/// Builds bootstrap and authenticated connections to an Argo CD API server
#[derive(Debug, Clone)]
pub struct ClientFactory {
    options: TransportOptions,
}

impl ClientFactory {
    /// Create a new factory. Insecure transport modes are logged once here.
    pub fn new(options: TransportOptions) -> Self {
        match options.security {
            TransportSecurity::Plaintext => tracing::warn!(
                "Transport security disabled: credentials and tokens are sent in plaintext"
            ),
            TransportSecurity::TlsSkipVerify => tracing::warn!(
                "TLS certificate verification disabled: the server identity is not checked"
            ),
            TransportSecurity::Tls => {}
        }

        Self { options }
    }

    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    /// Build a connection with no embedded token
    pub fn build_bootstrap_connection(&self, server_address: &str) -> Result<Connection> {
        self.build(server_address, None)
    }

    /// Build a connection that sends `token` as a bearer credential.
    /// The server is not asked whether it accepts the token.
    pub fn build_authenticated_connection(
        &self,
        server_address: &str,
        token: &str,
    ) -> Result<Connection> {
        self.build(server_address, Some(token))
    }

    fn build(&self, server_address: &str, token: Option<&str>) -> Result<Connection> {
        const OPERATION: &str = "connection setup";

        let base_url = base_url(server_address, self.options.security)?;

        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
                SessionError::connection(OPERATION, "token cannot be sent as a bearer header")
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(self.options.connect_timeout)
            .timeout(self.options.request_timeout)
            .danger_accept_invalid_certs(
                self.options.security == TransportSecurity::TlsSkipVerify,
            )
            .build()
            .map_err(|e| {
                SessionError::connection(OPERATION, format!("failed to create HTTP client: {}", e))
            })?;

        let kind = if token.is_some() {
            ConnectionKind::Authenticated
        } else {
            ConnectionKind::Bootstrap
        };

        tracing::debug!(url = %base_url, kind = ?kind, "Connection built");

        Ok(Connection {
            client,
            base_url,
            kind,
        })
    }
}

/// Turn a `host:port` address into the base URL for the given transport
fn base_url(server_address: &str, security: TransportSecurity) -> Result<Url> {
    let address = server_address.trim().trim_end_matches('/');
    if address.is_empty() {
        return Err(SessionError::connection(
            "connection setup",
            "server address is empty",
        ));
    }
    if address.contains("://") {
        return Err(SessionError::connection(
            "connection setup",
            format!("server address must be host:port, got {}", address),
        ));
    }

    let url = Url::parse(&format!("{}://{}", security.scheme(), address)).map_err(|e| {
        SessionError::connection(
            "connection setup",
            format!("invalid server address {}: {}", address, e),
        )
    })?;

    if url.host_str().is_none() || url.path() != "/" {
        return Err(SessionError::connection(
            "connection setup",
            format!("server address must be host:port, got {}", address),
        ));
    }

    Ok(url)
}

/// A channel to the API server, with or without a bearer token.
/// Released when dropped.
pub struct Connection {
    client: Client,
    base_url: Url,
    kind: ConnectionKind,
}

impl Connection {
    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Release the connection now rather than at end of scope
    pub fn close(self) {}

    /// Call the session create endpoint and return the issued token
    pub async fn create_session(
        &self,
        username: &str,
        password: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        const OPERATION: &str = "session create";

        let request = SessionCreateRequest { username, password };
        let response: SessionResponse = self
            .post_json_as(OPERATION, SESSION_PATH, &request, cancel)
            .await?;

        if response.token.is_empty() {
            return Err(SessionError::protocol(
                OPERATION,
                "response does not contain a token",
            ));
        }

        Ok(response.token)
    }

    /// Ask the server who the bearer token belongs to
    pub async fn user_info(&self, cancel: &CancellationToken) -> Result<UserInfo> {
        self.get_json_as("user info", USER_INFO_PATH, cancel).await
    }

    /// GET `path` and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<T> {
        self.get_json_as("api get", path, cancel).await
    }

    /// POST `body` as JSON to `path` and decode the JSON response
    pub async fn post_json<B, T>(&self, path: &str, body: &B, cancel: &CancellationToken) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.post_json_as("api post", path, body, cancel).await
    }

    async fn get_json_as<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let url = self.url(operation, path)?;
        let call = async {
            let response = self.send(operation, self.client.get(url)).await?;
            decode_json(operation, response).await
        };
        until_cancelled(operation, cancel, call).await
    }

    async fn post_json_as<B, T>(
        &self,
        operation: &'static str,
        path: &str,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(operation, path)?;
        let call = async {
            let response = self.send(operation, self.client.post(url).json(body)).await?;
            decode_json(operation, response).await
        };
        until_cancelled(operation, cancel, call).await
    }

    fn url(&self, operation: &'static str, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(|e| {
            SessionError::connection(operation, format!("invalid request path {}: {}", path, e))
        })
    }

    /// Send a request and map the status to the session error taxonomy
    async fn send(&self, operation: &'static str, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| SessionError::from_reqwest(operation, e))?;

        let status = response.status();
        tracing::debug!(operation, status = %status, "Received HTTP response");

        if status.is_success() {
            return Ok(response);
        }

        let error_text = response.text().await.unwrap_or_default();
        let message = error_message(status, &error_text);

        tracing::warn!(
            operation,
            status = status.as_u16(),
            "API server returned an error response"
        );

        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                SessionError::authentication(operation, message)
            }
            StatusCode::TOO_MANY_REQUESTS => SessionError::connection(operation, message),
            s if s.is_server_error() => SessionError::connection(operation, message),
            _ => SessionError::protocol(operation, message),
        })
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("base_url", &self.base_url.as_str())
            .field("kind", &self.kind)
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        tracing::trace!(url = %self.base_url, kind = ?self.kind, "Connection released");
    }
}

/// Drive `call` unless the caller cancels first; the in-flight request is dropped
async fn until_cancelled<T>(
    operation: &'static str,
    cancel: &CancellationToken,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SessionError::cancelled(operation)),
        result = call => result,
    }
}

async fn decode_json<T: DeserializeOwned>(operation: &'static str, response: Response) -> Result<T> {
    let body = response
        .bytes()
        .await
        .map_err(|e| SessionError::from_reqwest(operation, e))?;

    serde_json::from_slice(&body)
        .map_err(|e| SessionError::protocol(operation, format!("malformed response body: {}", e)))
}

/// Prefer the server's `message`/`error` field over the raw body
fn error_message(status: StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            json.get("message")
                .or_else(|| json.get("error"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string());

    if detail.is_empty() {
        status.to_string()
    } else {
        format!("{} - {}", status, detail)
    }
}

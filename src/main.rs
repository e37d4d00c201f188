use anyhow::Result;
use tokio_util::sync::CancellationToken;

use argocd_session::{config, ClientFactory, SessionError, SessionManager};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let mut config = config::Config::load()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    config.validate()?;
    if config.ask_password {
        config.prompt_password()?;
    }

    tracing::info!(
        server = %config.server_address,
        transport = ?config.transport_security,
        refresh_mode = ?config.refresh_mode,
        "Starting Argo CD session"
    );

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let factory = ClientFactory::new(config.transport_options());
    let manager = SessionManager::new(config.credentials(), factory, config.refresh_mode);

    let user_info = match manager.authenticated_connection(&cancel).await {
        Ok(connection) => connection.user_info(&cancel).await,
        Err(e) => Err(e),
    };

    match user_info {
        Ok(info) if info.logged_in => {
            tracing::info!(
                issuer = %info.iss,
                groups = ?info.groups,
                "✅ Authenticated against Argo CD"
            );
            println!("Logged in to {} as {}", manager.server_address(), info.username);
            Ok(())
        }
        Ok(_) => {
            tracing::error!("❌ Server accepted the token but reports the session as logged out");
            anyhow::bail!("Argo CD session is not logged in");
        }
        Err(e) => {
            report_failure(&e, manager.server_address());
            Err(e.into())
        }
    }
}

/// Remediation differs for unreachable servers and rejected credentials
fn report_failure(err: &SessionError, server: &str) {
    tracing::error!("❌ Failed to acquire an Argo CD session: {}", err);

    match err {
        SessionError::Connection { .. } => {
            tracing::error!("🔧 Cannot reach {}:", server);
            tracing::error!("   1. Check that the server address and port are correct");
            tracing::error!("   2. Check --plaintext / --insecure match the server's TLS setup");
            tracing::error!("   3. Check network policies between this pod and the server");
        }
        SessionError::Authentication { .. } => {
            tracing::error!("🔧 The server rejected the credentials:");
            tracing::error!("   1. Verify ARGOCD_USERNAME and ARGOCD_PASSWORD");
            tracing::error!("   2. Check that the account has the login capability enabled");
        }
        SessionError::Protocol { .. } | SessionError::TokenInvalid(_) => {
            tracing::error!("🔧 The server answered unexpectedly, is {} an Argo CD API server?", server);
        }
    }
}

/// Cancel in-flight session calls on Ctrl+C or SIGTERM
async fn cancel_on_signal(cancel: CancellationToken) {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, cancelling...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, cancelling...");
        },
        _ = cancel.cancelled() => return,
    }

    cancel.cancel();
}

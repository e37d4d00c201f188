use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::Password;
use std::fmt;
use std::time::Duration;

use crate::auth::{Credentials, RefreshMode};
use crate::http_client::{TransportOptions, TransportSecurity};

/// Argo CD session client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Username for the Argo CD server
    #[arg(long = "argocd-username", env = "ARGOCD_USERNAME", default_value = "arlon")]
    pub username: String,

    /// Password for the Argo CD server
    #[arg(
        long = "argocd-password",
        env = "ARGOCD_PASSWORD",
        default_value = "",
        hide_env_values = true,
        hide_default_value = true
    )]
    pub password: String,

    /// Address (host:port) of the Argo CD server
    #[arg(long = "argocd-server", env = "ARGOCD_SERVER", default_value = "argocd-server:80")]
    pub server: String,

    /// Talk plain HTTP to the server (no TLS)
    #[arg(long, env = "ARGOCD_PLAINTEXT")]
    pub plaintext: bool,

    /// Skip TLS certificate verification
    #[arg(long, env = "ARGOCD_INSECURE")]
    pub insecure: bool,

    /// Refresh coordination (single-flight, independent)
    #[arg(long, env = "ARGOCD_REFRESH_MODE", default_value = "single-flight")]
    pub refresh_mode: String,

    /// Connect timeout in seconds
    #[arg(long, env = "ARGOCD_CONNECT_TIMEOUT", default_value = "30")]
    pub connect_timeout: u64,

    /// Request timeout in seconds
    #[arg(long, env = "ARGOCD_REQUEST_TIMEOUT", default_value = "60")]
    pub request_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Prompt for the password instead of reading it from flags or env
    #[arg(long)]
    pub ask_password: bool,
}

#[derive(Clone)]
pub struct Config {
    // Credentials
    pub username: String,
    pub password: String,
    pub server_address: String,

    // Transport
    pub transport_security: TransportSecurity,
    pub connect_timeout: u64,
    pub request_timeout: u64,

    // Session
    pub refresh_mode: RefreshMode,

    // Logging
    pub log_level: String,

    pub ask_password: bool,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Self::from_args(CliArgs::parse())
    }

    /// Build config from parsed arguments
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let refresh_mode = args
            .refresh_mode
            .parse::<RefreshMode>()
            .map_err(anyhow::Error::msg)
            .context("Invalid --refresh-mode")?;

        Ok(Config {
            username: args.username,
            password: args.password,
            server_address: args.server,
            transport_security: transport_security(args.plaintext, args.insecure),
            connect_timeout: args.connect_timeout,
            request_timeout: args.request_timeout,
            refresh_mode,
            log_level: args.log_level,
            ask_password: args.ask_password,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout == 0 {
            anyhow::bail!("ARGOCD_CONNECT_TIMEOUT must be greater than zero");
        }
        if self.request_timeout == 0 {
            anyhow::bail!("ARGOCD_REQUEST_TIMEOUT must be greater than zero");
        }
        if self.password.is_empty() && !self.ask_password {
            tracing::warn!("No Argo CD password configured, login will most likely be rejected");
        }

        Ok(())
    }

    /// Ask for the password on the terminal
    pub fn prompt_password(&mut self) -> Result<()> {
        self.password = Password::new()
            .with_prompt(format!("Password for {} on {}", self.username, self.server_address))
            .allow_empty_password(true)
            .interact()
            .context("Failed to read Argo CD password")?;

        Ok(())
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.username, &self.password, &self.server_address)
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            security: self.transport_security,
            connect_timeout: Duration::from_secs(self.connect_timeout),
            request_timeout: Duration::from_secs(self.request_timeout),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("password", &"<redacted>")
            .field("server_address", &self.server_address)
            .field("transport_security", &self.transport_security)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("refresh_mode", &self.refresh_mode)
            .field("log_level", &self.log_level)
            .finish()
    }
}

/// Plaintext wins over insecure; neither means verified TLS
fn transport_security(plaintext: bool, insecure: bool) -> TransportSecurity {
    match (plaintext, insecure) {
        (true, _) => TransportSecurity::Plaintext,
        (false, true) => TransportSecurity::TlsSkipVerify,
        (false, false) => TransportSecurity::Tls,
    }
}

//! Per-download configuration (timeouts, TLS material, proxy, credentials).
//!
//! All of these are static for the lifetime of a download and are carried
//! through to the protocol adapters untouched; nothing here is renegotiated
//! mid-flight. The types derive serde so callers can load them from their own
//! configuration files.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default connect timeout (30 seconds).
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default read timeout (5 minutes for large artifacts).
pub const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Static configuration for one download.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadOptions {
    /// Connect timeout for new connections.
    pub connect_timeout: Duration,
    /// Read timeout applied to the streamed body.
    pub read_timeout: Duration,
    /// Optional User-Agent override.
    pub user_agent: Option<String>,
    /// Extra headers sent with every HTTP request, in order.
    pub headers: Vec<(String, String)>,
    /// Basic-auth credentials (HTTP) or login credentials (FTP).
    pub basic_auth: Option<BasicAuth>,
    /// Proxy URL applied to the shared HTTP client.
    pub proxy_url: Option<String>,
    /// TLS material for the shared HTTP client.
    pub tls: TlsOptions,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            read_timeout: READ_TIMEOUT,
            user_agent: None,
            headers: Vec::new(),
            basic_auth: None,
            proxy_url: None,
            tls: TlsOptions::default(),
        }
    }
}

/// Username/password credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicAuth {
    /// The account name.
    pub username: String,
    /// The password, when the scheme requires one.
    pub password: Option<String>,
}

impl BasicAuth {
    /// Creates credentials with a password.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Some(password.into()),
        }
    }
}

/// TLS configuration for the shared HTTP client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsOptions {
    /// Extra PEM CA bundle trusted in addition to system roots.
    pub ca_certificate: Option<PathBuf>,
    /// Disable certificate verification. Only for controlled environments.
    pub accept_invalid_certs: bool,
}

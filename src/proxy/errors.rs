//! Error types for proxy resolution and tunneling.

use thiserror::Error;

/// Failure to resolve a proxy URL from the process environment.
///
/// Callers that want "best effort" behavior treat both variants as
/// non-fatal; they are distinguishable so diagnostics can say which
/// case occurred.
#[derive(Debug, Error)]
pub enum EnvProxyError {
    /// Neither `https_proxy` nor `HTTPS_PROXY` carries a non-empty value.
    #[error("no https_proxy environment variable set")]
    NotConfigured,

    /// A variable was set but its value did not parse as a URL.
    #[error("invalid https_proxy URL {value:?}: {source}")]
    Invalid {
        value: String,
        #[source]
        source: url::ParseError,
    },
}

/// Errors raised while establishing a tunnel through a proxy server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProxyError {
    /// Network connectivity error (DNS resolution, connection refused).
    #[error("network error: {0}")]
    Network(String),

    /// Authentication error (407, invalid credentials).
    #[error("authentication error: {0}")]
    Auth(String),

    /// Proxy server error (5xx responses, protocol violations).
    #[error("proxy error: {0}")]
    Proxy(String),

    /// Connection timeout.
    #[error("timeout error: {0}")]
    Timeout(String),

    /// Invalid connector configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ProxyError {
    pub fn network(msg: impl Into<String>) -> Self {
        ProxyError::Network(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        ProxyError::Auth(msg.into())
    }

    pub fn proxy(msg: impl Into<String>) -> Self {
        ProxyError::Proxy(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        ProxyError::Timeout(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        ProxyError::Config(msg.into())
    }

    /// Error category label for structured logging.
    pub fn category(&self) -> &'static str {
        match self {
            ProxyError::Network(_) => "network",
            ProxyError::Auth(_) => "auth",
            ProxyError::Proxy(_) => "proxy",
            ProxyError::Timeout(_) => "timeout",
            ProxyError::Config(_) => "config",
        }
    }
}

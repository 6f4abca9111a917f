//! Smart-HTTP transport factory for `git2`.
//!
//! Builds ready-to-use HTTPS transports for a Git client from two inputs:
//! a `rustls` client configuration supplied by the caller, and an optional
//! HTTP proxy — given explicitly as [`ProxyOptions`] or resolved from the
//! `https_proxy`/`HTTPS_PROXY` environment variables.
//!
//! Proxy resolution never fails the factory: a malformed or missing proxy
//! URL degrades to a direct connection and emits a single informational
//! diagnostic.

pub mod logging;
pub mod proxy;
pub mod transport;

pub use proxy::{resolve_env_https_proxy, EnvProxyError, ProxyError, ProxyOptions, ResolvedProxy};
pub use transport::{ensure_registered, TransportFactory, CUSTOM_SCHEME};

//! Proxy descriptor, environment resolution, and HTTP CONNECT tunneling.
//!
//! This module provides:
//! - [`ProxyOptions`], the caller-supplied proxy descriptor
//! - [`resolve_env_https_proxy`], lookup of `https_proxy`/`HTTPS_PROXY`
//! - [`HttpProxyConnector`], the CONNECT tunnel used by the transport layer

pub mod connector;
pub mod errors;
pub mod options;

pub use connector::HttpProxyConnector;
pub use errors::{EnvProxyError, ProxyError};
pub use options::{resolve_env_https_proxy, ProxyOptions, ResolvedProxy};

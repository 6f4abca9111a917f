//! Transport factory: TLS configuration plus optional proxy in, ready
//! smart-HTTP transport out.

pub mod subtransport;
pub(crate) mod stream;

use std::sync::{Arc, OnceLock};

use git2::transport::Transport;
use git2::{Error, Remote};
use rustls::ClientConfig;
use url::Url;

use crate::proxy::{resolve_env_https_proxy, ProxyOptions, ResolvedProxy};

pub use subtransport::HttpsSubtransport;

/// URL scheme served by the registered factory, e.g.
/// `https+custom://git.example.com/owner/repo.git`.
pub const CUSTOM_SCHEME: &str = "https+custom";

/// Builds smart-HTTP transports for a Git client.
///
/// The effective proxy is resolved once at construction: the explicit
/// [`ProxyOptions`] when supplied, otherwise the `https_proxy`/`HTTPS_PROXY`
/// environment variables. Resolution never fails — a malformed or missing
/// proxy URL logs one informational diagnostic and the factory falls back
/// to direct connections. The TLS configuration is forwarded to every
/// transport unchanged.
pub struct TransportFactory {
    tls: Arc<ClientConfig>,
    proxy: Option<ResolvedProxy>,
}

impl TransportFactory {
    pub fn new(tls: Arc<ClientConfig>, options: Option<&ProxyOptions>) -> Self {
        let proxy = resolve_proxy(options);
        Self { tls, proxy }
    }

    /// The TLS configuration every produced transport will use.
    pub fn tls_config(&self) -> &Arc<ClientConfig> {
        &self.tls
    }

    /// The proxy URL every produced transport will use, when one resolved.
    pub fn proxy_url(&self) -> Option<&Url> {
        self.proxy.as_ref().map(|p| &p.url)
    }

    /// The resolved proxy endpoint, including credentials.
    pub fn resolved_proxy(&self) -> Option<&ResolvedProxy> {
        self.proxy.as_ref()
    }

    /// Fresh subtransport carrying this factory's TLS and proxy settings.
    pub fn subtransport(&self) -> HttpsSubtransport {
        HttpsSubtransport::new(self.tls.clone(), self.proxy.clone())
    }

    /// Build a transport for `remote`. Smart HTTP is stateless, so the
    /// transport runs in stateless-rpc mode. Proxy resolution can never
    /// fail this call; only libgit2 itself can.
    pub fn create(&self, remote: &Remote<'_>) -> Result<Transport, Error> {
        Transport::smart(remote, true, self.subtransport())
    }
}

/// Resolve the effective proxy, absorbing every failure into "no proxy".
fn resolve_proxy(options: Option<&ProxyOptions>) -> Option<ResolvedProxy> {
    match options {
        Some(opts) => match Url::parse(&opts.url) {
            Ok(url) => Some(ResolvedProxy::from_url(
                url,
                opts.username.clone(),
                opts.password.clone(),
            )),
            Err(e) => {
                tracing::info!(
                    target: "git.transport",
                    url = %opts.sanitized_url(),
                    error = %e,
                    "failed to parse proxy url; continuing without proxy"
                );
                None
            }
        },
        None => match resolve_env_https_proxy() {
            Ok(url) => Some(ResolvedProxy::from_url(url, None, None)),
            Err(e) => {
                tracing::info!(
                    target: "git.transport",
                    error = %e,
                    "https_proxy environment variable is not set or invalid; continuing without proxy"
                );
                None
            }
        },
    }
}

static REGISTER_ONCE: OnceLock<()> = OnceLock::new();

/// Register `factory` for the [`CUSTOM_SCHEME`] URL prefix, once per
/// process. Later calls are no-ops; libgit2 requires external
/// synchronization around registration, which the `OnceLock` provides.
pub fn ensure_registered(factory: TransportFactory) -> Result<(), Error> {
    let mut err: Option<Error> = None;
    REGISTER_ONCE.get_or_init(|| {
        let r = unsafe {
            git2::transport::register(CUSTOM_SCHEME, move |remote: &Remote<'_>| {
                factory.create(remote)
            })
        };
        if let Err(e) = r {
            err = Some(e);
        }
    });
    match err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

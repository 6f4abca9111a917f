//! HTTPS smart subtransport with injected TLS configuration.

use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use git2::Error;
use rustls::{ClientConfig, ClientConnection, ServerName, StreamOwned};
use url::Url;

use crate::proxy::{HttpProxyConnector, ResolvedProxy};

use super::stream::{HttpOp, HttpStream};

/// Timeout for establishing the proxy tunnel. Request timeouts are owned by
/// libgit2, not by this layer.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Smart subtransport that opens TLS connections with a caller-supplied
/// `rustls` configuration, optionally tunneled through an HTTP proxy.
pub struct HttpsSubtransport {
    tls: Arc<ClientConfig>,
    proxy: Option<ResolvedProxy>,
}

impl HttpsSubtransport {
    pub(crate) fn new(tls: Arc<ClientConfig>, proxy: Option<ResolvedProxy>) -> Self {
        Self { tls, proxy }
    }

    fn connect_tcp(&self, host: &str, port: u16) -> Result<TcpStream, Error> {
        match &self.proxy {
            Some(proxy) => {
                let connector = HttpProxyConnector::new(proxy.clone(), CONNECT_TIMEOUT);
                connector.connect(host, port).map_err(|e| {
                    tracing::debug!(target="git.transport", host=%host, port=%port, error=%e, category=%e.category(), "proxy tunnel failed");
                    Error::from_str(&format!("proxy tunnel: {e}"))
                })
            }
            None => {
                let addr = format!("{host}:{port}");
                TcpStream::connect(addr.as_str()).map_err(|e| {
                    tracing::debug!(target="git.transport", host=%host, port=%port, error=%e, "tcp connect failed");
                    Error::from_str(&format!("tcp connect: {e}"))
                })
            }
        }
    }

    fn connect_tls(
        &self,
        host: &str,
        port: u16,
    ) -> Result<StreamOwned<ClientConnection, TcpStream>, Error> {
        let tcp = self.connect_tcp(host, port)?;
        tcp.set_nodelay(true).ok();

        let server_name = ServerName::try_from(host)
            .map_err(|_| Error::from_str("invalid server name"))?;
        let mut conn = ClientConnection::new(self.tls.clone(), server_name)
            .map_err(|e| Error::from_str(&format!("tls client: {e}")))?;
        conn.complete_io(&mut &tcp)
            .map_err(|e| Error::from_str(&format!("tls handshake: {e}")))?;
        Ok(StreamOwned::new(conn, tcp))
    }
}

impl git2::transport::SmartSubtransport for HttpsSubtransport {
    fn action(
        &self,
        url: &str,
        action: git2::transport::Service,
    ) -> Result<Box<dyn git2::transport::SmartSubtransportStream>, Error> {
        tracing::debug!(target="git.transport", url=%url, "subtransport action");
        let parsed = Url::parse(url).map_err(|e| Error::from_str(&format!("bad url: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| Error::from_str("missing host"))?
            .to_string();
        let port = parsed.port_or_known_default().unwrap_or(443);
        let path = parsed.path().trim_end_matches('/').to_string();

        tracing::debug!(
            target="git.transport",
            host=%host,
            port=%port,
            proxied=%self.proxy.is_some(),
            "connecting"
        );
        let stream = self.connect_tls(&host, port)?;

        let op = match action {
            git2::transport::Service::UploadPackLs => HttpOp::InfoRefsUpload,
            git2::transport::Service::UploadPack => HttpOp::UploadPack,
            git2::transport::Service::ReceivePackLs => HttpOp::InfoRefsReceive,
            git2::transport::Service::ReceivePack => HttpOp::ReceivePack,
        };

        Ok(Box::new(HttpStream::new(stream, host, port, path, op)))
    }

    fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

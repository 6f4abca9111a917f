//! HTTP CONNECT tunneling through a proxy server.
//!
//! Establishes a TCP tunnel (RFC 2817 CONNECT) to the target host through
//! an HTTP proxy, with optional Basic authentication and timeout control.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD, Engine};

use super::errors::ProxyError;
use super::options::ResolvedProxy;

/// HTTP proxy connector using the CONNECT tunnel method.
pub struct HttpProxyConnector {
    proxy: ResolvedProxy,
    timeout: Duration,
}

impl HttpProxyConnector {
    pub fn new(proxy: ResolvedProxy, timeout: Duration) -> Self {
        Self { proxy, timeout }
    }

    /// Open a TCP stream to `host:port` tunneled through the proxy.
    pub fn connect(&self, host: &str, port: u16) -> Result<TcpStream, ProxyError> {
        let start = Instant::now();

        let proxy_host = self
            .proxy
            .host()
            .ok_or_else(|| ProxyError::config("proxy URL missing host"))?;
        let proxy_port = self.proxy.port();

        tracing::debug!(
            proxy.url = %self.proxy.sanitized_url(),
            target.host = %host,
            target.port = %port,
            "connecting through HTTP proxy"
        );

        let proxy_addr = format!("{proxy_host}:{proxy_port}")
            .to_socket_addrs()
            .map_err(|e| ProxyError::network(format!("failed to resolve proxy address: {e}")))?
            .next()
            .ok_or_else(|| ProxyError::network("no addresses resolved for proxy"))?;

        let mut stream = TcpStream::connect_timeout(&proxy_addr, self.timeout).map_err(|e| {
            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                ProxyError::timeout(format!("proxy connection timeout: {e}"))
            } else {
                ProxyError::network(format!("proxy connection failed: {e}"))
            }
        })?;

        stream
            .set_read_timeout(Some(self.timeout))
            .map_err(|e| ProxyError::network(format!("failed to set read timeout: {e}")))?;
        stream
            .set_write_timeout(Some(self.timeout))
            .map_err(|e| ProxyError::network(format!("failed to set write timeout: {e}")))?;

        self.send_connect_request(&mut stream, host, port)
            .map_err(|e| {
                tracing::warn!(
                    error = %e,
                    error_category = e.category(),
                    elapsed_ms = start.elapsed().as_millis(),
                    "CONNECT request failed"
                );
                e
            })?;

        tracing::debug!(
            proxy.url = %self.proxy.sanitized_url(),
            target.host = %host,
            target.port = %port,
            elapsed_ms = start.elapsed().as_millis(),
            "HTTP proxy tunnel established"
        );

        Ok(stream)
    }

    /// Basic auth header value when credentials are present.
    fn auth_header(&self) -> Option<String> {
        match (&self.proxy.username, &self.proxy.password) {
            (Some(user), Some(pass)) => {
                let encoded = STANDARD.encode(format!("{user}:{pass}").as_bytes());
                Some(format!("Basic {encoded}"))
            }
            _ => None,
        }
    }

    fn send_connect_request(
        &self,
        stream: &mut TcpStream,
        target_host: &str,
        target_port: u16,
    ) -> Result<(), ProxyError> {
        let mut request = format!(
            "CONNECT {target_host}:{target_port} HTTP/1.1\r\n\
             Host: {target_host}:{target_port}\r\n"
        );
        if let Some(auth) = self.auth_header() {
            request.push_str(&format!("Proxy-Authorization: {auth}\r\n"));
        }
        request.push_str("\r\n");

        stream
            .write_all(request.as_bytes())
            .map_err(|e| ProxyError::network(format!("failed to send CONNECT request: {e}")))?;
        stream
            .flush()
            .map_err(|e| ProxyError::network(format!("failed to flush CONNECT request: {e}")))?;

        // Read the response head one byte at a time, stopping exactly at the
        // blank line. Buffered reads could consume bytes that already belong
        // to the tunnel.
        const MAX_RESPONSE_HEAD: usize = 8 * 1024;
        let mut head: Vec<u8> = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            if head.len() >= MAX_RESPONSE_HEAD {
                return Err(ProxyError::proxy("proxy response head too large"));
            }
            let n = stream
                .read(&mut byte)
                .map_err(|e| ProxyError::network(format!("failed to read proxy response: {e}")))?;
            if n == 0 {
                return Err(ProxyError::network(
                    "proxy closed connection during CONNECT",
                ));
            }
            head.push(byte[0]);
        }

        let first_line_end = head.iter().position(|&b| b == b'\r').unwrap_or(head.len());
        let status_line = String::from_utf8_lossy(&head[..first_line_end]);

        let parts: Vec<&str> = status_line.split_whitespace().collect();
        if parts.len() < 2 {
            return Err(ProxyError::proxy(format!(
                "invalid proxy response: {}",
                status_line.trim()
            )));
        }
        let status_code = parts[1]
            .parse::<u16>()
            .map_err(|_| ProxyError::proxy(format!("invalid status code in response: {}", parts[1])))?;

        match status_code {
            200 => Ok(()),
            407 => Err(ProxyError::auth("proxy authentication required (407)")),
            502 => Err(ProxyError::proxy("bad gateway (502): proxy cannot reach target")),
            other => Err(ProxyError::proxy(format!("proxy returned error status: {other}"))),
        }
    }
}

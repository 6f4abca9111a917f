//! Smart-HTTP protocol stream handed back to libgit2.
//!
//! libgit2 drives the stream through `Read`/`Write`: request bodies are
//! written first (buffered for the POST phases), then the response body is
//! read back. This type owns the HTTP framing on top of an established
//! connection: it sends the request, parses the response head, and decodes
//! chunked, content-length, and read-to-EOF bodies.

use std::io::{Read, Write};

/// The four phases of the smart-HTTP protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HttpOp {
    /// GET /info/refs?service=git-upload-pack
    InfoRefsUpload,
    /// POST /git-upload-pack
    UploadPack,
    /// GET /info/refs?service=git-receive-pack
    InfoRefsReceive,
    /// POST /git-receive-pack
    ReceivePack,
}

impl HttpOp {
    fn is_post(self) -> bool {
        matches!(self, HttpOp::UploadPack | HttpOp::ReceivePack)
    }

    fn info_refs_service(self) -> &'static str {
        match self {
            HttpOp::InfoRefsUpload => "git-upload-pack",
            HttpOp::InfoRefsReceive => "git-receive-pack",
            _ => unreachable!("not an info/refs phase"),
        }
    }

    fn post_endpoint(self) -> &'static str {
        match self {
            HttpOp::UploadPack => "git-upload-pack",
            HttpOp::ReceivePack => "git-receive-pack",
            _ => unreachable!("not a POST phase"),
        }
    }
}

enum BodyEncoding {
    Chunked,
    Length,
    Eof,
}

pub(crate) struct HttpStream<S> {
    inner: S,
    host: String,
    port: u16,
    path: String,
    op: HttpOp,
    // request side
    post_buf: Vec<u8>,
    posted: bool,
    requested: bool,
    // response head
    headers_parsed: bool,
    header_buf: Vec<u8>,
    encoding: Option<BodyEncoding>,
    fatal_status: Option<(u16, String)>,
    // response body
    inbuf: Vec<u8>,
    decoded: Vec<u8>,
    chunk_remaining: usize,
    reading_chunk_size: bool,
    trailer_mode: bool,
    content_remaining: usize,
    eof: bool,
}

impl<S: Read + Write> HttpStream<S> {
    pub(crate) fn new(inner: S, host: String, port: u16, path: String, op: HttpOp) -> Self {
        Self {
            inner,
            host,
            port,
            path,
            op,
            post_buf: Vec::new(),
            posted: false,
            requested: false,
            headers_parsed: false,
            header_buf: Vec::new(),
            encoding: None,
            fatal_status: None,
            inbuf: Vec::new(),
            decoded: Vec::new(),
            chunk_remaining: 0,
            reading_chunk_size: true,
            trailer_mode: false,
            content_remaining: 0,
            eof: false,
        }
    }

    fn host_header(&self) -> String {
        if self.port == 443 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    fn ensure_request_sent(&mut self) -> std::io::Result<()> {
        if self.op.is_post() {
            if !self.posted {
                self.send_post()?;
            }
        } else if !self.requested {
            self.send_get()?;
        }
        Ok(())
    }

    fn send_get(&mut self) -> std::io::Result<()> {
        let path = format!(
            "{}/info/refs?service={}",
            self.path,
            self.op.info_refs_service()
        );
        let req = format!(
            concat!(
                "GET {} HTTP/1.1\r\n",
                "Host: {}\r\n",
                "User-Agent: git/2.46.0\r\n",
                "Accept: */*\r\n",
                "Accept-Encoding: identity\r\n",
                "Pragma: no-cache\r\n",
                "Cache-Control: no-cache\r\n",
                "Connection: close\r\n",
                "\r\n"
            ),
            path,
            self.host_header()
        );
        tracing::debug!(target="git.transport.http", host=%self.host, request_line=%format!("GET {path} HTTP/1.1"), "send GET info/refs");
        self.inner.write_all(req.as_bytes())?;
        self.inner.flush()?;
        self.requested = true;
        Ok(())
    }

    fn send_post(&mut self) -> std::io::Result<()> {
        let endpoint = self.op.post_endpoint();
        let path = format!("{}/{}", self.path, endpoint);
        let len = self.post_buf.len();
        let headers = format!(
            concat!(
                "POST {} HTTP/1.1\r\n",
                "Host: {}\r\n",
                "User-Agent: git/2.46.0\r\n",
                "Accept: application/x-{}-result\r\n",
                "Content-Type: application/x-{}-request\r\n",
                "Content-Length: {}\r\n",
                "Accept-Encoding: identity\r\n",
                "Pragma: no-cache\r\n",
                "Cache-Control: no-cache\r\n",
                "Connection: close\r\n",
                "\r\n"
            ),
            path,
            self.host_header(),
            endpoint,
            endpoint,
            len
        );
        tracing::debug!(target="git.transport.http", host=%self.host, request_line=%format!("POST {path} HTTP/1.1"), content_length=%len, "send POST");
        self.inner.write_all(headers.as_bytes())?;
        if len > 0 {
            self.inner.write_all(&self.post_buf)?;
        }
        self.inner.flush()?;
        self.posted = true;
        Ok(())
    }

    fn parse_headers_and_setup(&mut self) -> std::io::Result<()> {
        if self.headers_parsed {
            return Ok(());
        }
        loop {
            if let Some(pos) = find_double_crlf(&self.header_buf) {
                let header = self.header_buf[..pos].to_vec();
                self.inbuf.extend_from_slice(&self.header_buf[pos..]);

                let mut status_line = String::new();
                let mut status_code: Option<u16> = None;
                let mut content_len: Option<usize> = None;
                let mut is_chunked = false;
                if let Ok(text) = std::str::from_utf8(&header) {
                    for (i, line) in text.split("\r\n").enumerate() {
                        if i == 0 {
                            status_line = line.to_string();
                            let parts: Vec<&str> = line.split_whitespace().collect();
                            if parts.len() >= 2 {
                                status_code = parts[1].parse::<u16>().ok();
                            }
                            continue;
                        }
                        let mut parts = line.splitn(2, ':');
                        if let (Some(k), Some(v)) = (parts.next(), parts.next()) {
                            let key = k.trim().to_ascii_lowercase();
                            let value = v.trim();
                            if key == "content-length" {
                                content_len = value.parse::<usize>().ok();
                            }
                            if key == "transfer-encoding" && value.eq_ignore_ascii_case("chunked") {
                                is_chunked = true;
                            }
                        }
                    }
                }
                tracing::debug!(target="git.transport.http", host=%self.host, status_line=%status_line, chunked=%is_chunked, content_length=?content_len, "http response parsed");

                if let Some(code) = status_code {
                    if code >= 400 {
                        self.fatal_status = Some((code, status_line));
                    }
                }

                if is_chunked {
                    self.encoding = Some(BodyEncoding::Chunked);
                    self.reading_chunk_size = true;
                    self.chunk_remaining = 0;
                } else if let Some(n) = content_len {
                    self.encoding = Some(BodyEncoding::Length);
                    self.content_remaining = n;
                } else {
                    self.encoding = Some(BodyEncoding::Eof);
                }
                self.headers_parsed = true;
                return Ok(());
            }
            let mut tmp = [0u8; 4096];
            let n = self.inner.read(&mut tmp)?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "unexpected eof in response headers",
                ));
            }
            self.header_buf.extend_from_slice(&tmp[..n]);
        }
    }

    fn read_more(&mut self) -> std::io::Result<usize> {
        let mut tmp = [0u8; 8192];
        let n = self.inner.read(&mut tmp)?;
        if n > 0 {
            self.inbuf.extend_from_slice(&tmp[..n]);
        }
        Ok(n)
    }

    fn fill_decoded(&mut self) -> std::io::Result<()> {
        if self.eof {
            return Ok(());
        }
        match self.encoding {
            Some(BodyEncoding::Chunked) => self.decode_chunked(),
            Some(BodyEncoding::Length) => self.decode_content_length(),
            Some(BodyEncoding::Eof) => self.decode_to_eof(),
            None => Ok(()),
        }
    }

    fn decode_chunked(&mut self) -> std::io::Result<()> {
        loop {
            if self.trailer_mode {
                if let Some(pos) = find_double_crlf(&self.inbuf) {
                    self.inbuf.drain(..pos);
                    self.eof = true;
                    return Ok(());
                }
                // The final chunk may be terminated by a bare CRLF with no
                // trailer section.
                if self.inbuf == b"\r\n" {
                    self.inbuf.clear();
                    self.eof = true;
                    return Ok(());
                }
                let n = self.read_more()?;
                if n == 0 {
                    self.eof = true;
                    return Ok(());
                }
                continue;
            }
            if self.reading_chunk_size {
                if let Some(idx) = find_crlf(&self.inbuf) {
                    let line: Vec<u8> = self.inbuf.drain(..idx + 2).collect();
                    let line_no_crlf = &line[..line.len() - 2];
                    let hex_part = line_no_crlf
                        .split(|&b| b == b';')
                        .next()
                        .unwrap_or(line_no_crlf);
                    let hex_str = std::str::from_utf8(hex_part).unwrap_or("");
                    let size = usize::from_str_radix(hex_str.trim(), 16).map_err(|_| {
                        std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            format!("invalid chunk size line: {hex_str:?}"),
                        )
                    })?;
                    self.chunk_remaining = size;
                    self.reading_chunk_size = false;
                    if size == 0 {
                        self.trailer_mode = true;
                    }
                    continue;
                }
                let n = self.read_more()?;
                if n == 0 {
                    return Ok(());
                }
                continue;
            }
            if self.chunk_remaining > 0 {
                if self.inbuf.is_empty() {
                    let n = self.read_more()?;
                    if n == 0 {
                        return Ok(());
                    }
                }
                let take = self.chunk_remaining.min(self.inbuf.len());
                if take > 0 {
                    let data: Vec<u8> = self.inbuf.drain(..take).collect();
                    self.decoded.extend_from_slice(&data);
                    self.chunk_remaining -= take;
                }
                if self.chunk_remaining > 0 {
                    return Ok(());
                }
                // The CRLF closing the chunk may arrive split across reads;
                // wait for both bytes before parsing the next chunk size.
                while self.inbuf.len() < 2 {
                    let n = self.read_more()?;
                    if n == 0 {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "truncated chunk terminator",
                        ));
                    }
                }
                if &self.inbuf[..2] != b"\r\n" {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "missing CRLF after chunk data",
                    ));
                }
                self.inbuf.drain(..2);
                self.reading_chunk_size = true;
                continue;
            }
        }
    }

    fn decode_content_length(&mut self) -> std::io::Result<()> {
        if self.content_remaining == 0 {
            self.eof = true;
            return Ok(());
        }
        if self.inbuf.is_empty() {
            let _ = self.read_more()?;
        }
        if self.inbuf.is_empty() {
            return Ok(());
        }
        let take = self.content_remaining.min(self.inbuf.len());
        let data: Vec<u8> = self.inbuf.drain(..take).collect();
        self.decoded.extend_from_slice(&data);
        self.content_remaining -= take;
        if self.content_remaining == 0 {
            self.eof = true;
        }
        Ok(())
    }

    fn decode_to_eof(&mut self) -> std::io::Result<()> {
        if self.inbuf.is_empty() {
            let n = self.read_more()?;
            if n == 0 {
                self.eof = true;
                return Ok(());
            }
        }
        if !self.inbuf.is_empty() {
            let data: Vec<u8> = self.inbuf.drain(..).collect();
            self.decoded.extend_from_slice(&data);
        }
        Ok(())
    }
}

impl<S: Read + Write> Read for HttpStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.ensure_request_sent()?;
        if !self.headers_parsed {
            self.parse_headers_and_setup()?;
        }
        if let Some((code, line)) = &self.fatal_status {
            let kind = match code {
                401 | 403 | 407 => std::io::ErrorKind::PermissionDenied,
                _ => std::io::ErrorKind::Other,
            };
            return Err(std::io::Error::new(
                kind,
                format!("http error response: {line}"),
            ));
        }
        loop {
            if !self.decoded.is_empty() {
                let n = self.decoded.len().min(buf.len());
                buf[..n].copy_from_slice(&self.decoded[..n]);
                self.decoded.drain(..n);
                return Ok(n);
            }
            if self.eof {
                return Ok(0);
            }
            self.fill_decoded()?;
            if self.decoded.is_empty() && !self.eof {
                let n = self.read_more()?;
                if n == 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "truncated response body",
                    ));
                }
            }
        }
    }
}

impl<S: Read + Write> Write for HttpStream<S> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.op.is_post() {
            self.post_buf.extend_from_slice(buf);
        }
        // info/refs phases carry no request body; bytes are acknowledged
        // and dropped.
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if self.op.is_post() && !self.posted {
            self.send_post()?;
        }
        Ok(())
    }
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    // Index just past the CRLFCRLF sequence, i.e. the start of the body.
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// In-memory duplex stream: reads come from a canned response, writes
    /// are captured for inspection.
    struct MockStream {
        response: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl MockStream {
        fn new(response: &[u8]) -> Self {
            Self {
                response: Cursor::new(response.to_vec()),
                written: Vec::new(),
            }
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.response.read(buf)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Wraps a [`MockStream`] and hands out at most one byte per read call,
    /// simulating a peer whose bytes trickle in across many reads.
    struct TrickleStream {
        inner: MockStream,
    }

    impl Read for TrickleStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let take = buf.len().min(1);
            self.inner.read(&mut buf[..take])
        }
    }

    impl Write for TrickleStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.inner.write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            self.inner.flush()
        }
    }

    fn read_all<S: Read + Write>(stream: &mut HttpStream<S>) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            let n = stream.read(&mut buf)?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    #[test]
    fn info_refs_sends_get_with_service_query() {
        let response = b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\nrefs";
        let mock = MockStream::new(response);
        let mut stream = HttpStream::new(
            mock,
            "git.example.com".to_string(),
            443,
            "/owner/repo.git".to_string(),
            HttpOp::InfoRefsUpload,
        );
        let body = read_all(&mut stream).unwrap();
        assert_eq!(body, b"refs");

        let written = String::from_utf8(stream.inner.written.clone()).unwrap();
        assert!(written
            .starts_with("GET /owner/repo.git/info/refs?service=git-upload-pack HTTP/1.1\r\n"));
        assert!(written.contains("Host: git.example.com\r\n"));
        assert!(written.contains("Connection: close\r\n"));
    }

    #[test]
    fn non_default_port_appears_in_host_header() {
        let response = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
        let mock = MockStream::new(response);
        let mut stream = HttpStream::new(
            mock,
            "git.example.com".to_string(),
            8443,
            "/repo.git".to_string(),
            HttpOp::InfoRefsReceive,
        );
        let body = read_all(&mut stream).unwrap();
        assert!(body.is_empty());

        let written = String::from_utf8(stream.inner.written.clone()).unwrap();
        assert!(written.contains("Host: git.example.com:8443\r\n"));
        assert!(written.contains("service=git-receive-pack"));
    }

    #[test]
    fn upload_pack_posts_buffered_body() {
        let response = b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\npack";
        let mock = MockStream::new(response);
        let mut stream = HttpStream::new(
            mock,
            "git.example.com".to_string(),
            443,
            "/repo.git".to_string(),
            HttpOp::UploadPack,
        );
        stream.write_all(b"0032want abcd").unwrap();
        stream.flush().unwrap();
        let body = read_all(&mut stream).unwrap();
        assert_eq!(body, b"pack");

        let written = String::from_utf8(stream.inner.written.clone()).unwrap();
        assert!(written.starts_with("POST /repo.git/git-upload-pack HTTP/1.1\r\n"));
        assert!(written.contains("Content-Type: application/x-git-upload-pack-request\r\n"));
        assert!(written.contains("Accept: application/x-git-upload-pack-result\r\n"));
        assert!(written.contains("Content-Length: 13\r\n"));
        assert!(written.ends_with("0032want abcd"));
    }

    #[test]
    fn chunked_body_is_decoded() {
        let response = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
            4\r\nwxyz\r\n5\r\n01234\r\n0\r\n\r\n";
        let mock = MockStream::new(response);
        let mut stream = HttpStream::new(
            mock,
            "git.example.com".to_string(),
            443,
            "/repo.git".to_string(),
            HttpOp::InfoRefsUpload,
        );
        let body = read_all(&mut stream).unwrap();
        assert_eq!(body, b"wxyz01234");
    }

    #[test]
    fn chunked_body_survives_fragmented_reads() {
        let response = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
            4\r\nwxyz\r\n5\r\n01234\r\n0\r\n\r\n";
        let mock = TrickleStream {
            inner: MockStream::new(response),
        };
        let mut stream = HttpStream::new(
            mock,
            "git.example.com".to_string(),
            443,
            "/repo.git".to_string(),
            HttpOp::InfoRefsUpload,
        );
        let body = read_all(&mut stream).unwrap();
        assert_eq!(body, b"wxyz01234");
    }

    #[test]
    fn malformed_chunk_size_is_rejected() {
        let response = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
            zz\r\nwxyz\r\n0\r\n\r\n";
        let mock = MockStream::new(response);
        let mut stream = HttpStream::new(
            mock,
            "git.example.com".to_string(),
            443,
            "/repo.git".to_string(),
            HttpOp::InfoRefsUpload,
        );
        let err = read_all(&mut stream).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_chunk_terminator_reports_unexpected_eof() {
        // Connection drops after the chunk data, before the closing CRLF.
        let response = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nwxyz\r";
        let mock = MockStream::new(response);
        let mut stream = HttpStream::new(
            mock,
            "git.example.com".to_string(),
            443,
            "/repo.git".to_string(),
            HttpOp::InfoRefsUpload,
        );
        let err = read_all(&mut stream).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn body_without_length_reads_to_eof() {
        let response = b"HTTP/1.1 200 OK\r\n\r\neverything until eof";
        let mock = MockStream::new(response);
        let mut stream = HttpStream::new(
            mock,
            "git.example.com".to_string(),
            443,
            "/repo.git".to_string(),
            HttpOp::InfoRefsUpload,
        );
        let body = read_all(&mut stream).unwrap();
        assert_eq!(body, b"everything until eof");
    }

    #[test]
    fn error_status_surfaces_as_read_error() {
        let response = b"HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\n\r\n";
        let mock = MockStream::new(response);
        let mut stream = HttpStream::new(
            mock,
            "git.example.com".to_string(),
            443,
            "/repo.git".to_string(),
            HttpOp::InfoRefsReceive,
        );
        let err = read_all(&mut stream).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::PermissionDenied);
        assert!(err.to_string().contains("401"));

        let response = b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\n\r\n";
        let mock = MockStream::new(response);
        let mut stream = HttpStream::new(
            mock,
            "git.example.com".to_string(),
            443,
            "/repo.git".to_string(),
            HttpOp::InfoRefsUpload,
        );
        let err = read_all(&mut stream).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::Other);
    }

    #[test]
    fn truncated_headers_report_unexpected_eof() {
        let response = b"HTTP/1.1 200 OK\r\nContent-Len";
        let mock = MockStream::new(response);
        let mut stream = HttpStream::new(
            mock,
            "git.example.com".to_string(),
            443,
            "/repo.git".to_string(),
            HttpOp::InfoRefsUpload,
        );
        let err = read_all(&mut stream).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn crlf_scanning_helpers() {
        assert_eq!(find_crlf(b"abc\r\ndef"), Some(3));
        assert_eq!(find_crlf(b"abcdef"), None);
        assert_eq!(find_double_crlf(b"head\r\n\r\nbody"), Some(8));
        assert_eq!(find_double_crlf(b"head\r\nbody"), None);
    }
}

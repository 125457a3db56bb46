//! Monoio-native HTTPS client
//!
//! One TLS connection per request (`Connection: close`), rustls over a monoio
//! `TcpStream`. The same `TlsStream` carries the WebSocket transport.

use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use monoio::io::{AsyncReadRent, AsyncWriteRentExt, CancelableAsyncReadRent, Canceller};
use monoio::net::TcpStream;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::errors::{ExchangeError, Result};

const USER_AGENT: &str = "unitrade/0.1";
const READ_CHUNK: usize = 4096;

/// Root store from webpki-roots, shared by HTTP and WebSocket connections.
pub fn default_tls_config() -> Arc<ClientConfig> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(
        ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    )
}

/// Open TCP, then wrap it in TLS and finish the handshake.
pub async fn connect_tls(config: Arc<ClientConfig>, host: &str, port: u16) -> Result<TlsStream> {
    let tcp = TcpStream::connect(format!("{host}:{port}"))
        .await
        .map_err(|e| ExchangeError::NetworkError(format!("TCP connect to {host}:{port} failed: {e}")))?;
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| ExchangeError::NetworkError(format!("invalid server name {host}: {e}")))?;
    let conn = ClientConnection::new(config, server_name)
        .map_err(|e| ExchangeError::NetworkError(format!("TLS setup failed: {e}")))?;

    let mut stream = TlsStream::new(tcp, conn);
    stream.complete_handshake().await?;
    Ok(stream)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        })
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First header with this name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers_map(&self) -> HashMap<String, String> {
        self.headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|e| {
            ExchangeError::SerializationError(format!("{e} (status {}, body {})", self.status, self.body))
        })
    }
}

pub struct HttpsClient {
    tls_config: Arc<ClientConfig>,
}

impl HttpsClient {
    pub fn new() -> Self {
        Self { tls_config: default_tls_config() }
    }

    pub fn with_tls_config(tls_config: Arc<ClientConfig>) -> Self {
        Self { tls_config }
    }

    pub async fn get(&self, url: &str) -> Result<HttpResponse> {
        self.send(Method::Get, url, &[], None).await
    }

    pub async fn send(
        &self,
        method: Method,
        url: &str,
        headers: &[(&str, &str)],
        body: Option<&str>,
    ) -> Result<HttpResponse> {
        let parsed = url::Url::parse(url)?;
        let host = parsed
            .host_str()
            .ok_or_else(|| ExchangeError::InvalidUrl(format!("no host in {url}")))?;
        let port = parsed.port().unwrap_or(443);

        let mut target = parsed.path().to_string();
        if target.is_empty() {
            target.push('/');
        }
        if let Some(query) = parsed.query() {
            target.push('?');
            target.push_str(query);
        }

        let request = build_request(method, host, &target, headers, body);
        debug!("🌐 {} {}{}", method, host, parsed.path());

        let mut stream = connect_tls(self.tls_config.clone(), host, port).await?;
        stream.write_all(request.as_bytes()).await?;
        let raw = stream.read_to_end().await?;
        parse_http_response(&raw)
    }
}

impl Default for HttpsClient {
    fn default() -> Self {
        Self::new()
    }
}

fn build_request(method: Method, host: &str, target: &str, headers: &[(&str, &str)], body: Option<&str>) -> String {
    let body = body.unwrap_or("");
    let mut request = format!(
        "{method} {target} HTTP/1.1\r\n\
         Host: {host}\r\n\
         User-Agent: {USER_AGENT}\r\n\
         Accept: application/json\r\n\
         Connection: close\r\n\
         Content-Length: {}\r\n",
        body.len()
    );
    for (key, value) in headers {
        request.push_str(key);
        request.push_str(": ");
        request.push_str(value);
        request.push_str("\r\n");
    }
    request.push_str("\r\n");
    request.push_str(body);
    request
}

/// Parse a complete HTTP/1.1 response, including chunked bodies.
pub fn parse_http_response(data: &[u8]) -> Result<HttpResponse> {
    let header_end = find_subslice(data, b"\r\n\r\n")
        .ok_or_else(|| ExchangeError::InvalidResponse("no header terminator in HTTP response".to_string()))?;
    let head = String::from_utf8_lossy(&data[..header_end]);
    let raw_body = &data[header_end + 4..];

    let mut lines = head.lines();
    let status_line = lines
        .next()
        .ok_or_else(|| ExchangeError::InvalidResponse("empty HTTP response".to_string()))?;
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| ExchangeError::InvalidResponse(format!("bad status line: {status_line}")))?;

    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let chunked = headers
        .iter()
        .any(|(k, v)| k.eq_ignore_ascii_case("transfer-encoding") && v.eq_ignore_ascii_case("chunked"));
    let body = if chunked { decode_chunked(raw_body)? } else { raw_body.to_vec() };

    Ok(HttpResponse {
        status,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

fn decode_chunked(mut data: &[u8]) -> Result<Vec<u8>> {
    let mut body = Vec::with_capacity(data.len());
    loop {
        let line_end = find_subslice(data, b"\r\n")
            .ok_or_else(|| ExchangeError::InvalidResponse("truncated chunk size".to_string()))?;
        let size_line = String::from_utf8_lossy(&data[..line_end]);
        let size_hex = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| ExchangeError::InvalidResponse(format!("bad chunk size: {size_hex}")))?;
        data = &data[line_end + 2..];
        if size == 0 {
            return Ok(body);
        }
        if data.len() < size {
            return Err(ExchangeError::InvalidResponse("truncated chunk".to_string()));
        }
        body.extend_from_slice(&data[..size]);
        data = data.get(size + 2..).unwrap_or(&[]);
    }
}

pub(crate) fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Outcome of one bounded TCP read.
enum Fill {
    Data,
    Eof,
    Idle,
}

/// rustls session driven over a monoio `TcpStream`.
pub struct TlsStream {
    stream: TcpStream,
    conn: ClientConnection,
    handshake_complete: bool,
}

impl TlsStream {
    pub fn new(stream: TcpStream, conn: ClientConnection) -> Self {
        Self {
            stream,
            conn,
            handshake_complete: false,
        }
    }

    async fn flush_tls(&mut self) -> Result<()> {
        while self.conn.wants_write() {
            let mut out = Vec::with_capacity(8192);
            self.conn
                .write_tls(&mut out)
                .map_err(|e| ExchangeError::NetworkError(format!("TLS write failed: {e}")))?;
            if !out.is_empty() {
                let (res, _) = self.stream.write_all(out).await;
                res.map_err(|e| ExchangeError::NetworkError(format!("TCP write failed: {e}")))?;
            }
        }
        Ok(())
    }

    /// Pull one TCP read into the TLS session. Returns false on EOF.
    async fn fill_tls(&mut self) -> Result<bool> {
        let (res, buf) = self.stream.read(vec![0u8; READ_CHUNK]).await;
        let n = res.map_err(|e| ExchangeError::NetworkError(format!("TCP read failed: {e}")))?;
        if n == 0 {
            return Ok(false);
        }
        self.conn
            .read_tls(&mut std::io::Cursor::new(&buf[..n]))
            .map_err(|e| ExchangeError::NetworkError(format!("TLS read failed: {e}")))?;
        self.conn
            .process_new_packets()
            .map_err(|e| ExchangeError::NetworkError(format!("TLS process failed: {e}")))?;
        Ok(true)
    }

    /// Like `fill_tls`, but stops waiting at `deadline`. The pending read is cancelled
    /// through the driver and awaited, so bytes that raced the deadline are kept.
    async fn fill_tls_until(&mut self, deadline: Instant) -> Result<Fill> {
        let wait = deadline.saturating_duration_since(Instant::now());
        if wait.is_zero() {
            return Ok(Fill::Idle);
        }

        enum Race<T> {
            Done(T),
            Elapsed,
        }

        let canceller = Canceller::new();
        let read = self.stream.cancelable_read(vec![0u8; READ_CHUNK], canceller.handle());
        let mut read = std::pin::pin!(read);
        let raced = monoio::select! {
            r = &mut read => Race::Done(r),
            _ = monoio::time::sleep(wait) => Race::Elapsed,
        };
        let (res, buf) = match raced {
            Race::Done(r) => r,
            Race::Elapsed => {
                let _ = canceller.cancel();
                match read.await {
                    (Ok(n), buf) => (Ok(n), buf),
                    // Cancelled before any data arrived.
                    (Err(_), _) => return Ok(Fill::Idle),
                }
            }
        };

        let n = res.map_err(|e| ExchangeError::NetworkError(format!("TCP read failed: {e}")))?;
        if n == 0 {
            return Ok(Fill::Eof);
        }
        self.conn
            .read_tls(&mut std::io::Cursor::new(&buf[..n]))
            .map_err(|e| ExchangeError::NetworkError(format!("TLS read failed: {e}")))?;
        self.conn
            .process_new_packets()
            .map_err(|e| ExchangeError::NetworkError(format!("TLS process failed: {e}")))?;
        Ok(Fill::Data)
    }

    pub async fn complete_handshake(&mut self) -> Result<()> {
        while !self.handshake_complete {
            self.flush_tls().await?;
            if !self.conn.is_handshaking() {
                self.handshake_complete = true;
                break;
            }
            if !self.conn.wants_read() {
                return Err(ExchangeError::NetworkError("TLS handshake stalled".to_string()));
            }
            if !self.fill_tls().await? {
                return Err(ExchangeError::NetworkError("connection closed during handshake".to_string()));
            }
        }
        Ok(())
    }

    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.complete_handshake().await?;
        self.conn
            .writer()
            .write_all(data)
            .map_err(|e| ExchangeError::NetworkError(format!("TLS application write failed: {e}")))?;
        self.flush_tls().await
    }

    /// Read decrypted bytes into `buf`. Returns 0 once the peer closed.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.complete_handshake().await?;
        loop {
            match self.conn.reader().read(buf) {
                Ok(n) if n > 0 => return Ok(n),
                Ok(_) => return Ok(0),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(0),
                Err(e) => return Err(ExchangeError::NetworkError(format!("TLS read failed: {e}"))),
            }
            if !self.fill_tls().await? {
                return Ok(0);
            }
            // Post-handshake messages such as session tickets may need a reply.
            self.flush_tls().await?;
        }
    }

    /// Like `read`, but `Ok(None)` when nothing arrived within `wait`.
    pub async fn read_within(&mut self, buf: &mut [u8], wait: Duration) -> Result<Option<usize>> {
        self.complete_handshake().await?;
        let deadline = Instant::now() + wait;
        loop {
            match self.conn.reader().read(buf) {
                Ok(n) if n > 0 => return Ok(Some(n)),
                Ok(_) => return Ok(Some(0)),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(Some(0)),
                Err(e) => return Err(ExchangeError::NetworkError(format!("TLS read failed: {e}"))),
            }
            match self.fill_tls_until(deadline).await? {
                Fill::Data => self.flush_tls().await?,
                Fill::Eof => return Ok(Some(0)),
                Fill::Idle => return Ok(None),
            }
        }
    }

    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                return Ok(data);
            }
            data.extend_from_slice(&chunk[..n]);
        }
    }
}

//! Monoio-native WebSocket client
//!
//! RFC 6455 framing over `TlsStream`. Pings are answered inline and fragmented
//! messages are reassembled, so callers only see whole text or binary messages.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use rand::RngCore;
use rustls::ClientConfig;
use sha1::{Digest, Sha1};
use tracing::{debug, info};
use url::Url;

use unitrade_core::PerfTimer;

use crate::errors::{ExchangeError, Result};
use crate::http::{TlsStream, connect_tls, default_tls_config, find_subslice};

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xa,
}

impl OpCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xa => Some(OpCode::Pong),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub mask: Option<[u8; 4]>,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Client frame; always masked.
    pub fn client(opcode: OpCode, payload: Vec<u8>) -> Self {
        let mut mask = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut mask);
        Self { fin: true, opcode, mask: Some(mask), payload }
    }

    pub fn close(code: u16, reason: &str) -> Self {
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        Self::client(OpCode::Close, payload)
    }

    fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let len = self.payload.len();
        let mut out = Vec::with_capacity(len + 14);
        out.push(if self.fin { 0x80 } else { 0x00 } | self.opcode as u8);

        let mask_bit = if self.mask.is_some() { 0x80 } else { 0x00 };
        if len < 126 {
            out.push(mask_bit | len as u8);
        } else if len <= u16::MAX as usize {
            out.push(mask_bit | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            out.push(mask_bit | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }

        let start = out.len();
        if let Some(mask) = self.mask {
            out.extend_from_slice(&mask);
            out.extend_from_slice(&self.payload);
            Self::apply_mask(&mut out[start + 4..], mask);
        } else {
            out.extend_from_slice(&self.payload);
        }
        out
    }

    /// Decode one frame from the front of `data`. `Ok(None)` when more bytes are needed.
    pub fn decode(data: &[u8]) -> Result<Option<(Self, usize)>> {
        if data.len() < 2 {
            return Ok(None);
        }
        let fin = data[0] & 0x80 != 0;
        let opcode = OpCode::from_u8(data[0] & 0x0f)
            .ok_or_else(|| ExchangeError::InvalidResponse(format!("invalid WebSocket opcode {:#x}", data[0] & 0x0f)))?;
        let masked = data[1] & 0x80 != 0;

        let mut offset = 2;
        let len = match data[1] & 0x7f {
            126 => {
                let Some(bytes) = data.get(2..4) else { return Ok(None) };
                offset += 2;
                u16::from_be_bytes([bytes[0], bytes[1]]) as usize
            }
            127 => {
                let Some(bytes) = data.get(2..10) else { return Ok(None) };
                offset += 8;
                let mut be = [0u8; 8];
                be.copy_from_slice(bytes);
                usize::try_from(u64::from_be_bytes(be))
                    .map_err(|_| ExchangeError::InvalidResponse("WebSocket frame too large".to_string()))?
            }
            short => short as usize,
        };

        let mask = if masked {
            let Some(bytes) = data.get(offset..offset + 4) else { return Ok(None) };
            offset += 4;
            Some([bytes[0], bytes[1], bytes[2], bytes[3]])
        } else {
            None
        };

        let Some(body) = data.get(offset..offset + len) else { return Ok(None) };
        let mut payload = body.to_vec();
        if let Some(mask) = mask {
            Self::apply_mask(&mut payload, mask);
        }
        Ok(Some((Frame { fin, opcode, mask, payload }, offset + len)))
    }
}

/// Whole application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    Text(String),
    Binary(Vec<u8>),
}

/// Result of waiting a bounded time for the next text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Text(String),
    /// Nothing arrived in time. Partially received data stays buffered.
    Idle,
    Closed,
}

enum Next<T> {
    Ready(T),
    Idle,
    Closed,
}

pub fn accept_key(ws_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(ws_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

fn generate_key() -> String {
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    base64::engine::general_purpose::STANDARD.encode(nonce)
}

fn validate_handshake(response: &str, ws_key: &str) -> Result<()> {
    let status_ok = response
        .lines()
        .next()
        .is_some_and(|line| line.split_whitespace().nth(1) == Some("101"));
    if !status_ok {
        return Err(ExchangeError::NetworkError(format!(
            "WebSocket handshake failed: {}",
            response.lines().next().unwrap_or("")
        )));
    }

    let expected = accept_key(ws_key);
    let accepted = response.lines().skip(1).filter_map(|l| l.split_once(':')).any(|(k, v)| {
        k.trim().eq_ignore_ascii_case("sec-websocket-accept") && v.trim() == expected
    });
    if !accepted {
        return Err(ExchangeError::NetworkError("WebSocket handshake failed: invalid accept key".to_string()));
    }
    Ok(())
}

pub struct MonoioWebSocket {
    stream: TlsStream,
    url: Url,
    buffer: Vec<u8>,
    fragments: Option<(OpCode, Vec<u8>)>,
    close_sent: bool,
    closed: bool,
    last_activity: Instant,
}

impl MonoioWebSocket {
    pub async fn connect(url: &Url) -> Result<Self> {
        Self::connect_with(default_tls_config(), url).await
    }

    pub async fn connect_with(config: Arc<ClientConfig>, url: &Url) -> Result<Self> {
        let timer = PerfTimer::start("websocket_connect");
        let host = url
            .host_str()
            .ok_or_else(|| ExchangeError::InvalidUrl(format!("no host in {url}")))?;
        let port = url.port().unwrap_or(443);
        let stream = connect_tls(config, host, port).await?;

        let mut ws = Self {
            stream,
            url: url.clone(),
            buffer: Vec::with_capacity(8192),
            fragments: None,
            close_sent: false,
            closed: false,
            last_activity: Instant::now(),
        };
        ws.handshake().await?;

        timer.log_elapsed();
        info!("🔗 WebSocket connected: {}", url);
        Ok(ws)
    }

    async fn handshake(&mut self) -> Result<()> {
        let ws_key = generate_key();
        let host = self.url.host_str().unwrap_or_default();
        let mut target = self.url.path().to_string();
        if target.is_empty() {
            target.push('/');
        }
        if let Some(query) = self.url.query() {
            target.push('?');
            target.push_str(query);
        }

        let request = format!(
            "GET {target} HTTP/1.1\r\n\
             Host: {host}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {ws_key}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             \r\n"
        );
        self.stream.write_all(request.as_bytes()).await?;

        let mut chunk = vec![0u8; 4096];
        let header_end = loop {
            if let Some(pos) = find_subslice(&self.buffer, b"\r\n\r\n") {
                break pos;
            }
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(ExchangeError::NetworkError("connection closed during WebSocket handshake".to_string()));
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        };

        let response = String::from_utf8_lossy(&self.buffer[..header_end]).into_owned();
        validate_handshake(&response, &ws_key)?;
        // Frames may have arrived right behind the response headers.
        self.buffer.drain(..header_end + 4);
        debug!("✅ WebSocket handshake completed for {}", self.url);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        !self.closed && !self.close_sent
    }

    async fn send_frame(&mut self, frame: Frame) -> Result<()> {
        if self.close_sent {
            return Err(ExchangeError::NetworkError("WebSocket already closing".to_string()));
        }
        if frame.opcode == OpCode::Close {
            self.close_sent = true;
        }
        self.stream.write_all(&frame.encode()).await
    }

    pub async fn send_text(&mut self, message: &str) -> Result<()> {
        self.send_frame(Frame::client(OpCode::Text, message.as_bytes().to_vec())).await
    }

    pub async fn ping(&mut self) -> Result<()> {
        self.send_frame(Frame::client(OpCode::Ping, Vec::new())).await
    }

    async fn next_frame(&mut self, deadline: Option<Instant>) -> Result<Next<Frame>> {
        let mut chunk = vec![0u8; 4096];
        loop {
            if let Some((frame, used)) = Frame::decode(&self.buffer)? {
                self.buffer.drain(..used);
                return Ok(Next::Ready(frame));
            }
            let n = match deadline {
                None => self.stream.read(&mut chunk).await?,
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match self.stream.read_within(&mut chunk, wait).await? {
                        Some(n) => n,
                        None => return Ok(Next::Idle),
                    }
                }
            };
            if n == 0 {
                return Ok(Next::Closed);
            }
            self.last_activity = Instant::now();
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    /// Time since the peer last sent anything.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Next whole message. `Ok(None)` once the peer closed the connection.
    pub async fn receive(&mut self) -> Result<Option<WsMessage>> {
        loop {
            match self.receive_until(None).await? {
                Next::Ready(message) => return Ok(Some(message)),
                Next::Closed => return Ok(None),
                Next::Idle => {}
            }
        }
    }

    async fn receive_until(&mut self, deadline: Option<Instant>) -> Result<Next<WsMessage>> {
        if self.closed {
            return Ok(Next::Closed);
        }
        loop {
            let frame = match self.next_frame(deadline).await? {
                Next::Ready(frame) => frame,
                Next::Idle => return Ok(Next::Idle),
                Next::Closed => {
                    self.closed = true;
                    return Ok(Next::Closed);
                }
            };

            match frame.opcode {
                OpCode::Ping => {
                    if !self.close_sent {
                        self.send_frame(Frame::client(OpCode::Pong, frame.payload)).await?;
                    }
                }
                OpCode::Pong => {}
                OpCode::Close => {
                    debug!("🔌 WebSocket close frame from {}", self.url);
                    if !self.close_sent {
                        let _ = self.send_frame(Frame::close(1000, "")).await;
                    }
                    self.closed = true;
                    return Ok(Next::Closed);
                }
                OpCode::Continuation => {
                    let Some((_, data)) = self.fragments.as_mut() else {
                        return Err(ExchangeError::InvalidResponse("unexpected continuation frame".to_string()));
                    };
                    data.extend_from_slice(&frame.payload);
                    if frame.fin {
                        if let Some((opcode, data)) = self.fragments.take() {
                            return to_message(opcode, data).map(Next::Ready);
                        }
                    }
                }
                OpCode::Text | OpCode::Binary if !frame.fin => {
                    self.fragments = Some((frame.opcode, frame.payload));
                }
                OpCode::Text | OpCode::Binary => return to_message(frame.opcode, frame.payload).map(Next::Ready),
            }
        }
    }

    /// Next text message, skipping binary ones.
    pub async fn receive_text(&mut self) -> Result<Option<String>> {
        loop {
            match self.receive().await? {
                Some(WsMessage::Text(text)) => return Ok(Some(text)),
                Some(WsMessage::Binary(_)) => continue,
                None => return Ok(None),
            }
        }
    }

    /// Next text message, or `Incoming::Idle` once `wait` passes without one.
    /// Never drops bytes that were already read from the socket.
    pub async fn receive_text_within(&mut self, wait: Duration) -> Result<Incoming> {
        let deadline = Instant::now() + wait;
        loop {
            match self.receive_until(Some(deadline)).await? {
                Next::Ready(WsMessage::Text(text)) => return Ok(Incoming::Text(text)),
                Next::Ready(WsMessage::Binary(_)) => continue,
                Next::Idle => return Ok(Incoming::Idle),
                Next::Closed => return Ok(Incoming::Closed),
            }
        }
    }

    pub async fn close(&mut self) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        self.send_frame(Frame::close(1000, "")).await
    }
}

fn to_message(opcode: OpCode, data: Vec<u8>) -> Result<WsMessage> {
    match opcode {
        OpCode::Binary => Ok(WsMessage::Binary(data)),
        _ => String::from_utf8(data)
            .map(WsMessage::Text)
            .map_err(|e| ExchangeError::InvalidResponse(format!("invalid UTF-8 in text frame: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_key() {
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_client_frame_is_masked() {
        let bytes = Frame::client(OpCode::Text, b"Hi".to_vec()).encode();
        assert_eq!(bytes[0], 0x81);
        assert_eq!(bytes[1], 0x80 | 2);
        assert_eq!(bytes.len(), 2 + 4 + 2);

        let (frame, used) = Frame::decode(&bytes).unwrap().unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(frame.payload, b"Hi");
    }

    #[test]
    fn test_decode_server_frame_with_extended_length() {
        let payload = vec![b'x'; 300];
        let mut bytes = vec![0x81, 126];
        bytes.extend_from_slice(&300u16.to_be_bytes());
        bytes.extend_from_slice(&payload);
        bytes.extend_from_slice(&[0x89, 0x00]);

        let (frame, used) = Frame::decode(&bytes).unwrap().unwrap();
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(frame.payload.len(), 300);
        assert_eq!(used, 304);

        let (ping, _) = Frame::decode(&bytes[used..]).unwrap().unwrap();
        assert_eq!(ping.opcode, OpCode::Ping);
    }

    #[test]
    fn test_decode_needs_more_bytes() {
        assert_eq!(Frame::decode(&[0x81]).unwrap(), None);
        assert_eq!(Frame::decode(&[0x81, 5, b'a']).unwrap(), None);
        assert!(Frame::decode(&[0x83, 0]).is_err());
    }

    #[test]
    fn test_handshake_validation() {
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        let ok = "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nSec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";
        assert!(validate_handshake(ok, key).is_ok());

        let wrong_key = "HTTP/1.1 101 Switching Protocols\r\nsec-websocket-accept: nope";
        assert!(validate_handshake(wrong_key, key).is_err());

        let refused = "HTTP/1.1 403 Forbidden\r\n";
        assert!(validate_handshake(refused, key).is_err());
    }
}

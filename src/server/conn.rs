//! Per-connection transport plumbing.
//!
//! One coroutine owns each connection; every read and write on the socket
//! happens on it. This module covers the transport-facing half of that
//! coroutine: request-head parsing, body framing (Content-Length, chunked,
//! or none), pull-based chunk reads, and the peer-liveness probe used while
//! a request is suspended inside the engine.
//!
//! Backpressure on the inbound side is the pull discipline itself: bytes are
//! only read from the socket when the bridge asks for the next chunk, so
//! intake pauses whenever buffering would outpace consumption.

use crate::http::{HeaderMap, HttpVersion};
use may::net::TcpStream;
use rustls::{ServerConnection, StreamOwned};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::Duration;

/// Upper bound on a request head before the request is refused.
const MAX_HEAD_BYTES: usize = 16 * 1024;
/// Header slots handed to httparse; sized for API gateway/proxy traffic.
const MAX_PARSED_HEADERS: usize = 32;
/// Upper bound on a single chunk-size or trailer line.
const MAX_LINE_BYTES: usize = 8 * 1024;

/// The byte stream under one connection, TLS or plain.
pub enum Transport {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ServerConnection, TcpStream>>),
}

impl Transport {
    fn socket(&self) -> &TcpStream {
        match self {
            Transport::Plain(s) => s,
            Transport::Tls(s) => &s.sock,
        }
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.socket().peer_addr()
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket().set_read_timeout(timeout)
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(s) => s.read(buf),
            Transport::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(s) => s.write(buf),
            Transport::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Plain(s) => s.flush(),
            Transport::Tls(s) => s.flush(),
        }
    }
}

/// Parsed request line and headers, body unread.
#[derive(Debug)]
pub struct ParsedHead {
    pub method: http::Method,
    pub target: String,
    pub version: HttpVersion,
    pub headers: HeaderMap,
}

/// Why a request head could not be produced.
#[derive(Debug)]
pub enum HeadError {
    /// The bytes on the wire do not parse as an HTTP request head.
    Malformed,
    /// The head exceeded [`MAX_HEAD_BYTES`].
    TooLarge,
    /// The socket failed mid-read.
    Io(io::Error),
}

/// How the request body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    None,
    Length(usize),
    Chunked,
}

#[derive(Debug)]
pub enum FramingError {
    InvalidContentLength,
    UnsupportedTransferEncoding,
}

impl BodyFraming {
    /// Framing per RFC 7230: Transfer-Encoding wins over Content-Length;
    /// neither means no body.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, FramingError> {
        if let Some(te) = headers.get("Transfer-Encoding") {
            if te
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("chunked"))
            {
                return Ok(BodyFraming::Chunked);
            }
            return Err(FramingError::UnsupportedTransferEncoding);
        }
        match headers.get("Content-Length") {
            Some(value) => value
                .trim()
                .parse::<usize>()
                .map(BodyFraming::Length)
                .map_err(|_| FramingError::InvalidContentLength),
            None => Ok(BodyFraming::None),
        }
    }

    pub fn has_body(&self) -> bool {
        !matches!(self, BodyFraming::None | BodyFraming::Length(0))
    }
}

/// Result of a timed liveness probe while a request is suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerProbe {
    Open,
    Closed,
}

/// One transport connection plus its read-ahead buffer.
pub struct Conn {
    transport: Transport,
    peer: Option<SocketAddr>,
    secure: bool,
    /// Bytes read from the socket but not yet consumed; preserves pipelined
    /// data across requests on a keep-alive connection.
    buf: Vec<u8>,
    /// Force-close after the current response is written.
    pub(crate) close: bool,
}

impl Conn {
    pub fn new(transport: Transport, secure: bool) -> Self {
        let peer = transport.peer_addr().ok();
        Self {
            transport,
            peer,
            secure,
            buf: Vec::new(),
            close: false,
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Read and parse the next request head.
    ///
    /// `Ok(None)` is a clean close between requests; anything else that ends
    /// the connection early is a [`HeadError`].
    pub fn read_head(&mut self) -> Result<Option<ParsedHead>, HeadError> {
        loop {
            if !self.buf.is_empty() {
                if let Some((consumed, head)) = parse_head(&self.buf)? {
                    self.buf.drain(..consumed);
                    return Ok(Some(head));
                }
                if self.buf.len() > MAX_HEAD_BYTES {
                    return Err(HeadError::TooLarge);
                }
            }
            let mut chunk = [0u8; 4096];
            match self.transport.read(&mut chunk) {
                Ok(0) => {
                    return if self.buf.is_empty() {
                        Ok(None)
                    } else {
                        Err(HeadError::Malformed)
                    };
                }
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e) => return Err(HeadError::Io(e)),
            }
        }
    }

    /// Acknowledge `Expect: 100-continue` before the body is pulled.
    pub fn send_continue(&mut self, version: HttpVersion) -> io::Result<()> {
        self.transport
            .write_all(format!("{} 100 Continue\r\n\r\n", version.as_str()).as_bytes())?;
        self.transport.flush()
    }

    /// Pull-based body source for the current request.
    pub fn body_reader(&mut self, framing: BodyFraming, chunk_size: usize) -> BodyReader<'_> {
        BodyReader::new(self, framing, chunk_size)
    }

    /// Timed one-byte read to detect a dead peer while the engine holds the
    /// request.
    ///
    /// Plaintext arriving during the window is pipelined data for a request
    /// we cannot serve promptly; it is buffered and the connection is marked
    /// close-after-response.
    pub(crate) fn poll_peer(&mut self, window: Duration) -> PeerProbe {
        if self.transport.set_read_timeout(Some(window)).is_err() {
            return PeerProbe::Closed;
        }
        let mut byte = [0u8; 1];
        let result = self.transport.read(&mut byte);
        let _ = self.transport.set_read_timeout(None);
        match result {
            Ok(0) => PeerProbe::Closed,
            Ok(n) => {
                self.buf.extend_from_slice(&byte[..n]);
                self.close = true;
                PeerProbe::Open
            }
            Err(e)
                if e.kind() == io::ErrorKind::TimedOut
                    || e.kind() == io::ErrorKind::WouldBlock =>
            {
                PeerProbe::Open
            }
            Err(_) => PeerProbe::Closed,
        }
    }

    /// Up to `max` body bytes, buffered bytes first. Empty means EOF.
    fn read_up_to(&mut self, max: usize) -> io::Result<Vec<u8>> {
        if max == 0 {
            return Ok(Vec::new());
        }
        if !self.buf.is_empty() {
            let take = max.min(self.buf.len());
            return Ok(self.buf.drain(..take).collect());
        }
        let mut chunk = vec![0u8; max];
        let n = self.transport.read(&mut chunk)?;
        chunk.truncate(n);
        Ok(chunk)
    }

    fn read_exact_buffered(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            let piece = self.read_up_to(len - out.len())?;
            if piece.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-body",
                ));
            }
            out.extend_from_slice(&piece);
        }
        Ok(out)
    }

    /// One CRLF-terminated line, terminator stripped.
    fn read_line(&mut self) -> io::Result<String> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                while matches!(line.last(), Some(b'\n') | Some(b'\r')) {
                    line.pop();
                }
                return String::from_utf8(line).map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidData, "non-UTF-8 framing line")
                });
            }
            if self.buf.len() > MAX_LINE_BYTES {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "framing line too long",
                ));
            }
            let mut chunk = [0u8; 256];
            let n = self.transport.read(&mut chunk)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-body",
                ));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

impl Write for Conn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.transport.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.transport.flush()
    }
}

fn parse_head(buf: &[u8]) -> Result<Option<(usize, ParsedHead)>, HeadError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_PARSED_HEADERS];
    let mut parsed = httparse::Request::new(&mut headers);
    match parsed.parse(buf) {
        Ok(httparse::Status::Complete(consumed)) => {
            let method: http::Method = parsed
                .method
                .ok_or(HeadError::Malformed)?
                .parse()
                .map_err(|_| HeadError::Malformed)?;
            let target = parsed.path.ok_or(HeadError::Malformed)?.to_string();
            let version = match parsed.version {
                Some(0) => HttpVersion::Http10,
                _ => HttpVersion::Http11,
            };
            let mut map = HeaderMap::new();
            for header in parsed.headers.iter() {
                map.append(header.name, String::from_utf8_lossy(header.value).to_string());
            }
            Ok(Some((
                consumed,
                ParsedHead {
                    method,
                    target,
                    version,
                    headers: map,
                },
            )))
        }
        Ok(httparse::Status::Partial) => Ok(None),
        Err(_) => Err(HeadError::Malformed),
    }
}

fn parse_chunk_size(line: &str) -> io::Result<usize> {
    // Chunk extensions after ';' are tolerated and ignored.
    let size = line.split(';').next().unwrap_or("").trim();
    usize::from_str_radix(size, 16)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid chunk size"))
}

#[derive(Clone, Copy)]
enum ReaderState {
    Done,
    Length { remaining: usize },
    Chunked { remaining_in_chunk: usize },
}

/// Yields decoded body chunks of at most `chunk_size` bytes, on demand.
pub struct BodyReader<'a> {
    conn: &'a mut Conn,
    state: ReaderState,
    chunk_size: usize,
}

impl<'a> BodyReader<'a> {
    fn new(conn: &'a mut Conn, framing: BodyFraming, chunk_size: usize) -> Self {
        let state = match framing {
            BodyFraming::None | BodyFraming::Length(0) => ReaderState::Done,
            BodyFraming::Length(n) => ReaderState::Length { remaining: n },
            BodyFraming::Chunked => ReaderState::Chunked {
                remaining_in_chunk: 0,
            },
        };
        Self {
            conn,
            state,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Next decoded chunk, `None` once the body is complete.
    pub fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self.state {
            ReaderState::Done => Ok(None),
            ReaderState::Length { remaining } => {
                let want = remaining.min(self.chunk_size);
                let data = self.conn.read_exact_buffered(want)?;
                let left = remaining - data.len();
                self.state = if left == 0 {
                    ReaderState::Done
                } else {
                    ReaderState::Length { remaining: left }
                };
                Ok(Some(data))
            }
            ReaderState::Chunked { remaining_in_chunk } => {
                let mut remaining = remaining_in_chunk;
                if remaining == 0 {
                    let size = parse_chunk_size(&self.conn.read_line()?)?;
                    if size == 0 {
                        // Discard trailers through the final blank line.
                        loop {
                            if self.conn.read_line()?.is_empty() {
                                break;
                            }
                        }
                        self.state = ReaderState::Done;
                        return Ok(None);
                    }
                    remaining = size;
                }
                let want = remaining.min(self.chunk_size);
                let data = self.conn.read_exact_buffered(want)?;
                remaining -= data.len();
                if remaining == 0 {
                    let crlf = self.conn.read_exact_buffered(2)?;
                    if crlf != b"\r\n" {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "missing chunk terminator",
                        ));
                    }
                }
                self.state = ReaderState::Chunked {
                    remaining_in_chunk: remaining,
                };
                Ok(Some(data))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_head_complete() {
        let raw = b"POST /items?x=1 HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhello";
        let (consumed, head) = parse_head(raw).unwrap().unwrap();
        assert_eq!(consumed, raw.len() - 5);
        assert_eq!(head.method, http::Method::POST);
        assert_eq!(head.target, "/items?x=1");
        assert_eq!(head.version, HttpVersion::Http11);
        assert_eq!(head.headers.get("content-length"), Some("5"));
    }

    #[test]
    fn test_parse_head_partial_and_malformed() {
        assert!(parse_head(b"GET / HTT").unwrap().is_none());
        assert!(matches!(
            parse_head(b"totally not http\r\n\r\n"),
            Err(HeadError::Malformed)
        ));
    }

    #[test]
    fn test_framing_selection() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            BodyFraming::from_headers(&headers).unwrap(),
            BodyFraming::None
        );
        headers.set("Content-Length", "42");
        assert_eq!(
            BodyFraming::from_headers(&headers).unwrap(),
            BodyFraming::Length(42)
        );
        // Transfer-Encoding wins over Content-Length.
        headers.set("Transfer-Encoding", "chunked");
        assert_eq!(
            BodyFraming::from_headers(&headers).unwrap(),
            BodyFraming::Chunked
        );
        headers.set("Transfer-Encoding", "gzip");
        assert!(BodyFraming::from_headers(&headers).is_err());
    }

    #[test]
    fn test_invalid_content_length() {
        let mut headers = HeaderMap::new();
        headers.set("Content-Length", "five");
        assert!(matches!(
            BodyFraming::from_headers(&headers),
            Err(FramingError::InvalidContentLength)
        ));
    }

    #[test]
    fn test_parse_chunk_size() {
        assert_eq!(parse_chunk_size("1a").unwrap(), 26);
        assert_eq!(parse_chunk_size("0").unwrap(), 0);
        assert_eq!(parse_chunk_size("ff;ext=1").unwrap(), 255);
        assert!(parse_chunk_size("xyz").is_err());
    }
}

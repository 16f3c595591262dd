//! Shared fixtures for the integration tests: a loopback server with RAII
//! teardown and a minimal raw-socket HTTP client.
#![allow(dead_code)]

use portico::container::Container;
use portico::engine::{Dispatch, Engine, EngineFactory, FnEngine};
use portico::http::BridgeResponse;
use portico::options::ServerOptions;
use portico::processor::ProcessorChain;
use portico::server::{Server, ServerHandle};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Running server plus its container, stopped on drop.
pub struct TestServer {
    pub addr: SocketAddr,
    pub container: Arc<Container>,
    handle: Option<ServerHandle>,
}

impl TestServer {
    pub fn start(factory: Arc<dyn EngineFactory>, chain: ProcessorChain) -> Self {
        Self::start_with_options(factory, chain, test_options())
    }

    pub fn start_with_options(
        factory: Arc<dyn EngineFactory>,
        chain: ProcessorChain,
        options: ServerOptions,
    ) -> Self {
        may::config().set_stack_size(0x8000);
        let container = Arc::new(Container::new(factory, options).unwrap());
        let server = Server::new(Arc::clone(&container), Arc::new(chain));
        let handle = server.start().unwrap();
        handle.wait_ready().unwrap();
        TestServer {
            addr: handle.addr(),
            container,
            handle: Some(handle),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop();
        }
    }
}

/// Loopback options on an ephemeral port with one resource package.
pub fn test_options() -> ServerOptions {
    let mut options = ServerOptions::default();
    options.host = "127.0.0.1".to_string();
    options.port = 0;
    options.add_package("test.resources");
    options
}

/// Factory for an engine that echoes the request body back and counts its
/// invocations.
pub fn echo_factory(calls: Arc<AtomicUsize>) -> Arc<dyn EngineFactory> {
    Arc::new(move |_opts: &ServerOptions| {
        let calls = Arc::clone(&calls);
        Ok(Arc::new(FnEngine::new(move |req, _completion| {
            calls.fetch_add(1, Ordering::SeqCst);
            let mut resp =
                BridgeResponse::with_bytes(200, "application/octet-stream", req.body.clone());
            resp.set_header("X-Engine", "echo");
            Dispatch::Done(resp)
        })) as Arc<dyn Engine>)
    })
}

pub fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

/// Write a raw request and read exactly one response.
pub fn send_request(addr: SocketAddr, request: &[u8]) -> ClientResponse {
    let mut stream = connect(addr);
    stream.write_all(request).unwrap();
    read_response(&mut stream).unwrap()
}

#[derive(Debug)]
pub struct ClientResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ClientResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Read one framed response: Content-Length, chunked, or close-delimited.
pub fn read_response(stream: &mut TcpStream) -> io::Result<ClientResponse> {
    let mut buf = Vec::new();
    let header_end = loop {
        if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before response head",
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or("");
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let mut headers = Vec::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_lowercase(), value.trim().to_string()));
        }
    }

    let mut body = buf[header_end..].to_vec();
    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .and_then(|(_, v)| v.parse::<usize>().ok());
    let chunked = headers
        .iter()
        .any(|(k, v)| k == "transfer-encoding" && v.contains("chunked"));

    if chunked {
        while find_subslice(&body, b"0\r\n\r\n").is_none() {
            let mut chunk = [0u8; 1024];
            let n = stream.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
        body = decode_chunked(&body);
    } else if let Some(len) = content_length {
        while body.len() < len {
            let mut chunk = [0u8; 1024];
            let n = stream.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
        body.truncate(len);
    } else {
        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest);
        body.extend_from_slice(&rest);
    }

    Ok(ClientResponse {
        status,
        headers,
        body,
    })
}

fn decode_chunked(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut rest = raw;
    loop {
        let Some(line_end) = find_subslice(rest, b"\r\n") else {
            break;
        };
        let size_line = String::from_utf8_lossy(&rest[..line_end]);
        let size = usize::from_str_radix(size_line.split(';').next().unwrap_or("").trim(), 16)
            .unwrap_or(0);
        if size == 0 {
            break;
        }
        let data_start = line_end + 2;
        out.extend_from_slice(&rest[data_start..data_start + size]);
        rest = &rest[data_start + size + 2..];
    }
    out
}

use super::headers::HeaderMap;
use serde_json::Value;
use std::fmt;

/// Response body representation.
///
/// `Bytes` is written with a Content-Length header; `Chunks` switches the
/// writer to chunked transfer encoding and pulls from the producer under
/// the connection's write backpressure.
pub enum ResponseBody {
    Empty,
    Bytes(Vec<u8>),
    Chunks(Box<dyn Iterator<Item = Vec<u8>> + Send>),
}

impl ResponseBody {
    /// Byte length when the body is fully materialized.
    pub fn len(&self) -> Option<usize> {
        match self {
            ResponseBody::Empty => Some(0),
            ResponseBody::Bytes(b) => Some(b.len()),
            ResponseBody::Chunks(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.len(), Some(0))
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Empty => write!(f, "Empty"),
            ResponseBody::Bytes(b) => write!(f, "Bytes({})", b.len()),
            ResponseBody::Chunks(_) => write!(f, "Chunks(..)"),
        }
    }
}

/// Normalized response produced by the engine or an error path, owned by
/// the bridge while it is written back to the transport.
#[derive(Debug)]
pub struct BridgeResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl BridgeResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: ResponseBody::Empty,
        }
    }

    pub fn with_bytes(status: u16, content_type: &str, bytes: Vec<u8>) -> Self {
        let mut headers = HeaderMap::new();
        headers.set("Content-Type", content_type);
        Self {
            status,
            headers,
            body: ResponseBody::Bytes(bytes),
        }
    }

    /// JSON response with the content type set.
    pub fn json(status: u16, body: &Value) -> Self {
        Self::with_bytes(
            status,
            "application/json",
            serde_json::to_vec(body).unwrap_or_default(),
        )
    }

    /// Error response with a JSON `{ "error": message }` body.
    pub fn error(status: u16, message: &str) -> Self {
        Self::json(status, &serde_json::json!({ "error": message }))
    }

    /// Streaming response pulling chunks from the given producer.
    pub fn chunked(
        status: u16,
        content_type: &str,
        chunks: impl Iterator<Item = Vec<u8>> + Send + 'static,
    ) -> Self {
        let mut headers = HeaderMap::new();
        headers.set("Content-Type", content_type);
        Self {
            status,
            headers,
            body: ResponseBody::Chunks(Box::new(chunks)),
        }
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.set(name, value);
    }
}

pub fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        411 => "Length Required",
        413 => "Payload Too Large",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "OK",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_reason() {
        assert_eq!(status_reason(200), "OK");
        assert_eq!(status_reason(413), "Payload Too Large");
        assert_eq!(status_reason(503), "Service Unavailable");
    }

    #[test]
    fn test_body_len() {
        assert_eq!(ResponseBody::Empty.len(), Some(0));
        assert_eq!(ResponseBody::Bytes(vec![1, 2, 3]).len(), Some(3));
        let chunks = ResponseBody::Chunks(Box::new(std::iter::once(vec![1u8])));
        assert_eq!(chunks.len(), None);
    }

    #[test]
    fn test_error_body_shape() {
        let resp = BridgeResponse::error(503, "engine not responding");
        assert_eq!(resp.status, 503);
        assert_eq!(resp.get_header("Content-Type"), Some("application/json"));
        match &resp.body {
            ResponseBody::Bytes(b) => {
                let v: Value = serde_json::from_slice(b).unwrap();
                assert_eq!(v["error"], "engine not responding");
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }
}

use super::headers::HeaderMap;
use crate::ids::RequestId;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// HTTP protocol version of the transport request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
}

impl HttpVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVersion::Http10 => "HTTP/1.0",
            HttpVersion::Http11 => "HTTP/1.1",
        }
    }
}

/// Decomposed request URI.
///
/// The raw request-target is preserved verbatim for logging; path and query
/// are split out for the engine.
#[derive(Debug, Clone)]
pub struct RequestUri {
    scheme: &'static str,
    authority: String,
    path: String,
    query: Option<String>,
    raw_target: String,
}

impl RequestUri {
    pub fn new(raw_target: &str, secure: bool, authority: impl Into<String>) -> Self {
        let (path, query) = match raw_target.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (raw_target.to_string(), None),
        };
        Self {
            scheme: if secure { "https" } else { "http" },
            authority: authority.into(),
            path,
            query,
            raw_target: raw_target.to_string(),
        }
    }

    pub fn scheme(&self) -> &str {
        self.scheme
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Original request-target as it appeared on the request line.
    pub fn raw_target(&self) -> &str {
        &self.raw_target
    }

    /// Decoded query parameters in order of appearance.
    pub fn query_params(&self) -> Vec<(String, String)> {
        match &self.query {
            Some(q) => url::form_urlencoded::parse(q.as_bytes())
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            None => Vec::new(),
        }
    }
}

/// Mutable property bag shared across the request's lifetime.
///
/// Pre-processors stamp metadata here, the engine may read and extend it,
/// and post-processors consume it. Cloning shares the underlying map, which
/// is what lets the bag outlive the transport request when the engine
/// suspends and completes from another thread.
#[derive(Debug, Clone, Default)]
pub struct Properties {
    inner: Arc<Mutex<HashMap<String, Value>>>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.inner.lock().unwrap().insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().unwrap().get(key).cloned()
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64())
    }
}

/// Transport-agnostic request handed to pre-processors and the engine.
///
/// Built once per transport request after the body has been fully
/// assembled; owned by the bridge until the engine takes it at dispatch.
#[derive(Debug, Clone)]
pub struct BridgeRequest {
    pub id: RequestId,
    pub method: http::Method,
    pub uri: RequestUri,
    pub version: HttpVersion,
    pub headers: HeaderMap,
    /// Fully assembled body bytes, in transport arrival order.
    pub body: Vec<u8>,
    /// Transport peer address, when known.
    pub peer_addr: Option<SocketAddr>,
    pub properties: Properties,
}

impl BridgeRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// A body-free copy for post-processing and logging.
    ///
    /// Shares the property bag with the original, so values stamped before
    /// dispatch (or by the engine) stay visible. Post-processors must not
    /// assume body bytes are retained; this is where that contract bites.
    pub fn detach_context(&self) -> BridgeRequest {
        BridgeRequest {
            id: self.id,
            method: self.method.clone(),
            uri: self.uri.clone(),
            version: self.version,
            headers: self.headers.clone(),
            body: Vec::new(),
            peer_addr: self.peer_addr,
            properties: self.properties.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_splits_path_and_query() {
        let uri = RequestUri::new("/pets/1?include=stats&x=%20y", false, "localhost:8080");
        assert_eq!(uri.path(), "/pets/1");
        assert_eq!(uri.query(), Some("include=stats&x=%20y"));
        assert_eq!(uri.raw_target(), "/pets/1?include=stats&x=%20y");
        assert_eq!(uri.scheme(), "http");
        let params = uri.query_params();
        assert_eq!(params[0], ("include".to_string(), "stats".to_string()));
        assert_eq!(params[1], ("x".to_string(), " y".to_string()));
    }

    #[test]
    fn test_properties_shared_between_clones() {
        let props = Properties::new();
        let other = props.clone();
        props.set("start_timestamp", serde_json::json!(123));
        assert_eq!(other.get_i64("start_timestamp"), Some(123));
    }
}

use super::{Done, PreProcessor};
use crate::http::BridgeRequest;
use serde_json::json;

/// Property-bag key for the arrival timestamp in epoch milliseconds.
pub const START_TIMESTAMP: &str = "start_timestamp";
/// Property-bag key for the normalized protocol version.
pub const HTTP_VERSION: &str = "http_version";
/// Property-bag key for the best-effort originating client address.
pub const REMOTE_ADDRESS: &str = "remote_address";

/// Stamps arrival metadata into the request's property bag.
///
/// Purely observational: arrival timestamp (epoch millis), normalized
/// protocol version, and the best-effort originating client address — the
/// first `X-Forwarded-For` entry when present, otherwise the transport peer.
/// Never touches routing.
pub struct RequestStampProcessor;

impl PreProcessor for RequestStampProcessor {
    fn process(&self, request: &mut BridgeRequest, done: Done) {
        request
            .properties
            .set(START_TIMESTAMP, json!(chrono::Utc::now().timestamp_millis()));
        request
            .properties
            .set(HTTP_VERSION, json!(request.version.as_str()));
        request
            .properties
            .set(REMOTE_ADDRESS, json!(client_address(request)));
        done.ok();
    }
}

/// Forwarded-for beats the raw peer: behind a proxy the peer address is the
/// proxy, and the first entry in the chain is the client.
fn client_address(request: &BridgeRequest) -> String {
    if let Some(forwarded) = request.header("X-Forwarded-For") {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    request
        .peer_addr
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "-".to_string())
}

use super::stamp::{REMOTE_ADDRESS, START_TIMESTAMP};
use super::PostProcessor;
use crate::http::{BridgeRequest, BridgeResponse};
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::info;

/// Emits one structured access-log line per completed response.
///
/// Line shape:
///
/// ```text
/// <remote> - - [<UTC-ISO8601>] "<METHOD> <raw-path> <PROTO>" <status> <len|-> <elapsed-ms> "<referrer|->" "<user-agent|->"
/// ```
///
/// The remote address and arrival timestamp come from the property bag when
/// [`RequestStampProcessor`](super::RequestStampProcessor) ran; otherwise the
/// transport peer is used and elapsed falls back to 0. Content length is
/// plain decimal, `-` when the response carries none. Lines go to the
/// `portico::access` target so operators can route them to their own sink.
pub struct AccessLogProcessor;

impl PostProcessor for AccessLogProcessor {
    fn process(&self, response: &mut BridgeResponse, request: &BridgeRequest) {
        let line = format_line(request, response, Utc::now());
        info!(target: "portico::access", "{line}");
    }
}

fn format_line(
    request: &BridgeRequest,
    response: &BridgeResponse,
    now: DateTime<Utc>,
) -> String {
    let remote = request
        .properties
        .get_str(REMOTE_ADDRESS)
        .or_else(|| request.peer_addr.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "-".to_string());
    let timestamp = now.to_rfc3339_opts(SecondsFormat::Millis, true);
    let length = content_length(response);
    let elapsed = request
        .properties
        .get_i64(START_TIMESTAMP)
        .map(|start| (now.timestamp_millis() - start).max(0))
        .unwrap_or(0);
    let referrer = request.header("Referer").unwrap_or("-");
    let user_agent = request.header("User-Agent").unwrap_or("-");
    format!(
        "{remote} - - [{timestamp}] \"{method} {target} {proto}\" {status} {length} {elapsed} \"{referrer}\" \"{user_agent}\"",
        method = request.method,
        target = request.uri.raw_target(),
        proto = request.version.as_str(),
        status = response.status,
    )
}

fn content_length(response: &BridgeResponse) -> String {
    if let Some(declared) = response.headers.get("Content-Length") {
        return match declared.parse::<u64>() {
            Ok(n) => n.to_string(),
            Err(_) => "-".to_string(),
        };
    }
    match response.body.len() {
        Some(n) if n > 0 => n.to_string(),
        _ => "-".to_string(),
    }
}

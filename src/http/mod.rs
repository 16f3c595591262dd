//! Normalized, transport-agnostic request and response types passed across
//! the bridge.

mod headers;
mod request;
mod response;

pub use headers::{HeaderMap, MAX_INLINE_HEADERS};
pub use request::{BridgeRequest, HttpVersion, Properties, RequestUri};
pub use response::{status_reason, BridgeResponse, ResponseBody};

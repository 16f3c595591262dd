//! Transport layer: connection handling, response writing, TLS, lifecycle.

pub mod conn;
pub mod http_server;
pub mod tls;
pub mod writer;

pub use conn::{BodyFraming, Conn, ParsedHead, Transport};
pub use http_server::{Server, ServerHandle};
pub use writer::WriteParams;

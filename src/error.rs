//! Startup error taxonomy.
//!
//! Only failures that prevent the server from serving traffic at all are
//! errors. Per-request failures (oversize bodies, rejected requests, engine
//! faults, broken connections) are HTTP responses or log lines, never values
//! of this type.

use thiserror::Error;

/// Fatal startup errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Invalid or incomplete configuration, including engine construction
    /// failures (missing resource packages, malformed options).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The listener could not bind to the configured address.
    #[error("bind failed on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// TLS key material could not be loaded or is invalid.
    #[error("invalid TLS material: {0}")]
    Tls(String),

    /// `start()` was called on a server that is already running.
    #[error("server already started")]
    AlreadyStarted,
}

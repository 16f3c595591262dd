//! # Portico
//!
//! **Portico** is a coroutine-powered HTTP front end that bridges connection
//! event loops to suspendable request-processing engines.
//!
//! ## Overview
//!
//! The engine behind the bridge — resource matching, filtering, invocation —
//! is a black box supplied by the embedder. It may answer a dispatch on the
//! calling invocation, fail, or suspend and deliver its response later from
//! an arbitrary thread. Portico's job is to reconcile that with a
//! coroutine-per-connection transport without blocking connection
//! coroutines, losing backpressure, or ever writing more than one response
//! per request.
//!
//! ## Architecture
//!
//! - **[`options`]** - typed, immutable-after-init server configuration
//! - **[`engine`]** - the engine contract: dispatch outcomes and the
//!   one-shot completion handle
//! - **[`container`]** - engine lifecycle with atomic hot reload
//! - **[`processor`]** - ordered pre/post processor chains with the built-in
//!   request-stamp and access-log pair
//! - **[`bridge`]** - body ingestion, engine hand-off, suspended-completion
//!   marshalling, single-shot response writing
//! - **[`dispatch_pool`]** - worker coroutines that invoke the engine off
//!   the connection coroutines
//! - **[`server`]** - listener lifecycle, per-connection coroutines, TLS,
//!   response serialization
//! - **[`hot_reload`]** - options-file watching driving container reloads
//!
//! ## Usage
//!
//! ```rust,no_run
//! use portico::container::Container;
//! use portico::engine::{Dispatch, Engine, FnEngine};
//! use portico::http::BridgeResponse;
//! use portico::options::ServerOptions;
//! use portico::processor::ProcessorChain;
//! use portico::server::Server;
//! use std::sync::Arc;
//!
//! let mut options = ServerOptions::default();
//! options.port = 8080;
//! options.add_package("demo.resources");
//!
//! let factory = Arc::new(|_opts: &ServerOptions| {
//!     Ok(Arc::new(FnEngine::new(|_req, _completion| {
//!         Dispatch::Done(BridgeResponse::json(200, &serde_json::json!({"ok": true})))
//!     })) as Arc<dyn Engine>)
//! });
//!
//! let container = Arc::new(Container::new(factory, options).unwrap());
//! let chain = Arc::new(ProcessorChain::with_defaults());
//! let handle = Server::new(container, chain).start().unwrap();
//! handle.join().unwrap();
//! ```

pub mod bridge;
pub mod container;
pub mod dispatch_pool;
pub mod engine;
pub mod error;
pub mod hot_reload;
pub mod http;
pub mod ids;
pub mod options;
pub mod processor;
pub mod runtime;
pub mod server;

pub use bridge::Bridge;
pub use container::{Container, EngineHandle};
pub use engine::{Completion, Dispatch, Engine, EngineFactory, FnEngine};
pub use error::ServerError;
pub use http::{BridgeRequest, BridgeResponse, HeaderMap, ResponseBody};
pub use options::ServerOptions;
pub use processor::{PostProcessor, PreProcessor, ProcessorChain};
pub use server::{Server, ServerHandle};

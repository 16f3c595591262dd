//! The engine contract.
//!
//! The engine is the opaque request-processing pipeline the bridge dispatches
//! into: resource matching, filtering and invocation all happen behind
//! [`Engine::dispatch`]. An engine may answer on the calling invocation, fail,
//! or suspend and deliver its result later through the [`Completion`] handle,
//! from any thread.
//!
//! The completion handle is a one-shot channel: the first invocation wins,
//! duplicates are logged as protocol violations and dropped. If the request
//! was abandoned (the peer disconnected while the engine was suspended) the
//! delivery quietly becomes a no-op.

use crate::http::{BridgeRequest, BridgeResponse};
use crate::ids::RequestId;
use crate::options::ServerOptions;
use may::sync::mpsc;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of a single [`Engine::dispatch`] invocation.
pub enum Dispatch {
    /// The engine produced a response on the calling invocation.
    Done(BridgeResponse),
    /// The engine failed; the bridge maps this to a generic error response.
    Failed(anyhow::Error),
    /// The engine suspended the request and will invoke the [`Completion`]
    /// handle later, possibly from another thread.
    Suspended,
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dispatch::Done(r) => write!(f, "Done({})", r.status),
            Dispatch::Failed(e) => write!(f, "Failed({e})"),
            Dispatch::Suspended => write!(f, "Suspended"),
        }
    }
}

/// Message delivered back to the connection coroutine that owns the request.
pub(crate) enum EngineSignal {
    /// The engine returned without a result; the completion handle will
    /// deliver one later.
    Suspended,
    /// The terminal outcome, delivered exactly once through the completion
    /// guard.
    Completed(Result<BridgeResponse, anyhow::Error>),
}

/// One-shot, idempotent completion handle for a suspended dispatch.
///
/// Clones share the same guard, so a pool worker and the engine can both
/// hold the handle without risking a second response.
#[derive(Clone)]
pub struct Completion {
    shared: Arc<CompletionShared>,
}

struct CompletionShared {
    request_id: RequestId,
    fired: AtomicBool,
    tx: mpsc::Sender<EngineSignal>,
}

impl Drop for CompletionShared {
    fn drop(&mut self) {
        // Every handle clone is gone and nothing was delivered: the engine
        // lost the request. Fail it rather than leave the bridge waiting.
        if !self.fired.load(Ordering::SeqCst) {
            warn!(
                request_id = %self.request_id,
                "engine dropped its completion handle without responding"
            );
            let _ = self.tx.send(EngineSignal::Completed(Err(anyhow::anyhow!(
                "engine dropped its completion handle without responding"
            ))));
        }
    }
}

impl Completion {
    pub(crate) fn new(request_id: RequestId, tx: mpsc::Sender<EngineSignal>) -> Self {
        Self {
            shared: Arc::new(CompletionShared {
                request_id,
                fired: AtomicBool::new(false),
                tx,
            }),
        }
    }

    /// Identifier of the request this handle completes.
    pub fn request_id(&self) -> RequestId {
        self.shared.request_id
    }

    /// Deliver the terminal outcome for the request.
    ///
    /// Returns `true` when the outcome was accepted. A second invocation is
    /// a protocol violation on the engine's part: it is logged and dropped,
    /// never written to the transport. Delivery to a request whose peer has
    /// already disconnected returns `false` as well; the result is released.
    pub fn complete(&self, result: Result<BridgeResponse, anyhow::Error>) -> bool {
        if self.shared.fired.swap(true, Ordering::SeqCst) {
            warn!(
                request_id = %self.shared.request_id,
                "engine invoked its completion handle more than once; duplicate dropped"
            );
            return false;
        }
        if self.shared.tx.send(EngineSignal::Completed(result)).is_err() {
            debug!(
                request_id = %self.shared.request_id,
                "request abandoned before completion; late result dropped"
            );
            return false;
        }
        true
    }

    /// Complete with a response.
    pub fn succeed(&self, response: BridgeResponse) -> bool {
        self.complete(Ok(response))
    }

    /// Complete with an engine fault.
    pub fn fail(&self, error: anyhow::Error) -> bool {
        self.complete(Err(error))
    }

    /// Announce that the dispatch invocation returned without a result.
    pub(crate) fn signal_suspended(&self) {
        let _ = self.shared.tx.send(EngineSignal::Suspended);
    }
}

/// Request-processing engine consumed by the bridge.
///
/// `dispatch` must be safe to call from a pool worker coroutine. When it
/// returns [`Dispatch::Suspended`] it must invoke `completion` at most once;
/// the handle tolerates (and logs) violations of that contract.
pub trait Engine: Send + Sync {
    fn dispatch(&self, request: BridgeRequest, completion: Completion) -> Dispatch;
}

/// Builds one immutable engine instance from an options snapshot.
///
/// Called once at container init and again on every reload. Failures prevent
/// the new instance from being published; a running container keeps serving
/// with the previous one.
pub trait EngineFactory: Send + Sync {
    fn build(&self, options: &ServerOptions) -> anyhow::Result<Arc<dyn Engine>>;
}

impl<F> EngineFactory for F
where
    F: Fn(&ServerOptions) -> anyhow::Result<Arc<dyn Engine>> + Send + Sync,
{
    fn build(&self, options: &ServerOptions) -> anyhow::Result<Arc<dyn Engine>> {
        self(options)
    }
}

/// Typed component handed to the engine factory at startup.
///
/// Replaces configuration-by-class-name: the composition root registers
/// concrete values on [`ServerOptions`](crate::options::ServerOptions) and
/// the factory downcasts the ones it recognizes.
pub trait EngineComponent: Send + Sync {
    fn name(&self) -> &str;
    fn as_any(&self) -> &dyn Any;
}

/// Engine built from a closure.
///
/// The simplest way to stand up an engine for demos and tests:
///
/// ```
/// use portico::engine::{Dispatch, FnEngine};
/// use portico::http::BridgeResponse;
///
/// let engine = FnEngine::new(|req, _completion| {
///     Dispatch::Done(BridgeResponse::json(
///         200,
///         &serde_json::json!({ "path": req.uri.path() }),
///     ))
/// });
/// ```
pub struct FnEngine {
    f: Box<dyn Fn(BridgeRequest, Completion) -> Dispatch + Send + Sync>,
}

impl FnEngine {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(BridgeRequest, Completion) -> Dispatch + Send + Sync + 'static,
    {
        Self { f: Box::new(f) }
    }
}

impl Engine for FnEngine {
    fn dispatch(&self, request: BridgeRequest, completion: Completion) -> Dispatch {
        (self.f)(request, completion)
    }
}

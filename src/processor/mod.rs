//! Pre- and post-processor chains invoked around engine dispatch.
//!
//! Both chains are assembled once before the server starts and are immutable
//! afterwards; many in-flight requests read them concurrently without
//! synchronization. Execution order is registration order — there is no
//! priority scheme, ordering is the caller's responsibility.
//!
//! Pre-processors see the request before dispatch and signal completion
//! through a one-shot [`Done`] handle, synchronously or from another thread.
//! Any of them may reject the request, which skips the remaining
//! pre-processors, the engine, and the whole post chain. Post-processors see
//! the final response and may adjust its headers only; the status and body
//! are decided by the engine (or the error path) and stay as-is.

mod access_log;
mod stamp;

pub use access_log::AccessLogProcessor;
pub use stamp::{RequestStampProcessor, HTTP_VERSION, REMOTE_ADDRESS, START_TIMESTAMP};

use crate::http::{BridgeRequest, BridgeResponse};
use may::sync::mpsc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// A pre-processor's refusal to let the request proceed.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub status: u16,
    pub message: String,
}

impl Rejection {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// One-shot completion signal handed to each pre-processor.
///
/// The processor must call [`Done::ok`] or [`Done::reject`] exactly once;
/// the chain does not advance until it does. The handle is `Send`, so a
/// processor may return first and signal later from another thread. A
/// duplicate signal is dropped; a handle dropped unsignalled counts as a
/// rejection so a buggy processor cannot wedge the request.
#[derive(Clone)]
pub struct Done {
    shared: Arc<DoneShared>,
}

struct DoneShared {
    fired: AtomicBool,
    tx: mpsc::Sender<Result<(), Rejection>>,
}

impl Done {
    fn new(tx: mpsc::Sender<Result<(), Rejection>>) -> Self {
        Self {
            shared: Arc::new(DoneShared {
                fired: AtomicBool::new(false),
                tx,
            }),
        }
    }

    /// Let the request proceed to the next processor.
    pub fn ok(&self) {
        self.signal(Ok(()));
    }

    /// Short-circuit the request with an error response.
    pub fn reject(&self, status: u16, message: impl Into<String>) {
        self.signal(Err(Rejection::new(status, message)));
    }

    fn signal(&self, outcome: Result<(), Rejection>) {
        if self.shared.fired.swap(true, Ordering::SeqCst) {
            warn!("pre-processor signalled completion more than once; duplicate dropped");
            return;
        }
        let _ = self.shared.tx.send(outcome);
    }
}

/// Hook invoked before engine dispatch.
///
/// Mutation of the request happens during the call; the [`Done`] signal may
/// arrive later. Response data does not exist yet.
pub trait PreProcessor: Send + Sync {
    fn process(&self, request: &mut BridgeRequest, done: Done);
}

/// Hook invoked after a response is available, before it is written.
///
/// May inspect and mutate response headers. The request's body bytes are not
/// retained at this point; only the metadata and property bag survive.
pub trait PostProcessor: Send + Sync {
    fn process(&self, response: &mut BridgeResponse, request: &BridgeRequest);
}

/// Ordered pre- and post-processor lists.
#[derive(Default)]
pub struct ProcessorChain {
    pre: Vec<Arc<dyn PreProcessor>>,
    post: Vec<Arc<dyn PostProcessor>>,
}

impl ProcessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in pair: request stamping before dispatch, access logging
    /// after.
    pub fn with_defaults() -> Self {
        let mut chain = Self::new();
        chain.add_pre(Arc::new(RequestStampProcessor));
        chain.add_post(Arc::new(AccessLogProcessor));
        chain
    }

    pub fn add_pre(&mut self, processor: Arc<dyn PreProcessor>) {
        self.pre.push(processor);
    }

    pub fn add_post(&mut self, processor: Arc<dyn PostProcessor>) {
        self.post.push(processor);
    }

    /// Run the pre chain in registration order.
    ///
    /// Each processor completes (synchronously or not) before the next
    /// begins. The first rejection wins and ends the chain.
    pub fn run_pre(&self, request: &mut BridgeRequest) -> Result<(), Rejection> {
        for processor in &self.pre {
            let (tx, rx) = mpsc::channel();
            processor.process(request, Done::new(tx));
            match rx.recv() {
                Ok(Ok(())) => {}
                Ok(Err(rejection)) => return Err(rejection),
                Err(_) => {
                    warn!("pre-processor dropped its completion signal; rejecting request");
                    return Err(Rejection::new(500, "request pre-processing failed"));
                }
            }
        }
        Ok(())
    }

    /// Run the post chain in registration order.
    pub fn run_post(&self, response: &mut BridgeResponse, request: &BridgeRequest) {
        for processor in &self.post {
            processor.process(response, request);
        }
    }
}

//! Shared pool of dispatch coroutines.
//!
//! Every engine invocation is an explicit hand-off from the connection
//! coroutine to this pool, because resource methods are allowed to block.
//! Workers share one unbounded channel and load-balance over it; each
//! invocation runs under panic recovery so a crashing engine turns into an
//! error completion, never a dead worker set or a dead listener.

use crate::engine::{Completion, Dispatch, Engine};
use crate::http::BridgeRequest;
use may::sync::mpsc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// One engine invocation waiting for a worker.
pub struct DispatchJob {
    pub request: BridgeRequest,
    pub engine: Arc<dyn Engine>,
    pub completion: Completion,
}

/// Fixed-size pool of coroutines invoking [`Engine::dispatch`].
pub struct DispatchPool {
    sender: mpsc::Sender<DispatchJob>,
}

impl DispatchPool {
    /// Spawn `workers` dispatch coroutines with the given stack size.
    ///
    /// # Safety
    ///
    /// Spawning through `may::coroutine::Builder::spawn` is unsafe in the
    /// `may` runtime. The caller must ensure the runtime is initialized
    /// before the pool is created.
    pub unsafe fn new(workers: usize, stack_size: usize) -> Self {
        let (tx, rx) = mpsc::channel::<DispatchJob>();
        let rx = Arc::new(rx);

        info!(workers, stack_size, "creating dispatch pool");

        for worker_id in 0..workers {
            let rx = Arc::clone(&rx);
            let spawn_result = may::coroutine::Builder::new()
                .stack_size(stack_size)
                .spawn(move || {
                    debug!(worker_id, "dispatch worker started");
                    // All workers share the receiver and load-balance over it.
                    while let Ok(job) = rx.recv() {
                        run_job(worker_id, job);
                    }
                    debug!(worker_id, "dispatch worker exiting");
                });
            if let Err(e) = spawn_result {
                error!(worker_id, error = %e, "failed to spawn dispatch worker");
            }
        }

        Self { sender: tx }
    }

    /// Hand a job to the pool.
    ///
    /// Fails only when every worker has exited; the caller turns that into
    /// an error response instead of waiting on a channel nobody serves.
    pub fn submit(&self, job: DispatchJob) -> Result<(), DispatchJob> {
        self.sender.send(job).map_err(|e| e.0)
    }
}

fn run_job(worker_id: usize, job: DispatchJob) {
    let DispatchJob {
        request,
        engine,
        completion,
    } = job;
    let request_id = request.id;

    debug!(request_id = %request_id, worker_id, "invoking engine");

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        engine.dispatch(request, completion.clone())
    }));

    match outcome {
        Ok(Dispatch::Done(response)) => {
            completion.complete(Ok(response));
        }
        Ok(Dispatch::Failed(error)) => {
            warn!(request_id = %request_id, error = %error, "engine dispatch failed");
            completion.complete(Err(error));
        }
        Ok(Dispatch::Suspended) => {
            debug!(request_id = %request_id, "engine suspended the request");
            completion.signal_suspended();
        }
        Err(panic) => {
            error!(
                request_id = %request_id,
                worker_id,
                panic_message = ?panic,
                "engine panicked during dispatch"
            );
            completion.complete(Err(anyhow::anyhow!("engine panicked during dispatch")));
        }
    }
}

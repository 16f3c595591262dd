//! Server lifecycle: bind, accept, spawn, stop.
//!
//! The server binds one listener per its options snapshot and runs one
//! coroutine per connection; each connection coroutine loops over
//! [`Bridge::handle`] until the peer leaves or keep-alive ends. `start()` is
//! idempotent-once and `stop()` cancels the accept coroutine, which releases
//! the listener and drops the container reference it carried.

use super::conn::{Conn, HeadError, Transport};
use super::tls;
use super::writer::{self, WriteParams};
use crate::bridge::Bridge;
use crate::container::Container;
use crate::dispatch_pool::DispatchPool;
use crate::error::ServerError;
use crate::http::{BridgeResponse, HttpVersion};
use crate::processor::ProcessorChain;
use crate::runtime::RuntimeOptions;
use may::net::{TcpListener, TcpStream};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Lifecycle wrapper binding the bridge as the listener's request handler.
pub struct Server {
    container: Arc<Container>,
    chain: Arc<ProcessorChain>,
    runtime: RuntimeOptions,
    started: AtomicBool,
}

impl Server {
    pub fn new(container: Arc<Container>, chain: Arc<ProcessorChain>) -> Self {
        Self::with_runtime(container, chain, RuntimeOptions::from_env())
    }

    pub fn with_runtime(
        container: Arc<Container>,
        chain: Arc<ProcessorChain>,
        runtime: RuntimeOptions,
    ) -> Self {
        Self {
            container,
            chain,
            runtime,
            started: AtomicBool::new(false),
        }
    }

    /// Bind the listener and start accepting connections.
    ///
    /// Fails fast with [`ServerError::AlreadyStarted`] on a second call.
    /// Bind and TLS failures surface here, on the same channel as
    /// configuration errors.
    pub fn start(&self) -> Result<ServerHandle, ServerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyStarted);
        }

        let options = self.container.configuration();
        let tls_config = if options.ssl {
            match &options.tls {
                Some(tls_options) => Some(tls::load_server_config(tls_options)?),
                None => {
                    return Err(ServerError::Tls(
                        "ssl enabled but no certificate/key configured".to_string(),
                    ));
                }
            }
        } else {
            None
        };

        let addr = options.bind_addr();
        let listener = TcpListener::bind(addr.as_str()).map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;

        // The coroutine listener does not expose backlog tuning; the
        // configured value is surfaced for operators, the OS default applies.
        info!(
            addr = %local_addr,
            ssl = options.ssl,
            accept_backlog = options.accept_backlog,
            compression = options.compression_enabled,
            "listener bound"
        );

        // SAFETY: may::coroutine::Builder::spawn is unsafe in the may
        // runtime. The accept loop and the pool workers own only Send +
        // 'static data and report failures through logging, never panics.
        let pool = Arc::new(unsafe {
            DispatchPool::new(self.runtime.dispatch_workers, self.runtime.stack_size)
        });
        let bridge = Arc::new(Bridge::new(
            Arc::clone(&self.container),
            Arc::clone(&self.chain),
            pool,
        ));

        let stack_size = self.runtime.stack_size;
        // SAFETY: as above; cancellation at stop() unwinds the accept loop
        // at its blocking points and drops the bridge (and with it the
        // container reference).
        let handle = unsafe {
            may::coroutine::Builder::new()
                .stack_size(stack_size)
                .spawn(move || accept_loop(listener, bridge, tls_config, stack_size))
        }
        .map_err(|e| ServerError::Configuration(format!("failed to spawn accept loop: {e}")))?;

        Ok(ServerHandle {
            addr: local_addr,
            handle,
        })
    }
}

/// Handle to a running server.
pub struct ServerHandle {
    addr: SocketAddr,
    handle: may::coroutine::JoinHandle<()>,
}

impl ServerHandle {
    /// Address the listener is bound to; useful with port 0.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Poll until the listener accepts connections.
    ///
    /// # Errors
    ///
    /// `TimedOut` if the server is not ready within ~250ms.
    pub fn wait_ready(&self) -> io::Result<()> {
        for _ in 0..50 {
            if std::net::TcpStream::connect(self.addr).is_ok() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "server not ready"))
    }

    /// Stop accepting and release the listener.
    ///
    /// Connections already being served run to completion on their own
    /// coroutines; the accept loop's container reference is dropped here.
    pub fn stop(self) {
        // SAFETY: cancel() is marked unsafe by the may runtime. The handle
        // is valid, the coroutine is the accept loop we spawned, and
        // cancellation at its blocking accept is the intended shutdown path.
        unsafe {
            self.handle.coroutine().cancel();
        }
        let _ = self.handle.join();
    }

    /// Block until the accept loop exits.
    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}

fn accept_loop(
    listener: TcpListener,
    bridge: Arc<Bridge>,
    tls_config: Option<Arc<rustls::ServerConfig>>,
    stack_size: usize,
) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let bridge = Arc::clone(&bridge);
                let tls_config = tls_config.clone();
                // SAFETY: connection coroutines own their stream and Arc
                // clones only; failures end the connection, not the loop.
                let spawned = unsafe {
                    may::coroutine::Builder::new()
                        .stack_size(stack_size)
                        .spawn(move || serve_connection(stream, tls_config, bridge))
                };
                if let Err(e) = spawned {
                    error!(error = %e, "failed to spawn connection coroutine");
                }
            }
            Err(e) => warn!(error = %e, "accept failed"),
        }
    }
}

fn serve_connection(
    stream: TcpStream,
    tls_config: Option<Arc<rustls::ServerConfig>>,
    bridge: Arc<Bridge>,
) {
    let secure = tls_config.is_some();
    let transport = match tls_config {
        Some(config) => match rustls::ServerConnection::new(config) {
            Ok(session) => Transport::Tls(Box::new(rustls::StreamOwned::new(session, stream))),
            Err(e) => {
                warn!(error = %e, "TLS session setup failed");
                return;
            }
        },
        None => Transport::Plain(stream),
    };
    let mut conn = Conn::new(transport, secure);

    loop {
        match conn.read_head() {
            Ok(Some(head)) => {
                if !bridge.handle(&mut conn, head) {
                    break;
                }
            }
            Ok(None) => break,
            Err(HeadError::Malformed) => {
                refuse(&mut conn, 400, "malformed request");
                break;
            }
            Err(HeadError::TooLarge) => {
                refuse(&mut conn, 431, "request header fields too large");
                break;
            }
            Err(HeadError::Io(e)) => {
                debug!(error = %e, "connection read failed");
                break;
            }
        }
    }
}

/// Minimal refusal for requests that never produced a parseable head; there
/// is no request context, so the processor chains do not apply.
fn refuse(conn: &mut Conn, status: u16, message: &str) {
    let params = WriteParams {
        version: HttpVersion::Http11,
        head_only: false,
        keep_alive: false,
        compress: false,
    };
    if let Err(e) = writer::write_response(conn, &params, BridgeResponse::error(status, message)) {
        debug!(error = %e, "failed to write refusal");
    }
}

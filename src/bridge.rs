//! The request/response bridge.
//!
//! Entry point for every transport request: ingest the body under the
//! configured maximum, build the normalized request, run the pre chain,
//! hand off to the engine through the dispatch pool, wait for an immediate
//! or suspended completion, run the post chain, and write the response
//! exactly once.
//!
//! The connection coroutine calling [`Bridge::handle`] owns the socket, so
//! every byte written to the peer originates here; engine completions from
//! other threads are marshalled back through the per-request channel before
//! anything touches the connection.

use crate::container::Container;
use crate::dispatch_pool::{DispatchJob, DispatchPool};
use crate::engine::{Completion, EngineSignal};
use crate::http::{BridgeRequest, BridgeResponse, Properties, RequestUri};
use crate::ids::RequestId;
use crate::processor::ProcessorChain;
use crate::server::conn::{BodyFraming, Conn, FramingError, ParsedHead, PeerProbe};
use crate::server::writer::{self, WriteParams};
use may::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Probe cadence while a request is suspended inside the engine.
const SUSPEND_PROBE_WINDOW: Duration = Duration::from_millis(25);

enum Wait {
    Finished(Result<BridgeResponse, anyhow::Error>),
    PeerGone,
}

enum IngestError {
    Oversize,
    Transport(std::io::Error),
}

/// Bridges one transport request to the engine and back.
pub struct Bridge {
    container: Arc<Container>,
    chain: Arc<ProcessorChain>,
    pool: Arc<DispatchPool>,
}

impl Bridge {
    pub fn new(
        container: Arc<Container>,
        chain: Arc<ProcessorChain>,
        pool: Arc<DispatchPool>,
    ) -> Self {
        Self {
            container,
            chain,
            pool,
        }
    }

    /// Process one request on its connection coroutine.
    ///
    /// Returns whether the connection may be kept alive for the next
    /// request.
    pub fn handle(&self, conn: &mut Conn, head: ParsedHead) -> bool {
        // The handle read here is kept for the whole request; a reload
        // mid-flight does not transplant this request onto the new engine.
        let handle = self.container.handle();
        let options = Arc::clone(handle.options());

        let request_id = RequestId::from_header_or_new(head.headers.get("X-Request-Id"));
        let head_only = head.method == http::Method::HEAD;
        let wants_keep_alive = requests_keep_alive(&head);
        let accept_gzip = accepts_gzip(&head);

        let framing = match BodyFraming::from_headers(&head.headers) {
            Ok(framing) => framing,
            Err(FramingError::InvalidContentLength) => {
                return self.short_circuit(conn, &head, request_id, 400, "invalid Content-Length");
            }
            Err(FramingError::UnsupportedTransferEncoding) => {
                return self.short_circuit(
                    conn,
                    &head,
                    request_id,
                    501,
                    "unsupported transfer encoding",
                );
            }
        };

        // A declared length over the limit aborts before a single body byte
        // is read; the engine is never consulted.
        if let BodyFraming::Length(declared) = framing {
            if declared > options.max_body_size {
                debug!(
                    request_id = %request_id,
                    declared,
                    max = options.max_body_size,
                    "declared body exceeds the configured maximum"
                );
                return self.short_circuit(conn, &head, request_id, 413, "request body too large");
            }
        }

        if framing.has_body() && expects_continue(&head) {
            if let Err(e) = conn.send_continue(head.version) {
                warn!(request_id = %request_id, error = %e, "failed to send 100 Continue");
                return false;
            }
        }

        let body = match self.ingest_body(conn, framing, &options) {
            Ok(body) => body,
            Err(IngestError::Oversize) => {
                debug!(
                    request_id = %request_id,
                    max = options.max_body_size,
                    "body exceeded the configured maximum mid-ingest"
                );
                return self.short_circuit(conn, &head, request_id, 413, "request body too large");
            }
            Err(IngestError::Transport(e)) => {
                warn!(request_id = %request_id, error = %e, "body ingestion failed");
                return self.short_circuit(conn, &head, request_id, 400, "malformed request body");
            }
        };

        let mut request = build_request(head, body, conn, request_id);

        if let Err(rejection) = self.chain.run_pre(&mut request) {
            // Pre-processor rejection skips the engine and the post chain.
            info!(
                request_id = %request_id,
                status = rejection.status,
                "request rejected by pre-processor"
            );
            let response = BridgeResponse::error(rejection.status, &rejection.message);
            let params = WriteParams {
                version: request.version,
                head_only,
                keep_alive: wants_keep_alive && !conn.close,
                compress: false,
            };
            return self.write(conn, request_id, params, response);
        }

        // Body bytes travel into the engine with the request; the detached
        // context (sharing the property bag) is what post-processors see.
        let context = request.detach_context();
        let version = request.version;

        let (tx, rx) = mpsc::channel();
        let completion = Completion::new(request_id, tx);
        let job = DispatchJob {
            request,
            engine: Arc::clone(handle.engine()),
            completion,
        };

        let outcome = match self.pool.submit(job) {
            Ok(()) => self.wait_for_outcome(conn, request_id, &rx),
            Err(_) => {
                Wait::Finished(Err(anyhow::anyhow!("dispatch workers are not responding")))
            }
        };

        let result = match outcome {
            Wait::Finished(result) => result,
            Wait::PeerGone => {
                // The peer left while the engine held the request. The
                // eventual late completion fails its channel send and is
                // dropped; nothing is ever written to the dead connection.
                info!(request_id = %request_id, "peer disconnected while request was suspended");
                return false;
            }
        };

        let mut response = match result {
            Ok(response) if (100..=599).contains(&response.status) => response,
            Ok(response) => {
                warn!(
                    request_id = %request_id,
                    status = response.status,
                    "engine produced a malformed status; mapping to 500"
                );
                BridgeResponse::error(500, "internal server error")
            }
            Err(error) => {
                warn!(request_id = %request_id, error = %error, "engine fault");
                BridgeResponse::error(500, "internal server error")
            }
        };

        self.chain.run_post(&mut response, &context);

        let params = WriteParams {
            version,
            head_only,
            keep_alive: wants_keep_alive && !conn.close,
            compress: options.compression_enabled && accept_gzip,
        };
        self.write(conn, request_id, params, response)
    }

    /// Accumulate the full body, chunk by chunk, under the size limit.
    ///
    /// The pull model is the backpressure: when accumulation stops, so do
    /// socket reads. On overflow the stream is simply never pulled again.
    fn ingest_body(
        &self,
        conn: &mut Conn,
        framing: BodyFraming,
        options: &crate::options::ServerOptions,
    ) -> Result<Vec<u8>, IngestError> {
        let max = options.max_body_size;
        let mut reader = conn.body_reader(framing, options.receive_buffer_size());
        let mut body = Vec::new();
        loop {
            match reader.next_chunk() {
                Ok(Some(chunk)) => {
                    if body.len() + chunk.len() > max {
                        return Err(IngestError::Oversize);
                    }
                    body.extend_from_slice(&chunk);
                }
                Ok(None) => return Ok(body),
                Err(e) => return Err(IngestError::Transport(e)),
            }
        }
    }

    /// Wait for the engine's outcome, marshalled onto this coroutine.
    ///
    /// The first message tells us whether dispatch finished on the worker or
    /// suspended. While suspended, the channel is polled between timed
    /// one-byte probe reads so a dead peer releases the request instead of
    /// pinning it forever.
    fn wait_for_outcome(
        &self,
        conn: &mut Conn,
        request_id: RequestId,
        rx: &mpsc::Receiver<EngineSignal>,
    ) -> Wait {
        match rx.recv() {
            Ok(EngineSignal::Completed(result)) => Wait::Finished(result),
            Ok(EngineSignal::Suspended) => {
                debug!(request_id = %request_id, "waiting for suspended completion");
                // A dropped completion handle delivers an error signal from
                // its drop guard, so an empty channel always means "still
                // pending" here.
                loop {
                    match rx.try_recv() {
                        Ok(EngineSignal::Completed(result)) => return Wait::Finished(result),
                        Ok(EngineSignal::Suspended) => {}
                        Err(_) => {}
                    }
                    if conn.poll_peer(SUSPEND_PROBE_WINDOW) == PeerProbe::Closed {
                        return Wait::PeerGone;
                    }
                }
            }
            Err(_) => Wait::Finished(Err(anyhow::anyhow!(
                "engine delivered no outcome for the request"
            ))),
        }
    }

    /// Transport-level short-circuit: no pre-processing, no engine, but the
    /// post chain still runs so the access log records the outcome. The
    /// unread body makes keep-alive impossible.
    fn short_circuit(
        &self,
        conn: &mut Conn,
        head: &ParsedHead,
        request_id: RequestId,
        status: u16,
        message: &str,
    ) -> bool {
        conn.close = true;
        let context = BridgeRequest {
            id: request_id,
            method: head.method.clone(),
            uri: RequestUri::new(&head.target, conn.is_secure(), authority(head)),
            version: head.version,
            headers: head.headers.clone(),
            body: Vec::new(),
            peer_addr: conn.peer_addr(),
            properties: Properties::new(),
        };
        let mut response = BridgeResponse::error(status, message);
        self.chain.run_post(&mut response, &context);
        let params = WriteParams {
            version: head.version,
            head_only: head.method == http::Method::HEAD,
            keep_alive: false,
            compress: false,
        };
        self.write(conn, request_id, params, response);
        false
    }

    /// Write the response exactly once; any failure is logged and ends the
    /// request, never the listener.
    fn write(
        &self,
        conn: &mut Conn,
        request_id: RequestId,
        params: WriteParams,
        response: BridgeResponse,
    ) -> bool {
        let status = response.status;
        match writer::write_response(conn, &params, response) {
            Ok(keep_alive) => {
                debug!(request_id = %request_id, status, keep_alive, "response written");
                keep_alive
            }
            Err(e) => {
                warn!(
                    request_id = %request_id,
                    status,
                    error = %e,
                    "response write failed; closing connection"
                );
                conn.close = true;
                false
            }
        }
    }
}

fn build_request(
    head: ParsedHead,
    body: Vec<u8>,
    conn: &Conn,
    request_id: RequestId,
) -> BridgeRequest {
    let uri = RequestUri::new(&head.target, conn.is_secure(), authority(&head));
    BridgeRequest {
        id: request_id,
        method: head.method,
        uri,
        version: head.version,
        headers: head.headers,
        body,
        peer_addr: conn.peer_addr(),
        properties: Properties::new(),
    }
}

fn authority(head: &ParsedHead) -> String {
    head.headers.get("Host").unwrap_or("").to_string()
}

fn requests_keep_alive(head: &ParsedHead) -> bool {
    let connection = head.headers.get("Connection");
    match head.version {
        crate::http::HttpVersion::Http11 => {
            !matches!(connection, Some(v) if v.eq_ignore_ascii_case("close"))
        }
        crate::http::HttpVersion::Http10 => {
            matches!(connection, Some(v) if v.eq_ignore_ascii_case("keep-alive"))
        }
    }
}

fn accepts_gzip(head: &ParsedHead) -> bool {
    head.headers
        .get("Accept-Encoding")
        .map(|v| {
            v.split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("gzip"))
        })
        .unwrap_or(false)
}

fn expects_continue(head: &ParsedHead) -> bool {
    matches!(head.headers.get("Expect"), Some(v) if v.eq_ignore_ascii_case("100-continue"))
}

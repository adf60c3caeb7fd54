//! HTTP streaming adapter (spec §4.5): a single endpoint that accepts a
//! POST and holds the response open, streaming newline-delimited result
//! records back until the simulation terminates.
//!
//! The per-client fragment table is "a shared mutable adapter registry"
//! collapsed to "an owned map behind a single lock" (spec §9): one
//! [`FragmentQueue`] per live `client_id`, offered into from the bridge
//! core's task and drained by the response-streaming task.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use bytes::Bytes;
use simbridge_types::{ErrorInfo, ResponseEnvelope, ResponseStatus, SimulationInfo, SimulationType};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};

use crate::adapter::{normalize_body, normalize_error_kind, Adapter};
use crate::error::AdapterError;
use crate::signal::{Signal, SignalSender};

/// Idle timeout while waiting for the next fragment (spec §4.5 step 4).
const IDLE_TIMEOUT: Duration = Duration::from_secs(600);
/// Bounded fragment queue depth; overflow drops the oldest fragment.
const FRAGMENT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct HttpStreamingConfig {
    pub host: String,
    pub port: u16,
    pub input_endpoint: String,
    /// Both must be set to serve over TLS (spec §6 "Optional TLS when a
    /// certificate and key file are configured").
    pub certfile: Option<String>,
    pub keyfile: Option<String>,
}

struct FragmentQueue {
    fragments: Mutex<VecDeque<ResponseEnvelope>>,
    notify: Notify,
    dropped: AtomicU64,
}

impl FragmentQueue {
    fn new() -> Self {
        FragmentQueue {
            fragments: Mutex::new(VecDeque::with_capacity(FRAGMENT_QUEUE_CAPACITY)),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Non-blocking offer; drops the oldest fragment on overflow rather
    /// than blocking the caller (spec §4.5 "prefer recent fragments for
    /// live visibility").
    async fn offer(&self, fragment: ResponseEnvelope) {
        let mut guard = self.fragments.lock().await;
        if guard.len() >= FRAGMENT_QUEUE_CAPACITY {
            guard.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        guard.push_back(fragment);
        self.notify.notify_one();
    }

    /// Waits up to `IDLE_TIMEOUT` for the next fragment.
    async fn next(&self) -> Option<ResponseEnvelope> {
        loop {
            {
                let mut guard = self.fragments.lock().await;
                if let Some(fragment) = guard.pop_front() {
                    return Some(fragment);
                }
            }
            let notified = self.notify.notified();
            if tokio::time::timeout(IDLE_TIMEOUT, notified).await.is_err() {
                return None;
            }
        }
    }
}

struct AdapterState {
    clients: Mutex<HashMap<String, Arc<FragmentQueue>>>,
    signal_tx: SignalSender,
}

pub struct HttpStreamingAdapter {
    config: HttpStreamingConfig,
    state: Arc<AdapterState>,
    shutdown: Arc<Notify>,
    tls_handle: axum_server::Handle,
}

impl HttpStreamingAdapter {
    pub fn new(config: HttpStreamingConfig, signal_tx: SignalSender) -> Self {
        HttpStreamingAdapter {
            config,
            state: Arc::new(AdapterState { clients: Mutex::new(HashMap::new()), signal_tx }),
            shutdown: Arc::new(Notify::new()),
            tls_handle: axum_server::Handle::new(),
        }
    }

    fn router(&self) -> Router {
        Router::new().route(&self.config.input_endpoint, post(handle_request)).with_state(self.state.clone())
    }
}

#[async_trait]
impl Adapter for HttpStreamingAdapter {
    async fn start(&self) -> Result<(), AdapterError> {
        match (&self.config.certfile, &self.config.keyfile) {
            (Some(cert), Some(key)) => {
                let addr = tokio::net::lookup_host((self.config.host.as_str(), self.config.port))
                    .await
                    .map_err(|e| AdapterError::Http(format!("failed to resolve bind address: {e}")))?
                    .next()
                    .ok_or_else(|| AdapterError::Http("bind address resolved to no addresses".into()))?;
                let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key)
                    .await
                    .map_err(|e| AdapterError::Http(format!("failed to load TLS cert/key: {e}")))?;
                axum_server::bind_rustls(addr, tls)
                    .handle(self.tls_handle.clone())
                    .serve(self.router().into_make_service())
                    .await
                    .map_err(|e| AdapterError::Http(format!("https server error: {e}")))?;
            }
            _ => {
                let listener = TcpListener::bind((self.config.host.as_str(), self.config.port))
                    .await
                    .map_err(|e| AdapterError::Http(format!("bind failed: {e}")))?;
                let shutdown = self.shutdown.clone();
                axum::serve(listener, self.router())
                    .with_graceful_shutdown(async move { shutdown.notified().await })
                    .await
                    .map_err(|e| AdapterError::Http(format!("http server error: {e}")))?;
            }
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), AdapterError> {
        self.shutdown.notify_one();
        self.tls_handle.graceful_shutdown(Some(Duration::from_secs(5)));
        Ok(())
    }

    /// Offers `response` into `client_id`'s fragment queue. Returns
    /// `false` if no stream is currently registered for that client.
    async fn deliver(&self, client_id: &str, response: &ResponseEnvelope) -> Result<bool, AdapterError> {
        let queue = self.state.clients.lock().await.get(client_id).cloned();
        match queue {
            Some(queue) => {
                queue.offer(response.clone()).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

async fn handle_request(State(state): State<Arc<AdapterState>>, body: Bytes) -> Response {
    let request = match normalize_body(&body) {
        Ok(request) => request,
        Err(err) => {
            let kind = normalize_error_kind(&err);
            let body = serde_json::json!({ "error": err.to_string(), "type": kind.as_str() });
            return (StatusCode::BAD_REQUEST, axum::Json(body)).into_response();
        }
    };

    let client_id = request.client_id.clone();
    let queue = Arc::new(FragmentQueue::new());
    state.clients.lock().await.insert(client_id.clone(), queue.clone());

    let mut tagged = request;
    tagged.bridge_meta.set_protocol("http");
    tagged.bridge_meta.set_client_id(&client_id);
    let sim_file = tagged.file.clone();
    let sim_type = tagged.kind;

    if state.signal_tx.send(Signal::InputHttp(tagged)).await.is_err() {
        state.clients.lock().await.remove(&client_id);
        return (StatusCode::INTERNAL_SERVER_ERROR, "bridge core unavailable").into_response();
    }

    let stream = ndjson_body_stream(StreamCtx {
        client_id,
        queue,
        state: state.clone(),
        sim_file,
        sim_type,
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(
            axum::http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/x-ndjson"),
        )
        .body(Body::from_stream(stream))
        .expect("static response parts are always valid")
}

fn processing_line() -> Bytes {
    Bytes::from(b"{\"status\":\"processing\"}\n".to_vec())
}

fn timeout_line() -> Bytes {
    Bytes::from(b"{\"status\":\"timeout\"}\n".to_vec())
}

fn envelope_line(envelope: &ResponseEnvelope) -> Bytes {
    let mut line = serde_json::to_vec(envelope).unwrap_or_default();
    line.push(b'\n');
    Bytes::from(line)
}

fn timeout_envelope(sim_file: String, sim_type: SimulationType) -> ResponseEnvelope {
    ResponseEnvelope {
        simulation: SimulationInfo { name: sim_file, kind: sim_type, outputs: None },
        request_id: String::new(),
        bridge_meta: Default::default(),
        status: ResponseStatus::Timeout,
        timestamp: chrono::Utc::now(),
        data: None,
        progress: None,
        error: Some(ErrorInfo { message: "stream idle timeout".into(), kind: "timeout".into(), code: Some(504), details: None }),
        sequence: None,
        metadata: None,
    }
}

/// Phases of the per-request ndjson body stream.
enum StreamPhase {
    /// Nothing written yet; emit `{"status":"processing"}` next.
    Initial,
    /// Waiting on the fragment queue.
    Running,
    /// Idle timeout fired; emit the synthetic timeout line next, then the
    /// timeout envelope, then finish.
    TimedOut,
    /// A terminal fragment (or the timeout envelope) was just emitted;
    /// remove the client-table entry and end the stream.
    Finished,
}

struct StreamCtx {
    client_id: String,
    queue: Arc<FragmentQueue>,
    state: Arc<AdapterState>,
    sim_file: String,
    sim_type: SimulationType,
}

/// Builds the ndjson body stream: an immediate `processing` frame, then
/// fragments from the per-client queue until a terminal status or idle
/// timeout. Abandonment by the client (write failure) is handled by axum
/// simply dropping the stream; the client-table entry then lingers until
/// the next `deliver` finds it missing or the request's own terminal
/// fragment removes it — whichever happens first.
fn ndjson_body_stream(ctx: StreamCtx) -> impl futures_core::Stream<Item = Result<Bytes, std::convert::Infallible>> {
    futures_util::stream::unfold((StreamPhase::Initial, ctx), |(phase, ctx)| async move {
        match phase {
            StreamPhase::Initial => Some((Ok(processing_line()), (StreamPhase::Running, ctx))),
            StreamPhase::Running => match ctx.queue.next().await {
                Some(fragment) => {
                    let next_phase = if fragment.is_terminal() { StreamPhase::Finished } else { StreamPhase::Running };
                    Some((Ok(envelope_line(&fragment)), (next_phase, ctx)))
                }
                None => Some((Ok(timeout_line()), (StreamPhase::TimedOut, ctx))),
            },
            StreamPhase::TimedOut => {
                let envelope = timeout_envelope(ctx.sim_file.clone(), ctx.sim_type);
                Some((Ok(envelope_line(&envelope)), (StreamPhase::Finished, ctx)))
            }
            StreamPhase::Finished => {
                // Only remove the table entry if it still points at *this*
                // stream's queue: a second POST for the same `client_id`
                // may have replaced it (spec §4.5 step 1, "replacing any
                // prior entry") while this stream's terminal fragment was
                // still in flight, and that newer entry must not be
                // deleted out from under the newer stream.
                let mut clients = ctx.state.clients.lock().await;
                if clients.get(&ctx.client_id).map(|q| Arc::ptr_eq(q, &ctx.queue)).unwrap_or(false) {
                    clients.remove(&ctx.client_id);
                }
                None
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use simbridge_types::SimulationType;

    fn sample_envelope(status: ResponseStatus) -> ResponseEnvelope {
        ResponseEnvelope {
            simulation: SimulationInfo { name: "walk.m".into(), kind: SimulationType::Streaming, outputs: None },
            request_id: "r1".into(),
            bridge_meta: Default::default(),
            status,
            timestamp: chrono::Utc::now(),
            data: None,
            progress: None,
            error: None,
            sequence: Some(0),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn queue_delivers_in_fifo_order() {
        let queue = FragmentQueue::new();
        queue.offer(sample_envelope(ResponseStatus::Streaming)).await;
        let mut second = sample_envelope(ResponseStatus::Completed);
        second.sequence = Some(1);
        queue.offer(second).await;

        let first_out = queue.next().await.unwrap();
        assert_eq!(first_out.sequence, Some(0));
        let second_out = queue.next().await.unwrap();
        assert_eq!(second_out.sequence, Some(1));
    }

    #[tokio::test]
    async fn queue_drops_oldest_on_overflow() {
        let queue = FragmentQueue::new();
        for i in 0..(FRAGMENT_QUEUE_CAPACITY + 5) {
            let mut env = sample_envelope(ResponseStatus::Streaming);
            env.sequence = Some(i as u64);
            queue.offer(env).await;
        }
        assert_eq!(queue.dropped.load(Ordering::Relaxed), 5);
        let first = queue.next().await.unwrap();
        assert_eq!(first.sequence, Some(5));
    }

    #[tokio::test]
    async fn deliver_reports_absent_client() {
        let (tx, _rx) = tokio::sync::mpsc::channel(4);
        let state = Arc::new(AdapterState { clients: Mutex::new(HashMap::new()), signal_tx: tx });
        let adapter = HttpStreamingAdapter {
            config: HttpStreamingConfig {
                host: "127.0.0.1".into(),
                port: 0,
                input_endpoint: "/message".into(),
                certfile: None,
                keyfile: None,
            },
            state,
            shutdown: Arc::new(Notify::new()),
            tls_handle: axum_server::Handle::new(),
        };
        let accepted = adapter.deliver("nobody", &sample_envelope(ResponseStatus::Completed)).await.unwrap();
        assert!(!accepted);
    }
}

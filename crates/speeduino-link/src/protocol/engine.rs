//! Half-duplex engine
//!
//! Serializes requests over a shared byte stream. The engine runs as a tokio
//! task that owns the stream; handles submit requests through a bounded FIFO
//! queue and wait on a oneshot reply. At most one request is on the wire at a
//! time, and a request is not written until the previous one has resolved.
//!
//! Bytes that arrive while no request is in flight, and bytes past the end of
//! a fixed-length response, are published as [`LinkEvent::Unexpected`] and
//! never included in a response.
//!
//! A stream failure rejects the request in flight, publishes
//! [`LinkEvent::TransportError`] and closes the engine. Once closed, every
//! queued and future request fails with [`ProtocolError::NotConnected`]
//! without touching the stream.

use serde::{Deserialize, Serialize};
use std::io;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{Evaluation, ProtocolError, ResponseSpec};
use crate::config::LinkConfig;

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    /// No request in flight
    Idle,
    /// One request written, response not yet complete
    Awaiting,
    /// Stream closed; all requests fail
    Closed,
}

/// Out-of-band notifications from the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Bytes that could not be attributed to a pending request
    Unexpected(Vec<u8>),
    /// The stream failed and the link was closed
    TransportError(String),
}

/// Snapshot of the traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Command bytes written to the stream
    pub tx_bytes: u64,
    /// Bytes read from the stream, attributed or not
    pub rx_bytes: u64,
    /// Requests resolved with a response
    pub requests_completed: u64,
    /// Requests resolved with an error
    pub requests_failed: u64,
    /// Bytes reported as [`LinkEvent::Unexpected`]
    pub unexpected_bytes: u64,
}

#[derive(Debug, Default)]
struct LinkStats {
    tx_bytes: AtomicU64,
    rx_bytes: AtomicU64,
    requests_completed: AtomicU64,
    requests_failed: AtomicU64,
    unexpected_bytes: AtomicU64,
}

impl LinkStats {
    fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            requests_completed: self.requests_completed.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            unexpected_bytes: self.unexpected_bytes.load(Ordering::Relaxed),
        }
    }
}

type Reply = oneshot::Sender<Result<Vec<u8>, ProtocolError>>;

/// A request waiting in the queue or on the wire
struct PendingRequest {
    command: Vec<u8>,
    spec: ResponseSpec,
    reply: Reply,
}

/// Handle to a running half-duplex engine
///
/// Cheap to clone; all clones feed the same queue.
#[derive(Clone)]
pub struct HalfDuplex {
    requests: mpsc::Sender<PendingRequest>,
    events: broadcast::Sender<LinkEvent>,
    state: watch::Receiver<LinkState>,
    shutdown: CancellationToken,
    stats: Arc<LinkStats>,
}

impl HalfDuplex {
    /// Start an engine that takes ownership of `stream`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<S>(stream: S, config: &LinkConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (requests_tx, requests_rx) = mpsc::channel(config.queue_depth.max(1));
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(LinkState::Idle);
        let shutdown = CancellationToken::new();
        let stats = Arc::new(LinkStats::default());

        let engine = Engine {
            stream,
            requests: requests_rx,
            events: events.clone(),
            state: state_tx,
            shutdown: shutdown.clone(),
            stats: stats.clone(),
            response_timeout: config.response_timeout(),
            buf: vec![0u8; config.read_buffer_size.max(1)],
        };
        tokio::spawn(engine.run());

        Self {
            requests: requests_tx,
            events,
            state: state_rx,
            shutdown,
            stats,
        }
    }

    /// Write `command` and wait for the response described by `spec`.
    ///
    /// Requests from concurrent callers are served in submission order.
    pub async fn write(
        &self,
        command: impl Into<Vec<u8>>,
        spec: ResponseSpec,
    ) -> Result<Vec<u8>, ProtocolError> {
        if self.shutdown.is_cancelled() {
            return Err(ProtocolError::NotConnected);
        }

        let (reply, response) = oneshot::channel();
        let request = PendingRequest {
            command: command.into(),
            spec,
            reply,
        };
        self.requests
            .send(request)
            .await
            .map_err(|_| ProtocolError::NotConnected)?;

        response.await.map_err(|_| ProtocolError::NotConnected)?
    }

    /// Subscribe to unexpected-data and transport-error notifications
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    /// Close the link. The request in flight and all queued requests fail.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Wait until the engine has shut the stream down
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == LinkState::Closed).await;
    }

    /// Current engine state
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// True once the link has been closed, by request or by a stream failure
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Traffic counters
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

/// What woke the engine while idle
enum IdleWake {
    Shutdown,
    Read(io::Result<usize>),
    Request(Option<PendingRequest>),
}

/// What woke the engine while awaiting a response
enum AwaitWake {
    Shutdown,
    Read(io::Result<usize>),
    Deadline,
}

struct Engine<S> {
    stream: S,
    requests: mpsc::Receiver<PendingRequest>,
    events: broadcast::Sender<LinkEvent>,
    state: watch::Sender<LinkState>,
    shutdown: CancellationToken,
    stats: Arc<LinkStats>,
    response_timeout: Option<Duration>,
    buf: Vec<u8>,
}

impl<S> Engine<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    async fn run(mut self) {
        loop {
            // Reads take priority over new requests so that bytes already
            // waiting on the stream are reported, not handed to the next request.
            let wake = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => IdleWake::Shutdown,
                read = self.stream.read(&mut self.buf) => IdleWake::Read(read),
                request = self.requests.recv() => IdleWake::Request(request),
            };

            match wake {
                IdleWake::Shutdown | IdleWake::Request(None) => break,
                IdleWake::Read(Ok(0)) => {
                    self.fail_transport("stream closed by peer".to_string());
                    break;
                }
                IdleWake::Read(Ok(n)) => {
                    LinkStats::add(&self.stats.rx_bytes, n);
                    let stray = self.buf[..n].to_vec();
                    self.report_unexpected(stray);
                }
                IdleWake::Read(Err(e)) => {
                    self.fail_transport(e.to_string());
                    break;
                }
                IdleWake::Request(Some(request)) => {
                    if self.exchange(request).await.is_break() {
                        break;
                    }
                }
            }
        }

        self.close().await;
    }

    /// Run one request to resolution. `Break` means the link is unusable.
    async fn exchange(&mut self, request: PendingRequest) -> ControlFlow<()> {
        let PendingRequest {
            command,
            spec,
            reply,
        } = request;

        self.state.send_replace(LinkState::Awaiting);
        debug!(
            "exchange: sending {} bytes: {:02x?}, expecting {:?}",
            command.len(),
            command,
            spec
        );

        let started = Instant::now();
        if let Err(e) = self.write_command(&command).await {
            let cause = e.to_string();
            self.fail_transport(cause.clone());
            self.resolve(reply, Err(ProtocolError::TransportError(cause)));
            return ControlFlow::Break(());
        }

        // A capture window is fixed at write time. The fixed-length guard is an
        // idle timeout and moves forward whenever bytes arrive.
        let window = spec.window();
        let mut deadline = window.or(self.response_timeout).map(|t| started + t);

        let mut received = Vec::new();
        loop {
            if let Evaluation::Complete { response, surplus } =
                spec.evaluate(&received, started.elapsed())
            {
                if !surplus.is_empty() {
                    self.report_unexpected(surplus.to_vec());
                }
                debug!(
                    "exchange: complete with {} bytes in {}ms",
                    response.len(),
                    started.elapsed().as_millis()
                );
                self.resolve(reply, Ok(response.to_vec()));
                self.state.send_replace(LinkState::Idle);
                return ControlFlow::Continue(());
            }

            let wake = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => AwaitWake::Shutdown,
                read = self.stream.read(&mut self.buf) => AwaitWake::Read(read),
                _ = expire(deadline) => AwaitWake::Deadline,
            };

            match wake {
                AwaitWake::Shutdown => {
                    debug!("exchange: link closed with request in flight");
                    self.resolve(reply, Err(ProtocolError::NotConnected));
                    return ControlFlow::Break(());
                }
                AwaitWake::Read(Ok(0)) => {
                    let cause = "stream closed by peer".to_string();
                    self.fail_transport(cause.clone());
                    self.resolve(reply, Err(ProtocolError::TransportError(cause)));
                    return ControlFlow::Break(());
                }
                AwaitWake::Read(Ok(n)) => {
                    LinkStats::add(&self.stats.rx_bytes, n);
                    received.extend_from_slice(&self.buf[..n]);
                    if window.is_none() {
                        deadline = self.response_timeout.map(|t| Instant::now() + t);
                    }
                }
                AwaitWake::Read(Err(e)) => {
                    let cause = e.to_string();
                    self.fail_transport(cause.clone());
                    self.resolve(reply, Err(ProtocolError::TransportError(cause)));
                    return ControlFlow::Break(());
                }
                AwaitWake::Deadline => match spec.expected_len() {
                    None => {
                        debug!(
                            "exchange: window closed with {} bytes: {:?}",
                            received.len(),
                            String::from_utf8_lossy(&received)
                        );
                        self.resolve(reply, Ok(received));
                        self.state.send_replace(LinkState::Idle);
                        return ControlFlow::Continue(());
                    }
                    Some(expected) => {
                        warn!(
                            "exchange: no data for {:?} with {} of {} bytes",
                            self.response_timeout,
                            received.len(),
                            expected
                        );
                        self.resolve(
                            reply,
                            Err(ProtocolError::Timeout {
                                expected,
                                received: received.len(),
                            }),
                        );
                        self.state.send_replace(LinkState::Idle);
                        return ControlFlow::Continue(());
                    }
                },
            }
        }
    }

    async fn write_command(&mut self, command: &[u8]) -> io::Result<()> {
        self.stream.write_all(command).await?;
        self.stream.flush().await?;
        LinkStats::add(&self.stats.tx_bytes, command.len());
        Ok(())
    }

    fn resolve(&self, reply: Reply, result: Result<Vec<u8>, ProtocolError>) {
        let counter = match result {
            Ok(_) => &self.stats.requests_completed,
            Err(_) => &self.stats.requests_failed,
        };
        LinkStats::add(counter, 1);

        if reply.send(result).is_err() {
            debug!("resolve: caller went away before the response");
        }
    }

    fn report_unexpected(&self, bytes: Vec<u8>) {
        warn!("unexpected {} bytes: {:02x?}", bytes.len(), bytes);
        LinkStats::add(&self.stats.unexpected_bytes, bytes.len());
        // No subscribers is not an error
        let _ = self.events.send(LinkEvent::Unexpected(bytes));
    }

    /// Mark the link dead before anything else observes the failure
    fn fail_transport(&self, cause: String) {
        error!("transport error: {}", cause);
        self.shutdown.cancel();
        let _ = self.events.send(LinkEvent::TransportError(cause));
    }

    async fn close(mut self) {
        self.shutdown.cancel();

        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            self.resolve(request.reply, Err(ProtocolError::NotConnected));
        }

        if let Err(e) = self.stream.shutdown().await {
            debug!("close: stream shutdown failed: {}", e);
        }
        self.state.send_replace(LinkState::Closed);
        debug!("close: engine stopped");
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

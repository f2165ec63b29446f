//! # Transaction Engine
//!
//! Turns a [`Request`] into a [`Response`] over a [`Transport`]: encode, write,
//! read until a complete frame arrives, correlate, and retry on silence or
//! line noise.
//!
//! RS485 is half-duplex with a single master, so at most one transaction may
//! be on the wire at a time. [`spawn`] moves an engine (and the transport it
//! owns) into a worker task fed by a FIFO queue; every caller goes through a
//! cloneable [`EngineHandle`].
//!
//! ```text
//! EngineHandle ──┐
//! EngineHandle ──┼─► mpsc (FIFO) ─► worker ─► TransactionEngine ─► Transport
//! EngineHandle ──┘        ▲                         │
//!                         └──── oneshot reply ◄─────┘
//! ```

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::codec::{self, Direction};
use crate::constants::{DEFAULT_MAX_RETRIES, DEFAULT_QUEUE_DEPTH, DEFAULT_TIMEOUT_MS};
use crate::error::{DriveError, FrameError, TransactionError, TransportError};
use crate::logging::{CallbackLogger, PacketDirection};
use crate::protocol::{Request, Response, StationAddress};
use crate::transport::{Transport, TransportStats};

// ============================================================================
// Retry policy
// ============================================================================

/// Per-transaction timeout and retry budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Read deadline of each attempt (milliseconds)
    pub timeout_ms: u64,
    /// Resends after the first attempt
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    pub fn new(timeout: Duration, max_retries: u32) -> Self {
        Self {
            timeout_ms: timeout.as_millis() as u64,
            max_retries,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Total number of attempts, first send included
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn validate(&self) -> Result<(), DriveError> {
        if self.timeout_ms == 0 {
            return Err(DriveError::configuration("retry timeout must be positive"));
        }
        Ok(())
    }
}

// ============================================================================
// Transaction engine
// ============================================================================

/// What one read phase produced
enum Received {
    /// A structurally complete frame
    Frame(Bytes),
    /// Deadline passed with an incomplete frame buffered
    Partial { expected: usize, actual: usize },
    /// Deadline passed without a single byte
    Silence,
}

/// Request/response exchange with one drive over an owned transport
pub struct TransactionEngine<T> {
    transport: T,
    station: StationAddress,
    logger: CallbackLogger,
    rx: BytesMut,
}

impl<T: Transport> TransactionEngine<T> {
    /// Create an engine talking to `station`
    pub fn new(transport: T, station: StationAddress) -> Self {
        Self::with_logger(transport, station, CallbackLogger::default())
    }

    /// Create an engine with a custom frame logger
    pub fn with_logger(transport: T, station: StationAddress, logger: CallbackLogger) -> Self {
        Self {
            transport,
            station,
            logger,
            rx: BytesMut::with_capacity(crate::constants::MAX_RTU_FRAME_SIZE),
        }
    }

    /// Get a reference to the underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Get a mutable reference to the underlying transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn station(&self) -> StationAddress {
        self.station
    }

    /// Run one transaction: at most `max_retries + 1` attempts, no backoff.
    ///
    /// An exception frame from the addressed station answering this request's
    /// function ends the transaction immediately with `DeviceException`.
    /// Silence and malformed or uncorrelated frames are retried; when the
    /// attempts run out the last attempt decides between `NoResponse` and
    /// `InvalidFrame`. Transport failures other than a read timeout abort.
    pub async fn execute(
        &mut self,
        request: &Request,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Response, TransactionError> {
        request.validate()?;
        let frame = request
            .encode(self.station)
            .map_err(|e| TransactionError::invalid_request(e.to_string()))?;

        self.logger.log_request(self.station, request);

        let attempts = max_retries.saturating_add(1);
        let expected_len = request.expected_response_len();
        let mut attempt = 1;

        loop {
            self.rx.clear();
            self.transport.discard_input().await?;
            self.transport.write_bytes(&frame).await?;
            self.logger.log_frame(PacketDirection::Sent, &frame);

            let deadline = Instant::now() + timeout;
            let error = match self.attempt(request, attempt, expected_len, deadline).await {
                Ok(response) => {
                    self.logger.log_response(&response);
                    return Ok(response);
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                return Err(error);
            }
            if attempt >= attempts {
                warn!("station {}: {} failed: {}", self.station, request, error);
                return Err(error);
            }
            debug!(
                "station {}: retry {}/{} of {} ({})",
                self.station, attempt, max_retries, request, error
            );
            attempt += 1;
        }
    }

    /// One send's worth of reading, decoding and correlating
    async fn attempt(
        &mut self,
        request: &Request,
        attempt: u32,
        expected_len: usize,
        deadline: Instant,
    ) -> Result<Response, TransactionError> {
        let invalid = |source: FrameError| TransactionError::InvalidFrame {
            attempts: attempt,
            source,
        };

        let bytes = match self.receive(expected_len, deadline).await? {
            Received::Frame(bytes) => bytes,
            Received::Partial { expected, actual } => {
                return Err(invalid(FrameError::Truncated { expected, actual }));
            }
            Received::Silence => return Err(TransactionError::NoResponse { attempts: attempt }),
        };
        self.logger.log_frame(PacketDirection::Received, &bytes);

        let decoded = codec::decode(&bytes).map_err(invalid)?;

        if let Some(code) = decoded.exception_code() {
            if decoded.station == self.station && decoded.function == request.function() {
                debug!(
                    "station {}: {} answered with exception {}",
                    self.station, request, code
                );
                return Err(TransactionError::DeviceException(code));
            }
            return Err(invalid(FrameError::unexpected(format!(
                "exception {} from station {} for fc {}",
                code, decoded.station, decoded.function
            ))));
        }

        Response::from_frame(&decoded, request, self.station).map_err(invalid)
    }

    /// Read until one complete frame is buffered or `deadline` passes
    async fn receive(
        &mut self,
        expected_len: usize,
        deadline: Instant,
    ) -> Result<Received, TransportError> {
        self.rx.reserve(expected_len);
        loop {
            if let Some(len) = codec::expected_frame_len(Direction::Response, &self.rx) {
                if self.rx.len() >= len {
                    return Ok(Received::Frame(self.rx.split_to(len).freeze()));
                }
            }

            match self.transport.read_bytes(&mut self.rx, deadline).await {
                Ok(_) => {}
                Err(TransportError::Timeout { .. }) if self.rx.is_empty() => {
                    return Ok(Received::Silence);
                }
                Err(TransportError::Timeout { buffered }) => {
                    let expected = codec::expected_frame_len(Direction::Response, &self.rx)
                        .unwrap_or(expected_len);
                    return Ok(Received::Partial {
                        expected,
                        actual: buffered,
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Close the transport and report its final statistics
    pub async fn close(&mut self) -> TransportStats {
        if let Err(e) = self.transport.close().await {
            warn!("{}: close failed: {}", self.transport.name(), e);
        }
        self.transport.stats()
    }
}

// ============================================================================
// FIFO worker
// ============================================================================

type Reply = oneshot::Sender<Result<Response, TransactionError>>;

struct Job {
    request: Request,
    policy: RetryPolicy,
    reply: Reply,
}

/// Cloneable submission handle to an engine worker
#[derive(Clone)]
pub struct EngineHandle {
    jobs: mpsc::Sender<Job>,
    station: StationAddress,
}

impl EngineHandle {
    /// Queue a request and wait for its outcome.
    ///
    /// Requests run one at a time in submission order. Once the worker has
    /// stopped every call returns `EngineStopped`.
    pub async fn execute(
        &self,
        request: Request,
        policy: RetryPolicy,
    ) -> Result<Response, TransactionError> {
        let (reply, outcome) = oneshot::channel();
        self.jobs
            .send(Job {
                request,
                policy,
                reply,
            })
            .await
            .map_err(|_| TransactionError::EngineStopped)?;
        outcome.await.map_err(|_| TransactionError::EngineStopped)?
    }

    /// Station the worker addresses
    pub fn station(&self) -> StationAddress {
        self.station
    }

    /// Check if the worker has stopped accepting jobs
    pub fn is_closed(&self) -> bool {
        self.jobs.is_closed()
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("station", &self.station)
            .field("closed", &self.jobs.is_closed())
            .finish()
    }
}

/// Owner side of an engine worker
pub struct EngineTask {
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<TransportStats>,
}

impl EngineTask {
    /// Stop the worker.
    ///
    /// The in-flight transaction completes, queued jobs are answered with
    /// `EngineStopped`, and the transport is closed. Returns the final
    /// transport statistics, or `None` if the worker panicked.
    pub async fn shutdown(mut self) -> Option<TransportStats> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        match self.join.await {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!("engine worker failed: {}", e);
                None
            }
        }
    }

    /// Check if the worker has exited
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Move `engine` into a worker task serving a queue of `queue_depth` jobs.
///
/// Must be called from within a tokio runtime.
pub fn spawn<T>(engine: TransactionEngine<T>, queue_depth: usize) -> (EngineHandle, EngineTask)
where
    T: Transport + 'static,
{
    let depth = if queue_depth == 0 {
        DEFAULT_QUEUE_DEPTH
    } else {
        queue_depth
    };
    let (jobs_tx, jobs_rx) = mpsc::channel(depth);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let station = engine.station();

    let join = tokio::spawn(run_worker(engine, jobs_rx, shutdown_rx));

    (
        EngineHandle {
            jobs: jobs_tx,
            station,
        },
        EngineTask {
            shutdown: Some(shutdown_tx),
            join,
        },
    )
}

async fn run_worker<T: Transport>(
    mut engine: TransactionEngine<T>,
    mut jobs: mpsc::Receiver<Job>,
    mut shutdown: oneshot::Receiver<()>,
) -> TransportStats {
    debug!(
        "engine worker started on {} (station {})",
        engine.transport().name(),
        engine.station()
    );

    loop {
        tokio::select! {
            biased;
            // A dropped sender counts as shutdown
            _ = &mut shutdown => break,
            job = jobs.recv() => match job {
                Some(job) => {
                    let result = engine
                        .execute(&job.request, job.policy.timeout(), job.policy.max_retries)
                        .await;
                    // The caller may have stopped waiting
                    let _ = job.reply.send(result);
                }
                None => break,
            },
        }
    }

    jobs.close();
    let mut cancelled = 0;
    while let Some(job) = jobs.recv().await {
        let _ = job.reply.send(Err(TransactionError::EngineStopped));
        cancelled += 1;
    }

    let stats = engine.close().await;
    debug!(
        "engine worker stopped: {} queued jobs cancelled, {} frames sent",
        cancelled, stats.frames_sent
    );
    stats
}

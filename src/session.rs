//! # Drive Session
//!
//! Connection and fault state machine for one drive, bound to one
//! [`ModelProfile`] for its whole lifetime.
//!
//! ```text
//!                connect            first poll ok
//! Disconnected ──────────► Connecting ──────────► Connected
//!      ▲                       │                   │     ▲
//!      │   open/first poll     │      threshold    │     │ poll ok
//!      └───────────────────────┘      failures     ▼     │
//!      ▲                                          Faulted
//!      └──────────────── disconnect (any state) ──────┘
//! ```
//!
//! Every transaction goes through the engine worker's FIFO queue, so polls
//! from [`DriveSession::run`] and one-shot writes from a [`DriveControl`]
//! never share the wire. Observers read state, snapshot and events from
//! `watch`/`broadcast` channels and never touch session fields.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::catalog::{fault_description, names, ModelProfile, ReadBlock, StatusWord};
use crate::constants::{
    DEFAULT_FAULT_THRESHOLD, DEFAULT_POLL_INTERVAL_MS, DEFAULT_QUEUE_DEPTH, DEFAULT_STATION,
};
use crate::device_limits::DeviceLimits;
use crate::engine::{self, EngineHandle, EngineTask, RetryPolicy, TransactionEngine};
use crate::error::{DriveError, DriveResult, FailureKind, FrameError, TransportError};
use crate::logging::CallbackLogger;
use crate::protocol::{is_unicast_station, Request, StationAddress};
use crate::transport::Transport;

const EVENT_CAPACITY: usize = 64;

// ============================================================================
// State, configuration, snapshot, events
// ============================================================================

/// Aggregate link state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// Link open but too many consecutive poll failures
    Faulted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Faulted => "faulted",
        })
    }
}

/// Session parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Drive station address (1-247)
    pub station: StationAddress,
    pub retry: RetryPolicy,
    /// Time between poll ticks (milliseconds)
    pub poll_interval_ms: u64,
    /// Consecutive poll failures that fault the session
    pub fault_threshold: u32,
    pub limits: DeviceLimits,
    /// Pending transactions the engine queue holds
    pub queue_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            station: DEFAULT_STATION,
            retry: RetryPolicy::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            fault_threshold: DEFAULT_FAULT_THRESHOLD,
            limits: DeviceLimits::default(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

impl SessionConfig {
    pub fn new(station: StationAddress) -> Self {
        Self {
            station,
            ..Self::default()
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_fault_threshold(mut self, threshold: u32) -> Self {
        self.fault_threshold = threshold;
        self
    }

    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), DriveError> {
        if !is_unicast_station(self.station) {
            return Err(DriveError::configuration(format!(
                "station {} outside 1..=247",
                self.station
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(DriveError::configuration("poll interval must be positive"));
        }
        if self.fault_threshold == 0 {
            return Err(DriveError::configuration("fault threshold must be at least 1"));
        }
        if self.queue_depth == 0 {
            return Err(DriveError::configuration("queue depth must be at least 1"));
        }
        self.retry.validate()?;
        self.limits.validate()
    }
}

/// One converted register value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterValue {
    pub address: u16,
    pub raw: u16,
    /// Engineering value
    pub value: f64,
    pub unit: String,
}

/// Consistent view of every polled parameter from one poll tick
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParameterSnapshot {
    /// When the poll completed; `None` before the first poll
    pub timestamp: Option<DateTime<Utc>>,
    /// Incremented on every published snapshot
    pub sequence: u64,
    pub values: BTreeMap<String, ParameterValue>,
}

impl ParameterSnapshot {
    /// Engineering value of a parameter
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).map(|v| v.value)
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterValue> {
        self.values.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Decoded status word
    pub fn status(&self) -> Option<StatusWord> {
        self.values
            .get(names::STATUS_WORD)
            .map(|v| StatusWord(v.raw))
    }

    /// Active drive fault code and description, `None` when healthy
    pub fn drive_fault(&self) -> Option<(u16, &'static str)> {
        let code = self.values.get(names::FAULT_CODE)?.raw;
        (code != 0).then(|| (code, fault_description(code)))
    }
}

/// Notifications for UI collaborators
#[derive(Debug, Clone, PartialEq)]
pub enum DriveEvent {
    Connected {
        profile: String,
        station: StationAddress,
    },
    Disconnected {
        reason: String,
    },
    TransactionFailed {
        kind: FailureKind,
        address: u16,
        message: String,
    },
    FaultEntered {
        consecutive_failures: u32,
        reason: String,
    },
    FaultCleared,
}

impl fmt::Display for DriveEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected { profile, station } => {
                write!(f, "connected to {} at station {}", profile, station)
            }
            Self::Disconnected { reason } => write!(f, "disconnected: {}", reason),
            Self::TransactionFailed {
                address, message, ..
            } => write!(f, "transaction at 0x{:04X} failed: {}", address, message),
            Self::FaultEntered {
                consecutive_failures,
                reason,
            } => write!(
                f,
                "faulted after {} consecutive failures: {}",
                consecutive_failures, reason
            ),
            Self::FaultCleared => f.write_str("fault cleared"),
        }
    }
}

/// Motor rotation direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    Forward,
    Reverse,
}

// ============================================================================
// DriveControl
// ============================================================================

/// Cloneable handle for one-shot reads and writes.
///
/// Shares the session's engine queue, so its transactions interleave with
/// polls in FIFO order. Catalog checks run before anything is queued.
#[derive(Clone)]
pub struct DriveControl {
    engine: EngineHandle,
    profile: Arc<ModelProfile>,
    retry: RetryPolicy,
    events: broadcast::Sender<DriveEvent>,
}

impl DriveControl {
    /// Read one named parameter in engineering units
    pub async fn read_parameter(&self, name: &str) -> DriveResult<f64> {
        let descriptor = self.profile.find(name)?;
        let values = self.read_registers(descriptor.address, 1).await?;
        let raw = values
            .first()
            .copied()
            .ok_or_else(|| FrameError::unexpected("empty read response"))?;
        Ok(descriptor.to_engineering(raw))
    }

    /// Read raw registers, bypassing the catalog
    pub async fn read_registers(&self, address: u16, quantity: u16) -> DriveResult<Vec<u16>> {
        let response = self.transact(Request::read(address, quantity)).await?;
        response
            .into_registers()
            .ok_or_else(|| FrameError::unexpected("read answered with a write confirmation").into())
    }

    /// Write a named parameter, returning the raw word sent
    pub async fn write_parameter(&self, name: &str, value: f64) -> DriveResult<u16> {
        let descriptor = self.profile.find(name)?;
        let raw = descriptor.to_raw(value)?;
        self.transact(Request::write(descriptor.address, raw)).await?;
        Ok(raw)
    }

    /// Write the register at `address` in engineering units
    pub async fn write_register(&self, address: u16, value: f64) -> DriveResult<u16> {
        let descriptor = self.profile.lookup(address)?;
        let raw = descriptor.to_raw(value)?;
        self.transact(Request::write(address, raw)).await?;
        Ok(raw)
    }

    pub async fn set_frequency(&self, hz: f64) -> DriveResult<u16> {
        self.write_parameter(names::FREQUENCY_SETPOINT, hz).await
    }

    pub async fn start(&self) -> DriveResult<()> {
        self.write_parameter(names::RUN_COMMAND, 1.0).await.map(|_| ())
    }

    pub async fn stop(&self) -> DriveResult<()> {
        self.write_parameter(names::RUN_COMMAND, 0.0).await.map(|_| ())
    }

    pub async fn set_direction(&self, rotation: Rotation) -> DriveResult<()> {
        let value = match rotation {
            Rotation::Forward => 0.0,
            Rotation::Reverse => 1.0,
        };
        self.write_parameter(names::DIRECTION, value).await.map(|_| ())
    }

    /// Clear a latched drive trip
    pub async fn reset_fault(&self) -> DriveResult<()> {
        self.write_parameter(names::FAULT_RESET, 1.0).await.map(|_| ())
    }

    pub fn profile(&self) -> &Arc<ModelProfile> {
        &self.profile
    }

    async fn transact(&self, request: Request) -> DriveResult<crate::protocol::Response> {
        self.engine
            .execute(request, self.retry)
            .await
            .map_err(|err| {
                emit(
                    &self.events,
                    DriveEvent::TransactionFailed {
                        kind: err.kind(),
                        address: request.address(),
                        message: err.to_string(),
                    },
                );
                err.into()
            })
    }
}

impl fmt::Debug for DriveControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriveControl")
            .field("profile", &self.profile.name())
            .field("engine", &self.engine)
            .finish()
    }
}

fn emit(events: &broadcast::Sender<DriveEvent>, event: DriveEvent) {
    match &event {
        DriveEvent::TransactionFailed { .. } | DriveEvent::FaultEntered { .. } => {
            warn!("{}", event)
        }
        _ => info!("{}", event),
    }
    // No subscribers is fine
    let _ = events.send(event);
}

// ============================================================================
// DriveSession
// ============================================================================

struct Link {
    control: DriveControl,
    task: EngineTask,
}

/// Connection, polling and fault tracking for one drive
pub struct DriveSession {
    profile: Arc<ModelProfile>,
    config: SessionConfig,
    plan: Vec<ReadBlock>,
    logger: CallbackLogger,
    state: watch::Sender<SessionState>,
    snapshot: watch::Sender<Arc<ParameterSnapshot>>,
    events: broadcast::Sender<DriveEvent>,
    link: Option<Link>,
    consecutive_failures: u32,
    last_error: Option<String>,
    sequence: u64,
}

impl DriveSession {
    /// Create a disconnected session bound to `profile`
    pub fn new(profile: Arc<ModelProfile>, config: SessionConfig) -> DriveResult<Self> {
        config.validate()?;
        let plan = profile.plan_poll(&config.limits);
        debug!(
            "{}: poll plan {:?}",
            profile.name(),
            plan.iter()
                .map(|b| format!("0x{:04X}+{}", b.start, b.count))
                .collect::<Vec<_>>()
        );

        let (state, _) = watch::channel(SessionState::Disconnected);
        let (snapshot, _) = watch::channel(Arc::new(ParameterSnapshot::default()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            profile,
            config,
            plan,
            logger: CallbackLogger::default(),
            state,
            snapshot,
            events,
            link: None,
            consecutive_failures: 0,
            last_error: None,
            sequence: 0,
        })
    }

    /// Use a custom frame logger for future connections
    pub fn with_logger(mut self, logger: CallbackLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn profile(&self) -> &Arc<ModelProfile> {
        &self.profile
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------------

    /// Connect over an already open transport
    pub async fn connect<T>(&mut self, transport: T) -> DriveResult<()>
    where
        T: Transport + 'static,
    {
        self.connect_with(|| async move { Ok::<T, TransportError>(transport) })
            .await
    }

    /// Open a transport with `opener` and connect over it.
    ///
    /// The session is Connected once the first poll succeeds. On open or
    /// first-poll failure it returns to Disconnected with the transport closed.
    pub async fn connect_with<T, F, Fut>(&mut self, opener: F) -> DriveResult<()>
    where
        T: Transport + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let current = self.state();
        if current != SessionState::Disconnected {
            return Err(DriveError::invalid_state(format!(
                "connect while {}",
                current
            )));
        }
        self.set_state(SessionState::Connecting);

        let transport = match opener().await {
            Ok(transport) => transport,
            Err(err) => {
                let err = DriveError::from(err);
                self.abort_connect(&err).await;
                return Err(err);
            }
        };
        info!(
            "{}: connecting over {} (station {})",
            self.profile.name(),
            transport.name(),
            self.config.station
        );

        let engine =
            TransactionEngine::with_logger(transport, self.config.station, self.logger.clone());
        let (handle, task) = engine::spawn(engine, self.config.queue_depth);
        self.link = Some(Link {
            control: DriveControl {
                engine: handle,
                profile: self.profile.clone(),
                retry: self.config.retry,
                events: self.events.clone(),
            },
            task,
        });

        match self.poll_blocks().await {
            Ok(values) => {
                self.publish(values);
                self.consecutive_failures = 0;
                self.last_error = None;
                self.set_state(SessionState::Connected);
                emit(
                    &self.events,
                    DriveEvent::Connected {
                        profile: self.profile.name().to_string(),
                        station: self.config.station,
                    },
                );
                Ok(())
            }
            Err(err) => {
                self.abort_connect(&err).await;
                Err(err)
            }
        }
    }

    /// Open a serial port and connect over it
    #[cfg(feature = "rtu")]
    pub async fn connect_serial(
        &mut self,
        link: &crate::transport::LinkConfig,
    ) -> DriveResult<()> {
        self.connect_with(|| async { crate::transport::RtuTransport::open(link) })
            .await
    }

    async fn abort_connect(&mut self, err: &DriveError) {
        warn!("{}: connect failed: {}", self.profile.name(), err);
        self.last_error = Some(err.to_string());
        self.shutdown_link().await;
        self.set_state(SessionState::Disconnected);
        emit(
            &self.events,
            DriveEvent::Disconnected {
                reason: err.to_string(),
            },
        );
    }

    /// Close the link from any state. Disconnecting twice is a no-op.
    pub async fn disconnect(&mut self) {
        self.shutdown_link().await;
        self.consecutive_failures = 0;
        if self.state() != SessionState::Disconnected {
            self.set_state(SessionState::Disconnected);
            emit(
                &self.events,
                DriveEvent::Disconnected {
                    reason: "disconnect requested".to_string(),
                },
            );
        }
    }

    async fn shutdown_link(&mut self) {
        if let Some(link) = self.link.take() {
            if let Some(stats) = link.task.shutdown().await {
                debug!(
                    "{}: link closed ({} frames, {} bytes sent, {} bytes received, {} timeouts)",
                    self.profile.name(),
                    stats.frames_sent,
                    stats.bytes_sent,
                    stats.bytes_received,
                    stats.timeouts
                );
            }
        }
    }

    // ------------------------------------------------------------------------
    // Polling
    // ------------------------------------------------------------------------

    /// Run one poll tick.
    ///
    /// Success replaces the snapshot and clears any fault. Failure leaves the
    /// snapshot untouched; link-health failures count toward the fault
    /// threshold.
    pub async fn poll(&mut self) -> DriveResult<()> {
        let current = self.state();
        if !matches!(current, SessionState::Connected | SessionState::Faulted) {
            return Err(DriveError::invalid_state(format!("poll while {}", current)));
        }

        match self.poll_blocks().await {
            Ok(values) => {
                self.publish(values);
                self.consecutive_failures = 0;
                self.last_error = None;
                if current == SessionState::Faulted {
                    self.set_state(SessionState::Connected);
                    emit(&self.events, DriveEvent::FaultCleared);
                }
                Ok(())
            }
            Err(err) => {
                self.last_error = Some(err.to_string());
                if counts_toward_fault(&err) {
                    self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                    if current == SessionState::Connected
                        && self.consecutive_failures >= self.config.fault_threshold
                    {
                        self.set_state(SessionState::Faulted);
                        emit(
                            &self.events,
                            DriveEvent::FaultEntered {
                                consecutive_failures: self.consecutive_failures,
                                reason: err.to_string(),
                            },
                        );
                    }
                }
                Err(err)
            }
        }
    }

    /// Poll every `poll_interval` until `shutdown` resolves or the session
    /// is disconnected. A slow tick delays the next one instead of queueing
    /// missed ticks.
    ///
    /// The loop holds the session exclusively, so [`disconnect`] can only be
    /// called after `shutdown` resolves and `run` returns. Commands issued
    /// while polling go through a [`DriveControl`] taken with [`control`]
    /// beforehand; they share the engine queue with the poll reads.
    ///
    /// [`disconnect`]: Self::disconnect
    /// [`control`]: Self::control
    pub async fn run<F>(&mut self, shutdown: F) -> DriveResult<()>
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if !matches!(self.state(), SessionState::Connected | SessionState::Faulted) {
                        break;
                    }
                    if let Err(e) = self.poll().await {
                        debug!("{}: poll failed: {}", self.profile.name(), e);
                    }
                }
            }
        }
        Ok(())
    }

    /// Issue the planned reads and convert every polled register
    async fn poll_blocks(&self) -> DriveResult<BTreeMap<String, ParameterValue>> {
        let control = self.require_control()?;
        let delay = self.config.limits.inter_request_delay();
        let mut values = BTreeMap::new();

        for (i, block) in self.plan.iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                sleep(delay).await;
            }
            let response = control.transact(block.request()).await?;
            let registers = response
                .into_registers()
                .ok_or_else(|| FrameError::unexpected("read answered with a write confirmation"))?;

            for (offset, raw) in registers.into_iter().enumerate() {
                let address = block.start.wrapping_add(offset as u16);
                let Ok(descriptor) = self.profile.lookup(address) else {
                    continue;
                };
                values.insert(
                    descriptor.name.clone(),
                    ParameterValue {
                        address,
                        raw,
                        value: descriptor.to_engineering(raw),
                        unit: descriptor.unit.clone(),
                    },
                );
            }
        }
        Ok(values)
    }

    fn publish(&mut self, values: BTreeMap<String, ParameterValue>) {
        self.sequence += 1;
        self.snapshot.send_replace(Arc::new(ParameterSnapshot {
            timestamp: Some(Utc::now()),
            sequence: self.sequence,
            values,
        }));
    }

    // ------------------------------------------------------------------------
    // One-shot operations
    // ------------------------------------------------------------------------

    /// Handle for one-shot operations, `None` while disconnected
    pub fn control(&self) -> Option<DriveControl> {
        self.link.as_ref().map(|link| link.control.clone())
    }

    fn require_control(&self) -> DriveResult<DriveControl> {
        self.control()
            .ok_or_else(|| DriveError::invalid_state(format!("no link while {}", self.state())))
    }

    pub async fn read_parameter(&self, name: &str) -> DriveResult<f64> {
        self.require_control()?.read_parameter(name).await
    }

    pub async fn read_registers(&self, address: u16, quantity: u16) -> DriveResult<Vec<u16>> {
        self.require_control()?
            .read_registers(address, quantity)
            .await
    }

    pub async fn write_parameter(&self, name: &str, value: f64) -> DriveResult<u16> {
        self.require_control()?.write_parameter(name, value).await
    }

    pub async fn write_register(&self, address: u16, value: f64) -> DriveResult<u16> {
        self.require_control()?.write_register(address, value).await
    }

    pub async fn set_frequency(&self, hz: f64) -> DriveResult<u16> {
        self.require_control()?.set_frequency(hz).await
    }

    pub async fn start(&self) -> DriveResult<()> {
        self.require_control()?.start().await
    }

    pub async fn stop(&self) -> DriveResult<()> {
        self.require_control()?.stop().await
    }

    pub async fn set_direction(&self, rotation: Rotation) -> DriveResult<()> {
        self.require_control()?.set_direction(rotation).await
    }

    pub async fn reset_fault(&self) -> DriveResult<()> {
        self.require_control()?.reset_fault().await
    }

    // ------------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------------

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Arc<ParameterSnapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<Arc<ParameterSnapshot>> {
        self.snapshot.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<DriveEvent> {
        self.events.subscribe()
    }

    /// Message of the most recent connect or poll failure
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!("{}: {} -> {}", self.profile.name(), previous, next);
        }
    }
}

impl fmt::Debug for DriveSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriveSession")
            .field("profile", &self.profile.name())
            .field("station", &self.config.station)
            .field("state", &self.state())
            .field("consecutive_failures", &self.consecutive_failures)
            .finish()
    }
}

fn counts_toward_fault(err: &DriveError) -> bool {
    match err {
        DriveError::Transaction(err) => err.counts_toward_fault(),
        DriveError::Frame(_) | DriveError::Transport(_) => true,
        DriveError::Catalog(_) | DriveError::InvalidState { .. } | DriveError::Configuration { .. } => {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::error::{CatalogError, TransactionError};
    use crate::simulator::{SimulatedDrive, SimulatorConfig, SimulatorHandle};

    fn fast_config() -> SessionConfig {
        SessionConfig::default().with_retry(RetryPolicy::new(Duration::from_millis(20), 0))
    }

    async fn connected(model: &str) -> (DriveSession, SimulatorHandle) {
        let profile = Catalog::builtin().unwrap().profile(model).unwrap();
        let (transport, sim) =
            SimulatedDrive::new(profile.clone(), SimulatorConfig::default()).spawn();
        let mut session = DriveSession::new(profile, fast_config()).unwrap();
        session.connect(transport).await.unwrap();
        (session, sim)
    }

    #[test]
    fn test_config_validation() {
        assert!(SessionConfig::default().validate().is_ok());
        assert!(SessionConfig::new(0).validate().is_err());
        assert!(SessionConfig::new(248).validate().is_err());
        assert!(SessionConfig::default().with_fault_threshold(0).validate().is_err());
        assert!(SessionConfig::default()
            .with_poll_interval(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_config_json_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{ "station": 5, "retry": { "timeout_ms": 200 } }"#).unwrap();
        assert_eq!(config.station, 5);
        assert_eq!(config.retry.timeout_ms, 200);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.fault_threshold, 3);
    }

    #[test]
    fn test_snapshot_helpers() {
        let mut snapshot = ParameterSnapshot::default();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.drive_fault(), None);

        let value = |address, raw, value| ParameterValue {
            address,
            raw,
            value,
            unit: String::new(),
        };
        snapshot
            .values
            .insert(names::STATUS_WORD.to_string(), value(0, 0x0005, 5.0));
        snapshot
            .values
            .insert(names::FAULT_CODE.to_string(), value(6, 0x01, 1.0));

        let status = snapshot.status().unwrap();
        assert!(status.is_running());
        assert!(status.is_faulted());
        assert_eq!(snapshot.drive_fault(), Some((1, fault_description(1))));
        assert_eq!(snapshot.get(names::FAULT_CODE), Some(1.0));
    }

    #[tokio::test]
    async fn test_connect_publishes_first_snapshot() {
        let (mut session, _sim) = connected("CDE550").await;
        assert_eq!(session.state(), SessionState::Connected);

        let snapshot = session.snapshot();
        assert_eq!(snapshot.sequence, 1);
        assert!(snapshot.timestamp.is_some());
        assert_eq!(snapshot.values.len(), 9);
        assert_eq!(snapshot.get(names::DC_BUS_VOLTAGE), Some(540.0));

        session.disconnect().await;
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_failure_returns_to_disconnected() {
        let profile = Catalog::builtin().unwrap().profile("CDE550").unwrap();
        let (transport, sim) =
            SimulatedDrive::new(profile.clone(), SimulatorConfig::default()).spawn();
        sim.set_silent(true);

        let mut session = DriveSession::new(profile, fast_config()).unwrap();
        let mut events = session.subscribe_events();
        let err = session.connect(transport).await.unwrap_err();

        assert!(matches!(
            err.as_transaction(),
            Some(TransactionError::NoResponse { attempts: 1 })
        ));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.last_error().is_some());
        assert!(session.control().is_none());
        assert!(matches!(
            events.recv().await.unwrap(),
            DriveEvent::TransactionFailed { kind: FailureKind::NoResponse, .. }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            DriveEvent::Disconnected { .. }
        ));
    }

    #[tokio::test]
    async fn test_open_failure() {
        let profile = Catalog::builtin().unwrap().profile("CDE550").unwrap();
        let mut session = DriveSession::new(profile, fast_config()).unwrap();

        let result = session
            .connect_with(|| async {
                Err::<crate::transport::StreamTransport<tokio::io::DuplexStream>, _>(
                    TransportError::open("/dev/ttyUSB9", "no such device"),
                )
            })
            .await;
        assert!(matches!(
            result,
            Err(DriveError::Transport(TransportError::Open { .. }))
        ));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_invalid_state_operations() {
        let profile = Catalog::builtin().unwrap().profile("CDE550").unwrap();
        let mut session = DriveSession::new(profile, fast_config()).unwrap();
        assert!(matches!(
            session.poll().await,
            Err(DriveError::InvalidState { .. })
        ));
        assert!(matches!(
            session.set_frequency(10.0).await,
            Err(DriveError::InvalidState { .. })
        ));

        let (mut session, _sim) = connected("CDE550").await;
        let (transport, _) = SimulatedDrive::new(
            session.profile().clone(),
            SimulatorConfig::default(),
        )
        .spawn();
        assert!(matches!(
            session.connect(transport).await,
            Err(DriveError::InvalidState { .. })
        ));
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_fault_threshold_and_recovery() {
        let (mut session, sim) = connected("CDE550").await;
        let mut events = session.subscribe_events();

        sim.set_silent(true);
        for expected in 1..=2 {
            assert!(session.poll().await.is_err());
            assert_eq!(session.consecutive_failures(), expected);
            assert_eq!(session.state(), SessionState::Connected);
        }
        assert!(session.poll().await.is_err());
        assert_eq!(session.state(), SessionState::Faulted);

        sim.set_silent(false);
        session.poll().await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.consecutive_failures(), 0);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen
            .iter()
            .any(|e| matches!(e, DriveEvent::FaultEntered { consecutive_failures: 3, .. })));
        assert_eq!(seen.last(), Some(&DriveEvent::FaultCleared));

        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_failed_poll_keeps_snapshot() {
        let (mut session, sim) = connected("CDE550").await;
        let before = session.snapshot();

        sim.set_silent(true);
        assert!(session.poll().await.is_err());
        assert!(Arc::ptr_eq(&before, &session.snapshot()));
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_illegal_address_does_not_fault() {
        let (mut session, sim) = connected("CDE550").await;
        let control = session.control().unwrap();

        for _ in 0..5 {
            let err = control.read_registers(0x00FF, 1).await.unwrap_err();
            assert!(matches!(
                err.as_transaction(),
                Some(TransactionError::DeviceException(code)) if code.code() == 0x02
            ));
        }
        assert_eq!(session.consecutive_failures(), 0);
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(sim.stats().exceptions, 5);
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_preflight_rejections() {
        let (mut session, sim) = connected("CDE550").await;
        let requests = sim.stats().requests;

        let err = session
            .write_parameter(names::OUTPUT_FREQUENCY, 10.0)
            .await
            .unwrap_err();
        assert!(matches!(
            err.as_catalog(),
            Some(CatalogError::AccessViolation { address: 0x0001, .. })
        ));
        let err = session.set_frequency(60.0).await.unwrap_err();
        assert!(matches!(err.as_catalog(), Some(CatalogError::OutOfRange { .. })));
        let err = session.write_register(0x0099, 1.0).await.unwrap_err();
        assert!(matches!(err.as_catalog(), Some(CatalogError::NotFound { .. })));

        assert_eq!(sim.stats().requests, requests);
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_controls_reach_drive() {
        let (mut session, sim) = connected("CDE550").await;

        assert_eq!(session.set_frequency(25.5).await.unwrap(), 255);
        session.set_direction(Rotation::Reverse).await.unwrap();
        session.start().await.unwrap();
        assert!(sim.is_running());

        session.poll().await.unwrap();
        let snapshot = session.snapshot();
        assert_eq!(snapshot.get(names::FREQUENCY_SETPOINT), Some(25.5));
        let status = snapshot.status().unwrap();
        assert!(status.is_running());
        assert!(status.is_reverse());

        sim.trip(crate::catalog::fault_codes::OVERVOLTAGE);
        session.poll().await.unwrap();
        assert_eq!(
            session.snapshot().drive_fault().map(|(code, _)| code),
            Some(crate::catalog::fault_codes::OVERVOLTAGE)
        );
        session.reset_fault().await.unwrap();
        session.stop().await.unwrap();
        assert!(!sim.is_tripped());
        assert!(!sim.is_running());
        assert_eq!(session.read_parameter(names::FAULT_CODE).await.unwrap(), 0.0);

        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let profile = Catalog::builtin().unwrap().profile("CDE550").unwrap();
        let (transport, _sim) =
            SimulatedDrive::new(profile.clone(), SimulatorConfig::default()).spawn();
        let config = fast_config().with_poll_interval(Duration::from_millis(10));
        let mut session = DriveSession::new(profile, config).unwrap();
        session.connect(transport).await.unwrap();
        let mut snapshots = session.subscribe_snapshot();

        session
            .run(tokio::time::sleep(Duration::from_millis(60)))
            .await
            .unwrap();
        assert!(snapshots.has_changed().unwrap());
        assert!(snapshots.borrow_and_update().sequence > 1);
        assert_eq!(session.state(), SessionState::Connected);

        session.disconnect().await;
        session.disconnect().await;
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_control_while_running() {
        let profile = Catalog::builtin().unwrap().profile("CDE550").unwrap();
        let (transport, sim) =
            SimulatedDrive::new(profile.clone(), SimulatorConfig::default()).spawn();
        let config = fast_config().with_poll_interval(Duration::from_millis(10));
        let mut session = DriveSession::new(profile, config).unwrap();
        session.connect(transport).await.unwrap();

        let control = session.control().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let commander = tokio::spawn(async move {
            let raw = control.set_frequency(30.0).await;
            let _ = stop_tx.send(());
            raw
        });

        session
            .run(async {
                let _ = stop_rx.await;
            })
            .await
            .unwrap();
        assert_eq!(commander.await.unwrap().unwrap(), 300);
        assert_eq!(sim.register(0x0002), Some(300));

        session.disconnect().await;
        assert_eq!(session.state(), SessionState::Disconnected);
    }
}

//! # Transport Layer
//!
//! Byte-level links to a drive. The transaction engine is the only user of a
//! transport: it writes one request frame, then reads until a complete
//! response frame has been assembled or the read deadline passes.
//!
//! ## Implementations
//!
//! - [`StreamTransport`] - any tokio byte stream. The simulated drive is
//!   reached through `StreamTransport<tokio::io::DuplexStream>`.
//! - [`RtuTransport`] - RS485 serial port via `tokio-serial` (feature `rtu`),
//!   observing the 3.5 character inter-frame silence before each write.
//!
//! ## Read semantics
//!
//! [`Transport::read_bytes`] appends whatever arrives to the caller's buffer.
//! When the deadline passes it returns [`TransportError::Timeout`] and leaves
//! the buffer untouched, so a partial frame can be completed by a later read.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{sleep_until, timeout, timeout_at, Instant};
use tracing::debug;

use crate::constants::{DEFAULT_BAUD_RATE, DEFAULT_DATA_BITS, DEFAULT_STOP_BITS, MAX_RTU_FRAME_SIZE};
use crate::error::{DriveError, TransportError, TransportResult};

/// Modbus recommends a fixed 1.75ms inter-frame gap above 19200 baud
const FIXED_FRAME_GAP_US: u64 = 1_750;

/// Upper bound on stale bytes dropped before a new request
const MAX_DISCARD_BYTES: usize = MAX_RTU_FRAME_SIZE * 4;

/// Transport statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransportStats {
    /// Frames written
    pub frames_sent: u64,
    /// Bytes written
    pub bytes_sent: u64,
    /// Bytes read
    pub bytes_received: u64,
    /// Stale bytes dropped before a request
    pub bytes_discarded: u64,
    /// Read deadlines that elapsed
    pub timeouts: u64,
    /// I/O failures
    pub errors: u64,
}

/// Byte-level link to one or more drives
///
/// Implementations must be `Send`: the engine worker owning the transport
/// runs as a tokio task.
pub trait Transport: Send {
    /// Write one complete frame
    fn write_bytes(&mut self, frame: &[u8]) -> impl Future<Output = TransportResult<()>> + Send;

    /// Append received bytes to `buf`.
    ///
    /// Returns the number of bytes appended, or `Timeout` once `deadline`
    /// passes without any byte arriving. Buffered bytes are never discarded.
    fn read_bytes(
        &mut self,
        buf: &mut BytesMut,
        deadline: Instant,
    ) -> impl Future<Output = TransportResult<usize>> + Send;

    /// Drop bytes already waiting on the link, returning how many were dropped
    fn discard_input(&mut self) -> impl Future<Output = TransportResult<usize>> + Send;

    /// Close the link. Closing twice is a no-op.
    fn close(&mut self) -> impl Future<Output = TransportResult<()>> + Send;

    /// Check if the link is open
    fn is_open(&self) -> bool;

    /// Get transport statistics
    fn stats(&self) -> TransportStats;

    /// Port or link identifier for logs
    fn name(&self) -> &str;
}

// ============================================================================
// Link configuration
// ============================================================================

/// Serial parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    #[default]
    Even,
    Odd,
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "N",
            Self::Even => "E",
            Self::Odd => "O",
        })
    }
}

impl FromStr for Parity {
    type Err = DriveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "n" | "none" => Ok(Self::None),
            "e" | "even" => Ok(Self::Even),
            "o" | "odd" => Ok(Self::Odd),
            _ => Err(DriveError::configuration(format!("unknown parity '{}'", s))),
        }
    }
}

/// Serial link parameters, 19200 8E1 by default
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Port path, e.g. `/dev/ttyUSB0` or `COM3`
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DEFAULT_DATA_BITS,
            parity: Parity::default(),
            stop_bits: DEFAULT_STOP_BITS,
        }
    }
}

impl LinkConfig {
    /// Default link parameters on `port`
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Self::default()
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_data_bits(mut self, data_bits: u8) -> Self {
        self.data_bits = data_bits;
        self
    }

    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    pub fn with_stop_bits(mut self, stop_bits: u8) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    /// Reject parameters no UART supports
    pub fn validate(&self) -> Result<(), DriveError> {
        if self.port.is_empty() {
            return Err(DriveError::configuration("serial port not set"));
        }
        if self.baud_rate == 0 {
            return Err(DriveError::configuration("baud rate must be positive"));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(DriveError::configuration(format!(
                "data bits {} outside 5..=8",
                self.data_bits
            )));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(DriveError::configuration(format!(
                "stop bits {} outside 1..=2",
                self.stop_bits
            )));
        }
        Ok(())
    }

    /// Time to transmit one character
    pub fn character_time(&self) -> Duration {
        let parity_bits = if self.parity == Parity::None { 0 } else { 1 };
        let bits = 1 + self.data_bits as u64 + parity_bits + self.stop_bits as u64;
        Duration::from_micros(bits * 1_000_000 / self.baud_rate.max(1) as u64)
    }

    /// Minimum line silence between frames (3.5 character times)
    pub fn frame_gap(&self) -> Duration {
        if self.baud_rate > DEFAULT_BAUD_RATE {
            Duration::from_micros(FIXED_FRAME_GAP_US)
        } else {
            self.character_time() * 35 / 10
        }
    }
}

impl fmt::Display for LinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}{}{}",
            self.port, self.baud_rate, self.data_bits, self.parity, self.stop_bits
        )
    }
}

// ============================================================================
// Stream transport
// ============================================================================

/// Transport over any tokio byte stream
pub struct StreamTransport<S> {
    stream: Option<S>,
    name: String,
    /// Line silence kept before each write
    frame_gap: Duration,
    last_activity: Option<Instant>,
    stats: TransportStats,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an open stream
    pub fn new(stream: S, name: impl Into<String>) -> Self {
        Self {
            stream: Some(stream),
            name: name.into(),
            frame_gap: Duration::ZERO,
            last_activity: None,
            stats: TransportStats::default(),
        }
    }

    /// Keep `gap` of silence after the last byte before writing
    pub fn with_frame_gap(mut self, gap: Duration) -> Self {
        self.frame_gap = gap;
        self
    }

    pub fn frame_gap(&self) -> Duration {
        self.frame_gap
    }

    /// Instant the link has been quiet for a full frame gap
    fn gap_deadline(&self) -> Option<Instant> {
        self.last_activity
            .filter(|_| !self.frame_gap.is_zero())
            .map(|last| last + self.frame_gap)
    }
}

async fn wait_until(deadline: Option<Instant>) {
    if let Some(deadline) = deadline {
        sleep_until(deadline).await;
    }
}

async fn write_frame<S: AsyncWrite + Unpin>(stream: &mut S, frame: &[u8]) -> std::io::Result<()> {
    stream.write_all(frame).await?;
    stream.flush().await
}

impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_bytes(&mut self, frame: &[u8]) -> TransportResult<()> {
        wait_until(self.gap_deadline()).await;

        let result = match self.stream.as_mut() {
            Some(stream) => write_frame(stream, frame).await,
            None => return Err(TransportError::Closed),
        };
        if let Err(e) = result {
            self.stats.errors += 1;
            return Err(e.into());
        }

        self.stats.frames_sent += 1;
        self.stats.bytes_sent += frame.len() as u64;
        self.last_activity = Some(Instant::now());
        Ok(())
    }

    async fn read_bytes(&mut self, buf: &mut BytesMut, deadline: Instant) -> TransportResult<usize> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(TransportError::Closed);
        };
        buf.reserve(MAX_RTU_FRAME_SIZE);

        let result = timeout_at(deadline, stream.read_buf(buf)).await;
        match result {
            Ok(Ok(0)) => {
                debug!("{}: peer closed the link", self.name);
                self.stream = None;
                Err(TransportError::Closed)
            }
            Ok(Ok(n)) => {
                self.stats.bytes_received += n as u64;
                self.last_activity = Some(Instant::now());
                Ok(n)
            }
            Ok(Err(e)) => {
                self.stats.errors += 1;
                Err(e.into())
            }
            Err(_) => {
                self.stats.timeouts += 1;
                Err(TransportError::Timeout {
                    buffered: buf.len(),
                })
            }
        }
    }

    async fn discard_input(&mut self) -> TransportResult<usize> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(TransportError::Closed);
        };

        let mut scratch = [0u8; 64];
        let mut discarded = 0;
        let mut peer_closed = false;
        while discarded < MAX_DISCARD_BYTES {
            // A zero timeout polls the read exactly once
            match timeout(Duration::ZERO, stream.read(&mut scratch)).await {
                Ok(Ok(0)) => {
                    peer_closed = true;
                    break;
                }
                Ok(Ok(n)) => discarded += n,
                Ok(Err(e)) => {
                    self.stats.errors += 1;
                    return Err(e.into());
                }
                Err(_) => break,
            }
        }

        if discarded > 0 {
            debug!("{}: discarded {} stale bytes", self.name, discarded);
            self.stats.bytes_discarded += discarded as u64;
        }
        if peer_closed {
            self.stream = None;
            return Err(TransportError::Closed);
        }
        Ok(discarded)
    }

    async fn close(&mut self) -> TransportResult<()> {
        if let Some(mut stream) = self.stream.take() {
            debug!("{}: closing", self.name);
            stream.shutdown().await?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn stats(&self) -> TransportStats {
        self.stats
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// RTU serial transport
// ============================================================================

/// Serial RS485 transport
#[cfg(feature = "rtu")]
pub type RtuTransport = StreamTransport<tokio_serial::SerialStream>;

#[cfg(feature = "rtu")]
impl StreamTransport<tokio_serial::SerialStream> {
    /// Open a serial port with the given link parameters
    pub fn open(config: &LinkConfig) -> TransportResult<Self> {
        config
            .validate()
            .map_err(|e| TransportError::open(&config.port, e))?;

        let data_bits = match config.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };
        let parity = match config.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        };
        let stop_bits = match config.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        };

        let builder = tokio_serial::new(&config.port, config.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits);
        let port = tokio_serial::SerialStream::open(&builder)
            .map_err(|e| TransportError::open(&config.port, e))?;

        debug!("Opened {} (frame gap {:?})", config, config.frame_gap());

        Ok(Self::new(port, config.port.clone()).with_frame_gap(config.frame_gap()))
    }
}

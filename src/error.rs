//! # Error types
//!
//! Every layer of the drive link has its own error enum so callers can match on
//! exactly the failures that layer produces:
//!
//! ```text
//! DriveError
//! ├── Frame        - malformed bytes (recoverable, retried by the engine)
//! ├── Transport    - port unavailable or closed
//! ├── Transaction  - NoResponse / DeviceException / InvalidFrame ...
//! ├── Catalog      - unknown register, read-only write, out-of-range value
//! ├── InvalidState - operation not allowed in the current session state
//! └── Configuration
//! ```

use thiserror::Error;

use crate::protocol::ExceptionCode;

/// Result type for drive-level operations
pub type DriveResult<T> = Result<T, DriveError>;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

// ============================================================================
// FrameError
// ============================================================================

/// Malformed bytes on the wire.
///
/// Frame errors are assumed to be line noise; the transaction engine retries
/// them and only surfaces them once retries are exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Trailing CRC does not match the CRC computed over the frame
    #[error("CRC mismatch: computed 0x{expected:04X}, frame carries 0x{received:04X}")]
    ChecksumMismatch { expected: u16, received: u16 },

    /// Fewer bytes than the function code's fixed or declared length
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// Function code outside the supported set (0x03, 0x06)
    #[error("unsupported function code 0x{code:02X}")]
    UnknownFunction { code: u8 },

    /// Frame or PDU larger than an RS485 ADU allows
    #[error("frame too large: {len} bytes (max {max})")]
    Oversized { len: usize, max: usize },

    /// Structurally valid frame that does not answer the request
    #[error("unexpected response: {message}")]
    Unexpected { message: String },
}

impl FrameError {
    /// Create an unexpected-response error
    pub fn unexpected<S: Into<String>>(message: S) -> Self {
        Self::Unexpected {
            message: message.into(),
        }
    }
}

// ============================================================================
// TransportError
// ============================================================================

/// Byte-level link failures
#[derive(Debug, Error)]
pub enum TransportError {
    /// The port could not be opened
    #[error("failed to open {port}: {message}")]
    Open { port: String, message: String },

    /// The link was closed by either side
    #[error("transport closed")]
    Closed,

    /// Read deadline elapsed; buffered bytes are kept
    #[error("read deadline elapsed with {buffered} bytes buffered")]
    Timeout { buffered: usize },

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Create an open error
    pub fn open<P: Into<String>, M: std::fmt::Display>(port: P, message: M) -> Self {
        Self::Open {
            port: port.into(),
            message: message.to_string(),
        }
    }

    /// Check if this is a read deadline expiry
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

// ============================================================================
// CatalogError
// ============================================================================

/// Register catalog lookups and value conversion failures.
///
/// Everything except `InvalidProfile` is a caller error detected before any
/// byte is sent.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CatalogError {
    /// No register at this address in the profile
    #[error("register 0x{address:04X} is not defined for {profile}")]
    NotFound { profile: String, address: u16 },

    /// No register with this name in the profile
    #[error("parameter '{name}' is not defined for {profile}")]
    UnknownParameter { profile: String, name: String },

    /// No profile with this name in the catalog
    #[error("unknown drive model '{name}'")]
    UnknownProfile { name: String },

    /// Write attempted on a read-only register
    #[error("register 0x{address:04X} ({name}) is read-only")]
    AccessViolation { address: u16, name: String },

    /// Scaled raw value outside the register's valid range
    #[error("{name}: {value} scales to raw {raw}, outside {min}..={max}")]
    OutOfRange {
        name: String,
        value: f64,
        raw: i64,
        min: i32,
        max: i32,
    },

    /// NaN or infinite engineering value
    #[error("{name}: value {value} is not a finite number")]
    NotFinite { name: String, value: f64 },

    /// Profile data failed validation at load time
    #[error("invalid drive profile: {message}")]
    InvalidProfile { message: String },
}

impl CatalogError {
    /// Create an invalid profile error
    pub fn invalid_profile<S: Into<String>>(message: S) -> Self {
        Self::InvalidProfile {
            message: message.into(),
        }
    }

    /// Errors that reject a request before it reaches the wire
    pub fn is_preflight(&self) -> bool {
        !matches!(self, Self::InvalidProfile { .. } | Self::UnknownProfile { .. })
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_profile(err.to_string())
    }
}

// ============================================================================
// TransactionError
// ============================================================================

/// Outcome of a failed request/response exchange
#[derive(Debug, Error)]
pub enum TransactionError {
    /// Every attempt timed out without a single byte
    #[error("no response after {attempts} attempts")]
    NoResponse { attempts: u32 },

    /// The drive answered with a Modbus exception
    #[error("device exception {0}")]
    DeviceException(ExceptionCode),

    /// Every attempt produced a corrupt or uncorrelated frame
    #[error("invalid frame after {attempts} attempts: {source}")]
    InvalidFrame {
        attempts: u32,
        #[source]
        source: FrameError,
    },

    /// The link failed underneath the transaction
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// Request rejected before encoding
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// The engine worker has shut down
    #[error("transaction engine stopped")]
    EngineStopped,
}

/// Coarse classification of transaction failures for events and telemetry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    NoResponse,
    DeviceException(ExceptionCode),
    InvalidFrame,
    Transport,
    InvalidRequest,
    EngineStopped,
}

impl TransactionError {
    /// Create an invalid request error
    pub fn invalid_request<S: Into<String>>(message: S) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Classify the failure
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NoResponse { .. } => FailureKind::NoResponse,
            Self::DeviceException(code) => FailureKind::DeviceException(*code),
            Self::InvalidFrame { .. } => FailureKind::InvalidFrame,
            Self::Transport(_) => FailureKind::Transport,
            Self::InvalidRequest { .. } => FailureKind::InvalidRequest,
            Self::EngineStopped => FailureKind::EngineStopped,
        }
    }

    /// Whether the failure says the link or the drive is unhealthy
    ///
    /// Illegal address/value exceptions and rejected requests are answered
    /// deterministically and say nothing about link health.
    pub fn counts_toward_fault(&self) -> bool {
        match self {
            Self::NoResponse { .. }
            | Self::InvalidFrame { .. }
            | Self::Transport(_)
            | Self::EngineStopped => true,
            Self::DeviceException(code) => code.is_critical(),
            Self::InvalidRequest { .. } => false,
        }
    }

    /// Whether resending the same frame may succeed.
    ///
    /// A device exception is a deterministic answer and is never resent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NoResponse { .. } | Self::InvalidFrame { .. } => true,
            Self::Transport(err) => err.is_timeout(),
            Self::DeviceException(_) | Self::InvalidRequest { .. } | Self::EngineStopped => false,
        }
    }
}

// ============================================================================
// DriveError
// ============================================================================

/// Umbrella error returned by session-level operations
#[derive(Debug, Error)]
pub enum DriveError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Operation not allowed in the current session state
    #[error("invalid session state: {message}")]
    InvalidState { message: String },

    /// Invalid link, session or simulator configuration
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl DriveError {
    /// Create an invalid state error
    pub fn invalid_state<S: Into<String>>(message: S) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Transaction failure, if this error is one
    pub fn as_transaction(&self) -> Option<&TransactionError> {
        match self {
            Self::Transaction(err) => Some(err),
            _ => None,
        }
    }

    /// Catalog failure, if this error is one
    pub fn as_catalog(&self) -> Option<&CatalogError> {
        match self {
            Self::Catalog(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for DriveError {
    fn from(err: serde_json::Error) -> Self {
        Self::configuration(err.to_string())
    }
}

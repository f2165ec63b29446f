//! # VFD Modbus - Drive Communication over Modbus RTU
//!
//! Reads and writes the operating parameters of variable-frequency motor
//! drives over an RS-485 Modbus RTU link, and monitors live status
//! (frequency, current, voltage, faults), with or without the real drive
//! attached.
//!
//! ## Features
//!
//! - **Bit-exact RTU framing**: CRC-16/Modbus, FC03 and FC06, exception frames
//! - **Register catalog**: JSON-driven per-model register maps with scaling
//!   and range validation before anything reaches the wire
//! - **Single-master engine**: FIFO queue, one transaction in flight, timeout
//!   and bounded retry
//! - **Drive session**: connection/fault state machine, periodic polling,
//!   atomic parameter snapshots, broadcast events
//! - **Simulated drive**: same wire contract, fault injection, ramp animation
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Engine | Simulator |
//! |------|----------|--------|-----------|
//! | 0x03 | Read Holding Registers | ✅ | ✅ |
//! | 0x06 | Write Single Register | ✅ | ✅ |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vfd_modbus::{Catalog, DriveResult, DriveSession, SessionConfig, SimulatedDrive, SimulatorConfig};
//!
//! #[tokio::main]
//! async fn main() -> DriveResult<()> {
//!     let profile = Catalog::builtin()?.profile("CDE550")?;
//!
//!     // Simulated drive on an in-process link
//!     let (transport, _sim) = SimulatedDrive::new(profile.clone(), SimulatorConfig::default()).spawn();
//!
//!     let mut session = DriveSession::new(profile, SessionConfig::default())?;
//!     session.connect(transport).await?;
//!
//!     session.set_frequency(25.5).await?;
//!     session.start().await?;
//!     session.poll().await?;
//!     println!("output: {:?} Hz", session.snapshot().get("output_frequency"));
//!
//!     session.disconnect().await;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus RTU constants and link defaults
pub mod constants;

/// Stack-allocated PDU with fixed array
pub mod pdu;

/// Function codes, exception codes, requests and responses
pub mod protocol;

/// RTU frame encoding and decoding with CRC-16
pub mod codec;

/// Logging system for the library
pub mod logging;

// ============================================================================
// Drive modules
// ============================================================================

/// Per-model register maps, scaling and validation
pub mod catalog;

/// Device-specific protocol limits configuration
pub mod device_limits;

/// Byte-level transports: serial RTU and in-process streams
pub mod transport;

/// Request/response correlation, retry and the FIFO worker
pub mod engine;

/// Drive connection state machine and polling
pub mod session;

/// Simulated drive peer
pub mod simulator;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime (users can use vfd_modbus::tokio) ===
pub use tokio;

// === Session API ===
pub use session::{
    DriveControl, DriveEvent, DriveSession, ParameterSnapshot, ParameterValue, Rotation,
    SessionConfig, SessionState,
};

// === Error handling ===
pub use error::{
    CatalogError, DriveError, DriveResult, FailureKind, FrameError, TransactionError,
    TransportError,
};

// === Core types ===
pub use codec::Frame;
pub use protocol::{ExceptionCode, FunctionCode, Request, Response, ResponsePayload, StationAddress};

// === Catalog ===
pub use catalog::{Catalog, ModelProfile, RegisterDescriptor, StatusWord};
pub use device_limits::DeviceLimits;

// === Engine and transports ===
pub use engine::{EngineHandle, EngineTask, RetryPolicy, TransactionEngine};
pub use transport::{LinkConfig, Parity, StreamTransport, Transport, TransportStats};

#[cfg(feature = "rtu")]
pub use transport::RtuTransport;

// === Simulation ===
pub use simulator::{InjectedFault, SimulatedDrive, SimulatorConfig, SimulatorHandle, SimulatorStats};

// === Logging ===
pub use logging::{CallbackLogger, LogCallback, LogLevel, LoggingMode};

// === PDU (advanced usage) ===
pub use pdu::{ModbusPdu, PduBuilder};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("VFD Modbus v{} - Modbus RTU drive communication", VERSION)
}

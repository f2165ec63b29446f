//! Logging for the drive link
//!
//! All library diagnostics go through `tracing`. [`CallbackLogger`] sits on
//! the frame path of the transaction engine and either forwards to `tracing`
//! or hands every line to an application callback, so a UI can show raw
//! traffic without installing a subscriber.

use std::fmt;
use std::sync::Arc;

use crate::protocol::{Request, Response, ResponsePayload, StationAddress};

/// Severity of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// How much of each frame is logged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoggingMode {
    /// No frame logging
    Disabled,
    /// Hex dump of each frame
    #[default]
    Compact,
    /// Hex dump plus decoded header fields
    Detailed,
}

/// Direction of a frame on the wire, seen from the master
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Sent,
    Received,
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sent => "TX",
            Self::Received => "RX",
        })
    }
}

/// Application log sink
pub type LogCallback = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Frame logger used by the transaction engine
#[derive(Clone)]
pub struct CallbackLogger {
    callback: Option<LogCallback>,
    mode: LoggingMode,
    max_level: LogLevel,
}

impl CallbackLogger {
    /// Forward lines up to `max_level` to `callback`
    pub fn new(callback: LogCallback, max_level: LogLevel) -> Self {
        Self {
            callback: Some(callback),
            mode: LoggingMode::default(),
            max_level,
        }
    }

    /// Forward everything to `tracing`
    pub fn tracing() -> Self {
        Self {
            callback: None,
            mode: LoggingMode::default(),
            max_level: LogLevel::Trace,
        }
    }

    /// Log nothing
    pub fn disabled() -> Self {
        Self::tracing().with_mode(LoggingMode::Disabled)
    }

    /// Set the frame logging mode
    pub fn with_mode(mut self, mode: LoggingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> LoggingMode {
        self.mode
    }

    /// Emit one line
    pub fn log(&self, level: LogLevel, message: &str) {
        if self.mode == LoggingMode::Disabled || level > self.max_level {
            return;
        }
        match &self.callback {
            Some(callback) => callback(level, message),
            None => match level {
                LogLevel::Error => tracing::error!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Trace => tracing::trace!("{}", message),
            },
        }
    }

    /// Log a raw RTU frame
    pub fn log_frame(&self, direction: PacketDirection, frame: &[u8]) {
        match self.mode {
            LoggingMode::Disabled => {}
            LoggingMode::Compact => {
                self.log(
                    LogLevel::Debug,
                    &format!("[RTU] {} {}", direction, format_hex(frame)),
                );
            }
            LoggingMode::Detailed => {
                let header = match frame {
                    [station, function, ..] => {
                        format!("station={} fc={:02X} len={}", station, function, frame.len())
                    }
                    _ => format!("len={}", frame.len()),
                };
                self.log(
                    LogLevel::Debug,
                    &format!("[RTU] {} {} | {}", direction, header, format_hex(frame)),
                );
            }
        }
    }

    /// Log an outgoing request
    pub fn log_request(&self, station: StationAddress, request: &Request) {
        if self.mode == LoggingMode::Detailed {
            self.log(
                LogLevel::Debug,
                &format!("station {}: {}", station, request),
            );
        }
    }

    /// Log a correlated response
    pub fn log_response(&self, response: &Response) {
        if self.mode != LoggingMode::Detailed {
            return;
        }
        let summary = match &response.payload {
            ResponsePayload::Registers(values) => format!(
                "station {}: {} registers [{}]",
                response.station,
                values.len(),
                values
                    .iter()
                    .map(|v| format!("{:04X}", v))
                    .collect::<Vec<_>>()
                    .join(" ")
            ),
            ResponsePayload::WriteConfirmation { address, value } => format!(
                "station {}: confirmed 0x{:04X} @ 0x{:04X}",
                response.station, value, address
            ),
        };
        self.log(LogLevel::Debug, &summary);
    }
}

impl Default for CallbackLogger {
    fn default() -> Self {
        Self::tracing()
    }
}

impl fmt::Debug for CallbackLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackLogger")
            .field("callback", &self.callback.is_some())
            .field("mode", &self.mode)
            .field("max_level", &self.max_level)
            .finish()
    }
}

/// Format raw bytes as a space-separated hex string
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

//! Scanner error types

use std::path::PathBuf;

use thiserror::Error;

use crate::devices::DeviceIdentity;

/// Errors raised while locating, opening or reading the scanner.
///
/// None of these are fatal to the application: callers log them and retry
/// with a fresh `start_reading` when they see fit.
#[derive(Error, Debug)]
pub enum ScannerError {
    #[error("Device not found: {0}")]
    NotFound(DeviceIdentity),

    #[error("Failed to open {identity}: {reason}")]
    OpenFailed {
        identity: DeviceIdentity,
        reason: String,
    },

    #[error("HID API unavailable: {0}")]
    HidUnavailable(String),

    #[error("Read failed: {0}")]
    Read(String),

    #[error("Shutdown in progress")]
    ShuttingDown,

    #[error("Failed to spawn worker thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read config {}: {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl ScannerError {
    /// Not-found and open failures are treated the same by callers.
    pub fn is_not_connected(&self) -> bool {
        matches!(
            self,
            ScannerError::NotFound(_) | ScannerError::OpenFailed { .. }
        )
    }
}

impl From<hidapi::HidError> for ScannerError {
    fn from(e: hidapi::HidError) -> Self {
        ScannerError::Read(e.to_string())
    }
}

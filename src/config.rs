//! Scanner configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::{
    DEFAULT_PID, DEFAULT_VID, READ_TIMEOUT, SHUTDOWN_TIMEOUT, WEDGE_IDLE_RESET,
};
use crate::devices::DeviceIdentity;
use crate::error::ScannerError;

/// Default config file, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "movie-scanner.toml";

/// How barcodes reach the application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum AcquisitionMode {
    /// Raw HID reports read directly from the USB device.
    #[default]
    UsbHid,
    /// Text events forwarded by the UI layer.
    KeyboardWedge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// USB Vendor ID as a hex string ("0x0525" or "0525")
    #[serde(default = "default_vendor_id")]
    pub vendor_id: String,
    /// USB Product ID as a hex string
    #[serde(default = "default_product_id")]
    pub product_id: String,
    #[serde(default)]
    pub mode: AcquisitionMode,
    /// Per-read timeout of the USB scan loop
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    /// Keyboard-wedge gap that discards a partial barcode
    #[serde(default = "default_wedge_idle_reset")]
    pub wedge_idle_reset_ms: u64,
    /// Upper bound on waiting for background work at exit
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
    /// Offer a second lookup with the leading '8' stripped from EAN-13 codes
    #[serde(default = "default_retry_without_leading_eight")]
    pub retry_without_leading_eight: bool,
}

fn default_vendor_id() -> String {
    format!("{:#06x}", DEFAULT_VID)
}
fn default_product_id() -> String {
    format!("{:#06x}", DEFAULT_PID)
}
fn default_read_timeout() -> u64 {
    READ_TIMEOUT.as_millis() as u64
}
fn default_wedge_idle_reset() -> u64 {
    WEDGE_IDLE_RESET.as_millis() as u64
}
fn default_shutdown_timeout() -> u64 {
    SHUTDOWN_TIMEOUT.as_millis() as u64
}
fn default_retry_without_leading_eight() -> bool {
    true
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            vendor_id: default_vendor_id(),
            product_id: default_product_id(),
            mode: AcquisitionMode::default(),
            read_timeout_ms: default_read_timeout(),
            wedge_idle_reset_ms: default_wedge_idle_reset(),
            shutdown_timeout_ms: default_shutdown_timeout(),
            retry_without_leading_eight: default_retry_without_leading_eight(),
        }
    }
}

impl ScannerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ScannerError> {
        Ok(toml::from_str(s)?)
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ScannerError> {
        if !path.exists() {
            debug!("Config {} not found, using defaults.", path.display());
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(path).map_err(|source| ScannerError::ConfigRead {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_toml_str(&contents)
    }

    /// The configured device, with per-field fallback to the built-in IDs.
    pub fn identity(&self) -> DeviceIdentity {
        let vendor_id = parse_hex_id(&self.vendor_id).unwrap_or_else(|| {
            warn!(
                "Invalid vendor_id {:?}, falling back to {:#06x}.",
                self.vendor_id, DEFAULT_VID
            );
            DEFAULT_VID
        });
        let product_id = parse_hex_id(&self.product_id).unwrap_or_else(|| {
            warn!(
                "Invalid product_id {:?}, falling back to {:#06x}.",
                self.product_id, DEFAULT_PID
            );
            DEFAULT_PID
        });
        DeviceIdentity::new(vendor_id, product_id)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn wedge_idle_reset(&self) -> Duration {
        Duration::from_millis(self.wedge_idle_reset_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Parse a 16-bit hex identifier, with or without a `0x` prefix.
pub fn parse_hex_id(s: &str) -> Option<u16> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if digits.is_empty() {
        return None;
    }
    u16::from_str_radix(digits, 16).ok()
}

//! Barcode acquisition for a physical movie catalogue.
//!
//! A HID-class scanner "types" each UPC/EAN as keyboard input reports. This
//! crate owns the scanner, decodes those reports into barcode strings and
//! hands them to subscribers, and coordinates cooperative shutdown of the
//! background worker when the application exits.
//!
//! Barcodes arrive either straight from the USB device
//! ([`service::UsbBarcodeService`]) or, in keyboard-wedge mode, as text the
//! UI forwards ([`service::KeyboardWedgeService`]).

pub mod config;
pub mod constants;
pub mod decoder;
pub mod device;
pub mod devices;
pub mod error;
pub mod lookup;
pub mod scan_loop;
pub mod service;
pub mod shutdown;
pub mod tools;

pub use config::{AcquisitionMode, ScannerConfig};
pub use devices::{DeviceIdentity, DeviceInfo};
pub use error::ScannerError;
pub use service::{build_service, BarcodeService, ScannerEvent, ScannerStatus};
pub use shutdown::{ShutdownCoordinator, ShutdownReport};

//! Barcode service facade.
//!
//! Two interchangeable backends sit behind [`BarcodeService`]: direct USB HID
//! acquisition ([`UsbBarcodeService`]) and keyboard-wedge text input
//! ([`KeyboardWedgeService`]). Which one runs is chosen by configuration.

use std::sync::Arc;

use derive_more::Display;
use tokio::sync::mpsc;

use crate::config::{AcquisitionMode, ScannerConfig};
use crate::device::HidLocator;
use crate::devices::DeviceInfo;
use crate::error::ScannerError;
use crate::shutdown::ShutdownCoordinator;

pub mod events;
pub mod usb;
pub mod wedge;

pub use events::EventHub;
pub use usb::UsbBarcodeService;
pub use wedge::KeyboardWedgeService;

/// Scanner status as shown to the user.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum ScannerStatus {
    #[display(fmt = "CONNECTED")]
    Connected,
    #[display(fmt = "DISCONNECTED")]
    Disconnected,
    #[display(fmt = "LISTENING")]
    Listening,
    #[display(fmt = "IDLE")]
    Idle,
}

/// What the scanner tells its subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScannerEvent {
    /// A complete barcode, once per scan.
    Scanned(String),
    /// The backend changed status.
    StatusChanged(ScannerStatus),
}

/// Contract shared by both acquisition backends.
pub trait BarcodeService: Send + Sync {
    /// Begin acquiring barcodes. Calling it while already reading is a no-op.
    fn start_reading(&self) -> Result<(), ScannerError>;

    /// Stop acquiring. Blocks until the worker (if any) has exited.
    fn stop_reading(&self);

    fn is_reading(&self) -> bool;

    fn get_status(&self) -> ScannerStatus;

    fn is_connected(&self) -> bool;

    fn get_device_info(&self) -> Option<DeviceInfo>;

    /// Register for scan and status events.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ScannerEvent>;

    /// Text typed into the UI. Only the keyboard-wedge backend cares.
    fn handle_text_input(&self, _text: &str) {}
}

/// Build the backend selected by `config.mode`.
pub fn build_service(
    config: &ScannerConfig,
    coordinator: Arc<ShutdownCoordinator>,
) -> Box<dyn BarcodeService> {
    match config.mode {
        AcquisitionMode::UsbHid => Box::new(UsbBarcodeService::new(
            config.identity(),
            config.read_timeout(),
            Arc::new(HidLocator::new()),
            coordinator,
        )),
        AcquisitionMode::KeyboardWedge => Box::new(KeyboardWedgeService::new(
            config.wedge_idle_reset(),
            coordinator,
        )),
    }
}

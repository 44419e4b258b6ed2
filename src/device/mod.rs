//! Device access seams.
//!
//! The scan loop only ever sees a [`ReportSource`]; where it comes from is
//! the [`DeviceLocator`]'s business. The hidapi-backed implementation lives in
//! [`usb`].

use std::time::Duration;

use crate::devices::{DeviceIdentity, DeviceInfo};
use crate::error::ScannerError;

pub mod slot;
pub mod usb;

pub use slot::DeviceSlot;
pub use usb::HidLocator;

/// An opened device that yields raw input reports.
pub trait ReportSource: Send {
    /// Read one report into `buf`, waiting at most `timeout`.
    ///
    /// `Ok(0)` means the timeout elapsed with no data; that is not an error.
    fn read_report(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ScannerError>;
}

/// Finds and opens the scanner.
pub trait DeviceLocator: Send + Sync {
    /// Open the first attached device matching `identity`.
    fn connect(&self, identity: DeviceIdentity) -> Result<Box<dyn ReportSource>, ScannerError>;

    /// Re-query the device registry for `identity`; the device need not be open.
    fn describe(&self, identity: DeviceIdentity) -> Option<DeviceInfo>;
}

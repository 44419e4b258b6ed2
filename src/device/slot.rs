use parking_lot::Mutex;
use tracing::debug;

use crate::device::ReportSource;

/// Holder for the one open scanner handle.
///
/// The handle is either here (open, idle) or moved out to the scan worker.
/// Ownership changes only through [`acquire`](Self::acquire) and
/// [`release`](Self::release), so a status probe never races a read.
#[derive(Default)]
pub struct DeviceSlot {
    handle: Mutex<Option<Box<dyn ReportSource>>>,
}

impl std::fmt::Debug for DeviceSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DeviceSlot {{ open: {} }}", self.is_open())
    }
}

impl DeviceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the handle out of the slot.
    pub fn acquire(&self) -> Option<Box<dyn ReportSource>> {
        self.handle.lock().take()
    }

    /// Park an open handle for the next session.
    pub fn release(&self, handle: Box<dyn ReportSource>) {
        let mut slot = self.handle.lock();
        if slot.replace(handle).is_some() {
            debug!("Replaced a parked device handle.");
        }
    }

    pub fn is_open(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Drop (and thereby close) any parked handle.
    pub fn close(&self) {
        if self.handle.lock().take().is_some() {
            debug!("Closed parked device handle.");
        }
    }
}

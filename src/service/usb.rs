//! USB HID acquisition backend.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::constants::SCAN_TASK_NAME;
use crate::device::{DeviceLocator, DeviceSlot, ReportSource};
use crate::devices::{DeviceIdentity, DeviceInfo};
use crate::error::ScannerError;
use crate::scan_loop::{run_scan_loop, LoopExit, ScanState, ScanStateCell};
use crate::service::{BarcodeService, EventHub, ScannerEvent, ScannerStatus};
use crate::shutdown::{ShutdownCoordinator, TaskHandle};

/// Reads barcodes straight from the scanner's HID input reports.
///
/// At most one scan worker runs at a time. The open handle lives in a
/// [`DeviceSlot`] between sessions so a restart does not re-enumerate.
pub struct UsbBarcodeService {
    identity: DeviceIdentity,
    read_timeout: Duration,
    locator: Arc<dyn DeviceLocator>,
    coordinator: Arc<ShutdownCoordinator>,
    slot: Arc<DeviceSlot>,
    state: ScanStateCell,
    session: Mutex<Option<TaskHandle<()>>>,
    events: EventHub,
}

impl std::fmt::Debug for UsbBarcodeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbBarcodeService")
            .field("identity", &self.identity)
            .field("state", &self.state.get())
            .field("slot", &self.slot)
            .finish()
    }
}

impl UsbBarcodeService {
    pub fn new(
        identity: DeviceIdentity,
        read_timeout: Duration,
        locator: Arc<dyn DeviceLocator>,
        coordinator: Arc<ShutdownCoordinator>,
    ) -> Self {
        info!("Creating USB barcode service for device: {}", identity);
        UsbBarcodeService {
            identity,
            read_timeout,
            locator,
            coordinator,
            slot: Arc::new(DeviceSlot::new()),
            state: ScanStateCell::default(),
            session: Mutex::new(None),
            events: EventHub::new(),
        }
    }

    pub fn state(&self) -> ScanState {
        self.state.get()
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    /// The parked handle if there is one, otherwise a fresh connect.
    fn open_device(&self) -> Result<Box<dyn ReportSource>, ScannerError> {
        match self.slot.acquire() {
            Some(handle) => {
                debug!("Reusing open handle for {}", self.identity);
                Ok(handle)
            }
            None => self.locator.connect(self.identity),
        }
    }
}

impl BarcodeService for UsbBarcodeService {
    #[tracing::instrument(skip(self), fields(device = %self.identity))]
    fn start_reading(&self) -> Result<(), ScannerError> {
        let mut session = self.session.lock();

        if let Some(task) = session.as_ref() {
            if !task.is_finished() {
                warn!("Scanner is already reading; ignoring start request.");
                return Ok(());
            }
        }
        // Reap a worker that ended on its own (read error).
        if let Some(task) = session.take() {
            task.join();
        }

        if self.coordinator.is_shutdown_requested() {
            return Err(ScannerError::ShuttingDown);
        }

        self.state.set(ScanState::Connecting);
        let mut source = match self.open_device() {
            Ok(source) => source,
            Err(e) => {
                warn!("Scanner not connected: {}", e);
                self.state.set(ScanState::Idle);
                return Err(e);
            }
        };
        self.state.set(ScanState::Reading);

        let slot = self.slot.clone();
        let state = self.state.clone();
        let events = self.events.clone();
        let read_timeout = self.read_timeout;

        let spawned = self.coordinator.spawn(SCAN_TASK_NAME, move |token| {
            let exit = run_scan_loop(&mut *source, &token, read_timeout, |barcode| {
                events.publish(ScannerEvent::Scanned(barcode))
            });

            state.set(ScanState::Stopping);
            match exit {
                LoopExit::Cancelled => {
                    debug!("Scan loop stopped; keeping the device open.");
                    slot.release(source);
                }
                LoopExit::Failed(e) => {
                    debug!("Closing device handle after read failure: {}", e);
                    drop(source);
                }
            }
            state.set(ScanState::Idle);
        });

        match spawned {
            Ok(task) => {
                *session = Some(task);
                Ok(())
            }
            Err(e) => {
                self.state.set(ScanState::Idle);
                Err(e)
            }
        }
    }

    fn stop_reading(&self) {
        // Held through the join so a status probe cannot open a second
        // handle before the worker parks its own.
        let mut session = self.session.lock();
        match session.take() {
            None => debug!("Scanner is not reading; nothing to stop."),
            Some(task) => {
                if !task.is_finished() {
                    info!("Stopping scanner.");
                    task.request_stop();
                }
                task.join();
            }
        }
    }

    fn is_reading(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .map_or(false, |task| !task.is_finished())
    }

    fn get_status(&self) -> ScannerStatus {
        if self.is_connected() {
            ScannerStatus::Connected
        } else {
            ScannerStatus::Disconnected
        }
    }

    /// Re-probes the device on every call unless a worker currently owns it.
    ///
    /// Runs under the session lock, so it never overlaps a start or stop.
    fn is_connected(&self) -> bool {
        let session = self.session.lock();
        if session.as_ref().map_or(false, |task| !task.is_finished()) {
            return true;
        }

        if self.slot.is_open() {
            if self.locator.describe(self.identity).is_some() {
                return true;
            }
            debug!("Parked handle for {} no longer attached.", self.identity);
            self.slot.close();
            return false;
        }

        match self.locator.connect(self.identity) {
            Ok(handle) => {
                self.slot.release(handle);
                true
            }
            Err(e) => {
                debug!("Status probe: {}", e);
                false
            }
        }
    }

    fn get_device_info(&self) -> Option<DeviceInfo> {
        self.locator.describe(self.identity)
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ScannerEvent> {
        self.events.subscribe()
    }
}

impl Drop for UsbBarcodeService {
    fn drop(&mut self) {
        // Signal the worker; it exits within one read timeout.
        if let Some(task) = self.session.get_mut().as_ref() {
            task.request_stop();
        }
    }
}

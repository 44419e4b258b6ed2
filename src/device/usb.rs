use std::fmt::{Debug, Error, Formatter};
use std::time::Duration;

use hidapi::{HidApi, HidDevice, HidResult};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::device::{DeviceLocator, ReportSource};
use crate::devices::{DeviceIdentity, DeviceInfo};
use crate::error::ScannerError;
use crate::tools::get_full_device_name;

/// Initializes the hidapi.
/// Will also initialize the currently available device list.
#[tracing::instrument]
pub fn initialize_hidapi() -> HidResult<HidApi> {
    debug!("Initializing the hidapi.");
    HidApi::new()
}

impl ReportSource for HidDevice {
    fn read_report(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ScannerError> {
        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        Ok(self.read_timeout(buf, timeout_ms)?)
    }
}

/// Locates the scanner through hidapi.
///
/// The `HidApi` context is created lazily on first use and kept for the
/// lifetime of the locator; every query refreshes its device list.
pub struct HidLocator {
    api: Mutex<Option<HidApi>>,
}

impl Debug for HidLocator {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "HidLocator {{ initialized: {} }}", self.api.lock().is_some())
    }
}

impl Default for HidLocator {
    fn default() -> Self {
        Self::new()
    }
}

impl HidLocator {
    pub fn new() -> Self {
        HidLocator {
            api: Mutex::new(None),
        }
    }

    /// Run `f` against a freshly refreshed device list.
    fn with_api<R>(&self, f: impl FnOnce(&HidApi) -> R) -> Result<R, ScannerError> {
        let mut guard = self.api.lock();
        if guard.is_none() {
            let api = initialize_hidapi().map_err(|e| ScannerError::HidUnavailable(e.to_string()))?;
            *guard = Some(api);
        }
        let api = guard
            .as_mut()
            .ok_or_else(|| ScannerError::HidUnavailable("hidapi not initialized".into()))?;

        if let Err(e) = api.refresh_devices() {
            error!("Failed to refresh the HID device list: {}", e);
        }
        Ok(f(api))
    }

    /// Snapshot of every attached HID device.
    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>, ScannerError> {
        self.with_api(|api| api.device_list().map(to_device_info).collect())
    }
}

fn to_device_info(device: &hidapi::DeviceInfo) -> DeviceInfo {
    DeviceInfo {
        vendor_id: device.vendor_id(),
        product_id: device.product_id(),
        serial_number: device.serial_number().map(str::to_string),
        product: device.product_string().map(str::to_string),
    }
}

impl DeviceLocator for HidLocator {
    #[tracing::instrument(skip(self))]
    fn connect(&self, identity: DeviceIdentity) -> Result<Box<dyn ReportSource>, ScannerError> {
        info!("Looking to open a HID device matching {}...", identity);

        let opened = self.with_api(|api| {
            let matching = api
                .device_list()
                .find(|d| identity.matches(d.vendor_id(), d.product_id()))?;

            info!("Found a matching device. Opening it now.");
            Some(matching.open_device(api))
        })?;

        match opened {
            None => {
                info!("Didn't find any matching devices to open.");
                Err(ScannerError::NotFound(identity))
            }
            Some(Err(e)) => {
                error!("Failed to open the device: {}", e);
                Err(ScannerError::OpenFailed {
                    identity,
                    reason: e.to_string(),
                })
            }
            Some(Ok(device)) => {
                info!("Connected to {}", identity);
                info!("Device name: {}.", get_full_device_name(&device));
                Ok(Box::new(device))
            }
        }
    }

    fn describe(&self, identity: DeviceIdentity) -> Option<DeviceInfo> {
        match self.with_api(|api| {
            api.device_list()
                .find(|d| identity.matches(d.vendor_id(), d.product_id()))
                .map(to_device_info)
        }) {
            Ok(info) => info,
            Err(e) => {
                debug!("Cannot describe {}: {}", identity, e);
                None
            }
        }
    }
}

use hidapi::HidDevice;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::device::HidLocator;
use crate::devices::{DeviceIdentity, DeviceInfo};
use crate::error::ScannerError;

/// Filter used when `RUST_LOG` is not set.
const DEFAULT_LOG_FILTER: &str = "info,movie_scanner=debug";

/// Initializes the global logging facility.
///
/// If `RUST_LOG` is not set, the global default logging level is `info`, and for
/// `movie_scanner` it is `debug`.
///
/// Log messages are formatted and printed to standard output by `tracing_subscriber`'s fmt
/// subscriber, as JSON lines when `json_output` is set.
///
/// # Panics
///
/// Panics if the initialization was unsuccessful, likely because a global subscriber was already
/// installed by another call to try_init.
pub fn initialize_logging(json_output: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json_output {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// List attached HID devices, flagging the one we are configured for.
#[tracing::instrument(skip(locator))]
pub fn find_attached_devices(
    locator: &HidLocator,
    identity: DeviceIdentity,
) -> Result<Vec<(DeviceInfo, bool)>, ScannerError> {
    info!("Refreshing devices list...");
    let devices: Vec<(DeviceInfo, bool)> = locator
        .list_devices()?
        .into_iter()
        .map(|d| {
            let is_scanner = d.identity() == identity;
            (d, is_scanner)
        })
        .collect();
    info!(
        "Attached HID devices: {}, matching {}: {}",
        devices.len(),
        identity,
        devices.iter().filter(|(_, m)| *m).count()
    );
    Ok(devices)
}

/// Get a formatted string composed of manufacturer string and product string.
pub fn get_full_device_name(device: &HidDevice) -> String {
    format!(
        "{} {}",
        match device.get_manufacturer_string() {
            Ok(m) => m.unwrap_or_else(|| "NA".to_string()),
            Err(e) => format!("{:?}", e),
        },
        match device.get_product_string() {
            Ok(m) => m.unwrap_or_else(|| "NA".to_string()),
            Err(e) => format!("{:?}", e),
        },
    )
}

use std::fmt::{Debug, Display as FmtDisplay, Formatter};

use derive_more::Display;

/// Vendor/product pair the scanner is matched by during enumeration.
#[derive(Debug, Display, Eq, PartialEq, Hash, Clone, Copy)]
#[display(fmt = "VidPid {{ vid: {:04x?}, pid: {:04x?} }}", vendor_id, product_id)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceIdentity {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        DeviceIdentity {
            vendor_id,
            product_id,
        }
    }

    /// True when `vid`/`pid` name exactly this device.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vendor_id == vid && self.product_id == pid
    }
}

/// Read-only snapshot of a matched device registry entry.
///
/// Built on demand by the locator; never cached.
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct DeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial_number: Option<String>,
    pub product: Option<String>,
}

/// Written by hand: the serial is optional and prints as `NA` when missing.
impl FmtDisplay for DeviceInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "VID={:#06x} PID={:#06x} SN={}",
            self.vendor_id,
            self.product_id,
            self.serial_number.as_deref().unwrap_or("NA")
        )
    }
}

impl DeviceInfo {
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.vendor_id, self.product_id)
    }
}

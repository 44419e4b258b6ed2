use std::time::Duration;

/// Default scanner Vendor ID, used when the configuration has none (or an invalid one).
pub static DEFAULT_VID: u16 = 0x0525;

/// Default scanner Product ID.
pub static DEFAULT_PID: u16 = 0xa4a5;

/// Size of one raw HID input report.
pub const REPORT_LEN: usize = 64;

/// Offset of the first key usage code in a boot-protocol keyboard report.
///
/// Byte 0 holds the modifier bits and byte 1 is reserved.
pub const USAGE_OFFSET: usize = 2;

/// Upper bound on a single blocking device read.
pub const READ_TIMEOUT: Duration = Duration::from_millis(1000);

/// Keyboard-wedge gap after which a partial barcode is discarded.
pub const WEDGE_IDLE_RESET: Duration = Duration::from_millis(100);

/// How long the application waits for background work on exit.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry name of the USB scan worker.
pub const SCAN_TASK_NAME: &str = "barcode-scan-loop";

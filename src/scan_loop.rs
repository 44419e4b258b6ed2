use std::sync::Arc;
use std::time::Duration;

use derive_more::Display;
use parking_lot::Mutex;
use tracing::{debug, error, info, trace};

use crate::constants::REPORT_LEN;
use crate::decoder::{decode_report, ScanAccumulator};
use crate::device::ReportSource;
use crate::error::ScannerError;
use crate::shutdown::CancelToken;

/// Lifecycle of a scan session.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Connecting,
    Reading,
    Stopping,
}

/// Scan state shared between the facade and its worker.
#[derive(Debug, Clone)]
pub struct ScanStateCell(Arc<Mutex<ScanState>>);

impl Default for ScanStateCell {
    fn default() -> Self {
        ScanStateCell(Arc::new(Mutex::new(ScanState::Idle)))
    }
}

impl ScanStateCell {
    pub fn get(&self) -> ScanState {
        *self.0.lock()
    }

    pub fn set(&self, next: ScanState) {
        let mut state = self.0.lock();
        if *state != next {
            debug!("Scanner state {} -> {}", *state, next);
            *state = next;
        }
    }
}

/// Why the read loop returned.
#[derive(Debug)]
pub enum LoopExit {
    /// Shutdown or a local stop was observed.
    Cancelled,
    /// A read failed with something other than a timeout.
    Failed(ScannerError),
}

/// Read reports from `source` until `token` is cancelled or a read fails.
///
/// Every read waits at most `read_timeout`, so cancellation is noticed within
/// one timeout interval. Each finished barcode is handed to `on_scan` in the
/// order it was decoded.
#[tracing::instrument(skip_all, fields(timeout = ?read_timeout))]
pub fn run_scan_loop<S, F>(
    source: &mut S,
    token: &CancelToken,
    read_timeout: Duration,
    mut on_scan: F,
) -> LoopExit
where
    S: ReportSource + ?Sized,
    F: FnMut(String),
{
    info!("Entering read loop.");

    let mut buf = [0u8; REPORT_LEN];
    let mut accumulator = ScanAccumulator::new();

    loop {
        if token.is_cancelled() {
            debug!(
                shutdown = token.is_shutdown(),
                "Read loop cancelled, dropping {} pending characters.",
                accumulator.as_str().len()
            );
            return LoopExit::Cancelled;
        }

        buf.fill(0);
        match source.read_report(&mut buf, read_timeout) {
            Ok(0) => {
                // Timeout, no data - loop continues to check cancellation
            }
            Ok(read_len) => {
                trace!("Received {} bytes: {:02x?}", read_len, &buf[..read_len.min(REPORT_LEN)]);
                if let Some(barcode) = accumulator.feed(decode_report(&buf)) {
                    info!("Barcode scanned: {}", barcode);
                    on_scan(barcode);
                }
            }
            Err(e) => {
                error!("Error reading from scanner: {}", e);
                return LoopExit::Failed(e);
            }
        }
    }
}

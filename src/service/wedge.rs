//! Keyboard-wedge acquisition backend.
//!
//! The scanner types into whatever has focus; the UI layer forwards each
//! text-input event to [`KeyboardWedgeService::handle_text_input`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::decoder::{decode_text, ScanAccumulator, TextAction};
use crate::devices::DeviceInfo;
use crate::error::ScannerError;
use crate::service::{BarcodeService, EventHub, ScannerEvent, ScannerStatus};
use crate::shutdown::ShutdownCoordinator;

#[derive(Debug, Default)]
struct WedgeBuffer {
    accumulator: ScanAccumulator,
    last_input: Option<Instant>,
}

#[derive(Debug)]
pub struct KeyboardWedgeService {
    idle_reset: Duration,
    listening: AtomicBool,
    buffer: Mutex<WedgeBuffer>,
    coordinator: Arc<ShutdownCoordinator>,
    events: EventHub,
}

impl KeyboardWedgeService {
    pub fn new(idle_reset: Duration, coordinator: Arc<ShutdownCoordinator>) -> Self {
        info!("Creating keyboard-wedge barcode service (idle reset {:?})", idle_reset);
        KeyboardWedgeService {
            idle_reset,
            listening: AtomicBool::new(false),
            buffer: Mutex::new(WedgeBuffer::default()),
            coordinator,
            events: EventHub::new(),
        }
    }

    /// [`handle_text_input`](BarcodeService::handle_text_input) with an explicit arrival time.
    pub fn handle_text_input_at(&self, text: &str, now: Instant) {
        if !self.listening.load(Ordering::SeqCst) || self.coordinator.is_shutdown_requested() {
            return;
        }

        let finished = {
            let mut buffer = self.buffer.lock();
            let idle = buffer
                .last_input
                .map_or(false, |last| now.saturating_duration_since(last) > self.idle_reset);
            if idle && !buffer.accumulator.is_empty() {
                debug!(
                    "Discarding {:?} after idle gap.",
                    buffer.accumulator.as_str()
                );
                buffer.accumulator.clear();
            }
            buffer.last_input = Some(now);

            match decode_text(text) {
                TextAction::Terminate if !buffer.accumulator.is_empty() => {
                    let barcode = buffer.accumulator.as_str().to_string();
                    buffer.accumulator.clear();
                    Some(barcode)
                }
                TextAction::Terminate => None,
                TextAction::Append(chunk) => {
                    trace!("Wedge input {:?}", chunk);
                    buffer.accumulator.push_str(chunk);
                    None
                }
            }
        };

        if let Some(barcode) = finished {
            info!("Barcode scanned: {}", barcode);
            self.events.publish(ScannerEvent::Scanned(barcode));
        }
    }

    fn set_listening(&self, listening: bool) {
        if self.listening.swap(listening, Ordering::SeqCst) != listening {
            let status = if listening {
                ScannerStatus::Listening
            } else {
                ScannerStatus::Idle
            };
            debug!("Keyboard wedge {}", status);
            self.events.publish(ScannerEvent::StatusChanged(status));
        }
    }
}

impl BarcodeService for KeyboardWedgeService {
    fn start_reading(&self) -> Result<(), ScannerError> {
        if self.coordinator.is_shutdown_requested() {
            return Err(ScannerError::ShuttingDown);
        }
        if self.is_reading() {
            warn!("Keyboard wedge is already listening; ignoring start request.");
            return Ok(());
        }
        self.set_listening(true);
        Ok(())
    }

    fn stop_reading(&self) {
        self.set_listening(false);
        let mut buffer = self.buffer.lock();
        buffer.accumulator.clear();
        buffer.last_input = None;
    }

    fn is_reading(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    fn get_status(&self) -> ScannerStatus {
        if self.is_reading() {
            ScannerStatus::Listening
        } else {
            ScannerStatus::Idle
        }
    }

    /// The keyboard is always there.
    fn is_connected(&self) -> bool {
        true
    }

    fn get_device_info(&self) -> Option<DeviceInfo> {
        Some(DeviceInfo {
            vendor_id: 0,
            product_id: 0,
            serial_number: Some("KeyboardWedge".to_string()),
            product: None,
        })
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ScannerEvent> {
        self.events.subscribe()
    }

    fn handle_text_input(&self, text: &str) {
        self.handle_text_input_at(text, Instant::now());
    }
}

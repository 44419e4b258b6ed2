//! End-to-end tests of the USB backend against a scripted device.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, sleep};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;

use movie_scanner::constants::{SCAN_TASK_NAME, USAGE_OFFSET};
use movie_scanner::device::{DeviceLocator, ReportSource};
use movie_scanner::scan_loop::ScanState;
use movie_scanner::service::UsbBarcodeService;
use movie_scanner::{
    BarcodeService, DeviceIdentity, DeviceInfo, ScannerError, ScannerEvent, ScannerStatus,
    ShutdownCoordinator, ShutdownReport,
};

const READ_TIMEOUT: Duration = Duration::from_millis(100);
const SCANNER: DeviceIdentity = DeviceIdentity::new(0x0525, 0xa4a5);

enum Step {
    Usage(u8),
    Fail,
}

/// Shared script for every handle the locator hands out.
#[derive(Default)]
struct Device {
    steps: Mutex<VecDeque<Step>>,
    attached: AtomicBool,
    deny_open: AtomicBool,
    connects: AtomicUsize,
    reads: AtomicUsize,
    /// While set, `connect` blocks before opening.
    hold_connect: AtomicBool,
    connect_calls: AtomicUsize,
    live_handles: AtomicUsize,
    max_live_handles: AtomicUsize,
}

impl Device {
    fn attached() -> Arc<Self> {
        let device = Arc::new(Device::default());
        device.attached.store(true, Ordering::SeqCst);
        device
    }

    fn type_barcode(&self, code: &str) {
        let mut steps = self.steps.lock();
        for c in code.chars() {
            let usage = match c {
                '0' => 0x27,
                d => 0x1e + (d.to_digit(10).unwrap() as u8 - 1),
            };
            steps.push_back(Step::Usage(usage));
            steps.push_back(Step::Usage(0x00));
        }
        steps.push_back(Step::Usage(0x28));
    }

    fn fail_next_read(&self) {
        self.steps.lock().push_back(Step::Fail);
    }
}

struct Handle(Arc<Device>);

impl Handle {
    fn open(device: &Arc<Device>) -> Self {
        let live = device.live_handles.fetch_add(1, Ordering::SeqCst) + 1;
        device.max_live_handles.fetch_max(live, Ordering::SeqCst);
        Handle(device.clone())
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.0.live_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ReportSource for Handle {
    fn read_report(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ScannerError> {
        self.0.reads.fetch_add(1, Ordering::SeqCst);
        let step = self.0.steps.lock().pop_front();
        match step {
            Some(Step::Usage(usage)) => {
                buf[USAGE_OFFSET] = usage;
                Ok(8)
            }
            Some(Step::Fail) => Err(ScannerError::Read("I/O error".into())),
            None => {
                // Idle scanner: block for the whole timeout like a real read.
                sleep(timeout);
                Ok(0)
            }
        }
    }
}

struct Locator(Arc<Device>);

impl DeviceLocator for Locator {
    fn connect(&self, identity: DeviceIdentity) -> Result<Box<dyn ReportSource>, ScannerError> {
        self.0.connect_calls.fetch_add(1, Ordering::SeqCst);
        while self.0.hold_connect.load(Ordering::SeqCst) {
            sleep(Duration::from_millis(1));
        }
        if identity != SCANNER || !self.0.attached.load(Ordering::SeqCst) {
            return Err(ScannerError::NotFound(identity));
        }
        if self.0.deny_open.load(Ordering::SeqCst) {
            return Err(ScannerError::OpenFailed {
                identity,
                reason: "Permission denied".into(),
            });
        }
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(Handle::open(&self.0)))
    }

    fn describe(&self, identity: DeviceIdentity) -> Option<DeviceInfo> {
        (identity == SCANNER && self.0.attached.load(Ordering::SeqCst)).then(|| DeviceInfo {
            vendor_id: identity.vendor_id,
            product_id: identity.product_id,
            serial_number: Some("SN-0001".into()),
            product: Some("Test Scanner".into()),
        })
    }
}

fn service(device: &Arc<Device>) -> (UsbBarcodeService, Arc<ShutdownCoordinator>) {
    let coordinator = Arc::new(ShutdownCoordinator::new());
    let service = UsbBarcodeService::new(
        SCANNER,
        READ_TIMEOUT,
        Arc::new(Locator(device.clone())),
        coordinator.clone(),
    );
    (service, coordinator)
}

fn next_event(rx: &mut UnboundedReceiver<ScannerEvent>, within: Duration) -> Option<ScannerEvent> {
    let deadline = Instant::now() + within;
    loop {
        if let Ok(event) = rx.try_recv() {
            return Some(event);
        }
        if Instant::now() >= deadline {
            return None;
        }
        sleep(Duration::from_millis(5));
    }
}

fn wait_until(within: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn scanned_digits_are_published_once() {
    let device = Device::attached();
    let (service, _coordinator) = service(&device);
    let mut rx = service.subscribe();

    device.type_barcode("123");
    service.start_reading().unwrap();

    assert_eq!(
        next_event(&mut rx, Duration::from_secs(2)),
        Some(ScannerEvent::Scanned("123".into()))
    );
    assert_eq!(next_event(&mut rx, READ_TIMEOUT * 2), None);

    device.type_barcode("4567890");
    assert_eq!(
        next_event(&mut rx, Duration::from_secs(2)),
        Some(ScannerEvent::Scanned("4567890".into()))
    );
    service.stop_reading();
}

#[test]
fn second_start_is_a_no_op() {
    let device = Device::attached();
    let (service, coordinator) = service(&device);

    service.start_reading().unwrap();
    service.start_reading().unwrap();

    assert_eq!(device.connects.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.registered(), vec![SCAN_TASK_NAME.to_string()]);
    assert!(service.is_reading());
    assert_eq!(service.state(), ScanState::Reading);

    service.stop_reading();
    assert!(!service.is_reading());
    assert_eq!(service.state(), ScanState::Idle);
    assert!(coordinator.registered().is_empty());
}

#[test]
fn stop_when_stopped_returns_immediately() {
    let device = Device::attached();
    let (service, _coordinator) = service(&device);

    let start = Instant::now();
    service.stop_reading();
    service.stop_reading();
    assert!(start.elapsed() < READ_TIMEOUT);
}

#[test]
fn stop_keeps_the_handle_for_restart() {
    let device = Device::attached();
    let (service, _coordinator) = service(&device);

    service.start_reading().unwrap();
    service.stop_reading();
    service.start_reading().unwrap();
    service.stop_reading();

    assert_eq!(device.connects.load(Ordering::SeqCst), 1);
    assert_eq!(service.get_status(), ScannerStatus::Connected);
}

#[test]
fn missing_device_is_reported_not_raised() {
    let device = Arc::new(Device::default());
    let (service, coordinator) = service(&device);

    assert!(matches!(service.start_reading(), Err(ScannerError::NotFound(_))));
    assert_eq!(service.state(), ScanState::Idle);
    assert_eq!(service.get_status(), ScannerStatus::Disconnected);
    assert!(!service.is_connected());
    assert!(service.get_device_info().is_none());
    assert!(coordinator.registered().is_empty());

    device.attached.store(true, Ordering::SeqCst);
    service.start_reading().unwrap();
    assert!(service.is_reading());
    service.stop_reading();
}

#[test]
fn open_failure_counts_as_not_connected() {
    let device = Device::attached();
    device.deny_open.store(true, Ordering::SeqCst);
    let (service, _coordinator) = service(&device);

    let err = service.start_reading().unwrap_err();
    assert!(err.is_not_connected());
    assert_eq!(service.get_status(), ScannerStatus::Disconnected);
    // The registry entry is still visible for diagnostics.
    assert_eq!(
        service.get_device_info().and_then(|d| d.serial_number),
        Some("SN-0001".into())
    );
}

#[test]
fn read_error_stops_worker_until_restarted() {
    let device = Device::attached();
    let (service, coordinator) = service(&device);
    let mut rx = service.subscribe();

    device.steps.lock().push_back(Step::Usage(0x1e));
    device.fail_next_read();
    service.start_reading().unwrap();

    assert!(wait_until(Duration::from_secs(2), || !service.is_reading()));
    assert!(wait_until(Duration::from_secs(1), || service.state() == ScanState::Idle));
    assert!(coordinator.registered().is_empty());
    assert_eq!(next_event(&mut rx, READ_TIMEOUT), None);

    // The failed handle was closed, so restarting connects afresh.
    device.type_barcode("9");
    service.start_reading().unwrap();
    assert_eq!(device.connects.load(Ordering::SeqCst), 2);
    assert_eq!(
        next_event(&mut rx, Duration::from_secs(2)),
        Some(ScannerEvent::Scanned("9".into()))
    );
    service.stop_reading();
}

#[test]
fn shutdown_signal_ends_blocked_read_within_one_timeout() {
    let device = Device::attached();
    let (service, coordinator) = service(&device);

    service.start_reading().unwrap();
    assert!(wait_until(Duration::from_secs(1), || device.reads.load(Ordering::SeqCst) > 0));

    let start = Instant::now();
    coordinator.signal_shutdown();
    let report = coordinator.wait_for_shutdown(Duration::from_secs(5));
    let elapsed = start.elapsed();

    assert_eq!(report, ShutdownReport::Completed);
    assert!(elapsed < READ_TIMEOUT * 3, "took {:?}", elapsed);
    assert!(!service.is_reading());
    assert!(matches!(service.start_reading(), Err(ScannerError::ShuttingDown)));

    service.stop_reading();
    assert_eq!(service.state(), ScanState::Idle);
}

#[test]
fn stop_blocks_until_worker_exits() {
    let device = Device::attached();
    let (service, coordinator) = service(&device);

    service.start_reading().unwrap();
    let start = Instant::now();
    service.stop_reading();

    assert!(start.elapsed() < READ_TIMEOUT * 3);
    assert!(coordinator.registered().is_empty());
    assert_eq!(
        coordinator.wait_for_shutdown(Duration::from_secs(1)),
        ShutdownReport::NothingToWait
    );
}

#[test]
fn unplugged_parked_device_reports_disconnected() {
    let device = Device::attached();
    let (service, _coordinator) = service(&device);

    assert!(service.is_connected());
    device.attached.store(false, Ordering::SeqCst);
    assert_eq!(service.get_status(), ScannerStatus::Disconnected);
}

#[test]
fn status_probe_and_start_share_one_handle() {
    let device = Device::attached();
    device.hold_connect.store(true, Ordering::SeqCst);
    let (service, _coordinator) = service(&device);
    let service = Arc::new(service);

    let probe = {
        let service = service.clone();
        thread::spawn(move || service.is_connected())
    };
    assert!(wait_until(Duration::from_secs(1), || {
        device.connect_calls.load(Ordering::SeqCst) == 1
    }));

    let starter = {
        let service = service.clone();
        thread::spawn(move || service.start_reading())
    };
    sleep(READ_TIMEOUT / 2);
    device.hold_connect.store(false, Ordering::SeqCst);

    assert!(probe.join().unwrap());
    starter.join().unwrap().unwrap();
    assert!(service.is_reading());
    assert_eq!(device.connects.load(Ordering::SeqCst), 1);
    assert_eq!(device.max_live_handles.load(Ordering::SeqCst), 1);

    service.stop_reading();
    assert_eq!(device.live_handles.load(Ordering::SeqCst), 1);
}

#[test]
fn status_probe_waits_for_stop_to_park_the_handle() {
    let device = Device::attached();
    let (service, _coordinator) = service(&device);
    let service = Arc::new(service);

    service.start_reading().unwrap();
    let stopper = {
        let service = service.clone();
        thread::spawn(move || service.stop_reading())
    };
    // Races the stop: must see either the worker or its parked handle.
    assert!(service.is_connected());
    stopper.join().unwrap();

    assert_eq!(device.connects.load(Ordering::SeqCst), 1);
    assert_eq!(device.max_live_handles.load(Ordering::SeqCst), 1);
}

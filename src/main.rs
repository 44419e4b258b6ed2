// USB HID keyboard-emulating scanners (in most vendor guides "USB HID keyboard" or
// "USB KBW") report each scanned character as a boot-protocol keyboard report: a modifier
// byte, a reserved byte, then up to six usage codes. Digits 1-9,0 are usages 0x1E-0x27 and
// the scanner finishes every code with Enter (0x28).
//
// With direct USB access we read those reports ourselves. Without it (keyboard wedge) the
// same keystrokes arrive as text in the focused window and are fed to the service from there.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{info, warn};

use movie_scanner::config::DEFAULT_CONFIG_FILE;
use movie_scanner::device::HidLocator;
use movie_scanner::lookup::retry_candidate;
use movie_scanner::tools::{find_attached_devices, initialize_logging};
use movie_scanner::{
    build_service, AcquisitionMode, BarcodeService, ScannerConfig, ScannerEvent,
    ShutdownCoordinator,
};

/// Event poll interval of the main loop.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(name = "movie-scanner", version, about = "Barcode scanner service for the movie catalogue")]
struct Cli {
    /// Config file (TOML)
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log as JSON lines
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read barcodes until interrupted
    Run {
        /// Override the configured acquisition mode
        #[arg(long, value_enum)]
        mode: Option<AcquisitionMode>,

        /// Seconds between connection attempts while the scanner is missing
        #[arg(long, default_value_t = 5)]
        retry_secs: u64,
    },
    /// Print scanner status and device info
    Status,
    /// List attached HID devices
    Devices,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    initialize_logging(cli.json);
    info!("Starting movie scanner.");

    let mut config = ScannerConfig::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    match cli.command {
        Command::Run { mode, retry_secs } => {
            if let Some(mode) = mode {
                config.mode = mode;
            }
            run(&config, Duration::from_secs(retry_secs))
        }
        Command::Status => status(&config),
        Command::Devices => devices(&config),
    }
}

fn run(config: &ScannerConfig, retry: Duration) -> Result<()> {
    let coordinator = ShutdownCoordinator::global();
    {
        let coordinator = coordinator.clone();
        ctrlc::set_handler(move || coordinator.signal_shutdown())
            .context("Failed to install Ctrl-C handler")?;
    }

    let service: Arc<dyn BarcodeService> = Arc::from(build_service(config, coordinator.clone()));
    let mut events = service.subscribe();

    if config.mode == AcquisitionMode::KeyboardWedge {
        spawn_stdin_feeder(service.clone())?;
    }

    let mut next_attempt = Instant::now();
    while !coordinator.is_shutdown_requested() {
        if !service.is_reading() && Instant::now() >= next_attempt {
            match service.start_reading() {
                Ok(()) => info!("Scanner status: {}", service.get_status()),
                Err(e) => info!("Scanner unavailable: {}. Retrying in {:?}.", e, retry),
            }
            next_attempt = Instant::now() + retry;
        }

        match events.try_recv() {
            Ok(ScannerEvent::Scanned(barcode)) => {
                println!("{}", barcode);
                if let Some(alt) = retry_candidate(&barcode, config.retry_without_leading_eight) {
                    info!("If {} is not found, retry as {}.", barcode, alt);
                }
            }
            Ok(ScannerEvent::StatusChanged(status)) => info!("Scanner status: {}", status),
            Err(TryRecvError::Empty) => sleep(POLL_INTERVAL),
            Err(TryRecvError::Disconnected) => break,
        }
    }

    let report = coordinator.wait_for_shutdown(config.shutdown_timeout());
    info!("Shutdown: {:?}", report);
    service.stop_reading();
    Ok(())
}

/// Forward stdin to the wedge service a line at a time, each line followed
/// by the Enter a scanner sends.
fn spawn_stdin_feeder(service: Arc<dyn BarcodeService>) -> Result<()> {
    std::thread::Builder::new()
        .name("stdin-wedge".into())
        .spawn(move || {
            forward_lines(std::io::stdin().lock(), &*service);
            warn!("stdin closed; no more keyboard-wedge input.");
        })
        .context("Failed to spawn stdin reader")?;
    Ok(())
}

fn forward_lines(reader: impl BufRead, service: &dyn BarcodeService) {
    for line in reader.lines() {
        match line {
            Ok(line) => {
                if !line.is_empty() {
                    service.handle_text_input(&line);
                }
                service.handle_text_input("\n");
            }
            Err(e) => {
                warn!("Unreadable keyboard-wedge input: {}", e);
                break;
            }
        }
    }
}

fn status(config: &ScannerConfig) -> Result<()> {
    let service = build_service(config, Arc::new(ShutdownCoordinator::new()));
    println!("Status: {}", service.get_status());
    match service.get_device_info() {
        Some(info) => println!("Device: {}", info),
        None => println!("Device: none"),
    }
    Ok(())
}

fn devices(config: &ScannerConfig) -> Result<()> {
    let identity = config.identity();
    let locator = HidLocator::new();
    for (device, is_scanner) in find_attached_devices(&locator, identity)? {
        println!(
            "{} {}{}",
            device,
            device.product.as_deref().unwrap_or("NA"),
            if is_scanner { "  <- configured scanner" } else { "" }
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdin_lines_keep_multibyte_characters() {
        let config = ScannerConfig::from_toml_str("mode = \"keyboard-wedge\"").unwrap();
        let service = build_service(&config, Arc::new(ShutdownCoordinator::new()));
        service.start_reading().unwrap();
        let mut rx = service.subscribe();

        forward_lines("Amélie-8712\r\n\n4006\n".as_bytes(), &*service);

        assert_eq!(rx.try_recv().unwrap(), ScannerEvent::Scanned("Amélie-8712".into()));
        assert_eq!(rx.try_recv().unwrap(), ScannerEvent::Scanned("4006".into()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn invalid_utf8_stops_forwarding() {
        let config = ScannerConfig::from_toml_str("mode = \"keyboard-wedge\"").unwrap();
        let service = build_service(&config, Arc::new(ShutdownCoordinator::new()));
        service.start_reading().unwrap();
        let mut rx = service.subscribe();

        forward_lines(&b"12\n\xff\xfe\n34\n"[..], &*service);

        assert_eq!(rx.try_recv().unwrap(), ScannerEvent::Scanned("12".into()));
        assert!(rx.try_recv().is_err());
    }
}

//! usb-scan Server
//!
//! Drives USB document scanners over their vendor protocol and serves the
//! scans over a small HTTP API.

mod config;
mod http;
mod scanner;
mod storage;
mod usb;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::{DeviceDescriptor, ScanBridge, ScanJob, create_scan_bridge, setup_logging};
use scanner::DeviceRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use storage::AttachmentStore;
use tokio::signal;
use tracing::{error, info};
use usb::spawn_scan_worker;

#[derive(Parser, Debug)]
#[command(name = "usb-scan-server")]
#[command(
    author,
    version,
    about = "USB scanner server - scan documents over HTTP"
)]
#[command(long_about = "
Talks to USB document scanners (Brother and Lenovo) and exposes them over a
small HTTP API. Scans are stored as attachments and can be downloaded later.

EXAMPLES:
    # Run with default config
    usb-scan-server

    # Run with custom config
    usb-scan-server --config /path/to/config.toml

    # List USB devices without starting server
    usb-scan-server --list-devices

    # Scan once into a file using the configured defaults
    usb-scan-server --scan page.jpg --device 04f9:60a0

    # Run with debug logging
    usb-scan-server --log-level debug

CONFIGURATION:
    The server looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usb-scan/server.toml
    3. /etc/usb-scan/server.toml
    4. Built-in defaults

    The PORT environment variable overrides the listening port.
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List USB devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Address to listen on, overrides the config file
    #[arg(short, long, value_name = "ADDR")]
    bind: Option<String>,

    /// Scan once into OUTPUT and exit
    #[arg(long, value_name = "OUTPUT")]
    scan: Option<PathBuf>,

    /// Device for --scan as VID:PID, defaults to the first attached device
    #[arg(long, value_name = "VID:PID", requires = "scan")]
    device: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = config::ServerConfig::default();
        let path = config::ServerConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        config::ServerConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        config::ServerConfig::load_or_default()
    };
    if let Some(bind) = args.bind.clone() {
        config.server.bind_addr = bind;
    }

    // CLI log level wins over the config value
    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.server.log_level.clone());

    setup_logging(&log_level, config.server.log_format).context("Failed to setup logging")?;

    info!("usb-scan Server v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    // All blocking USB work runs on the worker thread
    let (bridge, worker) = create_scan_bridge();
    let worker_handle = spawn_scan_worker(
        worker,
        DeviceRegistry::with_default_drivers(),
        config.scanner.driver_settings(),
    )
    .context("Failed to spawn scan worker thread")?;

    let result = if args.list_devices {
        list_devices_mode(&bridge).await
    } else if let Some(output) = args.scan.clone() {
        scan_once(&bridge, &config, output, args.device.as_deref()).await
    } else {
        run_server(&config, bridge.clone()).await
    };

    info!("Shutting down scan worker...");
    if let Err(e) = bridge.shutdown().await {
        error!("Error shutting down scan worker: {:#}", e);
    }
    if let Err(e) = worker_handle.join() {
        error!("Scan worker thread panicked: {:?}", e);
    }

    result
}

/// List USB devices and exit
async fn list_devices_mode(bridge: &ScanBridge) -> Result<()> {
    info!("Listing USB devices...");

    let devices = bridge
        .list_devices()
        .await
        .context("Failed to list devices")?;

    if devices.is_empty() {
        println!("No USB devices found.");
    } else {
        println!("Found {} USB device(s):\n", devices.len());
        for device in devices {
            println!("  {}", device);
        }
    }

    Ok(())
}

/// Run one scan with the configured defaults
async fn scan_once(
    bridge: &ScanBridge,
    config: &config::ServerConfig,
    output: PathBuf,
    device: Option<&str>,
) -> Result<()> {
    let device = match device {
        Some(pair) => DeviceDescriptor::from_pair(pair).context("Invalid --device")?,
        None => first_device(bridge).await?,
    };

    info!("Scanning from {} into {}", device, output.display());
    let report = bridge
        .scan(ScanJob {
            device,
            options: config.defaults,
            output,
        })
        .await
        .context("Scan failed")?;

    println!(
        "Wrote {} bytes to {}",
        report.bytes_written,
        report.output.display()
    );
    Ok(())
}

async fn first_device(bridge: &ScanBridge) -> Result<DeviceDescriptor> {
    bridge
        .list_devices()
        .await
        .context("Failed to list devices")?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("No USB device found"))
}

/// Serve the HTTP API until Ctrl+C
async fn run_server(config: &config::ServerConfig, bridge: ScanBridge) -> Result<()> {
    let addr = config.bind_addr()?;
    let attachment_dir = config.storage.attachment_path();
    let store = AttachmentStore::new(&attachment_dir).with_context(|| {
        format!(
            "Failed to open attachment directory: {}",
            attachment_dir.display()
        )
    })?;
    info!("Storing scans in {}", attachment_dir.display());

    let state = http::AppState {
        bridge,
        store: Arc::new(store),
        defaults: config.defaults,
    };

    info!("Press Ctrl+C to shutdown");
    http::serve(addr, state, async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
            Err(e) => error!("Error waiting for Ctrl+C: {}", e),
        }
    })
    .await
}

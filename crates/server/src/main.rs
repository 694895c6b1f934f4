//! usbip-server
//!
//! Exports a local USB device to USB/IP clients over TCP.

use anyhow::{Context, Result};
use clap::Parser;
use common::setup_logging;
use server::config::{self, ConfigOrigin, ServerConfig};
use server::network::UsbIpServer;
use server::usb::RusbController;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "usbip-server")]
#[command(author, version, about = "USB/IP server - export a local USB device over TCP")]
#[command(long_about = "
Exports a locally attached USB device to USB/IP clients. A client lists the
exported device, imports it by bus id (usb0, usb1, ...) and then drives it
with USB requests forwarded over the connection.

EXAMPLES:
    # Run with default config
    usbip-server

    # Run with custom config
    usbip-server --config /path/to/server.toml

    # Listen on another address
    usbip-server --bind 127.0.0.1:3240

    # List exportable USB devices and their unit numbers
    usbip-server --list-devices

CONFIGURATION:
    The server looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usbip-server/server.toml
    3. /etc/usbip-server/server.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Listen address (overrides the config file)
    #[arg(short, long, value_name = "ADDR")]
    bind: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List exportable USB devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = ServerConfig::default();
        let path = ServerConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let (mut config, origin) = if let Some(ref path) = args.config {
        let path = config::expand_path(path);
        let config = ServerConfig::load(Some(path.clone()))
            .context("Failed to load configuration")?;
        (config, ConfigOrigin::File(path))
    } else {
        ServerConfig::load_or_default()
    };

    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.server.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usbip-server v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);
    match origin {
        ConfigOrigin::File(path) => info!("Loaded configuration from: {}", path.display()),
        ConfigOrigin::Defaults => info!("No configuration file found, using defaults"),
        ConfigOrigin::Fallback(e) => warn!("Failed to load config: {:#}, using defaults", e),
    }

    let host = RusbController::new(config.usb.filters.clone(), config.usb.transfer_timeout())
        .context("Failed to initialize libusb")?;

    if args.list_devices {
        return list_devices_mode(&host);
    }

    let bind_addr = config.bind_addr()?;
    let server = UsbIpServer::bind(
        bind_addr,
        config.server.backlog,
        host,
        config.usb.list_unit.clone(),
    )
    .await
    .context("Failed to start USB/IP listener")?;

    info!("Exporting unit {} as usb{}", config.usb.list_unit, config.usb.list_unit);
    info!("Press Ctrl+C to shutdown");

    server
        .run_until(async {
            match signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C, shutting down..."),
                Err(e) => error!("Error waiting for Ctrl+C: {}", e),
            }
        })
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// List exportable USB devices and exit
fn list_devices_mode(host: &RusbController) -> Result<()> {
    let devices = host.list_devices().context("Failed to enumerate USB devices")?;

    if devices.is_empty() {
        println!("No USB devices found.");
    } else {
        println!("Found {} USB device(s):\n", devices.len());
        for device in devices {
            println!(
                "  [usb{}] {:04x}:{:04x} class {:#04x}",
                device.unit, device.vendor_id, device.product_id, device.class
            );
            println!(
                "      Bus {:03} Device {:03}",
                device.bus_number, device.address
            );
        }
    }

    Ok(())
}

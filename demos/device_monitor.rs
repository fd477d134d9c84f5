//! Live device monitor.
//!
//! Demonstrates:
//! - Building a manager from environment variables
//! - Lifecycle events on the event bus
//! - Raw subscriptions and a polling `DeviceMonitor`
//!
//! Usage:
//!   cargo run --example device_monitor -- 7 boiler-2
//!   cargo run --example device_monitor -- 7 --debug
//!   cargo run --example device_monitor -- 7 --token-file ./token
//!
//! Environment:
//!   TELEMETRY_WS_URL                  gateway URL (default ws://127.0.0.1/ws)
//!   TELEMETRY_QUEUE_CAPACITY          outbound queue size
//!   TELEMETRY_RECONNECT_MAX_ATTEMPTS  reconnect budget
//!   TELEMETRY_HEARTBEAT_INTERVAL_MS   heartbeat period
//!   TELEMETRY_HEARTBEAT_TIMEOUT_MS    pong deadline

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use anyhow::{Context, bail};
use telemetry_link::auth::FileToken;
use telemetry_link::config::ClientOptions;
use telemetry_link::{ClientEvent, ConnectionManager, DeviceMonitor};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

const REPORT_INTERVAL: Duration = Duration::from_secs(5);

// ============================================================================
// Args
// ============================================================================

#[derive(Debug)]
struct Args {
    devices: Vec<String>,
    token_file: Option<String>,
    debug: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = Self {
            devices: Vec::new(),
            token_file: None,
            debug: false,
        };

        let mut raw = std::env::args().skip(1);
        while let Some(arg) = raw.next() {
            match arg.as_str() {
                "--debug" => args.debug = true,
                "--token-file" => args.token_file = raw.next(),
                _ => args.devices.push(arg),
            }
        }
        args
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    if args.devices.is_empty() {
        bail!("usage: device_monitor <device-id>... [--token-file PATH] [--debug]");
    }

    println!("=== Device Monitor ===\n");

    // ========================================================================
    // Build Manager
    // ========================================================================

    let options = ClientOptions::from_env().context("reading environment")?;
    println!("[1] Connecting to {}...", options.url);

    let mut builder = ConnectionManager::builder().options(options);
    if let Some(path) = &args.token_file {
        builder = builder.token_source(FileToken::new(path));
    }
    let manager = builder.build().context("starting connection manager")?;

    manager.on("ws:connected", |_| println!("    ✓ Connected"));
    manager.on("ws:disconnected", |event| {
        if let ClientEvent::Disconnected { code, reason } = event {
            println!("    ✗ Disconnected ({code}: {reason})");
        }
    });
    manager.on("ws:reconnecting", |event| {
        if let ClientEvent::Reconnecting { attempt, delay } = event {
            println!("    … Reconnect #{attempt} in {delay:?}");
        }
    });
    manager.on("ws:reconnect_failed", |_| println!("    ✗ Gave up reconnecting"));

    // ========================================================================
    // Subscribe
    // ========================================================================

    println!("[2] Subscribing to {} device(s)...\n", args.devices.len());

    let mut monitors = Vec::with_capacity(args.devices.len());
    for device in &args.devices {
        monitors.push(DeviceMonitor::new(&manager, device.as_str())?);
    }

    // ========================================================================
    // Report
    // ========================================================================

    let mut ticker = tokio::time::interval(REPORT_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => report(&manager, &monitors),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    println!("\n[Cleanup] Closing...");
    for mut monitor in monitors {
        monitor.close();
    }
    manager.disconnect();
    println!("          ✓ Done");

    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn init_logging(debug: bool) {
    let filter = if debug {
        "telemetry_link=debug"
    } else {
        "telemetry_link=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

fn report(manager: &ConnectionManager, monitors: &[DeviceMonitor]) {
    let status = manager.status();
    println!(
        "[{}] queued={} subscribers={}",
        status.state, status.queue_len, status.subscriber_count
    );

    for monitor in monitors {
        let points = monitor.points();
        if points.is_empty() {
            println!("    {:<12} (no data)", monitor.device_id());
            continue;
        }
        for point in points {
            println!(
                "    {:<12} {:<16} {}",
                monitor.device_id(),
                point.point_code,
                point.value
            );
        }
    }
}

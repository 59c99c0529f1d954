//! radarlink CLI
//!
//! Connects to a sensor server (or the built-in mock), runs one session and
//! logs a summary of the received frames.

use anyhow::{Context, Result, bail};
use clap::Parser;
use client::config::{ClientConfig, parse_usb_id};
use client::{Client, open_default_client};
use common::setup_logging;
use link::{DeviceDiscovery, SystemDiscovery};
use protocol::{ExtendedResult, SensorId};
use std::path::PathBuf;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "radarlink")]
#[command(author, version, about = "radarlink - Stream results from a radar sensor server")]
#[command(long_about = "
Host-side client for radar sensor servers reachable over TCP, serial or USB.
Sets up a single-sensor session, streams a number of frames and reports what
arrived.

EXAMPLES:
    # Auto-detect a connected module
    radarlink

    # Stream 50 frames from the mock server
    radarlink --mock --frames 50

    # Connect over TCP
    radarlink --ip 192.168.1.20

    # Serial port with the worker thread
    radarlink --serial-port /dev/ttyUSB0 --serial-worker

    # List recognized devices
    radarlink --list-devices

CONFIGURATION:
    The client looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/radarlink/client.toml
    3. /etc/radarlink/client.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Server IP address
    #[arg(long, value_name = "ADDR")]
    ip: Option<String>,

    /// Server TCP port
    #[arg(long, value_name = "PORT")]
    port: Option<u16>,

    /// Serial port of the module
    #[arg(long, value_name = "PATH")]
    serial_port: Option<String>,

    /// Drive the serial port from a worker thread
    #[arg(long)]
    serial_worker: bool,

    /// USB module as vid:pid in hex
    #[arg(long, value_name = "VID:PID")]
    usb: Option<String>,

    /// Use the built-in mock server
    #[arg(long)]
    mock: bool,

    /// Number of frames to stream
    #[arg(short = 'n', long, default_value_t = 10)]
    frames: usize,

    /// Sensor to configure
    #[arg(short, long, value_name = "ID")]
    sensor: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// List recognized devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = ClientConfig::default();
        let path = ClientConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    // Load configuration first (to get log level from config if not specified)
    let mut config = if let Some(ref path) = args.config {
        ClientConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        ClientConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.client.log_level.clone());
    setup_logging(&log_level).context("Failed to setup logging")?;

    info!("radarlink v{}", env!("CARGO_PKG_VERSION"));
    debug!("Log level: {}", log_level);

    if args.list_devices {
        return list_devices(&SystemDiscovery);
    }

    apply_overrides(&mut config, &args)?;
    config.validate().context("Invalid configuration")?;

    run_session(&config, args.frames)
}

/// Command-line connection flags replace the configured connection
fn apply_overrides(config: &mut ClientConfig, args: &Args) -> Result<()> {
    let connection_given = args.ip.is_some()
        || args.serial_port.is_some()
        || args.usb.is_some()
        || args.mock;
    if connection_given {
        config.connection = Default::default();
    }

    if let Some(ip) = &args.ip {
        config.connection.ip = Some(ip.clone());
    }
    if let Some(port) = args.port {
        config.connection.port = Some(port);
    }
    if let Some(serial_port) = &args.serial_port {
        config.connection.serial_port = Some(serial_port.clone());
    }
    if args.serial_worker {
        config.connection.serial_worker = true;
    }
    if let Some(usb) = &args.usb {
        let (vid, pid) = parse_usb_id(usb)?;
        config.connection.usb_vid = Some(vid);
        config.connection.usb_pid = Some(pid);
    }
    if args.mock {
        config.connection.mock = true;
    }
    if let Some(sensor) = args.sensor {
        config.session.sensor_id = sensor;
    }
    Ok(())
}

fn list_devices(discovery: &dyn DeviceDiscovery) -> Result<()> {
    let usb = discovery
        .usb_devices()
        .context("Failed to enumerate USB devices")?;
    let serial = discovery
        .serial_devices()
        .context("Failed to enumerate serial ports")?;

    println!("USB devices:");
    if usb.is_empty() {
        println!("  (none)");
    }
    for device in &usb {
        println!("  {}", device);
    }

    println!("Serial ports:");
    if serial.is_empty() {
        println!("  (none)");
    }
    for port in &serial {
        let marker = if port.recognized { "*" } else { " " };
        println!(" {} {}", marker, port);
    }
    Ok(())
}

fn run_session(config: &ClientConfig, frames: usize) -> Result<()> {
    let info = config.to_client_info();
    let mut client = open_default_client(&info).context("Failed to open client")?;

    let server = client.server_info();
    info!(
        "Server {} on {} ({} sensor(s) connected)",
        server.system.rss_version,
        server.system.hw.as_deref().unwrap_or("unknown hardware"),
        server.connected_sensors().len()
    );

    let outcome = stream_frames(client.as_mut(), config, frames);
    if let Err(e) = client.close() {
        warn!("Failed to close client: {}", e);
    }
    outcome
}

fn stream_frames(client: &mut dyn Client, config: &ClientConfig, frames: usize) -> Result<()> {
    let sensor_id = SensorId(config.session.sensor_id);
    let metadata = client
        .setup_session(config.session_config(), None)
        .context("Failed to set up session")?;
    let Some(meta) = metadata.first().and_then(|group| group.get(&sensor_id)) else {
        bail!("Server returned no metadata for sensor {}", sensor_id);
    };
    info!(
        "Session set up: {} point(s) per sweep, {} per frame",
        meta.sweep_data_length, meta.frame_data_length
    );

    client.start_session().context("Failed to start session")?;

    let mut summary = Summary::default();
    for _ in 0..frames {
        let result = client.get_next().context("Failed to receive result")?;
        summary.add(&result, sensor_id);
    }

    client.stop_session().context("Failed to stop session")?;
    summary.report(sensor_id);
    Ok(())
}

#[derive(Debug, Default)]
struct Summary {
    frames: usize,
    first_tick_time: Option<f64>,
    last_tick_time: f64,
    peak_amplitude: f64,
    saturated: usize,
    delayed: usize,
}

impl Summary {
    fn add(&mut self, result: &ExtendedResult, sensor_id: SensorId) {
        let Some(sensor) = result.first().and_then(|group| group.get(&sensor_id)) else {
            return;
        };
        self.frames += 1;
        self.first_tick_time.get_or_insert(sensor.tick_time);
        self.last_tick_time = sensor.tick_time;
        self.saturated += usize::from(sensor.data_saturated);
        self.delayed += usize::from(sensor.frame_delayed);
        let peak = sensor
            .frame
            .iter()
            .map(|s| s.amplitude())
            .fold(0.0, f64::max);
        self.peak_amplitude = self.peak_amplitude.max(peak);
        debug!("Frame at {:.3} s, peak amplitude {:.0}", sensor.tick_time, peak);
    }

    fn report(&self, sensor_id: SensorId) {
        let span = self.last_tick_time - self.first_tick_time.unwrap_or(self.last_tick_time);
        let rate = if span > 0.0 && self.frames > 1 {
            (self.frames - 1) as f64 / span
        } else {
            0.0
        };
        info!(
            "Sensor {}: {} frame(s) over {:.2} s ({:.1} Hz), peak amplitude {:.0}, {} saturated, {} delayed",
            sensor_id, self.frames, span, rate, self.peak_amplitude, self.saturated, self.delayed
        );
    }
}

//! Client configuration management

use anyhow::{Context, Result, anyhow};
use common::{ClientInfo, SerialInfo, SocketInfo, UsbInfo};
use protocol::{Prf, Profile, SensorConfig, SensorId, SessionConfig, SubsweepConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub client: ClientSettings,
    #[serde(default)]
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub session: SessionSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSettings {
    pub log_level: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Where the server lives
///
/// At most one transport may be named. Leaving all of them out makes the
/// client auto-detect a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Server address for a TCP connection
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Serial device path (e.g., "/dev/ttyUSB0")
    #[serde(default)]
    pub serial_port: Option<String>,
    #[serde(default)]
    pub flow_control: bool,
    /// Baudrate to negotiate instead of the server maximum
    #[serde(default)]
    pub override_baudrate: Option<u32>,
    /// Run serial I/O on a dedicated worker thread
    #[serde(default)]
    pub serial_worker: bool,
    #[serde(default)]
    pub usb_vid: Option<u16>,
    #[serde(default)]
    pub usb_pid: Option<u16>,
    #[serde(default)]
    pub usb_serial: Option<String>,
    /// Use the built-in mock instead of hardware
    #[serde(default)]
    pub mock: bool,
}

/// Single-sensor session used by the CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub sensor_id: u32,
    #[serde(default)]
    pub update_rate: Option<f64>,
    pub start_point: i32,
    pub num_points: u32,
    pub step_length: u32,
    pub sweeps_per_frame: u32,
    pub hwaas: u32,
    #[serde(default)]
    pub profile: Profile,
    #[serde(default)]
    pub prf: Prf,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let subsweep = SubsweepConfig::default();
        Self {
            sensor_id: 1,
            update_rate: Some(10.0),
            start_point: subsweep.start_point,
            num_points: subsweep.num_points,
            step_length: subsweep.step_length,
            sweeps_per_frame: 1,
            hwaas: subsweep.hwaas,
            profile: subsweep.profile,
            prf: subsweep.prf,
        }
    }
}

impl ConnectionSettings {
    /// Number of transports named
    fn transport_count(&self) -> usize {
        [
            self.ip.is_some(),
            self.serial_port.is_some(),
            self.usb_vid.is_some() || self.usb_pid.is_some(),
            self.mock,
        ]
        .iter()
        .filter(|&&set| set)
        .count()
    }
}

impl ClientConfig {
    /// Connection descriptor for these settings
    pub fn to_client_info(&self) -> ClientInfo {
        let c = &self.connection;
        if c.mock {
            return ClientInfo::mock();
        }
        ClientInfo {
            socket: c.ip.as_ref().map(|ip| SocketInfo {
                ip: ip.clone(),
                tcp_port: c.port,
            }),
            serial: c.serial_port.as_ref().map(|port| SerialInfo {
                port: shellexpand::tilde(port).into_owned(),
                flow_control: c.flow_control,
                override_baudrate: c.override_baudrate,
                worker: c.serial_worker,
            }),
            usb: (c.usb_vid.is_some() || c.usb_pid.is_some()).then(|| UsbInfo {
                vid: c.usb_vid,
                pid: c.usb_pid,
                serial: c.usb_serial.clone(),
                mock: false,
            }),
        }
    }

    /// Session configuration for the configured sensor
    pub fn session_config(&self) -> SessionConfig {
        let s = &self.session;
        let sensor = SensorConfig {
            sweeps_per_frame: s.sweeps_per_frame,
            subsweeps: vec![SubsweepConfig {
                start_point: s.start_point,
                num_points: s.num_points,
                step_length: s.step_length,
                profile: s.profile,
                hwaas: s.hwaas,
                prf: s.prf,
                ..Default::default()
            }],
            ..Default::default()
        };
        let config = SessionConfig::single(SensorId(s.sensor_id), sensor);
        match s.update_rate {
            Some(rate) => config.with_update_rate(rate),
            None => config,
        }
    }

    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref())
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/radarlink/client.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: ClientConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        tracing::debug!("Connection: {}", config.to_client_info());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                // Print to stderr since logging might not be initialized yet
                eprintln!("Config: {}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("radarlink").join("client.toml")
        } else {
            PathBuf::from(".config/radarlink/client.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.client.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.client.log_level,
                valid_levels.join(", ")
            ));
        }

        let transports = self.connection.transport_count();
        if transports > 1 {
            return Err(anyhow!(
                "[connection] names {} transports, expected at most one",
                transports
            ));
        }
        if self.connection.usb_vid.is_some() != self.connection.usb_pid.is_some() {
            return Err(anyhow!("usb_vid and usb_pid must be given together"));
        }

        self.session_config()
            .validate()
            .context("Invalid [session] settings")?;
        Ok(())
    }
}

/// Parse a "vid:pid" pair of hex numbers (e.g., "0483:a41d")
pub fn parse_usb_id(value: &str) -> Result<(u16, u16)> {
    let (vid, pid) = value
        .split_once(':')
        .ok_or_else(|| anyhow!("Expected vid:pid, got '{}'", value))?;
    let parse = |part: &str| {
        u16::from_str_radix(part.trim_start_matches("0x"), 16)
            .with_context(|| format!("Invalid USB id '{}'", part))
    };
    Ok((parse(vid)?, parse(pid)?))
}

//! Session configuration, read from a [ron] file or built from defaults.
//!
//! A complete file looks like this (every field may be left out, in which
//! case its default is used):
//!
//! ```text
//! (
//!     folder: "test1",
//!     poll_interval_ms: 50,
//!     shutdown_timeout_ms: 2000,
//!     queue: Unbounded,
//!     devices: [
//!         (name: "gps1", kind: Position, port: "/dev/ttyUSB0", baud: 9600,
//!          init_commands: ["UNLOGALL", "LOG BESTXYZA ONTIME 0.05"]),
//!         (name: "razor1", kind: Inertial, port: "/dev/ttyUSB2", baud: 57600,
//!          sensor_id: 1),
//!     ],
//! )
//! ```

use crate::reading::ReadingKind;
use crate::reading_queue::QueuePolicy;

use serde::{Deserialize, Serialize};
use std::{borrow::Cow, collections::HashSet, fmt, fs, path::Path, time::Duration};

/// Everything needed to start a logging session.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Sub-directory of the data root the logs go into
    pub folder: String,
    /// How long an idle writer waits before re-checking for shutdown
    pub poll_interval_ms: u64,
    /// How long a driver gets to stop before it is abandoned
    pub shutdown_timeout_ms: u64,
    /// Overflow policy shared by every device queue
    pub queue: QueuePolicy,
    /// Devices, in start and stop order
    pub devices: Vec<DeviceConfig>,
}

/// One device and how to reach it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DeviceConfig {
    /// Also the log file name, `<name>.csv`
    pub name: String,
    /// Which schema, and so which decoder, the device uses
    pub kind: ReadingKind,
    /// Serial port path
    pub port: String,
    /// Serial line speed
    #[serde(default = "DeviceConfig::default_baud")]
    pub baud: u32,
    /// Written into the ID column of inertial logs
    #[serde(default = "DeviceConfig::default_sensor_id")]
    pub sensor_id: u32,
    /// Sent to the device, one per line, once logging is up
    #[serde(default)]
    pub init_commands: Vec<String>,
}

impl DeviceConfig {
    fn default_baud() -> u32 {
        9600
    }

    fn default_sensor_id() -> u32 {
        1
    }

    fn receiver(name: &str, port: &str) -> Self {
        Self {
            name: name.to_owned(),
            kind: ReadingKind::Position,
            port: port.to_owned(),
            baud: 9600,
            sensor_id: 1,
            init_commands: vec![
                "UNLOGALL".to_owned(),
                "LOG BESTXYZA ONTIME 0.05".to_owned(),
            ],
        }
    }

    fn imu(name: &str, port: &str) -> Self {
        Self {
            name: name.to_owned(),
            kind: ReadingKind::Inertial,
            port: port.to_owned(),
            baud: 57600,
            sensor_id: 1,
            init_commands: vec!["#o1".to_owned(), "#ox".to_owned()],
        }
    }
}

impl Default for SessionConfig {
    /// Two receivers and one inertial unit on the first three USB serial
    /// adapters.
    fn default() -> Self {
        Self {
            folder: "test1".to_owned(),
            poll_interval_ms: 50,
            shutdown_timeout_ms: 2000,
            queue: QueuePolicy::Unbounded,
            devices: vec![
                DeviceConfig::receiver("gps1", "/dev/ttyUSB0"),
                DeviceConfig::receiver("gps2", "/dev/ttyUSB1"),
                DeviceConfig::imu("razor1", "/dev/ttyUSB2"),
            ],
        }
    }
}

/// Returned when a configuration cannot be read or makes no sense.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read
    IoError(std::io::Error),

    /// The file is not valid RON for a [SessionConfig]
    RonSpannedError(ron::de::SpannedError),

    /// The file parsed, but a value is unusable
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ConfigError as CE;
        let msg = match self {
            CE::IoError(error) => Cow::from(format!("io error: {}", error)),
            CE::RonSpannedError(error) => Cow::from(format!("ron error: {}", error)),
            CE::Invalid(why) => Cow::from(format!("invalid configuration: {}", why)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for ConfigError {}

impl SessionConfig {
    /// Reads and validates a configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(ConfigError::IoError)?;
        Self::from_ron(&text)
    }

    /// Parses and validates a configuration.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::de::from_str(text).map_err(ConfigError::RonSpannedError)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings a session cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::Invalid("no devices".to_owned()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be positive".to_owned(),
            ));
        }
        if let QueuePolicy::DropNewest { capacity: 0 } = self.queue {
            return Err(ConfigError::Invalid(
                "queue capacity must be positive".to_owned(),
            ));
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            if device.name.is_empty() {
                return Err(ConfigError::Invalid("device with no name".to_owned()));
            }
            if !seen.insert(device.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "device {} listed twice",
                    device.name
                )));
            }
        }
        Ok(())
    }

    /// [poll_interval_ms](Self::poll_interval_ms) as a [Duration].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// [shutdown_timeout_ms](Self::shutdown_timeout_ms) as a [Duration].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// The device called `name`, if it is configured.
    pub fn device_mut(&mut self, name: &str) -> Option<&mut DeviceConfig> {
        self.devices.iter_mut().find(|d| d.name == name)
    }
}

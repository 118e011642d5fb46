//! Commandline argument parser using clap for the sensor logger

use crate::config::SessionConfig;
use crate::reading_queue::QueuePolicy;

use clap::{Parser, ValueEnum};
use log::LevelFilter;
use std::path::PathBuf;

/// Flags of the `sensorlog` binary.
#[derive(Debug, Parser, Clone)]
#[clap(version, about = "Logger for two GPS receivers and a razor device")]
pub struct LoggerArgs {
    /// RON file describing the session; the flags below override it
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Serial port of the first positioning receiver
    #[arg(long = "gps1-port")]
    pub gps1_port: Option<String>,

    /// Serial port of the second positioning receiver
    #[arg(long = "gps2-port")]
    pub gps2_port: Option<String>,

    /// Serial port of the inertial unit
    #[arg(long = "razor-port")]
    pub razor_port: Option<String>,

    /// Folder, under the data root, the logs are written to
    #[arg(short = 'f', long = "folder")]
    pub folder: Option<String>,

    /// Directory the session folder is created in
    #[arg(long = "data-root", default_value = "data")]
    pub data_root: PathBuf,

    /// Log file for diagnostics, relative to the session folder
    #[arg(long = "log", default_value = "sensorlog.log")]
    pub log: PathBuf,

    /// Diagnostic verbosity
    #[arg(long = "log-level", value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// How long an idle writer waits before re-checking for shutdown, in ms
    #[arg(long = "poll-ms")]
    pub poll_ms: Option<u64>,

    /// Cap each device queue at this many readings, dropping the overflow
    #[arg(long = "queue-capacity")]
    pub queue_capacity: Option<usize>,

    /// Make readings up instead of talking to hardware
    #[arg(long = "simulate")]
    pub simulate: bool,

    /// Readings per second per device when simulating
    #[arg(long = "rate", default_value_t = 20.0)]
    pub rate: f64,
}

/// The levels offered on the command line.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warning => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

impl LoggerArgs {
    /// Overrides the fields of `config` that were given on the command line.
    pub fn apply(&self, config: &mut SessionConfig) {
        let ports = [
            ("gps1", &self.gps1_port),
            ("gps2", &self.gps2_port),
            ("razor1", &self.razor_port),
        ];
        for (name, port) in ports {
            if let (Some(port), Some(device)) = (port, config.device_mut(name)) {
                device.port = port.clone();
            }
        }

        if let Some(folder) = &self.folder {
            config.folder = folder.clone();
        }
        if let Some(poll_ms) = self.poll_ms {
            config.poll_interval_ms = poll_ms;
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue = QueuePolicy::DropNewest { capacity };
        }
    }

    /// Where the logs for this run go.
    pub fn output_dir(&self, config: &SessionConfig) -> PathBuf {
        self.data_root.join(&config.folder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_leave_config_alone() {
        let args = LoggerArgs::parse_from(["sensorlog"]);
        let mut config = SessionConfig::default();
        args.apply(&mut config);

        assert_eq!(config, SessionConfig::default());
        assert_eq!(args.log_level, LogLevel::Info);
        assert!(!args.simulate);
        assert_eq!(args.output_dir(&config), PathBuf::from("data/test1"));
    }

    #[test]
    fn flags_override_config() {
        let args = LoggerArgs::parse_from([
            "sensorlog",
            "--gps2-port",
            "/dev/ttyS4",
            "--razor-port",
            "/dev/ttyACM0",
            "-f",
            "run7",
            "--poll-ms",
            "10",
            "--queue-capacity",
            "500",
            "--log-level",
            "debug",
        ]);
        let mut config = SessionConfig::default();
        args.apply(&mut config);

        assert_eq!(config.devices[0].port, "/dev/ttyUSB0");
        assert_eq!(config.devices[1].port, "/dev/ttyS4");
        assert_eq!(config.devices[2].port, "/dev/ttyACM0");
        assert_eq!(config.folder, "run7");
        assert_eq!(config.poll_interval_ms, 10);
        assert_eq!(config.queue, QueuePolicy::DropNewest { capacity: 500 });
        assert_eq!(LevelFilter::from(args.log_level), LevelFilter::Debug);
    }

    #[test]
    fn unknown_level_is_refused() {
        assert!(LoggerArgs::try_parse_from(["sensorlog", "--log-level", "loud"]).is_err());
    }
}

//! Logs two positioning receivers and one inertial unit to CSV until
//! interrupted.

// Example:
// cargo run --bin sensorlog --
//                           --gps1-port  /dev/ttyUSB0
//                           --gps2-port  /dev/ttyUSB1
//                           --razor-port /dev/ttyUSB2
//                           --folder     test1
//                           --log-level  debug

use clap::Parser;
use log::{error, info, warn, LevelFilter};
use sensorlog::{
    args::LoggerArgs,
    config::{DeviceConfig, SessionConfig},
    frame_decoder::{BestXyzDecoder, YpragDecoder},
    interrupt, logging,
    reading::ReadingKind,
    serial_driver::SerialDriver,
    session::{Session, SessionBuilder, SessionError, ShutdownReport},
    simulated_driver::{CirclingReceiver, SimulatedDriver, TurningImu},
};
use std::{
    collections::HashSet,
    fs::{self, File},
    io::{self, BufWriter},
    path::Path,
    process,
    time::Duration,
};

/// Setup failed; nothing was left logging.
const EXIT_CONFIGURATION: i32 = 1;

/// Shut down cleanly, but at least one device log stopped early.
const EXIT_WRITE_FAILURE: i32 = 2;

/// How often the main thread looks for dead writers while waiting.
const WATCH_PERIOD: Duration = Duration::from_millis(200);

fn main() {
    let args = LoggerArgs::parse();
    process::exit(run(&args));
}

fn run(args: &LoggerArgs) -> i32 {
    let level = LevelFilter::from(args.log_level);

    let mut config = match &args.config {
        Some(path) => match SessionConfig::from_path(path) {
            Ok(config) => config,
            Err(e) => {
                logging::init_stderr(level);
                error!("{}: {}", path.display(), e);
                return EXIT_CONFIGURATION;
            }
        },
        None => SessionConfig::default(),
    };
    args.apply(&mut config);
    if let Err(e) = config.validate() {
        logging::init_stderr(level);
        error!("{}", e);
        return EXIT_CONFIGURATION;
    }

    let out_dir = args.output_dir(&config);
    if let Err(e) = fs::create_dir_all(&out_dir) {
        logging::init_stderr(level);
        error!("Unable to create {}: {}", out_dir.display(), e);
        return EXIT_CONFIGURATION;
    }
    if let Err(e) = logging::init(level, &out_dir.join(&args.log)) {
        logging::init_stderr(level);
        warn!("Logging to stderr only: {}", e);
    }
    if let Err(e) = interrupt::install() {
        error!("Unable to install signal handlers: {}", e);
        return EXIT_CONFIGURATION;
    }

    let builder = match build_session(args, &config, &out_dir) {
        Ok(builder) => builder,
        Err(e) => {
            error!("Unable to create log files in {}: {}", out_dir.display(), e);
            return EXIT_CONFIGURATION;
        }
    };

    let mut session = match builder.start() {
        Ok(session) => session,
        Err(e) => {
            error!("Not able to begin devices properly: {}", e);
            if let SessionError::Configuration { report, .. } = &e {
                summarize(report);
            }
            return EXIT_CONFIGURATION;
        }
    };

    info!("Press Ctrl+C to Exit");
    let mut reported = HashSet::new();
    interrupt::wait(WATCH_PERIOD, || {
        for device in session.failed_writers() {
            if reported.insert(device.clone()) {
                error!("{} : writer stopped, this device is no longer logged.", device);
            }
        }
    });
    info!("Interrupt received, stopping.");

    let report = session.shutdown();
    summarize(report);
    info!("Exiting now");

    if report.write_failures.is_empty() {
        0
    } else {
        EXIT_WRITE_FAILURE
    }
}

/// Opens a log file per device and pairs it with the right driver.
fn build_session(
    args: &LoggerArgs,
    config: &SessionConfig,
    out_dir: &Path,
) -> io::Result<SessionBuilder> {
    let mut builder = Session::builder()
        .poll_interval(config.poll_interval())
        .shutdown_timeout(config.shutdown_timeout())
        .queue_policy(config.queue);

    for device in &config.devices {
        let path = out_dir.join(format!("{}.csv", device.name));
        let sink = BufWriter::new(File::create(&path)?);
        info!("{} : logging to {}", device.name, path.display());
        builder = add_device(builder, device, sink, args);
    }
    Ok(builder)
}

fn add_device(
    builder: SessionBuilder,
    device: &DeviceConfig,
    sink: BufWriter<File>,
    args: &LoggerArgs,
) -> SessionBuilder {
    let name = device.name.as_str();
    match (device.kind, args.simulate) {
        (ReadingKind::Position, false) => builder.device(
            name,
            SerialDriver::new(name, &device.port, device.baud, BestXyzDecoder::new())
                .init_commands(device.init_commands.clone()),
            sink,
        ),
        (ReadingKind::Inertial, false) => builder.device(
            name,
            SerialDriver::new(
                name,
                &device.port,
                device.baud,
                YpragDecoder::new(device.sensor_id),
            )
            .init_commands(device.init_commands.clone()),
            sink,
        ),
        (ReadingKind::Position, true) => builder.device(
            name,
            SimulatedDriver::builder(name, CirclingReceiver::default())
                .rate(args.rate)
                .drop_probability(0.001)
                .build(),
            sink,
        ),
        (ReadingKind::Inertial, true) => builder.device(
            name,
            SimulatedDriver::builder(
                name,
                TurningImu {
                    sensor_id: device.sensor_id,
                    ..TurningImu::default()
                },
            )
            .rate(args.rate)
            .build(),
            sink,
        ),
    }
}

fn summarize(report: &ShutdownReport) {
    for writer in &report.writers {
        info!(
            "{} : {} rows, {} missed indices, {} out of order, {} dropped.",
            writer.device,
            writer.rows_written,
            writer.index_gaps,
            writer.index_regressions,
            writer.readings_dropped
        );
    }
    let late = report.late_readings();
    if late > 0 {
        warn!("{} readings arrived after their writer had drained.", late);
    }
    for failure in &report.write_failures {
        error!("{}, {} readings lost.", failure, failure.readings_dropped);
    }
    for (device, e) in &report.driver_failures {
        warn!("{} : driver did not stop cleanly: {}", device, e);
    }
}

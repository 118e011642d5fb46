//! Wires every device to its own queue and log writer, and owns the orderly
//! shutdown of the whole lot.
//!
//! A [Session] is described with [Session::builder] and brought up with
//! [SessionBuilder::start], which:
//!
//! 1. opens every log (each header is written and flushed),
//! 2. begins every driver, so readings start queueing,
//! 3. spawns one writer thread per device,
//! 4. runs every driver's device-specific configuration.
//!
//! If any step fails before logging reaches steady state, the session is shut
//! down in full and [SessionError::Configuration] is returned. Nothing is left
//! running.
//!
//! [RunningSession::shutdown] is the stop sequence. Each step finishes before
//! the next starts:
//!
//! 1. every driver that began is told to stop (abandoned after a timeout),
//! 2. the [ExitSignal] is set and every writer is woken,
//! 3. every writer is joined, in the order devices were added, once it has
//!    drained its queue and flushed its last row.

use crate::driver::{shutdown_within, Driver};
use crate::error::{DriverError, WriteFailure};
use crate::exit_signal::ExitSignal;
use crate::log_writer::{spawn_writer, LogWriter, WriterReport, WriterResult};
use crate::reading_queue::{channel, QueueMonitor, QueuePolicy, ReadingSender};

use log::{error, info, warn};
use std::{
    borrow::Cow,
    collections::HashSet,
    fmt,
    io::{self, Write},
    thread::JoinHandle,
    time::Duration,
};

/// Default wait for a writer with an empty queue before it re-checks the
/// exit signal.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Default time a driver gets to acknowledge a stop.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Something that kept a session from reaching steady-state logging.
#[derive(Debug)]
pub enum SessionError {
    /// The session was started without any devices
    NoDevices,

    /// Two devices share a name, so their logs would collide
    DuplicateDevice(String),

    /// A log could not be opened (its header failed to write)
    Output(WriteFailure),

    /// A thread could not be spawned for a device
    Spawn {
        /// The device the thread was for
        device: String,
        /// Why the spawn failed
        source: io::Error,
    },

    /// A driver failed to begin or to accept its configuration. The session
    /// was shut down; `report` says how that went.
    Configuration {
        /// The device whose driver failed
        device: String,
        /// What the driver reported
        source: DriverError,
        /// How the shutdown that followed went
        report: ShutdownReport,
    },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use SessionError as SE;
        let msg = match self {
            SE::NoDevices => Cow::from("no devices configured"),
            SE::DuplicateDevice(device) => Cow::from(format!("duplicate device name {}", device)),
            SE::Output(failure) => Cow::from(format!("unable to open log: {}", failure)),
            SE::Spawn { device, source } => {
                Cow::from(format!("{} : unable to spawn thread: {}", device, source))
            }
            SE::Configuration { device, source, .. } => {
                Cow::from(format!("{} : configuration failed: {}", device, source))
            }
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Output(failure) => Some(failure),
            SessionError::Spawn { source, .. } => Some(source),
            SessionError::Configuration { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// What happened during [RunningSession::shutdown].
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Writers that drained and stopped normally, in join order
    pub writers: Vec<WriterReport>,
    /// Writers that stopped because they could not persist a record
    pub write_failures: Vec<WriteFailure>,
    /// Drivers that did not stop cleanly
    pub driver_failures: Vec<(String, DriverError)>,
}

impl ShutdownReport {
    /// No write failures, no driver failures and no lost readings.
    pub fn is_clean(&self) -> bool {
        self.write_failures.is_empty()
            && self.driver_failures.is_empty()
            && self.writers.iter().all(|w| w.readings_dropped == 0)
    }

    /// The report of the writer for `device`, if it stopped normally.
    pub fn writer(&self, device: &str) -> Option<&WriterReport> {
        self.writers.iter().find(|w| w.device == device)
    }

    /// Readings that reached a queue after its writer had drained, across
    /// every device.
    pub fn late_readings(&self) -> u64 {
        self.writers.iter().map(|w| w.late_readings).sum()
    }

    /// How the writer for `device` failed, if it did.
    pub fn write_failure(&self, device: &str) -> Option<&WriteFailure> {
        self.write_failures.iter().find(|w| w.device == device)
    }
}

/// The per-device operations the session needs, independent of the reading
/// type flowing through the device.
trait DevicePipeline: Send {
    fn device(&self) -> &str;
    fn open(
        &mut self,
        policy: QueuePolicy,
        exit: &ExitSignal,
        poll_interval: Duration,
    ) -> Result<(), WriteFailure>;
    fn begin(&mut self) -> Result<(), DriverError>;
    fn spawn_writer(&mut self) -> io::Result<()>;
    fn configure(&mut self) -> Result<(), DriverError>;
    fn stop_driver(&mut self, timeout: Duration) -> Result<(), DriverError>;
    fn wake(&self);
    fn writer_finished(&self) -> bool;
    fn join(&mut self) -> Option<WriterResult>;
}

struct Pipeline<D: Driver> {
    device: String,
    driver: Option<D>,
    began: bool,
    sink: Option<Box<dyn Write + Send>>,
    sender: Option<ReadingSender<D::Reading>>,
    writer: Option<LogWriter<D::Reading>>,
    monitor: Option<QueueMonitor<D::Reading>>,
    handle: Option<JoinHandle<WriterResult>>,
}

impl<D: Driver> DevicePipeline for Pipeline<D> {
    fn device(&self) -> &str {
        &self.device
    }

    fn open(
        &mut self,
        policy: QueuePolicy,
        exit: &ExitSignal,
        poll_interval: Duration,
    ) -> Result<(), WriteFailure> {
        let Some(sink) = self.sink.take() else {
            return Ok(());
        };
        let (tx, rx) = channel(policy);
        self.monitor = Some(rx.monitor());
        self.writer = Some(LogWriter::open(
            self.device.clone(),
            sink,
            rx,
            exit.clone(),
            poll_interval,
        )?);
        self.sender = Some(tx);
        Ok(())
    }

    fn begin(&mut self) -> Result<(), DriverError> {
        let (Some(driver), Some(queue)) = (self.driver.as_mut(), self.sender.take()) else {
            return Err(DriverError::Rejected("pipeline not open".to_owned()));
        };
        driver.begin(queue)?;
        self.began = true;
        info!("{} : driver started.", self.device);
        Ok(())
    }

    fn spawn_writer(&mut self) -> io::Result<()> {
        if let Some(writer) = self.writer.take() {
            self.handle = Some(spawn_writer(writer)?);
        }
        Ok(())
    }

    fn configure(&mut self) -> Result<(), DriverError> {
        match self.driver.as_mut() {
            Some(driver) => driver.configure(),
            None => Err(DriverError::Rejected("driver already stopped".to_owned())),
        }
    }

    fn stop_driver(&mut self, timeout: Duration) -> Result<(), DriverError> {
        if !std::mem::take(&mut self.began) {
            return Ok(());
        }
        match self.driver.take() {
            Some(driver) => shutdown_within(&self.device, driver, timeout),
            None => Ok(()),
        }
    }

    fn wake(&self) {
        if let Some(monitor) = &self.monitor {
            monitor.wake();
        }
    }

    fn writer_finished(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| h.is_finished())
    }

    fn join(&mut self) -> Option<WriterResult> {
        let result = match (self.handle.take(), self.writer.take()) {
            (Some(handle), _) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(WriteFailure {
                    device: self.device.clone(),
                    rows_written: 0,
                    readings_dropped: 0,
                    source: io::Error::new(io::ErrorKind::Other, "writer thread panicked"),
                }),
            },
            // Start-up was aborted before writer threads were spawned; the
            // exit signal is set, so this only drains what is queued.
            (None, Some(writer)) => writer.run(),
            (None, None) => return None,
        };

        // The receiver is gone now, so the count is final.
        let lost = self.monitor.as_ref().map_or(0, |m| m.dropped());
        let result = match result {
            Ok(mut report) => {
                report.late_readings = lost.saturating_sub(report.readings_dropped);
                report.readings_dropped = lost;
                Ok(report)
            }
            Err(mut failure) => {
                failure.readings_dropped = lost;
                Err(failure)
            }
        };

        if lost > 0 {
            warn!("{} : {} readings never reached the log.", self.device, lost);
        }
        Some(result)
    }
}

/// Namespace for [Session::builder].
pub struct Session;

impl Session {
    /// Starts describing a session with the default settings.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }
}

/// Collects the devices and settings for a session.
pub struct SessionBuilder {
    poll_interval: Duration,
    shutdown_timeout: Duration,
    queue_policy: QueuePolicy,
    pipelines: Vec<Box<dyn DevicePipeline>>,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            queue_policy: QueuePolicy::Unbounded,
            pipelines: Vec::new(),
        }
    }
}

impl SessionBuilder {
    /// How long an idle writer waits before re-checking the exit signal.
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// How long each driver gets to stop before it is abandoned.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Overflow policy for every device queue.
    pub fn queue_policy(mut self, policy: QueuePolicy) -> Self {
        self.queue_policy = policy;
        self
    }

    /// Adds a device. Its readings are written to `sink`, which should
    /// already be open; devices are started, stopped and joined in the order
    /// they are added.
    pub fn device<D: Driver>(
        mut self,
        name: impl Into<String>,
        driver: D,
        sink: impl Write + Send + 'static,
    ) -> Self {
        self.pipelines.push(Box::new(Pipeline {
            device: name.into(),
            driver: Some(driver),
            began: false,
            sink: Some(Box::new(sink)),
            sender: None,
            writer: None,
            monitor: None,
            handle: None,
        }));
        self
    }

    /// Brings every device up. See the [module docs](self) for the order.
    pub fn start(self) -> Result<RunningSession, SessionError> {
        if self.pipelines.is_empty() {
            return Err(SessionError::NoDevices);
        }
        let mut seen = HashSet::new();
        for p in &self.pipelines {
            if !seen.insert(p.device()) {
                return Err(SessionError::DuplicateDevice(p.device().to_owned()));
            }
        }

        let mut session = RunningSession {
            pipelines: self.pipelines,
            exit: ExitSignal::new(),
            shutdown_timeout: self.shutdown_timeout,
            stopped: false,
            report: ShutdownReport::default(),
        };

        for i in 0..session.pipelines.len() {
            let exit = session.exit.clone();
            session.pipelines[i]
                .open(self.queue_policy, &exit, self.poll_interval)
                .map_err(SessionError::Output)?;
        }

        for i in 0..session.pipelines.len() {
            if let Err(source) = session.pipelines[i].begin() {
                return Err(session.abort(i, source));
            }
        }

        for i in 0..session.pipelines.len() {
            if let Err(source) = session.pipelines[i].spawn_writer() {
                let device = session.pipelines[i].device().to_owned();
                session.shutdown();
                return Err(SessionError::Spawn { device, source });
            }
        }

        for i in 0..session.pipelines.len() {
            if let Err(source) = session.pipelines[i].configure() {
                return Err(session.abort(i, source));
            }
        }

        info!(
            "Logging {} devices: {}",
            session.pipelines.len(),
            session.devices().collect::<Vec<_>>().join(", ")
        );
        Ok(session)
    }
}

/// A session in steady state. Dropping it runs [RunningSession::shutdown].
pub struct RunningSession {
    pipelines: Vec<Box<dyn DevicePipeline>>,
    exit: ExitSignal,
    shutdown_timeout: Duration,
    stopped: bool,
    report: ShutdownReport,
}

impl RunningSession {
    /// Device names, in the order they were added.
    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.pipelines.iter().map(|p| p.device())
    }

    /// The signal writers watch; set once shutdown begins.
    pub fn exit_signal(&self) -> &ExitSignal {
        &self.exit
    }

    /// Devices whose writer has already stopped although no shutdown was
    /// requested; in practice, writers that hit a write failure.
    pub fn failed_writers(&self) -> Vec<String> {
        if self.exit.is_set() {
            return Vec::new();
        }
        self.pipelines
            .iter()
            .filter(|p| p.writer_finished())
            .map(|p| p.device().to_owned())
            .collect()
    }

    /// Runs the stop sequence. Calling it again does nothing and returns the
    /// same report.
    pub fn shutdown(&mut self) -> &ShutdownReport {
        if self.stopped {
            return &self.report;
        }
        self.stopped = true;
        info!("Requesting clean exit...");

        for p in self.pipelines.iter_mut() {
            if let Err(e) = p.stop_driver(self.shutdown_timeout) {
                warn!("{} : driver did not stop cleanly: {}", p.device(), e);
                self.report.driver_failures.push((p.device().to_owned(), e));
            }
        }

        self.exit.set();
        for p in &self.pipelines {
            p.wake();
        }

        for p in self.pipelines.iter_mut() {
            match p.join() {
                Some(Ok(report)) => self.report.writers.push(report),
                Some(Err(failure)) => {
                    error!("{}", failure);
                    self.report.write_failures.push(failure);
                }
                None => {}
            }
        }

        info!("Successfully exited from devices");
        &self.report
    }

    /// Shuts down after the `i`th device failed during start-up.
    fn abort(mut self, i: usize, source: DriverError) -> SessionError {
        let device = self.pipelines[i].device().to_owned();
        error!("{} : configuration failed: {}", device, source);
        self.shutdown();
        SessionError::Configuration {
            device,
            source,
            report: std::mem::take(&mut self.report),
        }
    }
}

impl Drop for RunningSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

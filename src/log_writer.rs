//! The consumer half of a device pipeline: a [LogWriter] drains one
//! [ReadingReceiver] into one CSV sink, flushing after every row, until the
//! [ExitSignal] is set and the queue is empty.
//!
//! The writer is generic over the [Reading] it serializes, so one loop serves
//! every device schema.

use crate::error::WriteFailure;
use crate::exit_signal::ExitSignal;
use crate::reading::{Reading, ReadingKind};
use crate::reading_queue::ReadingReceiver;

use log::{debug, error, info, warn};
use std::{
    io::{self, Write},
    thread::{self, JoinHandle},
    time::Duration,
};

/// What a writer thread hands back when it terminates.
pub type WriterResult = Result<WriterReport, WriteFailure>;

/// Where a writer is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Persisting readings as they arrive, waiting when there are none
    Running,
    /// Exit was requested; persisting whatever is left, then stopping
    Draining,
    /// Done; the sink has been flushed for the last time
    Stopped,
}

/// Totals for one device, collected when its writer stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterReport {
    /// The device the log belongs to
    pub device: String,
    /// Which schema the log was written in
    pub kind: ReadingKind,
    /// Data rows written, not counting the header
    pub rows_written: u64,
    /// Indices skipped by the driver (gaps in the sequence)
    pub index_gaps: u64,
    /// Readings whose index did not increase; written anyway
    pub index_regressions: u64,
    /// Readings the queue lost, see [QueuePolicy](crate::reading_queue::QueuePolicy).
    /// Includes `late_readings`.
    pub readings_dropped: u64,
    /// Readings that reached the queue after the writer finished draining
    pub late_readings: u64,
}

/// Drains a queue of `R` into a CSV sink.
pub struct LogWriter<R: Reading> {
    device: String,
    sink: Box<dyn Write + Send>,
    queue: ReadingReceiver<R>,
    exit: ExitSignal,
    poll_interval: Duration,
    state: WriterState,
    rows_written: u64,
    last_index: Option<u64>,
    index_gaps: u64,
    index_regressions: u64,
}

impl<R: Reading> LogWriter<R> {
    /// Writes and flushes the header for `R`, and returns a writer ready to
    /// [run](LogWriter::run).
    pub fn open(
        device: impl Into<String>,
        mut sink: Box<dyn Write + Send>,
        queue: ReadingReceiver<R>,
        exit: ExitSignal,
        poll_interval: Duration,
    ) -> Result<Self, WriteFailure> {
        let device = device.into();

        if let Err(source) = R::write_header(&mut sink).and_then(|_| sink.flush()) {
            return Err(WriteFailure {
                device,
                rows_written: 0,
                readings_dropped: 0,
                source,
            });
        }

        Ok(Self {
            device,
            sink,
            queue,
            exit,
            poll_interval,
            state: WriterState::Running,
            rows_written: 0,
            last_index: None,
            index_gaps: 0,
            index_regressions: 0,
        })
    }

    /// The device this writer logs.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Runs the writer to completion on the calling thread.
    pub fn run(mut self) -> WriterResult {
        debug!("{} : writer running.", self.device);

        while self.state != WriterState::Stopped {
            match self.step() {
                Ok(next) => self.state = next,
                Err(failure) => {
                    error!("{}", failure);
                    return Err(failure);
                }
            }
        }

        let report = self.report();
        info!(
            "{} : terminated after {} rows.",
            self.device, report.rows_written
        );
        Ok(report)
    }

    /// Does one unit of work and returns the state to move to.
    fn step(&mut self) -> Result<WriterState, WriteFailure> {
        match self.state {
            WriterState::Running => {
                if self.exit.is_set() {
                    debug!(
                        "{} : exit requested, draining {} queued.",
                        self.device,
                        self.queue.len()
                    );
                    return Ok(WriterState::Draining);
                }
                if let Some(reading) = self.queue.pop_timeout(self.poll_interval) {
                    self.persist(&reading)?;
                }
                Ok(WriterState::Running)
            }
            WriterState::Draining => match self.queue.try_pop() {
                Some(reading) => {
                    self.persist(&reading)?;
                    Ok(WriterState::Draining)
                }
                None => Ok(WriterState::Stopped),
            },
            WriterState::Stopped => Ok(WriterState::Stopped),
        }
    }

    /// Writes one row and flushes it before returning.
    fn persist(&mut self, reading: &R) -> Result<(), WriteFailure> {
        self.track_index(reading.index());

        let written = reading
            .write_row(&mut self.sink)
            .and_then(|_| self.sink.flush());

        match written {
            Ok(()) => {
                self.rows_written += 1;
                Ok(())
            }
            Err(source) => {
                self.queue.count_lost(1);
                Err(self.failure(source))
            }
        }
    }

    fn track_index(&mut self, index: u64) {
        match self.last_index {
            Some(last) if index <= last => {
                self.index_regressions += 1;
                warn!(
                    "{} : index {} does not follow {}, writing it anyway.",
                    self.device, index, last
                );
                return;
            }
            Some(last) if index > last + 1 => {
                self.index_gaps += index - last - 1;
                debug!("{} : indices {}..{} missing.", self.device, last + 1, index);
            }
            _ => {}
        }
        self.last_index = Some(index);
    }

    fn failure(&self, source: io::Error) -> WriteFailure {
        WriteFailure {
            device: self.device.clone(),
            rows_written: self.rows_written,
            readings_dropped: self.queue.monitor().dropped(),
            source,
        }
    }

    fn report(&self) -> WriterReport {
        WriterReport {
            device: self.device.clone(),
            kind: R::KIND,
            rows_written: self.rows_written,
            index_gaps: self.index_gaps,
            index_regressions: self.index_regressions,
            readings_dropped: self.queue.monitor().dropped(),
            late_readings: 0,
        }
    }
}

/// Runs the given [LogWriter] on its own thread, named after its device.
pub fn spawn_writer<R: Reading>(writer: LogWriter<R>) -> io::Result<JoinHandle<WriterResult>> {
    thread::Builder::new()
        .name(writer.device().to_owned())
        .spawn(move || writer.run())
}

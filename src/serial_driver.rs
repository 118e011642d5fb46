//! A [Driver] for devices that print one measurement per line over a serial
//! port.
//!
//! `begin` opens the port and starts a reader thread that splits the byte
//! stream into lines, hands each line to a [FrameDecoder] and pushes the
//! result. `configure` writes the device's init commands, one per line.
//! `shutdown` stops the reader thread and closes the port.

use crate::driver::Driver;
use crate::error::DriverError;
use crate::frame_decoder::FrameDecoder;
use crate::reading_queue::ReadingSender;

use log::{debug, info, warn};
use serial2::SerialPort;
use std::{
    io,
    str,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

/// How long a read may block before the reader thread re-checks whether it
/// should stop. Bounds how long `shutdown` takes.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Lines longer than this are garbage (usually a baud-rate mismatch) and are
/// thrown away rather than buffered forever.
const MAX_LINE: usize = 4096;

/// A line-oriented serial device whose lines are turned into readings by a
/// [FrameDecoder].
pub struct SerialDriver<Dec: FrameDecoder> {
    device: String,
    port_name: String,
    baud: u32,
    init_commands: Vec<String>,
    decoder: Option<Dec>,
    port: Option<Arc<SerialPort>>,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl<Dec: FrameDecoder> SerialDriver<Dec> {
    /// A driver for `port_name` at `baud`. Nothing is opened until
    /// [begin](Driver::begin).
    pub fn new(
        device: impl Into<String>,
        port_name: impl Into<String>,
        baud: u32,
        decoder: Dec,
    ) -> Self {
        Self {
            device: device.into(),
            port_name: port_name.into(),
            baud,
            init_commands: Vec::new(),
            decoder: Some(decoder),
            port: None,
            running: Arc::new(AtomicBool::new(false)),
            reader: None,
        }
    }

    /// Commands written to the device, in order, by [Driver::configure].
    pub fn init_commands(mut self, commands: Vec<String>) -> Self {
        self.init_commands = commands;
        self
    }
}

impl<Dec: FrameDecoder> Driver for SerialDriver<Dec> {
    type Reading = Dec::Reading;

    fn begin(&mut self, queue: ReadingSender<Dec::Reading>) -> Result<(), DriverError> {
        let mut decoder = self
            .decoder
            .take()
            .ok_or_else(|| DriverError::Rejected("driver already started".to_owned()))?;

        let mut port = SerialPort::open(&self.port_name, self.baud)?;
        port.set_read_timeout(READ_TIMEOUT)?;
        let port = Arc::new(port);
        info!(
            "{} : opened {} at {} baud.",
            self.device, self.port_name, self.baud
        );

        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        let th_port = Arc::clone(&port);
        let device = self.device.clone();

        let reader = thread::Builder::new()
            .name(format!("{}-rx", self.device))
            .spawn(move || {
                read_lines(&device, &th_port, &running, |line| {
                    match decoder.decode(line) {
                        Ok(Some(reading)) => {
                            if !queue.push(reading) {
                                debug!("{} : queue rejected a reading.", device);
                            }
                        }
                        Ok(None) => debug!("{} : skipping {:?}", device, line),
                        Err(e) => warn!("{} : unable to decode line: {}", device, e),
                    }
                });
                debug!("{} : reader stopped.", device);
            })?;

        self.port = Some(port);
        self.reader = Some(reader);
        Ok(())
    }

    fn configure(&mut self) -> Result<(), DriverError> {
        let port = self
            .port
            .as_ref()
            .ok_or_else(|| DriverError::Rejected("driver not started".to_owned()))?;

        for command in &self.init_commands {
            info!("{} : sending {:?}", self.device, command);
            port.write_all(format!("{}\r\n", command).as_bytes())?;
        }
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), DriverError> {
        self.running.store(false, Ordering::Release);

        if let Some(reader) = self.reader.take() {
            reader.join().map_err(|_| DriverError::Panicked)?;
        }
        if self.port.take().is_some() {
            info!("{} : closed {}.", self.device, self.port_name);
        }
        Ok(())
    }
}

/// Reads from `port` until `running` goes false or the port fails, calling
/// `on_line` with every complete, valid UTF-8 line (without its line ending).
fn read_lines(
    device: &str,
    port: &SerialPort,
    running: &AtomicBool,
    mut on_line: impl FnMut(&str),
) {
    let mut buffer = [0; 256];
    let mut lines = LineSplitter::default();

    while running.load(Ordering::Acquire) {
        let read_len = match port.read(&mut buffer) {
            Ok(n) => n,
            Err(e) if is_transient(&e) => continue,
            Err(e) => {
                warn!("{} : device read failed, stopping: {}", device, e);
                return;
            }
        };

        lines.feed(&buffer[..read_len], device, &mut on_line);
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Reassembles lines from arbitrarily chunked reads.
#[derive(Default)]
struct LineSplitter {
    buf: Vec<u8>,
    /// Skipping the rest of an over-long line, up to its newline
    discarding: bool,
}

impl LineSplitter {
    /// Feeds `bytes` in, emitting each completed line.
    fn feed(&mut self, bytes: &[u8], device: &str, on_line: &mut impl FnMut(&str)) {
        for &c in bytes {
            if c != b'\n' {
                if self.discarding {
                    continue;
                }
                self.buf.push(c);
                if self.buf.len() > MAX_LINE {
                    warn!(
                        "{} : discarding a line longer than {} bytes.",
                        device, MAX_LINE
                    );
                    self.buf.clear();
                    self.discarding = true;
                }
                continue;
            }

            if std::mem::take(&mut self.discarding) {
                continue;
            }
            match str::from_utf8(&self.buf) {
                Ok(s) => {
                    let line = s.trim();
                    if !line.is_empty() {
                        on_line(line);
                    }
                }
                // Often happens at the beginning of transmission when
                // there is still garbage in the hardware buffer
                Err(e) => warn!("{} : failed to decode utf-8: {:?}", device, e),
            }
            self.buf.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_decoder::YpragDecoder;
    use crate::reading_queue::{channel, QueuePolicy};

    fn collect(chunks: &[&[u8]]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut splitter = LineSplitter::default();
        for chunk in chunks {
            splitter.feed(chunk, "test", &mut |l: &str| lines.push(l.to_owned()));
        }
        lines
    }

    #[test]
    fn lines_split_across_reads() {
        let lines = collect(&[b"#YPRAG=1,2", b",3\r\n<OK\r", b"\n\r\npartial"]);
        assert_eq!(lines, vec!["#YPRAG=1,2,3", "<OK"]);
    }

    #[test]
    fn invalid_utf8_is_skipped() {
        let lines = collect(&[b"\xff\xfe\n", b"good\n"]);
        assert_eq!(lines, vec!["good"]);
    }

    #[test]
    fn overlong_lines_are_discarded() {
        let junk = vec![b'x'; MAX_LINE + 10];
        let lines = collect(&[&junk, b"yyy", b"\nok\n"]);
        assert_eq!(lines, vec!["ok"]);

        // exactly MAX_LINE bytes is still a line
        let longest = vec![b'z'; MAX_LINE];
        let lines = collect(&[&longest, b"\n"]);
        assert_eq!(lines, vec!["z".repeat(MAX_LINE)]);
    }

    #[test]
    fn missing_port_fails_begin() {
        let (tx, _rx) = channel(QueuePolicy::Unbounded);
        let mut driver = SerialDriver::new("razor1", "/dev/does-not-exist", 57600, YpragDecoder::new(1));
        assert!(matches!(driver.begin(tx), Err(DriverError::Io(_))));
    }

    #[test]
    fn configure_before_begin_is_rejected() {
        let mut driver = SerialDriver::new("razor1", "/dev/null", 57600, YpragDecoder::new(1))
            .init_commands(vec!["#o1".to_owned()]);
        assert!(matches!(driver.configure(), Err(DriverError::Rejected(_))));
        // shutting down a driver that never started is a no-op
        assert!(driver.shutdown().is_ok());
    }
}

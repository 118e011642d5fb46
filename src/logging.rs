//! Diagnostic logging setup: every record goes to a log file and to stderr,
//! formatted as `[time] [target] [thread] LEVEL message`.
//!
//! Writer and driver threads are named after their device, so the thread
//! column says which device a line is about.

use env_logger::{Builder, Target};
use log::LevelFilter;
use std::{
    fs::File,
    io::{self, Write},
    path::Path,
    thread,
};

/// Duplicates everything written to it onto stderr.
struct Tee<W: Write> {
    file: W,
}

impl<W: Write> Write for Tee<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write_all(buf)?;
        io::stderr().write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        io::stderr().flush()
    }
}

fn builder(level: LevelFilter) -> Builder {
    let mut builder = Builder::new();
    builder.filter_level(level).format(|buf, record| {
        writeln!(
            buf,
            "[{}] [{:<20}] [{:<10}] {:<8} {}",
            buf.timestamp_millis(),
            record.target(),
            thread::current().name().unwrap_or("?"),
            record.level(),
            record.args()
        )
    });
    builder
}

/// Installs the global logger, writing to `log_file` (truncated) and stderr.
pub fn init(level: LevelFilter, log_file: &Path) -> io::Result<()> {
    let file = File::create(log_file)?;
    builder(level)
        .target(Target::Pipe(Box::new(Tee { file })))
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e))
}

/// Installs the global logger on stderr only. Used when there is no session
/// folder to put a log file in yet.
pub fn init_stderr(level: LevelFilter) {
    // A logger that is already installed is fine here.
    let _ = builder(level).target(Target::Stderr).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tee_writes_to_the_file_side() {
        let mut tee = Tee { file: Vec::new() };
        write!(tee, "hello").unwrap();
        tee.flush().unwrap();
        assert_eq!(tee.file, b"hello");
    }
}

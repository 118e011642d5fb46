//! Errors shared between drivers, writers and the session.

use nom::error::ErrorKind;
use std::{borrow::Cow, fmt, io};

/// A line from a device that could not be turned into a reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    /// The unparsed remainder of the line where decoding stopped
    pub input: String,
    /// Which parser gave up
    pub code: ErrorKind,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?} at {:?}", self.code, self.input)
    }
}

impl std::error::Error for DecodeError {}

impl From<nom::error::Error<&str>> for DecodeError {
    fn from(value: nom::error::Error<&str>) -> Self {
        Self {
            input: value.input.to_owned(),
            code: value.code,
        }
    }
}

/// Something a device driver could not do.
#[derive(Debug)]
pub enum DriverError {
    /// Opening, reading or writing the device failed
    Io(io::Error),

    /// The device produced something we could not decode
    Decode(DecodeError),

    /// The device, or the driver on its behalf, refused a request
    Rejected(String),

    /// The driver did not finish a request in the time it was given
    Timeout,

    /// The driver panicked while handling a request
    Panicked,
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use DriverError as DE;
        let msg = match self {
            DE::Io(error) => Cow::from(format!("io error: {}", error)),
            DE::Decode(error) => Cow::from(format!("decode error: {}", error)),
            DE::Rejected(why) => Cow::from(format!("rejected: {}", why)),
            DE::Timeout => Cow::from("timed out"),
            DE::Panicked => Cow::from("driver panicked"),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DriverError::Io(error) => Some(error),
            DriverError::Decode(error) => Some(error),
            _ => None,
        }
    }
}

impl From<io::Error> for DriverError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<DecodeError> for DriverError {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

/// A log writer could not persist a record. Once this happens the writer
/// stops; the rest of the session carries on.
#[derive(Debug)]
pub struct WriteFailure {
    /// The device whose log failed
    pub device: String,
    /// Data rows that made it to the log before the failure
    pub rows_written: u64,
    /// Readings that never made it to the log, the failed row included
    pub readings_dropped: u64,
    /// The error the sink returned
    pub source: io::Error,
}

impl fmt::Display for WriteFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} : write failed after {} rows: {}",
            self.device, self.rows_written, self.source
        )
    }
}

impl std::error::Error for WriteFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_error_from_nom_keeps_input() {
        let nom_err = nom::error::Error::new("abc", ErrorKind::Float);
        let err = DecodeError::from(nom_err);
        assert_eq!(err.input, "abc");
        assert_eq!(err.code, ErrorKind::Float);
    }

    #[test]
    fn write_failure_names_the_device() {
        let failure = WriteFailure {
            device: "gps2".to_owned(),
            rows_written: 9,
            readings_dropped: 41,
            source: io::Error::new(io::ErrorKind::Other, "disk full"),
        };
        let msg = failure.to_string();
        assert!(msg.starts_with("gps2 :"));
        assert!(msg.contains("9 rows"));
        assert!(msg.contains("disk full"));
    }
}

//! The two kinds of measurement a device can hand to the logger, and how
//! each one is laid out as a CSV row.
//!
//! A [Reading] is a fixed, named, ordered set of columns. The header is
//! written once when a log is opened, then every reading becomes exactly one
//! row with the same number of columns. The sequence index is always the
//! first column, zero-padded to at least five digits.
//!
//! Position data is written at natural precision (the shortest decimal that
//! round-trips, always with a fractional part), inertial data at exactly two
//! decimal places using the standard library's rounding of the binary value.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Write};

/// Which schema a device produces. Used in configuration to pick a driver
/// and by the writer to label its log lines.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum ReadingKind {
    /// A positioning receiver, see [PositionReading]
    Position,
    /// An inertial/orientation unit, see [InertialReading]
    Inertial,
}

impl fmt::Display for ReadingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingKind::Position => write!(f, "position"),
            ReadingKind::Inertial => write!(f, "inertial"),
        }
    }
}

/// A triple of `f64`s. Cartesian for positions and velocities, per-axis for
/// the inertial sensors.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    #[allow(missing_docs)]
    pub x: f64,
    #[allow(missing_docs)]
    pub y: f64,
    #[allow(missing_docs)]
    pub z: f64,
}

impl Vec3 {
    #[allow(missing_docs)]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl From<[f64; 3]> for Vec3 {
    fn from([x, y, z]: [f64; 3]) -> Self {
        Self { x, y, z }
    }
}

/// A decoded, immutable measurement that knows how to serialize itself.
///
/// Every device pipeline is generic over one implementor, so the writer
/// never has to branch on the variant at runtime.
pub trait Reading: Send + 'static {
    /// The schema tag
    const KIND: ReadingKind;

    /// Column names, in order
    const HEADER: &'static [&'static str];

    /// Sequence index, strictly increasing per device
    fn index(&self) -> u64;

    /// Writes one CSV row, including the trailing newline
    fn write_row(&self, out: &mut dyn Write) -> io::Result<()>;

    /// Writes the header line, including the trailing newline
    fn write_header(out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "{}", Self::HEADER.join(","))
    }
}

/// One solution from a positioning receiver.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionReading {
    /// Sequence index assigned by the driver
    pub index: u64,
    /// GPS seconds of week
    pub time: f64,
    /// Position solution status code
    pub position_status: u32,
    /// ECEF position, metres
    pub position: Vec3,
    /// Standard deviation of `position`
    pub position_std: Vec3,
    /// Velocity solution status code
    pub velocity_status: u32,
    /// ECEF velocity, metres per second
    pub velocity: Vec3,
    /// Standard deviation of `velocity`
    pub velocity_std: Vec3,
    /// Latency of the velocity measurement, seconds
    pub velocity_latency: f64,
    /// Age of the solution, seconds
    pub solution_age: f64,
    /// Satellites used in the solution
    pub satellites: u32,
}

impl Reading for PositionReading {
    const KIND: ReadingKind = ReadingKind::Position;

    const HEADER: &'static [&'static str] = &[
        "Index",
        "Time",
        "PSolStatus",
        "X",
        "Y",
        "Z",
        "stdX",
        "stdY",
        "stdZ",
        "VSolStatus",
        "VX",
        "VY",
        "VZ",
        "stdVX",
        "stdVY",
        "stdVZ",
        "VLatency",
        "SolAge",
        "SolSatNumber",
    ];

    fn index(&self) -> u64 {
        self.index
    }

    fn write_row(&self, out: &mut dyn Write) -> io::Result<()> {
        // `{:?}` on f64 is the shortest round-tripping decimal and keeps
        // the ".0" on whole numbers, which is what "natural precision" means
        // for these columns.
        writeln!(
            out,
            "{:05},{:?},{},{:?},{:?},{:?},{:?},{:?},{:?},{},{:?},{:?},{:?},{:?},{:?},{:?},{:?},{:?},{}",
            self.index,
            self.time,
            self.position_status,
            self.position.x,
            self.position.y,
            self.position.z,
            self.position_std.x,
            self.position_std.y,
            self.position_std.z,
            self.velocity_status,
            self.velocity.x,
            self.velocity.y,
            self.velocity.z,
            self.velocity_std.x,
            self.velocity_std.y,
            self.velocity_std.z,
            self.velocity_latency,
            self.solution_age,
            self.satellites,
        )
    }
}

/// One sample from an inertial/orientation unit.
#[derive(Debug, Clone, PartialEq)]
pub struct InertialReading {
    /// Sequence index assigned by the driver
    pub index: u64,
    /// Seconds since the driver started
    pub time: f64,
    /// Sensor identifier
    pub id: u32,
    /// Accelerometer
    pub acceleration: Vec3,
    /// Gyroscope
    pub angular_rate: Vec3,
    /// Magnetometer
    pub magnetic: Vec3,
    /// Yaw, pitch, roll (x, y, z respectively)
    pub orientation: Vec3,
}

impl Reading for InertialReading {
    const KIND: ReadingKind = ReadingKind::Inertial;

    const HEADER: &'static [&'static str] = &[
        "Index", "Time", "ID", "accx", "accy", "accz", "gyrox", "gyroy", "gyroz", "magx", "magy",
        "magz", "yaw", "pitch", "roll",
    ];

    fn index(&self) -> u64 {
        self.index
    }

    fn write_row(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(
            out,
            "{:05},{:?},{},{:.2},{:.2},{:.2},{:.2},{:.2},{:.2},{:.2},{:.2},{:.2},{:.2},{:.2},{:.2}",
            self.index,
            self.time,
            self.id,
            self.acceleration.x,
            self.acceleration.y,
            self.acceleration.z,
            self.angular_rate.x,
            self.angular_rate.y,
            self.angular_rate.z,
            self.magnetic.x,
            self.magnetic.y,
            self.magnetic.z,
            self.orientation.x,
            self.orientation.y,
            self.orientation.z,
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn position(index: u64) -> PositionReading {
        PositionReading {
            index,
            time: 340033.05 + index as f64 * 0.05,
            position_status: 0,
            position: Vec3::new(-1634531.5683, -3664618.0326, 4942496.327),
            position_std: Vec3::new(0.0099, 0.0219, 0.0115),
            velocity_status: 0,
            velocity: Vec3::new(0.0011, -0.0049, -0.0001),
            velocity_std: Vec3::new(0.0199, 0.0439, 0.023),
            velocity_latency: 0.25,
            solution_age: 0.0,
            satellites: 11,
        }
    }

    pub(crate) fn inertial(index: u64) -> InertialReading {
        InertialReading {
            index,
            time: index as f64 * 0.02,
            id: 1,
            acceleration: Vec3::new(1.005, -2.0, 0.333),
            angular_rate: Vec3::new(0.0, 0.1, -0.1),
            magnetic: Vec3::new(210.5, -33.125001, 12.0),
            orientation: Vec3::new(179.999, -0.014, 45.5),
        }
    }

    fn row_of<R: Reading>(reading: &R) -> String {
        let mut buf = Vec::new();
        reading.write_row(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn header_of<R: Reading>() -> String {
        let mut buf = Vec::new();
        R::write_header(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn position_header_is_exact() {
        assert_eq!(
            header_of::<PositionReading>(),
            "Index,Time,PSolStatus,X,Y,Z,stdX,stdY,stdZ,VSolStatus,VX,VY,VZ,stdVX,stdVY,stdVZ,VLatency,SolAge,SolSatNumber\n"
        );
    }

    #[test]
    fn inertial_header_is_exact() {
        assert_eq!(
            header_of::<InertialReading>(),
            "Index,Time,ID,accx,accy,accz,gyrox,gyroy,gyroz,magx,magy,magz,yaw,pitch,roll\n"
        );
    }

    #[test]
    fn rows_match_header_width() {
        for i in [0, 7, 99_999, 1_234_567] {
            let row = row_of(&position(i));
            assert!(row.ends_with('\n'));
            assert_eq!(
                row.trim_end().split(',').count(),
                PositionReading::HEADER.len()
            );

            let row = row_of(&inertial(i));
            assert_eq!(
                row.trim_end().split(',').count(),
                InertialReading::HEADER.len()
            );
        }
    }

    #[test]
    fn index_is_zero_padded() {
        assert!(row_of(&inertial(42)).starts_with("00042,"));
        assert!(row_of(&position(0)).starts_with("00000,"));
        // wider indices are never truncated
        assert!(row_of(&position(1_234_567)).starts_with("1234567,"));
    }

    #[test]
    fn inertial_uses_two_decimals() {
        let row = row_of(&inertial(1));
        let cols: Vec<&str> = row.trim_end().split(',').collect();

        // 1.005 is stored as 1.00499999999999989..., so the standard
        // rounding of the binary value gives 1.00, not 1.01.
        assert_eq!(&cols[3..6], &["1.00", "-2.00", "0.33"]);
        assert_eq!(&cols[6..9], &["0.00", "0.10", "-0.10"]);
        assert_eq!(&cols[9..12], &["210.50", "-33.13", "12.00"]);
        assert_eq!(&cols[12..15], &["180.00", "-0.01", "45.50"]);
    }

    #[test]
    fn position_uses_natural_precision() {
        let row = row_of(&position(3));
        let cols: Vec<&str> = row.trim_end().split(',').collect();

        assert_eq!(cols[0], "00003");
        assert_eq!(cols[2], "0");
        assert_eq!(&cols[3..6], &["-1634531.5683", "-3664618.0326", "4942496.327"]);
        assert_eq!(cols[16], "0.25");
        assert_eq!(cols[17], "0.0");
        assert_eq!(cols[18], "11");
    }
}

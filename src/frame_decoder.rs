//! Line decoders for the ASCII output of the devices we log.
//!
//! Only the lines carrying measurements are decoded; anything else a device
//! prints (command acknowledgements, banners) is skipped. Sequence indices are
//! assigned here, one per decoded line, so they are strictly increasing for
//! the lifetime of a decoder.

use crate::error::DecodeError;
use crate::reading::{InertialReading, PositionReading, Reading, Vec3};

use nom::{
    bytes::complete::{tag, take_till, take_while1},
    character::complete::{char, u32},
    combinator::{map, map_opt},
    number::complete::double,
    sequence::{delimited, preceded, terminated, tuple},
    Finish, IResult,
};
use std::time::Instant;

/// Turns one line of device output into at most one reading.
pub trait FrameDecoder: Send + 'static {
    /// What a decoded line becomes
    type Reading: Reading;

    /// `Ok(None)` means the line is well-formed but not a measurement.
    fn decode(&mut self, line: &str) -> Result<Option<Self::Reading>, DecodeError>;
}

fn field(s: &str) -> IResult<&str, &str> {
    take_till(|c| c == ',' || c == ';' || c == '*')(s)
}

fn ident(s: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_')(s)
}

fn next_double(s: &str) -> IResult<&str, f64> {
    preceded(char(','), double)(s)
}

fn vec3(s: &str) -> IResult<&str, Vec3> {
    map(
        tuple((next_double, next_double, next_double)),
        |(x, y, z)| Vec3 { x, y, z },
    )(s)
}

/// Numeric code for a NovAtel solution status name.
pub fn solution_status_code(name: &str) -> Option<u32> {
    let code = match name {
        "SOL_COMPUTED" => 0,
        "INSUFFICIENT_OBS" => 1,
        "NO_CONVERGENCE" => 2,
        "SINGULARITY" => 3,
        "COV_TRACE" => 4,
        "TEST_DIST" => 5,
        "COLD_START" => 6,
        "V_H_LIMIT" => 7,
        "VARIANCE" => 8,
        "RESIDUALS" => 9,
        "INTEGRITY_WARNING" => 13,
        "PENDING" => 18,
        "INVALID_FIX" => 19,
        "UNAUTHORIZED" => 20,
        "INVALID_RATE" => 22,
        _ => return None,
    };
    Some(code)
}

fn status(s: &str) -> IResult<&str, u32> {
    map_opt(ident, solution_status_code)(s)
}

/// The interesting part of a `BESTXYZA` log, before an index is attached.
#[derive(Debug, Clone, PartialEq)]
struct BestXyz {
    seconds: f64,
    position_status: u32,
    position: Vec3,
    position_std: Vec3,
    velocity_status: u32,
    velocity: Vec3,
    velocity_std: Vec3,
    velocity_latency: f64,
    solution_age: f64,
    satellites: u32,
}

/// `#BESTXYZA,port,seq,idle,timestatus,week,seconds,rxstatus,reserved,swver;`
fn bestxyz_header(s: &str) -> IResult<&str, f64> {
    map(
        delimited(
            tag("#BESTXYZA,"),
            tuple((
                field,
                preceded(char(','), field),
                preceded(char(','), field),
                preceded(char(','), field),
                preceded(char(','), u32),
                next_double,
                preceded(char(','), field),
                preceded(char(','), field),
                preceded(char(','), field),
            )),
            char(';'),
        ),
        |(_port, _seq, _idle, _time_status, _week, seconds, _rx, _res, _sw)| seconds,
    )(s)
}

fn parse_bestxyz(s: &str) -> IResult<&str, BestXyz> {
    map(
        tuple((
            bestxyz_header,
            // position: status, type, xyz, sigma xyz
            terminated(status, preceded(char(','), ident)),
            vec3,
            vec3,
            // velocity: status, type, xyz, sigma xyz
            preceded(char(','), status),
            preceded(char(','), ident),
            vec3,
            vec3,
            // station id, v-latency, diff age, sol age, #tracked, #in solution
            preceded(char(','), field),
            next_double,
            next_double,
            next_double,
            preceded(char(','), u32),
            preceded(char(','), u32),
        )),
        |(
            seconds,
            position_status,
            position,
            position_std,
            velocity_status,
            _vel_type,
            velocity,
            velocity_std,
            _station,
            velocity_latency,
            _diff_age,
            solution_age,
            _tracked,
            satellites,
        )| BestXyz {
            seconds,
            position_status,
            position,
            position_std,
            velocity_status,
            velocity,
            velocity_std,
            velocity_latency,
            solution_age,
            satellites,
        },
    )(s)
}

/// Decodes NovAtel OEM4 `BESTXYZA` ASCII logs into [PositionReading]s.
///
/// The reading's time is the GPS seconds-of-week from the log header. The
/// CRC after `*` is not checked.
#[derive(Debug, Default)]
pub struct BestXyzDecoder {
    next_index: u64,
}

impl BestXyzDecoder {
    /// A decoder whose first reading gets index 0.
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameDecoder for BestXyzDecoder {
    type Reading = PositionReading;

    fn decode(&mut self, line: &str) -> Result<Option<PositionReading>, DecodeError> {
        if !line.starts_with("#BESTXYZA") {
            return Ok(None);
        }

        let (_rest, log) = parse_bestxyz(line).finish()?;
        let index = self.next_index;
        self.next_index += 1;

        Ok(Some(PositionReading {
            index,
            time: log.seconds,
            position_status: log.position_status,
            position: log.position,
            position_std: log.position_std,
            velocity_status: log.velocity_status,
            velocity: log.velocity,
            velocity_std: log.velocity_std,
            velocity_latency: log.velocity_latency,
            solution_age: log.solution_age,
            satellites: log.satellites,
        }))
    }
}

/// `#YPRAG=yaw,pitch,roll,ax,ay,az,mx,my,mz,gx,gy,gz`
fn parse_yprag(s: &str) -> IResult<&str, (Vec3, Vec3, Vec3, Vec3)> {
    preceded(
        tag("#YPRAG="),
        tuple((
            map(
                tuple((double, next_double, next_double)),
                |(x, y, z)| Vec3 { x, y, z },
            ),
            vec3,
            vec3,
            vec3,
        )),
    )(s)
}

/// Decodes Razor AHRS `#YPRAG=` text output into [InertialReading]s.
///
/// The firmware sends no clock of its own, so the reading's time is seconds
/// since the decoder was created.
#[derive(Debug)]
pub struct YpragDecoder {
    sensor_id: u32,
    next_index: u64,
    started: Instant,
}

impl YpragDecoder {
    /// A decoder stamping `sensor_id` on every reading. Time starts now.
    pub fn new(sensor_id: u32) -> Self {
        Self {
            sensor_id,
            next_index: 0,
            started: Instant::now(),
        }
    }
}

impl FrameDecoder for YpragDecoder {
    type Reading = InertialReading;

    fn decode(&mut self, line: &str) -> Result<Option<InertialReading>, DecodeError> {
        if !line.starts_with("#YPRAG") {
            return Ok(None);
        }

        let (_rest, (orientation, acceleration, magnetic, angular_rate)) =
            parse_yprag(line).finish()?;
        let index = self.next_index;
        self.next_index += 1;

        Ok(Some(InertialReading {
            index,
            time: self.started.elapsed().as_secs_f64(),
            id: self.sensor_id,
            acceleration,
            angular_rate,
            magnetic,
            orientation,
        }))
    }
}

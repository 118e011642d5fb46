//! Drivers that make readings up, for running the logger without hardware.
//!
//! A [SimulatedDriver] runs a generator thread that asks its [Synthesizer]
//! for a new reading at a fixed rate, adds a little noise, and now and then
//! skips an index the way a real driver does when it detects a dropped frame.

use crate::driver::Driver;
use crate::error::DriverError;
use crate::reading::{InertialReading, PositionReading, Reading, Vec3};
use crate::reading_queue::ReadingSender;

use log::{debug, info};
use rand::prelude::*;
use std::f64::consts::PI;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

/// Produces the reading for a given index and time.
pub trait Synthesizer: Send + 'static {
    /// What gets produced
    type Reading: Reading;

    /// The reading with sequence number `index`, `time` seconds after start.
    fn synthesize(&mut self, index: u64, time: f64, rng: &mut StdRng) -> Self::Reading;
}

/// Uniform noise in `-amplitude..amplitude`, or nothing for a zero amplitude.
fn jitter(rng: &mut StdRng, amplitude: f64) -> f64 {
    if amplitude > 0.0 {
        rng.gen_range(-amplitude..amplitude)
    } else {
        0.0
    }
}

/// A positioning receiver driving in a circle around `center`.
#[derive(Debug, Clone)]
pub struct CirclingReceiver {
    /// ECEF centre of the circle
    pub center: Vec3,
    /// Metres
    pub radius: f64,
    /// Seconds per lap
    pub period: f64,
    /// Position jitter, metres
    pub noise: f64,
}

impl Default for CirclingReceiver {
    fn default() -> Self {
        Self {
            center: Vec3::new(4_627_850.0, 119_160.0, 4_373_300.0),
            radius: 25.0,
            period: 60.0,
            noise: 0.01,
        }
    }
}

impl Synthesizer for CirclingReceiver {
    type Reading = PositionReading;

    fn synthesize(&mut self, index: u64, time: f64, rng: &mut StdRng) -> PositionReading {
        let angle = (time / self.period) * 2.0 * PI;
        let speed = 2.0 * PI * self.radius / self.period;
        let sigma = self.noise.max(0.001);

        PositionReading {
            index,
            time,
            position_status: 0,
            position: Vec3::new(
                self.center.x + angle.cos() * self.radius + jitter(rng, self.noise),
                self.center.y + angle.sin() * self.radius + jitter(rng, self.noise),
                self.center.z + jitter(rng, self.noise),
            ),
            position_std: Vec3::new(sigma, sigma, sigma * 1.5),
            velocity_status: 0,
            velocity: Vec3::new(-angle.sin() * speed, angle.cos() * speed, 0.0),
            velocity_std: Vec3::new(sigma * 2.0, sigma * 2.0, sigma * 3.0),
            velocity_latency: 0.25,
            solution_age: 0.0,
            satellites: rng.gen_range(8..14),
        }
    }
}

/// An inertial unit slowly yawing on a level table.
#[derive(Debug, Clone)]
pub struct TurningImu {
    /// Written into the ID column
    pub sensor_id: u32,
    /// Degrees per second
    pub yaw_rate: f64,
    /// Sensor jitter
    pub noise: f64,
}

impl Default for TurningImu {
    fn default() -> Self {
        Self {
            sensor_id: 1,
            yaw_rate: 6.0,
            noise: 0.5,
        }
    }
}

impl Synthesizer for TurningImu {
    type Reading = InertialReading;

    fn synthesize(&mut self, index: u64, time: f64, rng: &mut StdRng) -> InertialReading {
        let yaw = (time * self.yaw_rate + 180.0).rem_euclid(360.0) - 180.0;
        let heading = yaw.to_radians();

        InertialReading {
            index,
            time,
            id: self.sensor_id,
            acceleration: Vec3::new(
                jitter(rng, self.noise),
                jitter(rng, self.noise),
                256.0 + jitter(rng, self.noise),
            ),
            angular_rate: Vec3::new(
                jitter(rng, self.noise / 100.0),
                jitter(rng, self.noise / 100.0),
                self.yaw_rate.to_radians() + jitter(rng, self.noise / 100.0),
            ),
            magnetic: Vec3::new(heading.cos() * 200.0, -heading.sin() * 200.0, -350.0),
            orientation: Vec3::new(yaw, jitter(rng, self.noise), jitter(rng, self.noise)),
        }
    }
}

enum Signal {
    Stop,
}

/// A [Driver] backed by a [Synthesizer] on its own thread.
pub struct SimulatedDriver<S: Synthesizer> {
    name: String,
    synthesizer: Option<S>,
    rate_hz: f64,
    drop_probability: f64,
    limit: Option<u64>,
    seed: Option<u64>,
    tx: Option<mpsc::Sender<Signal>>,
    handle: Option<thread::JoinHandle<u64>>,
}

impl<S: Synthesizer> SimulatedDriver<S> {
    /// Starts describing a driver called `name` that produces readings from
    /// `synthesizer`.
    pub fn builder(name: impl Into<String>, synthesizer: S) -> SimulatedDriverBuilder<S> {
        SimulatedDriverBuilder {
            driver: SimulatedDriver {
                name: name.into(),
                synthesizer: Some(synthesizer),
                rate_hz: 20.0,
                drop_probability: 0.0,
                limit: None,
                seed: None,
                tx: None,
                handle: None,
            },
        }
    }
}

/// Settings for a [SimulatedDriver].
pub struct SimulatedDriverBuilder<S: Synthesizer> {
    driver: SimulatedDriver<S>,
}

impl<S: Synthesizer> SimulatedDriverBuilder<S> {
    /// Readings per second. Defaults to 20.
    pub fn rate(mut self, rate_hz: f64) -> Self {
        self.driver.rate_hz = rate_hz;
        self
    }

    /// Chance that an index is skipped instead of produced.
    pub fn drop_probability(mut self, p: f64) -> Self {
        self.driver.drop_probability = p.clamp(0.0, 1.0);
        self
    }

    /// Stop generating after this many readings.
    pub fn limit(mut self, n: u64) -> Self {
        self.driver.limit = Some(n);
        self
    }

    /// Fix the random seed so runs are repeatable.
    pub fn seed(mut self, seed: u64) -> Self {
        self.driver.seed = Some(seed);
        self
    }

    /// Finishes the description.
    pub fn build(self) -> SimulatedDriver<S> {
        self.driver
    }
}

impl<S: Synthesizer> Driver for SimulatedDriver<S> {
    type Reading = S::Reading;

    fn begin(&mut self, queue: ReadingSender<S::Reading>) -> Result<(), DriverError> {
        if !(self.rate_hz > 0.0) {
            return Err(DriverError::Rejected(format!(
                "rate must be positive, got {}",
                self.rate_hz
            )));
        }
        let mut synthesizer = self
            .synthesizer
            .take()
            .ok_or_else(|| DriverError::Rejected("driver already started".to_owned()))?;

        let (tx, rx) = mpsc::channel::<Signal>();
        let period = Duration::from_secs_f64(1.0 / self.rate_hz);
        let drop_probability = self.drop_probability;
        let limit = self.limit;
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let name = self.name.clone();

        let handle = thread::Builder::new()
            .name(format!("{}-sim", self.name))
            .spawn(move || {
                let started = Instant::now();
                let mut index = 0;
                let mut produced = 0;

                while limit.map_or(true, |n| produced < n) {
                    match rx.try_recv() {
                        Ok(Signal::Stop) | Err(mpsc::TryRecvError::Disconnected) => break,
                        Err(mpsc::TryRecvError::Empty) => {}
                    }

                    if drop_probability > 0.0 && rng.gen_bool(drop_probability) {
                        debug!("{} : simulating a dropped frame at {}", name, index);
                    } else {
                        let time = started.elapsed().as_secs_f64();
                        queue.push(synthesizer.synthesize(index, time, &mut rng));
                        produced += 1;
                    }
                    index += 1;

                    spin_sleep::sleep(period);
                }
                produced
            })?;

        info!("{} : simulating at {} Hz.", self.name, self.rate_hz);
        self.tx = Some(tx);
        self.handle = Some(handle);
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), DriverError> {
        if let Some(tx) = self.tx.take() {
            // The generator may already have hit its limit and gone away.
            let _ = tx.send(Signal::Stop);
        }
        // We have to `.take()` the handle because joining moves it.
        if let Some(handle) = self.handle.take() {
            let produced = handle.join().map_err(|_| DriverError::Panicked)?;
            info!("{} : simulation stopped after {} readings.", self.name, produced);
        }
        Ok(())
    }
}

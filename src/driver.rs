//! `Driver`
//!
//! The producer half of a device pipeline. A driver owns the conversation
//! with one device (its connection parameters are given when the driver is
//! constructed), decodes what the device sends into [Reading]s, and pushes
//! each one onto the queue it was handed in [Driver::begin].

use crate::error::DriverError;
use crate::reading::Reading;
use crate::reading_queue::ReadingSender;

use log::debug;
use std::{
    sync::mpsc,
    thread,
    time::Duration,
};

/// A source of readings for one device.
pub trait Driver: Send + 'static {
    /// What the device produces
    type Reading: Reading;

    /// Connects to the device and starts pushing readings onto `queue`.
    /// Must not block for longer than it takes to establish the connection.
    fn begin(&mut self, queue: ReadingSender<Self::Reading>) -> Result<(), DriverError>;

    /// Device-specific setup, run after every writer is up. The default has
    /// nothing to configure.
    fn configure(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    /// Stops producing readings. Best effort; after this returns the driver
    /// pushes nothing more. Calling it twice is harmless.
    fn shutdown(&mut self) -> Result<(), DriverError>;
}

impl<R: Reading> Driver for Box<dyn Driver<Reading = R>> {
    type Reading = R;

    fn begin(&mut self, queue: ReadingSender<R>) -> Result<(), DriverError> {
        (**self).begin(queue)
    }

    fn configure(&mut self) -> Result<(), DriverError> {
        (**self).configure()
    }

    fn shutdown(&mut self) -> Result<(), DriverError> {
        (**self).shutdown()
    }
}

/// Shuts `driver` down on a helper thread and waits at most `timeout` for it.
///
/// A driver that hangs is abandoned (its helper thread is left to finish on
/// its own) and [DriverError::Timeout] is returned. A driver that panics
/// yields [DriverError::Panicked].
pub fn shutdown_within<D: Driver>(
    device: &str,
    mut driver: D,
    timeout: Duration,
) -> Result<(), DriverError> {
    let (tx, rx) = mpsc::channel();

    thread::Builder::new()
        .name(format!("{}-stop", device))
        .spawn(move || {
            let result = driver.shutdown();
            // Nobody is listening any more if we took too long.
            let _ = tx.send(result);
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => {
            debug!("{} : driver shutdown returned.", device);
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => Err(DriverError::Timeout),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(DriverError::Panicked),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::InertialReading;
    use std::time::Instant;

    enum Behaviour {
        Prompt,
        Hang,
        Panic,
    }

    struct StopTester(Behaviour);

    impl Driver for StopTester {
        type Reading = InertialReading;

        fn begin(&mut self, _: ReadingSender<InertialReading>) -> Result<(), DriverError> {
            Ok(())
        }

        fn shutdown(&mut self) -> Result<(), DriverError> {
            match self.0 {
                Behaviour::Prompt => Ok(()),
                Behaviour::Hang => {
                    thread::sleep(Duration::from_secs(5));
                    Ok(())
                }
                Behaviour::Panic => panic!("device on fire"),
            }
        }
    }

    #[test]
    fn prompt_shutdown_is_ok() {
        let res = shutdown_within("razor1", StopTester(Behaviour::Prompt), Duration::from_secs(1));
        assert!(res.is_ok());
    }

    #[test]
    fn hanging_shutdown_times_out() {
        let start = Instant::now();
        let res = shutdown_within("gps1", StopTester(Behaviour::Hang), Duration::from_millis(50));
        assert!(matches!(res, Err(DriverError::Timeout)));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn panicking_shutdown_is_reported() {
        let res = shutdown_within("gps2", StopTester(Behaviour::Panic), Duration::from_secs(1));
        assert!(matches!(res, Err(DriverError::Panicked)));
    }

    #[test]
    fn boxed_drivers_forward() {
        let mut boxed: Box<dyn Driver<Reading = InertialReading>> =
            Box::new(StopTester(Behaviour::Prompt));
        assert!(boxed.configure().is_ok());
        assert!(boxed.shutdown().is_ok());
    }
}

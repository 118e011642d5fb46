//! Turns SIGINT/SIGTERM into a flag the main thread can wait on.

use std::{
    io,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_: libc::c_int) {
    // Only async-signal-safe work in here.
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Routes SIGINT and SIGTERM to [interrupted]. Call once, early.
pub fn install() -> io::Result<()> {
    for signal in [libc::SIGINT, libc::SIGTERM] {
        let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        // SAFETY: the handler only stores to an atomic, which is
        // async-signal-safe.
        let previous = unsafe { libc::signal(signal, handler) };
        if previous == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Whether an interrupt has been received.
pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Blocks until an interrupt arrives, calling `tick` every `period` while
/// waiting.
pub fn wait(period: Duration, mut tick: impl FnMut()) {
    while !interrupted() {
        tick();
        thread::sleep(period);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raised_sigterm_sets_the_flag() {
        install().unwrap();
        // SAFETY: raising a signal we have a handler for.
        assert_eq!(unsafe { libc::raise(libc::SIGTERM) }, 0);

        let mut ticks = 0;
        wait(Duration::from_millis(1), || ticks += 1);
        assert!(interrupted());
        assert!(ticks <= 1);
    }
}

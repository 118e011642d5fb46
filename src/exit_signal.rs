//! The process-wide "stop now" flag shared by the orchestrator and every
//! writer thread.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// A monotonic boolean: starts false, can be set to true exactly once, and
/// is never reset. Cloning gives another handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct ExitSignal {
    flag: Arc<AtomicBool>,
}

impl ExitSignal {
    /// Creates a new, unset signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the signal. Returns `true` only for the call that actually
    /// flipped it.
    pub fn set(&self) -> bool {
        !self.flag.swap(true, Ordering::AcqRel)
    }

    /// Whether the signal has been set.
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn starts_unset() {
        assert!(!ExitSignal::new().is_set());
    }

    #[test]
    fn set_is_reported_once() {
        let signal = ExitSignal::new();
        assert!(signal.set());
        assert!(!signal.set());
        assert!(signal.is_set());
    }

    #[test]
    fn clones_share_the_flag() {
        let signal = ExitSignal::new();
        let observer = signal.clone();

        let handle = thread::spawn(move || {
            while !observer.is_set() {
                thread::yield_now();
            }
        });

        signal.set();
        handle.join().unwrap();
    }
}

//! The thread-safe FIFO that hands [Reading](crate::reading::Reading)s from a
//! device driver to its log writer.
//!
//! A queue has exactly one [ReadingSender] and one [ReadingReceiver]; neither
//! is `Clone`, so the single-producer/single-consumer rule is enforced by the
//! type system. Pushing never blocks. The receiver can either poll with
//! [ReadingReceiver::try_pop] or park for a bounded time with
//! [ReadingReceiver::pop_timeout], which wakes as soon as something arrives
//! or someone calls [QueueMonitor::wake].
//!
//! Overflow is explicit, see [QueuePolicy]. Every reading that does not make
//! it to the writer (rejected by a full queue, pushed after the receiver went
//! away, or left behind when the receiver is dropped) is counted and can be
//! read back from any handle.

use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

/// What to do when a producer pushes faster than the writer drains.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
pub enum QueuePolicy {
    /// Grow without limit. Nothing is ever dropped while the writer is alive.
    #[default]
    Unbounded,
    /// Hold at most `capacity` readings; pushes beyond that are rejected and
    /// counted. The readings already queued are kept so ordering is intact.
    DropNewest {
        /// Most readings held at once
        capacity: usize,
    },
}

#[derive(Debug)]
struct Inner<T> {
    items: VecDeque<T>,
    wake_pending: bool,
    closed: bool,
}

#[derive(Debug)]
struct Shared<T> {
    inner: Mutex<Inner<T>>,
    ready: Condvar,
    policy: QueuePolicy,
    dropped: AtomicU64,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        // A panic while holding the lock cannot leave the deque half-updated,
        // so a poisoned lock is still safe to use.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn count_dropped(&self, n: u64) {
        self.dropped.fetch_add(n, Ordering::Relaxed);
    }
}

/// Creates a connected sender/receiver pair.
pub fn channel<T>(policy: QueuePolicy) -> (ReadingSender<T>, ReadingReceiver<T>) {
    let shared = Arc::new(Shared {
        inner: Mutex::new(Inner {
            items: VecDeque::new(),
            wake_pending: false,
            closed: false,
        }),
        ready: Condvar::new(),
        policy,
        dropped: AtomicU64::new(0),
    });

    (
        ReadingSender {
            shared: Arc::clone(&shared),
        },
        ReadingReceiver { shared },
    )
}

/// The producer end, owned by a driver.
#[derive(Debug)]
pub struct ReadingSender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> ReadingSender<T> {
    /// Appends a reading. Never blocks. Returns `false` when the reading was
    /// not queued, either because the queue is full or because the receiver
    /// is gone; both cases are counted.
    pub fn push(&self, item: T) -> bool {
        let mut inner = self.shared.lock();
        let full = match self.shared.policy {
            QueuePolicy::DropNewest { capacity } => inner.items.len() >= capacity,
            QueuePolicy::Unbounded => false,
        };
        if inner.closed || full {
            drop(inner);
            self.shared.count_dropped(1);
            return false;
        }
        inner.items.push_back(item);
        drop(inner);

        self.shared.ready.notify_one();
        true
    }

    /// Number of readings lost so far on this queue.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

/// The consumer end, owned by a log writer.
#[derive(Debug)]
pub struct ReadingReceiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> ReadingReceiver<T> {
    /// Takes the oldest reading, if there is one.
    pub fn try_pop(&self) -> Option<T> {
        self.shared.lock().items.pop_front()
    }

    /// Takes the oldest reading, waiting up to `timeout` for one to arrive.
    /// Returns `None` early if the queue is woken through its
    /// [QueueMonitor].
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut inner = self.shared.lock();
        if inner.items.is_empty() && !inner.wake_pending {
            inner = match self.shared.ready.wait_timeout(inner, timeout) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        inner.wake_pending = false;
        inner.items.pop_front()
    }

    /// Number of readings waiting.
    pub fn len(&self) -> usize {
        self.shared.lock().items.len()
    }

    /// Whether no readings are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counts `n` readings that were popped but never persisted.
    pub fn count_lost(&self, n: u64) {
        self.shared.count_dropped(n);
    }

    /// A handle the orchestrator can keep after the receiver moves into its
    /// writer thread.
    pub fn monitor(&self) -> QueueMonitor<T> {
        QueueMonitor {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Drop for ReadingReceiver<T> {
    fn drop(&mut self) {
        // Closing and clearing under one lock, so a racing push either lands
        // before the clear or sees the queue closed.
        let mut inner = self.shared.lock();
        inner.closed = true;
        let leftover = inner.items.len() as u64;
        inner.items.clear();
        drop(inner);
        self.shared.count_dropped(leftover);
    }
}

/// An observer of a queue that neither pushes nor pops.
#[derive(Debug)]
pub struct QueueMonitor<T> {
    shared: Arc<Shared<T>>,
}

impl<T> QueueMonitor<T> {
    /// Interrupts a pending [ReadingReceiver::pop_timeout] so the writer
    /// re-checks the exit signal right away.
    pub fn wake(&self) {
        self.shared.lock().wake_pending = true;
        self.shared.ready.notify_all();
    }

    /// Number of readings lost so far on this queue.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Number of readings waiting.
    pub fn len(&self) -> usize {
        self.shared.lock().items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{thread, time::Instant};

    #[test]
    fn pops_in_push_order() {
        let (tx, rx) = channel::<u64>(QueuePolicy::Unbounded);
        let sent: Vec<u64> = (0..1000).map(|i| i * 3 + 1).collect();

        for &v in &sent {
            assert!(tx.push(v));
        }

        let received: Vec<u64> = std::iter::from_fn(|| rx.try_pop()).collect();
        assert_eq!(sent, received);
        assert_eq!(tx.dropped(), 0);
    }

    #[test]
    fn order_survives_a_second_thread() {
        let (tx, rx) = channel::<u64>(QueuePolicy::Unbounded);

        let producer = thread::spawn(move || {
            for i in 0..10_000 {
                tx.push(i);
            }
        });

        let mut expected = 0;
        while expected < 10_000 {
            if let Some(v) = rx.pop_timeout(Duration::from_millis(10)) {
                assert_eq!(v, expected);
                expected += 1;
            }
        }
        producer.join().unwrap();
        assert!(rx.is_empty());
    }

    #[test]
    fn empty_queue_returns_none() {
        let (_tx, rx) = channel::<u8>(QueuePolicy::Unbounded);
        assert_eq!(rx.try_pop(), None);
        assert_eq!(rx.pop_timeout(Duration::from_millis(5)), None);
    }

    #[test]
    fn bounded_queue_rejects_and_counts_overflow() {
        let (tx, rx) = channel::<u32>(QueuePolicy::DropNewest { capacity: 3 });

        let accepted: Vec<bool> = (0..5).map(|i| tx.push(i)).collect();
        assert_eq!(accepted, vec![true, true, true, false, false]);
        assert_eq!(tx.dropped(), 2);

        // the oldest readings are the ones kept
        assert_eq!(rx.try_pop(), Some(0));
        assert!(tx.push(5));
        let rest: Vec<u32> = std::iter::from_fn(|| rx.try_pop()).collect();
        assert_eq!(rest, vec![1, 2, 5]);
        assert_eq!(rx.monitor().dropped(), 2);
    }

    #[test]
    fn pushes_after_receiver_drop_are_counted() {
        let (tx, rx) = channel::<u32>(QueuePolicy::Unbounded);
        tx.push(1);
        tx.push(2);
        let monitor = rx.monitor();
        drop(rx);

        // two left behind, one pushed into the void
        assert!(!tx.push(3));
        assert_eq!(monitor.dropped(), 3);
        assert_eq!(monitor.len(), 0);
    }

    #[test]
    fn racing_receiver_drop_loses_nothing_uncounted() {
        for _ in 0..200 {
            let (tx, rx) = channel::<u32>(QueuePolicy::Unbounded);
            let monitor = rx.monitor();

            let producer = thread::spawn(move || (0..200).filter(|&i| tx.push(i)).count());

            let mut popped = 0;
            while popped < 20 {
                if rx.pop_timeout(Duration::from_millis(10)).is_some() {
                    popped += 1;
                }
            }
            drop(rx);

            let accepted = producer.join().unwrap() as u64;
            assert_eq!(popped + monitor.dropped(), 200);
            assert!(accepted >= popped);
            assert_eq!(monitor.len(), 0);
        }
    }

    #[test]
    fn pop_timeout_wakes_on_push() {
        let (tx, rx) = channel::<u32>(QueuePolicy::Unbounded);

        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            tx.push(7);
            tx
        });

        let start = Instant::now();
        assert_eq!(rx.pop_timeout(Duration::from_secs(5)), Some(7));
        assert!(start.elapsed() < Duration::from_secs(5));
        producer.join().unwrap();
    }

    #[test]
    fn wake_interrupts_a_waiting_receiver() {
        let (_tx, rx) = channel::<u32>(QueuePolicy::Unbounded);
        let monitor = rx.monitor();

        let waiter = thread::spawn(move || {
            let start = Instant::now();
            let got = rx.pop_timeout(Duration::from_secs(10));
            (got, start.elapsed())
        });

        thread::sleep(Duration::from_millis(20));
        monitor.wake();

        let (got, waited) = waiter.join().unwrap();
        assert_eq!(got, None);
        assert!(waited < Duration::from_secs(10));
    }

    #[test]
    fn wake_before_wait_is_not_lost() {
        let (_tx, rx) = channel::<u32>(QueuePolicy::Unbounded);
        rx.monitor().wake();

        let start = Instant::now();
        assert_eq!(rx.pop_timeout(Duration::from_secs(10)), None);
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}

//! One-shot readiness barrier gating request flow.
//!
//! Both workers signal after their slow backend load; the gate releases
//! exactly once when the count reaches the required number and is never
//! re-armed for the process lifetime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

pub struct ReadyBarrier {
    required: usize,
    count: Mutex<usize>,
    cond: Condvar,
    released: AtomicBool,
}

impl ReadyBarrier {
    pub fn new(required: usize) -> Self {
        Self {
            required,
            count: Mutex::new(0),
            cond: Condvar::new(),
            released: AtomicBool::new(false),
        }
    }

    /// Record one worker's load completion. Releases the gate when the
    /// required count is reached.
    pub fn signal_ready(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        if *count >= self.required {
            self.released.store(true, Ordering::SeqCst);
            self.cond.notify_all();
        }
    }

    /// Block until the gate releases.
    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count < self.required {
            count = self.cond.wait(count).unwrap();
        }
    }

    /// Block until the gate releases or the timeout elapses. Returns
    /// whether the gate released.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut count = self.count.lock().unwrap();
        while *count < self.required {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, result) = self.cond.wait_timeout(count, deadline - now).unwrap();
            count = guard;
            if result.timed_out() && *count < self.required {
                return false;
            }
        }
        true
    }

    pub fn is_ready(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_releases_only_at_required_count() {
        let barrier = ReadyBarrier::new(2);
        assert!(!barrier.is_ready());
        barrier.signal_ready();
        assert!(!barrier.is_ready());
        barrier.signal_ready();
        assert!(barrier.is_ready());
        // Returns immediately once released.
        barrier.wait();
    }

    #[test]
    fn test_wait_timeout_expires_when_not_released() {
        let barrier = ReadyBarrier::new(2);
        barrier.signal_ready();
        assert!(!barrier.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn test_unblocks_waiters_in_any_signal_order() {
        let barrier = Arc::new(ReadyBarrier::new(2));
        let mut waiters = Vec::new();
        for _ in 0..3 {
            let b = barrier.clone();
            waiters.push(thread::spawn(move || b.wait()));
        }
        barrier.signal_ready();
        barrier.signal_ready();
        for w in waiters {
            w.join().unwrap();
        }
        assert!(barrier.is_ready());
    }
}

//! Shared pause/cancel signal for one scan run.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Pause gate plus cancel flag shared by the walker and every worker.
///
/// Cancel always wins: it releases paused waiters and cuts throttle sleeps short.
#[derive(Debug, Default)]
pub struct ScanControl {
    cancelled: AtomicBool,
    paused: Mutex<bool>,
    wake: Condvar,
}

impl ScanControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // Take the lock so a waiter between its check and its wait can't miss this.
        let _guard = self.paused.lock();
        self.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn pause(&self) {
        *self.paused.lock() = true;
    }

    pub fn resume(&self) {
        let mut paused = self.paused.lock();
        *paused = false;
        self.wake.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.lock()
    }

    /// Block while paused. Returns `false` if the run was cancelled.
    pub fn wait_while_paused(&self) -> bool {
        let mut paused = self.paused.lock();
        while *paused && !self.is_cancelled() {
            self.wake.wait(&mut paused);
        }
        !self.is_cancelled()
    }

    /// Sleep for `duration` unless cancelled first. Returns `false` if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.is_cancelled();
        }
        let deadline = std::time::Instant::now() + duration;
        let mut paused = self.paused.lock();
        while !self.is_cancelled() {
            if self.wake.wait_until(&mut paused, deadline).timed_out() {
                break;
            }
        }
        !self.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_pause_blocks_until_resume() {
        let control = Arc::new(ScanControl::new());
        control.pause();

        let c = Arc::clone(&control);
        let handle = thread::spawn(move || c.wait_while_paused());

        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());

        control.resume();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_cancel_releases_paused_waiter() {
        let control = Arc::new(ScanControl::new());
        control.pause();

        let c = Arc::clone(&control);
        let handle = thread::spawn(move || c.wait_while_paused());
        thread::sleep(Duration::from_millis(20));

        control.cancel();
        assert!(!handle.join().unwrap());
        assert!(control.is_paused());
    }

    #[test]
    fn test_sleep_is_cut_short_by_cancel() {
        let control = Arc::new(ScanControl::new());
        let c = Arc::clone(&control);
        let start = Instant::now();
        let handle = thread::spawn(move || c.sleep(Duration::from_secs(10)));

        thread::sleep(Duration::from_millis(20));
        control.cancel();
        assert!(!handle.join().unwrap());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_sleep_completes() {
        let control = ScanControl::new();
        assert!(control.sleep(Duration::from_millis(5)));
        assert!(control.sleep(Duration::ZERO));
    }
}

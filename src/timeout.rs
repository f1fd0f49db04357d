//! Whole-run deadline
//!
//! A vacuum run has no partial state worth saving: when the deadline passes
//! the process is terminated and the next scheduled run starts over from
//! the bucket's current contents.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Exit code used when the deadline terminates the run.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Bounds for a configured deadline, in seconds.
pub const MAX_TIMEOUT_SECONDS: u64 = 86_400;

#[derive(Debug, thiserror::Error)]
pub enum TimeoutValidationError {
    #[error("timeout must be in (0, {max}], got {value}")]
    OutOfBounds { value: u64, max: u64 },
}

/// Validate a `--timeout` value.
pub fn validate_timeout(seconds: u64) -> Result<Duration, TimeoutValidationError> {
    if seconds == 0 || seconds > MAX_TIMEOUT_SECONDS {
        return Err(TimeoutValidationError::OutOfBounds {
            value: seconds,
            max: MAX_TIMEOUT_SECONDS,
        });
    }
    Ok(Duration::from_secs(seconds))
}

/// Background watchdog that calls `on_expiry` once the deadline passes,
/// unless disarmed first.
#[derive(Debug)]
pub struct Watchdog {
    disarmed: Arc<AtomicBool>,
}

impl Watchdog {
    /// Poll interval of the watchdog thread.
    const TICK: Duration = Duration::from_millis(100);

    pub fn arm<F>(limit: Duration, on_expiry: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let disarmed = Arc::new(AtomicBool::new(false));
        let started = Instant::now();
        let flag = Arc::clone(&disarmed);

        thread::spawn(move || {
            while started.elapsed() < limit {
                if flag.load(Ordering::SeqCst) {
                    return;
                }
                thread::sleep(Self::TICK.min(limit.saturating_sub(started.elapsed())));
            }
            if !flag.load(Ordering::SeqCst) {
                on_expiry();
            }
        });

        Self { disarmed }
    }

    pub fn disarm(&self) {
        self.disarmed.store(true, Ordering::SeqCst);
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.disarm();
    }
}

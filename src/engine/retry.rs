//! Bounded retries with a random pause, for operations that fail transiently
//! (a busy database, a flaky downstream).

use log::{error, info};
use rand::{Rng, thread_rng};
use std::thread;
use std::time::Duration;

use crate::error::BatchError;

#[derive(Clone, Debug)]
pub struct AttemptsExecutor {
    max_attempts: u32,
    min_pause: Duration,
    max_pause: Duration,
}

impl Default for AttemptsExecutor {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_pause: Duration::ZERO,
            max_pause: Duration::from_secs(3),
        }
    }
}

impl AttemptsExecutor {
    pub fn new(
        max_attempts: u32,
        min_pause: Duration,
        max_pause: Duration,
    ) -> Result<Self, BatchError> {
        if max_attempts == 0 {
            return Err(BatchError::config("max_attempts must be at least 1"));
        }
        if min_pause > max_pause {
            return Err(BatchError::config(format!(
                "min_pause ({min_pause:?}) is above max_pause ({max_pause:?})"
            )));
        }
        Ok(Self {
            max_attempts,
            min_pause,
            max_pause,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `op` until it succeeds, fails with an error `is_retryable` rejects, or runs out of
    /// attempts. The last error is returned as is.
    pub fn run<T, E, F, R>(&self, mut op: F, is_retryable: R) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        R: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if !is_retryable(&e) => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    error!(
                        "Operation failed after {} attempts, giving up: {}",
                        self.max_attempts, e
                    );
                    return Err(e);
                }
                Err(e) => {
                    info!(
                        "Operation failed: {}, re-attempting ({} left)",
                        e,
                        self.max_attempts - attempt
                    );
                    attempt += 1;
                    let pause = self.pause();
                    if !pause.is_zero() {
                        thread::sleep(pause);
                    }
                }
            }
        }
    }

    fn pause(&self) -> Duration {
        if self.max_pause <= self.min_pause {
            return self.min_pause;
        }
        thread_rng().gen_range(self.min_pause..=self.max_pause)
    }
}

//! Submission pacing: a fixed delay between submissions, and a variant that adapts the delay
//! to success / overload feedback.

use log::debug;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use super::task::{TaskObserver, TaskOutcome, TaskReport};
use crate::error::BatchError;
use crate::types::RateOpts;
use crate::utils::config::RateConsts;

#[derive(Debug)]
struct RateState {
    delay: Duration,
    /// Start of the most recent submission slot.
    last_slot: Option<Instant>,
    consecutive_successes: u32,
    consecutive_failures: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateSnapshot {
    pub delay: Duration,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

/// Spaces submissions by at least the current delay.
///
/// A caller reserves its slot under the lock and sleeps outside it, so concurrent callers
/// queue up one delay apart instead of racing on the same slot.
pub struct RateLimitedExecutor {
    state: Mutex<RateState>,
}

impl RateLimitedExecutor {
    pub fn new(delay: Duration) -> Self {
        Self {
            state: Mutex::new(RateState {
                delay,
                last_slot: None,
                consecutive_successes: 0,
                consecutive_failures: 0,
            }),
        }
    }

    /// Wait until the current delay has passed since the previous slot.
    pub fn pace(&self) {
        let wait = {
            let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            // The delay in force now applies, even if it changed after the last slot.
            let slot = st
                .last_slot
                .and_then(|last| last.checked_add(st.delay))
                .map_or(now, |earliest| earliest.max(now));
            st.last_slot = Some(slot);
            slot - now
        };
        if !wait.is_zero() {
            thread::sleep(wait);
        }
    }

    /// Wait for a slot, then run `task` on the calling thread.
    pub fn submit<F, R>(&self, task: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.pace();
        task()
    }

    pub fn current_delay(&self) -> Duration {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).delay
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).delay = delay;
    }

    pub fn snapshot(&self) -> RateSnapshot {
        let st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        RateSnapshot {
            delay: st.delay,
            consecutive_successes: st.consecutive_successes,
            consecutive_failures: st.consecutive_failures,
        }
    }

    fn update<F>(&self, f: F) -> Duration
    where
        F: FnOnce(&mut RateState),
    {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut st);
        st.delay
    }
}

/// A [`RateLimitedExecutor`] whose delay shrinks on success and grows on overload,
/// always staying within `[rate_min, rate_max]`.
pub struct DynamicRateExecutor {
    pacer: RateLimitedExecutor,
    opts: RateOpts,
}

impl DynamicRateExecutor {
    /// Starts at `rate_min`.
    pub fn new(opts: RateOpts) -> Result<Self, BatchError> {
        opts.validate()?;
        Ok(Self {
            pacer: RateLimitedExecutor::new(opts.rate_min),
            opts,
        })
    }

    pub fn opts(&self) -> &RateOpts {
        &self.opts
    }

    pub fn pace(&self) {
        self.pacer.pace();
    }

    /// Run `task` after the current delay; `Ok` counts as success, `Err` as overload.
    pub fn submit<F, T, E>(&self, task: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.submit_classified(task, |_| true)
    }

    /// Like [`submit`](Self::submit), but only errors for which `is_overload` holds grow the
    /// delay. Other errors leave it unchanged.
    pub fn submit_classified<F, T, E, C>(&self, task: F, is_overload: C) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        C: FnOnce(&E) -> bool,
    {
        self.pacer.pace();
        let res = task();
        match &res {
            Ok(_) => self.record_success(),
            Err(e) if is_overload(e) => self.record_failure(),
            Err(_) => {}
        }
        res
    }

    pub fn record_success(&self) {
        let (min, decay) = (self.opts.rate_min, self.opts.rate_decay_factor);
        self.pacer.update(|st| {
            st.delay = decayed(st.delay, min, decay);
            st.consecutive_successes = st.consecutive_successes.saturating_add(1);
            st.consecutive_failures = 0;
        });
    }

    pub fn record_failure(&self) {
        let (min, max, growth) = (
            self.opts.rate_min,
            self.opts.rate_max,
            self.opts.rate_growth_factor,
        );
        let delay = self.pacer.update(|st| {
            st.delay = grown(st.delay, min, max, growth);
            st.consecutive_failures = st.consecutive_failures.saturating_add(1);
            st.consecutive_successes = 0;
        });
        debug!("Overload reported, submission delay now {:?}", delay);
    }

    pub fn current_delay(&self) -> Duration {
        self.pacer.current_delay()
    }

    pub fn snapshot(&self) -> RateSnapshot {
        self.pacer.snapshot()
    }
}

impl TaskObserver for DynamicRateExecutor {
    fn on_finished(&self, report: &TaskReport<'_>) {
        match report.outcome {
            TaskOutcome::Completed { .. } => self.record_success(),
            TaskOutcome::Failed { error, .. } if error.is_overload() => self.record_failure(),
            _ => {}
        }
    }
}

fn nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// `max(min, delay * decay)`, strictly below `delay` unless already at `min`.
fn decayed(delay: Duration, min: Duration, decay: f64) -> Duration {
    if delay <= min {
        return min;
    }
    let cur = nanos(delay);
    let mut next = (cur as f64 * decay) as u64;
    if next >= cur {
        next = cur - 1;
    }
    Duration::from_nanos(next).max(min)
}

/// `min(max, delay * growth)`, strictly above `delay` unless already at `max`.
/// A zero delay grows to the seed delay first.
fn grown(delay: Duration, min: Duration, max: Duration, growth: f64) -> Duration {
    if delay >= max {
        return max;
    }
    let cur = nanos(delay);
    let next = if cur == 0 {
        nanos(RateConsts::SEED_DELAY.max(min))
    } else {
        let scaled = (cur as f64 * growth).ceil();
        let scaled = if scaled >= u64::MAX as f64 {
            u64::MAX
        } else {
            scaled as u64
        };
        scaled.max(cur + 1)
    };
    Duration::from_nanos(next).clamp(min, max)
}


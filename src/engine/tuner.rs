//! Pool size recommendation from recent completion timing.
//!
//! [`recommend`] is a pure function of its input: the service gathers the window under its
//! pool lock, calls it, and applies the result with hysteresis.

use std::time::Duration;

use crate::utils::config::TuningConsts;

/// Everything the tuner looks at.
#[derive(Clone, Debug)]
pub struct TuningInput<'a> {
    /// Completion times, oldest first.
    pub samples: &'a [Duration],
    pub current: usize,
    pub min: usize,
    pub max: usize,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    /// Fraction of worker time spent running jobs since the last pass, in [0, 1].
    pub utilisation: f64,
}

/// Direction of mean completion time between the older and newer half of the window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trend {
    Improving,
    Flat,
    Degrading,
}

/// Compare the mean of the newer half of `samples` against the older half.
pub fn trend(samples: &[Duration]) -> Trend {
    let mid = samples.len() / 2;
    let (older, newer) = samples.split_at(mid);
    if older.is_empty() || newer.is_empty() {
        return Trend::Flat;
    }
    let old = mean_secs(older);
    let new = mean_secs(newer);
    if old <= 0.0 {
        return if new > 0.0 { Trend::Degrading } else { Trend::Flat };
    }
    let change = (new - old) / old;
    if change < -TuningConsts::TREND_TOLERANCE {
        Trend::Improving
    } else if change > TuningConsts::TREND_TOLERANCE {
        Trend::Degrading
    } else {
        Trend::Flat
    }
}

fn mean_secs(samples: &[Duration]) -> f64 {
    let total: f64 = samples.iter().map(Duration::as_secs_f64).sum();
    total / samples.len() as f64
}

/// Queue pressure is high when the queue is at least half full.
pub fn queue_pressure(depth: usize, capacity: usize) -> bool {
    capacity > 0 && depth * 2 >= capacity
}

/// Recommended pool size, always within `[min, max]`.
pub fn recommend(input: &TuningInput<'_>) -> usize {
    let (min, max) = (input.min, input.max.max(input.min));
    let current = input.current;
    if input.samples.len() < TuningConsts::MIN_SAMPLES {
        return current.clamp(min, max);
    }

    let step = (current / 4).max(1);
    let pressure = queue_pressure(input.queue_depth, input.queue_capacity);
    let trend = trend(input.samples);

    let next = if input.utilisation < TuningConsts::LOW_UTILISATION {
        current.saturating_sub(step)
    } else if trend == Trend::Improving && pressure {
        current.saturating_add(step)
    } else if trend == Trend::Flat && !pressure && current > (min + max) / 2 {
        current.saturating_sub(step)
    } else {
        current
    };
    next.clamp(min, max)
}

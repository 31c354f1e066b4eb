use batchwerk::engine::tuner::{Trend, TuningInput, queue_pressure, recommend, trend};
use std::time::Duration;

fn ms(v: &[u64]) -> Vec<Duration> {
    v.iter().map(|&m| Duration::from_millis(m)).collect()
}

fn input(samples: &[Duration], current: usize) -> TuningInput<'_> {
    TuningInput {
        samples,
        current,
        min: 1,
        max: 8,
        queue_depth: 0,
        queue_capacity: 16,
        utilisation: 0.9,
    }
}

// --- trend ---

#[test]
fn test_trend_improving() {
    assert_eq!(trend(&ms(&[100, 100, 50, 50])), Trend::Improving);
}

#[test]
fn test_trend_degrading() {
    assert_eq!(trend(&ms(&[50, 50, 100, 100])), Trend::Degrading);
}

#[test]
fn test_trend_flat_within_tolerance() {
    assert_eq!(trend(&ms(&[100, 100, 102, 101])), Trend::Flat);
}

#[test]
fn test_queue_pressure_half_full() {
    assert!(queue_pressure(8, 16));
    assert!(!queue_pressure(7, 16));
    assert!(!queue_pressure(0, 0));
}

// --- recommend ---

#[test]
fn test_too_few_samples_keeps_size() {
    let s = ms(&[10, 10, 10]);
    assert_eq!(recommend(&input(&s, 4)), 4);
}

#[test]
fn test_too_few_samples_still_clamps() {
    let s = ms(&[]);
    assert_eq!(recommend(&input(&s, 20)), 8);
    assert_eq!(recommend(&input(&s, 0)), 1);
}

#[test]
fn test_improving_with_pressure_grows() {
    let s = ms(&[100, 100, 50, 50]);
    let mut i = input(&s, 4);
    i.queue_depth = 12;
    assert_eq!(recommend(&i), 5);
}

#[test]
fn test_growth_capped_at_max() {
    let s = ms(&[100, 100, 50, 50]);
    let mut i = input(&s, 8);
    i.queue_depth = 16;
    assert_eq!(recommend(&i), 8);
}

#[test]
fn test_low_utilisation_shrinks() {
    let s = ms(&[10, 10, 10, 10]);
    let mut i = input(&s, 8);
    i.utilisation = 0.1;
    assert_eq!(recommend(&i), 6);
}

#[test]
fn test_flat_without_pressure_above_midpoint_shrinks() {
    let s = ms(&[10, 10, 10, 10]);
    assert_eq!(recommend(&input(&s, 8)), 6);
}

#[test]
fn test_flat_at_or_below_midpoint_stays() {
    let s = ms(&[10, 10, 10, 10]);
    assert_eq!(recommend(&input(&s, 4)), 4);
}

#[test]
fn test_degrading_is_ambiguous() {
    let s = ms(&[10, 10, 40, 40]);
    let mut i = input(&s, 6);
    i.queue_depth = 16;
    assert_eq!(recommend(&i), 6);
}

#[test]
fn test_shrink_never_below_min() {
    let s = ms(&[10, 10, 10, 10]);
    let mut i = input(&s, 2);
    i.min = 2;
    i.utilisation = 0.0;
    assert_eq!(recommend(&i), 2);
}

#[test]
fn test_recommend_is_deterministic() {
    let s = ms(&[30, 20, 25, 10, 12, 9, 40, 8]);
    let mut i = input(&s, 5);
    i.queue_depth = 9;
    let first = recommend(&i);
    for _ in 0..10 {
        assert_eq!(recommend(&i), first);
    }
}

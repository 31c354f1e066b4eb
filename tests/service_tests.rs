use anyhow::anyhow;
use batchwerk::engine::{BatchService, TaskContext, TaskOutcome};
use batchwerk::types::BatchOpts;
use batchwerk::BatchError;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

fn fixed(workers: usize) -> BatchService {
    BatchService::new(BatchOpts::fixed(workers)).unwrap()
}

fn noop() -> Arc<impl Fn(Vec<u32>, &TaskContext) -> anyhow::Result<()> + Send + Sync> {
    Arc::new(|_batch: Vec<u32>, _ctx: &TaskContext| -> anyhow::Result<()> { Ok(()) })
}

// --- submit / outcomes ---

#[test]
fn test_submit_and_wait_completed() {
    let svc = fixed(2);
    let handle = svc.submit(vec![1, 2, 3], noop()).unwrap();
    assert!(handle.wait().is_completed());
    assert_eq!(handle.items(), 3);
    svc.shutdown(true);
}

#[test]
fn test_sequence_numbers_follow_submission_order() {
    let svc = fixed(1);
    let seqs: Vec<u64> = (0..4)
        .map(|i| svc.submit(vec![i], noop()).unwrap().seq())
        .collect();
    assert_eq!(seqs, vec![0, 1, 2, 3]);
    svc.shutdown(true);
}

#[test]
fn test_all_success_accounting() {
    let svc = fixed(3);
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_job = Arc::clone(&seen);
    let job = Arc::new(move |batch: Vec<u32>, _ctx: &TaskContext| -> anyhow::Result<()> {
        seen_job.fetch_add(batch.len(), Ordering::SeqCst);
        Ok(())
    });
    for i in 0..10 {
        svc.submit(vec![i, i + 1], Arc::clone(&job)).unwrap();
    }
    let counts = svc.await_completion(Some(Duration::from_secs(10)));
    assert!(!counts.timed_out);
    assert_eq!(counts.completed, 10);
    assert_eq!(counts.failed, 0);
    assert_eq!(counts.pending, 0);
    assert_eq!(seen.load(Ordering::SeqCst), 20);
    let snap = svc.snapshot().counts;
    assert_eq!(snap.items_submitted, 20);
    assert_eq!(snap.items_completed, 20);
    svc.shutdown(true);
}

#[test]
fn test_mixed_accounting_and_failure_log() {
    let svc = fixed(2);
    let job = Arc::new(|batch: Vec<u32>, _ctx: &TaskContext| -> anyhow::Result<()> {
        if batch[0] % 2 == 1 {
            return Err(anyhow!("odd batch {}", batch[0]));
        }
        Ok(())
    });
    for i in 0..6 {
        svc.submit(vec![i], Arc::clone(&job)).unwrap();
    }
    let counts = svc.await_completion(Some(Duration::from_secs(10)));
    assert_eq!(counts.completed, 3);
    assert_eq!(counts.failed, 3);
    let failures = svc.failures();
    assert_eq!(failures.len(), 3);
    assert!(failures.iter().all(|f| f.message.contains("odd batch")));
    let snap = svc.snapshot().counts;
    assert_eq!(
        snap.items_submitted,
        snap.items_completed + snap.items_failed + snap.items_cancelled
    );
    svc.shutdown(true);
}

#[test]
fn test_panic_is_a_failure_and_pool_survives() {
    let svc = fixed(1);
    let boom = Arc::new(|_b: Vec<u32>, _ctx: &TaskContext| -> anyhow::Result<()> {
        panic!("job exploded");
    });
    let h = svc.submit(vec![1], boom).unwrap();
    match h.wait() {
        TaskOutcome::Failed { error, .. } => assert!(error.to_string().contains("job exploded")),
        other => panic!("unexpected outcome {other:?}"),
    }
    let h = svc.submit(vec![2], noop()).unwrap();
    assert!(h.wait().is_completed());
    svc.shutdown(true);
}

#[test]
fn test_overloaded_error_kept_in_outcome() {
    let svc = fixed(1);
    let job = Arc::new(|_b: Vec<u32>, _ctx: &TaskContext| -> anyhow::Result<()> {
        Err(BatchError::overloaded("downstream full").into())
    });
    let h = svc.submit(vec![1], job).unwrap();
    match h.wait() {
        TaskOutcome::Failed { error, .. } => assert!(error.is_overload()),
        other => panic!("unexpected outcome {other:?}"),
    }
    svc.shutdown(true);
}

// --- back-pressure ---

#[test]
fn test_submit_blocks_while_queue_full() {
    let svc = BatchService::new(BatchOpts::fixed(1).with_queue_capacity(1)).unwrap();
    let slow = Arc::new(|_b: Vec<u32>, _ctx: &TaskContext| -> anyhow::Result<()> {
        thread::sleep(Duration::from_millis(100));
        Ok(())
    });
    let start = Instant::now();
    // One running, one queued, the third has to wait for the first to finish.
    for i in 0..3 {
        svc.submit(vec![i], Arc::clone(&slow)).unwrap();
    }
    assert!(start.elapsed() >= Duration::from_millis(60));
    let counts = svc.shutdown(true);
    assert_eq!(counts.completed, 3);
}

// --- shutdown ---

#[test]
fn test_forced_shutdown_cancels_queued_and_running() {
    let svc = BatchService::new(BatchOpts::fixed(1).with_queue_capacity(4)).unwrap();
    let (started_tx, started_rx) = crossbeam_channel::bounded::<()>(1);
    let blocker = Arc::new(move |_b: Vec<u32>, ctx: &TaskContext| -> anyhow::Result<()> {
        let _ = started_tx.send(());
        loop {
            ctx.ensure_active()?;
            thread::sleep(Duration::from_millis(5));
        }
    });
    let running = svc.submit(vec![0], blocker).unwrap();
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    let queued: Vec<_> = (1..4)
        .map(|i| svc.submit(vec![i], noop()).unwrap())
        .collect();

    let counts = svc.shutdown(false);
    assert_eq!(counts.cancelled, 4);
    assert_eq!(counts.completed, 0);
    assert_eq!(counts.pending, 0);
    assert!(running.wait().is_cancelled());
    for h in queued {
        assert!(h.wait().is_cancelled());
    }
}

#[test]
fn test_graceful_shutdown_finishes_queued_work() {
    let svc = BatchService::new(BatchOpts::fixed(1).with_queue_capacity(8)).unwrap();
    let job = Arc::new(|_b: Vec<u32>, _ctx: &TaskContext| -> anyhow::Result<()> {
        thread::sleep(Duration::from_millis(10));
        Ok(())
    });
    for i in 0..5 {
        svc.submit(vec![i], Arc::clone(&job)).unwrap();
    }
    let counts = svc.shutdown(true);
    assert_eq!(counts.completed, 5);
    assert_eq!(counts.cancelled, 0);
    assert!(!counts.timed_out);
}

#[test]
fn test_submit_after_shutdown_rejected() {
    let svc = fixed(1);
    svc.shutdown(true);
    let err = svc.submit(vec![1], noop()).err();
    assert_eq!(err, Some(BatchError::Rejected));
    assert!(svc.is_shutdown());
    assert_eq!(svc.snapshot().counts.batches_submitted, 0);
}

#[test]
fn test_shutdown_is_idempotent() {
    let svc = fixed(2);
    svc.submit(vec![1], noop()).unwrap();
    let first = svc.shutdown(true);
    let second = svc.shutdown(false);
    assert_eq!(first, second);
}

#[test]
fn test_await_completion_times_out() {
    let svc = fixed(1);
    let slow = Arc::new(|_b: Vec<u32>, _ctx: &TaskContext| -> anyhow::Result<()> {
        thread::sleep(Duration::from_millis(300));
        Ok(())
    });
    svc.submit(vec![1], slow).unwrap();
    let counts = svc.await_completion(Some(Duration::from_millis(20)));
    assert!(counts.timed_out);
    assert_eq!(counts.pending, 1);
    svc.shutdown(true);
}

// --- pool sizing ---

#[test]
fn test_pool_starts_at_max() {
    let svc = BatchService::new(BatchOpts::default().with_pool_bounds(1, 3)).unwrap();
    assert_eq!(svc.pool_size(), 3);
    svc.shutdown(true);
}

#[test]
fn test_idle_pool_shrinks_to_min() {
    let opts = BatchOpts::default()
        .with_pool_bounds(1, 4)
        .with_queue_capacity(8)
        .with_tuning(4, 8, 1);
    let svc = BatchService::new(opts).unwrap();
    for i in 0..40 {
        svc.submit(vec![i], noop()).unwrap();
        thread::sleep(Duration::from_millis(3));
    }
    svc.await_completion(Some(Duration::from_secs(10)));
    assert_eq!(svc.pool_size(), 1);
    let snap = svc.snapshot();
    assert!(snap.live_workers >= 1);
    svc.shutdown(true);
}

#[test]
fn test_invalid_opts_rejected() {
    let opts = BatchOpts::default().with_pool_bounds(4, 2);
    assert!(matches!(BatchService::new(opts), Err(BatchError::Config(_))));
}

#[test]
fn test_pool_never_shrinks_below_running_tasks() {
    let opts = BatchOpts::default()
        .with_pool_bounds(1, 4)
        .with_queue_capacity(16)
        .with_tuning(1, 4, 1);
    let svc = BatchService::new(opts).unwrap();
    let release = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let (started_tx, started_rx) = crossbeam_channel::unbounded::<()>();
    let gate = Arc::clone(&release);
    let long = Arc::new(move |_b: Vec<u32>, _ctx: &TaskContext| -> anyhow::Result<()> {
        let _ = started_tx.send(());
        while !gate.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(2));
        }
        Ok(())
    });
    for i in 0..3 {
        svc.submit(vec![i], Arc::clone(&long)).unwrap();
    }
    for _ in 0..3 {
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }
    // Quick jobs on the spare worker keep the tuner running with almost no busy time.
    for i in 0..8 {
        svc.submit(vec![i], noop()).unwrap();
        thread::sleep(Duration::from_millis(5));
    }
    thread::sleep(Duration::from_millis(100));
    let snap = svc.snapshot();
    assert_eq!(snap.running, 3);
    assert!(svc.pool_size() >= 3, "pool shrank to {}", svc.pool_size());

    release.store(true, Ordering::SeqCst);
    let counts = svc.shutdown(true);
    assert_eq!(counts.completed, 11);
}

#[test]
fn test_live_workers_match_target_after_start() {
    for _ in 0..50 {
        let svc = fixed(8);
        thread::sleep(Duration::from_millis(5));
        let snap = svc.snapshot();
        assert_eq!(snap.live_workers, snap.pool_size);
        svc.shutdown(false);
    }
}

#[cfg(target_pointer_width = "64")]
#[test]
fn test_spawn_failure_below_min_is_a_resize_error() {
    // No system can map a stack this large, so every spawn fails.
    let opts = BatchOpts::fixed(2).with_worker_stack_size(usize::MAX / 4);
    match BatchService::new(opts) {
        Err(BatchError::Resize(msg)) => assert!(msg.contains("spawn")),
        Err(other) => panic!("unexpected error {other:?}"),
        Ok(_) => panic!("service started without workers"),
    }
}

// --- unbounded waits ---

#[test]
fn test_await_completion_with_huge_timeout() {
    let svc = fixed(1);
    svc.submit(vec![1], noop()).unwrap();
    let counts = svc.await_completion(Some(Duration::MAX));
    assert!(!counts.timed_out);
    assert_eq!(counts.completed, 1);
    svc.shutdown(true);
}

#[test]
fn test_graceful_shutdown_with_huge_timeout() {
    let mut opts = BatchOpts::fixed(1);
    opts.graceful_shutdown_timeout = Duration::MAX;
    let svc = BatchService::new(opts).unwrap();
    svc.submit(vec![1], noop()).unwrap();
    let counts = svc.shutdown(true);
    assert_eq!(counts.completed, 1);
    assert!(!counts.timed_out);
}

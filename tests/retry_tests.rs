use batchwerk::AttemptsExecutor;
use std::cell::Cell;
use std::time::{Duration, Instant};

fn quick(attempts: u32) -> AttemptsExecutor {
    AttemptsExecutor::new(attempts, Duration::ZERO, Duration::from_millis(2)).unwrap()
}

#[test]
fn test_default_is_three_attempts() {
    assert_eq!(AttemptsExecutor::default().max_attempts(), 3);
}

#[test]
fn test_success_first_try() {
    let calls = Cell::new(0);
    let res: Result<&str, String> = quick(3).run(
        || {
            calls.set(calls.get() + 1);
            Ok("done")
        },
        |_| true,
    );
    assert_eq!(res.unwrap(), "done");
    assert_eq!(calls.get(), 1);
}

#[test]
fn test_retries_until_success() {
    let calls = Cell::new(0);
    let res: Result<u32, String> = quick(3).run(
        || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(format!("busy {}", calls.get()))
            } else {
                Ok(calls.get())
            }
        },
        |_| true,
    );
    assert_eq!(res.unwrap(), 3);
}

#[test]
fn test_gives_up_with_last_error() {
    let calls = Cell::new(0);
    let res: Result<(), String> = quick(4).run(
        || {
            calls.set(calls.get() + 1);
            Err(format!("busy {}", calls.get()))
        },
        |_| true,
    );
    assert_eq!(res.unwrap_err(), "busy 4");
    assert_eq!(calls.get(), 4);
}

#[test]
fn test_non_retryable_error_returns_immediately() {
    let calls = Cell::new(0);
    let res: Result<(), String> = quick(5).run(
        || {
            calls.set(calls.get() + 1);
            Err("syntax error".to_string())
        },
        |e| e.starts_with("busy"),
    );
    assert!(res.is_err());
    assert_eq!(calls.get(), 1);
}

#[test]
fn test_pause_between_attempts() {
    let exec = AttemptsExecutor::new(3, Duration::from_millis(20), Duration::from_millis(20)).unwrap();
    let start = Instant::now();
    let _: Result<(), &str> = exec.run(|| Err("busy"), |_| true);
    assert!(start.elapsed() >= Duration::from_millis(40));
}

#[test]
fn test_invalid_settings_rejected() {
    assert!(AttemptsExecutor::new(0, Duration::ZERO, Duration::ZERO).is_err());
    assert!(AttemptsExecutor::new(2, Duration::from_secs(2), Duration::from_secs(1)).is_err());
}

use std::time::Duration;

use push_delivery::models::retry::RetryConfig;

fn config() -> RetryConfig {
    RetryConfig {
        max_attempts: 5,
        base_delay_ms: 2_000,
        max_delay_ms: 300_000,
    }
}

/// Test: First attempt backs off by exactly the base delay
#[test]
fn test_first_delay_equals_base() {
    let config = config();

    assert_eq!(config.delay(1), Duration::from_millis(2_000));
}

/// Test: Delays double per attempt until the cap
#[test]
fn test_delays_double_per_attempt() {
    let config = config();

    assert_eq!(config.delay(2), Duration::from_millis(4_000));
    assert_eq!(config.delay(3), Duration::from_millis(8_000));
    assert_eq!(config.delay(8), Duration::from_millis(256_000));
}

/// Test: Delay growth is monotonic and never exceeds the cap
#[test]
fn test_delay_monotonic_and_capped() {
    let config = config();
    let cap = Duration::from_millis(config.max_delay_ms);

    for attempt in 1..=40 {
        let current = config.delay(attempt);
        let next = config.delay(attempt + 1);

        assert!(current <= next, "delay({}) > delay({})", attempt, attempt + 1);
        assert!(current <= cap, "delay({}) exceeds cap", attempt);
    }
}

/// Test: Cap applies from the first attempt that would overshoot it
#[test]
fn test_delay_caps_at_maximum() {
    let config = config();

    assert_eq!(config.delay(9), Duration::from_millis(300_000));
    assert_eq!(config.delay(64), Duration::from_millis(300_000));
}

/// Test: Attempt numbers below one are treated as the first attempt
#[test]
fn test_zero_attempt_uses_base_delay() {
    let config = config();

    assert_eq!(config.delay(0), Duration::from_millis(2_000));
}

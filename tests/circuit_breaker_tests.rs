use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use push_delivery::{
    clients::circuit_breaker::CircuitBreaker,
    error::DeliveryError,
    models::circuit_breaker::{CircuitBreakerConfig, CircuitState},
};
use tokio::time::{Duration, advance};

fn breaker() -> CircuitBreaker {
    CircuitBreaker::new(
        "push_gateway".to_string(),
        CircuitBreakerConfig {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_seconds: 60,
        },
    )
}

async fn transient_failure(breaker: &CircuitBreaker, calls: &AtomicU32) -> Result<(), DeliveryError> {
    breaker
        .call(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(DeliveryError::Transient("gateway timeout".to_string()))
        })
        .await
}

async fn success(breaker: &CircuitBreaker, calls: &AtomicU32) -> Result<(), DeliveryError> {
    breaker
        .call(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
}

/// Test: Breaker opens after the failure threshold is reached
#[tokio::test(start_paused = true)]
async fn test_breaker_opens_after_failure_threshold() {
    let breaker = breaker();
    let calls = AtomicU32::new(0);

    for _ in 0..4 {
        let _ = transient_failure(&breaker, &calls).await;
        assert_eq!(breaker.current_state(), CircuitState::Closed);
    }

    let _ = transient_failure(&breaker, &calls).await;

    assert_eq!(breaker.current_state(), CircuitState::Open);
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

/// Test: An open breaker fails fast without invoking the dependency
#[tokio::test(start_paused = true)]
async fn test_open_breaker_fails_fast() {
    let breaker = breaker();
    let calls = AtomicU32::new(0);

    for _ in 0..5 {
        let _ = transient_failure(&breaker, &calls).await;
    }

    let result = success(&breaker, &calls).await;

    assert!(matches!(result, Err(DeliveryError::CircuitOpen { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 5, "dependency must not be touched");
}

/// Test: Success in closed state resets the failure streak
#[tokio::test(start_paused = true)]
async fn test_success_resets_failure_streak() {
    let breaker = breaker();
    let calls = AtomicU32::new(0);

    for _ in 0..4 {
        let _ = transient_failure(&breaker, &calls).await;
    }

    success(&breaker, &calls).await.unwrap();

    for _ in 0..4 {
        let _ = transient_failure(&breaker, &calls).await;
    }
    assert_eq!(breaker.current_state(), CircuitState::Closed);

    let _ = transient_failure(&breaker, &calls).await;
    assert_eq!(breaker.current_state(), CircuitState::Open);
}

/// Test: After the timeout, trial calls close the breaker on enough successes
#[tokio::test(start_paused = true)]
async fn test_breaker_recovers_through_half_open() {
    let breaker = breaker();
    let calls = AtomicU32::new(0);

    for _ in 0..5 {
        let _ = transient_failure(&breaker, &calls).await;
    }
    assert_eq!(breaker.current_state(), CircuitState::Open);

    advance(Duration::from_secs(61)).await;

    success(&breaker, &calls).await.unwrap();
    assert_eq!(breaker.current_state(), CircuitState::HalfOpen);

    success(&breaker, &calls).await.unwrap();
    assert_eq!(breaker.current_state(), CircuitState::Closed);
    assert_eq!(calls.load(Ordering::SeqCst), 7);
}

/// Test: A failed trial call reopens the breaker for a fresh timeout
#[tokio::test(start_paused = true)]
async fn test_failed_trial_reopens_breaker() {
    let breaker = breaker();
    let calls = AtomicU32::new(0);

    for _ in 0..5 {
        let _ = transient_failure(&breaker, &calls).await;
    }

    advance(Duration::from_secs(61)).await;

    let _ = transient_failure(&breaker, &calls).await;
    assert_eq!(breaker.current_state(), CircuitState::Open);
    assert_eq!(calls.load(Ordering::SeqCst), 6);

    let result = success(&breaker, &calls).await;
    assert!(matches!(result, Err(DeliveryError::CircuitOpen { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 6);

    advance(Duration::from_secs(61)).await;

    success(&breaker, &calls).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 7);
}

/// Test: Only one trial call is admitted while half-open
#[tokio::test(start_paused = true)]
async fn test_half_open_admits_single_probe() {
    let breaker = Arc::new(breaker());
    let calls = Arc::new(AtomicU32::new(0));

    for _ in 0..5 {
        let _ = transient_failure(&breaker, &calls).await;
    }

    advance(Duration::from_secs(61)).await;

    let (release, gate) = tokio::sync::oneshot::channel::<()>();
    let probe_breaker = Arc::clone(&breaker);
    let probe_calls = Arc::clone(&calls);

    let probe = tokio::spawn(async move {
        probe_breaker
            .call(|| async move {
                probe_calls.fetch_add(1, Ordering::SeqCst);
                gate.await.ok();
                Ok::<_, DeliveryError>(())
            })
            .await
    });

    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    let second = success(&breaker, &calls).await;
    assert!(
        matches!(second, Err(DeliveryError::CircuitOpen { .. })),
        "second call must be shed while the probe is in flight"
    );

    release.send(()).unwrap();
    probe.await.unwrap().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 6);
    assert_eq!(breaker.current_state(), CircuitState::HalfOpen);
}

/// Test: Authoritative permanent rejections do not trip the breaker
#[tokio::test(start_paused = true)]
async fn test_permanent_rejections_do_not_trip_breaker() {
    let breaker = breaker();

    for _ in 0..8 {
        let result = breaker
            .call(|| async {
                Err::<(), _>(DeliveryError::Permanent("unregistered token".to_string()))
            })
            .await;
        assert!(matches!(result, Err(DeliveryError::Permanent(_))));
    }

    assert_eq!(breaker.current_state(), CircuitState::Closed);
}

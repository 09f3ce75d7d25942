//! Admission behavior of every algorithm through the public factory.

use std::collections::HashMap;
use std::sync::Arc;

use turnstile::ratelimit::{build_with_clock, RateLimiter};
use turnstile::{Algorithm, MockClock, TurnstileError};

fn policy(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

async fn limiter(pairs: &[(&str, &str)]) -> (Arc<dyn RateLimiter>, MockClock) {
    let clock = MockClock::default();
    let limiter = build_with_clock(&policy(pairs), Arc::new(clock.clone()))
        .await
        .unwrap();
    (limiter, clock)
}

fn local_policies() -> Vec<Vec<(&'static str, &'static str)>> {
    vec![
        vec![("algorithm", "token-bucket"), ("capacity", "7"), ("refillRate", "1")],
        vec![("algorithm", "fixed-window"), ("capacity", "7"), ("duration", "60")],
        vec![("algorithm", "sliding-window-log"), ("capacity", "7"), ("duration", "60")],
        vec![
            ("algorithm", "sliding-window-counter"),
            ("capacity", "7"),
            ("duration", "60"),
            ("weight", "1"),
        ],
    ]
}

#[tokio::test]
async fn test_every_algorithm_admits_exactly_capacity() {
    for pairs in local_policies() {
        let (limiter, _clock) = limiter(&pairs).await;

        for _ in 0..7 {
            assert!(limiter.allow("fresh").await.is_ok(), "{}", limiter.algorithm());
        }
        let err = limiter.allow("fresh").await.unwrap_err();
        assert!(err.is_rate_limited(), "{}", limiter.algorithm());
    }
}

#[tokio::test]
async fn test_identities_do_not_share_quota() {
    for pairs in local_policies() {
        let (limiter, _clock) = limiter(&pairs).await;

        for _ in 0..7 {
            limiter.allow("a").await.unwrap();
        }
        assert!(limiter.allow("a").await.is_err());
        assert_eq!(limiter.allow("b").await.unwrap().remaining, 6);
    }
}

#[tokio::test]
async fn test_token_bucket_scenario() {
    let (limiter, clock) = limiter(&[
        ("algorithm", "token-bucket"),
        ("capacity", "10"),
        ("refillRate", "1"),
    ])
    .await;

    for expected in (0..10).rev() {
        let decision = limiter.allow("u1").await.unwrap();
        assert_eq!(decision.remaining, expected);
        assert_eq!(decision.algorithm, Algorithm::TokenBucket);
        assert_eq!(decision.capacity, 10);
    }
    assert!(limiter.allow("u1").await.is_err());

    clock.advance_secs(5);
    for expected in (0..5).rev() {
        assert_eq!(limiter.allow("u1").await.unwrap().remaining, expected);
    }
    assert!(limiter.allow("u1").await.is_err());
}

#[tokio::test]
async fn test_token_bucket_refills_rate_per_second() {
    let (limiter, clock) = limiter(&[
        ("algorithm", "token-bucket"),
        ("capacity", "6"),
        ("refillRate", "3"),
    ])
    .await;

    for _ in 0..6 {
        limiter.allow("u1").await.unwrap();
    }
    assert!(limiter.allow("u1").await.is_err());

    clock.advance_secs(1);
    for _ in 0..3 {
        limiter.allow("u1").await.unwrap();
    }
    assert!(limiter.allow("u1").await.is_err());
}

#[tokio::test]
async fn test_fixed_window_scenario() {
    let (limiter, clock) = limiter(&[
        ("algorithm", "fixed-window"),
        ("capacity", "5"),
        ("duration", "60"),
    ])
    .await;

    for _ in 0..5 {
        limiter.allow("u1").await.unwrap();
    }
    match limiter.allow("u1").await {
        Err(TurnstileError::RateLimitExceeded(decision)) => {
            assert_eq!(decision.remaining, 0);
            assert_eq!(decision.algorithm, Algorithm::FixedWindow);
        }
        other => panic!("unexpected {:?}", other),
    }

    clock.advance_secs(61);
    for expected in (0..5).rev() {
        assert_eq!(limiter.allow("u1").await.unwrap().remaining, expected);
    }
    assert!(limiter.allow("u1").await.is_err());
}

#[tokio::test]
async fn test_sliding_log_ages_out() {
    let (limiter, clock) = limiter(&[
        ("algorithm", "sliding-window-log"),
        ("capacity", "4"),
        ("duration", "20"),
    ])
    .await;

    for _ in 0..4 {
        limiter.allow("u1").await.unwrap();
    }

    clock.advance_secs(10);
    assert!(limiter.allow("u1").await.is_err());

    // The rejected attempt at t=10 is still logged until t=30.
    clock.advance_secs(11);
    assert!(limiter.allow("u1").await.is_ok());
}

#[tokio::test]
async fn test_full_weight_counter_tracks_fixed_window() {
    let (counter, clock) = limiter(&[
        ("algorithm", "sliding-window-counter"),
        ("capacity", "3"),
        ("duration", "30"),
        ("weight", "1"),
    ])
    .await;
    let fixed = build_with_clock(
        &policy(&[("algorithm", "fixed-window"), ("capacity", "3"), ("duration", "30")]),
        Arc::new(clock.clone()),
    )
    .await
    .unwrap();

    for step in [0, 0, 0, 0, 31, 0, 0, 0, 15, 16, 0, 0, 0] {
        clock.advance_secs(step);
        assert_eq!(
            counter.allow("u").await.is_ok(),
            fixed.allow("u").await.is_ok()
        );
    }
}

#[tokio::test]
async fn test_concurrent_callers_never_exceed_capacity() {
    for pairs in local_policies() {
        let (limiter, _clock) = limiter(&pairs).await;

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.allow("shared").await.is_ok() })
            })
            .collect();

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 7, "{}", limiter.algorithm());
    }
}

#[tokio::test]
async fn test_sweep_reclaims_idle_identities() {
    for pairs in local_policies() {
        let (limiter, clock) = limiter(&pairs).await;

        for i in 0..10 {
            limiter.allow(&format!("caller-{}", i)).await.unwrap();
        }
        assert_eq!(limiter.tracked_identities(), 10);

        clock.advance(limiter.idle_horizon() + chrono::Duration::seconds(1));
        assert_eq!(limiter.sweep(), 10, "{}", limiter.algorithm());
        assert_eq!(limiter.tracked_identities(), 0);
    }
}

#[tokio::test]
async fn test_configuration_errors_name_the_field() {
    let cases = [
        (vec![("capacity", "5")], "algorithm"),
        (vec![("algorithm", "fixed-window"), ("duration", "5")], "capacity"),
        (
            vec![("algorithm", "token-bucket"), ("capacity", "5"), ("refillRate", "x")],
            "refillRate",
        ),
        (
            vec![
                ("algorithm", "sliding-window-counter"),
                ("capacity", "5"),
                ("duration", "5"),
                ("weight", "1.5"),
            ],
            "weight",
        ),
        (vec![("algorithm", "leaky-bucket"), ("capacity", "5")], "leaky-bucket"),
    ];

    for (pairs, expected) in cases {
        match build_with_clock(&policy(&pairs), Arc::new(MockClock::default())).await {
            Err(TurnstileError::Configuration(message)) => {
                assert!(message.contains(expected), "`{}` missing from `{}`", expected, message)
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}

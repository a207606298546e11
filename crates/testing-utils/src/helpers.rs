//! Test helper utilities and common testing patterns

use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio::time::sleep;

/// Test environment setup utilities
pub struct TestEnv;

impl TestEnv {
    /// Set up logging for tests (safe to call from every test)
    pub fn init_logging() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("debug")
            .try_init();
    }

    /// Wait for a condition to be true with timeout
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }

        false
    }
}

/// Deterministically shuffled copy of `items`
pub fn shuffled<T: Clone>(items: &[T], seed: u64) -> Vec<T> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut copy = items.to_vec();
    copy.shuffle(&mut rng);
    copy
}

/// Assert that a collection contains exactly the expected items (order independent)
pub fn assert_contains_exactly<T: PartialEq + std::fmt::Debug>(actual: &[T], expected: &[T]) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "Collections have different lengths. Actual: {:?}, Expected: {:?}",
        actual,
        expected
    );

    for expected_item in expected {
        assert!(
            actual.contains(expected_item),
            "Expected item {:?} not found in actual collection {:?}",
            expected_item,
            actual
        );
    }
}

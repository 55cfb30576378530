//! # Composable Store Testing
//!
//! Testing utilities for Composable Store reducers and stores.
//!
//! This crate provides:
//! - [`TestStore`]: runs a reducer with parked slot tasks the test settles
//! - [`ReducerTest`]: Given-When-Then checks of a single `reduce` call
//! - Deterministic clocks and tracing setup
//! - Property-based strategies for loadable values
//!
//! ## Example
//!
//! ```ignore
//! use composable_store_testing::TestStore;
//!
//! #[test]
//! fn fetch_fills_the_roster() {
//!     let mut store = TestStore::new(RosterState::default(), RosterReducer, env());
//!
//!     store.send(RosterAction::Fetch);
//!     assert!(store.state().footballers.is_loading());
//!
//!     store.provide_value(slot!(RosterState, footballers), vec![messi()]);
//!     assert!(store.state().footballers.is_loaded());
//! }
//! ```

use chrono::{DateTime, Utc};
use composable_store_core::environment::Clock;

pub mod test_store;

/// Mock implementations of environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::Mutex;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use composable_store_testing::mocks::FixedClock;
    /// use composable_store_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock the test moves by hand
    ///
    /// Useful for checking that results and cancellations are stamped with
    /// the time they happened at.
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Create a clock starting at `time`
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time: Mutex::new(time) }
        }

        /// Move the clock forward
        pub fn advance(&self, by: chrono::Duration) {
            if let Ok(mut time) = self.time.lock() {
                *time += by;
            }
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            self.time.lock().map_or_else(|poisoned| *poisoned.into_inner(), |time| *time)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Helpers for tests against live stores
pub mod helpers {
    use std::time::Duration;
    use tokio::sync::watch;

    /// Install a `fmt` subscriber honouring `RUST_LOG`, once per process
    ///
    /// Later calls are no-ops, so every test may call it.
    pub fn init_tracing() {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    }

    /// Wait until an observed state satisfies `predicate`, returning a copy
    ///
    /// # Panics
    ///
    /// Panics if the predicate does not hold within `timeout` or the store
    /// is dropped first.
    #[allow(clippy::panic)]
    pub async fn wait_for_state<S, P>(
        receiver: &mut watch::Receiver<S>,
        timeout: Duration,
        predicate: P,
    ) -> S
    where
        S: Clone,
        P: FnMut(&S) -> bool,
    {
        match tokio::time::timeout(timeout, receiver.wait_for(predicate)).await {
            Ok(Ok(state)) => state.clone(),
            Ok(Err(_)) => panic!("store dropped before the expected state was observed"),
            Err(_) => panic!("expected state not observed within {timeout:?}"),
        }
    }
}

/// Property-based testing strategies using proptest
pub mod properties {
    use super::mocks::test_clock;
    use super::Clock;
    use composable_store_core::loadable::LoadableValue;
    use proptest::prelude::*;

    /// Any loadable value, with payloads drawn from `value` and `failure`
    ///
    /// Resolved variants are stamped with [`test_clock`].
    pub fn loadable<T, F>(
        value: impl Strategy<Value = T> + 'static,
        failure: impl Strategy<Value = F> + 'static,
    ) -> BoxedStrategy<LoadableValue<T, F>>
    where
        T: std::fmt::Debug + 'static,
        F: std::fmt::Debug + 'static,
    {
        let now = test_clock().now();
        prop_oneof![
            Just(()).prop_map(|()| LoadableValue::Idle),
            Just(()).prop_map(|()| LoadableValue::Loading),
            value.prop_map(move |v| LoadableValue::loaded(v, now)),
            failure.prop_map(move |e| LoadableValue::failed(e, now)),
            Just(()).prop_map(move |()| LoadableValue::cancelled(now)),
        ]
        .boxed()
    }
}

pub use helpers::{init_tracing, wait_for_state};
pub use mocks::{FixedClock, ManualClock, test_clock};
pub use reducer_test::{ReducerTest, assertions};
pub use test_store::TestStore;

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn test_manual_clock_advances() {
        let start = test_clock().now();
        let clock = ManualClock::new(start);
        clock.advance(chrono::Duration::seconds(90));
        assert_eq!(clock.now() - start, chrono::Duration::seconds(90));
    }

    #[tokio::test]
    async fn test_wait_for_state_returns_matching_snapshot() {
        init_tracing();
        let (tx, mut rx) = tokio::sync::watch::channel(0_u8);
        tokio::spawn(async move {
            for n in 1..=3 {
                tx.send_replace(n);
            }
        });
        let seen = wait_for_state(&mut rx, std::time::Duration::from_secs(1), |n| *n == 3).await;
        assert_eq!(seen, 3);
    }

    proptest! {
        #[test]
        fn prop_map_keeps_variant(value in properties::loadable(any::<i32>(), "[a-z]{1,8}")) {
            let variant = value.variant();
            let mapped = value.map(|n| i64::from(n) * 2);
            prop_assert_eq!(mapped.variant(), variant);
        }
    }
}

//! Bounded record of caller-misuse reports.
//!
//! Misuse (loading a slot that is already loading, for instance) is a
//! programming defect. It is logged at error level, counted, and kept here so
//! tests can assert on it. In strict mode the report panics afterwards.

use chrono::{DateTime, Utc};
use composable_store_core::broadcast::StoreId;
use composable_store_core::error::MisuseError;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// One misuse report
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    /// Store the misuse happened in
    pub store: StoreId,
    /// What went wrong
    pub error: MisuseError,
    /// When it was reported
    pub at: DateTime<Utc>,
}

pub(crate) struct Diagnostics {
    capacity: usize,
    strict: bool,
    records: Mutex<VecDeque<Diagnostic>>,
}

impl Diagnostics {
    pub(crate) fn new(capacity: usize, strict: bool) -> Self {
        Self {
            capacity,
            strict,
            records: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Log, count and retain a misuse report.
    ///
    /// # Panics
    ///
    /// Panics after recording when strict mode is on.
    #[allow(clippy::panic)]
    pub(crate) fn report(&self, store: StoreId, name: &str, error: MisuseError, at: DateTime<Utc>) {
        tracing::error!(store = %store, name, kind = error.kind(), "Caller misuse: {error}");
        metrics::counter!("store.misuse.total", "kind" => error.kind()).increment(1);

        let message = error.to_string();
        if self.capacity > 0 {
            let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
            if records.len() == self.capacity {
                records.pop_front();
            }
            records.push_back(Diagnostic { store, error, at });
        }

        if self.strict {
            panic!("{name}: {message}");
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<Diagnostic> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use composable_store_core::slot::TaskKey;

    #[test]
    fn test_ring_keeps_latest_reports() {
        let diagnostics = Diagnostics::new(2, false);
        let store = StoreId::next();
        for slot in ["a", "b", "c"] {
            diagnostics.report(store, "test", MisuseError::AlreadyLoading(TaskKey::field(slot)), Utc::now());
        }

        let kept: Vec<_> = diagnostics
            .snapshot()
            .into_iter()
            .map(|record| record.error.to_string())
            .collect();
        assert_eq!(
            kept,
            vec![
                "load rejected: slot b is already loading",
                "load rejected: slot c is already loading"
            ]
        );
    }

    #[test]
    #[should_panic(expected = "load rejected")]
    fn test_strict_mode_panics() {
        let diagnostics = Diagnostics::new(8, true);
        diagnostics.report(
            StoreId::next(),
            "strict",
            MisuseError::AlreadyLoading(TaskKey::field("items")),
            Utc::now(),
        );
    }
}

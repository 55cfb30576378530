//! Combining several loadables into one.
//!
//! The combined variant is decided by priority, highest first:
//!
//! | Any input is | Result                                   |
//! |--------------|------------------------------------------|
//! | `Failed`     | `Failed` with every failure, earliest time |
//! | `Idle`       | `Idle`                                   |
//! | `Cancelled`  | `Cancelled` at the earliest cancellation |
//! | `Loading`    | `Loading`                                |
//! | (all loaded) | `Loaded` tuple at the latest completion  |
//!
//! Inputs may have unrelated value and failure types; failures are erased to
//! [`AnyError`] inside the [`ZippedError`].

use chrono::{DateTime, Utc};
use std::fmt;

use crate::error::AnyError;
use crate::loadable::LoadableValue;

/// One failure inside a [`ZippedError`].
#[derive(Debug, Clone, PartialEq)]
pub struct ZippedFailure {
    /// Zero-based position of the failed input
    pub position: usize,
    /// The erased failure
    pub error: AnyError,
    /// When that input failed
    pub timestamp: DateTime<Utc>,
}

/// Aggregate of every failed input of a zip.
#[derive(Debug, Clone, PartialEq)]
pub struct ZippedError {
    failures: Vec<ZippedFailure>,
}

impl ZippedError {
    /// All failures, ordered by input position
    #[must_use]
    pub fn failures(&self) -> &[ZippedFailure] {
        &self.failures
    }

    /// The failure with the earliest timestamp
    #[must_use]
    pub fn earliest(&self) -> Option<&ZippedFailure> {
        self.failures.iter().min_by_key(|failure| failure.timestamp)
    }

    /// Number of failed inputs
    #[must_use]
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Always false for a zip result; present for API symmetry
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for ZippedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} zipped input(s) failed", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; #{}: {}", failure.position, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ZippedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.earliest()
            .map(|failure| -> &(dyn std::error::Error + 'static) { failure.error.as_std() })
    }
}

/// Variant-only view of one input
enum Peek {
    Idle,
    Loading,
    Loaded(DateTime<Utc>),
    Failed(AnyError, DateTime<Utc>),
    Cancelled(DateTime<Utc>),
}

impl Peek {
    fn of<T, F>(value: &LoadableValue<T, F>) -> Self
    where
        F: Clone + Into<AnyError>,
    {
        match value {
            LoadableValue::Idle => Self::Idle,
            LoadableValue::Loading => Self::Loading,
            LoadableValue::Loaded { timestamp, .. } => Self::Loaded(*timestamp),
            LoadableValue::Failed { error, timestamp } => {
                Self::Failed(error.clone().into(), *timestamp)
            },
            LoadableValue::Cancelled { timestamp } => Self::Cancelled(*timestamp),
        }
    }
}

/// Outcome of the priority rule, minus the tuple of values
enum Outcome {
    Failed(ZippedError, DateTime<Utc>),
    Idle,
    Cancelled(DateTime<Utc>),
    Loading,
    Loaded(DateTime<Utc>),
}

impl Outcome {
    /// Convert every non-loaded outcome into a loadable of any value type
    fn pending<T>(self) -> Option<LoadableValue<T, ZippedError>> {
        match self {
            Self::Failed(error, timestamp) => Some(LoadableValue::Failed { error, timestamp }),
            Self::Idle => Some(LoadableValue::Idle),
            Self::Cancelled(timestamp) => Some(LoadableValue::Cancelled { timestamp }),
            Self::Loading => Some(LoadableValue::Loading),
            Self::Loaded(_) => None,
        }
    }
}

fn combine(peeks: Vec<Peek>) -> Outcome {
    let mut failures = Vec::new();
    let mut any_idle = false;
    let mut any_loading = false;
    let mut earliest_cancel: Option<DateTime<Utc>> = None;
    let mut latest_load: Option<DateTime<Utc>> = None;

    for (position, peek) in peeks.into_iter().enumerate() {
        match peek {
            Peek::Failed(error, timestamp) => failures.push(ZippedFailure {
                position,
                error,
                timestamp,
            }),
            Peek::Idle => any_idle = true,
            Peek::Loading => any_loading = true,
            Peek::Cancelled(timestamp) => {
                earliest_cancel = Some(earliest_cancel.map_or(timestamp, |t| t.min(timestamp)));
            },
            Peek::Loaded(timestamp) => {
                latest_load = Some(latest_load.map_or(timestamp, |t| t.max(timestamp)));
            },
        }
    }

    let error = ZippedError { failures };
    if let Some(earliest) = error.earliest().map(|failure| failure.timestamp) {
        return Outcome::Failed(error, earliest);
    }
    if any_idle {
        return Outcome::Idle;
    }
    if let Some(timestamp) = earliest_cancel {
        return Outcome::Cancelled(timestamp);
    }
    if any_loading {
        return Outcome::Loading;
    }
    latest_load.map_or(Outcome::Idle, Outcome::Loaded)
}

macro_rules! zip_arity {
    ($(#[$doc:meta])* $name:ident => $($input:ident: $value:ident / $failure:ident),+) => {
        $(#[$doc])*
        #[must_use]
        pub fn $name<$($value, $failure),+>(
            $($input: &LoadableValue<$value, $failure>),+
        ) -> LoadableValue<($($value,)+), ZippedError>
        where
            $($value: Clone, $failure: Clone + Into<AnyError>,)+
        {
            let outcome = combine(vec![$(Peek::of($input)),+]);
            let timestamp = match outcome {
                Outcome::Loaded(timestamp) => timestamp,
                other => return other.pending().unwrap_or_default(),
            };
            match ($($input.value().cloned(),)+) {
                ($(Some($input),)+) => LoadableValue::Loaded {
                    value: ($($input,)+),
                    timestamp,
                },
                #[allow(unreachable_patterns)]
                _ => LoadableValue::Idle,
            }
        }
    };
}

zip_arity!(
    /// Combine two loadables.
    zip2 => a: A / FA, b: B / FB
);
zip_arity!(
    /// Combine three loadables.
    zip3 => a: A / FA, b: B / FB, c: C / FC
);
zip_arity!(
    /// Combine four loadables.
    zip4 => a: A / FA, b: B / FB, c: C / FC, d: D / FD
);
zip_arity!(
    /// Combine five loadables.
    zip5 => a: A / FA, b: B / FB, c: C / FC, d: D / FD, e: E / FE
);
zip_arity!(
    /// Combine six loadables.
    zip6 => a: A / FA, b: B / FB, c: C / FC, d: D / FD, e: E / FE, f: G / FG
);

/// Combine any number of loadables of one type.
///
/// An empty slice yields `Idle`.
#[must_use]
pub fn zip_all<T, F>(inputs: &[LoadableValue<T, F>]) -> LoadableValue<Vec<T>, ZippedError>
where
    T: Clone,
    F: Clone + Into<AnyError>,
{
    let outcome = combine(inputs.iter().map(Peek::of).collect());
    let timestamp = match outcome {
        Outcome::Loaded(timestamp) => timestamp,
        other => return other.pending().unwrap_or_default(),
    };
    let values: Option<Vec<T>> = inputs.iter().map(|input| input.value().cloned()).collect();
    values.map_or(LoadableValue::Idle, |value| LoadableValue::Loaded { value, timestamp })
}

impl<T, F> LoadableValue<T, F>
where
    T: Clone,
    F: Clone + Into<AnyError>,
{
    /// Combine with another loadable; see [`zip2`].
    #[must_use]
    pub fn zip<U, G>(&self, other: &LoadableValue<U, G>) -> LoadableValue<(T, U), ZippedError>
    where
        U: Clone,
        G: Clone + Into<AnyError>,
    {
        zip2(self, other)
    }
}

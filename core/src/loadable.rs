//! The lifecycle of one asynchronous operation's result.
//!
//! ```text
//!            begin                success
//!   Idle ───────────▶ Loading ─────────────▶ Loaded
//!    ▲                  │  │
//!    │                  │  └──── error ────▶ Failed
//!    │                  └────── cancel ────▶ Cancelled
//!    │
//!    └── Loaded / Failed / Cancelled may begin again; Loading may not
//! ```
//!
//! The store drives these transitions; reducers read the value and may
//! transform a loaded payload with [`LoadableValue::modify`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AnyError, MisuseError};

/// A loadable value whose failures use the uniform [`AnyError`] channel.
pub type Loadable<T> = LoadableValue<T, AnyError>;

/// Tagged union modeling where an asynchronous operation stands.
///
/// Two values are equal when they are the same variant with equal payloads
/// and equal timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LoadableValue<T, F = AnyError> {
    /// No operation attempted
    Idle,

    /// Operation in flight
    Loading,

    /// Operation succeeded
    Loaded {
        /// The produced value
        value: T,
        /// Completion time
        timestamp: DateTime<Utc>,
    },

    /// Operation failed
    Failed {
        /// The failure
        error: F,
        /// Completion time
        timestamp: DateTime<Utc>,
    },

    /// Operation was cancelled before it completed
    Cancelled {
        /// Cancellation time
        timestamp: DateTime<Utc>,
    },
}

impl<T, F> Default for LoadableValue<T, F> {
    fn default() -> Self {
        Self::Idle
    }
}

impl<T, F> LoadableValue<T, F> {
    /// A loaded value stamped with `timestamp`
    #[must_use]
    pub const fn loaded(value: T, timestamp: DateTime<Utc>) -> Self {
        Self::Loaded { value, timestamp }
    }

    /// A failure stamped with `timestamp`
    #[must_use]
    pub const fn failed(error: F, timestamp: DateTime<Utc>) -> Self {
        Self::Failed { error, timestamp }
    }

    /// A cancellation stamped with `timestamp`
    #[must_use]
    pub const fn cancelled(timestamp: DateTime<Utc>) -> Self {
        Self::Cancelled { timestamp }
    }

    /// The value, present only when `Loaded`
    #[must_use]
    pub const fn value(&self) -> Option<&T> {
        match self {
            Self::Loaded { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Take the value out, present only when `Loaded`
    #[must_use]
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Loaded { value, .. } => Some(value),
            _ => None,
        }
    }

    /// The failure, present only when `Failed`
    #[must_use]
    pub const fn failure(&self) -> Option<&F> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Completion (or cancellation) time; `None` for `Idle` and `Loading`
    #[must_use]
    pub const fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Loaded { timestamp, .. }
            | Self::Failed { timestamp, .. }
            | Self::Cancelled { timestamp } => Some(*timestamp),
            Self::Idle | Self::Loading => None,
        }
    }

    /// True only in `Idle`
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// True only in `Loading`
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    /// True only in `Loaded`
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded { .. })
    }

    /// True only in `Failed`
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// True only in `Cancelled`
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Variant name, for logs and diagnostics
    #[must_use]
    pub const fn variant(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Loaded { .. } => "loaded",
            Self::Failed { .. } => "failed",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    /// Borrow the payloads
    #[must_use]
    pub fn as_ref(&self) -> LoadableValue<&T, &F> {
        match self {
            Self::Idle => LoadableValue::Idle,
            Self::Loading => LoadableValue::Loading,
            Self::Loaded { value, timestamp } => LoadableValue::Loaded {
                value,
                timestamp: *timestamp,
            },
            Self::Failed { error, timestamp } => LoadableValue::Failed {
                error,
                timestamp: *timestamp,
            },
            Self::Cancelled { timestamp } => LoadableValue::Cancelled {
                timestamp: *timestamp,
            },
        }
    }

    /// Transform a loaded value, keeping its timestamp.
    ///
    /// Every other variant passes through untouched.
    #[must_use]
    pub fn map<U, M>(self, transform: M) -> LoadableValue<U, F>
    where
        M: FnOnce(T) -> U,
    {
        match self {
            Self::Idle => LoadableValue::Idle,
            Self::Loading => LoadableValue::Loading,
            Self::Loaded { value, timestamp } => LoadableValue::Loaded {
                value: transform(value),
                timestamp,
            },
            Self::Failed { error, timestamp } => LoadableValue::Failed { error, timestamp },
            Self::Cancelled { timestamp } => LoadableValue::Cancelled { timestamp },
        }
    }

    /// Transform a failure, keeping its timestamp.
    #[must_use]
    pub fn map_failure<G, M>(self, transform: M) -> LoadableValue<T, G>
    where
        M: FnOnce(F) -> G,
    {
        match self {
            Self::Idle => LoadableValue::Idle,
            Self::Loading => LoadableValue::Loading,
            Self::Loaded { value, timestamp } => LoadableValue::Loaded { value, timestamp },
            Self::Failed { error, timestamp } => LoadableValue::Failed {
                error: transform(error),
                timestamp,
            },
            Self::Cancelled { timestamp } => LoadableValue::Cancelled { timestamp },
        }
    }

    /// Mutate a loaded value in place, keeping its timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`MisuseError::NotLoaded`] when the value is in any other
    /// variant. The value is left untouched and the defect is logged at error
    /// level.
    pub fn modify<M>(&mut self, transform: M) -> Result<(), MisuseError>
    where
        M: FnOnce(&mut T),
    {
        self.modify_described("<loadable>", transform)
    }

    /// [`modify`](Self::modify) with a description of the targeted slot for
    /// the diagnostic.
    ///
    /// # Errors
    ///
    /// Returns [`MisuseError::NotLoaded`] when the value is not `Loaded`.
    pub fn modify_described<M>(&mut self, slot: &str, transform: M) -> Result<(), MisuseError>
    where
        M: FnOnce(&mut T),
    {
        if let Self::Loaded { value, .. } = self {
            transform(value);
            Ok(())
        } else {
            let error = MisuseError::NotLoaded {
                slot: slot.to_string(),
                variant: self.variant(),
            };
            tracing::error!(slot, variant = self.variant(), "{error}");
            Err(error)
        }
    }
}

impl<T, F> LoadableValue<T, F>
where
    F: Into<AnyError>,
{
    /// Collapse the failure into the uniform [`AnyError`] channel.
    #[must_use]
    pub fn erase_failure(self) -> Loadable<T> {
        self.map_failure(Into::into)
    }
}

impl<T, F> From<Result<T, F>> for LoadableValue<T, F> {
    /// Stamp a finished result with the current time.
    fn from(result: Result<T, F>) -> Self {
        let timestamp = Utc::now();
        match result {
            Ok(value) => Self::Loaded { value, timestamp },
            Err(error) => Self::Failed { error, timestamp },
        }
    }
}

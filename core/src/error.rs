//! Error types shared by every layer of the store.
//!
//! Two families live here:
//!
//! - [`AnyError`]: the uniform failure channel for work handed to the store.
//!   Operational failures end up stored in a [`LoadableValue`](crate::loadable::LoadableValue)
//!   and never escape a dispatch.
//! - [`MisuseError`]: caller defects (loading a slot that is already loading,
//!   modifying a value that is not loaded, leaving test expectations unresolved).
//!   These are reported loudly and the offending operation becomes a no-op.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::slot::TaskKey;

/// Cloneable, type-erased error produced by store work.
///
/// Wraps an [`anyhow::Error`] behind an `Arc` so it can live inside state that
/// is cloned for observers. Any `std::error::Error + Send + Sync + 'static`
/// converts into it with `?` or `.into()`.
///
/// Like `anyhow::Error`, this type does not implement `std::error::Error`
/// itself; use [`AnyError::as_std`] when a `&dyn Error` is needed.
#[derive(Clone)]
pub struct AnyError(Arc<anyhow::Error>);

impl AnyError {
    /// Build an error from a plain message.
    #[must_use]
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self(Arc::new(anyhow::Error::msg(message)))
    }

    /// Wrap an existing [`anyhow::Error`], keeping its context chain.
    ///
    /// `anyhow::Error` is not a `std::error::Error`, so it goes through this
    /// constructor instead of `From`.
    #[must_use]
    pub fn from_anyhow(error: anyhow::Error) -> Self {
        Self(Arc::new(error))
    }

    /// Attempt to view the underlying error as a concrete type.
    #[must_use]
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }

    /// Check whether the underlying error is of type `E`.
    #[must_use]
    pub fn is<E>(&self) -> bool
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.0.is::<E>()
    }

    /// Borrow as a standard error trait object.
    #[must_use]
    pub fn as_std(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        AsRef::<dyn std::error::Error + Send + Sync + 'static>::as_ref(&*self.0)
    }
}

impl<E> From<E> for AnyError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self(Arc::new(anyhow::Error::new(error)))
    }
}

impl fmt::Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl fmt::Debug for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

// Two errors are equal when they are the same allocation or render the same
// message chain.
impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || format!("{:#}", self.0) == format!("{:#}", other.0)
    }
}

/// The work of a tracked task panicked instead of returning.
///
/// Loads store it as their failure so the slot leaves `Loading`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("task {key} panicked: {message}")]
pub struct TaskPanicked {
    /// Registry key of the task
    pub key: TaskKey,
    /// Panic payload, when it was a string
    pub message: String,
}

impl TaskPanicked {
    /// Build from a panic payload caught with `catch_unwind`.
    #[must_use]
    pub fn from_payload(key: TaskKey, payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "<non-string payload>".to_string());
        Self { key, message }
    }
}

/// Caller defects detected by the store.
///
/// None of these are retryable conditions. The store logs them at error level,
/// records them as diagnostics, and leaves state untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MisuseError {
    /// A load was started on a slot that is already `Loading`
    #[error("load rejected: slot {0} is already loading")]
    AlreadyLoading(TaskKey),

    /// A loaded-value transform was applied to a value that is not `Loaded`
    #[error("modify rejected: slot {slot} is {variant}, not loaded")]
    NotLoaded {
        /// Slot (or value description) that was targeted
        slot: String,
        /// Variant the value was in
        variant: &'static str,
    },

    /// A test harness was dropped while effects were still waiting for results
    #[error("test store dropped with {} unresolved slot(s): {}", .0.len(), join_keys(.0))]
    UnresolvedExpectations(Vec<TaskKey>),

    /// A test harness was asked to resolve a slot that has no pending effect
    #[error("no pending effect for slot {0}")]
    NoPendingEffect(TaskKey),

    /// A test harness result does not fit the kind of effect pending on the slot
    #[error("slot {key} has a pending {pending} effect, cannot resolve it as {provided}")]
    TypeMismatch {
        /// Slot with the pending effect
        key: TaskKey,
        /// Kind of the pending effect
        pending: &'static str,
        /// Kind the caller tried to resolve it as
        provided: &'static str,
    },
}

impl MisuseError {
    /// Short machine-friendly label used for metrics and log fields.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AlreadyLoading(_) => "already_loading",
            Self::NotLoaded { .. } => "not_loaded",
            Self::UnresolvedExpectations(_) => "unresolved_expectations",
            Self::NoPendingEffect(_) => "no_pending_effect",
            Self::TypeMismatch { .. } => "type_mismatch",
        }
    }
}

fn join_keys(keys: &[TaskKey]) -> String {
    keys.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

//! # Composable Store Runtime
//!
//! Runtime implementation for the Composable Store architecture.
//!
//! This crate provides the [`Store`]: the owner of one piece of application
//! state, its reducer, its environment and the registry of tasks writing into
//! that state.
//!
//! ## Core Components
//!
//! - **Store**: serializes every state mutation behind one write lock and
//!   executes the effects returned by the reducer
//! - **Task registry**: at most one in-flight task per slot; stale results are
//!   discarded
//! - **Dispatch loop**: fire-and-forget actions, hub messages and external
//!   streams all enter the store through the same path
//! - **Aggregation**: combine the observed state of several stores
//!
//! ## Example
//!
//! ```ignore
//! use composable_store_runtime::Store;
//!
//! let store = Store::with_hub(RosterState::default(), RosterReducer, env, hub.clone());
//!
//! // Send an action and wait for the tasks it started
//! store.send_and_wait(RosterAction::Fetch).await?;
//!
//! // Read state
//! let count = store.state(|s| s.footballers.value().map_or(0, Vec::len)).await;
//! ```

use composable_store_core::environment::{Clock, SystemClock};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;

/// Combining the observed state of several stores
pub mod aggregate;

/// Bounded record of caller-misuse reports
pub mod diagnostics;

/// Metric descriptions
pub mod metrics;

/// Per-slot task tracking
mod registry;

/// The store itself
pub mod store;

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    ///
    /// Failures of the work a store runs are never reported here: they are
    /// written into state as `Failed`.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StoreError {
        /// Store is shutting down and not accepting new actions
        ///
        /// Returned when `send()` or `dispatch()` is called after shutdown
        /// was initiated.
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown timed out waiting for effects to complete
        ///
        /// The remaining tracked tasks were cancelled.
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),

        /// The store's dispatch loop is gone
        #[error("Store has been dropped")]
        StoreDropped,
    }
}

pub use aggregate::{aggregate2, aggregate3, aggregate4, aggregate5, aggregate6};
pub use diagnostics::Diagnostic;
pub use error::StoreError;
pub use store::Store;

/// Configuration for Store instances
///
/// # Example
///
/// ```ignore
/// let config = StoreConfig::default()
///     .with_name("roster")
///     .with_strict_misuse(cfg!(debug_assertions))
///     .with_shutdown_timeout(Duration::from_secs(5));
///
/// let store = Store::with_config(state, reducer, env, hub, config);
/// ```
#[derive(Clone)]
pub struct StoreConfig {
    /// Name used in log fields
    pub name: Option<String>,
    /// Panic after reporting caller misuse
    pub strict_misuse: bool,
    /// Number of misuse reports kept for [`Store::diagnostics`]
    pub diagnostics_capacity: usize,
    /// Default timeout for [`Store::close`]
    pub default_shutdown_timeout: Duration,
    /// Buffer of the channel behind [`Store::subscribe_actions`]
    pub action_broadcast_capacity: usize,
    /// Source of timestamps for task results and cancellations
    pub clock: Arc<dyn Clock>,
}

impl StoreConfig {
    /// Set the store name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Panic on caller misuse instead of only logging it
    #[must_use]
    pub const fn with_strict_misuse(mut self, strict: bool) -> Self {
        self.strict_misuse = strict;
        self
    }

    /// Set how many misuse reports are retained
    #[must_use]
    pub const fn with_diagnostics_capacity(mut self, capacity: usize) -> Self {
        self.diagnostics_capacity = capacity;
        self
    }

    /// Set the default shutdown timeout
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.default_shutdown_timeout = timeout;
        self
    }

    /// Set the action broadcast capacity
    #[must_use]
    pub const fn with_action_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.action_broadcast_capacity = capacity;
        self
    }

    /// Replace the clock
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: None,
            strict_misuse: false,
            diagnostics_capacity: 128,
            default_shutdown_timeout: Duration::from_secs(30),
            action_broadcast_capacity: 16,
            clock: Arc::new(SystemClock),
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("name", &self.name)
            .field("strict_misuse", &self.strict_misuse)
            .field("diagnostics_capacity", &self.diagnostics_capacity)
            .field("default_shutdown_timeout", &self.default_shutdown_timeout)
            .field("action_broadcast_capacity", &self.action_broadcast_capacity)
            .finish_non_exhaustive()
    }
}

/// Handle for tracking effect completion
///
/// Returned by [`Store::send()`] to allow waiting for the effects of one
/// dispatch to complete. Follow-up actions fed back by those effects are
/// reduced before the effect that produced them counts as complete.
///
/// # Example
///
/// ```ignore
/// let mut handle = store.send(Action::Start).await?;
/// handle.wait_with_timeout(Duration::from_secs(5)).await?;
/// ```
#[derive(Clone)]
pub struct EffectHandle {
    effects: Arc<AtomicUsize>,
    completion: watch::Receiver<()>,
}

impl EffectHandle {
    fn new() -> (Self, EffectTracking) {
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(());

        let handle = Self {
            effects: Arc::clone(&counter),
            completion: rx,
        };

        let tracking = EffectTracking {
            counter,
            notifier: tx,
        };

        (handle, tracking)
    }

    /// Create a handle that's already complete
    #[must_use]
    pub fn completed() -> Self {
        let (tx, rx) = watch::channel(());
        let _ = tx.send(());

        Self {
            effects: Arc::new(AtomicUsize::new(0)),
            completion: rx,
        }
    }

    /// Number of effects still running
    #[must_use]
    pub fn pending(&self) -> usize {
        self.effects.load(Ordering::SeqCst)
    }

    /// Wait for all effects to complete
    pub async fn wait(&mut self) {
        while self.effects.load(Ordering::SeqCst) > 0 {
            if self.completion.changed().await.is_err() {
                // Every tracking clone is gone, so every effect finished.
                break;
            }
        }
    }

    /// Wait for all effects to complete with a timeout
    ///
    /// # Errors
    ///
    /// Returns `Err(())` if the timeout expires before all effects complete.
    pub async fn wait_with_timeout(&mut self, timeout: Duration) -> Result<(), ()> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| ())
    }
}

impl fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectHandle")
            .field("pending_effects", &self.pending())
            .finish_non_exhaustive()
    }
}

/// Effect tracking context passed through effect execution
#[derive(Clone)]
struct EffectTracking {
    counter: Arc<AtomicUsize>,
    notifier: watch::Sender<()>,
}

impl EffectTracking {
    fn detached() -> (Self, watch::Receiver<()>) {
        let (tx, rx) = watch::channel(());
        (
            Self {
                counter: Arc::new(AtomicUsize::new(0)),
                notifier: tx,
            },
            rx,
        )
    }

    fn increment(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement(&self) {
        if self.counter.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _ = self.notifier.send(());
        }
    }

    fn is_idle(&self) -> bool {
        self.counter.load(Ordering::SeqCst) == 0
    }
}

/// RAII guard that decrements the effect counter on drop
///
/// Runs even when the effect panics or its task is aborted.
struct DecrementGuard(EffectTracking);

impl Drop for DecrementGuard {
    fn drop(&mut self) {
        self.0.decrement();
    }
}

/// Guard that decrements an atomic counter on drop (for shutdown tracking)
struct AtomicCounterGuard(Arc<AtomicUsize>);

impl Drop for AtomicCounterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

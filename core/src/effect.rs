//! Side effect descriptions.
//!
//! Effects are values returned by a reducer; the store executes them right
//! after `reduce` returns. Besides the general-purpose variants (`Future`,
//! `Delay`, `Parallel`, `Sequential`), an effect can target one slot of state:
//!
//! - [`Effect::load`] drives a [`LoadableValue`] through
//!   `Loading → Loaded | Failed`, rejecting the call while the slot is
//!   already loading.
//! - [`Effect::perform`] writes the result of async work into a plain field.
//! - [`Effect::perform_sync`] writes a synchronously computed value.
//! - [`Effect::cancel`] cancels the tracked task of a slot.
//! - [`Effect::modify_loaded`] edits a loaded value in place and reports a
//!   misuse when the slot is not loaded.
//!
//! Slot-targeted async effects are tracked by the store under their
//! [`TaskKey`]; at most one is in flight per key. A load whose work panics
//! ends `Failed` with a [`TaskPanicked`] error.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use crate::broadcast::{BroadcastMessage, BroadcastPayload};
use crate::environment::Dependency;
use crate::error::{MisuseError, TaskPanicked};
use crate::loadable::LoadableValue;
use crate::slot::{KeyedSlot, Slot, TaskKey};

/// Writes a finished task's result into state, stamped with the commit time.
pub type Commit<S> = Box<dyn FnOnce(&mut S, DateTime<Utc>) + Send>;

/// Synchronous guard/transition run when a tracked task starts.
pub type Begin<S> = Box<dyn FnOnce(&mut S) -> Result<(), MisuseError> + Send>;

/// The asynchronous half of a tracked task.
pub type Run<S, E> = Box<dyn FnOnce(E) -> BoxFuture<'static, Commit<S>> + Send>;

/// Synchronous edit that may be rejected as a misuse.
pub type Guarded<S> = Box<dyn FnOnce(&mut S) -> Result<(), MisuseError> + Send>;

/// How a tracked task treats its slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Drives a loadable through its lifecycle; rejected while loading
    Load,
    /// Writes a plain value; a newer task replaces an older one
    Perform,
}

/// A slot-targeted asynchronous effect, with its types erased.
///
/// The store runs `begin` under the state write lock, registers the task
/// under `key`, spawns `run`, and applies the returned [`Commit`] only if the
/// task is still the registered one when it finishes.
pub struct SlotTask<S, E> {
    /// Registry key
    pub key: TaskKey,
    /// Load or perform
    pub kind: TaskKind,
    /// Guard and initial transition
    pub begin: Begin<S>,
    /// The work itself
    pub run: Run<S, E>,
}

impl<S, E> fmt::Debug for SlotTask<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotTask")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Something whose tracked task can be cancelled.
///
/// Loadable slots (and keyed entries) are marked `Cancelled` when a live task
/// is cancelled; a bare [`TaskKey`] only untracks.
pub trait CancelTarget<S>: Send {
    /// Registry key of the task to cancel
    fn task_key(&self) -> TaskKey;

    /// Record the cancellation in state
    fn mark_cancelled(&self, _state: &mut S, _now: DateTime<Utc>) {}
}

impl<S> CancelTarget<S> for TaskKey {
    fn task_key(&self) -> TaskKey {
        self.clone()
    }
}

impl<S, T, F> CancelTarget<S> for Slot<S, LoadableValue<T, F>> {
    fn task_key(&self) -> TaskKey {
        Slot::task_key(self)
    }

    fn mark_cancelled(&self, state: &mut S, now: DateTime<Utc>) {
        self.set(state, LoadableValue::cancelled(now));
    }
}

impl<S, K, V, F> CancelTarget<S> for (KeyedSlot<S, K, V, F>, K)
where
    K: Eq + Hash + fmt::Debug + Send + 'static,
    V: 'static,
    F: 'static,
{
    fn task_key(&self) -> TaskKey {
        self.0.task_key(&self.1)
    }

    fn mark_cancelled(&self, state: &mut S, now: DateTime<Utc>) {
        if let Some(entry) = self.0.get_mut(state).get_mut(&self.1) {
            *entry = LoadableValue::cancelled(now);
        }
    }
}

/// Effect type - describes a side effect to be executed
///
/// # Type Parameters
///
/// - `S`: State the effect may write into
/// - `E`: Environment handed to async work
/// - `A`: Action type fed back into the reducer
pub enum Effect<S, E, A> {
    /// No-op effect
    None,

    /// Run effects in parallel
    Parallel(Vec<Effect<S, E, A>>),

    /// Run effects sequentially
    Sequential(Vec<Effect<S, E, A>>),

    /// Delayed action (for timeouts, retries)
    Delay {
        /// How long to wait
        duration: Duration,
        /// Action to dispatch after delay
        action: Box<A>,
    },

    /// Arbitrary async computation
    ///
    /// Returns `Option<Action>` - if Some, the action is fed back into the reducer
    Future(BoxFuture<'static, Option<A>>),

    /// Tracked async work targeting one slot
    Task(SlotTask<S, E>),

    /// Synchronous write into state, applied atomically with the dispatch
    Sync(Box<dyn FnOnce(&mut S, &E) + Send>),

    /// Synchronous edit the store reports as a misuse when it is rejected
    Modify(Guarded<S>),

    /// Cancel the tracked task of a slot
    Cancel(Box<dyn CancelTarget<S>>),

    /// Publish a message to the broadcast hub
    Broadcast(BroadcastMessage),

    /// Build an effect from the environment at execution time
    WithEnvironment(Box<dyn FnOnce(&E) -> Effect<S, E, A> + Send>),
}

impl<S, E, A> fmt::Debug for Effect<S, E, A>
where
    A: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::None => write!(f, "Effect::None"),
            Effect::Parallel(effects) => f.debug_tuple("Effect::Parallel").field(effects).finish(),
            Effect::Sequential(effects) => {
                f.debug_tuple("Effect::Sequential").field(effects).finish()
            },
            Effect::Delay { duration, action } => f
                .debug_struct("Effect::Delay")
                .field("duration", duration)
                .field("action", action)
                .finish(),
            Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            Effect::Task(task) => f.debug_tuple("Effect::Task").field(task).finish(),
            Effect::Sync(_) => write!(f, "Effect::Sync(<write>)"),
            Effect::Modify(_) => write!(f, "Effect::Modify(<edit>)"),
            Effect::Cancel(target) => f
                .debug_tuple("Effect::Cancel")
                .field(&target.task_key())
                .finish(),
            Effect::Broadcast(message) => f.debug_tuple("Effect::Broadcast").field(message).finish(),
            Effect::WithEnvironment(_) => write!(f, "Effect::WithEnvironment(<builder>)"),
        }
    }
}

impl<S, E, A> Effect<S, E, A> {
    /// Combine effects to run in parallel
    #[must_use]
    pub const fn merge(effects: Vec<Effect<S, E, A>>) -> Self {
        Effect::Parallel(effects)
    }

    /// Chain effects to run sequentially
    #[must_use]
    pub const fn chain(effects: Vec<Effect<S, E, A>>) -> Self {
        Effect::Sequential(effects)
    }

    /// Registry key targeted by a slot effect
    #[must_use]
    pub fn task_key(&self) -> Option<TaskKey> {
        match self {
            Effect::Task(task) => Some(task.key.clone()),
            Effect::Cancel(target) => Some(target.task_key()),
            _ => None,
        }
    }
}

impl<S, E, A> Effect<S, E, A>
where
    S: 'static,
    E: Send + 'static,
    A: Send + 'static,
{
    /// Feed an action back into the store
    #[must_use]
    pub fn send(action: A) -> Self {
        Effect::Future(Box::pin(async move { Some(action) }))
    }

    /// Load `slot` with the result of `work`.
    ///
    /// Rejected (with a diagnostic, without calling `work`) when the slot is
    /// already `Loading`. Otherwise the slot becomes `Loading` immediately and
    /// `Loaded` or `Failed` when `work` finishes, unless the task was
    /// cancelled first.
    #[must_use]
    pub fn load<T, F, W, Fut, Err>(slot: Slot<S, LoadableValue<T, F>>, work: W) -> Self
    where
        T: Send + 'static,
        F: Send + 'static,
        W: FnOnce(E) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Err>> + Send + 'static,
        Err: Into<F>,
        TaskPanicked: Into<F>,
    {
        Self::load_mapped(slot, work, |value| value)
    }

    /// [`load`](Self::load) with the value transformed before it is stored.
    #[must_use]
    pub fn load_mapped<T, U, F, W, Fut, Err, M>(
        slot: Slot<S, LoadableValue<T, F>>,
        work: W,
        map: M,
    ) -> Self
    where
        T: Send + 'static,
        F: Send + 'static,
        W: FnOnce(E) -> Fut + Send + 'static,
        Fut: Future<Output = Result<U, Err>> + Send + 'static,
        Err: Into<F>,
        TaskPanicked: Into<F>,
        M: FnOnce(U) -> T + Send + 'static,
    {
        let key = slot.task_key();
        let guard_key = key.clone();
        let panic_key = key.clone();

        let begin: Begin<S> = Box::new(move |state: &mut S| {
            let current = slot.get_mut(state);
            if current.is_loading() {
                return Err(MisuseError::AlreadyLoading(guard_key));
            }
            *current = LoadableValue::Loading;
            Ok(())
        });

        let run: Run<S, E> = Box::new(move |env: E| -> BoxFuture<'static, Commit<S>> {
            Box::pin(async move {
                let result: Result<T, F> = catch_work(panic_key, work, env).await.map(map);
                let commit: Commit<S> = Box::new(move |state: &mut S, now: DateTime<Utc>| {
                    slot.set(state, loadable_at(result, now));
                });
                commit
            })
        });

        Effect::Task(SlotTask {
            key,
            kind: TaskKind::Load,
            begin,
            run,
        })
    }

    /// Load one entry of a map-of-loadables field.
    ///
    /// A missing entry is seeded as `Idle` first; each key follows its own
    /// lifecycle and has its own registry entry.
    #[must_use]
    pub fn load_keyed<K, V, F, W, Fut, Err>(slot: KeyedSlot<S, K, V, F>, key: K, work: W) -> Self
    where
        K: Eq + Hash + fmt::Debug + Clone + Send + 'static,
        V: Send + 'static,
        F: Send + 'static,
        W: FnOnce(E) -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, Err>> + Send + 'static,
        Err: Into<F>,
        TaskPanicked: Into<F>,
    {
        let task_key = slot.task_key(&key);
        let guard_key = task_key.clone();
        let panic_key = task_key.clone();
        let begin_key = key.clone();

        let begin: Begin<S> = Box::new(move |state: &mut S| {
            let entry = slot.entry_or_idle(state, begin_key);
            if entry.is_loading() {
                return Err(MisuseError::AlreadyLoading(guard_key));
            }
            *entry = LoadableValue::Loading;
            Ok(())
        });

        let run: Run<S, E> = Box::new(move |env: E| -> BoxFuture<'static, Commit<S>> {
            Box::pin(async move {
                let result: Result<V, F> = catch_work(panic_key, work, env).await;
                let commit: Commit<S> = Box::new(move |state: &mut S, now: DateTime<Utc>| {
                    *slot.entry_or_idle(state, key) = loadable_at(result, now);
                });
                commit
            })
        });

        Effect::Task(SlotTask {
            key: task_key,
            kind: TaskKind::Load,
            begin,
            run,
        })
    }

    /// Write the output of `work` into a plain field.
    ///
    /// Starting a perform on a slot with a live task cancels the older task.
    #[must_use]
    pub fn perform<T, W, Fut>(slot: Slot<S, T>, work: W) -> Self
    where
        T: Send + 'static,
        W: FnOnce(E) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        Self::perform_mapped(slot, work, |value| value)
    }

    /// [`perform`](Self::perform) with the output transformed before the write.
    #[must_use]
    pub fn perform_mapped<T, U, W, Fut, M>(slot: Slot<S, T>, work: W, map: M) -> Self
    where
        T: Send + 'static,
        W: FnOnce(E) -> Fut + Send + 'static,
        Fut: Future<Output = U> + Send + 'static,
        M: FnOnce(U) -> T + Send + 'static,
    {
        let run: Run<S, E> = Box::new(move |env: E| -> BoxFuture<'static, Commit<S>> {
            let pending = work(env);
            Box::pin(async move {
                let value = map(pending.await);
                let commit: Commit<S> =
                    Box::new(move |state: &mut S, _now: DateTime<Utc>| slot.set(state, value));
                commit
            })
        });

        Effect::Task(SlotTask {
            key: slot.task_key(),
            kind: TaskKind::Perform,
            begin: Box::new(|_: &mut S| Ok(())),
            run,
        })
    }

    /// Write a synchronously computed value; untracked and atomic with the
    /// dispatch that produced it.
    #[must_use]
    pub fn perform_sync<T, W>(slot: Slot<S, T>, work: W) -> Self
    where
        T: 'static,
        W: FnOnce(&E) -> T + Send + 'static,
    {
        Effect::Sync(Box::new(move |state: &mut S, env: &E| {
            slot.set(state, work(env));
        }))
    }

    /// Edit the value of a loaded slot in place, keeping its timestamp.
    ///
    /// Applied atomically with the dispatch. When the slot is not `Loaded`
    /// the edit is dropped and the store reports a
    /// [`MisuseError::NotLoaded`].
    #[must_use]
    pub fn modify_loaded<T, F, M>(slot: Slot<S, LoadableValue<T, F>>, transform: M) -> Self
    where
        T: 'static,
        F: 'static,
        M: FnOnce(&mut T) + Send + 'static,
    {
        Effect::Modify(Box::new(move |state: &mut S| match slot.get_mut(state) {
            LoadableValue::Loaded { value, .. } => {
                transform(value);
                Ok(())
            },
            other => Err(MisuseError::NotLoaded {
                slot: slot.id().to_string(),
                variant: other.variant(),
            }),
        }))
    }

    /// Cancel the live task of `target`, if any.
    #[must_use]
    pub fn cancel(target: impl CancelTarget<S> + 'static) -> Self {
        Effect::Cancel(Box::new(target))
    }

    /// Cancel the live task of one entry of a keyed slot.
    #[must_use]
    pub fn cancel_keyed<K, V, F>(slot: KeyedSlot<S, K, V, F>, key: K) -> Self
    where
        K: Eq + Hash + fmt::Debug + Send + 'static,
        V: 'static,
        F: 'static,
    {
        Self::cancel((slot, key))
    }

    /// Publish `payload` to the hub the store is attached to
    #[must_use]
    pub fn broadcast<P: BroadcastPayload>(payload: P) -> Self {
        Effect::Broadcast(BroadcastMessage::new(payload))
    }

    /// Run async work against one dependency of the environment.
    ///
    /// The dependency is cloned out of the environment when the effect
    /// executes; `body` never sees the rest of the environment.
    #[must_use]
    pub fn with_dependency<K, B, Fut>(body: B) -> Self
    where
        K: Dependency<E>,
        K::Value: Clone + Send + 'static,
        B: FnOnce(K::Value) -> Fut + Send + 'static,
        Fut: Future<Output = Option<A>> + Send + 'static,
    {
        Effect::WithEnvironment(Box::new(move |env: &E| -> Effect<S, E, A> {
            let dependency = K::resolve(env).clone();
            Effect::Future(Box::pin(body(dependency)))
        }))
    }
}

/// Run `work`, turning a panic into a [`TaskPanicked`] failure.
async fn catch_work<E, W, Fut, T, Err, F>(key: TaskKey, work: W, env: E) -> Result<T, F>
where
    W: FnOnce(E) -> Fut,
    Fut: Future<Output = Result<T, Err>>,
    Err: Into<F>,
    TaskPanicked: Into<F>,
{
    match AssertUnwindSafe(async move { work(env).await }).catch_unwind().await {
        Ok(result) => result.map_err(Into::into),
        Err(payload) => {
            let error = TaskPanicked::from_payload(key, payload.as_ref());
            tracing::error!(key = %error.key, message = %error.message, "tracked work panicked");
            Err(error.into())
        },
    }
}

fn loadable_at<T, F>(result: Result<T, F>, timestamp: DateTime<Utc>) -> LoadableValue<T, F> {
    match result {
        Ok(value) => LoadableValue::Loaded { value, timestamp },
        Err(error) => LoadableValue::Failed { error, timestamp },
    }
}

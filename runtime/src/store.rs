//! Store runtime for coordinating reducer execution and effect handling.
//!
//! All state mutation happens in [`StoreInner`] behind one `RwLock` write
//! guard: reducing an action, running the synchronous half of its effects, and
//! applying a finished task's result. Spawned work only holds a
//! `Weak<StoreInner>`, so results arriving after the store is gone are
//! dropped.

use composable_store_core::broadcast::{BroadcastHub, BroadcastMessage, StoreId};
use composable_store_core::effect::{CancelTarget, Commit, Effect, SlotTask, TaskKind};
use composable_store_core::environment::Clock;
use composable_store_core::reducer::Reducer;
use composable_store_core::slot::TaskKey;
use futures::{FutureExt, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{RwLock, broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::StoreError;
use crate::registry::TaskRegistry;
use crate::{AtomicCounterGuard, DecrementGuard, EffectHandle, EffectTracking, StoreConfig};

/// The Store - runtime coordinator for a reducer
///
/// The Store manages:
/// 1. State (behind `RwLock`; the write guard is the only mutation path)
/// 2. Reducer (business logic)
/// 3. Environment (injected dependencies, cloned into async work)
/// 4. The task registry (at most one live task per slot)
/// 5. Subscriptions to the broadcast hub and to external streams
///
/// `Store` is a cheap handle; clones share one store. Dropping the last
/// handle tears the store down: every tracked task and subscription is
/// aborted, and state is left as it was.
///
/// # Type Parameters
///
/// - `S`: State type
/// - `A`: Action type
/// - `E`: Environment type
/// - `R`: Reducer implementation
///
/// # Example
///
/// ```ignore
/// let hub = BroadcastHub::new();
/// let store = Store::with_hub(
///     RosterState::default(),
///     RosterReducer,
///     RosterEnvironment::live(),
///     hub.clone(),
/// );
///
/// store.send_and_wait(RosterAction::Fetch).await?;
/// ```
pub struct Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    inner: Arc<StoreInner<S, A, E, R>>,
}

struct StoreInner<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    id: StoreId,
    name: String,
    state: RwLock<S>,
    reducer: R,
    environment: E,
    clock: Arc<dyn Clock>,
    config: StoreConfig,
    hub: BroadcastHub,
    registry: TaskRegistry,
    diagnostics: Diagnostics,
    observer: watch::Sender<S>,
    action_broadcast: broadcast::Sender<A>,
    dispatch_queue: mpsc::UnboundedSender<A>,
    background: Mutex<Vec<JoinHandle<()>>>,
    shutdown: AtomicBool,
    pending_effects: Arc<AtomicUsize>,
}

impl<S, A, E, R> Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
    S: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create a store attached to a private hub, with default configuration
    ///
    /// Must be called from within a Tokio runtime: the store spawns its
    /// dispatch loop and subscriptions immediately.
    #[must_use]
    pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
        Self::with_config(
            initial_state,
            reducer,
            environment,
            BroadcastHub::new(),
            StoreConfig::default(),
        )
    }

    /// Create a store attached to a shared hub
    #[must_use]
    pub fn with_hub(initial_state: S, reducer: R, environment: E, hub: BroadcastHub) -> Self {
        Self::with_config(initial_state, reducer, environment, hub, StoreConfig::default())
    }

    /// Create a store with a shared hub and custom configuration
    ///
    /// Subscribes to `hub` before returning, so every message published after
    /// construction reaches [`Reducer::on_broadcast`]. The reducer's
    /// [`Reducer::subscriptions`] are bound exactly once, here.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let config = StoreConfig::default()
    ///     .with_name("editor")
    ///     .with_shutdown_timeout(Duration::from_secs(5));
    ///
    /// let store = Store::with_config(EditorState::default(), EditorReducer, env, hub, config);
    /// ```
    #[must_use]
    pub fn with_config(
        initial_state: S,
        reducer: R,
        environment: E,
        hub: BroadcastHub,
        config: StoreConfig,
    ) -> Self {
        let id = StoreId::next();
        let name = config.name.clone().unwrap_or_else(|| id.to_string());
        let (observer, _) = watch::channel(initial_state.clone());
        let (action_broadcast, _) = broadcast::channel(config.action_broadcast_capacity.max(1));
        let (dispatch_queue, dispatch_rx) = mpsc::unbounded_channel();
        let hub_subscription = hub.subscribe();

        let inner = Arc::new(StoreInner {
            id,
            name,
            state: RwLock::new(initial_state),
            reducer,
            environment,
            clock: Arc::clone(&config.clock),
            diagnostics: Diagnostics::new(config.diagnostics_capacity, config.strict_misuse),
            config,
            hub,
            registry: TaskRegistry::default(),
            observer,
            action_broadcast,
            dispatch_queue,
            background: Mutex::new(Vec::new()),
            shutdown: AtomicBool::new(false),
            pending_effects: Arc::new(AtomicUsize::new(0)),
        });

        let mut background = vec![
            spawn_dispatch_loop(Arc::downgrade(&inner), dispatch_rx),
            spawn_hub_loop(Arc::downgrade(&inner), hub_subscription),
        ];
        for subscription in inner.reducer.subscriptions(&inner.environment) {
            let weak = Arc::downgrade(&inner);
            let name = subscription.name();
            let mut stream = subscription.into_stream();
            background.push(tokio::spawn(async move {
                while let Some(mapped) = stream.next().await {
                    let Some(action) = mapped else { continue };
                    let Some(inner) = weak.upgrade() else { break };
                    if let Err(error) = inner.send(action).await {
                        tracing::debug!(subscription = name, %error, "Subscription action rejected");
                    }
                }
                tracing::trace!(subscription = name, "Subscription stream finished");
            }));
        }
        inner
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(background);

        tracing::info!(store = %inner.id, name = %inner.name, "Store created");

        Self { inner }
    }

    /// Send an action to the store
    ///
    /// 1. Acquires the write lock on state
    /// 2. Calls the reducer with (state, action, environment)
    /// 3. Runs the synchronous half of every returned effect under the same
    ///    lock (slot guards, `Loading` transitions, sync writes, cancels)
    /// 4. Spawns the asynchronous half and publishes the new state
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] if the store is shutting down.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut handle = store.send(CounterAction::Increment).await?;
    /// handle.wait().await;
    /// ```
    #[tracing::instrument(skip(self, action), name = "store_send")]
    pub async fn send(&self, action: A) -> Result<EffectHandle, StoreError> {
        self.inner.send(action).await
    }

    /// Send an action and wait until every effect it started has finished
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] if the store is shutting down.
    pub async fn send_and_wait(&self, action: A) -> Result<(), StoreError> {
        let mut handle = self.inner.send(action).await?;
        handle.wait().await;
        Ok(())
    }

    /// Queue an action without waiting
    ///
    /// Queued actions are reduced in FIFO order by the store's dispatch loop.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ShutdownInProgress`] if the store is shutting down
    /// - [`StoreError::StoreDropped`] if the dispatch loop is gone
    pub fn dispatch(&self, action: A) -> Result<(), StoreError> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            metrics::counter!("store.shutdown.rejected_actions").increment(1);
            return Err(StoreError::ShutdownInProgress);
        }
        self.inner
            .dispatch_queue
            .send(action)
            .map_err(|_| StoreError::StoreDropped)
    }

    /// Read current state via a closure
    ///
    /// ```ignore
    /// let count = store.state(|s| s.footballers.value().map_or(0, Vec::len)).await;
    /// ```
    pub async fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&S) -> T,
    {
        let state = self.inner.state.read().await;
        f(&state)
    }

    /// Clone the current state
    pub async fn snapshot(&self) -> S {
        self.inner.state.read().await.clone()
    }

    /// Watch state snapshots
    ///
    /// The receiver is updated after every dispatch and every applied task
    /// result. It reports the sender closed once the store is dropped.
    #[must_use]
    pub fn observe(&self) -> watch::Receiver<S> {
        self.inner.observer.subscribe()
    }

    /// Subscribe to follow-up actions produced by effects
    ///
    /// Only actions fed back by effects are broadcast, not the ones passed to
    /// `send`. A receiver that falls behind skips old actions.
    #[must_use]
    pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
        self.inner.action_broadcast.subscribe()
    }

    /// Cancel the live task of `target`.
    ///
    /// The task is aborted and untracked, and a loadable target is marked
    /// `Cancelled`. Returns `false` (and changes nothing) when no task is
    /// live for the target.
    pub async fn cancel_active_task(&self, target: impl CancelTarget<S>) -> bool {
        let mut state = self.inner.state.write().await;
        let cancelled = self.inner.cancel_task(&mut *state, &target);
        if cancelled {
            self.inner.observer.send_replace(state.clone());
        }
        cancelled
    }

    /// Whether a task is tracked under `key`
    #[must_use]
    pub fn is_task_active(&self, key: &TaskKey) -> bool {
        self.inner.registry.contains(key)
    }

    /// Keys of every tracked task, sorted
    #[must_use]
    pub fn active_tasks(&self) -> Vec<TaskKey> {
        self.inner.registry.keys()
    }

    /// Misuse reports recorded by this store, oldest first
    #[must_use]
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.inner.diagnostics.snapshot()
    }

    /// Process-unique identity of this store
    #[must_use]
    pub fn id(&self) -> StoreId {
        self.inner.id
    }

    /// Name used in log fields
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The hub this store publishes to and receives from
    #[must_use]
    pub fn hub(&self) -> &BroadcastHub {
        &self.inner.hub
    }

    /// Initiate graceful shutdown of the store
    ///
    /// 1. Sets the shutdown flag (rejecting new actions)
    /// 2. Waits for pending effects to complete
    /// 3. On timeout, aborts every tracked task
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownTimeout`] if the timeout expires before
    /// all pending effects complete.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
        tracing::info!(store = %self.inner.id, "Initiating graceful shutdown");
        self.inner.shutdown.store(true, Ordering::Release);

        let start = std::time::Instant::now();
        let poll_interval = Duration::from_millis(10);

        loop {
            let pending = self.inner.pending_effects.load(Ordering::Acquire);

            if pending == 0 {
                tracing::info!(store = %self.inner.id, "All effects completed, shutdown successful");
                return Ok(());
            }

            if start.elapsed() >= timeout {
                let aborted = self.inner.registry.abort_all();
                tracing::error!(
                    store = %self.inner.id,
                    pending_effects = pending,
                    aborted_tasks = aborted,
                    "Shutdown timeout: {pending} effects still running"
                );
                return Err(StoreError::ShutdownTimeout(pending));
            }

            tokio::time::sleep(poll_interval).await;
        }
    }

    /// [`shutdown`](Self::shutdown) with the configured default timeout
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownTimeout`] if effects outlive the timeout.
    pub async fn close(&self) -> Result<(), StoreError> {
        self.shutdown(self.inner.config.default_shutdown_timeout).await
    }
}

impl<S, A, E, R> StoreInner<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
    S: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    async fn send(self: &Arc<Self>, action: A) -> Result<EffectHandle, StoreError> {
        if self.shutdown.load(Ordering::Acquire) {
            tracing::warn!(store = %self.id, "Rejected action: store is shutting down");
            metrics::counter!("store.shutdown.rejected_actions").increment(1);
            return Err(StoreError::ShutdownInProgress);
        }

        tracing::debug!(store = %self.id, "Processing action");
        metrics::counter!("store.commands.total").increment(1);

        let (handle, tracking) = EffectHandle::new();

        let mut state = self.state.write().await;
        tracing::trace!("Acquired write lock on state");

        let effects = {
            let span = tracing::debug_span!("reducer_execution");
            let _enter = span.enter();

            let start = std::time::Instant::now();
            let effects = self.reducer.reduce(&mut *state, action, &self.environment);
            metrics::histogram!("store.reducer.duration_seconds")
                .record(start.elapsed().as_secs_f64());

            tracing::trace!("Reducer completed, returned {} effects", effects.len());
            effects
        };

        for effect in effects {
            self.execute_effect(&mut *state, effect, &tracking);
        }

        self.observer.send_replace(state.clone());
        drop(state);

        tracing::debug!(store = %self.id, "Action processing completed, returning handle");
        Ok(handle)
    }

    /// Execute one effect.
    ///
    /// Runs with the state write guard held. Anything that has to wait is
    /// spawned; it re-enters through [`Self::send`] or [`Self::complete_task`].
    #[allow(clippy::too_many_lines)]
    fn execute_effect(self: &Arc<Self>, state: &mut S, effect: Effect<S, E, A>, tracking: &EffectTracking) {
        match effect {
            Effect::None => {
                tracing::trace!("Executing Effect::None (no-op)");
                metrics::counter!("store.effects.executed", "type" => "none").increment(1);
            },
            Effect::Future(fut) => {
                tracing::trace!("Executing Effect::Future");
                metrics::counter!("store.effects.executed", "type" => "future").increment(1);
                let guards = self.track(tracking);
                let weak = Arc::downgrade(self);

                tokio::spawn(async move {
                    let _guards = guards;
                    if let Some(action) = fut.await {
                        tracing::trace!("Effect::Future produced an action, sending to store");
                        feed_back(&weak, action).await;
                    } else {
                        tracing::trace!("Effect::Future completed with no action");
                    }
                });
            },
            Effect::Delay { duration, action } => {
                tracing::trace!("Executing Effect::Delay (duration: {:?})", duration);
                metrics::counter!("store.effects.executed", "type" => "delay").increment(1);
                let guards = self.track(tracking);
                let weak = Arc::downgrade(self);

                tokio::spawn(async move {
                    let _guards = guards;
                    tokio::time::sleep(duration).await;
                    tracing::trace!("Effect::Delay completed, sending action");
                    feed_back(&weak, *action).await;
                });
            },
            Effect::Parallel(effects) => {
                tracing::trace!("Executing Effect::Parallel with {} effects", effects.len());
                metrics::counter!("store.effects.executed", "type" => "parallel").increment(1);
                for effect in effects {
                    self.execute_effect(state, effect, tracking);
                }
            },
            Effect::Sequential(effects) => {
                let effect_count = effects.len();
                tracing::trace!("Executing Effect::Sequential with {} effects", effect_count);
                metrics::counter!("store.effects.executed", "type" => "sequential").increment(1);
                let mut steps = effects.into_iter();
                let Some(first) = steps.next() else { return };

                // The first step belongs to this dispatch: its synchronous half
                // lands under the same lock as the reducer's writes.
                let (first_tracking, first_rx) = EffectTracking::detached();
                self.execute_effect(state, first, &first_tracking);
                let rest: Vec<_> = steps.collect();
                if rest.is_empty() && first_tracking.is_idle() {
                    tracing::trace!("Effect::Sequential completed");
                    return;
                }

                let guards = self.track(tracking);
                let weak = Arc::downgrade(self);

                tokio::spawn(async move {
                    let _guards = guards;
                    wait_idle(first_tracking, first_rx).await;
                    for (idx, effect) in rest.into_iter().enumerate() {
                        tracing::trace!("Executing sequential effect {} of {}", idx + 2, effect_count);
                        let Some(inner) = weak.upgrade() else { return };

                        let (sub_tracking, sub_rx) = EffectTracking::detached();
                        {
                            let mut state = inner.state.write().await;
                            inner.execute_effect(&mut *state, effect, &sub_tracking);
                            inner.observer.send_replace(state.clone());
                        }
                        drop(inner);
                        wait_idle(sub_tracking, sub_rx).await;
                    }
                    tracing::trace!("Effect::Sequential completed");
                });
            },
            Effect::Task(task) => {
                metrics::counter!("store.effects.executed", "type" => "task").increment(1);
                self.start_task(state, task, tracking);
            },
            Effect::Sync(write) => {
                tracing::trace!("Executing Effect::Sync");
                metrics::counter!("store.effects.executed", "type" => "sync").increment(1);
                write(state, &self.environment);
            },
            Effect::Modify(edit) => {
                tracing::trace!("Executing Effect::Modify");
                metrics::counter!("store.effects.executed", "type" => "modify").increment(1);
                if let Err(misuse) = edit(state) {
                    self.diagnostics.report(self.id, &self.name, misuse, self.clock.now());
                }
            },
            Effect::Cancel(target) => {
                tracing::trace!(slot = %target.task_key(), "Executing Effect::Cancel");
                metrics::counter!("store.effects.executed", "type" => "cancel").increment(1);
                self.cancel_task(state, target.as_ref());
            },
            Effect::Broadcast(message) => {
                tracing::trace!(message = message.name(), "Executing Effect::Broadcast");
                metrics::counter!("store.effects.executed", "type" => "broadcast").increment(1);
                self.hub.publish(message.with_origin(self.id));
            },
            Effect::WithEnvironment(build) => {
                tracing::trace!("Executing Effect::WithEnvironment");
                metrics::counter!("store.effects.executed", "type" => "with_environment").increment(1);
                let effect = build(&self.environment);
                self.execute_effect(state, effect, tracking);
            },
        }
    }

    /// Count one spawned effect against the dispatch handle and shutdown.
    fn track(&self, tracking: &EffectTracking) -> (DecrementGuard, AtomicCounterGuard) {
        tracking.increment();
        self.pending_effects.fetch_add(1, Ordering::SeqCst);
        (
            DecrementGuard(tracking.clone()),
            AtomicCounterGuard(Arc::clone(&self.pending_effects)),
        )
    }

    fn start_task(self: &Arc<Self>, state: &mut S, task: SlotTask<S, E>, tracking: &EffectTracking) {
        let SlotTask { key, kind, begin, run } = task;

        if let Err(misuse) = begin(state) {
            self.diagnostics.report(self.id, &self.name, misuse, self.clock.now());
            return;
        }

        let id = self.registry.next_id();
        let guards = self.track(tracking);
        let weak = Arc::downgrade(self);
        let environment = self.environment.clone();
        let task_key = key.clone();

        let handle = tokio::spawn(async move {
            let _guards = guards;
            let outcome = AssertUnwindSafe(async move { run(environment).await }).catch_unwind().await;
            let Some(inner) = weak.upgrade() else {
                tracing::trace!(slot = %task_key, "Store dropped, task result discarded");
                return;
            };
            match outcome {
                Ok(commit) => inner.complete_task(&task_key, id, commit).await,
                Err(_) => inner.abandon_task(&task_key, id).await,
            }
        });

        // Registered before the state lock is released, so completion always
        // finds the entry unless it was cancelled or superseded.
        if let Some(previous) = self.registry.insert(key.clone(), id, kind, handle) {
            previous.abort();
            metrics::counter!("store.tasks.cancelled").increment(1);
            tracing::debug!(store = %self.id, slot = %key, kind = ?previous.kind, "Superseded running task");
        }

        let kind_label = match kind {
            TaskKind::Load => "load",
            TaskKind::Perform => "perform",
        };
        metrics::counter!("store.tasks.started", "kind" => kind_label).increment(1);
        tracing::debug!(store = %self.id, slot = %key, kind = kind_label, task = id, "Task started");
    }

    async fn complete_task(&self, key: &TaskKey, id: u64, commit: Commit<S>) {
        let mut state = self.state.write().await;
        if !self.registry.finish(key, id) {
            metrics::counter!("store.tasks.stale_result").increment(1);
            tracing::debug!(store = %self.id, slot = %key, task = id, "Discarding result of cancelled task");
            return;
        }

        commit(&mut *state, self.clock.now());
        self.observer.send_replace(state.clone());
        metrics::counter!("store.tasks.completed").increment(1);
        tracing::debug!(store = %self.id, slot = %key, task = id, "Task result applied");
    }

    /// Untrack a task whose work panicked without producing a commit.
    async fn abandon_task(&self, key: &TaskKey, id: u64) {
        let _state = self.state.write().await;
        if self.registry.finish(key, id) {
            metrics::counter!("store.tasks.panicked").increment(1);
            tracing::error!(store = %self.id, slot = %key, task = id, "Task panicked, slot left as it was");
        }
    }

    fn cancel_task(&self, state: &mut S, target: &dyn CancelTarget<S>) -> bool {
        let key = target.task_key();
        let Some(entry) = self.registry.remove(&key) else {
            tracing::debug!(store = %self.id, slot = %key, "No active task to cancel");
            return false;
        };

        entry.abort();
        target.mark_cancelled(state, self.clock.now());
        metrics::counter!("store.tasks.cancelled").increment(1);
        tracing::debug!(store = %self.id, slot = %key, task = entry.id, "Task cancelled");
        true
    }

    fn on_broadcast(&self, message: &BroadcastMessage) -> Option<A> {
        let action = self.reducer.on_broadcast(message)?;
        metrics::counter!("store.broadcast.delivered", "message" => message.name()).increment(1);
        tracing::debug!(
            store = %self.id,
            message = message.name(),
            message_id = message.id().get(),
            "Broadcast mapped to action"
        );
        Some(action)
    }
}

/// Wait until every effect counted by `tracking` has finished.
async fn wait_idle(tracking: EffectTracking, mut rx: watch::Receiver<()>) {
    if !tracking.is_idle() {
        drop(tracking);
        let _ = rx.changed().await;
    }
}

/// Send a follow-up action back into the store, if it still exists.
async fn feed_back<S, A, E, R>(weak: &Weak<StoreInner<S, A, E, R>>, action: A)
where
    R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
    S: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    let Some(inner) = weak.upgrade() else {
        tracing::trace!("Store dropped, follow-up action discarded");
        return;
    };

    let _ = inner.action_broadcast.send(action.clone());
    if let Err(error) = inner.send(action).await {
        tracing::debug!(%error, "Follow-up action rejected");
    }
}

fn spawn_dispatch_loop<S, A, E, R>(
    weak: Weak<StoreInner<S, A, E, R>>,
    mut queue: mpsc::UnboundedReceiver<A>,
) -> JoinHandle<()>
where
    R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
    S: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        while let Some(action) = queue.recv().await {
            let Some(inner) = weak.upgrade() else { break };
            if let Err(error) = inner.send(action).await {
                tracing::debug!(%error, "Queued action rejected");
            }
        }
    })
}

fn spawn_hub_loop<S, A, E, R>(
    weak: Weak<StoreInner<S, A, E, R>>,
    mut subscription: composable_store_core::broadcast::BroadcastSubscription,
) -> JoinHandle<()>
where
    R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
    S: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        while let Some(message) = subscription.recv().await {
            let Some(inner) = weak.upgrade() else { break };
            if let Some(action) = inner.on_broadcast(&message) {
                if let Err(error) = inner.send(action).await {
                    tracing::debug!(%error, "Broadcast action rejected");
                }
            }
        }
    })
}

impl<S, A, E, R> Drop for StoreInner<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    fn drop(&mut self) {
        let aborted = self.registry.abort_all();
        for handle in self
            .background
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            handle.abort();
        }
        tracing::info!(store = %self.id, name = %self.name, aborted_tasks = aborted, "Store torn down");
    }
}

impl<S, A, E, R> Clone for Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, A, E, R> std::fmt::Debug for Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("active_tasks", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use composable_store_core::broadcast::BroadcastPayload;
    use composable_store_core::error::AnyError;
    use composable_store_core::loadable::Loadable;
    use composable_store_core::reducer::EffectsOf;
    use composable_store_core::{slot, smallvec};

    #[derive(Debug, Clone, Default)]
    struct TestState {
        value: i32,
        label: String,
        items: Loadable<Vec<i32>>,
    }

    #[derive(Debug, Clone)]
    enum TestAction {
        Increment,
        Decrement,
        ProduceEffect,
        ProduceDelayedAction,
        ProduceParallelEffects,
        ProduceSequentialEffects,
        ProducePanickingEffect,
        LoadItems,
        LabelFromEnv,
        Append(char),
        Announce,
        Reset,
    }

    #[derive(Debug, Clone)]
    struct TestEnv {
        items: Vec<i32>,
    }

    #[derive(Debug)]
    struct Announced;

    impl BroadcastPayload for Announced {
        const NAME: &'static str = "announced";
    }

    #[derive(Debug, Clone)]
    struct TestReducer;

    impl Reducer for TestReducer {
        type State = TestState;
        type Action = TestAction;
        type Environment = TestEnv;

        fn reduce(&self, state: &mut TestState, action: TestAction, _env: &TestEnv) -> EffectsOf<Self> {
            match action {
                TestAction::Increment => {
                    state.value += 1;
                    smallvec![Effect::None]
                },
                TestAction::Decrement => {
                    state.value -= 1;
                    smallvec![Effect::None]
                },
                TestAction::ProduceEffect => smallvec![Effect::send(TestAction::Increment)],
                TestAction::ProduceDelayedAction => smallvec![Effect::Delay {
                    duration: Duration::from_millis(10),
                    action: Box::new(TestAction::Increment),
                }],
                TestAction::ProduceParallelEffects => smallvec![Effect::merge(vec![
                    Effect::send(TestAction::Increment),
                    Effect::send(TestAction::Increment),
                    Effect::send(TestAction::Increment),
                ])],
                TestAction::ProduceSequentialEffects => smallvec![Effect::chain(vec![
                    Effect::send(TestAction::Increment),
                    Effect::send(TestAction::Increment),
                    Effect::send(TestAction::Decrement),
                ])],
                TestAction::ProducePanickingEffect => {
                    #[allow(clippy::panic)]
                    {
                        smallvec![Effect::Future(Box::pin(async {
                            panic!("Intentional panic in effect for testing");
                        }))]
                    }
                },
                TestAction::LoadItems => smallvec![Effect::load(
                    slot!(TestState, items),
                    |env: TestEnv| async move { Ok::<_, AnyError>(env.items) },
                )],
                TestAction::LabelFromEnv => smallvec![Effect::perform_sync(
                    slot!(TestState, label),
                    |env: &TestEnv| format!("{} items", env.items.len()),
                )],
                TestAction::Append(letter) => {
                    state.label.push(letter);
                    smallvec![]
                },
                TestAction::Announce => smallvec![Effect::broadcast(Announced)],
                TestAction::Reset => {
                    state.value = 0;
                    smallvec![]
                },
            }
        }

        fn on_broadcast(&self, message: &BroadcastMessage) -> Option<TestAction> {
            message.is::<Announced>().then_some(TestAction::Reset)
        }
    }

    fn test_store() -> Store<TestState, TestAction, TestEnv, TestReducer> {
        Store::new(
            TestState::default(),
            TestReducer,
            TestEnv { items: vec![1, 2, 3] },
        )
    }

    #[tokio::test]
    async fn test_store_creation() {
        let store = test_store();
        assert_eq!(store.state(|s| s.value).await, 0);
        assert!(store.active_tasks().is_empty());
    }

    #[tokio::test]
    async fn test_send_action() -> Result<(), StoreError> {
        let store = test_store();
        store.send(TestAction::Increment).await?;
        store.send(TestAction::Increment).await?;
        store.send(TestAction::Decrement).await?;
        assert_eq!(store.state(|s| s.value).await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_effect_future_feeds_back() -> Result<(), StoreError> {
        let store = test_store();
        let mut actions = store.subscribe_actions();

        store.send_and_wait(TestAction::ProduceEffect).await?;

        assert_eq!(store.state(|s| s.value).await, 1);
        assert!(matches!(actions.try_recv(), Ok(TestAction::Increment)));
        Ok(())
    }

    #[tokio::test]
    async fn test_effect_delay() -> Result<(), StoreError> {
        let store = test_store();
        let mut handle = store.send(TestAction::ProduceDelayedAction).await?;
        assert_eq!(store.state(|s| s.value).await, 0);

        handle.wait().await;
        assert_eq!(store.state(|s| s.value).await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_effect_parallel() -> Result<(), StoreError> {
        let store = test_store();
        store.send_and_wait(TestAction::ProduceParallelEffects).await?;
        assert_eq!(store.state(|s| s.value).await, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_effect_sequential() -> Result<(), StoreError> {
        let store = test_store();
        store.send_and_wait(TestAction::ProduceSequentialEffects).await?;
        assert_eq!(store.state(|s| s.value).await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_effect_panic_isolation() -> Result<(), StoreError> {
        let store = test_store();
        store.send_and_wait(TestAction::ProducePanickingEffect).await?;

        store.send(TestAction::Increment).await?;
        assert_eq!(store.state(|s| s.value).await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_load_writes_loaded_and_untracks() -> Result<(), StoreError> {
        let store = test_store();
        let mut handle = store.send(TestAction::LoadItems).await?;
        assert!(store.state(|s| s.items.is_loading()).await);

        handle.wait().await;
        assert_eq!(store.state(|s| s.items.value().cloned()).await, Some(vec![1, 2, 3]));
        assert!(!store.is_task_active(&TaskKey::field("items")));
        Ok(())
    }

    #[tokio::test]
    async fn test_perform_sync_uses_environment() -> Result<(), StoreError> {
        let store = test_store();
        store.send(TestAction::LabelFromEnv).await?;
        assert_eq!(store.state(|s| s.label.clone()).await, "3 items");
        Ok(())
    }

    #[tokio::test]
    async fn test_dispatch_is_fifo() -> Result<(), StoreError> {
        let store = test_store();
        let mut observed = store.observe();

        for letter in ['a', 'b', 'c'] {
            store.dispatch(TestAction::Append(letter))?;
        }

        tokio::time::timeout(Duration::from_secs(1), observed.wait_for(|s| s.label == "abc"))
            .await
            .map_err(|_| StoreError::StoreDropped)?
            .map_err(|_| StoreError::StoreDropped)?;
        Ok(())
    }

    #[tokio::test]
    async fn test_own_broadcast_reaches_reducer() -> Result<(), StoreError> {
        let store = test_store();
        let mut observed = store.observe();
        store.send(TestAction::Increment).await?;
        store.send(TestAction::Announce).await?;

        tokio::time::timeout(Duration::from_secs(1), observed.wait_for(|s| s.value == 0))
            .await
            .map_err(|_| StoreError::StoreDropped)?
            .map_err(|_| StoreError::StoreDropped)?;
        Ok(())
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_actions() {
        let store = test_store();
        assert_eq!(store.shutdown(Duration::from_secs(1)).await, Ok(()));
        assert_eq!(
            store.send(TestAction::Increment).await.map(|_| ()),
            Err(StoreError::ShutdownInProgress)
        );
        assert_eq!(store.dispatch(TestAction::Increment), Err(StoreError::ShutdownInProgress));
    }

    #[tokio::test]
    async fn test_store_clone_shares_state() -> Result<(), StoreError> {
        let first = test_store();
        let second = first.clone();
        first.send(TestAction::Increment).await?;
        second.send(TestAction::Increment).await?;
        assert_eq!(second.state(|s| s.value).await, 2);
        assert_eq!(first.id(), second.id());
        Ok(())
    }
}

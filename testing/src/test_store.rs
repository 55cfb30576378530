//! A store substitute for deterministic reducer tests.
//!
//! [`TestStore`] runs the reducer and the synchronous half of every effect
//! for real: slot guards, `Loading` transitions, sync writes and cancels all
//! happen exactly as in the live store. Tracked async work is *not* run.
//! Each task is parked under its [`TaskKey`] and the test must settle it:
//!
//! - [`provide_value`](TestStore::provide_value) /
//!   [`provide_failure`](TestStore::provide_failure) for loads
//! - [`provide_keyed_value`](TestStore::provide_keyed_value) for keyed loads
//! - [`provide_output`](TestStore::provide_output) for performs
//! - [`run_pending`](TestStore::run_pending) to run the real work
//! - [`forget`](TestStore::forget) to discard it
//!
//! Dropping a `TestStore` with unsettled tasks panics.

#![allow(clippy::module_name_repetitions)]

use chrono::{DateTime, Utc};
use composable_store_core::broadcast::{BroadcastMessage, BroadcastPayload};
use composable_store_core::effect::{Effect, Run, SlotTask, TaskKind};
use composable_store_core::environment::Clock;
use composable_store_core::error::MisuseError;
use composable_store_core::loadable::LoadableValue;
use composable_store_core::reducer::Reducer;
use composable_store_core::slot::{KeyedSlot, Slot, TaskKey};
use futures::future::BoxFuture;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use crate::mocks::test_clock;

struct PendingTask<S, E> {
    kind: TaskKind,
    run: Run<S, E>,
}

/// Deterministic harness around a reducer
///
/// # Example
///
/// ```ignore
/// let mut store = TestStore::new(RosterState::default(), RosterReducer, env);
///
/// store.send(RosterAction::Fetch);
/// assert!(store.state().footballers.is_loading());
///
/// store.provide_value(slot!(RosterState, footballers), vec![messi()]);
/// assert_eq!(store.state().footballers.value().map(Vec::len), Some(1));
/// ```
pub struct TestStore<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    state: S,
    reducer: R,
    environment: E,
    clock: Arc<dyn Clock>,
    pending: BTreeMap<TaskKey, PendingTask<S, E>>,
    queued: VecDeque<A>,
    in_flight: VecDeque<BoxFuture<'static, Option<A>>>,
    broadcasts: Vec<BroadcastMessage>,
}

impl<S, A, E, R> TestStore<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
    E: Clone,
{
    /// Create a harness using [`test_clock`] for timestamps
    #[must_use]
    pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
        Self {
            state: initial_state,
            reducer,
            environment,
            clock: Arc::new(test_clock()),
            pending: BTreeMap::new(),
            queued: VecDeque::new(),
            in_flight: VecDeque::new(),
            broadcasts: Vec::new(),
        }
    }

    /// Replace the clock used for task results and cancellations
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> &S {
        &self.state
    }

    /// The environment handed to the reducer
    #[must_use]
    pub const fn environment(&self) -> &E {
        &self.environment
    }

    /// Keys of every parked task, sorted
    #[must_use]
    pub fn pending(&self) -> Vec<TaskKey> {
        self.pending.keys().cloned().collect()
    }

    /// Whether a task is parked under `key`
    #[must_use]
    pub fn is_pending(&self, key: &TaskKey) -> bool {
        self.pending.contains_key(key)
    }

    /// Every message the reducer broadcast, in order
    #[must_use]
    pub fn broadcasts(&self) -> &[BroadcastMessage] {
        &self.broadcasts
    }

    /// Payloads of type `P` the reducer broadcast, in order
    #[must_use]
    pub fn broadcasts_of<P: BroadcastPayload>(&self) -> Vec<&P> {
        self.broadcasts.iter().filter_map(BroadcastMessage::payload::<P>).collect()
    }

    /// Reduce `action` and run the synchronous half of its effects
    ///
    /// # Panics
    ///
    /// Panics on caller misuse, such as loading a slot that is already loading.
    pub fn send(&mut self, action: A) {
        let effects = self.reducer.reduce(&mut self.state, action, &self.environment);
        for effect in effects {
            self.execute(effect);
        }
    }

    /// Feed a hub message through [`Reducer::on_broadcast`]
    ///
    /// Returns the mapped action after reducing it, or `None` if the reducer
    /// ignores the message.
    pub fn deliver(&mut self, message: &BroadcastMessage) -> Option<A>
    where
        A: Clone,
    {
        let action = self.reducer.on_broadcast(message)?;
        self.send(action.clone());
        Some(action)
    }

    /// Reduce the next follow-up action produced by `Future` or `Delay`
    /// effects, and return it.
    ///
    /// Delayed actions are delivered without waiting. Futures are awaited in
    /// the order they were started; ones yielding no action are skipped.
    pub async fn receive(&mut self) -> Option<A>
    where
        A: Clone,
    {
        loop {
            if let Some(action) = self.queued.pop_front() {
                self.send(action.clone());
                return Some(action);
            }
            let future = self.in_flight.pop_front()?;
            if let Some(action) = future.await {
                self.queued.push_back(action);
            }
        }
    }

    /// Resolve a parked load with a value
    ///
    /// # Panics
    ///
    /// Panics if no load is parked for `slot`.
    pub fn provide_value<T, F>(&mut self, slot: Slot<S, LoadableValue<T, F>>, value: T) {
        self.take(&slot.task_key(), TaskKind::Load, "load");
        let now = self.clock.now();
        slot.set(&mut self.state, LoadableValue::loaded(value, now));
    }

    /// Resolve a parked load with a failure
    ///
    /// # Panics
    ///
    /// Panics if no load is parked for `slot`.
    pub fn provide_failure<T, F>(&mut self, slot: Slot<S, LoadableValue<T, F>>, error: impl Into<F>) {
        self.take(&slot.task_key(), TaskKind::Load, "load");
        let now = self.clock.now();
        slot.set(&mut self.state, LoadableValue::failed(error.into(), now));
    }

    /// Resolve a parked keyed load with a value
    ///
    /// # Panics
    ///
    /// Panics if no load is parked for `key`.
    pub fn provide_keyed_value<K, V, F>(&mut self, slot: KeyedSlot<S, K, V, F>, key: K, value: V)
    where
        K: Eq + Hash + fmt::Debug + 'static,
        V: 'static,
        F: 'static,
    {
        self.take(&slot.task_key(&key), TaskKind::Load, "load");
        let now = self.clock.now();
        *slot.entry_or_idle(&mut self.state, key) = LoadableValue::loaded(value, now);
    }

    /// Resolve a parked keyed load with a failure
    ///
    /// # Panics
    ///
    /// Panics if no load is parked for `key`.
    pub fn provide_keyed_failure<K, V, F>(
        &mut self,
        slot: KeyedSlot<S, K, V, F>,
        key: K,
        error: impl Into<F>,
    ) where
        K: Eq + Hash + fmt::Debug + 'static,
        V: 'static,
        F: 'static,
    {
        self.take(&slot.task_key(&key), TaskKind::Load, "load");
        let now = self.clock.now();
        *slot.entry_or_idle(&mut self.state, key) = LoadableValue::failed(error.into(), now);
    }

    /// Resolve a parked perform with its output
    ///
    /// # Panics
    ///
    /// Panics if no perform is parked for `slot`.
    pub fn provide_output<T>(&mut self, slot: Slot<S, T>, value: T) {
        self.take(&slot.task_key(), TaskKind::Perform, "perform");
        slot.set(&mut self.state, value);
    }

    /// Run the real work of a parked task against the environment
    ///
    /// # Panics
    ///
    /// Panics if nothing is parked under `key`.
    pub async fn run_pending(&mut self, key: &TaskKey) {
        let Some(task) = self.pending.remove(key) else {
            misuse(&MisuseError::NoPendingEffect(key.clone()));
        };
        let commit = (task.run)(self.environment.clone()).await;
        commit(&mut self.state, self.clock.now());
    }

    /// Discard a parked task without touching state
    ///
    /// # Panics
    ///
    /// Panics if nothing is parked under `key`.
    pub fn forget(&mut self, key: &TaskKey) {
        if self.pending.remove(key).is_none() {
            misuse(&MisuseError::NoPendingEffect(key.clone()));
        }
    }

    /// Discard every parked task and follow-up action
    pub fn forget_all(&mut self) {
        self.pending.clear();
        self.queued.clear();
        self.in_flight.clear();
    }

    fn take(&mut self, key: &TaskKey, kind: TaskKind, provided: &'static str) {
        match self.pending.get(key).map(|task| task.kind) {
            None => misuse(&MisuseError::NoPendingEffect(key.clone())),
            Some(pending) if pending != kind => misuse(&MisuseError::TypeMismatch {
                key: key.clone(),
                pending: kind_label(pending),
                provided,
            }),
            Some(_) => {
                self.pending.remove(key);
            },
        }
    }

    fn execute(&mut self, effect: Effect<S, E, A>) {
        match effect {
            Effect::None => {},
            Effect::Parallel(effects) | Effect::Sequential(effects) => {
                for effect in effects {
                    self.execute(effect);
                }
            },
            Effect::Delay { action, .. } => self.queued.push_back(*action),
            Effect::Future(future) => self.in_flight.push_back(future),
            Effect::Task(SlotTask { key, kind, begin, run }) => {
                if let Err(error) = begin(&mut self.state) {
                    misuse(&error);
                }
                self.pending.insert(key, PendingTask { kind, run });
            },
            Effect::Sync(write) => write(&mut self.state, &self.environment),
            Effect::Modify(edit) => {
                if let Err(error) = edit(&mut self.state) {
                    misuse(&error);
                }
            },
            Effect::Cancel(target) => {
                if self.pending.remove(&target.task_key()).is_some() {
                    target.mark_cancelled(&mut self.state, self.clock.now());
                }
            },
            Effect::Broadcast(message) => self.broadcasts.push(message),
            Effect::WithEnvironment(build) => {
                let effect = build(&self.environment);
                self.execute(effect);
            },
        }
    }

    /// Timestamp the harness stamps results with
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

impl<S, A, E, R> Drop for TestStore<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    fn drop(&mut self) {
        if self.pending.is_empty() || std::thread::panicking() {
            return;
        }
        let unresolved = self.pending.keys().cloned().collect();
        misuse(&MisuseError::UnresolvedExpectations(unresolved));
    }
}

impl<S, A, E, R> fmt::Debug for TestStore<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
    S: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestStore")
            .field("state", &self.state)
            .field("pending", &self.pending.keys().collect::<Vec<_>>())
            .field("queued", &self.queued.len())
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

const fn kind_label(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::Load => "load",
        TaskKind::Perform => "perform",
    }
}

#[allow(clippy::panic)]
fn misuse(error: &MisuseError) -> ! {
    panic!("{error}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use composable_store_core::error::AnyError;
    use composable_store_core::loadable::Loadable;
    use composable_store_core::reducer::EffectsOf;
    use composable_store_core::{keyed_slot, slot, smallvec};
    use std::collections::HashMap;

    #[derive(Debug, Default)]
    struct ClubState {
        squad: Loadable<Vec<String>>,
        kits: HashMap<u8, Loadable<String>>,
        motto: String,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum ClubAction {
        LoadSquad,
        CancelSquad,
        LoadKit(u8),
        WriteMotto,
        Announce,
        Echo(u8),
        Echoed(u8),
    }

    #[derive(Debug)]
    struct Announcement;

    impl BroadcastPayload for Announcement {
        const NAME: &'static str = "announcement";
    }

    #[derive(Clone)]
    struct ClubEnv {
        motto: &'static str,
    }

    struct ClubReducer;

    impl Reducer for ClubReducer {
        type State = ClubState;
        type Action = ClubAction;
        type Environment = ClubEnv;

        fn reduce(&self, state: &mut ClubState, action: ClubAction, _env: &ClubEnv) -> EffectsOf<Self> {
            match action {
                ClubAction::LoadSquad => smallvec![Effect::load(
                    slot!(ClubState, squad),
                    |_env: ClubEnv| async { Ok::<_, AnyError>(vec!["real".to_string()]) },
                )],
                ClubAction::CancelSquad => smallvec![Effect::cancel(slot!(ClubState, squad))],
                ClubAction::LoadKit(id) => smallvec![Effect::load_keyed(
                    keyed_slot!(ClubState, kits),
                    id,
                    |_env: ClubEnv| async { Ok::<_, AnyError>("home".to_string()) },
                )],
                ClubAction::WriteMotto => smallvec![Effect::perform(
                    slot!(ClubState, motto),
                    |env: ClubEnv| async move { env.motto.to_uppercase() },
                )],
                ClubAction::Announce => smallvec![Effect::broadcast(Announcement)],
                ClubAction::Echo(n) => smallvec![Effect::send(ClubAction::Echoed(n))],
                ClubAction::Echoed(n) => {
                    state.motto = format!("echo {n}");
                    smallvec![]
                },
            }
        }

        fn on_broadcast(&self, message: &BroadcastMessage) -> Option<ClubAction> {
            message.is::<Announcement>().then_some(ClubAction::LoadSquad)
        }
    }

    fn club() -> TestStore<ClubState, ClubAction, ClubEnv, ClubReducer> {
        TestStore::new(ClubState::default(), ClubReducer, ClubEnv { motto: "more than a club" })
    }

    #[test]
    fn test_provide_value_settles_load() {
        let mut store = club();
        store.send(ClubAction::LoadSquad);
        assert!(store.state().squad.is_loading());
        assert_eq!(store.pending(), vec![TaskKey::field("squad")]);

        store.provide_value(slot!(ClubState, squad), vec!["messi".to_string()]);
        assert_eq!(
            store.state().squad,
            Loadable::loaded(vec!["messi".to_string()], store.now())
        );
        assert!(store.pending().is_empty());
    }

    #[test]
    fn test_provide_failure_settles_load() {
        let mut store = club();
        store.send(ClubAction::LoadSquad);
        store.provide_failure(slot!(ClubState, squad), AnyError::msg("offline"));
        assert_eq!(
            store.state().squad.failure().map(ToString::to_string).as_deref(),
            Some("offline")
        );
    }

    #[test]
    fn test_cancel_marks_cancelled_and_unparks() {
        let mut store = club();
        store.send(ClubAction::LoadSquad);
        store.send(ClubAction::CancelSquad);
        assert_eq!(store.state().squad, Loadable::cancelled(store.now()));
        assert!(store.pending().is_empty());
    }

    #[test]
    fn test_keyed_and_perform_resolution() {
        let mut store = club();
        store.send(ClubAction::LoadKit(1));
        store.send(ClubAction::LoadKit(2));
        store.send(ClubAction::WriteMotto);
        assert_eq!(store.pending().len(), 3);

        store.provide_keyed_value(keyed_slot!(ClubState, kits), 1, "away".to_string());
        store.forget(&TaskKey::keyed("kits", &2_u8));
        store.provide_output(slot!(ClubState, motto), "visca".to_string());

        assert_eq!(store.state().kits[&1].value().map(String::as_str), Some("away"));
        assert!(store.state().kits[&2].is_loading());
        assert_eq!(store.state().motto, "visca");
    }

    #[tokio::test]
    async fn test_run_pending_uses_real_work() {
        let mut store = club();
        store.send(ClubAction::WriteMotto);
        store.run_pending(&TaskKey::field("motto")).await;
        assert_eq!(store.state().motto, "MORE THAN A CLUB");
    }

    #[tokio::test]
    async fn test_receive_reduces_follow_up() {
        let mut store = club();
        store.send(ClubAction::Echo(4));
        assert_eq!(store.receive().await, Some(ClubAction::Echoed(4)));
        assert_eq!(store.state().motto, "echo 4");
        assert_eq!(store.receive().await, None);
    }

    #[test]
    fn test_broadcasts_are_recorded_and_deliverable() {
        let mut store = club();
        store.send(ClubAction::Announce);
        assert_eq!(store.broadcasts_of::<Announcement>().len(), 1);

        let message = store.broadcasts()[0].clone();
        assert_eq!(store.deliver(&message), Some(ClubAction::LoadSquad));
        store.forget(&TaskKey::field("squad"));
    }

    #[test]
    #[should_panic(expected = "unresolved slot(s): squad")]
    fn test_drop_with_pending_task_panics() {
        let mut store = club();
        store.send(ClubAction::LoadSquad);
    }

    #[test]
    #[should_panic(expected = "already loading")]
    fn test_double_load_panics() {
        let mut store = club();
        store.send(ClubAction::LoadSquad);
        store.send(ClubAction::LoadSquad);
    }

    #[test]
    #[should_panic(expected = "cannot resolve it as perform")]
    fn test_wrong_resolution_kind_panics() {
        let mut store = club();
        store.send(ClubAction::LoadSquad);
        store.provide_output(slot!(ClubState, squad), Loadable::Idle);
    }
}

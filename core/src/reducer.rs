//! The Reducer trait - core abstraction for business logic.

use futures::stream::{BoxStream, Stream, StreamExt};
use smallvec::SmallVec;
use std::fmt;

use crate::broadcast::BroadcastMessage;
use crate::effect::Effect;

/// Effects returned from one `reduce` call.
pub type Effects<S, E, A> = SmallVec<[Effect<S, E, A>; 4]>;

/// Effects returned by reducer `R`
pub type EffectsOf<R> = Effects<
    <R as Reducer>::State,
    <R as Reducer>::Environment,
    <R as Reducer>::Action,
>;

/// The Reducer trait - core abstraction for business logic
///
/// A reducer maps `(state, action, environment)` to in-place state changes
/// plus effect descriptions. It never receives a handle to its own store:
/// follow-up actions go back through the store as effects
/// ([`Effect::send`], [`Effect::Future`]), never through a direct recursive
/// call.
///
/// # Example
///
/// ```ignore
/// impl Reducer for RosterReducer {
///     type State = RosterState;
///     type Action = RosterAction;
///     type Environment = RosterEnvironment;
///
///     fn reduce(
///         &self,
///         state: &mut RosterState,
///         action: RosterAction,
///         env: &RosterEnvironment,
///     ) -> EffectsOf<Self> {
///         match action {
///             RosterAction::Refresh => smallvec![Effect::load(
///                 slot!(RosterState, footballers),
///                 |env: RosterEnvironment| async move { env.api.footballers().await },
///             )],
///         }
///     }
/// }
/// ```
pub trait Reducer {
    /// The state type this reducer operates on
    type State;

    /// The action type this reducer processes
    type Action;

    /// The environment type with injected dependencies
    type Environment;

    /// Reduce an action into state changes and effects
    ///
    /// # Arguments
    ///
    /// - `state`: Mutable reference to current state
    /// - `action`: The action to process
    /// - `env`: Reference to injected dependencies
    ///
    /// # Returns
    ///
    /// Effects for the store to execute
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> EffectsOf<Self>;

    /// Map a hub message to a follow-up action for this store.
    ///
    /// Called for every message the store's hub subscription receives.
    fn on_broadcast(&self, _message: &BroadcastMessage) -> Option<Self::Action> {
        None
    }

    /// Long-lived external streams bound at store construction.
    ///
    /// Called exactly once. Each stream element that maps to `Some(action)` is
    /// dispatched to the store; the streams are torn down with the store.
    fn subscriptions(&self, _env: &Self::Environment) -> Vec<Subscription<Self::Action>> {
        Vec::new()
    }
}

/// An external stream mapped to optional actions.
pub struct Subscription<A> {
    name: &'static str,
    stream: BoxStream<'static, Option<A>>,
}

impl<A: Send + 'static> Subscription<A> {
    /// Map every element of `stream` through `map`.
    pub fn new<St, M>(name: &'static str, stream: St, map: M) -> Self
    where
        St: Stream + Send + 'static,
        M: FnMut(St::Item) -> Option<A> + Send + 'static,
    {
        Self {
            name,
            stream: stream.map(map).boxed(),
        }
    }

    /// Name used in logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Take the mapped stream
    #[must_use]
    pub fn into_stream(self) -> BoxStream<'static, Option<A>> {
        self.stream
    }
}

impl<A> fmt::Debug for Subscription<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::BroadcastPayload;
    use smallvec::smallvec;

    #[derive(Debug, Clone, Default)]
    struct CounterState {
        count: i64,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum CounterAction {
        Increment,
        Set(i64),
    }

    #[derive(Debug)]
    struct Reset;

    impl BroadcastPayload for Reset {
        const NAME: &'static str = "reset";
    }

    struct CounterReducer;

    impl Reducer for CounterReducer {
        type State = CounterState;
        type Action = CounterAction;
        type Environment = ();

        fn reduce(&self, state: &mut CounterState, action: CounterAction, _env: &()) -> EffectsOf<Self> {
            match action {
                CounterAction::Increment => state.count += 1,
                CounterAction::Set(value) => state.count = value,
            }
            smallvec![Effect::None]
        }

        fn on_broadcast(&self, message: &BroadcastMessage) -> Option<CounterAction> {
            message.is::<Reset>().then_some(CounterAction::Set(0))
        }

        fn subscriptions(&self, _env: &()) -> Vec<Subscription<CounterAction>> {
            vec![Subscription::new(
                "ticks",
                futures::stream::iter(0..3),
                |tick: i32| (tick % 2 == 0).then_some(CounterAction::Increment),
            )]
        }
    }

    #[test]
    fn test_reduce_mutates_state() {
        let mut state = CounterState::default();
        let effects = CounterReducer.reduce(&mut state, CounterAction::Increment, &());
        assert_eq!(state.count, 1);
        assert_eq!(effects.len(), 1);
    }

    #[test]
    fn test_on_broadcast_maps_known_messages() {
        let reset = BroadcastMessage::new(Reset);
        assert_eq!(CounterReducer.on_broadcast(&reset), Some(CounterAction::Set(0)));
    }

    #[tokio::test]
    async fn test_subscription_maps_elements() {
        let mut subscriptions = CounterReducer.subscriptions(&());
        assert_eq!(subscriptions.len(), 1);

        let subscription = subscriptions.remove(0);
        assert_eq!(subscription.name(), "ticks");
        let mapped: Vec<_> = subscription.into_stream().collect().await;
        assert_eq!(
            mapped,
            vec![Some(CounterAction::Increment), None, Some(CounterAction::Increment)]
        );
    }
}

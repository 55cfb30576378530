//! Integration tests for cross-store broadcasting and external streams
//!
//! Stores built around one hub must observe each other's messages; streams
//! bound by `Reducer::subscriptions` feed the store for as long as it lives.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use composable_store_core::broadcast::{BroadcastHub, BroadcastMessage, BroadcastPayload};
use composable_store_core::reducer::{EffectsOf, Reducer, Subscription};
use composable_store_core::{Effect, smallvec};
use composable_store_runtime::{Store, aggregate2};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

// ============================================================================
// Test Fixtures
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Goal {
    scorer: String,
}

impl BroadcastPayload for Goal {
    const NAME: &'static str = "goal";
}

#[derive(Debug, Clone, Default)]
struct BoardState {
    goals: Vec<String>,
    ticks: u32,
}

#[derive(Debug, Clone, PartialEq)]
enum BoardAction {
    Score(String),
    GoalSeen(String),
    Tick,
}

#[derive(Clone)]
struct BoardEnvironment {
    ticks: Arc<std::sync::Mutex<Option<mpsc::UnboundedReceiver<u32>>>>,
}

impl BoardEnvironment {
    fn without_ticks() -> Self {
        Self {
            ticks: Arc::new(std::sync::Mutex::new(None)),
        }
    }
}

struct BoardReducer;

impl Reducer for BoardReducer {
    type State = BoardState;
    type Action = BoardAction;
    type Environment = BoardEnvironment;

    fn reduce(
        &self,
        state: &mut BoardState,
        action: BoardAction,
        _env: &BoardEnvironment,
    ) -> EffectsOf<Self> {
        match action {
            BoardAction::Score(scorer) => smallvec![Effect::broadcast(Goal { scorer })],
            BoardAction::GoalSeen(scorer) => {
                state.goals.push(scorer);
                smallvec![]
            },
            BoardAction::Tick => {
                state.ticks += 1;
                smallvec![]
            },
        }
    }

    fn on_broadcast(&self, message: &BroadcastMessage) -> Option<BoardAction> {
        message
            .payload::<Goal>()
            .map(|goal| BoardAction::GoalSeen(goal.scorer.clone()))
    }

    fn subscriptions(&self, env: &BoardEnvironment) -> Vec<Subscription<BoardAction>> {
        let Some(mut ticks) = env.ticks.lock().unwrap().take() else {
            return Vec::new();
        };
        let stream = async_stream::stream! {
            while let Some(tick) = ticks.recv().await {
                yield tick;
            }
        };
        vec![Subscription::new("ticks", stream, |tick: u32| {
            (tick % 2 == 0).then_some(BoardAction::Tick)
        })]
    }
}

type BoardStore = Store<BoardState, BoardAction, BoardEnvironment, BoardReducer>;

fn board(hub: &BroadcastHub) -> BoardStore {
    Store::with_hub(
        BoardState::default(),
        BoardReducer,
        BoardEnvironment::without_ticks(),
        hub.clone(),
    )
}

async fn wait_until<F>(store: &BoardStore, predicate: F)
where
    F: Fn(&BoardState) -> bool,
{
    let mut observed = store.observe();
    tokio::time::timeout(Duration::from_secs(2), observed.wait_for(|state| predicate(state)))
        .await
        .expect("timed out waiting for state")
        .expect("store dropped");
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn broadcast_reaches_every_store_on_the_hub() {
    let hub = BroadcastHub::new();
    let home = board(&hub);
    let away = board(&hub);
    assert_eq!(hub.subscriber_count(), 2);

    home.send(BoardAction::Score("Kerr".to_string())).await.unwrap();

    for store in [&home, &away] {
        wait_until(store, |s| s.goals == ["Kerr"]).await;
    }
}

#[tokio::test]
async fn stores_on_different_hubs_are_isolated() {
    let home = board(&BroadcastHub::new());
    let away = board(&BroadcastHub::new());

    home.send(BoardAction::Score("Mead".to_string())).await.unwrap();
    wait_until(&home, |s| s.goals.len() == 1).await;

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(away.state(|s| s.goals.is_empty()).await);
}

#[tokio::test]
async fn messages_carry_store_origin() {
    let hub = BroadcastHub::new();
    let mut listener = hub.subscribe();
    let home = board(&hub);

    home.send(BoardAction::Score("Bonmatí".to_string())).await.unwrap();

    let message = tokio::time::timeout(Duration::from_secs(1), listener.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.name(), "goal");
    assert_eq!(message.origin(), Some(home.id()));
}

#[tokio::test]
async fn dropped_store_leaves_the_hub() {
    let hub = BroadcastHub::new();
    let home = board(&hub);
    let away = board(&hub);
    drop(away);

    home.send(BoardAction::Score("Russo".to_string())).await.unwrap();
    wait_until(&home, |s| s.goals.len() == 1).await;
    assert_eq!(hub.subscriber_count(), 1);
}

#[tokio::test]
async fn external_stream_elements_are_dispatched() {
    let (tx, rx) = mpsc::unbounded_channel();
    let env = BoardEnvironment {
        ticks: Arc::new(std::sync::Mutex::new(Some(rx))),
    };
    let store = Store::new(BoardState::default(), BoardReducer, env);

    for tick in 0..6 {
        tx.send(tick).unwrap();
    }

    wait_until(&store, |s| s.ticks == 3).await;
}

#[tokio::test]
async fn external_stream_stops_with_the_store() {
    let (tx, rx) = mpsc::unbounded_channel::<u32>();
    let env = BoardEnvironment {
        ticks: Arc::new(std::sync::Mutex::new(Some(rx))),
    };
    let store = Store::new(BoardState::default(), BoardReducer, env);
    drop(store);

    tokio::time::timeout(Duration::from_secs(1), tx.closed())
        .await
        .expect("subscription was not torn down");
}

#[tokio::test]
async fn aggregate_follows_two_stores() {
    let hub = BroadcastHub::new();
    let home = board(&hub);
    let away = board(&hub);

    let mut total = aggregate2(home.observe(), away.observe(), |home, away| {
        home.goals.len() + away.goals.len()
    });
    assert_eq!(*total.borrow(), 0);

    home.send(BoardAction::Score("Hemp".to_string())).await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), total.wait_for(|total| *total == 2))
        .await
        .unwrap()
        .unwrap();
}

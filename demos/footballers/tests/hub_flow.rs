//! End-to-end flow: the editor's announcement drives roster refetches

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use composable_store_core::BroadcastHub;
use composable_store_runtime::Store;
use composable_store_testing::{init_tracing, wait_for_state};
use footballers::{
    EditorAction, EditorReducer, EditorState, Footballer, FootballerApi, FootballersEnvironment,
    RosterReducer, RosterState,
};
use std::time::Duration;

type RosterStore = Store<RosterState, footballers::RosterAction, FootballersEnvironment, RosterReducer>;

fn stores(
    latency: Duration,
) -> (Store<EditorState, EditorAction, FootballersEnvironment, EditorReducer>, RosterStore, RosterStore) {
    init_tracing();
    let env = FootballersEnvironment::new(FootballerApi::new(latency));
    let hub = BroadcastHub::new();
    let editor = Store::with_hub(EditorState::default(), EditorReducer, env.clone(), hub.clone());
    let first = Store::with_hub(RosterState::default(), RosterReducer, env.clone(), hub.clone());
    let second = Store::with_hub(RosterState::default(), RosterReducer, env, hub);
    (editor, first, second)
}

fn contains(state: &RosterState, name: &str) -> bool {
    state
        .footballers
        .value()
        .is_some_and(|all| all.iter().any(|f: &Footballer| f.name == name))
}

#[tokio::test]
async fn created_footballer_reaches_the_roster() {
    let (editor, roster, _) = stores(Duration::from_millis(40));
    let mut observed = roster.observe();

    editor.send(EditorAction::SetName("Lionel Messi".into())).await.unwrap();
    editor.send(EditorAction::SetClub("Inter Miami".into())).await.unwrap();
    editor.send(EditorAction::Save).await.unwrap();
    assert!(editor.state(|s| s.saved.is_loading()).await);

    let mut variants = Vec::new();
    let settled = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            observed.changed().await.unwrap();
            let state = observed.borrow_and_update().clone();
            variants.push(state.footballers.variant());
            if contains(&state, "Lionel Messi") {
                break state;
            }
        }
    })
    .await
    .expect("roster never loaded the new footballer");

    assert_eq!(variants.first(), Some(&"loading"));
    assert_eq!(variants.last(), Some(&"loaded"));
    let messi = &settled.footballers.value().unwrap()[0];
    assert_eq!(messi.club, "Inter Miami");
    assert!(roster.diagnostics().is_empty());
}

#[tokio::test]
async fn every_roster_on_the_hub_refetches() {
    let (editor, first, second) = stores(Duration::ZERO);

    editor.send(EditorAction::SetName("Ada Hegerberg".into())).await.unwrap();
    editor.send(EditorAction::Save).await.unwrap();

    for roster in [&first, &second] {
        wait_for_state(&mut roster.observe(), Duration::from_secs(3), |s| contains(s, "Ada Hegerberg")).await;
    }
}

#[tokio::test]
async fn failed_save_leaves_rosters_alone() {
    let (editor, roster, _) = stores(Duration::ZERO);

    editor.send_and_wait(EditorAction::Save).await.unwrap();
    let editor_state = wait_for_state(&mut editor.observe(), Duration::from_secs(3), |s| {
        s.saved.is_failed()
    })
    .await;
    assert_eq!(
        editor_state.saved.failure().map(ToString::to_string).as_deref(),
        Some("footballer name must not be empty")
    );

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(roster.state(|s| s.footballers.is_idle()).await);
}

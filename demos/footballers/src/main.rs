//! Footballers demo binary
//!
//! Saves a footballer in the editor store and watches the roster store pick
//! it up through the hub.

use composable_store_core::BroadcastHub;
use composable_store_core::environment::with_dependency;
use composable_store_runtime::{Store, aggregate2};
use footballers::{
    Api, EditorAction, EditorReducer, EditorState, Footballer, FootballerApi, FootballersEnvironment,
    RosterAction, RosterReducer, RosterState, latest_signing,
};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "footballers=debug,composable_store_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("=== Footballers: two stores, one hub ===\n");

    let api = FootballerApi::seeded(
        Duration::from_millis(150),
        vec![Footballer { id: 1, name: "Alexia Putellas".into(), club: "Barcelona".into() }],
    );
    let env = FootballersEnvironment::new(api);
    println!("Service: {}", with_dependency::<Api, _, _>(&env, |api| format!("{api:?}")));

    let hub = BroadcastHub::new();
    let roster = Store::with_hub(RosterState::default(), RosterReducer, env.clone(), hub.clone());
    let editor = Store::with_hub(EditorState::default(), EditorReducer, env, hub);

    let mut signing = aggregate2(roster.observe(), editor.observe(), latest_signing);

    println!("\n>>> Roster: FetchFootballers");
    if let Ok(mut handle) = roster.send(RosterAction::FetchFootballers).await {
        println!("Roster is {}", roster.state(|s| s.footballers.variant()).await);
        handle.wait().await;
    }
    print_roster(&roster).await;

    println!("\n>>> Editor: draft and Save");
    let _ = editor.send(EditorAction::SetName("Sam Kerr".into())).await;
    let _ = editor.send(EditorAction::SetClub("Chelsea".into())).await;
    let _ = editor.send(EditorAction::Save).await;

    let settled = tokio::time::timeout(
        Duration::from_secs(5),
        signing.wait_for(|signing| signing.is_loaded() || signing.is_failed()),
    )
    .await;
    match settled {
        Ok(Ok(signing)) => match signing.value() {
            Some((roster, saved)) => {
                println!("Saved {} (#{}); roster now has {} footballers", saved.name, saved.id, roster.len());
            },
            None => println!("Save did not go through: {:?}", signing.failure()),
        },
        _ => println!("Stores did not settle in time"),
    }
    print_roster(&roster).await;

    println!("\n>>> Saving the same footballer again");
    let _ = editor.send(EditorAction::SetName("Sam Kerr".into())).await;
    let _ = editor.send_and_wait(EditorAction::Save).await;
    if let Some(error) = editor.state(|s| s.saved.failure().map(ToString::to_string)).await {
        println!("Editor reports: {error}");
    }

    for (name, result) in [("editor", editor.close().await), ("roster", roster.close().await)] {
        if let Err(error) = result {
            println!("{name} shutdown: {error}");
        }
    }
    println!("\n=== Done ===");
}

async fn print_roster(roster: &Store<RosterState, RosterAction, FootballersEnvironment, RosterReducer>) {
    let names = roster
        .state(|s| s.footballers.clone().map(|all| all.into_iter().map(|f| f.name).collect::<Vec<_>>()))
        .await;
    match names.value() {
        Some(names) => println!("Roster: {}", names.join(", ")),
        None => println!("Roster is {}", names.variant()),
    }
}

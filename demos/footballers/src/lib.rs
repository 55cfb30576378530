//! # Footballers
//!
//! Two independently owned stores coordinating through a broadcast hub.
//!
//! - The **editor** drafts a footballer and saves it through the service.
//!   On success it broadcasts [`FootballerCreated`].
//! - The **roster** keeps a loadable list of every footballer. It maps
//!   `FootballerCreated` to [`RosterAction::FetchFootballers`] and reloads.
//!
//! Neither store holds a reference to the other; both only share a
//! [`BroadcastHub`](composable_store_core::BroadcastHub).
//!
//! ## Example
//!
//! ```no_run
//! use composable_store_core::BroadcastHub;
//! use composable_store_runtime::Store;
//! use footballers::*;
//!
//! # async fn example() {
//! let hub = BroadcastHub::new();
//! let env = FootballersEnvironment::default();
//! let roster = Store::with_hub(RosterState::default(), RosterReducer, env.clone(), hub.clone());
//! let editor = Store::with_hub(EditorState::default(), EditorReducer, env, hub);
//!
//! let _ = editor.send(EditorAction::SetName("Marta".into())).await;
//! let _ = editor.send_and_wait(EditorAction::Save).await;
//! # }
//! ```

use composable_store_core::broadcast::BroadcastPayload;
use composable_store_core::environment::Dependency;
use composable_store_core::loadable::LoadableValue;
use composable_store_core::zip::{ZippedError, zip2};
use std::time::Duration;

pub mod api;
pub mod editor;
pub mod roster;

pub use api::{ApiError, Footballer, FootballerApi};
pub use editor::{EditorAction, EditorReducer, EditorState};
pub use roster::{RosterAction, RosterReducer, RosterState};

/// Announced on the hub after a footballer is saved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FootballerCreated {
    /// The footballer as the service stored it
    pub footballer: Footballer,
}

impl BroadcastPayload for FootballerCreated {
    const NAME: &'static str = "footballer_created";
}

/// Dependencies shared by both stores
#[derive(Debug, Clone)]
pub struct FootballersEnvironment {
    /// Footballer service
    pub api: FootballerApi,
    /// Club prefilled by [`EditorAction::UseDefaultClub`]
    pub default_club: String,
}

impl FootballersEnvironment {
    /// Environment around an existing service handle
    #[must_use]
    pub fn new(api: FootballerApi) -> Self {
        Self {
            api,
            default_club: "Free agent".to_string(),
        }
    }
}

impl Default for FootballersEnvironment {
    fn default() -> Self {
        Self::new(FootballerApi::new(Duration::ZERO))
    }
}

/// Dependency key for the footballer service
#[derive(Debug)]
pub struct Api;

impl Dependency<FootballersEnvironment> for Api {
    type Value = FootballerApi;

    fn resolve(env: &FootballersEnvironment) -> &FootballerApi {
        &env.api
    }
}

/// The roster together with the last saved footballer
///
/// `Loaded` only once both stores have settled successfully; a failure on
/// either side wins.
#[must_use]
pub fn latest_signing(
    roster: &RosterState,
    editor: &EditorState,
) -> LoadableValue<(Vec<Footballer>, Footballer), ZippedError> {
    zip2(&roster.footballers, &editor.saved)
}

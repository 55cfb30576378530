//! The roster store: a loadable list of every footballer.
//!
//! It never talks to the editor directly. When any store on the hub announces
//! a [`FootballerCreated`](crate::FootballerCreated), the roster refetches.

use crate::{FootballerCreated, FootballersEnvironment};
use crate::api::Footballer;
use composable_store_core::broadcast::BroadcastMessage;
use composable_store_core::effect::Effect;
use composable_store_core::loadable::Loadable;
use composable_store_core::reducer::{EffectsOf, Reducer};
use composable_store_core::{slot, smallvec};

/// Roster state
#[derive(Debug, Clone, Default)]
pub struct RosterState {
    /// Every footballer the service knows about
    pub footballers: Loadable<Vec<Footballer>>,
}

impl RosterState {
    /// Names of the loaded footballers playing for `club`
    #[must_use]
    pub fn squad(&self, club: &str) -> Loadable<Vec<String>> {
        self.footballers.clone().map(|footballers| {
            footballers
                .into_iter()
                .filter(|f| f.club == club)
                .map(|f| f.name)
                .collect()
        })
    }
}

/// Roster actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterAction {
    /// (Re)load the whole roster
    FetchFootballers,
    /// Abandon an in-flight fetch
    CancelFetch,
}

/// Roster reducer
#[derive(Debug, Clone, Copy, Default)]
pub struct RosterReducer;

impl Reducer for RosterReducer {
    type State = RosterState;
    type Action = RosterAction;
    type Environment = FootballersEnvironment;

    fn reduce(
        &self,
        state: &mut RosterState,
        action: RosterAction,
        _env: &FootballersEnvironment,
    ) -> EffectsOf<Self> {
        match action {
            RosterAction::FetchFootballers => {
                let fetch = Effect::load(
                    slot!(RosterState, footballers),
                    |env: FootballersEnvironment| async move { env.api.list().await },
                );
                if state.footballers.is_loading() {
                    // A newer fetch supersedes the running one.
                    tracing::debug!("Restarting roster fetch");
                    smallvec![Effect::cancel(slot!(RosterState, footballers)), fetch]
                } else {
                    smallvec![fetch]
                }
            },
            RosterAction::CancelFetch => smallvec![Effect::cancel(slot!(RosterState, footballers))],
        }
    }

    fn on_broadcast(&self, message: &BroadcastMessage) -> Option<RosterAction> {
        message
            .is::<FootballerCreated>()
            .then_some(RosterAction::FetchFootballers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use composable_store_core::slot::TaskKey;
    use composable_store_testing::TestStore;

    fn footballer(id: u32, name: &str, club: &str) -> Footballer {
        Footballer { id, name: name.to_string(), club: club.to_string() }
    }

    fn roster() -> TestStore<RosterState, RosterAction, FootballersEnvironment, RosterReducer> {
        TestStore::new(RosterState::default(), RosterReducer, FootballersEnvironment::default())
    }

    #[test]
    fn test_fetch_loads_roster() {
        let mut store = roster();
        store.send(RosterAction::FetchFootballers);
        assert!(store.state().footballers.is_loading());

        store.provide_value(
            slot!(RosterState, footballers),
            vec![footballer(1, "Pirlo", "Juventus"), footballer(2, "Kaká", "Milan")],
        );
        assert_eq!(store.state().squad("Milan").into_value(), Some(vec!["Kaká".to_string()]));
    }

    #[test]
    fn test_fetch_while_loading_restarts() {
        let mut store = roster();
        store.send(RosterAction::FetchFootballers);
        store.send(RosterAction::FetchFootballers);

        assert!(store.state().footballers.is_loading());
        assert_eq!(store.pending(), vec![TaskKey::field("footballers")]);
        store.forget(&TaskKey::field("footballers"));
    }

    #[test]
    fn test_created_broadcast_triggers_fetch() {
        let mut store = roster();
        let created = BroadcastMessage::new(FootballerCreated {
            footballer: footballer(3, "Totti", "Roma"),
        });

        assert_eq!(store.deliver(&created), Some(RosterAction::FetchFootballers));
        assert!(store.state().footballers.is_loading());
        store.provide_failure(slot!(RosterState, footballers), crate::api::ApiError::Unavailable);
        assert!(store.state().footballers.is_failed());
        assert!(store.state().squad("Roma").is_failed());
    }

    #[test]
    fn test_cancel_fetch() {
        let mut store = roster();
        store.send(RosterAction::FetchFootballers);
        store.send(RosterAction::CancelFetch);
        assert!(store.state().footballers.is_cancelled());
    }
}

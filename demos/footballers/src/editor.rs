//! The editor store: drafts a footballer and saves it.
//!
//! A successful save is announced on the hub as a
//! [`FootballerCreated`](crate::FootballerCreated) so other stores can react.

use crate::api::Footballer;
use crate::{FootballerCreated, FootballersEnvironment};
use composable_store_core::effect::Effect;
use composable_store_core::loadable::Loadable;
use composable_store_core::reducer::{EffectsOf, Reducer};
use composable_store_core::{slot, smallvec};

/// Editor state
#[derive(Debug, Clone, Default)]
pub struct EditorState {
    /// Draft name
    pub name: String,
    /// Draft club
    pub club: String,
    /// Outcome of the last save
    pub saved: Loadable<Footballer>,
}

/// Editor actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorAction {
    /// Edit the draft name
    SetName(String),
    /// Edit the draft club
    SetClub(String),
    /// Fill the club from the environment's default
    UseDefaultClub,
    /// Create the drafted footballer, then announce it
    ///
    /// `saved` is already `Loading` when the dispatch returns; the
    /// announcement runs once the save has settled.
    Save,
    /// Announce the last saved footballer on the hub
    Announce,
}

/// Editor reducer
#[derive(Debug, Clone, Copy, Default)]
pub struct EditorReducer;

impl Reducer for EditorReducer {
    type State = EditorState;
    type Action = EditorAction;
    type Environment = FootballersEnvironment;

    fn reduce(
        &self,
        state: &mut EditorState,
        action: EditorAction,
        _env: &FootballersEnvironment,
    ) -> EffectsOf<Self> {
        match action {
            EditorAction::SetName(name) => {
                state.name = name;
                smallvec![]
            },
            EditorAction::SetClub(club) => {
                state.club = club;
                smallvec![]
            },
            EditorAction::UseDefaultClub => smallvec![Effect::perform_sync(
                slot!(EditorState, club),
                |env: &FootballersEnvironment| env.default_club.clone(),
            )],
            EditorAction::Save => {
                let (name, club) = (state.name.clone(), state.club.clone());
                smallvec![Effect::chain(vec![
                    Effect::load(
                        slot!(EditorState, saved),
                        move |env: FootballersEnvironment| async move { env.api.create(name, club).await },
                    ),
                    Effect::send(EditorAction::Announce),
                ])]
            },
            EditorAction::Announce => match state.saved.value() {
                Some(footballer) => {
                    tracing::info!(id = footballer.id, "Announcing new footballer");
                    state.name.clear();
                    smallvec![Effect::broadcast(FootballerCreated { footballer: footballer.clone() })]
                },
                None => {
                    tracing::debug!(saved = state.saved.variant(), "Nothing to announce");
                    smallvec![]
                },
            },
        }
    }
}

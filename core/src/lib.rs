//! # Composable Store Core
//!
//! Core traits and types for the Composable Store architecture.
//!
//! A store holds application state, accepts actions, routes them through a
//! reducer, and runs the effects the reducer describes. This crate holds the
//! pieces that do not need a runtime:
//!
//! - **[`LoadableValue`]**: the lifecycle of one async operation
//!   (`Idle → Loading → Loaded | Failed | Cancelled`) with `map`, `modify`
//!   and the `zip` family
//! - **[`Slot`] / [`KeyedSlot`]**: explicit, typed addressing of state fields
//! - **[`Effect`]**: effect descriptions, including slot-targeted `load`,
//!   `perform` and `cancel`
//! - **[`Reducer`]**: `(State, Action, Environment) → (State, Effects)`
//! - **[`BroadcastHub`]**: process-wide publish/subscribe between stores
//!
//! ## Example
//!
//! ```ignore
//! use composable_store_core::*;
//!
//! #[derive(Clone, Debug, Default)]
//! struct RosterState {
//!     footballers: Loadable<Vec<Footballer>>,
//! }
//!
//! impl Reducer for RosterReducer {
//!     type State = RosterState;
//!     type Action = RosterAction;
//!     type Environment = RosterEnvironment;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut RosterState,
//!         action: RosterAction,
//!         env: &RosterEnvironment,
//!     ) -> EffectsOf<Self> {
//!         match action {
//!             RosterAction::Fetch => smallvec![Effect::load(
//!                 slot!(RosterState, footballers),
//!                 |env: RosterEnvironment| async move { env.api.list().await },
//!             )],
//!         }
//!     }
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use smallvec::{SmallVec, smallvec};

/// Cross-store messaging
pub mod broadcast;

/// Effect descriptions
pub mod effect;

/// Declarative effect macros
pub mod effect_macros;

/// Dependency injection helpers
pub mod environment;

/// Error types
pub mod error;

/// Async-operation lifecycle values
pub mod loadable;

/// Reducer trait and subscriptions
pub mod reducer;

/// State field addressing
pub mod slot;

/// Combining loadables
pub mod zip;

pub use broadcast::{BroadcastHub, BroadcastMessage, BroadcastPayload, BroadcastSubscription, MessageId, StoreId};
pub use effect::{CancelTarget, Effect, SlotTask, TaskKind};
pub use environment::{Clock, Dependency, SystemClock, with_dependency};
pub use error::{AnyError, MisuseError, TaskPanicked};
pub use loadable::{Loadable, LoadableValue};
pub use reducer::{Effects, EffectsOf, Reducer, Subscription};
pub use slot::{KeyedSlot, Slot, TaskKey};
pub use zip::{ZippedError, ZippedFailure, zip_all, zip2, zip3, zip4, zip5, zip6};

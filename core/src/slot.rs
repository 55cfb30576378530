//! Explicit addressing of state fields.
//!
//! A [`Slot`] names one field of a store's state and carries plain function
//! accessors for it. A [`KeyedSlot`] names a map-of-loadables field, and one of
//! its entries is addressed by pairing it with a key. The store tracks at most
//! one in-flight task per [`TaskKey`].
//!
//! # Example
//!
//! ```
//! use composable_store_core::{slot, keyed_slot};
//! use composable_store_core::loadable::Loadable;
//! use std::collections::HashMap;
//!
//! #[derive(Default)]
//! struct ProfileState {
//!     name: String,
//!     avatar: Loadable<Vec<u8>>,
//!     posts: HashMap<u32, Loadable<String>>,
//! }
//!
//! let name = slot!(ProfileState, name);
//! let avatar = slot!(ProfileState, avatar);
//! let posts = keyed_slot!(ProfileState, posts);
//!
//! let mut state = ProfileState::default();
//! name.get_mut(&mut state).push_str("ada");
//!
//! assert_eq!(name.get(&state), "ada");
//! assert!(avatar.get(&state).is_idle());
//! assert_eq!(posts.task_key(&3).to_string(), "posts[3]");
//! ```

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use crate::loadable::LoadableValue;

/// Registry key for one tracked task.
///
/// Plain slots use only the field tag; keyed slots add the `Debug` rendering
/// of the entry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskKey {
    slot: &'static str,
    key: Option<String>,
}

impl TaskKey {
    /// Key for a whole field
    #[must_use]
    pub const fn field(slot: &'static str) -> Self {
        Self { slot, key: None }
    }

    /// Key for one entry of a map-shaped field
    #[must_use]
    pub fn keyed<K: fmt::Debug + ?Sized>(slot: &'static str, key: &K) -> Self {
        Self {
            slot,
            key: Some(format!("{key:?}")),
        }
    }

    /// The field tag
    #[must_use]
    pub const fn slot(&self) -> &'static str {
        self.slot
    }

    /// The rendered entry key, if this is a keyed slot
    #[must_use]
    pub fn entry(&self) -> Option<&str> {
        self.key.as_deref()
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}[{key}]", self.slot),
            None => f.write_str(self.slot),
        }
    }
}

/// A named, typed field of state `S` holding a `T`.
///
/// Built with [`slot!`](crate::slot!) in most code. Slots are `Copy` and cheap
/// to pass into effects.
pub struct Slot<S, T> {
    id: &'static str,
    get: fn(&S) -> &T,
    get_mut: fn(&mut S) -> &mut T,
}

impl<S, T> Slot<S, T> {
    /// Create a slot from a tag and a pair of accessors.
    #[must_use]
    pub const fn new(id: &'static str, get: fn(&S) -> &T, get_mut: fn(&mut S) -> &mut T) -> Self {
        Self { id, get, get_mut }
    }

    /// The field tag
    #[must_use]
    pub const fn id(&self) -> &'static str {
        self.id
    }

    /// Registry key for this slot
    #[must_use]
    pub const fn task_key(&self) -> TaskKey {
        TaskKey::field(self.id)
    }

    /// Read the field
    pub fn get<'s>(&self, state: &'s S) -> &'s T {
        (self.get)(state)
    }

    /// Mutably borrow the field
    pub fn get_mut<'s>(&self, state: &'s mut S) -> &'s mut T {
        (self.get_mut)(state)
    }

    /// Overwrite the field
    pub fn set(&self, state: &mut S, value: T) {
        *(self.get_mut)(state) = value;
    }
}

impl<S, T> Clone for Slot<S, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S, T> Copy for Slot<S, T> {}

impl<S, T> fmt::Debug for Slot<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Slot").field(&self.id).finish()
    }
}

/// Accessor type for a map-of-loadables field
type MapRef<S, K, V, F> = fn(&S) -> &HashMap<K, LoadableValue<V, F>>;

/// Mutable accessor type for a map-of-loadables field
type MapMut<S, K, V, F> = fn(&mut S) -> &mut HashMap<K, LoadableValue<V, F>>;

/// A map-shaped field of state `S` whose entries are loaded independently.
///
/// Each key gets its own registry entry, so loads for different keys run
/// side by side.
pub struct KeyedSlot<S, K, V, F> {
    id: &'static str,
    get: MapRef<S, K, V, F>,
    get_mut: MapMut<S, K, V, F>,
}

impl<S, K, V, F> KeyedSlot<S, K, V, F>
where
    K: Eq + Hash + fmt::Debug,
{
    /// Create a keyed slot from a tag and a pair of accessors.
    #[must_use]
    pub const fn new(id: &'static str, get: MapRef<S, K, V, F>, get_mut: MapMut<S, K, V, F>) -> Self {
        Self { id, get, get_mut }
    }

    /// The field tag
    #[must_use]
    pub const fn id(&self) -> &'static str {
        self.id
    }

    /// Registry key for one entry
    #[must_use]
    pub fn task_key(&self, key: &K) -> TaskKey {
        TaskKey::keyed(self.id, key)
    }

    /// Read the whole map
    pub fn get<'s>(&self, state: &'s S) -> &'s HashMap<K, LoadableValue<V, F>>
    where
        K: 's,
        V: 's,
        F: 's,
    {
        (self.get)(state)
    }

    /// Mutably borrow the whole map
    pub fn get_mut<'s>(&self, state: &'s mut S) -> &'s mut HashMap<K, LoadableValue<V, F>>
    where
        K: 's,
        V: 's,
        F: 's,
    {
        (self.get_mut)(state)
    }

    /// Read one entry
    pub fn entry<'s>(&self, state: &'s S, key: &K) -> Option<&'s LoadableValue<V, F>>
    where
        K: 's,
        V: 's,
        F: 's,
    {
        (self.get)(state).get(key)
    }

    /// Mutably borrow one entry, seeding it as `Idle` when absent
    pub fn entry_or_idle<'s>(&self, state: &'s mut S, key: K) -> &'s mut LoadableValue<V, F>
    where
        K: 's,
        V: 's,
        F: 's,
    {
        (self.get_mut)(state).entry(key).or_default()
    }
}

impl<S, K, V, F> Clone for KeyedSlot<S, K, V, F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S, K, V, F> Copy for KeyedSlot<S, K, V, F> {}

impl<S, K, V, F> fmt::Debug for KeyedSlot<S, K, V, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KeyedSlot").field(&self.id).finish()
    }
}

/// Build a [`Slot`] for a named field of a state type.
///
/// ```ignore
/// let footballers = slot!(RosterState, footballers);
/// ```
#[macro_export]
macro_rules! slot {
    ($state:ty, $field:ident) => {
        $crate::slot::Slot::<$state, _>::new(
            ::core::stringify!($field),
            |state| &state.$field,
            |state| &mut state.$field,
        )
    };
}

/// Build a [`KeyedSlot`] for a `HashMap<K, LoadableValue<V, F>>` field.
///
/// ```ignore
/// let details = keyed_slot!(RosterState, details);
/// ```
#[macro_export]
macro_rules! keyed_slot {
    ($state:ty, $field:ident) => {
        $crate::slot::KeyedSlot::<$state, _, _, _>::new(
            ::core::stringify!($field),
            |state| &state.$field,
            |state| &mut state.$field,
        )
    };
}

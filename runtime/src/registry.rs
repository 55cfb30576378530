//! Per-slot task tracking.
//!
//! Every tracked task gets a registry id. A finished task may write into
//! state only while its id is still the one registered under its key;
//! cancelled and superseded tasks find their entry gone or replaced.

use composable_store_core::effect::TaskKind;
use composable_store_core::slot::TaskKey;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;

pub(crate) struct TaskEntry {
    pub(crate) id: u64,
    pub(crate) kind: TaskKind,
    handle: JoinHandle<()>,
}

impl TaskEntry {
    pub(crate) fn abort(&self) {
        self.handle.abort();
    }
}

#[derive(Default)]
pub(crate) struct TaskRegistry {
    next_id: AtomicU64,
    tasks: Mutex<HashMap<TaskKey, TaskEntry>>,
}

impl TaskRegistry {
    fn tasks(&self) -> MutexGuard<'_, HashMap<TaskKey, TaskEntry>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Track `handle` under `key`, returning the entry it replaces.
    pub(crate) fn insert(
        &self,
        key: TaskKey,
        id: u64,
        kind: TaskKind,
        handle: JoinHandle<()>,
    ) -> Option<TaskEntry> {
        self.tasks().insert(key, TaskEntry { id, kind, handle })
    }

    pub(crate) fn remove(&self, key: &TaskKey) -> Option<TaskEntry> {
        self.tasks().remove(key)
    }

    /// Untrack a finished task.
    ///
    /// Returns `false` when `id` is no longer the registered task for `key`.
    pub(crate) fn finish(&self, key: &TaskKey, id: u64) -> bool {
        let mut tasks = self.tasks();
        if tasks.get(key).is_some_and(|entry| entry.id == id) {
            tasks.remove(key);
            true
        } else {
            false
        }
    }

    pub(crate) fn contains(&self, key: &TaskKey) -> bool {
        self.tasks().contains_key(key)
    }

    pub(crate) fn keys(&self) -> Vec<TaskKey> {
        let mut keys: Vec<_> = self.tasks().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks().len()
    }

    /// Abort and untrack every task; returns how many there were.
    pub(crate) fn abort_all(&self) -> usize {
        let drained: Vec<_> = self.tasks().drain().collect();
        for (_, entry) in &drained {
            entry.abort();
        }
        drained.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pending_task() -> JoinHandle<()> {
        tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        })
    }

    #[tokio::test]
    async fn test_finish_only_matches_current_id() {
        let registry = TaskRegistry::default();
        let key = TaskKey::field("footballers");

        let first = registry.next_id();
        registry.insert(key.clone(), first, TaskKind::Load, pending_task());

        let second = registry.next_id();
        let replaced = registry.insert(key.clone(), second, TaskKind::Load, pending_task());
        assert_eq!(replaced.map(|entry| entry.id), Some(first));

        assert!(!registry.finish(&key, first));
        assert!(registry.contains(&key));
        assert!(registry.finish(&key, second));
        assert!(!registry.contains(&key));
    }

    #[tokio::test]
    async fn test_abort_all_clears_registry() {
        let registry = TaskRegistry::default();
        let handle = pending_task();
        registry.insert(TaskKey::keyed("details", &2_u32), registry.next_id(), TaskKind::Load, handle);
        registry.insert(TaskKey::field("label"), registry.next_id(), TaskKind::Perform, pending_task());

        assert_eq!(
            registry.keys().iter().map(ToString::to_string).collect::<Vec<_>>(),
            vec!["details[2]", "label"]
        );
        assert_eq!(registry.abort_all(), 2);
        assert_eq!(registry.len(), 0);
    }

    proptest::proptest! {
        #[test]
        fn prop_only_latest_task_per_slot_finishes(slots in proptest::collection::vec(0_u8..4, 1..24)) {
            tokio_test::block_on(async {
                let registry = TaskRegistry::default();
                let mut latest = std::collections::HashMap::new();
                let mut issued = Vec::new();
                for slot in slots {
                    let key = TaskKey::keyed("entries", &slot);
                    let id = registry.next_id();
                    if let Some(replaced) = registry.insert(key.clone(), id, TaskKind::Perform, pending_task()) {
                        replaced.abort();
                    }
                    latest.insert(slot, id);
                    issued.push((key, slot, id));
                }

                for (key, slot, id) in issued {
                    assert_eq!(registry.finish(&key, id), latest[&slot] == id);
                }
                assert_eq!(registry.len(), 0);
            });
        }
    }
}

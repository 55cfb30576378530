//! Metric descriptions for store observability.
//!
//! Stores record through the `metrics` facade; nothing is exported unless the
//! application installs a recorder. Call [`describe_metrics`] once after
//! installing one to attach units and help text.
//!
//! | Name | Kind | Labels |
//! |------|------|--------|
//! | `store.commands.total` | counter | |
//! | `store.effects.executed` | counter | `type` |
//! | `store.reducer.duration_seconds` | histogram | |
//! | `store.tasks.started` | counter | `kind` |
//! | `store.tasks.completed` | counter | |
//! | `store.tasks.cancelled` | counter | |
//! | `store.tasks.stale_result` | counter | |
//! | `store.tasks.panicked` | counter | |
//! | `store.misuse.total` | counter | `kind` |
//! | `store.broadcast.published` | counter | `message` |
//! | `store.broadcast.delivered` | counter | `message` |
//! | `store.shutdown.rejected_actions` | counter | |

use metrics::{Unit, describe_counter, describe_histogram};

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Register descriptions for every metric a store records.
pub fn describe_metrics() {
    describe_counter!("store.commands.total", "Actions reduced by stores");
    describe_counter!(
        "store.effects.executed",
        "Effects executed, labelled by effect type"
    );
    describe_histogram!(
        "store.reducer.duration_seconds",
        Unit::Seconds,
        "Time spent inside reduce"
    );

    describe_counter!("store.tasks.started", "Slot tasks started");
    describe_counter!("store.tasks.completed", "Slot tasks whose result was applied");
    describe_counter!("store.tasks.cancelled", "Slot tasks cancelled or superseded");
    describe_counter!("store.tasks.panicked", "Slot tasks whose work panicked before producing a result");
    describe_counter!(
        "store.tasks.stale_result",
        "Task results discarded because the task was no longer registered"
    );

    describe_counter!("store.misuse.total", "Caller misuse reports, labelled by kind");

    describe_counter!("store.broadcast.published", "Messages published to a hub");
    describe_counter!(
        "store.broadcast.delivered",
        "Hub messages mapped to an action by a receiving store"
    );

    describe_counter!(
        "store.shutdown.rejected_actions",
        "Actions rejected because the store was shutting down"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_without_recorder_is_noop() {
        describe_metrics();
        counter!("store.commands.total").increment(1);
    }
}

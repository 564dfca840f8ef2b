use crate::session::{EntityKey, Outcome, SessionRecord};
use std::cmp::Reverse;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum EntityState {
    Failed(SessionRecord),
    InProgress(SessionRecord),
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Failed,
    InProgress,
    Resolved,
    Ignored,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partitions {
    pub failed: BTreeMap<EntityKey, SessionRecord>,
    pub in_progress: BTreeMap<EntityKey, SessionRecord>,
    pub resolved: u64,
    pub unhandled: u64,
}

/// Per-entity state machine. Records must be applied oldest first; use
/// [`reconcile_records`] when arrival order is unknown.
#[derive(Debug, Default)]
pub struct Reconciler {
    states: BTreeMap<EntityKey, EntityState>,
    unhandled: u64,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, key: &EntityKey) -> Option<&EntityState> {
        self.states.get(key)
    }

    pub fn apply(&mut self, record: SessionRecord) -> Transition {
        match record.outcome {
            Outcome::Failed => {
                self.states
                    .insert(record.key.clone(), EntityState::Failed(record));
                Transition::Failed
            }
            outcome if outcome.is_in_progress() => {
                let record = record.into_in_progress();
                self.states
                    .insert(record.key.clone(), EntityState::InProgress(record));
                Transition::InProgress
            }
            outcome if outcome.is_resolved() => {
                self.states.insert(record.key, EntityState::Resolved);
                Transition::Resolved
            }
            _ => {
                self.unhandled += 1;
                tracing::warn!(
                    entity = %record.key,
                    status_code = record.status_code,
                    start_time = %record.start_time,
                    "unhandled session status; entity state left unchanged"
                );
                Transition::Ignored
            }
        }
    }

    pub fn finish(self) -> Partitions {
        let mut partitions = Partitions {
            unhandled: self.unhandled,
            ..Partitions::default()
        };
        for (key, state) in self.states {
            match state {
                EntityState::Failed(record) => {
                    partitions.failed.insert(key, record);
                }
                EntityState::InProgress(record) => {
                    partitions.in_progress.insert(key, record);
                }
                EntityState::Resolved => partitions.resolved += 1,
            }
        }
        partitions
    }
}

/// Replays every record in chronological order so the newest record decides
/// each entity's state. Equal start times replay in reverse arrival order,
/// leaving the first-seen record in charge as the deduplicator does.
pub fn reconcile_records<I>(records: I) -> Partitions
where
    I: IntoIterator<Item = SessionRecord>,
{
    let mut ordered: Vec<(usize, SessionRecord)> = records.into_iter().enumerate().collect();
    ordered.sort_by_key(|(arrival, record)| (record.start_time, Reverse(*arrival)));

    let mut reconciler = Reconciler::new();
    for (_, record) in ordered {
        reconciler.apply(record);
    }
    reconciler.finish()
}

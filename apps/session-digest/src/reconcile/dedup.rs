use crate::session::{EntityKey, SessionRecord};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// Keeps the newest record per key by start time. On equal start times the
/// first record seen stays.
pub fn latest_wins<I>(records: I) -> BTreeMap<EntityKey, SessionRecord>
where
    I: IntoIterator<Item = SessionRecord>,
{
    let mut latest: BTreeMap<EntityKey, SessionRecord> = BTreeMap::new();
    for record in records {
        match latest.entry(record.key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
            Entry::Occupied(mut slot) => {
                if record.start_time > slot.get().start_time {
                    slot.insert(record);
                }
            }
        }
    }
    latest
}

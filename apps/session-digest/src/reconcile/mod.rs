pub mod dedup;
pub mod state;
pub mod stats;

#[cfg(test)]
mod tests;

use crate::session::raw::RawSessionRecord;
use crate::session::{Category, EntityKey, SessionRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub use dedup::latest_wins;
pub use state::{reconcile_records, Partitions, Reconciler};
pub use stats::{CategoryStats, DigestStats, Health, Percentage, Percentages, StatsAccumulator};

/// job name -> job instance -> object -> record. Only groups holding at
/// least one record exist.
pub type JobGroups = BTreeMap<String, BTreeMap<String, BTreeMap<String, SessionRecord>>>;

pub fn group_by_job<'a, I>(records: I) -> JobGroups
where
    I: IntoIterator<Item = &'a SessionRecord>,
{
    let mut groups = JobGroups::new();
    for record in records {
        groups
            .entry(record.key.job_name.clone())
            .or_default()
            .entry(record.key.job_id.clone().unwrap_or_default())
            .or_default()
            .insert(record.key.object_label().to_string(), record.clone());
    }
    groups
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anomalies {
    pub rejected_records: u64,
    pub unhandled_statuses: u64,
    pub skipped_repositories: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryResult {
    pub category: Category,
    /// Newest session per entity.
    pub latest: BTreeMap<EntityKey, SessionRecord>,
    pub failed: BTreeMap<EntityKey, SessionRecord>,
    pub in_progress: BTreeMap<EntityKey, SessionRecord>,
    pub resolved: u64,
    pub unhandled: u64,
    pub stats: CategoryStats,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationResult {
    pub tape: CategoryResult,
    pub backup: CategoryResult,
    pub anomalies: Anomalies,
}

impl ReconciliationResult {
    pub fn stats(&self, repositories: u64) -> DigestStats {
        DigestStats {
            backup: self.backup.stats,
            tape: self.tape.stats,
            repositories,
        }
    }
}

/// Runs dedup, reconciliation and counting over one category's sessions.
pub fn reconcile_category(category: Category, records: Vec<SessionRecord>) -> CategoryResult {
    let partitions = reconcile_records(records.iter().cloned());
    let stats = CategoryStats::tally(category, &records, partitions.failed.len() as u64);

    let latest = latest_wins(records)
        .into_iter()
        .map(|(key, record)| {
            let record = if record.outcome.is_in_progress() {
                record.into_in_progress()
            } else {
                record
            };
            (key, record)
        })
        .collect();

    tracing::debug!(
        category = %category,
        entities = partitions.failed.len() + partitions.in_progress.len() + partitions.resolved as usize,
        failed = partitions.failed.len(),
        in_progress = partitions.in_progress.len(),
        resolved = partitions.resolved,
        "reconciled category"
    );

    CategoryResult {
        category,
        latest,
        failed: partitions.failed,
        in_progress: partitions.in_progress,
        resolved: partitions.resolved,
        unhandled: partitions.unhandled,
        stats,
    }
}

/// Decodes and validates raw rows, dropping the ones that are malformed or
/// cannot be keyed.
pub fn validate_records(
    category: Category,
    raw: Vec<Value>,
    anomalies: &mut Anomalies,
) -> Vec<SessionRecord> {
    let mut records = Vec::with_capacity(raw.len());
    for row in raw {
        match RawSessionRecord::parse(category, row) {
            Ok(record) => records.push(record),
            Err(err) => {
                anomalies.rejected_records += 1;
                tracing::warn!(error = %err, "rejected session record");
            }
        }
    }
    records
}

pub fn reconcile(tape: Vec<Value>, backup: Vec<Value>) -> ReconciliationResult {
    let mut anomalies = Anomalies::default();
    let tape = validate_records(Category::Tape, tape, &mut anomalies);
    let backup = validate_records(Category::Backup, backup, &mut anomalies);

    let tape = reconcile_category(Category::Tape, tape);
    let backup = reconcile_category(Category::Backup, backup);
    anomalies.unhandled_statuses = tape.unhandled + backup.unhandled;

    ReconciliationResult {
        tape,
        backup,
        anomalies,
    }
}

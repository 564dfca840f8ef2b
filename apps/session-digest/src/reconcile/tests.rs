use super::*;
use crate::session::{Outcome, SessionRecord};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
}

fn backup(object: &str, hour: u32, status: i32) -> SessionRecord {
    SessionRecord::new(
        EntityKey::backup("J1", "1", object),
        Category::Backup,
        at(hour),
        status,
    )
    .with_end_time(at(hour) + chrono::Duration::minutes(30))
    .with_reason(format!("status {status}"))
}

fn key(object: &str) -> EntityKey {
    EntityKey::backup("J1", "1", object)
}

#[test]
fn later_success_retracts_earlier_failure() {
    let result = reconcile_category(
        Category::Backup,
        vec![backup("VM1", 9, 2), backup("VM1", 10, 0)],
    );
    assert!(!result.failed.contains_key(&key("VM1")));
    assert!(result.in_progress.is_empty());
    assert_eq!(result.resolved, 1);
    assert_eq!(result.stats.success, 1);
    assert_eq!(result.stats.failed, 0);
    assert_eq!(result.stats.sessions, 2);
}

#[test]
fn later_failure_overrides_earlier_success() {
    let result = reconcile_category(
        Category::Backup,
        vec![backup("VM1", 9, 0), backup("VM1", 10, 2)],
    );
    let failed = result.failed.get(&key("VM1")).expect("entity failed");
    assert_eq!(failed.start_time, at(10));
    assert_eq!(result.resolved, 0);
    assert_eq!(result.stats.failed, 1);
}

#[test]
fn arrival_order_does_not_change_the_outcome() {
    let chronological = reconcile_category(
        Category::Backup,
        vec![backup("VM1", 9, 2), backup("VM1", 10, 0)],
    );
    let reversed = reconcile_category(
        Category::Backup,
        vec![backup("VM1", 10, 0), backup("VM1", 9, 2)],
    );
    assert_eq!(chronological.failed, reversed.failed);
    assert_eq!(chronological.in_progress, reversed.in_progress);
    assert_eq!(chronological.resolved, reversed.resolved);
    assert_eq!(chronological.stats, reversed.stats);
}

#[test]
fn every_permutation_converges_to_latest_record() {
    let records = vec![
        backup("VM1", 8, 0),
        backup("VM1", 9, 2),
        backup("VM1", 10, 5),
        backup("VM1", 11, 2),
    ];
    let expected = reconcile_records(records.clone());
    assert_eq!(
        expected.failed.get(&key("VM1")).map(|r| r.start_time),
        Some(at(11))
    );

    let mut indices: Vec<usize> = (0..records.len()).collect();
    let mut permutations = 0;
    loop {
        let shuffled: Vec<SessionRecord> = indices.iter().map(|i| records[*i].clone()).collect();
        assert_eq!(reconcile_records(shuffled), expected);
        permutations += 1;
        if !next_permutation(&mut indices) {
            break;
        }
    }
    assert_eq!(permutations, 24);
}

fn next_permutation(values: &mut [usize]) -> bool {
    let Some(pivot) = (1..values.len()).rev().find(|&i| values[i - 1] < values[i]) else {
        return false;
    };
    let swap = (pivot..values.len())
        .rev()
        .find(|&i| values[i] > values[pivot - 1])
        .unwrap_or(pivot);
    values.swap(pivot - 1, swap);
    values[pivot..].reverse();
    true
}

#[test]
fn running_session_lands_in_progress_without_end_time() {
    let result = reconcile_category(Category::Backup, vec![backup("VM2", 9, 5)]);
    let record = result.in_progress.get(&key("VM2")).expect("in progress");
    assert_eq!(record.end_time, None);
    assert_eq!(record.details.reason, None);
    assert_eq!(result.stats.in_progress, 1);
    assert!(result.failed.is_empty());
}

#[test]
fn in_progress_retracts_failure_and_failure_retracts_in_progress() {
    let result = reconcile_category(
        Category::Backup,
        vec![
            backup("VM1", 8, 2),
            backup("VM1", 9, 6),
            backup("VM2", 8, -1),
            backup("VM2", 9, 2),
        ],
    );
    assert!(result.in_progress.contains_key(&key("VM1")));
    assert!(!result.failed.contains_key(&key("VM1")));
    assert!(result.failed.contains_key(&key("VM2")));
    assert!(!result.in_progress.contains_key(&key("VM2")));
}

#[test]
fn success_retracts_in_progress_entry() {
    let result = reconcile_category(
        Category::Backup,
        vec![backup("VM1", 8, 5), backup("VM1", 9, 1)],
    );
    assert!(result.in_progress.is_empty());
    assert_eq!(result.resolved, 1);
}

#[test]
fn failed_and_in_progress_partitions_never_share_keys() {
    let statuses = [-1, 0, 1, 2, 3, 5, 6, 9];
    let mut records = Vec::new();
    for (i, first) in statuses.iter().enumerate() {
        for (j, second) in statuses.iter().enumerate() {
            let object = format!("VM-{i}-{j}");
            records.push(backup(&object, 9, *first));
            records.push(backup(&object, 10, *second));
        }
    }
    let result = reconcile_category(Category::Backup, records);
    for key in result.failed.keys() {
        assert!(!result.in_progress.contains_key(key), "{key} in both partitions");
    }
}

#[test]
fn unhandled_status_leaves_state_untouched() {
    let result = reconcile_category(
        Category::Backup,
        vec![backup("VM1", 9, 2), backup("VM1", 10, 42)],
    );
    assert!(result.failed.contains_key(&key("VM1")));
    assert_eq!(result.unhandled, 1);
    assert_eq!(result.stats.undefined, 1);
    assert_eq!(result.resolved, 0);

    let only_unknown = reconcile_category(Category::Backup, vec![backup("VM3", 9, 4)]);
    assert!(only_unknown.failed.is_empty());
    assert!(only_unknown.in_progress.is_empty());
    assert_eq!(only_unknown.resolved, 0);
}

#[test]
fn fully_resolved_job_has_no_groups() {
    let result = reconcile_category(
        Category::Backup,
        vec![
            backup("VM1", 8, 2),
            backup("VM2", 8, 5),
            backup("VM1", 9, 0),
            backup("VM2", 9, 3),
        ],
    );
    assert!(group_by_job(result.failed.values()).is_empty());
    assert!(group_by_job(result.in_progress.values()).is_empty());
}

#[test]
fn groups_nest_job_instance_and_object() {
    let mut records = vec![backup("VM1", 9, 2), backup("VM2", 9, 2)];
    records.push(SessionRecord::new(
        EntityKey::backup("J2", "7", "DB01"),
        Category::Backup,
        at(9),
        2,
    ));
    let result = reconcile_category(Category::Backup, records);
    let groups = group_by_job(result.failed.values());
    assert_eq!(groups.len(), 2);
    assert_eq!(groups["J1"]["1"].len(), 2);
    assert!(groups["J2"]["7"].contains_key("DB01"));
}

#[test]
fn totals_balance_for_mixed_input() {
    let mut records = Vec::new();
    for (i, status) in [-1, 0, 1, 2, 3, 5, 6, 7, 2, 0].iter().enumerate() {
        records.push(backup(&format!("VM{}", i % 4), i as u32, *status));
    }
    let stats = reconcile_category(Category::Backup, records).stats;
    assert_eq!(stats.total, stats.success + stats.warning + stats.failed + stats.in_progress);
    assert_eq!(stats.sessions, 10);
}

#[test]
fn empty_category_produces_zeroes() {
    let result = reconcile_category(Category::Backup, Vec::new());
    assert_eq!(result.stats.total, 0);
    assert!(result.failed.is_empty());
    assert!(result.in_progress.is_empty());
    assert!(result.latest.is_empty());
    let percentages = result.stats.percentages();
    for value in [
        percentages.success,
        percentages.warning,
        percentages.failed,
        percentages.in_progress,
    ] {
        assert_eq!(value, Percentage::Whole(0));
    }
}

#[test]
fn tape_jobs_dedupe_per_job_and_clear_running_end_times() {
    let tape = |hour: u32, status: i32| {
        SessionRecord::new(EntityKey::tape("Tape weekly"), Category::Tape, at(hour), status)
            .with_end_time(at(hour + 1))
    };
    let result = reconcile_category(Category::Tape, vec![tape(1, 0), tape(3, -1), tape(2, 2)]);
    assert_eq!(result.latest.len(), 1);
    let latest = &result.latest[&EntityKey::tape("Tape weekly")];
    assert_eq!(latest.outcome, Outcome::Idle);
    assert_eq!(latest.end_time, None);
    assert_eq!(result.stats.in_progress, 1);
    assert!(result.failed.is_empty());
}

#[test]
fn raw_rows_are_validated_before_reconciling() {
    let row = |object: &str, status: serde_json::Value| {
        json!({
            "job_name": "J1",
            "job_id": "1",
            "object_name": object,
            "creation_time": "2024-03-01 09:00:00",
            "status": status,
        })
    };
    let mut missing_start = row("vm3", json!(0));
    missing_start
        .as_object_mut()
        .expect("row is an object")
        .remove("creation_time");

    let result = reconcile(
        Vec::new(),
        vec![
            row("vm1", json!(2)),
            missing_start,
            row("vm2", json!(11)),
            row("vm4", json!("failed")),
            row("vm5", json!(5)),
        ],
    );
    assert_eq!(result.anomalies.rejected_records, 2);
    assert_eq!(result.anomalies.unhandled_statuses, 1);
    assert!(result.backup.failed.contains_key(&key("VM1")));
    assert!(result.backup.in_progress.contains_key(&key("VM5")));
    assert_eq!(result.backup.stats.sessions, 3);
    assert_eq!(result.tape.stats, CategoryStats::default());
}

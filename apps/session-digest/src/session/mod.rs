mod classify;
pub mod log_scan;
pub mod raw;

pub use classify::{classify, JobType};

use crate::time::utc_seconds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Tape,
    Backup,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tape => "tape",
            Self::Backup => "backup",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic reading of a raw session status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Idle,
    Success,
    Warning,
    Failed,
    Running,
    Pending,
    Unhandled,
}

impl Outcome {
    pub const ALL: [Outcome; 7] = [
        Outcome::Idle,
        Outcome::Success,
        Outcome::Warning,
        Outcome::Failed,
        Outcome::Running,
        Outcome::Pending,
        Outcome::Unhandled,
    ];

    pub fn from_status_code(code: i32) -> Self {
        match code {
            -1 => Self::Idle,
            0 => Self::Success,
            1 | 3 => Self::Warning,
            2 => Self::Failed,
            5 => Self::Running,
            6 => Self::Pending,
            _ => Self::Unhandled,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Success => "Success",
            Self::Warning => "Warning",
            Self::Failed => "Failed",
            Self::Running => "Running",
            Self::Pending => "Pending",
            Self::Unhandled => "Unhandled",
        }
    }

    pub fn is_in_progress(self) -> bool {
        matches!(self, Self::Idle | Self::Running | Self::Pending)
    }

    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Success | Self::Warning)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a tracked entity. Tape jobs are tracked as a whole, so their
/// keys carry neither a job instance nor an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub job_name: String,
    pub job_id: Option<String>,
    pub object_name: Option<String>,
}

impl EntityKey {
    pub fn tape(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            job_id: None,
            object_name: None,
        }
    }

    pub fn backup(
        job_name: impl Into<String>,
        job_id: impl Into<String>,
        object_name: impl Into<String>,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            job_id: Some(job_id.into()),
            object_name: Some(object_name.into()),
        }
    }

    pub fn object_label(&self) -> &str {
        self.object_name.as_deref().unwrap_or(&self.job_name)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.job_name)?;
        if let Some(job_id) = &self.job_id {
            write!(f, "/{job_id}")?;
        }
        if let Some(object_name) = &self.object_name {
            write!(f, "/{object_name}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub retain_days: Option<i32>,
    pub retain_cycles: Option<i32>,
    pub maintenance_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    Hotadd,
    Nbd,
    San,
}

impl TransportMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hotadd => "hotadd",
            Self::Nbd => "nbd",
            Self::San => "san",
        }
    }
}

/// Descriptive payload carried through reconciliation untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<JobType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mediapool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orig_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_mode: Option<TransportMode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub datastores: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub proxies: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub guest_proxies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_storage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_points: Option<i64>,
}

/// One execution attempt of a job against an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub key: EntityKey,
    pub category: Category,
    #[serde(with = "utc_seconds")]
    pub start_time: DateTime<Utc>,
    #[serde(default, with = "utc_seconds::option")]
    pub end_time: Option<DateTime<Utc>>,
    pub status_code: i32,
    pub outcome: Outcome,
    #[serde(default, with = "utc_seconds::option")]
    pub last_point_of_success: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retention: Option<RetentionPolicy>,
    #[serde(default)]
    pub details: SessionDetails,
}

impl SessionRecord {
    /// Builds a record with its outcome derived from `status_code`.
    pub fn new(
        key: EntityKey,
        category: Category,
        start_time: DateTime<Utc>,
        status_code: i32,
    ) -> Self {
        Self {
            key,
            category,
            start_time,
            end_time: None,
            status_code,
            outcome: classify(status_code),
            last_point_of_success: None,
            retention: None,
            details: SessionDetails::default(),
        }
    }

    pub fn with_end_time(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.details.reason = Some(reason.into());
        self
    }

    /// Unfinished work has no meaningful end time or failure reason.
    pub fn into_in_progress(mut self) -> Self {
        self.end_time = None;
        self.details.reason = None;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tape_keys_ignore_job_instance_and_object() {
        let key = EntityKey::tape("Weekly tape");
        assert_eq!(key.job_id, None);
        assert_eq!(key.object_name, None);
        assert_eq!(key.to_string(), "Weekly tape");
        assert_eq!(key.object_label(), "Weekly tape");
    }

    #[test]
    fn backup_keys_order_by_job_then_instance_then_object() {
        let a = EntityKey::backup("J1", "1", "VM1");
        let b = EntityKey::backup("J1", "1", "VM2");
        let c = EntityKey::backup("J1", "2", "VM0");
        assert!(a < b);
        assert!(b < c);
        assert_eq!(c.to_string(), "J1/2/VM0");
    }

    #[test]
    fn in_progress_drops_end_time_and_reason() {
        let start = Utc::now();
        let record = SessionRecord::new(EntityKey::backup("J1", "1", "VM1"), Category::Backup, start, 5)
            .with_end_time(start)
            .with_reason("still running")
            .into_in_progress();
        assert_eq!(record.end_time, None);
        assert_eq!(record.details.reason, None);
        assert_eq!(record.outcome, Outcome::Running);
    }
}

use super::log_scan::{parse_job_options, scan_session_log};
use super::{classify, Category, EntityKey, JobType, SessionDetails, SessionRecord};
use crate::error::RecordError;
use crate::time::RawTimestamp;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

/// Rows handed over by the extraction side for one backup server. Rows are
/// decoded one at a time during validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionExport {
    #[serde(default)]
    pub server_name: Option<String>,
    #[serde(default)]
    pub tape: Vec<Value>,
    #[serde(default)]
    pub backup: Vec<Value>,
    #[serde(default)]
    pub repositories: Vec<Value>,
}

impl SessionExport {
    pub fn from_slice(bytes: &mut [u8]) -> Result<Self, simd_json::Error> {
        simd_json::serde::from_slice(bytes)
    }
}

/// Identifiers show up as GUID strings or integers depending on the source.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Str(String),
    Int(i64),
}

impl fmt::Display for RawId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawId::Str(value) => f.write_str(value.trim()),
            RawId::Int(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSessionRecord {
    #[serde(default)]
    pub job_name: Option<String>,
    #[serde(default)]
    pub job_id: Option<RawId>,
    #[serde(default)]
    pub object_name: Option<String>,
    #[serde(default, alias = "start_time")]
    pub creation_time: Option<RawTimestamp>,
    #[serde(default)]
    pub end_time: Option<RawTimestamp>,
    #[serde(default, alias = "result")]
    pub status: Option<i32>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub mediapool_name: Option<String>,
    #[serde(default)]
    pub session_id: Option<RawId>,
    #[serde(default)]
    pub orig_session_id: Option<RawId>,
    #[serde(default)]
    pub last_point_success: Option<RawTimestamp>,
    #[serde(default)]
    pub object_id: Option<RawId>,
    #[serde(default)]
    pub job_type: Option<i32>,
    #[serde(default)]
    pub repository_name: Option<String>,
    #[serde(default)]
    pub nb_restore_points: Option<i64>,
    #[serde(default)]
    pub log_xml: Option<String>,
    #[serde(default)]
    pub options: Option<String>,
}

impl RawSessionRecord {
    pub fn from_value(category: Category, value: Value) -> Result<Self, RecordError> {
        let job_name = value
            .get("job_name")
            .and_then(Value::as_str)
            .map(str::to_string);
        serde_json::from_value(value).map_err(|err| RecordError::Malformed {
            category,
            job_name,
            message: err.to_string(),
        })
    }

    /// Decodes and validates one export row.
    pub fn parse(category: Category, value: Value) -> Result<SessionRecord, RecordError> {
        Self::from_value(category, value)?.into_record(category)
    }

    /// Validates the identifying fields and derives the outcome.
    pub fn into_record(self, category: Category) -> Result<SessionRecord, RecordError> {
        let job_name = non_empty(self.job_name.as_deref())
            .ok_or(RecordError::MissingJobName { category })?;

        let missing = |field: &'static str| RecordError::MissingField {
            category,
            job_name: job_name.clone(),
            field,
        };

        let start_time = match &self.creation_time {
            None => return Err(missing("creation_time")),
            Some(raw) => raw.to_datetime().ok_or_else(|| RecordError::InvalidTimestamp {
                category,
                job_name: job_name.clone(),
                field: "creation_time",
                value: format!("{raw:?}"),
            })?,
        };
        let status_code = self.status.ok_or_else(|| missing("status"))?;
        let job_id = self.job_id.as_ref().map(|id| id.to_string()).filter(|id| !id.is_empty());

        let key = match category {
            Category::Tape => EntityKey::tape(job_name.clone()),
            Category::Backup => {
                let job_id = job_id.clone().ok_or_else(|| missing("job_id"))?;
                let object_name = non_empty(self.object_name.as_deref())
                    .ok_or_else(|| missing("object_name"))?
                    .to_uppercase();
                EntityKey::backup(job_name.clone(), job_id, object_name)
            }
        };

        let log = self.log_xml.as_deref().map(scan_session_log).unwrap_or_default();
        let retention = self.options.as_deref().map(parse_job_options);

        Ok(SessionRecord {
            key,
            category,
            start_time,
            end_time: optional_instant(&job_name, "end_time", self.end_time.as_ref()),
            status_code,
            outcome: classify(status_code),
            last_point_of_success: optional_instant(
                &job_name,
                "last_point_success",
                self.last_point_success.as_ref(),
            ),
            retention,
            details: SessionDetails {
                job_id,
                job_type: self.job_type.map(JobType::from_code),
                reason: self.reason,
                mediapool_name: self.mediapool_name,
                session_id: self.session_id.map(|id| id.to_string()),
                orig_session_id: self.orig_session_id.map(|id| id.to_string()),
                object_id: self.object_id.map(|id| id.to_string()),
                transport_mode: log.transport_mode,
                datastores: log.datastores,
                proxies: log.proxies,
                guest_proxies: log.guest_proxies,
                target_storage: self.repository_name,
                restore_points: self.nb_restore_points,
            },
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn optional_instant(
    job_name: &str,
    field: &'static str,
    raw: Option<&RawTimestamp>,
) -> Option<DateTime<Utc>> {
    let raw = raw?;
    let parsed = raw.to_datetime();
    if parsed.is_none() {
        tracing::warn!(job = %job_name, field, value = ?raw, "dropping unparseable optional timestamp");
    }
    parsed
}

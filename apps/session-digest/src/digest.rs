use crate::error::DigestError;
use crate::reconcile::{
    group_by_job, reconcile, Anomalies, DigestStats, Health, JobGroups, Percentages,
    StatsAccumulator,
};
use crate::repository::{group_repository_rows, RepositoryGroup};
use crate::session::raw::SessionExport;
use crate::session::SessionRecord;
use crate::time::utc_seconds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Reconciled state of one backup server, written by `reconcile` and read
/// back by `process`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDigest {
    pub run_id: Uuid,
    pub server_name: String,
    #[serde(with = "utc_seconds")]
    pub generated_at: DateTime<Utc>,
    pub stats: DigestStats,
    #[serde(default)]
    pub anomalies: Anomalies,
    /// Newest session of every tape job.
    #[serde(default)]
    pub tape: Vec<SessionRecord>,
    #[serde(default)]
    pub in_progress: JobGroups,
    #[serde(default)]
    pub failed: JobGroups,
    #[serde(default)]
    pub repositories: BTreeMap<String, RepositoryGroup>,
}

impl ServerDigest {
    pub fn build(export: SessionExport, fallback_server: &str, generated_at: DateTime<Utc>) -> Self {
        let server_name = export
            .server_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(fallback_server)
            .to_string();

        let result = reconcile(export.tape, export.backup);
        let inventory = group_repository_rows(export.repositories, &server_name);

        let mut anomalies = result.anomalies.clone();
        anomalies.skipped_repositories = inventory.skipped;
        let stats = result.stats(inventory.repositories);

        tracing::info!(
            server = %server_name,
            backup_sessions = stats.backup.sessions,
            tape_sessions = stats.tape.sessions,
            failed = result.backup.failed.len(),
            in_progress = result.backup.in_progress.len(),
            repositories = inventory.repositories,
            rejected = anomalies.rejected_records,
            unhandled = anomalies.unhandled_statuses,
            "server digest built"
        );

        Self {
            run_id: Uuid::new_v4(),
            server_name,
            generated_at,
            stats,
            anomalies,
            tape: result.tape.latest.into_values().collect(),
            in_progress: group_by_job(result.backup.in_progress.values()),
            failed: group_by_job(result.backup.failed.values()),
            repositories: inventory.groups,
        }
    }

    pub async fn write(&self, path: &Path) -> Result<(), DigestError> {
        let body = serde_json::to_vec_pretty(self).map_err(|err| DigestError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| DigestError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(path, body)
            .await
            .map_err(|source| DigestError::Write {
                path: path.to_path_buf(),
                source,
            })
    }

    pub async fn load(path: &Path) -> Result<Self, DigestError> {
        let bytes = read(path).await?;
        serde_json::from_slice(&bytes).map_err(|err| DigestError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }
}

pub async fn load_export(path: &Path) -> Result<SessionExport, DigestError> {
    let mut bytes = read(path).await?;
    SessionExport::from_slice(&mut bytes).map_err(|err| DigestError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

async fn read(path: &Path) -> Result<Vec<u8>, DigestError> {
    tokio::fs::read(path).await.map_err(|source| DigestError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Every `*.json` file below `root`, in path order.
pub async fn find_artifacts(root: &Path) -> Result<Vec<PathBuf>, DigestError> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let read_err = |source| DigestError::Read {
            path: dir.clone(),
            source,
        };
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(read_err)?;
        while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
            let path = entry.path();
            let file_type = entry.file_type().await.map_err(read_err)?;
            if file_type.is_dir() {
                pending.push(path);
            } else if path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
            {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Loads the digests under `root`. Unreadable artifacts are logged and
/// skipped; finding none at all is an error.
pub async fn load_artifacts(root: &Path) -> Result<Vec<ServerDigest>, DigestError> {
    let mut digests = Vec::new();
    for path in find_artifacts(root).await? {
        match ServerDigest::load(&path).await {
            Ok(digest) => digests.push(digest),
            Err(err) => tracing::warn!(error = %err, "skipping digest artifact"),
        }
    }
    if digests.is_empty() {
        tracing::error!(root = %root.display(), "no digest artifacts found");
        return Err(DigestError::NoArtifacts(root.to_path_buf()));
    }
    Ok(digests)
}

/// All servers of a run folded together for the sinks.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedDigest {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub stats: DigestStats,
    pub backup_percentages: Percentages,
    pub tape_percentages: Percentages,
    pub health: Health,
    pub anomalies: Anomalies,
    pub servers: Vec<ServerDigest>,
}

impl MergedDigest {
    pub fn merge(mut servers: Vec<ServerDigest>, generated_at: DateTime<Utc>) -> Self {
        servers.sort_by(|a, b| a.server_name.cmp(&b.server_name));

        let accumulator = servers
            .iter()
            .fold(StatsAccumulator::new(), |acc, server| acc.add(&server.stats));
        let anomalies = servers.iter().fold(Anomalies::default(), |mut acc, server| {
            acc.rejected_records += server.anomalies.rejected_records;
            acc.unhandled_statuses += server.anomalies.unhandled_statuses;
            acc.skipped_repositories += server.anomalies.skipped_repositories;
            acc
        });
        let server_count = accumulator.servers();
        let stats = accumulator.finish();

        tracing::info!(
            servers = server_count,
            sessions = stats.backup.sessions,
            total = stats.backup.total,
            failed = stats.backup.failed,
            in_progress = stats.backup.in_progress,
            "merged server digests"
        );

        Self {
            run_id: Uuid::new_v4(),
            generated_at,
            backup_percentages: stats.backup.percentages(),
            tape_percentages: stats.tape.percentages(),
            health: stats.backup.health(),
            stats,
            anomalies,
            servers,
        }
    }
}

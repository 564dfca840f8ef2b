use crate::config::Config;
use crate::digest::MergedDigest;
use crate::error::DigestError;
use crate::reconcile::CategoryStats;
use crate::repository::{Capacity, RepositoryGroup};
use reqwest::Client;
use std::time::Duration;

/// InfluxDB line-protocol writer.
#[derive(Clone)]
pub struct MetricsSink {
    client: Client,
    url: String,
    database: String,
    token: Option<String>,
    job_name: String,
}

impl MetricsSink {
    pub fn new(client: Client, config: &Config) -> Option<Self> {
        if !config.metrics_enabled() {
            return None;
        }
        let url = config.metrics_url.clone()?;
        Some(Self {
            client,
            url,
            database: config.metrics_db.clone(),
            token: config.metrics_token.clone(),
            job_name: config.job_name.clone(),
        })
    }

    pub fn write_url(&self) -> String {
        format!("{}/write", self.url.trim_end_matches('/'))
    }

    pub async fn send(&self, digest: &MergedDigest, execution_time: Duration) -> Result<usize, DigestError> {
        let lines = encode(digest, &self.job_name, execution_time);
        let count = lines.len();

        let mut request = self
            .client
            .post(self.write_url())
            .query(&[("db", self.database.as_str()), ("precision", "ms")])
            .body(lines.join("\n"));
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Token {token}"));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DigestError::Rejected {
                sink: "metrics",
                message: format!("{status}: {}", body.trim()),
            });
        }
        tracing::info!(lines = count, database = %self.database, "sent digest metrics");
        Ok(count)
    }
}

pub fn encode(digest: &MergedDigest, job_name: &str, execution_time: Duration) -> Vec<String> {
    let timestamp = digest.generated_at.timestamp_millis();
    let job = tag(job_name);
    let mut lines = vec![format!(
        "execution_time,job={job},type=process value={} {timestamp}",
        execution_time.as_secs_f64()
    )];
    lines.push(stats_line("backup", &job, &digest.stats.backup, timestamp));
    lines.push(stats_line("tape", &job, &digest.stats.tape, timestamp));

    for server in &digest.servers {
        let server_tag = tag(&server.server_name);
        for group in server.repositories.values() {
            match group {
                RepositoryGroup::Standalone { repository } => lines.push(capacity_line(
                    "repository",
                    &job,
                    &server_tag,
                    &repository.name,
                    repository.capacity,
                    timestamp,
                )),
                RepositoryGroup::ScaleOut { name, extents } => {
                    lines.push(capacity_line(
                        "scale_out",
                        &job,
                        &server_tag,
                        name,
                        group.capacity(),
                        timestamp,
                    ));
                    for extent in extents.values() {
                        lines.push(capacity_line(
                            "repository",
                            &job,
                            &server_tag,
                            &extent.name,
                            extent.capacity,
                            timestamp,
                        ));
                    }
                }
            }
        }
    }
    lines
}

fn stats_line(measurement: &str, job: &str, stats: &CategoryStats, timestamp: i64) -> String {
    format!(
        "{measurement},job={job},type=process success={}i,warning={}i,failed={}i,running={}i,pending={}i,undefined={}i,sessions={}i {timestamp}",
        stats.success, stats.warning, stats.failed, stats.running, stats.pending, stats.undefined, stats.sessions,
    )
}

fn capacity_line(
    measurement: &str,
    job: &str,
    server: &str,
    name: &str,
    capacity: Capacity,
    timestamp: i64,
) -> String {
    format!(
        "{measurement},job={job},server={server},name={} free={}i,used={}i,total={}i,free_percent={}i {timestamp}",
        tag(name),
        capacity.free,
        capacity.used,
        capacity.total,
        capacity.free_percent(),
    )
}

/// Tag values may not carry spaces, commas or equals signs.
fn tag(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|ch| match ch {
            ' ' => '-',
            ',' | '=' => '_',
            other => other,
        })
        .collect()
}

pub mod mail;
pub mod metrics;
pub mod report;
pub mod storage;

use crate::config::Config;
use crate::digest::MergedDigest;
use crate::error::DigestError;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkStatus {
    Delivered(String),
    Skipped(&'static str),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkOutcome {
    pub sink: &'static str,
    pub status: SinkStatus,
}

/// What happened to each sink during one `process` run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkReport {
    pub outcomes: Vec<SinkOutcome>,
    pub subject: Option<String>,
}

impl SinkReport {
    fn push(&mut self, sink: &'static str, status: SinkStatus) {
        match &status {
            SinkStatus::Delivered(detail) => tracing::info!(sink, detail = %detail, "sink delivered"),
            SinkStatus::Skipped(reason) => tracing::info!(sink, reason, "sink skipped"),
            SinkStatus::Failed(error) => tracing::error!(sink, error = %error, "sink failed"),
        }
        self.outcomes.push(SinkOutcome { sink, status });
    }

    pub fn status(&self, sink: &str) -> Option<&SinkStatus> {
        self.outcomes
            .iter()
            .find(|outcome| outcome.sink == sink)
            .map(|outcome| &outcome.status)
    }

    pub fn failures(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.status, SinkStatus::Failed(_)))
            .count()
    }
}

/// Hands the merged digest to every configured sink. A failing sink never
/// stops the ones after it.
pub async fn run_sinks(
    digest: &MergedDigest,
    config: &Config,
    client: &Client,
    execution_time: Duration,
    now: DateTime<Utc>,
) -> SinkReport {
    let mut summary = SinkReport::default();

    match report::render(digest, config.comment.as_deref(), now) {
        Ok(rendered) => {
            match report::write(&config.report_path, &rendered).await {
                Ok(()) => summary.push(
                    "report",
                    SinkStatus::Delivered(config.report_path.display().to_string()),
                ),
                Err(err) => summary.push("report", SinkStatus::Failed(err.to_string())),
            }
            let status = send_mail(config, &rendered).await;
            summary.push("mail", status);
            summary.subject = Some(rendered.subject);
        }
        Err(err) => {
            summary.push("report", SinkStatus::Failed(err.to_string()));
            summary.push("mail", SinkStatus::Skipped("no report to send"));
        }
    }

    match metrics::MetricsSink::new(client.clone(), config) {
        Some(sink) => match sink.send(digest, execution_time).await {
            Ok(lines) => summary.push("metrics", SinkStatus::Delivered(format!("{lines} lines"))),
            Err(err) => summary.push("metrics", SinkStatus::Failed(err.to_string())),
        },
        None => summary.push("metrics", SinkStatus::Skipped("metrics disabled or no url configured")),
    }

    match database_url(config, client).await {
        Ok(Some(url)) => match store(digest, config, &url).await {
            Ok(rows) if rows.failed == 0 => summary.push(
                "storage",
                SinkStatus::Delivered(format!("{} rows", rows.inserted)),
            ),
            Ok(rows) => summary.push(
                "storage",
                SinkStatus::Failed(format!(
                    "{} rows inserted, {} rows failed",
                    rows.inserted, rows.failed
                )),
            ),
            Err(err) => summary.push("storage", SinkStatus::Failed(err.to_string())),
        },
        Ok(None) => summary.push("storage", SinkStatus::Skipped("no database configured")),
        Err(err) => summary.push("storage", SinkStatus::Failed(err.to_string())),
    }

    summary
}

async fn send_mail(config: &Config, rendered: &report::Report) -> SinkStatus {
    let Some(mail) = config.mail.clone().filter(|_| config.mail_enabled()) else {
        return SinkStatus::Skipped("mail disabled or no smtp host configured");
    };
    match mail::MailSink::new(mail, config.http_timeout()).send(rendered).await {
        Ok(recipients) => SinkStatus::Delivered(format!("{recipients} recipients")),
        Err(err) => SinkStatus::Failed(err.to_string()),
    }
}

/// Vault credentials take precedence over the configured URL.
async fn database_url(config: &Config, client: &Client) -> Result<Option<String>, DigestError> {
    match &config.vault {
        Some(vault) => crate::vault::fetch_database_url(client, vault).await.map(Some),
        None => Ok(config.database_url.clone()),
    }
}

async fn store(
    digest: &MergedDigest,
    config: &Config,
    database_url: &str,
) -> Result<storage::StorageSummary, DigestError> {
    let pool = storage::build_pool(database_url, config.db_pool_size).await?;
    storage::ensure_schema(&pool).await?;
    let stored = storage::store(
        &pool,
        digest,
        config.pipeline_id.as_deref(),
        config.comment.as_deref(),
    )
    .await;
    pool.close().await;
    stored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MailConfig, SmtpSecurity};
    use crate::digest::ServerDigest;
    use crate::session::raw::SessionExport;
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn config(report_path: PathBuf, metrics_url: Option<String>) -> Config {
        Config {
            database_url: None,
            db_pool_size: 1,
            metrics_url,
            metrics_db: "morning_check_backup".to_string(),
            metrics_token: None,
            disable_metrics: false,
            artifacts_dir: PathBuf::from("artifacts"),
            report_path,
            server_name: None,
            job_name: "session-digest".to_string(),
            pipeline_id: None,
            comment: None,
            http_timeout_secs: 2,
            vault: None,
            mail: None,
            disable_mail: false,
            otlp_endpoint: None,
        }
    }

    fn digest() -> MergedDigest {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut bytes = br#"{"server_name": "vbr-01", "backup": [
            {"job_name": "Daily", "job_id": 1, "object_name": "vm1", "creation_time": "2024-03-01 09:00:00", "status": 0}
        ]}"#
        .to_vec();
        let export = SessionExport::from_slice(&mut bytes).expect("export parses");
        MergedDigest::merge(vec![ServerDigest::build(export, "fallback", now)], now)
    }

    fn client() -> Client {
        Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .expect("client")
    }

    #[tokio::test]
    async fn unconfigured_sinks_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("output.html");
        let config = config(path.clone(), None);
        let report = run_sinks(&digest(), &config, &client(), Duration::from_secs(1), Utc::now()).await;

        assert_eq!(
            report.status("report"),
            Some(&SinkStatus::Delivered(path.display().to_string()))
        );
        assert!(matches!(report.status("mail"), Some(SinkStatus::Skipped(_))));
        assert!(matches!(report.status("metrics"), Some(SinkStatus::Skipped(_))));
        assert!(matches!(report.status("storage"), Some(SinkStatus::Skipped(_))));
        assert_eq!(report.failures(), 0);
        assert!(report
            .subject
            .as_deref()
            .is_some_and(|subject| subject.starts_with("Morning check backup - T:1")));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn failing_sink_does_not_stop_the_rest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        tokio::fs::write(&blocker, b"file").await.expect("blocker");
        let config = config(
            blocker.join("output.html"),
            Some("http://127.0.0.1:9".to_string()),
        );

        let report = run_sinks(&digest(), &config, &client(), Duration::from_secs(1), Utc::now()).await;

        assert!(matches!(report.status("report"), Some(SinkStatus::Failed(_))));
        assert!(matches!(report.status("metrics"), Some(SinkStatus::Failed(_))));
        assert!(matches!(report.status("storage"), Some(SinkStatus::Skipped(_))));
        assert_eq!(report.failures(), 2);
        assert!(report.subject.is_some());
    }

    #[tokio::test]
    async fn unreachable_mail_relay_leaves_other_sinks_running() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("output.html");
        let mut config = config(path.clone(), Some("http://127.0.0.1:9".to_string()));
        config.mail = Some(MailConfig {
            host: "127.0.0.1".to_string(),
            port: 9,
            security: SmtpSecurity::None,
            from: "digest@example.com".to_string(),
            to: vec!["ops@example.com".to_string()],
            username: None,
            password: None,
        });

        let report = run_sinks(&digest(), &config, &client(), Duration::from_secs(1), Utc::now()).await;

        assert!(matches!(report.status("mail"), Some(SinkStatus::Failed(_))));
        assert_eq!(
            report.status("report"),
            Some(&SinkStatus::Delivered(path.display().to_string()))
        );
        assert!(matches!(report.status("metrics"), Some(SinkStatus::Failed(_))));
        assert!(matches!(report.status("storage"), Some(SinkStatus::Skipped(_))));
        assert_eq!(report.outcomes.len(), 4);
        assert!(path.exists());

        config.disable_mail = true;
        let report = run_sinks(&digest(), &config, &client(), Duration::from_secs(1), Utc::now()).await;
        assert!(matches!(report.status("mail"), Some(SinkStatus::Skipped(_))));
    }
}

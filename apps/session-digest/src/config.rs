use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_SETUP_CONFIG_PATH: &str = "/etc/session-digest/config.json";
const DEFAULT_ARTIFACTS_DIR: &str = "artifacts";
const DEFAULT_METRICS_DB: &str = "morning_check_backup";

fn setup_config_path() -> PathBuf {
    env_optional("DIGEST_SETUP_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETUP_CONFIG_PATH))
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SetupConfigOverrides {
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default)]
    db_pool_size: Option<u32>,
    #[serde(default)]
    metrics_url: Option<String>,
    #[serde(default)]
    metrics_db: Option<String>,
    #[serde(default)]
    artifacts_dir: Option<String>,
    #[serde(default)]
    report_path: Option<String>,
    #[serde(default)]
    server_name: Option<String>,
    #[serde(default)]
    job_name: Option<String>,
}

fn load_setup_config_overrides(path: &Path) -> Option<SetupConfigOverrides> {
    if !path.exists() {
        return None;
    }
    let contents = match std::fs::read(path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "session-digest failed to read setup config; using env defaults"
            );
            return None;
        }
    };
    parse_setup_config(contents, path)
}

fn parse_setup_config(mut bytes: Vec<u8>, path: &Path) -> Option<SetupConfigOverrides> {
    match simd_json::serde::from_slice(&mut bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "session-digest failed to parse setup config; using env defaults"
            );
            None
        }
    }
}

/// Setup values only fill settings the environment left unset.
fn apply_setup_overrides(
    config: &mut Config,
    overrides: &SetupConfigOverrides,
    env_allows: impl Fn(&str) -> bool,
) {
    let text = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    if config.database_url.is_none() {
        config.database_url = text(&overrides.database_url).map(normalize_database_url);
    }
    if env_allows("DIGEST_DB_POOL_SIZE") {
        if let Some(size) = overrides.db_pool_size.filter(|v| *v != 0) {
            config.db_pool_size = size;
        }
    }
    if env_allows("DIGEST_METRICS_URL") {
        if let Some(url) = text(&overrides.metrics_url) {
            config.metrics_url = Some(url);
        }
    }
    if env_allows("DIGEST_METRICS_DB") {
        if let Some(db) = text(&overrides.metrics_db) {
            config.metrics_db = db;
        }
    }
    if env_allows("DIGEST_ARTIFACTS_DIR") {
        if let Some(dir) = text(&overrides.artifacts_dir) {
            if env_allows("DIGEST_REPORT_PATH") && overrides.report_path.is_none() {
                config.report_path = PathBuf::from(&dir).join("output.html");
            }
            config.artifacts_dir = PathBuf::from(dir);
        }
    }
    if env_allows("DIGEST_REPORT_PATH") {
        if let Some(path) = text(&overrides.report_path) {
            config.report_path = PathBuf::from(path);
        }
    }
    if env_allows("DIGEST_SERVER_NAME") {
        if let Some(name) = text(&overrides.server_name) {
            config.server_name = Some(name);
        }
    }
    if env_allows("DIGEST_JOB_NAME") {
        if let Some(job) = text(&overrides.job_name) {
            config.job_name = job;
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VaultConfig {
    pub addr: String,
    pub token: String,
    pub credentials_path: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SmtpSecurity {
    None,
    StartTls,
    Tls,
}

impl SmtpSecurity {
    fn parse(raw: &str) -> Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "none" | "plain" => Ok(Self::None),
            "starttls" => Ok(Self::StartTls),
            "tls" | "smtps" => Ok(Self::Tls),
            other => Err(anyhow!("invalid DIGEST_SMTP_SECURITY {other}")),
        }
    }

    fn default_port(self) -> u16 {
        match self {
            Self::None => 25,
            Self::StartTls => 587,
            Self::Tls => 465,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailConfig {
    pub host: String,
    pub port: u16,
    pub security: SmtpSecurity,
    pub from: String,
    pub to: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Mail is configured once an SMTP host is set; sender and recipients are
/// then required.
fn parse_mail_config(get: impl Fn(&str) -> Option<String>) -> Result<Option<MailConfig>> {
    let Some(host) = get("DIGEST_SMTP_HOST") else {
        return Ok(None);
    };
    let require = |key: &str| get(key).ok_or_else(|| anyhow!("missing env var {key}"));

    let security = match get("DIGEST_SMTP_SECURITY") {
        Some(raw) => SmtpSecurity::parse(&raw)?,
        None => SmtpSecurity::None,
    };
    let port = match get("DIGEST_SMTP_PORT") {
        Some(raw) => raw
            .parse::<u16>()
            .with_context(|| format!("invalid DIGEST_SMTP_PORT {raw}"))?,
        None => security.default_port(),
    };
    let to: Vec<String> = require("DIGEST_SMTP_TO")?
        .split(',')
        .map(str::trim)
        .filter(|rcpt| !rcpt.is_empty())
        .map(str::to_string)
        .collect();
    if to.is_empty() {
        return Err(anyhow!("DIGEST_SMTP_TO lists no recipients"));
    }

    Ok(Some(MailConfig {
        host,
        port,
        security,
        from: require("DIGEST_SMTP_FROM")?,
        to,
        username: get("DIGEST_SMTP_USERNAME"),
        password: get("DIGEST_SMTP_PASSWORD"),
    }))
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: Option<String>,
    pub db_pool_size: u32,
    pub metrics_url: Option<String>,
    pub metrics_db: String,
    pub metrics_token: Option<String>,
    pub disable_metrics: bool,
    pub artifacts_dir: PathBuf,
    pub report_path: PathBuf,
    pub server_name: Option<String>,
    pub job_name: String,
    pub pipeline_id: Option<String>,
    pub comment: Option<String>,
    pub http_timeout_secs: u64,
    pub vault: Option<VaultConfig>,
    pub mail: Option<MailConfig>,
    pub disable_mail: bool,
    pub otlp_endpoint: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let artifacts_dir = PathBuf::from(env_string(
            "DIGEST_ARTIFACTS_DIR",
            Some(DEFAULT_ARTIFACTS_DIR.to_string()),
        )?);
        let report_path = env_optional("DIGEST_REPORT_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| artifacts_dir.join("output.html"));

        let vault = match env_optional("VAULT_ADDR") {
            Some(addr) => Some(VaultConfig {
                addr,
                token: env_string("VAULT_TOKEN", None)?,
                credentials_path: env_string("VAULT_CREDENTIALS_PATH", None)?,
            }),
            None => None,
        };

        let mut config = Self {
            database_url: env_optional("DIGEST_DATABASE_URL")
                .or_else(|| env_optional("DATABASE_URL"))
                .map(normalize_database_url),
            db_pool_size: u32::try_from(env_u64("DIGEST_DB_POOL_SIZE", Some(5))?)
                .context("invalid DIGEST_DB_POOL_SIZE")?,
            metrics_url: env_optional("DIGEST_METRICS_URL"),
            metrics_db: env_string("DIGEST_METRICS_DB", Some(DEFAULT_METRICS_DB.to_string()))?,
            metrics_token: env_optional("DIGEST_METRICS_TOKEN"),
            disable_metrics: env_bool("DIGEST_DISABLE_METRICS"),
            artifacts_dir,
            report_path,
            server_name: env_optional("DIGEST_SERVER_NAME"),
            job_name: env_optional("DIGEST_JOB_NAME")
                .or_else(|| env_optional("CI_JOB_NAME"))
                .unwrap_or_else(|| "session-digest".to_string()),
            pipeline_id: env_optional("DIGEST_PIPELINE_ID").or_else(|| env_optional("CI_PIPELINE_ID")),
            comment: env_optional("DIGEST_COMMENT").or_else(|| env_optional("COMMENT")),
            http_timeout_secs: env_u64("DIGEST_HTTP_TIMEOUT_SECS", Some(30))?,
            vault,
            mail: parse_mail_config(env_optional)?,
            disable_mail: env_bool("DIGEST_DISABLE_MAIL") || env_bool("DISABLE_MAIL"),
            otlp_endpoint: env_optional("OTEL_EXPORTER_OTLP_ENDPOINT"),
        };

        if let Some(overrides) = load_setup_config_overrides(&setup_config_path()) {
            apply_setup_overrides(&mut config, &overrides, |key| env_optional(key).is_none());
        }

        Ok(config)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn metrics_enabled(&self) -> bool {
        !self.disable_metrics && self.metrics_url.is_some()
    }

    pub fn mail_enabled(&self) -> bool {
        !self.disable_mail && self.mail.is_some()
    }
}

fn normalize_database_url(url: String) -> String {
    if let Some(stripped) = url.strip_prefix("postgresql+psycopg://") {
        return format!("postgresql://{stripped}");
    }
    if let Some(stripped) = url.strip_prefix("postgresql+asyncpg://") {
        return format!("postgresql://{stripped}");
    }
    url
}

fn env_string(key: &str, default: Option<String>) -> Result<String> {
    match env_optional(key) {
        Some(value) => Ok(value),
        None => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_u64(key: &str, default: Option<u64>) -> Result<u64> {
    match env_optional(key) {
        Some(value) => value.parse::<u64>().with_context(|| format!("invalid {key}")),
        None => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_bool(key: &str) -> bool {
    env_optional(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            database_url: None,
            db_pool_size: 5,
            metrics_url: None,
            metrics_db: DEFAULT_METRICS_DB.to_string(),
            metrics_token: None,
            disable_metrics: false,
            artifacts_dir: PathBuf::from(DEFAULT_ARTIFACTS_DIR),
            report_path: PathBuf::from("artifacts/output.html"),
            server_name: None,
            job_name: "session-digest".to_string(),
            pipeline_id: None,
            comment: None,
            http_timeout_secs: 30,
            vault: None,
            mail: None,
            disable_mail: false,
            otlp_endpoint: None,
        }
    }

    fn overrides(json: &str) -> SetupConfigOverrides {
        parse_setup_config(json.as_bytes().to_vec(), Path::new("config.json"))
            .expect("setup config parses")
    }

    #[test]
    fn setup_values_fill_unset_settings() {
        let mut config = base_config();
        let overrides = overrides(
            r#"{
                "database_url": "postgresql+asyncpg://digest@db/digest",
                "metrics_url": "http://influx:8086",
                "artifacts_dir": "/var/lib/digest",
                "db_pool_size": 0
            }"#,
        );
        apply_setup_overrides(&mut config, &overrides, |_| true);

        assert_eq!(config.database_url.as_deref(), Some("postgresql://digest@db/digest"));
        assert_eq!(config.metrics_url.as_deref(), Some("http://influx:8086"));
        assert_eq!(config.artifacts_dir, PathBuf::from("/var/lib/digest"));
        assert_eq!(config.report_path, PathBuf::from("/var/lib/digest/output.html"));
        assert_eq!(config.db_pool_size, 5);
        assert!(config.metrics_enabled());
    }

    #[test]
    fn environment_wins_over_setup_file() {
        let mut config = base_config();
        config.database_url = Some("postgresql://env@db/digest".to_string());
        config.metrics_db = "from_env".to_string();
        let overrides = overrides(
            r#"{"database_url": "postgresql://setup@db/digest", "metrics_db": "from_setup", "job_name": "nightly"}"#,
        );
        apply_setup_overrides(&mut config, &overrides, |key| key != "DIGEST_METRICS_DB");

        assert_eq!(config.database_url.as_deref(), Some("postgresql://env@db/digest"));
        assert_eq!(config.metrics_db, "from_env");
        assert_eq!(config.job_name, "nightly");
    }

    #[test]
    fn malformed_setup_file_is_ignored() {
        assert!(parse_setup_config(b"{not json".to_vec(), Path::new("config.json")).is_none());
    }

    #[test]
    fn metrics_can_be_disabled() {
        let mut config = base_config();
        config.metrics_url = Some("http://influx:8086".to_string());
        config.disable_metrics = true;
        assert!(!config.metrics_enabled());
    }

    fn mail_env(pairs: &[(&str, &str)]) -> Result<Option<MailConfig>> {
        let vars: std::collections::HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        parse_mail_config(|key| vars.get(key).cloned())
    }

    #[test]
    fn mail_needs_a_host() {
        assert_eq!(mail_env(&[("DIGEST_SMTP_TO", "ops@example.com")]).expect("parses"), None);
    }

    #[test]
    fn mail_settings_parse_with_defaults() {
        let mail = mail_env(&[
            ("DIGEST_SMTP_HOST", "smtp.example.com"),
            ("DIGEST_SMTP_SECURITY", "STARTTLS"),
            ("DIGEST_SMTP_FROM", "digest@example.com"),
            ("DIGEST_SMTP_TO", "ops@example.com, backup@example.com,"),
        ])
        .expect("parses")
        .expect("configured");
        assert_eq!(mail.port, 587);
        assert_eq!(mail.security, SmtpSecurity::StartTls);
        assert_eq!(mail.to, vec!["ops@example.com", "backup@example.com"]);
        assert_eq!(mail.username, None);
    }

    #[test]
    fn mail_without_recipients_is_rejected() {
        assert!(mail_env(&[
            ("DIGEST_SMTP_HOST", "smtp.example.com"),
            ("DIGEST_SMTP_FROM", "digest@example.com"),
        ])
        .is_err());
        assert!(mail_env(&[
            ("DIGEST_SMTP_HOST", "smtp.example.com"),
            ("DIGEST_SMTP_FROM", "digest@example.com"),
            ("DIGEST_SMTP_TO", " , "),
        ])
        .is_err());
        assert!(mail_env(&[
            ("DIGEST_SMTP_HOST", "smtp.example.com"),
            ("DIGEST_SMTP_PORT", "smtp"),
            ("DIGEST_SMTP_FROM", "digest@example.com"),
            ("DIGEST_SMTP_TO", "ops@example.com"),
        ])
        .is_err());
    }

    #[test]
    fn mail_can_be_disabled() {
        let mut config = base_config();
        config.mail = mail_env(&[
            ("DIGEST_SMTP_HOST", "smtp.example.com"),
            ("DIGEST_SMTP_FROM", "digest@example.com"),
            ("DIGEST_SMTP_TO", "ops@example.com"),
        ])
        .expect("parses");
        assert!(config.mail_enabled());
        config.disable_mail = true;
        assert!(!config.mail_enabled());
    }
}

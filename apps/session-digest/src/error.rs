use std::path::PathBuf;
use thiserror::Error;

use crate::session::Category;

/// Why a single raw session row was left out of a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("{category} session is missing job_name")]
    MissingJobName { category: Category },

    #[error("{category} session for job {job_name} is missing {field}")]
    MissingField {
        category: Category,
        job_name: String,
        field: &'static str,
    },

    #[error("malformed {category} session row (job {job_name:?}): {message}")]
    Malformed {
        category: Category,
        job_name: Option<String>,
        message: String,
    },

    #[error("{category} session for job {job_name} has unparseable {field}: {value}")]
    InvalidTimestamp {
        category: Category,
        job_name: String,
        field: &'static str,
        value: String,
    },
}

#[derive(Debug, Error)]
pub enum DigestError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no digest artifacts found under {0}")]
    NoArtifacts(PathBuf),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid mail address: {0}")]
    MailAddress(#[from] lettre::address::AddressError),

    #[error("failed to build mail: {0}")]
    MailMessage(#[from] lettre::error::Error),

    #[error("smtp error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("failed to render report: {0}")]
    Render(#[from] std::fmt::Error),

    #[error("{sink} rejected the request: {message}")]
    Rejected { sink: &'static str, message: String },
}

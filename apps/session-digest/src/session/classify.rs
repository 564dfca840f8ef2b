use super::Outcome;
use serde::{Deserialize, Serialize};

/// Maps a raw status code and flags codes the mapping does not know about.
pub fn classify(status_code: i32) -> Outcome {
    let outcome = Outcome::from_status_code(status_code);
    if outcome == Outcome::Unhandled {
        tracing::warn!(status_code, "unhandled session status code");
    }
    outcome
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Backup,
    Replica,
    BackupTape,
    BackupCopy,
    Unknown,
}

impl JobType {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Backup,
            1 => Self::Replica,
            28 => Self::BackupTape,
            51 | 63 | 65 => Self::BackupCopy,
            _ => Self::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Backup => "Backup",
            Self::Replica => "Replica",
            Self::BackupTape => "Backup Tape",
            Self::BackupCopy => "Backup Copy",
            Self::Unknown => "Unknown",
        }
    }
}

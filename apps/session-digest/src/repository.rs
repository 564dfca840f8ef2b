use crate::session::raw::RawId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

const LOCAL_HOST_PLACEHOLDER: &str = "This server";
pub const LOW_SPACE_PERCENT: u32 = 8;
pub const CRITICAL_SPACE_PERCENT: u32 = 3;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRepository {
    #[serde(default)]
    pub id: Option<RawId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<RawId>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub status: Option<RawId>,
    #[serde(default)]
    pub host_name: Option<String>,
    #[serde(default)]
    pub host_ip: Option<String>,
    #[serde(default)]
    pub scale_out_name: Option<String>,
    #[serde(default, alias = "freeSpace")]
    pub free_space: Option<i64>,
    #[serde(default, alias = "totalSpace")]
    pub total_space: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub kind: Option<String>,
    pub path: Option<String>,
    pub status: Option<String>,
    pub host_name: Option<String>,
    pub host_ip: Option<String>,
    pub capacity: Capacity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capacity {
    pub free: i64,
    pub used: i64,
    pub total: i64,
}

impl Capacity {
    pub fn new(free: i64, total: i64) -> Self {
        Self {
            free,
            used: total.saturating_sub(free).max(0),
            total,
        }
    }

    pub fn free_percent(&self) -> u32 {
        if self.total <= 0 {
            return 0;
        }
        (self.free.max(0) as i128 * 100 / self.total as i128) as u32
    }

    pub fn space_level(&self) -> SpaceLevel {
        SpaceLevel::from_free_percent(self.free_percent())
    }
}

impl std::ops::Add for Capacity {
    type Output = Capacity;

    fn add(self, rhs: Capacity) -> Capacity {
        Capacity {
            free: self.free + rhs.free,
            used: self.used + rhs.used,
            total: self.total + rhs.total,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceLevel {
    Ok,
    Low,
    Critical,
}

impl SpaceLevel {
    pub fn from_free_percent(percent: u32) -> Self {
        if percent <= CRITICAL_SPACE_PERCENT {
            Self::Critical
        } else if percent <= LOW_SPACE_PERCENT {
            Self::Low
        } else {
            Self::Ok
        }
    }
}

/// A standalone repository or a scale-out pool of extents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RepositoryGroup {
    Standalone {
        repository: Repository,
    },
    ScaleOut {
        name: String,
        extents: BTreeMap<String, Repository>,
    },
}

impl RepositoryGroup {
    pub fn capacity(&self) -> Capacity {
        match self {
            Self::Standalone { repository } => repository.capacity,
            Self::ScaleOut { extents, .. } => extents
                .values()
                .fold(Capacity::default(), |acc, extent| acc + extent.capacity),
        }
    }

    /// Scale-out pools are flagged when any single extent runs low.
    pub fn needs_attention(&self) -> bool {
        match self {
            Self::Standalone { repository } => repository.capacity.space_level() != SpaceLevel::Ok,
            Self::ScaleOut { extents, .. } => extents
                .values()
                .any(|extent| extent.capacity.space_level() != SpaceLevel::Ok),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepositoryInventory {
    pub groups: BTreeMap<String, RepositoryGroup>,
    pub repositories: u64,
    pub skipped: u64,
}

/// Groups export rows, skipping rows that fail to decode.
pub fn group_repository_rows(rows: Vec<Value>, server_name: &str) -> RepositoryInventory {
    let mut skipped = 0;
    let mut raw = Vec::with_capacity(rows.len());
    for row in rows {
        match serde_json::from_value::<RawRepository>(row) {
            Ok(repository) => raw.push(repository),
            Err(err) => {
                tracing::warn!(error = %err, "skipping malformed repository row");
                skipped += 1;
            }
        }
    }
    let mut inventory = group_repositories(raw, server_name);
    inventory.skipped += skipped;
    inventory
}

pub fn group_repositories(raw: Vec<RawRepository>, server_name: &str) -> RepositoryInventory {
    let mut inventory = RepositoryInventory::default();

    for row in raw {
        let Some(name) = row
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
        else {
            tracing::warn!(id = ?row.id, "skipping repository without a name");
            inventory.skipped += 1;
            continue;
        };

        let host_name = row.host_name.map(|host| {
            if host == LOCAL_HOST_PLACEHOLDER {
                server_name.to_string()
            } else {
                host
            }
        });
        let repository = Repository {
            id: row.id.map(|id| id.to_string()),
            name: name.clone(),
            description: row.description,
            kind: row.kind.map(|kind| kind.to_string()),
            path: row.path,
            status: row.status.map(|status| status.to_string()),
            host_name,
            host_ip: row.host_ip,
            capacity: Capacity::new(
                row.free_space.unwrap_or(0),
                row.total_space.unwrap_or(0),
            ),
        };
        inventory.repositories += 1;

        match row
            .scale_out_name
            .map(|scale_out| scale_out.trim().to_string())
            .filter(|scale_out| !scale_out.is_empty())
        {
            Some(scale_out) => {
                let group = inventory
                    .groups
                    .entry(scale_out.clone())
                    .or_insert_with(|| RepositoryGroup::ScaleOut {
                        name: scale_out.clone(),
                        extents: BTreeMap::new(),
                    });
                match group {
                    RepositoryGroup::ScaleOut { extents, .. } => {
                        extents.insert(name, repository);
                    }
                    RepositoryGroup::Standalone { .. } => {
                        tracing::warn!(
                            scale_out = %scale_out,
                            extent = %name,
                            "scale-out name collides with a standalone repository; keeping the standalone entry"
                        );
                    }
                }
            }
            None => {
                inventory
                    .groups
                    .insert(name, RepositoryGroup::Standalone { repository });
            }
        }
    }

    inventory
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

pub type ProcessGuid = String;
pub type TaskGuid = String;
pub type Tag = String;

/// Tag every registry lookup falls back to.
pub const DEFAULT_TAG: &str = "default";

/// Environment variable whose comma-separated value carries brain tags.
pub const BRAIN_TAG_ENV: &str = "DIEGO_BRAIN_TAG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Resource {
    pub memory_mb: i32,
    pub disk_mb: i32,
    pub root_fs: String,
}

impl Resource {
    pub fn new(memory_mb: i32, disk_mb: i32, root_fs: impl Into<String>) -> Self {
        Self {
            memory_mb,
            disk_mb,
            root_fs: root_fs.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.memory_mb == 0 && self.disk_mb == 0 && self.root_fs.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct LrpStartRequest {
    pub process_guid: ProcessGuid,
    pub domain: String,
    pub indices: Vec<i32>,
    pub resource: Resource,
    pub tags: BTreeSet<Tag>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub environment_variables: Vec<EnvironmentVariable>,
}

impl LrpStartRequest {
    pub fn new(
        process_guid: impl Into<String>,
        domain: impl Into<String>,
        indices: Vec<i32>,
        resource: Resource,
    ) -> Self {
        Self {
            process_guid: process_guid.into(),
            domain: domain.into(),
            indices,
            resource,
            tags: BTreeSet::new(),
            environment_variables: Vec::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Explicit tags merged with any carried in `DIEGO_BRAIN_TAG`.
    pub fn brain_tags(&self) -> BTreeSet<Tag> {
        merge_env_tags(&self.tags, &self.environment_variables)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct TaskStartRequest {
    pub task_guid: TaskGuid,
    pub domain: String,
    pub resource: Resource,
    pub tags: BTreeSet<Tag>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub environment_variables: Vec<EnvironmentVariable>,
}

impl TaskStartRequest {
    pub fn new(task_guid: impl Into<String>, domain: impl Into<String>, resource: Resource) -> Self {
        Self {
            task_guid: task_guid.into(),
            domain: domain.into(),
            resource,
            tags: BTreeSet::new(),
            environment_variables: Vec::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn brain_tags(&self) -> BTreeSet<Tag> {
        merge_env_tags(&self.tags, &self.environment_variables)
    }
}

fn merge_env_tags(tags: &BTreeSet<Tag>, env: &[EnvironmentVariable]) -> BTreeSet<Tag> {
    let mut merged = tags.clone();
    for var in env.iter().filter(|v| v.name == BRAIN_TAG_ENV) {
        merged.extend(parse_tags(&var.value));
    }
    merged
}

/// Splits a comma-separated tag list, trimming whitespace and dropping empty segments.
pub fn parse_tags(raw: &str) -> BTreeSet<Tag> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// A remote placement engine. Immutable once registered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Brain {
    pub name: String,
    pub url: String,
    pub tags: BTreeSet<Tag>,
}

impl Brain {
    pub fn is_default(&self) -> bool {
        self.tags.contains(DEFAULT_TAG)
    }
}

/// Wire shape of a brain registration; `tags` is comma-separated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainDescriptor {
    pub name: String,
    pub url: String,
    pub tags: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockLease {
    pub holder_id: String,
    pub address: String,
    #[serde(with = "duration_ms")]
    pub ttl: Duration,
}

impl LockLease {
    pub fn new(holder_id: impl Into<String>, address: impl Into<String>, ttl: Duration) -> Self {
        Self {
            holder_id: holder_id.into(),
            address: address.into(),
            ttl,
        }
    }
}

/// Snapshot of who holds a lock, as reported by a coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockRecord {
    pub holder_id: String,
    pub address: String,
    pub expires_at: DateTime<Utc>,
}

impl LockRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct CellPresence {
    pub cell_id: String,
    pub rep_address: String,
    pub zone: String,
}

/// Body submitted to a brain for one dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuctionRequest {
    pub lrps: Vec<LrpStartRequest>,
    pub tasks: Vec<TaskStartRequest>,
    pub cells: Vec<CellPresence>,
}

impl AuctionRequest {
    pub fn is_empty(&self) -> bool {
        self.lrps.is_empty() && self.tasks.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LifecycleState {
    Starting,
    AcquiringLock,
    Active,
    LockLost,
    ShuttingDown,
    Terminated,
}

impl LifecycleState {
    pub fn is_active(&self) -> bool {
        matches!(self, LifecycleState::Active)
    }
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

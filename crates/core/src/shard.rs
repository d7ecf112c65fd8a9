//! Desired state of one shard, as read from the shard resource.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::{Affinity, PersistentVolumeClaimSpec, ResourceRequirements, Toleration};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

use crate::labels::{CLUSTER_LABEL, KEYSPACE_LABEL};
use crate::status::ShardStatus;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VitessShard {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: ShardSpec,
    #[serde(default)]
    pub status: ShardStatus,
}

impl VitessShard {
    fn label(&self, key: &str) -> &str {
        self.metadata.labels.as_ref().and_then(|l| l.get(key)).map(String::as_str).unwrap_or("")
    }

    pub fn cluster_name(&self) -> &str { self.label(CLUSTER_LABEL) }
    pub fn keyspace_name(&self) -> &str { self.label(KEYSPACE_LABEL) }
    pub fn namespace(&self) -> &str { self.metadata.namespace.as_deref().unwrap_or("default") }
    pub fn generation(&self) -> i64 { self.metadata.generation.unwrap_or(0) }

    pub fn backup_location(&self, name: &str) -> Option<&BackupLocation> {
        self.spec.backup_locations.iter().find(|b| b.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardSpec {
    /// Shard name as recorded in the topology service (e.g. "-80").
    pub name: String,
    #[serde(default)]
    pub key_range: KeyRange,
    #[serde(default)]
    pub images: TabletImages,
    #[serde(default)]
    pub global_lockserver: LockserverSpec,
    #[serde(default)]
    pub extra_vitess_flags: BTreeMap<String, String>,
    #[serde(default)]
    pub tablet_pools: Vec<TabletPool>,
    #[serde(default)]
    pub backup_locations: Vec<BackupLocation>,
    /// Cell name -> availability zone.
    #[serde(default)]
    pub zone_map: BTreeMap<String, String>,
    #[serde(default)]
    pub database_name: String,
    #[serde(default)]
    pub update_strategy: UpdateStrategy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyRange {
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: String,
}

impl KeyRange {
    /// Label/DNS safe form: empty bounds become `x`, so `-80` is `x-80`.
    pub fn safe_name(&self) -> String {
        let start = if self.start.is_empty() { "x" } else { self.start.as_str() };
        let end = if self.end.is_empty() { "x" } else { self.end.as_str() };
        format!("{}-{}", start, end)
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabletImages {
    #[serde(default)]
    pub vttablet: String,
    #[serde(default)]
    pub mysqld: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockserverSpec {
    #[serde(default)]
    pub implementation: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub root_path: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateStrategy {
    /// Restart-requiring changes wait for an external rollout driver.
    #[default]
    External,
    /// Restart-requiring changes are applied as soon as they are detected.
    Immediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabletPoolType {
    Replica,
    Rdonly,
    ExternalPrimary,
    ExternalReplica,
    ExternalRdonly,
}

impl TabletPoolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TabletPoolType::Replica => "replica",
            TabletPoolType::Rdonly => "rdonly",
            TabletPoolType::ExternalPrimary => "externalprimary",
            TabletPoolType::ExternalReplica => "externalreplica",
            TabletPoolType::ExternalRdonly => "externalrdonly",
        }
    }

    /// Tablet type the process registers with at startup.
    pub fn init_tablet_type(&self) -> &'static str {
        match self {
            TabletPoolType::Replica | TabletPoolType::ExternalPrimary | TabletPoolType::ExternalReplica => "replica",
            TabletPoolType::Rdonly | TabletPoolType::ExternalRdonly => "rdonly",
        }
    }
}

impl fmt::Display for TabletPoolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabletPool {
    pub cell: String,
    #[serde(rename = "type")]
    pub pool_type: TabletPoolType,
    pub replicas: i32,
    #[serde(default)]
    pub vttablet: VttabletSpec,
    #[serde(default)]
    pub mysqld: Option<MysqldSpec>,
    #[serde(default)]
    pub data_volume_claim_template: Option<PersistentVolumeClaimSpec>,
    #[serde(default)]
    pub backup_location_name: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub extra_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub affinity: Option<Affinity>,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VttabletSpec {
    #[serde(default)]
    pub extra_flags: BTreeMap<String, String>,
    #[serde(default)]
    pub resources: ResourceRequirements,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MysqldSpec {
    #[serde(default)]
    pub resources: ResourceRequirements,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupLocation {
    #[serde(default)]
    pub name: String,
    /// Storage root handed to the tablet's backup engine.
    #[serde(default)]
    pub storage_root: Option<String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

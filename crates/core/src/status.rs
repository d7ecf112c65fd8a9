//! Shard status as written back after every pass. Rebuilt from scratch each
//! time; nothing here survives in memory between passes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::shard::TabletPoolType;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(v: bool) -> Self {
        if v { ConditionStatus::True } else { ConditionStatus::False }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabletStatus {
    #[serde(rename = "type")]
    pub pool_type: TabletPoolType,
    pub index: i32,
    pub running: ConditionStatus,
    pub ready: ConditionStatus,
    pub available: ConditionStatus,
    pub data_volume_bound: ConditionStatus,
    /// Restart-requiring changes waiting to be rolled out.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pending_changes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl TabletStatus {
    pub fn new(pool_type: TabletPoolType, index: i32) -> Self {
        Self {
            pool_type,
            index,
            running: ConditionStatus::Unknown,
            ready: ConditionStatus::Unknown,
            available: ConditionStatus::Unknown,
            data_volume_bound: ConditionStatus::Unknown,
            pending_changes: String::new(),
            last_error: None,
        }
    }
}

/// Why an unwanted object is being kept around for now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanStatus {
    pub reason: String,
    pub message: String,
}

impl OrphanStatus {
    pub fn new(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self { reason: reason.into(), message: message.into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardStatus {
    /// Cells with at least one desired or retained tablet, sorted.
    #[serde(default)]
    pub cells: Vec<String>,
    #[serde(default)]
    pub tablets: BTreeMap<String, TabletStatus>,
    #[serde(default)]
    pub orphaned_tablets: BTreeMap<String, OrphanStatus>,
    /// Lowest shard generation observed across tablet pods; 0 when none reported one.
    #[serde(default)]
    pub lowest_pod_generation: i64,
}

impl ShardStatus {
    /// Lower the generation low-water mark. 0 means unset and is always replaced.
    pub fn observe_pod_generation(&mut self, generation: i64) {
        if self.lowest_pod_generation == 0 || generation < self.lowest_pod_generation {
            self.lowest_pod_generation = generation;
        }
    }
}

//! vtshard core types: object keys, tablet identity, shard spec and status.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod drain;
pub mod labels;
pub mod rollout;
pub mod shard;
pub mod status;

pub use shard::{
    BackupLocation, KeyRange, LockserverSpec, MysqldSpec, ShardSpec, TabletImages, TabletPool,
    TabletPoolType, UpdateStrategy, VitessShard, VttabletSpec,
};
pub use status::{ConditionStatus, OrphanStatus, ShardStatus, TabletStatus};

/// Namespaced object name. Pods and their data volume claims share a key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Tablet alias as recorded in the topology service: `{cell}-{uid:010}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TabletAlias {
    pub cell: String,
    pub uid: u32,
}

impl fmt::Display for TabletAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:010}", self.cell, self.uid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid tablet alias {0:?} (expect <cell>-<uid>)")]
pub struct AliasParseError(pub String);

impl FromStr for TabletAlias {
    type Err = AliasParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Cells may contain dashes; the uid is always the last segment.
        let (cell, uid) = s.rsplit_once('-').ok_or_else(|| AliasParseError(s.to_string()))?;
        if cell.is_empty() {
            return Err(AliasParseError(s.to_string()));
        }
        let uid = uid.parse::<u32>().map_err(|_| AliasParseError(s.to_string()))?;
        Ok(Self { cell: cell.to_string(), uid })
    }
}

/// Copy every entry of `src` into `dst`, overwriting keys present in both.
/// Keys only present in `dst` are left alone.
pub fn merge_string_map(dst: &mut BTreeMap<String, String>, src: &BTreeMap<String, String>) {
    for (k, v) in src {
        dst.insert(k.clone(), v.clone());
    }
}

pub mod prelude {
    pub use super::{
        ConditionStatus, KeyRange, ObjectKey, OrphanStatus, ShardSpec, ShardStatus, TabletAlias,
        TabletPool, TabletPoolType, TabletStatus, VitessShard,
    };
}

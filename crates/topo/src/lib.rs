//! vtshard topo: read-only view of the global topology service.
//!
//! Only the shard record is needed here, and only for its primary alias. The
//! real lock-service client lives outside this workspace; [`StaticTopo`]
//! serves records held in memory (tests, dry runs, or a YAML snapshot).

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::debug;
use vtshard_core::{AliasParseError, TabletAlias};

/// Global shard record. Only the fields the turndown gate needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardRecord {
    pub primary_alias: Option<TabletAlias>,
}

#[derive(Debug, thiserror::Error)]
pub enum TopoError {
    #[error("no shard record for {keyspace}/{shard}")]
    NoNode { keyspace: String, shard: String },
    #[error("topology service unavailable: {0}")]
    Unavailable(String),
    #[error("parsing shard records: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error(transparent)]
    Alias(#[from] AliasParseError),
}

#[async_trait::async_trait]
pub trait TopoServer: Send + Sync {
    async fn get_shard(&self, keyspace: &str, shard: &str) -> Result<ShardRecord, TopoError>;
}

/// One entry of a YAML shard record snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardRecordEntry {
    pub keyspace: String,
    pub shard: String,
    #[serde(default)]
    pub primary_alias: Option<String>,
}

#[derive(Default)]
pub struct StaticTopo {
    records: RwLock<BTreeMap<(String, String), ShardRecord>>,
    unavailable: AtomicBool,
}

impl StaticTopo {
    pub fn new() -> Self { Self::default() }

    /// Load a YAML list of [`ShardRecordEntry`].
    pub fn from_yaml(yaml: &str) -> Result<Self, TopoError> {
        let entries: Vec<ShardRecordEntry> = serde_yaml::from_str(yaml)?;
        let topo = Self::new();
        for e in entries {
            let primary = e.primary_alias.as_deref().map(str::parse::<TabletAlias>).transpose()?;
            topo.set_primary(&e.keyspace, &e.shard, primary);
        }
        Ok(topo)
    }

    pub fn set_primary(&self, keyspace: &str, shard: &str, primary: Option<TabletAlias>) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.insert((keyspace.to_string(), shard.to_string()), ShardRecord { primary_alias: primary });
    }

    /// Simulate an outage: every lookup fails until turned back off.
    pub fn set_unavailable(&self, on: bool) {
        self.unavailable.store(on, Ordering::Relaxed);
    }
}

#[async_trait::async_trait]
impl TopoServer for StaticTopo {
    async fn get_shard(&self, keyspace: &str, shard: &str) -> Result<ShardRecord, TopoError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(TopoError::Unavailable("static topo marked unavailable".into()));
        }
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let rec = records.get(&(keyspace.to_string(), shard.to_string())).cloned();
        debug!(keyspace, shard, found = rec.is_some(), "shard record lookup");
        rec.ok_or_else(|| TopoError::NoNode { keyspace: keyspace.to_string(), shard: shard.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_returns_primary_or_no_node() {
        let topo = StaticTopo::new();
        let alias = TabletAlias { cell: "zone1".into(), uid: 7 };
        topo.set_primary("commerce", "-", Some(alias.clone()));
        let rec = topo.get_shard("commerce", "-").await.expect("record");
        assert_eq!(rec.primary_alias, Some(alias));
        assert!(matches!(topo.get_shard("commerce", "-80").await, Err(TopoError::NoNode { .. })));

        topo.set_unavailable(true);
        assert!(matches!(topo.get_shard("commerce", "-").await, Err(TopoError::Unavailable(_))));
    }

    #[tokio::test]
    async fn loads_yaml_snapshot() {
        let yaml = "- keyspace: commerce\n  shard: \"-80\"\n  primaryAlias: zone1-0000000101\n- keyspace: commerce\n  shard: \"80-\"\n";
        let topo = StaticTopo::from_yaml(yaml).expect("parse");
        let rec = topo.get_shard("commerce", "-80").await.expect("record");
        assert_eq!(rec.primary_alias.map(|a| a.to_string()).as_deref(), Some("zone1-0000000101"));
        let rec = topo.get_shard("commerce", "80-").await.expect("record");
        assert!(rec.primary_alias.is_none());

        assert!(StaticTopo::from_yaml("- keyspace: a\n  shard: b\n  primaryAlias: bogus\n").is_err());
    }
}

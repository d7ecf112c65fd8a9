//! vtshard tablet: desired tablet identities and the objects that run them.
//!
//! [`tablet_specs`] expands a shard's pools into one [`TabletSpec`] per
//! tablet. The `pod` and `pvc` modules turn a spec into a minimal Pod /
//! PersistentVolumeClaim and apply later spec changes onto live objects.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Affinity, PersistentVolumeClaimSpec, ResourceRequirements, Toleration};
use vtshard_core::{
    labels::{CELL_LABEL, TABLET_UID_LABEL},
    BackupLocation, KeyRange, LockserverSpec, MysqldSpec, TabletAlias, TabletImages, TabletPoolType,
};

mod compile;
pub mod pod;
pub mod pvc;
pub mod quantity;

pub use compile::tablet_specs;

/// Fully resolved configuration of one tablet.
#[derive(Debug, Clone, PartialEq)]
pub struct TabletSpec {
    pub alias: TabletAlias,
    pub alias_str: String,
    /// 1-based position within the pool.
    pub index: i32,
    pub pool_type: TabletPoolType,
    pub keyspace: String,
    pub shard_name: String,
    pub key_range: KeyRange,
    pub database_name: String,
    pub global_lockserver: LockserverSpec,
    pub images: TabletImages,
    pub zone: Option<String>,
    pub extra_flags: BTreeMap<String, String>,
    pub vttablet_resources: ResourceRequirements,
    pub mysqld: Option<MysqldSpec>,
    pub labels: BTreeMap<String, String>,
    pub extra_labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub backup_location: Option<BackupLocation>,
    pub data_volume_pvc_spec: Option<PersistentVolumeClaimSpec>,
    /// Claim name; same as the pod name.
    pub data_volume_pvc_name: String,
    pub affinity: Option<Affinity>,
    pub tolerations: Vec<Toleration>,
}

/// Tablet UID: a pure function of where the tablet sits in the shard, so the
/// same pool layout always yields the same tablets.
pub fn uid(cell: &str, keyspace: &str, key_range: &KeyRange, pool_type: TabletPoolType, index: u32) -> u32 {
    let input = format!("{} {} {} {} {}\n", cell, keyspace, key_range, pool_type.as_str(), index);
    let mut h: u64 = 0xcbf29ce484222325; // 64-bit FNV-1a offset
    for b in input.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    ((h >> 32) ^ (h & 0xffff_ffff)) as u32
}

/// Name shared by a tablet's pod and its data volume claim.
pub fn pod_name(cluster: &str, alias: &TabletAlias) -> String {
    format!("{}-vttablet-{}", cluster, alias)
}

/// Recover the alias from the labels stamped by the compiler.
pub fn alias_from_labels(labels: Option<&BTreeMap<String, String>>) -> Option<TabletAlias> {
    let labels = labels?;
    let cell = labels.get(CELL_LABEL)?;
    let uid = labels.get(TABLET_UID_LABEL)?.parse::<u32>().ok()?;
    Some(TabletAlias { cell: cell.clone(), uid })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kr() -> KeyRange { KeyRange { start: String::new(), end: "80".into() } }

    #[test]
    fn uid_is_stable_and_position_sensitive() {
        let a = uid("zone1", "commerce", &kr(), TabletPoolType::Replica, 1);
        assert_eq!(a, uid("zone1", "commerce", &kr(), TabletPoolType::Replica, 1));
        assert_ne!(a, uid("zone1", "commerce", &kr(), TabletPoolType::Replica, 2));
        assert_ne!(a, uid("zone2", "commerce", &kr(), TabletPoolType::Replica, 1));
        assert_ne!(a, uid("zone1", "commerce", &kr(), TabletPoolType::Rdonly, 1));
        assert_ne!(a, uid("zone1", "customer", &kr(), TabletPoolType::Replica, 1));
    }

    #[test]
    fn pod_name_embeds_padded_alias() {
        let alias = TabletAlias { cell: "zone1".into(), uid: 12 };
        assert_eq!(pod_name("example", &alias), "example-vttablet-zone1-0000000012");
    }

    #[test]
    fn alias_from_labels_needs_cell_and_numeric_uid() {
        let mut labels = BTreeMap::from([(CELL_LABEL.to_string(), "zone1".to_string())]);
        assert_eq!(alias_from_labels(Some(&labels)), None);
        labels.insert(TABLET_UID_LABEL.into(), "x".into());
        assert_eq!(alias_from_labels(Some(&labels)), None);
        labels.insert(TABLET_UID_LABEL.into(), "42".into());
        assert_eq!(alias_from_labels(Some(&labels)), Some(TabletAlias { cell: "zone1".into(), uid: 42 }));
    }
}

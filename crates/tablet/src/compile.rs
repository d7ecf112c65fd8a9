use std::collections::BTreeMap;

use tracing::debug;
use vtshard_core::{
    drain,
    labels::{CELL_LABEL, TABLET_INDEX_LABEL, TABLET_TYPE_LABEL, TABLET_UID_LABEL},
    merge_string_map, TabletAlias, VitessShard,
};

use crate::{pod_name, uid, TabletSpec};

/// Expand every pool into its tablets, in pool order then index order.
///
/// Within a pool, tablets get indexes `1..=replicas`. Flags are the shard's
/// extra flags overridden by the pool's; annotations are the drain marker,
/// then the pool's, then the backup location's.
pub fn tablet_specs(shard: &VitessShard, parent_labels: &BTreeMap<String, String>) -> Vec<TabletSpec> {
    let keyspace = shard.keyspace_name();
    let cluster = shard.cluster_name();
    let mut tablets = Vec::new();

    for pool in &shard.spec.tablet_pools {
        let backup_location = shard.backup_location(&pool.backup_location_name).cloned();
        if backup_location.is_none() && !pool.backup_location_name.is_empty() {
            debug!(cell = %pool.cell, location = %pool.backup_location_name, "backup location not defined; pool gets none");
        }

        for index in 1..=pool.replicas.max(0) {
            let alias = TabletAlias {
                cell: pool.cell.clone(),
                uid: uid(&pool.cell, keyspace, &shard.spec.key_range, pool.pool_type, index as u32),
            };

            let mut labels = parent_labels.clone();
            labels.insert(CELL_LABEL.to_string(), alias.cell.clone());
            labels.insert(TABLET_UID_LABEL.to_string(), alias.uid.to_string());
            labels.insert(TABLET_TYPE_LABEL.to_string(), pool.pool_type.as_str().to_string());
            labels.insert(TABLET_INDEX_LABEL.to_string(), index.to_string());

            let mut extra_flags = BTreeMap::new();
            merge_string_map(&mut extra_flags, &shard.spec.extra_vitess_flags);
            merge_string_map(&mut extra_flags, &pool.vttablet.extra_flags);

            let mut annotations = BTreeMap::from([(
                drain::SUPPORTED_ANNOTATION.to_string(),
                "ensure that the tablet is not a primary".to_string(),
            )]);
            merge_string_map(&mut annotations, &pool.annotations);
            if let Some(bl) = &backup_location {
                merge_string_map(&mut annotations, &bl.annotations);
            }

            let name = pod_name(cluster, &alias);
            tablets.push(TabletSpec {
                alias_str: alias.to_string(),
                zone: shard.spec.zone_map.get(&alias.cell).cloned(),
                alias,
                index,
                pool_type: pool.pool_type,
                keyspace: keyspace.to_string(),
                shard_name: shard.spec.name.clone(),
                key_range: shard.spec.key_range.clone(),
                database_name: shard.spec.database_name.clone(),
                global_lockserver: shard.spec.global_lockserver.clone(),
                images: shard.spec.images.clone(),
                extra_flags,
                vttablet_resources: pool.vttablet.resources.clone(),
                mysqld: pool.mysqld.clone(),
                labels,
                extra_labels: pool.extra_labels.clone(),
                annotations,
                backup_location: backup_location.clone(),
                data_volume_pvc_spec: pool.data_volume_claim_template.clone(),
                data_volume_pvc_name: name,
                affinity: pool.affinity.clone(),
                tolerations: pool.tolerations.clone(),
            });
        }
    }

    tablets
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use vtshard_core::{
        labels::{CLUSTER_LABEL, KEYSPACE_LABEL},
        BackupLocation, ShardSpec, TabletPool, TabletPoolType,
    };

    fn pool(cell: &str, t: TabletPoolType, replicas: i32) -> TabletPool {
        TabletPool {
            cell: cell.into(),
            pool_type: t,
            replicas,
            vttablet: Default::default(),
            mysqld: None,
            data_volume_claim_template: None,
            backup_location_name: String::new(),
            annotations: BTreeMap::new(),
            extra_labels: BTreeMap::new(),
            affinity: None,
            tolerations: vec![],
        }
    }

    fn shard(pools: Vec<TabletPool>) -> VitessShard {
        let mut s = VitessShard { spec: ShardSpec { name: "-".into(), tablet_pools: pools, ..Default::default() }, ..Default::default() };
        s.metadata.labels = Some(BTreeMap::from([
            (CLUSTER_LABEL.to_string(), "example".to_string()),
            (KEYSPACE_LABEL.to_string(), "commerce".to_string()),
        ]));
        s
    }

    #[test]
    fn compiles_deterministically() {
        let s = shard(vec![pool("zone1", TabletPoolType::Replica, 3), pool("zone2", TabletPoolType::Rdonly, 2)]);
        let a: Vec<String> = tablet_specs(&s, &BTreeMap::new()).into_iter().map(|t| t.alias_str).collect();
        let b: Vec<String> = tablet_specs(&s, &BTreeMap::new()).into_iter().map(|t| t.alias_str).collect();
        assert_eq!(a, b);
        assert_eq!(a.len(), 5);
        assert_eq!(a.iter().collect::<BTreeSet<_>>().len(), 5, "aliases must be unique");
    }

    #[test]
    fn indexes_are_one_based_per_pool() {
        let s = shard(vec![
            pool("zone1", TabletPoolType::Replica, 3),
            pool("zone1", TabletPoolType::Rdonly, 2),
            pool("zone2", TabletPoolType::Replica, 0),
        ]);
        let tablets = tablet_specs(&s, &BTreeMap::new());
        let idx: Vec<(TabletPoolType, i32)> = tablets.iter().map(|t| (t.pool_type, t.index)).collect();
        assert_eq!(
            idx,
            vec![
                (TabletPoolType::Replica, 1),
                (TabletPoolType::Replica, 2),
                (TabletPoolType::Replica, 3),
                (TabletPoolType::Rdonly, 1),
                (TabletPoolType::Rdonly, 2),
            ]
        );
        assert_eq!(tablets[3].labels.get(TABLET_INDEX_LABEL).map(String::as_str), Some("1"));
        assert_eq!(tablets[3].labels.get(TABLET_TYPE_LABEL).map(String::as_str), Some("rdonly"));
    }

    #[test]
    fn pool_flags_override_shard_flags() {
        let mut p = pool("zone1", TabletPoolType::Replica, 1);
        p.vttablet.extra_flags = BTreeMap::from([("queryserver-config-pool-size".into(), "96".into())]);
        let mut s = shard(vec![p]);
        s.spec.extra_vitess_flags = BTreeMap::from([
            ("queryserver-config-pool-size".into(), "24".into()),
            ("enable_semi_sync".into(), "true".into()),
        ]);
        let t = &tablet_specs(&s, &BTreeMap::new())[0];
        assert_eq!(t.extra_flags.get("queryserver-config-pool-size").map(String::as_str), Some("96"));
        assert_eq!(t.extra_flags.get("enable_semi_sync").map(String::as_str), Some("true"));
        // Input untouched.
        assert!(s.spec.tablet_pools[0].vttablet.extra_flags.get("enable_semi_sync").is_none());
    }

    #[test]
    fn resolves_backup_location_and_merges_annotations() {
        let mut p = pool("zone1", TabletPoolType::Replica, 1);
        p.backup_location_name = "gcs".into();
        p.annotations = BTreeMap::from([("team".into(), "db".into())]);
        let mut s = shard(vec![p, pool("zone1", TabletPoolType::Rdonly, 1)]);
        s.spec.backup_locations = vec![BackupLocation {
            name: "gcs".into(),
            storage_root: Some("gs://backups".into()),
            annotations: BTreeMap::from([("iam".into(), "backup-sa".into())]),
        }];
        let tablets = tablet_specs(&s, &BTreeMap::new());
        let t = &tablets[0];
        assert_eq!(t.backup_location.as_ref().map(|b| b.name.as_str()), Some("gcs"));
        assert_eq!(t.annotations.get("team").map(String::as_str), Some("db"));
        assert_eq!(t.annotations.get("iam").map(String::as_str), Some("backup-sa"));
        assert!(t.annotations.contains_key(drain::SUPPORTED_ANNOTATION));
        // Unnamed pool falls back to no location rather than the first one.
        assert!(tablets[1].backup_location.is_none());
    }

    #[test]
    fn claim_name_matches_pod_name() {
        let s = shard(vec![pool("zone1", TabletPoolType::Replica, 1)]);
        let t = &tablet_specs(&s, &BTreeMap::new())[0];
        assert_eq!(t.data_volume_pvc_name, pod_name("example", &t.alias));
    }
}

//! Tablet pod builder.
//!
//! Labels and annotations are applied in place. Everything under `spec`
//! needs a restart, so [`update_pod`] only replaces it when the hash of the
//! freshly built spec differs from the one recorded on the pod. Comparing the
//! hash instead of the live spec keeps server-side defaulting from looking
//! like a change.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PersistentVolumeClaimVolumeSource, Pod, PodSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use tracing::warn;
use vtshard_core::{labels::DESIRED_SPEC_HASH_ANNOTATION, merge_string_map, ObjectKey};

use crate::TabletSpec;

pub const VTTABLET_CONTAINER: &str = "vttablet";
pub const MYSQLD_CONTAINER: &str = "mysqld";
pub const DATA_VOLUME: &str = "vt-data";
pub const DATA_MOUNT_PATH: &str = "/vt/vtdataroot";
pub const ZONE_NODE_LABEL: &str = "topology.kubernetes.io/zone";

const WEB_PORT: i32 = 15000;
const GRPC_PORT: i32 = 15999;
const MYSQL_PORT: i32 = 3306;

pub fn new_pod(key: &ObjectKey, spec: &TabletSpec) -> Pod {
    let desired = desired_pod_spec(spec);
    let mut annotations = spec.annotations.clone();
    match spec_hash(&desired) {
        Ok(hash) => {
            annotations.insert(DESIRED_SPEC_HASH_ANNOTATION.to_string(), hash);
        }
        Err(e) => warn!(key = %key, error = %e, "hashing pod spec failed; pod created without a spec hash"),
    }
    Pod {
        metadata: ObjectMeta {
            name: Some(key.name.clone()),
            namespace: Some(key.namespace.clone()),
            labels: Some(pod_labels(spec)),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(desired),
        status: None,
    }
}

/// Apply changes that don't need a restart. Keys we don't own are kept.
pub fn update_pod_in_place(pod: &mut Pod, spec: &TabletSpec) {
    merge_string_map(pod.metadata.labels.get_or_insert_with(Default::default), &pod_labels(spec));
    merge_string_map(pod.metadata.annotations.get_or_insert_with(Default::default), &spec.annotations);
}

/// Apply changes that need the pod to be recreated.
pub fn update_pod(pod: &mut Pod, spec: &TabletSpec) {
    update_pod_in_place(pod, spec);
    let desired = desired_pod_spec(spec);
    let hash = match spec_hash(&desired) {
        Ok(hash) => hash,
        Err(e) => {
            warn!(pod = %pod.metadata.name.as_deref().unwrap_or_default(), error = %e, "hashing pod spec failed; restart check skipped");
            return;
        }
    };
    let annotations = pod.metadata.annotations.get_or_insert_with(Default::default);
    if annotations.get(DESIRED_SPEC_HASH_ANNOTATION) == Some(&hash) {
        return;
    }
    annotations.insert(DESIRED_SPEC_HASH_ANNOTATION.to_string(), hash);
    let node_name = pod.spec.as_ref().and_then(|s| s.node_name.clone());
    pod.spec = Some(PodSpec { node_name, ..desired });
}

fn pod_labels(spec: &TabletSpec) -> BTreeMap<String, String> {
    let mut labels = spec.extra_labels.clone();
    // Our own labels win over user-supplied ones; selectors depend on them.
    merge_string_map(&mut labels, &spec.labels);
    labels
}

/// FNV-1a over the serialized spec. Only has to be stable for one build of the operator.
pub fn spec_hash(spec: &PodSpec) -> Result<String, serde_json::Error> {
    fnv_hex(spec)
}

fn fnv_hex<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(value)?;
    let mut h: u64 = 0xcbf29ce484222325;
    for b in bytes {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    Ok(format!("{:016x}", h))
}

fn desired_pod_spec(spec: &TabletSpec) -> PodSpec {
    let has_data_volume = spec.data_volume_pvc_spec.is_some();
    let data_mounts = || {
        has_data_volume.then(|| {
            vec![VolumeMount { name: DATA_VOLUME.to_string(), mount_path: DATA_MOUNT_PATH.to_string(), ..Default::default() }]
        })
    };

    let mut containers = vec![Container {
        name: VTTABLET_CONTAINER.to_string(),
        image: Some(spec.images.vttablet.clone()),
        args: Some(vttablet_args(spec)),
        ports: Some(vec![port("web", WEB_PORT), port("grpc", GRPC_PORT)]),
        resources: Some(spec.vttablet_resources.clone()),
        volume_mounts: data_mounts(),
        ..Default::default()
    }];
    if let (Some(mysqld), Some(image)) = (&spec.mysqld, &spec.images.mysqld) {
        containers.push(Container {
            name: MYSQLD_CONTAINER.to_string(),
            image: Some(image.clone()),
            ports: Some(vec![port("mysql", MYSQL_PORT)]),
            resources: Some(mysqld.resources.clone()),
            volume_mounts: data_mounts(),
            ..Default::default()
        });
    }

    let volumes = has_data_volume.then(|| {
        vec![Volume {
            name: DATA_VOLUME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: spec.data_volume_pvc_name.clone(),
                read_only: None,
            }),
            ..Default::default()
        }]
    });

    PodSpec {
        hostname: Some(spec.alias_str.clone()),
        containers,
        volumes,
        affinity: spec.affinity.clone(),
        tolerations: (!spec.tolerations.is_empty()).then(|| spec.tolerations.clone()),
        node_selector: spec.zone.as_ref().map(|z| BTreeMap::from([(ZONE_NODE_LABEL.to_string(), z.clone())])),
        ..Default::default()
    }
}

fn port(name: &str, n: i32) -> ContainerPort {
    ContainerPort { name: Some(name.to_string()), container_port: n, ..Default::default() }
}

fn vttablet_args(spec: &TabletSpec) -> Vec<String> {
    let mut flags = BTreeMap::from([
        ("tablet-path".to_string(), spec.alias_str.clone()),
        ("init_keyspace".to_string(), spec.keyspace.clone()),
        ("init_shard".to_string(), spec.shard_name.clone()),
        ("init_tablet_type".to_string(), spec.pool_type.init_tablet_type().to_string()),
    ]);
    if !spec.global_lockserver.address.is_empty() {
        flags.insert("topo_implementation".into(), spec.global_lockserver.implementation.clone());
        flags.insert("topo_global_server_address".into(), spec.global_lockserver.address.clone());
        flags.insert("topo_global_root".into(), spec.global_lockserver.root_path.clone());
    }
    if !spec.database_name.is_empty() {
        flags.insert("init_db_name_override".into(), spec.database_name.clone());
    }
    if let Some(root) = spec.backup_location.as_ref().and_then(|b| b.storage_root.clone()) {
        flags.insert("backup_storage_root".into(), root);
    }
    merge_string_map(&mut flags, &spec.extra_flags);
    flags.into_iter().map(|(k, v)| format!("--{}={}", k, v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tablet_specs;
    use vtshard_core::{
        labels::{CLUSTER_LABEL, KEYSPACE_LABEL, PVC_FILESYSTEM_RESIZE_ANNOTATION},
        ShardSpec, TabletPool, TabletPoolType, VitessShard,
    };

    fn spec() -> TabletSpec {
        let pool: TabletPool = serde_yaml::from_str(
            "cell: zone1\ntype: replica\nreplicas: 1\nvttablet:\n  extraFlags:\n    db_charset: utf8mb4\ndataVolumeClaimTemplate:\n  resources:\n    requests:\n      storage: 10Gi\n",
        )
        .expect("pool");
        let mut shard = VitessShard {
            spec: ShardSpec { name: "-".into(), tablet_pools: vec![pool], ..Default::default() },
            ..Default::default()
        };
        shard.spec.images.vttablet = "vitess/lite:v19".into();
        shard.metadata.labels = Some(BTreeMap::from([
            (CLUSTER_LABEL.to_string(), "example".to_string()),
            (KEYSPACE_LABEL.to_string(), "commerce".to_string()),
        ]));
        tablet_specs(&shard, &BTreeMap::new()).remove(0)
    }

    fn key(spec: &TabletSpec) -> ObjectKey { ObjectKey::new("ns", spec.data_volume_pvc_name.clone()) }

    #[test]
    fn new_pod_carries_identity_and_flags() {
        let s = spec();
        let pod = new_pod(&key(&s), &s);
        assert_eq!(pod.metadata.name.as_deref(), Some(s.data_volume_pvc_name.as_str()));
        let ps = pod.spec.as_ref().expect("spec");
        let args = ps.containers[0].args.clone().unwrap_or_default();
        assert!(args.contains(&format!("--tablet-path={}", s.alias_str)));
        assert!(args.contains(&"--db_charset=utf8mb4".to_string()));
        assert!(args.contains(&"--init_tablet_type=replica".to_string()));
        let vols = ps.volumes.clone().unwrap_or_default();
        assert_eq!(vols[0].persistent_volume_claim.as_ref().map(|c| c.claim_name.as_str()), Some(s.data_volume_pvc_name.as_str()));
        assert_eq!(s.pool_type, TabletPoolType::Replica);
    }

    #[test]
    fn update_pod_is_noop_when_spec_unchanged() {
        let s = spec();
        let mut pod = new_pod(&key(&s), &s);
        // Server-side defaults must not look like a change.
        if let Some(ps) = pod.spec.as_mut() {
            ps.dns_policy = Some("ClusterFirst".into());
            ps.node_name = Some("node-a".into());
        }
        let before = pod.clone();
        update_pod(&mut pod, &s);
        assert_eq!(pod, before);
    }

    #[test]
    fn update_pod_replaces_spec_but_keeps_node() {
        let mut s = spec();
        let mut pod = new_pod(&key(&s), &s);
        if let Some(ps) = pod.spec.as_mut() {
            ps.node_name = Some("node-a".into());
        }
        s.extra_flags.insert("db_charset".into(), "latin1".into());
        update_pod(&mut pod, &s);
        let ps = pod.spec.as_ref().expect("spec");
        assert_eq!(ps.node_name.as_deref(), Some("node-a"));
        assert!(ps.containers[0].args.clone().unwrap_or_default().contains(&"--db_charset=latin1".to_string()));
    }

    #[test]
    fn in_place_merges_metadata_only() {
        let mut s = spec();
        let mut pod = new_pod(&key(&s), &s);
        pod.metadata.annotations.as_mut().map(|a| a.insert("foreign".into(), "keep".into()));
        s.annotations.insert("team".into(), "db".into());
        s.extra_flags.insert("db_charset".into(), "latin1".into());
        let spec_before = pod.spec.clone();
        update_pod_in_place(&mut pod, &s);
        let ann = pod.metadata.annotations.clone().unwrap_or_default();
        assert_eq!(ann.get("team").map(String::as_str), Some("db"));
        assert_eq!(ann.get("foreign").map(String::as_str), Some("keep"));
        assert_eq!(pod.spec, spec_before);
    }

    #[test]
    fn resize_annotation_flows_through_recreate() {
        let mut s = spec();
        let mut pod = new_pod(&key(&s), &s);
        s.annotations.insert(PVC_FILESYSTEM_RESIZE_ANNOTATION.into(), "20Gi".into());
        update_pod(&mut pod, &s);
        let ann = pod.metadata.annotations.clone().unwrap_or_default();
        assert_eq!(ann.get(PVC_FILESYSTEM_RESIZE_ANNOTATION).map(String::as_str), Some("20Gi"));
    }

    #[test]
    fn hash_reports_unserializable_input() {
        // JSON object keys must be strings.
        let bad = BTreeMap::from([((1, 2), "x")]);
        assert!(fnv_hex(&bad).is_err());

        let mut s = spec();
        let a = spec_hash(&desired_pod_spec(&s)).expect("hash");
        s.images.vttablet = "vitess/lite:v20".into();
        let b = spec_hash(&desired_pod_spec(&s)).expect("hash");
        assert_ne!(a, b);
        assert_eq!(a.len(), 16);
    }
}

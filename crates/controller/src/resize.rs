//! Filesystem resize follow-up. Once a claim's volume has grown but the
//! filesystem on it has not, the tablet pod needs a restart to finish the
//! job; annotating the tablet spec makes the next pod update pick that up.

use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use tracing::debug;
use vtshard_core::{labels::PVC_FILESYSTEM_RESIZE_ANNOTATION, ObjectKey};
use vtshard_kubehub::ObjectStore;
use vtshard_tablet::{pvc::requested_storage, quantity, TabletSpec};

const FILESYSTEM_RESIZE_PENDING: &str = "FileSystemResizePending";

/// Target size to annotate, if `claim` already requests the tablet's size and
/// is waiting for a filesystem resize.
pub fn resize_target(claim: &PersistentVolumeClaim, spec: &TabletSpec) -> Option<String> {
    let want = spec.data_volume_pvc_spec.as_ref().and_then(requested_storage)?;
    let have = claim.spec.as_ref().and_then(requested_storage)?;
    if !quantity::same(want, have) {
        return None;
    }
    let pending = claim
        .status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == FILESYSTEM_RESIZE_PENDING)
        .map(|c| c.status == "True")
        .unwrap_or(false);
    pending.then(|| want.0.clone())
}

/// Look up the tablet's claim and annotate `spec` when a resize is pending.
/// Any failure along the way just means "not yet".
pub async fn propagate_filesystem_resize<S: ObjectStore>(store: &S, namespace: &str, spec: &mut TabletSpec) {
    if spec.data_volume_pvc_spec.is_none() {
        return;
    }
    let key = ObjectKey::new(namespace, spec.data_volume_pvc_name.clone());
    let claim = match store.get::<PersistentVolumeClaim>(&key).await {
        Ok(Some(c)) => c,
        Ok(None) => return,
        Err(e) => {
            debug!(key = %key, error = %e, "claim lookup failed; skipping resize check");
            return;
        }
    };
    if let Some(size) = resize_target(&claim, spec) {
        debug!(key = %key, size = %size, "filesystem resize pending");
        spec.annotations.insert(PVC_FILESYSTEM_RESIZE_ANNOTATION.to_string(), size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use k8s_openapi::api::core::v1::{PersistentVolumeClaimCondition, PersistentVolumeClaimStatus};
    use vtshard_core::{ShardSpec, TabletPool, VitessShard};
    use vtshard_kubehub::MemoryStore;
    use vtshard_tablet::{pvc::new_pvc, tablet_specs};

    fn spec(storage: &str) -> TabletSpec {
        let yaml = format!(
            "cell: zone1\ntype: replica\nreplicas: 1\ndataVolumeClaimTemplate:\n  resources:\n    requests:\n      storage: {}\n",
            storage
        );
        let pool: TabletPool = serde_yaml::from_str(&yaml).expect("pool");
        let shard = VitessShard { spec: ShardSpec { name: "-".into(), tablet_pools: vec![pool], ..Default::default() }, ..Default::default() };
        tablet_specs(&shard, &BTreeMap::new()).remove(0)
    }

    fn claim(s: &TabletSpec, resize_pending: &str) -> PersistentVolumeClaim {
        let key = ObjectKey::new("ns", s.data_volume_pvc_name.clone());
        let mut c = new_pvc(&key, s).expect("claim");
        c.status = Some(PersistentVolumeClaimStatus {
            conditions: Some(vec![PersistentVolumeClaimCondition {
                type_: FILESYSTEM_RESIZE_PENDING.into(),
                status: resize_pending.into(),
                ..Default::default()
            }]),
            ..Default::default()
        });
        c
    }

    #[test]
    fn matching_size_with_pending_condition() {
        let s = spec("20Gi");
        assert_eq!(resize_target(&claim(&s, "True"), &s).as_deref(), Some("20Gi"));
        assert_eq!(resize_target(&claim(&s, "False"), &s), None);
        let mut c = claim(&s, "True");
        c.status = None;
        assert_eq!(resize_target(&c, &s), None);
    }

    #[test]
    fn mismatched_size_is_skipped() {
        let old = spec("10Gi");
        assert_eq!(resize_target(&claim(&old, "True"), &spec("20Gi")), None);
    }

    #[tokio::test]
    async fn propagate_annotates_spec_only_when_claim_matches() {
        let store = MemoryStore::new();
        let mut s = spec("20Gi");
        propagate_filesystem_resize(&store, "ns", &mut s).await;
        assert!(!s.annotations.contains_key(PVC_FILESYSTEM_RESIZE_ANNOTATION));

        store.insert(&claim(&s, "True")).expect("seed");
        propagate_filesystem_resize(&store, "ns", &mut s).await;
        assert_eq!(s.annotations.get(PVC_FILESYSTEM_RESIZE_ANNOTATION).map(String::as_str), Some("20Gi"));
    }
}

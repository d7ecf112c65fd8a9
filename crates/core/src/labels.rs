//! Label and annotation keys stamped on managed objects. These double as the
//! selectors used to find live objects, so they must never change.

pub const COMPONENT_LABEL: &str = "planetscale.com/component";
pub const CLUSTER_LABEL: &str = "planetscale.com/cluster";
pub const KEYSPACE_LABEL: &str = "planetscale.com/keyspace";
pub const SHARD_LABEL: &str = "planetscale.com/shard";
pub const CELL_LABEL: &str = "planetscale.com/cell";
pub const TABLET_UID_LABEL: &str = "planetscale.com/tablet-uid";
pub const TABLET_TYPE_LABEL: &str = "planetscale.com/tablet-type";
pub const TABLET_INDEX_LABEL: &str = "planetscale.com/tablet-index";

pub const VTTABLET_COMPONENT: &str = "vttablet";

/// Shard generation last stamped onto a pod by an in-place update.
pub const OBSERVED_SHARD_GENERATION_ANNOTATION: &str = "planetscale.com/observed-shard-generation";

/// Target size set on a tablet spec when its claim is waiting for a filesystem resize.
pub const PVC_FILESYSTEM_RESIZE_ANNOTATION: &str = "planetscale.com/pvc-filesystem-resize";

/// Hash of the restart-requiring part of a pod's desired spec.
pub const DESIRED_SPEC_HASH_ANNOTATION: &str = "planetscale.com/desired-spec-hash";

/// Render a label map as a kube label selector (`k=v,k2=v2`).
pub fn selector_string(labels: &std::collections::BTreeMap<String, String>) -> String {
    labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join(",")
}

/// Whether `labels` carries every entry of `selector`.
pub fn matches_selector(
    labels: Option<&std::collections::BTreeMap<String, String>>,
    selector: &std::collections::BTreeMap<String, String>,
) -> bool {
    selector.iter().all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
}

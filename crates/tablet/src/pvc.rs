//! Tablet data volume claim builder. Claims are never recreated; the only
//! spec change applied to a live claim is growing its storage request.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{PersistentVolumeClaim, PersistentVolumeClaimSpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use vtshard_core::{merge_string_map, ObjectKey};

use crate::{quantity, TabletSpec};

/// `None` when the tablet has no data volume template.
pub fn new_pvc(key: &ObjectKey, spec: &TabletSpec) -> Option<PersistentVolumeClaim> {
    let template = spec.data_volume_pvc_spec.clone()?;
    Some(PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(key.name.clone()),
            namespace: Some(key.namespace.clone()),
            labels: Some(claim_labels(spec)),
            annotations: (!spec.annotations.is_empty()).then(|| spec.annotations.clone()),
            ..Default::default()
        },
        spec: Some(template),
        status: None,
    })
}

pub fn update_pvc_in_place(pvc: &mut PersistentVolumeClaim, spec: &TabletSpec) {
    merge_string_map(pvc.metadata.labels.get_or_insert_with(Default::default), &claim_labels(spec));
    merge_string_map(pvc.metadata.annotations.get_or_insert_with(Default::default), &spec.annotations);

    let Some(want) = spec.data_volume_pvc_spec.as_ref().and_then(requested_storage).cloned() else {
        return;
    };
    let live = pvc.spec.get_or_insert_with(Default::default);
    let grow = match requested_storage(live).map(quantity::parse) {
        Some(Some(have)) => quantity::parse(&want).map(|w| w > have).unwrap_or(false),
        // Unparseable live size: leave it alone.
        Some(None) => false,
        None => true,
    };
    if grow {
        live.resources
            .get_or_insert_with(Default::default)
            .requests
            .get_or_insert_with(BTreeMap::new)
            .insert("storage".to_string(), want);
    }
}

/// `resources.requests.storage`, if set.
pub fn requested_storage(spec: &PersistentVolumeClaimSpec) -> Option<&Quantity> {
    spec.resources.as_ref()?.requests.as_ref()?.get("storage")
}

fn claim_labels(spec: &TabletSpec) -> BTreeMap<String, String> {
    let mut labels = spec.extra_labels.clone();
    merge_string_map(&mut labels, &spec.labels);
    labels
}

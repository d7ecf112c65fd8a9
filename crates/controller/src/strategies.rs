//! Per-kind strategies for tablet claims and pods. Both write into the same
//! [`Pass`], which lives for one shard pass only.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use vtshard_core::{
    labels::OBSERVED_SHARD_GENERATION_ANNOTATION, rollout, ConditionStatus, ObjectKey, OrphanStatus,
    ShardStatus, TabletStatus,
};
use vtshard_kubehub::ObjectStore;
use vtshard_reconciler::{Builder, ObjectError, Strategy};
use vtshard_tablet::{alias_from_labels, pod, pvc, TabletSpec};
use vtshard_topo::TopoServer;

use crate::availability::{is_pod_ready, is_pod_running, observed_generation, tablet_available_status};
use crate::resize::propagate_filesystem_resize;
use crate::turndown::{claim_turndown, tablet_pod_turndown, PrimaryLookup};

/// Mutable state shared by the strategies of one pass.
pub(crate) struct Pass {
    pub namespace: String,
    pub keyspace: String,
    pub shard_name: String,
    pub generation: i64,
    pub now: DateTime<Utc>,
    pub specs: BTreeMap<ObjectKey, TabletSpec>,
    pub status: ShardStatus,
    pub cells: BTreeSet<String>,
    pub builder: Builder,
}

impl Pass {
    fn tablet_status(&mut self, key: &ObjectKey) -> Option<&mut TabletStatus> {
        let alias = &self.specs.get(key)?.alias_str;
        self.status.tablets.get_mut(alias)
    }
}

pub(crate) struct ClaimStrategy<'a, S> {
    pub pass: &'a mut Pass,
    pub store: &'a S,
}

#[async_trait::async_trait]
impl<'a, S: ObjectStore> Strategy<PersistentVolumeClaim> for ClaimStrategy<'a, S> {
    fn new_object(&mut self, key: &ObjectKey) -> Option<PersistentVolumeClaim> {
        // Not created yet, so not bound.
        if let Some(st) = self.pass.tablet_status(key) {
            st.data_volume_bound = ConditionStatus::False;
        }
        pvc::new_pvc(key, self.pass.specs.get(key)?)
    }

    fn update_in_place(&mut self, key: &ObjectKey, obj: &mut PersistentVolumeClaim) {
        if let Some(spec) = self.pass.specs.get(key) {
            pvc::update_pvc_in_place(obj, spec);
        }
    }

    fn status(&mut self, key: &ObjectKey, obj: &PersistentVolumeClaim) {
        let bound = obj.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Bound");
        if let Some(st) = self.pass.tablet_status(key) {
            st.data_volume_bound = bound.into();
        }
    }

    async fn prepare_for_turndown(&mut self, key: &ObjectKey, _obj: &mut PersistentVolumeClaim) -> Option<OrphanStatus> {
        claim_turndown(self.store, key).await
    }

    fn object_error(&mut self, key: &ObjectKey, err: &ObjectError) {
        if let Some(st) = self.pass.tablet_status(key) {
            st.last_error = Some(err.to_string());
        }
    }
}

pub(crate) struct PodStrategy<'a, S, T: ?Sized> {
    pub pass: &'a mut Pass,
    pub store: &'a S,
    pub topo: &'a T,
    pub topo_timeout: Duration,
}

#[async_trait::async_trait]
impl<'a, S: ObjectStore, T: TopoServer + ?Sized> Strategy<Pod> for PodStrategy<'a, S, T> {
    fn new_object(&mut self, key: &ObjectKey) -> Option<Pod> {
        // Not created yet, so nothing is running.
        if let Some(st) = self.pass.tablet_status(key) {
            st.running = ConditionStatus::False;
            st.ready = ConditionStatus::False;
            st.available = ConditionStatus::False;
        }
        Some(pod::new_pod(key, self.pass.specs.get(key)?))
    }

    fn update_in_place(&mut self, key: &ObjectKey, obj: &mut Pod) {
        if let Some(spec) = self.pass.specs.get(key) {
            pod::update_pod_in_place(obj, spec);
        }
        obj.metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(OBSERVED_SHARD_GENERATION_ANNOTATION.to_string(), self.pass.generation.to_string());
    }

    async fn update_rolling_recreate(&mut self, key: &ObjectKey, obj: &mut Pod) {
        let Some(spec) = self.pass.specs.get_mut(key) else {
            return;
        };
        propagate_filesystem_resize(self.store, &self.pass.namespace, spec).await;
        pod::update_pod(obj, spec);
    }

    fn status(&mut self, key: &ObjectKey, obj: &Pod) {
        let now = self.pass.now;
        // A terminating pod is on its way out and no longer counts as serving.
        let ready = is_pod_ready(obj) && obj.metadata.deletion_timestamp.is_none();
        let available = if ready {
            tablet_available_status(obj, now, &mut self.pass.builder)
        } else {
            ConditionStatus::False
        };
        if let Some(st) = self.pass.tablet_status(key) {
            st.running = is_pod_running(obj).into();
            st.ready = ready.into();
            st.available = available;
            st.pending_changes = rollout::scheduled(&obj.metadata).unwrap_or_default().to_string();
        }
        if let Some(g) = observed_generation(obj) {
            self.pass.status.observe_pod_generation(g);
        }
    }

    fn orphan_status(&mut self, key: &ObjectKey, obj: &Pod, status: &OrphanStatus) {
        let name = match alias_from_labels(obj.metadata.labels.as_ref()) {
            Some(alias) => {
                // Still running a tablet in this cell.
                self.pass.cells.insert(alias.cell.clone());
                alias.to_string()
            }
            None => key.name.clone(),
        };
        self.pass.status.orphaned_tablets.insert(name, status.clone());
    }

    async fn prepare_for_turndown(&mut self, _key: &ObjectKey, obj: &mut Pod) -> Option<OrphanStatus> {
        let alias = alias_from_labels(obj.metadata.labels.as_ref());
        let lookup = PrimaryLookup {
            topo: self.topo,
            keyspace: &self.pass.keyspace,
            shard: &self.pass.shard_name,
            timeout: self.topo_timeout,
        };
        tablet_pod_turndown(obj, alias.as_ref(), &lookup, &self.pass.status.tablets).await
    }

    fn object_error(&mut self, key: &ObjectKey, err: &ObjectError) {
        if let Some(st) = self.pass.tablet_status(key) {
            st.last_error = Some(err.to_string());
        }
    }
}

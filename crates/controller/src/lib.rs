//! vtshard controller: one reconciliation pass over a shard's tablets.
//!
//! A pass compiles the shard's pools into tablet specs, reconciles the data
//! volume claims, then the pods (pod updates read fresh claim state), and
//! rebuilds the shard status from what it saw. Nothing is kept between
//! passes; annotations on the managed objects carry the durable state.

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use metrics::histogram;
use tracing::{info, warn};
use vtshard_core::{
    labels::{CLUSTER_LABEL, COMPONENT_LABEL, KEYSPACE_LABEL, SHARD_LABEL, VTTABLET_COMPONENT},
    ObjectKey, ShardStatus, TabletStatus, UpdateStrategy, VitessShard,
};
use vtshard_kubehub::ObjectStore;
use vtshard_reconciler::{reconcile_object_set, Builder, ObjectSet, ObjectSetReport, PassResult, ReconcileError};
use vtshard_tablet::{pod_name, tablet_specs};
use vtshard_topo::TopoServer;

pub mod availability;
mod config;
pub mod resize;
mod strategies;
pub mod turndown;

pub use config::ControllerConfig;

use strategies::{ClaimStrategy, Pass, PodStrategy};

/// Labels stamped on, and used to select, every tablet object of a shard.
pub fn shard_labels(shard: &VitessShard) -> BTreeMap<String, String> {
    BTreeMap::from([
        (COMPONENT_LABEL.to_string(), VTTABLET_COMPONENT.to_string()),
        (CLUSTER_LABEL.to_string(), shard.cluster_name().to_string()),
        (KEYSPACE_LABEL.to_string(), shard.keyspace_name().to_string()),
        (SHARD_LABEL.to_string(), shard.spec.key_range.safe_name()),
    ])
}

pub struct ShardReconciler<S, T> {
    store: S,
    topo: T,
    config: ControllerConfig,
}

impl<S: ObjectStore, T: TopoServer> ShardReconciler<S, T> {
    pub fn new(store: S, topo: T, config: ControllerConfig) -> Self {
        Self { store, topo, config }
    }

    pub fn store(&self) -> &S { &self.store }

    pub fn topo(&self) -> &T { &self.topo }

    /// Run one pass and write the rebuilt status into `shard.status`.
    pub async fn reconcile(&self, shard: &mut VitessShard) -> PassResult {
        self.reconcile_at(shard, Utc::now()).await
    }

    /// Like [`Self::reconcile`], judging availability windows against `now`.
    pub async fn reconcile_at(&self, shard: &mut VitessShard, now: DateTime<Utc>) -> PassResult {
        let started = Instant::now();
        let labels = shard_labels(shard);
        let namespace = shard.namespace().to_string();
        let cluster = shard.cluster_name().to_string();

        let mut pass = Pass {
            namespace: namespace.clone(),
            keyspace: shard.keyspace_name().to_string(),
            shard_name: shard.spec.name.clone(),
            generation: shard.generation(),
            now,
            specs: BTreeMap::new(),
            status: ShardStatus::default(),
            cells: BTreeSet::new(),
            builder: Builder::new(),
        };

        let mut claim_keys = Vec::new();
        let mut pod_keys = Vec::new();
        for tablet in tablet_specs(shard, &labels) {
            let key = ObjectKey::new(namespace.clone(), pod_name(&cluster, &tablet.alias));
            if tablet.data_volume_pvc_spec.is_some() {
                claim_keys.push(key.clone());
            }
            pod_keys.push(key.clone());
            pass.cells.insert(tablet.alias.cell.clone());
            // Every desired tablet is listed, even if nothing is observed for it.
            pass.status.tablets.insert(tablet.alias_str.clone(), TabletStatus::new(tablet.pool_type, tablet.index));
            pass.specs.insert(key, tablet);
        }
        let release_immediately = shard.spec.update_strategy == UpdateStrategy::Immediate;

        let claims = {
            let set = ObjectSet { namespace: &namespace, selector: &labels, keys: &claim_keys, release_immediately };
            let mut strategy = ClaimStrategy { pass: &mut pass, store: &self.store };
            reconcile_object_set::<PersistentVolumeClaim, _, _>(&self.store, &set, &mut strategy).await
        };
        record(&mut pass.builder, claims);

        let pods = {
            let set = ObjectSet { namespace: &namespace, selector: &labels, keys: &pod_keys, release_immediately };
            let mut strategy = PodStrategy {
                pass: &mut pass,
                store: &self.store,
                topo: &self.topo,
                topo_timeout: self.config.primary_lookup_timeout(),
            };
            reconcile_object_set::<Pod, _, _>(&self.store, &set, &mut strategy).await
        };
        record(&mut pass.builder, pods);

        pass.status.cells = pass.cells.into_iter().collect();
        shard.status = pass.status;

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        histogram!("shard_reconcile_ms", elapsed_ms);
        let result = pass.builder.result();
        info!(
            shard = %shard.metadata.name.as_deref().unwrap_or_default(),
            tablets = shard.status.tablets.len(),
            orphaned = shard.status.orphaned_tablets.len(),
            requeue_after_ms = result.requeue_after.map(|d| d.as_millis() as u64),
            ok = result.is_ok(),
            took_ms = elapsed_ms as u64,
            "shard pass done"
        );
        result
    }
}

fn record(builder: &mut Builder, outcome: Result<ObjectSetReport, ReconcileError>) {
    match outcome {
        Ok(report) => {
            builder.merge(report.into_result());
        }
        Err(e) => {
            warn!(error = %e, "object set reconcile failed");
            builder.error(e);
        }
    }
}

//! Turndown safety gates.
//!
//! A tablet pod may only be deleted once it has drained, is known not to be
//! the shard primary, and every desired tablet is Ready. The gates run in
//! that order and the first refusal wins, so a tablet still draining never
//! costs a topology lookup. Everything here is safe to re-run every pass.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use metrics::counter;
use tracing::{debug, warn};
use vtshard_core::{drain, ConditionStatus, ObjectKey, OrphanStatus, TabletAlias, TabletStatus};
use vtshard_kubehub::ObjectStore;
use vtshard_topo::TopoServer;

pub const DRAINING: &str = "Draining";
pub const PRIMARY_UNKNOWN: &str = "PrimaryUnknown";
pub const PRIMARY: &str = "Primary";
pub const SHARD_NOT_HEALTHY: &str = "ShardNotHealthy";
pub const POD_EXISTS: &str = "PodExists";

pub const DRAIN_REASON: &str = "turning down unwanted tablet";

/// Outcome of asking the topology service who the primary is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryCheck {
    Primary,
    NotPrimary,
    /// Lookup failed or timed out. Treated as "maybe primary".
    Unknown,
}

/// Compare `alias` with the primary in the global shard record. The tablet's
/// own view of its role is not consulted.
pub async fn check_primary<T: TopoServer + ?Sized>(
    topo: &T,
    keyspace: &str,
    shard: &str,
    alias: &TabletAlias,
    timeout: Duration,
) -> PrimaryCheck {
    let check = match tokio::time::timeout(timeout, topo.get_shard(keyspace, shard)).await {
        Ok(Ok(record)) if record.primary_alias.as_ref() == Some(alias) => PrimaryCheck::Primary,
        Ok(Ok(_)) => PrimaryCheck::NotPrimary,
        Ok(Err(e)) => {
            warn!(keyspace, shard, alias = %alias, error = %e, "primary lookup failed");
            PrimaryCheck::Unknown
        }
        Err(_) => {
            warn!(keyspace, shard, alias = %alias, timeout_ms = timeout.as_millis() as u64, "primary lookup timed out");
            PrimaryCheck::Unknown
        }
    };
    let outcome = match check {
        PrimaryCheck::Primary => "primary",
        PrimaryCheck::NotPrimary => "not_primary",
        PrimaryCheck::Unknown => "unknown",
    };
    counter!("topo_primary_lookup_total", 1u64, "outcome" => outcome);
    check
}

/// Where to look up the primary for a pod's shard.
pub struct PrimaryLookup<'a, T: ?Sized> {
    pub topo: &'a T,
    pub keyspace: &'a str,
    pub shard: &'a str,
    pub timeout: Duration,
}

/// Gate for an unwanted tablet pod. `None` authorizes deletion.
/// May start a drain on `pod`; the caller persists that.
pub async fn tablet_pod_turndown<T: TopoServer + ?Sized>(
    pod: &mut Pod,
    alias: Option<&TabletAlias>,
    lookup: &PrimaryLookup<'_, T>,
    desired: &BTreeMap<String, TabletStatus>,
) -> Option<OrphanStatus> {
    if !drain::finished(&pod.metadata) {
        if drain::start(&mut pod.metadata, DRAIN_REASON) {
            debug!(pod = ?pod.metadata.name, "drain requested");
        }
        return Some(OrphanStatus::new(DRAINING, "waiting for the tablet to be drained before turn-down"));
    }

    let check = match alias {
        Some(alias) => check_primary(lookup.topo, lookup.keyspace, lookup.shard, alias, lookup.timeout).await,
        None => PrimaryCheck::Unknown,
    };
    match check {
        PrimaryCheck::Unknown => {
            return Some(OrphanStatus::new(PRIMARY_UNKNOWN, "unable to determine whether this tablet is the primary"));
        }
        PrimaryCheck::Primary => return Some(OrphanStatus::new(PRIMARY, "this tablet is the primary")),
        PrimaryCheck::NotPrimary => {}
    }

    // Desired tablets were all processed earlier in this pass.
    if desired.values().any(|t| t.ready != ConditionStatus::True) {
        return Some(OrphanStatus::new(
            SHARD_NOT_HEALTHY,
            "the remaining, desired tablets in the shard are not all healthy",
        ));
    }
    None
}

/// Gate for an unwanted data volume claim: only once its pod is confirmed gone.
pub async fn claim_turndown<S: ObjectStore>(store: &S, key: &ObjectKey) -> Option<OrphanStatus> {
    match store.get::<Pod>(key).await {
        Ok(None) => None,
        Ok(Some(_)) => Some(OrphanStatus::new(POD_EXISTS, "not deleting tablet PVC because tablet Pod still exists")),
        Err(e) => {
            debug!(key = %key, error = %e, "pod lookup failed; keeping claim");
            Some(OrphanStatus::new(POD_EXISTS, "not deleting tablet PVC because tablet Pod still exists"))
        }
    }
}

//! vtshard reconciler: drive one kind of child object toward a desired key set.
//!
//! The engine is kind-agnostic. Everything kind-specific (how to build an
//! object, what may change in place, how to report status, whether an
//! unwanted object may go) lives behind [`Strategy`].
//!
//! Per pass and kind: list live objects by selector, create missing keys,
//! update existing ones, then hand every live object that is no longer
//! desired to [`Strategy::prepare_for_turndown`]. Desired objects are always
//! processed before orphans so turndown checks see this pass's status.
//! Failures are collected per object and never stop the rest of the set.

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::chrono::Utc;
use metrics::counter;
use tracing::{debug, info, warn};
use vtshard_core::{rollout, ObjectKey, OrphanStatus};
use vtshard_kubehub::{key_of, kind_of, ManagedObject, ObjectStore, Op, StoreError};

mod diff;
pub mod results;

pub use diff::changed_paths;
pub use results::{Builder, PassError, PassResult};

/// Kind-specific callbacks. Everything but [`Strategy::new_object`] defaults
/// to a no-op, and turndown defaults to "delete now".
#[allow(unused_variables)]
#[async_trait::async_trait]
pub trait Strategy<K: ManagedObject>: Send {
    /// Build the object for a desired key. `None` skips the key.
    fn new_object(&mut self, key: &ObjectKey) -> Option<K>;

    /// Apply changes that can be made without a restart.
    fn update_in_place(&mut self, key: &ObjectKey, obj: &mut K) {}

    /// Apply changes that need the object to be recreated. Runs on a copy;
    /// the engine decides whether the result is rolled out.
    async fn update_rolling_recreate(&mut self, key: &ObjectKey, obj: &mut K) {}

    /// Project a desired object into the parent's status.
    fn status(&mut self, key: &ObjectKey, obj: &K) {}

    /// Record why an unwanted object is being kept.
    fn orphan_status(&mut self, key: &ObjectKey, obj: &K, status: &OrphanStatus) {}

    /// `None` authorizes deletion. Annotation changes made to `obj` are
    /// persisted when deletion is refused.
    async fn prepare_for_turndown(&mut self, key: &ObjectKey, obj: &mut K) -> Option<OrphanStatus> {
        None
    }

    /// Called for every failed store call on a key.
    fn object_error(&mut self, key: &ObjectKey, err: &ObjectError) {}
}

/// One kind's desired state for a pass.
#[derive(Debug, Clone)]
pub struct ObjectSet<'a> {
    pub namespace: &'a str,
    pub selector: &'a BTreeMap<String, String>,
    pub keys: &'a [ObjectKey],
    /// Recreate as soon as a restart-requiring change is seen, instead of
    /// waiting for the object to be released.
    pub release_immediately: bool,
}

#[derive(Debug, thiserror::Error)]
#[error("{op} {kind} {key}: {source}")]
pub struct ObjectError {
    pub kind: String,
    pub key: ObjectKey,
    pub op: Op,
    #[source]
    pub source: StoreError,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("listing {kind}: {source}")]
    List {
        kind: String,
        #[source]
        source: StoreError,
    },
    #[error("{} {kind} object(s) failed: {}", .errors.len(), summarize(.errors))]
    Objects { kind: String, errors: Vec<ObjectError> },
}

fn summarize(errors: &[ObjectError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// What one call did. Keys are listed in processing order.
#[derive(Debug, Default)]
pub struct ObjectSetReport {
    pub kind: String,
    pub created: Vec<ObjectKey>,
    pub updated: Vec<ObjectKey>,
    /// Deleted so the next pass recreates them with pending changes.
    pub recreated: Vec<ObjectKey>,
    pub deleted: Vec<ObjectKey>,
    pub orphaned: BTreeMap<ObjectKey, OrphanStatus>,
    pub errors: Vec<ObjectError>,
}

impl ObjectSetReport {
    /// Aggregate of the per-object errors, if any.
    pub fn into_result(self) -> Result<(), ReconcileError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ReconcileError::Objects { kind: self.kind, errors: self.errors })
        }
    }
}

struct Run<'s, K, St> {
    kind: String,
    strategy: &'s mut St,
    report: ObjectSetReport,
    _kind: std::marker::PhantomData<K>,
}

impl<'s, K: ManagedObject, St: Strategy<K>> Run<'s, K, St> {
    fn fail(&mut self, key: &ObjectKey, op: Op, source: StoreError) {
        warn!(kind = %self.kind, key = %key, op = %op, error = %source, "object operation failed");
        counter!("reconcile_object_errors_total", 1u64, "kind" => self.kind.clone(), "op" => op.as_str());
        let err = ObjectError { kind: self.kind.clone(), key: key.clone(), op, source };
        self.strategy.object_error(key, &err);
        self.report.errors.push(err);
    }
}

/// Reconcile one kind. Only a failed list aborts the call; every other
/// failure is recorded in the report.
pub async fn reconcile_object_set<K, S, St>(
    store: &S,
    set: &ObjectSet<'_>,
    strategy: &mut St,
) -> Result<ObjectSetReport, ReconcileError>
where
    K: ManagedObject,
    S: ObjectStore,
    St: Strategy<K>,
{
    let kind = kind_of::<K>();
    let live_list: Vec<K> = store
        .list(set.namespace, set.selector)
        .await
        .map_err(|source| ReconcileError::List { kind: kind.clone(), source })?;

    let mut live: BTreeMap<ObjectKey, K> = BTreeMap::new();
    for obj in live_list {
        match key_of(&obj) {
            Ok(key) => {
                live.insert(key, obj);
            }
            Err(e) => warn!(kind = %kind, error = %e, "skipping live object without a key"),
        }
    }

    let mut run = Run {
        kind: kind.clone(),
        strategy,
        report: ObjectSetReport { kind: kind.clone(), ..Default::default() },
        _kind: std::marker::PhantomData,
    };

    let mut desired = BTreeSet::new();
    for key in set.keys {
        if !desired.insert(key.clone()) {
            continue;
        }
        match live.get(key) {
            None => create(store, &mut run, key).await,
            Some(current) => update(store, &mut run, key, current, set.release_immediately).await,
        }
    }

    for (key, current) in &live {
        if desired.contains(key) {
            continue;
        }
        turn_down(store, &mut run, key, current).await;
    }

    Ok(run.report)
}

async fn create<K, S, St>(store: &S, run: &mut Run<'_, K, St>, key: &ObjectKey)
where
    K: ManagedObject,
    S: ObjectStore,
    St: Strategy<K>,
{
    let Some(obj) = run.strategy.new_object(key) else {
        debug!(kind = %run.kind, key = %key, "nothing to create");
        return;
    };
    match store.create(&obj).await {
        Ok(created) => {
            info!(kind = %run.kind, key = %key, "created");
            counter!("reconcile_objects_created_total", 1u64, "kind" => run.kind.clone());
            run.strategy.status(key, &created);
            run.report.created.push(key.clone());
        }
        Err(e) => run.fail(key, Op::Create, e),
    }
}

async fn update<K, S, St>(store: &S, run: &mut Run<'_, K, St>, key: &ObjectKey, current: &K, release_immediately: bool)
where
    K: ManagedObject,
    S: ObjectStore,
    St: Strategy<K>,
{
    let mut next = current.clone();
    run.strategy.update_in_place(key, &mut next);

    let mut recreated = next.clone();
    run.strategy.update_rolling_recreate(key, &mut recreated).await;
    let pending = match (serde_json::to_value(&recreated), serde_json::to_value(&next)) {
        (Ok(a), Ok(b)) => changed_paths(&a, &b),
        (Err(e), _) | (_, Err(e)) => {
            run.fail(key, Op::Update, StoreError::Codec(e));
            Vec::new()
        }
    };

    if pending.is_empty() {
        rollout::unschedule(next.meta_mut());
    } else if release_immediately || rollout::released(current.meta()) {
        match store.delete::<K>(key).await {
            Ok(()) => {
                info!(kind = %run.kind, key = %key, changes = %pending.join(", "), "deleted for recreate");
                counter!("reconcile_objects_deleted_total", 1u64, "kind" => run.kind.clone(), "reason" => "recreate");
                run.report.recreated.push(key.clone());
                // Status must see it going down for the rest of the pass.
                next.meta_mut().deletion_timestamp.get_or_insert_with(|| Time(Utc::now()));
            }
            Err(e) => run.fail(key, Op::Delete, e),
        }
        run.strategy.status(key, &next);
        return;
    } else {
        rollout::schedule(next.meta_mut(), &pending.join(", "));
    }

    if &next == current {
        debug!(kind = %run.kind, key = %key, "up to date");
        run.strategy.status(key, current);
        return;
    }
    match store.update(&next).await {
        Ok(written) => {
            info!(kind = %run.kind, key = %key, "updated");
            counter!("reconcile_objects_updated_total", 1u64, "kind" => run.kind.clone());
            run.strategy.status(key, &written);
            run.report.updated.push(key.clone());
        }
        Err(e) => {
            run.fail(key, Op::Update, e);
            run.strategy.status(key, current);
        }
    }
}

async fn turn_down<K, S, St>(store: &S, run: &mut Run<'_, K, St>, key: &ObjectKey, current: &K)
where
    K: ManagedObject,
    S: ObjectStore,
    St: Strategy<K>,
{
    if current.meta().deletion_timestamp.is_some() {
        debug!(kind = %run.kind, key = %key, "already terminating");
        return;
    }
    let mut obj = current.clone();
    match run.strategy.prepare_for_turndown(key, &mut obj).await {
        Some(orphan) => {
            if &obj != current {
                match store.update(&obj).await {
                    Ok(written) => obj = written,
                    Err(e) => run.fail(key, Op::Update, e),
                }
            }
            info!(kind = %run.kind, key = %key, reason = %orphan.reason, "keeping unwanted object");
            counter!("reconcile_objects_orphaned_total", 1u64, "kind" => run.kind.clone(), "reason" => orphan.reason.clone());
            run.strategy.orphan_status(key, &obj, &orphan);
            run.report.orphaned.insert(key.clone(), orphan);
        }
        None => match store.delete::<K>(key).await {
            Ok(()) => {
                info!(kind = %run.kind, key = %key, "deleted");
                counter!("reconcile_objects_deleted_total", 1u64, "kind" => run.kind.clone(), "reason" => "turndown");
                run.report.deleted.push(key.clone());
            }
            Err(e) => run.fail(key, Op::Delete, e),
        },
    }
}

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use vtshard_core::{rollout, ObjectKey, OrphanStatus};
use vtshard_kubehub::{MemoryStore, ObjectStore, Op};
use vtshard_reconciler::{reconcile_object_set, ObjectError, ObjectSet, Strategy};

const NS: &str = "ns";

fn selector() -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), "demo".to_string())])
}

fn cm(name: &str, value: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(NS.into()),
            labels: Some(selector()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([("value".to_string(), value.to_string())])),
        ..Default::default()
    }
}

/// `data.value` needs a recreate; the `tier` label is updated in place.
#[derive(Default)]
struct Demo {
    values: BTreeMap<String, String>,
    tier: String,
    refuse: Option<&'static str>,
    seen: Vec<String>,
    terminating: Vec<String>,
    orphans: Vec<String>,
    errors: Vec<String>,
}

#[async_trait::async_trait]
impl Strategy<ConfigMap> for Demo {
    fn new_object(&mut self, key: &ObjectKey) -> Option<ConfigMap> {
        self.values.get(&key.name).map(|v| cm(&key.name, v))
    }

    fn update_in_place(&mut self, _key: &ObjectKey, obj: &mut ConfigMap) {
        if !self.tier.is_empty() {
            obj.metadata.labels.get_or_insert_with(Default::default).insert("tier".into(), self.tier.clone());
        }
    }

    async fn update_rolling_recreate(&mut self, key: &ObjectKey, obj: &mut ConfigMap) {
        if let Some(v) = self.values.get(&key.name) {
            obj.data.get_or_insert_with(Default::default).insert("value".into(), v.clone());
        }
    }

    fn status(&mut self, key: &ObjectKey, obj: &ConfigMap) {
        self.seen.push(key.name.clone());
        if obj.metadata.deletion_timestamp.is_some() {
            self.terminating.push(key.name.clone());
        }
    }

    fn orphan_status(&mut self, key: &ObjectKey, _obj: &ConfigMap, status: &OrphanStatus) {
        self.orphans.push(format!("{}:{}", key.name, status.reason));
    }

    async fn prepare_for_turndown(&mut self, _key: &ObjectKey, obj: &mut ConfigMap) -> Option<OrphanStatus> {
        let reason = self.refuse?;
        obj.metadata.annotations.get_or_insert_with(Default::default).insert("blocked".into(), reason.into());
        Some(OrphanStatus::new(reason, "not yet"))
    }

    fn object_error(&mut self, key: &ObjectKey, err: &ObjectError) {
        self.errors.push(format!("{}:{}", key.name, err.op));
    }
}

fn keys(names: &[&str]) -> Vec<ObjectKey> {
    names.iter().map(|n| ObjectKey::new(NS, *n)).collect()
}

fn demo(pairs: &[(&str, &str)]) -> Demo {
    Demo { values: pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(), ..Default::default() }
}

async fn run(store: &MemoryStore, demo: &mut Demo, names: &[&str], immediate: bool) -> vtshard_reconciler::ObjectSetReport {
    let sel = selector();
    let keys = keys(names);
    let set = ObjectSet { namespace: NS, selector: &sel, keys: &keys, release_immediately: immediate };
    reconcile_object_set::<ConfigMap, _, _>(store, &set, demo).await.expect("list")
}

#[tokio::test]
async fn creates_missing_and_reports_status_for_all_desired() {
    let store = MemoryStore::new();
    store.insert(&cm("b", "1")).expect("seed");
    let mut d = demo(&[("a", "1"), ("b", "1")]);

    let report = run(&store, &mut d, &["a", "b"], false).await;
    assert_eq!(report.created, keys(&["a"]));
    assert!(report.updated.is_empty());
    assert_eq!(d.seen, vec!["a", "b"]);
    assert_eq!(store.names::<ConfigMap>(), vec!["a", "b"]);

    // Second pass is a no-op.
    let report = run(&store, &mut d, &["a", "b"], false).await;
    assert!(report.created.is_empty() && report.updated.is_empty());
}

#[tokio::test]
async fn in_place_changes_are_written_without_scheduling() {
    let store = MemoryStore::new();
    store.insert(&cm("a", "1")).expect("seed");
    let mut d = demo(&[("a", "1")]);
    d.tier = "gold".into();

    let report = run(&store, &mut d, &["a"], false).await;
    assert_eq!(report.updated, keys(&["a"]));
    let live: ConfigMap = store.fetch(&ObjectKey::new(NS, "a")).expect("live");
    assert_eq!(live.metadata.labels.as_ref().and_then(|l| l.get("tier").cloned()).as_deref(), Some("gold"));
    assert_eq!(rollout::scheduled(&live.metadata), None);
}

#[tokio::test]
async fn recreate_changes_wait_for_release() {
    let store = MemoryStore::new();
    store.insert(&cm("a", "1")).expect("seed");
    let mut d = demo(&[("a", "2")]);

    let report = run(&store, &mut d, &["a"], false).await;
    assert_eq!(report.updated, keys(&["a"]));
    let key = ObjectKey::new(NS, "a");
    let mut live: ConfigMap = store.fetch(&key).expect("live");
    assert_eq!(rollout::scheduled(&live.metadata), Some("data.value"));
    // Data itself is untouched until released.
    assert_eq!(live.data.as_ref().and_then(|m| m.get("value")).map(String::as_str), Some("1"));

    live.metadata.annotations.get_or_insert_with(Default::default).insert(rollout::RELEASED_ANNOTATION.into(), "true".into());
    store.update(&live).await.expect("release");
    let report = run(&store, &mut d, &["a"], false).await;
    assert_eq!(report.recreated, keys(&["a"]));
    assert!(store.fetch::<ConfigMap>(&key).is_none());

    let report = run(&store, &mut d, &["a"], false).await;
    assert_eq!(report.created, keys(&["a"]));
    let live: ConfigMap = store.fetch(&key).expect("recreated");
    assert_eq!(live.data.as_ref().and_then(|m| m.get("value")).map(String::as_str), Some("2"));
    assert_eq!(rollout::scheduled(&live.metadata), None);
}

#[tokio::test]
async fn immediate_release_recreates_at_once() {
    let store = MemoryStore::new();
    store.insert(&cm("a", "1")).expect("seed");
    let mut d = demo(&[("a", "2")]);
    let report = run(&store, &mut d, &["a"], true).await;
    assert_eq!(report.recreated, keys(&["a"]));
    assert_eq!(d.seen, vec!["a"]);
    // Status sees the object as going down, not as still serving.
    assert_eq!(d.terminating, vec!["a"]);
}

#[tokio::test]
async fn failed_recreate_delete_reports_live_object() {
    let store = MemoryStore::new();
    store.insert(&cm("a", "1")).expect("seed");
    store.reject(Op::Delete, "a");
    let mut d = demo(&[("a", "2")]);
    let report = run(&store, &mut d, &["a"], true).await;
    assert!(report.recreated.is_empty());
    assert_eq!(d.errors, vec!["a:delete"]);
    assert_eq!(d.seen, vec!["a"]);
    assert!(d.terminating.is_empty());
}

#[tokio::test]
async fn orphans_are_deleted_or_recorded() {
    let store = MemoryStore::new();
    store.insert(&cm("keep", "1")).expect("seed");
    store.insert(&cm("old", "1")).expect("seed");
    let mut d = demo(&[("keep", "1")]);
    d.refuse = Some("Draining");

    let report = run(&store, &mut d, &["keep"], false).await;
    assert!(report.deleted.is_empty());
    assert_eq!(report.orphaned.get(&ObjectKey::new(NS, "old")).map(|o| o.reason.as_str()), Some("Draining"));
    assert_eq!(d.orphans, vec!["old:Draining"]);
    // Changes made while refusing are persisted.
    let old: ConfigMap = store.fetch(&ObjectKey::new(NS, "old")).expect("kept");
    assert!(old.metadata.annotations.map(|a| a.contains_key("blocked")).unwrap_or(false));

    d.refuse = None;
    let report = run(&store, &mut d, &["keep"], false).await;
    assert_eq!(report.deleted, keys(&["old"]));
    assert_eq!(store.names::<ConfigMap>(), vec!["keep"]);
}

#[tokio::test]
async fn terminating_orphans_are_skipped() {
    let store = MemoryStore::new();
    let mut gone = cm("gone", "1");
    gone.metadata.deletion_timestamp = Some(Time(k8s_openapi::chrono::Utc::now()));
    store.insert(&gone).expect("seed");
    let mut d = demo(&[]);
    d.refuse = Some("Draining");
    let report = run(&store, &mut d, &[], false).await;
    assert!(report.orphaned.is_empty() && report.deleted.is_empty());
    assert!(d.orphans.is_empty());
}

#[tokio::test]
async fn one_failure_does_not_stop_the_rest() {
    let store = MemoryStore::new();
    store.insert(&cm("old", "1")).expect("seed");
    store.reject(Op::Create, "a");
    store.reject(Op::Delete, "old");
    let mut d = demo(&[("a", "1"), ("b", "1")]);

    let report = run(&store, &mut d, &["a", "b"], false).await;
    assert_eq!(report.created, keys(&["b"]));
    assert_eq!(d.errors, vec!["a:create", "old:delete"]);
    let err = report.into_result().expect_err("aggregate");
    assert!(err.to_string().contains("2 ConfigMap object(s) failed"), "{}", err);
}

//! In-memory object store. Objects are kept as JSON so one store can hold any kind.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde_json::Value as Json;
use uuid::Uuid;
use vtshard_core::{labels::matches_selector, ObjectKey};

use crate::{key_of, kind_of, ManagedObject, ObjectStore, Op, StoreError};

type Slot = (String, ObjectKey);

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<Slot, Json>>,
    rejected: Mutex<BTreeSet<(Op, String)>>,
    rv: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    /// Seed an object as if it already existed, bypassing rejections.
    pub fn insert<K: ManagedObject>(&self, obj: &K) -> Result<(), StoreError> {
        let key = key_of(obj)?;
        let stamped = self.stamp(obj.clone(), true);
        lock(&self.objects).insert((kind_of::<K>(), key), serde_json::to_value(&stamped)?);
        Ok(())
    }

    /// Make every `op` against the object named `name` fail.
    pub fn reject(&self, op: Op, name: &str) {
        lock(&self.rejected).insert((op, name.to_string()));
    }

    pub fn allow(&self, op: Op, name: &str) {
        lock(&self.rejected).remove(&(op, name.to_string()));
    }

    /// Names of stored objects of kind `K`, sorted.
    pub fn names<K: ManagedObject>(&self) -> Vec<String> {
        let kind = kind_of::<K>();
        lock(&self.objects).keys().filter(|(k, _)| *k == kind).map(|(_, key)| key.name.clone()).collect()
    }

    pub fn fetch<K: ManagedObject>(&self, key: &ObjectKey) -> Option<K> {
        let raw = lock(&self.objects).get(&(kind_of::<K>(), key.clone())).cloned()?;
        serde_json::from_value(raw).ok()
    }

    fn check(&self, op: Op, key: &ObjectKey, kind: &str) -> Result<(), StoreError> {
        if lock(&self.rejected).contains(&(op, key.name.clone())) {
            return Err(StoreError::Rejected { op, kind: kind.to_string(), key: key.clone() });
        }
        Ok(())
    }

    fn stamp<K: ManagedObject>(&self, mut obj: K, fresh: bool) -> K {
        let rv = self.rv.fetch_add(1, Ordering::Relaxed) + 1;
        let meta = obj.meta_mut();
        if fresh && meta.uid.is_none() {
            meta.uid = Some(Uuid::new_v4().to_string());
        }
        meta.resource_version = Some(rv.to_string());
        obj
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: ManagedObject>(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        let kind = kind_of::<K>();
        self.check(Op::Get, key, &kind)?;
        let raw = lock(&self.objects).get(&(kind, key.clone())).cloned();
        match raw {
            Some(v) => Ok(Some(serde_json::from_value(v)?)),
            None => Ok(None),
        }
    }

    async fn list<K: ManagedObject>(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<K>, StoreError> {
        let kind = kind_of::<K>();
        let raws: Vec<Json> = lock(&self.objects)
            .iter()
            .filter(|((k, key), _)| *k == kind && key.namespace == namespace)
            .map(|(_, v)| v.clone())
            .collect();
        let mut out = Vec::with_capacity(raws.len());
        for raw in raws {
            let obj: K = serde_json::from_value(raw)?;
            if matches_selector(obj.meta().labels.as_ref(), selector) {
                out.push(obj);
            }
        }
        Ok(out)
    }

    async fn create<K: ManagedObject>(&self, obj: &K) -> Result<K, StoreError> {
        let kind = kind_of::<K>();
        let key = key_of(obj)?;
        self.check(Op::Create, &key, &kind)?;
        let mut objects = lock(&self.objects);
        let slot = (kind.clone(), key.clone());
        if objects.contains_key(&slot) {
            return Err(StoreError::AlreadyExists { kind, key });
        }
        let created = self.stamp(obj.clone(), true);
        objects.insert(slot, serde_json::to_value(&created)?);
        Ok(created)
    }

    async fn update<K: ManagedObject>(&self, obj: &K) -> Result<K, StoreError> {
        let kind = kind_of::<K>();
        let key = key_of(obj)?;
        self.check(Op::Update, &key, &kind)?;
        let mut objects = lock(&self.objects);
        let slot = (kind.clone(), key.clone());
        if !objects.contains_key(&slot) {
            return Err(StoreError::NotFound { kind, key });
        }
        let updated = self.stamp(obj.clone(), false);
        objects.insert(slot, serde_json::to_value(&updated)?);
        Ok(updated)
    }

    async fn delete<K: ManagedObject>(&self, key: &ObjectKey) -> Result<(), StoreError> {
        let kind = kind_of::<K>();
        self.check(Op::Delete, key, &kind)?;
        lock(&self.objects).remove(&(kind, key.clone()));
        Ok(())
    }
}

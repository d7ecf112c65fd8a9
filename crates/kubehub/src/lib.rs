//! vtshard kubehub: the cluster object store seam.
//!
//! [`ObjectStore`] is the only way the reconciler touches the cluster.
//! [`KubeStore`] talks to the API server through kube-rs; [`MemoryStore`]
//! keeps objects in memory for tests and dry runs.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt::Debug;

use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    Client,
};
use metrics::counter;
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;
use vtshard_core::{labels::selector_string, ObjectKey};

mod memory;

pub use kube::Resource;
pub use memory::MemoryStore;

/// Any namespaced, statically typed kube resource (Pod, PersistentVolumeClaim, ...).
pub trait ManagedObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + PartialEq
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<T> ManagedObject for T where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + PartialEq
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

pub fn kind_of<K: ManagedObject>() -> String {
    K::kind(&()).to_string()
}

/// Store operation, for error reporting and write rejection in [`MemoryStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Op {
    Get,
    List,
    Create,
    Update,
    Delete,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Get => "get",
            Op::List => "list",
            Op::Create => "create",
            Op::Update => "update",
            Op::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: ObjectKey },
    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: String, key: ObjectKey },
    #[error("{kind} {key} was modified concurrently")]
    Conflict { kind: String, key: ObjectKey },
    #[error("{kind} object has no name or namespace")]
    MissingKey { kind: String },
    #[error("{op} {kind} {key} rejected")]
    Rejected { op: Op, kind: String, key: ObjectKey },
    #[error("kube api: {0}")]
    Kube(#[from] kube::Error),
    #[error("encoding object: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Key of an object from its own metadata.
pub fn key_of<K: ManagedObject>(obj: &K) -> Result<ObjectKey, StoreError> {
    let meta = obj.meta();
    match (meta.namespace.as_deref(), meta.name.as_deref()) {
        (Some(ns), Some(name)) => Ok(ObjectKey::new(ns, name)),
        _ => Err(StoreError::MissingKey { kind: kind_of::<K>() }),
    }
}

/// Minimal CRUD over namespaced objects of one kind at a time.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// `Ok(None)` when the object does not exist.
    async fn get<K: ManagedObject>(&self, key: &ObjectKey) -> Result<Option<K>, StoreError>;
    async fn list<K: ManagedObject>(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<K>, StoreError>;
    async fn create<K: ManagedObject>(&self, obj: &K) -> Result<K, StoreError>;
    async fn update<K: ManagedObject>(&self, obj: &K) -> Result<K, StoreError>;
    /// Deleting an object that is already gone is not an error.
    async fn delete<K: ManagedObject>(&self, key: &ObjectKey) -> Result<(), StoreError>;
}

pub async fn get_kube_client() -> Result<Client, StoreError> {
    Ok(Client::try_default().await?)
}

/// Store backed by the API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self { Self { client } }

    pub async fn try_default() -> Result<Self, StoreError> {
        Ok(Self::new(get_kube_client().await?))
    }

    fn api<K: ManagedObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn classify<K: ManagedObject>(key: &ObjectKey, err: kube::Error) -> StoreError {
    match &err {
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound { kind: kind_of::<K>(), key: key.clone() },
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            StoreError::AlreadyExists { kind: kind_of::<K>(), key: key.clone() }
        }
        kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict { kind: kind_of::<K>(), key: key.clone() },
        _ => StoreError::Kube(err),
    }
}

fn record<K: ManagedObject>(op: Op) {
    counter!("store_requests_total", 1u64, "op" => op.as_str(), "kind" => kind_of::<K>());
}

#[async_trait::async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: ManagedObject>(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        record::<K>(Op::Get);
        self.api::<K>(&key.namespace).get_opt(&key.name).await.map_err(|e| classify::<K>(key, e))
    }

    async fn list<K: ManagedObject>(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<K>, StoreError> {
        record::<K>(Op::List);
        let mut lp = ListParams::default();
        if !selector.is_empty() {
            lp = lp.labels(&selector_string(selector));
        }
        let list = self.api::<K>(namespace).list(&lp).await?;
        debug!(kind = %kind_of::<K>(), ns = %namespace, count = list.items.len(), "listed");
        Ok(list.items)
    }

    async fn create<K: ManagedObject>(&self, obj: &K) -> Result<K, StoreError> {
        record::<K>(Op::Create);
        let key = key_of(obj)?;
        self.api::<K>(&key.namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| classify::<K>(&key, e))
    }

    async fn update<K: ManagedObject>(&self, obj: &K) -> Result<K, StoreError> {
        record::<K>(Op::Update);
        let key = key_of(obj)?;
        self.api::<K>(&key.namespace)
            .replace(&key.name, &PostParams::default(), obj)
            .await
            .map_err(|e| classify::<K>(&key, e))
    }

    async fn delete<K: ManagedObject>(&self, key: &ObjectKey) -> Result<(), StoreError> {
        record::<K>(Op::Delete);
        match self.api::<K>(&key.namespace).delete(&key.name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) => match classify::<K>(key, e) {
                StoreError::NotFound { .. } => Ok(()),
                other => Err(other),
            },
        }
    }
}

use std::marker::PhantomData;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::client::Client;
use kube::runtime::watcher::{watcher, Error as WatcherError, Event};
use tokio::time::timeout;

use crate::error::{ClientError, ClientResult};
use crate::k8s::{kind_of, KubeObject, API_TIMEOUT};

/// A result type used for watcher events coming from K8s.
pub type WatchEventResult<K> = std::result::Result<Event<K>, WatcherError>;

/// Typed access to the namespaced objects of a single kind.
#[async_trait]
pub trait ResourceClient<K: KubeObject>: Send + Sync {
    /// Fetch an object from the K8s API.
    async fn get(&self, namespace: &str, name: &str) -> ClientResult<K>;

    /// List objects from the K8s API, from all namespaces if `namespace` is empty.
    async fn list(&self, namespace: &str, params: &ListParams) -> ClientResult<Vec<K>>;

    /// Open a watch stream, from all namespaces if `namespace` is empty.
    fn watch(&self, namespace: &str, params: ListParams) -> BoxStream<'static, WatchEventResult<K>>;

    /// Create a new object.
    async fn create(&self, obj: &K) -> ClientResult<K>;

    /// Replace an existing object. The object's resource version must be current.
    async fn update(&self, obj: &K) -> ClientResult<K>;

    /// Apply a JSON merge patch to the status sub-resource of an object.
    async fn patch_status(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> ClientResult<K>;

    /// Delete an object. Deleting an object which does not exist is not an error.
    async fn delete(&self, namespace: &str, name: &str) -> ClientResult<()>;
}

/// A `ResourceClient` backed by the K8s API.
pub struct KubeClient<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K: KubeObject> KubeClient<K> {
    /// Create a new instance.
    pub fn new(client: Client) -> Self {
        Self { client, _kind: PhantomData }
    }

    fn api(&self, namespace: &str) -> Api<K> {
        if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        }
    }
}

fn object_name<K: KubeObject>(obj: &K) -> &str {
    obj.meta().name.as_deref().unwrap_or_default()
}

fn object_namespace<K: KubeObject>(obj: &K) -> &str {
    obj.meta().namespace.as_deref().unwrap_or_default()
}

#[async_trait]
impl<K: KubeObject> ResourceClient<K> for KubeClient<K> {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn get(&self, namespace: &str, name: &str) -> ClientResult<K> {
        timeout(API_TIMEOUT, self.api(namespace).get(name))
            .await
            .map_err(|_| ClientError::Timeout(format!("get {} {}/{}", kind_of::<K>(), namespace, name)))?
            .map_err(ClientError::from)
    }

    #[tracing::instrument(level = "debug", skip(self, params))]
    async fn list(&self, namespace: &str, params: &ListParams) -> ClientResult<Vec<K>> {
        timeout(API_TIMEOUT, self.api(namespace).list(params))
            .await
            .map_err(|_| ClientError::Timeout(format!("list {} in {:?}", kind_of::<K>(), namespace)))?
            .map(|list| list.items)
            .map_err(ClientError::from)
    }

    fn watch(&self, namespace: &str, params: ListParams) -> BoxStream<'static, WatchEventResult<K>> {
        watcher(self.api(namespace), params).boxed()
    }

    #[tracing::instrument(level = "debug", skip(self, obj), fields(name = object_name(obj), namespace = object_namespace(obj)))]
    async fn create(&self, obj: &K) -> ClientResult<K> {
        tracing::info!(kind = %kind_of::<K>(), "creating object");
        let (namespace, name) = (object_namespace(obj), object_name(obj));
        timeout(API_TIMEOUT, self.api(namespace).create(&PostParams::default(), obj))
            .await
            .map_err(|_| ClientError::Timeout(format!("create {} {}/{}", kind_of::<K>(), namespace, name)))?
            .map_err(ClientError::from)
    }

    #[tracing::instrument(level = "debug", skip(self, obj), fields(name = object_name(obj), namespace = object_namespace(obj)))]
    async fn update(&self, obj: &K) -> ClientResult<K> {
        tracing::info!(kind = %kind_of::<K>(), "updating object");
        let (namespace, name) = (object_namespace(obj), object_name(obj));
        timeout(API_TIMEOUT, self.api(namespace).replace(name, &PostParams::default(), obj))
            .await
            .map_err(|_| ClientError::Timeout(format!("update {} {}/{}", kind_of::<K>(), namespace, name)))?
            .map_err(ClientError::from)
    }

    #[tracing::instrument(level = "debug", skip(self, patch))]
    async fn patch_status(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> ClientResult<K> {
        timeout(API_TIMEOUT, self.api(namespace).patch_status(name, &PatchParams::default(), &Patch::Merge(patch)))
            .await
            .map_err(|_| ClientError::Timeout(format!("patch status of {} {}/{}", kind_of::<K>(), namespace, name)))?
            .map_err(ClientError::from)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn delete(&self, namespace: &str, name: &str) -> ClientResult<()> {
        tracing::info!(kind = %kind_of::<K>(), "deleting object");
        let res = timeout(API_TIMEOUT, self.api(namespace).delete(name, &DeleteParams::default()))
            .await
            .map_err(|_| ClientError::Timeout(format!("delete {} {}/{}", kind_of::<K>(), namespace, name)))?;
        match res {
            Ok(_val) => Ok(()),
            Err(err) => match ClientError::from(err) {
                err if err.is_not_found() => Ok(()),
                err => Err(err),
            },
        }
    }
}

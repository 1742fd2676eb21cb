//! Kubernetes plumbing.
//!
//! A small typed access surface over the K8s API shared by every controller: a client per kind,
//! a local cache (`Indexer`) kept up-to-date by an `Informer`, a de-duplicating `WorkQueue` and
//! an `EventRecorder` publishing K8s events.

mod client;
mod events;
mod indexer;
mod informer;
mod resolver;
mod workqueue;

use std::fmt::Debug;
use std::time::Duration;

use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use client::{KubeClient, ResourceClient, WatchEventResult};
pub use events::{EventRecorder, EventType, KubeRecorder};
pub use indexer::Indexer;
pub use informer::{EventHandler, FilteringHandler, Informer};
pub use resolver::{UriResolver, CLUSTER_DOMAIN};
pub use workqueue::WorkQueue;

/// The default timeout to use for API calls.
pub const API_TIMEOUT: Duration = Duration::from_secs(5);

/// The bounds shared by every K8s object type handled by the operator.
pub trait KubeObject: Resource<DynamicType = ()> + Clone + Debug + PartialEq + DeserializeOwned + Serialize + Send + Sync + 'static {}

impl<K> KubeObject for K where K: Resource<DynamicType = ()> + Clone + Debug + PartialEq + DeserializeOwned + Serialize + Send + Sync + 'static {}

/// The key of a namespaced object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// The key of the given object, if it is named.
    pub fn from_object<K: Resource>(obj: &K) -> Option<Self> {
        let meta = obj.meta();
        let name = meta.name.as_ref()?;
        Some(Self::new(meta.namespace.clone().unwrap_or_default(), name.clone()))
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The kind name of the given object type.
pub fn kind_of<K: Resource<DynamicType = ()>>() -> String {
    K::kind(&()).into_owned()
}

//! The controllers of TriggerMesh kinds.
//!
//! Every controller drains a `WorkQueue` of object keys with a pool of workers. A worker reads
//! the object from the local cache, lets its `Reconciler` converge the world towards it, then
//! writes back the resulting status. The queue guarantees that a key is never reconciled by two
//! workers at the same time.

mod broker;
#[cfg(test)]
mod mod_test;
mod replay;
mod trigger;
pub mod wiring;
#[cfg(test)]
mod wiring_test;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;

use crate::error::{ReconcileError, ReconcileResult};
use crate::k8s::{EventRecorder, Indexer, KubeObject, ObjectKey, ResourceClient, WorkQueue};
use crate::metrics::{METRIC_RECONCILE_ERRORS, METRIC_RECONCILE_TOTAL};
use crate::reconciler::object_reference;
use triggermesh_core::crd::{Broker, BrokerKind, BrokerRef, MemoryBroker, RedisBroker, StatusResource};
use triggermesh_core::status::*;

pub use broker::{BrokerReconciler, BrokerVariant, RedisBacking};
pub use replay::ReplayReconciler;
pub use trigger::TriggerReconciler;

const REASON_FAILED_GET: &str = "FailedGet";
const REASON_FAILED_STATUS_UPDATE: &str = "FailedStatusUpdate";

/// The reconciliation logic of a kind.
#[async_trait]
pub trait Reconciler<K>: Send + Sync {
    /// Set every managed condition of the object which is not yet present to `Unknown`.
    fn initialize(&self, obj: &mut K);

    /// Converge the world towards the given object, recording observations on its status.
    async fn reconcile_kind(&self, obj: &mut K) -> ReconcileResult<()>;
}

/// A controller of a kind.
pub struct Controller<K: KubeObject> {
    name: String,
    client: Arc<dyn ResourceClient<K>>,
    lister: Arc<Indexer<K>>,
    queue: Arc<WorkQueue>,
    reconciler: Arc<dyn Reconciler<K>>,
}

impl<K: KubeObject + StatusResource> Controller<K> {
    /// Create a new instance.
    pub fn new(name: impl Into<String>, client: Arc<dyn ResourceClient<K>>, lister: Arc<Indexer<K>>, reconciler: Arc<dyn Reconciler<K>>) -> Self {
        let name = name.into();
        Self {
            queue: WorkQueue::new(name.clone()),
            name,
            client,
            lister,
            reconciler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The work queue of this controller.
    pub fn queue(&self) -> Arc<WorkQueue> {
        self.queue.clone()
    }

    /// Spawn the given number of workers. Workers stop once the work queue is shut down.
    pub fn spawn(self: Arc<Self>, workers: usize) -> Vec<JoinHandle<()>> {
        (0..workers).map(|id| tokio::spawn(self.clone().run_worker(id))).collect()
    }

    async fn run_worker(self: Arc<Self>, id: usize) {
        tracing::debug!(controller = %self.name, worker = id, "worker started");
        while let Some(key) = self.queue.get().await {
            self.handle_key(&key).await;
        }
        tracing::debug!(controller = %self.name, worker = id, "worker shutdown");
    }

    /// Reconcile the given key, requeuing it according to the outcome.
    pub(crate) async fn handle_key(&self, key: &ObjectKey) {
        metrics::increment_counter!(METRIC_RECONCILE_TOTAL, "controller" => self.name.clone());
        match self.reconcile_key(key).await {
            Ok(()) => self.queue.forget(key),
            Err(err) if err.permanent => {
                tracing::warn!(controller = %self.name, %key, error = %err, "reconciliation failed permanently");
                metrics::increment_counter!(METRIC_RECONCILE_ERRORS, "controller" => self.name.clone());
                self.queue.forget(key);
            }
            Err(err) => {
                tracing::error!(controller = %self.name, %key, error = %err, "reconciliation failed, will retry");
                metrics::increment_counter!(METRIC_RECONCILE_ERRORS, "controller" => self.name.clone());
                self.queue.add_rate_limited(key.clone());
            }
        }
        self.queue.done(key);
    }

    /// Reconcile the object of the given key.
    #[tracing::instrument(level = "debug", skip(self), fields(controller = %self.name))]
    pub(crate) async fn reconcile_key(&self, key: &ObjectKey) -> ReconcileResult<()> {
        let original = match self.lister.get(&key.namespace, &key.name) {
            Ok(obj) => obj,
            Err(err) if err.is_not_found() => {
                // Owned objects are garbage collected through their owner references.
                tracing::debug!(%key, "object no longer exists");
                return Ok(());
            }
            Err(err) => return Err(ReconcileError::transient(REASON_FAILED_GET, err.to_string())),
        };

        let mut obj = original.clone();
        self.reconciler.initialize(&mut obj);
        let res = self.reconciler.reconcile_kind(&mut obj).await;
        if res.is_ok() {
            let generation = obj.meta().generation;
            obj.conditioned_status_mut().observed_generation = generation;
        }

        // Status is written back even when reconciliation failed.
        let status_res = self.update_status(&original, &obj).await;
        res.and(status_res)
    }

    async fn update_status(&self, original: &K, obj: &K) -> ReconcileResult<()> {
        let encode = |status: Option<&K::Status>| {
            serde_json::to_value(status).map_err(|err| ReconcileError::transient(REASON_FAILED_STATUS_UPDATE, err.to_string()))
        };
        let (old, new) = (encode(original.status())?, encode(obj.status())?);
        if old == new {
            return Ok(());
        }
        let patch = serde_json::json!({ "status": merge_patch(&old, &new) });
        self.client
            .patch_status(obj.namespace(), obj.name(), &patch)
            .await
            .map(|_| ())
            .map_err(|err| ReconcileError::transient(REASON_FAILED_STATUS_UPDATE, err.to_string()))
    }
}

/// Build a JSON merge patch turning `old` into `new`.
pub(crate) fn merge_patch(old: &Value, new: &Value) -> Value {
    match (old, new) {
        (Value::Object(old), Value::Object(new)) => {
            let mut patch = Map::new();
            for (key, val) in new {
                match old.get(key) {
                    Some(prev) if prev == val => (),
                    Some(prev) => {
                        patch.insert(key.clone(), merge_patch(prev, val));
                    }
                    None => {
                        patch.insert(key.clone(), val.clone());
                    }
                }
            }
            for key in old.keys().filter(|key| !new.contains_key(*key)) {
                patch.insert(key.clone(), Value::Null);
            }
            Value::Object(patch)
        }
        (_, new) => new.clone(),
    }
}

/// Read access to the brokers of every variant.
#[derive(Clone)]
pub struct BrokerListers {
    pub memory: Arc<Indexer<MemoryBroker>>,
    pub redis: Arc<Indexer<RedisBroker>>,
}

impl BrokerListers {
    /// Look up the broker referenced from an object of the given namespace.
    ///
    /// A broker is only returned when the reference designates it by `BrokerRef::references`.
    /// References to unsupported groups, API versions or kinds, and to brokers which do not exist, are
    /// permanent errors: they can only be fixed by changing the referrer or creating the broker,
    /// both of which trigger a new reconciliation.
    pub fn get(&self, reference: &BrokerRef, namespace: &str) -> ReconcileResult<Broker> {
        let group = match reference.api_version.as_deref().filter(|av| !av.is_empty()) {
            Some(api_version) => api_version.split('/').next().unwrap_or_default(),
            None => reference.effective_group(),
        };
        if group != triggermesh_core::GROUP {
            return Err(ReconcileError::permanent(
                REASON_BROKER_UNSUPPORTED_GROUP,
                format!("broker group {:?} is not supported", group),
            ));
        }
        if !reference.is_supported_api() {
            return Err(ReconcileError::permanent(
                REASON_BROKER_UNSUPPORTED_VERSION,
                format!("broker API version {:?} is not supported", reference.api_version.as_deref().unwrap_or_default()),
            ));
        }
        let kind = BrokerKind::from_kind(&reference.kind).ok_or_else(|| {
            ReconcileError::permanent(REASON_BROKER_UNSUPPORTED_KIND, format!("broker kind {:?} is not supported", reference.kind))
        })?;
        let namespace = reference.effective_namespace(namespace);
        let res = match kind {
            BrokerKind::Memory => self.memory.get(namespace, &reference.name).map(Broker::from),
            BrokerKind::Redis => self.redis.get(namespace, &reference.name).map(Broker::from),
        };
        res.map_err(|err| match err {
            err if err.is_not_found() => ReconcileError::permanent(
                REASON_BROKER_DOES_NOT_EXIST,
                format!("{} {}/{} does not exist", kind, namespace, reference.name),
            ),
            err => ReconcileError::transient(REASON_FAILED_BROKER_GET, err.to_string()),
        })
    }
}

/// Publish a reconcile error as a `Warning` event on the given object, passing the error through.
pub(crate) async fn warn<K: kube::Resource<DynamicType = ()>>(recorder: &dyn EventRecorder, obj: &K, err: ReconcileError) -> ReconcileError {
    recorder.warn(&object_reference(obj), &err.reason, &err.message).await;
    err
}

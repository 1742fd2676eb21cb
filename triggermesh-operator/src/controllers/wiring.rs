//! Enqueue policies connecting informers to the work queues of controllers.
//!
//! Each function returns an `EventHandler` for one watched kind which maps a change of an object
//! of that kind onto the keys of the objects which must be reconciled as a consequence.

use std::marker::PhantomData;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Endpoints, Service};
use kube::Resource;
use triggermesh_core::crd::{ReconcilableBroker, Replay, RequiredMetadata, Trigger};

use crate::k8s::{EventHandler, FilteringHandler, Indexer, KubeObject, ObjectKey, WorkQueue};
use crate::resources::{controller_of, LABEL_MANAGED_BY, LABEL_NAME, MANAGED_BY};

/// Enqueue every changed object of the controller's own kind.
pub fn enqueue_self<K: KubeObject>(queue: Arc<WorkQueue>) -> FilteringHandler<K> {
    FilteringHandler::all(move |obj: &K| {
        if let Some(key) = ObjectKey::from_object(obj) {
            queue.add(key);
        }
    })
}

/// Enqueue the controlling owner of changed objects, for owners of kind `O`.
pub fn enqueue_controller<K: KubeObject, O: Resource<DynamicType = ()>>(queue: Arc<WorkQueue>) -> FilteringHandler<K> {
    FilteringHandler::new(
        |obj: &K| controller_of(obj).map(is_of_kind::<O>).unwrap_or(false),
        move |obj: &K| {
            if let Some(oref) = controller_of(obj) {
                queue.add(ObjectKey::new(obj.meta().namespace.clone().unwrap_or_default(), oref.name.clone()));
            }
        },
    )
}

fn is_of_kind<O: Resource<DynamicType = ()>>(oref: &k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference) -> bool {
    oref.kind == O::kind(&()) && oref.api_version == O::api_version(&())
}

/// Enqueue the broker owning the service of changed endpoints.
///
/// Endpoints are controlled by K8s itself, so they are matched through the labels they inherit
/// from their service, then traced back to the broker through the service's owner reference.
pub fn enqueue_broker_of_endpoints<B: ReconcilableBroker + KubeObject>(
    queue: Arc<WorkQueue>, services: Arc<Indexer<Service>>,
) -> FilteringHandler<Endpoints> {
    let app_name = B::KIND.as_str().to_lowercase();
    FilteringHandler::new(
        move |ep: &Endpoints| {
            let labels = ep.metadata.labels.as_ref();
            let label = |key: &str| labels.and_then(|labels| labels.get(key)).map(String::as_str);
            label(LABEL_NAME) == Some(app_name.as_str()) && label(LABEL_MANAGED_BY) == Some(MANAGED_BY)
        },
        move |ep: &Endpoints| {
            let namespace = ep.metadata.namespace.as_deref().unwrap_or_default();
            let name = ep.metadata.name.as_deref().unwrap_or_default();
            let service = match services.get(namespace, name) {
                Ok(service) => service,
                Err(err) => {
                    tracing::debug!(error = %err, namespace, name, "no service found for endpoints");
                    return;
                }
            };
            if let Some(oref) = controller_of(&service).filter(|oref| is_of_kind::<B>(oref)) {
                queue.add(ObjectKey::new(namespace, oref.name.clone()));
            }
        },
    )
}

/// Enqueue the broker of kind `B` referenced by changed Triggers.
///
/// Only references to existing brokers are followed. On updates both the previous and the new
/// broker are enqueued, so that a broker drops a trigger which moved away from it.
pub struct EnqueueReferencedBroker<B> {
    queue: Arc<WorkQueue>,
    brokers: Arc<Indexer<B>>,
    _kind: PhantomData<fn() -> B>,
}

impl<B: ReconcilableBroker + KubeObject> EnqueueReferencedBroker<B> {
    pub fn new(queue: Arc<WorkQueue>, brokers: Arc<Indexer<B>>) -> Self {
        Self {
            queue,
            brokers,
            _kind: PhantomData,
        }
    }

    fn enqueue(&self, trigger: &Trigger) {
        let reference = &trigger.spec.broker;
        if reference.kind != B::KIND.as_str() {
            return;
        }
        let namespace = reference.effective_namespace(trigger.namespace());
        match self.brokers.get(namespace, &reference.name) {
            Ok(broker) if trigger.references_broker(&broker) => self.queue.add(ObjectKey::new(namespace, reference.name.clone())),
            Ok(_) => (),
            Err(err) => tracing::debug!(error = %err, trigger = trigger.name(), "trigger does not reference a known broker"),
        }
    }
}

impl<B: ReconcilableBroker + KubeObject> EventHandler<Trigger> for EnqueueReferencedBroker<B> {
    fn on_add(&self, obj: &Trigger) {
        self.enqueue(obj);
    }

    fn on_update(&self, old: &Trigger, new: &Trigger) {
        if old.spec.broker != new.spec.broker {
            self.enqueue(old);
        }
        self.enqueue(new);
    }

    fn on_delete(&self, obj: &Trigger) {
        self.enqueue(obj);
    }
}

/// An object referencing a broker.
pub trait BrokerReferrer: KubeObject {
    fn references_broker<B: ReconcilableBroker>(&self, broker: &B) -> bool;
}

impl BrokerReferrer for Trigger {
    fn references_broker<B: ReconcilableBroker>(&self, broker: &B) -> bool {
        Trigger::references_broker(self, broker)
    }
}

impl BrokerReferrer for Replay {
    fn references_broker<B: ReconcilableBroker>(&self, broker: &B) -> bool {
        Replay::references_broker(self, broker)
    }
}

/// Enqueue every referrer of changed brokers, in any namespace, so that referrers mirror the
/// broker's readiness.
pub fn enqueue_referrers<B, R>(queue: Arc<WorkQueue>, referrers: Arc<Indexer<R>>) -> FilteringHandler<B>
where
    B: ReconcilableBroker + KubeObject,
    R: BrokerReferrer,
{
    FilteringHandler::all(move |broker: &B| {
        let referrers = match referrers.list_all() {
            Ok(referrers) => referrers,
            Err(err) => {
                tracing::warn!(error = %err, "error listing broker referrers");
                return;
            }
        };
        referrers
            .iter()
            .filter(|referrer| referrer.references_broker(broker))
            .filter_map(ObjectKey::from_object)
            .for_each(|key| queue.add(key));
    })
}

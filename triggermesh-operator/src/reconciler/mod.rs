//! Convergence of owned objects towards their desired state.
//!
//! Each owned object is converged the same way: the desired object is built, compared with the
//! cached one, and created or updated only when they semantically differ. Failures are reported
//! on the owner's conditions and as `Warning` events by the sub-reconcilers in `objects`.

mod objects;
#[cfg(test)]
mod objects_test;

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, ObjectReference, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::Resource;

use crate::error::ClientError;
use crate::k8s::{kind_of, Indexer, KubeObject, ResourceClient};
use crate::semantic;
use triggermesh_core::status::*;

pub use objects::ObjectReconciler;

/// An object kind owned, and converged, by the operator.
pub trait OwnedObject: KubeObject {
    /// The reason used when the object could not be read.
    const REASON_GET: &'static str;
    /// The reason used when the object could not be created.
    const REASON_CREATE: &'static str;
    /// The reason used when the object could not be updated.
    const REASON_UPDATE: &'static str;

    /// Check if the desired object is already reflected by the current one.
    fn semantic_equal(desired: &Self, current: &Self) -> bool;

    /// Carry the server owned state of the current object over to the desired one before an update.
    fn adopt_status(&mut self, _current: &Self) {}

    /// Objects which are never updated once created.
    fn is_immutable() -> bool {
        false
    }
}

impl OwnedObject for Secret {
    const REASON_GET: &'static str = REASON_FAILED_SECRET_GET;
    const REASON_CREATE: &'static str = REASON_FAILED_SECRET_CREATE;
    const REASON_UPDATE: &'static str = REASON_FAILED_SECRET_UPDATE;

    fn semantic_equal(desired: &Self, current: &Self) -> bool {
        semantic::secret_equal(Some(desired), Some(current))
    }
}

impl OwnedObject for ServiceAccount {
    const REASON_GET: &'static str = REASON_FAILED_SERVICE_ACCOUNT_GET;
    const REASON_CREATE: &'static str = REASON_FAILED_SERVICE_ACCOUNT_CREATE;
    const REASON_UPDATE: &'static str = REASON_FAILED_SERVICE_ACCOUNT_UPDATE;

    fn semantic_equal(desired: &Self, current: &Self) -> bool {
        semantic::service_account_equal(Some(desired), Some(current))
    }
}

impl OwnedObject for RoleBinding {
    const REASON_GET: &'static str = REASON_FAILED_ROLE_BINDING_GET;
    const REASON_CREATE: &'static str = REASON_FAILED_ROLE_BINDING_CREATE;
    const REASON_UPDATE: &'static str = REASON_FAILED_ROLE_BINDING_UPDATE;

    fn semantic_equal(desired: &Self, current: &Self) -> bool {
        semantic::role_binding_equal(Some(desired), Some(current))
    }
}

impl OwnedObject for Deployment {
    const REASON_GET: &'static str = REASON_FAILED_DEPLOYMENT_GET;
    const REASON_CREATE: &'static str = REASON_FAILED_DEPLOYMENT_CREATE;
    const REASON_UPDATE: &'static str = REASON_FAILED_DEPLOYMENT_UPDATE;

    fn semantic_equal(desired: &Self, current: &Self) -> bool {
        semantic::deployment_equal(Some(desired), Some(current))
    }

    fn adopt_status(&mut self, current: &Self) {
        self.status = current.status.clone();
    }
}

impl OwnedObject for Service {
    const REASON_GET: &'static str = REASON_FAILED_SERVICE_GET;
    const REASON_CREATE: &'static str = REASON_FAILED_SERVICE_CREATE;
    const REASON_UPDATE: &'static str = REASON_FAILED_SERVICE_UPDATE;

    fn semantic_equal(desired: &Self, current: &Self) -> bool {
        semantic::service_equal(Some(desired), Some(current))
    }

    fn adopt_status(&mut self, current: &Self) {
        self.status = current.status.clone();
        // The cluster IP is immutable once allocated.
        if let (Some(desired), Some(current)) = (self.spec.as_mut(), current.spec.as_ref()) {
            desired.cluster_ip = current.cluster_ip.clone();
            desired.cluster_ips = current.cluster_ips.clone();
        }
    }
}

impl OwnedObject for ConfigMap {
    const REASON_GET: &'static str = REASON_FAILED_CONFIG_MAP_GET;
    const REASON_CREATE: &'static str = REASON_FAILED_CONFIG_MAP_CREATE;
    const REASON_UPDATE: &'static str = REASON_FAILED_CONFIG_MAP_UPDATE;

    fn semantic_equal(desired: &Self, current: &Self) -> bool {
        semantic::config_map_equal(Some(desired), Some(current))
    }

    fn adopt_status(&mut self, current: &Self) {
        // The data of the status ConfigMap is written by the broker.
        self.data = current.data.clone();
        self.binary_data = current.binary_data.clone();
    }
}

impl OwnedObject for Job {
    const REASON_GET: &'static str = REASON_FAILED_JOB_GET;
    const REASON_CREATE: &'static str = REASON_FAILED_JOB_CREATE;
    const REASON_UPDATE: &'static str = REASON_FAILED_JOB_UPDATE;

    fn semantic_equal(desired: &Self, current: &Self) -> bool {
        semantic::job_equal(Some(desired), Some(current))
    }

    fn is_immutable() -> bool {
        true
    }
}

/// An error converging an owned object.
#[derive(Clone, Debug, PartialEq)]
pub struct ConvergeError {
    pub reason: &'static str,
    pub message: String,
}

/// A client of an owned kind, paired with the cache of that kind.
pub struct Store<K: KubeObject> {
    pub client: Arc<dyn ResourceClient<K>>,
    pub lister: Arc<Indexer<K>>,
}

impl<K: KubeObject> Clone for Store<K> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            lister: self.lister.clone(),
        }
    }
}

impl<K: OwnedObject> Store<K> {
    pub fn new(client: Arc<dyn ResourceClient<K>>, lister: Arc<Indexer<K>>) -> Self {
        Self { client, lister }
    }

    /// Converge the object towards the given desired state, returning the current object.
    #[tracing::instrument(level = "debug", skip(self, desired), fields(kind = %kind_of::<K>(), name = ?desired.meta().name))]
    pub async fn converge(&self, mut desired: K) -> Result<K, ConvergeError> {
        let meta = desired.meta();
        let (namespace, name) = (meta.namespace.clone().unwrap_or_default(), meta.name.clone().unwrap_or_default());
        match self.lister.get(&namespace, &name) {
            Ok(current) => {
                if K::is_immutable() || K::semantic_equal(&desired, &current) {
                    return Ok(current);
                }
                tracing::debug!("object differs from its desired state");
                desired.meta_mut().resource_version = current.meta().resource_version.clone();
                desired.adopt_status(&current);
                self.client.update(&desired).await.map_err(|err| ConvergeError {
                    reason: K::REASON_UPDATE,
                    message: format!("failed to update {} {}/{}: {}", kind_of::<K>(), namespace, name, err),
                })
            }
            Err(err) if err.is_not_found() => self.client.create(&desired).await.map_err(|err| ConvergeError {
                reason: K::REASON_CREATE,
                message: format!("failed to create {} {}/{}: {}", kind_of::<K>(), namespace, name, err),
            }),
            Err(err) => Err(get_error::<K>(&namespace, &name, &err)),
        }
    }
}

fn get_error<K: OwnedObject>(namespace: &str, name: &str, err: &ClientError) -> ConvergeError {
    ConvergeError {
        reason: K::REASON_GET,
        message: format!("failed to get {} {}/{}: {}", kind_of::<K>(), namespace, name, err),
    }
}

/// Build a reference to the given object, as used by K8s events.
pub fn object_reference<K: Resource<DynamicType = ()>>(obj: &K) -> ObjectReference {
    let meta = obj.meta();
    ObjectReference {
        api_version: Some(K::api_version(&()).into_owned()),
        kind: Some(K::kind(&()).into_owned()),
        name: meta.name.clone(),
        namespace: meta.namespace.clone(),
        uid: meta.uid.clone(),
        resource_version: meta.resource_version.clone(),
        ..Default::default()
    }
}

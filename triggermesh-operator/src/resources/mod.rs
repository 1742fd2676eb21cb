//! Builders of the K8s objects owned by brokers and replays.
//!
//! Builders are pure: they produce the desired state of an object from its owner and the names of
//! its collaborators, and never read the cluster. Every built object carries the same five labels
//! and a controller owner reference, and is named `<owner>-<suffix>-<role>`.

mod broker;
mod redis;
mod replay;

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{EnvVar, EnvVarSource, ObjectFieldSelector, SecretKeySelector};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;

use crate::k8s::CLUSTER_DOMAIN;
use triggermesh_core::crd::{ReconcilableBroker, Replay, RequiredMetadata};

pub use broker::{
    broker_address, broker_deployment, broker_service, config_secret, role_binding, service_account, status_config_map, BrokerWiring,
    BROKER_CLUSTER_ROLE, BROKER_CONTAINER_NAME, BROKER_HTTP_PORT, BROKER_METRICS_PORT,
};
pub use redis::{embedded_redis_address, redis_credentials_env, redis_deployment, redis_service, REDIS_PORT};
pub use replay::{replay_job, ReplayJobSettings};

pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";
pub const LABEL_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_PART_OF: &str = "app.kubernetes.io/part-of";

pub const MANAGED_BY: &str = "triggermesh-core";
pub const PART_OF: &str = "triggermesh";

// Roles of owned objects.
pub const ROLE_BROKER: &str = "broker";
pub const ROLE_CONFIG: &str = "config";
pub const ROLE_REDIS: &str = "redis";
pub const ROLE_STATUS: &str = "status";
pub const ROLE_JOB: &str = "job";

/// The suffix of objects owned by replays.
pub const REPLAY_SUFFIX: &str = "rp";

/// The owner of a set of built objects.
#[derive(Clone, Debug, PartialEq)]
pub struct Owner {
    namespace: String,
    name: String,
    suffix: &'static str,
    app_name: String,
    owner_ref: Option<OwnerReference>,
}

impl Owner {
    pub fn from_broker<B: ReconcilableBroker>(broker: &B) -> Self {
        Self {
            namespace: broker.namespace().into(),
            name: broker.name().into(),
            suffix: broker.owned_objects_suffix(),
            app_name: B::KIND.as_str().to_lowercase(),
            owner_ref: controller_owner_ref(broker),
        }
    }

    pub fn from_replay(replay: &Replay) -> Self {
        Self {
            namespace: replay.namespace().into(),
            name: replay.name().into(),
            suffix: REPLAY_SUFFIX,
            app_name: "replay".into(),
            owner_ref: controller_owner_ref(replay),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The value of the `app.kubernetes.io/name` label of owned objects.
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// The controller owner reference of owned objects, if the owner has been persisted.
    pub fn owner_ref(&self) -> Option<&OwnerReference> {
        self.owner_ref.as_ref()
    }

    /// The name of the owned object of the given role.
    pub fn object_name(&self, role: &str) -> String {
        format!("{}-{}-{}", self.name, self.suffix, role)
    }

    /// The in-cluster DNS name of the owned service of the given role.
    pub fn service_host(&self, role: &str) -> String {
        format!("{}.{}.{}", self.object_name(role), self.namespace, CLUSTER_DOMAIN)
    }

    /// The labels used to select the pods of the given role.
    pub fn selector_labels(&self, role: &str) -> BTreeMap<String, String> {
        maplit::btreemap! {
            LABEL_COMPONENT.into() => role.into(),
            LABEL_INSTANCE.into() => self.name.clone(),
            LABEL_NAME.into() => self.app_name.clone(),
        }
    }

    /// The full label set of owned objects of the given role.
    pub fn labels(&self, role: &str) -> BTreeMap<String, String> {
        let mut labels = self.selector_labels(role);
        labels.insert(LABEL_MANAGED_BY.into(), MANAGED_BY.into());
        labels.insert(LABEL_PART_OF.into(), PART_OF.into());
        labels
    }

    /// The metadata of the owned object of the given role.
    pub fn metadata(&self, role: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(self.object_name(role)),
            namespace: Some(self.namespace.clone()),
            labels: Some(self.labels(role)),
            owner_references: self.owner_ref.clone().map(|oref| vec![oref]),
            ..Default::default()
        }
    }
}

/// Build the controller owner reference of an object, if it has been persisted.
pub fn controller_owner_ref<K: Resource<DynamicType = ()>>(obj: &K) -> Option<OwnerReference> {
    let meta = obj.meta();
    Some(OwnerReference {
        api_version: K::api_version(&()).into_owned(),
        kind: K::kind(&()).into_owned(),
        name: meta.name.clone()?,
        uid: meta.uid.clone()?,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// The controller owner reference of an object, if any.
pub fn controller_of<K: Resource>(obj: &K) -> Option<&OwnerReference> {
    obj.meta()
        .owner_references
        .as_ref()
        .and_then(|orefs| orefs.iter().find(|oref| oref.controller == Some(true)))
}

pub(crate) fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: Some(value.into()),
        ..Default::default()
    }
}

pub(crate) fn env_from_field(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.into(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                api_version: Some("v1".into()),
                field_path: field_path.into(),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn env_from_secret(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.into(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: Some(secret.into()),
                key: key.into(),
                optional: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

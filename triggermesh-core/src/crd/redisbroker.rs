//! RedisBroker CRD.
//!
//! The code here is used to generate the actual CRD used in K8s. See examples/crd.rs.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{BrokerKind, BrokerOptions, BrokerStatus, ReconcilableBroker, StatusResource};
use crate::status::ConditionedStatus;

/// CRD spec for the RedisBroker resource.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, CustomResource, JsonSchema)]
#[kube(
    status = "BrokerStatus",
    group = "eventing.triggermesh.io",
    version = "v1alpha1",
    kind = "RedisBroker",
    namespaced,
    derive = "PartialEq",
    apiextensions = "v1",
    printcolumn = r#"{"name":"URL","type":"string","jsonPath":".status.address.url"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RedisBrokerSpec {
    /// Settings of the Redis backing store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisOptions>,
    /// Options shared by every broker variant.
    #[serde(default)]
    pub broker: BrokerOptions,
}

/// Settings of the Redis backing store.
///
/// When no connection is given, an embedded Redis is deployed next to the broker.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisOptions {
    /// A user provided Redis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<RedisConnection>,
    /// The name of the Redis stream used by the broker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    /// The maximum length of the Redis stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_max_len: Option<i32>,
}

/// Connection settings of a user provided Redis.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisConnection {
    /// The address of the Redis server.
    pub url: String,
    /// The user name to authenticate with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<SecretValueFromSource>,
    /// The password to authenticate with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<SecretValueFromSource>,
    /// Connect to Redis using TLS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_enabled: Option<bool>,
    /// Skip verification of the server's certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_skip_verify: Option<bool>,
}

/// A value read from a Secret.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretValueFromSource {
    pub secret_key_ref: SecretKeyRef,
}

/// A key within a Secret of the same namespace.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}

impl RedisBroker {
    /// The user provided Redis connection, if any.
    pub fn user_provided_connection(&self) -> Option<&RedisConnection> {
        self.spec
            .redis
            .as_ref()
            .and_then(|redis| redis.connection.as_ref())
            .filter(|conn| !conn.url.is_empty())
    }

    /// The configured stream name, if any.
    pub fn stream(&self) -> Option<&str> {
        self.spec.redis.as_ref().and_then(|redis| redis.stream.as_deref())
    }

    /// The configured maximum stream length, if any.
    pub fn stream_max_len(&self) -> Option<i32> {
        self.spec.redis.as_ref().and_then(|redis| redis.stream_max_len)
    }
}

impl StatusResource for RedisBroker {
    type Status = BrokerStatus;

    fn status(&self) -> Option<&BrokerStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut BrokerStatus {
        self.status.get_or_insert_with(Default::default)
    }

    fn conditioned_status(&self) -> Option<&ConditionedStatus> {
        self.status.as_ref().map(|status| &status.status)
    }

    fn conditioned_status_mut(&mut self) -> &mut ConditionedStatus {
        &mut self.status_mut().status
    }
}

impl ReconcilableBroker for RedisBroker {
    const KIND: BrokerKind = BrokerKind::Redis;

    fn reconcilable_broker_spec(&self) -> &BrokerOptions {
        &self.spec.broker
    }
}

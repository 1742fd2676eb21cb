//! Types shared by the TriggerMesh CRDs.

use std::collections::BTreeMap;

use schemars::gen::SchemaGenerator;
use schemars::schema::{ArrayValidation, InstanceType, Schema, SchemaObject, SingleOrVec};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::status::ConditionedStatus;

/// A reference to an object which may live in another namespace.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KReference {
    /// Kind of the referent.
    pub kind: String,
    /// Namespace of the referent, defaults to the namespace of the referrer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Name of the referent.
    pub name: String,
    /// API version of the referent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    /// API group of the referent, used when no API version is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// An addressable destination, given as a reference, a URI, or both.
///
/// When both are given, the URI is resolved relative to the address of the reference.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    /// A reference to an addressable object.
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub ref_: Option<KReference>,
    /// An absolute URI, or a path relative to the referenced object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

/// Delivery options of a subscription.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeliverySpec {
    /// The destination of events which could not be delivered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter_sink: Option<Destination>,
    /// The number of delivery retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<i32>,
    /// The backoff policy applied between retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_policy: Option<BackoffPolicy>,
    /// The backoff delay, as an ISO 8601 duration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_delay: Option<String>,
}

/// The backoff policy applied between delivery retries.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BackoffPolicy {
    Linear,
    Exponential,
}

impl std::fmt::Display for BackoffPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Linear => "linear",
                Self::Exponential => "exponential",
            }
        )
    }
}

/// An inclusive range of strings, either bound optional.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Range {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

impl Range {
    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// Bounds limiting the events a subscription receives.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Bounds {
    /// Bounds by event ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by_id: Option<Range>,
    /// Bounds by event date, RFC 3339.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by_date: Option<Range>,
}

impl Bounds {
    pub fn is_empty(&self) -> bool {
        self.by_id.as_ref().map(Range::is_empty).unwrap_or(true) && self.by_date.as_ref().map(Range::is_empty).unwrap_or(true)
    }
}

/// A reference from a Trigger or Replay to its broker.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BrokerRef {
    /// The API group of the broker, defaults to the TriggerMesh eventing group.
    #[serde(default)]
    pub group: String,
    /// The kind of the broker.
    pub kind: String,
    /// The name of the broker.
    pub name: String,
    /// The namespace of the broker, defaults to the namespace of the referrer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// The API version of the broker, takes precedence over `group`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

impl BrokerRef {
    /// The group of the referenced broker, with the empty group defaulted.
    pub fn effective_group(&self) -> &str {
        if self.group.is_empty() {
            crate::GROUP
        } else {
            &self.group
        }
    }

    /// Check if the group of this reference is one handled by this project.
    pub fn is_supported_group(&self) -> bool {
        self.effective_group() == crate::GROUP
    }

    /// Check if the API of this reference is the one served by this project: the exact API
    /// version when one is given, else the group.
    pub fn is_supported_api(&self) -> bool {
        match self.api_version.as_deref().filter(|av| !av.is_empty()) {
            Some(api_version) => api_version == crate::API_VERSION,
            None => self.is_supported_group(),
        }
    }

    /// The namespace of the referenced broker, given the namespace of the referrer.
    pub fn effective_namespace<'a>(&'a self, referrer_namespace: &'a str) -> &'a str {
        self.namespace.as_deref().filter(|ns| !ns.is_empty()).unwrap_or(referrer_namespace)
    }

    /// Check if this reference, held by an object of `referrer_namespace`, designates the broker
    /// with the given coordinates.
    pub fn references(&self, referrer_namespace: &str, kind: &str, namespace: &str, name: &str) -> bool {
        self.name == name && self.kind == kind && self.effective_namespace(referrer_namespace) == namespace && self.is_supported_api()
    }
}

/// A CloudEvents Subscriptions API filter expression.
///
/// Exactly one dialect is expected to be set. Filters are passed through to the data plane as-is.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    /// Attribute values which must match exactly.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub exact: BTreeMap<String, String>,
    /// Attribute values which must match by prefix.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub prefix: BTreeMap<String, String>,
    /// Attribute values which must match by suffix.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub suffix: BTreeMap<String, String>,
    /// Nested filters which must all match.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "nested_filters_schema")]
    pub all: Vec<Filter>,
    /// Nested filters of which at least one must match.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "nested_filters_schema")]
    pub any: Vec<Filter>,
    /// A nested filter which must not match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "nested_filter_schema")]
    pub not: Option<Box<Filter>>,
    /// A CloudEvents SQL expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
}

impl Filter {
    /// The dialect of this filter, if any is set.
    pub fn kind(&self) -> Option<&'static str> {
        if !self.exact.is_empty() {
            Some("exact")
        } else if !self.prefix.is_empty() {
            Some("prefix")
        } else if !self.suffix.is_empty() {
            Some("suffix")
        } else if !self.all.is_empty() {
            Some("all")
        } else if !self.any.is_empty() {
            Some("any")
        } else if self.not.is_some() {
            Some("not")
        } else if self.sql.is_some() {
            Some("sql")
        } else {
            None
        }
    }
}

// Filters are recursive, which structural CRD schemas can not express.
fn nested_filters_schema(gen: &mut SchemaGenerator) -> Schema {
    Schema::Object(SchemaObject {
        instance_type: Some(InstanceType::Array.into()),
        array: Some(Box::new(ArrayValidation {
            items: Some(SingleOrVec::Single(Box::new(nested_filter_schema(gen)))),
            ..Default::default()
        })),
        ..Default::default()
    })
}

fn nested_filter_schema(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert("x-kubernetes-preserve-unknown-fields".into(), serde_json::Value::Bool(true));
    Schema::Object(schema)
}

/// Observability settings of a broker.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Observability {
    /// The name of a ConfigMap holding logging/metrics/tracing settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from_config_map: Option<String>,
}

/// Options shared by every broker variant.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BrokerOptions {
    /// The port exposed by the broker service, defaults to 80.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    /// Observability settings of the broker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observability: Option<Observability>,
}

impl BrokerOptions {
    /// The default port of the broker service.
    pub const DEFAULT_PORT: i32 = 80;

    pub fn port(&self) -> i32 {
        self.port.unwrap_or(Self::DEFAULT_PORT)
    }

    /// The observability ConfigMap of the broker, if one is configured.
    pub fn observability_config_map(&self) -> Option<&str> {
        self.observability
            .as_ref()
            .and_then(|obs| obs.value_from_config_map.as_deref())
            .filter(|name| !name.is_empty())
    }
}

/// The address of an addressable object.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct Addressable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// The status of every broker variant.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BrokerStatus {
    #[serde(flatten)]
    pub status: ConditionedStatus,
    /// The address of the broker, only present while it is ready.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Addressable>,
}

//! Semantic equality of desired and observed objects.
//!
//! The desired object built by the operator is treated as a template: every field it sets must
//! be present and equal in the observed object, while fields it leaves unset are ignored. This
//! keeps server side defaulting (deployment strategies, cluster IPs, health check timings ...) from
//! being seen as drift, which would otherwise cause an update on every reconciliation.


use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;
use serde::Serialize;
use serde_json::Value;

/// Fields defaulted by the API server to a non-zero value, for which a desired zero means unset.
const ZERO_OR_EQUAL_KEYS: &[&str] = &[
    "timeoutSeconds",
    "periodSeconds",
    "successThreshold",
    "failureThreshold",
    "initialDelaySeconds",
    "generation",
    "creationTimestamp",
];

/// Fields compared whole, since a desired empty value there is meaningful.
const WHOLE_KEYS: &[&str] = &["env"];

/// Check if `desired` is a derivative of `current`.
///
/// Null, empty strings, empty arrays and empty objects in `desired` are considered unset and
/// match anything. Arrays are compared element-wise and `desired` may not be longer.
pub fn deep_derivative(desired: &Value, current: &Value) -> bool {
    Comparison { whole_keys: &[] }.derivative(None, desired, current)
}

struct Comparison<'a> {
    whole_keys: &'a [&'a str],
}

impl<'a> Comparison<'a> {
    fn derivative(&self, key: Option<&str>, desired: &Value, current: &Value) -> bool {
        if is_unset(desired) {
            return true;
        }
        if let Some(key) = key {
            if self.whole_keys.contains(&key) {
                return desired == current;
            }
            if ZERO_OR_EQUAL_KEYS.contains(&key) && is_zero(desired) {
                return true;
            }
        }
        if is_zero_quantity(desired) {
            return current.is_null() || is_zero_quantity(current);
        }
        match (desired, current) {
            (Value::Object(desired), Value::Object(current)) => desired.iter().all(|(key, val)| {
                let observed = current.get(key).unwrap_or(&Value::Null);
                self.derivative(Some(key.as_str()), val, observed)
            }),
            (Value::Array(desired), Value::Array(current)) => {
                desired.len() <= current.len() && desired.iter().zip(current.iter()).all(|(val, observed)| self.derivative(key, val, observed))
            }
            (desired, current) => desired == current,
        }
    }
}

fn is_unset(val: &Value) -> bool {
    match val {
        Value::Null => true,
        Value::String(val) => val.is_empty(),
        Value::Array(val) => val.is_empty(),
        Value::Object(val) => val.is_empty(),
        _ => false,
    }
}

fn is_zero(val: &Value) -> bool {
    match val {
        Value::Number(num) => num.as_f64() == Some(0.0),
        _ => false,
    }
}

fn is_zero_quantity(val: &Value) -> bool {
    matches!(val, Value::String(val) if val == "0")
}

/// Compare the given objects with `Comparison`, after projecting both onto the compared fields.
fn semantic_equal<K: Serialize>(desired: Option<&K>, current: Option<&K>, fields: &[&str], whole_fields: &[&str]) -> bool {
    let (desired, current) = match (desired, current) {
        (None, None) => return true,
        (Some(desired), Some(current)) => (desired, current),
        _ => return false,
    };
    let (desired, current) = match (serde_json::to_value(desired), serde_json::to_value(current)) {
        (Ok(desired), Ok(current)) => (desired, current),
        // Objects which can not be encoded are never considered equal, forcing an update.
        _ => return false,
    };

    let null = Value::Null;
    let meta = Comparison { whole_keys: &[] };
    if !meta.derivative(None, desired.get("metadata").unwrap_or(&null), current.get("metadata").unwrap_or(&null)) {
        return false;
    }
    let body = Comparison { whole_keys: WHOLE_KEYS };
    let fields_equal = fields
        .iter()
        .all(|field| body.derivative(Some(field), desired.get(*field).unwrap_or(&null), current.get(*field).unwrap_or(&null)));
    let whole_equal = whole_fields
        .iter()
        .all(|field| desired.get(*field).unwrap_or(&null) == current.get(*field).unwrap_or(&null));
    fields_equal && whole_equal
}

pub fn deployment_equal(desired: Option<&Deployment>, current: Option<&Deployment>) -> bool {
    semantic_equal(desired, current, &["spec"], &[])
}

pub fn job_equal(desired: Option<&Job>, current: Option<&Job>) -> bool {
    semantic_equal(desired, current, &["spec"], &[])
}

pub fn service_equal(desired: Option<&Service>, current: Option<&Service>) -> bool {
    semantic_equal(desired, current, &["spec"], &[])
}

/// Secret data is compared whole, so that removed keys are detected.
pub fn secret_equal(desired: Option<&Secret>, current: Option<&Secret>) -> bool {
    semantic_equal(desired, current, &["type"], &["data"])
}

pub fn service_account_equal(desired: Option<&ServiceAccount>, current: Option<&ServiceAccount>) -> bool {
    semantic_equal(desired, current, &[], &[])
}

pub fn role_binding_equal(desired: Option<&RoleBinding>, current: Option<&RoleBinding>) -> bool {
    semantic_equal(desired, current, &["roleRef", "subjects"], &[])
}

/// ConfigMap data is owned by the data plane and never compared.
pub fn config_map_equal(desired: Option<&ConfigMap>, current: Option<&ConfigMap>) -> bool {
    semantic_equal(desired, current, &[], &[])
}

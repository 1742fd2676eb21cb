//! The broker configuration document.
//!
//! Every broker reads its subscriptions from a single YAML document stored in its config Secret
//! under the `config` key. The document maps trigger names to their filters, resolved target
//! and delivery options. Redis brokers additionally carry their backing store settings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crd::{BackoffPolicy, Bounds, Filter, ReconcilableBroker, Trigger};
use crate::error::CoreError;

/// The key of the broker configuration document within its Secret.
pub const CONFIG_SECRET_KEY: &str = "config";

/// The configuration document of a broker.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct BrokerConfig {
    /// The subscriptions of the broker, by trigger name.
    #[serde(default)]
    pub triggers: BTreeMap<String, TriggerConfig>,
    /// The Redis backing store of the broker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisConfig>,
}

/// A single subscription.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
    pub target: TargetConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
}

/// The resolved destination of a subscription.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TargetConfig {
    /// The target URL. Empty when only a dead letter sink is resolved.
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_options: Option<DeliveryOptions>,
}

/// Delivery options of a subscription, with the dead letter sink resolved.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_delay: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_policy: Option<BackoffPolicy>,
    #[serde(default, rename = "deadLetterURL", skip_serializing_if = "Option::is_none")]
    pub dead_letter_url: Option<String>,
}

impl DeliveryOptions {
    fn is_empty(&self) -> bool {
        self.retry.is_none() && self.backoff_delay.is_none() && self.backoff_policy.is_none() && self.dead_letter_url.is_none()
    }
}

/// Redis settings of a broker.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RedisConfig {
    /// The address of the Redis server.
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_max_len: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_skip_verify: Option<bool>,
}

impl TriggerConfig {
    /// Build the subscription of the given trigger.
    ///
    /// Returns `None` if neither the target nor the dead letter sink of the trigger is resolved.
    pub fn from_trigger(trigger: &Trigger) -> Option<Self> {
        let target_uri = trigger.target_uri().filter(|uri| !uri.is_empty());
        let dls_uri = trigger.dead_letter_sink_uri().filter(|uri| !uri.is_empty());
        if target_uri.is_none() && dls_uri.is_none() {
            return None;
        }

        let delivery = trigger.spec.delivery.as_ref();
        let delivery_options = DeliveryOptions {
            retry: delivery.and_then(|d| d.retry),
            backoff_delay: delivery.and_then(|d| d.backoff_delay.clone()),
            backoff_policy: delivery.and_then(|d| d.backoff_policy),
            dead_letter_url: dls_uri.map(String::from),
        };

        Some(Self {
            filters: trigger.spec.filters.clone(),
            target: TargetConfig {
                url: target_uri.map(String::from).unwrap_or_default(),
                delivery_options: if delivery_options.is_empty() { None } else { Some(delivery_options) },
            },
            bounds: trigger.spec.bounds.clone().filter(|bounds| !bounds.is_empty()),
        })
    }
}

impl BrokerConfig {
    /// Build the configuration of a broker from the given triggers.
    ///
    /// Only triggers referencing the broker and having at least one resolved URI are included.
    /// Triggers are keyed by name, qualified with their namespace when it differs from the
    /// broker's.
    pub fn for_broker<'a, B, I>(broker: &B, triggers: I) -> Self
    where
        B: ReconcilableBroker,
        I: IntoIterator<Item = &'a Trigger>,
    {
        let triggers = triggers
            .into_iter()
            .filter(|trigger| trigger.references_broker(broker))
            .filter_map(|trigger| {
                let name = trigger.metadata.name.as_deref()?;
                let key = match trigger.metadata.namespace.as_deref() {
                    Some(namespace) if namespace != broker.namespace() => format!("{}/{}", namespace, name),
                    _ => name.to_string(),
                };
                TriggerConfig::from_trigger(trigger).map(|config| (key, config))
            })
            .collect();
        Self { triggers, redis: None }
    }

    /// Attach Redis settings to this configuration.
    pub fn with_redis(mut self, redis: RedisConfig) -> Self {
        self.redis = Some(redis);
        self
    }

    /// Serialize this configuration as YAML.
    pub fn to_yaml(&self) -> Result<String, CoreError> {
        let yaml = serde_yaml::to_string(self).map_err(CoreError::ConfigSerialize)?;
        let body = yaml.strip_prefix("---\n").unwrap_or(&yaml).trim_end();
        Ok(format!("{}\n", body))
    }

    /// Parse a configuration from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, CoreError> {
        serde_yaml::from_str(yaml).map_err(CoreError::ConfigParse)
    }
}

//! Trigger CRD.
//!
//! The code here is used to generate the actual CRD used in K8s. See examples/crd.rs.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{Bounds, BrokerRef, DeliverySpec, Destination, Filter, ReconcilableBroker, RequiredMetadata, StatusResource};
use crate::status::ConditionedStatus;

/// CRD spec for the Trigger resource.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, CustomResource, JsonSchema)]
#[kube(
    status = "TriggerStatus",
    group = "eventing.triggermesh.io",
    version = "v1alpha1",
    kind = "Trigger",
    namespaced,
    derive = "PartialEq",
    apiextensions = "v1",
    printcolumn = r#"{"name":"Broker","type":"string","jsonPath":".spec.broker.name"}"#,
    printcolumn = r#"{"name":"Target","type":"string","jsonPath":".status.targetURI"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSpec {
    /// The broker this trigger subscribes to.
    pub broker: BrokerRef,
    /// Filters selecting the events forwarded to the target, all of which must match.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
    /// The destination of matching events.
    pub target: Destination,
    /// Delivery options for the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliverySpec>,
    /// Bounds limiting the events forwarded to the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
}

/// CRD status object.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TriggerStatus {
    #[serde(flatten)]
    pub status: ConditionedStatus,
    /// The resolved URI of the target.
    #[serde(default, rename = "targetURI", skip_serializing_if = "Option::is_none")]
    pub target_uri: Option<String>,
    /// The resolved URI of the dead letter sink.
    #[serde(default, rename = "deadLetterSinkURI", skip_serializing_if = "Option::is_none")]
    pub dead_letter_sink_uri: Option<String>,
}

impl Trigger {
    /// Check if this trigger references the given broker.
    pub fn references_broker<B: ReconcilableBroker>(&self, broker: &B) -> bool {
        self.spec.broker.references(self.namespace(), B::KIND.as_str(), broker.namespace(), broker.name())
    }

    /// The dead letter sink of this trigger, if one is configured.
    pub fn dead_letter_sink(&self) -> Option<&Destination> {
        self.spec.delivery.as_ref().and_then(|delivery| delivery.dead_letter_sink.as_ref())
    }

    /// The resolved target URI, if any.
    pub fn target_uri(&self) -> Option<&str> {
        self.status.as_ref().and_then(|status| status.target_uri.as_deref())
    }

    /// The resolved dead letter sink URI, if any.
    pub fn dead_letter_sink_uri(&self) -> Option<&str> {
        self.status.as_ref().and_then(|status| status.dead_letter_sink_uri.as_deref())
    }
}

impl StatusResource for Trigger {
    type Status = TriggerStatus;

    fn status(&self) -> Option<&TriggerStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut TriggerStatus {
        self.status.get_or_insert_with(Default::default)
    }

    fn conditioned_status(&self) -> Option<&ConditionedStatus> {
        self.status.as_ref().map(|status| &status.status)
    }

    fn conditioned_status_mut(&mut self) -> &mut ConditionedStatus {
        &mut self.status_mut().status
    }
}

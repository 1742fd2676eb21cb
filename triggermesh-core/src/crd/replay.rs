//! Replay CRD.
//!
//! The code here is used to generate the actual CRD used in K8s. See examples/crd.rs.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{Bounds, BrokerRef, Destination, Filter, ReconcilableBroker, RequiredMetadata, StatusResource};
use crate::status::ConditionedStatus;

/// CRD spec for the Replay resource.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, CustomResource, JsonSchema)]
#[kube(
    status = "ReplayStatus",
    group = "eventing.triggermesh.io",
    version = "v1alpha1",
    kind = "Replay",
    namespaced,
    derive = "PartialEq",
    apiextensions = "v1",
    printcolumn = r#"{"name":"Broker","type":"string","jsonPath":".spec.broker.name"}"#,
    printcolumn = r#"{"name":"Target","type":"string","jsonPath":".status.targetURI"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ReplaySpec {
    /// The broker whose events are replayed.
    pub broker: BrokerRef,
    /// The destination of replayed events.
    pub target: Destination,
    /// A filter selecting the replayed events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    /// Bounds of the replayed events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
}

/// CRD status object.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplayStatus {
    #[serde(flatten)]
    pub status: ConditionedStatus,
    /// The resolved URI of the target.
    #[serde(default, rename = "targetURI", skip_serializing_if = "Option::is_none")]
    pub target_uri: Option<String>,
}

impl Replay {
    /// Check if this replay references the given broker.
    pub fn references_broker<B: ReconcilableBroker>(&self, broker: &B) -> bool {
        self.spec.broker.references(self.namespace(), B::KIND.as_str(), broker.namespace(), broker.name())
    }

    /// The resolved target URI, if any.
    pub fn target_uri(&self) -> Option<&str> {
        self.status.as_ref().and_then(|status| status.target_uri.as_deref())
    }
}

impl StatusResource for Replay {
    type Status = ReplayStatus;

    fn status(&self) -> Option<&ReplayStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut ReplayStatus {
        self.status.get_or_insert_with(Default::default)
    }

    fn conditioned_status(&self) -> Option<&ConditionedStatus> {
        self.status.as_ref().map(|status| &status.status)
    }

    fn conditioned_status_mut(&mut self) -> &mut ConditionedStatus {
        &mut self.status_mut().status
    }
}

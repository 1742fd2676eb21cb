//! MemoryBroker CRD.
//!
//! The code here is used to generate the actual CRD used in K8s. See examples/crd.rs.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{BrokerKind, BrokerOptions, BrokerStatus, ReconcilableBroker, StatusResource};
use crate::status::ConditionedStatus;

/// CRD spec for the MemoryBroker resource.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, CustomResource, JsonSchema)]
#[kube(
    status = "BrokerStatus",
    group = "eventing.triggermesh.io",
    version = "v1alpha1",
    kind = "MemoryBroker",
    namespaced,
    derive = "PartialEq",
    apiextensions = "v1",
    printcolumn = r#"{"name":"URL","type":"string","jsonPath":".status.address.url"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MemoryBrokerSpec {
    /// Settings of the in-memory event buffer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryOptions>,
    /// Options shared by every broker variant.
    #[serde(default)]
    pub broker: BrokerOptions,
}

/// Settings of the in-memory event buffer.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemoryOptions {
    /// The maximum number of events held by the buffer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_size: Option<i32>,
}

impl MemoryBroker {
    /// The configured buffer size, if any.
    pub fn buffer_size(&self) -> Option<i32> {
        self.spec.memory.as_ref().and_then(|mem| mem.buffer_size)
    }
}

impl StatusResource for MemoryBroker {
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

impl ReconcilableBroker for MemoryBroker {
    const KIND: BrokerKind = BrokerKind::Memory;

    fn reconcilable_broker_spec(&self) -> &BrokerOptions {
        &self.spec.broker
    }
}

//! TriggerMesh eventing CRDs.
//!
//! References:
//! - https://kubernetes.io/docs/tasks/extend-kubernetes/custom-resources/custom-resource-definitions/
//! - https://kubernetes.io/docs/tasks/extend-kubernetes/custom-resources/custom-resource-definitions/#additional-printer-columns
//! - https://github.com/cloudevents/spec/blob/main/subscriptions/spec.md#324-filters

mod common;
mod memorybroker;
mod redisbroker;
mod replay;
mod trigger;

use kube::Resource;

use crate::status::{Condition, ConditionedStatus, CONDITION_READY};
pub use common::{
    Addressable, BackoffPolicy, Bounds, BrokerOptions, BrokerRef, BrokerStatus, DeliverySpec, Destination, Filter, KReference, Observability, Range,
};
pub use memorybroker::{MemoryBroker, MemoryBrokerSpec, MemoryOptions};
pub use redisbroker::{RedisBroker, RedisBrokerSpec, RedisConnection, RedisOptions, SecretKeyRef, SecretValueFromSource};
pub use replay::{Replay, ReplaySpec, ReplayStatus};
pub use trigger::{Trigger, TriggerSpec, TriggerStatus};

/// A convenience trait built around the fact that all implementors
/// must have the following attributes.
pub trait RequiredMetadata {
    /// The namespace of this object.
    fn namespace(&self) -> &str;

    /// The name of this object.
    fn name(&self) -> &str;
}

macro_rules! impl_required_metadata {
    ($($kind:ty),*) => {
        $(
            impl RequiredMetadata for $kind {
                fn namespace(&self) -> &str {
                    self.meta().namespace.as_deref().unwrap_or_default()
                }

                fn name(&self) -> &str {
                    self.meta().name.as_deref().unwrap_or_default()
                }
            }
        )*
    };
}

impl_required_metadata!(MemoryBroker, RedisBroker, Trigger, Replay);

/// A custom resource carrying a conditioned status sub-resource.
pub trait StatusResource: Resource + RequiredMetadata {
    /// The status type of this resource.
    type Status: Clone + Default + PartialEq + serde::Serialize;

    /// The current status, if any.
    fn status(&self) -> Option<&Self::Status>;

    /// The status of this resource, initializing it if needed.
    fn status_mut(&mut self) -> &mut Self::Status;

    /// The conditions & observed generation of this resource.
    fn conditioned_status(&self) -> Option<&ConditionedStatus>;

    /// The conditions & observed generation of this resource, initializing them if needed.
    fn conditioned_status_mut(&mut self) -> &mut ConditionedStatus;

    /// The top-level `Ready` condition of this resource.
    fn ready_condition(&self) -> Option<&Condition> {
        self.conditioned_status().and_then(|status| status.get_condition(CONDITION_READY))
    }
}

/// The broker variants handled by this project.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BrokerKind {
    Memory,
    Redis,
}

impl BrokerKind {
    /// Parse a broker kind from its CRD kind name.
    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "MemoryBroker" => Some(Self::Memory),
            "RedisBroker" => Some(Self::Redis),
            _ => None,
        }
    }

    /// The CRD kind name of this variant.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "MemoryBroker",
            Self::Redis => "RedisBroker",
        }
    }

    /// The suffix used when naming objects owned by a broker of this variant.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Memory => "mb",
            Self::Redis => "rb",
        }
    }
}

impl std::fmt::Display for BrokerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The interface shared by every broker variant.
pub trait ReconcilableBroker: StatusResource<Status = BrokerStatus> + Resource<DynamicType = ()> + Clone {
    /// The variant of this broker type.
    const KIND: BrokerKind;

    /// The suffix used when naming objects owned by this broker.
    fn owned_objects_suffix(&self) -> &'static str {
        Self::KIND.suffix()
    }

    /// The options shared by every broker variant.
    fn reconcilable_broker_spec(&self) -> &BrokerOptions;

    /// The status of this broker.
    fn reconcilable_broker_status(&self) -> Option<&BrokerStatus> {
        self.status()
    }
}

/// A broker of any variant.
#[derive(Clone, Debug, PartialEq)]
pub enum Broker {
    Memory(MemoryBroker),
    Redis(RedisBroker),
}

impl Broker {
    pub fn kind(&self) -> BrokerKind {
        match self {
            Self::Memory(_) => BrokerKind::Memory,
            Self::Redis(_) => BrokerKind::Redis,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Memory(broker) => broker.name(),
            Self::Redis(broker) => broker.name(),
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            Self::Memory(broker) => broker.namespace(),
            Self::Redis(broker) => broker.namespace(),
        }
    }

    pub fn status(&self) -> Option<&BrokerStatus> {
        match self {
            Self::Memory(broker) => broker.status.as_ref(),
            Self::Redis(broker) => broker.status.as_ref(),
        }
    }

    /// The top-level `Ready` condition of this broker.
    pub fn ready_condition(&self) -> Option<&Condition> {
        self.status().and_then(|status| status.status.get_condition(CONDITION_READY))
    }

    /// The resolved address of this broker, if it is addressable.
    pub fn address(&self) -> Option<&str> {
        self.status()
            .and_then(|status| status.address.as_ref())
            .and_then(|addr| addr.url.as_deref())
    }
}

impl From<MemoryBroker> for Broker {
    fn from(broker: MemoryBroker) -> Self {
        Self::Memory(broker)
    }
}

impl From<RedisBroker> for Broker {
    fn from(broker: RedisBroker) -> Self {
        Self::Redis(broker)
    }
}

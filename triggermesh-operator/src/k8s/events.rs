use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::api::{Api, PostParams};
use kube::client::Client;
use tokio::time::timeout;

use crate::k8s::API_TIMEOUT;

/// The component name reported as the source of published events.
pub const EVENT_SOURCE_COMPONENT: &str = "triggermesh-core";

/// The type of a K8s event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Warning => "Warning",
        }
    }
}

/// A publisher of K8s events about the objects handled by the operator.
///
/// Publishing is best effort: failures are logged and never surfaced to the caller.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn publish(&self, object: &ObjectReference, type_: EventType, reason: &str, message: &str);

    /// Publish a `Warning` event.
    async fn warn(&self, object: &ObjectReference, reason: &str, message: &str) {
        self.publish(object, EventType::Warning, reason, message).await
    }

    /// Publish a `Normal` event.
    async fn info(&self, object: &ObjectReference, reason: &str, message: &str) {
        self.publish(object, EventType::Normal, reason, message).await
    }
}

/// An `EventRecorder` creating core/v1 events through the K8s API.
pub struct KubeRecorder {
    client: Client,
}

impl KubeRecorder {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn build_event(object: &ObjectReference, type_: EventType, reason: &str, message: &str) -> Event {
        let now = Time(chrono::Utc::now());
        Event {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}.", object.name.as_deref().unwrap_or("unknown"))),
                namespace: object.namespace.clone(),
                ..Default::default()
            },
            involved_object: object.clone(),
            type_: Some(type_.as_str().into()),
            reason: Some(reason.into()),
            message: Some(message.into()),
            first_timestamp: Some(now.clone()),
            last_timestamp: Some(now),
            count: Some(1),
            source: Some(EventSource {
                component: Some(EVENT_SOURCE_COMPONENT.into()),
                host: None,
            }),
            ..Default::default()
        }
    }
}

#[async_trait]
impl EventRecorder for KubeRecorder {
    #[tracing::instrument(level = "debug", skip(self, object, message), fields(name = ?object.name))]
    async fn publish(&self, object: &ObjectReference, type_: EventType, reason: &str, message: &str) {
        let namespace = object.namespace.as_deref().unwrap_or("default");
        let api: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        let event = Self::build_event(object, type_, reason, message);
        match timeout(API_TIMEOUT, api.create(&PostParams::default(), &event)).await {
            Ok(Ok(_)) => (),
            Ok(Err(err)) => tracing::warn!(error = ?err, "error publishing k8s event"),
            Err(_) => tracing::warn!("timeout while publishing k8s event"),
        }
    }
}

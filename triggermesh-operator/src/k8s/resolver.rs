use std::sync::Arc;

use k8s_openapi::api::core::v1::Service;
use url::Url;

use crate::error::ResolveError;
use crate::k8s::Indexer;
use triggermesh_core::crd::{Broker, BrokerKind, Destination, KReference, MemoryBroker, RedisBroker};

/// The cluster domain used when building in-cluster service URLs.
pub const CLUSTER_DOMAIN: &str = "svc.cluster.local";

/// Resolves `Destination`s to absolute URIs using the local caches.
///
/// Supported references are core/v1 Services and TriggerMesh brokers. A reference without a
/// namespace is resolved in the namespace of the referrer.
#[derive(Clone)]
pub struct UriResolver {
    services: Arc<Indexer<Service>>,
    memory_brokers: Arc<Indexer<MemoryBroker>>,
    redis_brokers: Arc<Indexer<RedisBroker>>,
}

impl UriResolver {
    pub fn new(services: Arc<Indexer<Service>>, memory_brokers: Arc<Indexer<MemoryBroker>>, redis_brokers: Arc<Indexer<RedisBroker>>) -> Self {
        Self {
            services,
            memory_brokers,
            redis_brokers,
        }
    }

    /// Resolve the given destination of an object living in `default_namespace`.
    #[tracing::instrument(level = "debug", skip(self, dest))]
    pub fn uri_from_destination(&self, dest: &Destination, default_namespace: &str) -> Result<String, ResolveError> {
        let uri = dest.uri.as_deref().filter(|uri| !uri.is_empty());
        match (dest.ref_.as_ref(), uri) {
            (Some(reference), None) => self.uri_from_reference(reference, default_namespace),
            (Some(reference), Some(uri)) => {
                let base = self.uri_from_reference(reference, default_namespace)?;
                let base = Url::parse(&base).map_err(|err| ResolveError::InvalidUri {
                    uri: base.clone(),
                    reason: err.to_string(),
                })?;
                base.join(uri).map(String::from).map_err(|err| ResolveError::InvalidUri {
                    uri: uri.into(),
                    reason: err.to_string(),
                })
            }
            (None, Some(uri)) => {
                let parsed = Url::parse(uri).map_err(|err| ResolveError::InvalidUri {
                    uri: uri.into(),
                    reason: err.to_string(),
                })?;
                if !parsed.has_host() {
                    return Err(ResolveError::InvalidUri {
                        uri: uri.into(),
                        reason: "URI must be absolute".into(),
                    });
                }
                Ok(uri.into())
            }
            (None, None) => Err(ResolveError::EmptyDestination),
        }
    }

    fn uri_from_reference(&self, reference: &KReference, default_namespace: &str) -> Result<String, ResolveError> {
        let namespace = reference.namespace.as_deref().filter(|ns| !ns.is_empty()).unwrap_or(default_namespace);
        let group = reference_group(reference);
        if reference.kind == "Service" && group.is_empty() {
            let _service = self.services.get(namespace, &reference.name)?;
            return Ok(format!("http://{}.{}.{}", reference.name, namespace, CLUSTER_DOMAIN));
        }

        let broker_kind = BrokerKind::from_kind(&reference.kind).filter(|_| group == triggermesh_core::GROUP || group.is_empty());
        let broker: Broker = match broker_kind {
            Some(BrokerKind::Memory) => self.memory_brokers.get(namespace, &reference.name)?.into(),
            Some(BrokerKind::Redis) => self.redis_brokers.get(namespace, &reference.name)?.into(),
            None => {
                return Err(ResolveError::UnsupportedKind {
                    kind: reference.kind.clone(),
                    group: group.into(),
                })
            }
        };
        broker.address().map(String::from).ok_or_else(|| ResolveError::NotAddressable {
            kind: reference.kind.clone(),
            namespace: namespace.into(),
            name: reference.name.clone(),
        })
    }
}

/// The API group of a reference, from its API version if given, else from its group.
fn reference_group(reference: &KReference) -> &str {
    match reference.api_version.as_deref().filter(|av| !av.is_empty()) {
        Some(api_version) => api_version.rsplit_once('/').map(|(group, _)| group).unwrap_or(""),
        None => reference.group.as_deref().unwrap_or(""),
    }
}

//! Test fixtures.
//!
//! `FakeClient`s write straight into the `Indexer` handed to the code under test, acting as an
//! API server paired with an always up-to-date informer. Every write is recorded, in order, in a
//! `Tracker` shared by all clients of a test.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentCondition, DeploymentStatus};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, EndpointAddress, EndpointSubset, Endpoints, ObjectReference, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::ListParams;
use kube::error::ErrorResponse;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ClientError, ClientResult};
use crate::k8s::{kind_of, EventRecorder, EventType, Indexer, KubeObject, ResourceClient, UriResolver, WatchEventResult};
use crate::reconciler::{ObjectReconciler, Store};
use triggermesh_core::crd::{
    BrokerRef, BrokerStatus, Destination, KReference, MemoryBroker, MemoryBrokerSpec, RedisBroker, RedisBrokerSpec, Replay, ReplaySpec, Trigger, TriggerSpec,
};
use triggermesh_core::status::{Condition, ConditionSeverity, ConditionStatus, ConditionedStatus, CONDITION_READY};

pub const NAMESPACE: &str = "test-namespace";

/// The verb of a recorded write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    Create,
    Update,
    PatchStatus,
    Delete,
}

/// A write recorded by a `FakeClient`.
#[derive(Clone, Debug, PartialEq)]
pub struct Action {
    pub verb: Verb,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    /// The written object, or the patch for `PatchStatus`.
    pub object: Value,
}

impl Action {
    /// Decode the written object.
    pub fn object_as<K: DeserializeOwned>(&self) -> K {
        serde_json::from_value(self.object.clone()).expect("error decoding recorded object")
    }
}

/// A log of the writes performed by every `FakeClient` of a test.
#[derive(Default)]
pub struct Tracker {
    actions: Mutex<Vec<Action>>,
    revision: AtomicU64,
}

impl Tracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, action: Action) {
        self.actions.lock().expect("tracker lock poisoned").push(action);
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// All writes recorded so far.
    pub fn actions(&self) -> Vec<Action> {
        self.actions.lock().expect("tracker lock poisoned").clone()
    }

    /// All writes of the given verb.
    pub fn actions_of(&self, verb: Verb) -> Vec<Action> {
        self.actions().into_iter().filter(|action| action.verb == verb).collect()
    }

    /// All writes except status patches.
    pub fn object_writes(&self) -> Vec<Action> {
        self.actions().into_iter().filter(|action| action.verb != Verb::PatchStatus).collect()
    }

    pub fn clear(&self) {
        self.actions.lock().expect("tracker lock poisoned").clear();
    }
}

/// An in-memory `ResourceClient`.
pub struct FakeClient<K> {
    tracker: Arc<Tracker>,
    indexer: Arc<Indexer<K>>,
    failures: Mutex<HashSet<Verb>>,
    get_failure: Mutex<bool>,
}

impl<K: KubeObject> FakeClient<K> {
    /// Create a new client backed by an empty, synced cache.
    pub fn new(tracker: Arc<Tracker>) -> Arc<Self> {
        let indexer = Arc::new(Indexer::new());
        indexer.replace(vec![]);
        Arc::new(Self {
            tracker,
            indexer,
            failures: Mutex::new(HashSet::new()),
            get_failure: Mutex::new(false),
        })
    }

    /// The cache written by this client.
    pub fn indexer(&self) -> Arc<Indexer<K>> {
        self.indexer.clone()
    }

    /// Seed an object without recording a write.
    pub fn seed(&self, obj: K) {
        self.indexer.apply(obj);
    }

    /// Make every subsequent call of the given verb fail with an internal error.
    pub fn fail_on(&self, verb: Verb) {
        self.failures.lock().expect("failures lock poisoned").insert(verb);
    }

    /// Make every subsequent `get` fail with an internal error.
    pub fn fail_on_get(&self) {
        *self.get_failure.lock().expect("failures lock poisoned") = true;
    }

    fn check_failure(&self, verb: Verb) -> ClientResult<()> {
        if self.failures.lock().expect("failures lock poisoned").contains(&verb) {
            return Err(api_error(500, "InternalError", &format!("injected {:?} failure", verb)));
        }
        Ok(())
    }

    fn record(&self, verb: Verb, namespace: &str, name: &str, object: Value) {
        self.tracker.record(Action {
            verb,
            kind: kind_of::<K>(),
            namespace: namespace.into(),
            name: name.into(),
            object,
        });
    }

    fn coordinates(obj: &K) -> (String, String) {
        let meta = obj.meta();
        (meta.namespace.clone().unwrap_or_default(), meta.name.clone().unwrap_or_default())
    }
}

#[async_trait]
impl<K: KubeObject> ResourceClient<K> for FakeClient<K> {
    async fn get(&self, namespace: &str, name: &str) -> ClientResult<K> {
        if *self.get_failure.lock().expect("failures lock poisoned") {
            return Err(api_error(500, "InternalError", "injected get failure"));
        }
        self.indexer.get(namespace, name)
    }

    async fn list(&self, namespace: &str, _params: &ListParams) -> ClientResult<Vec<K>> {
        if namespace.is_empty() {
            self.indexer.list_all()
        } else {
            self.indexer.list(namespace)
        }
    }

    fn watch(&self, _namespace: &str, _params: ListParams) -> BoxStream<'static, WatchEventResult<K>> {
        futures::stream::empty().boxed()
    }

    async fn create(&self, obj: &K) -> ClientResult<K> {
        self.check_failure(Verb::Create)?;
        let (namespace, name) = Self::coordinates(obj);
        if self.indexer.get(&namespace, &name).is_ok() {
            return Err(api_error(409, "AlreadyExists", &format!("{} {} already exists", kind_of::<K>(), name)));
        }
        let rev = self.tracker.next_revision();
        let mut created = obj.clone();
        created.meta_mut().uid = Some(format!("uid-{}", rev));
        created.meta_mut().resource_version = Some(rev.to_string());
        self.record(Verb::Create, &namespace, &name, serde_json::to_value(obj).expect("error encoding object"));
        self.indexer.apply(created.clone());
        Ok(created)
    }

    async fn update(&self, obj: &K) -> ClientResult<K> {
        self.check_failure(Verb::Update)?;
        let (namespace, name) = Self::coordinates(obj);
        let current = self.indexer.get(&namespace, &name)?;
        if current.meta().resource_version != obj.meta().resource_version {
            return Err(api_error(409, "Conflict", &format!("{} {} has been modified", kind_of::<K>(), name)));
        }
        let rev = self.tracker.next_revision();
        let mut updated = obj.clone();
        updated.meta_mut().uid = current.meta().uid.clone();
        updated.meta_mut().resource_version = Some(rev.to_string());
        self.record(Verb::Update, &namespace, &name, serde_json::to_value(obj).expect("error encoding object"));
        self.indexer.apply(updated.clone());
        Ok(updated)
    }

    async fn patch_status(&self, namespace: &str, name: &str, patch: &Value) -> ClientResult<K> {
        self.check_failure(Verb::PatchStatus)?;
        let current = self.indexer.get(namespace, name)?;
        let mut doc = serde_json::to_value(&current).expect("error encoding object");
        if let Some(status) = patch.get("status") {
            json_merge(&mut doc, &serde_json::json!({ "status": status }));
        }
        let mut patched: K = serde_json::from_value(doc).expect("error decoding patched object");
        patched.meta_mut().resource_version = Some(self.tracker.next_revision().to_string());
        self.record(Verb::PatchStatus, namespace, name, patch.clone());
        self.indexer.apply(patched.clone());
        Ok(patched)
    }

    async fn delete(&self, namespace: &str, name: &str) -> ClientResult<()> {
        self.check_failure(Verb::Delete)?;
        if let Ok(current) = self.indexer.get(namespace, name) {
            self.record(Verb::Delete, namespace, name, Value::Null);
            self.indexer.delete(&current);
        }
        Ok(())
    }
}

/// Apply an RFC 7386 JSON merge patch.
pub fn json_merge(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(patch) => {
            if !target.is_object() {
                *target = Value::Object(Default::default());
            }
            if let Value::Object(map) = target {
                for (key, value) in patch {
                    if value.is_null() {
                        map.remove(key);
                    } else {
                        json_merge(map.entry(key.clone()).or_insert(Value::Null), value);
                    }
                }
            }
        }
        _ => *target = patch.clone(),
    }
}

/// Build a K8s API error.
pub fn api_error(code: u16, reason: &str, message: &str) -> ClientError {
    ClientError::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".into(),
        message: message.into(),
        reason: reason.into(),
        code,
    }))
}

/// An event published through a `FakeRecorder`.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedEvent {
    pub name: String,
    pub type_: EventType,
    pub reason: String,
    pub message: String,
}

/// An `EventRecorder` keeping every published event in memory.
#[derive(Default)]
pub struct FakeRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl FakeRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().expect("recorder lock poisoned").clone()
    }

    /// The reasons of every published `Warning` event.
    pub fn warnings(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|event| event.type_ == EventType::Warning)
            .map(|event| event.reason)
            .collect()
    }
}

#[async_trait]
impl EventRecorder for FakeRecorder {
    async fn publish(&self, object: &ObjectReference, type_: EventType, reason: &str, message: &str) {
        self.events.lock().expect("recorder lock poisoned").push(RecordedEvent {
            name: object.name.clone().unwrap_or_default(),
            type_,
            reason: reason.into(),
            message: message.into(),
        });
    }
}

/// Fake clients of every kind handled by the operator, sharing a single `Tracker`.
pub struct FakeCluster {
    pub tracker: Arc<Tracker>,
    pub recorder: Arc<FakeRecorder>,
    pub memory_brokers: Arc<FakeClient<MemoryBroker>>,
    pub redis_brokers: Arc<FakeClient<RedisBroker>>,
    pub triggers: Arc<FakeClient<Trigger>>,
    pub replays: Arc<FakeClient<Replay>>,
    pub secrets: Arc<FakeClient<Secret>>,
    pub service_accounts: Arc<FakeClient<ServiceAccount>>,
    pub role_bindings: Arc<FakeClient<RoleBinding>>,
    pub deployments: Arc<FakeClient<Deployment>>,
    pub services: Arc<FakeClient<Service>>,
    pub config_maps: Arc<FakeClient<ConfigMap>>,
    pub jobs: Arc<FakeClient<Job>>,
    pub endpoints: Arc<FakeClient<Endpoints>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        let tracker = Tracker::new();
        Self {
            recorder: FakeRecorder::new(),
            memory_brokers: FakeClient::new(tracker.clone()),
            redis_brokers: FakeClient::new(tracker.clone()),
            triggers: FakeClient::new(tracker.clone()),
            replays: FakeClient::new(tracker.clone()),
            secrets: FakeClient::new(tracker.clone()),
            service_accounts: FakeClient::new(tracker.clone()),
            role_bindings: FakeClient::new(tracker.clone()),
            deployments: FakeClient::new(tracker.clone()),
            services: FakeClient::new(tracker.clone()),
            config_maps: FakeClient::new(tracker.clone()),
            jobs: FakeClient::new(tracker.clone()),
            endpoints: FakeClient::new(tracker.clone()),
            tracker,
        }
    }

    /// The sub-reconcilers of owned objects, backed by this cluster.
    pub fn objects(&self) -> Arc<ObjectReconciler> {
        Arc::new(ObjectReconciler {
            secrets: store(&self.secrets),
            service_accounts: store(&self.service_accounts),
            role_bindings: store(&self.role_bindings),
            deployments: store(&self.deployments),
            services: store(&self.services),
            config_maps: store(&self.config_maps),
            jobs: store(&self.jobs),
            endpoints: self.endpoints.indexer(),
            recorder: self.recorder.clone(),
        })
    }

    /// A URI resolver backed by this cluster.
    pub fn resolver(&self) -> Arc<UriResolver> {
        Arc::new(UriResolver::new(self.services.indexer(), self.memory_brokers.indexer(), self.redis_brokers.indexer()))
    }
}

fn store<K: crate::reconciler::OwnedObject>(client: &Arc<FakeClient<K>>) -> Store<K> {
    Store::new(client.clone(), client.indexer())
}

fn object_meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        namespace: Some(namespace.into()),
        name: Some(name.into()),
        uid: Some(format!("{}-{}-uid", namespace, name)),
        generation: Some(1),
        ..Default::default()
    }
}

pub fn memory_broker(namespace: &str, name: &str) -> MemoryBroker {
    let mut broker = MemoryBroker::new(name, MemoryBrokerSpec::default());
    broker.metadata = object_meta(namespace, name);
    broker
}

pub fn redis_broker(namespace: &str, name: &str) -> RedisBroker {
    let mut broker = RedisBroker::new(name, RedisBrokerSpec::default());
    broker.metadata = object_meta(namespace, name);
    broker
}

/// A broker status with the given readiness and address.
pub fn broker_status(ready: ConditionStatus, url: Option<&str>) -> BrokerStatus {
    BrokerStatus {
        status: ConditionedStatus {
            observed_generation: Some(1),
            conditions: vec![Condition {
                type_: CONDITION_READY.into(),
                status: ready,
                severity: ConditionSeverity::Error,
                last_transition_time: None,
                reason: None,
                message: None,
            }],
        },
        address: url.map(|url| triggermesh_core::crd::Addressable { url: Some(url.into()) }),
    }
}

pub fn broker_ref(kind: &str, name: &str) -> BrokerRef {
    BrokerRef {
        group: triggermesh_core::GROUP.into(),
        kind: kind.into(),
        name: name.into(),
        ..Default::default()
    }
}

pub fn service_destination(namespace: Option<&str>, name: &str) -> Destination {
    Destination {
        ref_: Some(KReference {
            kind: "Service".into(),
            namespace: namespace.map(String::from),
            name: name.into(),
            api_version: Some("v1".into()),
            group: None,
        }),
        uri: None,
    }
}

pub fn uri_destination(uri: &str) -> Destination {
    Destination {
        ref_: None,
        uri: Some(uri.into()),
    }
}

pub fn trigger(namespace: &str, name: &str, broker: BrokerRef, target: Destination) -> Trigger {
    let mut trigger = Trigger::new(
        name,
        TriggerSpec {
            broker,
            target,
            ..Default::default()
        },
    );
    trigger.metadata = object_meta(namespace, name);
    trigger
}

pub fn replay(namespace: &str, name: &str, broker: BrokerRef, target: Destination) -> Replay {
    let mut replay = Replay::new(
        name,
        ReplaySpec {
            broker,
            target,
            ..Default::default()
        },
    );
    replay.metadata = object_meta(namespace, name);
    replay
}

pub fn service(namespace: &str, name: &str) -> Service {
    Service {
        metadata: object_meta(namespace, name),
        ..Default::default()
    }
}

/// An Endpoints object, with a single ready address if `ready` is set.
pub fn endpoints(namespace: &str, name: &str, labels: BTreeMap<String, String>, ready: bool) -> Endpoints {
    let mut metadata = object_meta(namespace, name);
    metadata.labels = Some(labels);
    let subsets = if ready {
        Some(vec![EndpointSubset {
            addresses: Some(vec![EndpointAddress {
                ip: "10.0.0.1".into(),
                ..Default::default()
            }]),
            ..Default::default()
        }])
    } else {
        None
    };
    Endpoints { metadata, subsets }
}

/// Mark a deployment as available, the way the deployment controller does.
pub fn make_available(mut deployment: Deployment) -> Deployment {
    deployment.status = Some(DeploymentStatus {
        conditions: Some(vec![DeploymentCondition {
            type_: "Available".into(),
            status: "True".into(),
            reason: Some("MinimumReplicasAvailable".into()),
            ..Default::default()
        }]),
        ..Default::default()
    });
    deployment
}

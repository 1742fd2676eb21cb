use anyhow::Result;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Endpoints, Secret, Service};
use triggermesh_core::crd::{BrokerRef, MemoryBroker, ReconcilableBroker, RedisBroker, Replay, Trigger};

use crate::controllers::wiring::*;
use crate::fixtures::{broker_ref, endpoints, memory_broker, redis_broker, replay, trigger, uri_destination, FakeCluster, NAMESPACE};
use crate::k8s::{EventHandler, ObjectKey, WorkQueue};
use crate::resources::{broker_service, config_secret, Owner, ROLE_BROKER, ROLE_JOB};

async fn drain(queue: &WorkQueue) -> Vec<ObjectKey> {
    let mut keys = Vec::new();
    while !queue.is_empty() {
        if let Some(key) = queue.get().await {
            queue.done(&key);
            keys.push(key);
        }
    }
    keys
}

fn key(name: &str) -> ObjectKey {
    ObjectKey::new(NAMESPACE, name)
}

#[tokio::test]
async fn own_kind_is_enqueued() -> Result<()> {
    let queue = WorkQueue::new("test");
    let handler = enqueue_self::<MemoryBroker>(queue.clone());

    handler.on_add(&memory_broker(NAMESPACE, "test-broker"));
    handler.on_delete(&memory_broker(NAMESPACE, "other-broker"));

    let keys = drain(&queue).await;
    assert!(keys == vec![key("test-broker"), key("other-broker")], "unexpected keys {:?}", keys);

    Ok(())
}

#[tokio::test]
async fn owned_objects_enqueue_their_controller() -> Result<()> {
    let queue = WorkQueue::new("test");
    let handler = enqueue_controller::<Secret, MemoryBroker>(queue.clone());
    let memory_owned = config_secret(&Owner::from_broker(&memory_broker(NAMESPACE, "test-broker")), String::new());
    let redis_owned = config_secret(&Owner::from_broker(&redis_broker(NAMESPACE, "redis-broker")), String::new());
    let mut unowned = memory_owned.clone();
    unowned.metadata.owner_references = None;

    handler.on_add(&memory_owned);
    handler.on_add(&redis_owned);
    handler.on_add(&unowned);

    let keys = drain(&queue).await;
    assert!(keys == vec![key("test-broker")], "expected only the memory broker to be enqueued, got {:?}", keys);

    Ok(())
}

#[tokio::test]
async fn endpoints_enqueue_the_broker_of_their_service() -> Result<()> {
    let cluster = FakeCluster::new();
    let broker = memory_broker(NAMESPACE, "test-broker");
    let owner = Owner::from_broker(&broker);
    cluster.services.seed(broker_service(&owner, broker.reconcilable_broker_spec()));
    let queue = WorkQueue::new("test");
    let handler = enqueue_broker_of_endpoints::<MemoryBroker>(queue.clone(), cluster.services.indexer());

    let name = owner.object_name(ROLE_BROKER);
    handler.on_update(
        &endpoints(NAMESPACE, &name, owner.labels(ROLE_BROKER), false),
        &endpoints(NAMESPACE, &name, owner.labels(ROLE_BROKER), true),
    );
    // Same labels, but no service to trace the owner through.
    handler.on_add(&endpoints(NAMESPACE, "orphan-mb-broker", owner.labels(ROLE_BROKER), true));
    // Endpoints of another broker variant.
    let redis_owner = Owner::from_broker(&redis_broker(NAMESPACE, "test-broker"));
    handler.on_add(&endpoints(NAMESPACE, &name, redis_owner.labels(ROLE_BROKER), true));
    handler.on_add(&Endpoints::default());

    let keys = drain(&queue).await;
    assert!(keys == vec![key("test-broker")], "unexpected keys {:?}", keys);

    Ok(())
}

#[tokio::test]
async fn services_without_broker_owner_are_not_followed() -> Result<()> {
    let cluster = FakeCluster::new();
    let owner = Owner::from_broker(&memory_broker(NAMESPACE, "test-broker"));
    let name = owner.object_name(ROLE_BROKER);
    let mut service = Service::default();
    service.metadata.namespace = Some(NAMESPACE.into());
    service.metadata.name = Some(name.clone());
    cluster.services.seed(service);
    let queue = WorkQueue::new("test");
    let handler = enqueue_broker_of_endpoints::<MemoryBroker>(queue.clone(), cluster.services.indexer());

    handler.on_add(&endpoints(NAMESPACE, &name, owner.labels(ROLE_BROKER), true));

    assert!(queue.is_empty(), "expected no key for an unowned service");

    Ok(())
}

#[tokio::test]
async fn triggers_enqueue_their_existing_broker() -> Result<()> {
    let cluster = FakeCluster::new();
    cluster.redis_brokers.seed(redis_broker(NAMESPACE, "b1"));
    cluster.redis_brokers.seed(redis_broker(NAMESPACE, "b2"));
    let queue = WorkQueue::new("test");
    let handler = EnqueueReferencedBroker::<RedisBroker>::new(queue.clone(), cluster.redis_brokers.indexer());
    let target = || uri_destination("http://example.com/");

    handler.on_add(&trigger(NAMESPACE, "t1", broker_ref("RedisBroker", "b1"), target()));
    handler.on_add(&trigger(NAMESPACE, "t2", broker_ref("RedisBroker", "missing"), target()));
    handler.on_add(&trigger(NAMESPACE, "t3", broker_ref("MemoryBroker", "b2"), target()));
    let keys = drain(&queue).await;
    assert!(keys == vec![key("b1")], "unexpected keys {:?}", keys);

    // Moving a trigger refreshes both the broker it left and the one it joined.
    handler.on_update(
        &trigger(NAMESPACE, "t1", broker_ref("RedisBroker", "b1"), target()),
        &trigger(NAMESPACE, "t1", broker_ref("RedisBroker", "b2"), target()),
    );
    let keys = drain(&queue).await;
    assert!(keys == vec![key("b1"), key("b2")], "unexpected keys {:?}", keys);

    Ok(())
}

#[tokio::test]
async fn broker_changes_enqueue_their_referrers() -> Result<()> {
    let cluster = FakeCluster::new();
    let target = || uri_destination("http://example.com/");
    cluster.triggers.seed(trigger(NAMESPACE, "t1", broker_ref("MemoryBroker", "test-broker"), target()));
    cluster.triggers.seed(trigger(NAMESPACE, "t2", broker_ref("RedisBroker", "test-broker"), target()));
    cluster.triggers.seed(trigger("other-ns", "t3", broker_ref("MemoryBroker", "test-broker"), target()));
    let cross_namespace = BrokerRef {
        namespace: Some(NAMESPACE.into()),
        ..broker_ref("MemoryBroker", "test-broker")
    };
    cluster.triggers.seed(trigger("other-ns", "t4", cross_namespace, target()));
    let queue = WorkQueue::new("test");
    let handler = enqueue_referrers::<MemoryBroker, Trigger>(queue.clone(), cluster.triggers.indexer());

    handler.on_add(&memory_broker(NAMESPACE, "test-broker"));

    let mut keys = drain(&queue).await;
    keys.sort();
    assert!(keys == vec![ObjectKey::new("other-ns", "t4"), key("t1")], "unexpected keys {:?}", keys);

    Ok(())
}

#[tokio::test]
async fn replay_jobs_enqueue_their_replay() -> Result<()> {
    let queue = WorkQueue::new("test");
    let handler = enqueue_controller::<Job, Replay>(queue.clone());
    let replay = replay(NAMESPACE, "test-replay", broker_ref("RedisBroker", "b1"), uri_destination("http://example.com/"));
    let job = Job {
        metadata: Owner::from_replay(&replay).metadata(ROLE_JOB),
        ..Default::default()
    };

    handler.on_add(&job);

    let keys = drain(&queue).await;
    assert!(keys == vec![key("test-replay")], "unexpected keys {:?}", keys);

    Ok(())
}

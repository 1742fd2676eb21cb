use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use triggermesh_core::crd::{BrokerKind, BrokerRef, Trigger};
use triggermesh_core::status::*;

use crate::controllers::{merge_patch, BrokerListers, Controller, TriggerReconciler};
use crate::fixtures::{broker_ref, broker_status, memory_broker, redis_broker, service, service_destination, trigger, FakeCluster, Verb, NAMESPACE};
use crate::k8s::ObjectKey;

fn listers(cluster: &FakeCluster) -> BrokerListers {
    BrokerListers {
        memory: cluster.memory_brokers.indexer(),
        redis: cluster.redis_brokers.indexer(),
    }
}

fn trigger_controller(cluster: &FakeCluster) -> Controller<Trigger> {
    let reconciler = TriggerReconciler::new(listers(cluster), cluster.resolver(), cluster.recorder.clone());
    Controller::new("trigger", cluster.triggers.clone(), cluster.triggers.indexer(), Arc::new(reconciler))
}

#[test]
fn merge_patch_only_carries_changes() -> Result<()> {
    let old = json!({
        "observedGeneration": 1,
        "address": {"url": "http://old"},
        "conditions": [{"type": "Ready", "status": "Unknown"}],
        "targetURI": "http://target",
    });
    let new = json!({
        "observedGeneration": 2,
        "conditions": [{"type": "Ready", "status": "True"}],
        "targetURI": "http://target",
    });

    let patch = merge_patch(&old, &new);

    let expected = json!({
        "observedGeneration": 2,
        "address": null,
        "conditions": [{"type": "Ready", "status": "True"}],
    });
    assert!(patch == expected, "unexpected patch {}", patch);

    Ok(())
}

#[test]
fn merge_patch_recurses_into_objects() -> Result<()> {
    let old = json!({"address": {"url": "http://old", "extra": true}});
    let new = json!({"address": {"url": "http://new", "extra": true}});

    let patch = merge_patch(&old, &new);

    assert!(patch == json!({"address": {"url": "http://new"}}), "unexpected patch {}", patch);
    assert!(merge_patch(&json!(null), &new) == new, "expected a null document to be replaced whole");

    Ok(())
}

#[tokio::test]
async fn deleted_objects_are_ignored() -> Result<()> {
    let cluster = FakeCluster::new();
    let controller = trigger_controller(&cluster);

    controller.reconcile_key(&ObjectKey::new(NAMESPACE, "gone")).await?;

    assert!(cluster.tracker.actions().is_empty(), "expected no writes for a deleted object");

    Ok(())
}

#[tokio::test]
async fn failures_are_requeued_according_to_their_kind() -> Result<()> {
    let cluster = FakeCluster::new();
    let mut broker = redis_broker(NAMESPACE, "test-broker");
    broker.status = Some(broker_status(ConditionStatus::True, Some("http://test-broker.example.com")));
    cluster.redis_brokers.seed(broker);
    cluster.triggers.seed(trigger(NAMESPACE, "transient", broker_ref("RedisBroker", "test-broker"), service_destination(None, "svc")));
    cluster.triggers.seed(trigger(NAMESPACE, "permanent", broker_ref("RedisBroker", "missing"), service_destination(None, "svc")));
    let controller = trigger_controller(&cluster);
    let (transient, permanent) = (ObjectKey::new(NAMESPACE, "transient"), ObjectKey::new(NAMESPACE, "permanent"));

    controller.handle_key(&transient).await;
    controller.handle_key(&permanent).await;
    assert!(
        controller.queue().num_requeues(&transient) == 1,
        "expected transient failure to be requeued with backoff, got {}",
        controller.queue().num_requeues(&transient)
    );
    assert!(
        controller.queue().num_requeues(&permanent) == 0,
        "expected permanent failure not to be retried, got {}",
        controller.queue().num_requeues(&permanent)
    );

    // Once the target appears the key is forgotten.
    cluster.services.seed(service(NAMESPACE, "svc"));
    controller.handle_key(&transient).await;
    assert!(
        controller.queue().num_requeues(&transient) == 0,
        "expected successful reconcile to reset backoff, got {}",
        controller.queue().num_requeues(&transient)
    );

    Ok(())
}

#[tokio::test]
async fn status_patch_failures_are_transient() -> Result<()> {
    let cluster = FakeCluster::new();
    let mut broker = redis_broker(NAMESPACE, "test-broker");
    broker.status = Some(broker_status(ConditionStatus::True, Some("http://test-broker.example.com")));
    cluster.redis_brokers.seed(broker);
    cluster.services.seed(service(NAMESPACE, "svc"));
    cluster.triggers.seed(trigger(NAMESPACE, "test-trigger", broker_ref("RedisBroker", "test-broker"), service_destination(None, "svc")));
    cluster.triggers.fail_on(Verb::PatchStatus);
    let controller = trigger_controller(&cluster);

    let err = match controller.reconcile_key(&ObjectKey::new(NAMESPACE, "test-trigger")).await {
        Ok(()) => anyhow::bail!("expected status update to fail"),
        Err(err) => err,
    };

    assert!(err.reason == "FailedStatusUpdate" && !err.permanent, "unexpected error {:?}", err);

    Ok(())
}

#[test]
fn broker_listers_honor_the_reference_namespace() -> Result<()> {
    let cluster = FakeCluster::new();
    cluster.memory_brokers.seed(memory_broker("other-ns", "test-broker"));
    let listers = listers(&cluster);

    let reference = BrokerRef {
        namespace: Some("other-ns".into()),
        ..broker_ref("MemoryBroker", "test-broker")
    };
    let broker = listers.get(&reference, NAMESPACE)?;
    assert!(
        broker.kind() == BrokerKind::Memory && broker.namespace() == "other-ns",
        "unexpected broker {:?}",
        broker
    );

    let err = match listers.get(&broker_ref("MemoryBroker", "test-broker"), NAMESPACE) {
        Ok(broker) => anyhow::bail!("expected lookup in the referrer namespace to fail, got {:?}", broker),
        Err(err) => err,
    };
    assert!(err.permanent && err.reason == REASON_BROKER_DOES_NOT_EXIST, "unexpected error {:?}", err);

    Ok(())
}

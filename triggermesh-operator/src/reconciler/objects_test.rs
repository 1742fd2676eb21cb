use std::sync::Arc;

use anyhow::Result;
use triggermesh_core::crd::BrokerStatus;
use triggermesh_core::status::*;

use crate::fixtures::{endpoints, make_available, memory_broker, FakeCluster, Verb, NAMESPACE};
use crate::k8s::Indexer;
use crate::reconciler::{object_reference, ObjectReconciler};
use crate::resources::*;

fn condition(status: &BrokerStatus, type_: &str) -> Option<(ConditionStatus, Option<String>)> {
    status.status.get_condition(type_).map(|cond| (cond.status, cond.reason.clone()))
}

#[tokio::test]
async fn converge_creates_then_leaves_equal_objects_alone() -> Result<()> {
    let cluster = FakeCluster::new();
    let objects = cluster.objects();
    let broker = memory_broker(NAMESPACE, "test-name");
    let owner = Owner::from_broker(&broker);
    let set = memory_broker_condition_set();
    let mut status = BrokerStatus::default();

    {
        let mut manager = BrokerStatusManager::new(&set, &mut status);
        manager.initialize_conditions();
        objects
            .reconcile_secret(&object_reference(&broker), &mut manager, config_secret(&owner, "triggers: {}\n".into()))
            .await?;
    }
    let creates = cluster.tracker.actions_of(Verb::Create);
    assert!(creates.len() == 1, "expected one create, got {:?}", creates);
    assert!(creates[0].kind == "Secret" && creates[0].name == "test-name-mb-config", "unexpected create {:?}", creates[0]);
    assert!(
        condition(&status, CONDITION_CONFIG_SECRET_READY) == Some((ConditionStatus::True, None)),
        "expected config secret to be ready, got {:?}",
        condition(&status, CONDITION_CONFIG_SECRET_READY)
    );

    cluster.tracker.clear();
    {
        let mut manager = BrokerStatusManager::new(&set, &mut status);
        objects
            .reconcile_secret(&object_reference(&broker), &mut manager, config_secret(&owner, "triggers: {}\n".into()))
            .await?;
    }
    assert!(cluster.tracker.actions().is_empty(), "expected no writes for an equal object, got {:?}", cluster.tracker.actions());

    Ok(())
}

#[tokio::test]
async fn converge_updates_drifted_objects_keeping_resource_version() -> Result<()> {
    let cluster = FakeCluster::new();
    let objects = cluster.objects();
    let broker = memory_broker(NAMESPACE, "test-name");
    let owner = Owner::from_broker(&broker);
    let set = memory_broker_condition_set();
    let mut status = BrokerStatus::default();
    let mut stale = config_secret(&owner, "triggers:\n  old: {}\n".into());
    stale.metadata.resource_version = Some("17".into());
    cluster.secrets.seed(stale);

    {
        let mut manager = BrokerStatusManager::new(&set, &mut status);
        objects
            .reconcile_secret(&object_reference(&broker), &mut manager, config_secret(&owner, "triggers: {}\n".into()))
            .await?;
    }
    let updates = cluster.tracker.actions_of(Verb::Update);
    assert!(updates.len() == 1, "expected one update, got {:?}", cluster.tracker.actions());
    let written: k8s_openapi::api::core::v1::Secret = updates[0].object_as();
    assert!(
        written.metadata.resource_version.as_deref() == Some("17"),
        "expected update to carry the current resource version, got {:?}",
        written.metadata.resource_version
    );

    Ok(())
}

#[tokio::test]
async fn converge_failure_marks_condition_and_publishes_warning() -> Result<()> {
    let cluster = FakeCluster::new();
    cluster.service_accounts.fail_on(Verb::Create);
    let objects = cluster.objects();
    let broker = memory_broker(NAMESPACE, "test-name");
    let owner = Owner::from_broker(&broker);
    let set = memory_broker_condition_set();
    let mut status = BrokerStatus::default();

    let res = {
        let mut manager = BrokerStatusManager::new(&set, &mut status);
        manager.initialize_conditions();
        objects
            .reconcile_service_account(
                &object_reference(&broker),
                &mut manager,
                service_account(&owner),
                role_binding(&owner, "test-name-mb-broker"),
            )
            .await
    };

    let err = match res {
        Ok(_) => anyhow::bail!("expected service account reconciliation to fail"),
        Err(err) => err,
    };
    assert!(err.reason == REASON_FAILED_SERVICE_ACCOUNT_CREATE, "unexpected reason {}", err.reason);
    assert!(!err.permanent, "expected a transient error");
    assert!(
        condition(&status, CONDITION_BROKER_SERVICE_ACCOUNT_READY)
            == Some((ConditionStatus::False, Some(REASON_FAILED_SERVICE_ACCOUNT_CREATE.into()))),
        "unexpected service account condition {:?}",
        condition(&status, CONDITION_BROKER_SERVICE_ACCOUNT_READY)
    );
    assert!(
        condition(&status, CONDITION_BROKER_ROLE_BINDING_READY).map(|(status, _)| status) == Some(ConditionStatus::Unknown),
        "expected role binding to be left untouched"
    );
    assert!(
        cluster.recorder.warnings() == vec![REASON_FAILED_SERVICE_ACCOUNT_CREATE.to_string()],
        "unexpected warnings {:?}",
        cluster.recorder.warnings()
    );
    assert!(cluster.tracker.actions().is_empty(), "expected no writes, got {:?}", cluster.tracker.actions());

    Ok(())
}

#[tokio::test]
async fn deployment_availability_is_propagated() -> Result<()> {
    let cluster = FakeCluster::new();
    let objects = cluster.objects();
    let broker = memory_broker(NAMESPACE, "test-name");
    let owner = Owner::from_broker(&broker);
    let set = memory_broker_condition_set();
    let mut status = BrokerStatus::default();
    let wiring = || BrokerWiring {
        image: "broker:1",
        pull_policy: "IfNotPresent",
        config_secret_name: "test-name-mb-config",
        service_account_name: "test-name-mb-broker",
        ..Default::default()
    };

    {
        let mut manager = BrokerStatusManager::new(&set, &mut status);
        manager.initialize_conditions();
        objects
            .reconcile_deployment(&object_reference(&broker), &mut manager, WorkloadRole::Broker, broker_deployment(&owner, wiring()))
            .await?;
    }
    assert!(
        condition(&status, CONDITION_BROKER_DEPLOYMENT_READY).map(|(status, _)| status) == Some(ConditionStatus::Unknown),
        "expected deployment without status to be unknown, got {:?}",
        condition(&status, CONDITION_BROKER_DEPLOYMENT_READY)
    );

    let current = cluster.deployments.indexer().get(NAMESPACE, "test-name-mb-broker")?;
    cluster.deployments.seed(make_available(current));
    cluster.tracker.clear();
    {
        let mut manager = BrokerStatusManager::new(&set, &mut status);
        objects
            .reconcile_deployment(&object_reference(&broker), &mut manager, WorkloadRole::Broker, broker_deployment(&owner, wiring()))
            .await?;
    }
    assert!(
        condition(&status, CONDITION_BROKER_DEPLOYMENT_READY).map(|(status, _)| status) == Some(ConditionStatus::True),
        "expected available deployment to be ready, got {:?}",
        condition(&status, CONDITION_BROKER_DEPLOYMENT_READY)
    );
    assert!(cluster.tracker.actions().is_empty(), "expected status changes not to cause updates, got {:?}", cluster.tracker.actions());

    Ok(())
}

#[tokio::test]
async fn endpoints_are_observed_without_writes() -> Result<()> {
    let cluster = FakeCluster::new();
    let objects = cluster.objects();
    let broker = memory_broker(NAMESPACE, "test-name");
    let (oref, owner) = (object_reference(&broker), Owner::from_broker(&broker));
    let name = owner.object_name(ROLE_BROKER);
    let set = memory_broker_condition_set();
    let mut status = BrokerStatus::default();

    {
        let mut manager = BrokerStatusManager::new(&set, &mut status);
        objects.observe_endpoints(&oref, &mut manager, WorkloadRole::Broker, NAMESPACE, &name).await?;
    }
    let missing = status.status.get_condition(CONDITION_BROKER_ENDPOINTS_READY).cloned();
    assert!(
        missing.as_ref().map(|cond| (cond.status, cond.reason.as_deref()))
            == Some((ConditionStatus::False, Some(REASON_UNAVAILABLE_ENDPOINTS))),
        "unexpected condition for missing endpoints {:?}",
        missing
    );

    cluster.endpoints.seed(endpoints(NAMESPACE, &name, owner.labels(ROLE_BROKER), false));
    {
        let mut manager = BrokerStatusManager::new(&set, &mut status);
        objects.observe_endpoints(&oref, &mut manager, WorkloadRole::Broker, NAMESPACE, &name).await?;
    }
    let unready = status.status.get_condition(CONDITION_BROKER_ENDPOINTS_READY).cloned();
    assert!(
        unready.as_ref().map(|cond| (cond.status, cond.reason.as_deref()))
            == Some((ConditionStatus::False, Some(REASON_UNAVAILABLE_ENDPOINTS))),
        "unexpected condition for unready endpoints {:?}",
        unready
    );
    assert!(
        missing.and_then(|cond| cond.message) != unready.and_then(|cond| cond.message),
        "expected missing and unready endpoints to be told apart"
    );

    cluster.endpoints.seed(endpoints(NAMESPACE, &name, owner.labels(ROLE_BROKER), true));
    {
        let mut manager = BrokerStatusManager::new(&set, &mut status);
        objects.observe_endpoints(&oref, &mut manager, WorkloadRole::Broker, NAMESPACE, &name).await?;
    }
    assert!(
        condition(&status, CONDITION_BROKER_ENDPOINTS_READY).map(|(status, _)| status) == Some(ConditionStatus::True),
        "expected ready endpoints, got {:?}",
        condition(&status, CONDITION_BROKER_ENDPOINTS_READY)
    );
    assert!(cluster.tracker.actions().is_empty(), "expected endpoints never to be written");
    assert!(cluster.recorder.warnings().is_empty(), "expected unavailable endpoints not to be warned about");

    Ok(())
}

#[tokio::test]
async fn endpoints_read_failures_are_warned_and_returned() -> Result<()> {
    let cluster = FakeCluster::new();
    let base = cluster.objects();
    // An endpoints cache which never received its initial listing.
    let objects = ObjectReconciler {
        secrets: base.secrets.clone(),
        service_accounts: base.service_accounts.clone(),
        role_bindings: base.role_bindings.clone(),
        deployments: base.deployments.clone(),
        services: base.services.clone(),
        config_maps: base.config_maps.clone(),
        jobs: base.jobs.clone(),
        endpoints: Arc::new(Indexer::new()),
        recorder: base.recorder.clone(),
    };
    let broker = memory_broker(NAMESPACE, "test-name");
    let name = Owner::from_broker(&broker).object_name(ROLE_BROKER);
    let set = memory_broker_condition_set();
    let mut status = BrokerStatus::default();

    let res = {
        let mut manager = BrokerStatusManager::new(&set, &mut status);
        manager.initialize_conditions();
        objects
            .observe_endpoints(&object_reference(&broker), &mut manager, WorkloadRole::Broker, NAMESPACE, &name)
            .await
    };

    let err = match res {
        Ok(()) => anyhow::bail!("expected endpoints observation to fail"),
        Err(err) => err,
    };
    assert!(err.reason == REASON_FAILED_ENDPOINTS_GET && !err.permanent, "unexpected error {:?}", err);
    assert!(
        condition(&status, CONDITION_BROKER_ENDPOINTS_READY) == Some((ConditionStatus::False, Some(REASON_FAILED_ENDPOINTS_GET.into()))),
        "unexpected endpoints condition {:?}",
        condition(&status, CONDITION_BROKER_ENDPOINTS_READY)
    );
    assert!(
        cluster.recorder.warnings() == vec![REASON_FAILED_ENDPOINTS_GET.to_string()],
        "unexpected warnings {:?}",
        cluster.recorder.warnings()
    );

    Ok(())
}

use std::sync::Arc;

use async_trait::async_trait;
use triggermesh_core::crd::{RequiredMetadata, StatusResource, Trigger};
use triggermesh_core::status::*;

use crate::controllers::{warn, BrokerListers, Reconciler};
use crate::error::{ReconcileError, ReconcileResult};
use crate::k8s::{EventRecorder, UriResolver};

/// The reconciler of Triggers.
///
/// Triggers own no objects. Their reconciliation only reflects the state of the referenced
/// broker and resolves the destinations which the broker reads back when building its config.
pub struct TriggerReconciler {
    conditions: ConditionSet,
    brokers: BrokerListers,
    resolver: Arc<UriResolver>,
    recorder: Arc<dyn EventRecorder>,
}

impl TriggerReconciler {
    pub fn new(brokers: BrokerListers, resolver: Arc<UriResolver>, recorder: Arc<dyn EventRecorder>) -> Self {
        Self {
            conditions: trigger_condition_set(),
            brokers,
            resolver,
            recorder,
        }
    }

    async fn reconcile_trigger(&self, trigger: &Trigger, status: &mut TriggerStatusManager<'_>) -> ReconcileResult<()> {
        let namespace = trigger.namespace();

        match self.brokers.get(&trigger.spec.broker, namespace) {
            Ok(broker) => status.propagate_broker_condition(broker.ready_condition()),
            Err(err) => {
                status.mark_broker_failed(&err.reason, &err.message);
                return Err(warn(self.recorder.as_ref(), trigger, err).await);
            }
        }

        match self.resolver.uri_from_destination(&trigger.spec.target, namespace) {
            Ok(uri) => status.mark_target_resolved(uri),
            Err(err) => {
                let err = ReconcileError::transient(REASON_FAILED_RESOLVE_REFERENCE, format!("failed to resolve target: {}", err));
                status.mark_target_failed(&err.reason, &err.message);
                return Err(warn(self.recorder.as_ref(), trigger, err).await);
            }
        }

        let dls = match trigger.dead_letter_sink() {
            Some(dls) => dls,
            None => {
                status.mark_dead_letter_sink_not_configured();
                return Ok(());
            }
        };
        match self.resolver.uri_from_destination(dls, namespace) {
            Ok(uri) => {
                status.mark_dead_letter_sink_resolved(uri);
                Ok(())
            }
            Err(err) => {
                let err = ReconcileError::transient(
                    REASON_FAILED_RESOLVE_REFERENCE,
                    format!("failed to resolve dead letter sink: {}", err),
                );
                status.mark_dead_letter_sink_failed(&err.reason, &err.message);
                Err(warn(self.recorder.as_ref(), trigger, err).await)
            }
        }
    }
}

#[async_trait]
impl Reconciler<Trigger> for TriggerReconciler {
    fn initialize(&self, trigger: &mut Trigger) {
        TriggerStatusManager::new(&self.conditions, trigger.status_mut()).initialize_conditions();
    }

    #[tracing::instrument(level = "debug", skip(self, trigger), fields(name = trigger.name(), namespace = trigger.namespace()))]
    async fn reconcile_kind(&self, trigger: &mut Trigger) -> ReconcileResult<()> {
        let mut status = std::mem::take(trigger.status_mut());
        let res = self
            .reconcile_trigger(trigger, &mut TriggerStatusManager::new(&self.conditions, &mut status))
            .await;
        *trigger.status_mut() = status;
        res
    }
}

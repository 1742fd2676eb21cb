use std::sync::Arc;

use async_trait::async_trait;
use triggermesh_core::crd::{Broker, RedisBroker, Replay, RequiredMetadata, StatusResource};
use triggermesh_core::status::*;

use crate::config::Config;
use crate::controllers::{warn, BrokerListers, Reconciler};
use crate::error::{ReconcileError, ReconcileResult};
use crate::k8s::UriResolver;
use crate::reconciler::{object_reference, ObjectReconciler};
use crate::resources::{self, Owner, ReplayJobSettings};

/// The reconciler of Replays.
///
/// When a replay image is configured, every Replay of a ready RedisBroker gets a Job which reads
/// the requested range of the broker's stream back into the Replay's target.
pub struct ReplayReconciler {
    config: Arc<Config>,
    conditions: ConditionSet,
    brokers: BrokerListers,
    resolver: Arc<UriResolver>,
    objects: Arc<ObjectReconciler>,
}

impl ReplayReconciler {
    pub fn new(config: Arc<Config>, brokers: BrokerListers, resolver: Arc<UriResolver>, objects: Arc<ObjectReconciler>) -> Self {
        let mut conditions = replay_condition_set();
        if config.replay_image().is_some() {
            conditions = conditions.with_dependents(&[CONDITION_REPLAY_JOB_READY]);
        }
        Self {
            config,
            conditions,
            brokers,
            resolver,
            objects,
        }
    }

    async fn reconcile_replay(&self, replay: &Replay, status: &mut ReplayStatusManager<'_>) -> ReconcileResult<()> {
        let namespace = replay.namespace();

        let broker = match self.brokers.get(&replay.spec.broker, namespace) {
            Ok(broker) => {
                status.propagate_broker_condition(broker.ready_condition());
                broker
            }
            Err(err) => {
                status.mark_broker_failed(&err.reason, &err.message);
                return Err(warn(self.objects.recorder.as_ref(), replay, err).await);
            }
        };

        let sink = match self.resolver.uri_from_destination(&replay.spec.target, namespace) {
            Ok(uri) => {
                status.mark_target_resolved(uri.clone());
                uri
            }
            Err(err) => {
                let err = ReconcileError::transient(REASON_FAILED_RESOLVE_REFERENCE, format!("failed to resolve target: {}", err));
                status.mark_target_failed(&err.reason, &err.message);
                return Err(warn(self.objects.recorder.as_ref(), replay, err).await);
            }
        };

        let image = match self.config.replay_image() {
            Some(image) => image,
            None => return Ok(()),
        };
        let broker = match broker {
            Broker::Redis(broker) => broker,
            Broker::Memory(broker) => {
                let err = ReconcileError::permanent(
                    REASON_BROKER_NOT_REPLAYABLE,
                    format!("MemoryBroker {} does not persist events and can not be replayed", broker.name()),
                );
                status.mark_job_failed(&err.reason, &err.message);
                return Err(warn(self.objects.recorder.as_ref(), replay, err).await);
            }
        };
        // The job is started once the broker is ready, its status change enqueues this replay.
        if !broker.ready_condition().map(|cond| cond.is_true()).unwrap_or(false) {
            tracing::debug!(broker = broker.name(), "waiting for broker to be ready before starting replay job");
            return Ok(());
        }

        let job = match self.desired_job(replay, &broker, image, &sink) {
            Ok(job) => job,
            Err(err) => {
                let err = ReconcileError::transient(REASON_FAILED_CONFIG_SERIALIZE, err.to_string());
                status.mark_job_failed(&err.reason, &err.message);
                return Err(warn(self.objects.recorder.as_ref(), replay, err).await);
            }
        };
        self.objects.reconcile_job(&object_reference(replay), status, job).await?;
        Ok(())
    }

    fn desired_job(
        &self, replay: &Replay, broker: &RedisBroker, image: &str, sink: &str,
    ) -> Result<k8s_openapi::api::batch::v1::Job, triggermesh_core::CoreError> {
        let conn = broker.user_provided_connection();
        let settings = ReplayJobSettings {
            image,
            pull_policy: &self.config.replay_image_pull_policy,
            redis_address: conn
                .map(|conn| conn.url.clone())
                .unwrap_or_else(|| resources::embedded_redis_address(&Owner::from_broker(broker))),
            redis_stream: broker.stream(),
            sink,
            extra_env: conn.map(resources::redis_credentials_env).unwrap_or_default(),
        };
        resources::replay_job(&Owner::from_replay(replay), replay, settings)
    }
}

#[async_trait]
impl Reconciler<Replay> for ReplayReconciler {
    fn initialize(&self, replay: &mut Replay) {
        ReplayStatusManager::new(&self.conditions, replay.status_mut()).initialize_conditions();
    }

    #[tracing::instrument(level = "debug", skip(self, replay), fields(name = replay.name(), namespace = replay.namespace()))]
    async fn reconcile_kind(&self, replay: &mut Replay) -> ReconcileResult<()> {
        let mut status = std::mem::take(replay.status_mut());
        let res = self
            .reconcile_replay(replay, &mut ReplayStatusManager::new(&self.conditions, &mut status))
            .await;
        *replay.status_mut() = status;
        res
    }
}

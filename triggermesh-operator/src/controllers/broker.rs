use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::EnvVar;
use triggermesh_core::config::{BrokerConfig, RedisConfig};
use triggermesh_core::crd::{MemoryBroker, RedisBroker, Trigger};
use triggermesh_core::status::*;

use crate::config::Config;
use crate::controllers::{warn, Reconciler};
use crate::error::{ReconcileError, ReconcileResult};
use crate::k8s::{Indexer, KubeObject};
use crate::reconciler::{object_reference, ObjectReconciler};
use crate::resources::{self, BrokerWiring, Owner, ROLE_BROKER, ROLE_CONFIG, ROLE_REDIS, ROLE_STATUS};

/// How the Redis backing a broker is provided.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RedisBacking {
    /// The broker does not use Redis.
    Absent,
    /// A Redis is deployed next to the broker.
    Embedded,
    /// The user points the broker at their own Redis.
    UserProvided,
}

/// The variant specific parts of broker reconciliation.
pub trait BrokerVariant: triggermesh_core::crd::ReconcilableBroker + KubeObject {
    /// The conditions of this variant.
    fn condition_set() -> ConditionSet;

    /// The data-plane image and pull policy of this variant.
    fn image(config: &Config) -> (&str, &str);

    fn redis_backing(&self) -> RedisBacking;

    /// The Redis settings written to the broker config, if any.
    fn redis_config(&self, owner: &Owner) -> Option<RedisConfig>;

    /// Variables specific to this variant, given to the broker deployment.
    fn variant_env(&self) -> Vec<EnvVar>;
}

impl BrokerVariant for MemoryBroker {
    fn condition_set() -> ConditionSet {
        memory_broker_condition_set()
    }

    fn image(config: &Config) -> (&str, &str) {
        (&config.memory_broker_image, &config.memory_broker_image_pull_policy)
    }

    fn redis_backing(&self) -> RedisBacking {
        RedisBacking::Absent
    }

    fn redis_config(&self, _owner: &Owner) -> Option<RedisConfig> {
        None
    }

    fn variant_env(&self) -> Vec<EnvVar> {
        self.buffer_size()
            .map(|size| vec![resources::env("MEMORY_BUFFER_SIZE", size.to_string())])
            .unwrap_or_default()
    }
}

impl BrokerVariant for RedisBroker {
    fn condition_set() -> ConditionSet {
        redis_broker_condition_set()
    }

    fn image(config: &Config) -> (&str, &str) {
        (&config.redis_broker_image, &config.redis_broker_image_pull_policy)
    }

    fn redis_backing(&self) -> RedisBacking {
        match self.user_provided_connection() {
            Some(_) => RedisBacking::UserProvided,
            None => RedisBacking::Embedded,
        }
    }

    fn redis_config(&self, owner: &Owner) -> Option<RedisConfig> {
        let conn = self.user_provided_connection();
        Some(RedisConfig {
            address: conn
                .map(|conn| conn.url.clone())
                .unwrap_or_else(|| resources::embedded_redis_address(owner)),
            stream: self.stream().map(String::from),
            stream_max_len: self.stream_max_len(),
            tls_enabled: conn.and_then(|conn| conn.tls_enabled),
            tls_skip_verify: conn.and_then(|conn| conn.tls_skip_verify),
        })
    }

    fn variant_env(&self) -> Vec<EnvVar> {
        self.user_provided_connection().map(resources::redis_credentials_env).unwrap_or_default()
    }
}

/// The reconciler of a broker variant.
pub struct BrokerReconciler<B> {
    config: Arc<Config>,
    conditions: ConditionSet,
    triggers: Arc<Indexer<Trigger>>,
    objects: Arc<ObjectReconciler>,
    _kind: PhantomData<fn() -> B>,
}

impl<B: BrokerVariant> BrokerReconciler<B> {
    pub fn new(config: Arc<Config>, triggers: Arc<Indexer<Trigger>>, objects: Arc<ObjectReconciler>) -> Self {
        let mut conditions = B::condition_set();
        if config.broker_status_configmap {
            conditions = conditions.with_dependents(&[CONDITION_BROKER_STATUS_CONFIG_MAP_READY]);
        }
        Self {
            config,
            conditions,
            triggers,
            objects,
            _kind: PhantomData,
        }
    }

    /// The conditions managed by this reconciler.
    pub fn conditions(&self) -> &ConditionSet {
        &self.conditions
    }

    async fn reconcile_broker(&self, broker: &B, status: &mut BrokerStatusManager<'_>) -> ReconcileResult<()> {
        let oref = object_reference(broker);
        let owner = Owner::from_broker(broker);
        let options = broker.reconcilable_broker_spec();

        match broker.redis_backing() {
            RedisBacking::Absent => (),
            RedisBacking::UserProvided => status.mark_redis_user_provided(),
            RedisBacking::Embedded => {
                let deployment = resources::redis_deployment(&owner, &self.config.redis_image);
                self.objects.reconcile_deployment(&oref, status, WorkloadRole::Redis, deployment).await?;
                let service = resources::redis_service(&owner);
                self.objects.reconcile_service(&oref, status, WorkloadRole::Redis, service).await?;
                self.objects
                    .observe_endpoints(&oref, status, WorkloadRole::Redis, owner.namespace(), &owner.object_name(ROLE_REDIS))
                    .await?;
            }
        }

        // Config secret, built from every trigger referencing this broker, whatever its namespace.
        let triggers = match self.triggers.list_all() {
            Ok(triggers) => triggers,
            Err(err) => {
                let err = ReconcileError::transient(REASON_FAILED_TRIGGER_LIST, format!("failed to list triggers: {}", err));
                status.mark_config_secret_failed(&err.reason, &err.message);
                return Err(warn(self.objects.recorder.as_ref(), broker, err).await);
            }
        };
        let mut broker_config = BrokerConfig::for_broker(broker, &triggers);
        if let Some(redis) = broker.redis_config(&owner) {
            broker_config = broker_config.with_redis(redis);
        }
        let config_yaml = match broker_config.to_yaml() {
            Ok(yaml) => yaml,
            Err(err) => {
                let err = ReconcileError::transient(REASON_FAILED_CONFIG_SERIALIZE, err.to_string());
                status.mark_config_secret_failed(&err.reason, &err.message);
                return Err(warn(self.objects.recorder.as_ref(), broker, err).await);
            }
        };
        if owner.owner_ref().is_none() {
            let err = ReconcileError::transient(REASON_FAILED_SECRET_COMPOSE, "broker has no uid to own its config secret");
            status.mark_config_secret_failed(&err.reason, &err.message);
            return Err(warn(self.objects.recorder.as_ref(), broker, err).await);
        }
        let secret = self
            .objects
            .reconcile_secret(&oref, status, resources::config_secret(&owner, config_yaml))
            .await?;
        let secret_name = secret.metadata.name.unwrap_or_else(|| owner.object_name(ROLE_CONFIG));

        // Identity of the broker pods.
        let (sa, _) = self
            .objects
            .reconcile_service_account(
                &oref,
                status,
                resources::service_account(&owner),
                resources::role_binding(&owner, &owner.object_name(ROLE_BROKER)),
            )
            .await?;
        let sa_name = sa.metadata.name.unwrap_or_else(|| owner.object_name(ROLE_BROKER));

        let status_config_map = if self.config.broker_status_configmap {
            let cm = self
                .objects
                .reconcile_status_config_map(&oref, status, resources::status_config_map(&owner))
                .await?;
            Some(cm.metadata.name.unwrap_or_else(|| owner.object_name(ROLE_STATUS)))
        } else {
            None
        };

        // Data plane.
        let (image, pull_policy) = B::image(&self.config);
        let deployment = resources::broker_deployment(
            &owner,
            BrokerWiring {
                image,
                pull_policy,
                config_secret_name: &secret_name,
                service_account_name: &sa_name,
                observability_config_map: options.observability_config_map(),
                status_config_map: status_config_map.as_deref(),
                extra_env: broker.variant_env(),
            },
        );
        self.objects.reconcile_deployment(&oref, status, WorkloadRole::Broker, deployment).await?;
        self.objects
            .reconcile_service(&oref, status, WorkloadRole::Broker, resources::broker_service(&owner, options))
            .await?;
        self.objects
            .observe_endpoints(&oref, status, WorkloadRole::Broker, owner.namespace(), &owner.object_name(ROLE_BROKER))
            .await?;

        if status.is_ready_for_address() {
            status.set_address(Some(resources::broker_address(&owner, options)));
        } else {
            status.set_address(None);
        }
        Ok(())
    }
}

#[async_trait]
impl<B: BrokerVariant> Reconciler<B> for BrokerReconciler<B> {
    fn initialize(&self, broker: &mut B) {
        BrokerStatusManager::new(&self.conditions, broker.status_mut()).initialize_conditions();
    }

    #[tracing::instrument(level = "debug", skip(self, broker), fields(kind = %B::KIND, name = broker.name(), namespace = broker.namespace()))]
    async fn reconcile_kind(&self, broker: &mut B) -> ReconcileResult<()> {
        let mut status = std::mem::take(broker.status_mut());
        let res = {
            let mut manager = BrokerStatusManager::new(&self.conditions, &mut status);
            let res = self.reconcile_broker(broker, &mut manager).await;
            if res.is_err() {
                manager.clear_address();
            }
            res
        };
        *broker.status_mut() = status;
        res
    }
}

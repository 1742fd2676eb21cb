//! Typed status interfaces of each kind.
//!
//! Reconcilers never touch conditions by name. They go through the managers defined here,
//! which know which condition each observation feeds and which reason codes apply.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;

use crate::crd::{Addressable, BrokerStatus, ReplayStatus, TriggerStatus};
use crate::status::conditions::{Condition, ConditionManager, ConditionSet};

// Broker conditions.
pub const CONDITION_CONFIG_SECRET_READY: &str = "ConfigSecretReady";
pub const CONDITION_BROKER_SERVICE_ACCOUNT_READY: &str = "BrokerServiceAccountReady";
pub const CONDITION_BROKER_ROLE_BINDING_READY: &str = "BrokerRoleBindingReady";
pub const CONDITION_BROKER_DEPLOYMENT_READY: &str = "BrokerDeploymentReady";
pub const CONDITION_BROKER_SERVICE_READY: &str = "BrokerServiceReady";
pub const CONDITION_BROKER_ENDPOINTS_READY: &str = "BrokerEndpointsReady";
pub const CONDITION_BROKER_STATUS_CONFIG_MAP_READY: &str = "BrokerStatusConfigMapReady";
pub const CONDITION_ADDRESSABLE: &str = "Addressable";
pub const CONDITION_REDIS_DEPLOYMENT_READY: &str = "RedisDeploymentReady";
pub const CONDITION_REDIS_SERVICE_READY: &str = "RedisServiceReady";
pub const CONDITION_REDIS_ENDPOINTS_READY: &str = "RedisEndpointsReady";

// Trigger & Replay conditions.
pub const CONDITION_BROKER_READY: &str = "BrokerReady";
pub const CONDITION_TARGET_RESOLVED: &str = "TargetResolved";
pub const CONDITION_DEAD_LETTER_SINK_RESOLVED: &str = "DeadLetterSinkResolved";
pub const CONDITION_REPLAY_JOB_READY: &str = "ReplayJobReady";

// Reason codes.
pub const REASON_FAILED_SECRET_GET: &str = "FailedSecretGet";
pub const REASON_FAILED_SECRET_CREATE: &str = "FailedSecretCreate";
pub const REASON_FAILED_SECRET_UPDATE: &str = "FailedSecretUpdate";
pub const REASON_FAILED_SERVICE_ACCOUNT_GET: &str = "FailedServiceAccountGet";
pub const REASON_FAILED_SERVICE_ACCOUNT_CREATE: &str = "FailedServiceAccountCreate";
pub const REASON_FAILED_SERVICE_ACCOUNT_UPDATE: &str = "FailedServiceAccountUpdate";
pub const REASON_FAILED_ROLE_BINDING_GET: &str = "FailedRoleBindingGet";
pub const REASON_FAILED_ROLE_BINDING_CREATE: &str = "FailedRoleBindingCreate";
pub const REASON_FAILED_ROLE_BINDING_UPDATE: &str = "FailedRoleBindingUpdate";
pub const REASON_FAILED_DEPLOYMENT_GET: &str = "FailedDeploymentGet";
pub const REASON_FAILED_DEPLOYMENT_CREATE: &str = "FailedDeploymentCreate";
pub const REASON_FAILED_DEPLOYMENT_UPDATE: &str = "FailedDeploymentUpdate";
pub const REASON_FAILED_SERVICE_GET: &str = "FailedServiceGet";
pub const REASON_FAILED_SERVICE_CREATE: &str = "FailedServiceCreate";
pub const REASON_FAILED_SERVICE_UPDATE: &str = "FailedServiceUpdate";
pub const REASON_FAILED_CONFIG_MAP_GET: &str = "FailedConfigMapGet";
pub const REASON_FAILED_CONFIG_MAP_CREATE: &str = "FailedConfigMapCreate";
pub const REASON_FAILED_CONFIG_MAP_UPDATE: &str = "FailedConfigMapUpdate";
pub const REASON_FAILED_JOB_GET: &str = "FailedJobGet";
pub const REASON_FAILED_JOB_CREATE: &str = "FailedJobCreate";
pub const REASON_FAILED_JOB_UPDATE: &str = "FailedJobUpdate";
pub const REASON_FAILED_ENDPOINTS_GET: &str = "FailedEndpointsGet";
pub const REASON_FAILED_TRIGGER_LIST: &str = "FailedTriggerList";
pub const REASON_BROKER_DOES_NOT_EXIST: &str = "BrokerDoesNotExist";
pub const REASON_FAILED_BROKER_GET: &str = "FailedBrokerGet";
pub const REASON_BROKER_UNSUPPORTED_GROUP: &str = "BrokerUnsupportedGroup";
pub const REASON_BROKER_UNSUPPORTED_KIND: &str = "BrokerUnsupportedKind";
pub const REASON_BROKER_UNSUPPORTED_VERSION: &str = "BrokerUnsupportedVersion";
pub const REASON_BROKER_NOT_REPLAYABLE: &str = "BrokerNotReplayable";
pub const REASON_FAILED_RESOLVE_REFERENCE: &str = "FailedResolveReference";
pub const REASON_UNAVAILABLE_ENDPOINTS: &str = "UnavailableEndpoints";
pub const REASON_FAILED_CONFIG_SERIALIZE: &str = "FailedConfigSerialize";
pub const REASON_FAILED_SECRET_COMPOSE: &str = "FailedSecretCompose";
pub const REASON_BROKER_NOT_CONFIGURED: &str = "BrokerNotConfigured";
pub const REASON_DEAD_LETTER_SINK_NOT_CONFIGURED: &str = "DeadLetterSinkNotConfigured";
pub const REASON_USER_PROVIDED: &str = "UserProvided";
pub const REASON_DEPLOYMENT_UNAVAILABLE: &str = "DeploymentUnavailable";
pub const REASON_JOB_RUNNING: &str = "JobRunning";
pub const REASON_JOB_FAILED: &str = "JobFailed";

/// The condition set of a MemoryBroker.
pub fn memory_broker_condition_set() -> ConditionSet {
    ConditionSet::living(&[
        CONDITION_CONFIG_SECRET_READY,
        CONDITION_BROKER_SERVICE_ACCOUNT_READY,
        CONDITION_BROKER_ROLE_BINDING_READY,
        CONDITION_BROKER_DEPLOYMENT_READY,
        CONDITION_BROKER_SERVICE_READY,
        CONDITION_BROKER_ENDPOINTS_READY,
        CONDITION_ADDRESSABLE,
    ])
}

/// The condition set of a RedisBroker.
pub fn redis_broker_condition_set() -> ConditionSet {
    ConditionSet::living(&[
        CONDITION_REDIS_DEPLOYMENT_READY,
        CONDITION_REDIS_SERVICE_READY,
        CONDITION_REDIS_ENDPOINTS_READY,
        CONDITION_CONFIG_SECRET_READY,
        CONDITION_BROKER_SERVICE_ACCOUNT_READY,
        CONDITION_BROKER_ROLE_BINDING_READY,
        CONDITION_BROKER_DEPLOYMENT_READY,
        CONDITION_BROKER_SERVICE_READY,
        CONDITION_BROKER_ENDPOINTS_READY,
        CONDITION_ADDRESSABLE,
    ])
}

/// The condition set of a Trigger.
pub fn trigger_condition_set() -> ConditionSet {
    ConditionSet::living(&[CONDITION_BROKER_READY, CONDITION_TARGET_RESOLVED, CONDITION_DEAD_LETTER_SINK_RESOLVED])
}

/// The condition set of a Replay.
pub fn replay_condition_set() -> ConditionSet {
    ConditionSet::living(&[CONDITION_BROKER_READY, CONDITION_TARGET_RESOLVED])
}

/// The workloads a broker may own, each with its own trio of conditions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkloadRole {
    /// The data-plane broker.
    Broker,
    /// The embedded Redis backing store.
    Redis,
}

impl WorkloadRole {
    pub fn deployment_condition(&self) -> &'static str {
        match self {
            Self::Broker => CONDITION_BROKER_DEPLOYMENT_READY,
            Self::Redis => CONDITION_REDIS_DEPLOYMENT_READY,
        }
    }

    pub fn service_condition(&self) -> &'static str {
        match self {
            Self::Broker => CONDITION_BROKER_SERVICE_READY,
            Self::Redis => CONDITION_REDIS_SERVICE_READY,
        }
    }

    pub fn endpoints_condition(&self) -> &'static str {
        match self {
            Self::Broker => CONDITION_BROKER_ENDPOINTS_READY,
            Self::Redis => CONDITION_REDIS_ENDPOINTS_READY,
        }
    }
}

/// The status interface of both broker variants.
pub struct BrokerStatusManager<'a> {
    conditions: ConditionManager<'a>,
    address: &'a mut Option<Addressable>,
}

impl<'a> BrokerStatusManager<'a> {
    pub fn new(set: &'a ConditionSet, status: &'a mut BrokerStatus) -> Self {
        let BrokerStatus { status, address } = status;
        Self {
            conditions: set.manage(status),
            address,
        }
    }

    pub fn initialize_conditions(&mut self) {
        self.conditions.initialize_conditions();
    }

    pub fn get_condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.get_condition(type_)
    }

    pub fn get_top_level_condition(&self) -> Option<&Condition> {
        self.conditions.get_top_level_condition()
    }

    pub fn is_ready(&self) -> bool {
        self.conditions.is_happy()
    }

    pub fn mark_config_secret_ready(&mut self) {
        self.conditions.mark_true(CONDITION_CONFIG_SECRET_READY);
    }

    pub fn mark_config_secret_failed(&mut self, reason: &str, message: &str) {
        self.conditions.mark_false(CONDITION_CONFIG_SECRET_READY, reason, message);
    }

    pub fn mark_service_account_ready(&mut self) {
        self.conditions.mark_true(CONDITION_BROKER_SERVICE_ACCOUNT_READY);
    }

    pub fn mark_service_account_failed(&mut self, reason: &str, message: &str) {
        self.conditions.mark_false(CONDITION_BROKER_SERVICE_ACCOUNT_READY, reason, message);
    }

    pub fn mark_role_binding_ready(&mut self) {
        self.conditions.mark_true(CONDITION_BROKER_ROLE_BINDING_READY);
    }

    pub fn mark_role_binding_failed(&mut self, reason: &str, message: &str) {
        self.conditions.mark_false(CONDITION_BROKER_ROLE_BINDING_READY, reason, message);
    }

    pub fn mark_status_config_map_ready(&mut self) {
        self.conditions.mark_true(CONDITION_BROKER_STATUS_CONFIG_MAP_READY);
    }

    pub fn mark_status_config_map_failed(&mut self, reason: &str, message: &str) {
        self.conditions.mark_false(CONDITION_BROKER_STATUS_CONFIG_MAP_READY, reason, message);
    }

    /// Reflect the `Available` condition of a deployment into the role's deployment condition.
    pub fn propagate_deployment_availability(&mut self, role: WorkloadRole, deployment: &Deployment) {
        let type_ = role.deployment_condition();
        let available = deployment
            .status
            .as_ref()
            .and_then(|status| status.conditions.as_ref())
            .and_then(|conds| conds.iter().find(|cond| cond.type_ == "Available"));
        match available {
            Some(cond) if cond.status == "True" => self.conditions.mark_true(type_),
            Some(cond) if cond.status == "False" => self.conditions.mark_false(
                type_,
                cond.reason.as_deref().unwrap_or(REASON_DEPLOYMENT_UNAVAILABLE),
                cond.message.as_deref().unwrap_or("deployment is not available"),
            ),
            Some(cond) => self.conditions.mark_unknown(
                type_,
                cond.reason.as_deref().unwrap_or(REASON_DEPLOYMENT_UNAVAILABLE),
                cond.message.as_deref().unwrap_or("deployment availability is unknown"),
            ),
            None => self
                .conditions
                .mark_unknown(type_, REASON_DEPLOYMENT_UNAVAILABLE, "deployment has not reported its availability yet"),
        }
    }

    pub fn mark_deployment_failed(&mut self, role: WorkloadRole, reason: &str, message: &str) {
        self.conditions.mark_false(role.deployment_condition(), reason, message);
    }

    pub fn mark_service_ready(&mut self, role: WorkloadRole) {
        self.conditions.mark_true(role.service_condition());
    }

    pub fn mark_service_failed(&mut self, role: WorkloadRole, reason: &str, message: &str) {
        self.conditions.mark_false(role.service_condition(), reason, message);
    }

    pub fn mark_endpoints_ready(&mut self, role: WorkloadRole) {
        self.conditions.mark_true(role.endpoints_condition());
    }

    pub fn mark_endpoints_failed(&mut self, role: WorkloadRole, reason: &str, message: &str) {
        self.conditions.mark_false(role.endpoints_condition(), reason, message);
    }

    /// Mark every embedded Redis condition as satisfied by a user provided Redis.
    pub fn mark_redis_user_provided(&mut self) {
        let message = "Redis connection is provided by the user";
        self.conditions.mark_true_with_reason(CONDITION_REDIS_DEPLOYMENT_READY, REASON_USER_PROVIDED, message);
        self.conditions.mark_true_with_reason(CONDITION_REDIS_SERVICE_READY, REASON_USER_PROVIDED, message);
        self.conditions.mark_true_with_reason(CONDITION_REDIS_ENDPOINTS_READY, REASON_USER_PROVIDED, message);
    }

    /// Check if every condition feeding the address is satisfied.
    pub fn is_ready_for_address(&self) -> bool {
        self.conditions.dependents_true_except(&[CONDITION_ADDRESSABLE])
    }

    /// Set or clear the broker address.
    ///
    /// The address is only ever present while `Addressable` is `True`.
    pub fn set_address(&mut self, url: Option<String>) {
        match url {
            Some(url) => {
                *self.address = Some(Addressable { url: Some(url) });
                self.conditions.mark_true(CONDITION_ADDRESSABLE);
            }
            None => {
                *self.address = None;
                self.conditions
                    .mark_unknown(CONDITION_ADDRESSABLE, REASON_BROKER_NOT_CONFIGURED, "broker dependencies are not ready");
            }
        }
    }

    /// Clear the address while keeping the current `Addressable` condition.
    ///
    /// Used when a reconcile fails before the address could be recomputed.
    pub fn clear_address(&mut self) {
        *self.address = None;
        let keep_addressable = self.conditions.get_condition(CONDITION_ADDRESSABLE).map(Condition::is_true).unwrap_or(false);
        if keep_addressable {
            self.conditions
                .mark_unknown(CONDITION_ADDRESSABLE, REASON_BROKER_NOT_CONFIGURED, "broker dependencies are not ready");
        }
    }
}

/// The status interface of a Trigger.
pub struct TriggerStatusManager<'a> {
    conditions: ConditionManager<'a>,
    target_uri: &'a mut Option<String>,
    dead_letter_sink_uri: &'a mut Option<String>,
}

impl<'a> TriggerStatusManager<'a> {
    pub fn new(set: &'a ConditionSet, status: &'a mut TriggerStatus) -> Self {
        let TriggerStatus {
            status,
            target_uri,
            dead_letter_sink_uri,
        } = status;
        Self {
            conditions: set.manage(status),
            target_uri,
            dead_letter_sink_uri,
        }
    }

    pub fn initialize_conditions(&mut self) {
        self.conditions.initialize_conditions();
    }

    pub fn get_condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.get_condition(type_)
    }

    pub fn is_ready(&self) -> bool {
        self.conditions.is_happy()
    }

    /// Mirror the top-level condition of the referenced broker.
    pub fn propagate_broker_condition(&mut self, broker_ready: Option<&Condition>) {
        propagate_broker_condition(&mut self.conditions, broker_ready);
    }

    pub fn mark_broker_failed(&mut self, reason: &str, message: &str) {
        self.conditions.mark_false(CONDITION_BROKER_READY, reason, message);
    }

    pub fn mark_target_resolved(&mut self, uri: String) {
        *self.target_uri = Some(uri);
        self.conditions.mark_true(CONDITION_TARGET_RESOLVED);
    }

    pub fn mark_target_failed(&mut self, reason: &str, message: &str) {
        *self.target_uri = None;
        self.conditions.mark_false(CONDITION_TARGET_RESOLVED, reason, message);
    }

    pub fn mark_dead_letter_sink_resolved(&mut self, uri: String) {
        *self.dead_letter_sink_uri = Some(uri);
        self.conditions.mark_true(CONDITION_DEAD_LETTER_SINK_RESOLVED);
    }

    pub fn mark_dead_letter_sink_not_configured(&mut self) {
        *self.dead_letter_sink_uri = None;
        self.conditions.mark_true_with_reason(
            CONDITION_DEAD_LETTER_SINK_RESOLVED,
            REASON_DEAD_LETTER_SINK_NOT_CONFIGURED,
            "no dead letter sink is configured",
        );
    }

    pub fn mark_dead_letter_sink_failed(&mut self, reason: &str, message: &str) {
        *self.dead_letter_sink_uri = None;
        self.conditions.mark_false(CONDITION_DEAD_LETTER_SINK_RESOLVED, reason, message);
    }
}

/// The status interface of a Replay.
pub struct ReplayStatusManager<'a> {
    conditions: ConditionManager<'a>,
    target_uri: &'a mut Option<String>,
}

impl<'a> ReplayStatusManager<'a> {
    pub fn new(set: &'a ConditionSet, status: &'a mut ReplayStatus) -> Self {
        let ReplayStatus { status, target_uri } = status;
        Self {
            conditions: set.manage(status),
            target_uri,
        }
    }

    pub fn initialize_conditions(&mut self) {
        self.conditions.initialize_conditions();
    }

    pub fn get_condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.get_condition(type_)
    }

    pub fn is_ready(&self) -> bool {
        self.conditions.is_happy()
    }

    pub fn propagate_broker_condition(&mut self, broker_ready: Option<&Condition>) {
        propagate_broker_condition(&mut self.conditions, broker_ready);
    }

    pub fn mark_broker_failed(&mut self, reason: &str, message: &str) {
        self.conditions.mark_false(CONDITION_BROKER_READY, reason, message);
    }

    pub fn mark_target_resolved(&mut self, uri: String) {
        *self.target_uri = Some(uri);
        self.conditions.mark_true(CONDITION_TARGET_RESOLVED);
    }

    pub fn mark_target_failed(&mut self, reason: &str, message: &str) {
        *self.target_uri = None;
        self.conditions.mark_false(CONDITION_TARGET_RESOLVED, reason, message);
    }

    /// Reflect the completion state of the replay job.
    pub fn propagate_job_status(&mut self, job: &Job) {
        let conds = job.status.as_ref().and_then(|status| status.conditions.as_ref());
        let find = |type_: &str| conds.and_then(|conds| conds.iter().find(|cond| cond.type_ == type_ && cond.status == "True"));
        if find("Complete").is_some() {
            self.conditions.mark_true(CONDITION_REPLAY_JOB_READY);
        } else if let Some(failed) = find("Failed") {
            self.conditions.mark_false(
                CONDITION_REPLAY_JOB_READY,
                failed.reason.as_deref().unwrap_or(REASON_JOB_FAILED),
                failed.message.as_deref().unwrap_or("replay job failed"),
            );
        } else {
            self.conditions.mark_unknown(CONDITION_REPLAY_JOB_READY, REASON_JOB_RUNNING, "replay job has not completed yet");
        }
    }

    pub fn mark_job_failed(&mut self, reason: &str, message: &str) {
        self.conditions.mark_false(CONDITION_REPLAY_JOB_READY, reason, message);
    }
}

fn propagate_broker_condition(conditions: &mut ConditionManager<'_>, broker_ready: Option<&Condition>) {
    match broker_ready {
        Some(cond) if cond.is_true() => conditions.mark_true(CONDITION_BROKER_READY),
        Some(cond) if cond.is_false() => conditions.mark_false(
            CONDITION_BROKER_READY,
            cond.reason.as_deref().unwrap_or(REASON_BROKER_NOT_CONFIGURED),
            cond.message.as_deref().unwrap_or("broker is not ready"),
        ),
        Some(cond) => conditions.mark_unknown(
            CONDITION_BROKER_READY,
            cond.reason.as_deref().unwrap_or(REASON_BROKER_NOT_CONFIGURED),
            cond.message.as_deref().unwrap_or("broker readiness is unknown"),
        ),
        None => conditions.mark_unknown(CONDITION_BROKER_READY, REASON_BROKER_NOT_CONFIGURED, "broker has not reported its readiness yet"),
    }
}

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, ObjectReference, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;

use crate::error::{ReconcileError, ReconcileResult};
use crate::k8s::{EventRecorder, Indexer};
use crate::reconciler::{ConvergeError, Store};
use triggermesh_core::status::{BrokerStatusManager, ReplayStatusManager, WorkloadRole, REASON_FAILED_ENDPOINTS_GET, REASON_UNAVAILABLE_ENDPOINTS};

/// The sub-reconcilers of every object owned by brokers and replays.
///
/// Each sub-reconciler converges a single object and reflects the outcome on the owner's
/// conditions. Failures are also published as `Warning` events on the owner, and returned as
/// transient errors aborting the owner's reconciliation.
pub struct ObjectReconciler {
    pub secrets: Store<Secret>,
    pub service_accounts: Store<ServiceAccount>,
    pub role_bindings: Store<RoleBinding>,
    pub deployments: Store<Deployment>,
    pub services: Store<Service>,
    pub config_maps: Store<ConfigMap>,
    pub jobs: Store<Job>,
    pub endpoints: Arc<Indexer<Endpoints>>,
    pub recorder: Arc<dyn EventRecorder>,
}

impl ObjectReconciler {
    /// Publish a converge failure on the owner, returning the matching reconcile error.
    async fn fail(&self, owner: &ObjectReference, err: ConvergeError) -> ReconcileError {
        tracing::error!(reason = err.reason, error = %err.message, "error reconciling owned object");
        self.recorder.warn(owner, err.reason, &err.message).await;
        ReconcileError::transient(err.reason, err.message)
    }

    //////////////////////////////////////////////////////////////////////////
    // Broker Objects ////////////////////////////////////////////////////////

    /// Reconcile the broker config secret.
    pub async fn reconcile_secret(&self, owner: &ObjectReference, status: &mut BrokerStatusManager<'_>, desired: Secret) -> ReconcileResult<Secret> {
        match self.secrets.converge(desired).await {
            Ok(secret) => {
                status.mark_config_secret_ready();
                Ok(secret)
            }
            Err(err) => {
                status.mark_config_secret_failed(err.reason, &err.message);
                Err(self.fail(owner, err).await)
            }
        }
    }

    /// Reconcile the broker service account, then the role binding granting it the broker role.
    pub async fn reconcile_service_account(
        &self, owner: &ObjectReference, status: &mut BrokerStatusManager<'_>, desired_sa: ServiceAccount, desired_rb: RoleBinding,
    ) -> ReconcileResult<(ServiceAccount, RoleBinding)> {
        let sa = match self.service_accounts.converge(desired_sa).await {
            Ok(sa) => {
                status.mark_service_account_ready();
                sa
            }
            Err(err) => {
                status.mark_service_account_failed(err.reason, &err.message);
                return Err(self.fail(owner, err).await);
            }
        };
        match self.role_bindings.converge(desired_rb).await {
            Ok(rb) => {
                status.mark_role_binding_ready();
                Ok((sa, rb))
            }
            Err(err) => {
                status.mark_role_binding_failed(err.reason, &err.message);
                Err(self.fail(owner, err).await)
            }
        }
    }

    /// Reconcile the broker status ConfigMap.
    pub async fn reconcile_status_config_map(
        &self, owner: &ObjectReference, status: &mut BrokerStatusManager<'_>, desired: ConfigMap,
    ) -> ReconcileResult<ConfigMap> {
        match self.config_maps.converge(desired).await {
            Ok(cm) => {
                status.mark_status_config_map_ready();
                Ok(cm)
            }
            Err(err) => {
                status.mark_status_config_map_failed(err.reason, &err.message);
                Err(self.fail(owner, err).await)
            }
        }
    }

    //////////////////////////////////////////////////////////////////////////
    // Workloads /////////////////////////////////////////////////////////////

    /// Reconcile the deployment of the given workload, propagating its availability.
    ///
    /// An unavailable deployment is not an error: its pods are expected to become ready over time,
    /// and the resulting status change will trigger a new reconciliation.
    pub async fn reconcile_deployment(
        &self, owner: &ObjectReference, status: &mut BrokerStatusManager<'_>, role: WorkloadRole, desired: Deployment,
    ) -> ReconcileResult<Deployment> {
        match self.deployments.converge(desired).await {
            Ok(deployment) => {
                status.propagate_deployment_availability(role, &deployment);
                Ok(deployment)
            }
            Err(err) => {
                status.mark_deployment_failed(role, err.reason, &err.message);
                Err(self.fail(owner, err).await)
            }
        }
    }

    /// Reconcile the service of the given workload.
    pub async fn reconcile_service(
        &self, owner: &ObjectReference, status: &mut BrokerStatusManager<'_>, role: WorkloadRole, desired: Service,
    ) -> ReconcileResult<Service> {
        match self.services.converge(desired).await {
            Ok(service) => {
                status.mark_service_ready(role);
                Ok(service)
            }
            Err(err) => {
                status.mark_service_failed(role, err.reason, &err.message);
                Err(self.fail(owner, err).await)
            }
        }
    }

    /// Observe the endpoints of the given workload's service. Endpoints are never written.
    ///
    /// Missing or unready endpoints are only reflected on the owner's conditions. Failing to
    /// read them is an error.
    pub async fn observe_endpoints(
        &self, owner: &ObjectReference, status: &mut BrokerStatusManager<'_>, role: WorkloadRole, namespace: &str, name: &str,
    ) -> ReconcileResult<()> {
        match self.endpoints.get(namespace, name) {
            Ok(ep) if has_ready_address(&ep) => status.mark_endpoints_ready(role),
            Ok(_) => status.mark_endpoints_failed(
                role,
                REASON_UNAVAILABLE_ENDPOINTS,
                &format!("endpoints {}/{} have no ready addresses", namespace, name),
            ),
            Err(err) if err.is_not_found() => status.mark_endpoints_failed(
                role,
                REASON_UNAVAILABLE_ENDPOINTS,
                &format!("endpoints {}/{} do not exist yet", namespace, name),
            ),
            Err(err) => {
                let err = ConvergeError {
                    reason: REASON_FAILED_ENDPOINTS_GET,
                    message: format!("failed to get endpoints {}/{}: {}", namespace, name, err),
                };
                status.mark_endpoints_failed(role, err.reason, &err.message);
                return Err(self.fail(owner, err).await);
            }
        }
        Ok(())
    }

    //////////////////////////////////////////////////////////////////////////
    // Replay Objects ////////////////////////////////////////////////////////

    /// Reconcile the replay job, propagating its completion.
    ///
    /// Jobs are created once and never updated, a new replay requires a new Replay object.
    pub async fn reconcile_job(&self, owner: &ObjectReference, status: &mut ReplayStatusManager<'_>, desired: Job) -> ReconcileResult<Job> {
        match self.jobs.converge(desired).await {
            Ok(job) => {
                status.propagate_job_status(&job);
                Ok(job)
            }
            Err(err) => {
                status.mark_job_failed(err.reason, &err.message);
                Err(self.fail(owner, err).await)
            }
        }
    }
}

fn has_ready_address(ep: &Endpoints) -> bool {
    ep.subsets
        .iter()
        .flatten()
        .any(|subset| subset.addresses.as_ref().map(|addrs| !addrs.is_empty()).unwrap_or(false))
}

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{ConfigMap, Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Secret, Service, ServiceAccount, ServicePort, ServiceSpec};
use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;

use super::{env, env_from_field, Owner, ROLE_BROKER, ROLE_CONFIG, ROLE_STATUS};
use triggermesh_core::config::CONFIG_SECRET_KEY;
use triggermesh_core::crd::BrokerOptions;

/// The pre-installed ClusterRole bound to every broker service account.
pub const BROKER_CLUSTER_ROLE: &str = "triggermesh-broker";
/// The name of the broker container. Changing it breaks existing deployments.
pub const BROKER_CONTAINER_NAME: &str = "broker";
/// The port the broker container receives CloudEvents on.
pub const BROKER_HTTP_PORT: i32 = 8080;
/// The port the broker container exposes metrics on.
pub const BROKER_METRICS_PORT: i32 = 9090;

const PORT_NAME_HTTP: &str = "httpce";
const PORT_NAME_METRICS: &str = "metrics";

/// The collaborators wired into a broker deployment.
#[derive(Clone, Debug, Default)]
pub struct BrokerWiring<'a> {
    pub image: &'a str,
    pub pull_policy: &'a str,
    pub config_secret_name: &'a str,
    pub service_account_name: &'a str,
    pub observability_config_map: Option<&'a str>,
    pub status_config_map: Option<&'a str>,
    /// Variables specific to the broker variant, appended after the common ones.
    pub extra_env: Vec<EnvVar>,
}

/// Build the Secret holding the broker configuration document.
pub fn config_secret(owner: &Owner, config_yaml: String) -> Secret {
    Secret {
        metadata: owner.metadata(ROLE_CONFIG),
        type_: Some("Opaque".into()),
        data: Some(maplit::btreemap! {
            CONFIG_SECRET_KEY.into() => ByteString(config_yaml.into_bytes()),
        }),
        ..Default::default()
    }
}

pub fn service_account(owner: &Owner) -> ServiceAccount {
    ServiceAccount {
        metadata: owner.metadata(ROLE_BROKER),
        ..Default::default()
    }
}

/// Build the RoleBinding granting the broker ClusterRole to the broker service account.
pub fn role_binding(owner: &Owner, service_account_name: &str) -> RoleBinding {
    RoleBinding {
        metadata: owner.metadata(ROLE_BROKER),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".into(),
            kind: "ClusterRole".into(),
            name: BROKER_CLUSTER_ROLE.into(),
        },
        subjects: Some(vec![Subject {
            api_group: None,
            kind: "ServiceAccount".into(),
            name: service_account_name.into(),
            namespace: Some(owner.namespace().into()),
        }]),
    }
}

/// Build the broker data-plane Deployment.
pub fn broker_deployment(owner: &Owner, wiring: BrokerWiring<'_>) -> Deployment {
    let mut env_vars = vec![
        env("PORT", BROKER_HTTP_PORT.to_string()),
        env("BROKER_NAME", owner.name()),
        env_from_field("KUBERNETES_NAMESPACE", "metadata.namespace"),
        env("KUBERNETES_BROKER_CONFIG_SECRET_NAME", wiring.config_secret_name),
        env("KUBERNETES_BROKER_CONFIG_SECRET_KEY", CONFIG_SECRET_KEY),
    ];
    if let Some(name) = wiring.observability_config_map {
        env_vars.push(env("KUBERNETES_OBSERVABILITY_CONFIGMAP_NAME", name));
    }
    if let Some(name) = wiring.status_config_map {
        env_vars.push(env("KUBERNETES_STATUS_CONFIGMAP_NAME", name));
    }
    env_vars.extend(wiring.extra_env);

    Deployment {
        metadata: owner.metadata(ROLE_BROKER),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(owner.selector_labels(ROLE_BROKER)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(owner.labels(ROLE_BROKER)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(wiring.service_account_name.into()),
                    containers: vec![Container {
                        name: BROKER_CONTAINER_NAME.into(),
                        image: Some(wiring.image.into()),
                        image_pull_policy: Some(wiring.pull_policy.into()),
                        env: Some(env_vars),
                        ports: Some(vec![
                            ContainerPort {
                                name: Some(PORT_NAME_HTTP.into()),
                                container_port: BROKER_HTTP_PORT,
                                protocol: Some("TCP".into()),
                                ..Default::default()
                            },
                            ContainerPort {
                                name: Some(PORT_NAME_METRICS.into()),
                                container_port: BROKER_METRICS_PORT,
                                protocol: Some("TCP".into()),
                                ..Default::default()
                            },
                        ]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the ClusterIP Service exposing the broker deployment.
pub fn broker_service(owner: &Owner, options: &BrokerOptions) -> Service {
    Service {
        metadata: owner.metadata(ROLE_BROKER),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".into()),
            selector: Some(owner.selector_labels(ROLE_BROKER)),
            ports: Some(vec![ServicePort {
                name: Some(PORT_NAME_HTTP.into()),
                port: options.port(),
                protocol: Some("TCP".into()),
                target_port: Some(IntOrString::Int(BROKER_HTTP_PORT)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the ConfigMap the broker data plane reports its status through.
pub fn status_config_map(owner: &Owner) -> ConfigMap {
    ConfigMap {
        metadata: owner.metadata(ROLE_STATUS),
        ..Default::default()
    }
}

/// The in-cluster address of the broker. The port is omitted when it is the HTTP default.
pub fn broker_address(owner: &Owner, options: &BrokerOptions) -> String {
    let host = owner.service_host(ROLE_BROKER);
    match options.port() {
        BrokerOptions::DEFAULT_PORT => format!("http://{}", host),
        port => format!("http://{}:{}", host, port),
    }
}

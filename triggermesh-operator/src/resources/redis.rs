use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{env_from_secret, Owner, ROLE_REDIS};
use triggermesh_core::crd::RedisConnection;

/// The port of the embedded Redis.
pub const REDIS_PORT: i32 = 6379;

const REDIS_CONTAINER_NAME: &str = "redis";

/// Build the Deployment of the embedded Redis of a broker.
pub fn redis_deployment(owner: &Owner, image: &str) -> Deployment {
    Deployment {
        metadata: owner.metadata(ROLE_REDIS),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(owner.selector_labels(ROLE_REDIS)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(owner.labels(ROLE_REDIS)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: REDIS_CONTAINER_NAME.into(),
                        image: Some(image.into()),
                        image_pull_policy: Some("IfNotPresent".into()),
                        args: Some(vec!["--appendonly".into(), "yes".into()]),
                        ports: Some(vec![ContainerPort {
                            name: Some("redis".into()),
                            container_port: REDIS_PORT,
                            protocol: Some("TCP".into()),
                            ..Default::default()
                        }]),
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

/// Build the ClusterIP Service exposing the embedded Redis of a broker.
pub fn redis_service(owner: &Owner) -> Service {
    Service {
        metadata: owner.metadata(ROLE_REDIS),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".into()),
            selector: Some(owner.selector_labels(ROLE_REDIS)),
            ports: Some(vec![ServicePort {
                name: Some("redis".into()),
                port: REDIS_PORT,
                protocol: Some("TCP".into()),
                target_port: Some(IntOrString::Int(REDIS_PORT)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The address of the embedded Redis of a broker.
pub fn embedded_redis_address(owner: &Owner) -> String {
    format!("{}:{}", owner.service_host(ROLE_REDIS), REDIS_PORT)
}

/// The credentials of a user provided Redis, read from their secrets by the data plane.
pub fn redis_credentials_env(conn: &RedisConnection) -> Vec<EnvVar> {
    let credentials = [("REDIS_USERNAME", conn.username.as_ref()), ("REDIS_PASSWORD", conn.password.as_ref())];
    credentials
        .into_iter()
        .filter_map(|(name, source)| source.map(|source| env_from_secret(name, &source.secret_key_ref.name, &source.secret_key_ref.key)))
        .collect()
}

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::{env, Owner, ROLE_JOB};
use triggermesh_core::crd::{Range, Replay};
use triggermesh_core::CoreError;

const REPLAY_CONTAINER_NAME: &str = "replay";

/// The collaborators wired into a replay job.
#[derive(Clone, Debug, Default)]
pub struct ReplayJobSettings<'a> {
    pub image: &'a str,
    pub pull_policy: &'a str,
    /// The address of the Redis backing the replayed broker.
    pub redis_address: String,
    pub redis_stream: Option<&'a str>,
    /// The resolved target of the replay.
    pub sink: &'a str,
    /// Credentials of the Redis backing the replayed broker.
    pub extra_env: Vec<EnvVar>,
}

/// Build the Job replaying the events selected by a Replay.
pub fn replay_job(owner: &Owner, replay: &Replay, settings: ReplayJobSettings<'_>) -> Result<Job, CoreError> {
    let mut env_vars = vec![env("REDIS_ADDRESS", settings.redis_address)];
    if let Some(stream) = settings.redis_stream {
        env_vars.push(env("REDIS_STREAM", stream));
    }
    env_vars.push(env("SINK", settings.sink));

    let bounds = replay.spec.bounds.as_ref();
    let empty = Range::default();
    let by_date = bounds.and_then(|b| b.by_date.as_ref()).unwrap_or(&empty);
    let by_id = bounds.and_then(|b| b.by_id.as_ref()).unwrap_or(&empty);
    let optional = [
        ("START_TIME", by_date.start.as_deref()),
        ("END_TIME", by_date.end.as_deref()),
        ("START_ID", by_id.start.as_deref()),
        ("END_ID", by_id.end.as_deref()),
    ];
    env_vars.extend(optional.into_iter().filter_map(|(name, value)| value.map(|value| env(name, value))));

    if let Some(filter) = replay.spec.filter.as_ref() {
        env_vars.push(env("FILTER", serde_json::to_string(filter)?));
        if let Some(kind) = filter.kind() {
            env_vars.push(env("FILTER_KIND", kind));
        }
    }
    env_vars.extend(settings.extra_env);

    Ok(Job {
        metadata: owner.metadata(ROLE_JOB),
        spec: Some(JobSpec {
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(owner.labels(ROLE_JOB)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".into()),
                    containers: vec![Container {
                        name: REPLAY_CONTAINER_NAME.into(),
                        image: Some(settings.image.into()),
                        image_pull_policy: Some(settings.pull_policy.into()),
                        env: Some(env_vars),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

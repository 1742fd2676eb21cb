use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::stream::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::api::ListParams;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, SignalStream};
use tokio_stream::StreamMap;
use triggermesh_core::crd::{MemoryBroker, RedisBroker, Replay, Trigger};

use crate::config::Config;
use crate::controllers::wiring::{enqueue_broker_of_endpoints, enqueue_controller, enqueue_referrers, enqueue_self, EnqueueReferencedBroker};
use crate::controllers::{BrokerListers, BrokerReconciler, Controller, ReplayReconciler, TriggerReconciler};
use crate::k8s::{EventRecorder, Informer, KubeClient, KubeObject, KubeRecorder, ResourceClient, UriResolver, WorkQueue};
use crate::reconciler::{ObjectReconciler, Store};
use crate::resources::{LABEL_MANAGED_BY, MANAGED_BY};
use crate::server::spawn_server;

/// The interval at which informer caches are checked during startup.
const SYNC_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// The application object for when the operator is running.
pub struct App {
    /// The application's runtime config.
    config: Arc<Config>,

    /// A channel used for triggering graceful shutdown.
    shutdown_tx: broadcast::Sender<()>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,

    /// The join handle of the metrics server.
    server: JoinHandle<Result<()>>,
    /// The join handles of the informers.
    informers: Vec<JoinHandle<()>>,
    /// Startup checks of the informer caches.
    synced: Vec<Box<dyn Fn() -> bool + Send + Sync>>,
    /// The controllers of every TriggerMesh kind.
    controllers: Controllers,
}

/// The controllers of every TriggerMesh kind.
struct Controllers {
    memory_brokers: Arc<Controller<MemoryBroker>>,
    redis_brokers: Arc<Controller<RedisBroker>>,
    triggers: Arc<Controller<Trigger>>,
    replays: Arc<Controller<Replay>>,
}

impl Controllers {
    fn spawn(&self, workers: usize) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(workers * 4);
        handles.extend(self.memory_brokers.clone().spawn(workers));
        handles.extend(self.redis_brokers.clone().spawn(workers));
        handles.extend(self.triggers.clone().spawn(workers));
        handles.extend(self.replays.clone().spawn(workers));
        handles
    }

    fn shutdown(&self) {
        self.memory_brokers.queue().shutdown();
        self.redis_brokers.queue().shutdown();
        self.triggers.queue().shutdown();
        self.replays.queue().shutdown();
    }
}

impl App {
    /// Create a new instance.
    pub async fn new(config: Arc<Config>) -> Result<Self> {
        // App shutdown channel.
        let (shutdown_tx, shutdown_rx) = broadcast::channel(10);

        // Initialize K8s client.
        let client = kube::Client::try_default().await.context("error initializing K8s client")?;
        let namespace = config.watch_namespace.clone();
        let managed = ListParams::default().labels(&format!("{}={}", LABEL_MANAGED_BY, MANAGED_BY));

        // TriggerMesh kinds.
        let memory_client = kube_client::<MemoryBroker>(&client);
        let redis_client = kube_client::<RedisBroker>(&client);
        let trigger_client = kube_client::<Trigger>(&client);
        let replay_client = kube_client::<Replay>(&client);
        let mut memory_brokers = Informer::new(memory_client.clone(), &namespace, ListParams::default());
        let mut redis_brokers = Informer::new(redis_client.clone(), &namespace, ListParams::default());
        let mut triggers = Informer::new(trigger_client.clone(), &namespace, ListParams::default());
        let mut replays = Informer::new(replay_client.clone(), &namespace, ListParams::default());

        // Owned kinds. Services are watched unfiltered as they may be the destination of a trigger.
        let secret_client = kube_client::<Secret>(&client);
        let sa_client = kube_client::<ServiceAccount>(&client);
        let rb_client = kube_client::<RoleBinding>(&client);
        let deployment_client = kube_client::<Deployment>(&client);
        let service_client = kube_client::<Service>(&client);
        let cm_client = kube_client::<ConfigMap>(&client);
        let job_client = kube_client::<Job>(&client);
        let mut secrets = Informer::new(secret_client.clone(), &namespace, managed.clone());
        let mut service_accounts = Informer::new(sa_client.clone(), &namespace, managed.clone());
        let mut role_bindings = Informer::new(rb_client.clone(), &namespace, managed.clone());
        let mut deployments = Informer::new(deployment_client.clone(), &namespace, managed.clone());
        let mut services = Informer::new(service_client.clone(), &namespace, ListParams::default());
        let mut config_maps = Informer::new(cm_client.clone(), &namespace, managed.clone());
        let mut jobs = Informer::new(job_client.clone(), &namespace, managed.clone());
        let mut endpoints = Informer::new(kube_client::<Endpoints>(&client), &namespace, managed);

        // Reconcilers.
        let recorder: Arc<dyn EventRecorder> = Arc::new(KubeRecorder::new(client.clone()));
        let objects = Arc::new(ObjectReconciler {
            secrets: Store::new(secret_client, secrets.indexer()),
            service_accounts: Store::new(sa_client, service_accounts.indexer()),
            role_bindings: Store::new(rb_client, role_bindings.indexer()),
            deployments: Store::new(deployment_client, deployments.indexer()),
            services: Store::new(service_client, services.indexer()),
            config_maps: Store::new(cm_client, config_maps.indexer()),
            jobs: Store::new(job_client, jobs.indexer()),
            endpoints: endpoints.indexer(),
            recorder: recorder.clone(),
        });
        let resolver = Arc::new(UriResolver::new(services.indexer(), memory_brokers.indexer(), redis_brokers.indexer()));
        let listers = BrokerListers {
            memory: memory_brokers.indexer(),
            redis: redis_brokers.indexer(),
        };

        let controllers = Controllers {
            memory_brokers: Arc::new(Controller::new(
                "memorybroker",
                memory_client,
                memory_brokers.indexer(),
                Arc::new(BrokerReconciler::<MemoryBroker>::new(config.clone(), triggers.indexer(), objects.clone())),
            )),
            redis_brokers: Arc::new(Controller::new(
                "redisbroker",
                redis_client,
                redis_brokers.indexer(),
                Arc::new(BrokerReconciler::<RedisBroker>::new(config.clone(), triggers.indexer(), objects.clone())),
            )),
            triggers: Arc::new(Controller::new(
                "trigger",
                trigger_client,
                triggers.indexer(),
                Arc::new(TriggerReconciler::new(listers.clone(), resolver.clone(), recorder)),
            )),
            replays: Arc::new(Controller::new(
                "replay",
                replay_client,
                replays.indexer(),
                Arc::new(ReplayReconciler::new(config.clone(), listers, resolver, objects)),
            )),
        };

        // Enqueue policies.
        let (mq, rq) = (controllers.memory_brokers.queue(), controllers.redis_brokers.queue());
        let (tq, pq) = (controllers.triggers.queue(), controllers.replays.queue());

        memory_brokers.add_handler(enqueue_self::<MemoryBroker>(mq.clone()));
        memory_brokers.add_handler(enqueue_referrers::<MemoryBroker, Trigger>(tq.clone(), triggers.indexer()));
        memory_brokers.add_handler(enqueue_referrers::<MemoryBroker, Replay>(pq.clone(), replays.indexer()));
        redis_brokers.add_handler(enqueue_self::<RedisBroker>(rq.clone()));
        redis_brokers.add_handler(enqueue_referrers::<RedisBroker, Trigger>(tq.clone(), triggers.indexer()));
        redis_brokers.add_handler(enqueue_referrers::<RedisBroker, Replay>(pq.clone(), replays.indexer()));

        triggers.add_handler(enqueue_self::<Trigger>(tq));
        triggers.add_handler(EnqueueReferencedBroker::<MemoryBroker>::new(mq.clone(), memory_brokers.indexer()));
        triggers.add_handler(EnqueueReferencedBroker::<RedisBroker>::new(rq.clone(), redis_brokers.indexer()));
        replays.add_handler(enqueue_self::<Replay>(pq.clone()));

        enqueue_broker_owners(&mut secrets, &mq, &rq);
        enqueue_broker_owners(&mut service_accounts, &mq, &rq);
        enqueue_broker_owners(&mut role_bindings, &mq, &rq);
        enqueue_broker_owners(&mut deployments, &mq, &rq);
        enqueue_broker_owners(&mut services, &mq, &rq);
        enqueue_broker_owners(&mut config_maps, &mq, &rq);
        endpoints.add_handler(enqueue_broker_of_endpoints::<MemoryBroker>(mq, services.indexer()));
        endpoints.add_handler(enqueue_broker_of_endpoints::<RedisBroker>(rq, services.indexer()));
        jobs.add_handler(enqueue_controller::<Job, Replay>(pq));

        // Spawn various core tasks.
        let server = spawn_server(&config, shutdown_tx.subscribe());
        let mut informer_handles = Vec::new();
        let mut synced = Vec::new();
        spawn_informer(memory_brokers, &shutdown_tx, &mut informer_handles, &mut synced);
        spawn_informer(redis_brokers, &shutdown_tx, &mut informer_handles, &mut synced);
        spawn_informer(triggers, &shutdown_tx, &mut informer_handles, &mut synced);
        spawn_informer(replays, &shutdown_tx, &mut informer_handles, &mut synced);
        spawn_informer(secrets, &shutdown_tx, &mut informer_handles, &mut synced);
        spawn_informer(service_accounts, &shutdown_tx, &mut informer_handles, &mut synced);
        spawn_informer(role_bindings, &shutdown_tx, &mut informer_handles, &mut synced);
        spawn_informer(deployments, &shutdown_tx, &mut informer_handles, &mut synced);
        spawn_informer(services, &shutdown_tx, &mut informer_handles, &mut synced);
        spawn_informer(config_maps, &shutdown_tx, &mut informer_handles, &mut synced);
        spawn_informer(jobs, &shutdown_tx, &mut informer_handles, &mut synced);
        spawn_informer(endpoints, &shutdown_tx, &mut informer_handles, &mut synced);

        Ok(Self {
            config,
            shutdown_rx: BroadcastStream::new(shutdown_rx),
            shutdown_tx,
            server,
            informers: informer_handles,
            synced,
            controllers,
        })
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let mut signals = StreamMap::new();
        signals.insert("sigterm", SignalStream::new(signal(SignalKind::terminate()).context("error building signal stream")?));
        signals.insert("sigint", SignalStream::new(signal(SignalKind::interrupt()).context("error building signal stream")?));

        // Workers only start once every cache holds a full view of the cluster.
        let mut workers = Vec::new();
        let mut started = false;
        loop {
            if !started && self.synced.iter().all(|synced| synced()) {
                tracing::info!(workers = self.config.workers, "caches synced, starting controllers");
                workers = self.controllers.spawn(self.config.workers);
                started = true;
            }
            tokio::select! {
                Some((_, sig)) = signals.next() => {
                    tracing::debug!(signal = ?sig, "signal received, beginning graceful shutdown");
                    let _ = self.shutdown_tx.send(());
                    break;
                }
                _ = self.shutdown_rx.next() => break,
                _ = tokio::time::sleep(SYNC_POLL_INTERVAL), if !started => continue,
            }
        }

        // Begin shutdown routine.
        tracing::debug!("TriggerMesh operator is shutting down");
        self.controllers.shutdown();
        for handle in workers {
            if let Err(err) = handle.await {
                tracing::error!(error = ?err, "error joining controller worker");
            }
        }
        for handle in self.informers {
            if let Err(err) = handle.await {
                tracing::error!(error = ?err, "error joining informer");
            }
        }
        if let Err(err) = self.server.await.context("error joining metrics server handle").and_then(|res| res) {
            tracing::error!(error = ?err, "error shutting down metrics server");
        }

        tracing::debug!("TriggerMesh operator shutdown complete");
        Ok(())
    }
}

fn kube_client<K: KubeObject>(client: &kube::Client) -> Arc<dyn ResourceClient<K>> {
    Arc::new(KubeClient::<K>::new(client.clone()))
}

/// Enqueue the broker controlling changed objects of an owned kind.
fn enqueue_broker_owners<K: KubeObject>(informer: &mut Informer<K>, memory: &Arc<WorkQueue>, redis: &Arc<WorkQueue>) {
    informer.add_handler(enqueue_controller::<K, MemoryBroker>(memory.clone()));
    informer.add_handler(enqueue_controller::<K, RedisBroker>(redis.clone()));
}

fn spawn_informer<K: KubeObject>(
    informer: Informer<K>, shutdown: &broadcast::Sender<()>, handles: &mut Vec<JoinHandle<()>>, synced: &mut Vec<Box<dyn Fn() -> bool + Send + Sync>>,
) {
    let indexer = informer.indexer();
    synced.push(Box::new(move || indexer.has_synced()));
    handles.push(informer.spawn(shutdown.subscribe()));
}

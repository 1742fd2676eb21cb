use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::StreamExt;
use kube::api::ListParams;
use kube::runtime::watcher::Event;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;

use crate::k8s::client::WatchEventResult;
use crate::k8s::{Indexer, KubeObject, ObjectKey, ResourceClient};
use crate::metrics::METRIC_WATCHER_ERRORS;

/// The delay applied after an error from a watch stream.
const WATCHER_ERROR_DELAY: Duration = Duration::from_secs(5);

/// A receiver of cache change notifications.
///
/// Handlers are invoked after the cache has been updated, so reads from the cache made within a
/// handler observe the change.
pub trait EventHandler<K>: Send + Sync {
    fn on_add(&self, obj: &K);
    fn on_update(&self, old: &K, new: &K);
    fn on_delete(&self, obj: &K);
}

type Predicate<K> = Box<dyn Fn(&K) -> bool + Send + Sync>;
type Callback<K> = Box<dyn Fn(&K) + Send + Sync>;

/// An `EventHandler` which invokes a callback for every object accepted by a predicate.
///
/// On updates the callback is invoked with the new object if it is accepted, else with the old
/// object if that one was accepted, which lets the callback observe objects leaving the filter.
pub struct FilteringHandler<K> {
    filter: Predicate<K>,
    handler: Callback<K>,
}

impl<K> FilteringHandler<K> {
    pub fn new(filter: impl Fn(&K) -> bool + Send + Sync + 'static, handler: impl Fn(&K) + Send + Sync + 'static) -> Self {
        Self {
            filter: Box::new(filter),
            handler: Box::new(handler),
        }
    }

    /// A handler accepting every object.
    pub fn all(handler: impl Fn(&K) + Send + Sync + 'static) -> Self {
        Self::new(|_| true, handler)
    }
}

impl<K> EventHandler<K> for FilteringHandler<K> {
    fn on_add(&self, obj: &K) {
        if (self.filter)(obj) {
            (self.handler)(obj);
        }
    }

    fn on_update(&self, old: &K, new: &K) {
        if (self.filter)(new) {
            (self.handler)(new);
        } else if (self.filter)(old) {
            (self.handler)(old);
        }
    }

    fn on_delete(&self, obj: &K) {
        if (self.filter)(obj) {
            (self.handler)(obj);
        }
    }
}

/// A task keeping an `Indexer` up-to-date from a K8s watch stream, notifying handlers of changes.
pub struct Informer<K: KubeObject> {
    client: Arc<dyn ResourceClient<K>>,
    namespace: String,
    params: ListParams,
    indexer: Arc<Indexer<K>>,
    handlers: Vec<Arc<dyn EventHandler<K>>>,
}

impl<K: KubeObject> Informer<K> {
    /// Create a new instance watching the given namespace, or all namespaces if empty.
    pub fn new(client: Arc<dyn ResourceClient<K>>, namespace: impl Into<String>, params: ListParams) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            params,
            indexer: Arc::new(Indexer::new()),
            handlers: Vec::new(),
        }
    }

    /// The cache maintained by this informer.
    pub fn indexer(&self) -> Arc<Indexer<K>> {
        self.indexer.clone()
    }

    /// Register a handler. Handlers must be registered before the informer is spawned.
    pub fn add_handler(&mut self, handler: impl EventHandler<K> + 'static) {
        self.handlers.push(Arc::new(handler));
    }

    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, shutdown: broadcast::Receiver<()>) {
        let mut shutdown = BroadcastStream::new(shutdown);
        let stream = self.client.watch(&self.namespace, self.params.clone());
        tokio::pin!(stream);

        tracing::info!(kind = self.indexer.kind(), "informer initialized");
        loop {
            tokio::select! {
                Some(k8s_event_res) = stream.next() => self.handle_event(k8s_event_res).await,
                _ = shutdown.next() => break,
            }
        }
        tracing::debug!(kind = self.indexer.kind(), "informer shutdown");
    }

    /// Handle watcher events coming from K8s.
    #[tracing::instrument(level = "debug", skip(self, res), fields(kind = self.indexer.kind()))]
    pub(crate) async fn handle_event(&self, res: WatchEventResult<K>) {
        let event = match res {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(error = ?err, "error from k8s watch stream");
                metrics::increment_counter!(METRIC_WATCHER_ERRORS, "kind" => self.indexer.kind().to_string());
                let _ = tokio::time::sleep(WATCHER_ERROR_DELAY).await;
                return;
            }
        };
        match event {
            Event::Applied(obj) => self.applied(obj),
            Event::Deleted(obj) => self.deleted(obj),
            Event::Restarted(objs) => self.restarted(objs),
        }
    }

    fn applied(&self, obj: K) {
        match self.indexer.apply(obj.clone()) {
            Some(old) if old == obj => (),
            Some(old) => self.handlers.iter().for_each(|handler| handler.on_update(&old, &obj)),
            None => self.handlers.iter().for_each(|handler| handler.on_add(&obj)),
        }
    }

    fn deleted(&self, obj: K) {
        let obj = self.indexer.delete(&obj).unwrap_or(obj);
        self.handlers.iter().for_each(|handler| handler.on_delete(&obj));
    }

    fn restarted(&self, objs: Vec<K>) {
        tracing::debug!(count = objs.len(), "watcher restarted");
        let mut old: HashMap<_, _> = self
            .indexer
            .replace(objs.clone())
            .into_iter()
            .filter_map(|obj| ObjectKey::from_object(&obj).map(|key| (key, obj)))
            .collect();
        for obj in objs {
            let key = match ObjectKey::from_object(&obj) {
                Some(key) => key,
                None => continue, // Not actually possible as K8s requires name.
            };
            match old.remove(&key) {
                Some(prev) if prev == obj => (),
                Some(prev) => self.handlers.iter().for_each(|handler| handler.on_update(&prev, &obj)),
                None => self.handlers.iter().for_each(|handler| handler.on_add(&obj)),
            }
        }
        for (_, gone) in old {
            self.handlers.iter().for_each(|handler| handler.on_delete(&gone));
        }
    }
}

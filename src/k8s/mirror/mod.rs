/**
 * Cluster mirror engine
 *
 * One `MirrorStore` and one `WatchSupervisor` task per resource kind, a pod
 * event fan-out, and merged log tails. Kinds are fully independent: a kind
 * that keeps failing never holds up the others.
 */
pub mod config;
pub mod fanout;
pub mod probe;
pub mod store;
pub mod supervisor;
pub mod sync;

pub use config::{BackoffConfig, MirrorConfig};
pub use fanout::{ChangeKind, EventFanout, SubscriberId};
pub use probe::CapabilityProbe;
pub use store::{ChangeEvent, Mirrored, MirrorStore, ObjectRecord, ResourceKey};
pub use supervisor::{Backoff, SupervisorState, WatchSupervisor};
pub use sync::SyncOutcome;

use crate::error::Result;
use crate::k8s::api::{ClusterApi, KubeApi};
use crate::k8s::client::{self, ClientOptions};
use crate::k8s::logs::{LogMultiplexer, MergedLogStream};
use crate::k8s::resources::ResourceKind;
use crate::k8s::USER_AGENT;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Namespace, Node, Pod, Service};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Per-kind snapshot of the engine, for status output
#[derive(Debug, Clone)]
pub struct KindStats {
    pub kind: ResourceKind,
    pub entries: usize,
    pub checkpoint: Option<String>,
    pub state: SupervisorState,
}

struct Supervised {
    kind: ResourceKind,
    state: watch::Receiver<SupervisorState>,
    handle: JoinHandle<()>,
}

/// Always-available local view of a cluster
pub struct ClusterMirror {
    api: Arc<dyn ClusterApi>,
    pods: Arc<MirrorStore<Pod>>,
    services: Arc<MirrorStore<Service>>,
    nodes: Arc<MirrorStore<Node>>,
    namespaces: Arc<MirrorStore<Namespace>>,
    deployments: Arc<MirrorStore<Deployment>>,
    daemon_sets: Arc<MirrorStore<DaemonSet>>,
    jobs: Arc<MirrorStore<Job>>,
    stateful_sets: Arc<MirrorStore<StatefulSet>>,
    cron_jobs: Arc<MirrorStore<CronJob>>,
    pod_events: Arc<EventFanout<Pod>>,
    shutdown: CancellationToken,
    config: MirrorConfig,
    tasks: Vec<Supervised>,
}

impl ClusterMirror {
    /// Connect to the cluster described by `options` and start mirroring
    ///
    /// # Errors
    ///
    /// Returns an error if the kube client cannot be created
    pub async fn connect(options: &ClientOptions, config: MirrorConfig) -> Result<Self> {
        let client = client::new(options, Some(USER_AGENT)).await?;
        Ok(Self::start(Arc::new(KubeApi::new(client)), config))
    }

    /// Create every store and spawn one supervisor per kind.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(api: Arc<dyn ClusterApi>, config: MirrorConfig) -> Self {
        let pod_events = Arc::new(EventFanout::new());
        let mut mirror = Self {
            api,
            pods: Arc::new(MirrorStore::with_fanout(ResourceKind::Pod, pod_events.clone())),
            services: Arc::new(MirrorStore::new(ResourceKind::Service)),
            nodes: Arc::new(MirrorStore::new(ResourceKind::Node)),
            namespaces: Arc::new(MirrorStore::new(ResourceKind::Namespace)),
            deployments: Arc::new(MirrorStore::new(ResourceKind::Deployment)),
            daemon_sets: Arc::new(MirrorStore::new(ResourceKind::DaemonSet)),
            jobs: Arc::new(MirrorStore::new(ResourceKind::Job)),
            stateful_sets: Arc::new(MirrorStore::new(ResourceKind::StatefulSet)),
            cron_jobs: Arc::new(MirrorStore::new(ResourceKind::CronJob)),
            pod_events,
            shutdown: CancellationToken::new(),
            config,
            tasks: Vec::with_capacity(ResourceKind::ALL.len()),
        };

        mirror.supervise(mirror.pods.clone());
        mirror.supervise(mirror.services.clone());
        mirror.supervise(mirror.nodes.clone());
        mirror.supervise(mirror.namespaces.clone());
        mirror.supervise(mirror.deployments.clone());
        mirror.supervise(mirror.daemon_sets.clone());
        mirror.supervise(mirror.jobs.clone());
        mirror.supervise(mirror.stateful_sets.clone());
        mirror.supervise(mirror.cron_jobs.clone());

        info!("🚀 Mirror started for {} resource kinds", mirror.tasks.len());
        mirror
    }

    fn supervise<K: Mirrored>(&mut self, store: Arc<MirrorStore<K>>) {
        let kind = store.kind();
        let supervisor = WatchSupervisor::new(
            self.api.clone(),
            store,
            self.config.clone(),
            self.shutdown.child_token(),
        );
        let state = supervisor.state();
        let handle = supervisor.spawn();
        self.tasks.push(Supervised {
            kind,
            state,
            handle,
        });
    }

    /// Visit every mirrored pod; the first visitor error stops the walk
    ///
    /// # Errors
    ///
    /// Returns the visitor's error, or `LockPoisoned`
    pub fn walk_pods(&self, visitor: impl FnMut(&Pod) -> Result<()>) -> Result<()> {
        walk(&self.pods, visitor)
    }

    /// # Errors
    ///
    /// Returns the visitor's error, or `LockPoisoned`
    pub fn walk_services(&self, visitor: impl FnMut(&Service) -> Result<()>) -> Result<()> {
        walk(&self.services, visitor)
    }

    /// # Errors
    ///
    /// Returns the visitor's error, or `LockPoisoned`
    pub fn walk_nodes(&self, visitor: impl FnMut(&Node) -> Result<()>) -> Result<()> {
        walk(&self.nodes, visitor)
    }

    /// # Errors
    ///
    /// Returns the visitor's error, or `LockPoisoned`
    pub fn walk_namespaces(&self, visitor: impl FnMut(&Namespace) -> Result<()>) -> Result<()> {
        walk(&self.namespaces, visitor)
    }

    /// # Errors
    ///
    /// Returns the visitor's error, or `LockPoisoned`
    pub fn walk_deployments(&self, visitor: impl FnMut(&Deployment) -> Result<()>) -> Result<()> {
        walk(&self.deployments, visitor)
    }

    /// # Errors
    ///
    /// Returns the visitor's error, or `LockPoisoned`
    pub fn walk_daemon_sets(&self, visitor: impl FnMut(&DaemonSet) -> Result<()>) -> Result<()> {
        walk(&self.daemon_sets, visitor)
    }

    /// # Errors
    ///
    /// Returns the visitor's error, or `LockPoisoned`
    pub fn walk_stateful_sets(
        &self,
        visitor: impl FnMut(&StatefulSet) -> Result<()>,
    ) -> Result<()> {
        walk(&self.stateful_sets, visitor)
    }

    /// # Errors
    ///
    /// Returns the visitor's error, or `LockPoisoned`
    pub fn walk_jobs(&self, visitor: impl FnMut(&Job) -> Result<()>) -> Result<()> {
        walk(&self.jobs, visitor)
    }

    /// Visit every cron job together with the mirrored jobs it lists as active
    ///
    /// # Errors
    ///
    /// Returns the visitor's error, or `LockPoisoned`
    pub fn walk_cron_jobs(
        &self,
        mut visitor: impl FnMut(&CronJob, &[&Job]) -> Result<()>,
    ) -> Result<()> {
        // index jobs by uid once so each cron job lookup is cheap
        let jobs = self.jobs.list()?;
        let by_uid: HashMap<&str, &Job> = jobs
            .iter()
            .filter_map(|record| {
                let job = &record.object;
                job.metadata.uid.as_deref().map(|uid| (uid, job))
            })
            .collect();

        for record in self.cron_jobs.list()? {
            let cron = &record.object;
            let active: Vec<&Job> = cron
                .status
                .as_ref()
                .and_then(|status| status.active.as_ref())
                .into_iter()
                .flatten()
                .filter_map(|reference| reference.uid.as_deref())
                .filter_map(|uid| by_uid.get(uid).copied())
                .collect();
            visitor(cron, &active)?;
        }
        Ok(())
    }

    /// Register a pod change callback. Subscriptions last for the mirror's lifetime.
    pub fn watch_pods<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(ChangeKind, &Pod) + Send + Sync + 'static,
    {
        self.pod_events.subscribe(callback)
    }

    /// Follow the logs of `containers` in one pod as a single stream
    ///
    /// # Errors
    ///
    /// Returns the first open failure; streams opened before it are closed
    pub async fn get_logs(
        &self,
        namespace: &str,
        pod: &str,
        containers: &[String],
    ) -> Result<MergedLogStream> {
        LogMultiplexer::new(self.api.clone())
            .open(namespace, pod, containers)
            .await
    }

    /// Entry counts, checkpoints and supervisor states per kind
    ///
    /// # Errors
    ///
    /// Returns `LockPoisoned` if a store is unreadable
    pub fn stats(&self) -> Result<Vec<KindStats>> {
        self.tasks
            .iter()
            .map(|task| {
                let (entries, checkpoint) = self.store_summary(task.kind)?;
                Ok(KindStats {
                    kind: task.kind,
                    entries,
                    checkpoint,
                    state: *task.state.borrow(),
                })
            })
            .collect()
    }

    fn store_summary(&self, kind: ResourceKind) -> Result<(usize, Option<String>)> {
        Ok(match kind {
            ResourceKind::Pod => (self.pods.len()?, self.pods.checkpoint()?),
            ResourceKind::Service => (self.services.len()?, self.services.checkpoint()?),
            ResourceKind::Node => (self.nodes.len()?, self.nodes.checkpoint()?),
            ResourceKind::Namespace => (self.namespaces.len()?, self.namespaces.checkpoint()?),
            ResourceKind::Deployment => (self.deployments.len()?, self.deployments.checkpoint()?),
            ResourceKind::DaemonSet => (self.daemon_sets.len()?, self.daemon_sets.checkpoint()?),
            ResourceKind::Job => (self.jobs.len()?, self.jobs.checkpoint()?),
            ResourceKind::StatefulSet => {
                (self.stateful_sets.len()?, self.stateful_sets.checkpoint()?)
            }
            ResourceKind::CronJob => (self.cron_jobs.len()?, self.cron_jobs.checkpoint()?),
        })
    }

    /// Signal every supervisor to exit. Safe to call any number of times.
    pub fn stop(&self) {
        if !self.shutdown.is_cancelled() {
            info!("🛑 Stopping mirror");
        }
        self.shutdown.cancel();
    }

    /// Stop and wait for every supervisor to exit, each within the configured grace period
    pub async fn shutdown(mut self) {
        self.stop();
        for task in std::mem::take(&mut self.tasks) {
            match timeout(self.config.shutdown_grace, task.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("⚠️ {} supervisor ended abnormally: {}", task.kind, e),
                Err(_) => warn!(
                    "⚠️ {} supervisor did not stop within {:?}",
                    task.kind, self.config.shutdown_grace
                ),
            }
        }
    }
}

impl Drop for ClusterMirror {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn walk<K: Mirrored>(
    store: &MirrorStore<K>,
    mut visitor: impl FnMut(&K) -> Result<()>,
) -> Result<()> {
    for record in store.list()? {
        visitor(&record.object)?;
    }
    Ok(())
}

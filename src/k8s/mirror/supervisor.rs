/**
 * Watch supervisor
 *
 * Drives one mirror store's list-then-watch protocol for the lifetime of
 * the engine. Every attempt re-checks that the server still serves the
 * kind, failures back off exponentially up to a ceiling, and a shutdown
 * token ends the loop at the next blocking point.
 */
use super::config::{BackoffConfig, MirrorConfig};
use super::probe::CapabilityProbe;
use super::store::{Mirrored, MirrorStore};
use super::sync::{list_and_watch, SyncOutcome};
use crate::error::Result;
use crate::k8s::api::ClusterApi;
use crate::k8s::resources::{ApiTarget, ResourceKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Exponential backoff between supervisor attempts
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            current: config.floor,
        }
    }

    /// Delay to wait now; the following one doubles, capped at the ceiling
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.config.ceiling);
        self.current = self.current.saturating_mul(2).min(self.config.ceiling);
        delay
    }

    pub const fn reset(&mut self) {
        self.current = self.config.floor;
    }

    #[must_use]
    pub const fn current(&self) -> Duration {
        self.current
    }
}

/// Where a supervisor is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    ProbingCapability,
    /// The server does not serve this kind; waiting to probe again
    Unsupported,
    Syncing,
    BackoffWait,
    Stopped,
}

enum Attempt {
    Unsupported,
    Synced(SyncOutcome),
    Stopped,
}

/// Keeps one `MirrorStore` in sync until shutdown
pub struct WatchSupervisor<K> {
    kind: ResourceKind,
    api: Arc<dyn ClusterApi>,
    probe: CapabilityProbe,
    store: Arc<MirrorStore<K>>,
    config: MirrorConfig,
    shutdown: CancellationToken,
    state: watch::Sender<SupervisorState>,
    /// Triple chosen by the last successful probe, kept until a failure
    resolved: Option<ApiTarget>,
    sync_started: Option<Instant>,
}

impl<K: Mirrored> WatchSupervisor<K> {
    #[must_use]
    pub fn new(
        api: Arc<dyn ClusterApi>,
        store: Arc<MirrorStore<K>>,
        config: MirrorConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(SupervisorState::Idle);
        Self {
            kind: store.kind(),
            probe: CapabilityProbe::new(api.clone()),
            api,
            store,
            config,
            shutdown,
            state,
            resolved: None,
            sync_started: None,
        }
    }

    /// Receiver that tracks every state transition
    #[must_use]
    pub fn state(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Loop until the shutdown token fires
    pub async fn run(mut self) {
        info!("🔍 Starting {} supervisor", self.kind);
        let mut backoff = Backoff::new(self.config.backoff);

        while !self.shutdown.is_cancelled() {
            let result = self.attempt().await;

            let healthy = self
                .sync_started
                .take()
                .is_some_and(|started| started.elapsed() >= self.config.healthy_after);
            if healthy {
                backoff.reset();
            }

            let (delay, waiting) = match result {
                Ok(Attempt::Stopped) => break,
                Ok(Attempt::Unsupported) => {
                    let delay = backoff.next_delay();
                    info!(
                        "💤 {} are not supported by this server, probing again in {:?}",
                        self.kind, delay
                    );
                    (delay, SupervisorState::Unsupported)
                }
                Ok(Attempt::Synced(outcome)) if healthy || outcome == SyncOutcome::Expired => {
                    info!("🔍 {} sync ended ({:?}), restarting...", self.kind, outcome);
                    (self.config.restart_delay, SupervisorState::BackoffWait)
                }
                Ok(Attempt::Synced(outcome)) => {
                    let delay = backoff.next_delay();
                    warn!(
                        "⚠️ {} sync ended early ({:?}), restarting in {:?}",
                        self.kind, outcome, delay
                    );
                    (delay, SupervisorState::BackoffWait)
                }
                Err(e) => {
                    self.resolved = None;
                    let delay = backoff.next_delay();
                    error!("❌ {} sync failed: {}, restarting in {:?}", self.kind, e, delay);
                    (delay, SupervisorState::BackoffWait)
                }
            };

            // an unsupported kind stays reported as such until the next probe
            self.set_state(waiting);
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                () = sleep(delay) => {}
            }
        }

        self.set_state(SupervisorState::Stopped);
        info!("🛑 {} supervisor stopped", self.kind);
    }

    async fn attempt(&mut self) -> Result<Attempt> {
        self.set_state(SupervisorState::ProbingCapability);
        let shutdown = self.shutdown.clone();
        let target = tokio::select! {
            biased;
            () = shutdown.cancelled() => return Ok(Attempt::Stopped),
            target = self.current_target() => target?,
        };

        let Some(target) = target else {
            self.set_state(SupervisorState::Unsupported);
            if !self.store.is_empty()? {
                self.store.clear()?;
            }
            return Ok(Attempt::Unsupported);
        };

        self.set_state(SupervisorState::Syncing);
        self.sync_started = Some(Instant::now());
        debug!("🔄 {} syncing via {}", self.kind, target);

        match list_and_watch(self.api.as_ref(), &target, self.store.as_ref(), &shutdown).await? {
            SyncOutcome::Stopped => Ok(Attempt::Stopped),
            outcome => Ok(Attempt::Synced(outcome)),
        }
    }

    /// Re-check the memoized triple, or resolve one from scratch
    async fn current_target(&mut self) -> Result<Option<ApiTarget>> {
        if let Some(target) = self.resolved {
            if self.probe.supports_target(&target).await? {
                return Ok(Some(target));
            }
            self.resolved = None;
        }

        self.resolved = self.probe.resolve(self.kind).await?;
        Ok(self.resolved)
    }

    fn set_state(&self, state: SupervisorState) {
        self.state.send_replace(state);
    }
}

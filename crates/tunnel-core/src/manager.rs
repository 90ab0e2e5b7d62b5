//! Converges running supervisors with the desired tunnel set.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex},
};

use futures::future::join_all;
use tb_types::TunnelConfig;
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::ManagerOptions,
    discovery::Discovery,
    error::{TunnelError, TunnelResult},
    services::ListFunc,
    stats::Stats,
    supervisor::Supervisor,
    tunnel::TunnelFactory,
};

/// A desired tunnel as of the latest refresh.
#[derive(Debug, Clone)]
pub struct RunningTunnel {
    pub config: TunnelConfig,
    /// The config changed in a way that needs a new connection.
    pub needs_restart: bool,
}

struct SupervisorHandle {
    config: TunnelConfig,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct ManagerState {
    tunnels: HashMap<Uuid, RunningTunnel>,
    supervisors: HashMap<Uuid, SupervisorHandle>,
}

pub struct Manager<F: TunnelFactory> {
    list: ListFunc,
    factory: Arc<F>,
    options: ManagerOptions,
    discovery: Option<Arc<dyn Discovery>>,
    stats: Stats,
    root: CancellationToken,
    state: Mutex<ManagerState>,
    created_at: Instant,
    last_refresh: StdMutex<Option<Instant>>,
}

impl<F: TunnelFactory> Manager<F> {
    pub fn new(list: ListFunc, factory: F, options: ManagerOptions, stats: &Stats) -> Self {
        Self {
            list,
            factory: Arc::new(factory),
            options,
            discovery: None,
            stats: stats.with_prefix("tunnel"),
            root: CancellationToken::new(),
            state: Mutex::new(ManagerState::default()),
            created_at: Instant::now(),
            last_refresh: StdMutex::new(None),
        }
    }

    /// Supervisors register their tunnels here and, when configured, run connectivity checks.
    pub fn with_discovery(mut self, discovery: Arc<dyn Discovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Run the refresh and reconcile loops until `cancel` fires, then stop every supervisor.
    pub async fn start(&self, cancel: CancellationToken) {
        info!(
            refresh_interval = ?self.options.refresh_interval,
            restart_interval = ?self.options.restart_interval,
            "tunnel manager started"
        );
        let refresh_loop = async {
            let mut ticker = tokio::time::interval(self.options.refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => self.refresh().await,
                }
            }
        };
        let reconcile_loop = async {
            let mut ticker = tokio::time::interval(self.options.refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => self.reconcile().await,
                }
            }
        };
        tokio::join!(refresh_loop, reconcile_loop);
        self.shutdown().await;
        info!("tunnel manager stopped");
    }

    /// Pull the desired set. On failure the previous set is kept.
    pub async fn refresh(&self) {
        let configs = match (self.list)().await {
            Ok(configs) => configs,
            Err(err) => {
                warn!(%err, "failed to list tunnels; keeping previous set");
                return;
            }
        };

        let mut state = self.state.lock().await;
        let mut next = HashMap::with_capacity(configs.len());
        for config in configs {
            let id = config.id();
            let needs_restart = match state.tunnels.get(&id) {
                Some(prev) => prev.needs_restart || !prev.config.semantic_eq(&config),
                None => false,
            };
            if needs_restart {
                debug!(tunnel_id = %id, "tunnel config changed");
            }
            next.insert(id, RunningTunnel { config, needs_restart });
        }
        state.tunnels = next;
        drop(state);

        if let Ok(mut last) = self.last_refresh.lock() {
            *last = Some(Instant::now());
        }
    }

    /// Stop supervisors that are no longer desired or need a restart, then
    /// start one for every desired tunnel that lacks one.
    pub async fn reconcile(&self) {
        let mut state = self.state.lock().await;
        let ManagerState { tunnels, supervisors } = &mut *state;

        let stale: Vec<Uuid> = supervisors
            .iter()
            .filter(|(id, handle)| match tunnels.get(id) {
                None => true,
                Some(desired) => desired.needs_restart || !handle.config.semantic_eq(&desired.config),
            })
            .map(|(id, _)| *id)
            .collect();
        let stopping: Vec<_> = stale
            .into_iter()
            .filter_map(|id| supervisors.remove(&id).map(|handle| (id, handle)))
            .inspect(|(id, _)| info!(tunnel_id = %id, "stopping tunnel"))
            .collect();
        self.stop_supervisors(stopping).await;

        for (id, desired) in tunnels.iter_mut() {
            desired.needs_restart = false;
            if let Some(handle) = supervisors.get_mut(id) {
                handle.config = desired.config.clone();
                continue;
            }
            info!(tunnel_id = %id, tunnel_type = %desired.config.kind(), port = desired.config.tunnel_port(), "starting tunnel");
            let handle = self.spawn_supervisor(&desired.config);
            supervisors.insert(*id, handle);
        }

        self.stats.gauge("count", supervisors.len() as f64);
    }

    /// Fails when no refresh has succeeded within two refresh intervals.
    pub fn check(&self) -> TunnelResult<()> {
        let since = self
            .last_refresh
            .lock()
            .ok()
            .and_then(|last| *last)
            .unwrap_or(self.created_at);
        let age = since.elapsed();
        if age > self.options.refresh_interval * 2 {
            return Err(TunnelError::Stale { age });
        }
        Ok(())
    }

    /// Configs of the currently supervised tunnels.
    pub async fn supervised(&self) -> HashMap<Uuid, TunnelConfig> {
        let state = self.state.lock().await;
        state
            .supervisors
            .iter()
            .map(|(id, handle)| (*id, handle.config.clone()))
            .collect()
    }

    /// The desired set as of the latest successful refresh.
    pub async fn desired(&self) -> HashMap<Uuid, RunningTunnel> {
        self.state.lock().await.tunnels.clone()
    }

    /// Stop every supervisor and wait (bounded) for them to finish.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let mut state = self.state.lock().await;
        let handles: Vec<_> = state.supervisors.drain().collect();
        self.stop_supervisors(handles).await;
        self.stats.gauge("count", 0.0);
    }

    fn spawn_supervisor(&self, config: &TunnelConfig) -> SupervisorHandle {
        let tunnel = self.factory.build(config);
        let stop = self.root.child_token();
        let mut supervisor = Supervisor::new(tunnel, self.options.restart_interval, stop.clone());
        if let Some(discovery) = &self.discovery {
            supervisor = supervisor.with_discovery(discovery.clone(), self.options.conncheck.clone());
        }
        let task = tokio::spawn(async move { supervisor.start().await });
        SupervisorHandle {
            config: config.clone(),
            stop,
            task,
        }
    }

    /// Cancel every supervisor first, then wait for all of them together so the
    /// total wait is bounded by one `stop_timeout`.
    async fn stop_supervisors(&self, handles: Vec<(Uuid, SupervisorHandle)>) {
        for (_, handle) in &handles {
            handle.stop.cancel();
        }
        join_all(handles.into_iter().map(|(id, handle)| self.await_supervisor(id, handle.task))).await;
    }

    async fn await_supervisor(&self, id: Uuid, mut task: JoinHandle<()>) {
        match tokio::time::timeout(self.options.stop_timeout, &mut task).await {
            Ok(Ok(())) => debug!(tunnel_id = %id, "supervisor stopped"),
            Ok(Err(err)) => warn!(tunnel_id = %id, ?err, "supervisor task failed"),
            Err(_) => {
                warn!(tunnel_id = %id, timeout = ?self.options.stop_timeout, "supervisor did not stop in time; aborting");
                task.abort();
            }
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;

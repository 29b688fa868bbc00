use std::sync::Arc;

use chrono::{DateTime, Utc};
use dagmaster_model::{AlertKind, Alerter, Command};
use dagmaster_store::ProcessStore;
use serde::{Deserialize, Serialize};
use sysinfo::System;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::coord_service::{CoordService, WatchEvent};
use crate::errors::{CoordError, CoordResult};
use crate::mutex::DistributedMutex;
use crate::stopper::Stopper;

/// Which kind of member znode a failover lock path is being requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZkNodeType {
    Master,
    Worker,
    Startup,
}

#[derive(Debug, Clone)]
pub struct ClusterControllerConfig {
    pub root_path: String,
    pub host: String,
    pub warn_times_failover: u32,
}

impl Default for ClusterControllerConfig {
    fn default() -> Self {
        Self {
            root_path: "/dagmaster".to_string(),
            host: "localhost:0".to_string(),
            warn_times_failover: 3,
        }
    }
}

/// Liveness payload written into a member's ephemeral znode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub host: String,
    pub pid: u32,
    pub cpu_percent: f32,
    pub mem_percent: f32,
    pub start_time: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl HeartbeatPayload {
    pub fn sample(host: &str, start_time: DateTime<Utc>) -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        let cpu_percent = system.global_cpu_usage();
        let mem_percent = if system.total_memory() == 0 {
            0.0
        } else {
            (system.used_memory() as f64 / system.total_memory() as f64 * 100.0) as f32
        };
        Self {
            host: host.to_string(),
            pid: std::process::id(),
            cpu_percent,
            mem_percent,
            start_time,
            last_heartbeat: Utc::now(),
        }
    }
}

/// Cluster membership, liveness watches and failover orchestration for
/// Masters and Workers. Mirrors a ZooKeeper-class coordination client's
/// "register self, watch peers, failover on removal" lifecycle.
pub struct ClusterController {
    coord: Arc<dyn CoordService>,
    store: Arc<dyn ProcessStore>,
    alerter: Arc<dyn Alerter>,
    config: ClusterControllerConfig,
    stopper: Stopper,
    self_path: String,
    start_time: DateTime<Utc>,
}

impl std::fmt::Debug for ClusterController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterController")
            .field("host", &self.config.host)
            .finish_non_exhaustive()
    }
}

impl ClusterController {
    pub fn new(
        coord: Arc<dyn CoordService>,
        store: Arc<dyn ProcessStore>,
        alerter: Arc<dyn Alerter>,
        config: ClusterControllerConfig,
        stopper: Stopper,
    ) -> Self {
        let self_path = format!("{}/masters/{}", config.root_path, config.host);
        Self {
            coord,
            store,
            alerter,
            config,
            stopper,
            self_path,
            start_time: Utc::now(),
        }
    }

    fn masters_path(&self) -> String {
        format!("{}/masters", self.config.root_path)
    }

    fn workers_path(&self) -> String {
        format!("{}/workers", self.config.root_path)
    }

    fn dead_servers_path(&self) -> String {
        format!("{}/dead-servers", self.config.root_path)
    }

    pub fn get_failover_lock_path(&self, node_type: ZkNodeType) -> CoordResult<String> {
        let suffix = match node_type {
            ZkNodeType::Master => "master",
            ZkNodeType::Worker => "worker",
            ZkNodeType::Startup => "startup",
        };
        Ok(format!("{}/lock/failover/{suffix}", self.config.root_path))
    }

    /// Registers this Master, runs the startup failover sweep if we are the
    /// only live Master, installs liveness watches, and spawns the
    /// background watch-consumption loop. Returns once startup is complete;
    /// the consumption loop keeps running until `stopper.stop()`.
    pub async fn start(self: Arc<Self>) -> CoordResult<()> {
        for path in [
            self.config.root_path.clone(),
            self.masters_path(),
            self.workers_path(),
            self.dead_servers_path(),
            format!("{}/lock", self.config.root_path),
            format!("{}/lock/failover", self.config.root_path),
        ] {
            self.coord.ensure_persistent_path(&path).await?;
        }

        let mutex = DistributedMutex::new(self.coord.clone());
        let startup_lock = self.get_failover_lock_path(ZkNodeType::Startup)?;
        let guard = mutex.acquire(&startup_lock).await?;

        let payload = HeartbeatPayload::sample(&self.config.host, self.start_time);
        let data = serde_json::to_vec(&payload).map_err(|e| CoordError::Other(e.to_string()))?;
        self.coord.create_ephemeral(&self.self_path, data).await?;

        let master_count = self.coord.get_children(&self.masters_path()).await?.len();
        if master_count == 1 {
            info!("first master online, running startup failover sweep");
            if let Err(err) = self.failover_worker(None, true).await {
                warn!(error = %err, "startup worker failover sweep failed");
            }
            if let Err(err) = self.failover_master(None).await {
                warn!(error = %err, "startup master failover sweep failed");
            }
        }
        guard.release().await?;

        let master_rx = self.coord.watch_children(&self.masters_path()).await?;
        let worker_rx = self.coord.watch_children(&self.workers_path()).await?;

        let controller = self.clone();
        tokio::spawn(async move {
            controller.consume_watches(master_rx, worker_rx).await;
        });

        Ok(())
    }

    async fn consume_watches(
        self: Arc<Self>,
        mut master_rx: mpsc::Receiver<WatchEvent>,
        mut worker_rx: mpsc::Receiver<WatchEvent>,
    ) {
        loop {
            tokio::select! {
                _ = self.stopper.stopped() => {
                    info!("cluster controller watch loop stopping");
                    return;
                }
                event = master_rx.recv() => {
                    match event {
                        Some(event) => self.handle_master_event(event).await,
                        None => {
                            error!("master watch channel closed, coordination session likely expired");
                            return;
                        }
                    }
                }
                event = worker_rx.recv() => {
                    match event {
                        Some(event) => self.handle_worker_event(event).await,
                        None => {
                            error!("worker watch channel closed, coordination session likely expired");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn handle_master_event(&self, event: WatchEvent) {
        match event {
            WatchEvent::ChildRemoved { path } => {
                let host = path.rsplit('/').next().unwrap_or_default();
                if host == self.config.host {
                    debug_assert!(false, "observed our own master znode disappear");
                    return;
                }
                info!(host, "master removed, running failover");
                self.alerter
                    .alert_repeated(
                        AlertKind::MasterDown { host: host.to_string() },
                        self.config.warn_times_failover,
                    )
                    .await;
                if let Err(err) = self.run_locked_failover(ZkNodeType::Master, Some(host)).await {
                    error!(host, error = %err, "master failover failed");
                }
            }
            WatchEvent::ChildAdded { path, .. } => info!(%path, "master joined"),
            WatchEvent::ChildUpdated { path, .. } => {
                tracing::debug!(%path, "master heartbeat updated")
            }
        }
    }

    async fn handle_worker_event(&self, event: WatchEvent) {
        match event {
            WatchEvent::ChildRemoved { path } => {
                let host = path.rsplit('/').next().unwrap_or_default();
                info!(host, "worker removed, running failover");
                self.alerter
                    .alert_repeated(
                        AlertKind::ServerDown { host: host.to_string() },
                        self.config.warn_times_failover,
                    )
                    .await;
                if let Err(err) = self.run_locked_worker_failover(Some(host)).await {
                    error!(host, error = %err, "worker failover failed");
                }
            }
            WatchEvent::ChildAdded { path, .. } => info!(%path, "worker joined"),
            WatchEvent::ChildUpdated { path, .. } => {
                tracing::debug!(%path, "worker heartbeat updated")
            }
        }
    }

    async fn run_locked_failover(&self, node_type: ZkNodeType, host: Option<&str>) -> CoordResult<()> {
        let mutex = DistributedMutex::new(self.coord.clone());
        let lock_path = self.get_failover_lock_path(node_type)?;
        let guard = mutex.acquire(&lock_path).await?;
        if let Some(h) = host {
            self.coord
                .create_persistent(&format!("{}/master_{h}", self.dead_servers_path()), Vec::new())
                .await
                .ok();
        }
        self.failover_master(host).await?;
        guard.release().await
    }

    async fn run_locked_worker_failover(&self, host: Option<&str>) -> CoordResult<()> {
        let mutex = DistributedMutex::new(self.coord.clone());
        let lock_path = self.get_failover_lock_path(ZkNodeType::Worker)?;
        let guard = mutex.acquire(&lock_path).await?;
        if let Some(h) = host {
            self.coord
                .create_persistent(&format!("{}/worker_{h}", self.dead_servers_path()), Vec::new())
                .await
                .ok();
        }
        self.failover_worker(host, true).await?;
        guard.release().await
    }

    /// Re-queues process instances owned by `host` (or every orphaned
    /// instance, when `None`) so a live Master adopts them. Idempotent:
    /// calling twice with nothing left to do is a no-op.
    pub async fn failover_master(&self, host: Option<&str>) -> CoordResult<()> {
        let orphans = self.store.query_need_failover_process_instances(host).await?;
        for instance in &orphans {
            self.store.process_need_failover_process_instance(instance).await?;
        }
        info!(count = orphans.len(), ?host, "failover_master complete");
        Ok(())
    }

    /// Marks task instances owned by a dead worker as `NeedFaultTolerance` so
    /// the owning `DagEngine` retries them. When `check_alive` is set, a task
    /// whose worker znode still exists and whose start time is after that
    /// worker's current generation started is left alone — it belongs to a
    /// worker process that has since restarted and re-claimed it.
    pub async fn failover_worker(&self, host: Option<&str>, check_alive: bool) -> CoordResult<()> {
        let task_instances = self.store.query_need_failover_task_instances(host).await?;
        let mut tolerated = 0usize;
        for mut task in task_instances {
            let Some(task_host) = task.host.clone() else {
                continue;
            };
            if check_alive {
                let worker_path = format!("{}/{task_host}", self.workers_path());
                if let Ok(Some(data)) = self.coord.get_data(&worker_path).await {
                    if let Ok(payload) = serde_json::from_slice::<HeartbeatPayload>(&data) {
                        if let Some(start_time) = task.start_time {
                            if start_time > payload.start_time {
                                continue;
                            }
                        }
                    }
                }
            }
            task.state = dagmaster_model::ExecutionStatus::NeedFaultTolerance;
            self.store.update_task_instance(&task).await?;
            tolerated += 1;
        }
        info!(count = tolerated, ?host, "failover_worker complete");
        Ok(())
    }

    pub async fn heartbeat_once(&self) -> CoordResult<()> {
        let payload = HeartbeatPayload::sample(&self.config.host, self.start_time);
        let data = serde_json::to_vec(&payload).map_err(|e| CoordError::Other(e.to_string()))?;
        self.coord.set_data(&self.self_path, data).await
    }

    pub async fn live_master_count(&self) -> CoordResult<usize> {
        Ok(self.coord.get_children(&self.masters_path()).await?.len())
    }

    pub async fn enqueue_recovery_command(&self, existing: &Command, process_instance_id: i64) -> CoordResult<()> {
        let mut instance = self
            .store
            .find_process_instance_by_id(process_instance_id)
            .await?
            .ok_or_else(|| CoordError::Other(format!("process instance {process_instance_id} not found")))?;
        instance.release();
        self.store
            .create_recovery_waiting_thread_command(existing, &instance)
            .await?;
        Ok(())
    }

    pub fn stopper(&self) -> &Stopper {
        &self.stopper
    }
}

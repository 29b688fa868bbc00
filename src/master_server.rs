//! Master process lifecycle: binds the DAG engine pool to the cluster
//! controller, runs the heartbeat loop, and drives graceful shutdown in the
//! order the rest of this core depends on.

use std::sync::Arc;
use std::time::Duration;

use dagmaster_coord::{
    CircuitBreaker, CircuitBreakerConfig, ClusterController, ClusterControllerConfig, CoordService, Stopper,
};
use dagmaster_engine::{DagEngine, DagEngineConfig, ResourceGate, WorkerGateway};
use dagmaster_model::{AlertKind, Alerter, Command, TaskNode};
use dagmaster_store::ProcessStore;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::command_source::CommandSource;
use crate::config::MasterConfig;
use crate::errors::{MasterError, MasterResult};

/// Binds a `ClusterController` and a bounded pool of `DagEngine`s to one
/// long-running process. One `MasterServer` per host.
pub struct MasterServer {
    config: MasterConfig,
    host: String,
    store: Arc<dyn ProcessStore>,
    cluster: Arc<ClusterController>,
    alerter: Arc<dyn Alerter>,
    gateway: Arc<dyn WorkerGateway>,
    resource_gate: Arc<dyn ResourceGate>,
    command_source: Arc<dyn CommandSource>,
    store_breaker: CircuitBreaker,
    stopper: Stopper,
}

impl std::fmt::Debug for MasterServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterServer").field("host", &self.host).finish_non_exhaustive()
    }
}

impl MasterServer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: MasterConfig,
        store: Arc<dyn ProcessStore>,
        coord: Arc<dyn CoordService>,
        alerter: Arc<dyn Alerter>,
        gateway: Arc<dyn WorkerGateway>,
        resource_gate: Arc<dyn ResourceGate>,
        command_source: Arc<dyn CommandSource>,
    ) -> Self {
        let host = config.master.host.clone();
        let stopper = Stopper::new();
        let cluster_config = ClusterControllerConfig {
            root_path: config.coordination.root_path.clone(),
            host: host.clone(),
            warn_times_failover: config.master.warn_times_failover,
        };
        let cluster = Arc::new(ClusterController::new(
            coord,
            store.clone(),
            alerter.clone(),
            cluster_config,
            stopper.clone(),
        ));
        Self {
            config,
            host,
            store,
            cluster,
            alerter,
            gateway,
            resource_gate,
            command_source,
            store_breaker: CircuitBreaker::new("process-store", CircuitBreakerConfig::default()),
            stopper,
        }
    }

    pub fn stopper(&self) -> &Stopper {
        &self.stopper
    }

    /// Registers with the cluster, then runs the heartbeat and
    /// command-dispatch loops until `stop()` is called on this server (or
    /// its `Stopper`). Returns once both loops have drained.
    pub async fn run(self: Arc<Self>) -> MasterResult<()> {
        self.cluster.clone().start().await?;
        info!(host = %self.host, "master registered with cluster");

        let heartbeat = self.clone();
        let heartbeat_handle = tokio::spawn(async move { heartbeat.heartbeat_loop().await });

        let dispatch = self.clone();
        let dispatch_handle = tokio::spawn(async move { dispatch.dispatch_loop().await });

        let health = self.clone();
        let health_handle = tokio::spawn(async move { health.store_health_loop().await });

        let _ = tokio::join!(heartbeat_handle, dispatch_handle, health_handle);
        Ok(())
    }

    /// Probes `ProcessStore::verify()` on the same cadence as heartbeats,
    /// through a circuit breaker so a store outage doesn't turn into a tight
    /// reconnect-and-fail loop: once tripped, probes back off for the
    /// breaker's recovery timeout before trying again.
    async fn store_health_loop(&self) {
        let interval = Duration::from_secs(self.config.master.heartbeat_interval_seconds);
        loop {
            if self.store_breaker.should_allow().await {
                match self.store.verify().await {
                    Ok(true) => self.store_breaker.record_success().await,
                    Ok(false) | Err(_) => self.store_breaker.record_failure().await,
                }
            } else {
                warn!("process store circuit open, skipping health probe");
            }
            tokio::select! {
                _ = self.stopper.stopped() => return,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// First heartbeat fires 5s after boot, then every
    /// `master.heartbeat_interval_seconds`.
    async fn heartbeat_loop(&self) {
        tokio::select! {
            _ = self.stopper.stopped() => return,
            _ = tokio::time::sleep(Duration::from_secs(5)) => {}
        }
        let interval = Duration::from_secs(self.config.master.heartbeat_interval_seconds);
        loop {
            if let Err(err) = self.cluster.heartbeat_once().await {
                warn!(error = %err, "heartbeat write failed");
            }
            tokio::select! {
                _ = self.stopper.stopped() => return,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// Polls the command source on a fixed interval and hands each command to
    /// its own `DagEngine`, bounded by `master.exec_threads` concurrently
    /// running process instances.
    async fn dispatch_loop(self: Arc<Self>) {
        let semaphore = Arc::new(Semaphore::new(self.config.master.exec_threads.max(1)));
        let poll_interval = Duration::from_millis(self.config.master.sleep_interval_ms);
        let mut engines: JoinSet<()> = JoinSet::new();

        loop {
            while let Some(command) = self.command_source.poll_next().await {
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let server = self.clone();
                engines.spawn(async move {
                    let _permit = permit;
                    if let Err(err) = server.run_command(command).await {
                        error!(error = %err, "process instance run failed");
                    }
                });
            }
            while engines.try_join_next().is_some() {}

            tokio::select! {
                _ = self.stopper.stopped() => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }

        while engines.join_next().await.is_some() {}
    }

    /// Loads the process instance and its definition named by `command`,
    /// then drives one `DagEngine` to a terminal state. Process instances are
    /// pre-created by the upstream Scheduler (see the crate's Non-goals); a
    /// command with no `process_instance_id` is dropped rather than acted on.
    async fn run_command(&self, command: Command) -> MasterResult<()> {
        let Some(process_instance_id) = command.process_instance_id else {
            warn!(?command.command_type, "command carries no process_instance_id, dropping");
            return Ok(());
        };

        let process_instance = self
            .store
            .find_process_instance_by_id(process_instance_id)
            .await?
            .ok_or(MasterError::InvalidDefinition {
                id: process_instance_id,
                reason: "process instance not found".to_string(),
            })?;

        let definition = self
            .store
            .find_process_definition_by_id(process_instance.definition_id)
            .await?
            .ok_or(MasterError::InvalidDefinition {
                id: process_instance.definition_id,
                reason: "process definition not found".to_string(),
            })?;

        let nodes: Vec<TaskNode> =
            serde_json::from_value(definition.process_definition_json.clone()).map_err(|err| {
                MasterError::InvalidDefinition {
                    id: process_instance.id,
                    reason: err.to_string(),
                }
            })?;

        let engine = DagEngine::prepare(
            process_instance,
            nodes,
            self.store.clone(),
            self.alerter.clone(),
            self.resource_gate.clone(),
            self.gateway.clone(),
            self.stopper.clone(),
            self.host.clone(),
            DagEngineConfig {
                tick_interval: Duration::from_millis(self.config.master.sleep_interval_ms),
            },
        )
        .await?;

        let state = engine.run().await?;
        info!(process_instance_id, ?state, "process instance finished");
        Ok(())
    }

    /// Graceful shutdown: alert if we're the last Master standing, trip the
    /// stop flag, let in-flight supervisors drain briefly, then return. The
    /// caller (the CLI entrypoint) awaits the `run()` handles afterward so
    /// the DagEngine pool, the task-exec loop within each engine, and the
    /// cluster controller's watch loop all observe the same stop signal
    /// before the process exits.
    pub async fn stop(&self) -> MasterResult<()> {
        if let Ok(count) = self.cluster.live_master_count().await {
            if count < 2 {
                self.alerter
                    .alert_repeated(
                        AlertKind::ServerDown { host: self.host.clone() },
                        self.config.master.warn_times_failover,
                    )
                    .await;
            }
        }
        self.stopper.stop();
        tokio::time::sleep(Duration::from_secs(self.config.master.shutdown_drain_seconds)).await;
        Ok(())
    }
}

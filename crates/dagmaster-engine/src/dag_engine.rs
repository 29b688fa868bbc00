use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dagmaster_model::{
    generate_flow_dag, AlertKind, Alerter, Dag, DependResult, ExecutionStatus, FailureStrategy,
    ProcessInstance, TaskInstance, TaskNode,
};
use dagmaster_coord::Stopper;
use dagmaster_store::ProcessStore;
use tracing::{debug, error, warn};

use crate::errors::{EngineError, EngineResult};
use crate::resource_gate::ResourceGate;
use crate::supervisor::{MasterTaskSupervisor, SubProcessSupervisor, TaskSupervisor, WorkerGateway};

/// Tunables for a single `DagEngine` run.
#[derive(Debug, Clone, Copy)]
pub struct DagEngineConfig {
    /// How long to sleep between ticks of the main loop.
    pub tick_interval: std::time::Duration,
}

impl Default for DagEngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: std::time::Duration::from_millis(500),
        }
    }
}

/// Drives one `ProcessInstance` from its current state to a terminal one:
/// submits ready tasks, advances the frontier as they complete, retries
/// failures on backoff, and reconciles pause/stop requests against the
/// active task set. One engine instance owns exactly one process instance
/// for the lifetime of the run.
pub struct DagEngine {
    process_instance: ProcessInstance,
    dag: Dag,
    known_task_instances: HashMap<String, TaskInstance>,
    complete_task_list: HashMap<String, TaskInstance>,
    error_task_list: HashMap<String, TaskInstance>,
    ready_to_submit_task_list: HashMap<String, TaskInstance>,
    active_task_supervisors: HashMap<String, Box<dyn TaskSupervisor>>,
    depend_failed_task: HashSet<String>,
    forbidden_task_list: HashSet<String>,
    recover_tolerance_fault_task_list: Vec<String>,
    task_failed_submit: bool,
    timeout_alert_sent: bool,
    store: Arc<dyn ProcessStore>,
    alerter: Arc<dyn Alerter>,
    resource_gate: Arc<dyn ResourceGate>,
    gateway: Arc<dyn WorkerGateway>,
    stopper: Stopper,
    host: String,
    config: DagEngineConfig,
}

impl DagEngine {
    /// Loads the persisted task instances for `process_instance`, slices the
    /// DAG to the reachable subgraph given its command parameters, and seeds
    /// the completed/errored bookkeeping from what is already on record.
    pub async fn prepare(
        mut process_instance: ProcessInstance,
        definition_nodes: Vec<TaskNode>,
        store: Arc<dyn ProcessStore>,
        alerter: Arc<dyn Alerter>,
        resource_gate: Arc<dyn ResourceGate>,
        gateway: Arc<dyn WorkerGateway>,
        stopper: Stopper,
        host: impl Into<String>,
        config: DagEngineConfig,
    ) -> EngineResult<Self> {
        let host = host.into();
        process_instance.claim(&host);

        let full_dag = Dag::from_nodes(definition_nodes)?;

        let valid_tasks = store
            .find_valid_task_list_by_process_id(process_instance.id)
            .await?;

        let mut known_task_instances = HashMap::new();
        let mut complete_task_list = HashMap::new();
        let mut error_task_list = HashMap::new();
        for task in valid_tasks.iter().cloned() {
            if task.is_task_complete() {
                complete_task_list.insert(task.name.clone(), task.clone());
            }
            if task.is_failure() && !task.has_retry_remaining() {
                error_task_list.insert(task.name.clone(), task.clone());
            }
            known_task_instances.insert(task.name.clone(), task);
        }

        let recovery_start_node_ids = process_instance.command_param.recovery_start_node_ids()?;
        let recovery_node_names: Vec<String> = valid_tasks
            .iter()
            .filter(|t| t.id.is_some_and(|id| recovery_start_node_ids.contains(&id)))
            .map(|t| t.name.clone())
            .collect();
        let start_node_names = process_instance.command_param.start_node_names();
        let forbidden_task_list: HashSet<String> = process_instance
            .command_param
            .forbidden_task_names()
            .into_iter()
            .collect();
        let task_depend_type = process_instance.command_param.task_depend_type();

        let flow = generate_flow_dag(
            &full_dag,
            &start_node_names,
            &recovery_node_names,
            task_depend_type,
        )?;

        Ok(Self {
            process_instance,
            dag: flow.dag,
            known_task_instances,
            complete_task_list,
            error_task_list,
            ready_to_submit_task_list: HashMap::new(),
            active_task_supervisors: HashMap::new(),
            depend_failed_task: HashSet::new(),
            forbidden_task_list,
            recover_tolerance_fault_task_list: Vec::new(),
            task_failed_submit: false,
            timeout_alert_sent: false,
            store,
            alerter,
            resource_gate,
            gateway,
            stopper,
            host,
            config,
        })
    }

    /// Whether this task can still retry after a fault-tolerance failure.
    /// A tolerance retry is additive: it grants exactly one attempt beyond
    /// `retry_times < max_retry_times`, since the Worker that died was never
    /// the task's fault.
    fn task_can_retry_after_tolerance(task: &TaskInstance) -> bool {
        task.retry_times <= task.task_json.max_retry_times
    }

    /// Runs the process instance to a terminal `ExecutionStatus`. Never
    /// returns `Err`: an unexpected internal error marks the process failed,
    /// alerts, and returns `Ok(ExecutionStatus::Failure)` rather than
    /// propagating past the engine's own lifetime.
    pub async fn run(mut self) -> EngineResult<ExecutionStatus> {
        match self.run_dispatch().await {
            Ok(state) => Ok(state),
            Err(err) => {
                error!(
                    process_instance_id = self.process_instance.id,
                    error = %err,
                    "dag engine failed with an unexpected error, marking process failed"
                );
                self.process_instance
                    .mark_terminal(ExecutionStatus::Failure, Utc::now());
                let _ = self.store.update_process_instance(&self.process_instance).await;
                self.alerter
                    .alert(AlertKind::ProcessEnd {
                        process_instance_id: self.process_instance.id,
                        state: ExecutionStatus::Failure,
                    })
                    .await;
                Ok(ExecutionStatus::Failure)
            }
        }
    }

    async fn run_dispatch(&mut self) -> EngineResult<ExecutionStatus> {
        if self.process_instance.is_complement_data && !self.process_instance.is_sub_process {
            return self.run_complement().await;
        }
        let state = self.run_once().await?;
        self.alerter
            .alert(AlertKind::ProcessEnd {
                process_instance_id: self.process_instance.id,
                state,
            })
            .await;
        Ok(state)
    }

    /// Steps through `[complement_start_date, complement_end_date]` one day
    /// at a time, re-running the DAG from scratch for each date and stopping
    /// early on the first non-success outcome.
    async fn run_complement(&mut self) -> EngineResult<ExecutionStatus> {
        let start_date = self
            .process_instance
            .command_param
            .complement_start_date()
            .or_else(|| self.process_instance.schedule_time.map(|t| t.date_naive()))
            .ok_or_else(|| EngineError::InvalidDefinition("complement run missing start date".into()))?;
        let end_date = self
            .process_instance
            .command_param
            .complement_end_date()
            .ok_or_else(|| EngineError::InvalidDefinition("complement run missing end date".into()))?;

        let mut current = start_date;
        let mut last_state = ExecutionStatus::Success;
        loop {
            let naive = current.and_hms_opt(0, 0, 0).expect("midnight is always valid");
            self.process_instance.schedule_time =
                Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));

            last_state = self.run_once().await?;
            if !last_state.is_success() || current >= end_date {
                break;
            }
            current += chrono::Duration::days(1);
            self.reset_for_next_complement_date().await?;
        }

        self.alerter
            .alert(AlertKind::ProcessEnd {
                process_instance_id: self.process_instance.id,
                state: last_state,
            })
            .await;
        Ok(last_state)
    }

    async fn reset_for_next_complement_date(&mut self) -> EngineResult<()> {
        let superseded: Vec<TaskInstance> = self
            .complete_task_list
            .drain()
            .map(|(_, t)| t)
            .chain(self.error_task_list.drain().map(|(_, t)| t))
            .collect();
        for mut task in superseded {
            task.flag = dagmaster_model::Flag::No;
            self.store.update_task_instance(&task).await?;
        }
        self.known_task_instances.clear();
        self.ready_to_submit_task_list.clear();
        self.depend_failed_task.clear();
        self.recover_tolerance_fault_task_list.clear();
        self.task_failed_submit = false;
        self.timeout_alert_sent = false;
        self.process_instance.state = ExecutionStatus::RunningExecution;
        self.process_instance.start_time = Some(Utc::now());
        self.process_instance.end_time = None;
        self.store.update_process_instance(&self.process_instance).await
    }

    /// Drives one complete execution of the DAG to a terminal state.
    async fn run_once(&mut self) -> EngineResult<ExecutionStatus> {
        self.process_instance.start_time.get_or_insert(Utc::now());
        if !matches!(
            self.process_instance.state,
            ExecutionStatus::ReadyPause | ExecutionStatus::ReadyStop
        ) {
            self.process_instance.state = ExecutionStatus::RunningExecution;
        }
        self.store.update_process_instance(&self.process_instance).await?;

        self.submit_post_node(None).await?;

        loop {
            self.check_timeout().await;
            self.drain_active_supervisors().await?;
            self.reconcile_pause_vs_failure().await?;
            self.flush_tolerance_alerts().await;

            if self.resource_gate.allows_dispatch() {
                self.dispatch_ready().await?;
            }

            let new_state = self.compute_process_instance_state();
            if new_state != self.process_instance.state {
                self.process_instance.state = new_state;
                if new_state.is_finished() {
                    self.process_instance.end_time = Some(Utc::now());
                }
                self.store.update_process_instance(&self.process_instance).await?;
            }

            if self.process_instance.is_process_instance_stop() {
                break;
            }

            tokio::select! {
                _ = self.stopper.stopped() => {
                    self.kill_others().await?;
                    break;
                }
                _ = tokio::time::sleep(self.config.tick_interval) => {}
            }
        }

        Ok(self.process_instance.state)
    }

    async fn check_timeout(&mut self) {
        if !self.timeout_alert_sent && self.process_instance.has_timed_out(Utc::now()) {
            self.alerter
                .alert(AlertKind::ProcessTimeout {
                    process_instance_id: self.process_instance.id,
                })
                .await;
            self.timeout_alert_sent = true;
        }
    }

    async fn drain_active_supervisors(&mut self) -> EngineResult<()> {
        let names: Vec<String> = self.active_task_supervisors.keys().cloned().collect();
        for name in names {
            let polled = {
                let supervisor = self
                    .active_task_supervisors
                    .get_mut(&name)
                    .expect("name came from this map's own keys");
                supervisor.poll().await
            };
            match polled {
                Ok(Some(task)) => {
                    self.active_task_supervisors.remove(&name);
                    self.handle_task_completion(task).await?;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(task = %name, error = %err, "task supervisor poll failed");
                    self.active_task_supervisors.remove(&name);
                    self.task_failed_submit = true;
                }
            }
        }
        Ok(())
    }

    async fn handle_task_completion(&mut self, task: TaskInstance) -> EngineResult<()> {
        self.known_task_instances.insert(task.name.clone(), task.clone());
        match task.state {
            ExecutionStatus::Success => {
                let name = task.name.clone();
                self.complete_task_list.insert(name.clone(), task);
                self.submit_post_node(Some(&name)).await?;
            }
            ExecutionStatus::NeedFaultTolerance => {
                self.recover_tolerance_fault_task_list.push(task.name.clone());
                if Self::task_can_retry_after_tolerance(&task) {
                    self.spawn_retry_of(task).await?;
                } else {
                    self.fail_task(task).await?;
                }
            }
            ExecutionStatus::Failure => {
                if task.has_retry_remaining() {
                    self.spawn_retry_of(task).await?;
                } else {
                    self.fail_task(task).await?;
                }
            }
            _ => {
                self.complete_task_list.insert(task.name.clone(), task);
            }
        }
        Ok(())
    }

    async fn spawn_retry_of(&mut self, mut task: TaskInstance) -> EngineResult<()> {
        let next = task.spawn_retry();
        self.store.update_task_instance(&task).await?;
        self.ready_to_submit_task_list.insert(next.name.clone(), next);
        Ok(())
    }

    async fn fail_task(&mut self, task: TaskInstance) -> EngineResult<()> {
        let name = task.name.clone();
        self.error_task_list.insert(name.clone(), task.clone());
        self.complete_task_list.insert(name, task);
        if self.process_instance.failure_strategy == FailureStrategy::End {
            self.kill_others().await?;
        }
        Ok(())
    }

    async fn reconcile_pause_vs_failure(&mut self) -> EngineResult<()> {
        if self.error_task_list.is_empty() {
            return Ok(());
        }
        let names: Vec<String> = self
            .complete_task_list
            .iter()
            .filter(|(_, t)| t.state == ExecutionStatus::Pause)
            .map(|(name, _)| name.clone())
            .collect();
        for name in names {
            if let Some(task) = self.complete_task_list.get_mut(&name) {
                task.state = ExecutionStatus::Kill;
                self.store.update_task_instance(task).await?;
            }
        }
        Ok(())
    }

    async fn flush_tolerance_alerts(&mut self) {
        for name in self.recover_tolerance_fault_task_list.drain(..) {
            self.alerter
                .alert(AlertKind::WorkerToleranceWarning {
                    process_instance_id: self.process_instance.id,
                    task_name: name,
                })
                .await;
        }
    }

    async fn dispatch_ready(&mut self) -> EngineResult<()> {
        let names: Vec<String> = self.ready_to_submit_task_list.keys().cloned().collect();
        let now = Utc::now();
        for name in names {
            match self.is_task_deps_complete(&name) {
                DependResult::Waiting => continue,
                DependResult::Failed => {
                    self.ready_to_submit_task_list.remove(&name);
                    self.depend_failed_task.insert(name);
                    continue;
                }
                DependResult::Success => {}
            }

            let backoff_elapsed = self
                .ready_to_submit_task_list
                .get(&name)
                .map(|t| t.state != ExecutionStatus::Failure || t.retry_backoff_elapsed(now))
                .unwrap_or(true);
            if !backoff_elapsed {
                continue;
            }

            if let Some(task) = self.ready_to_submit_task_list.remove(&name) {
                self.submit_task_exec(task).await?;
            }
        }
        Ok(())
    }

    async fn submit_task_exec(&mut self, mut task: TaskInstance) -> EngineResult<()> {
        let name = task.name.clone();
        task.host = Some(self.host.clone());
        let mut supervisor: Box<dyn TaskSupervisor> = if task.task_json.task_type == "sub_process" {
            Box::new(SubProcessSupervisor::new(
                task,
                self.store.clone(),
                self.host.clone(),
            ))
        } else {
            Box::new(MasterTaskSupervisor::new(
                task,
                self.store.clone(),
                self.gateway.clone(),
                self.host.clone(),
            ))
        };

        match supervisor.submit().await {
            Ok(()) => {
                self.active_task_supervisors.insert(name, supervisor);
            }
            Err(err) => {
                warn!(task = %name, error = %err, "task submission failed");
                self.task_failed_submit = true;
            }
        }
        Ok(())
    }

    fn is_task_deps_complete(&self, name: &str) -> DependResult {
        let Some(node) = self.dag.node(name) else {
            return DependResult::Success;
        };
        for dep in &node.deps {
            if self.forbidden_task_list.contains(dep) {
                continue;
            }
            let Some(dep_task) = self.complete_task_list.get(dep) else {
                return DependResult::Waiting;
            };
            if dep_task.is_failure() || self.error_task_list.contains_key(dep) {
                return DependResult::Failed;
            }
            if dep_task.state.is_pause() || dep_task.state.is_cancel() {
                return DependResult::Waiting;
            }
        }
        DependResult::Success
    }

    /// Computes the frontier of tasks ready to submit given no parent context
    /// (cold start / recovery): nodes reachable from the sliced DAG's roots
    /// whose dependencies are already satisfied.
    fn start_frontier(&self) -> Vec<String> {
        let mut frontier = Vec::new();
        let mut queue: VecDeque<&str> = self.dag.sources().into_iter().collect();
        let mut seen: HashSet<&str> = HashSet::new();
        while let Some(name) = queue.pop_front() {
            if !seen.insert(name) {
                continue;
            }
            if self.forbidden_task_list.contains(name) {
                continue;
            }
            if self
                .complete_task_list
                .get(name)
                .map(|t| t.state.is_success())
                .unwrap_or(false)
            {
                for succ in self.dag.successors(name) {
                    queue.push_back(succ);
                }
                continue;
            }
            let ready = self
                .dag
                .node(name)
                .map(|n| {
                    n.deps.iter().all(|d| {
                        self.forbidden_task_list.contains(d)
                            || self
                                .complete_task_list
                                .get(d)
                                .map(|t| t.state.is_success())
                                .unwrap_or(false)
                    })
                })
                .unwrap_or(false);
            if ready {
                frontier.push(name.to_string());
            }
        }
        frontier
    }

    fn find_task_if_exists(&self, name: &str) -> Option<&TaskInstance> {
        self.complete_task_list
            .get(name)
            .or_else(|| self.error_task_list.get(name))
            .or_else(|| self.ready_to_submit_task_list.get(name))
            .or_else(|| self.active_task_supervisors.get(name).map(|s| s.task_instance()))
            .or_else(|| self.known_task_instances.get(name))
    }

    fn new_task_instance(&self, name: &str) -> EngineResult<TaskInstance> {
        let node = self
            .dag
            .node(name)
            .cloned()
            .ok_or_else(|| EngineError::InvalidDefinition(format!("unknown task node '{name}'")))?;
        Ok(TaskInstance::new(self.process_instance.id, node))
    }

    /// Expands the frontier: when `parent` is `None`, seeds every immediately
    /// runnable node from the DAG's roots; otherwise enqueues `parent`'s
    /// direct successors now that `parent` has completed.
    async fn submit_post_node(&mut self, parent: Option<&str>) -> EngineResult<()> {
        let candidates: Vec<String> = match parent {
            None => self.start_frontier(),
            Some(p) => self.dag.successors(p).to_vec(),
        };

        for name in candidates {
            if self.ready_to_submit_task_list.contains_key(&name)
                || self.complete_task_list.contains_key(&name)
                || self.active_task_supervisors.contains_key(&name)
            {
                continue;
            }
            if self.forbidden_task_list.contains(&name) {
                continue;
            }
            if let Some(existing) = self.find_task_if_exists(&name) {
                if existing.state.is_pause() || existing.state.is_cancel() {
                    debug!(task = %name, "skipping paused/cancelled task at frontier");
                    continue;
                }
            }
            let task = self.new_task_instance(&name)?;
            self.ready_to_submit_task_list.insert(name, task);
        }
        Ok(())
    }

    fn complement_not_finished(&self) -> bool {
        self.process_instance.is_complement_data
            && !self.process_instance.is_sub_process
            && matches!(
                (
                    self.process_instance.schedule_time,
                    self.process_instance.command_param.complement_end_date(),
                ),
                (Some(sched), Some(end)) if sched.date_naive() < end
            )
    }

    /// Decides the process instance's next state given the current tick's
    /// bookkeeping. Mirrors the "decide an action from the current state,
    /// then execute it" shape used for task-level state transitions: the
    /// active-supervisor and failure checks short-circuit before falling
    /// through to the ready/pause/stop state matrix.
    fn compute_process_instance_state(&self) -> ExecutionStatus {
        if !self.active_task_supervisors.is_empty() {
            return match self.process_instance.state {
                ExecutionStatus::ReadyStop => ExecutionStatus::ReadyStop,
                ExecutionStatus::ReadyPause => ExecutionStatus::ReadyPause,
                ExecutionStatus::WaitingThread => ExecutionStatus::WaitingThread,
                _ => ExecutionStatus::RunningExecution,
            };
        }

        let has_failed = !self.error_task_list.is_empty() || self.task_failed_submit;
        if has_failed {
            match self.process_instance.failure_strategy {
                FailureStrategy::End => return ExecutionStatus::Failure,
                FailureStrategy::Continue if self.ready_to_submit_task_list.is_empty() => {
                    return ExecutionStatus::Failure;
                }
                FailureStrategy::Continue => {}
            }
        }

        if self
            .complete_task_list
            .values()
            .any(|t| t.state == ExecutionStatus::WaitingThread)
        {
            return ExecutionStatus::WaitingThread;
        }

        match self.process_instance.state {
            ExecutionStatus::ReadyPause => self.process_ready_pause(),
            ExecutionStatus::ReadyStop => self.process_ready_stop(),
            _ => {
                if self.ready_to_submit_task_list.is_empty() {
                    ExecutionStatus::Success
                } else {
                    ExecutionStatus::RunningExecution
                }
            }
        }
    }

    fn process_ready_pause(&self) -> ExecutionStatus {
        let retry_pending = self
            .ready_to_submit_task_list
            .values()
            .any(|t| t.state == ExecutionStatus::Failure);
        if retry_pending {
            return ExecutionStatus::Failure;
        }
        let any_paused = self
            .complete_task_list
            .values()
            .any(|t| t.state.is_pause());
        if any_paused || !self.ready_to_submit_task_list.is_empty() || self.complement_not_finished() {
            return ExecutionStatus::Pause;
        }
        ExecutionStatus::Success
    }

    fn process_ready_stop(&self) -> ExecutionStatus {
        let any_stopped = self
            .complete_task_list
            .values()
            .any(|t| matches!(t.state, ExecutionStatus::Stop | ExecutionStatus::Kill));
        if any_stopped || self.complement_not_finished() {
            return ExecutionStatus::Stop;
        }
        ExecutionStatus::Success
    }

    /// Kills every still-active task supervisor. Used when a `FailureStrategy::End`
    /// failure fires, and when the engine's stopper is tripped.
    async fn kill_others(&mut self) -> EngineResult<()> {
        let names: Vec<String> = self.active_task_supervisors.keys().cloned().collect();
        for name in names {
            let already_finished = self
                .find_task_if_exists(&name)
                .map(|t| t.state.is_finished())
                .unwrap_or(false);
            if already_finished {
                continue;
            }
            if let Some(supervisor) = self.active_task_supervisors.get_mut(&name) {
                if let Err(err) = supervisor.kill().await {
                    warn!(task = %name, error = %err, "failed to kill task supervisor");
                }
            }
        }
        Ok(())
    }
}

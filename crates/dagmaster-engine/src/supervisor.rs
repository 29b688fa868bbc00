use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use dagmaster_model::{ExecutionStatus, TaskInstance};
use dagmaster_store::ProcessStore;
use tracing::debug;

use crate::errors::{EngineError, EngineResult};

/// Seam between a `TaskSupervisor` and whatever actually runs a task on a
/// Worker. The real transport (the coordination store's priority queue, or a
/// direct RPC to the Worker) lives outside this crate; implementations only
/// need to dispatch and report a terminal outcome.
#[async_trait]
pub trait WorkerGateway: Send + Sync + std::fmt::Debug {
    async fn dispatch(&self, task: &TaskInstance) -> EngineResult<()>;

    /// `Ok(None)` while still running; `Ok(Some(status))` once terminal.
    async fn poll(&self, task: &TaskInstance) -> EngineResult<Option<ExecutionStatus>>;

    async fn kill(&self, task: &TaskInstance) -> EngineResult<()>;
}

/// Gateway that succeeds every dispatched task on the first poll. Stands in
/// until a real Worker transport is wired in.
#[derive(Debug, Default)]
pub struct NoopWorkerGateway;

#[async_trait]
impl WorkerGateway for NoopWorkerGateway {
    async fn dispatch(&self, _task: &TaskInstance) -> EngineResult<()> {
        Ok(())
    }

    async fn poll(&self, _task: &TaskInstance) -> EngineResult<Option<ExecutionStatus>> {
        Ok(Some(ExecutionStatus::Success))
    }

    async fn kill(&self, _task: &TaskInstance) -> EngineResult<()> {
        Ok(())
    }
}

/// Test gateway that replays a scripted sequence of terminal outcomes per
/// task name, defaulting to `Success` once the script for a name is
/// exhausted (or was never set).
#[derive(Debug, Default)]
pub struct ScriptedWorkerGateway {
    outcomes: Mutex<HashMap<String, VecDeque<ExecutionStatus>>>,
    dispatched: Mutex<Vec<String>>,
}

impl ScriptedWorkerGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, name: impl Into<String>, outcomes: impl IntoIterator<Item = ExecutionStatus>) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(name.into(), outcomes.into_iter().collect());
    }

    pub fn dispatched_names(&self) -> Vec<String> {
        self.dispatched.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkerGateway for ScriptedWorkerGateway {
    async fn dispatch(&self, task: &TaskInstance) -> EngineResult<()> {
        self.dispatched.lock().unwrap().push(task.name.clone());
        Ok(())
    }

    async fn poll(&self, task: &TaskInstance) -> EngineResult<Option<ExecutionStatus>> {
        let mut outcomes = self.outcomes.lock().unwrap();
        match outcomes.get_mut(&task.name) {
            Some(queue) => Ok(Some(queue.pop_front().unwrap_or(ExecutionStatus::Success))),
            None => Ok(Some(ExecutionStatus::Success)),
        }
    }

    async fn kill(&self, _task: &TaskInstance) -> EngineResult<()> {
        Ok(())
    }
}

/// Per-task lifecycle as seen from the Master: submit, poll, kill.
/// `DagEngine` holds a heterogeneous set of these keyed by task name,
/// constructed by matching on `task_type` at dispatch time.
#[async_trait]
pub trait TaskSupervisor: Send + Sync + std::fmt::Debug {
    async fn submit(&mut self) -> EngineResult<()>;

    /// `Ok(None)` while the supervised task is still in flight; `Ok(Some(_))`
    /// once it reaches a terminal state, carrying the up-to-date instance.
    async fn poll(&mut self) -> EngineResult<Option<TaskInstance>>;

    async fn kill(&mut self) -> EngineResult<()>;

    fn task_instance(&self) -> &TaskInstance;
}

/// Supervisor for ordinary task types: dispatches through a `WorkerGateway`
/// and persists every state transition.
pub struct MasterTaskSupervisor {
    task: TaskInstance,
    store: Arc<dyn ProcessStore>,
    gateway: Arc<dyn WorkerGateway>,
    host: String,
    killed: bool,
}

impl std::fmt::Debug for MasterTaskSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterTaskSupervisor")
            .field("task", &self.task.name)
            .field("state", &self.task.state)
            .field("host", &self.host)
            .field("killed", &self.killed)
            .finish()
    }
}

impl MasterTaskSupervisor {
    pub fn new(
        task: TaskInstance,
        store: Arc<dyn ProcessStore>,
        gateway: Arc<dyn WorkerGateway>,
        host: String,
    ) -> Self {
        Self {
            task,
            store,
            gateway,
            host,
            killed: false,
        }
    }
}

#[async_trait]
impl TaskSupervisor for MasterTaskSupervisor {
    async fn submit(&mut self) -> EngineResult<()> {
        self.task.host = Some(self.host.clone());
        self.task.start_time = Some(Utc::now());
        self.task.state = ExecutionStatus::RunningExecution;
        let id = self.store.save_task_instance(&self.task).await?;
        self.task.id = Some(id);
        self.gateway.dispatch(&self.task).await?;
        debug!(task = %self.task.name, host = %self.host, "task submitted");
        Ok(())
    }

    async fn poll(&mut self) -> EngineResult<Option<TaskInstance>> {
        if self.task.id.is_none() {
            return Err(EngineError::SupervisorLost(format!(
                "task '{}' polled before submission",
                self.task.name
            )));
        }
        if self.killed {
            return Ok(Some(self.task.clone()));
        }
        match self.gateway.poll(&self.task).await? {
            None => Ok(None),
            Some(status) => {
                self.task.state = status;
                self.task.end_time = Some(Utc::now());
                self.store.update_task_instance(&self.task).await?;
                Ok(Some(self.task.clone()))
            }
        }
    }

    async fn kill(&mut self) -> EngineResult<()> {
        self.killed = true;
        self.gateway.kill(&self.task).await?;
        self.task.state = ExecutionStatus::Kill;
        self.task.end_time = Some(Utc::now());
        self.store.update_task_instance(&self.task).await?;
        Ok(())
    }

    fn task_instance(&self) -> &TaskInstance {
        &self.task
    }
}

/// Supervisor for `sub_process`-typed nodes: watches an already-created child
/// `ProcessInstance` to completion rather than dispatching to a Worker.
pub struct SubProcessSupervisor {
    task: TaskInstance,
    store: Arc<dyn ProcessStore>,
    host: String,
    child_process_instance_id: Option<i64>,
}

impl std::fmt::Debug for SubProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubProcessSupervisor")
            .field("task", &self.task.name)
            .field("state", &self.task.state)
            .field("host", &self.host)
            .field("child_process_instance_id", &self.child_process_instance_id)
            .finish()
    }
}

impl SubProcessSupervisor {
    pub fn new(task: TaskInstance, store: Arc<dyn ProcessStore>, host: String) -> Self {
        Self {
            task,
            store,
            host,
            child_process_instance_id: None,
        }
    }
}

#[async_trait]
impl TaskSupervisor for SubProcessSupervisor {
    async fn submit(&mut self) -> EngineResult<()> {
        let Some(child_id) = self.task.task_json.sub_process_instance_id else {
            return Err(EngineError::InvalidDefinition(format!(
                "task '{}' has type 'sub_process' but no sub_process_instance_id",
                self.task.name
            )));
        };
        self.task.host = Some(self.host.clone());
        self.task.start_time = Some(Utc::now());
        self.task.state = ExecutionStatus::RunningExecution;
        let id = self.store.save_task_instance(&self.task).await?;
        self.task.id = Some(id);
        self.child_process_instance_id = Some(child_id);
        debug!(task = %self.task.name, child_process_instance_id = child_id, "watching sub-process instance");
        Ok(())
    }

    async fn poll(&mut self) -> EngineResult<Option<TaskInstance>> {
        let Some(child_id) = self.child_process_instance_id else {
            return Err(EngineError::SupervisorLost(format!(
                "sub-process task '{}' polled before submission",
                self.task.name
            )));
        };
        let Some(child) = self.store.find_process_instance_by_id(child_id).await? else {
            return Err(EngineError::SupervisorLost(format!(
                "sub-process instance {child_id} disappeared"
            )));
        };
        if !child.state.is_finished() {
            return Ok(None);
        }
        self.task.state = child.state;
        self.task.end_time = Some(Utc::now());
        self.store.update_task_instance(&self.task).await?;
        Ok(Some(self.task.clone()))
    }

    async fn kill(&mut self) -> EngineResult<()> {
        self.task.state = ExecutionStatus::Kill;
        self.task.end_time = Some(Utc::now());
        self.store.update_task_instance(&self.task).await?;
        Ok(())
    }

    fn task_instance(&self) -> &TaskInstance {
        &self.task
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagmaster_store::InMemoryProcessStore;

    fn node() -> dagmaster_model::TaskNode {
        dagmaster_model::TaskNode::new("A", "shell").with_retries(1, 0)
    }

    #[tokio::test]
    async fn master_supervisor_submits_and_polls_terminal_state() {
        let store: Arc<dyn ProcessStore> = Arc::new(InMemoryProcessStore::new());
        let gateway: Arc<dyn WorkerGateway> = Arc::new(NoopWorkerGateway);
        let task = TaskInstance::new(1, node());
        let mut supervisor = MasterTaskSupervisor::new(task, store, gateway, "host-a".into());
        supervisor.submit().await.unwrap();
        let done = supervisor.poll().await.unwrap().expect("terminal");
        assert_eq!(done.state, ExecutionStatus::Success);
        assert_eq!(done.host.as_deref(), Some("host-a"));
    }

    #[tokio::test]
    async fn scripted_gateway_replays_outcomes_in_order() {
        let gateway = ScriptedWorkerGateway::new();
        gateway.script("A", [ExecutionStatus::Failure, ExecutionStatus::Success]);
        let store: Arc<dyn ProcessStore> = Arc::new(InMemoryProcessStore::new());
        let gateway: Arc<dyn WorkerGateway> = Arc::new(gateway);
        let task = TaskInstance::new(1, node());
        let mut supervisor = MasterTaskSupervisor::new(task, store, gateway, "host-a".into());
        supervisor.submit().await.unwrap();
        let first = supervisor.poll().await.unwrap().unwrap();
        assert_eq!(first.state, ExecutionStatus::Failure);
    }

    #[tokio::test]
    async fn poll_before_submit_is_an_error() {
        let store: Arc<dyn ProcessStore> = Arc::new(InMemoryProcessStore::new());
        let gateway: Arc<dyn WorkerGateway> = Arc::new(NoopWorkerGateway);
        let task = TaskInstance::new(1, node());
        let mut supervisor = MasterTaskSupervisor::new(task, store, gateway, "host-a".into());
        assert!(supervisor.poll().await.is_err());
    }

    #[tokio::test]
    async fn sub_process_supervisor_waits_for_child_to_finish() {
        let store = Arc::new(InMemoryProcessStore::new());
        let child = dagmaster_model::ProcessInstance {
            id: 99,
            definition_id: 1,
            process_definition_json: serde_json::json!({}),
            state: ExecutionStatus::RunningExecution,
            command_type: dagmaster_model::CommandType::Start,
            command_param: dagmaster_model::CommandParam::new(),
            host: None,
            start_time: None,
            end_time: None,
            schedule_time: None,
            timeout_minutes: None,
            failure_strategy: dagmaster_model::FailureStrategy::End,
            is_complement_data: false,
            is_sub_process: true,
            global_params: serde_json::json!({}),
        };
        store.seed_process_instance(child.clone());

        let node = dagmaster_model::TaskNode::new("B", "sub_process").with_sub_process_instance(99);
        let task = TaskInstance::new(1, node);
        let store_dyn: Arc<dyn ProcessStore> = store.clone();
        let mut supervisor = SubProcessSupervisor::new(task, store_dyn.clone(), "host-a".into());
        supervisor.submit().await.unwrap();
        assert!(supervisor.poll().await.unwrap().is_none());

        let mut finished = child;
        finished.state = ExecutionStatus::Success;
        store.seed_process_instance(finished);
        let result = supervisor.poll().await.unwrap().expect("terminal");
        assert_eq!(result.state, ExecutionStatus::Success);
    }
}

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use dagmaster_model::{Command, CommandType, ExecutionStatus, ProcessInstance, TaskInstance};

use crate::errors::StoreResult;
use crate::process_store::{ProcessDefinition, ProcessStore};

/// In-process `ProcessStore` for tests. Mirrors the real store's semantics
/// closely enough for `DagEngine`/`ClusterController` scenario tests to run
/// without a database.
#[derive(Debug, Default)]
pub struct InMemoryProcessStore {
    process_instances: Mutex<HashMap<i64, ProcessInstance>>,
    task_instances: Mutex<HashMap<i64, TaskInstance>>,
    definitions: Mutex<HashMap<i64, ProcessDefinition>>,
    commands: Mutex<Vec<Command>>,
    next_task_id: Mutex<i64>,
}

impl InMemoryProcessStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_process_instance(&self, instance: ProcessInstance) {
        self.process_instances.lock().unwrap().insert(instance.id, instance);
    }

    pub fn seed_definition(&self, definition: ProcessDefinition) {
        self.definitions.lock().unwrap().insert(definition.id, definition);
    }

    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessStore for InMemoryProcessStore {
    async fn find_process_instance_by_id(&self, id: i64) -> StoreResult<Option<ProcessInstance>> {
        Ok(self.process_instances.lock().unwrap().get(&id).cloned())
    }

    async fn update_process_instance(&self, instance: &ProcessInstance) -> StoreResult<()> {
        self.process_instances
            .lock()
            .unwrap()
            .insert(instance.id, instance.clone());
        Ok(())
    }

    async fn save_process_instance(&self, instance: &ProcessInstance) -> StoreResult<i64> {
        self.process_instances
            .lock()
            .unwrap()
            .insert(instance.id, instance.clone());
        Ok(instance.id)
    }

    async fn find_valid_task_list_by_process_id(&self, id: i64) -> StoreResult<Vec<TaskInstance>> {
        Ok(self
            .task_instances
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.process_instance_id == id && matches!(t.flag, dagmaster_model::Flag::Yes))
            .cloned()
            .collect())
    }

    async fn find_task_instance_by_id(&self, id: i64) -> StoreResult<Option<TaskInstance>> {
        Ok(self.task_instances.lock().unwrap().get(&id).cloned())
    }

    async fn save_task_instance(&self, instance: &TaskInstance) -> StoreResult<i64> {
        let mut instance = instance.clone();
        if instance.id.is_none() {
            let mut next = self.next_task_id.lock().unwrap();
            *next += 1;
            instance.id = Some(*next);
        }
        let id = instance.id.unwrap();
        self.task_instances.lock().unwrap().insert(id, instance);
        Ok(id)
    }

    async fn update_task_instance(&self, instance: &TaskInstance) -> StoreResult<()> {
        if let Some(id) = instance.id {
            self.task_instances.lock().unwrap().insert(id, instance.clone());
        }
        Ok(())
    }

    async fn query_need_failover_process_instances(
        &self,
        host: Option<&str>,
    ) -> StoreResult<Vec<ProcessInstance>> {
        Ok(self
            .process_instances
            .lock()
            .unwrap()
            .values()
            .filter(|pi| !pi.state.is_finished())
            .filter(|pi| match host {
                Some(h) => pi.host.as_deref() == Some(h),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn query_need_failover_task_instances(&self, host: Option<&str>) -> StoreResult<Vec<TaskInstance>> {
        let processes = self.process_instances.lock().unwrap();
        Ok(self
            .task_instances
            .lock()
            .unwrap()
            .values()
            .filter(|t| !t.state.is_finished())
            .filter(|t| match host {
                Some(h) => t.host.as_deref() == Some(h),
                None => true,
            })
            .filter(|t| {
                processes
                    .get(&t.process_instance_id)
                    .map(|pi| !pi.state.is_finished())
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn process_need_failover_process_instance(&self, instance: &ProcessInstance) -> StoreResult<()> {
        let mut instances = self.process_instances.lock().unwrap();
        if let Some(stored) = instances.get_mut(&instance.id) {
            stored.host = None;
            stored.state = ExecutionStatus::SubmittedSuccess;
        }
        drop(instances);
        self.commands
            .lock()
            .unwrap()
            .push(Command::recovery_for(instance.definition_id, instance.id));
        Ok(())
    }

    async fn create_recovery_waiting_thread_command(
        &self,
        existing: &Command,
        instance: &ProcessInstance,
    ) -> StoreResult<()> {
        let mut command = existing.clone();
        command.command_type = CommandType::RecoverWaitingThread;
        command.process_instance_id = Some(instance.id);
        self.commands.lock().unwrap().push(command);
        Ok(())
    }

    async fn find_process_definition_by_id(&self, id: i64) -> StoreResult<Option<ProcessDefinition>> {
        Ok(self.definitions.lock().unwrap().get(&id).cloned())
    }

    async fn verify(&self) -> StoreResult<bool> {
        Ok(true)
    }
}

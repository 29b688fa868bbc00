use async_trait::async_trait;
use dagmaster_model::{Command, ProcessInstance, TaskInstance};
use serde_json::Value;

use crate::errors::StoreResult;

/// Minimal shape of a persisted workflow definition needed by the DAG engine.
#[derive(Debug, Clone)]
pub struct ProcessDefinition {
    pub id: i64,
    pub process_definition_json: Value,
    pub global_params: Value,
}

/// Persistence boundary between the Master core and the relational store.
/// Implementations must be `Send + Sync` so a single instance can back every
/// `DagEngine` and `ClusterController` running in a process.
#[async_trait]
pub trait ProcessStore: Send + Sync + std::fmt::Debug {
    async fn find_process_instance_by_id(&self, id: i64) -> StoreResult<Option<ProcessInstance>>;

    async fn update_process_instance(&self, instance: &ProcessInstance) -> StoreResult<()>;

    async fn save_process_instance(&self, instance: &ProcessInstance) -> StoreResult<i64>;

    /// Active task instances (`flag = Yes`) for a process instance.
    async fn find_valid_task_list_by_process_id(&self, id: i64) -> StoreResult<Vec<TaskInstance>>;

    async fn find_task_instance_by_id(&self, id: i64) -> StoreResult<Option<TaskInstance>>;

    async fn save_task_instance(&self, instance: &TaskInstance) -> StoreResult<i64>;

    async fn update_task_instance(&self, instance: &TaskInstance) -> StoreResult<()>;

    /// Process instances assigned to `host` (or, when `None`, every unclaimed
    /// or dead-host-owned instance) that have not reached a terminal state.
    async fn query_need_failover_process_instances(
        &self,
        host: Option<&str>,
    ) -> StoreResult<Vec<ProcessInstance>>;

    /// Active task instances assigned to `host` (or all, when `None`) whose
    /// owning process instance is still running.
    async fn query_need_failover_task_instances(
        &self,
        host: Option<&str>,
    ) -> StoreResult<Vec<TaskInstance>>;

    /// Clears `host`, resets the instance to a recoverable state, and enqueues
    /// a recovery `Command` for another Master to pick up.
    async fn process_need_failover_process_instance(&self, instance: &ProcessInstance) -> StoreResult<()>;

    async fn create_recovery_waiting_thread_command(
        &self,
        existing: &Command,
        instance: &ProcessInstance,
    ) -> StoreResult<()>;

    async fn find_process_definition_by_id(&self, id: i64) -> StoreResult<Option<ProcessDefinition>>;

    /// Lightweight connectivity probe used by the resilience layer.
    async fn verify(&self) -> StoreResult<bool>;
}

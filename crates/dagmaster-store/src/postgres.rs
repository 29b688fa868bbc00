use async_trait::async_trait;
use dagmaster_model::{Command, CommandParam, CommandType, ExecutionStatus, ProcessInstance, TaskInstance};
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::errors::{StoreError, StoreResult};
use crate::process_store::{ProcessDefinition, ProcessStore};

/// `ProcessStore` backed by Postgres via `sqlx`. Queries are issued at
/// runtime with `query`/`query_as` rather than the compile-time `query!`
/// macros, since this store is built without a live database to validate an
/// offline query cache against.
pub struct PostgresProcessStore {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresProcessStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresProcessStore").finish_non_exhaustive()
    }
}

impl PostgresProcessStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_process_instance(row: &sqlx::postgres::PgRow) -> StoreResult<ProcessInstance> {
        let command_param_json: serde_json::Value = row.try_get("command_param")?;
        let command_param: CommandParam = serde_json::from_value(command_param_json)?;
        let state_json: serde_json::Value = row.try_get("state")?;
        let command_type_json: serde_json::Value = row.try_get("command_type")?;
        let failure_strategy_json: serde_json::Value = row.try_get("failure_strategy")?;

        Ok(ProcessInstance {
            id: row.try_get("id")?,
            definition_id: row.try_get("definition_id")?,
            process_definition_json: row.try_get("process_definition_json")?,
            state: serde_json::from_value(state_json)?,
            command_type: serde_json::from_value(command_type_json)?,
            command_param,
            host: row.try_get("host")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            schedule_time: row.try_get("schedule_time")?,
            timeout_minutes: row.try_get("timeout_minutes")?,
            failure_strategy: serde_json::from_value(failure_strategy_json)?,
            is_complement_data: row.try_get("is_complement_data")?,
            is_sub_process: row.try_get("is_sub_process")?,
            global_params: row.try_get("global_params")?,
        })
    }

    fn row_to_task_instance(row: &sqlx::postgres::PgRow) -> StoreResult<TaskInstance> {
        let state_json: serde_json::Value = row.try_get("state")?;
        let flag_json: serde_json::Value = row.try_get("flag")?;
        let priority_json: serde_json::Value = row.try_get("task_instance_priority")?;
        let task_json_value: serde_json::Value = row.try_get("task_json")?;

        Ok(TaskInstance {
            id: row.try_get("id")?,
            process_instance_id: row.try_get("process_instance_id")?,
            name: row.try_get("name")?,
            state: serde_json::from_value(state_json)?,
            host: row.try_get("host")?,
            flag: serde_json::from_value(flag_json)?,
            retry_times: row.try_get::<i32, _>("retry_times")? as u32,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            task_json: serde_json::from_value(task_json_value)?,
            task_instance_priority: serde_json::from_value(priority_json)?,
            worker_group_id: row.try_get("worker_group_id")?,
            alert_flag: row.try_get("alert_flag")?,
        })
    }
}

#[async_trait]
impl ProcessStore for PostgresProcessStore {
    async fn find_process_instance_by_id(&self, id: i64) -> StoreResult<Option<ProcessInstance>> {
        let row = sqlx::query("SELECT * FROM process_instance WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::database("find_process_instance_by_id", e.to_string()))?;
        row.as_ref().map(Self::row_to_process_instance).transpose()
    }

    async fn update_process_instance(&self, instance: &ProcessInstance) -> StoreResult<()> {
        sqlx::query(
            "UPDATE process_instance SET state = $1, host = $2, start_time = $3, end_time = $4, \
             schedule_time = $5 WHERE id = $6",
        )
        .bind(serde_json::to_value(instance.state)?)
        .bind(&instance.host)
        .bind(instance.start_time)
        .bind(instance.end_time)
        .bind(instance.schedule_time)
        .bind(instance.id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::database("update_process_instance", e.to_string()))?;
        Ok(())
    }

    async fn save_process_instance(&self, instance: &ProcessInstance) -> StoreResult<i64> {
        let row = sqlx::query(
            "INSERT INTO process_instance \
             (definition_id, process_definition_json, state, command_type, command_param, host, \
              start_time, end_time, schedule_time, timeout_minutes, failure_strategy, \
              is_complement_data, is_sub_process, global_params) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             RETURNING id",
        )
        .bind(instance.definition_id)
        .bind(&instance.process_definition_json)
        .bind(serde_json::to_value(instance.state)?)
        .bind(serde_json::to_value(instance.command_type)?)
        .bind(serde_json::to_value(&instance.command_param)?)
        .bind(&instance.host)
        .bind(instance.start_time)
        .bind(instance.end_time)
        .bind(instance.schedule_time)
        .bind(instance.timeout_minutes)
        .bind(serde_json::to_value(instance.failure_strategy)?)
        .bind(instance.is_complement_data)
        .bind(instance.is_sub_process)
        .bind(&instance.global_params)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::database("save_process_instance", e.to_string()))?;
        Ok(row.try_get("id")?)
    }

    async fn find_valid_task_list_by_process_id(&self, id: i64) -> StoreResult<Vec<TaskInstance>> {
        let rows = sqlx::query(
            "SELECT * FROM task_instance WHERE process_instance_id = $1 AND flag = 'yes'",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::database("find_valid_task_list_by_process_id", e.to_string()))?;
        rows.iter().map(Self::row_to_task_instance).collect()
    }

    async fn find_task_instance_by_id(&self, id: i64) -> StoreResult<Option<TaskInstance>> {
        let row = sqlx::query("SELECT * FROM task_instance WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::database("find_task_instance_by_id", e.to_string()))?;
        row.as_ref().map(Self::row_to_task_instance).transpose()
    }

    async fn save_task_instance(&self, instance: &TaskInstance) -> StoreResult<i64> {
        let row = sqlx::query(
            "INSERT INTO task_instance \
             (process_instance_id, name, state, host, flag, retry_times, start_time, end_time, \
              task_json, task_instance_priority, worker_group_id, alert_flag) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING id",
        )
        .bind(instance.process_instance_id)
        .bind(&instance.name)
        .bind(serde_json::to_value(instance.state)?)
        .bind(&instance.host)
        .bind(serde_json::to_value(instance.flag)?)
        .bind(instance.retry_times as i32)
        .bind(instance.start_time)
        .bind(instance.end_time)
        .bind(serde_json::to_value(&instance.task_json)?)
        .bind(serde_json::to_value(instance.task_instance_priority)?)
        .bind(instance.worker_group_id)
        .bind(instance.alert_flag)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::database("save_task_instance", e.to_string()))?;
        Ok(row.try_get("id")?)
    }

    async fn update_task_instance(&self, instance: &TaskInstance) -> StoreResult<()> {
        let Some(id) = instance.id else {
            return Err(StoreError::database(
                "update_task_instance",
                "cannot update a task instance without an id".to_string(),
            ));
        };
        sqlx::query(
            "UPDATE task_instance SET state = $1, host = $2, flag = $3, retry_times = $4, \
             start_time = $5, end_time = $6 WHERE id = $7",
        )
        .bind(serde_json::to_value(instance.state)?)
        .bind(&instance.host)
        .bind(serde_json::to_value(instance.flag)?)
        .bind(instance.retry_times as i32)
        .bind(instance.start_time)
        .bind(instance.end_time)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::database("update_task_instance", e.to_string()))?;
        Ok(())
    }

    async fn query_need_failover_process_instances(
        &self,
        host: Option<&str>,
    ) -> StoreResult<Vec<ProcessInstance>> {
        let rows = match host {
            Some(h) => {
                sqlx::query(
                    "SELECT * FROM process_instance WHERE host = $1 \
                     AND state NOT IN ('success', 'failure', 'stop', 'kill', 'pause')",
                )
                .bind(h)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT * FROM process_instance \
                     WHERE state NOT IN ('success', 'failure', 'stop', 'kill', 'pause')",
                )
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| StoreError::database("query_need_failover_process_instances", e.to_string()))?;
        rows.iter().map(Self::row_to_process_instance).collect()
    }

    async fn query_need_failover_task_instances(&self, host: Option<&str>) -> StoreResult<Vec<TaskInstance>> {
        let rows = match host {
            Some(h) => {
                sqlx::query(
                    "SELECT ti.* FROM task_instance ti JOIN process_instance pi \
                     ON ti.process_instance_id = pi.id \
                     WHERE ti.host = $1 \
                     AND ti.state NOT IN ('success', 'failure', 'stop', 'kill', 'pause') \
                     AND pi.state NOT IN ('success', 'failure', 'stop', 'kill', 'pause')",
                )
                .bind(h)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT ti.* FROM task_instance ti JOIN process_instance pi \
                     ON ti.process_instance_id = pi.id \
                     WHERE ti.state NOT IN ('success', 'failure', 'stop', 'kill', 'pause') \
                     AND pi.state NOT IN ('success', 'failure', 'stop', 'kill', 'pause')",
                )
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| StoreError::database("query_need_failover_task_instances", e.to_string()))?;
        rows.iter().map(Self::row_to_task_instance).collect()
    }

    async fn process_need_failover_process_instance(&self, instance: &ProcessInstance) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::database("process_need_failover_process_instance", e.to_string()))?;

        sqlx::query(
            "UPDATE process_instance SET host = NULL, state = $1 WHERE id = $2",
        )
        .bind(serde_json::to_value(ExecutionStatus::SubmittedSuccess)?)
        .bind(instance.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::database("process_need_failover_process_instance", e.to_string()))?;

        sqlx::query(
            "INSERT INTO command (command_type, process_instance_id, process_definition_id, \
             command_param, task_depend_type) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(serde_json::to_value(CommandType::RecoverToleranceFaultProcess)?)
        .bind(instance.id)
        .bind(instance.definition_id)
        .bind(serde_json::to_value(CommandParam::new())?)
        .bind(serde_json::to_value(instance.command_type)?)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::database("process_need_failover_process_instance", e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::database("process_need_failover_process_instance", e.to_string()))?;
        Ok(())
    }

    async fn create_recovery_waiting_thread_command(
        &self,
        existing: &Command,
        instance: &ProcessInstance,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO command (command_type, process_instance_id, process_definition_id, \
             command_param, task_depend_type) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(serde_json::to_value(CommandType::RecoverWaitingThread)?)
        .bind(instance.id)
        .bind(existing.process_definition_id)
        .bind(serde_json::to_value(&existing.command_param)?)
        .bind(serde_json::to_value(existing.task_depend_type)?)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::database("create_recovery_waiting_thread_command", e.to_string()))?;
        Ok(())
    }

    async fn find_process_definition_by_id(&self, id: i64) -> StoreResult<Option<ProcessDefinition>> {
        let row = sqlx::query(
            "SELECT id, process_definition_json, global_params FROM process_definition WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::database("find_process_definition_by_id", e.to_string()))?;
        row.map(|r| {
            Ok(ProcessDefinition {
                id: r.try_get("id")?,
                process_definition_json: r.try_get("process_definition_json")?,
                global_params: r.try_get("global_params")?,
            })
        })
        .transpose()
    }

    async fn verify(&self) -> StoreResult<bool> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Unhealthy(e.to_string()))?;
        Ok(true)
    }
}

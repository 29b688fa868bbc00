use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{Flag, Priority};
use crate::execution_status::ExecutionStatus;
use crate::task_node::TaskNode;

/// One attempt of a `TaskNode` within a particular process instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInstance {
    pub id: Option<i64>,
    pub process_instance_id: i64,
    pub name: String,
    pub state: ExecutionStatus,
    pub host: Option<String>,
    pub flag: Flag,
    pub retry_times: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub task_json: TaskNode,
    pub task_instance_priority: Priority,
    pub worker_group_id: Option<i64>,
    pub alert_flag: bool,
}

impl TaskInstance {
    pub fn new(process_instance_id: i64, task_json: TaskNode) -> Self {
        let priority = task_json.task_instance_priority;
        let worker_group_id = task_json.worker_group_id;
        Self {
            id: None,
            process_instance_id,
            name: task_json.name.clone(),
            state: ExecutionStatus::SubmittedSuccess,
            host: None,
            flag: Flag::Yes,
            retry_times: 0,
            start_time: None,
            end_time: None,
            task_json,
            task_instance_priority: priority,
            worker_group_id,
            alert_flag: true,
        }
    }

    pub fn is_task_complete(&self) -> bool {
        self.state.is_finished() && matches!(self.flag, Flag::Yes)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.state, ExecutionStatus::Failure)
    }

    pub fn has_retry_remaining(&self) -> bool {
        self.retry_times < self.task_json.max_retry_times
    }

    /// Whether the retry backoff window has elapsed, given the current time.
    pub fn retry_backoff_elapsed(&self, now: DateTime<Utc>) -> bool {
        let Some(end_time) = self.end_time else {
            return true;
        };
        let interval = self.task_json.retry_interval_minutes;
        if interval == 0 {
            return true;
        }
        now.signed_duration_since(end_time).num_minutes() >= interval as i64
    }

    /// Creates the next attempt after a retryable failure: fresh instance, flag
    /// on this one cleared to `No`, retry count carried forward.
    pub fn spawn_retry(&mut self) -> TaskInstance {
        self.flag = Flag::No;
        let mut next = TaskInstance::new(self.process_instance_id, self.task_json.clone());
        next.retry_times = self.retry_times + 1;
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> TaskNode {
        TaskNode::new("A", "shell").with_retries(2, 1)
    }

    #[test]
    fn new_instance_starts_submitted() {
        let ti = TaskInstance::new(1, node());
        assert_eq!(ti.state, ExecutionStatus::SubmittedSuccess);
        assert_eq!(ti.retry_times, 0);
        assert!(matches!(ti.flag, Flag::Yes));
    }

    #[test]
    fn retry_backoff_elapsed_without_end_time_is_true() {
        let ti = TaskInstance::new(1, node());
        assert!(ti.retry_backoff_elapsed(Utc::now()));
    }

    #[test]
    fn retry_backoff_respects_interval() {
        let mut ti = TaskInstance::new(1, node());
        ti.end_time = Some(Utc::now());
        assert!(!ti.retry_backoff_elapsed(Utc::now()));
        let later = Utc::now() + chrono::Duration::minutes(2);
        assert!(ti.retry_backoff_elapsed(later));
    }

    #[test]
    fn spawn_retry_clears_old_flag_and_increments_count() {
        let mut ti = TaskInstance::new(1, node());
        ti.retry_times = 0;
        let next = ti.spawn_retry();
        assert!(matches!(ti.flag, Flag::No));
        assert_eq!(next.retry_times, 1);
        assert!(matches!(next.flag, Flag::Yes));
    }

    #[test]
    fn has_retry_remaining_respects_max() {
        let mut ti = TaskInstance::new(1, node());
        assert!(ti.has_retry_remaining());
        ti.retry_times = 2;
        assert!(!ti.has_retry_remaining());
    }
}

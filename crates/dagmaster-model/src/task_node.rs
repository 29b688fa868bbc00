use serde::{Deserialize, Serialize};

use crate::enums::{NodeFlag, Priority};

/// Static node of a DAG definition, as authored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    pub name: String,
    pub task_type: String,
    #[serde(default)]
    pub deps: Vec<String>,
    #[serde(default)]
    pub max_retry_times: u32,
    #[serde(default)]
    pub retry_interval_minutes: u32,
    #[serde(default)]
    pub task_instance_priority: Priority,
    pub worker_group_id: Option<i64>,
    #[serde(default = "default_node_flag")]
    pub flag: NodeFlag,
    /// For `task_type == "sub_process"`: the already-created child process
    /// instance this node watches to completion, rather than dispatching to
    /// a Worker directly. Populated by whatever created the child instance.
    #[serde(default)]
    pub sub_process_instance_id: Option<i64>,
}

fn default_node_flag() -> NodeFlag {
    NodeFlag::Yes
}

impl TaskNode {
    pub fn new(name: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            task_type: task_type.into(),
            deps: Vec::new(),
            max_retry_times: 0,
            retry_interval_minutes: 0,
            task_instance_priority: Priority::default(),
            worker_group_id: None,
            flag: NodeFlag::Yes,
            sub_process_instance_id: None,
        }
    }

    pub fn with_sub_process_instance(mut self, process_instance_id: i64) -> Self {
        self.sub_process_instance_id = Some(process_instance_id);
        self
    }

    pub fn with_deps(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.deps = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_retries(mut self, max_retry_times: u32, retry_interval_minutes: u32) -> Self {
        self.max_retry_times = max_retry_times;
        self.retry_interval_minutes = retry_interval_minutes;
        self
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self.flag, NodeFlag::No)
    }

    pub fn is_source(&self) -> bool {
        self.deps.is_empty()
    }
}

use serde::{Deserialize, Serialize};

/// Dispatch priority for a task instance. Affects worker-side queue ordering only;
/// the DagEngine itself traverses the DAG breadth-first in insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Lowest,
    Low,
    Medium,
    High,
    Highest,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

/// Whether a task node is active in the definition (`Yes`) or pruned (`No`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeFlag {
    Yes,
    No,
}

/// Whether a task instance is the live attempt (`Yes`) or superseded by a retry (`No`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flag {
    Yes,
    No,
}

/// How a process instance reacts to a task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStrategy {
    /// Fail the whole process as soon as one task fails; drain the active set and stop.
    End,
    /// Keep running any branch that does not transitively depend on the failed task.
    Continue,
}

/// Which direction a `generate_flow_dag` slice should expand from the given node set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskDependType {
    All,
    Forward,
    Backward,
}

/// Reason a `Command` was enqueued, driving how `DagEngine::prepare_process` seeds itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    Start,
    StartFailureTaskProcess,
    StartCurrentTaskProcess,
    RecoverWaitingThread,
    RecoverSuspendedProcess,
    RecoverToleranceFaultProcess,
    Complement,
    Schedule,
}

impl CommandType {
    /// Whether this command resumes an existing process instance rather than starting fresh.
    pub fn is_recovery(self) -> bool {
        matches!(
            self,
            CommandType::StartFailureTaskProcess
                | CommandType::StartCurrentTaskProcess
                | CommandType::RecoverWaitingThread
                | CommandType::RecoverSuspendedProcess
                | CommandType::RecoverToleranceFaultProcess
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_default_is_medium() {
        assert_eq!(Priority::default(), Priority::Medium);
    }

    #[test]
    fn priority_orders_lowest_to_highest() {
        assert!(Priority::Lowest < Priority::Low);
        assert!(Priority::Low < Priority::Medium);
        assert!(Priority::Medium < Priority::High);
        assert!(Priority::High < Priority::Highest);
    }

    #[test]
    fn recovery_command_types_are_classified() {
        assert!(CommandType::StartFailureTaskProcess.is_recovery());
        assert!(CommandType::RecoverToleranceFaultProcess.is_recovery());
        assert!(!CommandType::Start.is_recovery());
        assert!(!CommandType::Complement.is_recovery());
        assert!(!CommandType::Schedule.is_recovery());
    }
}

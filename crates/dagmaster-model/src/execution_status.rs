use serde::{Deserialize, Serialize};

/// Lifecycle state of a process instance or a task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    SubmittedSuccess,
    RunningExecution,
    ReadyPause,
    Pause,
    ReadyStop,
    Stop,
    Failure,
    Success,
    NeedFaultTolerance,
    Kill,
    WaitingThread,
    DelayExecution,
}

impl ExecutionStatus {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success
                | ExecutionStatus::Failure
                | ExecutionStatus::Stop
                | ExecutionStatus::Kill
                | ExecutionStatus::Pause
        )
    }

    pub fn is_failure(self) -> bool {
        matches!(self, ExecutionStatus::Failure)
    }

    pub fn is_success(self) -> bool {
        matches!(self, ExecutionStatus::Success)
    }

    pub fn is_pause(self) -> bool {
        matches!(self, ExecutionStatus::Pause | ExecutionStatus::ReadyPause)
    }

    pub fn is_cancel(self) -> bool {
        matches!(self, ExecutionStatus::Kill | ExecutionStatus::Stop)
    }

    pub fn is_waiting_thread(self) -> bool {
        matches!(self, ExecutionStatus::WaitingThread)
    }

    pub fn is_tolerance(self) -> bool {
        matches!(self, ExecutionStatus::NeedFaultTolerance)
    }
}

/// Outcome of evaluating a task's dependency set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependResult {
    Success,
    Waiting,
    Failed,
}

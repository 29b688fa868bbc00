use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command::CommandParam;
use crate::enums::{CommandType, FailureStrategy};
use crate::execution_status::ExecutionStatus;

/// One run of a workflow DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInstance {
    pub id: i64,
    pub definition_id: i64,
    pub process_definition_json: serde_json::Value,
    pub state: ExecutionStatus,
    pub command_type: CommandType,
    pub command_param: CommandParam,
    pub host: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub schedule_time: Option<DateTime<Utc>>,
    pub timeout_minutes: Option<i32>,
    pub failure_strategy: FailureStrategy,
    pub is_complement_data: bool,
    pub is_sub_process: bool,
    pub global_params: serde_json::Value,
}

impl ProcessInstance {
    pub fn claim(&mut self, host: impl Into<String>) {
        self.host = Some(host.into());
    }

    pub fn release(&mut self) {
        self.host = None;
    }

    pub fn is_owned_by(&self, host: &str) -> bool {
        self.host.as_deref() == Some(host)
    }

    pub fn is_process_instance_stop(&self) -> bool {
        self.state.is_finished()
    }

    pub fn mark_terminal(&mut self, state: ExecutionStatus, now: DateTime<Utc>) {
        debug_assert!(state.is_finished(), "mark_terminal requires a terminal state");
        self.state = state;
        self.end_time = Some(now);
    }

    pub fn has_timed_out(&self, now: DateTime<Utc>) -> bool {
        match (self.timeout_minutes, self.start_time) {
            (Some(minutes), Some(start)) if minutes > 0 => {
                now.signed_duration_since(start).num_minutes() >= minutes as i64
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> ProcessInstance {
        ProcessInstance {
            id: 1,
            definition_id: 1,
            process_definition_json: serde_json::json!({}),
            state: ExecutionStatus::RunningExecution,
            command_type: CommandType::Start,
            command_param: CommandParam::new(),
            host: None,
            start_time: Some(Utc::now()),
            end_time: None,
            schedule_time: None,
            timeout_minutes: None,
            failure_strategy: FailureStrategy::End,
            is_complement_data: false,
            is_sub_process: false,
            global_params: serde_json::json!({}),
        }
    }

    #[test]
    fn claim_and_release_round_trip() {
        let mut pi = instance();
        pi.claim("host-a");
        assert!(pi.is_owned_by("host-a"));
        pi.release();
        assert!(!pi.is_owned_by("host-a"));
    }

    #[test]
    fn mark_terminal_sets_end_time() {
        let mut pi = instance();
        let now = Utc::now();
        pi.mark_terminal(ExecutionStatus::Success, now);
        assert_eq!(pi.end_time, Some(now));
        assert!(pi.is_process_instance_stop());
    }

    #[test]
    fn has_timed_out_respects_configured_minutes() {
        let mut pi = instance();
        pi.timeout_minutes = Some(1);
        pi.start_time = Some(Utc::now() - chrono::Duration::minutes(2));
        assert!(pi.has_timed_out(Utc::now()));
    }

    #[test]
    fn no_timeout_configured_never_times_out() {
        let pi = instance();
        assert!(!pi.has_timed_out(Utc::now() + chrono::Duration::days(365)));
    }
}

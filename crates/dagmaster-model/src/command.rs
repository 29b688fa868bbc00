use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::enums::{CommandType, TaskDependType};
use crate::errors::{ModelError, ModelResult};

/// Key/value parameters attached to a `Command`, with typed accessors for the
/// handful of keys the engine cares about.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandParam(pub HashMap<String, String>);

impl CommandParam {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_node_names(&self) -> Vec<String> {
        self.0
            .get("StartNodeList")
            .map(|v| v.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn recovery_start_node_ids(&self) -> ModelResult<Vec<i64>> {
        match self.0.get("recoveryStartNodeIds") {
            None => Ok(Vec::new()),
            Some(raw) => raw
                .split(',')
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.trim()
                        .parse::<i64>()
                        .map_err(|_| ModelError::invalid_command_param(format!("bad node id '{s}'")))
                })
                .collect(),
        }
    }

    pub fn complement_start_date(&self) -> Option<NaiveDate> {
        self.0
            .get("complementStartDate")
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
    }

    pub fn complement_end_date(&self) -> Option<NaiveDate> {
        self.0
            .get("complementEndDate")
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
    }

    pub fn task_depend_type(&self) -> TaskDependType {
        match self.0.get("TaskDependType").map(String::as_str) {
            Some("forward") => TaskDependType::Forward,
            Some("backward") => TaskDependType::Backward,
            _ => TaskDependType::All,
        }
    }

    pub fn forbidden_task_names(&self) -> Vec<String> {
        self.0
            .get("forbiddenTaskList")
            .map(|v| v.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect())
            .unwrap_or_default()
    }
}

/// A request, persisted by an upstream scheduler, that a process instance be
/// started or resumed. The Master core only reads these, except on failover
/// where it enqueues fresh recovery commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: Option<i64>,
    pub command_type: CommandType,
    pub process_instance_id: Option<i64>,
    pub process_definition_id: i64,
    pub command_param: CommandParam,
    pub task_depend_type: TaskDependType,
    pub executor_id: Option<i64>,
}

impl Command {
    pub fn new(process_definition_id: i64, command_type: CommandType) -> Self {
        Self {
            id: None,
            command_type,
            process_instance_id: None,
            process_definition_id,
            command_param: CommandParam::new(),
            task_depend_type: TaskDependType::All,
            executor_id: None,
        }
    }

    pub fn recovery_for(process_definition_id: i64, process_instance_id: i64) -> Self {
        let mut command = Self::new(process_definition_id, CommandType::RecoverToleranceFaultProcess);
        command.process_instance_id = Some(process_instance_id);
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_node_names_parses_comma_list() {
        let mut param = CommandParam::new();
        param.0.insert("StartNodeList".to_string(), "A,B,C".to_string());
        assert_eq!(
            param.start_node_names(),
            vec!["A".to_string(), "B".to_string(), "C".to_string()]
        );
    }

    #[test]
    fn recovery_start_node_ids_parses_integers() {
        let mut param = CommandParam::new();
        param
            .0
            .insert("recoveryStartNodeIds".to_string(), "1, 2,3".to_string());
        assert_eq!(param.recovery_start_node_ids().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn recovery_start_node_ids_rejects_garbage() {
        let mut param = CommandParam::new();
        param
            .0
            .insert("recoveryStartNodeIds".to_string(), "abc".to_string());
        assert!(param.recovery_start_node_ids().is_err());
    }

    #[test]
    fn complement_dates_parse_iso_format() {
        let mut param = CommandParam::new();
        param
            .0
            .insert("complementStartDate".to_string(), "2024-01-01".to_string());
        param
            .0
            .insert("complementEndDate".to_string(), "2024-01-03".to_string());
        assert_eq!(
            param.complement_start_date(),
            Some(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
        );
        assert_eq!(
            param.complement_end_date(),
            Some(NaiveDate::from_ymd_opt(2024, 1, 3).unwrap())
        );
    }

    #[test]
    fn recovery_for_sets_process_instance_id() {
        let command = Command::recovery_for(7, 42);
        assert_eq!(command.process_instance_id, Some(42));
        assert_eq!(command.command_type, CommandType::RecoverToleranceFaultProcess);
    }
}

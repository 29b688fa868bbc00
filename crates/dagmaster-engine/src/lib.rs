//! Per-process DAG execution engine for the dagmaster execution core:
//! `DagEngine` drives one process instance's tasks from frontier to
//! completion, backed by a pluggable `TaskSupervisor` per task type and an
//! admission-control `ResourceGate`.

mod dag_engine;
mod errors;
mod resource_gate;
mod supervisor;

pub use dag_engine::{DagEngine, DagEngineConfig};
pub use errors::{EngineError, EngineResult};
pub use resource_gate::{AlwaysAllow, ResourceGate, ResourceThresholds, SysinfoResourceGate};
pub use supervisor::{
    MasterTaskSupervisor, NoopWorkerGateway, ScriptedWorkerGateway, SubProcessSupervisor,
    TaskSupervisor, WorkerGateway,
};

//! End-to-end `DagEngine` scenarios against an in-memory store, gateway and
//! alerter. Each test drives one process instance to a terminal state and
//! checks the persisted task/process bookkeeping, not engine internals.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dagmaster_coord::Stopper;
use dagmaster_engine::{DagEngine, DagEngineConfig, NoopWorkerGateway, ScriptedWorkerGateway};
use dagmaster_model::{
    AlertKind, Alerter, CommandParam, CommandType, ExecutionStatus, FailureStrategy, ProcessInstance, TaskNode,
};
use dagmaster_store::{InMemoryProcessStore, ProcessStore};

#[derive(Debug, Default)]
struct RecordingAlerter {
    fired: Mutex<Vec<AlertKind>>,
}

impl RecordingAlerter {
    fn fired(&self) -> Vec<AlertKind> {
        self.fired.lock().unwrap().clone()
    }

    fn count_matching(&self, predicate: impl Fn(&AlertKind) -> bool) -> usize {
        self.fired.lock().unwrap().iter().filter(|k| predicate(k)).count()
    }
}

#[async_trait]
impl Alerter for RecordingAlerter {
    async fn alert(&self, kind: AlertKind) {
        self.fired.lock().unwrap().push(kind);
    }
}

fn process_instance(id: i64, failure_strategy: FailureStrategy) -> ProcessInstance {
    ProcessInstance {
        id,
        definition_id: 1,
        process_definition_json: serde_json::json!({}),
        state: ExecutionStatus::SubmittedSuccess,
        command_type: CommandType::Start,
        command_param: CommandParam::new(),
        host: None,
        start_time: None,
        end_time: None,
        schedule_time: None,
        timeout_minutes: None,
        failure_strategy,
        is_complement_data: false,
        is_sub_process: false,
        global_params: serde_json::json!({}),
    }
}

fn fast_config() -> DagEngineConfig {
    DagEngineConfig {
        tick_interval: Duration::from_millis(1),
    }
}

/// S1 — linear success. DAG A->B->C, every task succeeds first try.
#[tokio::test]
async fn s1_linear_success() {
    let store: Arc<dyn ProcessStore> = Arc::new(InMemoryProcessStore::new());
    let nodes = vec![
        TaskNode::new("A", "shell"),
        TaskNode::new("B", "shell").with_deps(["A"]),
        TaskNode::new("C", "shell").with_deps(["B"]),
    ];

    let engine = DagEngine::prepare(
        process_instance(1, FailureStrategy::End),
        nodes,
        store.clone(),
        Arc::new(RecordingAlerter::default()),
        Arc::new(dagmaster_engine::AlwaysAllow),
        Arc::new(NoopWorkerGateway),
        Stopper::new(),
        "host-a",
        fast_config(),
    )
    .await
    .unwrap();

    let state = engine.run().await.unwrap();
    assert_eq!(state, ExecutionStatus::Success);

    let pi = store.find_process_instance_by_id(1).await.unwrap().unwrap();
    assert_eq!(pi.state, ExecutionStatus::Success);

    let tasks = store.find_valid_task_list_by_process_id(1).await.unwrap();
    assert_eq!(tasks.len(), 3);
    assert!(tasks.iter().all(|t| t.state == ExecutionStatus::Success));
}

/// S2 — retry then succeed. A fails twice, then succeeds on the third attempt.
#[tokio::test]
async fn s2_retry_then_succeed() {
    let store: Arc<dyn ProcessStore> = Arc::new(InMemoryProcessStore::new());
    let nodes = vec![TaskNode::new("A", "shell").with_retries(2, 0)];

    let gateway = ScriptedWorkerGateway::new();
    gateway.script(
        "A",
        [ExecutionStatus::Failure, ExecutionStatus::Failure, ExecutionStatus::Success],
    );

    let engine = DagEngine::prepare(
        process_instance(1, FailureStrategy::End),
        nodes,
        store.clone(),
        Arc::new(RecordingAlerter::default()),
        Arc::new(dagmaster_engine::AlwaysAllow),
        Arc::new(gateway),
        Stopper::new(),
        "host-a",
        fast_config(),
    )
    .await
    .unwrap();

    let state = engine.run().await.unwrap();
    assert_eq!(state, ExecutionStatus::Success);

    let pi = store.find_process_instance_by_id(1).await.unwrap().unwrap();
    assert_eq!(pi.state, ExecutionStatus::Success);

    // find_valid_task_list_by_process_id only returns flag=Yes rows: the two
    // failed attempts were superseded (flag flipped to No by spawn_retry), so
    // only the final, successful attempt remains flag=Yes.
    let valid = store.find_valid_task_list_by_process_id(1).await.unwrap();
    assert_eq!(valid.len(), 1);
    assert_eq!(valid[0].state, ExecutionStatus::Success);
    assert_eq!(valid[0].retry_times, 2);
}

/// S3 — dep-failure propagation with FailureStrategy::End. A->B, A->C, B->D, C->D.
/// B fails with no retries; D must never run; C is killed as part of the End
/// strategy's "stop everything else" behavior.
#[tokio::test]
async fn s3_dep_failure_end_strategy() {
    let store: Arc<dyn ProcessStore> = Arc::new(InMemoryProcessStore::new());
    let nodes = vec![
        TaskNode::new("A", "shell"),
        TaskNode::new("B", "shell").with_deps(["A"]),
        TaskNode::new("C", "shell").with_deps(["A"]),
        TaskNode::new("D", "shell").with_deps(["B", "C"]),
    ];

    let gateway = ScriptedWorkerGateway::new();
    gateway.script("B", [ExecutionStatus::Failure]);

    let engine = DagEngine::prepare(
        process_instance(1, FailureStrategy::End),
        nodes,
        store.clone(),
        Arc::new(RecordingAlerter::default()),
        Arc::new(dagmaster_engine::AlwaysAllow),
        Arc::new(gateway),
        Stopper::new(),
        "host-a",
        fast_config(),
    )
    .await
    .unwrap();

    let state = engine.run().await.unwrap();
    assert_eq!(state, ExecutionStatus::Failure);

    let tasks = store.find_valid_task_list_by_process_id(1).await.unwrap();
    assert!(!tasks.iter().any(|t| t.name == "D"), "D must never be dispatched");
}

/// S4 — dep-failure propagation with FailureStrategy::Continue. Same DAG; C
/// (A's other child) still runs to Success, D never dispatches since its
/// parent B failed, and the process still ends in Failure once the ready
/// queue drains.
#[tokio::test]
async fn s4_dep_failure_continue_strategy() {
    let store: Arc<dyn ProcessStore> = Arc::new(InMemoryProcessStore::new());
    let nodes = vec![
        TaskNode::new("A", "shell"),
        TaskNode::new("B", "shell").with_deps(["A"]),
        TaskNode::new("C", "shell").with_deps(["A"]),
        TaskNode::new("D", "shell").with_deps(["B", "C"]),
    ];

    let gateway = ScriptedWorkerGateway::new();
    gateway.script("B", [ExecutionStatus::Failure]);

    let engine = DagEngine::prepare(
        process_instance(1, FailureStrategy::Continue),
        nodes,
        store.clone(),
        Arc::new(RecordingAlerter::default()),
        Arc::new(dagmaster_engine::AlwaysAllow),
        Arc::new(gateway),
        Stopper::new(),
        "host-a",
        fast_config(),
    )
    .await
    .unwrap();

    let state = engine.run().await.unwrap();
    assert_eq!(state, ExecutionStatus::Failure);

    let tasks = store.find_valid_task_list_by_process_id(1).await.unwrap();
    let c = tasks.iter().find(|t| t.name == "C").expect("C should have run");
    assert_eq!(c.state, ExecutionStatus::Success);
    assert!(!tasks.iter().any(|t| t.name == "D"), "D must never be dispatched");
}

/// S5 — worker loss. A single task comes back `NeedFaultTolerance` (as
/// `ClusterController::failover_worker` would set after a ChildRemoved watch
/// fires); the engine grants exactly one more attempt and the process
/// succeeds, with exactly one tolerance alert fired for A.
#[tokio::test]
async fn s5_worker_loss_grants_one_tolerance_retry() {
    let store: Arc<dyn ProcessStore> = Arc::new(InMemoryProcessStore::new());
    let nodes = vec![TaskNode::new("A", "shell").with_retries(0, 0)];

    let gateway = ScriptedWorkerGateway::new();
    gateway.script("A", [ExecutionStatus::NeedFaultTolerance, ExecutionStatus::Success]);

    let alerter = Arc::new(RecordingAlerter::default());

    let engine = DagEngine::prepare(
        process_instance(1, FailureStrategy::End),
        nodes,
        store.clone(),
        alerter.clone(),
        Arc::new(dagmaster_engine::AlwaysAllow),
        Arc::new(gateway),
        Stopper::new(),
        "host-a",
        fast_config(),
    )
    .await
    .unwrap();

    let state = engine.run().await.unwrap();
    assert_eq!(state, ExecutionStatus::Success);

    let tolerance_alerts = alerter.count_matching(|k| matches!(k, AlertKind::WorkerToleranceWarning { .. }));
    assert_eq!(tolerance_alerts, 1);
}

/// S6 — pause+resume. A->B; A completes and B is enqueued, but a resource
/// gate that denies dispatch past the first task models the backpressure
/// window in which `compute_process_instance_state` must report `Pause`
/// with B still only in the ready queue. A second `DagEngine` run against
/// the same store, with the process set back to `RunningExecution` and
/// dispatch allowed again, completes B and reaches `Success`.
#[tokio::test]
async fn s6_pause_then_resume() {
    let store: Arc<dyn ProcessStore> = Arc::new(InMemoryProcessStore::new());
    let nodes = || {
        vec![TaskNode::new("A", "shell"), TaskNode::new("B", "shell").with_deps(["A"])]
    };

    let mut pi = process_instance(1, FailureStrategy::End);
    pi.state = ExecutionStatus::ReadyPause;

    let engine = DagEngine::prepare(
        pi,
        nodes(),
        store.clone(),
        Arc::new(RecordingAlerter::default()),
        Arc::new(AllowFirstDispatchOnly::default()),
        Arc::new(ScriptedWorkerGateway::new()),
        Stopper::new(),
        "host-a",
        fast_config(),
    )
    .await
    .unwrap();

    let state = engine.run().await.unwrap();
    assert_eq!(state, ExecutionStatus::Pause);

    let tasks = store.find_valid_task_list_by_process_id(1).await.unwrap();
    assert!(tasks.iter().any(|t| t.name == "A" && t.state == ExecutionStatus::Success));
    assert!(!tasks.iter().any(|t| t.name == "B"), "B must not dispatch while paused");

    let mut resumed = store.find_process_instance_by_id(1).await.unwrap().unwrap();
    resumed.state = ExecutionStatus::RunningExecution;
    store.update_process_instance(&resumed).await.unwrap();

    let resumed_engine = DagEngine::prepare(
        resumed,
        nodes(),
        store.clone(),
        Arc::new(RecordingAlerter::default()),
        Arc::new(dagmaster_engine::AlwaysAllow),
        Arc::new(ScriptedWorkerGateway::new()),
        Stopper::new(),
        "host-a",
        fast_config(),
    )
    .await
    .unwrap();

    let state = resumed_engine.run().await.unwrap();
    assert_eq!(state, ExecutionStatus::Success);

    let tasks = store.find_valid_task_list_by_process_id(1).await.unwrap();
    assert!(tasks.iter().any(|t| t.name == "B" && t.state == ExecutionStatus::Success));
}

/// Allows exactly the first dispatch call, then denies every later one: a
/// minimal stand-in for a resource gate that has gone over threshold right
/// after admitting one task.
#[derive(Debug, Default)]
struct AllowFirstDispatchOnly {
    used: AtomicBool,
}

impl dagmaster_engine::ResourceGate for AllowFirstDispatchOnly {
    fn allows_dispatch(&self) -> bool {
        !self.used.swap(true, Ordering::SeqCst)
    }
}

/// S7 — complement range. DAG `A`, complement over three successive dates.
/// Each date's run must complete before the next starts; the process ends
/// Success after the third.
#[tokio::test]
async fn s7_complement_range_runs_each_date() {
    let store: Arc<dyn ProcessStore> = Arc::new(InMemoryProcessStore::new());
    let nodes = vec![TaskNode::new("A", "shell")];

    let mut pi = process_instance(1, FailureStrategy::End);
    pi.is_complement_data = true;
    pi.command_param
        .0
        .insert("complementStartDate".to_string(), "2024-01-01".to_string());
    pi.command_param
        .0
        .insert("complementEndDate".to_string(), "2024-01-03".to_string());

    let submit_count = Arc::new(AtomicUsize::new(0));
    let gateway = CountingGateway {
        count: submit_count.clone(),
    };

    let engine = DagEngine::prepare(
        pi,
        nodes,
        store.clone(),
        Arc::new(RecordingAlerter::default()),
        Arc::new(dagmaster_engine::AlwaysAllow),
        Arc::new(gateway),
        Stopper::new(),
        "host-a",
        fast_config(),
    )
    .await
    .unwrap();

    let state = engine.run().await.unwrap();
    assert_eq!(state, ExecutionStatus::Success);
    assert_eq!(submit_count.load(Ordering::SeqCst), 3, "A must run once per complement date");

    let pi = store.find_process_instance_by_id(1).await.unwrap().unwrap();
    assert_eq!(
        pi.schedule_time.map(|t| t.date_naive()),
        Some(chrono::NaiveDate::from_ymd_opt(2024, 1, 3).unwrap())
    );
}

#[derive(Debug)]
struct CountingGateway {
    count: Arc<AtomicUsize>,
}

#[async_trait]
impl dagmaster_engine::WorkerGateway for CountingGateway {
    async fn dispatch(&self, _task: &dagmaster_model::TaskInstance) -> dagmaster_engine::EngineResult<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn poll(
        &self,
        _task: &dagmaster_model::TaskInstance,
    ) -> dagmaster_engine::EngineResult<Option<ExecutionStatus>> {
        Ok(Some(ExecutionStatus::Success))
    }

    async fn kill(&self, _task: &dagmaster_model::TaskInstance) -> dagmaster_engine::EngineResult<()> {
        Ok(())
    }
}

//! Shared test infrastructure: an engine over a fresh in-memory store with
//! a manual clock, plus a few model and variable helpers.

#![allow(dead_code)]

use bpmn_runtime_core::store::{ChangeSet, EntityOp, EntityStore};
use bpmn_runtime_core::*;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

pub const T0: Timestamp = 1_700_000_000_000;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct Harness {
    pub engine: ProcessEngine,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
}

pub fn harness() -> Harness {
    harness_with(EngineConfig::default())
}

pub fn harness_with(config: EngineConfig) -> Harness {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(T0));
    let engine = ProcessEngine::builder(store.clone())
        .config(config)
        .clock(clock.clone())
        .build();
    Harness { engine, store, clock }
}

pub fn vars(pairs: &[(&str, Value)]) -> Variables {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

// ── Models ───────────────────────────────────────────────────────────

/// start → catch signal `signal_name` → user task `after` → end.
pub fn waiter(key: &str, signal_name: &str) -> ProcessModel {
    ProcessModelBuilder::new(key)
        .signal("sig", signal_name)
        .start("start")
        .catch_signal("wait", "sig")
        .user_task("after")
        .end("end")
        .sequence(&["start", "wait", "after", "end"])
        .build()
}

/// Signal start on `signal_name` → user task `task` → end.
pub fn signal_started(key: &str, signal_name: &str) -> ProcessModel {
    ProcessModelBuilder::new(key)
        .signal("sig", signal_name)
        .signal_start("on_signal", "sig")
        .user_task("task")
        .end("end")
        .sequence(&["on_signal", "task", "end"])
        .build()
}

/// start → throw signal → end.
pub fn thrower(key: &str, signal_name: &str, is_async: bool) -> ProcessModel {
    ProcessModelBuilder::new(key)
        .signal("sig", signal_name)
        .start("start")
        .throw_signal("throw", "sig", is_async)
        .end("end")
        .sequence(&["start", "throw", "end"])
        .build()
}

// ── Direct store access ──────────────────────────────────────────────

/// Persist an execution that already finished, with a catch subscription
/// still pointing at it, as left behind by an older run.
pub async fn seed_finished_catcher(store: &MemoryStore, signal_name: &str, canceled: bool) -> Uuid {
    let id = Uuid::now_v7();
    let execution = Execution {
        id,
        process_instance_id: id,
        process_definition_id: "seeded:1:0".to_string(),
        parent_id: None,
        child_ids: Vec::new(),
        activity_id: Some("wait".to_string()),
        active: false,
        ended: !canceled,
        canceled,
        concurrent: false,
        scope: true,
        variables: Variables::new(),
        business_key: None,
        revision: 0,
    };
    let subscription = EventSubscription {
        id: Uuid::now_v7(),
        event_type: EventType::Signal,
        event_name: signal_name.to_string(),
        execution_id: Some(id),
        process_instance_id: Some(id),
        activity_id: "wait".to_string(),
        configuration: None,
        created_at: T0,
        revision: 0,
    };
    let mut changes = ChangeSet::new();
    changes.executions.push(EntityOp::Insert(execution));
    changes.subscriptions.push(EntityOp::Insert(subscription));
    store.flush(changes).await.expect("seed flush");
    id
}

pub async fn jobs(store: &MemoryStore) -> Vec<Job> {
    store.find_jobs().await.expect("find jobs")
}

//! Cascading cancellation, event sub-processes and terminate end events.

mod common;

use bpmn_runtime_core::model::dto::EventDefinitionDto;
use bpmn_runtime_core::*;
use common::*;

/// Fork into a signal catch and an embedded sub-process that waits on the
/// same signal.
fn nested() -> ProcessModel {
    ProcessModelBuilder::new("nested")
        .signal("sig", "wake")
        .start("start")
        .parallel_gateway("fork")
        .catch_signal("outer_wait", "sig")
        .subprocess("sp")
        .parallel_gateway("join")
        .end("end")
        .flow("start", "fork")
        .flow("fork", "outer_wait")
        .flow("fork", "sp")
        .flow("outer_wait", "join")
        .flow("sp", "join")
        .flow("join", "end")
        .within("sp")
        .start("sp_start")
        .catch_signal("inner_wait", "sig")
        .end("sp_end")
        .sequence(&["sp_start", "inner_wait", "sp_end"])
        .build()
}

#[tokio::test]
async fn cancel_cascades_and_removes_every_subscription() {
    let h = harness();
    h.engine.deploy(vec![nested()]).await.unwrap();
    let pi = h.engine.start_process_instance_by_key("nested", Variables::new()).await.unwrap();

    let before = h.engine.process_instance(pi).await.unwrap();
    assert_eq!(
        before.active_activity_ids(),
        vec!["inner_wait".to_string(), "outer_wait".to_string()]
    );
    assert_eq!(before.subscriptions.len(), 2);
    assert_eq!(before.executions.len(), 4);

    h.engine.cancel_process_instance(pi, "operator request").await.unwrap();

    let after = h.engine.process_instance(pi).await.unwrap();
    assert!(after.canceled);
    assert!(!after.is_running());
    assert_eq!(after.executions.len(), 1);
    assert!(after.subscriptions.is_empty());
    assert!(h.store.subscriptions().is_empty());

    let outcome = h.engine.signal_event_received("wake", Variables::new()).await.unwrap();
    assert_eq!(outcome.delivered, 0);

    let canceled = h
        .engine
        .query_events(&EventLogQuery::new().process_instance(pi).kind("execution_canceled"))
        .await
        .unwrap();
    assert_eq!(canceled.len(), 3);
}

#[tokio::test]
async fn one_signal_completes_both_levels() {
    let h = harness();
    h.engine.deploy(vec![nested()]).await.unwrap();
    let pi = h.engine.start_process_instance_by_key("nested", Variables::new()).await.unwrap();

    let outcome = h.engine.signal_event_received("wake", Variables::new()).await.unwrap();
    assert_eq!(outcome.delivered, 2);
    assert!(h.engine.process_instance(pi).await.unwrap().ended);
}

#[tokio::test]
async fn canceled_instance_cannot_be_canceled_again() {
    let h = harness();
    h.engine.deploy(vec![waiter("w", "alert")]).await.unwrap();
    let pi = h.engine.start_process_instance_by_key("w", Variables::new()).await.unwrap();
    h.engine.cancel_process_instance(pi, "first").await.unwrap();

    let err = h.engine.cancel_process_instance(pi, "second").await.unwrap_err();
    assert!(matches!(err, EngineError::Precondition(_)), "{err}");
}

fn with_event_subprocess(interrupting: bool) -> ProcessModel {
    ProcessModelBuilder::new("guarded")
        .signal("stop", "stop")
        .start("start")
        .user_task("work")
        .end("end")
        .sequence(&["start", "work", "end"])
        .event_subprocess("on_stop")
        .within("on_stop")
        .event_start("stop_start", EventDefinitionDto::signal("stop"), interrupting)
        .user_task("handle")
        .end("stop_end")
        .sequence(&["stop_start", "handle", "stop_end"])
        .build()
}

#[tokio::test]
async fn interrupting_event_subprocess_replaces_the_main_flow() {
    let h = harness();
    h.engine.deploy(vec![with_event_subprocess(true)]).await.unwrap();
    let pi = h.engine.start_process_instance_by_key("guarded", Variables::new()).await.unwrap();

    let before = h.engine.process_instance(pi).await.unwrap();
    assert_eq!(before.active_activity_ids(), vec!["work".to_string()]);
    assert_eq!(before.subscriptions.len(), 1);

    let outcome = h.engine.signal_event_received("stop", Variables::new()).await.unwrap();
    assert_eq!(outcome.delivered, 1);

    let during = h.engine.process_instance(pi).await.unwrap();
    assert_eq!(during.active_activity_ids(), vec!["handle".to_string()]);
    assert!(during.subscriptions.is_empty());

    let handler = during.execution_at("handle").unwrap().id;
    h.engine.trigger(handler, Variables::new()).await.unwrap();
    assert!(h.engine.process_instance(pi).await.unwrap().ended);
}

#[tokio::test]
async fn non_interrupting_event_subprocess_runs_alongside() {
    let h = harness();
    h.engine.deploy(vec![with_event_subprocess(false)]).await.unwrap();
    let pi = h.engine.start_process_instance_by_key("guarded", Variables::new()).await.unwrap();

    h.engine.signal_event_received("stop", Variables::new()).await.unwrap();
    let during = h.engine.process_instance(pi).await.unwrap();
    assert_eq!(
        during.active_activity_ids(),
        vec!["handle".to_string(), "work".to_string()]
    );
    // The scope keeps listening.
    assert_eq!(during.subscriptions.len(), 1);

    let handler = during.execution_at("handle").unwrap().id;
    h.engine.trigger(handler, Variables::new()).await.unwrap();
    let worker = h
        .engine
        .process_instance(pi)
        .await
        .unwrap()
        .execution_at("work")
        .unwrap()
        .id;
    h.engine.trigger(worker, Variables::new()).await.unwrap();
    assert!(h.engine.process_instance(pi).await.unwrap().ended);
}

#[tokio::test]
async fn terminate_end_cancels_the_other_branches() {
    let h = harness();
    let model = ProcessModelBuilder::new("race")
        .start("start")
        .parallel_gateway("fork")
        .user_task("slow")
        .end("slow_end")
        .terminate_end("done")
        .flow("start", "fork")
        .flow("fork", "slow")
        .flow("fork", "done")
        .flow("slow", "slow_end")
        .build();
    h.engine.deploy(vec![model]).await.unwrap();

    let pi = h.engine.start_process_instance_by_key("race", Variables::new()).await.unwrap();
    let snapshot = h.engine.process_instance(pi).await.unwrap();
    assert!(snapshot.ended);
    assert_eq!(snapshot.executions.len(), 1);
}

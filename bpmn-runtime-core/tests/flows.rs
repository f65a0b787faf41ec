//! Sequence flow behavior: gateways, tasks and embedded sub-processes.

mod common;

use bpmn_runtime_core::*;
use common::*;
use serde_json::json;

fn routed() -> ProcessModel {
    ProcessModelBuilder::new("routed")
        .start("start")
        .exclusive_gateway("route")
        .user_task("express")
        .user_task("standard")
        .end("end")
        .flow("start", "route")
        .conditional_flow("route", "express", "priority", json!("high"))
        .default_flow("route", "standard")
        .flow("express", "end")
        .flow("standard", "end")
        .build()
}

#[tokio::test]
async fn exclusive_gateway_takes_the_matching_flow() {
    let h = harness();
    h.engine.deploy(vec![routed()]).await.unwrap();

    let high = h
        .engine
        .start_process_instance_by_key("routed", vars(&[("priority", json!("high"))]))
        .await
        .unwrap();
    assert_eq!(
        h.engine.process_instance(high).await.unwrap().active_activity_ids(),
        vec!["express".to_string()]
    );

    let low = h
        .engine
        .start_process_instance_by_key("routed", vars(&[("priority", json!("low"))]))
        .await
        .unwrap();
    assert_eq!(
        h.engine.process_instance(low).await.unwrap().active_activity_ids(),
        vec!["standard".to_string()]
    );
}

#[tokio::test]
async fn exclusive_gateway_without_a_match_fails_the_start() {
    let h = harness();
    let model = ProcessModelBuilder::new("strict")
        .start("start")
        .exclusive_gateway("route")
        .end("yes")
        .flow("start", "route")
        .conditional_flow("route", "yes", "ok", json!(true))
        .build();
    h.engine.deploy(vec![model]).await.unwrap();
    let flushes = h.store.flush_count();

    let err = h
        .engine
        .start_process_instance_by_key("strict", Variables::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("'route'"), "{err}");
    assert_eq!(h.store.flush_count(), flushes);
}

#[tokio::test]
async fn service_task_outputs_become_variables() {
    let h = harness();
    let model = ProcessModelBuilder::new("priced")
        .start("start")
        .service_task("price", &[("total", json!(42)), ("currency", json!("EUR"))])
        .end("end")
        .sequence(&["start", "price", "end"])
        .build();
    h.engine.deploy(vec![model]).await.unwrap();

    let pi = h.engine.start_process_instance_by_key("priced", Variables::new()).await.unwrap();
    let snapshot = h.engine.process_instance(pi).await.unwrap();
    assert!(snapshot.ended);
    assert_eq!(snapshot.variables().get("total"), Some(&json!(42)));
    assert_eq!(snapshot.variables().get("currency"), Some(&json!("EUR")));
}

#[tokio::test]
async fn sub_process_completes_and_resumes_the_parent() {
    let h = harness();
    let model = ProcessModelBuilder::new("nested")
        .start("start")
        .subprocess("review")
        .user_task("archive")
        .end("end")
        .sequence(&["start", "review", "archive", "end"])
        .within("review")
        .start("review_start")
        .user_task("check")
        .end("review_end")
        .sequence(&["review_start", "check", "review_end"])
        .build();
    h.engine.deploy(vec![model]).await.unwrap();
    let pi = h.engine.start_process_instance_by_key("nested", Variables::new()).await.unwrap();

    let inside = h.engine.process_instance(pi).await.unwrap();
    assert_eq!(inside.active_activity_ids(), vec!["check".to_string()]);
    assert_eq!(inside.executions.len(), 2);

    let check = inside.execution_at("check").unwrap().id;
    h.engine
        .trigger(check, vars(&[("approved", json!(true))]))
        .await
        .unwrap();

    let after = h.engine.process_instance(pi).await.unwrap();
    assert_eq!(after.active_activity_ids(), vec!["archive".to_string()]);
    assert_eq!(after.executions.len(), 1);
    assert_eq!(after.variables().get("approved"), Some(&json!(true)));
}

#[tokio::test]
async fn trigger_refuses_an_execution_that_is_not_waiting() {
    let h = harness();
    h.engine.deploy(vec![waiter("w", "alert")]).await.unwrap();
    let pi = h.engine.start_process_instance_by_key("w", Variables::new()).await.unwrap();
    h.engine.cancel_process_instance(pi, "done").await.unwrap();

    let err = h.engine.trigger(pi, Variables::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::Precondition(_)), "{err}");
}

//! Signal broadcast to catch subscriptions.

mod common;

use bpmn_runtime_core::*;
use common::*;
use serde_json::json;

#[tokio::test]
async fn throw_reaches_exactly_the_live_catchers() {
    let h = harness();
    h.engine.deploy(vec![waiter("waiter", "alert")]).await.unwrap();

    let mut live = Vec::new();
    for _ in 0..3 {
        live.push(
            h.engine
                .start_process_instance_by_key("waiter", Variables::new())
                .await
                .unwrap(),
        );
    }
    seed_finished_catcher(&h.store, "alert", false).await;
    seed_finished_catcher(&h.store, "alert", true).await;
    assert_eq!(h.engine.subscriptions(EventType::Signal, "alert").await.unwrap().len(), 5);

    let outcome = h.engine.signal_event_received("alert", Variables::new()).await.unwrap();
    assert_eq!(outcome.delivered, 3);
    assert!(outcome.started.is_empty());

    for pi in live {
        let snapshot = h.engine.process_instance(pi).await.unwrap();
        assert_eq!(snapshot.active_activity_ids(), vec!["after".to_string()]);
        assert!(snapshot.subscriptions.is_empty());
    }

    let received = h
        .engine
        .query_events(&EventLogQuery::new().kind("event_received"))
        .await
        .unwrap();
    assert_eq!(received.len(), 3);
}

#[tokio::test]
async fn second_throw_finds_nobody_waiting() {
    let h = harness();
    h.engine.deploy(vec![waiter("waiter", "alert")]).await.unwrap();
    h.engine
        .start_process_instance_by_key("waiter", Variables::new())
        .await
        .unwrap();

    assert_eq!(h.engine.signal_event_received("alert", Variables::new()).await.unwrap().delivered, 1);
    assert_eq!(h.engine.signal_event_received("alert", Variables::new()).await.unwrap().delivered, 0);
}

#[tokio::test]
async fn parallel_branches_waiting_on_one_signal_each_receive_it_once() {
    let h = harness();
    let model = ProcessModelBuilder::new("both")
        .signal("sig", "go")
        .start("start")
        .parallel_gateway("fork")
        .catch_signal("left", "sig")
        .catch_signal("right", "sig")
        .parallel_gateway("join")
        .end("end")
        .flow("start", "fork")
        .flow("fork", "left")
        .flow("fork", "right")
        .flow("left", "join")
        .flow("right", "join")
        .flow("join", "end")
        .build();
    h.engine.deploy(vec![model]).await.unwrap();
    let pi = h.engine.start_process_instance_by_key("both", Variables::new()).await.unwrap();

    let before = h.engine.process_instance(pi).await.unwrap();
    assert_eq!(before.active_activity_ids(), vec!["left".to_string(), "right".to_string()]);
    assert_eq!(before.subscriptions.len(), 2);

    let outcome = h.engine.signal_event_received("go", Variables::new()).await.unwrap();
    assert_eq!(outcome.delivered, 2);

    let after = h.engine.process_instance(pi).await.unwrap();
    assert!(after.ended);
    assert_eq!(after.executions.len(), 1);
}

#[tokio::test]
async fn payload_becomes_receiver_variables() {
    let h = harness();
    h.engine.deploy(vec![waiter("waiter", "alert")]).await.unwrap();
    let pi = h
        .engine
        .start_process_instance_by_key("waiter", vars(&[("origin", json!("start"))]))
        .await
        .unwrap();

    h.engine
        .signal_event_received("alert", vars(&[("level", json!(3))]))
        .await
        .unwrap();

    let variables = h.engine.variables(pi).await.unwrap();
    assert_eq!(variables.get("level"), Some(&json!(3)));
    assert_eq!(variables.get("origin"), Some(&json!("start")));
}

#[tokio::test]
async fn throw_event_inside_a_process_continues_without_waiting() {
    let h = harness();
    h.engine
        .deploy(vec![waiter("waiter", "alert"), thrower("thrower", "alert", false)])
        .await
        .unwrap();
    let waiting = h.engine.start_process_instance_by_key("waiter", Variables::new()).await.unwrap();

    let throwing = h.engine.start_process_instance_by_key("thrower", Variables::new()).await.unwrap();

    assert!(h.engine.process_instance(throwing).await.unwrap().ended);
    let waiter = h.engine.process_instance(waiting).await.unwrap();
    assert_eq!(waiter.active_activity_ids(), vec!["after".to_string()]);

    let thrown = h
        .engine
        .query_events(&EventLogQuery::new().kind("signal_thrown"))
        .await
        .unwrap();
    assert_eq!(thrown.len(), 1);
    assert!(matches!(
        thrown[0].event,
        RuntimeEvent::SignalThrown { delivered: 1, started: 0, .. }
    ));
}

#[tokio::test]
async fn targeted_delivery_only_touches_one_execution() {
    let h = harness();
    h.engine.deploy(vec![waiter("waiter", "alert")]).await.unwrap();
    let a = h.engine.start_process_instance_by_key("waiter", Variables::new()).await.unwrap();
    let b = h.engine.start_process_instance_by_key("waiter", Variables::new()).await.unwrap();

    let outcome = h
        .engine
        .execute(&cmd::SignalEventReceivedCmd::new("alert").to_execution(a))
        .await
        .unwrap();
    assert_eq!(outcome.delivered, 1);
    assert_eq!(
        h.engine.process_instance(a).await.unwrap().active_activity_ids(),
        vec!["after".to_string()]
    );
    assert_eq!(
        h.engine.process_instance(b).await.unwrap().active_activity_ids(),
        vec!["wait".to_string()]
    );
}

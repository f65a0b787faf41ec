//! Signal start events: start subscriptions, soft skips and the
//! configuration error.

mod common;

use bpmn_runtime_core::*;
use common::*;
use serde_json::json;

#[tokio::test]
async fn starts_only_deployed_active_definitions() {
    let h = harness();
    let deployment = h
        .engine
        .deploy(vec![
            signal_started("starter", "go"),
            signal_started("other", "other-signal"),
            signal_started("sleeper", "nap"),
        ])
        .await
        .unwrap();
    let [starter_id, other_id, sleeper_id] = deployment.process_definition_ids.as_slice() else {
        panic!("expected three definitions, got {:?}", deployment.process_definition_ids);
    };
    h.engine.suspend_definition(sleeper_id).await.unwrap();

    // K1 = starter (deployed) + other (extra subscription to a live definition)
    // K2 = sleeper (suspended) + ghost (never deployed)
    for configuration in [other_id.as_str(), sleeper_id.as_str(), "ghost:1:gone"] {
        h.engine
            .subscribe(
                SubscriptionTarget::Start {
                    configuration: Some(configuration.to_string()),
                },
                EventType::Signal,
                "go",
                "on_signal",
            )
            .await
            .unwrap();
    }

    let outcome = h
        .engine
        .signal_event_received("go", vars(&[("k", json!(1))]))
        .await
        .unwrap();
    assert_eq!(outcome.delivered, 0);
    assert_eq!(outcome.started.len(), 2);

    let mut definitions = Vec::new();
    for pi in &outcome.started {
        let snapshot = h.engine.process_instance(*pi).await.unwrap();
        assert_eq!(snapshot.active_activity_ids(), vec!["task".to_string()]);
        assert_eq!(snapshot.variables().get("k"), Some(&json!(1)));
        definitions.push(snapshot.process_definition_id);
    }
    definitions.sort();
    let mut expected = vec![starter_id.clone(), other_id.clone()];
    expected.sort();
    assert_eq!(definitions, expected);

    let skipped = h
        .engine
        .query_events(&EventLogQuery::new().kind("start_skipped"))
        .await
        .unwrap();
    assert_eq!(skipped.len(), 2);
}

#[tokio::test]
async fn start_subscription_without_definition_id_aborts_the_throw() {
    let h = harness();
    h.engine.deploy(vec![waiter("waiter", "broken")]).await.unwrap();
    let pi = h.engine.start_process_instance_by_key("waiter", Variables::new()).await.unwrap();
    h.engine
        .subscribe(
            SubscriptionTarget::Start { configuration: None },
            EventType::Signal,
            "broken",
            "on_signal",
        )
        .await
        .unwrap();
    let flushes = h.store.flush_count();

    let err = h
        .engine
        .signal_event_received("broken", Variables::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Configuration(_)), "{err}");
    assert!(err.to_string().contains("contains no process definition id"), "{err}");

    // The delivery made in the first pass was rolled back with the rest.
    assert_eq!(h.store.flush_count(), flushes);
    let snapshot = h.engine.process_instance(pi).await.unwrap();
    assert_eq!(snapshot.active_activity_ids(), vec!["wait".to_string()]);
}

#[tokio::test]
async fn redeploy_moves_start_subscription_to_latest_version() {
    let h = harness();
    let v1 = h.engine.deploy(vec![signal_started("starter", "go")]).await.unwrap();
    let v2 = h.engine.deploy(vec![signal_started("starter", "go")]).await.unwrap();
    let v1_id = v1.process_definition_ids[0].clone();
    let v2_id = v2.process_definition_ids[0].clone();
    assert!(v2_id.starts_with("starter:2:"));

    let subs = h.engine.subscriptions(EventType::Signal, "go").await.unwrap();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].configuration.as_deref(), Some(v2_id.as_str()));

    let outcome = h.engine.signal_event_received("go", Variables::new()).await.unwrap();
    assert_eq!(outcome.started.len(), 1);
    let started = h.engine.process_instance(outcome.started[0]).await.unwrap();
    assert_eq!(started.process_definition_id, v2_id);

    let err = h.engine.undeploy(v2.deployment_id, false).await.unwrap_err();
    assert!(matches!(err, EngineError::Precondition(_)), "{err}");

    h.engine.undeploy(v2.deployment_id, true).await.unwrap();
    assert!(h.engine.process_instance(outcome.started[0]).await.unwrap().canceled);

    let subs = h.engine.subscriptions(EventType::Signal, "go").await.unwrap();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].configuration.as_deref(), Some(v1_id.as_str()));
}

#[tokio::test]
async fn thrower_and_started_instance_share_one_unit_of_work() {
    let h = harness();
    h.engine
        .deploy(vec![
            signal_started("starter", "go"),
            thrower("thrower", "go", false),
        ])
        .await
        .unwrap();
    let flushes = h.store.flush_count();

    let pi = h.engine.start_process_instance_by_key("thrower", Variables::new()).await.unwrap();
    assert_eq!(h.store.flush_count(), flushes + 1);
    assert!(h.engine.process_instance(pi).await.unwrap().ended);

    let started = h
        .engine
        .query_events(&EventLogQuery::new().kind("instance_started"))
        .await
        .unwrap();
    assert_eq!(started.len(), 2);
}

//! Runtime event log queries against committed history.

mod common;

use bpmn_runtime_core::*;
use common::*;
use serde_json::json;
use uuid::Uuid;

/// One instance with `stringVar` written at T0+1s and again at T0+3s.
async fn history(h: &Harness) -> Uuid {
    h.engine.deploy(vec![waiter("logged", "never")]).await.unwrap();
    let pi = h.engine.start_process_instance_by_key("logged", Variables::new()).await.unwrap();

    h.clock.set(T0 + 1_000);
    h.engine
        .set_variables(pi, vars(&[("stringVar", json!("value1"))]))
        .await
        .unwrap();
    h.clock.set(T0 + 3_000);
    h.engine
        .set_variables(pi, vars(&[("stringVar", json!("value2"))]))
        .await
        .unwrap();
    pi
}

fn values(events: &[RecordedEvent]) -> Vec<serde_json::Value> {
    events
        .iter()
        .filter_map(|e| match &e.event {
            RuntimeEvent::VariableUpdated { value, .. } => Some(value.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn occurred_after_excludes_the_bound() {
    let h = harness();
    let pi = history(&h).await;

    let hits = h
        .engine
        .query_events(
            &EventLogQuery::new()
                .process_instance(pi)
                .kind("variable_updated")
                .occurred_after(T0 + 1_000),
        )
        .await
        .unwrap();
    assert_eq!(values(&hits), vec![json!("value2")]);
}

#[tokio::test]
async fn occurred_at_matches_one_instant() {
    let h = harness();
    let pi = history(&h).await;

    let hits = h
        .engine
        .query_events(
            &EventLogQuery::new()
                .process_instance(pi)
                .kind("variable_updated")
                .occurred_at(T0 + 1_000),
        )
        .await
        .unwrap();
    assert_eq!(values(&hits), vec![json!("value1")]);
}

#[tokio::test]
async fn equal_bounds_select_nothing() {
    let h = harness();
    let pi = history(&h).await;

    let hits = h
        .engine
        .query_events(
            &EventLogQuery::new()
                .process_instance(pi)
                .occurred_after(T0 + 1_000)
                .occurred_at(T0 + 1_000),
        )
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn events_come_back_in_commit_order() {
    let h = harness();
    let pi = history(&h).await;

    let all = h
        .engine
        .query_events(&EventLogQuery::new().process_instance(pi))
        .await
        .unwrap();
    assert!(matches!(all[0].event, RuntimeEvent::InstanceStarted { .. }));
    assert!(all.windows(2).all(|w| (w[0].occurred_at, w[0].seq) < (w[1].occurred_at, w[1].seq)));
    assert!(all.iter().all(|e| e.process_instance_id == Some(pi)));

    let first_two = h
        .engine
        .query_events(&EventLogQuery::new().process_instance(pi).max_results(2))
        .await
        .unwrap();
    assert_eq!(first_two, all[..2].to_vec());
}

#[tokio::test]
async fn deployment_events_have_no_instance() {
    let h = harness();
    let deployment = h.engine.deploy(vec![waiter("w", "alert")]).await.unwrap();

    let created = h
        .engine
        .query_events(&EventLogQuery::new().kind("deployment_created"))
        .await
        .unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].process_instance_id, None);
    assert_eq!(created[0].occurred_at, T0);
    assert!(matches!(
        &created[0].event,
        RuntimeEvent::DeploymentCreated { deployment_id, .. } if *deployment_id == deployment.deployment_id
    ));
}

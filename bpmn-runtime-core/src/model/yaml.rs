use super::dto::ProcessModel;
use anyhow::Result;

/// Parse a YAML string into a ProcessModel.
///
/// Validation is NOT performed here. Deploying the model runs
/// `validate_model()` and rejects the whole deployment on any error.
pub fn parse_process_yaml(yaml_str: &str) -> Result<ProcessModel> {
    let model: ProcessModel = serde_yaml::from_str(yaml_str)?;
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::dto::*;

    #[test]
    fn test_basic_yaml_parse() {
        let yaml = r#"
id: order
nodes:
  - kind: StartEvent
    id: start
  - kind: UserTask
    id: review
  - kind: EndEvent
    id: end
edges:
  - from: start
    to: review
  - from: review
    to: end
"#;
        let model = parse_process_yaml(yaml).unwrap();
        assert_eq!(model.id, "order");
        assert_eq!(model.nodes.len(), 3);
        assert_eq!(model.edges.len(), 2);
        assert_eq!(model.edges[0].flow_id(), "start->review");
    }

    #[test]
    fn test_yaml_with_signals_and_events() {
        let yaml = r#"
id: alerting
signals:
  - id: alertSignal
    name: alert
nodes:
  - kind: StartEvent
    id: start
  - kind: IntermediateThrowEvent
    id: raise
    event:
      type: signal
      signal_ref: alertSignal
      async: true
  - kind: IntermediateCatchEvent
    id: wait
    event:
      type: timer
      duration_ms: 5000
  - kind: SubProcess
    id: on_alert
    triggered_by_event: true
  - kind: StartEvent
    id: on_alert_start
    parent: on_alert
    interrupting: false
    event:
      type: signal
      signal_ref: alertSignal
  - kind: EndEvent
    id: end
edges:
  - from: start
    to: raise
  - from: raise
    to: wait
  - from: wait
    to: end
"#;
        let model = parse_process_yaml(yaml).unwrap();
        assert_eq!(model.signals[0].name.as_deref(), Some("alert"));

        let raise = model.nodes.iter().find(|n| n.id() == "raise").unwrap();
        assert_eq!(
            raise.event(),
            Some(&EventDefinitionDto::Signal {
                signal_ref: Some("alertSignal".into()),
                is_async: true
            })
        );

        let sub_start = model.nodes.iter().find(|n| n.id() == "on_alert_start").unwrap();
        assert_eq!(sub_start.parent(), Some("on_alert"));
        assert!(matches!(
            sub_start,
            NodeDto::StartEvent {
                interrupting: false,
                ..
            }
        ));
    }

    #[test]
    fn test_yaml_conditions_and_defaults() {
        let yaml = r#"
id: xor
nodes:
  - kind: StartEvent
    id: start
  - kind: ExclusiveGateway
    id: gw
  - kind: EndEvent
    id: approved
  - kind: EndEvent
    id: rejected
edges:
  - from: start
    to: gw
  - from: gw
    to: approved
    condition:
      variable: decision
      equals: "yes"
  - from: gw
    to: rejected
    is_default: true
"#;
        let model = parse_process_yaml(yaml).unwrap();
        let cond = model.edges[1].condition.as_ref().unwrap();
        assert_eq!(cond.variable, "decision");
        assert_eq!(cond.equals, serde_json::json!("yes"));
        assert!(model.edges[2].is_default);
    }

    #[test]
    fn test_missing_signal_fields_still_parse() {
        let yaml = r#"
id: broken
signals:
  - name: alert
nodes:
  - kind: StartEvent
    id: start
"#;
        let model = parse_process_yaml(yaml).unwrap();
        assert!(model.signals[0].id.is_none());
    }
}

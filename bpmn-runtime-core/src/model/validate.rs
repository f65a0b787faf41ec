use super::dto::*;
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub rule: String,
    /// Offending element (node, signal or message id) when there is one.
    pub element_id: Option<String>,
    pub message: String,
}

impl ValidationError {
    pub fn new(rule: &str, element_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            rule: rule.to_string(),
            element_id: element_id.map(str::to_string),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.rule, self.message)
    }
}

/// Longest timer a catch event may declare. Due dates are signed
/// millisecond timestamps, so anything longer cannot be represented.
pub const MAX_TIMER_DURATION_MS: u64 = i64::MAX as u64;

/// Which kind of named event a declaration describes. Signals and messages
/// share every rule, only the wording differs.
#[derive(Clone, Copy)]
enum Named {
    Signal,
    Message,
}

impl Named {
    fn word(self) -> &'static str {
        match self {
            Named::Signal => "signal",
            Named::Message => "message",
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            Named::Signal => "S",
            Named::Message => "M",
        }
    }

    fn rule(self, n: u8) -> String {
        format!("{}{}", self.prefix(), n)
    }
}

/// Validate a ProcessModel before building the definition graph.
/// Returns all errors found.
pub fn validate_model(model: &ProcessModel) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    // Build lookup maps
    let mut node_map: HashMap<&str, &NodeDto> = HashMap::new();

    // V1: Node IDs must be unique
    for node in &model.nodes {
        let id = node.id();
        if node_map.contains_key(id) {
            errors.push(ValidationError::new(
                "V1",
                Some(id),
                format!("Duplicate node id: {}", id),
            ));
        } else {
            node_map.insert(id, node);
        }
    }

    // V2: parent must name a sub-process
    for node in &model.nodes {
        if let Some(parent) = node.parent() {
            let ok = matches!(node_map.get(parent), Some(NodeDto::SubProcess { .. }));
            if !ok {
                errors.push(ValidationError::new(
                    "V2",
                    Some(node.id()),
                    format!("Node {} names unknown sub-process '{}' as parent", node.id(), parent),
                ));
            }
        }
    }

    // V3 + V4: edges reference known nodes and stay inside one scope
    for edge in &model.edges {
        let from = node_map.get(edge.from.as_str());
        let to = node_map.get(edge.to.as_str());
        for (end, name, node) in [("from", &edge.from, from), ("to", &edge.to, to)] {
            if node.is_none() {
                errors.push(ValidationError::new(
                    "V3",
                    Some(name),
                    format!("Edge {} references unknown node: {}", end, name),
                ));
            }
        }
        if let (Some(from), Some(to)) = (from, to) {
            if from.parent() != to.parent() {
                errors.push(ValidationError::new(
                    "V4",
                    Some(&edge.flow_id()),
                    format!("Sequence flow {} crosses a sub-process boundary", edge.flow_id()),
                ));
            }
        }
    }

    validate_scopes(model, &mut errors);

    // V8: ExclusiveGateway has at most one default flow, which is unconditional
    for node in &model.nodes {
        if let NodeDto::ExclusiveGateway { id, .. } = node {
            let defaults: Vec<&EdgeDto> = model
                .edges
                .iter()
                .filter(|e| e.from == *id && e.is_default)
                .collect();
            if defaults.len() > 1 {
                errors.push(ValidationError::new(
                    "V8",
                    Some(id),
                    format!(
                        "ExclusiveGateway {}: at most one default flow allowed, found {}",
                        id,
                        defaults.len()
                    ),
                ));
            }
            if defaults.iter().any(|e| e.condition.is_some()) {
                errors.push(ValidationError::new(
                    "V8",
                    Some(id),
                    format!("ExclusiveGateway {}: default flow must not carry a condition", id),
                ));
            }
        }
    }

    // V9 + V10 + V11 + V12: event definitions fit their node kind
    for node in &model.nodes {
        match node {
            NodeDto::IntermediateThrowEvent { id, event, .. } => {
                if !matches!(event, Some(EventDefinitionDto::Signal { .. })) {
                    errors.push(ValidationError::new(
                        "V9",
                        Some(id),
                        format!("IntermediateThrowEvent {} must declare a signal event definition", id),
                    ));
                }
            }
            NodeDto::IntermediateCatchEvent { id, event: None, .. } => {
                errors.push(ValidationError::new(
                    "V10",
                    Some(id),
                    format!("IntermediateCatchEvent {} must declare an event definition", id),
                ));
            }
            NodeDto::IntermediateCatchEvent {
                id,
                event: Some(EventDefinitionDto::Timer { duration_ms }),
                ..
            } if *duration_ms > MAX_TIMER_DURATION_MS => {
                errors.push(ValidationError::new(
                    "V12",
                    Some(id),
                    format!(
                        "IntermediateCatchEvent {}: timer duration {}ms exceeds {}ms",
                        id, duration_ms, MAX_TIMER_DURATION_MS
                    ),
                ));
            }
            NodeDto::StartEvent {
                id,
                event: Some(EventDefinitionDto::Timer { .. }),
                ..
            } => {
                errors.push(ValidationError::new(
                    "V11",
                    Some(id),
                    format!("StartEvent {}: timer start events are not supported", id),
                ));
            }
            _ => {}
        }
    }

    validate_named(model, Named::Signal, &mut errors);
    validate_named(model, Named::Message, &mut errors);

    errors
}

/// Start-event rules per scope (process, embedded sub-process, event sub-process).
fn validate_scopes(model: &ProcessModel, errors: &mut Vec<ValidationError>) {
    let starts_in = |scope: Option<&str>| -> Vec<&NodeDto> {
        model
            .nodes
            .iter()
            .filter(|n| matches!(n, NodeDto::StartEvent { .. }) && n.parent() == scope)
            .collect()
    };

    // V5: process level has at most one none start and at least one start
    let top = starts_in(None);
    if top.is_empty() {
        errors.push(ValidationError::new(
            "V5",
            Some(&model.id),
            format!("Process {} has no start event", model.id),
        ));
    }
    let none_starts = top.iter().filter(|n| n.event().is_none()).count();
    if none_starts > 1 {
        errors.push(ValidationError::new(
            "V5",
            Some(&model.id),
            format!("Process {} has {} none start events, at most one allowed", model.id, none_starts),
        ));
    }

    for node in &model.nodes {
        let NodeDto::SubProcess {
            id,
            triggered_by_event,
            ..
        } = node
        else {
            continue;
        };
        let starts = starts_in(Some(id));
        if *triggered_by_event {
            // V7: one triggered start, no sequence flows in or out
            let triggered = starts.iter().filter(|n| n.event().is_some()).count();
            if starts.len() != 1 || triggered != 1 {
                errors.push(ValidationError::new(
                    "V7",
                    Some(id),
                    format!(
                        "Event sub-process {} must have exactly one start event with an event definition",
                        id
                    ),
                ));
            }
            if model.edges.iter().any(|e| e.from == *id || e.to == *id) {
                errors.push(ValidationError::new(
                    "V7",
                    Some(id),
                    format!("Event sub-process {} must not have sequence flows", id),
                ));
            }
        } else if starts.len() != 1 || starts[0].event().is_some() {
            // V6: embedded sub-process has exactly one none start
            errors.push(ValidationError::new(
                "V6",
                Some(id),
                format!("Sub-process {} must have exactly one none start event", id),
            ));
        }
    }

    // Only process-level and event sub-process starts may carry a trigger.
    for node in &model.nodes {
        if let NodeDto::StartEvent {
            id,
            parent: Some(parent),
            event: Some(_),
            ..
        } = node
        {
            let in_event_sub = matches!(
                model.nodes.iter().find(|n| n.id() == parent),
                Some(NodeDto::SubProcess {
                    triggered_by_event: true,
                    ..
                })
            );
            if !in_event_sub {
                errors.push(ValidationError::new(
                    "V6",
                    Some(id),
                    format!("StartEvent {}: only event sub-process start events may declare a trigger", id),
                ));
            }
        }
    }
}

fn validate_named(model: &ProcessModel, kind: Named, errors: &mut Vec<ValidationError>) {
    let word = kind.word();
    let decls: Vec<(Option<&str>, Option<&str>)> = match kind {
        Named::Signal => model
            .signals
            .iter()
            .map(|s| (s.id.as_deref(), s.name.as_deref()))
            .collect(),
        Named::Message => model
            .messages
            .iter()
            .map(|m| (m.id.as_deref(), m.name.as_deref()))
            .collect(),
    };

    // 1: id required, 2: name required, 3: names unique
    let mut names_by_id: HashMap<&str, Option<&str>> = HashMap::new();
    let mut seen_names: HashSet<&str> = HashSet::new();
    for (id, name) in &decls {
        match id {
            None => errors.push(ValidationError::new(
                &kind.rule(1),
                None,
                format!("{} must have an id", word),
            )),
            Some(id) => {
                if name.is_none() {
                    errors.push(ValidationError::new(
                        &kind.rule(2),
                        Some(id),
                        format!("{} with id '{}' has no name", word, id),
                    ));
                }
                names_by_id.insert(id, *name);
            }
        }
        if let Some(name) = name {
            if !seen_names.insert(name) {
                errors.push(ValidationError::new(
                    &kind.rule(3),
                    Some(name),
                    format!("duplicate {} name '{}'", word, name),
                ));
            }
        }
    }

    // 4: ref required, 5: ref must resolve
    let mut per_scope: BTreeMap<(String, String), usize> = BTreeMap::new();
    for node in &model.nodes {
        let Some(reference) = event_ref(node.event(), kind) else {
            continue;
        };
        let Some(reference) = reference else {
            let property = match kind {
                Named::Signal => "signalEventDefinition does not have required property 'signalRef'",
                Named::Message => "messageEventDefinition does not have required property 'messageRef'",
            };
            errors.push(ValidationError::new(&kind.rule(4), Some(node.id()), property));
            continue;
        };
        let Some(resolved) = names_by_id.get(reference) else {
            errors.push(ValidationError::new(
                &kind.rule(5),
                Some(node.id()),
                format!(
                    "{} reference '{}' of {} does not match any declared {}",
                    word,
                    reference,
                    node.id(),
                    word
                ),
            ));
            continue;
        };

        // 6: one start subscription per (scope, name)
        if let (Some(name), Some(scope)) = (resolved, subscription_scope(model, node)) {
            *per_scope.entry((scope, name.to_string())).or_default() += 1;
        }
    }

    for ((scope, name), count) in per_scope {
        if count > 1 {
            errors.push(ValidationError::new(
                &kind.rule(6),
                Some(&scope),
                format!(
                    "Cannot have more than one {} event subscription with name '{}' for scope '{}'",
                    word, name, scope
                ),
            ));
        }
    }
}

/// `Some(reference)` when the definition is of the requested kind.
fn event_ref(event: Option<&EventDefinitionDto>, kind: Named) -> Option<Option<&str>> {
    match (event?, kind) {
        (EventDefinitionDto::Signal { signal_ref, .. }, Named::Signal) => Some(signal_ref.as_deref()),
        (EventDefinitionDto::Message { message_ref }, Named::Message) => Some(message_ref.as_deref()),
        _ => None,
    }
}

/// Scope whose start subscriptions must have unique names. Process-level
/// start events count against the process; interrupting event sub-process
/// starts count against the scope enclosing the event sub-process.
fn subscription_scope(model: &ProcessModel, node: &NodeDto) -> Option<String> {
    let NodeDto::StartEvent {
        parent,
        interrupting,
        ..
    } = node
    else {
        return None;
    };
    match parent {
        None => Some(model.id.clone()),
        Some(_) if !*interrupting => None,
        Some(sub) => {
            let enclosing = model
                .nodes
                .iter()
                .find(|n| n.id() == sub)
                .and_then(|n| n.parent().map(str::to_string));
            Some(enclosing.unwrap_or_else(|| model.id.clone()))
        }
    }
}

/// Names of the signals that start instances of this model.
pub fn signal_start_names(model: &ProcessModel) -> Vec<String> {
    let mut names: Vec<String> = model
        .nodes
        .iter()
        .filter(|n| matches!(n, NodeDto::StartEvent { parent: None, .. }))
        .filter_map(|n| match n.event() {
            Some(EventDefinitionDto::Signal {
                signal_ref: Some(reference),
                ..
            }) => model
                .signals
                .iter()
                .find(|s| s.id.as_deref() == Some(reference.as_str()))
                .and_then(|s| s.name.clone()),
            _ => None,
        })
        .collect();
    names.sort();
    names.dedup();
    names
}

/// A signal start name may only be owned by one process key across the
/// deployment universe. `deployed` lists `(process key, signal name)` of
/// the latest deployed version of every other key.
pub fn validate_signal_universe(
    batch: &[ProcessModel],
    deployed: &[(String, String)],
) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut owners: Vec<(String, String)> = deployed
        .iter()
        .filter(|(key, _)| !batch.iter().any(|m| &m.id == key))
        .cloned()
        .collect();

    for model in batch {
        for name in signal_start_names(model) {
            if let Some((owner, _)) = owners.iter().find(|(key, n)| *n == name && *key != model.id) {
                errors.push(ValidationError::new(
                    "S7",
                    Some(&model.id),
                    format!(
                        "duplicate signal name '{}': signal start event already used by process '{}'",
                        name, owner
                    ),
                ));
            }
            owners.push((model.id.clone(), name));
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::yaml::parse_process_yaml;

    fn messages(errors: &[ValidationError]) -> Vec<String> {
        errors.iter().map(|e| e.message.clone()).collect()
    }

    fn has(errors: &[ValidationError], needle: &str) -> bool {
        errors.iter().any(|e| e.message.contains(needle))
    }

    fn two_signal_starts() -> ProcessModel {
        ProcessModelBuilder::new("process")
            .signal("alertSignal", "signal")
            .signal_start("start1", "alertSignal")
            .signal_start("start2", "alertSignal")
            .end("end")
            .flow("start1", "end")
            .flow("start2", "end")
            .build()
    }

    #[test]
    fn test_valid_model_passes() {
        let model = ProcessModelBuilder::new("order")
            .signal("alertSignal", "alert")
            .start("start")
            .user_task("review")
            .throw_signal("raise", "alertSignal", false)
            .end("end")
            .sequence(&["start", "review", "raise", "end"])
            .build();
        let errors = validate_model(&model);
        assert!(errors.is_empty(), "unexpected: {:?}", messages(&errors));
    }

    #[test]
    fn test_signal_without_id() {
        let yaml = r#"
id: p
signals:
  - name: alert
nodes:
  - kind: StartEvent
    id: start
"#;
        let errors = validate_model(&parse_process_yaml(yaml).unwrap());
        assert!(has(&errors, "signal must have an id"));
    }

    #[test]
    fn test_signal_without_name() {
        let yaml = r#"
id: p
signals:
  - id: alertSignal
nodes:
  - kind: StartEvent
    id: start
"#;
        let errors = validate_model(&parse_process_yaml(yaml).unwrap());
        assert!(has(&errors, "signal with id 'alertSignal' has no name"));
    }

    #[test]
    fn test_duplicate_signal_declaration() {
        let model = ProcessModelBuilder::new("p")
            .signal("a", "alert")
            .signal("b", "alert")
            .start("start")
            .build();
        let errors = validate_model(&model);
        assert!(has(&errors, "duplicate signal name 'alert'"));
    }

    #[test]
    fn test_missing_signal_ref() {
        let model = ProcessModelBuilder::new("p")
            .start("start")
            .node(NodeDto::IntermediateThrowEvent {
                id: "raise".into(),
                parent: None,
                event: Some(EventDefinitionDto::Signal {
                    signal_ref: None,
                    is_async: false,
                }),
            })
            .flow("start", "raise")
            .build();
        let errors = validate_model(&model);
        assert!(has(
            &errors,
            "signalEventDefinition does not have required property 'signalRef'"
        ));
        assert_eq!(errors[0].element_id.as_deref(), Some("raise"));
    }

    #[test]
    fn test_unknown_signal_ref() {
        let model = ProcessModelBuilder::new("p")
            .start("start")
            .catch_signal("wait", "nope")
            .flow("start", "wait")
            .build();
        let errors = validate_model(&model);
        assert!(errors.iter().any(|e| e.rule == "S5"));
    }

    #[test]
    fn test_two_signal_starts_same_name() {
        let errors = validate_model(&two_signal_starts());
        assert!(has(
            &errors,
            "Cannot have more than one signal event subscription with name 'signal' for scope 'process'"
        ));
    }

    #[test]
    fn test_interrupting_event_subprocesses_same_name() {
        let model = ProcessModelBuilder::new("process")
            .signal("alertSignal", "alert")
            .start("start")
            .user_task("task")
            .end("end")
            .sequence(&["start", "task", "end"])
            .event_subprocess("esp1")
            .event_subprocess("esp2")
            .within("esp1")
            .event_start("esp1_start", EventDefinitionDto::signal("alertSignal"), true)
            .end("esp1_end")
            .flow("esp1_start", "esp1_end")
            .within("esp2")
            .event_start("esp2_start", EventDefinitionDto::signal("alertSignal"), true)
            .end("esp2_end")
            .flow("esp2_start", "esp2_end")
            .build();
        let errors = validate_model(&model);
        assert!(has(
            &errors,
            "Cannot have more than one signal event subscription with name 'alert' for scope 'process'"
        ));
    }

    #[test]
    fn test_non_interrupting_event_subprocesses_may_share_a_name() {
        let model = ProcessModelBuilder::new("process")
            .signal("alertSignal", "alert")
            .start("start")
            .user_task("task")
            .end("end")
            .sequence(&["start", "task", "end"])
            .event_subprocess("esp1")
            .event_subprocess("esp2")
            .within("esp1")
            .event_start("esp1_start", EventDefinitionDto::signal("alertSignal"), false)
            .end("esp1_end")
            .flow("esp1_start", "esp1_end")
            .within("esp2")
            .event_start("esp2_start", EventDefinitionDto::signal("alertSignal"), false)
            .end("esp2_end")
            .flow("esp2_start", "esp2_end")
            .build();
        let errors = validate_model(&model);
        assert!(errors.is_empty(), "unexpected: {:?}", messages(&errors));
    }

    #[test]
    fn test_message_rules_mirror_signal_rules() {
        let yaml = r#"
id: p
messages:
  - name: orphan
  - id: m1
nodes:
  - kind: StartEvent
    id: start
  - kind: IntermediateCatchEvent
    id: wait
    event:
      type: message
edges:
  - from: start
    to: wait
"#;
        let errors = validate_model(&parse_process_yaml(yaml).unwrap());
        assert!(has(&errors, "message must have an id"));
        assert!(has(&errors, "message with id 'm1' has no name"));
        assert!(has(
            &errors,
            "messageEventDefinition does not have required property 'messageRef'"
        ));
    }

    #[test]
    fn test_structural_rules() {
        let model = ProcessModelBuilder::new("p")
            .start("start")
            .start("start")
            .exclusive_gateway("gw")
            .end("a")
            .end("b")
            .flow("start", "gw")
            .default_flow("gw", "a")
            .default_flow("gw", "b")
            .flow("gw", "ghost")
            .node(NodeDto::IntermediateThrowEvent {
                id: "raise".into(),
                parent: None,
                event: None,
            })
            .node(NodeDto::StartEvent {
                id: "timer_start".into(),
                parent: None,
                event: Some(EventDefinitionDto::Timer { duration_ms: 10 }),
                interrupting: true,
            })
            .build();
        let rules: HashSet<String> = validate_model(&model).into_iter().map(|e| e.rule).collect();
        for rule in ["V1", "V3", "V8", "V9", "V11"] {
            assert!(rules.contains(rule), "missing {rule} in {rules:?}");
        }
    }

    #[test]
    fn test_timer_duration_must_fit_a_timestamp() {
        let at_limit = ProcessModelBuilder::new("p")
            .start("start")
            .catch_timer("wait", MAX_TIMER_DURATION_MS)
            .end("end")
            .sequence(&["start", "wait", "end"])
            .build();
        assert!(validate_model(&at_limit).is_empty());

        let beyond = ProcessModelBuilder::new("p")
            .start("start")
            .catch_timer("wait", u64::MAX)
            .end("end")
            .sequence(&["start", "wait", "end"])
            .build();
        let errors = validate_model(&beyond);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].rule, "V12");
        assert_eq!(errors[0].element_id.as_deref(), Some("wait"));
    }

    #[test]
    fn test_event_subprocess_shape() {
        let model = ProcessModelBuilder::new("p")
            .start("start")
            .end("end")
            .flow("start", "end")
            .event_subprocess("esp")
            .flow("end", "esp")
            .within("esp")
            .start("esp_start")
            .build();
        let errors = validate_model(&model);
        assert_eq!(errors.iter().filter(|e| e.rule == "V7").count(), 2);
    }

    #[test]
    fn test_flow_across_scopes_rejected() {
        let model = ProcessModelBuilder::new("p")
            .start("start")
            .subprocess("sub")
            .end("end")
            .sequence(&["start", "sub", "end"])
            .within("sub")
            .start("sub_start")
            .end("sub_end")
            .flow("sub_start", "sub_end")
            .flow("sub_end", "end")
            .build();
        let errors = validate_model(&model);
        assert!(errors.iter().any(|e| e.rule == "V4"));
    }

    #[test]
    fn test_universe_rule_rejects_other_key() {
        let model = ProcessModelBuilder::new("second")
            .signal("s", "alert")
            .signal_start("start", "s")
            .end("end")
            .flow("start", "end")
            .build();
        let deployed = vec![("first".to_string(), "alert".to_string())];
        let errors = validate_signal_universe(&[model.clone()], &deployed);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("duplicate signal name 'alert'"));

        // A new version of the owning key is fine.
        let redeploy = vec![("second".to_string(), "alert".to_string())];
        assert!(validate_signal_universe(&[model], &redeploy).is_empty());
    }

    #[test]
    fn test_universe_rule_within_one_batch() {
        let a = ProcessModelBuilder::new("a")
            .signal("s", "go")
            .signal_start("start", "s")
            .build();
        let mut b = a.clone();
        b.id = "b".into();
        let errors = validate_signal_universe(&[a, b], &[]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].element_id.as_deref(), Some("b"));
    }
}

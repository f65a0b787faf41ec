use super::dto::*;
use crate::definition::*;
use crate::error::EngineError;
use crate::types::DefinitionRecord;
use std::collections::HashMap;
use uuid::Uuid;

/// Build the immutable graph of a deployed definition from its record.
pub fn definition_from_record(record: &DefinitionRecord) -> Result<ProcessDefinition, EngineError> {
    build_definition(
        &record.id,
        record.version,
        record.deployment_id,
        record.suspended,
        &record.model,
    )
}

/// Convert a validated ProcessModel to a ProcessDefinition graph.
///
/// The model is expected to have passed `validate_model()`. References that
/// still fail to resolve here indicate a corrupt record and are reported as
/// configuration errors naming the offending element.
pub fn build_definition(
    id: &str,
    version: u32,
    deployment_id: Uuid,
    suspended: bool,
    model: &ProcessModel,
) -> Result<ProcessDefinition, EngineError> {
    let signal_names: HashMap<&str, &str> = model
        .signals
        .iter()
        .filter_map(|s| Some((s.id.as_deref()?, s.name.as_deref()?)))
        .collect();
    let message_names: HashMap<&str, &str> = model
        .messages
        .iter()
        .filter_map(|m| Some((m.id.as_deref()?, m.name.as_deref()?)))
        .collect();

    let resolve = |node_id: &str, event: &EventDefinitionDto| -> Result<EventTrigger, EngineError> {
        match event {
            EventDefinitionDto::Signal { signal_ref, .. } => {
                let event_name = signal_ref
                    .as_deref()
                    .and_then(|r| signal_names.get(r))
                    .ok_or_else(|| {
                        EngineError::Configuration(format!(
                            "{} in {}: unresolved signal reference",
                            node_id, id
                        ))
                    })?;
                Ok(EventTrigger::Signal {
                    event_name: event_name.to_string(),
                })
            }
            EventDefinitionDto::Message { message_ref } => {
                let event_name = message_ref
                    .as_deref()
                    .and_then(|r| message_names.get(r))
                    .ok_or_else(|| {
                        EngineError::Configuration(format!(
                            "{} in {}: unresolved message reference",
                            node_id, id
                        ))
                    })?;
                Ok(EventTrigger::Message {
                    event_name: event_name.to_string(),
                })
            }
            EventDefinitionDto::Timer { duration_ms } => Ok(EventTrigger::Timer {
                duration_ms: *duration_ms,
            }),
        }
    };

    let mut graph = petgraph::graph::DiGraph::new();
    let mut index = HashMap::new();

    // 1. Nodes
    for node in &model.nodes {
        let kind = match node {
            NodeDto::StartEvent {
                id: node_id,
                event,
                interrupting,
                ..
            } => ActivityKind::StartEvent {
                trigger: event.as_ref().map(|e| resolve(node_id, e)).transpose()?,
                interrupting: *interrupting,
            },

            NodeDto::EndEvent { terminate, .. } => ActivityKind::EndEvent {
                terminate: *terminate,
            },

            NodeDto::UserTask { .. } => ActivityKind::UserTask,

            NodeDto::ServiceTask { outputs, .. } => ActivityKind::ServiceTask {
                outputs: outputs.clone(),
            },

            NodeDto::ExclusiveGateway { .. } => ActivityKind::ExclusiveGateway,

            NodeDto::ParallelGateway { .. } => ActivityKind::ParallelGateway,

            NodeDto::IntermediateCatchEvent {
                id: node_id, event, ..
            } => {
                let event = event.as_ref().ok_or_else(|| {
                    EngineError::Configuration(format!("{} in {}: catch event without definition", node_id, id))
                })?;
                ActivityKind::IntermediateCatchEvent {
                    trigger: resolve(node_id, event)?,
                }
            }

            NodeDto::IntermediateThrowEvent {
                id: node_id, event, ..
            } => {
                let is_async = matches!(event, Some(EventDefinitionDto::Signal { is_async: true, .. }));
                match event.as_ref().map(|e| resolve(node_id, e)).transpose()? {
                    Some(EventTrigger::Signal { event_name }) => {
                        ActivityKind::IntermediateThrowEvent {
                            event_name,
                            is_async,
                        }
                    }
                    _ => {
                        return Err(EngineError::Configuration(format!(
                            "{} in {}: throw event must declare a signal",
                            node_id, id
                        )))
                    }
                }
            }

            NodeDto::SubProcess {
                triggered_by_event, ..
            } => ActivityKind::SubProcess {
                triggered_by_event: *triggered_by_event,
            },
        };

        let idx = graph.add_node(Activity {
            id: node.id().to_string(),
            parent: node.parent().map(str::to_string),
            kind,
        });
        index.insert(node.id().to_string(), idx);
    }

    // 2. Edges, in declaration order
    for edge in &model.edges {
        let (Some(from), Some(to)) = (index.get(&edge.from), index.get(&edge.to)) else {
            return Err(EngineError::Configuration(format!(
                "{}: sequence flow {} references an unknown node",
                id,
                edge.flow_id()
            )));
        };
        graph.add_edge(
            *from,
            *to,
            SequenceFlow {
                id: edge.flow_id(),
                condition: edge.condition.clone(),
                is_default: edge.is_default,
            },
        );
    }

    Ok(ProcessDefinition {
        id: id.to_string(),
        key: model.id.clone(),
        version,
        deployment_id,
        name: model.name.clone(),
        suspended,
        graph,
        index,
    })
}

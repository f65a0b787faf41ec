//! Immutable process-definition graph.
//!
//! Built once from a deployed model and shared as `Arc<ProcessDefinition>`
//! through the deployment cache. Nothing in here is mutated after build.

use crate::model::dto::VariableCondition;
use crate::types::{EventType, Variables};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::HashMap;
use uuid::Uuid;

/// What starts or resumes an event node.
#[derive(Debug, Clone, PartialEq)]
pub enum EventTrigger {
    Signal { event_name: String },
    Message { event_name: String },
    Timer { duration_ms: u64 },
}

impl EventTrigger {
    pub fn event_type(&self) -> EventType {
        match self {
            EventTrigger::Signal { .. } => EventType::Signal,
            EventTrigger::Message { .. } => EventType::Message,
            EventTrigger::Timer { .. } => EventType::Timer,
        }
    }

    /// Subscription name. Timers are keyed by their activity id.
    pub fn event_name(&self, activity_id: &str) -> String {
        match self {
            EventTrigger::Signal { event_name } | EventTrigger::Message { event_name } => {
                event_name.clone()
            }
            EventTrigger::Timer { .. } => activity_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActivityKind {
    StartEvent {
        trigger: Option<EventTrigger>,
        interrupting: bool,
    },
    EndEvent {
        terminate: bool,
    },
    UserTask,
    ServiceTask {
        outputs: Variables,
    },
    ExclusiveGateway,
    ParallelGateway,
    IntermediateCatchEvent {
        trigger: EventTrigger,
    },
    IntermediateThrowEvent {
        event_name: String,
        is_async: bool,
    },
    SubProcess {
        triggered_by_event: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    pub id: String,
    /// Enclosing sub-process, `None` at process level.
    pub parent: Option<String>,
    pub kind: ActivityKind,
}

impl Activity {
    pub fn is_scope(&self) -> bool {
        matches!(self.kind, ActivityKind::SubProcess { .. })
    }

    pub fn is_event_subprocess(&self) -> bool {
        matches!(
            self.kind,
            ActivityKind::SubProcess {
                triggered_by_event: true
            }
        )
    }

    pub fn trigger(&self) -> Option<&EventTrigger> {
        match &self.kind {
            ActivityKind::StartEvent { trigger, .. } => trigger.as_ref(),
            ActivityKind::IntermediateCatchEvent { trigger } => Some(trigger),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SequenceFlow {
    pub id: String,
    pub condition: Option<VariableCondition>,
    pub is_default: bool,
}

#[derive(Debug)]
pub struct ProcessDefinition {
    pub id: String,
    pub key: String,
    pub version: u32,
    pub deployment_id: Uuid,
    pub name: Option<String>,
    pub suspended: bool,
    pub(crate) graph: DiGraph<Activity, SequenceFlow>,
    pub(crate) index: HashMap<String, NodeIndex>,
}

impl ProcessDefinition {
    pub fn find_activity(&self, activity_id: &str) -> Option<&Activity> {
        self.index.get(activity_id).map(|idx| &self.graph[*idx])
    }

    pub fn activities(&self) -> impl Iterator<Item = &Activity> {
        self.graph.node_weights()
    }

    /// Outgoing flows in declaration order.
    pub fn outgoing(&self, activity_id: &str) -> Vec<(&SequenceFlow, &Activity)> {
        let Some(idx) = self.index.get(activity_id) else {
            return Vec::new();
        };
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(*idx, Direction::Outgoing)
            .collect();
        edges.sort_by_key(|e| e.id().index());
        edges
            .into_iter()
            .map(|e| (e.weight(), &self.graph[e.target()]))
            .collect()
    }

    pub fn incoming_count(&self, activity_id: &str) -> usize {
        self.index
            .get(activity_id)
            .map(|idx| self.graph.edges_directed(*idx, Direction::Incoming).count())
            .unwrap_or(0)
    }

    /// The none start event of a scope (`None` = process level).
    pub fn initial(&self, scope: Option<&str>) -> Option<&Activity> {
        self.activities().find(|a| {
            a.parent.as_deref() == scope
                && matches!(a.kind, ActivityKind::StartEvent { trigger: None, .. })
        })
    }

    /// Triggered start events at process level; these become start
    /// subscriptions at deploy time.
    pub fn triggered_start_events(&self) -> Vec<&Activity> {
        let mut starts: Vec<&Activity> = self
            .activities()
            .filter(|a| {
                a.parent.is_none()
                    && matches!(a.kind, ActivityKind::StartEvent { trigger: Some(_), .. })
            })
            .collect();
        starts.sort_by(|a, b| a.id.cmp(&b.id));
        starts
    }

    /// Start events of the event sub-processes directly inside `scope`.
    /// Their subscriptions are owned by the scope execution.
    pub fn event_subprocess_starts(&self, scope: Option<&str>) -> Vec<&Activity> {
        let mut starts: Vec<&Activity> = self
            .activities()
            .filter(|a| a.is_event_subprocess() && a.parent.as_deref() == scope)
            .filter_map(|sub| {
                self.activities().find(|a| {
                    a.parent.as_deref() == Some(sub.id.as_str())
                        && matches!(a.kind, ActivityKind::StartEvent { trigger: Some(_), .. })
                })
            })
            .collect();
        starts.sort_by(|a, b| a.id.cmp(&b.id));
        starts
    }
}

#[cfg(test)]
mod tests {
    use crate::model::build::build_definition;
    use crate::model::dto::ProcessModelBuilder;
    use crate::model::dto::EventDefinitionDto;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_outgoing_keeps_declaration_order() {
        let model = ProcessModelBuilder::new("p")
            .start("start")
            .exclusive_gateway("gw")
            .end("c")
            .end("a")
            .end("b")
            .flow("start", "gw")
            .conditional_flow("gw", "c", "x", json!(1))
            .conditional_flow("gw", "a", "x", json!(2))
            .default_flow("gw", "b")
            .build();
        let def = build_definition("p:1:x", 1, Uuid::nil(), false, &model).unwrap();
        let targets: Vec<&str> = def.outgoing("gw").iter().map(|(_, a)| a.id.as_str()).collect();
        assert_eq!(targets, vec!["c", "a", "b"]);
        assert_eq!(def.incoming_count("gw"), 1);
        assert!(def.outgoing("missing").is_empty());
    }

    #[test]
    fn test_scopes_and_event_subprocess_starts() {
        let model = ProcessModelBuilder::new("p")
            .signal("s", "alert")
            .start("start")
            .subprocess("sub")
            .end("end")
            .sequence(&["start", "sub", "end"])
            .event_subprocess("esp")
            .within("sub")
            .start("sub_start")
            .end("sub_end")
            .flow("sub_start", "sub_end")
            .within("esp")
            .event_start("esp_start", EventDefinitionDto::signal("s"), true)
            .end("esp_end")
            .flow("esp_start", "esp_end")
            .build();
        let def = build_definition("p:1:x", 1, Uuid::nil(), false, &model).unwrap();
        assert_eq!(def.initial(None).unwrap().id, "start");
        assert_eq!(def.initial(Some("sub")).unwrap().id, "sub_start");
        let starts = def.event_subprocess_starts(None);
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].id, "esp_start");
        assert!(def.event_subprocess_starts(Some("sub")).is_empty());
        assert!(def.find_activity("sub").unwrap().is_scope());
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Helper defaults for serde ──

fn default_true() -> bool {
    true
}

fn is_false(v: &bool) -> bool {
    !v
}

fn is_true(v: &bool) -> bool {
    *v
}

// ── Top-level model ──

/// Authoring model of one process. `id` is the process key; versions are
/// assigned at deploy time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessModel {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signals: Vec<SignalDecl>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<MessageDecl>,
    pub nodes: Vec<NodeDto>,
    #[serde(default)]
    pub edges: Vec<EdgeDto>,
}

/// Top-level `<signal>` declaration. Both fields are optional here so that
/// validation can report a missing id or name instead of a parse error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDecl {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDecl {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

// ── Edge ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<VariableCondition>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_default: bool,
}

impl EdgeDto {
    pub fn new(from: &str, to: &str) -> Self {
        Self {
            id: None,
            from: from.to_string(),
            to: to.to_string(),
            condition: None,
            is_default: false,
        }
    }

    /// Effective flow id: the explicit one, else `from->to`.
    pub fn flow_id(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("{}->{}", self.from, self.to))
    }
}

/// Sequence-flow guard: take the edge when `variable == equals`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableCondition {
    pub variable: String,
    pub equals: serde_json::Value,
}

// ── Event definitions ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventDefinitionDto {
    Signal {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signal_ref: Option<String>,
        /// Throw only: deliver to catching executions through the job queue.
        #[serde(default, rename = "async", skip_serializing_if = "is_false")]
        is_async: bool,
    },
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_ref: Option<String>,
    },
    Timer {
        duration_ms: u64,
    },
}

impl EventDefinitionDto {
    pub fn signal(signal_ref: &str) -> Self {
        EventDefinitionDto::Signal {
            signal_ref: Some(signal_ref.to_string()),
            is_async: false,
        }
    }

    pub fn message(message_ref: &str) -> Self {
        EventDefinitionDto::Message {
            message_ref: Some(message_ref.to_string()),
        }
    }
}

// ── Node (tagged enum) ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum NodeDto {
    StartEvent {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event: Option<EventDefinitionDto>,
        /// Only meaningful for the start event of an event sub-process.
        #[serde(default = "default_true", skip_serializing_if = "is_true")]
        interrupting: bool,
    },
    EndEvent {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
        #[serde(default, skip_serializing_if = "is_false")]
        terminate: bool,
    },
    UserTask {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
    },
    ServiceTask {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
        /// Variables written when the task runs.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        outputs: BTreeMap<String, serde_json::Value>,
    },
    ExclusiveGateway {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
    },
    ParallelGateway {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
    },
    IntermediateCatchEvent {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event: Option<EventDefinitionDto>,
    },
    IntermediateThrowEvent {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event: Option<EventDefinitionDto>,
    },
    SubProcess {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
        #[serde(default, skip_serializing_if = "is_false")]
        triggered_by_event: bool,
    },
}

impl NodeDto {
    pub fn id(&self) -> &str {
        match self {
            NodeDto::StartEvent { id, .. }
            | NodeDto::EndEvent { id, .. }
            | NodeDto::UserTask { id, .. }
            | NodeDto::ServiceTask { id, .. }
            | NodeDto::ExclusiveGateway { id, .. }
            | NodeDto::ParallelGateway { id, .. }
            | NodeDto::IntermediateCatchEvent { id, .. }
            | NodeDto::IntermediateThrowEvent { id, .. }
            | NodeDto::SubProcess { id, .. } => id,
        }
    }

    /// Id of the enclosing sub-process, `None` at process level.
    pub fn parent(&self) -> Option<&str> {
        match self {
            NodeDto::StartEvent { parent, .. }
            | NodeDto::EndEvent { parent, .. }
            | NodeDto::UserTask { parent, .. }
            | NodeDto::ServiceTask { parent, .. }
            | NodeDto::ExclusiveGateway { parent, .. }
            | NodeDto::ParallelGateway { parent, .. }
            | NodeDto::IntermediateCatchEvent { parent, .. }
            | NodeDto::IntermediateThrowEvent { parent, .. }
            | NodeDto::SubProcess { parent, .. } => parent.as_deref(),
        }
    }

    pub fn event(&self) -> Option<&EventDefinitionDto> {
        match self {
            NodeDto::StartEvent { event, .. }
            | NodeDto::IntermediateCatchEvent { event, .. }
            | NodeDto::IntermediateThrowEvent { event, .. } => event.as_ref(),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeDto::StartEvent { .. } => "StartEvent",
            NodeDto::EndEvent { .. } => "EndEvent",
            NodeDto::UserTask { .. } => "UserTask",
            NodeDto::ServiceTask { .. } => "ServiceTask",
            NodeDto::ExclusiveGateway { .. } => "ExclusiveGateway",
            NodeDto::ParallelGateway { .. } => "ParallelGateway",
            NodeDto::IntermediateCatchEvent { .. } => "IntermediateCatchEvent",
            NodeDto::IntermediateThrowEvent { .. } => "IntermediateThrowEvent",
            NodeDto::SubProcess { .. } => "SubProcess",
        }
    }
}

// ── Programmatic builder ──

/// Fluent construction of a [`ProcessModel`], mostly for tests and
/// embedding code that does not go through YAML.
#[derive(Debug, Clone)]
pub struct ProcessModelBuilder {
    model: ProcessModel,
    scope: Option<String>,
}

impl ProcessModelBuilder {
    pub fn new(key: &str) -> Self {
        Self {
            model: ProcessModel {
                id: key.to_string(),
                name: None,
                signals: Vec::new(),
                messages: Vec::new(),
                nodes: Vec::new(),
                edges: Vec::new(),
            },
            scope: None,
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.model.name = Some(name.to_string());
        self
    }

    pub fn signal(mut self, id: &str, name: &str) -> Self {
        self.model.signals.push(SignalDecl {
            id: Some(id.to_string()),
            name: Some(name.to_string()),
        });
        self
    }

    pub fn message(mut self, id: &str, name: &str) -> Self {
        self.model.messages.push(MessageDecl {
            id: Some(id.to_string()),
            name: Some(name.to_string()),
        });
        self
    }

    /// Subsequent nodes are placed inside the given sub-process.
    pub fn within(mut self, subprocess_id: &str) -> Self {
        self.scope = Some(subprocess_id.to_string());
        self
    }

    /// Subsequent nodes are placed at process level.
    pub fn top_level(mut self) -> Self {
        self.scope = None;
        self
    }

    pub fn node(mut self, node: NodeDto) -> Self {
        self.model.nodes.push(node);
        self
    }

    pub fn start(self, id: &str) -> Self {
        let parent = self.scope.clone();
        self.node(NodeDto::StartEvent {
            id: id.to_string(),
            parent,
            event: None,
            interrupting: true,
        })
    }

    pub fn signal_start(self, id: &str, signal_ref: &str) -> Self {
        let parent = self.scope.clone();
        self.node(NodeDto::StartEvent {
            id: id.to_string(),
            parent,
            event: Some(EventDefinitionDto::signal(signal_ref)),
            interrupting: true,
        })
    }

    pub fn message_start(self, id: &str, message_ref: &str) -> Self {
        let parent = self.scope.clone();
        self.node(NodeDto::StartEvent {
            id: id.to_string(),
            parent,
            event: Some(EventDefinitionDto::message(message_ref)),
            interrupting: true,
        })
    }

    /// Start event of an event sub-process.
    pub fn event_start(self, id: &str, event: EventDefinitionDto, interrupting: bool) -> Self {
        let parent = self.scope.clone();
        self.node(NodeDto::StartEvent {
            id: id.to_string(),
            parent,
            event: Some(event),
            interrupting,
        })
    }

    pub fn end(self, id: &str) -> Self {
        let parent = self.scope.clone();
        self.node(NodeDto::EndEvent {
            id: id.to_string(),
            parent,
            terminate: false,
        })
    }

    pub fn terminate_end(self, id: &str) -> Self {
        let parent = self.scope.clone();
        self.node(NodeDto::EndEvent {
            id: id.to_string(),
            parent,
            terminate: true,
        })
    }

    pub fn user_task(self, id: &str) -> Self {
        let parent = self.scope.clone();
        self.node(NodeDto::UserTask {
            id: id.to_string(),
            parent,
        })
    }

    pub fn service_task(self, id: &str, outputs: &[(&str, serde_json::Value)]) -> Self {
        let parent = self.scope.clone();
        self.node(NodeDto::ServiceTask {
            id: id.to_string(),
            parent,
            outputs: outputs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        })
    }

    pub fn exclusive_gateway(self, id: &str) -> Self {
        let parent = self.scope.clone();
        self.node(NodeDto::ExclusiveGateway {
            id: id.to_string(),
            parent,
        })
    }

    pub fn parallel_gateway(self, id: &str) -> Self {
        let parent = self.scope.clone();
        self.node(NodeDto::ParallelGateway {
            id: id.to_string(),
            parent,
        })
    }

    pub fn catch_signal(self, id: &str, signal_ref: &str) -> Self {
        let parent = self.scope.clone();
        self.node(NodeDto::IntermediateCatchEvent {
            id: id.to_string(),
            parent,
            event: Some(EventDefinitionDto::signal(signal_ref)),
        })
    }

    pub fn catch_message(self, id: &str, message_ref: &str) -> Self {
        let parent = self.scope.clone();
        self.node(NodeDto::IntermediateCatchEvent {
            id: id.to_string(),
            parent,
            event: Some(EventDefinitionDto::message(message_ref)),
        })
    }

    pub fn catch_timer(self, id: &str, duration_ms: u64) -> Self {
        let parent = self.scope.clone();
        self.node(NodeDto::IntermediateCatchEvent {
            id: id.to_string(),
            parent,
            event: Some(EventDefinitionDto::Timer { duration_ms }),
        })
    }

    pub fn throw_signal(self, id: &str, signal_ref: &str, is_async: bool) -> Self {
        let parent = self.scope.clone();
        self.node(NodeDto::IntermediateThrowEvent {
            id: id.to_string(),
            parent,
            event: Some(EventDefinitionDto::Signal {
                signal_ref: Some(signal_ref.to_string()),
                is_async,
            }),
        })
    }

    pub fn subprocess(self, id: &str) -> Self {
        let parent = self.scope.clone();
        self.node(NodeDto::SubProcess {
            id: id.to_string(),
            parent,
            triggered_by_event: false,
        })
    }

    pub fn event_subprocess(self, id: &str) -> Self {
        let parent = self.scope.clone();
        self.node(NodeDto::SubProcess {
            id: id.to_string(),
            parent,
            triggered_by_event: true,
        })
    }

    pub fn flow(mut self, from: &str, to: &str) -> Self {
        self.model.edges.push(EdgeDto::new(from, to));
        self
    }

    /// Chain of unconditional flows through the given node ids.
    pub fn sequence(mut self, ids: &[&str]) -> Self {
        for pair in ids.windows(2) {
            self.model.edges.push(EdgeDto::new(pair[0], pair[1]));
        }
        self
    }

    pub fn conditional_flow(mut self, from: &str, to: &str, variable: &str, equals: serde_json::Value) -> Self {
        let mut edge = EdgeDto::new(from, to);
        edge.condition = Some(VariableCondition {
            variable: variable.to_string(),
            equals,
        });
        self.model.edges.push(edge);
        self
    }

    pub fn default_flow(mut self, from: &str, to: &str) -> Self {
        let mut edge = EdgeDto::new(from, to);
        edge.is_default = true;
        self.model.edges.push(edge);
        self
    }

    pub fn build(self) -> ProcessModel {
        self.model
    }
}

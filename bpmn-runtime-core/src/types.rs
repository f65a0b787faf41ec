use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

// ─── Scalar aliases ───────────────────────────────────────────

/// Epoch milliseconds (UTC).
pub type Timestamp = i64;

/// Optimistic-locking version counter carried by every persisted entity.
pub type Revision = u32;

/// Process variables are opaque JSON values; the engine only compares them
/// for equality when evaluating sequence-flow conditions.
pub type Variables = BTreeMap<String, serde_json::Value>;

// ─── Execution ────────────────────────────────────────────────

/// One node of control-flow state inside a process instance.
///
/// Executions form a tree addressed by id: `parent_id` and `child_ids` are
/// plain id-valued fields, never owning pointers, so cascades are graph
/// walks over the entity store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    /// Id of the root execution of this tree.
    pub process_instance_id: Uuid,
    pub process_definition_id: String,
    pub parent_id: Option<Uuid>,
    pub child_ids: Vec<Uuid>,
    /// Current position in the activity graph. `None` for a pure scope
    /// container whose work is carried by its children.
    pub activity_id: Option<String>,
    pub active: bool,
    pub ended: bool,
    pub canceled: bool,
    /// Sibling of a parallel fork under a common scope parent.
    pub concurrent: bool,
    /// Owns local variables and event sub-process subscriptions.
    pub scope: bool,
    pub variables: Variables,
    pub business_key: Option<String>,
    pub revision: Revision,
}

impl Execution {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Neither ended nor canceled. Containers that only hold children
    /// count as live even though `active` is false.
    pub fn is_live(&self) -> bool {
        !self.ended && !self.canceled
    }

    pub fn is_at(&self, activity_id: &str) -> bool {
        self.activity_id.as_deref() == Some(activity_id)
    }
}

// ─── Event subscriptions ──────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Signal,
    Message,
    Timer,
    Compensate,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Signal => "signal",
            Self::Message => "message",
            Self::Timer => "timer",
            Self::Compensate => "compensate",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A durable record of interest in an event.
///
/// Catch subscriptions carry `execution_id`; start subscriptions carry no
/// execution and store the target process-definition id in `configuration`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventSubscription {
    pub id: Uuid,
    pub event_type: EventType,
    pub event_name: String,
    pub execution_id: Option<Uuid>,
    pub process_instance_id: Option<Uuid>,
    /// The event element in the definition graph.
    pub activity_id: String,
    /// Opaque. Process-definition id for start subscriptions, due date
    /// (epoch ms) for timer catch subscriptions.
    pub configuration: Option<String>,
    pub created_at: Timestamp,
    pub revision: Revision,
}

impl EventSubscription {
    pub fn is_start(&self) -> bool {
        self.execution_id.is_none()
    }

    pub fn is_catch(&self) -> bool {
        self.execution_id.is_some()
    }

    /// Due date of a timer catch subscription.
    pub fn due_at(&self) -> Option<Timestamp> {
        match self.event_type {
            EventType::Timer => self.configuration.as_deref()?.parse().ok(),
            _ => None,
        }
    }
}

/// Who a new subscription belongs to.
#[derive(Clone, Debug, PartialEq)]
pub enum SubscriptionTarget {
    /// Catch subscription owned by a waiting execution.
    Execution(Uuid),
    /// Start subscription; `configuration` names the process definition.
    Start { configuration: Option<String> },
}

// ─── Jobs (deferred continuations) ────────────────────────────

/// A queued event delivery, executed later by the job executor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub execution_id: Option<Uuid>,
    pub process_instance_id: Option<Uuid>,
    pub payload: Option<serde_json::Value>,
    pub retries: u32,
    pub due_at: Timestamp,
    pub lock_owner: Option<String>,
    pub lock_expires_at: Option<Timestamp>,
    pub exception_message: Option<String>,
    pub created_at: Timestamp,
    pub revision: Revision,
}

impl Job {
    pub fn is_acquirable(&self, now: Timestamp) -> bool {
        self.retries > 0
            && self.due_at <= now
            && self.lock_expires_at.map_or(true, |expiry| expiry <= now)
    }
}

// ─── Deployed definitions ─────────────────────────────────────

/// Persisted form of a deployed process definition. The deployment cache
/// rebuilds the immutable graph from `model` on a miss.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DefinitionRecord {
    pub id: String,
    pub key: String,
    pub version: u32,
    pub deployment_id: Uuid,
    pub name: Option<String>,
    pub suspended: bool,
    /// Hex SHA-256 of the canonical model.
    pub checksum: String,
    pub model: crate::model::dto::ProcessModel,
    pub deployed_at: Timestamp,
    pub revision: Revision,
}

/// Ownership of a process-level signal start name.
///
/// Keyed by signal name and held by the process key whose latest version
/// starts on that signal. Every deployment that registers or releases a
/// signal start writes the claim, so two deployments racing for one name
/// collide on its revision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalStartClaim {
    pub signal_name: String,
    pub process_key: String,
    pub revision: Revision,
}

impl SignalStartClaim {
    pub fn new(signal_name: &str, process_key: &str) -> Self {
        Self {
            signal_name: signal_name.to_string(),
            process_key: process_key.to_string(),
            revision: 0,
        }
    }
}

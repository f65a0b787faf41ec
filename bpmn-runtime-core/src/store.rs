use crate::error::StoreError;
use crate::events::{EventLogQuery, RecordedEvent, RuntimeEvent};
use crate::types::*;
use async_trait::async_trait;
use std::fmt;
use uuid::Uuid;

/// A persisted, version-checked entity.
pub trait Entity: Clone + Send + Sync + 'static {
    type Id: Ord + Clone + fmt::Display + Send + Sync;

    /// Entity name used in conflict and not-found messages.
    const KIND: &'static str;

    fn id(&self) -> Self::Id;
    fn revision(&self) -> Revision;
    fn set_revision(&mut self, revision: Revision);
}

impl Entity for Execution {
    type Id = Uuid;
    const KIND: &'static str = "Execution";

    fn id(&self) -> Uuid {
        self.id
    }
    fn revision(&self) -> Revision {
        self.revision
    }
    fn set_revision(&mut self, revision: Revision) {
        self.revision = revision;
    }
}

impl Entity for EventSubscription {
    type Id = Uuid;
    const KIND: &'static str = "EventSubscription";

    fn id(&self) -> Uuid {
        self.id
    }
    fn revision(&self) -> Revision {
        self.revision
    }
    fn set_revision(&mut self, revision: Revision) {
        self.revision = revision;
    }
}

impl Entity for Job {
    type Id = Uuid;
    const KIND: &'static str = "Job";

    fn id(&self) -> Uuid {
        self.id
    }
    fn revision(&self) -> Revision {
        self.revision
    }
    fn set_revision(&mut self, revision: Revision) {
        self.revision = revision;
    }
}

impl Entity for SignalStartClaim {
    type Id = String;
    const KIND: &'static str = "SignalStartClaim";

    fn id(&self) -> String {
        self.signal_name.clone()
    }
    fn revision(&self) -> Revision {
        self.revision
    }
    fn set_revision(&mut self, revision: Revision) {
        self.revision = revision;
    }
}

impl Entity for DefinitionRecord {
    type Id = String;
    const KIND: &'static str = "ProcessDefinition";

    fn id(&self) -> String {
        self.id.clone()
    }
    fn revision(&self) -> Revision {
        self.revision
    }
    fn set_revision(&mut self, revision: Revision) {
        self.revision = revision;
    }
}

/// One pending mutation.
///
/// `Update` and `Delete` carry the revision that was read; the store must
/// reject them when the stored revision differs. Inserted rows start at
/// revision 1 and every update increments it.
#[derive(Clone, Debug)]
pub enum EntityOp<T: Entity> {
    Insert(T),
    Update(T),
    Delete { id: T::Id, revision: Revision },
}

impl<T: Entity> EntityOp<T> {
    pub fn id(&self) -> T::Id {
        match self {
            EntityOp::Insert(e) | EntityOp::Update(e) => e.id(),
            EntityOp::Delete { id, .. } => id.clone(),
        }
    }
}

/// Everything one command commits, flushed exactly once.
#[derive(Clone, Debug)]
pub struct ChangeSet {
    pub executions: Vec<EntityOp<Execution>>,
    pub subscriptions: Vec<EntityOp<EventSubscription>>,
    pub jobs: Vec<EntityOp<Job>>,
    pub definitions: Vec<EntityOp<DefinitionRecord>>,
    pub signal_claims: Vec<EntityOp<SignalStartClaim>>,
    /// Events without a sequence number yet: `(instance, occurred_at, event)`.
    pub events: Vec<(Option<Uuid>, Timestamp, RuntimeEvent)>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self {
            executions: Vec::new(),
            subscriptions: Vec::new(),
            jobs: Vec::new(),
            definitions: Vec::new(),
            signal_claims: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
            && self.subscriptions.is_empty()
            && self.jobs.is_empty()
            && self.definitions.is_empty()
            && self.signal_claims.is_empty()
            && self.events.is_empty()
    }

    pub fn creates_jobs(&self) -> bool {
        self.jobs
            .iter()
            .any(|op| matches!(op, EntityOp::Insert(_) | EntityOp::Update(_)))
    }
}

impl Default for ChangeSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Durable, key-addressed storage with optimistic versioning.
///
/// Reads return committed state only. All writes go through [`flush`],
/// which must apply a whole [`ChangeSet`] atomically or nothing at all.
///
/// [`flush`]: EntityStore::flush
#[async_trait]
pub trait EntityStore: Send + Sync {
    // ── Executions ──

    async fn load_execution(&self, id: Uuid) -> Result<Option<Execution>, StoreError>;
    /// Root executions of every instance running the given definition.
    async fn find_process_instances_by_definition(
        &self,
        process_definition_id: &str,
    ) -> Result<Vec<Execution>, StoreError>;

    // ── Event subscriptions ──

    async fn load_subscription(&self, id: Uuid) -> Result<Option<EventSubscription>, StoreError>;
    /// Index lookup by `(event_type, event_name)`; catch and start alike.
    async fn find_subscriptions_by_event(
        &self,
        event_type: EventType,
        event_name: &str,
    ) -> Result<Vec<EventSubscription>, StoreError>;
    async fn find_subscriptions_by_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<EventSubscription>, StoreError>;
    async fn find_subscriptions_by_type(
        &self,
        event_type: EventType,
    ) -> Result<Vec<EventSubscription>, StoreError>;
    /// Start subscriptions whose configuration names the given definition.
    async fn find_start_subscriptions_by_configuration(
        &self,
        configuration: &str,
    ) -> Result<Vec<EventSubscription>, StoreError>;

    // ── Jobs ──

    async fn load_job(&self, id: Uuid) -> Result<Option<Job>, StoreError>;
    async fn find_acquirable_jobs(&self, now: Timestamp, max: usize)
        -> Result<Vec<Job>, StoreError>;
    async fn find_jobs(&self) -> Result<Vec<Job>, StoreError>;

    // ── Definitions ──

    async fn load_definition(&self, id: &str) -> Result<Option<DefinitionRecord>, StoreError>;
    async fn find_definitions_by_key(&self, key: &str) -> Result<Vec<DefinitionRecord>, StoreError>;
    async fn find_definitions_by_deployment(
        &self,
        deployment_id: Uuid,
    ) -> Result<Vec<DefinitionRecord>, StoreError>;
    async fn load_signal_claim(&self, signal_name: &str) -> Result<Option<SignalStartClaim>, StoreError>;

    // ── Event log ──

    async fn read_events(&self, query: &EventLogQuery) -> Result<Vec<RecordedEvent>, StoreError>;

    // ── Commit ──

    /// Apply all mutations atomically, checking every revision first.
    async fn flush(&self, changes: ChangeSet) -> Result<(), StoreError>;
}

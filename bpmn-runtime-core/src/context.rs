//! The per-attempt unit of work.
//!
//! A `CommandContext` is created fresh for every attempt of a command and
//! passed explicitly to every tree, registry and behavior operation. It
//! caches what it reads, buffers what it writes and turns into exactly one
//! [`ChangeSet`] at commit. Dropping it discards the attempt.

use crate::behavior::agenda::Operation;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::definition::ProcessDefinition;
use crate::deployment::DeploymentCache;
use crate::error::EngineError;
use crate::events::RuntimeEvent;
use crate::model::build::definition_from_record;
use crate::store::{ChangeSet, Entity, EntityOp, EntityStore};
use crate::types::*;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

/// Long-lived collaborators shared by every command.
pub struct EngineServices {
    pub store: Arc<dyn EntityStore>,
    pub cache: DeploymentCache,
    pub clock: Arc<dyn Clock>,
    pub config: EngineConfig,
    /// Woken after a commit that created jobs.
    pub job_notify: Notify,
}

/// Side effects that must only happen once the flush succeeded.
#[derive(Debug, Clone, PartialEq)]
pub enum AfterCommit {
    EvictDefinition(String),
    NotifyJobExecutor,
}

// ─── Entity cache ─────────────────────────────────────────────

enum Slot<T> {
    Clean(T),
    Dirty(T),
    New(T),
    Removed(Revision),
}

/// Identity map over one entity table with read-your-writes lookups.
struct EntityCache<T: Entity> {
    slots: BTreeMap<T::Id, Slot<T>>,
}

impl<T: Entity> EntityCache<T> {
    fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
        }
    }

    /// `Some(None)` when this unit of work removed the entity.
    fn cached(&self, id: &T::Id) -> Option<Option<&T>> {
        self.slots.get(id).map(|slot| match slot {
            Slot::Clean(e) | Slot::Dirty(e) | Slot::New(e) => Some(e),
            Slot::Removed(_) => None,
        })
    }

    fn loaded(&mut self, entity: T) {
        self.slots.entry(entity.id()).or_insert(Slot::Clean(entity));
    }

    /// Re-inserting an id removed in this unit of work turns into an
    /// update of the stored row.
    fn insert(&mut self, mut entity: T) {
        let id = entity.id();
        let slot = match self.slots.remove(&id) {
            Some(Slot::Removed(revision)) => {
                entity.set_revision(revision);
                Slot::Dirty(entity)
            }
            _ => Slot::New(entity),
        };
        self.slots.insert(id, slot);
    }

    fn update(&mut self, entity: T) -> Result<(), EngineError> {
        let id = entity.id();
        let next = match self.slots.get(&id) {
            Some(Slot::New(_)) => Slot::New(entity),
            Some(Slot::Clean(_)) | Some(Slot::Dirty(_)) => Slot::Dirty(entity),
            Some(Slot::Removed(_)) => {
                return Err(EngineError::precondition(format!(
                    "{} '{}' was removed in this unit of work",
                    T::KIND,
                    id
                )))
            }
            None => {
                return Err(EngineError::Internal(format!(
                    "{} '{}' updated without being loaded",
                    T::KIND,
                    id
                )))
            }
        };
        self.slots.insert(id, next);
        Ok(())
    }

    fn remove(&mut self, id: &T::Id) -> Result<(), EngineError> {
        match self.slots.remove(id) {
            Some(Slot::New(_)) => {}
            Some(Slot::Clean(e)) | Some(Slot::Dirty(e)) => {
                self.slots.insert(id.clone(), Slot::Removed(e.revision()));
            }
            Some(Slot::Removed(rev)) => {
                self.slots.insert(id.clone(), Slot::Removed(rev));
            }
            None => {
                return Err(EngineError::Internal(format!(
                    "{} '{}' removed without being loaded",
                    T::KIND,
                    id
                )))
            }
        }
        Ok(())
    }

    /// Overlay this unit of work on committed query results: removed rows
    /// disappear, modified rows are re-checked against `matches`, and rows
    /// created here are added. Ordered by id.
    fn merge(&mut self, committed: Vec<T>, matches: impl Fn(&T) -> bool) -> Vec<T> {
        for entity in committed {
            self.loaded(entity);
        }
        self.slots
            .values()
            .filter_map(|slot| match slot {
                Slot::Clean(e) | Slot::Dirty(e) | Slot::New(e) if matches(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    fn into_ops(self) -> Vec<EntityOp<T>> {
        self.slots
            .into_iter()
            .filter_map(|(id, slot)| match slot {
                Slot::Clean(_) => None,
                Slot::Dirty(e) => Some(EntityOp::Update(e)),
                Slot::New(e) => Some(EntityOp::Insert(e)),
                Slot::Removed(revision) => Some(EntityOp::Delete { id, revision }),
            })
            .collect()
    }
}

// ─── Command context ──────────────────────────────────────────

pub struct CommandContext {
    services: Arc<EngineServices>,
    command_name: &'static str,
    now: Timestamp,
    executions: EntityCache<Execution>,
    subscriptions: EntityCache<EventSubscription>,
    jobs: EntityCache<Job>,
    definitions: EntityCache<DefinitionRecord>,
    signal_claims: EntityCache<SignalStartClaim>,
    events: Vec<(Option<Uuid>, Timestamp, RuntimeEvent)>,
    after_commit: Vec<AfterCommit>,
    pub(crate) agenda: VecDeque<Operation>,
}

impl CommandContext {
    pub fn new(services: Arc<EngineServices>, command_name: &'static str) -> Self {
        let now = services.clock.now_ms();
        Self {
            services,
            command_name,
            now,
            executions: EntityCache::new(),
            subscriptions: EntityCache::new(),
            jobs: EntityCache::new(),
            definitions: EntityCache::new(),
            signal_claims: EntityCache::new(),
            events: Vec::new(),
            after_commit: Vec::new(),
            agenda: VecDeque::new(),
        }
    }

    pub fn command_name(&self) -> &'static str {
        self.command_name
    }

    /// Transaction time, fixed when the attempt started.
    pub fn now(&self) -> Timestamp {
        self.now
    }

    pub fn config(&self) -> &EngineConfig {
        &self.services.config
    }

    fn store(&self) -> &dyn EntityStore {
        self.services.store.as_ref()
    }

    // ── Executions ──

    pub async fn find_execution(&mut self, id: Uuid) -> Result<Option<Execution>, EngineError> {
        if let Some(cached) = self.executions.cached(&id) {
            return Ok(cached.cloned());
        }
        let loaded = self.store().load_execution(id).await?;
        if let Some(execution) = &loaded {
            self.executions.loaded(execution.clone());
        }
        Ok(loaded)
    }

    pub async fn execution(&mut self, id: Uuid) -> Result<Execution, EngineError> {
        self.find_execution(id)
            .await?
            .ok_or_else(|| EngineError::not_found("Execution", id))
    }

    /// Live children of `parent`, in creation order.
    pub async fn children(&mut self, parent: &Execution) -> Result<Vec<Execution>, EngineError> {
        let mut children = Vec::with_capacity(parent.child_ids.len());
        for id in &parent.child_ids {
            if let Some(child) = self.find_execution(*id).await? {
                children.push(child);
            }
        }
        Ok(children)
    }

    pub async fn find_process_instances_by_definition(
        &mut self,
        process_definition_id: &str,
    ) -> Result<Vec<Execution>, EngineError> {
        let committed = self
            .store()
            .find_process_instances_by_definition(process_definition_id)
            .await?;
        Ok(self.executions.merge(committed, |e| {
            e.is_root() && e.process_definition_id == process_definition_id
        }))
    }

    pub fn insert_execution(&mut self, execution: Execution) {
        self.executions.insert(execution);
    }

    pub fn update_execution(&mut self, execution: Execution) -> Result<(), EngineError> {
        self.executions.update(execution)
    }

    pub fn delete_execution(&mut self, id: Uuid) -> Result<(), EngineError> {
        self.executions.remove(&id)
    }

    // ── Event subscriptions ──

    pub async fn find_subscription(&mut self, id: Uuid) -> Result<Option<EventSubscription>, EngineError> {
        if let Some(cached) = self.subscriptions.cached(&id) {
            return Ok(cached.cloned());
        }
        let loaded = self.store().load_subscription(id).await?;
        if let Some(sub) = &loaded {
            self.subscriptions.loaded(sub.clone());
        }
        Ok(loaded)
    }

    pub async fn find_subscriptions_by_event(
        &mut self,
        event_type: EventType,
        event_name: &str,
    ) -> Result<Vec<EventSubscription>, EngineError> {
        let committed = self
            .store()
            .find_subscriptions_by_event(event_type, event_name)
            .await?;
        Ok(self.subscriptions.merge(committed, |s| {
            s.event_type == event_type && s.event_name == event_name
        }))
    }

    pub async fn find_subscriptions_by_execution(
        &mut self,
        execution_id: Uuid,
    ) -> Result<Vec<EventSubscription>, EngineError> {
        let committed = self.store().find_subscriptions_by_execution(execution_id).await?;
        Ok(self
            .subscriptions
            .merge(committed, |s| s.execution_id == Some(execution_id)))
    }

    pub async fn find_subscriptions_by_type(
        &mut self,
        event_type: EventType,
    ) -> Result<Vec<EventSubscription>, EngineError> {
        let committed = self.store().find_subscriptions_by_type(event_type).await?;
        Ok(self.subscriptions.merge(committed, |s| s.event_type == event_type))
    }

    pub async fn find_start_subscriptions_by_configuration(
        &mut self,
        configuration: &str,
    ) -> Result<Vec<EventSubscription>, EngineError> {
        let committed = self
            .store()
            .find_start_subscriptions_by_configuration(configuration)
            .await?;
        Ok(self.subscriptions.merge(committed, |s| {
            s.is_start() && s.configuration.as_deref() == Some(configuration)
        }))
    }

    pub fn insert_subscription(&mut self, subscription: EventSubscription) {
        self.subscriptions.insert(subscription);
    }

    pub fn update_subscription(&mut self, subscription: EventSubscription) -> Result<(), EngineError> {
        self.subscriptions.update(subscription)
    }

    pub fn delete_subscription(&mut self, id: Uuid) -> Result<(), EngineError> {
        self.subscriptions.remove(&id)
    }

    // ── Jobs ──

    pub async fn find_job(&mut self, id: Uuid) -> Result<Option<Job>, EngineError> {
        if let Some(cached) = self.jobs.cached(&id) {
            return Ok(cached.cloned());
        }
        let loaded = self.store().load_job(id).await?;
        if let Some(job) = &loaded {
            self.jobs.loaded(job.clone());
        }
        Ok(loaded)
    }

    pub async fn find_acquirable_jobs(&mut self, max: usize) -> Result<Vec<Job>, EngineError> {
        let now = self.now;
        let committed = self.store().find_acquirable_jobs(now, max).await?;
        let mut jobs = self.jobs.merge(committed, |j| j.is_acquirable(now));
        jobs.sort_by_key(|j| (j.due_at, j.created_at));
        jobs.truncate(max);
        Ok(jobs)
    }

    pub async fn find_jobs(&mut self) -> Result<Vec<Job>, EngineError> {
        let committed = self.store().find_jobs().await?;
        Ok(self.jobs.merge(committed, |_| true))
    }

    pub fn insert_job(&mut self, job: Job) {
        self.jobs.insert(job);
        self.after_commit(AfterCommit::NotifyJobExecutor);
    }

    pub fn update_job(&mut self, job: Job) -> Result<(), EngineError> {
        self.jobs.update(job)
    }

    pub fn delete_job(&mut self, id: Uuid) -> Result<(), EngineError> {
        self.jobs.remove(&id)
    }

    // ── Definitions ──

    pub async fn find_definition_record(&mut self, id: &str) -> Result<Option<DefinitionRecord>, EngineError> {
        let key = id.to_string();
        if let Some(cached) = self.definitions.cached(&key) {
            return Ok(cached.cloned());
        }
        let loaded = self.store().load_definition(id).await?;
        if let Some(record) = &loaded {
            self.definitions.loaded(record.clone());
        }
        Ok(loaded)
    }

    /// Every deployed version of `key`, ascending.
    pub async fn find_definitions_by_key(&mut self, key: &str) -> Result<Vec<DefinitionRecord>, EngineError> {
        let committed = self.store().find_definitions_by_key(key).await?;
        let mut records = self.definitions.merge(committed, |d| d.key == key);
        records.sort_by_key(|d| d.version);
        Ok(records)
    }

    pub async fn find_latest_definition_by_key(
        &mut self,
        key: &str,
    ) -> Result<Option<DefinitionRecord>, EngineError> {
        Ok(self.find_definitions_by_key(key).await?.pop())
    }

    pub async fn find_definitions_by_deployment(
        &mut self,
        deployment_id: Uuid,
    ) -> Result<Vec<DefinitionRecord>, EngineError> {
        let committed = self.store().find_definitions_by_deployment(deployment_id).await?;
        Ok(self
            .definitions
            .merge(committed, |d| d.deployment_id == deployment_id))
    }

    pub fn insert_definition_record(&mut self, record: DefinitionRecord) {
        self.definitions.insert(record);
    }

    pub fn update_definition_record(&mut self, record: DefinitionRecord) -> Result<(), EngineError> {
        let id = record.id.clone();
        self.definitions.update(record)?;
        self.after_commit(AfterCommit::EvictDefinition(id));
        Ok(())
    }

    pub fn delete_definition_record(&mut self, id: &str) -> Result<(), EngineError> {
        self.definitions.remove(&id.to_string())?;
        self.after_commit(AfterCommit::EvictDefinition(id.to_string()));
        Ok(())
    }

    // ── Signal start claims ──

    pub async fn find_signal_claim(&mut self, signal_name: &str) -> Result<Option<SignalStartClaim>, EngineError> {
        let key = signal_name.to_string();
        if let Some(cached) = self.signal_claims.cached(&key) {
            return Ok(cached.cloned());
        }
        let loaded = self.store().load_signal_claim(signal_name).await?;
        if let Some(claim) = &loaded {
            self.signal_claims.loaded(claim.clone());
        }
        Ok(loaded)
    }

    /// Take `signal_name` for `process_key`. The claim row is always
    /// written, so a concurrent claim of the same name conflicts at flush.
    pub async fn claim_signal_start(&mut self, signal_name: &str, process_key: &str) -> Result<(), EngineError> {
        match self.find_signal_claim(signal_name).await? {
            Some(mut claim) => {
                claim.process_key = process_key.to_string();
                self.signal_claims.update(claim)
            }
            None => {
                self.signal_claims.insert(SignalStartClaim::new(signal_name, process_key));
                Ok(())
            }
        }
    }

    /// Drop the claim on `signal_name` if `process_key` still holds it.
    pub async fn release_signal_start(&mut self, signal_name: &str, process_key: &str) -> Result<(), EngineError> {
        match self.find_signal_claim(signal_name).await? {
            Some(claim) if claim.process_key == process_key => {
                self.signal_claims.remove(&claim.signal_name)
            }
            _ => Ok(()),
        }
    }

    /// Resolve a deployed definition graph.
    ///
    /// Records created or changed in this unit of work are built directly
    /// so that a deployment is visible to the rest of its own command;
    /// everything else goes through the shared deployment cache.
    pub async fn find_deployed_process_definition(
        &mut self,
        id: &str,
    ) -> Result<Option<Arc<ProcessDefinition>>, EngineError> {
        match self.definitions.slots.get(id) {
            Some(Slot::New(record)) | Some(Slot::Dirty(record)) => {
                return Ok(Some(Arc::new(definition_from_record(record)?)));
            }
            Some(Slot::Removed(_)) => return Ok(None),
            _ => {}
        }
        let services = self.services.clone();
        services
            .cache
            .find_deployed_process_definition_by_id(services.store.as_ref(), id)
            .await
    }

    /// Definition graph an execution runs on.
    pub async fn definition_of(&mut self, execution: &Execution) -> Result<Arc<ProcessDefinition>, EngineError> {
        self.find_deployed_process_definition(&execution.process_definition_id)
            .await?
            .ok_or_else(|| EngineError::not_found("ProcessDefinition", &execution.process_definition_id))
    }

    // ── Events and commit ──

    pub fn record_event(&mut self, process_instance_id: Option<Uuid>, event: RuntimeEvent) {
        self.events.push((process_instance_id, self.now, event));
    }

    pub fn after_commit(&mut self, hook: AfterCommit) {
        if !self.after_commit.contains(&hook) {
            self.after_commit.push(hook);
        }
    }

    pub(crate) fn push_operation(&mut self, operation: Operation) {
        self.agenda.push_back(operation);
    }

    /// Everything this attempt wrote, plus the hooks to run once flushed.
    pub fn into_change_set(self) -> (ChangeSet, Vec<AfterCommit>) {
        let changes = ChangeSet {
            executions: self.executions.into_ops(),
            subscriptions: self.subscriptions.into_ops(),
            jobs: self.jobs.into_ops(),
            definitions: self.definitions.into_ops(),
            signal_claims: self.signal_claims.into_ops(),
            events: self.events,
        };
        (changes, self.after_commit)
    }
}

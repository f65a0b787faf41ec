use crate::error::{StoreError, VersionConflict};
use crate::events::{EventLogQuery, RecordedEvent};
use crate::store::{ChangeSet, Entity, EntityOp, EntityStore};
use crate::types::*;
use anyhow::anyhow;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

type SubscriptionKey = (EventType, String);

#[derive(Default)]
struct Tables {
    executions: BTreeMap<Uuid, Execution>,
    subscriptions: BTreeMap<Uuid, EventSubscription>,
    /// `(event_type, event_name)` → subscription ids.
    subscription_index: BTreeMap<SubscriptionKey, BTreeSet<Uuid>>,
    jobs: BTreeMap<Uuid, Job>,
    definitions: BTreeMap<String, DefinitionRecord>,
    signal_claims: BTreeMap<String, SignalStartClaim>,
    events: Vec<RecordedEvent>,
    next_seq: u64,
    flushes: u64,
}

/// In-memory entity store for tests and single-process embedding.
///
/// A flush validates every revision under the write lock before touching
/// any table, so a conflicting change set leaves no trace.
pub struct MemoryStore {
    inner: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Tables::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.inner
            .read()
            .map_err(|e| StoreError::Backend(anyhow!("Lock: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.inner
            .write()
            .map_err(|e| StoreError::Backend(anyhow!("Lock: {}", e)))
    }

    /// Number of successful flushes, for asserting commit behaviour.
    pub fn flush_count(&self) -> u64 {
        self.inner.read().map(|t| t.flushes).unwrap_or(0)
    }

    /// Every execution currently stored.
    pub fn executions(&self) -> Vec<Execution> {
        self.inner
            .read()
            .map(|t| t.executions.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Every subscription currently stored.
    pub fn subscriptions(&self) -> Vec<EventSubscription> {
        self.inner
            .read()
            .map(|t| t.subscriptions.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn check_ops<T: Entity>(
    table: &BTreeMap<T::Id, T>,
    ops: &[EntityOp<T>],
) -> Result<(), VersionConflict> {
    for op in ops {
        match op {
            EntityOp::Insert(entity) => {
                if let Some(existing) = table.get(&entity.id()) {
                    return Err(VersionConflict::new(
                        T::KIND,
                        entity.id().to_string(),
                        0,
                        Some(existing.revision()),
                    ));
                }
            }
            EntityOp::Update(entity) => {
                let actual = table.get(&entity.id()).map(|e| e.revision());
                if actual != Some(entity.revision()) {
                    return Err(VersionConflict::new(
                        T::KIND,
                        entity.id().to_string(),
                        entity.revision(),
                        actual,
                    ));
                }
            }
            EntityOp::Delete { id, revision } => {
                let actual = table.get(id).map(|e| e.revision());
                if actual != Some(*revision) {
                    return Err(VersionConflict::new(T::KIND, id.to_string(), *revision, actual));
                }
            }
        }
    }
    Ok(())
}

fn apply_ops<T: Entity>(table: &mut BTreeMap<T::Id, T>, ops: Vec<EntityOp<T>>) {
    for op in ops {
        match op {
            EntityOp::Insert(mut entity) => {
                entity.set_revision(1);
                table.insert(entity.id(), entity);
            }
            EntityOp::Update(mut entity) => {
                entity.set_revision(entity.revision() + 1);
                table.insert(entity.id(), entity);
            }
            EntityOp::Delete { id, .. } => {
                table.remove(&id);
            }
        }
    }
}

impl Tables {
    fn unindex(&mut self, id: Uuid) {
        if let Some(sub) = self.subscriptions.get(&id) {
            let key = (sub.event_type, sub.event_name.clone());
            if let Some(ids) = self.subscription_index.get_mut(&key) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.subscription_index.remove(&key);
                }
            }
        }
    }

    fn index(&mut self, id: Uuid) {
        if let Some(sub) = self.subscriptions.get(&id) {
            self.subscription_index
                .entry((sub.event_type, sub.event_name.clone()))
                .or_default()
                .insert(id);
        }
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn load_execution(&self, id: Uuid) -> Result<Option<Execution>, StoreError> {
        Ok(self.read()?.executions.get(&id).cloned())
    }

    async fn find_process_instances_by_definition(
        &self,
        process_definition_id: &str,
    ) -> Result<Vec<Execution>, StoreError> {
        Ok(self
            .read()?
            .executions
            .values()
            .filter(|e| e.is_root() && e.process_definition_id == process_definition_id)
            .cloned()
            .collect())
    }

    async fn load_subscription(&self, id: Uuid) -> Result<Option<EventSubscription>, StoreError> {
        Ok(self.read()?.subscriptions.get(&id).cloned())
    }

    async fn find_subscriptions_by_event(
        &self,
        event_type: EventType,
        event_name: &str,
    ) -> Result<Vec<EventSubscription>, StoreError> {
        let tables = self.read()?;
        let key = (event_type, event_name.to_string());
        Ok(tables
            .subscription_index
            .get(&key)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| tables.subscriptions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_subscriptions_by_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<EventSubscription>, StoreError> {
        Ok(self
            .read()?
            .subscriptions
            .values()
            .filter(|s| s.execution_id == Some(execution_id))
            .cloned()
            .collect())
    }

    async fn find_subscriptions_by_type(
        &self,
        event_type: EventType,
    ) -> Result<Vec<EventSubscription>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .subscription_index
            .range((event_type, String::new())..)
            .take_while(|((t, _), _)| *t == event_type)
            .flat_map(|(_, ids)| ids.iter())
            .filter_map(|id| tables.subscriptions.get(id).cloned())
            .collect())
    }

    async fn find_start_subscriptions_by_configuration(
        &self,
        configuration: &str,
    ) -> Result<Vec<EventSubscription>, StoreError> {
        Ok(self
            .read()?
            .subscriptions
            .values()
            .filter(|s| s.is_start() && s.configuration.as_deref() == Some(configuration))
            .cloned()
            .collect())
    }

    async fn load_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.read()?.jobs.get(&id).cloned())
    }

    async fn find_acquirable_jobs(
        &self,
        now: Timestamp,
        max: usize,
    ) -> Result<Vec<Job>, StoreError> {
        let tables = self.read()?;
        let mut jobs: Vec<Job> = tables
            .jobs
            .values()
            .filter(|j| j.is_acquirable(now))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| (j.due_at, j.id));
        jobs.truncate(max);
        Ok(jobs)
    }

    async fn find_jobs(&self) -> Result<Vec<Job>, StoreError> {
        Ok(self.read()?.jobs.values().cloned().collect())
    }

    async fn load_definition(&self, id: &str) -> Result<Option<DefinitionRecord>, StoreError> {
        Ok(self.read()?.definitions.get(id).cloned())
    }

    async fn find_definitions_by_key(&self, key: &str) -> Result<Vec<DefinitionRecord>, StoreError> {
        let mut found: Vec<DefinitionRecord> = self
            .read()?
            .definitions
            .values()
            .filter(|d| d.key == key)
            .cloned()
            .collect();
        found.sort_by_key(|d| d.version);
        Ok(found)
    }

    async fn find_definitions_by_deployment(
        &self,
        deployment_id: Uuid,
    ) -> Result<Vec<DefinitionRecord>, StoreError> {
        Ok(self
            .read()?
            .definitions
            .values()
            .filter(|d| d.deployment_id == deployment_id)
            .cloned()
            .collect())
    }

    async fn load_signal_claim(&self, signal_name: &str) -> Result<Option<SignalStartClaim>, StoreError> {
        Ok(self.read()?.signal_claims.get(signal_name).cloned())
    }

    async fn read_events(&self, query: &EventLogQuery) -> Result<Vec<RecordedEvent>, StoreError> {
        Ok(query.apply(self.read()?.events.iter()))
    }

    async fn flush(&self, changes: ChangeSet) -> Result<(), StoreError> {
        let mut tables = self.write()?;

        check_ops(&tables.executions, &changes.executions)?;
        check_ops(&tables.subscriptions, &changes.subscriptions)?;
        check_ops(&tables.jobs, &changes.jobs)?;
        check_ops(&tables.definitions, &changes.definitions)?;
        check_ops(&tables.signal_claims, &changes.signal_claims)?;

        let touched: Vec<Uuid> = changes.subscriptions.iter().map(|op| op.id()).collect();
        for id in &touched {
            tables.unindex(*id);
        }

        apply_ops(&mut tables.executions, changes.executions);
        apply_ops(&mut tables.subscriptions, changes.subscriptions);
        apply_ops(&mut tables.jobs, changes.jobs);
        apply_ops(&mut tables.definitions, changes.definitions);
        apply_ops(&mut tables.signal_claims, changes.signal_claims);

        for id in &touched {
            tables.index(*id);
        }

        for (process_instance_id, occurred_at, event) in changes.events {
            tables.next_seq += 1;
            let seq = tables.next_seq;
            tables.events.push(RecordedEvent {
                seq,
                process_instance_id,
                occurred_at,
                event,
            });
        }
        tables.flushes += 1;
        Ok(())
    }
}

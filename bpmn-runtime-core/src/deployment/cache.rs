use crate::definition::ProcessDefinition;
use crate::error::EngineError;
use crate::model::build::definition_from_record;
use crate::store::EntityStore;
use anyhow::anyhow;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

struct Slot {
    definition: Arc<ProcessDefinition>,
    last_used: u64,
}

#[derive(Default)]
struct Inner {
    slots: HashMap<String, Slot>,
    tick: u64,
    hits: u64,
    misses: u64,
}

/// Bounded cache of built definition graphs keyed by definition id.
///
/// Least-recently-used entries are evicted once `capacity` is exceeded. A
/// miss rebuilds the graph from the persisted record, so eviction never
/// loses information.
pub struct DeploymentCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl DeploymentCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, EngineError> {
        self.inner
            .lock()
            .map_err(|e| EngineError::Store(anyhow!("Lock: {}", e)))
    }

    /// Cached graph for `id`, loading and building it on a miss. `None`
    /// when no such definition is deployed.
    pub async fn find_deployed_process_definition_by_id(
        &self,
        store: &dyn EntityStore,
        id: &str,
    ) -> Result<Option<Arc<ProcessDefinition>>, EngineError> {
        {
            let mut inner = self.lock()?;
            inner.tick += 1;
            let tick = inner.tick;
            if let Some(slot) = inner.slots.get_mut(id) {
                slot.last_used = tick;
                let definition = slot.definition.clone();
                inner.hits += 1;
                return Ok(Some(definition));
            }
            inner.misses += 1;
        }

        let Some(record) = store.load_definition(id).await? else {
            return Ok(None);
        };
        let definition = Arc::new(definition_from_record(&record)?);
        self.put(definition.clone())?;
        Ok(Some(definition))
    }

    fn put(&self, definition: Arc<ProcessDefinition>) -> Result<(), EngineError> {
        let mut inner = self.lock()?;
        inner.tick += 1;
        let tick = inner.tick;
        inner.slots.insert(
            definition.id.clone(),
            Slot {
                definition,
                last_used: tick,
            },
        );
        while inner.slots.len() > self.capacity {
            let oldest = inner
                .slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    inner.slots.remove(&id);
                    tracing::debug!(definition_id = %id, "deployment cache evicted definition");
                }
                None => break,
            }
        }
        Ok(())
    }

    /// Drop a cached graph, e.g. after undeploy or a suspension change.
    pub fn evict(&self, id: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.slots.remove(id);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.slots.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        self.inner
            .lock()
            .map(|i| (i.hits, i.misses))
            .unwrap_or((0, 0))
    }
}

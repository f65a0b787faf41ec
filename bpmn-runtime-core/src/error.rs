use crate::model::validate::ValidationError;
use crate::types::Revision;

/// An optimistic version mismatch detected while flushing a unit of work.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{entity} '{id}' was modified concurrently (expected revision {expected}, found {found})")]
pub struct VersionConflict {
    pub entity: &'static str,
    pub id: String,
    pub expected: Revision,
    /// `None` when the row was deleted by the other unit of work.
    pub actual: Option<Revision>,
    found: String,
}

impl VersionConflict {
    pub fn new(entity: &'static str, id: String, expected: Revision, actual: Option<Revision>) -> Self {
        let found = match actual {
            Some(rev) => rev.to_string(),
            None => "no row".to_string(),
        };
        Self {
            entity,
            id,
            expected,
            actual,
            found,
        }
    }
}

/// Errors raised by an [`EntityStore`](crate::store::EntityStore) backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Conflict(#[from] VersionConflict),
    #[error("store backend: {0}")]
    Backend(#[from] anyhow::Error),
}

/// The single error type of every engine operation.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Fatal: persisted configuration is missing a required value.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The deployment was rejected as a whole.
    #[error("deployment rejected: {}", join_validation(.0))]
    Validation(Vec<ValidationError>),

    /// One flush lost a version race. Consumed by the retry interceptor.
    #[error("optimistic locking conflict: {0}")]
    OptimisticLock(VersionConflict),

    /// Every retry attempt lost a version race.
    #[error("command '{command}' gave up after {attempts} attempts: {conflict}")]
    ConcurrencyFailure {
        command: &'static str,
        attempts: u32,
        conflict: VersionConflict,
    },

    #[error("precondition violated: {0}")]
    Precondition(String),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("message correlation failed: {0}")]
    Correlation(String),

    #[error("store error: {0}")]
    Store(anyhow::Error),

    #[error("internal engine error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        EngineError::Precondition(message.into())
    }

    pub fn is_concurrency_failure(&self) -> bool {
        matches!(self, EngineError::ConcurrencyFailure { .. })
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(conflict) => EngineError::OptimisticLock(conflict),
            StoreError::Backend(e) => EngineError::Store(e),
        }
    }
}

fn join_validation(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

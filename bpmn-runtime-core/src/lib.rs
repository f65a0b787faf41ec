//! Runtime core of a BPMN process engine.
//!
//! Process instances are trees of executions persisted through an
//! [`EntityStore`](store::EntityStore). Every operation runs as a
//! [`Command`](executor::Command) in one unit of work that is flushed
//! atomically and retried on optimistic-lock conflicts. Events (signals,
//! messages, timers) reach waiting executions through the subscription
//! registry, inline or deferred to the [`JobExecutor`](job::JobExecutor).

pub mod behavior;
pub mod clock;
pub mod cmd;
pub mod config;
pub mod context;
pub mod definition;
pub mod deployment;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod job;
pub mod model;
pub mod store;
pub mod store_memory;
pub mod subscription;
pub mod tree;
pub mod types;

pub use behavior::SignalOutcome;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::{ProcessEngine, ProcessEngineBuilder};
pub use error::{EngineError, StoreError, VersionConflict};
pub use events::{EventLogQuery, RecordedEvent, RuntimeEvent};
pub use model::dto::{ProcessModel, ProcessModelBuilder};
pub use store::EntityStore;
pub use store_memory::MemoryStore;
pub use types::*;

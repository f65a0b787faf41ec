use crate::types::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Runtime events: the durable audit trail written alongside every
/// committed unit of work.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RuntimeEvent {
    InstanceStarted {
        process_definition_id: String,
        start_activity_id: String,
        business_key: Option<String>,
    },
    ActivityEntered {
        execution_id: Uuid,
        activity_id: String,
    },
    ExecutionForked {
        parent_id: Uuid,
        children: Vec<Uuid>,
    },
    JoinReleased {
        gateway_id: String,
        execution_id: Uuid,
    },
    EventSubscribed {
        subscription_id: Uuid,
        event_type: EventType,
        event_name: String,
        activity_id: String,
    },
    EventReceived {
        subscription_id: Uuid,
        execution_id: Uuid,
        event_type: EventType,
        event_name: String,
        activity_id: String,
        /// True when the continuation was queued as a job instead of run inline.
        deferred: bool,
    },
    SignalThrown {
        event_name: String,
        delivered: usize,
        started: usize,
    },
    /// A start subscription pointed at a missing or suspended definition.
    StartSkipped {
        subscription_id: Uuid,
        process_definition_id: String,
        reason: String,
    },
    VariableUpdated {
        execution_id: Uuid,
        name: String,
        value: serde_json::Value,
    },
    ExecutionCanceled {
        execution_id: Uuid,
        reason: String,
    },
    InstanceCompleted,
    InstanceCanceled {
        reason: String,
    },
    DeploymentCreated {
        deployment_id: Uuid,
        process_definition_ids: Vec<String>,
    },
    DeploymentDeleted {
        deployment_id: Uuid,
    },
    SuspensionChanged {
        process_definition_id: String,
        suspended: bool,
    },
    JobFailed {
        job_id: Uuid,
        message: String,
        retries_left: u32,
    },
}

impl RuntimeEvent {
    /// Stable name used by [`EventLogQuery::kind`].
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeEvent::InstanceStarted { .. } => "instance_started",
            RuntimeEvent::ActivityEntered { .. } => "activity_entered",
            RuntimeEvent::ExecutionForked { .. } => "execution_forked",
            RuntimeEvent::JoinReleased { .. } => "join_released",
            RuntimeEvent::EventSubscribed { .. } => "event_subscribed",
            RuntimeEvent::EventReceived { .. } => "event_received",
            RuntimeEvent::SignalThrown { .. } => "signal_thrown",
            RuntimeEvent::StartSkipped { .. } => "start_skipped",
            RuntimeEvent::VariableUpdated { .. } => "variable_updated",
            RuntimeEvent::ExecutionCanceled { .. } => "execution_canceled",
            RuntimeEvent::InstanceCompleted => "instance_completed",
            RuntimeEvent::InstanceCanceled { .. } => "instance_canceled",
            RuntimeEvent::DeploymentCreated { .. } => "deployment_created",
            RuntimeEvent::DeploymentDeleted { .. } => "deployment_deleted",
            RuntimeEvent::SuspensionChanged { .. } => "suspension_changed",
            RuntimeEvent::JobFailed { .. } => "job_failed",
        }
    }
}

/// An event as stored. `seq` is assigned by the store at flush time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub seq: u64,
    pub process_instance_id: Option<Uuid>,
    pub occurred_at: Timestamp,
    pub event: RuntimeEvent,
}

/// Filter over the event log.
///
/// `occurred_after` is an exclusive lower bound; `occurred_at` matches one
/// instant exactly. Either may be absent and they combine as a conjunction,
/// so equal bounds select nothing.
#[derive(Clone, Debug, Default)]
pub struct EventLogQuery {
    pub process_instance_id: Option<Uuid>,
    pub kind: Option<&'static str>,
    pub occurred_after: Option<Timestamp>,
    pub occurred_at: Option<Timestamp>,
    pub max_results: Option<usize>,
}

impl EventLogQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process_instance(mut self, id: Uuid) -> Self {
        self.process_instance_id = Some(id);
        self
    }

    pub fn kind(mut self, kind: &'static str) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn occurred_after(mut self, at: Timestamp) -> Self {
        self.occurred_after = Some(at);
        self
    }

    pub fn occurred_at(mut self, at: Timestamp) -> Self {
        self.occurred_at = Some(at);
        self
    }

    pub fn max_results(mut self, max: usize) -> Self {
        self.max_results = Some(max);
        self
    }

    pub fn matches(&self, recorded: &RecordedEvent) -> bool {
        if let Some(id) = self.process_instance_id {
            if recorded.process_instance_id != Some(id) {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if recorded.event.kind() != kind {
                return false;
            }
        }
        if let Some(after) = self.occurred_after {
            if recorded.occurred_at <= after {
                return false;
            }
        }
        if let Some(at) = self.occurred_at {
            if recorded.occurred_at != at {
                return false;
            }
        }
        true
    }

    /// Apply the filter, order by time then sequence and truncate.
    pub fn apply<'a>(&self, events: impl IntoIterator<Item = &'a RecordedEvent>) -> Vec<RecordedEvent> {
        let mut selected: Vec<RecordedEvent> =
            events.into_iter().filter(|e| self.matches(e)).cloned().collect();
        selected.sort_by_key(|e| (e.occurred_at, e.seq));
        if let Some(max) = self.max_results {
            selected.truncate(max);
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variable_update(seq: u64, at: Timestamp, value: &str) -> RecordedEvent {
        RecordedEvent {
            seq,
            process_instance_id: None,
            occurred_at: at,
            event: RuntimeEvent::VariableUpdated {
                execution_id: Uuid::nil(),
                name: "stringVar".into(),
                value: serde_json::json!(value),
            },
        }
    }

    fn log() -> Vec<RecordedEvent> {
        vec![
            variable_update(1, 1_000, "value1"),
            variable_update(2, 3_000, "value2"),
        ]
    }

    #[test]
    fn occurred_after_is_exclusive() {
        let hits = EventLogQuery::new().occurred_after(1_000).apply(&log());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].seq, 2);
    }

    #[test]
    fn occurred_at_matches_the_instant() {
        let hits = EventLogQuery::new().occurred_at(1_000).apply(&log());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].seq, 1);
    }

    #[test]
    fn equal_bounds_select_nothing() {
        let hits = EventLogQuery::new()
            .occurred_after(1_000)
            .occurred_at(1_000)
            .apply(&log());
        assert!(hits.is_empty());
    }

    #[test]
    fn results_sorted_and_truncated() {
        let mut events = log();
        events.reverse();
        events.push(variable_update(3, 2_000, "value3"));
        let hits = EventLogQuery::new()
            .kind("variable_updated")
            .max_results(2)
            .apply(&events);
        assert_eq!(hits.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![1, 3]);
    }
}

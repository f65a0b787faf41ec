//! Activity Behavior Dispatcher.
//!
//! One behavior type per activity kind, each implementing
//! `{execute, signal}`. The agenda selects the behavior from the activity
//! kind and never reaches past it into the tree or registry directly.

pub mod agenda;
mod event;
mod gateway;
mod task;

pub use event::{throw_signal, SignalOutcome};

use crate::context::CommandContext;
use crate::definition::{Activity, ActivityKind, ProcessDefinition};
use crate::error::EngineError;
use crate::types::{Execution, Variables};
use async_trait::async_trait;
use std::sync::Arc;

/// An execution positioned at an activity of its definition.
#[derive(Debug, Clone)]
pub struct ActivityExecution {
    pub execution: Execution,
    pub definition: Arc<ProcessDefinition>,
    pub activity: Activity,
}

#[async_trait]
pub trait ActivityBehavior: Send + Sync {
    /// The execution arrived at the activity.
    async fn execute(&self, ctx: &mut CommandContext, at: &ActivityExecution) -> Result<(), EngineError>;

    /// Resume an execution waiting at the activity.
    async fn signal(
        &self,
        ctx: &mut CommandContext,
        at: &ActivityExecution,
        signal_name: &str,
        payload: &Variables,
    ) -> Result<(), EngineError> {
        let _ = (ctx, signal_name, payload);
        Err(EngineError::precondition(format!(
            "Activity '{}' is not a wait state and cannot be signaled",
            at.activity.id
        )))
    }
}

static START_EVENT: event::StartEventBehavior = event::StartEventBehavior;
static END_EVENT: event::EndEventBehavior = event::EndEventBehavior;
static CATCH_EVENT: event::IntermediateCatchEventBehavior = event::IntermediateCatchEventBehavior;
static THROW_SIGNAL: event::ThrowSignalEventBehavior = event::ThrowSignalEventBehavior;
static USER_TASK: task::UserTaskBehavior = task::UserTaskBehavior;
static SERVICE_TASK: task::ServiceTaskBehavior = task::ServiceTaskBehavior;
static SUB_PROCESS: task::SubProcessBehavior = task::SubProcessBehavior;
static EXCLUSIVE_GATEWAY: gateway::ExclusiveGatewayBehavior = gateway::ExclusiveGatewayBehavior;
static PARALLEL_GATEWAY: gateway::ParallelGatewayBehavior = gateway::ParallelGatewayBehavior;

/// Dispatch on activity kind.
pub fn behavior_for(kind: &ActivityKind) -> &'static dyn ActivityBehavior {
    match kind {
        ActivityKind::StartEvent { .. } => &START_EVENT,
        ActivityKind::EndEvent { .. } => &END_EVENT,
        ActivityKind::UserTask => &USER_TASK,
        ActivityKind::ServiceTask { .. } => &SERVICE_TASK,
        ActivityKind::ExclusiveGateway => &EXCLUSIVE_GATEWAY,
        ActivityKind::ParallelGateway => &PARALLEL_GATEWAY,
        ActivityKind::IntermediateCatchEvent { .. } => &CATCH_EVENT,
        ActivityKind::IntermediateThrowEvent { .. } => &THROW_SIGNAL,
        ActivityKind::SubProcess { .. } => &SUB_PROCESS,
    }
}

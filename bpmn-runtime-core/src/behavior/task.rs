use super::agenda::Operation;
use super::{ActivityBehavior, ActivityExecution};
use crate::context::CommandContext;
use crate::definition::ActivityKind;
use crate::error::EngineError;
use crate::tree;
use crate::types::Variables;
use async_trait::async_trait;

/// Wait state. The execution stays at the task until it is triggered.
pub struct UserTaskBehavior;

#[async_trait]
impl ActivityBehavior for UserTaskBehavior {
    async fn execute(&self, _ctx: &mut CommandContext, at: &ActivityExecution) -> Result<(), EngineError> {
        tracing::debug!(
            execution_id = %at.execution.id,
            activity_id = %at.activity.id,
            "Waiting at user task"
        );
        Ok(())
    }

    async fn signal(
        &self,
        ctx: &mut CommandContext,
        at: &ActivityExecution,
        _signal_name: &str,
        payload: &Variables,
    ) -> Result<(), EngineError> {
        tree::set_variables(ctx, at.execution.id, payload).await?;
        ctx.push_operation(Operation::Leave {
            execution_id: at.execution.id,
        });
        Ok(())
    }
}

/// Writes its static outputs as process variables and moves on.
pub struct ServiceTaskBehavior;

#[async_trait]
impl ActivityBehavior for ServiceTaskBehavior {
    async fn execute(&self, ctx: &mut CommandContext, at: &ActivityExecution) -> Result<(), EngineError> {
        if let ActivityKind::ServiceTask { outputs } = &at.activity.kind {
            tree::set_variables(ctx, at.execution.id, outputs).await?;
        }
        ctx.push_operation(Operation::Leave {
            execution_id: at.execution.id,
        });
        Ok(())
    }
}

/// Embedded sub-process: runs its content in a child scope execution.
pub struct SubProcessBehavior;

#[async_trait]
impl ActivityBehavior for SubProcessBehavior {
    async fn execute(&self, ctx: &mut CommandContext, at: &ActivityExecution) -> Result<(), EngineError> {
        if at.activity.is_event_subprocess() {
            return Err(EngineError::precondition(format!(
                "Event sub-process '{}' cannot be entered through a sequence flow",
                at.activity.id
            )));
        }
        let initial = at
            .definition
            .initial(Some(&at.activity.id))
            .ok_or_else(|| {
                EngineError::Configuration(format!(
                    "Sub-process '{}' has no none start event",
                    at.activity.id
                ))
            })?
            .id
            .clone();
        let child = tree::create_child_scope(ctx, at.execution.id, &at.definition, &at.activity.id, &initial).await?;
        ctx.push_operation(Operation::Execute { execution_id: child });
        Ok(())
    }
}

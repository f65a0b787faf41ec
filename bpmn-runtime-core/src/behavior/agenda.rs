//! The agenda: a FIFO of pending atomic operations drained at the end of
//! every command, inside the same unit of work.
//!
//! Operations name executions by id. An operation whose execution has
//! since ended, been canceled or stopped being active is stale and is
//! skipped.

use super::{behavior_for, ActivityExecution};
use crate::context::CommandContext;
use crate::error::EngineError;
use crate::events::RuntimeEvent;
use crate::subscription;
use crate::tree::{self, EndOutcome};
use crate::types::Execution;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Run the behavior of the activity the execution is positioned at.
    Execute { execution_id: Uuid },
    /// Complete the current activity and follow every outgoing flow.
    Leave { execution_id: Uuid },
    /// Move to `target` and execute it.
    Take { execution_id: Uuid, target: String },
    /// The path of the execution is complete.
    End { execution_id: Uuid },
}

impl Operation {
    fn execution_id(&self) -> Uuid {
        match self {
            Operation::Execute { execution_id }
            | Operation::Leave { execution_id }
            | Operation::Take { execution_id, .. }
            | Operation::End { execution_id } => *execution_id,
        }
    }
}

/// Drain the agenda. Bounded by `agenda.max_steps` so a model that loops
/// without a wait state fails the command instead of spinning forever.
pub async fn run(ctx: &mut CommandContext) -> Result<(), EngineError> {
    let max_steps = ctx.config().agenda.max_steps;
    let mut steps = 0usize;

    while let Some(operation) = ctx.agenda.pop_front() {
        steps += 1;
        if steps > max_steps {
            return Err(EngineError::Internal(format!(
                "command '{}' exceeded {} agenda steps",
                ctx.command_name(),
                max_steps
            )));
        }

        let Some(execution) = current(ctx, operation.execution_id()).await? else {
            tracing::trace!(?operation, "Skipping stale operation");
            continue;
        };

        match operation {
            Operation::Execute { .. } => execute(ctx, execution).await?,
            Operation::Leave { .. } => leave(ctx, execution).await?,
            Operation::Take { target, .. } => {
                let mut execution = execution;
                execution.activity_id = Some(target);
                execution.active = true;
                let execution_id = execution.id;
                ctx.update_execution(execution)?;
                ctx.push_operation(Operation::Execute { execution_id });
            }
            Operation::End { .. } => match tree::end(ctx, execution.id).await? {
                EndOutcome::InstanceEnded | EndOutcome::BranchEnded => {}
                EndOutcome::ScopeCompleted(scope_id) => {
                    ctx.push_operation(Operation::End { execution_id: scope_id });
                }
                EndOutcome::ScopeExited(parent_id) => {
                    ctx.push_operation(Operation::Leave { execution_id: parent_id });
                }
            },
        }
    }
    Ok(())
}

/// Live and active, or `None` when an operation on it is stale.
async fn current(ctx: &mut CommandContext, execution_id: Uuid) -> Result<Option<Execution>, EngineError> {
    Ok(ctx
        .find_execution(execution_id)
        .await?
        .filter(|e| e.is_live() && e.active))
}

async fn positioned(ctx: &mut CommandContext, execution: Execution) -> Result<ActivityExecution, EngineError> {
    let definition = ctx.definition_of(&execution).await?;
    let activity_id = execution.activity_id.clone().ok_or_else(|| {
        EngineError::Internal(format!("execution '{}' has no current activity", execution.id))
    })?;
    let activity = definition
        .find_activity(&activity_id)
        .cloned()
        .ok_or_else(|| EngineError::not_found("Activity", &activity_id))?;
    Ok(ActivityExecution {
        execution,
        definition,
        activity,
    })
}

async fn execute(ctx: &mut CommandContext, execution: Execution) -> Result<(), EngineError> {
    let at = positioned(ctx, execution).await?;
    ctx.record_event(
        Some(at.execution.process_instance_id),
        RuntimeEvent::ActivityEntered {
            execution_id: at.execution.id,
            activity_id: at.activity.id.clone(),
        },
    );
    behavior_for(&at.activity.kind).execute(ctx, &at).await
}

async fn leave(ctx: &mut CommandContext, execution: Execution) -> Result<(), EngineError> {
    let at = positioned(ctx, execution).await?;
    subscription::remove_at_activity(ctx, at.execution.id, &at.activity.id).await?;

    let targets: Vec<String> = at
        .definition
        .outgoing(&at.activity.id)
        .into_iter()
        .map(|(_, target)| target.id.clone())
        .collect();

    match targets.len() {
        0 => ctx.push_operation(Operation::End {
            execution_id: at.execution.id,
        }),
        1 => ctx.push_operation(Operation::Take {
            execution_id: at.execution.id,
            target: targets[0].clone(),
        }),
        n => {
            let branches = tree::fork(ctx, at.execution.id, n).await?;
            for (execution_id, target) in branches.into_iter().zip(targets) {
                ctx.push_operation(Operation::Take { execution_id, target });
            }
        }
    }
    Ok(())
}

use super::agenda::Operation;
use super::{ActivityBehavior, ActivityExecution};
use crate::context::CommandContext;
use crate::error::EngineError;
use crate::tree;
use async_trait::async_trait;

/// Takes the first outgoing flow whose condition holds, in declaration
/// order, else the default flow. Unconditional flows always hold.
pub struct ExclusiveGatewayBehavior;

#[async_trait]
impl ActivityBehavior for ExclusiveGatewayBehavior {
    async fn execute(&self, ctx: &mut CommandContext, at: &ActivityExecution) -> Result<(), EngineError> {
        let outgoing = at.definition.outgoing(&at.activity.id);
        if outgoing.is_empty() {
            ctx.push_operation(Operation::End {
                execution_id: at.execution.id,
            });
            return Ok(());
        }

        let variables = tree::get_variables(ctx, at.execution.id).await?;
        let chosen = outgoing
            .iter()
            .filter(|(flow, _)| !flow.is_default)
            .find(|(flow, _)| match &flow.condition {
                Some(condition) => variables.get(&condition.variable) == Some(&condition.equals),
                None => true,
            })
            .or_else(|| outgoing.iter().find(|(flow, _)| flow.is_default))
            .map(|(_, target)| target.id.clone());

        let Some(target) = chosen else {
            return Err(EngineError::precondition(format!(
                "No outgoing sequence flow for the element with id '{}' could be selected for continuing the process",
                at.activity.id
            )));
        };
        tracing::trace!(gateway = %at.activity.id, target = %target, "Exclusive gateway decided");
        ctx.push_operation(Operation::Take {
            execution_id: at.execution.id,
            target,
        });
        Ok(())
    }
}

/// Joins all incoming branches, then forks along every outgoing flow.
pub struct ParallelGatewayBehavior;

#[async_trait]
impl ActivityBehavior for ParallelGatewayBehavior {
    async fn execute(&self, ctx: &mut CommandContext, at: &ActivityExecution) -> Result<(), EngineError> {
        let incoming = at.definition.incoming_count(&at.activity.id);
        let continuing = if incoming > 1 {
            tree::join(ctx, at.execution.id, &at.activity.id, incoming).await?
        } else {
            Some(at.execution.id)
        };
        if let Some(execution_id) = continuing {
            ctx.push_operation(Operation::Leave { execution_id });
        }
        Ok(())
    }
}

use super::agenda::Operation;
use super::{ActivityBehavior, ActivityExecution};
use crate::context::CommandContext;
use crate::definition::{ActivityKind, EventTrigger};
use crate::error::EngineError;
use crate::events::RuntimeEvent;
use crate::subscription;
use crate::tree;
use crate::types::{EventType, SubscriptionTarget, Variables};
use async_trait::async_trait;
use uuid::Uuid;

// ── Start / end ──

pub struct StartEventBehavior;

#[async_trait]
impl ActivityBehavior for StartEventBehavior {
    async fn execute(&self, ctx: &mut CommandContext, at: &ActivityExecution) -> Result<(), EngineError> {
        ctx.push_operation(Operation::Leave {
            execution_id: at.execution.id,
        });
        Ok(())
    }
}

/// Ends the path. A terminate end event cancels everything else in the
/// enclosing scope and ends the scope.
pub struct EndEventBehavior;

#[async_trait]
impl ActivityBehavior for EndEventBehavior {
    async fn execute(&self, ctx: &mut CommandContext, at: &ActivityExecution) -> Result<(), EngineError> {
        let terminate = matches!(at.activity.kind, ActivityKind::EndEvent { terminate: true });
        if terminate {
            let scope = tree::scope_of(ctx, at.execution.id).await?;
            if scope.id != at.execution.id {
                let reason = format!("terminated by end event '{}'", at.activity.id);
                tree::cancel_children(ctx, scope.id, &reason).await?;
                let mut scope = ctx.execution(scope.id).await?;
                scope.active = true;
                let scope_id = scope.id;
                ctx.update_execution(scope)?;
                ctx.push_operation(Operation::End { execution_id: scope_id });
                return Ok(());
            }
        }
        ctx.push_operation(Operation::End {
            execution_id: at.execution.id,
        });
        Ok(())
    }
}

// ── Intermediate catch ──

/// Subscribes on arrival and waits; the subscription is the only way on.
pub struct IntermediateCatchEventBehavior;

#[async_trait]
impl ActivityBehavior for IntermediateCatchEventBehavior {
    async fn execute(&self, ctx: &mut CommandContext, at: &ActivityExecution) -> Result<(), EngineError> {
        let ActivityKind::IntermediateCatchEvent { trigger } = &at.activity.kind else {
            return Err(EngineError::Internal(format!(
                "activity '{}' is not a catch event",
                at.activity.id
            )));
        };
        let mut sub = subscription::subscribe(
            ctx,
            SubscriptionTarget::Execution(at.execution.id),
            trigger.event_type(),
            &trigger.event_name(&at.activity.id),
            &at.activity.id,
        )
        .await?;

        if let EventTrigger::Timer { duration_ms } = trigger {
            let due_at = i64::try_from(*duration_ms)
                .ok()
                .and_then(|duration| ctx.now().checked_add(duration))
                .ok_or_else(|| {
                    EngineError::Configuration(format!(
                        "timer '{}': due date of now + {}ms is out of range",
                        at.activity.id, duration_ms
                    ))
                })?;
            sub.configuration = Some(due_at.to_string());
            ctx.update_subscription(sub)?;
        }
        Ok(())
    }

    async fn signal(
        &self,
        ctx: &mut CommandContext,
        at: &ActivityExecution,
        _signal_name: &str,
        payload: &Variables,
    ) -> Result<(), EngineError> {
        subscription::remove_at_activity(ctx, at.execution.id, &at.activity.id).await?;
        tree::set_variables(ctx, at.execution.id, payload).await?;
        ctx.push_operation(Operation::Leave {
            execution_id: at.execution.id,
        });
        Ok(())
    }
}

// ── Signal throw ──

/// What one signal throw reached.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalOutcome {
    /// Catch subscriptions the event was delivered to (inline or queued).
    pub delivered: usize,
    /// Process instances started through start subscriptions.
    pub started: Vec<Uuid>,
}

/// Broadcast a signal.
///
/// First every catch subscription whose execution is still live receives
/// the event, inline or as a job depending on `is_async`. Then every start
/// subscription for the name starts its definition; missing or suspended
/// definitions are skipped. A start subscription without a definition id
/// fails the whole throw.
pub async fn throw_signal(
    ctx: &mut CommandContext,
    event_name: &str,
    payload: &Variables,
    is_async: bool,
) -> Result<SignalOutcome, EngineError> {
    let mut outcome = SignalOutcome::default();

    let catching = subscription::find_catch_by_event_name_and_type(ctx, event_name, EventType::Signal).await?;
    for candidate in catching {
        // An earlier delivery of this throw may have removed it.
        let Some(sub) = ctx.find_subscription(candidate.id).await? else {
            continue;
        };
        let Some(execution_id) = sub.execution_id else {
            continue;
        };
        if !tree::is_active(ctx, execution_id).await? {
            continue;
        }
        subscription::event_received(ctx, &sub, payload, is_async).await?;
        outcome.delivered += 1;
    }

    let starting = subscription::find_start_by_event_name_and_type(ctx, event_name, EventType::Signal).await?;
    for sub in starting {
        if let Some(instance) = subscription::start_from_subscription(ctx, &sub, None, payload).await? {
            outcome.started.push(instance);
        }
    }

    ctx.record_event(
        None,
        RuntimeEvent::SignalThrown {
            event_name: event_name.to_string(),
            delivered: outcome.delivered,
            started: outcome.started.len(),
        },
    );
    tracing::debug!(
        event_name,
        delivered = outcome.delivered,
        started = outcome.started.len(),
        is_async,
        "Signal thrown"
    );
    Ok(outcome)
}

/// Intermediate signal throw: broadcast, then continue along the own flow
/// without waiting for anything that was reached.
pub struct ThrowSignalEventBehavior;

#[async_trait]
impl ActivityBehavior for ThrowSignalEventBehavior {
    async fn execute(&self, ctx: &mut CommandContext, at: &ActivityExecution) -> Result<(), EngineError> {
        let ActivityKind::IntermediateThrowEvent { event_name, is_async } = &at.activity.kind else {
            return Err(EngineError::Internal(format!(
                "activity '{}' is not a throw event",
                at.activity.id
            )));
        };
        throw_signal(ctx, event_name, &Variables::new(), *is_async).await?;

        // Inline delivery can interrupt or expand the thrower's own scope.
        if let Some(execution_id) = tree::replacement(ctx, at.execution.id, &at.activity.id).await? {
            ctx.push_operation(Operation::Leave { execution_id });
        }
        Ok(())
    }
}

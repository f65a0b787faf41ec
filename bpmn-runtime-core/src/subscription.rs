//! Event Subscription Registry.
//!
//! Subscriptions live in the entity store under a `(event_type, event_name)`
//! index. Lookups go through the [`CommandContext`], so a subscription
//! created or removed earlier in the same command is seen by later lookups.
//!
//! Catch subscriptions are owned by an execution: either the execution
//! waiting at the catching event, or the scope execution for the start
//! event of an event sub-process. Start subscriptions are owned by nobody
//! and carry the target process-definition id in `configuration`.

use crate::behavior::{self, ActivityExecution};
use crate::context::CommandContext;
use crate::definition::{ActivityKind, ProcessDefinition};
use crate::error::EngineError;
use crate::events::RuntimeEvent;
use crate::tree;
use crate::types::*;
use uuid::Uuid;

/// Register interest in an event.
///
/// A catch owner must be live and either waiting at `activity_id` or be
/// the scope of the event sub-process that `activity_id` starts.
pub async fn subscribe(
    ctx: &mut CommandContext,
    target: SubscriptionTarget,
    event_type: EventType,
    event_name: &str,
    activity_id: &str,
) -> Result<EventSubscription, EngineError> {
    let (execution_id, process_instance_id, configuration) = match target {
        SubscriptionTarget::Execution(owner_id) => {
            let owner = tree::live(ctx, owner_id).await?;
            if !owner.is_at(activity_id) {
                let definition = ctx.definition_of(&owner).await?;
                if !starts_event_subprocess(&definition, activity_id) {
                    return Err(EngineError::precondition(format!(
                        "Execution '{}' is not waiting at activity '{}'",
                        owner_id, activity_id
                    )));
                }
            }
            (Some(owner.id), Some(owner.process_instance_id), None)
        }
        SubscriptionTarget::Start { configuration } => (None, None, configuration),
    };

    let subscription = EventSubscription {
        id: Uuid::now_v7(),
        event_type,
        event_name: event_name.to_string(),
        execution_id,
        process_instance_id,
        activity_id: activity_id.to_string(),
        configuration,
        created_at: ctx.now(),
        revision: 0,
    };
    ctx.insert_subscription(subscription.clone());
    ctx.record_event(
        process_instance_id,
        RuntimeEvent::EventSubscribed {
            subscription_id: subscription.id,
            event_type,
            event_name: event_name.to_string(),
            activity_id: activity_id.to_string(),
        },
    );
    Ok(subscription)
}

/// Catch subscriptions for `(event_type, event_name)`, in creation order.
pub async fn find_catch_by_event_name_and_type(
    ctx: &mut CommandContext,
    event_name: &str,
    event_type: EventType,
) -> Result<Vec<EventSubscription>, EngineError> {
    let mut found: Vec<EventSubscription> = ctx
        .find_subscriptions_by_event(event_type, event_name)
        .await?
        .into_iter()
        .filter(EventSubscription::is_catch)
        .collect();
    found.sort_by_key(|s| (s.created_at, s.id));
    Ok(found)
}

/// Start subscriptions for `(event_type, event_name)`, in creation order.
pub async fn find_start_by_event_name_and_type(
    ctx: &mut CommandContext,
    event_name: &str,
    event_type: EventType,
) -> Result<Vec<EventSubscription>, EngineError> {
    let mut found: Vec<EventSubscription> = ctx
        .find_subscriptions_by_event(event_type, event_name)
        .await?
        .into_iter()
        .filter(EventSubscription::is_start)
        .collect();
    found.sort_by_key(|s| (s.created_at, s.id));
    Ok(found)
}

pub async fn remove(ctx: &mut CommandContext, subscription_id: Uuid) -> Result<(), EngineError> {
    if ctx.find_subscription(subscription_id).await?.is_none() {
        return Err(EngineError::not_found("EventSubscription", subscription_id));
    }
    ctx.delete_subscription(subscription_id)
}

/// Remove every subscription owned by an execution. Returns how many.
pub async fn remove_all_owned_by(ctx: &mut CommandContext, execution_id: Uuid) -> Result<usize, EngineError> {
    let owned = ctx.find_subscriptions_by_execution(execution_id).await?;
    for sub in &owned {
        ctx.delete_subscription(sub.id)?;
    }
    Ok(owned.len())
}

/// Remove the catch subscriptions an execution holds for one activity.
pub async fn remove_at_activity(
    ctx: &mut CommandContext,
    execution_id: Uuid,
    activity_id: &str,
) -> Result<(), EngineError> {
    for sub in ctx.find_subscriptions_by_execution(execution_id).await? {
        if sub.activity_id == activity_id {
            ctx.delete_subscription(sub.id)?;
        }
    }
    Ok(())
}

/// Register the start subscriptions of the event sub-processes directly
/// inside `scope` (`None` = process level), owned by `scope_execution_id`.
pub async fn subscribe_event_subprocesses(
    ctx: &mut CommandContext,
    scope_execution_id: Uuid,
    definition: &ProcessDefinition,
    scope: Option<&str>,
) -> Result<(), EngineError> {
    for start in definition.event_subprocess_starts(scope) {
        let Some(trigger) = start.trigger() else {
            continue;
        };
        subscribe(
            ctx,
            SubscriptionTarget::Execution(scope_execution_id),
            trigger.event_type(),
            &trigger.event_name(&start.id),
            &start.id,
        )
        .await?;
    }
    Ok(())
}

fn starts_event_subprocess(definition: &ProcessDefinition, activity_id: &str) -> bool {
    definition
        .find_activity(activity_id)
        .filter(|a| matches!(a.kind, ActivityKind::StartEvent { .. }))
        .and_then(|a| a.parent.as_deref())
        .and_then(|parent| definition.find_activity(parent))
        .is_some_and(|parent| parent.is_event_subprocess())
}

/// Deliver an event to a catch subscription.
///
/// With `is_async` the continuation is queued as a job in the same unit of
/// work and nothing else happens now. Otherwise the owning execution's
/// continuation runs inline: the catching activity is signaled, or the
/// event sub-process is entered.
pub async fn event_received(
    ctx: &mut CommandContext,
    subscription: &EventSubscription,
    payload: &Variables,
    is_async: bool,
) -> Result<(), EngineError> {
    let Some(execution_id) = subscription.execution_id else {
        return Err(EngineError::precondition(format!(
            "Subscription '{}' is a start subscription and has no execution to deliver to",
            subscription.id
        )));
    };

    ctx.record_event(
        subscription.process_instance_id,
        RuntimeEvent::EventReceived {
            subscription_id: subscription.id,
            execution_id,
            event_type: subscription.event_type,
            event_name: subscription.event_name.clone(),
            activity_id: subscription.activity_id.clone(),
            deferred: is_async,
        },
    );

    if is_async {
        let job = Job {
            id: Uuid::now_v7(),
            subscription_id: subscription.id,
            execution_id: Some(execution_id),
            process_instance_id: subscription.process_instance_id,
            payload: if payload.is_empty() {
                None
            } else {
                Some(serde_json::to_value(payload).map_err(|e| EngineError::Internal(e.to_string()))?)
            },
            retries: ctx.config().job_executor.default_retries,
            due_at: ctx.now(),
            lock_owner: None,
            lock_expires_at: None,
            exception_message: None,
            created_at: ctx.now(),
            revision: 0,
        };
        tracing::debug!(
            job_id = %job.id,
            subscription_id = %subscription.id,
            "Event delivery deferred to job"
        );
        ctx.insert_job(job);
        return Ok(());
    }

    let execution = tree::live(ctx, execution_id).await?;
    let definition = ctx.definition_of(&execution).await?;

    if starts_event_subprocess(&definition, &subscription.activity_id) {
        return trigger_event_subprocess(ctx, subscription, execution.id, &definition, payload).await;
    }

    if !execution.is_at(&subscription.activity_id) {
        return Err(EngineError::precondition(format!(
            "Execution '{}' is not waiting at activity '{}'",
            execution_id, subscription.activity_id
        )));
    }
    let activity = definition
        .find_activity(&subscription.activity_id)
        .cloned()
        .ok_or_else(|| EngineError::not_found("Activity", &subscription.activity_id))?;

    let at = ActivityExecution {
        execution,
        definition,
        activity,
    };
    behavior::behavior_for(&at.activity.kind)
        .signal(ctx, &at, &subscription.event_name, payload)
        .await
}

/// Enter an event sub-process whose start subscription `subscription`
/// (owned by `scope_id`) fired.
async fn trigger_event_subprocess(
    ctx: &mut CommandContext,
    subscription: &EventSubscription,
    scope_id: Uuid,
    definition: &ProcessDefinition,
    payload: &Variables,
) -> Result<(), EngineError> {
    let start = definition
        .find_activity(&subscription.activity_id)
        .ok_or_else(|| EngineError::not_found("Activity", &subscription.activity_id))?;
    let interrupting = matches!(start.kind, ActivityKind::StartEvent { interrupting: true, .. });
    let esp_id = start
        .parent
        .clone()
        .ok_or_else(|| EngineError::Internal(format!("start event '{}' has no event sub-process", start.id)))?;

    let host = if interrupting {
        tree::cancel_children(ctx, scope_id, &format!("interrupted by event sub-process '{}'", esp_id)).await?;
        remove_all_owned_by(ctx, scope_id).await?;
        let mut scope = ctx.execution(scope_id).await?;
        scope.activity_id = Some(esp_id.clone());
        scope.active = false;
        ctx.update_execution(scope)?;
        scope_id
    } else {
        let branch = tree::create_concurrent_child(ctx, scope_id).await?;
        let mut branch_execution = ctx.execution(branch).await?;
        branch_execution.activity_id = Some(esp_id.clone());
        ctx.update_execution(branch_execution)?;
        branch
    };

    tracing::debug!(
        scope_execution_id = %scope_id,
        event_subprocess = %esp_id,
        interrupting,
        "Entering event sub-process"
    );
    let child = tree::create_child_scope(ctx, host, definition, &esp_id, &start.id).await?;
    tree::set_variables(ctx, child, payload).await?;
    ctx.push_operation(behavior::agenda::Operation::Execute { execution_id: child });
    Ok(())
}

/// Start a process instance from a start subscription.
///
/// A subscription without configuration is a fatal configuration error. A
/// definition that is missing or suspended is skipped: logged, recorded as
/// `StartSkipped`, and `None` is returned.
pub async fn start_from_subscription(
    ctx: &mut CommandContext,
    subscription: &EventSubscription,
    business_key: Option<String>,
    payload: &Variables,
) -> Result<Option<Uuid>, EngineError> {
    let Some(definition_id) = subscription.configuration.clone() else {
        return Err(EngineError::Configuration(format!(
            "Configuration of {} start event subscription '{}' contains no process definition id.",
            subscription.event_type, subscription.id
        )));
    };

    let reason = match ctx.find_deployed_process_definition(&definition_id).await? {
        None => "process definition not found",
        Some(definition) if definition.suspended => "process definition is suspended",
        Some(definition) => {
            let instance = tree::start_process_instance(
                ctx,
                &definition,
                &subscription.activity_id,
                business_key,
                payload,
            )
            .await?;
            return Ok(Some(instance));
        }
    };

    tracing::debug!(
        subscription_id = %subscription.id,
        process_definition_id = %definition_id,
        reason,
        "Start subscription skipped"
    );
    ctx.record_event(
        None,
        RuntimeEvent::StartSkipped {
            subscription_id: subscription.id,
            process_definition_id: definition_id,
            reason: reason.to_string(),
        },
    );
    Ok(None)
}

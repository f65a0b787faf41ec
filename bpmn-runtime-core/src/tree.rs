//! Execution Tree Manager.
//!
//! Executions form an arena addressed by id. Every function here loads what
//! it touches from the [`CommandContext`] by id and writes it back, so no
//! caller holds a stale copy across a tree operation.
//!
//! Shapes the tree can take:
//! - a scope execution positioned at an activity (single path);
//! - a scope execution with no activity whose concurrent children carry the
//!   parallel branches (a fork container);
//! - an execution waiting at a sub-process activity with one child scope
//!   execution running the sub-process content.

use crate::behavior::agenda::Operation;
use crate::context::CommandContext;
use crate::definition::ProcessDefinition;
use crate::error::EngineError;
use crate::events::RuntimeEvent;
use crate::subscription;
use crate::types::*;
use uuid::Uuid;

/// What ending an execution did to its surroundings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOutcome {
    /// The root ended: the process instance is complete.
    InstanceEnded,
    /// A concurrent branch ended while siblings are still running.
    BranchEnded,
    /// The last concurrent branch of a scope ended; the scope itself must end.
    ScopeCompleted(Uuid),
    /// A child scope ended; its parent resumes and leaves its activity.
    ScopeExited(Uuid),
}

fn new_execution(
    process_instance_id: Uuid,
    process_definition_id: &str,
    parent_id: Option<Uuid>,
    business_key: Option<String>,
) -> Execution {
    let id = Uuid::now_v7();
    Execution {
        id,
        process_instance_id: if parent_id.is_none() { id } else { process_instance_id },
        process_definition_id: process_definition_id.to_string(),
        parent_id,
        child_ids: Vec::new(),
        activity_id: None,
        active: false,
        ended: false,
        canceled: false,
        concurrent: false,
        scope: false,
        variables: Variables::new(),
        business_key,
        revision: 0,
    }
}

/// Create the root execution of a new process instance positioned at
/// `start_activity_id` and register the instance's event sub-process
/// subscriptions. The caller schedules the first activity.
pub async fn create_root(
    ctx: &mut CommandContext,
    definition: &ProcessDefinition,
    start_activity_id: &str,
    business_key: Option<String>,
) -> Result<Execution, EngineError> {
    if definition.find_activity(start_activity_id).is_none() {
        return Err(EngineError::Configuration(format!(
            "start activity '{}' not found in process definition '{}'",
            start_activity_id, definition.id
        )));
    }
    let mut root = new_execution(Uuid::nil(), &definition.id, None, business_key.clone());
    root.scope = true;
    root.active = true;
    root.activity_id = Some(start_activity_id.to_string());
    let root_id = root.id;
    ctx.insert_execution(root);

    ctx.record_event(
        Some(root_id),
        RuntimeEvent::InstanceStarted {
            process_definition_id: definition.id.clone(),
            start_activity_id: start_activity_id.to_string(),
            business_key,
        },
    );
    subscription::subscribe_event_subprocesses(ctx, root_id, definition, None).await?;
    tracing::debug!(
        process_instance_id = %root_id,
        process_definition_id = %definition.id,
        start_activity_id,
        "Process instance created"
    );
    ctx.execution(root_id).await
}

/// Create a process instance at `start_activity_id`, apply the initial
/// variables and schedule the start activity on the current agenda.
pub async fn start_process_instance(
    ctx: &mut CommandContext,
    definition: &ProcessDefinition,
    start_activity_id: &str,
    business_key: Option<String>,
    variables: &Variables,
) -> Result<Uuid, EngineError> {
    let root = create_root(ctx, definition, start_activity_id, business_key).await?;
    set_variables(ctx, root.id, variables).await?;
    ctx.push_operation(Operation::Execute { execution_id: root.id });
    Ok(root.id)
}

/// Create a child scope under `parent_id` for the sub-process
/// `scope_activity_id`, positioned at `start_activity_id`. The parent stays
/// at the sub-process activity, inactive, until the child scope exits.
pub async fn create_child_scope(
    ctx: &mut CommandContext,
    parent_id: Uuid,
    definition: &ProcessDefinition,
    scope_activity_id: &str,
    start_activity_id: &str,
) -> Result<Uuid, EngineError> {
    let mut parent = live(ctx, parent_id).await?;
    let mut child = new_execution(
        parent.process_instance_id,
        &parent.process_definition_id,
        Some(parent.id),
        None,
    );
    child.scope = true;
    child.active = true;
    child.activity_id = Some(start_activity_id.to_string());
    let child_id = child.id;

    parent.active = false;
    parent.child_ids.push(child_id);
    ctx.update_execution(parent)?;
    ctx.insert_execution(child);

    subscription::subscribe_event_subprocesses(ctx, child_id, definition, Some(scope_activity_id)).await?;
    Ok(child_id)
}

/// Add a concurrent child under `parent_id`.
///
/// When the parent is a single path it is expanded first: its activity,
/// active flag, children and catch subscriptions move to a new concurrent
/// child, and the parent becomes a pure container. The returned child has
/// no activity yet.
pub async fn create_concurrent_child(ctx: &mut CommandContext, parent_id: Uuid) -> Result<Uuid, EngineError> {
    let mut parent = live(ctx, parent_id).await?;
    let mut forked = Vec::new();

    if parent.activity_id.is_some() {
        let mut moved = new_execution(
            parent.process_instance_id,
            &parent.process_definition_id,
            Some(parent.id),
            None,
        );
        moved.concurrent = true;
        moved.activity_id = parent.activity_id.take();
        moved.active = parent.active;
        moved.child_ids = std::mem::take(&mut parent.child_ids);
        let moved_id = moved.id;

        for child_id in &moved.child_ids {
            let mut child = ctx.execution(*child_id).await?;
            child.parent_id = Some(moved_id);
            ctx.update_execution(child)?;
        }
        if let Some(activity_id) = &moved.activity_id {
            for mut sub in ctx.find_subscriptions_by_execution(parent.id).await? {
                if sub.activity_id == *activity_id {
                    sub.execution_id = Some(moved_id);
                    ctx.update_subscription(sub)?;
                }
            }
        }

        parent.active = false;
        parent.child_ids.push(moved_id);
        ctx.insert_execution(moved);
        forked.push(moved_id);
    }

    let mut child = new_execution(
        parent.process_instance_id,
        &parent.process_definition_id,
        Some(parent.id),
        None,
    );
    child.concurrent = true;
    let child_id = child.id;
    parent.child_ids.push(child_id);
    forked.push(child_id);

    let process_instance_id = parent.process_instance_id;
    ctx.update_execution(parent)?;
    ctx.insert_execution(child);
    ctx.record_event(
        Some(process_instance_id),
        RuntimeEvent::ExecutionForked {
            parent_id,
            children: forked,
        },
    );
    Ok(child_id)
}

/// Split `execution_id` into `branches` concurrent executions, returned in
/// order. A concurrent execution is reused for the first branch and gets
/// siblings; a single path becomes the container of new children.
pub async fn fork(ctx: &mut CommandContext, execution_id: Uuid, branches: usize) -> Result<Vec<Uuid>, EngineError> {
    let mut execution = live(ctx, execution_id).await?;
    let mut ids = Vec::with_capacity(branches);

    let container_id = if execution.concurrent {
        ids.push(execution.id);
        execution
            .parent_id
            .ok_or_else(|| EngineError::Internal(format!("concurrent execution '{}' has no parent", execution.id)))?
    } else {
        execution.activity_id = None;
        execution.active = false;
        ctx.update_execution(execution.clone())?;
        execution.id
    };

    let mut container = ctx.execution(container_id).await?;
    while ids.len() < branches {
        let mut child = new_execution(
            container.process_instance_id,
            &container.process_definition_id,
            Some(container.id),
            None,
        );
        child.concurrent = true;
        child.active = true;
        ids.push(child.id);
        container.child_ids.push(child.id);
        ctx.insert_execution(child);
    }
    let process_instance_id = container.process_instance_id;
    ctx.update_execution(container)?;

    ctx.record_event(
        Some(process_instance_id),
        RuntimeEvent::ExecutionForked {
            parent_id: container_id,
            children: ids.clone(),
        },
    );
    Ok(ids)
}

/// Arrive at a joining gateway. Returns the execution that continues once
/// `incoming` branches have arrived, `None` while the join still waits.
pub async fn join(
    ctx: &mut CommandContext,
    execution_id: Uuid,
    gateway_id: &str,
    incoming: usize,
) -> Result<Option<Uuid>, EngineError> {
    let mut execution = live(ctx, execution_id).await?;
    execution.activity_id = Some(gateway_id.to_string());
    execution.active = false;
    ctx.update_execution(execution.clone())?;

    let Some(parent_id) = execution.parent_id.filter(|_| execution.concurrent) else {
        if incoming <= 1 {
            execution.active = true;
            ctx.update_execution(execution)?;
            return Ok(Some(execution_id));
        }
        return Ok(None);
    };

    let mut parent = ctx.execution(parent_id).await?;
    let waiting: Vec<Execution> = ctx
        .children(&parent)
        .await?
        .into_iter()
        .filter(|c| c.concurrent && c.is_live() && !c.active && c.is_at(gateway_id))
        .collect();
    if waiting.len() < incoming {
        return Ok(None);
    }

    let joined: Vec<Uuid> = waiting.iter().take(incoming).map(|e| e.id).collect();
    let continuing = if joined.len() == parent.child_ids.len() {
        for id in &joined {
            ctx.delete_execution(*id)?;
        }
        parent.child_ids.clear();
        parent.activity_id = Some(gateway_id.to_string());
        parent.active = true;
        parent.id
    } else {
        let keep = if joined.contains(&execution_id) {
            execution_id
        } else {
            joined[0]
        };
        for id in joined.iter().filter(|id| **id != keep) {
            ctx.delete_execution(*id)?;
        }
        parent.child_ids.retain(|id| *id == keep || !joined.contains(id));
        let mut kept = ctx.execution(keep).await?;
        kept.active = true;
        ctx.update_execution(kept)?;
        keep
    };
    let process_instance_id = parent.process_instance_id;
    ctx.update_execution(parent)?;

    ctx.record_event(
        Some(process_instance_id),
        RuntimeEvent::JoinReleased {
            gateway_id: gateway_id.to_string(),
            execution_id: continuing,
        },
    );
    Ok(Some(continuing))
}

/// End an execution whose path is complete.
///
/// Removes its subscriptions. The root is kept, marked ended; any other
/// execution is detached from its parent and removed.
pub async fn end(ctx: &mut CommandContext, execution_id: Uuid) -> Result<EndOutcome, EngineError> {
    let mut execution = live(ctx, execution_id).await?;
    if !ctx.children(&execution).await?.is_empty() {
        return Err(EngineError::precondition(format!(
            "Execution '{}' cannot end while it has child executions",
            execution_id
        )));
    }
    subscription::remove_all_owned_by(ctx, execution_id).await?;

    let Some(parent_id) = execution.parent_id else {
        execution.ended = true;
        execution.active = false;
        ctx.update_execution(execution)?;
        ctx.record_event(Some(execution_id), RuntimeEvent::InstanceCompleted);
        tracing::debug!(process_instance_id = %execution_id, "Process instance completed");
        return Ok(EndOutcome::InstanceEnded);
    };

    let mut parent = ctx.execution(parent_id).await?;
    parent.child_ids.retain(|id| *id != execution_id);
    ctx.delete_execution(execution_id)?;

    let outcome = if execution.concurrent {
        if parent.child_ids.is_empty() {
            parent.active = true;
            EndOutcome::ScopeCompleted(parent_id)
        } else {
            EndOutcome::BranchEnded
        }
    } else {
        parent.active = true;
        EndOutcome::ScopeExited(parent_id)
    };
    ctx.update_execution(parent)?;
    Ok(outcome)
}

/// Cancel an execution and, with `cascade`, all its descendants, children
/// before parents. Every subscription owned by a canceled execution is
/// removed in the same step. Without `cascade`, live children are a
/// precondition failure.
pub async fn cancel(
    ctx: &mut CommandContext,
    execution_id: Uuid,
    cascade: bool,
    reason: &str,
) -> Result<(), EngineError> {
    let execution = live(ctx, execution_id).await?;
    if !cascade && !ctx.children(&execution).await?.is_empty() {
        return Err(EngineError::precondition(format!(
            "Execution '{}' has child executions; cancel with cascade",
            execution_id
        )));
    }

    // Pre-order walk; reversed it visits every child before its parent.
    let mut order = Vec::new();
    let mut stack = vec![execution_id];
    while let Some(id) = stack.pop() {
        if let Some(e) = ctx.find_execution(id).await? {
            stack.extend(e.child_ids.iter().copied());
            order.push(id);
        }
    }
    for id in order.into_iter().rev() {
        cancel_one(ctx, id, reason).await?;
    }
    Ok(())
}

/// Cancel every descendant of `scope_id`, leaving the scope itself live.
pub async fn cancel_children(ctx: &mut CommandContext, scope_id: Uuid, reason: &str) -> Result<(), EngineError> {
    let scope = live(ctx, scope_id).await?;
    for child_id in scope.child_ids {
        if is_active(ctx, child_id).await? {
            cancel(ctx, child_id, true, reason).await?;
        }
    }
    Ok(())
}

async fn cancel_one(ctx: &mut CommandContext, execution_id: Uuid, reason: &str) -> Result<(), EngineError> {
    let mut execution = ctx.execution(execution_id).await?;
    subscription::remove_all_owned_by(ctx, execution_id).await?;

    match execution.parent_id {
        None => {
            execution.canceled = true;
            execution.active = false;
            execution.child_ids.clear();
            ctx.update_execution(execution)?;
            ctx.record_event(
                Some(execution_id),
                RuntimeEvent::InstanceCanceled {
                    reason: reason.to_string(),
                },
            );
        }
        Some(parent_id) => {
            if let Some(mut parent) = ctx.find_execution(parent_id).await? {
                parent.child_ids.retain(|id| *id != execution_id);
                ctx.update_execution(parent)?;
            }
            ctx.delete_execution(execution_id)?;
            ctx.record_event(
                Some(execution.process_instance_id),
                RuntimeEvent::ExecutionCanceled {
                    execution_id,
                    reason: reason.to_string(),
                },
            );
        }
    }
    Ok(())
}

/// True when the execution exists and is neither ended nor canceled.
pub async fn is_active(ctx: &mut CommandContext, execution_id: Uuid) -> Result<bool, EngineError> {
    Ok(ctx
        .find_execution(execution_id)
        .await?
        .is_some_and(|e| e.is_live()))
}

/// The execution that now carries the work `execution_id` was doing at
/// `activity_id`. Usually that is the execution itself; after it was
/// expanded into a fork container it is the concurrent child that took
/// over its activity. `None` when the work was interrupted.
pub async fn replacement(
    ctx: &mut CommandContext,
    execution_id: Uuid,
    activity_id: &str,
) -> Result<Option<Uuid>, EngineError> {
    let Some(execution) = ctx.find_execution(execution_id).await? else {
        return Ok(None);
    };
    if !execution.is_live() {
        return Ok(None);
    }
    if execution.active && execution.is_at(activity_id) {
        return Ok(Some(execution_id));
    }
    if execution.activity_id.is_none() {
        for child in ctx.children(&execution).await? {
            if child.concurrent && child.is_live() && child.active && child.is_at(activity_id) {
                return Ok(Some(child.id));
            }
        }
    }
    Ok(None)
}

/// Load an execution that must still be live.
pub async fn live(ctx: &mut CommandContext, execution_id: Uuid) -> Result<Execution, EngineError> {
    let execution = ctx.execution(execution_id).await?;
    if !execution.is_live() {
        return Err(EngineError::precondition(format!(
            "Execution '{}' is not active",
            execution_id
        )));
    }
    Ok(execution)
}

/// Nearest enclosing scope execution, the execution itself included.
pub async fn scope_of(ctx: &mut CommandContext, execution_id: Uuid) -> Result<Execution, EngineError> {
    let mut current = ctx.execution(execution_id).await?;
    while !current.scope {
        let parent_id = current.parent_id.ok_or_else(|| {
            EngineError::Internal(format!("execution '{}' has no enclosing scope", current.id))
        })?;
        current = ctx.execution(parent_id).await?;
    }
    Ok(current)
}

/// Live executions of one instance, pre-order from the root.
pub async fn instance_tree(ctx: &mut CommandContext, process_instance_id: Uuid) -> Result<Vec<Execution>, EngineError> {
    let mut tree = Vec::new();
    let mut stack = vec![process_instance_id];
    while let Some(id) = stack.pop() {
        if let Some(e) = ctx.find_execution(id).await? {
            stack.extend(e.child_ids.iter().rev().copied());
            tree.push(e);
        }
    }
    Ok(tree)
}

// ─── Variables ────────────────────────────────────────────────

/// Variables visible from an execution: outer scopes first, inner scopes
/// overriding.
pub async fn get_variables(ctx: &mut CommandContext, execution_id: Uuid) -> Result<Variables, EngineError> {
    let mut chain = Vec::new();
    let mut next = Some(execution_id);
    while let Some(id) = next {
        let e = ctx.execution(id).await?;
        next = e.parent_id;
        chain.push(e);
    }
    let mut visible = Variables::new();
    for e in chain.into_iter().rev() {
        visible.extend(e.variables);
    }
    Ok(visible)
}

pub async fn get_variable(
    ctx: &mut CommandContext,
    execution_id: Uuid,
    name: &str,
) -> Result<Option<serde_json::Value>, EngineError> {
    Ok(get_variables(ctx, execution_id).await?.remove(name))
}

/// Write a variable on the nearest scope that already defines it, else on
/// the process instance.
pub async fn set_variable(
    ctx: &mut CommandContext,
    execution_id: Uuid,
    name: &str,
    value: serde_json::Value,
) -> Result<(), EngineError> {
    let mut target = None;
    let mut root = execution_id;
    let mut next = Some(execution_id);
    while let Some(id) = next {
        let e = ctx.execution(id).await?;
        if target.is_none() && e.scope && e.variables.contains_key(name) {
            target = Some(e.id);
        }
        root = e.id;
        next = e.parent_id;
    }

    let mut owner = ctx.execution(target.unwrap_or(root)).await?;
    owner.variables.insert(name.to_string(), value.clone());
    let (owner_id, process_instance_id) = (owner.id, owner.process_instance_id);
    ctx.update_execution(owner)?;
    ctx.record_event(
        Some(process_instance_id),
        RuntimeEvent::VariableUpdated {
            execution_id: owner_id,
            name: name.to_string(),
            value,
        },
    );
    Ok(())
}

pub async fn set_variables(ctx: &mut CommandContext, execution_id: Uuid, variables: &Variables) -> Result<(), EngineError> {
    for (name, value) in variables {
        set_variable(ctx, execution_id, name, value.clone()).await?;
    }
    Ok(())
}

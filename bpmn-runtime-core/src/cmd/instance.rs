//! Process instance lifecycle and read-side commands.

use crate::behavior::{behavior_for, ActivityExecution};
use crate::context::CommandContext;
use crate::error::EngineError;
use crate::executor::Command;
use crate::tree;
use crate::types::*;
use async_trait::async_trait;
use uuid::Uuid;

/// Which definition a start refers to.
#[derive(Debug, Clone, PartialEq)]
pub enum DefinitionRef {
    /// Latest deployed version of a process key.
    Key(String),
    Id(String),
}

pub struct StartProcessInstanceCmd {
    pub definition: DefinitionRef,
    pub business_key: Option<String>,
    pub variables: Variables,
}

impl StartProcessInstanceCmd {
    pub fn by_key(key: &str) -> Self {
        Self {
            definition: DefinitionRef::Key(key.to_string()),
            business_key: None,
            variables: Variables::new(),
        }
    }

    pub fn by_id(id: &str) -> Self {
        Self {
            definition: DefinitionRef::Id(id.to_string()),
            business_key: None,
            variables: Variables::new(),
        }
    }

    pub fn business_key(mut self, business_key: &str) -> Self {
        self.business_key = Some(business_key.to_string());
        self
    }

    pub fn variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }
}

#[async_trait]
impl Command for StartProcessInstanceCmd {
    type Output = Uuid;

    fn name(&self) -> &'static str {
        "start_process_instance"
    }

    async fn execute(&self, ctx: &mut CommandContext) -> Result<Uuid, EngineError> {
        let record = match &self.definition {
            DefinitionRef::Key(key) => ctx
                .find_latest_definition_by_key(key)
                .await?
                .ok_or_else(|| EngineError::not_found("ProcessDefinition", format!("key {}", key)))?,
            DefinitionRef::Id(id) => ctx
                .find_definition_record(id)
                .await?
                .ok_or_else(|| EngineError::not_found("ProcessDefinition", id))?,
        };
        if record.suspended {
            return Err(EngineError::precondition(format!(
                "Cannot start process instance. Process definition '{}' is suspended",
                record.id
            )));
        }

        let definition = ctx
            .find_deployed_process_definition(&record.id)
            .await?
            .ok_or_else(|| EngineError::not_found("ProcessDefinition", &record.id))?;
        let initial = definition.initial(None).ok_or_else(|| {
            EngineError::precondition(format!(
                "Process definition '{}' has no none start event and can only be started by an event",
                record.id
            ))
        })?;

        let instance = tree::start_process_instance(
            ctx,
            &definition,
            &initial.id,
            self.business_key.clone(),
            &self.variables,
        )
        .await?;
        tracing::info!(
            process_instance_id = %instance,
            process_definition_id = %record.id,
            "Process instance started"
        );
        Ok(instance)
    }
}

/// Cancel a whole process instance, every descendant included.
pub struct CancelProcessInstanceCmd {
    pub process_instance_id: Uuid,
    pub reason: String,
}

#[async_trait]
impl Command for CancelProcessInstanceCmd {
    type Output = ();

    fn name(&self) -> &'static str {
        "cancel_process_instance"
    }

    async fn execute(&self, ctx: &mut CommandContext) -> Result<(), EngineError> {
        let root = ctx.execution(self.process_instance_id).await?;
        if !root.is_root() {
            return Err(EngineError::precondition(format!(
                "Execution '{}' is not a process instance",
                root.id
            )));
        }
        tree::cancel(ctx, root.id, true, &self.reason).await
    }
}

/// Resume an execution waiting at a wait-state activity.
pub struct TriggerCmd {
    pub execution_id: Uuid,
    pub signal_name: Option<String>,
    pub variables: Variables,
}

impl TriggerCmd {
    pub fn new(execution_id: Uuid) -> Self {
        Self {
            execution_id,
            signal_name: None,
            variables: Variables::new(),
        }
    }

    pub fn variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }
}

#[async_trait]
impl Command for TriggerCmd {
    type Output = ();

    fn name(&self) -> &'static str {
        "trigger"
    }

    async fn execute(&self, ctx: &mut CommandContext) -> Result<(), EngineError> {
        let execution = tree::live(ctx, self.execution_id).await?;
        let Some(activity_id) = execution.activity_id.clone().filter(|_| execution.active) else {
            return Err(EngineError::precondition(format!(
                "Execution '{}' is not waiting at an activity",
                self.execution_id
            )));
        };
        let definition = ctx.definition_of(&execution).await?;
        let activity = definition
            .find_activity(&activity_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("Activity", &activity_id))?;

        let at = ActivityExecution {
            execution,
            definition,
            activity,
        };
        let signal_name = self.signal_name.as_deref().unwrap_or(&at.activity.id);
        behavior_for(&at.activity.kind)
            .signal(ctx, &at, signal_name, &self.variables)
            .await
    }
}

pub struct SetVariablesCmd {
    pub execution_id: Uuid,
    pub variables: Variables,
}

#[async_trait]
impl Command for SetVariablesCmd {
    type Output = ();

    fn name(&self) -> &'static str {
        "set_variables"
    }

    async fn execute(&self, ctx: &mut CommandContext) -> Result<(), EngineError> {
        tree::live(ctx, self.execution_id).await?;
        tree::set_variables(ctx, self.execution_id, &self.variables).await
    }
}

/// Variables visible from an execution.
pub struct GetVariablesCmd {
    pub execution_id: Uuid,
}

#[async_trait]
impl Command for GetVariablesCmd {
    type Output = Variables;

    fn name(&self) -> &'static str {
        "get_variables"
    }

    async fn execute(&self, ctx: &mut CommandContext) -> Result<Variables, EngineError> {
        tree::get_variables(ctx, self.execution_id).await
    }
}

/// Point-in-time view of one process instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessInstanceSnapshot {
    pub process_instance_id: Uuid,
    pub process_definition_id: String,
    pub business_key: Option<String>,
    pub ended: bool,
    pub canceled: bool,
    /// Pre-order from the root.
    pub executions: Vec<Execution>,
    /// Catch subscriptions owned by any execution of the instance.
    pub subscriptions: Vec<EventSubscription>,
}

impl ProcessInstanceSnapshot {
    pub fn root(&self) -> Option<&Execution> {
        self.executions.first()
    }

    pub fn is_running(&self) -> bool {
        !self.ended && !self.canceled
    }

    /// Activities some execution is currently waiting at, sorted.
    pub fn active_activity_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .executions
            .iter()
            .filter(|e| e.active && e.is_live())
            .filter_map(|e| e.activity_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// The live execution waiting at `activity_id`, if exactly one is.
    pub fn execution_at(&self, activity_id: &str) -> Option<&Execution> {
        let mut waiting = self
            .executions
            .iter()
            .filter(|e| e.active && e.is_at(activity_id));
        match (waiting.next(), waiting.next()) {
            (Some(e), None) => Some(e),
            _ => None,
        }
    }

    pub fn variables(&self) -> Variables {
        self.root().map(|r| r.variables.clone()).unwrap_or_default()
    }
}

pub struct GetProcessInstanceCmd {
    pub process_instance_id: Uuid,
}

#[async_trait]
impl Command for GetProcessInstanceCmd {
    type Output = ProcessInstanceSnapshot;

    fn name(&self) -> &'static str {
        "get_process_instance"
    }

    async fn execute(&self, ctx: &mut CommandContext) -> Result<ProcessInstanceSnapshot, EngineError> {
        let root = ctx.execution(self.process_instance_id).await?;
        if !root.is_root() {
            return Err(EngineError::not_found("ProcessInstance", self.process_instance_id));
        }
        let executions = tree::instance_tree(ctx, root.id).await?;
        let mut subscriptions = Vec::new();
        for execution in &executions {
            subscriptions.extend(ctx.find_subscriptions_by_execution(execution.id).await?);
        }
        subscriptions.sort_by_key(|s| (s.created_at, s.id));

        Ok(ProcessInstanceSnapshot {
            process_instance_id: root.id,
            process_definition_id: root.process_definition_id,
            business_key: root.business_key,
            ended: root.ended,
            canceled: root.canceled,
            executions,
            subscriptions,
        })
    }
}

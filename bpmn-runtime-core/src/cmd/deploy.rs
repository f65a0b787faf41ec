//! Deployment lifecycle: deploy, undeploy, suspend.
//!
//! A deployment is validated as a whole before anything is written. Each
//! accepted model becomes a new [`DefinitionRecord`] version whose
//! process-level signal and message start events are registered as start
//! subscriptions carrying the new definition id. Only the latest version of
//! a key holds start subscriptions.
//!
//! Signal start names are additionally owned through [`SignalStartClaim`]
//! rows. Deploy and undeploy write the claim of every name they take or
//! give up, so concurrent deployments of one name conflict on commit and
//! the retried attempt sees the winner.

use crate::context::CommandContext;
use crate::definition::ProcessDefinition;
use crate::error::EngineError;
use crate::events::RuntimeEvent;
use crate::executor::Command;
use crate::model::build::build_definition;
use crate::model::checksum;
use crate::model::dto::ProcessModel;
use crate::model::validate::{signal_start_names, validate_model, validate_signal_universe, ValidationError};
use crate::subscription;
use crate::tree;
use crate::types::*;
use async_trait::async_trait;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Result of a deployment.
#[derive(Debug, Clone, PartialEq)]
pub struct Deployment {
    pub deployment_id: Uuid,
    /// Ids of the definitions created by this deployment.
    pub process_definition_ids: Vec<String>,
    /// Keys skipped because the latest version has the same checksum.
    pub unchanged: Vec<String>,
}

pub struct DeployCmd {
    pub models: Vec<ProcessModel>,
    /// Skip models identical to the latest deployed version of their key.
    pub skip_unchanged: bool,
}

impl DeployCmd {
    pub fn new(models: Vec<ProcessModel>) -> Self {
        Self {
            models,
            skip_unchanged: false,
        }
    }

    pub fn skip_unchanged(mut self) -> Self {
        self.skip_unchanged = true;
        self
    }

    async fn validate(&self, ctx: &mut CommandContext) -> Result<(), EngineError> {
        let mut errors: Vec<ValidationError> = Vec::new();

        let mut keys = BTreeSet::new();
        for model in &self.models {
            if !keys.insert(model.id.as_str()) {
                errors.push(ValidationError::new(
                    "D1",
                    Some(&model.id),
                    format!("process '{}' is deployed twice in one deployment", model.id),
                ));
            }
            errors.extend(validate_model(model));
        }

        let deployed = claimed_signal_starts(ctx, &self.models).await?;
        errors.extend(validate_signal_universe(&self.models, &deployed));

        if errors.is_empty() {
            Ok(())
        } else {
            tracing::info!(errors = errors.len(), "Deployment rejected");
            Err(EngineError::Validation(errors))
        }
    }
}

#[async_trait]
impl Command for DeployCmd {
    type Output = Deployment;

    fn name(&self) -> &'static str {
        "deploy"
    }

    async fn execute(&self, ctx: &mut CommandContext) -> Result<Deployment, EngineError> {
        self.validate(ctx).await?;

        let deployment_id = Uuid::now_v7();
        let mut deployment = Deployment {
            deployment_id,
            process_definition_ids: Vec::new(),
            unchanged: Vec::new(),
        };

        for model in &self.models {
            let checksum = checksum(model);
            let previous = ctx.find_latest_definition_by_key(&model.id).await?;
            if self.skip_unchanged && previous.as_ref().is_some_and(|p| p.checksum == checksum) {
                deployment.unchanged.push(model.id.clone());
                continue;
            }

            let version = previous.as_ref().map_or(1, |p| p.version + 1);
            let id = format!("{}:{}:{}", model.id, version, deployment_id);
            let definition = build_definition(&id, version, deployment_id, false, model)?;

            ctx.insert_definition_record(DefinitionRecord {
                id: id.clone(),
                key: model.id.clone(),
                version,
                deployment_id,
                name: model.name.clone(),
                suspended: false,
                checksum,
                model: model.clone(),
                deployed_at: ctx.now(),
                revision: 0,
            });

            let claimed = signal_start_names(model);
            if let Some(previous) = &previous {
                remove_start_subscriptions(ctx, &previous.id).await?;
                for name in signal_start_names(&previous.model) {
                    if !claimed.contains(&name) {
                        ctx.release_signal_start(&name, &model.id).await?;
                    }
                }
            }
            for name in &claimed {
                ctx.claim_signal_start(name, &model.id).await?;
            }
            add_start_subscriptions(ctx, &definition).await?;

            tracing::info!(
                process_definition_id = %id,
                key = %model.id,
                version,
                "Process definition deployed"
            );
            deployment.process_definition_ids.push(id);
        }

        if !deployment.process_definition_ids.is_empty() {
            ctx.record_event(
                None,
                RuntimeEvent::DeploymentCreated {
                    deployment_id,
                    process_definition_ids: deployment.process_definition_ids.clone(),
                },
            );
        }
        Ok(deployment)
    }
}

/// `(owning process key, signal name)` for every signal start name the
/// batch wants that is already claimed.
async fn claimed_signal_starts(
    ctx: &mut CommandContext,
    models: &[ProcessModel],
) -> Result<Vec<(String, String)>, EngineError> {
    let mut owners = Vec::new();
    for model in models {
        for name in signal_start_names(model) {
            if let Some(claim) = ctx.find_signal_claim(&name).await? {
                owners.push((claim.process_key, name));
            }
        }
    }
    Ok(owners)
}

async fn add_start_subscriptions(ctx: &mut CommandContext, definition: &ProcessDefinition) -> Result<(), EngineError> {
    for start in definition.triggered_start_events() {
        let Some(trigger) = start.trigger() else {
            continue;
        };
        subscription::subscribe(
            ctx,
            SubscriptionTarget::Start {
                configuration: Some(definition.id.clone()),
            },
            trigger.event_type(),
            &trigger.event_name(&start.id),
            &start.id,
        )
        .await?;
    }
    Ok(())
}

async fn remove_start_subscriptions(ctx: &mut CommandContext, definition_id: &str) -> Result<(), EngineError> {
    for sub in ctx.find_start_subscriptions_by_configuration(definition_id).await? {
        ctx.delete_subscription(sub.id)?;
    }
    Ok(())
}

/// Remove every definition of a deployment.
///
/// Running instances block the removal unless `cascade` is set, in which
/// case they are canceled first. When the removed definition was the
/// latest of its key, the previous version gets its start subscriptions
/// back. The undeploy is refused when a signal start of that previous
/// version has since been claimed by another process key.
pub struct UndeployCmd {
    pub deployment_id: Uuid,
    pub cascade: bool,
}

#[async_trait]
impl Command for UndeployCmd {
    type Output = ();

    fn name(&self) -> &'static str {
        "undeploy"
    }

    async fn execute(&self, ctx: &mut CommandContext) -> Result<(), EngineError> {
        let records = ctx.find_definitions_by_deployment(self.deployment_id).await?;
        if records.is_empty() {
            return Err(EngineError::not_found("Deployment", self.deployment_id));
        }

        for record in &records {
            let running: Vec<Execution> = ctx
                .find_process_instances_by_definition(&record.id)
                .await?
                .into_iter()
                .filter(Execution::is_live)
                .collect();
            if !running.is_empty() && !self.cascade {
                return Err(EngineError::precondition(format!(
                    "Deployment '{}' cannot be deleted: process definition '{}' has {} running instance(s)",
                    self.deployment_id,
                    record.id,
                    running.len()
                )));
            }
            let reason = format!("deployment '{}' deleted", self.deployment_id);
            for instance in running {
                tree::cancel(ctx, instance.id, true, &reason).await?;
            }
        }

        for record in &records {
            let latest = ctx.find_latest_definition_by_key(&record.key).await?;
            let was_latest = latest.as_ref().is_some_and(|l| l.id == record.id);

            remove_start_subscriptions(ctx, &record.id).await?;
            ctx.delete_definition_record(&record.id)?;
            if !was_latest {
                continue;
            }

            let previous = ctx.find_latest_definition_by_key(&record.key).await?;
            let restored = previous.as_ref().map(|p| signal_start_names(&p.model)).unwrap_or_default();
            for name in signal_start_names(&record.model) {
                if !restored.contains(&name) {
                    ctx.release_signal_start(&name, &record.key).await?;
                }
            }
            let Some(previous) = previous else {
                continue;
            };
            for name in &restored {
                if let Some(claim) = ctx.find_signal_claim(name).await? {
                    if claim.process_key != record.key {
                        return Err(EngineError::precondition(format!(
                            "Deployment '{}' cannot be deleted: process definition '{}' would restore signal start '{}' which is already used by process '{}'",
                            self.deployment_id, previous.id, name, claim.process_key
                        )));
                    }
                }
                ctx.claim_signal_start(name, &record.key).await?;
            }
            if let Some(definition) = ctx.find_deployed_process_definition(&previous.id).await? {
                add_start_subscriptions(ctx, &definition).await?;
            }
        }

        ctx.record_event(
            None,
            RuntimeEvent::DeploymentDeleted {
                deployment_id: self.deployment_id,
            },
        );
        tracing::info!(
            deployment_id = %self.deployment_id,
            definitions = records.len(),
            cascade = self.cascade,
            "Deployment deleted"
        );
        Ok(())
    }
}

/// Suspend or activate a process definition. Suspended definitions cannot
/// be started; running instances are unaffected.
pub struct SetDefinitionSuspensionCmd {
    pub process_definition_id: String,
    pub suspended: bool,
}

#[async_trait]
impl Command for SetDefinitionSuspensionCmd {
    type Output = ();

    fn name(&self) -> &'static str {
        "set_definition_suspension"
    }

    async fn execute(&self, ctx: &mut CommandContext) -> Result<(), EngineError> {
        let mut record = ctx
            .find_definition_record(&self.process_definition_id)
            .await?
            .ok_or_else(|| EngineError::not_found("ProcessDefinition", &self.process_definition_id))?;
        if record.suspended == self.suspended {
            return Ok(());
        }
        record.suspended = self.suspended;
        ctx.update_definition_record(record)?;
        ctx.record_event(
            None,
            RuntimeEvent::SuspensionChanged {
                process_definition_id: self.process_definition_id.clone(),
                suspended: self.suspended,
            },
        );
        Ok(())
    }
}

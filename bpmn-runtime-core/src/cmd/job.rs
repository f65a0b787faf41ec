//! Commands behind the job executor: acquire, execute, record failure.

use crate::context::CommandContext;
use crate::definition::ActivityKind;
use crate::error::EngineError;
use crate::events::RuntimeEvent;
use crate::executor::Command;
use crate::subscription;
use crate::types::*;
use async_trait::async_trait;
use uuid::Uuid;

/// Lock up to `max_jobs` due jobs for `lock_owner`.
///
/// Locks are plain version-checked updates, so two acquirers racing for
/// the same job conflict at flush and the loser retries against the new
/// state.
pub struct AcquireJobsCmd {
    pub lock_owner: String,
    pub max_jobs: usize,
}

#[async_trait]
impl Command for AcquireJobsCmd {
    type Output = Vec<Job>;

    fn name(&self) -> &'static str {
        "acquire_jobs"
    }

    async fn execute(&self, ctx: &mut CommandContext) -> Result<Vec<Job>, EngineError> {
        let expires_at = ctx.now() + ctx.config().job_executor.lock_duration_ms;
        let mut acquired = Vec::new();
        for mut job in ctx.find_acquirable_jobs(self.max_jobs).await? {
            job.lock_owner = Some(self.lock_owner.clone());
            job.lock_expires_at = Some(expires_at);
            ctx.update_job(job.clone())?;
            acquired.push(job);
        }
        Ok(acquired)
    }
}

/// What happened to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The event was delivered and the job removed.
    Executed,
    /// The target moved on since the job was queued; the job was removed.
    Discarded,
    /// No such job (already executed by someone else).
    Missing,
}

/// Run the deferred delivery of one job.
///
/// The owning execution is checked again first: a job whose subscription
/// is gone, or whose execution has ended, been canceled or left the
/// activity, is discarded without error.
pub struct ExecuteJobCmd {
    pub job_id: Uuid,
}

#[async_trait]
impl Command for ExecuteJobCmd {
    type Output = JobOutcome;

    fn name(&self) -> &'static str {
        "execute_job"
    }

    async fn execute(&self, ctx: &mut CommandContext) -> Result<JobOutcome, EngineError> {
        let Some(job) = ctx.find_job(self.job_id).await? else {
            return Ok(JobOutcome::Missing);
        };
        ctx.delete_job(job.id)?;

        let Some(reason) = stale_reason(ctx, &job).await? else {
            let payload: Variables = match &job.payload {
                Some(value) => serde_json::from_value(value.clone())
                    .map_err(|e| EngineError::Internal(format!("job '{}' payload: {}", job.id, e)))?,
                None => Variables::new(),
            };
            let sub = ctx
                .find_subscription(job.subscription_id)
                .await?
                .ok_or_else(|| EngineError::not_found("EventSubscription", job.subscription_id))?;
            subscription::event_received(ctx, &sub, &payload, false).await?;
            return Ok(JobOutcome::Executed);
        };

        tracing::debug!(job_id = %job.id, reason, "Job discarded");
        Ok(JobOutcome::Discarded)
    }
}

async fn stale_reason(ctx: &mut CommandContext, job: &Job) -> Result<Option<&'static str>, EngineError> {
    let Some(sub) = ctx.find_subscription(job.subscription_id).await? else {
        return Ok(Some("subscription removed"));
    };
    let Some(execution_id) = sub.execution_id else {
        return Ok(Some("subscription has no execution"));
    };
    let Some(execution) = ctx.find_execution(execution_id).await? else {
        return Ok(Some("execution removed"));
    };
    if !execution.is_live() {
        return Ok(Some("execution no longer active"));
    }
    if !execution.is_at(&sub.activity_id) {
        let definition = ctx.definition_of(&execution).await?;
        let starts_event_subprocess = matches!(
            definition.find_activity(&sub.activity_id).map(|a| &a.kind),
            Some(ActivityKind::StartEvent { .. })
        );
        if !starts_event_subprocess {
            return Ok(Some("execution left the activity"));
        }
    }
    Ok(None)
}

/// Record a failed job execution: one retry fewer, rescheduled after the
/// configured delay. At zero retries the job stays parked.
pub struct JobFailureCmd {
    pub job_id: Uuid,
    pub message: String,
}

#[async_trait]
impl Command for JobFailureCmd {
    type Output = u32;

    fn name(&self) -> &'static str {
        "job_failure"
    }

    async fn execute(&self, ctx: &mut CommandContext) -> Result<u32, EngineError> {
        let mut job = ctx
            .find_job(self.job_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Job", self.job_id))?;
        job.retries = job.retries.saturating_sub(1);
        job.exception_message = Some(self.message.clone());
        job.due_at = ctx.now() + ctx.config().job_executor.retry_delay_ms;
        job.lock_owner = None;
        job.lock_expires_at = None;
        let retries_left = job.retries;
        let process_instance_id = job.process_instance_id;
        ctx.update_job(job)?;

        ctx.record_event(
            process_instance_id,
            RuntimeEvent::JobFailed {
                job_id: self.job_id,
                message: self.message.clone(),
                retries_left,
            },
        );
        Ok(retries_left)
    }
}

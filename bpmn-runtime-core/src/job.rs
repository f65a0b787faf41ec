//! JobExecutor: background worker for deferred event deliveries.
//!
//! Async `eventReceived` leaves a job in the store instead of running the
//! continuation. This worker acquires due jobs in batches, runs each as its
//! own command on a `JoinSet` and records failures so the job is retried
//! later. It wakes on its poll interval, or early when a commit created
//! jobs.

use crate::cmd::{AcquireJobsCmd, ExecuteJobCmd, JobFailureCmd, JobOutcome};
use crate::error::EngineError;
use crate::executor::CommandExecutor;
use crate::types::Job;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use uuid::Uuid;

pub struct JobExecutor {
    executor: CommandExecutor,
    lock_owner: String,
}

impl JobExecutor {
    pub fn new(executor: CommandExecutor) -> Self {
        let lock_owner = executor
            .services()
            .config
            .job_executor
            .lock_owner
            .clone()
            .unwrap_or_else(|| format!("job-executor-{}", Uuid::now_v7()));
        Self { executor, lock_owner }
    }

    pub fn lock_owner(&self) -> &str {
        &self.lock_owner
    }

    /// Run the worker loop until the shutdown signal is received.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let poll_interval = Duration::from_millis(self.executor.services().config.job_executor.poll_interval_ms);
        tracing::info!(lock_owner = %self.lock_owner, "JobExecutor started");

        loop {
            if *shutdown_rx.borrow() {
                tracing::info!("JobExecutor shutting down");
                break;
            }

            if let Err(e) = self.run_batch().await {
                tracing::warn!(error = %e, "JobExecutor: failed to acquire jobs");
            }

            let services = self.executor.services().clone();
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = services.job_notify.notified() => {}
                _ = shutdown_rx.changed() => {
                    tracing::info!("JobExecutor shutting down (during sleep)");
                    break;
                }
            }
        }

        tracing::info!("JobExecutor stopped");
    }

    /// Acquire and execute batches until no due job is left. Returns how
    /// many jobs were attempted.
    pub async fn execute_available_jobs(&self) -> Result<usize, EngineError> {
        let mut attempted = 0;
        loop {
            let batch = self.run_batch().await?;
            if batch == 0 {
                return Ok(attempted);
            }
            attempted += batch;
        }
    }

    /// Acquire one batch and run it to completion.
    async fn run_batch(&self) -> Result<usize, EngineError> {
        let jobs = self.acquire().await?;
        if jobs.is_empty() {
            return Ok(0);
        }
        tracing::debug!(count = jobs.len(), "JobExecutor: executing jobs");

        let mut set = JoinSet::new();
        for job in &jobs {
            let executor = self.executor.clone();
            let job_id = job.id;
            set.spawn(async move { execute_job(&executor, job_id).await });
        }
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "JobExecutor: job task panicked");
            }
        }
        Ok(jobs.len())
    }

    async fn acquire(&self) -> Result<Vec<Job>, EngineError> {
        let max_jobs = self.executor.services().config.job_executor.batch_size;
        self.executor
            .execute(&AcquireJobsCmd {
                lock_owner: self.lock_owner.clone(),
                max_jobs,
            })
            .await
    }
}

async fn execute_job(executor: &CommandExecutor, job_id: Uuid) {
    match executor.execute(&ExecuteJobCmd { job_id }).await {
        Ok(JobOutcome::Executed) => {
            tracing::debug!(job_id = %job_id, "JobExecutor: job executed");
        }
        Ok(JobOutcome::Discarded) | Ok(JobOutcome::Missing) => {}
        Err(e) => {
            let message = e.to_string();
            match executor
                .execute(&JobFailureCmd {
                    job_id,
                    message: message.clone(),
                })
                .await
            {
                Ok(retries_left) => {
                    tracing::error!(
                        job_id = %job_id,
                        error = %message,
                        retries_left,
                        "JobExecutor: job failed"
                    );
                }
                Err(store_err) => {
                    tracing::error!(
                        job_id = %job_id,
                        error = %store_err,
                        "JobExecutor: failed to record job failure"
                    );
                }
            }
        }
    }
}

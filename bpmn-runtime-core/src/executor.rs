//! Command execution: interceptor chain, optimistic-lock retry and the
//! transactional terminal stage.
//!
//! ```text
//! execute(cmd) → LogInterceptor → RetryInterceptor → [custom…] → transaction
//!                                       ↑ rebuild on conflict        │
//!                                       └────────────────────────────┘
//! ```
//!
//! The transaction stage creates a fresh [`CommandContext`], runs the
//! command body and the agenda, flushes the resulting change set once and
//! only then runs after-commit hooks.

use crate::behavior::agenda;
use crate::context::{AfterCommit, CommandContext, EngineServices};
use crate::error::EngineError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// A unit of work run under transactional and retry discipline.
///
/// `execute` may run more than once when a flush loses a version race, each
/// time against a fresh context. Bodies must not have side effects outside
/// the context.
#[async_trait]
pub trait Command: Send + Sync {
    type Output: Send;

    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: &mut CommandContext) -> Result<Self::Output, EngineError>;
}

/// A command with its output type erased, as seen by interceptors.
#[async_trait]
pub trait CommandInvocation: Send {
    fn command_name(&self) -> &'static str;

    /// Run the command body once against `ctx`, keeping its output.
    async fn invoke(&mut self, ctx: &mut CommandContext) -> Result<(), EngineError>;
}

struct Invocation<'a, C: Command> {
    command: &'a C,
    output: Option<C::Output>,
}

#[async_trait]
impl<'a, C: Command> CommandInvocation for Invocation<'a, C> {
    fn command_name(&self) -> &'static str {
        self.command.name()
    }

    async fn invoke(&mut self, ctx: &mut CommandContext) -> Result<(), EngineError> {
        self.output = Some(self.command.execute(ctx).await?);
        Ok(())
    }
}

/// One stage of the chain. Call `next.run(invocation)` to continue; it may
/// be called more than once.
#[async_trait]
pub trait CommandInterceptor: Send + Sync {
    async fn intercept(
        &self,
        invocation: &mut dyn CommandInvocation,
        next: Next<'_>,
    ) -> Result<(), EngineError>;
}

/// The remainder of the chain after the current interceptor.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    chain: &'a [Arc<dyn CommandInterceptor>],
    services: &'a Arc<EngineServices>,
}

impl<'a> Next<'a> {
    pub async fn run(self, invocation: &mut dyn CommandInvocation) -> Result<(), EngineError> {
        match self.chain.split_first() {
            Some((head, rest)) => {
                let next = Next {
                    chain: rest,
                    services: self.services,
                };
                head.intercept(invocation, next).await
            }
            None => run_transaction(self.services, invocation).await,
        }
    }
}

async fn run_transaction(
    services: &Arc<EngineServices>,
    invocation: &mut dyn CommandInvocation,
) -> Result<(), EngineError> {
    let mut ctx = CommandContext::new(services.clone(), invocation.command_name());
    invocation.invoke(&mut ctx).await?;
    agenda::run(&mut ctx).await?;

    let (changes, hooks) = ctx.into_change_set();
    if !changes.is_empty() {
        services.store.flush(changes).await?;
    }

    for hook in hooks {
        match hook {
            AfterCommit::EvictDefinition(id) => services.cache.evict(&id),
            AfterCommit::NotifyJobExecutor => services.job_notify.notify_one(),
        }
    }
    Ok(())
}

// ─── Built-in interceptors ────────────────────────────────────

/// Wraps each command in a tracing span and logs its outcome.
pub struct LogInterceptor;

#[async_trait]
impl CommandInterceptor for LogInterceptor {
    async fn intercept(
        &self,
        invocation: &mut dyn CommandInvocation,
        next: Next<'_>,
    ) -> Result<(), EngineError> {
        let command = invocation.command_name();
        let span = tracing::debug_span!("command", command = command);
        let started = Instant::now();

        let result = next.run(invocation).instrument(span).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => tracing::debug!(command = command, elapsed_ms, "Command completed"),
            Err(e) => tracing::warn!(command = command, elapsed_ms, error = %e, "Command failed"),
        }
        result
    }
}

/// Re-runs the rest of the chain when the flush reports a version conflict.
///
/// Every attempt builds a new context, so nothing from the losing attempt
/// survives. Backoff doubles after each conflict.
pub struct RetryInterceptor {
    max_attempts: u32,
    initial_backoff: Duration,
}

impl RetryInterceptor {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
        }
    }
}

#[async_trait]
impl CommandInterceptor for RetryInterceptor {
    async fn intercept(
        &self,
        invocation: &mut dyn CommandInvocation,
        next: Next<'_>,
    ) -> Result<(), EngineError> {
        let mut backoff = self.initial_backoff;
        let mut attempt = 1;
        loop {
            match next.run(invocation).await {
                Err(EngineError::OptimisticLock(conflict)) => {
                    if attempt >= self.max_attempts {
                        tracing::warn!(
                            command = invocation.command_name(),
                            attempts = attempt,
                            conflict = %conflict,
                            "Retries exhausted"
                        );
                        return Err(EngineError::ConcurrencyFailure {
                            command: invocation.command_name(),
                            attempts: attempt,
                            conflict,
                        });
                    }
                    tracing::debug!(
                        command = invocation.command_name(),
                        attempt,
                        conflict = %conflict,
                        "Version conflict, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

// ─── Executor ─────────────────────────────────────────────────

/// Entry point for every outer caller. Cheap to clone.
#[derive(Clone)]
pub struct CommandExecutor {
    services: Arc<EngineServices>,
    chain: Arc<Vec<Arc<dyn CommandInterceptor>>>,
}

impl CommandExecutor {
    /// Standard chain (logging, retry) followed by `custom`, which therefore
    /// runs once per attempt.
    pub fn new(services: Arc<EngineServices>, custom: Vec<Arc<dyn CommandInterceptor>>) -> Self {
        let retry = RetryInterceptor::new(
            services.config.command.max_attempts,
            Duration::from_millis(services.config.command.retry_backoff_ms),
        );
        let mut chain: Vec<Arc<dyn CommandInterceptor>> = vec![Arc::new(LogInterceptor), Arc::new(retry)];
        chain.extend(custom);
        Self {
            services,
            chain: Arc::new(chain),
        }
    }

    pub fn services(&self) -> &Arc<EngineServices> {
        &self.services
    }

    pub async fn execute<C: Command>(&self, command: &C) -> Result<C::Output, EngineError> {
        let mut invocation = Invocation {
            command,
            output: None,
        };
        let next = Next {
            chain: self.chain.as_slice(),
            services: &self.services,
        };
        next.run(&mut invocation).await?;
        invocation.output.ok_or_else(|| {
            EngineError::Internal(format!("command '{}' produced no output", command.name()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::deployment::DeploymentCache;
    use crate::error::VersionConflict;
    use crate::store_memory::MemoryStore;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Notify;

    fn executor(max_attempts: u32, custom: Vec<Arc<dyn CommandInterceptor>>) -> (CommandExecutor, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let mut config = EngineConfig::default();
        config.command.max_attempts = max_attempts;
        config.command.retry_backoff_ms = 1;
        let services = Arc::new(EngineServices {
            store: store.clone(),
            cache: DeploymentCache::new(8),
            clock: Arc::new(ManualClock::new(0)),
            config,
            job_notify: Notify::new(),
        });
        (CommandExecutor::new(services, custom), store)
    }

    /// Fails with a version conflict for the first `conflicts` attempts.
    struct Flaky {
        conflicts: u32,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl Command for Flaky {
        type Output = u32;

        fn name(&self) -> &'static str {
            "Flaky"
        }

        async fn execute(&self, _ctx: &mut CommandContext) -> Result<u32, EngineError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.conflicts {
                return Err(EngineError::OptimisticLock(VersionConflict::new(
                    "Execution",
                    "e-1".into(),
                    1,
                    Some(2),
                )));
            }
            Ok(attempt)
        }
    }

    struct Failing;

    #[async_trait]
    impl Command for Failing {
        type Output = ();

        fn name(&self) -> &'static str {
            "Failing"
        }

        async fn execute(&self, _ctx: &mut CommandContext) -> Result<(), EngineError> {
            Err(EngineError::precondition("nope"))
        }
    }

    /// Counts how often the rest of the chain runs.
    struct Counting(Arc<AtomicU32>);

    #[async_trait]
    impl CommandInterceptor for Counting {
        async fn intercept(
            &self,
            invocation: &mut dyn CommandInvocation,
            next: Next<'_>,
        ) -> Result<(), EngineError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            next.run(invocation).await
        }
    }

    #[tokio::test]
    async fn test_conflict_is_retried_transparently() {
        let runs = Arc::new(AtomicU32::new(0));
        let (exec, _) = executor(3, vec![Arc::new(Counting(runs.clone()))]);
        let cmd = Flaky {
            conflicts: 2,
            attempts: AtomicU32::new(0),
        };
        assert_eq!(exec.execute(&cmd).await.unwrap(), 3);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_concurrency_failure() {
        let (exec, _) = executor(2, vec![]);
        let cmd = Flaky {
            conflicts: 5,
            attempts: AtomicU32::new(0),
        };
        let err = exec.execute(&cmd).await.unwrap_err();
        assert!(err.is_concurrency_failure());
        assert!(matches!(
            err,
            EngineError::ConcurrencyFailure {
                command: "Flaky",
                attempts: 2,
                ..
            }
        ));
        assert_eq!(cmd.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried_and_nothing_flushes() {
        let (exec, store) = executor(3, vec![]);
        let err = exec.execute(&Failing).await.unwrap_err();
        assert!(matches!(err, EngineError::Precondition(_)));
        assert_eq!(store.flush_count(), 0);
    }
}

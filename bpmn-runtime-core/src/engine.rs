//! ProcessEngine: the public facade.
//!
//! Wires the store, deployment cache, clock and configuration into one
//! [`EngineServices`], and exposes every operation as a method that runs
//! the matching command through the [`CommandExecutor`].

use crate::behavior::SignalOutcome;
use crate::clock::{Clock, SystemClock};
use crate::cmd::*;
use crate::config::EngineConfig;
use crate::context::EngineServices;
use crate::deployment::DeploymentCache;
use crate::error::EngineError;
use crate::events::{EventLogQuery, RecordedEvent};
use crate::executor::{Command, CommandExecutor, CommandInterceptor};
use crate::job::JobExecutor;
use crate::model::dto::ProcessModel;
use crate::store::EntityStore;
use crate::types::*;
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

pub struct ProcessEngineBuilder {
    store: Arc<dyn EntityStore>,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    interceptors: Vec<Arc<dyn CommandInterceptor>>,
}

impl ProcessEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Appended after the built-in logging and retry stages; runs once per
    /// attempt.
    pub fn interceptor(mut self, interceptor: Arc<dyn CommandInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn build(self) -> ProcessEngine {
        let services = Arc::new(EngineServices {
            store: self.store,
            cache: DeploymentCache::new(self.config.deployment_cache.capacity),
            clock: self.clock,
            config: self.config,
            job_notify: Notify::new(),
        });
        ProcessEngine {
            executor: CommandExecutor::new(services, self.interceptors),
        }
    }
}

/// Cheap to clone; clones share the store, cache and executor.
#[derive(Clone)]
pub struct ProcessEngine {
    executor: CommandExecutor,
}

impl ProcessEngine {
    pub fn builder(store: Arc<dyn EntityStore>) -> ProcessEngineBuilder {
        ProcessEngineBuilder {
            store,
            config: EngineConfig::default(),
            clock: Arc::new(SystemClock),
            interceptors: Vec::new(),
        }
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    pub fn services(&self) -> &Arc<EngineServices> {
        self.executor.services()
    }

    /// Run any command under transactional and retry discipline.
    pub async fn execute<C: Command>(&self, command: &C) -> Result<C::Output, EngineError> {
        self.executor.execute(command).await
    }

    pub fn job_executor(&self) -> JobExecutor {
        JobExecutor::new(self.executor.clone())
    }

    // ── Deployment ──

    pub async fn deploy(&self, models: Vec<ProcessModel>) -> Result<Deployment, EngineError> {
        self.execute(&DeployCmd::new(models)).await
    }

    pub async fn undeploy(&self, deployment_id: Uuid, cascade: bool) -> Result<(), EngineError> {
        self.execute(&UndeployCmd { deployment_id, cascade }).await
    }

    pub async fn suspend_definition(&self, process_definition_id: &str) -> Result<(), EngineError> {
        self.execute(&SetDefinitionSuspensionCmd {
            process_definition_id: process_definition_id.to_string(),
            suspended: true,
        })
        .await
    }

    pub async fn activate_definition(&self, process_definition_id: &str) -> Result<(), EngineError> {
        self.execute(&SetDefinitionSuspensionCmd {
            process_definition_id: process_definition_id.to_string(),
            suspended: false,
        })
        .await
    }

    // ── Instances ──

    pub async fn start_process_instance_by_key(
        &self,
        key: &str,
        variables: Variables,
    ) -> Result<Uuid, EngineError> {
        self.execute(&StartProcessInstanceCmd::by_key(key).variables(variables))
            .await
    }

    pub async fn start_process_instance_by_id(
        &self,
        process_definition_id: &str,
        variables: Variables,
    ) -> Result<Uuid, EngineError> {
        self.execute(&StartProcessInstanceCmd::by_id(process_definition_id).variables(variables))
            .await
    }

    pub async fn cancel_process_instance(&self, process_instance_id: Uuid, reason: &str) -> Result<(), EngineError> {
        self.execute(&CancelProcessInstanceCmd {
            process_instance_id,
            reason: reason.to_string(),
        })
        .await
    }

    pub async fn trigger(&self, execution_id: Uuid, variables: Variables) -> Result<(), EngineError> {
        self.execute(&TriggerCmd::new(execution_id).variables(variables)).await
    }

    pub async fn set_variables(&self, execution_id: Uuid, variables: Variables) -> Result<(), EngineError> {
        self.execute(&SetVariablesCmd {
            execution_id,
            variables,
        })
        .await
    }

    pub async fn variables(&self, execution_id: Uuid) -> Result<Variables, EngineError> {
        self.execute(&GetVariablesCmd { execution_id }).await
    }

    pub async fn process_instance(&self, process_instance_id: Uuid) -> Result<ProcessInstanceSnapshot, EngineError> {
        self.execute(&GetProcessInstanceCmd { process_instance_id }).await
    }

    // ── Events ──

    pub async fn signal_event_received(
        &self,
        event_name: &str,
        variables: Variables,
    ) -> Result<SignalOutcome, EngineError> {
        self.execute(&SignalEventReceivedCmd::new(event_name).variables(variables))
            .await
    }

    /// Like [`signal_event_received`](Self::signal_event_received) but the
    /// receivers continue later, through the job executor.
    pub async fn signal_event_received_async(
        &self,
        event_name: &str,
        variables: Variables,
    ) -> Result<SignalOutcome, EngineError> {
        self.execute(&SignalEventReceivedCmd::new(event_name).variables(variables).deferred())
            .await
    }

    pub async fn correlate_message(
        &self,
        message_name: &str,
        variables: Variables,
    ) -> Result<MessageCorrelation, EngineError> {
        self.execute(&CorrelateMessageCmd::new(message_name).variables(variables))
            .await
    }

    pub async fn fire_due_timers(&self) -> Result<usize, EngineError> {
        self.execute(&FireDueTimersCmd).await
    }

    pub async fn subscribe(
        &self,
        target: SubscriptionTarget,
        event_type: EventType,
        event_name: &str,
        activity_id: &str,
    ) -> Result<EventSubscription, EngineError> {
        self.execute(&SubscribeCmd {
            target,
            event_type,
            event_name: event_name.to_string(),
            activity_id: activity_id.to_string(),
        })
        .await
    }

    pub async fn unsubscribe(&self, subscription_id: Uuid) -> Result<(), EngineError> {
        self.execute(&UnsubscribeCmd { subscription_id }).await
    }

    pub async fn subscriptions(&self, event_type: EventType, event_name: &str) -> Result<Vec<EventSubscription>, EngineError> {
        self.execute(&FindSubscriptionsCmd {
            event_type,
            event_name: event_name.to_string(),
        })
        .await
    }

    // ── Event log ──

    /// Committed runtime events, read straight from the store.
    pub async fn query_events(&self, query: &EventLogQuery) -> Result<Vec<RecordedEvent>, EngineError> {
        Ok(self.services().store.read_events(query).await?)
    }
}

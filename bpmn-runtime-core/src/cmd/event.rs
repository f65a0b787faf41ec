//! Event entry points: signal broadcast, message correlation, timer
//! firing and direct subscription management.

use crate::behavior::{self, SignalOutcome};
use crate::context::CommandContext;
use crate::error::EngineError;
use crate::executor::Command;
use crate::subscription;
use crate::tree;
use crate::types::*;
use async_trait::async_trait;
use uuid::Uuid;

/// Throw a signal from outside any process.
///
/// With `execution_id` set, only that execution's catch subscriptions for
/// the name are delivered to and no process is started.
pub struct SignalEventReceivedCmd {
    pub event_name: String,
    pub variables: Variables,
    pub is_async: bool,
    pub execution_id: Option<Uuid>,
}

impl SignalEventReceivedCmd {
    pub fn new(event_name: &str) -> Self {
        Self {
            event_name: event_name.to_string(),
            variables: Variables::new(),
            is_async: false,
            execution_id: None,
        }
    }

    pub fn variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn deferred(mut self) -> Self {
        self.is_async = true;
        self
    }

    pub fn to_execution(mut self, execution_id: Uuid) -> Self {
        self.execution_id = Some(execution_id);
        self
    }
}

#[async_trait]
impl Command for SignalEventReceivedCmd {
    type Output = SignalOutcome;

    fn name(&self) -> &'static str {
        "signal_event_received"
    }

    async fn execute(&self, ctx: &mut CommandContext) -> Result<SignalOutcome, EngineError> {
        let Some(execution_id) = self.execution_id else {
            return behavior::throw_signal(ctx, &self.event_name, &self.variables, self.is_async).await;
        };

        tree::live(ctx, execution_id).await?;
        let targeted: Vec<EventSubscription> = ctx
            .find_subscriptions_by_execution(execution_id)
            .await?
            .into_iter()
            .filter(|s| s.event_type == EventType::Signal && s.event_name == self.event_name)
            .collect();
        if targeted.is_empty() {
            return Err(EngineError::precondition(format!(
                "Execution '{}' has not subscribed to a signal event with name '{}'",
                execution_id, self.event_name
            )));
        }
        let mut outcome = SignalOutcome::default();
        for sub in targeted {
            if ctx.find_subscription(sub.id).await?.is_none() {
                continue;
            }
            subscription::event_received(ctx, &sub, &self.variables, self.is_async).await?;
            outcome.delivered += 1;
        }
        Ok(outcome)
    }
}

/// Where a correlated message went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageCorrelation {
    /// Delivered to the execution waiting on it.
    Delivered { execution_id: Uuid },
    /// Started a new process instance through a message start event.
    Started { process_instance_id: Uuid },
}

/// Deliver a message to exactly one party.
///
/// A waiting catch subscription wins; otherwise a message start event of a
/// deployed definition is used. Zero or several candidates is a
/// correlation error.
pub struct CorrelateMessageCmd {
    pub message_name: String,
    pub process_instance_id: Option<Uuid>,
    pub business_key: Option<String>,
    pub variables: Variables,
}

impl CorrelateMessageCmd {
    pub fn new(message_name: &str) -> Self {
        Self {
            message_name: message_name.to_string(),
            process_instance_id: None,
            business_key: None,
            variables: Variables::new(),
        }
    }

    pub fn process_instance(mut self, process_instance_id: Uuid) -> Self {
        self.process_instance_id = Some(process_instance_id);
        self
    }

    pub fn business_key(mut self, business_key: &str) -> Self {
        self.business_key = Some(business_key.to_string());
        self
    }

    pub fn variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    async fn matches(&self, ctx: &mut CommandContext, sub: &EventSubscription) -> Result<bool, EngineError> {
        let Some(execution_id) = sub.execution_id else {
            return Ok(false);
        };
        if !tree::is_active(ctx, execution_id).await? {
            return Ok(false);
        }
        if self.process_instance_id.is_some() && sub.process_instance_id != self.process_instance_id {
            return Ok(false);
        }
        if let (Some(wanted), Some(instance)) = (&self.business_key, sub.process_instance_id) {
            let root = ctx.execution(instance).await?;
            if root.business_key.as_ref() != Some(wanted) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl Command for CorrelateMessageCmd {
    type Output = MessageCorrelation;

    fn name(&self) -> &'static str {
        "correlate_message"
    }

    async fn execute(&self, ctx: &mut CommandContext) -> Result<MessageCorrelation, EngineError> {
        let mut waiting = Vec::new();
        for sub in
            subscription::find_catch_by_event_name_and_type(ctx, &self.message_name, EventType::Message).await?
        {
            if self.matches(ctx, &sub).await? {
                waiting.push(sub);
            }
        }

        match waiting.len() {
            1 => {
                let sub = &waiting[0];
                subscription::event_received(ctx, sub, &self.variables, false).await?;
                let execution_id = sub.execution_id.unwrap_or_default();
                return Ok(MessageCorrelation::Delivered { execution_id });
            }
            0 => {}
            n => {
                return Err(EngineError::Correlation(format!(
                    "Cannot correlate message '{}': {} executions match the correlation keys",
                    self.message_name, n
                )))
            }
        }

        if self.process_instance_id.is_none() {
            let starts =
                subscription::find_start_by_event_name_and_type(ctx, &self.message_name, EventType::Message).await?;
            if starts.len() > 1 {
                return Err(EngineError::Correlation(format!(
                    "Cannot correlate message '{}': {} process definitions start on it",
                    self.message_name,
                    starts.len()
                )));
            }
            if let Some(sub) = starts.first() {
                if let Some(process_instance_id) =
                    subscription::start_from_subscription(ctx, sub, self.business_key.clone(), &self.variables)
                        .await?
                {
                    return Ok(MessageCorrelation::Started { process_instance_id });
                }
            }
        }

        Err(EngineError::Correlation(format!(
            "Cannot correlate message '{}': no process definition or execution matches the parameters",
            self.message_name
        )))
    }
}

/// Deliver every timer catch subscription whose due date has passed.
/// Called by an external scheduler; returns how many fired.
pub struct FireDueTimersCmd;

#[async_trait]
impl Command for FireDueTimersCmd {
    type Output = usize;

    fn name(&self) -> &'static str {
        "fire_due_timers"
    }

    async fn execute(&self, ctx: &mut CommandContext) -> Result<usize, EngineError> {
        let now = ctx.now();
        let mut due: Vec<EventSubscription> = ctx
            .find_subscriptions_by_type(EventType::Timer)
            .await?
            .into_iter()
            .filter(|s| s.is_catch() && s.due_at().is_some_and(|at| at <= now))
            .collect();
        due.sort_by_key(|s| (s.due_at(), s.created_at, s.id));

        let mut fired = 0;
        for candidate in due {
            let Some(sub) = ctx.find_subscription(candidate.id).await? else {
                continue;
            };
            let Some(execution_id) = sub.execution_id else {
                continue;
            };
            if !tree::is_active(ctx, execution_id).await? {
                continue;
            }
            subscription::event_received(ctx, &sub, &Variables::new(), false).await?;
            fired += 1;
        }
        if fired > 0 {
            tracing::debug!(fired, "Due timers fired");
        }
        Ok(fired)
    }
}

pub struct SubscribeCmd {
    pub target: SubscriptionTarget,
    pub event_type: EventType,
    pub event_name: String,
    pub activity_id: String,
}

#[async_trait]
impl Command for SubscribeCmd {
    type Output = EventSubscription;

    fn name(&self) -> &'static str {
        "subscribe"
    }

    async fn execute(&self, ctx: &mut CommandContext) -> Result<EventSubscription, EngineError> {
        subscription::subscribe(
            ctx,
            self.target.clone(),
            self.event_type,
            &self.event_name,
            &self.activity_id,
        )
        .await
    }
}

pub struct UnsubscribeCmd {
    pub subscription_id: Uuid,
}

#[async_trait]
impl Command for UnsubscribeCmd {
    type Output = ();

    fn name(&self) -> &'static str {
        "unsubscribe"
    }

    async fn execute(&self, ctx: &mut CommandContext) -> Result<(), EngineError> {
        subscription::remove(ctx, self.subscription_id).await
    }
}

/// Registry entries for one event key, in creation order.
pub struct FindSubscriptionsCmd {
    pub event_type: EventType,
    pub event_name: String,
}

#[async_trait]
impl Command for FindSubscriptionsCmd {
    type Output = Vec<EventSubscription>;

    fn name(&self) -> &'static str {
        "find_subscriptions"
    }

    async fn execute(&self, ctx: &mut CommandContext) -> Result<Vec<EventSubscription>, EngineError> {
        let mut found = subscription::find_catch_by_event_name_and_type(ctx, &self.event_name, self.event_type).await?;
        found.extend(subscription::find_start_by_event_name_and_type(ctx, &self.event_name, self.event_type).await?);
        found.sort_by_key(|s| (s.created_at, s.id));
        Ok(found)
    }
}

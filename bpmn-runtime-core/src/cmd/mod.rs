//! Concrete commands. Every externally invoked operation is one of these,
//! run through the [`CommandExecutor`](crate::executor::CommandExecutor).

pub mod deploy;
pub mod event;
pub mod instance;
pub mod job;

pub use deploy::{DeployCmd, Deployment, SetDefinitionSuspensionCmd, UndeployCmd};
pub use event::{
    CorrelateMessageCmd, FindSubscriptionsCmd, FireDueTimersCmd, MessageCorrelation, SignalEventReceivedCmd,
    SubscribeCmd, UnsubscribeCmd,
};
pub use instance::{
    CancelProcessInstanceCmd, DefinitionRef, GetProcessInstanceCmd, GetVariablesCmd, ProcessInstanceSnapshot,
    SetVariablesCmd, StartProcessInstanceCmd, TriggerCmd,
};
pub use job::{AcquireJobsCmd, ExecuteJobCmd, JobFailureCmd, JobOutcome};

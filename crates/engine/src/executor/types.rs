//! Step handlers applied to a waiting process instance.
//!
//! Every handler targets one activity. Applying it first checks that the
//! instance is waiting at that activity, runs the optional verifier, and then
//! performs the configured action: completing the wait state, raising a
//! fault, or doing nothing so that a boundary event can be triggered next.

use std::{fmt, rc::Rc};

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::workflow::runner::CoordinatorError;

use super::{
    repeat::{LoopVerificationError, ScopeLoopDriver},
    runner::{ProcessHandle, Variables, WorkflowFault, WorkflowRuntime},
};

/// Failure while driving a process instance forward.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
    #[error("Expected process instance {instance_id} to be waiting at '{activity_id}'")]
    NotWaiting { instance_id: String, activity_id: String },
    #[error("Expected process instance {instance_id} to have passed '{activity_id}'")]
    NotPassed { instance_id: String, activity_id: String },
    #[error(transparent)]
    Loop(#[from] LoopVerificationError),
    #[error("{operation} failed at '{activity_id}': {source:#}")]
    Runtime {
        operation: &'static str,
        activity_id: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("verification of '{activity_id}' failed: {source:#}")]
    Verification {
        activity_id: String,
        #[source]
        source: anyhow::Error,
    },
}

impl ApplyError {
    pub(crate) fn runtime(operation: &'static str, activity_id: &str, source: anyhow::Error) -> Self {
        ApplyError::Runtime {
            operation,
            activity_id: activity_id.to_string(),
            source,
        }
    }
}

/// Custom check run against the process instance before a handler acts.
pub type Verifier = Rc<dyn Fn(&ProcessHandle) -> anyhow::Result<()>>;

/// What a wait-state handler does once the instance is waiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitAction {
    Complete,
    /// Leave the wait state untouched so a boundary event can fire.
    WaitForBoundaryEvent,
}

#[derive(Clone, Default)]
struct HandlerCore {
    activity_id: String,
    variables: Variables,
    verifier: Option<Verifier>,
}

impl HandlerCore {
    fn new(activity_id: impl Into<String>) -> Self {
        Self {
            activity_id: activity_id.into(),
            ..Default::default()
        }
    }

    fn prepare(&self, runtime: &dyn WorkflowRuntime, process: &ProcessHandle) -> Result<(), ApplyError> {
        let waiting = runtime
            .is_waiting_at(process, &self.activity_id)
            .map_err(|source| ApplyError::runtime("query wait state", &self.activity_id, source))?;
        if !waiting {
            return Err(ApplyError::NotWaiting {
                instance_id: process.instance_id.clone(),
                activity_id: self.activity_id.clone(),
            });
        }

        if let Some(verifier) = &self.verifier {
            verifier(process).map_err(|source| ApplyError::Verification {
                activity_id: self.activity_id.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

impl fmt::Debug for HandlerCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerCore")
            .field("activity_id", &self.activity_id)
            .field("variables", &self.variables)
            .field("verifier", &self.verifier.is_some())
            .finish()
    }
}

macro_rules! handler_common {
    ($handler:ty) => {
        impl $handler {
            pub fn activity_id(&self) -> &str {
                &self.core.activity_id
            }

            /// Adds a variable passed along when the handler completes its activity.
            pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
                self.core.variables.insert(name.into(), value.into());
                self
            }

            pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
                self.core.variables.insert(name.into(), value.into());
                self
            }

            /// Runs `verifier` before the handler acts.
            pub fn verify<F>(mut self, verifier: F) -> Self
            where
                F: Fn(&ProcessHandle) -> anyhow::Result<()> + 'static,
            {
                self.core.verifier = Some(Rc::new(verifier));
                self
            }

            pub fn set_verifier<F>(&mut self, verifier: F) -> &mut Self
            where
                F: Fn(&ProcessHandle) -> anyhow::Result<()> + 'static,
            {
                self.core.verifier = Some(Rc::new(verifier));
                self
            }
        }
    };
}

/// Completes a waiting user task.
#[derive(Debug, Clone)]
pub struct UserTaskHandler {
    core: HandlerCore,
    action: WaitAction,
}

impl UserTaskHandler {
    pub fn new(activity_id: impl Into<String>) -> Self {
        Self {
            core: HandlerCore::new(activity_id),
            action: WaitAction::Complete,
        }
    }

    pub fn wait_for_boundary_event(mut self) -> Self {
        self.action = WaitAction::WaitForBoundaryEvent;
        self
    }

    fn apply(&self, runtime: &mut dyn WorkflowRuntime, process: &ProcessHandle) -> Result<(), ApplyError> {
        self.core.prepare(runtime, process)?;
        if self.action == WaitAction::Complete {
            runtime
                .complete_user_task(process, &self.core.activity_id, &self.core.variables)
                .map_err(|source| ApplyError::runtime("complete user task", &self.core.activity_id, source))?;
        }
        Ok(())
    }
}

handler_common!(UserTaskHandler);

/// What an external task handler does with the waiting task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalTaskAction {
    Complete,
    Fault(WorkflowFault),
    WaitForBoundaryEvent,
}

/// Completes or fails a waiting external task.
#[derive(Debug, Clone)]
pub struct ExternalTaskHandler {
    core: HandlerCore,
    topic: Option<String>,
    action: ExternalTaskAction,
}

impl ExternalTaskHandler {
    pub fn new(activity_id: impl Into<String>) -> Self {
        Self {
            core: HandlerCore::new(activity_id),
            topic: None,
            action: ExternalTaskAction::Complete,
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn handle_bpmn_error(mut self, code: impl Into<String>, message: Option<String>) -> Self {
        self.action = ExternalTaskAction::Fault(WorkflowFault::Error {
            code: code.into(),
            message,
        });
        self
    }

    pub fn wait_for_boundary_event(mut self) -> Self {
        self.action = ExternalTaskAction::WaitForBoundaryEvent;
        self
    }

    fn apply(&self, runtime: &mut dyn WorkflowRuntime, process: &ProcessHandle) -> Result<(), ApplyError> {
        self.core.prepare(runtime, process)?;
        let activity_id = &self.core.activity_id;
        match &self.action {
            ExternalTaskAction::Complete => runtime
                .complete_external_task(process, activity_id, self.topic.as_deref(), &self.core.variables)
                .map_err(|source| ApplyError::runtime("complete external task", activity_id, source)),
            ExternalTaskAction::Fault(fault) => runtime
                .raise_fault(process, activity_id, fault)
                .map_err(|source| ApplyError::runtime("raise fault", activity_id, source)),
            ExternalTaskAction::WaitForBoundaryEvent => Ok(()),
        }
    }
}

handler_common!(ExternalTaskHandler);

/// Executes the job waiting at an asynchronous continuation or timer.
#[derive(Debug, Clone)]
pub struct JobHandler {
    core: HandlerCore,
    action: WaitAction,
}

impl JobHandler {
    pub fn new(activity_id: impl Into<String>) -> Self {
        Self {
            core: HandlerCore::new(activity_id),
            action: WaitAction::Complete,
        }
    }

    pub fn wait_for_boundary_event(mut self) -> Self {
        self.action = WaitAction::WaitForBoundaryEvent;
        self
    }

    fn apply(&self, runtime: &mut dyn WorkflowRuntime, process: &ProcessHandle) -> Result<(), ApplyError> {
        self.core.prepare(runtime, process)?;
        if self.action == WaitAction::Complete {
            runtime
                .execute_job(process, &self.core.activity_id)
                .map_err(|source| ApplyError::runtime("execute job", &self.core.activity_id, source))?;
        }
        Ok(())
    }
}

handler_common!(JobHandler);

/// Triggers a waiting message, signal or conditional event.
#[derive(Debug, Clone)]
pub struct EventHandler {
    core: HandlerCore,
    event_name: Option<String>,
    action: WaitAction,
}

impl EventHandler {
    pub fn new(activity_id: impl Into<String>) -> Self {
        Self {
            core: HandlerCore::new(activity_id),
            event_name: None,
            action: WaitAction::Complete,
        }
    }

    /// Message or signal name to correlate.
    pub fn with_event_name(mut self, event_name: impl Into<String>) -> Self {
        self.event_name = Some(event_name.into());
        self
    }

    pub fn wait_for_boundary_event(mut self) -> Self {
        self.action = WaitAction::WaitForBoundaryEvent;
        self
    }

    fn apply(&self, runtime: &mut dyn WorkflowRuntime, process: &ProcessHandle) -> Result<(), ApplyError> {
        self.core.prepare(runtime, process)?;
        if self.action == WaitAction::Complete {
            runtime
                .trigger_event(process, &self.core.activity_id, self.event_name.as_deref(), &self.core.variables)
                .map_err(|source| ApplyError::runtime("trigger event", &self.core.activity_id, source))?;
        }
        Ok(())
    }
}

handler_common!(EventHandler);

/// A handler applied through [`ExecutionCoordinator::apply`](crate::ExecutionCoordinator::apply).
#[derive(Debug)]
pub enum StepHandler<'a> {
    Event(&'a EventHandler),
    ExternalTask(&'a ExternalTaskHandler),
    Job(&'a JobHandler),
    UserTask(&'a UserTaskHandler),
    Scope(&'a mut ScopeLoopDriver),
}

impl StepHandler<'_> {
    pub fn activity_id(&self) -> &str {
        match self {
            StepHandler::Event(handler) => handler.activity_id(),
            StepHandler::ExternalTask(handler) => handler.activity_id(),
            StepHandler::Job(handler) => handler.activity_id(),
            StepHandler::UserTask(handler) => handler.activity_id(),
            StepHandler::Scope(driver) => driver.activity_id(),
        }
    }

    /// Applies a wait-state handler. Scope drivers need the coordinator and
    /// are dispatched by the caller instead.
    pub(crate) fn apply_wait_state(&self, runtime: &mut dyn WorkflowRuntime, process: &ProcessHandle) -> Result<(), ApplyError> {
        debug!(activity_id = %self.activity_id(), instance_id = %process.instance_id, "applying step handler");
        match self {
            StepHandler::Event(handler) => handler.apply(runtime, process),
            StepHandler::ExternalTask(handler) => handler.apply(runtime, process),
            StepHandler::Job(handler) => handler.apply(runtime, process),
            StepHandler::UserTask(handler) => handler.apply(runtime, process),
            StepHandler::Scope(_) => Ok(()),
        }
    }
}

macro_rules! step_handler_from {
    ($variant:ident, $handler:ty) => {
        impl<'a> From<&'a $handler> for StepHandler<'a> {
            fn from(handler: &'a $handler) -> Self {
                StepHandler::$variant(handler)
            }
        }

        impl<'a> From<&'a mut $handler> for StepHandler<'a> {
            fn from(handler: &'a mut $handler) -> Self {
                StepHandler::$variant(handler)
            }
        }
    };
}

step_handler_from!(Event, EventHandler);
step_handler_from!(ExternalTask, ExternalTaskHandler);
step_handler_from!(Job, JobHandler);
step_handler_from!(UserTask, UserTaskHandler);

impl<'a> From<&'a mut ScopeLoopDriver> for StepHandler<'a> {
    fn from(driver: &'a mut ScopeLoopDriver) -> Self {
        StepHandler::Scope(driver)
    }
}

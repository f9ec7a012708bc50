use std::{fmt, rc::Rc};

use anyhow::Result;
use bpmndt_types::LoopMode;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Variables passed to the runtime when starting an instance or completing a step.
pub type Variables = serde_json::Map<String, Value>;

/// Identifies one live process instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ProcessHandle {
    pub instance_id: String,
    pub definition_key: String,
}

impl ProcessHandle {
    pub fn new(instance_id: impl Into<String>, definition_key: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            definition_key: definition_key.into(),
        }
    }
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.instance_id, self.definition_key)
    }
}

/// Historic state of one activity within a process instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityState {
    pub started: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl ActivityState {
    pub fn started_at(start_time: DateTime<Utc>) -> Self {
        Self {
            started: true,
            start_time: Some(start_time),
            end_time: None,
        }
    }

    pub fn ended_at(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            started: true,
            start_time: Some(start_time),
            end_time: Some(end_time),
        }
    }

    /// An activity has ended once the runtime reports its end time.
    pub fn is_ended(&self) -> bool {
        self.end_time.is_some()
    }
}

/// Where a process definition is deployed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentSource {
    Bytes { resource_name: String, bytes: Vec<u8> },
    /// A resource the runtime can load by name.
    Resource(String),
}

impl DeploymentSource {
    pub fn resource_name(&self) -> &str {
        match self {
            DeploymentSource::Bytes { resource_name, .. } => resource_name,
            DeploymentSource::Resource(name) => name,
        }
    }
}

/// A workflow-level fault raised as if it originated at an activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowFault {
    Error { code: String, message: Option<String> },
    Escalation { code: String },
}

impl fmt::Display for WorkflowFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowFault::Error { code, message: Some(message) } => write!(f, "BPMN error '{code}': {message}"),
            WorkflowFault::Error { code, message: None } => write!(f, "BPMN error '{code}'"),
            WorkflowFault::Escalation { code } => write!(f, "escalation '{code}'"),
        }
    }
}

/// The behavior the runtime would perform for a call activity when nothing
/// intercepts it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallActivityBehavior {
    pub activity_id: String,
    pub called_element: String,
    pub binding: Option<String>,
    pub version: Option<String>,
    pub version_tag: Option<String>,
    pub tenant_id: Option<String>,
    pub business_key: Option<String>,
    pub input: Variables,
}

impl CallActivityBehavior {
    pub fn new(activity_id: impl Into<String>, called_element: impl Into<String>) -> Self {
        Self {
            activity_id: activity_id.into(),
            called_element: called_element.into(),
            ..Default::default()
        }
    }
}

/// Outcome of intercepting a call activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallActivityDecision {
    /// Leave the activity the way the default behavior would have.
    Proceed,
    /// Remain suspended at the activity.
    Stay,
    /// Raise the fault at the activity.
    Fault(WorkflowFault),
}

/// Hooks the runtime invokes synchronously while executing an instance.
///
/// One extension is attached per run. Implementations must answer
/// immediately; the runtime waits for the return value before continuing.
pub trait ExecutionExtension {
    /// Replaces the default call activity behavior.
    fn intercept_call_activity(&self, process: &ProcessHandle, behavior: &CallActivityBehavior) -> Result<CallActivityDecision>;

    fn activity_started(&self, activity_id: &str, instance_id: &str) -> Result<()>;

    fn activity_ended(&self, activity_id: &str, instance_id: &str) -> Result<()>;
}

/// Workflow runtime consumed by the coordinator and the step handlers.
///
/// Implementations wrap a real engine; tests use scripted in-memory fakes.
pub trait WorkflowRuntime {
    /// Installs the extension that receives call activity and listener callbacks.
    fn attach(&mut self, extension: Rc<dyn ExecutionExtension>);

    fn detach(&mut self);

    /// Deploys a definition and returns the deployment id.
    fn deploy(&mut self, deployment_name: &str, source: &DeploymentSource) -> Result<String>;

    fn delete(&mut self, deployment_id: &str) -> Result<()>;

    fn start(&mut self, definition_key: &str, variables: &Variables) -> Result<ProcessHandle>;

    /// Returns the historic state of an activity, or `None` when it never started.
    fn query_activity(&self, process: &ProcessHandle, activity_id: &str) -> Result<Option<ActivityState>>;

    /// Ordering mode of the multi-instance activity `activity_id`.
    fn loop_mode(&self, process: &ProcessHandle, activity_id: &str) -> Result<LoopMode>;

    fn is_waiting_at(&self, process: &ProcessHandle, activity_id: &str) -> Result<bool> {
        Ok(self
            .query_activity(process, activity_id)?
            .is_some_and(|state| state.started && !state.is_ended()))
    }

    fn complete_user_task(&mut self, process: &ProcessHandle, activity_id: &str, variables: &Variables) -> Result<()>;

    fn complete_external_task(
        &mut self,
        process: &ProcessHandle,
        activity_id: &str,
        topic: Option<&str>,
        variables: &Variables,
    ) -> Result<()>;

    /// Raises `fault` at a waiting activity, e.g. an external task reporting a BPMN error.
    fn raise_fault(&mut self, process: &ProcessHandle, activity_id: &str, fault: &WorkflowFault) -> Result<()>;

    /// Executes the job (async continuation or timer) waiting at `activity_id`.
    fn execute_job(&mut self, process: &ProcessHandle, activity_id: &str) -> Result<()>;

    /// Correlates a message or signal, or triggers the conditional event waiting at `activity_id`.
    fn trigger_event(&mut self, process: &ProcessHandle, activity_id: &str, event_name: Option<&str>, variables: &Variables) -> Result<()>;
}

/// Creates a runtime on first use.
pub type RuntimeFactory = Box<dyn FnMut() -> Result<Box<dyn WorkflowRuntime>>>;

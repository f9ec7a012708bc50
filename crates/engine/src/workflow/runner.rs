//! Test case execution against a workflow runtime.
//!
//! An [`ExecutionCoordinator`] owns one test case run from deployment to
//! teardown. `start` attaches the run hooks to the runtime, deploys the
//! definition, records the `PROTOCOL`/`TEST` header and starts the process
//! instance. The test body then drives the instance through [`apply`]
//! (and [`execute_path`]). `finish` records the result, ships the encoded
//! records to the configured listener and tears the run down.
//!
//! [`apply`]: ExecutionCoordinator::apply
//! [`execute_path`]: ExecutionCoordinator::execute_path

use std::{cell::RefCell, fmt, rc::Rc, time::Duration};

use anyhow::anyhow;
use bpmndt_types::Record;
use bpmndt_util::{
    config::TelemetrySettings,
    transport::{DEFAULT_SEND_TIMEOUT, ListenerAddress, send_encoded},
};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::executor::{
    runner::{
        CallActivityBehavior, CallActivityDecision, DeploymentSource, ExecutionExtension, ProcessHandle, RuntimeFactory, Variables,
        WorkflowRuntime,
    },
    types::{ApplyError, StepHandler},
};

use super::{
    interceptor::{CallActivityInterceptor, CallActivityStub},
    state::{RecorderError, TelemetryRecorder},
};

/// Identity and definition source of one test case run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCaseRun {
    pub suite_name: String,
    pub method_name: String,
    /// Generated test case name, also used as deployment name.
    pub case_id: String,
    pub definition_key: String,
    pub source: DeploymentSource,
}

impl TestCaseRun {
    pub fn new(
        suite_name: impl Into<String>,
        method_name: impl Into<String>,
        case_id: impl Into<String>,
        definition_key: impl Into<String>,
        source: DeploymentSource,
    ) -> Self {
        Self {
            suite_name: suite_name.into(),
            method_name: method_name.into(),
            case_id: case_id.into(),
            definition_key: definition_key.into(),
            source,
        }
    }
}

/// Lifecycle of an [`ExecutionCoordinator`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CoordinatorState {
    #[default]
    Initialized,
    Deployed,
    Running,
    Finished,
}

/// Misuse of the coordinator or failure of the runtime while setting up or
/// tearing down a run.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("cannot {operation} before the test case is started")]
    NotRunning { operation: &'static str },
    #[error("test case '{0}' has already been started")]
    AlreadyStarted(String),
    #[error("no workflow runtime available: {0:#}")]
    RuntimeUnavailable(#[source] anyhow::Error),
    #[error(transparent)]
    Recorder(#[from] RecorderError),
    #[error("failed to {operation}: {source:#}")]
    Runtime {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

/// What happened to the encoded records at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryDelivery {
    /// No listener is configured.
    Disabled,
    Delivered { address: ListenerAddress, bytes: usize },
    Failed { address: ListenerAddress, reason: String },
}

/// Result of [`ExecutionCoordinator::finish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub success: bool,
    pub records: Vec<Record>,
    pub delivery: TelemetryDelivery,
}

/// State reachable from runtime callbacks during one run.
#[derive(Debug, Default)]
struct RunHooks {
    interceptor: RefCell<CallActivityInterceptor>,
    recorder: RefCell<TelemetryRecorder>,
}

impl ExecutionExtension for RunHooks {
    fn intercept_call_activity(&self, process: &ProcessHandle, behavior: &CallActivityBehavior) -> anyhow::Result<CallActivityDecision> {
        let mut interceptor = self
            .interceptor
            .try_borrow_mut()
            .map_err(|_| anyhow!("call activity interceptor is re-entered by '{}'", behavior.activity_id))?;
        interceptor.intercept(process, behavior)
    }

    fn activity_started(&self, activity_id: &str, instance_id: &str) -> anyhow::Result<()> {
        self.recorder
            .try_borrow_mut()
            .map_err(|_| anyhow!("telemetry recorder is busy"))?
            .record_activity_start(activity_id, instance_id)?;
        Ok(())
    }

    fn activity_ended(&self, activity_id: &str, instance_id: &str) -> anyhow::Result<()> {
        self.recorder
            .try_borrow_mut()
            .map_err(|_| anyhow!("telemetry recorder is busy"))?
            .record_activity_end(activity_id, instance_id)?;
        Ok(())
    }
}

/// Deploys, drives and tears down one test case run.
pub struct ExecutionCoordinator {
    test_case: TestCaseRun,
    runtime: Option<Box<dyn WorkflowRuntime>>,
    runtime_factory: Option<RuntimeFactory>,
    hooks: Rc<RunHooks>,
    listener: Option<ListenerAddress>,
    send_timeout: Duration,
    variables: Variables,
    state: CoordinatorState,
    deployment_id: Option<String>,
    process: Option<ProcessHandle>,
}

impl fmt::Debug for ExecutionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionCoordinator")
            .field("test_case", &self.test_case)
            .field("state", &self.state)
            .field("listener", &self.listener)
            .field("deployment_id", &self.deployment_id)
            .field("process", &self.process)
            .finish_non_exhaustive()
    }
}

impl ExecutionCoordinator {
    pub fn new(test_case: TestCaseRun) -> Self {
        Self {
            test_case,
            runtime: None,
            runtime_factory: None,
            hooks: Rc::new(RunHooks::default()),
            listener: None,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            variables: Variables::new(),
            state: CoordinatorState::Initialized,
            deployment_id: None,
            process: None,
        }
    }

    /// Reuses an existing runtime, e.g. one returned by [`into_runtime`](Self::into_runtime).
    pub fn with_runtime(mut self, runtime: Box<dyn WorkflowRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Creates the runtime on `start` when none was supplied.
    pub fn with_runtime_factory<F>(mut self, factory: F) -> Self
    where
        F: FnMut() -> anyhow::Result<Box<dyn WorkflowRuntime>> + 'static,
    {
        self.runtime_factory = Some(Box::new(factory));
        self
    }

    pub fn with_listener(mut self, listener: Option<ListenerAddress>) -> Self {
        self.listener = listener;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Applies listener address and send timeout from loaded settings.
    pub fn with_settings(self, settings: &TelemetrySettings) -> Self {
        let timeout = settings.send_timeout();
        self.with_listener(settings.listener_address()).with_send_timeout(timeout)
    }

    /// Adds a variable passed when the process instance is started.
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn test_case(&self) -> &TestCaseRun {
        &self.test_case
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn deployment_id(&self) -> Option<&str> {
        self.deployment_id.as_deref()
    }

    pub fn process(&self) -> Result<&ProcessHandle, CoordinatorError> {
        self.process.as_ref().ok_or(CoordinatorError::NotRunning {
            operation: "access the process instance",
        })
    }

    pub fn runtime(&self) -> Result<&dyn WorkflowRuntime, CoordinatorError> {
        self.runtime
            .as_deref()
            .ok_or(CoordinatorError::NotRunning { operation: "access the runtime" })
    }

    fn running_parts(&mut self, operation: &'static str) -> Result<(&mut dyn WorkflowRuntime, &ProcessHandle), CoordinatorError> {
        if self.state != CoordinatorState::Running {
            return Err(CoordinatorError::NotRunning { operation });
        }
        match (self.runtime.as_deref_mut(), self.process.as_ref()) {
            (Some(runtime), Some(process)) => {
                let runtime: &mut dyn WorkflowRuntime = runtime;
                Ok((runtime, process))
            }
            _ => Err(CoordinatorError::NotRunning { operation }),
        }
    }

    /// Records collected so far in this run.
    pub fn records(&self) -> Vec<Record> {
        self.hooks.recorder.borrow().records().to_vec()
    }

    /// Registers a call activity stub for the rest of the run.
    pub fn register_call_activity_handler(&mut self, activity_id: impl Into<String>, stub: impl CallActivityStub + 'static) {
        self.hooks.interceptor.borrow_mut().register(activity_id, stub);
    }

    /// Deploys the definition and starts a process instance.
    pub fn start(&mut self) -> Result<ProcessHandle, CoordinatorError> {
        if matches!(self.state, CoordinatorState::Deployed | CoordinatorState::Running) {
            return Err(CoordinatorError::AlreadyStarted(self.test_case.case_id.clone()));
        }

        if self.runtime.is_none() {
            let factory = self.runtime_factory.as_mut().ok_or_else(|| {
                CoordinatorError::RuntimeUnavailable(anyhow!("neither a runtime nor a runtime factory is configured"))
            })?;
            self.runtime = Some(factory().map_err(CoordinatorError::RuntimeUnavailable)?);
        }
        let Some(runtime) = self.runtime.as_deref_mut() else {
            return Err(CoordinatorError::RuntimeUnavailable(anyhow!("runtime factory produced no runtime")));
        };

        let extension: Rc<dyn ExecutionExtension> = self.hooks.clone();
        runtime.attach(extension);

        let deployment_id = match runtime.deploy(&self.test_case.case_id, &self.test_case.source) {
            Ok(deployment_id) => deployment_id,
            Err(source) => {
                runtime.detach();
                return Err(CoordinatorError::Runtime {
                    operation: "deploy process definition",
                    source,
                });
            }
        };
        debug!(case_id = %self.test_case.case_id, deployment_id = %deployment_id, "process definition deployed");
        self.deployment_id = Some(deployment_id);
        self.state = CoordinatorState::Deployed;

        {
            let mut recorder = self.hooks.recorder.borrow_mut();
            recorder.clear();
            recorder.record_protocol()?;
            recorder.record_test(&self.test_case.suite_name, &self.test_case.method_name, &self.test_case.case_id)?;
        }

        let process = runtime
            .start(&self.test_case.definition_key, &self.variables)
            .map_err(|source| CoordinatorError::Runtime {
                operation: "start process instance",
                source,
            })?;
        info!(
            case_id = %self.test_case.case_id,
            instance_id = %process.instance_id,
            "test case started"
        );
        self.process = Some(process.clone());
        self.state = CoordinatorState::Running;
        Ok(process)
    }

    /// Applies a step handler to the running process instance.
    pub fn apply<'a>(&mut self, handler: impl Into<StepHandler<'a>>) -> Result<(), ApplyError> {
        match handler.into() {
            StepHandler::Scope(driver) => {
                self.running_parts("apply a scope driver")?;
                driver.drive(self)
            }
            handler => {
                let (runtime, process) = self.running_parts("apply a step handler")?;
                handler.apply_wait_state(runtime, process)
            }
        }
    }

    /// Fails unless the process instance is waiting at `activity_id`.
    pub fn assert_waiting_at(&self, activity_id: &str) -> Result<(), ApplyError> {
        let process = self.process()?;
        let waiting = self
            .runtime()?
            .is_waiting_at(process, activity_id)
            .map_err(|source| ApplyError::runtime("query wait state", activity_id, source))?;
        if waiting {
            Ok(())
        } else {
            Err(ApplyError::NotWaiting {
                instance_id: process.instance_id.clone(),
                activity_id: activity_id.to_string(),
            })
        }
    }

    /// Fails unless `activity_id` has started and ended.
    pub fn assert_has_passed(&self, activity_id: &str) -> Result<(), ApplyError> {
        let process = self.process()?;
        let state = self
            .runtime()?
            .query_activity(process, activity_id)
            .map_err(|source| ApplyError::runtime("query activity", activity_id, source))?;
        if state.is_some_and(|state| state.is_ended()) {
            Ok(())
        } else {
            Err(ApplyError::NotPassed {
                instance_id: process.instance_id.clone(),
                activity_id: activity_id.to_string(),
            })
        }
    }

    /// Records the outcome, ships telemetry and tears the run down.
    ///
    /// Teardown runs even when recording the result fails; the first error is
    /// returned afterwards. Telemetry delivery never fails the run.
    pub fn finish(&mut self, success: bool) -> Result<RunSummary, CoordinatorError> {
        if matches!(self.state, CoordinatorState::Initialized | CoordinatorState::Finished) {
            return Err(CoordinatorError::NotRunning { operation: "finish" });
        }

        let recorded = self.hooks.recorder.borrow_mut().record_result(success);
        let (records, payload) = {
            let recorder = self.hooks.recorder.borrow();
            (recorder.records().to_vec(), recorder.encode())
        };
        let delivery = self.deliver(&payload);

        let teardown = self.teardown();
        self.state = CoordinatorState::Finished;
        info!(case_id = %self.test_case.case_id, success, "test case finished");

        recorded?;
        teardown?;
        Ok(RunSummary {
            success,
            records,
            delivery,
        })
    }

    fn deliver(&self, payload: &[u8]) -> TelemetryDelivery {
        let Some(address) = &self.listener else {
            return TelemetryDelivery::Disabled;
        };

        match send_encoded(address, payload, self.send_timeout) {
            Ok(()) => {
                debug!(listener = %address, bytes = payload.len(), "telemetry sent");
                TelemetryDelivery::Delivered {
                    address: address.clone(),
                    bytes: payload.len(),
                }
            }
            Err(error) => {
                warn!(listener = %address, error = %error, "failed to send telemetry");
                TelemetryDelivery::Failed {
                    address: address.clone(),
                    reason: error.to_string(),
                }
            }
        }
    }

    fn teardown(&mut self) -> Result<(), CoordinatorError> {
        self.hooks.interceptor.borrow_mut().clear();
        self.hooks.recorder.borrow_mut().clear();
        self.process = None;

        let Some(runtime) = self.runtime.as_deref_mut() else {
            return Ok(());
        };
        runtime.detach();

        match self.deployment_id.take() {
            Some(deployment_id) => runtime.delete(&deployment_id).map_err(|source| CoordinatorError::Runtime {
                operation: "delete deployment",
                source,
            }),
            None => Ok(()),
        }
    }

    /// Releases the runtime so the next test case can reuse it.
    pub fn into_runtime(mut self) -> Option<Box<dyn WorkflowRuntime>> {
        if matches!(self.state, CoordinatorState::Deployed | CoordinatorState::Running)
            && let Err(error) = self.teardown()
        {
            warn!(case_id = %self.test_case.case_id, error = %error, "teardown of unfinished test case failed");
        }
        self.runtime.take()
    }
}

//! Multi-instance scope driving.
//!
//! A [`ScopeLoopDriver`] iterates one repeating region of a running process
//! instance. Each iteration calls a caller-supplied step function that applies
//! the handlers for the region's members, then asks the runtime whether the
//! region's multi-instance body has ended. Once the loop stops, the observed
//! iteration count and ordering mode are checked against the expectations
//! configured on the driver.

use std::{collections::BTreeMap, fmt};

use bpmndt_types::{LoopMode, multi_instance_body_id};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::workflow::runner::ExecutionCoordinator;

use super::{runner::ProcessHandle, types::ApplyError};

/// Signal returned by a scope step function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    /// Stop iterating even though the region has not ended, e.g. because a
    /// boundary event interrupted it.
    Stop,
}

/// Lifecycle of a [`ScopeLoopDriver`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DriverState {
    #[default]
    Idle,
    Running,
    Ended,
}

/// Verification failures raised after a scope has ended.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoopVerificationError {
    #[error("Expected multi instance '{scope_id}' to loop {expected}x, but was {actual}x")]
    CountMismatch { scope_id: String, expected: u32, actual: u32 },
    #[error("Expected multi instance '{scope_id}' to be {expected}, but was {actual}")]
    ModeMismatch {
        scope_id: String,
        expected: LoopMode,
        actual: LoopMode,
    },
    #[error("No activity instance found for multi instance '{scope_id}'")]
    ScopeNotFound { scope_id: String },
}

/// Iteration state of one drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopState {
    pub loop_index: u32,
    pub observed_mode: LoopMode,
    pub expected_loop_count: Option<u32>,
    pub expected_mode: Option<LoopMode>,
}

impl LoopState {
    fn verify(&self, scope_id: &str) -> Result<(), LoopVerificationError> {
        if let Some(expected) = self.expected_loop_count
            && expected != self.loop_index
        {
            return Err(LoopVerificationError::CountMismatch {
                scope_id: scope_id.to_string(),
                expected,
                actual: self.loop_index,
            });
        }

        if let Some(expected) = self.expected_mode
            && expected != self.observed_mode
        {
            return Err(LoopVerificationError::ModeMismatch {
                scope_id: scope_id.to_string(),
                expected,
                actual: self.observed_mode,
            });
        }

        Ok(())
    }
}

type ScopeStep = Box<dyn FnMut(&mut ExecutionCoordinator, u32) -> Result<LoopControl, ApplyError>>;

/// Drives and verifies the iterations of one multi-instance scope.
pub struct ScopeLoopDriver {
    activity_id: String,
    step: ScopeStep,
    expected_loop_count: Option<u32>,
    expected_mode: Option<LoopMode>,
    state: DriverState,
    last_run: Option<LoopState>,
}

impl fmt::Debug for ScopeLoopDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeLoopDriver")
            .field("activity_id", &self.activity_id)
            .field("expected_loop_count", &self.expected_loop_count)
            .field("expected_mode", &self.expected_mode)
            .field("state", &self.state)
            .field("last_run", &self.last_run)
            .finish_non_exhaustive()
    }
}

impl ScopeLoopDriver {
    /// Creates a driver for the scope `activity_id`, calling `step` once per
    /// iteration with the current loop index.
    pub fn new<F>(activity_id: impl Into<String>, step: F) -> Self
    where
        F: FnMut(&mut ExecutionCoordinator, u32) -> Result<LoopControl, ApplyError> + 'static,
    {
        Self {
            activity_id: activity_id.into(),
            step: Box::new(step),
            expected_loop_count: None,
            expected_mode: None,
            state: DriverState::Idle,
            last_run: None,
        }
    }

    pub fn verify_loop_count(mut self, loop_count: u32) -> Self {
        self.expected_loop_count = Some(loop_count);
        self
    }

    pub fn verify_sequential(mut self) -> Self {
        self.expected_mode = Some(LoopMode::Sequential);
        self
    }

    pub fn verify_parallel(mut self) -> Self {
        self.expected_mode = Some(LoopMode::Parallel);
        self
    }

    /// Applies a reusable configuration, e.g. expectations shared by several tests.
    pub fn customize<F>(self, customizer: F) -> Self
    where
        F: FnOnce(Self) -> Self,
    {
        customizer(self)
    }

    pub fn activity_id(&self) -> &str {
        &self.activity_id
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// State of the most recent drive, available once it has ended.
    pub fn last_run(&self) -> Option<&LoopState> {
        self.last_run.as_ref()
    }

    pub(crate) fn drive(&mut self, coordinator: &mut ExecutionCoordinator) -> Result<(), ApplyError> {
        let process = coordinator.process()?.clone();
        let scope_id = multi_instance_body_id(&self.activity_id);

        let observed_mode = coordinator
            .runtime()?
            .loop_mode(&process, &self.activity_id)
            .map_err(|source| ApplyError::runtime("query loop mode", &self.activity_id, source))?;

        let mut loop_state = LoopState {
            loop_index: 0,
            observed_mode,
            expected_loop_count: self.expected_loop_count,
            expected_mode: self.expected_mode,
        };

        self.state = DriverState::Running;
        self.last_run = None;
        info!(scope_id = %scope_id, mode = %observed_mode, "scope loop started");

        let outcome = loop {
            let control = match (self.step)(coordinator, loop_state.loop_index) {
                Ok(control) => control,
                Err(error) => break Err(error),
            };

            let ended = match scope_ended(coordinator, &process, &self.activity_id, &scope_id) {
                Ok(ended) => ended,
                Err(error) => break Err(error),
            };

            loop_state.loop_index += 1;
            debug!(scope_id = %scope_id, loop_index = loop_state.loop_index, ended, ?control, "scope iteration finished");

            if ended || control == LoopControl::Stop {
                break Ok(());
            }
        };

        self.state = DriverState::Ended;
        self.last_run = Some(loop_state.clone());
        outcome?;

        loop_state.verify(&self.activity_id).inspect_err(|error| {
            warn!(scope_id = %scope_id, error = %error, "scope loop verification failed");
        })?;

        info!(scope_id = %scope_id, iterations = loop_state.loop_index, "scope loop ended");
        Ok(())
    }
}

fn scope_ended(
    coordinator: &ExecutionCoordinator,
    process: &ProcessHandle,
    activity_id: &str,
    scope_id: &str,
) -> Result<bool, ApplyError> {
    let state = coordinator
        .runtime()?
        .query_activity(process, scope_id)
        .map_err(|source| ApplyError::runtime("query scope", scope_id, source))?
        .ok_or_else(|| LoopVerificationError::ScopeNotFound {
            scope_id: activity_id.to_string(),
        })?;
    Ok(state.is_ended())
}

/// Per-iteration handlers for one activity inside a scope.
///
/// Handlers are created lazily by the factory on first request. The default
/// handler serves every iteration that has no handler of its own.
pub struct IterationHandlers<H> {
    handlers: BTreeMap<Option<u32>, H>,
    factory: Box<dyn Fn(Option<u32>) -> H>,
}

impl<H> IterationHandlers<H> {
    /// `factory` receives the loop index, or `None` for the default handler.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(Option<u32>) -> H + 'static,
    {
        Self {
            handlers: BTreeMap::new(),
            factory: Box::new(factory),
        }
    }

    /// Returns the handler for `loop_index`, creating it on first use.
    pub fn handle(&mut self, loop_index: u32) -> &mut H {
        self.slot(Some(loop_index))
    }

    pub fn handle_default(&mut self) -> &mut H {
        self.slot(None)
    }

    /// Returns the handler configured for `loop_index`, falling back to the default handler.
    pub fn get(&mut self, loop_index: u32) -> &mut H {
        let key = if self.handlers.contains_key(&Some(loop_index)) {
            Some(loop_index)
        } else {
            None
        };
        self.slot(key)
    }

    pub fn is_configured(&self, loop_index: u32) -> bool {
        self.handlers.contains_key(&Some(loop_index))
    }

    fn slot(&mut self, key: Option<u32>) -> &mut H {
        let factory = &self.factory;
        self.handlers.entry(key).or_insert_with(|| factory(key))
    }
}

impl<H: fmt::Debug> fmt::Debug for IterationHandlers<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterationHandlers").field("handlers", &self.handlers).finish_non_exhaustive()
    }
}

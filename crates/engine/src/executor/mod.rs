//! Execution of test cases against a workflow runtime.
//!
//! - `runner::WorkflowRuntime` abstracts the engine that runs process instances
//! - `types` holds the step handlers applied to waiting instances
//! - `repeat::ScopeLoopDriver` iterates multi-instance scopes
//! - `planning` resolves declared test cases and names their targets
//! - `execute_path` walks a resolved path, asserting progress after each activity

pub mod execute_path;
pub mod planning;
pub mod repeat;
pub mod runner;
pub mod types;

pub use execute_path::PathEnd;
pub use planning::{TestCasePlan, plan_test_cases, sanitize_identifier, test_case_target_name};
pub use repeat::{DriverState, IterationHandlers, LoopControl, LoopState, LoopVerificationError, ScopeLoopDriver};
pub use runner::{
    ActivityState, CallActivityBehavior, CallActivityDecision, DeploymentSource, ExecutionExtension, ProcessHandle, RuntimeFactory,
    Variables, WorkflowFault, WorkflowRuntime,
};
pub use types::{
    ApplyError, EventHandler, ExternalTaskAction, ExternalTaskHandler, JobHandler, StepHandler, UserTaskHandler, Verifier, WaitAction,
};

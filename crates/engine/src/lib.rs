//! # bpmndt Engine
//!
//! Path-driven testing of workflow definitions. Given the graph of a process,
//! the engine resolves the activities visited between a start and an end
//! node, then drives a live process instance along that path on a workflow
//! runtime, verifying every step and recording telemetry for an external
//! listener.
//!
//! ## Usage
//!
//! ```rust
//! use bpmndt_engine::{plan_test_cases, parse_workflow_document};
//!
//! let document = parse_workflow_document(
//!     r#"
//! process_id: order
//! nodes:
//!   - id: start
//!     kind: event
//!     outgoing: [approve]
//!   - id: approve
//!     kind: user_task
//!     outgoing: [end]
//!   - id: end
//!     kind: event
//! test_cases:
//!   - start: start
//!     end: end
//! "#,
//!     false,
//! )?;
//!
//! let plans = plan_test_cases(&document.graph(), &document.test_cases);
//! assert_eq!(plans[0].target_name, "TC_order__start__end");
//! assert!(plans[0].is_runnable());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`model`**: resolved paths, scope nesting and navigation links
//! - **`resolve`**: path search between two flow nodes
//! - **`executor`**: runtime abstraction, step handlers, scope loop driver,
//!   test case planning and path execution
//! - **`workflow`**: the execution coordinator with its call activity
//!   interceptor and telemetry recorder, plus document loading

pub mod executor;
pub mod model;
pub mod resolve;
pub mod workflow;

pub use executor::{
    ActivityState, ApplyError, CallActivityBehavior, CallActivityDecision, DeploymentSource, DriverState, EventHandler, ExecutionExtension,
    ExternalTaskHandler, IterationHandlers, JobHandler, LoopControl, LoopVerificationError, PathEnd, ProcessHandle, ScopeLoopDriver,
    StepHandler, TestCasePlan, UserTaskHandler, Variables, WorkflowFault, WorkflowRuntime, plan_test_cases, test_case_target_name,
};
pub use model::{ActivityLink, PathActivity, PathResolutionError, PathResult, activity_links};
pub use resolve::resolve;
pub use workflow::document::{graph_from_document, load_workflow_document, parse_workflow_document};
pub use workflow::interceptor::{CallActivityHandler, CallActivityInterceptor, CallActivityStub};
pub use workflow::runner::{CoordinatorError, CoordinatorState, ExecutionCoordinator, RunSummary, TelemetryDelivery, TestCaseRun};
pub use workflow::state::{RecorderError, TelemetryRecorder, process_start_epoch_ms};

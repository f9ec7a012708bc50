//! Call activity interception.
//!
//! Tests register a stub per call activity id. When the runtime reaches a call
//! activity it asks the interceptor what to do instead of starting the called
//! process: activities without a stub proceed exactly as the default behavior
//! would, stubbed ones proceed, stay suspended or raise a simulated fault.

use std::{collections::HashMap, fmt, rc::Rc};

use anyhow::{Result, ensure};
use tracing::debug;

use crate::executor::runner::{CallActivityBehavior, CallActivityDecision, ProcessHandle, WorkflowFault};

/// Decides what happens when the runtime reaches a call activity.
pub trait CallActivityStub {
    fn decide(&mut self, process: &ProcessHandle, behavior: &CallActivityBehavior) -> Result<CallActivityDecision>;
}

impl<F> CallActivityStub for F
where
    F: FnMut(&ProcessHandle, &CallActivityBehavior) -> Result<CallActivityDecision>,
{
    fn decide(&mut self, process: &ProcessHandle, behavior: &CallActivityBehavior) -> Result<CallActivityDecision> {
        self(process, behavior)
    }
}

/// Registry of call activity stubs for the current run.
#[derive(Default)]
pub struct CallActivityInterceptor {
    handlers: HashMap<String, Box<dyn CallActivityStub>>,
}

impl fmt::Debug for CallActivityInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut activity_ids: Vec<&String> = self.handlers.keys().collect();
        activity_ids.sort();
        f.debug_struct("CallActivityInterceptor").field("activity_ids", &activity_ids).finish()
    }
}

impl CallActivityInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `stub` for `activity_id`, replacing an earlier registration.
    pub fn register(&mut self, activity_id: impl Into<String>, stub: impl CallActivityStub + 'static) {
        self.handlers.insert(activity_id.into(), Box::new(stub));
    }

    pub fn is_registered(&self, activity_id: &str) -> bool {
        self.handlers.contains_key(activity_id)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    pub fn intercept(&mut self, process: &ProcessHandle, behavior: &CallActivityBehavior) -> Result<CallActivityDecision> {
        let Some(stub) = self.handlers.get_mut(&behavior.activity_id) else {
            debug!(activity_id = %behavior.activity_id, "no call activity stub registered, proceeding");
            return Ok(CallActivityDecision::Proceed);
        };

        let decision = stub.decide(process, behavior)?;
        debug!(activity_id = %behavior.activity_id, ?decision, "call activity intercepted");
        Ok(decision)
    }
}

type BehaviorVerifier = Rc<dyn Fn(&CallActivityBehavior) -> Result<()>>;

/// Ready-made stub: verifies the call and then proceeds, stays or faults.
#[derive(Clone)]
pub struct CallActivityHandler {
    verifiers: Vec<BehaviorVerifier>,
    decision: CallActivityDecision,
}

impl Default for CallActivityHandler {
    fn default() -> Self {
        Self {
            verifiers: Vec::new(),
            decision: CallActivityDecision::Proceed,
        }
    }
}

impl fmt::Debug for CallActivityHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallActivityHandler")
            .field("verifiers", &self.verifiers.len())
            .field("decision", &self.decision)
            .finish()
    }
}

impl CallActivityHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verify<F>(mut self, verifier: F) -> Self
    where
        F: Fn(&CallActivityBehavior) -> Result<()> + 'static,
    {
        self.verifiers.push(Rc::new(verifier));
        self
    }

    pub fn verify_called_element(self, expected: impl Into<String>) -> Self {
        let expected = expected.into();
        self.verify(move |behavior| {
            ensure!(
                behavior.called_element == expected,
                "expected called element '{}', but was '{}'",
                expected,
                behavior.called_element
            );
            Ok(())
        })
    }

    pub fn verify_input(self, name: impl Into<String>, expected: impl Into<serde_json::Value>) -> Self {
        let name = name.into();
        let expected = expected.into();
        self.verify(move |behavior| {
            let actual = behavior.input.get(&name);
            ensure!(
                actual == Some(&expected),
                "expected input variable '{}' to be {}, but was {}",
                name,
                expected,
                actual.map(ToString::to_string).unwrap_or_else(|| "absent".to_string())
            );
            Ok(())
        })
    }

    pub fn simulate_bpmn_error(mut self, code: impl Into<String>, message: Option<String>) -> Self {
        self.decision = CallActivityDecision::Fault(WorkflowFault::Error {
            code: code.into(),
            message,
        });
        self
    }

    pub fn simulate_escalation(mut self, code: impl Into<String>) -> Self {
        self.decision = CallActivityDecision::Fault(WorkflowFault::Escalation { code: code.into() });
        self
    }

    /// Keeps the call activity suspended so a boundary event can be triggered.
    pub fn wait_for_boundary_event(mut self) -> Self {
        self.decision = CallActivityDecision::Stay;
        self
    }
}

impl CallActivityStub for CallActivityHandler {
    fn decide(&mut self, _process: &ProcessHandle, behavior: &CallActivityBehavior) -> Result<CallActivityDecision> {
        for verifier in &self.verifiers {
            verifier(behavior)?;
        }
        Ok(self.decision.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process() -> ProcessHandle {
        ProcessHandle::new("pi-1", "order")
    }

    #[test]
    fn unregistered_activity_proceeds() {
        let mut interceptor = CallActivityInterceptor::new();
        let decision = interceptor
            .intercept(&process(), &CallActivityBehavior::new("callBilling", "billing"))
            .expect("intercept");
        assert_eq!(decision, CallActivityDecision::Proceed);
    }

    #[test]
    fn registered_handler_decides() {
        let mut interceptor = CallActivityInterceptor::new();
        interceptor.register("callBilling", CallActivityHandler::new().wait_for_boundary_event());
        interceptor.register(
            "callShipping",
            CallActivityHandler::new().simulate_escalation("SHIPPING_DELAYED"),
        );

        let stay = interceptor
            .intercept(&process(), &CallActivityBehavior::new("callBilling", "billing"))
            .expect("intercept");
        assert_eq!(stay, CallActivityDecision::Stay);

        let fault = interceptor
            .intercept(&process(), &CallActivityBehavior::new("callShipping", "shipping"))
            .expect("intercept");
        assert_eq!(
            fault,
            CallActivityDecision::Fault(WorkflowFault::Escalation {
                code: "SHIPPING_DELAYED".into()
            })
        );
    }

    #[test]
    fn verifier_failure_is_returned() {
        let mut interceptor = CallActivityInterceptor::new();
        interceptor.register("callBilling", CallActivityHandler::new().verify_called_element("invoicing"));

        let error = interceptor
            .intercept(&process(), &CallActivityBehavior::new("callBilling", "billing"))
            .expect_err("called element differs");
        assert!(error.to_string().contains("expected called element 'invoicing'"));
    }

    #[test]
    fn closures_act_as_stubs_and_clear_removes_them() {
        let mut calls = 0;
        let mut interceptor = CallActivityInterceptor::new();
        interceptor.register("callBilling", move |_: &ProcessHandle, _: &CallActivityBehavior| -> Result<CallActivityDecision> {
            calls += 1;
            Ok(if calls > 1 {
                CallActivityDecision::Proceed
            } else {
                CallActivityDecision::Stay
            })
        });

        let behavior = CallActivityBehavior::new("callBilling", "billing");
        assert_eq!(interceptor.intercept(&process(), &behavior).expect("first"), CallActivityDecision::Stay);
        assert_eq!(interceptor.intercept(&process(), &behavior).expect("second"), CallActivityDecision::Proceed);

        interceptor.clear();
        assert!(interceptor.is_empty());
    }
}

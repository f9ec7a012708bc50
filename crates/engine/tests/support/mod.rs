#![allow(dead_code)]

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use anyhow::{Result, anyhow, bail};
use bpmndt_engine::{
    ActivityState, CallActivityBehavior, CallActivityDecision, DeploymentSource, ExecutionExtension, ProcessHandle, Variables, WorkflowFault,
    WorkflowRuntime,
};
use bpmndt_types::{LoopMode, multi_instance_body_id};
use chrono::{DateTime, Utc};

/// One element of a scripted process.
#[derive(Debug, Clone)]
pub enum Step {
    Pass(&'static str),
    Wait(&'static str),
    Call {
        activity_id: &'static str,
        called_element: &'static str,
    },
    /// Stays active until the next wait state is completed.
    EventGateway(&'static str),
    LoopStart {
        activity_id: &'static str,
        iterations: u32,
    },
    LoopEnd,
}

#[derive(Debug, Default)]
struct Track {
    active: Vec<String>,
    first_start: Option<DateTime<Utc>>,
    last_end: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Frame {
    body: String,
    start: usize,
    remaining: u32,
}

/// Observable state of the scripted runtime.
#[derive(Default)]
pub struct FakeState {
    pub log: Vec<String>,
    pub faults: Vec<(String, WorkflowFault)>,
    pub triggered: Vec<(String, Option<String>)>,
    pub completed: Vec<String>,
    pub start_variables: Variables,
    pub loop_mode: Option<LoopMode>,
    pub fail_deploy: bool,
    /// Reports activities without end times, like a runtime whose history lags behind.
    pub hide_end_times: bool,
    extension: Option<Rc<dyn ExecutionExtension>>,
    process: Option<ProcessHandle>,
    steps: Vec<Step>,
    cursor: usize,
    waiting: Option<String>,
    open_gateway: Option<String>,
    frames: Vec<Frame>,
    tracks: HashMap<String, Track>,
    instances: u32,
    deployments: u32,
}

impl FakeState {
    pub fn is_attached(&self) -> bool {
        self.extension.is_some()
    }

    fn process(&self) -> Result<ProcessHandle> {
        self.process.clone().ok_or_else(|| anyhow!("no process instance"))
    }

    fn extension(&self) -> Result<Rc<dyn ExecutionExtension>> {
        self.extension.clone().ok_or_else(|| anyhow!("no extension attached"))
    }

    fn enter(&mut self, activity_id: &str) -> Result<()> {
        self.instances += 1;
        let instance_id = format!("{activity_id}:{}", self.instances);
        let track = self.tracks.entry(activity_id.to_string()).or_default();
        track.active.push(instance_id.clone());
        track.first_start.get_or_insert_with(Utc::now);
        self.extension()?.activity_started(activity_id, &instance_id)
    }

    fn leave(&mut self, activity_id: &str) -> Result<()> {
        let track = self
            .tracks
            .get_mut(activity_id)
            .ok_or_else(|| anyhow!("'{activity_id}' never started"))?;
        let instance_id = track.active.pop().ok_or_else(|| anyhow!("'{activity_id}' is not active"))?;
        track.last_end = Some(Utc::now());
        self.extension()?.activity_ended(activity_id, &instance_id)
    }

    fn advance(&mut self) -> Result<()> {
        while let Some(step) = self.steps.get(self.cursor).cloned() {
            match step {
                Step::Pass(activity_id) => {
                    self.enter(activity_id)?;
                    self.leave(activity_id)?;
                    self.cursor += 1;
                }
                Step::Wait(activity_id) => {
                    self.enter(activity_id)?;
                    self.waiting = Some(activity_id.to_string());
                    return Ok(());
                }
                Step::EventGateway(activity_id) => {
                    self.enter(activity_id)?;
                    self.open_gateway = Some(activity_id.to_string());
                    self.cursor += 1;
                }
                Step::Call {
                    activity_id,
                    called_element,
                } => {
                    self.enter(activity_id)?;
                    let mut behavior = CallActivityBehavior::new(activity_id, called_element);
                    behavior.input = self.start_variables.clone();
                    match self.extension()?.intercept_call_activity(&self.process()?, &behavior)? {
                        CallActivityDecision::Proceed => {
                            self.leave(activity_id)?;
                            self.cursor += 1;
                        }
                        CallActivityDecision::Stay => {
                            self.waiting = Some(activity_id.to_string());
                            return Ok(());
                        }
                        CallActivityDecision::Fault(fault) => {
                            self.faults.push((activity_id.to_string(), fault));
                            self.waiting = Some(activity_id.to_string());
                            return Ok(());
                        }
                    }
                }
                Step::LoopStart {
                    activity_id,
                    iterations,
                } => {
                    let body = multi_instance_body_id(activity_id);
                    self.enter(&body)?;
                    self.frames.push(Frame {
                        body,
                        start: self.cursor + 1,
                        remaining: iterations,
                    });
                    self.cursor += 1;
                }
                Step::LoopEnd => {
                    let frame = self.frames.last_mut().ok_or_else(|| anyhow!("loop end without loop start"))?;
                    frame.remaining = frame.remaining.saturating_sub(1);
                    if frame.remaining > 0 {
                        self.cursor = frame.start;
                    } else {
                        let body = frame.body.clone();
                        self.frames.pop();
                        self.leave(&body)?;
                        self.cursor += 1;
                    }
                }
            }
        }
        Ok(())
    }

    fn take_waiting(&mut self, activity_id: &str) -> Result<()> {
        if self.waiting.as_deref() != Some(activity_id) {
            bail!("process instance is not waiting at '{activity_id}'");
        }
        self.waiting = None;
        if let Some(gateway) = self.open_gateway.take() {
            self.leave(&gateway)?;
        }
        Ok(())
    }

    fn complete(&mut self, activity_id: &str) -> Result<()> {
        self.take_waiting(activity_id)?;
        self.leave(activity_id)?;
        self.completed.push(activity_id.to_string());
        self.cursor += 1;
        self.advance()
    }
}

/// In-memory runtime walking a fixed list of steps.
pub struct FakeRuntime {
    state: Rc<RefCell<FakeState>>,
}

pub fn fake_runtime(steps: Vec<Step>) -> (Box<dyn WorkflowRuntime>, Rc<RefCell<FakeState>>) {
    let state = Rc::new(RefCell::new(FakeState {
        steps,
        ..Default::default()
    }));
    (Box::new(FakeRuntime { state: state.clone() }), state)
}

impl WorkflowRuntime for FakeRuntime {
    fn attach(&mut self, extension: Rc<dyn ExecutionExtension>) {
        let mut state = self.state.borrow_mut();
        state.log.push("attach".into());
        state.extension = Some(extension);
    }

    fn detach(&mut self) {
        let mut state = self.state.borrow_mut();
        state.log.push("detach".into());
        state.extension = None;
    }

    fn deploy(&mut self, deployment_name: &str, source: &DeploymentSource) -> Result<String> {
        let mut state = self.state.borrow_mut();
        if state.fail_deploy {
            bail!("deployment of '{}' rejected", source.resource_name());
        }
        state.deployments += 1;
        state.log.push(format!("deploy:{deployment_name}:{}", source.resource_name()));
        Ok(format!("deployment-{}", state.deployments))
    }

    fn delete(&mut self, deployment_id: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.log.push(format!("delete:{deployment_id}"));
        Ok(())
    }

    fn start(&mut self, definition_key: &str, variables: &Variables) -> Result<ProcessHandle> {
        let mut state = self.state.borrow_mut();
        state.log.push("start".into());
        let process = ProcessHandle::new("pi-1", definition_key);
        state.process = Some(process.clone());
        state.start_variables = variables.clone();
        state.cursor = 0;
        state.advance()?;
        Ok(process)
    }

    fn query_activity(&self, _process: &ProcessHandle, activity_id: &str) -> Result<Option<ActivityState>> {
        let state = self.state.borrow();
        Ok(state.tracks.get(activity_id).map(|track| ActivityState {
            started: true,
            start_time: track.first_start,
            end_time: if state.hide_end_times { None } else { track.last_end },
        }))
    }

    fn loop_mode(&self, _process: &ProcessHandle, _activity_id: &str) -> Result<LoopMode> {
        Ok(self.state.borrow().loop_mode.unwrap_or(LoopMode::Sequential))
    }

    fn is_waiting_at(&self, _process: &ProcessHandle, activity_id: &str) -> Result<bool> {
        let state = self.state.borrow();
        Ok(state.tracks.get(activity_id).is_some_and(|track| !track.active.is_empty()))
    }

    fn complete_user_task(&mut self, _process: &ProcessHandle, activity_id: &str, _variables: &Variables) -> Result<()> {
        self.state.borrow_mut().complete(activity_id)
    }

    fn complete_external_task(&mut self, _process: &ProcessHandle, activity_id: &str, _topic: Option<&str>, _variables: &Variables) -> Result<()> {
        self.state.borrow_mut().complete(activity_id)
    }

    fn raise_fault(&mut self, _process: &ProcessHandle, activity_id: &str, fault: &WorkflowFault) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.take_waiting(activity_id)?;
        state.faults.push((activity_id.to_string(), fault.clone()));
        state.leave(activity_id)
    }

    fn execute_job(&mut self, _process: &ProcessHandle, activity_id: &str) -> Result<()> {
        self.state.borrow_mut().complete(activity_id)
    }

    fn trigger_event(&mut self, _process: &ProcessHandle, activity_id: &str, event_name: Option<&str>, _variables: &Variables) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.triggered.push((activity_id.to_string(), event_name.map(str::to_string)));
        state.complete(activity_id)
    }
}

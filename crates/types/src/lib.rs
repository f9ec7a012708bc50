//! Shared types for bpmndt: the workflow graph consumed by the path resolver,
//! the telemetry records written during a run and their wire encoding.

pub mod record;
pub mod wire;
pub mod workflow;

pub use record::{PROTOCOL_VERSION, Record, RecordKind};
pub use wire::{RECORD_SEPARATOR, RawRecord, VALUE_SEPARATOR, WireError, decode_raw, decode_records, encode_records};
pub use workflow::{
    ActivityCategory, ActivityKind, FlowNode, LoopMode, MULTI_INSTANCE_BODY_SUFFIX, TestCaseSpec, WorkflowDocument, WorkflowGraph,
    multi_instance_body_id,
};

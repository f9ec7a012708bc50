//! Run-scoped pieces of a test case execution.
//!
//! `runner` owns the coordinator that deploys and drives one instance. The
//! call activity interceptor and the telemetry recorder live for exactly one
//! run and are reached from runtime callbacks through the coordinator's
//! attached extension.

pub mod document;
pub mod interceptor;
pub mod runner;
pub mod state;

//! Supporting services for bpmndt: telemetry settings, the TCP transport that
//! ships run records to a listener, the listener itself and the aggregation
//! of received runs.

pub mod config;
pub mod digest;
pub mod listener;
pub mod transport;

pub use config::{ConfigError, TelemetrySettings, default_config_path, expand_home};
pub use digest::{DigestError, ExecutionDataStore, RunDigest};
pub use listener::{ReceivedStream, TelemetryListener};
pub use transport::{DEFAULT_SEND_TIMEOUT, ListenerAddress, TelemetryTransportError, send_encoded};

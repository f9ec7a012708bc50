//! Fire-and-forget delivery of encoded telemetry to a listener.
//!
//! One TCP connection per run: connect, write the whole stream, close. Every
//! step is bounded by a short timeout so that a stalled or unreachable
//! listener cannot hold up the caller, host name lookup included. Nothing is
//! read back.

use std::{
    fmt,
    io::{self, Write},
    net::{IpAddr, Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    sync::mpsc,
    thread,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(100);

/// Host and port of a telemetry listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerAddress {
    pub host: String,
    pub port: u16,
}

impl ListenerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl fmt::Display for ListenerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<SocketAddr> for ListenerAddress {
    fn from(address: SocketAddr) -> Self {
        Self::new(address.ip().to_string(), address.port())
    }
}

#[derive(Debug, Error)]
pub enum TelemetryTransportError {
    #[error("cannot resolve telemetry listener host '{host}': {source}")]
    UnresolvedHost {
        host: String,
        #[source]
        source: io::Error,
    },
    #[error("cannot connect to telemetry listener {address}: {source}")]
    ConnectFailed {
        address: ListenerAddress,
        #[source]
        source: io::Error,
    },
    #[error("timed out while {operation} telemetry listener {address}")]
    Timeout { address: ListenerAddress, operation: &'static str },
    #[error("failed to write telemetry to {address}: {source}")]
    WriteFailed {
        address: ListenerAddress,
        #[source]
        source: io::Error,
    },
}

/// Sends `payload` to `address`, giving each network step `timeout`.
pub fn send_encoded(address: &ListenerAddress, payload: &[u8], timeout: Duration) -> Result<(), TelemetryTransportError> {
    let candidates = resolve_candidates(address, timeout)?;

    let mut stream = connect_any(address, &candidates, timeout)?;
    stream
        .set_write_timeout(Some(timeout))
        .and_then(|_| stream.set_read_timeout(Some(timeout)))
        .map_err(|source| TelemetryTransportError::ConnectFailed {
            address: address.clone(),
            source,
        })?;

    stream
        .write_all(payload)
        .and_then(|_| stream.flush())
        .map_err(|source| match source.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TelemetryTransportError::Timeout {
                address: address.clone(),
                operation: "writing to",
            },
            _ => TelemetryTransportError::WriteFailed {
                address: address.clone(),
                source,
            },
        })?;

    // The listener reads until EOF; a failed shutdown only means the peer already closed.
    let _ = stream.shutdown(Shutdown::Both);
    debug!(listener = %address, bytes = payload.len(), "telemetry stream written");
    Ok(())
}

fn resolve_candidates(address: &ListenerAddress, timeout: Duration) -> Result<Vec<SocketAddr>, TelemetryTransportError> {
    if let Ok(ip) = address.host.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, address.port)]);
    }

    // The system resolver cannot be cancelled; a lookup that outlives `timeout` finishes detached.
    let (sender, receiver) = mpsc::channel();
    let host = address.host.clone();
    let port = address.port;
    thread::spawn(move || {
        let _ = sender.send((host.as_str(), port).to_socket_addrs().map(|addresses| addresses.collect::<Vec<_>>()));
    });

    let candidates = match receiver.recv_timeout(timeout) {
        Ok(result) => result.map_err(|source| TelemetryTransportError::UnresolvedHost {
            host: address.host.clone(),
            source,
        })?,
        Err(_) => {
            return Err(TelemetryTransportError::Timeout {
                address: address.clone(),
                operation: "resolving",
            });
        }
    };

    if candidates.is_empty() {
        return Err(TelemetryTransportError::UnresolvedHost {
            host: address.host.clone(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
        });
    }
    Ok(candidates)
}

fn connect_any(address: &ListenerAddress, candidates: &[SocketAddr], timeout: Duration) -> Result<TcpStream, TelemetryTransportError> {
    let mut last_error = None;
    for candidate in candidates {
        match TcpStream::connect_timeout(candidate, timeout) {
            Ok(stream) => return Ok(stream),
            Err(error) => last_error = Some(error),
        }
    }

    let error = last_error.unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses found"));
    if matches!(error.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) {
        Err(TelemetryTransportError::Timeout {
            address: address.clone(),
            operation: "connecting to",
        })
    } else {
        Err(TelemetryTransportError::ConnectFailed {
            address: address.clone(),
            source: error,
        })
    }
}

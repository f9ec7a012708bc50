//! TCP listener collecting telemetry streams from test runs.
//!
//! Connections are handled one at a time: the listener reads until the sender
//! closes its side and hands the bytes to the caller. There is no reply.

use std::{
    io::{self, Read},
    net::{SocketAddr, TcpListener, ToSocketAddrs},
    time::Duration,
};

use bpmndt_types::{Record, WireError, decode_records};
use tracing::{debug, warn};

/// Bytes received over one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedStream {
    pub peer: SocketAddr,
    pub bytes: Vec<u8>,
}

impl ReceivedStream {
    pub fn decode(&self) -> Result<Vec<Record>, WireError> {
        decode_records(&self.bytes)
    }
}

#[derive(Debug)]
pub struct TelemetryListener {
    listener: TcpListener,
    read_timeout: Option<Duration>,
}

impl TelemetryListener {
    pub fn bind(address: impl ToSocketAddrs) -> io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(address)?,
            read_timeout: None,
        })
    }

    /// Bounds how long a single connection may stay silent.
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts the next connection and reads it to the end.
    pub fn accept_stream(&self) -> io::Result<ReceivedStream> {
        let (mut stream, peer) = self.listener.accept()?;
        stream.set_read_timeout(self.read_timeout)?;

        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes)?;
        debug!(peer = %peer, bytes = bytes.len(), "telemetry stream received");
        Ok(ReceivedStream { peer, bytes })
    }

    /// Serves connections until `limit` streams were handled, or forever
    /// when no limit is given. Failures on a single connection are logged and
    /// skipped; failing to accept ends the loop.
    pub fn serve<F>(&self, limit: Option<usize>, mut on_stream: F) -> io::Result<usize>
    where
        F: FnMut(ReceivedStream),
    {
        let mut handled = 0usize;
        while limit.is_none_or(|limit| handled < limit) {
            match self.accept_stream() {
                Ok(stream) => {
                    handled += 1;
                    on_stream(stream);
                }
                Err(error) if is_connection_error(&error) => {
                    warn!(error = %error, "dropping telemetry connection");
                }
                Err(error) => return Err(error),
            }
        }
        Ok(handled)
    }
}

fn is_connection_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::UnexpectedEof
    )
}

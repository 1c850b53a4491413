//! Client connection representation.

use crate::config::DEFAULT_MAX_PENDING_OUTPUT;
use crate::error::ServerError;
use crate::net::fd_pool::is_selectable;
use conduit_event_system::{
    ClientConnectionRef, ClientResponseSender, ConnectionId, MessageSource, DEFAULT_MAX_MESSAGE_SIZE,
};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

const READ_CHUNK: usize = 4096;

/// Result of draining a connection's socket.
#[derive(Debug, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Bytes that were available; the peer may have closed right after them
    Data(Vec<u8>),
    /// Nothing to read right now
    WouldBlock,
    /// The peer closed the connection
    Closed,
}

/// An accepted peer link with its own receive and send buffers.
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    connected_at: u64,
    stream: TcpStream,
    receive_buffer: Vec<u8>,
    send_buffer: Vec<u8>,
    peer_closed: bool,
    close_reason: Option<String>,
    close_requested: bool,
    /// Undelimited input held before reading pauses
    read_limit: usize,
    /// Unsent output tolerated before the peer is considered stalled
    output_limit: usize,
    responder: Arc<dyn ClientResponseSender>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("buffered", &self.receive_buffer.len())
            .field("pending_output", &self.send_buffer.len())
            .finish()
    }
}

impl Connection {
    /// Wraps an accepted stream, switching it to non-blocking mode.
    ///
    /// Streams whose descriptor does not fit a `select` set are refused.
    pub fn new(
        id: ConnectionId,
        stream: TcpStream,
        peer: SocketAddr,
        responder: Arc<dyn ClientResponseSender>,
    ) -> Result<Self, ServerError> {
        let fd = stream.as_raw_fd();
        if !is_selectable(fd) {
            return Err(ServerError::DescriptorLimit(fd));
        }
        stream.set_nonblocking(true)?;
        let connected_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Ok(Self {
            id,
            peer,
            connected_at,
            stream,
            receive_buffer: Vec::new(),
            send_buffer: Vec::new(),
            peer_closed: false,
            close_reason: None,
            close_requested: false,
            read_limit: DEFAULT_MAX_MESSAGE_SIZE,
            output_limit: DEFAULT_MAX_PENDING_OUTPUT,
            responder,
        })
    }

    /// Sets the input and output bounds.
    pub fn with_limits(mut self, read_limit: usize, output_limit: usize) -> Self {
        self.read_limit = read_limit;
        self.output_limit = output_limit;
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    /// Reads what is available, up to one byte past the read limit.
    ///
    /// The receive buffer plus the returned bytes never exceed the limit by
    /// more than one byte; anything else stays in the socket for the next
    /// call. When the peer closes after sending data, the data is returned
    /// first and the next call reports `Closed`.
    pub fn receive(&mut self) -> Result<ReceiveOutcome, ServerError> {
        if self.peer_closed {
            return Ok(ReceiveOutcome::Closed);
        }

        let mut received = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let allowance = self
                .read_limit
                .saturating_add(1)
                .saturating_sub(self.receive_buffer.len() + received.len());
            if allowance == 0 {
                break;
            }
            match self.stream.read(&mut chunk[..allowance.min(READ_CHUNK)]) {
                Ok(0) => {
                    self.peer_closed = true;
                    break;
                }
                Ok(n) => received.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ServerError::Io(e)),
            }
        }

        Ok(match (received.is_empty(), self.peer_closed) {
            (false, _) => ReceiveOutcome::Data(received),
            (true, true) => ReceiveOutcome::Closed,
            (true, false) => ReceiveOutcome::WouldBlock,
        })
    }

    /// Queues `data` and writes as much as the socket accepts.
    ///
    /// Fails with `OutputLimit` when what is left unsent exceeds the output
    /// limit; the caller is expected to drop the connection.
    pub fn send(&mut self, data: &[u8]) -> Result<bool, ServerError> {
        self.send_buffer.extend_from_slice(data);
        let flushed = self.flush()?;
        if self.send_buffer.len() > self.output_limit {
            return Err(ServerError::OutputLimit {
                limit: self.output_limit,
            });
        }
        Ok(flushed)
    }

    /// Writes queued output until the socket would block.
    ///
    /// Returns `true` once nothing is left to send.
    pub fn flush(&mut self) -> Result<bool, ServerError> {
        while !self.send_buffer.is_empty() {
            match self.stream.write(&self.send_buffer) {
                Ok(0) => {
                    return Err(ServerError::Io(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "peer stopped accepting data",
                    )))
                }
                Ok(n) => {
                    self.send_buffer.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ServerError::Io(e)),
            }
        }
        Ok(true)
    }

    pub fn has_pending_output(&self) -> bool {
        !self.send_buffer.is_empty()
    }

    /// Marks the connection for closing once its output has been flushed.
    pub fn request_close(&mut self, reason: Option<String>) {
        self.close_requested = true;
        if reason.is_some() {
            self.close_reason = reason;
        }
    }

    /// Whether the runtime should destroy this connection now.
    pub fn should_close(&self) -> bool {
        self.close_requested && self.send_buffer.is_empty()
    }

    pub fn close_reason(&self) -> Option<&str> {
        self.close_reason.as_deref()
    }

    pub fn buffered(&self) -> &[u8] {
        &self.receive_buffer
    }
}

impl MessageSource for Connection {
    fn connection_ref(&self) -> ClientConnectionRef {
        ClientConnectionRef::new(self.id, self.peer, self.connected_at, self.responder.clone())
    }

    fn receive_buffer(&mut self) -> &mut Vec<u8> {
        &mut self.receive_buffer
    }
}

//! Connection registry for tracking and managing client connections.

use super::client::Connection;
use super::outbox::ResponseQueue;
use super::ConnectionId;
use crate::config::DEFAULT_MAX_PENDING_OUTPUT;
use crate::error::ServerError;
use conduit_event_system::DEFAULT_MAX_MESSAGE_SIZE;
use std::collections::BTreeMap;
use std::net::{SocketAddr, TcpStream};
use std::os::fd::RawFd;
use std::sync::Arc;
use tracing::info;

/// Central registry of live connections.
///
/// Ids are assigned in increasing order and never reused, so iterating the
/// registry visits connections in acceptance order.
#[derive(Debug)]
pub struct ConnectionManagement {
    connections: BTreeMap<ConnectionId, Connection>,
    next_id: ConnectionId,
    responses: Arc<ResponseQueue>,
    read_limit: usize,
    output_limit: usize,
}

impl ConnectionManagement {
    /// Creates an empty registry whose connections answer through `responses`.
    pub fn new(responses: Arc<ResponseQueue>) -> Self {
        Self::with_limits(responses, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_MAX_PENDING_OUTPUT)
    }

    /// Like [`new`](Self::new), applying `read_limit` and `output_limit` to
    /// every connection it registers.
    pub fn with_limits(responses: Arc<ResponseQueue>, read_limit: usize, output_limit: usize) -> Self {
        Self {
            connections: BTreeMap::new(),
            next_id: 1,
            responses,
            read_limit,
            output_limit,
        }
    }

    pub fn responses(&self) -> &Arc<ResponseQueue> {
        &self.responses
    }

    /// Registers an accepted stream and returns its id.
    ///
    /// On error the stream is dropped, which closes it.
    pub fn new_connection(&mut self, stream: TcpStream, peer: SocketAddr) -> Result<ConnectionId, ServerError> {
        let id = self.next_id;
        let connection = Connection::new(id, stream, peer, self.responses.clone())?
            .with_limits(self.read_limit, self.output_limit);
        self.next_id += 1;
        self.connections.insert(id, connection);
        self.responses.activate(id);
        info!("🔗 Connection {} from {}", id, peer);
        Ok(id)
    }

    /// Removes and closes the connection.
    pub fn remove_connection(&mut self, id: ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(&id)?;
        self.responses.deactivate(id);
        info!("❌ Connection {} from {} disconnected", id, connection.peer());
        Some(connection)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    pub fn raw_fds(&self) -> Vec<RawFd> {
        self.connections.values().map(Connection::raw_fd).collect()
    }

    pub fn raw_fds_with_pending_output(&self) -> Vec<RawFd> {
        self.connections
            .values()
            .filter(|c| c.has_pending_output())
            .map(Connection::raw_fd)
            .collect()
    }

    /// Drops every connection without notifying anyone.
    pub fn close_all(&mut self) {
        for id in self.ids() {
            self.remove_connection(id);
        }
    }
}

impl Default for ConnectionManagement {
    fn default() -> Self {
        Self::new(Arc::new(ResponseQueue::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ReceiveOutcome;
    use conduit_event_system::{ClientResponseSender, MessageSource};
    use crate::net::fd_pool::dup_above_fd_setsize;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::os::fd::{AsRawFd, FromRawFd};
    use std::time::Duration;

    fn pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, peer) = listener.accept().unwrap();
        (client, server, peer)
    }

    fn receive_until_data(connection: &mut Connection) -> Vec<u8> {
        for _ in 0..100 {
            if let ReceiveOutcome::Data(data) = connection.receive().unwrap() {
                return data;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("no data received");
    }

    #[test]
    fn test_connection_registry() {
        let mut connections = ConnectionManagement::default();
        let (_client_a, server_a, peer_a) = pair();
        let (_client_b, server_b, peer_b) = pair();

        let a = connections.new_connection(server_a, peer_a).unwrap();
        let b = connections.new_connection(server_b, peer_b).unwrap();
        assert!(a < b);
        assert_eq!(connections.ids(), vec![a, b]);
        assert_eq!(connections.raw_fds().len(), 2);
        assert!(connections.responses().is_connection_active(a));

        assert!(connections.remove_connection(a).is_some());
        assert!(connections.remove_connection(a).is_none());
        assert!(!connections.responses().is_connection_active(a));
        assert_eq!(connections.count(), 1);

        connections.close_all();
        assert_eq!(connections.count(), 0);
    }

    #[test]
    fn test_receive_send_and_close() {
        let mut connections = ConnectionManagement::default();
        let (mut client, server, peer) = pair();
        let id = connections.new_connection(server, peer).unwrap();
        let connection = connections.get_mut(id).unwrap();

        assert_eq!(connection.receive().unwrap(), ReceiveOutcome::WouldBlock);

        client.write_all(b"ping").unwrap();
        assert_eq!(receive_until_data(connection), b"ping");

        assert!(connection.send(b"pong").unwrap());
        assert!(!connection.has_pending_output());
        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"pong");

        drop(client);
        let mut outcome = ReceiveOutcome::WouldBlock;
        for _ in 0..100 {
            outcome = connection.receive().unwrap();
            if outcome == ReceiveOutcome::Closed {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(outcome, ReceiveOutcome::Closed);
    }

    #[test]
    fn test_close_waits_for_pending_output() {
        let mut connections = ConnectionManagement::default();
        let (_client, server, peer) = pair();
        let id = connections.new_connection(server, peer).unwrap();
        let connection = connections.get_mut(id).unwrap();

        connection.request_close(Some("done".into()));
        assert!(connection.should_close());
        assert_eq!(connection.close_reason(), Some("done"));
    }

    #[test]
    fn test_stream_beyond_fd_setsize_is_refused() {
        let mut connections = ConnectionManagement::default();
        let (_client, server, peer) = pair();
        let Some(high) = dup_above_fd_setsize(server.as_raw_fd()) else {
            eprintln!("open-file limit too low to place a descriptor above FD_SETSIZE");
            return;
        };
        let high = unsafe { TcpStream::from_raw_fd(high) };

        assert!(matches!(
            connections.new_connection(high, peer),
            Err(ServerError::DescriptorLimit(fd)) if fd >= libc::FD_SETSIZE as i32
        ));
        assert_eq!(connections.count(), 0);
        assert!(!connections.responses().is_connection_active(1));
    }

    #[test]
    fn test_reads_stop_just_past_the_read_limit() {
        let mut connections = ConnectionManagement::with_limits(Arc::new(ResponseQueue::new()), 16, 1024);
        let (mut client, server, peer) = pair();
        let id = connections.new_connection(server, peer).unwrap();
        let connection = connections.get_mut(id).unwrap();

        client.write_all(&[b'x'; 64]).unwrap();
        // Keep what was read buffered, as an unfinished message would be.
        while connection.buffered().len() < 17 {
            let data = receive_until_data(connection);
            connection.receive_buffer().extend_from_slice(&data);
        }
        assert_eq!(connection.buffered().len(), 17);
        assert_eq!(connection.receive().unwrap(), ReceiveOutcome::WouldBlock);

        // The rest stayed in the socket until the buffer was consumed.
        connection.receive_buffer().clear();
        let rest = receive_until_data(connection);
        assert!(!rest.is_empty() && rest.len() <= 17);
    }

    #[test]
    fn test_peer_that_never_reads_hits_output_limit() {
        let mut connections = ConnectionManagement::with_limits(Arc::new(ResponseQueue::new()), 1024, 64 * 1024);
        let (_client, server, peer) = pair();
        let id = connections.new_connection(server, peer).unwrap();
        let connection = connections.get_mut(id).unwrap();

        let chunk = vec![b'y'; 64 * 1024];
        let mut outcome = Ok(true);
        for _ in 0..1024 {
            outcome = connection.send(&chunk);
            if outcome.is_err() {
                break;
            }
        }
        assert!(matches!(outcome, Err(ServerError::OutputLimit { limit: 65536 })));
    }
}

//! A bound, listening TCP endpoint.

use crate::error::ServerError;
use crate::net::fd_pool::is_selectable;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use tracing::debug;

/// An IPv4 listening socket in non-blocking mode.
#[derive(Debug)]
pub struct Socket {
    host: Ipv4Addr,
    port: u16,
    listener: TcpListener,
}

impl Socket {
    /// Binds and listens on `host:port`.
    pub fn bind(host: Ipv4Addr, port: u16) -> Result<Self, ServerError> {
        let listener = TcpListener::bind((host, port))
            .map_err(|e| ServerError::Bind(format!("{host}:{port}: {e}")))?;
        Self::from_listener(listener, host, port)
    }

    /// Wraps an already bound listener.
    ///
    /// Refuses listeners whose descriptor `select` cannot watch.
    pub(crate) fn from_listener(listener: TcpListener, host: Ipv4Addr, port: u16) -> Result<Self, ServerError> {
        let fd = listener.as_raw_fd();
        if !is_selectable(fd) {
            return Err(ServerError::Bind(format!(
                "{host}:{port}: descriptor {fd} exceeds the select limit"
            )));
        }
        listener
            .set_nonblocking(true)
            .map_err(|e| ServerError::Bind(format!("{host}:{port}: {e}")))?;
        debug!("👂 Listening on {}:{}", host, port);
        Ok(Self { host, port, listener })
    }

    /// Accepts one pending connection.
    ///
    /// Returns `NoPendingConnection` when the backlog is empty.
    pub fn accept_connection(&self) -> Result<(TcpStream, SocketAddr), ServerError> {
        match self.listener.accept() {
            Ok(accepted) => Ok(accepted),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(ServerError::NoPendingConnection),
            Err(e) => Err(ServerError::Io(e)),
        }
    }

    pub fn host(&self) -> Ipv4Addr {
        self.host
    }

    /// The port that was requested at bind time.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The bound address; differs from [`port`](Self::port) when binding port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }
}

//! Registry of listening sockets and the blocking multiplexed wait.

use crate::connection::{ConnectionId, ConnectionManagement};
use crate::error::ServerError;
use crate::net::fd_pool::FileDescriptorPool;
use crate::net::socket::Socket;
use std::collections::BTreeMap;
use std::io;
use std::net::Ipv4Addr;
use std::os::fd::RawFd;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Listening sockets keyed by canonical `address:port`.
#[derive(Debug, Default)]
pub struct SocketManagement {
    sockets: BTreeMap<String, Socket>,
}

impl SocketManagement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks that `addr` is a dotted-quad IPv4 literal.
    pub fn is_valid_ip(addr: &str) -> bool {
        addr.parse::<Ipv4Addr>().is_ok()
    }

    /// Canonical textual form of an IPv4 literal.
    ///
    /// Canonicalisation is idempotent: feeding the result back in returns it
    /// unchanged.
    pub fn get_valid_ip(addr: &str) -> Result<String, ServerError> {
        addr.parse::<Ipv4Addr>()
            .map(|ip| ip.to_string())
            .map_err(|e| ServerError::Validation(format!("'{addr}' is not an IPv4 address: {e}")))
    }

    fn socket_key(ip: Ipv4Addr, port: u16) -> String {
        format!("{ip}:{port}")
    }

    /// Binds a listening socket on `addr:port` and registers it.
    ///
    /// # Errors
    ///
    /// `Validation` for a malformed address, `AlreadyExists` when the key is
    /// taken (the registered socket is left untouched) and `Bind` when the
    /// operating system refuses the address.
    pub fn try_new_socket(&mut self, addr: &str, port: u16) -> Result<(), ServerError> {
        let ip: Ipv4Addr = addr
            .parse()
            .map_err(|e| ServerError::Validation(format!("'{addr}' is not an IPv4 address: {e}")))?;
        let key = Self::socket_key(ip, port);
        if self.sockets.contains_key(&key) {
            return Err(ServerError::AlreadyExists(key));
        }

        let socket = Socket::bind(ip, port)?;
        info!("🌐 Socket bound on {}", key);
        self.sockets.insert(key, socket);
        Ok(())
    }

    /// Same as [`try_new_socket`](Self::try_new_socket), logging the failure at debug level.
    pub fn new_socket(&mut self, addr: &str, port: u16) -> bool {
        match self.try_new_socket(addr, port) {
            Ok(()) => true,
            Err(e) => {
                debug!("Socket {}:{} not created: {}", addr, port, e);
                false
            }
        }
    }

    /// Closes and unregisters the socket on `addr:port`.
    pub fn destroy_socket(&mut self, addr: &str, port: u16) -> bool {
        let Ok(ip) = addr.parse::<Ipv4Addr>() else {
            return false;
        };
        let removed = self.sockets.remove(&Self::socket_key(ip, port)).is_some();
        if removed {
            info!("🔌 Socket on {}:{} closed", ip, port);
        }
        removed
    }

    pub fn get(&self, addr: &str, port: u16) -> Option<&Socket> {
        let ip = addr.parse::<Ipv4Addr>().ok()?;
        self.sockets.get(&Self::socket_key(ip, port))
    }

    /// Closes every listening socket.
    pub fn close_all(&mut self) {
        if !self.sockets.is_empty() {
            info!("🔌 Closing {} socket(s)", self.sockets.len());
        }
        self.sockets.clear();
    }

    pub fn count(&self) -> usize {
        self.sockets.len()
    }

    /// Registered keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.sockets.keys().cloned().collect()
    }

    pub fn raw_fds(&self) -> Vec<RawFd> {
        self.sockets.values().map(Socket::raw_fd).collect()
    }

    /// Accepts every pending connection on every socket.
    ///
    /// A socket that fails to accept is skipped so the remaining sockets are
    /// still served. Returns the ids of the new connections.
    pub fn accept_connections(&self, connections: &mut ConnectionManagement) -> Vec<ConnectionId> {
        let mut accepted = Vec::new();
        for (key, socket) in &self.sockets {
            loop {
                match socket.accept_connection() {
                    Ok((stream, peer)) => match connections.new_connection(stream, peer) {
                        Ok(id) => accepted.push(id),
                        Err(e) => debug!("Dropped connection from {} on {}: {}", peer, key, e),
                    },
                    Err(ServerError::NoPendingConnection) => break,
                    Err(e) => {
                        debug!("Accept failed on {}: {}", key, e);
                        break;
                    }
                }
            }
        }
        accepted
    }

    /// Blocks until at least one descriptor in `pool` is ready.
    ///
    /// There is no timeout, so the pool must not be empty. Returns the number
    /// of ready descriptors, 0 when the wait was interrupted by a signal.
    pub fn stall(&self, pool: &FileDescriptorPool) -> Result<usize, ServerError> {
        Self::wait(pool, None)
    }

    /// Like [`stall`](Self::stall) but gives up after `timeout`.
    pub fn stall_timeout(&self, pool: &FileDescriptorPool, timeout: Duration) -> Result<usize, ServerError> {
        Self::wait(pool, Some(timeout))
    }

    fn wait(pool: &FileDescriptorPool, timeout: Option<Duration>) -> Result<usize, ServerError> {
        if pool.is_empty() {
            return Err(ServerError::NoListeners);
        }

        let mut readable = pool.get();
        let mut writable = pool.get_writable();
        // Bounded by what the sets hold; `select` reads and writes that many bits.
        let nfds = readable.ceiling().max(writable.ceiling());
        if nfds == 0 {
            return Err(ServerError::NoListeners);
        }
        let write_ptr = if writable.is_empty() {
            std::ptr::null_mut()
        } else {
            writable.as_mut_ptr()
        };
        let mut timeval = timeout.map(|t| libc::timeval {
            tv_sec: t.as_secs() as libc::time_t,
            tv_usec: t.subsec_micros() as libc::suseconds_t,
        });
        let timeout_ptr = timeval
            .as_mut()
            .map_or(std::ptr::null_mut(), |tv| tv as *mut libc::timeval);

        trace!("⏳ Waiting on {} descriptor(s)", pool.len());
        let ready = unsafe {
            libc::select(
                nfds,
                readable.as_mut_ptr(),
                write_ptr,
                std::ptr::null_mut(),
                timeout_ptr,
            )
        };

        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(ServerError::Io(err));
        }
        Ok(ready as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream;

    #[test]
    fn test_ip_validation() {
        assert!(SocketManagement::is_valid_ip("127.0.0.1"));
        assert!(SocketManagement::is_valid_ip("0.0.0.0"));
        assert!(SocketManagement::is_valid_ip("255.255.255.255"));
        assert!(!SocketManagement::is_valid_ip("256.0.0.1"));
        assert!(!SocketManagement::is_valid_ip("localhost"));
        assert!(!SocketManagement::is_valid_ip("::1"));
        assert!(!SocketManagement::is_valid_ip("1.2.3"));
        assert!(!SocketManagement::is_valid_ip(""));
    }

    #[test]
    fn test_canonicalisation_is_idempotent() {
        for addr in ["127.0.0.1", "10.0.0.254", "0.0.0.0"] {
            let once = SocketManagement::get_valid_ip(addr).unwrap();
            let twice = SocketManagement::get_valid_ip(&once).unwrap();
            assert_eq!(once, twice);
            assert_eq!(once, addr);
        }
        assert!(matches!(SocketManagement::get_valid_ip("bogus"), Err(ServerError::Validation(_))));
    }

    #[test]
    fn test_invalid_address_is_rejected() {
        let mut sockets = SocketManagement::new();
        assert!(!sockets.new_socket("not-an-ip", 0));
        assert!(matches!(
            sockets.try_new_socket("300.1.1.1", 0),
            Err(ServerError::Validation(_))
        ));
        assert_eq!(sockets.count(), 0);
    }

    #[test]
    fn test_socket_lifecycle_on_port_9000() {
        let mut sockets = SocketManagement::new();
        assert!(sockets.new_socket("127.0.0.1", 9000));
        let original_fd = sockets.get("127.0.0.1", 9000).unwrap().raw_fd();

        assert!(!sockets.new_socket("127.0.0.1", 9000));
        assert!(matches!(
            sockets.try_new_socket("127.0.0.1", 9000),
            Err(ServerError::AlreadyExists(key)) if key == "127.0.0.1:9000"
        ));
        assert_eq!(sockets.count(), 1);
        assert_eq!(sockets.get("127.0.0.1", 9000).unwrap().raw_fd(), original_fd);

        assert!(sockets.destroy_socket("127.0.0.1", 9000));
        assert_eq!(sockets.count(), 0);
        assert!(sockets.new_socket("127.0.0.1", 9000));
        assert_eq!(sockets.count(), 1);
    }

    #[test]
    fn test_destroy_unknown_socket() {
        let mut sockets = SocketManagement::new();
        assert!(!sockets.destroy_socket("127.0.0.1", 1));
        assert!(!sockets.destroy_socket("garbage", 1));
    }

    #[test]
    fn test_bind_failure_is_reported() {
        let mut sockets = SocketManagement::new();
        // 192.0.2.0/24 is reserved for documentation and never assigned locally.
        assert!(matches!(sockets.try_new_socket("192.0.2.1", 0), Err(ServerError::Bind(_))));
        assert_eq!(sockets.count(), 0);
    }

    #[test]
    fn test_accept_connections_sweeps_all_sockets() {
        let mut sockets = SocketManagement::new();
        assert!(sockets.new_socket("127.0.0.1", 0));
        let addr = sockets.get("127.0.0.1", 0).unwrap().local_addr().unwrap();
        let mut connections = ConnectionManagement::default();

        assert!(sockets.accept_connections(&mut connections).is_empty());

        let _first = TcpStream::connect(addr).unwrap();
        let _second = TcpStream::connect(addr).unwrap();
        let pool = FileDescriptorPool::collect(&sockets, &connections, &[]);
        assert!(sockets.stall_timeout(&pool, Duration::from_secs(5)).unwrap() >= 1);

        let mut accepted = Vec::new();
        for _ in 0..50 {
            accepted.extend(sockets.accept_connections(&mut connections));
            if accepted.len() == 2 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(accepted.len(), 2);
        assert_eq!(connections.count(), 2);
    }

    #[test]
    fn test_stall_refuses_empty_pool() {
        let sockets = SocketManagement::new();
        let pool = FileDescriptorPool::default();
        assert!(matches!(sockets.stall(&pool), Err(ServerError::NoListeners)));
    }

    #[test]
    fn test_stall_timeout_expires_when_idle() {
        let mut sockets = SocketManagement::new();
        assert!(sockets.new_socket("127.0.0.1", 0));
        let connections = ConnectionManagement::default();
        let pool = FileDescriptorPool::collect(&sockets, &connections, &[]);

        let ready = sockets.stall_timeout(&pool, Duration::from_millis(20)).unwrap();
        assert_eq!(ready, 0);
    }

    #[test]
    fn test_stall_skips_descriptors_select_cannot_hold() {
        let mut sockets = SocketManagement::new();
        assert!(sockets.new_socket("127.0.0.1", 0));
        let connections = ConnectionManagement::default();
        let beyond = libc::FD_SETSIZE as RawFd + 3000;
        let pool = FileDescriptorPool::collect(&sockets, &connections, &[beyond]);

        assert!(pool.max() <= libc::FD_SETSIZE as RawFd);
        let ready = sockets.stall_timeout(&pool, Duration::from_millis(20)).unwrap();
        assert_eq!(ready, 0);

        let unwatchable = FileDescriptorPool::collect(&SocketManagement::new(), &connections, &[beyond]);
        assert!(matches!(
            sockets.stall_timeout(&unwatchable, Duration::from_millis(20)),
            Err(ServerError::NoListeners)
        ));
    }
}

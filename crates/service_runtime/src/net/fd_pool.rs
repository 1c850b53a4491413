//! Descriptor sets for the `select` wait.
//!
//! The pool keeps no state of its own between iterations. It is rebuilt from
//! the socket and connection registries right before every wait, because
//! descriptors come and go between two calls.

use crate::connection::ConnectionManagement;
use crate::net::SocketManagement;
use std::os::fd::RawFd;
use tracing::warn;

/// Whether `fd` fits in a `libc::fd_set`.
pub fn is_selectable(fd: RawFd) -> bool {
    fd >= 0 && (fd as usize) < libc::FD_SETSIZE as usize
}

/// A `libc::fd_set` together with the ceiling `select` needs.
pub struct FdSet {
    raw: libc::fd_set,
    ceiling: RawFd,
}

impl FdSet {
    pub fn new() -> Self {
        let mut raw: libc::fd_set = unsafe { std::mem::zeroed() };
        unsafe { libc::FD_ZERO(&mut raw) };
        Self { raw, ceiling: 0 }
    }

    /// Adds `fd`. Descriptors outside `0..FD_SETSIZE` cannot be represented and are refused.
    pub fn insert(&mut self, fd: RawFd) -> bool {
        if !is_selectable(fd) {
            warn!("Descriptor {} cannot be watched by select", fd);
            return false;
        }
        unsafe { libc::FD_SET(fd, &mut self.raw) };
        self.ceiling = self.ceiling.max(fd + 1);
        true
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        if !is_selectable(fd) {
            return false;
        }
        unsafe { libc::FD_ISSET(fd, &self.raw) }
    }

    /// One more than the largest inserted descriptor, 0 when empty.
    pub fn ceiling(&self) -> RawFd {
        self.ceiling
    }

    pub fn is_empty(&self) -> bool {
        self.ceiling == 0
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut libc::fd_set {
        &mut self.raw
    }
}

impl Default for FdSet {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FdSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let members: Vec<RawFd> = (0..self.ceiling).filter(|fd| self.contains(*fd)).collect();
        f.debug_struct("FdSet").field("members", &members).finish()
    }
}

/// Every descriptor the runtime must watch during one loop iteration.
#[derive(Debug, Default, Clone)]
pub struct FileDescriptorPool {
    readable: Vec<RawFd>,
    writable: Vec<RawFd>,
}

impl FileDescriptorPool {
    /// Collects listening sockets, connections and any `extra` descriptors for reading.
    ///
    /// Connections holding unsent output are also watched for writability so
    /// queued responses drain even when the peer stays silent.
    pub fn collect(sockets: &SocketManagement, connections: &ConnectionManagement, extra: &[RawFd]) -> Self {
        let mut readable = sockets.raw_fds();
        readable.extend(connections.raw_fds());
        readable.extend_from_slice(extra);
        Self {
            readable,
            writable: connections.raw_fds_with_pending_output(),
        }
    }

    /// A fresh read set containing every tracked descriptor.
    pub fn get(&self) -> FdSet {
        Self::build(&self.readable)
    }

    /// A fresh write set for connections with pending output.
    pub fn get_writable(&self) -> FdSet {
        Self::build(&self.writable)
    }

    /// One more than the largest descriptor the sets can hold.
    ///
    /// Descriptors an `fd_set` cannot represent are left out, so the value is
    /// always within the sets handed to `select`.
    pub fn max(&self) -> RawFd {
        self.readable
            .iter()
            .chain(&self.writable)
            .copied()
            .filter(|fd| is_selectable(*fd))
            .max()
            .map_or(0, |fd| fd + 1)
    }

    pub fn len(&self) -> usize {
        self.readable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readable.is_empty() && self.writable.is_empty()
    }

    fn build(fds: &[RawFd]) -> FdSet {
        let mut set = FdSet::new();
        for &fd in fds {
            set.insert(fd);
        }
        set
    }
}

/// Duplicates `fd` onto a descriptor at or above `FD_SETSIZE`.
///
/// Raises the soft open-file limit to the hard one first. Returns `None` when
/// the hard limit leaves no room above `FD_SETSIZE`.
#[cfg(test)]
pub(crate) fn dup_above_fd_setsize(fd: RawFd) -> Option<RawFd> {
    let floor = libc::FD_SETSIZE as libc::c_int;
    unsafe {
        let mut limit: libc::rlimit = std::mem::zeroed();
        if libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) != 0 {
            return None;
        }
        if limit.rlim_cur <= floor as libc::rlim_t + 8 {
            limit.rlim_cur = limit.rlim_max;
            libc::setrlimit(libc::RLIMIT_NOFILE, &limit);
        }
        let high = libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, floor);
        (high >= floor).then_some(high)
    }
}

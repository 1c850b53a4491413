//! Listening sockets, the descriptor pool and the multiplexed wait.

pub mod fd_pool;
pub mod socket;
pub mod socket_management;

pub use fd_pool::{FdSet, FileDescriptorPool};
pub use socket::Socket;
pub use socket_management::SocketManagement;

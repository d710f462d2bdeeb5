//! Non-blocking TCP plumbing for the IRC server: sockets, line-framing
//! buffers and the single-threaded readiness reactor.

pub mod buffer;
pub mod reactor;
pub mod socket;
pub mod support;

pub use crate::reactor::{ConnectionId, Reactor, SocketEvent};
pub use crate::support::{ErrorType, NetworkError, NetworkResult};

//! The error surface a caller can see.
//!
//! I/O problems never reach the caller directly: they turn into a `Fail`
//! completion after retry exhaustion, or into one of the capacity errors
//! below before the request is ever queued.

use crate::request::Rcode;
use radproto::PacketCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TrunkError {
    /// The backlog is full; nothing was queued.
    #[error("unable to queue packet - connections at maximum capacity")]
    NoCapacity,
    /// Every connection is dead; nothing was queued.
    #[error("all destinations are down - cannot send packet")]
    DestUnavailable,
    /// Status-Server is how the trunk measures liveness; callers cannot send
    /// it themselves.
    #[error("Status-Server is reserved for internal use, and cannot be sent manually")]
    StatusServerReserved,
    /// The code is not in this trunk's allowed table.
    #[error("packet code {0} is not allowed on this trunk")]
    CodeNotAllowed(PacketCode),
    /// The request was cancelled, or the trunk shut down underneath it.
    #[error("request was cancelled")]
    Cancelled,
    /// The trunk task is gone.
    #[error("trunk is shutting down")]
    ShuttingDown,
}

impl TrunkError {
    /// The module return code this error maps to.
    pub fn rcode(&self) -> Rcode {
        match self {
            TrunkError::StatusServerReserved => Rcode::Noop,
            _ => Rcode::Fail,
        }
    }
}

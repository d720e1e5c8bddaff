//! Per-exchange request records and the completion types handed back to the
//! caller.

use tokio::sync::oneshot;
use tokio::time::Instant;

use radproto::retry::RetryState;
use radproto::{Encoded, PacketCode, Pair};

use crate::connection::ConnId;
use crate::error::TrunkError;

/// Stable handle for one in-flight exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReqId(pub(crate) u64);

impl ReqId {
    /// Sentinel owner for status-check probes in the identifier tracker.
    /// Probes live on their connection, not in the request arena, so they
    /// need an owner value no real request can ever have.
    pub(crate) const STATUS_CHECK: ReqId = ReqId(u64::MAX);
}

impl std::fmt::Display for ReqId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if *self == ReqId::STATUS_CHECK {
            write!(f, "status-check")
        } else {
            write!(f, "req-{}", self.0)
        }
    }
}

/// Module return code surfaced to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rcode {
    /// Accept, Accounting-Response, CoA-ACK, Disconnect-ACK.
    Ok,
    /// Reject, CoA-NAK, Disconnect-NAK.
    Reject,
    /// Access-Challenge.
    Updated,
    /// Protocol-Error: the reply is valid but carries no usable result.
    Handled,
    /// The request never touched the trunk (e.g. a forbidden code).
    Noop,
    /// Encode, transport, timeout or capacity failure.
    Fail,
}

impl Rcode {
    /// Map a reply packet code onto a return code. Codes with no sensible
    /// mapping (a request code arriving as a reply, say) are failures.
    pub fn from_reply(code: PacketCode) -> Rcode {
        match code {
            PacketCode::AccessAccept => Rcode::Ok,
            PacketCode::AccessChallenge => Rcode::Updated,
            PacketCode::AccessReject => Rcode::Reject,
            PacketCode::AccountingResponse => Rcode::Ok,
            PacketCode::CoaAck => Rcode::Ok,
            PacketCode::CoaNak => Rcode::Reject,
            PacketCode::DisconnectAck => Rcode::Ok,
            PacketCode::DisconnectNak => Rcode::Reject,
            PacketCode::ProtocolError => Rcode::Handled,
            _ => Rcode::Fail,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Rcode::Ok => "ok",
            Rcode::Reject => "reject",
            Rcode::Updated => "updated",
            Rcode::Handled => "handled",
            Rcode::Noop => "noop",
            Rcode::Fail => "fail",
        }
    }
}

impl std::fmt::Display for Rcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A verified reply from the home server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: PacketCode,
    /// Reply attributes, with Proxy-State stripped, any Message-Authenticator
    /// value zeroed, and a packet-type marker added when an Access-Challenge
    /// arrives without one.
    pub pairs: Vec<Pair>,
}

/// Final outcome of an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub rcode: Rcode,
    /// Present when a reply was actually received; absent for timeouts and
    /// per-request failures.
    pub reply: Option<Reply>,
}

/// Caller-supplied knobs for one request.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Larger is more important.
    pub priority: u32,
    /// When the upper layer received the triggering packet; used for
    /// oldest-first ordering inside a priority band. Defaults to enqueue time.
    pub recv_time: Option<Instant>,
    /// Force a Message-Authenticator on the request and require one on the
    /// reply.
    pub require_message_authenticator: bool,
    /// This request relays a packet some NAS is already retransmitting: give
    /// it a final timeout only, and retransmit on Dup signals instead of a
    /// timer.
    pub proxied: bool,
}

impl RequestOptions {
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_recv_time(mut self, recv_time: Instant) -> Self {
        self.recv_time = Some(recv_time);
        self
    }

    pub fn with_message_authenticator(mut self) -> Self {
        self.require_message_authenticator = true;
        self
    }

    pub fn proxied(mut self) -> Self {
        self.proxied = true;
        self
    }
}

/// Where a request currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReqPhase {
    /// Waiting in the trunk backlog; not bound to any connection.
    Backlog,
    /// Popped from the backlog, write in progress. Transient: resolves to one
    /// of the other phases before the scheduler yields.
    Pending,
    /// Bound to a connection with an incomplete write outstanding.
    Partial,
    /// Fully written at least once; waiting for the reply.
    Sent,
}

pub(crate) type DoneSender = oneshot::Sender<Result<Completion, TrunkError>>;

/// Everything the trunk tracks for one exchange.
pub(crate) struct RequestRecord {
    pub id: ReqId,
    pub code: PacketCode,
    pub priority: u32,
    pub recv_time: Instant,
    pub require_message_authenticator: bool,
    pub proxied: bool,
    pub pairs: Vec<Pair>,

    pub phase: ReqPhase,
    /// Connection this request is bound to, while Partial or Sent.
    pub conn: Option<ConnId>,
    /// Identifier reserved on that connection's tracker.
    pub assigned_id: Option<u8>,
    /// Wire bytes plus authenticator; regenerated whenever the request is
    /// rebound, because the identifier comes from the new connection.
    pub encoded: Option<Encoded>,
    /// How much of `encoded` has reached the socket.
    pub partial: usize,
    /// Started at enqueue; never reset by rebinding, so the total-duration
    /// limit spans connections and covers time spent in the backlog.
    pub retry: RetryState,
    /// Completed writes of this request, across rebinds.
    pub transmissions: u32,

    pub done: Option<DoneSender>,
}

impl RequestRecord {
    /// Forget everything tied to the current connection. The caller is
    /// responsible for releasing the tracker slot first.
    pub fn unbind(&mut self) {
        self.conn = None;
        self.assigned_id = None;
        self.encoded = None;
        self.partial = 0;
        self.phase = ReqPhase::Backlog;
    }
}

impl std::fmt::Debug for RequestRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestRecord")
            .field("id", &self.id)
            .field("code", &self.code)
            .field("phase", &self.phase)
            .field("conn", &self.conn)
            .field("assigned_id", &self.assigned_id)
            .field("partial", &self.partial)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_code_mapping() {
        assert_eq!(Rcode::from_reply(PacketCode::AccessAccept), Rcode::Ok);
        assert_eq!(Rcode::from_reply(PacketCode::AccessReject), Rcode::Reject);
        assert_eq!(Rcode::from_reply(PacketCode::AccessChallenge), Rcode::Updated);
        assert_eq!(Rcode::from_reply(PacketCode::AccountingResponse), Rcode::Ok);
        assert_eq!(Rcode::from_reply(PacketCode::CoaAck), Rcode::Ok);
        assert_eq!(Rcode::from_reply(PacketCode::CoaNak), Rcode::Reject);
        assert_eq!(Rcode::from_reply(PacketCode::DisconnectAck), Rcode::Ok);
        assert_eq!(Rcode::from_reply(PacketCode::DisconnectNak), Rcode::Reject);
        assert_eq!(Rcode::from_reply(PacketCode::ProtocolError), Rcode::Handled);

        // Request codes arriving as replies map to failure.
        assert_eq!(Rcode::from_reply(PacketCode::AccessRequest), Rcode::Fail);
        assert_eq!(Rcode::from_reply(PacketCode::CoaRequest), Rcode::Fail);
        assert_eq!(Rcode::from_reply(PacketCode::StatusServer), Rcode::Fail);
    }
}

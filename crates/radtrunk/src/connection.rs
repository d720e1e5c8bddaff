//! One socket to the home server, with its identifier space and liveness
//! state.
//!
//! State machine:
//!
//! ```text
//!            connect ok                zombie condition
//! Connecting ----------> Active <---------------------> Inactive
//!     ^  |  (probe ok)     |   \                        (blocked/full)
//!     |  |                 |    \
//!     |  | probe MRC/MRD   v     v
//!     |  +------------->  Dead <- Zombie
//!     |                    |       (zombie_period, no status checks)
//!     +--------------------+
//!        revive_interval
//! ```
//!
//! A zombie connection takes no new requests; it only retransmits what it
//! already owns and, when status checks are configured, hosts the probe.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::io::{self, ConnIo, IoEvent};
use crate::request::ReqId;
use crate::status::StatusCheck;
use crate::track::IdTracker;

/// Stable handle for one pool slot. The connection behind it is torn down
/// and rebuilt across reconnects; the epoch tells stale I/O events apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ConnId(pub u64);

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnState {
    Connecting,
    Active,
    /// Healthy but unable to take new requests right now (write-blocked or
    /// identifier space exhausted).
    Inactive,
    Zombie,
    Dead,
}

impl ConnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnState::Connecting => "connecting",
            ConnState::Active => "active",
            ConnState::Inactive => "inactive",
            ConnState::Zombie => "zombie",
            ConnState::Dead => "dead",
        }
    }
}

pub(crate) struct Connection {
    pub id: ConnId,
    pub epoch: u64,
    pub state: ConnState,
    pub io: Option<Arc<dyn ConnIo>>,
    pub tracker: IdTracker,

    /// Receive scratch buffer; its length is the negotiated maximum packet
    /// size and can grow via Protocol-Error 601.
    pub recv_buf: Vec<u8>,
    /// Reassembly buffer for stream transports.
    pub stream_buf: BytesMut,
    /// Remaining octets of an oversized stream frame being discarded.
    pub skip_remaining: usize,

    pub write_blocked: bool,
    /// Request with an incomplete write on this socket; nothing else may be
    /// written until it finishes.
    pub partial_req: Option<ReqId>,

    pub last_sent: Option<Instant>,
    pub last_reply: Option<Instant>,
    /// First send since the connection last went idle.
    pub first_sent: Option<Instant>,
    /// Last time the tracker drained to empty.
    pub last_idle: Instant,
    /// Most recent send instant that got a reply.
    pub mrs_time: Option<Instant>,

    /// Deadline for a zombie without status checks to be declared dead.
    pub zombie_at: Option<Instant>,
    /// Deadline for a dead connection to attempt reconnection.
    pub revive_at: Option<Instant>,

    pub status: Option<StatusCheck>,

    rearm_read: Option<mpsc::Sender<()>>,
    arm_write: Option<mpsc::Sender<()>>,
}

impl Connection {
    pub fn new(id: ConnId, max_packet_size: usize, status: Option<StatusCheck>) -> Self {
        Self {
            id,
            epoch: 0,
            state: ConnState::Dead,
            io: None,
            tracker: IdTracker::new(),
            recv_buf: vec![0; max_packet_size],
            stream_buf: BytesMut::new(),
            skip_remaining: 0,
            write_blocked: false,
            partial_req: None,
            last_sent: None,
            last_reply: None,
            first_sent: None,
            last_idle: Instant::now(),
            mrs_time: None,
            zombie_at: None,
            revive_at: None,
            status,
            rearm_read: None,
            arm_write: None,
        }
    }

    pub fn name(&self) -> String {
        match &self.io {
            Some(io) => format!("{} ({})", self.id, io.peer_name()),
            None => self.id.to_string(),
        }
    }

    /// Reset per-socket state for a fresh connection attempt. The epoch bump
    /// orphans any events still in flight from the old socket.
    pub fn begin_connect(&mut self, max_packet_size: usize, now: Instant) {
        self.epoch += 1;
        self.state = ConnState::Connecting;
        self.io = None;
        self.tracker = IdTracker::new();
        self.recv_buf = vec![0; max_packet_size];
        self.stream_buf.clear();
        self.skip_remaining = 0;
        self.write_blocked = false;
        self.partial_req = None;
        self.last_sent = None;
        self.last_reply = None;
        self.first_sent = None;
        self.last_idle = now;
        self.mrs_time = None;
        self.zombie_at = None;
        self.revive_at = None;
        self.rearm_read = None;
        self.arm_write = None;
    }

    /// Adopt a freshly connected socket and start its readiness pumps.
    pub fn attach_io(&mut self, io: Arc<dyn ConnIo>, events: mpsc::Sender<IoEvent>) {
        let (rearm_tx, rearm_rx) = mpsc::channel(1);
        let (arm_tx, arm_rx) = mpsc::channel(1);
        io::spawn_read_pump(io.clone(), self.id, self.epoch, events.clone(), rearm_rx);
        io::spawn_write_pump(io.clone(), self.id, self.epoch, events, arm_rx);
        self.io = Some(io);
        self.rearm_read = Some(rearm_tx);
        self.arm_write = Some(arm_tx);
    }

    /// Drop the socket; the pumps exit when their channels close.
    pub fn detach_io(&mut self) {
        self.io = None;
        self.rearm_read = None;
        self.arm_write = None;
    }

    /// Ask the read pump for the next readable notification.
    pub fn rearm_read(&self) {
        if let Some(rearm) = &self.rearm_read {
            let _ = rearm.try_send(());
        }
    }

    /// Mark the socket write-blocked and ask to be woken when it drains.
    pub fn block_writes(&mut self) {
        self.write_blocked = true;
        if let Some(arm) = &self.arm_write {
            let _ = arm.try_send(());
        }
        self.refresh_usability();
    }

    /// Can this connection take a new request from the backlog?
    pub fn can_accept(&self) -> bool {
        matches!(self.state, ConnState::Active)
            && self.io.is_some()
            && !self.write_blocked
            && self.partial_req.is_none()
            && self.tracker.has_free()
    }

    /// Flip between Active and Inactive as blocking conditions come and go.
    pub fn refresh_usability(&mut self) {
        let busy = self.write_blocked || !self.tracker.has_free();
        match (self.state, busy) {
            (ConnState::Active, true) => {
                debug!(conn = %self.name(), "connection saturated, not taking new requests");
                self.state = ConnState::Inactive;
            }
            (ConnState::Inactive, false) => {
                debug!(conn = %self.name(), "connection usable again");
                self.state = ConnState::Active;
            }
            _ => {}
        }
    }

    /// Record the idle instant once nothing is outstanding.
    pub fn note_idle_if_drained(&mut self, now: Instant) {
        if self.tracker.in_use() == 0 {
            self.last_idle = now;
        }
    }

    /// Grow the receive buffer for a Response-Too-Big negotiation. Bounded;
    /// never shrinks. Buffered stream bytes survive the resize.
    pub fn grow_buffer(&mut self, hint: u32) {
        let target = (hint as usize).clamp(4096, radproto::MAX_PACKET_LENGTH);
        if target > self.recv_buf.len() {
            debug!(conn = %self.name(), size = target, "increasing receive buffer");
            self.recv_buf = vec![0; target];
        }
    }

    /// Buffer capacity, which is also the largest frame we accept.
    pub fn buflen(&self) -> usize {
        self.recv_buf.len()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("epoch", &self.epoch)
            .field("state", &self.state.as_str())
            .field("in_flight", &self.tracker.in_use())
            .field("write_blocked", &self.write_blocked)
            .finish()
    }
}

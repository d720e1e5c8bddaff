//! The trunk: a pool of connections, a backlog, and the task that drives
//! both.
//!
//! All state lives in one task (per-worker isolation; nothing here is shared
//! across threads). Callers talk to it over an mpsc command channel and get
//! completions back over per-request oneshots:
//!
//! ```text
//! caller ----Command::Enqueue----> trunk task ----> backlog ----> connection
//!   ^                                |                               |
//!   +-------- oneshot completion ----+<------- reply / timeout ------+
//! ```
//!
//! Timers (retransmission, zombie, revive, probe) are folded into a single
//! next-deadline sleep in the select loop.

use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use radproto::pair::attr;
use radproto::retry::{RetryState, RetryVerdict};
use radproto::{PacketCode, Pair};

use crate::codec::Codec;
use crate::config::{Mode, RequireMessageAuthenticator, TrunkConfig};
use crate::connection::{ConnId, ConnState, Connection};
use crate::error::TrunkError;
use crate::io::{self, Connector, IoEvent, Transport};
use crate::request::{
    Completion, DoneSender, Rcode, ReqId, ReqPhase, RequestOptions, RequestRecord,
};
use crate::status::StatusCheck;

/// Commands from the caller side.
pub(crate) enum Command {
    Enqueue {
        code: PacketCode,
        pairs: Vec<Pair>,
        options: RequestOptions,
        ack: oneshot::Sender<Result<ReqId, TrunkError>>,
        done: DoneSender,
    },
    Cancel {
        req: ReqId,
        ack: oneshot::Sender<()>,
    },
    Dup {
        req: ReqId,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// Handle to a running trunk. Cheap to clone; dropping every handle shuts the
/// task down once in-flight work resolves.
#[derive(Clone)]
pub struct Trunk {
    cmd_tx: mpsc::Sender<Command>,
}

impl Trunk {
    /// Start a trunk task over `connector`'s sockets, speaking `codec`.
    pub fn spawn(
        config: TrunkConfig,
        connector: impl Connector,
        codec: impl Codec,
    ) -> Trunk {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (event_tx, event_rx) = mpsc::channel(256);

        let task = TrunkTask::new(config, Arc::new(connector), Box::new(codec), cmd_rx, event_tx, event_rx);
        tokio::spawn(task.run());

        Trunk { cmd_tx }
    }

    /// Queue a request. Returns an [`Exchange`] future that resolves when the
    /// reply arrives, the retry schedule is exhausted, or the request is
    /// cancelled. Capacity problems are reported here, before anything is
    /// queued.
    pub async fn enqueue(
        &self,
        code: PacketCode,
        pairs: Vec<Pair>,
        options: RequestOptions,
    ) -> Result<Exchange, TrunkError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();

        self.cmd_tx
            .send(Command::Enqueue {
                code,
                pairs,
                options,
                ack: ack_tx,
                done: done_tx,
            })
            .await
            .map_err(|_| TrunkError::ShuttingDown)?;

        let req = ack_rx.await.map_err(|_| TrunkError::ShuttingDown)??;
        Ok(Exchange {
            req,
            cmd_tx: self.cmd_tx.clone(),
            done: done_rx,
        })
    }

    /// Enqueue and wait for the outcome in one call.
    pub async fn request(
        &self,
        code: PacketCode,
        pairs: Vec<Pair>,
        options: RequestOptions,
    ) -> Result<Completion, TrunkError> {
        self.enqueue(code, pairs, options).await?.await
    }

    /// Drain the trunk. Every in-flight exchange resolves as cancelled.
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::Shutdown { ack: ack_tx })
            .await
            .is_ok()
        {
            let _ = ack_rx.await;
        }
    }
}

/// One in-flight exchange. Await it for the completion; signal it with
/// [`Exchange::cancel`] or [`Exchange::dup`].
#[derive(Debug)]
pub struct Exchange {
    req: ReqId,
    cmd_tx: mpsc::Sender<Command>,
    done: oneshot::Receiver<Result<Completion, TrunkError>>,
}

impl Exchange {
    /// Cancel the exchange. When this returns, the identifier, encoded bytes
    /// and timers are gone; a reply arriving afterwards is dropped as a late
    /// reply. Cancelling twice, or after completion, is a no-op.
    pub async fn cancel(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::Cancel {
                req: self.req,
                ack: ack_tx,
            })
            .await
            .is_ok()
        {
            let _ = ack_rx.await;
        }
    }

    /// The upper layer saw a duplicate of the packet behind this exchange.
    /// In Proxy mode this triggers an immediate retransmission (unless the
    /// socket is blocked); otherwise it is ignored and our own timers rule.
    pub async fn dup(&self) {
        let _ = self.cmd_tx.send(Command::Dup { req: self.req }).await;
    }
}

impl Future for Exchange {
    type Output = Result<Completion, TrunkError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.done).poll(cx).map(|received| match received {
            Ok(outcome) => outcome,
            // The trunk task went away without answering.
            Err(_) => Err(TrunkError::Cancelled),
        })
    }
}

/// Backlog ordering: status checks never enter the backlog (they live on
/// their connection), so ordering is priority-descending, then oldest-first,
/// then enqueue order.
pub(crate) struct BacklogEntry {
    pub priority: u32,
    pub recv_time: Instant,
    pub seq: u64,
    pub req: ReqId,
}

impl PartialEq for BacklogEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for BacklogEntry {}

impl PartialOrd for BacklogEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BacklogEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.recv_time.cmp(&self.recv_time))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub(crate) struct TrunkTask {
    pub cfg: TrunkConfig,
    pub codec: Box<dyn Codec>,
    pub connector: Arc<dyn Connector>,

    pub cmd_rx: mpsc::Receiver<Command>,
    pub event_tx: mpsc::Sender<IoEvent>,
    pub event_rx: mpsc::Receiver<IoEvent>,

    pub conns: HashMap<u64, Connection>,
    pub requests: HashMap<u64, RequestRecord>,
    pub backlog: BinaryHeap<BacklogEntry>,
    /// Requests currently in Backlog phase; the heap may hold stale entries.
    pub backlogged: usize,
    pub next_req: u64,
    pub next_seq: u64,

    /// BlastRADIUS sticky flag: set once the first valid reply carrying a
    /// Message-Authenticator is seen, never cleared.
    pub received_message_authenticator: bool,
    pub last_connected: Option<Instant>,
    pub last_failed: Option<Instant>,

    /// Acknowledged only after teardown, so `shutdown()` returns with every
    /// in-flight exchange already resolved.
    shutdown_ack: Option<oneshot::Sender<()>>,
}

impl TrunkTask {
    pub fn new(
        cfg: TrunkConfig,
        connector: Arc<dyn Connector>,
        codec: Box<dyn Codec>,
        cmd_rx: mpsc::Receiver<Command>,
        event_tx: mpsc::Sender<IoEvent>,
        event_rx: mpsc::Receiver<IoEvent>,
    ) -> Self {
        let max_packet = cfg.clamped_max_packet_size();
        let mut conns = HashMap::new();
        for n in 0..cfg.connections.max(1) as u64 {
            let status = cfg
                .status_check
                .as_ref()
                .map(|sc| StatusCheck::build(sc, cfg.retry.get(sc.code)));
            conns.insert(n, Connection::new(ConnId(n), max_packet, status));
        }

        Self {
            cfg,
            codec,
            connector,
            cmd_rx,
            event_tx,
            event_rx,
            conns,
            requests: HashMap::new(),
            backlog: BinaryHeap::new(),
            backlogged: 0,
            next_req: 0,
            next_seq: 0,
            received_message_authenticator: false,
            last_connected: None,
            last_failed: None,
            shutdown_ack: None,
        }
    }

    pub async fn run(mut self) {
        let now = Instant::now();
        let conn_ids: Vec<ConnId> = self.conns.values().map(|c| c.id).collect();
        for cid in conn_ids {
            self.start_connect(cid, now);
        }

        loop {
            let deadline = self
                .next_deadline()
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if self.handle_command(cmd) {
                                break;
                            }
                        }
                        // Every handle dropped; drain and exit.
                        None => break,
                    }
                }

                event = self.event_rx.recv() => {
                    match event {
                        Some(event) => self.handle_io_event(event),
                        None => break,
                    }
                }

                _ = tokio::time::sleep_until(deadline) => {
                    self.fire_timers(Instant::now());
                }
            }

            self.service_all(Instant::now());
        }

        self.teardown();
    }

    /// Returns true when the task should exit.
    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Enqueue {
                code,
                pairs,
                options,
                ack,
                done,
            } => {
                self.handle_enqueue(code, pairs, options, ack, done);
                false
            }
            Command::Cancel { req, ack } => {
                // Idempotent: cancelling a completed or unknown request does
                // nothing, but still acknowledges.
                self.complete_request(req, Err(TrunkError::Cancelled), Instant::now());
                let _ = ack.send(());
                false
            }
            Command::Dup { req } => {
                self.handle_dup(req, Instant::now());
                false
            }
            Command::Shutdown { ack } => {
                self.shutdown_ack = Some(ack);
                true
            }
        }
    }

    fn handle_enqueue(
        &mut self,
        code: PacketCode,
        mut pairs: Vec<Pair>,
        options: RequestOptions,
        ack: oneshot::Sender<Result<ReqId, TrunkError>>,
        done: DoneSender,
    ) {
        if code == PacketCode::StatusServer {
            warn!("Status-Server is reserved for internal use, and cannot be sent manually");
            let _ = ack.send(Err(TrunkError::StatusServerReserved));
            return;
        }
        if !code.is_request() || !self.cfg.allowed.contains(code) {
            let _ = ack.send(Err(TrunkError::CodeNotAllowed(code)));
            return;
        }
        if self.conns.values().all(|c| c.state == ConnState::Dead) {
            debug!("all destinations are down - cannot send packet");
            let _ = ack.send(Err(TrunkError::DestUnavailable));
            return;
        }
        if self.backlogged >= self.cfg.max_backlog {
            debug!("unable to queue packet - connections at maximum capacity");
            let _ = ack.send(Err(TrunkError::NoCapacity));
            return;
        }

        let now = Instant::now();
        let req = ReqId(self.next_req);
        self.next_req += 1;

        // A caller-supplied Message-Authenticator has a garbage value by
        // construction; drop it and remember to emit a real one.
        let mut require_ma = options.require_message_authenticator;
        if pairs.iter().any(|p| p.attr == attr::MESSAGE_AUTHENTICATOR) {
            pairs.retain(|p| p.attr != attr::MESSAGE_AUTHENTICATOR);
            require_ma = true;
        }

        // Packets we originate over UDP get the per-code schedule. Proxied
        // packets (the NAS retransmits), replicated packets, and anything on
        // a stream transport get one attempt with a final timeout.
        let retry_config = if self.cfg.mode == Mode::Client
            && !options.proxied
            && self.connector.transport() == Transport::Datagram
        {
            self.cfg.retry.get(code)
        } else {
            self.cfg.timeout_retry
        };

        let record = RequestRecord {
            id: req,
            code,
            priority: options.priority,
            recv_time: options.recv_time.unwrap_or(now),
            require_message_authenticator: require_ma,
            proxied: options.proxied,
            pairs,
            phase: ReqPhase::Backlog,
            conn: None,
            assigned_id: None,
            encoded: None,
            partial: 0,
            retry: RetryState::new(retry_config, now.into_std()),
            transmissions: 0,
            done: Some(done),
        };

        debug!(req = %req, code = %code, priority = options.priority, "queued");
        self.requests.insert(req.0, record);
        self.push_backlog(req);
        let _ = ack.send(Ok(req));
    }

    fn handle_dup(&mut self, req: ReqId, now: Instant) {
        // Not synchronous proxying: ignore the dup and let our timers rule.
        if self.cfg.mode != Mode::Proxy {
            return;
        }
        let Some(record) = self.requests.get(&req.0) else {
            return;
        };
        if record.phase != ReqPhase::Sent {
            return;
        }
        let Some(cid) = record.conn else { return };
        let retry_start = Instant::from_std(record.retry.start);

        let write_blocked = self
            .conns
            .get(&cid.0)
            .map(|c| c.write_blocked)
            .unwrap_or(true);
        if write_blocked {
            debug!(req = %req, "io is blocked - suppressing dup retransmission");
        } else {
            debug!(req = %req, "dup signal - retransmitting");
            self.write_request(cid, req, now);
        }
        self.check_for_zombie(cid, now, Some(retry_start));
    }

    fn handle_io_event(&mut self, event: IoEvent) {
        let now = Instant::now();
        match event {
            IoEvent::Connected { conn, epoch, io } => {
                let Some(connection) = self.conns.get_mut(&conn.0) else {
                    return;
                };
                if connection.epoch != epoch || connection.state != ConnState::Connecting {
                    return;
                }
                connection.attach_io(io, self.event_tx.clone());
                info!(conn = %connection.name(), "connection open");

                let probe = connection.status.is_some();
                if probe {
                    if let Some(status) = &mut connection.status {
                        status.begin();
                    }
                    self.service_connection(conn, now);
                } else {
                    self.promote_active(conn, now);
                }
            }
            IoEvent::ConnectFailed { conn, epoch, error } => {
                let Some(connection) = self.conns.get(&conn.0) else {
                    return;
                };
                if connection.epoch != epoch {
                    return;
                }
                error!(conn = %connection.name(), %error, "connection failed");
                self.conn_dead(conn, now);
            }
            IoEvent::Readable { conn, epoch } => {
                if self.epoch_current(conn, epoch) {
                    self.drain_reads(conn, now);
                }
            }
            IoEvent::Writable { conn, epoch } => {
                if self.epoch_current(conn, epoch) {
                    if let Some(connection) = self.conns.get_mut(&conn.0) {
                        connection.write_blocked = false;
                        connection.refresh_usability();
                    }
                    self.service_connection(conn, now);
                }
            }
            IoEvent::Failed { conn, epoch, error } => {
                if self.epoch_current(conn, epoch) {
                    let name = self
                        .conns
                        .get(&conn.0)
                        .map(|c| c.name())
                        .unwrap_or_default();
                    error!(conn = %name, %error, "connection failed");
                    self.conn_dead(conn, now);
                }
            }
        }
    }

    fn epoch_current(&self, conn: ConnId, epoch: u64) -> bool {
        self.conns
            .get(&conn.0)
            .map(|c| c.epoch == epoch && c.io.is_some())
            .unwrap_or(false)
    }

    // ---- timers -----------------------------------------------------------

    fn next_deadline(&self) -> Option<Instant> {
        let mut min: Option<std::time::Instant> = None;
        let mut fold = |at: std::time::Instant| {
            min = Some(match min {
                Some(current) => current.min(at),
                None => at,
            });
        };

        for record in self.requests.values() {
            fold(record.retry.next);
        }
        for conn in self.conns.values() {
            if let Some(at) = conn.zombie_at {
                fold(at.into_std());
            }
            if let Some(at) = conn.revive_at {
                fold(at.into_std());
            }
            if let Some(status) = &conn.status {
                if status.probing {
                    if let Some(retry) = &status.retry {
                        fold(retry.next);
                    }
                }
            }
        }

        min.map(Instant::from_std)
    }

    fn fire_timers(&mut self, now: Instant) {
        let std_now = now.into_std();

        let due: Vec<ReqId> = self
            .requests
            .values()
            .filter(|r| r.retry.next <= std_now)
            .map(|r| r.id)
            .collect();
        for req in due {
            self.handle_retry(req, now);
        }

        let conn_ids: Vec<ConnId> = self.conns.values().map(|c| c.id).collect();
        for cid in conn_ids {
            let Some(conn) = self.conns.get_mut(&cid.0) else {
                continue;
            };

            if conn.zombie_at.is_some_and(|at| at <= now) {
                conn.zombie_at = None;
                info!(
                    conn = %conn.name(),
                    "no replies during zombie period, marking connection dead"
                );
                self.conn_dead(cid, now);
                continue;
            }

            if conn.revive_at.is_some_and(|at| at <= now) {
                conn.revive_at = None;
                info!(conn = %conn.name(), "reviving connection");
                self.start_connect(cid, now);
                continue;
            }

            let probe_due = conn.status.as_ref().is_some_and(|s| {
                s.probing && s.retry.as_ref().is_some_and(|r| r.next <= std_now)
            });
            if probe_due {
                self.probe_timer_fire(cid, now);
            }
        }
    }

    fn handle_retry(&mut self, req: ReqId, now: Instant) {
        let std_now = now.into_std();
        let Some(record) = self.requests.get_mut(&req.0) else {
            return;
        };
        let verdict = record.retry.next(std_now);
        let phase = record.phase;
        let conn = record.conn;
        let retry_start = Instant::from_std(record.retry.start);
        let code = record.code;
        let count = record.retry.count;

        match verdict {
            RetryVerdict::Continue(_) => match phase {
                ReqPhase::Backlog | ReqPhase::Pending => {
                    debug!(req = %req, "still queued to be sent - suppressing retransmission");
                }
                ReqPhase::Partial => {
                    debug!(req = %req, "partially written, io is blocked - suppressing retransmission");
                }
                ReqPhase::Sent => {
                    let cid = conn.expect("sent request is bound to a connection");
                    let write_blocked = self
                        .conns
                        .get(&cid.0)
                        .map(|c| c.write_blocked)
                        .unwrap_or(true);
                    if write_blocked {
                        debug!(req = %req, "io is blocked - suppressing retransmission");
                    } else {
                        self.write_request(cid, req, now);
                    }
                    self.check_for_zombie(cid, now, Some(retry_start));
                }
            },
            RetryVerdict::CountExhausted => {
                warn!(
                    req = %req, code = %code, count,
                    "reached maximum retransmission count, failing request"
                );
                self.fail_after_retry(req, conn, retry_start, now);
            }
            RetryVerdict::DurationExhausted => {
                warn!(
                    req = %req, code = %code,
                    "reached maximum retransmission duration, failing request"
                );
                self.fail_after_retry(req, conn, retry_start, now);
            }
        }
    }

    fn fail_after_retry(
        &mut self,
        req: ReqId,
        conn: Option<ConnId>,
        retry_start: Instant,
        now: Instant,
    ) {
        self.complete_request(
            req,
            Ok(Completion {
                rcode: Rcode::Fail,
                reply: None,
            }),
            now,
        );
        if let Some(cid) = conn {
            self.check_for_zombie(cid, now, Some(retry_start));
        }
    }

    // ---- request arena ----------------------------------------------------

    pub(crate) fn push_backlog(&mut self, req: ReqId) {
        let Some(record) = self.requests.get(&req.0) else {
            return;
        };
        debug_assert_eq!(record.phase, ReqPhase::Backlog);
        let entry = BacklogEntry {
            priority: record.priority,
            recv_time: record.recv_time,
            seq: self.next_seq,
            req,
        };
        self.next_seq += 1;
        self.backlog.push(entry);
        self.backlogged += 1;
    }

    /// Resolve a request and release everything it holds. A no-op when the
    /// request is already gone.
    pub(crate) fn complete_request(
        &mut self,
        req: ReqId,
        result: Result<Completion, TrunkError>,
        now: Instant,
    ) {
        let Some(mut record) = self.requests.remove(&req.0) else {
            return;
        };
        if record.phase == ReqPhase::Backlog {
            self.backlogged = self.backlogged.saturating_sub(1);
        }
        if let (Some(cid), Some(id)) = (record.conn, record.assigned_id) {
            if let Some(conn) = self.conns.get_mut(&cid.0) {
                conn.tracker.release(id);
                if conn.partial_req == Some(req) {
                    conn.partial_req = None;
                }
                conn.note_idle_if_drained(now);
                conn.refresh_usability();
            }
        }
        if let Some(done) = record.done.take() {
            let _ = done.send(result);
        }
    }

    /// Detach a request from its connection and put it back in the backlog.
    /// The encoded bytes are dropped: the next transmission reserves a fresh
    /// identifier, so the authenticator must be regenerated.
    pub(crate) fn unbind_and_backlog(&mut self, req: ReqId, now: Instant) {
        let Some(record) = self.requests.get_mut(&req.0) else {
            return;
        };
        if let (Some(cid), Some(id)) = (record.conn, record.assigned_id) {
            if let Some(conn) = self.conns.get_mut(&cid.0) {
                conn.tracker.release(id);
                if conn.partial_req == Some(req) {
                    conn.partial_req = None;
                }
                conn.note_idle_if_drained(now);
                conn.refresh_usability();
            }
        }
        record.unbind();
        self.push_backlog(req);
    }

    // ---- connection lifecycle --------------------------------------------

    fn start_connect(&mut self, cid: ConnId, now: Instant) {
        let max_packet = self.cfg.clamped_max_packet_size();
        let Some(conn) = self.conns.get_mut(&cid.0) else {
            return;
        };
        conn.begin_connect(max_packet, now);
        debug!(conn = %conn.id, "opening connection");
        io::spawn_connect(
            self.connector.clone(),
            cid,
            conn.epoch,
            self.cfg.connect_timeout,
            self.event_tx.clone(),
        );
    }

    pub(crate) fn promote_active(&mut self, cid: ConnId, now: Instant) {
        let Some(conn) = self.conns.get_mut(&cid.0) else {
            return;
        };
        conn.state = ConnState::Active;
        conn.zombie_at = None;
        conn.last_idle = now;
        conn.refresh_usability();
        info!(conn = %conn.name(), "connection active");
        self.last_connected = Some(now);
        self.service_connection(cid, now);
    }

    /// Tear a connection down: requeue everything it owned, close the socket
    /// and schedule the revival attempt.
    pub(crate) fn conn_dead(&mut self, cid: ConnId, now: Instant) {
        let bound: Vec<ReqId> = self
            .requests
            .values()
            .filter(|r| r.conn == Some(cid))
            .map(|r| r.id)
            .collect();
        let requeued = bound.len();
        for req in bound {
            self.unbind_and_backlog(req, now);
        }

        let Some(conn) = self.conns.get_mut(&cid.0) else {
            return;
        };
        if let Some(status) = &mut conn.status {
            status.reset(&mut conn.tracker);
        }
        if conn.tracker.in_use() != 0 {
            debug_assert!(
                false,
                "{} tracking entries still allocated at connection close",
                conn.tracker.in_use()
            );
            error!(
                conn = %conn.name(),
                in_flight = conn.tracker.in_use(),
                "closing connection with tracking entries still allocated"
            );
        }
        if conn.state != ConnState::Dead {
            warn!(conn = %conn.name(), requeued, "connection dead");
        }
        conn.state = ConnState::Dead;
        conn.detach_io();
        conn.epoch += 1;
        conn.write_blocked = false;
        conn.partial_req = None;
        conn.zombie_at = None;
        conn.revive_at = Some(now + self.cfg.revive_interval);
        self.last_failed = Some(now);
    }

    /// Evaluate the zombie condition, entering the zombie state when it
    /// holds. Checked at final timeout, retry fire, dup signal and outbound
    /// writes. Returns whether the connection is (now) zombie.
    pub(crate) fn check_for_zombie(
        &mut self,
        cid: ConnId,
        now: Instant,
        last_sent_hint: Option<Instant>,
    ) -> bool {
        // Replication doesn't care about home server health.
        if self.cfg.mode == Mode::Replicate {
            return false;
        }
        let Some(conn) = self.conns.get(&cid.0) else {
            return false;
        };
        match conn.state {
            ConnState::Zombie => return true,
            ConnState::Active | ConnState::Inactive => {}
            _ => return false,
        }
        if conn.status.as_ref().is_some_and(|s| s.probing) {
            return true;
        }

        let Some(last_sent) = last_sent_hint.or(conn.last_sent) else {
            return false;
        };
        // A reply since that send means the peer is alive.
        if conn.last_reply.is_some_and(|lr| lr >= last_sent) {
            return false;
        }
        if now.saturating_duration_since(last_sent) <= self.cfg.response_window {
            return false;
        }

        self.enter_zombie(cid, now);
        true
    }

    fn enter_zombie(&mut self, cid: ConnId, now: Instant) {
        let zombie_period = self.cfg.zombie_period;
        let Some(conn) = self.conns.get_mut(&cid.0) else {
            return;
        };
        warn!(conn = %conn.name(), "entering zombie state - no replies within the response window");
        conn.state = ConnState::Zombie;

        if conn.status.is_some() {
            if let Some(status) = &mut conn.status {
                status.begin();
            }
            self.service_connection(cid, now);
        } else {
            conn.zombie_at = Some(now + zombie_period);
        }
    }

    /// Does the trunk's recent history say to be cautious bringing
    /// connections up? (Most recent failure more recent than the most recent
    /// success.)
    pub(crate) fn recently_failed(&self) -> bool {
        match (self.last_failed, self.last_connected) {
            (Some(failed), Some(connected)) => failed > connected,
            (Some(_), None) => true,
            _ => false,
        }
    }

    pub(crate) fn effective_require_ma(&self, per_request: bool) -> bool {
        match self.cfg.require_message_authenticator {
            RequireMessageAuthenticator::Yes => true,
            RequireMessageAuthenticator::Auto => {
                self.received_message_authenticator || per_request
            }
            RequireMessageAuthenticator::No => per_request,
        }
    }

    fn teardown(&mut self) {
        let pending: Vec<u64> = self.requests.keys().copied().collect();
        for key in pending {
            if let Some(mut record) = self.requests.remove(&key) {
                if let Some(done) = record.done.take() {
                    let _ = done.send(Err(TrunkError::Cancelled));
                }
            }
        }
        for conn in self.conns.values_mut() {
            if let Some(status) = &mut conn.status {
                status.reset(&mut conn.tracker);
            }
            conn.detach_io();
            conn.state = ConnState::Dead;
        }
        info!("trunk shut down");
        if let Some(ack) = self.shutdown_ack.take() {
            let _ = ack.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backlog_ordering() {
        let now = Instant::now();
        let earlier = now - Duration::from_secs(1);

        let mut heap = BinaryHeap::new();
        heap.push(BacklogEntry {
            priority: 1,
            recv_time: now,
            seq: 0,
            req: ReqId(0),
        });
        heap.push(BacklogEntry {
            priority: 5,
            recv_time: now,
            seq: 1,
            req: ReqId(1),
        });
        heap.push(BacklogEntry {
            priority: 5,
            recv_time: earlier,
            seq: 2,
            req: ReqId(2),
        });
        heap.push(BacklogEntry {
            priority: 1,
            recv_time: now,
            seq: 3,
            req: ReqId(3),
        });

        // Higher priority first, older first within a band, then enqueue
        // order.
        let order: Vec<u64> = std::iter::from_fn(|| heap.pop()).map(|e| e.req.0).collect();
        assert_eq!(order, vec![2, 1, 0, 3]);
    }
}

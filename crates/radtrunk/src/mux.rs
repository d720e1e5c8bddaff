//! Multiplexing requests onto connections: the write path, the read path,
//! and status-check probe traffic.
//!
//! These are the methods the trunk task calls when a connection becomes
//! usable (pull from the backlog and write), when a socket is readable
//! (drain, correlate, decode, complete), and when probe timers fire.

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use radproto::pair::attr;
use radproto::retry::{RetryState, RetryVerdict};
use radproto::{DecodeFail, PacketCode, Pair, ProtocolErrorInfo, HEADER_LENGTH};

use crate::codec::EncodeSpec;
use crate::config::{Mode, RequireMessageAuthenticator};
use crate::connection::{ConnId, ConnState};
use crate::io::{IoFault, Transport};
use crate::request::{Completion, Rcode, ReqId, ReqPhase, Reply};
use crate::trunk::TrunkTask;

/// What one write attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteOutcome {
    /// Fully on the wire.
    Sent,
    /// Some octets went out; the rest waits for writability.
    Partial,
    /// Nothing went out; waiting for writability.
    Blocked,
    /// Zero-byte write with no progress; back to the backlog.
    Requeued,
    /// The request failed (encode error, oversized packet).
    Failed,
    /// No free identifier on this connection.
    ReserveFailed,
    /// The connection died underneath the write.
    ConnDead,
    /// The request no longer exists.
    Gone,
}

enum Bind {
    Ready,
    ReserveFailed,
    EncodeFailed,
    Gone,
}

impl TrunkTask {
    pub(crate) fn service_all(&mut self, now: Instant) {
        let ids: Vec<ConnId> = self.conns.values().map(|c| c.id).collect();
        for cid in ids {
            self.service_connection(cid, now);
        }
    }

    /// Drive one connection: finish partial writes, send a pending probe,
    /// then pull new work from the backlog while it can accept any.
    pub(crate) fn service_connection(&mut self, cid: ConnId, now: Instant) {
        // Outbound traffic is one of the zombie evaluation points.
        let last_sent = self.conns.get(&cid.0).and_then(|c| c.last_sent);
        self.check_for_zombie(cid, now, last_sent);

        {
            let Some(conn) = self.conns.get(&cid.0) else {
                return;
            };
            if conn.io.is_none() || conn.write_blocked {
                return;
            }
        }

        if let Some(req) = self.conns.get(&cid.0).and_then(|c| c.partial_req) {
            match self.write_request(cid, req, now) {
                WriteOutcome::Sent
                | WriteOutcome::Failed
                | WriteOutcome::Requeued
                | WriteOutcome::Gone => {}
                WriteOutcome::Partial
                | WriteOutcome::Blocked
                | WriteOutcome::ReserveFailed
                | WriteOutcome::ConnDead => return,
            }
        }

        let probe_pending = self
            .conns
            .get(&cid.0)
            .and_then(|c| c.status.as_ref())
            .map(|s| s.probing && s.want_send)
            .unwrap_or(false);
        if probe_pending {
            self.send_probe(cid, now);
        }

        // New requests go only to connections in Active state; a zombie or
        // probing connection above still gets its retransmissions and probe.
        let mut stash = Vec::new();
        loop {
            let can_accept = self
                .conns
                .get(&cid.0)
                .map(|c| c.can_accept())
                .unwrap_or(false);
            if !can_accept {
                break;
            }
            let Some(entry) = self.backlog.pop() else {
                break;
            };
            let valid = self
                .requests
                .get(&entry.req.0)
                .map(|r| r.phase == ReqPhase::Backlog)
                .unwrap_or(false);
            if !valid {
                // Stale heap entry for a request that moved on or was
                // cancelled.
                continue;
            }
            self.backlogged = self.backlogged.saturating_sub(1);
            if let Some(record) = self.requests.get_mut(&entry.req.0) {
                record.phase = ReqPhase::Pending;
            }

            match self.write_request(cid, entry.req, now) {
                WriteOutcome::Sent | WriteOutcome::Failed | WriteOutcome::Gone => continue,
                WriteOutcome::Partial | WriteOutcome::Blocked | WriteOutcome::ConnDead => break,
                // A zero-byte write put it back in the backlog already;
                // popping it again immediately would spin.
                WriteOutcome::Requeued => break,
                WriteOutcome::ReserveFailed => {
                    if let Some(record) = self.requests.get_mut(&entry.req.0) {
                        record.phase = ReqPhase::Backlog;
                    }
                    stash.push(entry);
                    break;
                }
            }
        }
        for entry in stash {
            self.backlog.push(entry);
            self.backlogged += 1;
        }
    }

    /// Write (or continue writing, or retransmit) one request on `cid`.
    ///
    /// First transmission reserves the identifier and encodes; the stored
    /// authenticator makes the tracker slot ready for reply correlation
    /// before any octet hits the wire.
    pub(crate) fn write_request(&mut self, cid: ConnId, req: ReqId, now: Instant) -> WriteOutcome {
        let bind = {
            match self.requests.get(&req.0) {
                None => Bind::Gone,
                Some(record) if record.encoded.is_some() => Bind::Ready,
                Some(_) => {
                    let Some(conn) = self.conns.get_mut(&cid.0) else {
                        return WriteOutcome::Gone;
                    };
                    match conn.tracker.reserve(req) {
                        Err(_) => {
                            conn.refresh_usability();
                            Bind::ReserveFailed
                        }
                        Ok(id) => {
                            let record = self
                                .requests
                                .get_mut(&req.0)
                                .expect("checked above");
                            let proxy_state =
                                record.proxied.then_some(&self.cfg.proxy_state[..]);
                            let spec = EncodeSpec {
                                code: record.code,
                                id,
                                pairs: &record.pairs,
                                proxy_state,
                                message_authenticator: record.require_message_authenticator,
                                max_packet_len: self.cfg.clamped_max_packet_size(),
                            };
                            match self.codec.encode(&self.cfg.secret, &spec) {
                                Ok(encoded) => {
                                    conn.tracker.update(id, encoded.authenticator);
                                    conn.refresh_usability();
                                    record.encoded = Some(encoded);
                                    record.assigned_id = Some(id);
                                    record.conn = Some(cid);
                                    Bind::Ready
                                }
                                Err(error) => {
                                    error!(req = %req, %error, "failed encoding packet");
                                    conn.tracker.release(id);
                                    Bind::EncodeFailed
                                }
                            }
                        }
                    }
                }
            }
        };
        match bind {
            Bind::Ready => {}
            Bind::Gone => return WriteOutcome::Gone,
            Bind::ReserveFailed => return WriteOutcome::ReserveFailed,
            Bind::EncodeFailed => {
                self.complete_request(
                    req,
                    Ok(Completion {
                        rcode: Rcode::Fail,
                        reply: None,
                    }),
                    now,
                );
                return WriteOutcome::Failed;
            }
        }

        let (bytes, offset, first) = {
            let record = self.requests.get(&req.0).expect("bound above");
            let encoded = record.encoded.as_ref().expect("bound above");
            (
                encoded.bytes.clone(),
                record.partial,
                record.transmissions == 0,
            )
        };
        let Some(io) = self.conns.get(&cid.0).and_then(|c| c.io.clone()) else {
            return WriteOutcome::Gone;
        };
        let total = bytes.len();

        match io.try_send(&bytes[offset..]) {
            Ok(n) if offset + n == total => {
                let record = self.requests.get_mut(&req.0).expect("bound above");
                record.partial = 0;
                record.phase = ReqPhase::Sent;
                record.transmissions += 1;
                let code = record.code;
                let id = record.assigned_id.unwrap_or_default();
                let rt = record.retry.rt;
                let proxied = record.proxied;

                let conn = self.conns.get_mut(&cid.0).expect("looked up above");
                if conn.partial_req == Some(req) {
                    conn.partial_req = None;
                }
                if first {
                    conn.last_sent = Some(now);
                    if conn.first_sent.map_or(true, |fs| fs <= conn.last_idle) {
                        conn.first_sent = Some(now);
                    }
                }
                let action = if !first {
                    "retransmitted"
                } else if proxied {
                    "proxied"
                } else {
                    "originated"
                };
                if proxied {
                    debug!(
                        conn = %conn.name(), req = %req, code = %code, id, total, action,
                        "relying on the NAS to perform retransmissions"
                    );
                } else {
                    debug!(
                        conn = %conn.name(), req = %req, code = %code, id, total, action,
                        "expecting response within {:?}", rt
                    );
                }

                if self.cfg.mode == Mode::Replicate && first {
                    self.complete_request(
                        req,
                        Ok(Completion {
                            rcode: Rcode::Ok,
                            reply: None,
                        }),
                        now,
                    );
                }
                WriteOutcome::Sent
            }
            Ok(0) if offset == 0 => {
                warn!(req = %req, "sent zero bytes - requeueing");
                self.unbind_and_backlog(req, now);
                WriteOutcome::Requeued
            }
            Ok(n) => {
                let record = self.requests.get_mut(&req.0).expect("bound above");
                record.partial = offset + n;
                record.phase = ReqPhase::Partial;
                let conn = self.conns.get_mut(&cid.0).expect("looked up above");
                conn.partial_req = Some(req);
                conn.block_writes();
                debug!(req = %req, written = offset + n, total, "partial write, io blocked");
                WriteOutcome::Partial
            }
            Err(IoFault::WouldBlock | IoFault::Interrupted | IoFault::NoBuffers) => {
                // Partial with zero advance. A first transmission stays bound
                // and resumes on writability; a retransmission is simply
                // suppressed until the socket drains.
                let record = self.requests.get_mut(&req.0).expect("bound above");
                if record.transmissions == 0 {
                    record.phase = ReqPhase::Partial;
                    let conn = self.conns.get_mut(&cid.0).expect("looked up above");
                    conn.partial_req = Some(req);
                }
                let conn = self.conns.get_mut(&cid.0).expect("looked up above");
                conn.block_writes();
                WriteOutcome::Blocked
            }
            Err(IoFault::MessageTooBig) => {
                error!(req = %req, total, "packet exceeds the transport maximum, failing request");
                self.complete_request(
                    req,
                    Ok(Completion {
                        rcode: Rcode::Fail,
                        reply: None,
                    }),
                    now,
                );
                WriteOutcome::Failed
            }
            Err(fault) => {
                error!(%fault, "failed sending data, reconnecting");
                self.conn_dead(cid, now);
                WriteOutcome::ConnDead
            }
        }
    }

    // ---- status-check probes ---------------------------------------------

    /// Put the pending probe on the wire, encoding it first if needed. Every
    /// (re)transmission gets a fresh identifier; probes never reuse one.
    pub(crate) fn send_probe(&mut self, cid: ConnId, now: Instant) {
        let mut kill = false;
        {
            let Some(conn) = self.conns.get_mut(&cid.0) else {
                return;
            };
            if conn.io.is_none() || conn.write_blocked {
                return;
            }
            let name = conn.name();
            let Some(status) = &mut conn.status else {
                return;
            };
            if !status.probing || !status.want_send {
                return;
            }

            if status.retry.is_none() {
                status.retry = Some(RetryState::new(status.retry_config, now.into_std()));
                debug!(conn = %name, code = %status.code, "starting status checks");
            }

            if status.encoded.is_none() {
                match conn.tracker.reserve(ReqId::STATUS_CHECK) {
                    Ok(id) => {
                        let pairs = status.pairs_for_encode();
                        let spec = EncodeSpec {
                            code: status.code,
                            id,
                            pairs: &pairs,
                            proxy_state: None,
                            message_authenticator: false,
                            max_packet_len: self.cfg.clamped_max_packet_size(),
                        };
                        match self.codec.encode(&self.cfg.secret, &spec) {
                            Ok(encoded) => {
                                conn.tracker.update(id, encoded.authenticator);
                                status.assigned_id = Some(id);
                                status.partial = 0;
                                status.encoded = Some(encoded);
                            }
                            Err(error) => {
                                error!(conn = %name, %error, "failed encoding status check");
                                conn.tracker.release(id);
                                kill = true;
                            }
                        }
                    }
                    Err(_) => {
                        error!(conn = %name, "no free identifier for a status check");
                        kill = true;
                    }
                }
            }
        }
        if kill {
            self.conn_dead(cid, now);
            return;
        }

        let (io, bytes, offset, id, code, attempt, name) = {
            let Some(conn) = self.conns.get(&cid.0) else {
                return;
            };
            let Some(io) = conn.io.clone() else {
                return;
            };
            let name = conn.name();
            let Some(status) = conn.status.as_ref() else {
                return;
            };
            let Some(encoded) = status.encoded.as_ref() else {
                return;
            };
            (
                io,
                encoded.bytes.clone(),
                status.partial,
                status.assigned_id.unwrap_or_default(),
                status.code,
                status.retry.as_ref().map(|r| r.count).unwrap_or(1),
                name,
            )
        };

        match io.try_send(&bytes[offset..]) {
            Ok(n) if offset + n == bytes.len() => {
                let conn = self.conns.get_mut(&cid.0).expect("looked up above");
                if let Some(status) = &mut conn.status {
                    status.want_send = false;
                    status.partial = 0;
                }
                debug!(conn = %name, code = %code, id, attempt, "status check sent");
            }
            Ok(n) => {
                let conn = self.conns.get_mut(&cid.0).expect("looked up above");
                if let Some(status) = &mut conn.status {
                    status.partial = offset + n;
                }
                conn.block_writes();
            }
            Err(IoFault::WouldBlock | IoFault::Interrupted | IoFault::NoBuffers) => {
                let conn = self.conns.get_mut(&cid.0).expect("looked up above");
                conn.block_writes();
            }
            Err(fault) => {
                error!(conn = %name, %fault, "failed sending status check");
                self.conn_dead(cid, now);
            }
        }
    }

    /// The probe's timer fired: either nothing answered in time, or a
    /// partial round is due for its next transmission.
    pub(crate) fn probe_timer_fire(&mut self, cid: ConnId, now: Instant) {
        let std_now = now.into_std();
        let verdict = {
            let Some(conn) = self.conns.get_mut(&cid.0) else {
                return;
            };
            let name = conn.name();
            let Some(status) = &mut conn.status else {
                return;
            };
            if !status.probing {
                return;
            }
            let Some(retry) = &mut status.retry else {
                return;
            };
            if retry.next > std_now {
                return;
            }

            // Only contiguous replies count.
            if !status.replied_since_fire {
                if status.num_replies > 0 {
                    debug!(
                        conn = %name,
                        "status check went unanswered, resetting the consecutive reply count"
                    );
                }
                status.num_replies = 0;
            }
            status.replied_since_fire = false;

            let verdict = retry.next(std_now);
            if matches!(verdict, RetryVerdict::Continue(_)) {
                status.rotate(&mut conn.tracker);
            }
            verdict
        };

        match verdict {
            RetryVerdict::Continue(_) => {
                self.service_connection(cid, now);
            }
            RetryVerdict::CountExhausted | RetryVerdict::DurationExhausted => {
                warn!("status checks went unanswered, marking connection dead");
                self.conn_dead(cid, now);
            }
        }
    }

    /// A verified reply landed on the probe's identifier.
    pub(crate) fn probe_reply(&mut self, cid: ConnId, decoded: radproto::Decoded, now: Instant) {
        let recently_failed = self.recently_failed();
        let mut promote = false;
        let mut grow = None;
        {
            let Some(conn) = self.conns.get_mut(&cid.0) else {
                return;
            };
            let name = conn.name();
            let state = conn.state;
            let Some(status) = &mut conn.status else {
                return;
            };
            if !status.probing {
                debug!(conn = %name, "ignoring stray status check reply");
                return;
            }
            status.num_replies += 1;
            status.replied_since_fire = true;

            // Probes negotiate Protocol-Error like any other request, and the
            // reply still counts as proof of life.
            if decoded.code == PacketCode::ProtocolError {
                let info = ProtocolErrorInfo::scan(status.code, &decoded.pairs);
                if info.response_too_big {
                    grow = info.response_length;
                }
            }

            // Bringing a connection up after recent trouble takes the full
            // consecutive-reply count; a clean first connect takes one.
            let required = match state {
                ConnState::Connecting if !recently_failed => 1,
                _ => status.num_answers_to_alive,
            };
            if status.num_replies >= required {
                status.reset(&mut conn.tracker);
                conn.last_idle = now;
                info!(
                    conn = %name,
                    "received enough replies to status check, marking connection as active"
                );
                promote = true;
            } else {
                debug!(
                    conn = %name,
                    replies = status.num_replies,
                    required,
                    "status check reply"
                );
            }
        }
        if let Some(hint) = grow {
            if let Some(conn) = self.conns.get_mut(&cid.0) {
                conn.grow_buffer(hint);
            }
        }
        if promote {
            self.promote_active(cid, now);
        }
    }

    // ---- read path --------------------------------------------------------

    /// Drain the socket until it would block. Each complete datagram or
    /// stream frame goes through [`TrunkTask::process_reply`].
    pub(crate) fn drain_reads(&mut self, cid: ConnId, now: Instant) {
        loop {
            let Some(io) = self.conns.get(&cid.0).and_then(|c| c.io.clone()) else {
                return;
            };
            let transport = io.transport();

            let result = {
                let Some(conn) = self.conns.get_mut(&cid.0) else {
                    return;
                };
                io.try_recv(conn.recv_buf.as_mut_slice())
            };

            match result {
                Err(IoFault::WouldBlock) => {
                    if let Some(conn) = self.conns.get(&cid.0) {
                        conn.rearm_read();
                    }
                    return;
                }
                Err(IoFault::Interrupted) => continue,
                Err(IoFault::NoBuffers | IoFault::MessageTooBig) => {
                    warn!("transient receive fault, continuing");
                    continue;
                }
                Err(fault) => {
                    error!(%fault, "failed reading response from socket");
                    self.conn_dead(cid, now);
                    return;
                }
                Ok(0) if transport == Transport::Stream => {
                    info!("home server closed the connection");
                    self.conn_dead(cid, now);
                    return;
                }
                // Zero-length datagrams happen; they are not EOF.
                Ok(0) => continue,
                Ok(n) => {
                    // Replication never reads replies; drain and discard so
                    // the receive queue can't fill.
                    if self.cfg.mode == Mode::Replicate {
                        continue;
                    }
                    match transport {
                        Transport::Datagram => {
                            let data = {
                                let conn = self.conns.get(&cid.0).expect("looked up above");
                                conn.recv_buf[..n].to_vec()
                            };
                            self.process_reply(cid, &data, now);
                        }
                        Transport::Stream => {
                            {
                                let conn =
                                    self.conns.get_mut(&cid.0).expect("looked up above");
                                let (stream_buf, recv_buf) =
                                    (&mut conn.stream_buf, &conn.recv_buf);
                                stream_buf.extend_from_slice(&recv_buf[..n]);
                            }
                            if !self.process_stream(cid, now) {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Carve length-framed packets out of the stream buffer. Returns false
    /// when the connection died.
    fn process_stream(&mut self, cid: ConnId, now: Instant) -> bool {
        enum Step {
            Frame(Vec<u8>),
            Wait,
            Desync,
            Oversize(usize),
        }

        loop {
            let step = {
                let Some(conn) = self.conns.get_mut(&cid.0) else {
                    return false;
                };

                // Still discarding an oversized frame.
                if conn.skip_remaining > 0 {
                    let take = conn.skip_remaining.min(conn.stream_buf.len());
                    let _ = conn.stream_buf.split_to(take);
                    conn.skip_remaining -= take;
                    if conn.skip_remaining > 0 {
                        return true;
                    }
                }

                if conn.stream_buf.len() < 4 {
                    Step::Wait
                } else {
                    let wire_len =
                        u16::from_be_bytes([conn.stream_buf[2], conn.stream_buf[3]]) as usize;
                    if wire_len < HEADER_LENGTH {
                        Step::Desync
                    } else if wire_len > conn.buflen() {
                        Step::Oversize(wire_len)
                    } else if conn.stream_buf.len() < wire_len {
                        Step::Wait
                    } else {
                        Step::Frame(conn.stream_buf.split_to(wire_len).to_vec())
                    }
                }
            };

            match step {
                Step::Wait => return true,
                Step::Desync => {
                    error!(
                        "{} - stream framing is unrecoverable, reconnecting",
                        DecodeFail::MinLengthField
                    );
                    self.conn_dead(cid, now);
                    return false;
                }
                Step::Oversize(len) => {
                    warn!(len, "{} - dropping frame", DecodeFail::HeaderOverflow);
                    if let Some(conn) = self.conns.get_mut(&cid.0) {
                        conn.skip_remaining = len;
                    }
                }
                Step::Frame(frame) => self.process_reply(cid, &frame, now),
            }
        }
    }

    /// One complete inbound packet: validate, correlate by identifier,
    /// verify, and resolve the owning exchange.
    pub(crate) fn process_reply(&mut self, cid: ConnId, data: &[u8], now: Instant) {
        if data.len() < HEADER_LENGTH {
            warn!(len = data.len(), "{} - dropping", DecodeFail::MinLengthPacket);
            return;
        }
        // All codes share one identifier space per connection.
        let id = data[1];

        let Some(entry) = self.conns.get(&cid.0).and_then(|c| c.tracker.find(id)) else {
            warn!(id, "ignoring reply with an identifier that arrived too late");
            return;
        };

        if entry.owner == ReqId::STATUS_CHECK {
            let Some(probe_code) = self
                .conns
                .get(&cid.0)
                .and_then(|c| c.status.as_ref())
                .map(|s| s.code)
            else {
                return;
            };
            let require_ma = self.effective_require_ma(false);
            match self.codec.decode(
                &self.cfg.secret,
                probe_code,
                &entry.authenticator,
                require_ma,
                data,
            ) {
                Ok(decoded) => {
                    if let Some(conn) = self.conns.get_mut(&cid.0) {
                        conn.last_reply = Some(now);
                    }
                    debug!(code = %decoded.code, id, "status check reply received");
                    self.probe_reply(cid, decoded, now);
                }
                Err(fail) => {
                    warn!(id, %fail, "ignoring status check reply that failed verification");
                }
            }
            return;
        }

        let Some(record) = self.requests.get(&entry.owner.0) else {
            warn!(id, "tracker slot without a live request, releasing");
            if let Some(conn) = self.conns.get_mut(&cid.0) {
                conn.tracker.release(id);
            }
            return;
        };
        let request_code = record.code;
        let require_ma = self.effective_require_ma(record.require_message_authenticator);
        let retry_start = Instant::from_std(record.retry.start);

        let decoded = match self.codec.decode(
            &self.cfg.secret,
            request_code,
            &entry.authenticator,
            require_ma,
            data,
        ) {
            Ok(decoded) => decoded,
            Err(fail) => {
                // The slot stays live: a later valid reply can still land.
                warn!(id, %fail, "ignoring packet that failed verification");
                return;
            }
        };

        // Only verified packets count as signs of life; anything else would
        // let a blind attacker keep a dead connection looking healthy.
        if let Some(conn) = self.conns.get_mut(&cid.0) {
            conn.last_reply = Some(now);
            if conn.mrs_time.map_or(true, |m| retry_start > m) {
                conn.mrs_time = Some(retry_start);
            }
            debug!(
                conn = %conn.name(),
                code = %decoded.code, id, len = data.len(),
                "received reply"
            );
        }

        // BlastRADIUS auto-promotion: one-shot, never downgraded.
        if request_code == PacketCode::AccessRequest
            && self.cfg.require_message_authenticator == RequireMessageAuthenticator::Auto
            && !self.received_message_authenticator
            && decoded.message_authenticator
        {
            info!("reply carried a valid Message-Authenticator, requiring one from now on");
            self.received_message_authenticator = true;
        }

        if decoded.code == PacketCode::ProtocolError {
            let info = ProtocolErrorInfo::scan(request_code, &decoded.pairs);
            if info.original_code_mismatch {
                warn!(id, "Protocol-Error names a different original packet code, failing request");
                self.complete_request(
                    entry.owner,
                    Ok(Completion {
                        rcode: Rcode::Fail,
                        reply: None,
                    }),
                    now,
                );
                return;
            }
            if info.response_too_big {
                if let (Some(hint), Some(conn)) =
                    (info.response_length, self.conns.get_mut(&cid.0))
                {
                    conn.grow_buffer(hint);
                }
            }
        }

        // Proxy-State is ours, not the caller's; and the Message-Authenticator
        // value is zeroed so the MAC can't leak through logs.
        let mut pairs: Vec<Pair> = decoded
            .pairs
            .into_iter()
            .filter(|p| p.attr != attr::PROXY_STATE)
            .map(|p| {
                if p.attr == attr::MESSAGE_AUTHENTICATOR {
                    Pair::new(attr::MESSAGE_AUTHENTICATOR, vec![0u8; 16])
                } else {
                    p
                }
            })
            .collect();

        // A challenge must be recognisable from the pair list alone; callers
        // working through the pairs would otherwise treat it like an accept.
        if request_code == PacketCode::AccessRequest
            && decoded.code == PacketCode::AccessChallenge
            && !pairs.iter().any(|p| p.attr == attr::PACKET_TYPE)
        {
            pairs.push(Pair::u32(attr::PACKET_TYPE, decoded.code.to_u8() as u32));
        }

        self.complete_request(
            entry.owner,
            Ok(Completion {
                rcode: Rcode::from_reply(decoded.code),
                reply: Some(Reply {
                    code: decoded.code,
                    pairs,
                }),
            }),
            now,
        );
    }
}

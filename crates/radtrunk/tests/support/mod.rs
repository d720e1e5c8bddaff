//! In-memory transport for driving a trunk without sockets.
//!
//! The stub plays the home server's side of the wire: tests inspect what the
//! trunk sent, forge signed replies with the real codec, and control
//! writability to exercise the backpressure paths.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use radproto::{PacketCode, Pair};
use radtrunk::{ConnIo, Connector, IoFault, Transport};

pub const SECRET: &[u8] = b"testing123";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Accept everything.
    Normal,
    /// Pretend the socket buffer is full.
    Block,
    /// Accept a prefix of the next write, then block.
    Partial(usize),
    /// Fail with a connection reset.
    Reset,
}

#[derive(Debug)]
pub struct StubIo {
    transport: Transport,
    inbound: Mutex<VecDeque<Vec<u8>>>,
    inbound_notify: Notify,
    sent: Mutex<Vec<Vec<u8>>>,
    write_mode: Mutex<WriteMode>,
    writable_notify: Notify,
}

impl StubIo {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            inbound: Mutex::new(VecDeque::new()),
            inbound_notify: Notify::new(),
            sent: Mutex::new(Vec::new()),
            write_mode: Mutex::new(WriteMode::Normal),
            writable_notify: Notify::new(),
        }
    }

    /// Everything the trunk has written, in order.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Deliver bytes to the trunk as one datagram (or stream chunk).
    pub fn push_inbound(&self, data: Vec<u8>) {
        self.inbound.lock().unwrap().push_back(data);
        self.inbound_notify.notify_one();
    }

    pub fn set_write_mode(&self, mode: WriteMode) {
        *self.write_mode.lock().unwrap() = mode;
        self.writable_notify.notify_one();
    }
}

#[async_trait]
impl ConnIo for StubIo {
    fn transport(&self) -> Transport {
        self.transport
    }

    fn try_send(&self, buf: &[u8]) -> Result<usize, IoFault> {
        let mut mode = self.write_mode.lock().unwrap();
        match *mode {
            WriteMode::Normal => {
                self.sent.lock().unwrap().push(buf.to_vec());
                Ok(buf.len())
            }
            WriteMode::Block => Err(IoFault::WouldBlock),
            WriteMode::Partial(n) => {
                let take = n.min(buf.len());
                self.sent.lock().unwrap().push(buf[..take].to_vec());
                *mode = WriteMode::Block;
                Ok(take)
            }
            WriteMode::Reset => Err(IoFault::Reset),
        }
    }

    fn try_recv(&self, buf: &mut [u8]) -> Result<usize, IoFault> {
        match self.inbound.lock().unwrap().pop_front() {
            Some(data) => {
                let take = data.len().min(buf.len());
                buf[..take].copy_from_slice(&data[..take]);
                Ok(take)
            }
            None => Err(IoFault::WouldBlock),
        }
    }

    async fn readable(&self) -> io::Result<()> {
        loop {
            if !self.inbound.lock().unwrap().is_empty() {
                return Ok(());
            }
            self.inbound_notify.notified().await;
        }
    }

    async fn writable(&self) -> io::Result<()> {
        loop {
            if *self.write_mode.lock().unwrap() == WriteMode::Normal {
                return Ok(());
            }
            self.writable_notify.notified().await;
        }
    }

    fn peer_name(&self) -> String {
        "stub".to_string()
    }
}

struct ConnectorInner {
    transport: Transport,
    ios: Mutex<Vec<Arc<StubIo>>>,
    connects: AtomicUsize,
    failures_remaining: AtomicUsize,
}

/// Hands a fresh [`StubIo`] to the trunk per connection attempt and keeps
/// them all reachable for the test.
#[derive(Clone)]
pub struct StubConnector {
    inner: Arc<ConnectorInner>,
}

impl StubConnector {
    pub fn new(transport: Transport) -> Self {
        Self {
            inner: Arc::new(ConnectorInner {
                transport,
                ios: Mutex::new(Vec::new()),
                connects: AtomicUsize::new(0),
                failures_remaining: AtomicUsize::new(0),
            }),
        }
    }

    /// Refuse the next `n` connection attempts.
    pub fn fail_next_connects(&self, n: usize) {
        self.inner.failures_remaining.store(n, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// The socket behind connection attempt `n` (0-based).
    pub fn io(&self, n: usize) -> Arc<StubIo> {
        self.inner.ios.lock().unwrap()[n].clone()
    }

    pub fn io_count(&self) -> usize {
        self.inner.ios.lock().unwrap().len()
    }

    /// The most recently opened socket.
    pub fn latest(&self) -> Arc<StubIo> {
        self.inner
            .ios
            .lock()
            .unwrap()
            .last()
            .expect("no connection opened yet")
            .clone()
    }
}

#[async_trait]
impl Connector for StubConnector {
    fn transport(&self) -> Transport {
        self.inner.transport
    }

    async fn connect(&self) -> io::Result<Arc<dyn ConnIo>> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        let failures = &self.inner.failures_remaining;
        if failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        }
        let io = Arc::new(StubIo::new(self.inner.transport));
        self.inner.ios.lock().unwrap().push(io.clone());
        Ok(io as Arc<dyn ConnIo>)
    }
}

/// Header fields of a packet the trunk sent.
pub struct SentPacket {
    pub code: PacketCode,
    pub id: u8,
    pub authenticator: [u8; 16],
}

pub fn parse_sent(data: &[u8]) -> SentPacket {
    assert!(data.len() >= 20, "sent packet shorter than a RADIUS header");
    let mut authenticator = [0u8; 16];
    authenticator.copy_from_slice(&data[4..20]);
    SentPacket {
        code: PacketCode::from_u8(data[0]).expect("trunk sent an unknown code"),
        id: data[1],
        authenticator,
    }
}

/// Forge a signed reply to a packet the trunk sent.
pub fn forge_reply(
    sent: &[u8],
    code: PacketCode,
    pairs: &[Pair],
    message_authenticator: bool,
) -> Vec<u8> {
    let parsed = parse_sent(sent);
    radproto::packet::encode_reply(
        SECRET,
        code,
        parsed.id,
        &parsed.authenticator,
        pairs,
        message_authenticator,
    )
    .to_vec()
}

/// Spin (in paused time) until the stub has seen `count` writes.
pub async fn wait_for_sends(io: &StubIo, count: usize) {
    for _ in 0..20_000 {
        if io.sent_count() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "gave up waiting for {count} sends, saw {}",
        io.sent_count()
    );
}

/// Spin until the connector has opened `count` sockets.
pub async fn wait_for_connects(connector: &StubConnector, count: usize) {
    for _ in 0..20_000 {
        if connector.io_count() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("gave up waiting for {count} connects");
}

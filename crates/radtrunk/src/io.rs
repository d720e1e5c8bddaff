//! Socket capability traits and the readiness pumps.
//!
//! All trunk state lives in one task; sockets are driven with the manual
//! readiness API (`readable()`/`try_recv`, `writable()`/`try_send`). The
//! pumps spawned here do nothing but wait for readiness and forward a
//! notification to the trunk task, then park until the trunk has drained the
//! socket and rearms them. Tests swap [`ConnIo`]/[`Connector`] for in-memory
//! fakes and drive the trunk without touching the network.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;

use crate::connection::ConnId;

/// Whether the socket preserves datagram boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Datagram,
    Stream,
}

/// I/O error classes the trunk reacts to distinctly.
#[derive(Debug, thiserror::Error)]
pub enum IoFault {
    #[error("operation would block")]
    WouldBlock,
    #[error("interrupted")]
    Interrupted,
    #[error("no buffer space")]
    NoBuffers,
    #[error("datagram exceeds the transport maximum")]
    MessageTooBig,
    #[error("connection reset by peer")]
    Reset,
    #[error(transparent)]
    Fatal(io::Error),
}

impl IoFault {
    /// Sort a raw socket error into the classes above.
    pub fn classify(error: io::Error) -> IoFault {
        match error.kind() {
            io::ErrorKind::WouldBlock => IoFault::WouldBlock,
            io::ErrorKind::Interrupted => IoFault::Interrupted,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => IoFault::Reset,
            io::ErrorKind::OutOfMemory => IoFault::NoBuffers,
            _ => match error.raw_os_error() {
                // EMSGSIZE
                Some(90) => IoFault::MessageTooBig,
                // ENOBUFS
                Some(105) => IoFault::NoBuffers,
                _ => IoFault::Fatal(error),
            },
        }
    }
}

/// One connected socket, driven by readiness.
#[async_trait]
pub trait ConnIo: Send + Sync + fmt::Debug {
    fn transport(&self) -> Transport;

    /// Non-blocking send; returns the number of octets accepted.
    fn try_send(&self, buf: &[u8]) -> Result<usize, IoFault>;

    /// Non-blocking receive of one datagram (or stream chunk) into `buf`.
    fn try_recv(&self, buf: &mut [u8]) -> Result<usize, IoFault>;

    /// Resolve when the socket may be readable.
    async fn readable(&self) -> io::Result<()>;

    /// Resolve when the socket may be writable.
    async fn writable(&self) -> io::Result<()>;

    /// Peer description for logs.
    fn peer_name(&self) -> String;
}

/// Opens sockets for the trunk's connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The transport every socket from this connector will use. Decides the
    /// retransmission policy before any socket exists.
    fn transport(&self) -> Transport;

    async fn connect(&self) -> io::Result<Arc<dyn ConnIo>>;
}

/// Connected UDP socket.
#[derive(Debug)]
pub struct UdpIo {
    socket: UdpSocket,
    peer: SocketAddr,
}

#[async_trait]
impl ConnIo for UdpIo {
    fn transport(&self) -> Transport {
        Transport::Datagram
    }

    fn try_send(&self, buf: &[u8]) -> Result<usize, IoFault> {
        self.socket.try_send(buf).map_err(IoFault::classify)
    }

    fn try_recv(&self, buf: &mut [u8]) -> Result<usize, IoFault> {
        self.socket.try_recv(buf).map_err(IoFault::classify)
    }

    async fn readable(&self) -> io::Result<()> {
        self.socket.readable().await
    }

    async fn writable(&self) -> io::Result<()> {
        self.socket.writable().await
    }

    fn peer_name(&self) -> String {
        self.peer.to_string()
    }
}

/// Opens a fresh connected UDP socket per trunk connection.
#[derive(Debug, Clone)]
pub struct UdpConnector {
    pub local: SocketAddr,
    pub peer: SocketAddr,
}

impl UdpConnector {
    pub fn new(peer: SocketAddr) -> Self {
        let local = if peer.is_ipv4() {
            "0.0.0.0:0".parse().expect("fixed address")
        } else {
            "[::]:0".parse().expect("fixed address")
        };
        Self { local, peer }
    }
}

#[async_trait]
impl Connector for UdpConnector {
    fn transport(&self) -> Transport {
        Transport::Datagram
    }

    async fn connect(&self) -> io::Result<Arc<dyn ConnIo>> {
        let socket = UdpSocket::bind(self.local).await?;
        socket.connect(self.peer).await?;
        Ok(Arc::new(UdpIo {
            socket,
            peer: self.peer,
        }))
    }
}

/// Connected TCP stream; RADIUS packets are framed by the header length
/// field.
#[derive(Debug)]
pub struct TcpIo {
    stream: TcpStream,
    peer: SocketAddr,
}

#[async_trait]
impl ConnIo for TcpIo {
    fn transport(&self) -> Transport {
        Transport::Stream
    }

    fn try_send(&self, buf: &[u8]) -> Result<usize, IoFault> {
        self.stream.try_write(buf).map_err(IoFault::classify)
    }

    fn try_recv(&self, buf: &mut [u8]) -> Result<usize, IoFault> {
        self.stream.try_read(buf).map_err(IoFault::classify)
    }

    async fn readable(&self) -> io::Result<()> {
        self.stream.readable().await
    }

    async fn writable(&self) -> io::Result<()> {
        self.stream.writable().await
    }

    fn peer_name(&self) -> String {
        self.peer.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct TcpConnector {
    pub peer: SocketAddr,
}

impl TcpConnector {
    pub fn new(peer: SocketAddr) -> Self {
        Self { peer }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    fn transport(&self) -> Transport {
        Transport::Stream
    }

    async fn connect(&self) -> io::Result<Arc<dyn ConnIo>> {
        let stream = TcpStream::connect(self.peer).await?;
        stream.set_nodelay(true)?;
        Ok(Arc::new(TcpIo {
            stream,
            peer: self.peer,
        }))
    }
}

/// Readiness and lifecycle notifications delivered to the trunk task.
///
/// Every event carries the connection epoch it was generated for; the trunk
/// drops events from before the most recent reconnect.
pub(crate) enum IoEvent {
    Connected {
        conn: ConnId,
        epoch: u64,
        io: Arc<dyn ConnIo>,
    },
    ConnectFailed {
        conn: ConnId,
        epoch: u64,
        error: io::Error,
    },
    Readable {
        conn: ConnId,
        epoch: u64,
    },
    Writable {
        conn: ConnId,
        epoch: u64,
    },
    Failed {
        conn: ConnId,
        epoch: u64,
        error: io::Error,
    },
}

/// Open a socket in the background, reporting the outcome as an event.
pub(crate) fn spawn_connect(
    connector: Arc<dyn Connector>,
    conn: ConnId,
    epoch: u64,
    timeout: Duration,
    events: mpsc::Sender<IoEvent>,
) {
    tokio::spawn(async move {
        let event = match tokio::time::timeout(timeout, connector.connect()).await {
            Ok(Ok(io)) => IoEvent::Connected { conn, epoch, io },
            Ok(Err(error)) => IoEvent::ConnectFailed { conn, epoch, error },
            Err(_) => IoEvent::ConnectFailed {
                conn,
                epoch,
                error: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
            },
        };
        let _ = events.send(event).await;
    });
}

/// Forward read-readiness to the trunk, then park until it rearms us.
///
/// The trunk only rearms after a Readable notification, so while we wait for
/// readiness the rearm channel can only ever report closure - which is how a
/// torn-down connection releases its socket.
pub(crate) fn spawn_read_pump(
    io: Arc<dyn ConnIo>,
    conn: ConnId,
    epoch: u64,
    events: mpsc::Sender<IoEvent>,
    mut rearm: mpsc::Receiver<()>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                result = io.readable() => {
                    if let Err(error) = result {
                        let _ = events.send(IoEvent::Failed { conn, epoch, error }).await;
                        return;
                    }
                }
                _ = rearm.recv() => return,
            }
            if events.send(IoEvent::Readable { conn, epoch }).await.is_err() {
                return;
            }
            if rearm.recv().await.is_none() {
                return;
            }
        }
    });
}

/// Forward write-readiness, but only while the trunk has armed us - the
/// socket is writable almost always, so an unarmed pump stays quiet.
pub(crate) fn spawn_write_pump(
    io: Arc<dyn ConnIo>,
    conn: ConnId,
    epoch: u64,
    events: mpsc::Sender<IoEvent>,
    mut arm: mpsc::Receiver<()>,
) {
    tokio::spawn(async move {
        while arm.recv().await.is_some() {
            tokio::select! {
                result = io.writable() => {
                    if let Err(error) = result {
                        let _ = events.send(IoEvent::Failed { conn, epoch, error }).await;
                        return;
                    }
                }
                // Writes stay suspended while we wait, so this can only be
                // channel closure.
                _ = arm.recv() => return,
            }
            if events.send(IoEvent::Writable { conn, epoch }).await.is_err() {
                return;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_classification() {
        assert!(matches!(
            IoFault::classify(io::Error::from(io::ErrorKind::WouldBlock)),
            IoFault::WouldBlock
        ));
        assert!(matches!(
            IoFault::classify(io::Error::from(io::ErrorKind::Interrupted)),
            IoFault::Interrupted
        ));
        assert!(matches!(
            IoFault::classify(io::Error::from(io::ErrorKind::ConnectionReset)),
            IoFault::Reset
        ));
        assert!(matches!(
            IoFault::classify(io::Error::from_raw_os_error(90)),
            IoFault::MessageTooBig
        ));
        assert!(matches!(
            IoFault::classify(io::Error::from_raw_os_error(105)),
            IoFault::NoBuffers
        ));
        assert!(matches!(
            IoFault::classify(io::Error::new(io::ErrorKind::Other, "boom")),
            IoFault::Fatal(_)
        ));
    }
}

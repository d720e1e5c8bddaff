//! radtrunk - outbound RADIUS client trunk
//!
//! A trunk is a pool of interchangeable client connections to one logical
//! home server, multiplexing many concurrent exchanges over the shared
//! one-octet identifier space of each connection. The trunk owns:
//!
//! - per-request retransmission (RFC 5080 IRT/MRT/MRC/MRD schedules)
//! - per-connection identifier tracking and reply correlation
//! - connection liveness (zombie detection, Status-Server probing, revival)
//! - Protocol-Error negotiation, including Response-Too-Big buffer growth
//! - the BlastRADIUS Message-Authenticator auto-require upgrade
//!
//! Architecture: one task owns all trunk state (connections, backlog, arena
//! of request records, timers). Callers talk to it over a command channel;
//! completions come back over per-exchange oneshots. Sockets are driven by
//! readiness notifications from small pump tasks, so the trunk task is the
//! only place state ever mutates.
//!
//! ```ignore
//! let config = TrunkConfig::new("s3cr3t");
//! let trunk = Trunk::spawn(config, UdpConnector::new(server), RadiusCodec::default());
//!
//! let completion = trunk
//!     .request(PacketCode::AccessRequest, pairs, RequestOptions::default())
//!     .await?;
//! println!("{} -> {:?}", completion.rcode, completion.reply);
//! ```

pub mod codec;
pub mod config;
mod connection;
pub mod error;
pub mod io;
mod mux;
pub mod request;
mod status;
pub mod track;
pub mod trunk;

pub use codec::{Codec, EncodeSpec, RadiusCodec};
pub use config::{
    AllowedCodes, Mode, RequireMessageAuthenticator, RetryTable, StatusCheckConfig, TrunkConfig,
};
pub use error::TrunkError;
pub use io::{ConnIo, Connector, IoFault, TcpConnector, Transport, UdpConnector};
pub use request::{Completion, Rcode, ReqId, Reply, RequestOptions};
pub use track::{IdTracker, NoFreeId, TrackedEntry};
pub use trunk::{Exchange, Trunk};

pub use radproto::{attr, PacketCode, Pair};

//! radproto - RADIUS wire format for the radtrunk outbound client
//!
//! This crate knows how RFC 2865 packets look on the wire and nothing about
//! sockets or scheduling. It provides:
//!
//! - [`PacketCode`] and the request/reply code relationships
//! - [`Pair`] - opaque (type, value) attributes; no dictionary, no value parsing
//! - [`encode`]/[`decode`] - build, sign, verify and unpack packets
//! - [`retry`] - the RFC 5080 retransmission clock (pure, no I/O)
//!
//! ## Packet layout
//!
//! ```text
//! 0                   1                   2                   3
//! 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Code      |  Identifier   |            Length             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                                                               |
//! |                         Authenticator                         |
//! |                                                               |
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Attributes ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-
//! ```

pub mod code;
pub mod packet;
pub mod pair;
pub mod retry;

pub use code::PacketCode;
pub use packet::{
    decode, encode, Decoded, DecodeFail, Encoded, EncodeError, ProtocolErrorInfo,
};
pub use pair::{attr, Pair};

/// Fixed RADIUS header: code + id + length + authenticator.
pub const HEADER_LENGTH: usize = 20;

/// Offset of the 16-byte Authenticator field within the header.
pub const AUTH_VECTOR_OFFSET: usize = 4;

/// Length of the Authenticator field and of all MD5-derived signatures.
pub const AUTH_VECTOR_LENGTH: usize = 16;

/// Hard ceiling on any RADIUS packet (the length field is 16 bits).
pub const MAX_PACKET_LENGTH: usize = 65535;

/// On-the-wire size of a Message-Authenticator attribute: type + length + MAC.
pub const MESSAGE_AUTHENTICATOR_LENGTH: usize = 18;

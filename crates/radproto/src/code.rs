//! RADIUS packet codes and the request/reply relationships between them.

/// RADIUS packet code (first octet of the header).
///
/// Only the codes this client can send or expect back are represented;
/// anything else on the wire is rejected during decode.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketCode {
    AccessRequest = 1,
    AccessAccept = 2,
    AccessReject = 3,
    AccountingRequest = 4,
    AccountingResponse = 5,
    AccessChallenge = 11,
    StatusServer = 12,
    DisconnectRequest = 40,
    DisconnectAck = 41,
    DisconnectNak = 42,
    CoaRequest = 43,
    CoaAck = 44,
    CoaNak = 45,
    ProtocolError = 52,
}

impl PacketCode {
    /// Parse a wire octet into a code.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(PacketCode::AccessRequest),
            2 => Some(PacketCode::AccessAccept),
            3 => Some(PacketCode::AccessReject),
            4 => Some(PacketCode::AccountingRequest),
            5 => Some(PacketCode::AccountingResponse),
            11 => Some(PacketCode::AccessChallenge),
            12 => Some(PacketCode::StatusServer),
            40 => Some(PacketCode::DisconnectRequest),
            41 => Some(PacketCode::DisconnectAck),
            42 => Some(PacketCode::DisconnectNak),
            43 => Some(PacketCode::CoaRequest),
            44 => Some(PacketCode::CoaAck),
            45 => Some(PacketCode::CoaNak),
            52 => Some(PacketCode::ProtocolError),
            _ => None,
        }
    }

    /// Convert to the wire octet.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Whether this code names a packet a client may originate.
    pub fn is_request(self) -> bool {
        matches!(
            self,
            PacketCode::AccessRequest
                | PacketCode::AccountingRequest
                | PacketCode::StatusServer
                | PacketCode::DisconnectRequest
                | PacketCode::CoaRequest
        )
    }

    /// Whether `reply` is a legal response to a request of this code.
    ///
    /// Protocol-Error is a legal reply to anything. Status-Server probes
    /// accept any reply code at all - the probe only measures liveness, and a
    /// correctly signed packet of any shape proves the peer is alive.
    pub fn allows_reply(self, reply: PacketCode) -> bool {
        if reply == PacketCode::ProtocolError {
            return true;
        }
        match self {
            PacketCode::AccessRequest => matches!(
                reply,
                PacketCode::AccessAccept | PacketCode::AccessReject | PacketCode::AccessChallenge
            ),
            PacketCode::AccountingRequest => reply == PacketCode::AccountingResponse,
            PacketCode::StatusServer => true,
            PacketCode::DisconnectRequest => {
                matches!(reply, PacketCode::DisconnectAck | PacketCode::DisconnectNak)
            }
            PacketCode::CoaRequest => matches!(reply, PacketCode::CoaAck | PacketCode::CoaNak),
            _ => false,
        }
    }

    /// Human name, matching the RFC spelling.
    pub fn name(self) -> &'static str {
        match self {
            PacketCode::AccessRequest => "Access-Request",
            PacketCode::AccessAccept => "Access-Accept",
            PacketCode::AccessReject => "Access-Reject",
            PacketCode::AccountingRequest => "Accounting-Request",
            PacketCode::AccountingResponse => "Accounting-Response",
            PacketCode::AccessChallenge => "Access-Challenge",
            PacketCode::StatusServer => "Status-Server",
            PacketCode::DisconnectRequest => "Disconnect-Request",
            PacketCode::DisconnectAck => "Disconnect-ACK",
            PacketCode::DisconnectNak => "Disconnect-NAK",
            PacketCode::CoaRequest => "CoA-Request",
            PacketCode::CoaAck => "CoA-ACK",
            PacketCode::CoaNak => "CoA-NAK",
            PacketCode::ProtocolError => "Protocol-Error",
        }
    }

    /// The request authenticator for these codes is 16 random octets; for
    /// every other request it is an MD5 hash over the packet.
    pub(crate) fn random_authenticator(self) -> bool {
        matches!(self, PacketCode::AccessRequest | PacketCode::StatusServer)
    }
}

impl std::fmt::Display for PacketCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

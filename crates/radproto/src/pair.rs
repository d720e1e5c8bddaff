//! Opaque attribute pairs.
//!
//! The trunk never interprets attribute values - dictionaries and value
//! parsing live in the layer above. A [`Pair`] is just the attribute number
//! and the raw value octets, exactly as they appear between the length octet
//! and the next attribute.

use bytes::Bytes;

/// Attribute numbers the trunk itself has to recognise.
///
/// Everything else passes through untouched.
pub mod attr {
    /// Synthetic packet-type marker, carrying a reply's code as a 32-bit
    /// integer. Zero is not a valid wire attribute (decode rejects it and
    /// encode skips it), so it can never collide with anything a server
    /// sends; it exists for callers that read only the pair list.
    pub const PACKET_TYPE: u8 = 0;
    /// RFC 2865 User-Name.
    pub const USER_NAME: u8 = 1;
    /// RFC 2865 User-Password. Filtered out of non-Access status probes.
    pub const USER_PASSWORD: u8 = 2;
    /// RFC 2865 NAS-Identifier.
    pub const NAS_IDENTIFIER: u8 = 32;
    /// RFC 2865 Proxy-State. Appended before signing, stripped from replies.
    pub const PROXY_STATE: u8 = 33;
    /// RFC 2869 Event-Timestamp.
    pub const EVENT_TIMESTAMP: u8 = 55;
    /// RFC 3579 Message-Authenticator.
    pub const MESSAGE_AUTHENTICATOR: u8 = 80;
    /// RFC 5176 Error-Cause.
    pub const ERROR_CAUSE: u8 = 101;
    /// RFC 6613 Response-Length.
    pub const RESPONSE_LENGTH: u8 = 165;
    /// RFC 6929 Extended-Attribute-1, carrier for Original-Packet-Code.
    pub const EXTENDED_ATTRIBUTE_1: u8 = 241;
    /// RFC 7930 Original-Packet-Code, as an extension of Extended-Attribute-1.
    pub const EXT_ORIGINAL_PACKET_CODE: u8 = 25;

    /// RFC 7930 Error-Cause value for "Response Too Big".
    pub const ERROR_CAUSE_RESPONSE_TOO_BIG: u32 = 601;
}

/// One RADIUS attribute: number plus raw value octets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair {
    pub attr: u8,
    pub value: Bytes,
}

impl Pair {
    /// Longest value that fits in the one-octet attribute length.
    pub const MAX_VALUE_LENGTH: usize = 253;

    pub fn new(attr: u8, value: impl Into<Bytes>) -> Self {
        Self {
            attr,
            value: value.into(),
        }
    }

    /// A text-valued pair, e.g. User-Name or NAS-Identifier.
    pub fn string(attr: u8, value: &str) -> Self {
        Self::new(attr, Bytes::copy_from_slice(value.as_bytes()))
    }

    /// A 32-bit integer pair, big-endian as RADIUS integers always are.
    pub fn u32(attr: u8, value: u32) -> Self {
        Self::new(attr, Bytes::copy_from_slice(&value.to_be_bytes()))
    }

    /// Read the value back as a big-endian u32, if it is exactly four octets.
    pub fn as_u32(&self) -> Option<u32> {
        let octets: [u8; 4] = self.value.as_ref().try_into().ok()?;
        Some(u32::from_be_bytes(octets))
    }

    /// Wire size of this pair: type octet + length octet + value.
    pub fn wire_length(&self) -> usize {
        2 + self.value.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u32_pair_roundtrip() {
        let pair = Pair::u32(attr::ERROR_CAUSE, 601);
        assert_eq!(pair.value.as_ref(), &[0, 0, 2, 89]);
        assert_eq!(pair.as_u32(), Some(601));
        assert_eq!(pair.wire_length(), 6);
    }

    #[test]
    fn as_u32_rejects_wrong_width() {
        assert_eq!(Pair::string(attr::USER_NAME, "bob").as_u32(), None);
        assert_eq!(Pair::new(attr::USER_NAME, vec![1u8, 2]).as_u32(), None);
    }
}

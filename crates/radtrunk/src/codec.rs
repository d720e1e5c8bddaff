//! The codec seam between the trunk and the wire format.
//!
//! The trunk never touches packet bytes itself; it hands a request view to a
//! [`Codec`] and gets signed bytes back, or hands reply bytes over and gets
//! verified pairs back. Tests substitute their own codec to inject failures
//! without forging MD5 collisions.

use radproto::{Decoded, DecodeFail, Encoded, EncodeError, PacketCode, Pair};

/// Everything the codec needs to build one outbound packet.
#[derive(Debug)]
pub struct EncodeSpec<'a> {
    pub code: PacketCode,
    pub id: u8,
    pub pairs: &'a [Pair],
    /// Process cookie to append as Proxy-State, for proxied requests.
    pub proxy_state: Option<&'a [u8]>,
    /// Emit a Message-Authenticator even where the code doesn't demand one.
    pub message_authenticator: bool,
    pub max_packet_len: usize,
}

pub trait Codec: Send + 'static {
    /// Encode and sign a request. The returned authenticator is what replies
    /// will be verified against.
    fn encode(&self, secret: &[u8], spec: &EncodeSpec<'_>) -> Result<Encoded, EncodeError>;

    /// Verify and unpack a reply to `request_code`, correlated by the stored
    /// `request_authenticator`. Must reject codes outside the request's reply
    /// set and, when `require_message_authenticator` is set, replies without
    /// a Message-Authenticator.
    fn decode(
        &self,
        secret: &[u8],
        request_code: PacketCode,
        request_authenticator: &[u8; 16],
        require_message_authenticator: bool,
        data: &[u8],
    ) -> Result<Decoded, DecodeFail>;
}

/// The real RFC 2865 codec.
#[derive(Debug, Clone)]
pub struct RadiusCodec {
    pub max_attributes: usize,
}

impl RadiusCodec {
    pub fn new(max_attributes: usize) -> Self {
        Self { max_attributes }
    }
}

impl Default for RadiusCodec {
    fn default() -> Self {
        Self { max_attributes: 255 }
    }
}

impl Codec for RadiusCodec {
    fn encode(&self, secret: &[u8], spec: &EncodeSpec<'_>) -> Result<Encoded, EncodeError> {
        radproto::encode(
            secret,
            spec.code,
            spec.id,
            spec.pairs,
            spec.proxy_state,
            spec.message_authenticator,
            spec.max_packet_len,
        )
    }

    fn decode(
        &self,
        secret: &[u8],
        request_code: PacketCode,
        request_authenticator: &[u8; 16],
        require_message_authenticator: bool,
        data: &[u8],
    ) -> Result<Decoded, DecodeFail> {
        radproto::decode(
            secret,
            request_code,
            request_authenticator,
            require_message_authenticator,
            self.max_attributes,
            data,
        )
    }
}

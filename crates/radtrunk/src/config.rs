//! Trunk configuration.
//!
//! Per-packet-code tables are kept dense (256 entries, indexed by the wire
//! code) - lookups happen on every send and the tables are small enough to
//! stay cache-resident.

use std::time::Duration;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use radproto::retry::RetryConfig;
use radproto::{PacketCode, Pair};

/// How the trunk relates to the upper layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// We originate packets and own the retransmission schedule.
    #[default]
    Client,
    /// We relay packets for a NAS that retransmits on its own; one final
    /// timeout per request, retransmission only on Dup signals.
    Proxy,
    /// Fire-and-forget fan-out: a request completes as soon as it is written,
    /// and replies are discarded.
    Replicate,
}

/// Message-Authenticator policy for replies (BlastRADIUS mitigation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequireMessageAuthenticator {
    No,
    Yes,
    /// Start permissive; the first valid reply that carries a
    /// Message-Authenticator flips the trunk to requiring one, permanently.
    #[default]
    Auto,
}

/// Status-check probing.
#[derive(Debug, Clone)]
pub struct StatusCheckConfig {
    /// Packet code for the probe. Status-Server unless the home server
    /// predates RFC 5997.
    pub code: PacketCode,
    /// Template attributes for the probe. Proxy-State and
    /// Message-Authenticator entries are ignored, and User-Password is
    /// ignored unless the probe is an Access-Request.
    pub template: Vec<Pair>,
    /// Consecutive probe replies needed to declare a zombie connection alive
    /// again.
    pub num_answers_to_alive: u32,
}

impl Default for StatusCheckConfig {
    fn default() -> Self {
        Self {
            code: PacketCode::StatusServer,
            template: Vec::new(),
            num_answers_to_alive: 3,
        }
    }
}

/// Dense retry table, one entry per packet code.
#[derive(Clone)]
pub struct RetryTable([RetryConfig; 256]);

impl RetryTable {
    pub fn get(&self, code: PacketCode) -> RetryConfig {
        self.0[code.to_u8() as usize]
    }

    pub fn set(&mut self, code: PacketCode, config: RetryConfig) {
        self.0[code.to_u8() as usize] = config;
    }
}

impl Default for RetryTable {
    fn default() -> Self {
        Self([RetryConfig::default(); 256])
    }
}

impl std::fmt::Debug for RetryTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RetryTable(..)")
    }
}

/// Dense allowed-code table.
#[derive(Clone)]
pub struct AllowedCodes([bool; 256]);

impl AllowedCodes {
    pub fn none() -> Self {
        Self([false; 256])
    }

    pub fn contains(&self, code: PacketCode) -> bool {
        self.0[code.to_u8() as usize]
    }

    pub fn allow(&mut self, code: PacketCode) -> &mut Self {
        self.0[code.to_u8() as usize] = true;
        self
    }

    pub fn deny(&mut self, code: PacketCode) -> &mut Self {
        self.0[code.to_u8() as usize] = false;
        self
    }
}

impl Default for AllowedCodes {
    /// The four request codes a caller may send. Status-Server stays out; it
    /// is internal to liveness probing.
    fn default() -> Self {
        let mut allowed = Self::none();
        allowed
            .allow(PacketCode::AccessRequest)
            .allow(PacketCode::AccountingRequest)
            .allow(PacketCode::DisconnectRequest)
            .allow(PacketCode::CoaRequest);
        allowed
    }
}

impl std::fmt::Debug for AllowedCodes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AllowedCodes(..)")
    }
}

/// Everything a trunk needs to know. Built with [`TrunkConfig::new`] and the
/// `with_*` methods.
#[derive(Debug, Clone)]
pub struct TrunkConfig {
    /// Shared secret with the home server.
    pub secret: Vec<u8>,
    pub mode: Mode,
    /// Pool size.
    pub connections: usize,
    /// Requests that may wait in the backlog before enqueue starts refusing.
    pub max_backlog: usize,
    pub allowed: AllowedCodes,
    /// Retransmission parameters per packet code (Client mode over UDP).
    pub retry: RetryTable,
    /// The single-attempt schedule used for proxied and replicated packets,
    /// and for everything on stream transports.
    pub timeout_retry: RetryConfig,
    /// How long a connection may go without any reply, while packets are
    /// outstanding, before it is declared zombie.
    pub response_window: Duration,
    /// How long a zombie connection without status checks waits before being
    /// declared dead.
    pub zombie_period: Duration,
    /// How long a dead connection waits before reconnecting.
    pub revive_interval: Duration,
    /// Time limit on socket setup.
    pub connect_timeout: Duration,
    pub status_check: Option<StatusCheckConfig>,
    /// Receive buffer and encode ceiling; clamped to 64..=65535.
    pub max_packet_size: usize,
    /// Ceiling on attributes in a reply.
    pub max_attributes: usize,
    pub require_message_authenticator: RequireMessageAuthenticator,
    /// Opaque cookie appended as Proxy-State to proxied Access-Requests, so
    /// replies can be tied back to this process. Random per process.
    pub proxy_state: [u8; 4],
}

impl TrunkConfig {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        let mut proxy_state = [0u8; 4];
        rand::rng().fill_bytes(&mut proxy_state);

        Self {
            secret: secret.into(),
            mode: Mode::default(),
            connections: 1,
            max_backlog: 256,
            allowed: AllowedCodes::default(),
            retry: RetryTable::default(),
            timeout_retry: RetryConfig::timeout_only(Duration::from_secs(10)),
            response_window: Duration::from_secs(10),
            zombie_period: Duration::from_secs(40),
            revive_interval: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(3),
            status_check: None,
            max_packet_size: 4096,
            max_attributes: 255,
            require_message_authenticator: RequireMessageAuthenticator::default(),
            proxy_state,
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_connections(mut self, connections: usize) -> Self {
        self.connections = connections.max(1);
        self
    }

    pub fn with_retry(mut self, code: PacketCode, config: RetryConfig) -> Self {
        self.retry.set(code, config);
        self
    }

    pub fn with_response_window(mut self, window: Duration) -> Self {
        self.response_window = window;
        self
    }

    pub fn with_zombie_period(mut self, period: Duration) -> Self {
        self.zombie_period = period;
        self
    }

    pub fn with_revive_interval(mut self, interval: Duration) -> Self {
        self.revive_interval = interval;
        self
    }

    pub fn with_status_check(mut self, status_check: StatusCheckConfig) -> Self {
        self.status_check = Some(status_check);
        self
    }

    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    pub fn with_require_message_authenticator(
        mut self,
        require: RequireMessageAuthenticator,
    ) -> Self {
        self.require_message_authenticator = require;
        self
    }

    /// `max_packet_size` with the wire bounds applied.
    pub(crate) fn clamped_max_packet_size(&self) -> usize {
        self.max_packet_size.clamp(64, radproto::MAX_PACKET_LENGTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allowed_codes() {
        let allowed = AllowedCodes::default();
        assert!(allowed.contains(PacketCode::AccessRequest));
        assert!(allowed.contains(PacketCode::AccountingRequest));
        assert!(allowed.contains(PacketCode::CoaRequest));
        assert!(allowed.contains(PacketCode::DisconnectRequest));
        assert!(!allowed.contains(PacketCode::StatusServer));
        assert!(!allowed.contains(PacketCode::AccessAccept));
    }

    #[test]
    fn packet_size_clamped() {
        let config = TrunkConfig::new("secret").with_max_packet_size(10);
        assert_eq!(config.clamped_max_packet_size(), 64);
        let config = TrunkConfig::new("secret").with_max_packet_size(1 << 20);
        assert_eq!(config.clamped_max_packet_size(), 65535);
    }

    #[test]
    fn retry_table_per_code() {
        let quick = RetryConfig::new(
            Duration::from_secs(1),
            Duration::from_secs(2),
            2,
            Duration::from_secs(5),
        );
        let config = TrunkConfig::new("secret").with_retry(PacketCode::AccountingRequest, quick);
        assert_eq!(config.retry.get(PacketCode::AccountingRequest), quick);
        assert_eq!(
            config.retry.get(PacketCode::AccessRequest),
            RetryConfig::default()
        );
    }
}

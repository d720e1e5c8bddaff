//! Status-check probes.
//!
//! A probe is not a user request: it is built from a configured template,
//! lives on its connection, never enters the backlog, and is never freed
//! through the request path. Its identifier rotates on every transmission -
//! a probe reply must match the latest probe, nothing older.

use std::time::SystemTime;

use tracing::debug;

use radproto::pair::attr;
use radproto::retry::{RetryConfig, RetryState};
use radproto::{Encoded, PacketCode, Pair};

use crate::config::StatusCheckConfig;
use crate::track::IdTracker;

pub(crate) struct StatusCheck {
    pub code: PacketCode,
    /// Sanitized template; an Event-Timestamp is guaranteed present and is
    /// refreshed at every encode.
    template: Vec<Pair>,
    pub num_answers_to_alive: u32,
    pub retry_config: RetryConfig,

    /// A probe round is in progress (the connection is being health-checked).
    pub probing: bool,
    /// The probe wants the next writable slot on the connection.
    pub want_send: bool,
    pub retry: Option<RetryState>,
    pub assigned_id: Option<u8>,
    pub encoded: Option<Encoded>,
    /// Octets of the current probe already written (stream transports).
    pub partial: usize,
    /// Consecutive replies in this round.
    pub num_replies: u32,
    /// Whether any probe reply arrived since the last timer fire; a silent
    /// interval resets the consecutive count.
    pub replied_since_fire: bool,
}

impl StatusCheck {
    /// Build the per-connection probe from the configured template.
    ///
    /// Signalling attributes are dropped: Proxy-State and
    /// Message-Authenticator are the codec's business, and a User-Password
    /// outside an Access-Request would be garbage on the wire. A
    /// NAS-Identifier is supplied when the template has none, so the probe is
    /// recognisable in the home server's logs.
    pub fn build(config: &StatusCheckConfig, retry_config: RetryConfig) -> Self {
        let mut template: Vec<Pair> = config
            .template
            .iter()
            .filter(|pair| {
                pair.attr != attr::PROXY_STATE
                    && pair.attr != attr::MESSAGE_AUTHENTICATOR
                    && (pair.attr != attr::USER_PASSWORD
                        || config.code == PacketCode::AccessRequest)
            })
            .cloned()
            .collect();

        if !template.iter().any(|pair| pair.attr == attr::NAS_IDENTIFIER) {
            template.push(Pair::string(
                attr::NAS_IDENTIFIER,
                "status check - are you alive?",
            ));
        }
        if !template.iter().any(|pair| pair.attr == attr::EVENT_TIMESTAMP) {
            template.push(Pair::u32(attr::EVENT_TIMESTAMP, 0));
        }

        Self {
            code: config.code,
            template,
            num_answers_to_alive: config.num_answers_to_alive.max(1),
            retry_config,
            probing: false,
            want_send: false,
            retry: None,
            assigned_id: None,
            encoded: None,
            partial: 0,
            num_replies: 0,
            replied_since_fire: false,
        }
    }

    /// Start a probe round.
    pub fn begin(&mut self) {
        debug_assert!(!self.probing);
        self.probing = true;
        self.want_send = true;
        self.retry = None;
        self.encoded = None;
        self.partial = 0;
        self.num_replies = 0;
        self.replied_since_fire = false;
    }

    /// Tear down the round, releasing the tracker slot. Idempotent.
    pub fn reset(&mut self, tracker: &mut IdTracker) {
        if let Some(id) = self.assigned_id.take() {
            tracker.release(id);
        }
        if self.probing {
            debug!(code = %self.code, "status check round finished");
        }
        self.probing = false;
        self.want_send = false;
        self.retry = None;
        self.encoded = None;
        self.partial = 0;
        self.num_replies = 0;
        self.replied_since_fire = false;
    }

    /// Drop the current encode so the next transmission gets a fresh
    /// identifier and authenticator.
    pub fn rotate(&mut self, tracker: &mut IdTracker) {
        if let Some(id) = self.assigned_id.take() {
            tracker.release(id);
        }
        self.encoded = None;
        self.partial = 0;
        self.want_send = true;
    }

    /// Template with the Event-Timestamp refreshed to now.
    pub fn pairs_for_encode(&self) -> Vec<Pair> {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as u32)
            .unwrap_or(0);

        self.template
            .iter()
            .map(|pair| {
                if pair.attr == attr::EVENT_TIMESTAMP {
                    Pair::u32(attr::EVENT_TIMESTAMP, now)
                } else {
                    pair.clone()
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ReqId;

    fn config(code: PacketCode, template: Vec<Pair>) -> StatusCheckConfig {
        StatusCheckConfig {
            code,
            template,
            num_answers_to_alive: 2,
        }
    }

    #[test]
    fn template_sanitised() {
        let template = vec![
            Pair::string(attr::USER_NAME, "probe"),
            Pair::string(attr::USER_PASSWORD, "hunter2"),
            Pair::new(attr::PROXY_STATE, vec![1, 2, 3]),
            Pair::new(attr::MESSAGE_AUTHENTICATOR, vec![0; 16]),
        ];
        let status = StatusCheck::build(
            &config(PacketCode::StatusServer, template),
            RetryConfig::default(),
        );

        let pairs = status.pairs_for_encode();
        assert!(pairs.iter().any(|p| p.attr == attr::USER_NAME));
        // Passwords only belong in Access-Request probes.
        assert!(!pairs.iter().any(|p| p.attr == attr::USER_PASSWORD));
        assert!(!pairs.iter().any(|p| p.attr == attr::PROXY_STATE));
        assert!(!pairs.iter().any(|p| p.attr == attr::MESSAGE_AUTHENTICATOR));
        // Both fallback attributes appear.
        assert!(pairs.iter().any(|p| p.attr == attr::NAS_IDENTIFIER));
        assert!(pairs.iter().any(|p| p.attr == attr::EVENT_TIMESTAMP));
    }

    #[test]
    fn access_request_probe_keeps_password() {
        let template = vec![
            Pair::string(attr::USER_NAME, "probe"),
            Pair::string(attr::USER_PASSWORD, "hunter2"),
        ];
        let status = StatusCheck::build(
            &config(PacketCode::AccessRequest, template),
            RetryConfig::default(),
        );
        assert!(status
            .pairs_for_encode()
            .iter()
            .any(|p| p.attr == attr::USER_PASSWORD));
    }

    #[test]
    fn existing_nas_identifier_kept() {
        let template = vec![Pair::string(attr::NAS_IDENTIFIER, "my-probe")];
        let status = StatusCheck::build(
            &config(PacketCode::StatusServer, template),
            RetryConfig::default(),
        );
        let names: Vec<_> = status
            .pairs_for_encode()
            .into_iter()
            .filter(|p| p.attr == attr::NAS_IDENTIFIER)
            .collect();
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].value.as_ref(), b"my-probe");
    }

    #[test]
    fn rotation_releases_the_identifier() {
        let mut status = StatusCheck::build(
            &config(PacketCode::StatusServer, Vec::new()),
            RetryConfig::default(),
        );
        let mut tracker = IdTracker::new();

        status.begin();
        let id = tracker.reserve(ReqId::STATUS_CHECK).unwrap();
        status.assigned_id = Some(id);

        status.rotate(&mut tracker);
        assert!(tracker.find(id).is_none());
        assert!(status.want_send);
        assert!(status.encoded.is_none());

        let next = tracker.reserve(ReqId::STATUS_CHECK).unwrap();
        assert_ne!(next, id);
        status.assigned_id = Some(next);

        status.reset(&mut tracker);
        assert_eq!(tracker.in_use(), 0);
        assert!(!status.probing);
    }
}

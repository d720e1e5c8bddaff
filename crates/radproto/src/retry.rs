//! RFC 5080 retransmission timing.
//!
//! Pure bookkeeping: callers pass `now` in and get the next fire time back.
//! Nothing here sleeps, arms timers, or reads a clock.

use std::time::{Duration, Instant};

use rand::Rng;

/// Retransmission parameters for one packet code.
///
/// A zero `mrt` leaves the doubling uncapped; a zero `mrc` or `mrd` disables
/// that limit entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Initial retransmission time.
    pub irt: Duration,
    /// Maximum retransmission time - cap on the doubling.
    pub mrt: Duration,
    /// Maximum retransmission count.
    pub mrc: u32,
    /// Maximum retransmission duration, measured from the first send.
    pub mrd: Duration,
}

impl RetryConfig {
    pub const fn new(irt: Duration, mrt: Duration, mrc: u32, mrd: Duration) -> Self {
        Self { irt, mrt, mrc, mrd }
    }

    /// A single attempt with a final timeout and no retransmission. Used for
    /// proxied packets (the NAS retransmits, not us) and for replication.
    pub const fn timeout_only(timeout: Duration) -> Self {
        Self {
            irt: timeout,
            mrt: Duration::ZERO,
            mrc: 1,
            mrd: Duration::ZERO,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            irt: Duration::from_secs(2),
            mrt: Duration::from_secs(16),
            mrc: 5,
            mrd: Duration::from_secs(30),
        }
    }
}

/// Outcome of asking the clock what to do at a timer fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryVerdict {
    /// Retransmit now; the next fire time is attached.
    Continue(Instant),
    /// The next attempt would exceed `mrc`.
    CountExhausted,
    /// `mrd` has elapsed since the first send.
    DurationExhausted,
}

/// Live retransmission state for one in-flight packet.
///
/// Invariants: `start <= updated <= next`, and `count >= 1` from the moment
/// the state exists (the first transmission is attempt one).
#[derive(Debug, Clone)]
pub struct RetryState {
    pub config: RetryConfig,
    /// When the first transmission happened.
    pub start: Instant,
    /// When the clock last advanced.
    pub updated: Instant,
    /// When the next retransmission (or final verdict) is due.
    pub next: Instant,
    /// Current retransmission interval, jittered.
    pub rt: Duration,
    /// Transmissions so far.
    pub count: u32,
}

impl RetryState {
    /// Start the clock at the first transmission.
    pub fn new(config: RetryConfig, now: Instant) -> Self {
        let rt = jitter(config.irt);
        Self {
            config,
            start: now,
            updated: now,
            next: now + rt,
            rt,
            count: 1,
        }
    }

    /// Advance the clock at a timer fire.
    ///
    /// `rt` doubles per attempt, capped at `mrt`, with +/-10% jitter so a
    /// fleet of clients doesn't synchronise its retransmissions.
    pub fn next(&mut self, now: Instant) -> RetryVerdict {
        if !self.config.mrd.is_zero()
            && now.saturating_duration_since(self.start) >= self.config.mrd
        {
            return RetryVerdict::DurationExhausted;
        }
        if self.config.mrc != 0 && self.count >= self.config.mrc {
            return RetryVerdict::CountExhausted;
        }

        self.count += 1;
        self.updated = now;

        let mut rt = self.rt.saturating_mul(2);
        if !self.config.mrt.is_zero() && rt > self.config.mrt {
            rt = self.config.mrt;
        }
        self.rt = jitter(rt);
        self.next = now + self.rt;
        RetryVerdict::Continue(self.next)
    }
}

fn jitter(base: Duration) -> Duration {
    base.mul_f64(rand::rng().random_range(0.9..=1.1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn within_jitter(actual: Duration, nominal: Duration) -> bool {
        actual >= nominal.mul_f64(0.9) && actual <= nominal.mul_f64(1.1)
    }

    #[test]
    fn first_fire_near_irt() {
        let now = Instant::now();
        let state = RetryState::new(RetryConfig::default(), now);
        assert_eq!(state.count, 1);
        assert!(within_jitter(state.next - now, Duration::from_secs(2)));
        assert!(state.start <= state.updated && state.updated <= state.next);
    }

    #[test]
    fn doubling_capped_at_mrt() {
        let config = RetryConfig::new(
            Duration::from_secs(1),
            Duration::from_secs(4),
            0,
            Duration::ZERO,
        );
        let now = Instant::now();
        let mut state = RetryState::new(config, now);
        assert!(within_jitter(state.rt, Duration::from_secs(1)));

        let mut at = state.next;
        match state.next(at) {
            RetryVerdict::Continue(_) => {}
            other => panic!("expected Continue, got {other:?}"),
        }
        // Doubled from a jittered ~1s; never past 1.1 * 2.2.
        assert!(state.rt <= Duration::from_secs(4).mul_f64(1.1));

        // A few more doublings pin rt to the jittered cap.
        for _ in 0..5 {
            at = state.next;
            assert!(matches!(state.next(at), RetryVerdict::Continue(_)));
        }
        assert!(within_jitter(state.rt, Duration::from_secs(4)));
    }

    #[test]
    fn count_exhaustion_after_mrc_sends() {
        let config = RetryConfig::new(
            Duration::from_secs(1),
            Duration::from_secs(4),
            3,
            Duration::from_secs(3600),
        );
        let now = Instant::now();
        let mut state = RetryState::new(config, now);

        // Transmissions 2 and 3 are allowed, then the count is exhausted.
        assert!(matches!(state.next(state.next), RetryVerdict::Continue(_)));
        assert!(matches!(state.next(state.next), RetryVerdict::Continue(_)));
        assert_eq!(state.count, 3);
        assert_eq!(state.next(state.next), RetryVerdict::CountExhausted);
        // Asking again changes nothing.
        assert_eq!(state.next(state.next), RetryVerdict::CountExhausted);
        assert_eq!(state.count, 3);
    }

    #[test]
    fn duration_exhaustion() {
        let config = RetryConfig::new(
            Duration::from_secs(1),
            Duration::from_secs(2),
            0,
            Duration::from_secs(10),
        );
        let now = Instant::now();
        let mut state = RetryState::new(config, now);

        assert!(matches!(
            state.next(now + Duration::from_secs(5)),
            RetryVerdict::Continue(_)
        ));
        assert_eq!(
            state.next(now + Duration::from_secs(10)),
            RetryVerdict::DurationExhausted
        );
        assert_eq!(
            state.next(now + Duration::from_secs(60)),
            RetryVerdict::DurationExhausted
        );
    }

    #[test]
    fn timeout_only_is_one_shot() {
        let now = Instant::now();
        let mut state = RetryState::new(RetryConfig::timeout_only(Duration::from_secs(10)), now);
        assert!(within_jitter(state.next - now, Duration::from_secs(10)));
        assert_eq!(state.next(state.next), RetryVerdict::CountExhausted);
    }

    #[test]
    fn total_mrd_time_within_jitter_band() {
        // The sum of all fire intervals up to the final verdict stays inside
        // the configured duration: the clock reports DurationExhausted at the
        // first fire at-or-after start + mrd.
        let config = RetryConfig::new(
            Duration::from_secs(1),
            Duration::from_secs(4),
            0,
            Duration::from_secs(10),
        );
        let now = Instant::now();
        let mut state = RetryState::new(config, now);
        let mut fire = state.next;
        loop {
            match state.next(fire) {
                RetryVerdict::Continue(at) => fire = at,
                RetryVerdict::DurationExhausted => break,
                RetryVerdict::CountExhausted => panic!("mrc disabled"),
            }
            // Bounded by mrd plus one full (jittered) interval.
            assert!(fire - now < Duration::from_secs(10) + Duration::from_secs(5));
        }
        assert!(fire - now >= Duration::from_secs(10));
    }
}

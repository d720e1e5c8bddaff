//! Per-connection RADIUS identifier tracking.
//!
//! One octet of identifier space, shared by every packet code on the
//! connection. Each slot remembers which request owns it and the request
//! authenticator the packet was signed with, so a reply can be correlated and
//! verified by identifier alone.

use radproto::AUTH_VECTOR_LENGTH;

use crate::request::ReqId;

/// Returned when all 256 identifiers are in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no free RADIUS identifiers on this connection")]
pub struct NoFreeId;

#[derive(Debug, Clone, Copy)]
enum Slot {
    Free,
    Used {
        owner: ReqId,
        authenticator: [u8; AUTH_VECTOR_LENGTH],
    },
}

/// A tracked in-flight identifier.
#[derive(Debug, Clone, Copy)]
pub struct TrackedEntry {
    pub owner: ReqId,
    pub authenticator: [u8; AUTH_VECTOR_LENGTH],
}

/// The 256-slot identifier table for one connection.
pub struct IdTracker {
    slots: Box<[Slot; 256]>,
    /// Most recently handed out identifier; allocation resumes after it so
    /// identifiers spread across the space instead of clustering at zero.
    /// A peer that restarts quickly is then unlikely to see a colliding ID.
    last_id: u8,
    in_use: u16,
}

impl IdTracker {
    pub fn new() -> Self {
        Self {
            slots: Box::new([Slot::Free; 256]),
            last_id: 255,
            in_use: 0,
        }
    }

    /// Reserve the next free identifier for `owner`, scanning round-robin
    /// from one past the previous allocation.
    pub fn reserve(&mut self, owner: ReqId) -> Result<u8, NoFreeId> {
        for step in 1..=256u16 {
            let id = self.last_id.wrapping_add(step as u8);
            if matches!(self.slots[id as usize], Slot::Free) {
                self.slots[id as usize] = Slot::Used {
                    owner,
                    authenticator: [0; AUTH_VECTOR_LENGTH],
                };
                self.last_id = id;
                self.in_use += 1;
                return Ok(id);
            }
        }
        Err(NoFreeId)
    }

    /// Store the request authenticator after the packet has been signed.
    pub fn update(&mut self, id: u8, authenticator: [u8; AUTH_VECTOR_LENGTH]) {
        match &mut self.slots[id as usize] {
            Slot::Used {
                authenticator: stored,
                ..
            } => *stored = authenticator,
            Slot::Free => debug_assert!(false, "update of free tracker slot {id}"),
        }
    }

    /// Look up the in-flight request for a reply identifier.
    ///
    /// The authenticator is not part of the key; the codec verifies the reply
    /// against the stored value afterwards.
    pub fn find(&self, id: u8) -> Option<TrackedEntry> {
        match self.slots[id as usize] {
            Slot::Used {
                owner,
                authenticator,
            } => Some(TrackedEntry {
                owner,
                authenticator,
            }),
            Slot::Free => None,
        }
    }

    /// Release an identifier. Releasing a free slot is a no-op.
    pub fn release(&mut self, id: u8) {
        if matches!(self.slots[id as usize], Slot::Used { .. }) {
            self.slots[id as usize] = Slot::Free;
            self.in_use -= 1;
        }
    }

    /// Number of identifiers currently in flight.
    pub fn in_use(&self) -> usize {
        self.in_use as usize
    }

    pub fn has_free(&self) -> bool {
        self.in_use < 256
    }
}

impl Default for IdTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IdTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdTracker")
            .field("in_use", &self.in_use)
            .field("last_id", &self.last_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(n: u64) -> ReqId {
        ReqId(n)
    }

    #[test]
    fn round_robin_allocation() {
        let mut tracker = IdTracker::new();
        assert_eq!(tracker.reserve(req(1)).unwrap(), 0);
        assert_eq!(tracker.reserve(req(2)).unwrap(), 1);
        assert_eq!(tracker.reserve(req(3)).unwrap(), 2);

        // Releasing an early slot doesn't rewind the allocation point.
        tracker.release(0);
        assert_eq!(tracker.reserve(req(4)).unwrap(), 3);

        // The freed slot is reused only after wrapping.
        for n in 0..252 {
            tracker.reserve(req(100 + n)).unwrap();
        }
        assert_eq!(tracker.in_use(), 255);
        assert_eq!(tracker.reserve(req(999)).unwrap(), 0);
        assert!(!tracker.has_free());
        assert_eq!(tracker.reserve(req(1000)), Err(NoFreeId));
    }

    #[test]
    fn find_returns_owner_and_authenticator() {
        let mut tracker = IdTracker::new();
        let id = tracker.reserve(req(7)).unwrap();
        assert_eq!(tracker.find(id).unwrap().owner, req(7));
        assert_eq!(tracker.find(id).unwrap().authenticator, [0; 16]);

        tracker.update(id, [0xab; 16]);
        assert_eq!(tracker.find(id).unwrap().authenticator, [0xab; 16]);

        assert!(tracker.find(id.wrapping_add(1)).is_none());
    }

    #[test]
    fn release_is_idempotent() {
        let mut tracker = IdTracker::new();
        let id = tracker.reserve(req(1)).unwrap();
        assert_eq!(tracker.in_use(), 1);

        tracker.release(id);
        assert_eq!(tracker.in_use(), 0);
        tracker.release(id);
        tracker.release(id);
        assert_eq!(tracker.in_use(), 0);
        assert!(tracker.find(id).is_none());
    }

    #[test]
    fn in_use_matches_population() {
        let mut tracker = IdTracker::new();
        let ids: Vec<u8> = (0..10).map(|n| tracker.reserve(req(n)).unwrap()).collect();
        assert_eq!(tracker.in_use(), 10);
        for (n, id) in ids.iter().enumerate() {
            tracker.release(*id);
            assert_eq!(tracker.in_use(), 10 - n - 1);
        }
    }
}

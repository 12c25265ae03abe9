//! Join handshake (spec §4.4): lock acquisition on the joiner's would-be
//! neighbors, token transfer accumulation on the joiner, and phase
//! progression `Booting → Joining → Inserting → Routing`. Grounded on
//! `original_source/.../JoinManager*`.

use federation_core::error::ErrorCode;
use federation_core::time::Clock;
use federation_core::{FederationError, Result};
use federation_ring::{NodeIdRange, RoutingToken};
use federation_transport::headers::TokenTransferHeader;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Acquired by a joining node from a would-be neighbor. Guarantees that
/// neighbor will not concurrently admit another joiner in an overlapping
/// arc, until the lock expires or is released.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JoinLock {
    pub id: u64,
    pub hood_range: NodeIdRange,
    pub is_renew: bool,
}

/// Held by a neighbor that has granted locks to joiners; denies a second,
/// overlapping grant until the first is released or expires (spec §4.4
/// step 2).
pub struct JoinLockTable {
    clock: Arc<dyn Clock>,
    lock_duration: Duration,
    next_id: AtomicU64,
    active: Mutex<Vec<(JoinLock, Instant)>>,
}

impl JoinLockTable {
    pub fn new(clock: Arc<dyn Clock>, lock_duration: Duration) -> Self {
        Self {
            clock,
            lock_duration,
            next_id: AtomicU64::new(1),
            active: Mutex::new(Vec::new()),
        }
    }

    fn expire_locked(&self, locks: &mut Vec<(JoinLock, Instant)>) {
        let now = self.clock.instant_now();
        locks.retain(|(_, granted_at)| now.duration_since(*granted_at) < self.lock_duration);
    }

    /// Grants a lock over `requested_range` unless it overlaps an
    /// already-active grant under a different id, per spec §4.4 step 2.
    /// `is_renew` extends an existing grant covering the same arc instead
    /// of creating a new one.
    pub fn grant(&self, requested_range: NodeIdRange, is_renew: bool) -> Result<JoinLock> {
        let mut locks = self.active.lock();
        self.expire_locked(&mut locks);

        if is_renew {
            if let Some(slot) = locks
                .iter_mut()
                .find(|(lock, _)| !lock.hood_range.disjoint(&requested_range))
            {
                slot.0.hood_range = requested_range;
                slot.0.is_renew = true;
                slot.1 = self.clock.instant_now();
                return Ok(slot.0);
            }
            return Err(FederationError::new(
                ErrorCode::InvalidArgument,
                "no existing join lock over this arc to renew",
            ));
        }

        if locks.iter().any(|(lock, _)| !lock.hood_range.disjoint(&requested_range)) {
            return Err(FederationError::new(
                ErrorCode::AlreadyExists,
                "an outstanding join lock already covers an overlapping arc",
            ));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let lock = JoinLock {
            id,
            hood_range: requested_range,
            is_renew: false,
        };
        locks.push((lock, self.clock.instant_now()));
        Ok(lock)
    }

    pub fn release(&self, id: u64) {
        self.active.lock().retain(|(lock, _)| lock.id != id);
    }

    pub fn active_count(&self) -> usize {
        let mut locks = self.active.lock();
        self.expire_locked(&mut locks);
        locks.len()
    }
}

/// Accumulates the token fragments a joiner receives from its two would-be
/// neighbors during step 3 of the handshake into one coherent
/// `RoutingToken`.
#[derive(Default)]
pub struct TokenAccumulator {
    token: RoutingToken,
}

impl TokenAccumulator {
    pub fn new() -> Self {
        Self {
            token: RoutingToken::empty(),
        }
    }

    pub fn accept(&mut self, transfer: TokenTransferHeader) -> Result<()> {
        self.token.accept(transfer.range, transfer.target_version)
    }

    pub fn into_token(self) -> RoutingToken {
        self.token
    }

    pub fn token(&self) -> RoutingToken {
        self.token
    }
}

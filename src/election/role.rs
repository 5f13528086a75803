use std::sync::atomic::{AtomicU64, Ordering};
use serde::{Deserialize, Serialize};

static NEXT_STATE_ID: AtomicU64 = AtomicU64::new(1);

const LEADER_BIT: u64 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Leader,
    Worker,
}

/// Leader/worker flag for one process.
///
/// Role and epoch are packed into one atomic word (`epoch << 1 | leader`),
/// so readers always see a consistent pair. Each promotion starts a new
/// epoch; leases minted in an older epoch stop being valid.
pub struct RoleState {
    id: u64,
    word: AtomicU64,
}

/// Proof that the holder observed this process as leader.
///
/// Only `RoleState::lease` mints these, and only while leading. Write paths
/// that must run on the leader take one and re-check it, so a demoted or
/// miswired caller fails instead of writing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeaderLease {
    state_id: u64,
    epoch: u64,
}

impl LeaderLease {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl RoleState {
    pub fn new() -> Self {
        RoleState {
            id: NEXT_STATE_ID.fetch_add(1, Ordering::Relaxed),
            word: AtomicU64::new(0),
        }
    }

    pub fn role(&self) -> Role {
        if self.word.load(Ordering::SeqCst) & LEADER_BIT != 0 {
            Role::Leader
        } else {
            Role::Worker
        }
    }

    pub fn is_leader(&self) -> bool {
        self.role() == Role::Leader
    }

    pub fn epoch(&self) -> u64 {
        self.word.load(Ordering::SeqCst) >> 1
    }

    pub fn lease(&self) -> Option<LeaderLease> {
        let word = self.word.load(Ordering::SeqCst);
        (word & LEADER_BIT != 0).then_some(LeaderLease {
            state_id: self.id,
            epoch: word >> 1,
        })
    }

    /// Whether `lease` was minted by this state in the current leadership.
    pub fn is_current(&self, lease: &LeaderLease) -> bool {
        lease.state_id == self.id && self.lease() == Some(*lease)
    }

    /// Enter a new leadership epoch. Returns the epoch.
    pub(crate) fn promote(&self) -> u64 {
        let previous = self.word
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |word| {
                Some((((word >> 1) + 1) << 1) | LEADER_BIT)
            })
            .unwrap_or_else(|word| word);
        (previous >> 1) + 1
    }

    /// Returns whether this process was leader before the call.
    pub(crate) fn demote(&self) -> bool {
        let previous = self.word.fetch_and(!LEADER_BIT, Ordering::SeqCst);
        previous & LEADER_BIT != 0
    }
}

impl Default for RoleState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_as_worker_without_lease() {
        let state = RoleState::new();
        assert_eq!(state.role(), Role::Worker);
        assert!(state.lease().is_none());
    }

    #[test]
    fn demotion_invalidates_outstanding_leases() {
        let state = RoleState::new();
        assert_eq!(state.promote(), 1);
        let lease = state.lease().unwrap();
        assert!(state.is_current(&lease));

        assert!(state.demote());
        assert!(!state.demote());
        assert!(!state.is_current(&lease));

        assert_eq!(state.promote(), 2);
        assert!(!state.is_current(&lease));
        assert!(state.is_current(&state.lease().unwrap()));
    }

    #[test]
    fn leases_do_not_transfer_between_processes() {
        let a = RoleState::new();
        let b = RoleState::new();
        a.promote();
        b.promote();
        let lease = a.lease().unwrap();
        assert!(!b.is_current(&lease));
    }
}

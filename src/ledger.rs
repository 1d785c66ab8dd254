//! Ownership ledger: who holds each buffer right now.
//!
//! Every buffer id known to the vault has exactly one [`Owner`]. All mutation
//! goes through single-entry operations that either commit completely or fail
//! without touching the table.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::buffer::{BufferId, ClientBuffer};
use crate::error::{Result, VaultError};
use crate::geometry::Geometry;

/// Observable owner of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnerState {
    /// Allocation asked of the remote side; no local representation yet.
    Requested,
    /// Idle in the client-side pool.
    Free,
    /// Handed to a caller by `withdraw`.
    CheckedOut,
    /// Deposited by the caller and being submitted to the compositor.
    InFlightToServer,
    /// Owned by the compositor; tracked by id only.
    AtServer,
}

impl OwnerState {
    /// Returns `true` if the ledger allows moving from `self` to `to`.
    #[must_use]
    pub const fn can_become(self, to: Self) -> bool {
        use OwnerState::{AtServer, CheckedOut, Free, InFlightToServer, Requested};
        matches!(
            (self, to),
            (Requested, Free | CheckedOut)
                | (Free, CheckedOut)
                | (CheckedOut, InFlightToServer | Free)
                | (InFlightToServer, AtServer | Free | CheckedOut)
                | (AtServer, Free | CheckedOut)
        )
    }
}

impl fmt::Display for OwnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Requested => "requested",
            Self::Free => "free",
            Self::CheckedOut => "checked-out",
            Self::InFlightToServer => "in-flight",
            Self::AtServer => "at-server",
        })
    }
}

/// Owner of an entry, carrying the local storage while the vault itself
/// holds it. Only `Free` entries keep storage in the ledger; a checked-out
/// buffer's storage lives in the caller's [`Buffer`](crate::Buffer).
pub(crate) enum Owner {
    Requested,
    Free(Arc<dyn ClientBuffer>),
    CheckedOut,
    InFlightToServer,
    AtServer,
}

impl Owner {
    pub(crate) const fn state(&self) -> OwnerState {
        match self {
            Self::Requested => OwnerState::Requested,
            Self::Free(_) => OwnerState::Free,
            Self::CheckedOut => OwnerState::CheckedOut,
            Self::InFlightToServer => OwnerState::InFlightToServer,
            Self::AtServer => OwnerState::AtServer,
        }
    }

    pub(crate) fn into_storage(self) -> Option<Arc<dyn ClientBuffer>> {
        match self {
            Self::Free(storage) => Some(storage),
            _ => None,
        }
    }
}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Owner({})", self.state())
    }
}

pub(crate) struct Entry {
    geometry: Geometry,
    owner: Owner,
    /// Insertion order, used to hand out the oldest free buffer first.
    seq: u64,
}

impl Entry {
    pub(crate) const fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub(crate) const fn state(&self) -> OwnerState {
        self.owner.state()
    }
}

/// Per-state counts at one observation point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OwnershipCensus {
    /// Allocations requested but not yet delivered.
    pub requested: usize,
    /// Idle buffers in the pool.
    pub free: usize,
    /// Buffers held by callers.
    pub checked_out: usize,
    /// Buffers deposited and being submitted.
    pub in_flight: usize,
    /// Buffers owned by the compositor.
    pub at_server: usize,
    /// Withdraw requests waiting for a buffer.
    pub pending_withdrawals: usize,
    /// Pool slots with no allocation requested, held back until the target
    /// geometry becomes valid.
    pub unallocated: usize,
}

pub(crate) struct Ledger {
    entries: HashMap<BufferId, Entry>,
    next_seq: u64,
    /// Allocation requests whose id the remote side has not told us yet.
    outstanding: usize,
}

impl Ledger {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_seq: 0,
            outstanding: 0,
        }
    }

    pub(crate) fn insert(&mut self, id: BufferId, owner: Owner, geometry: Geometry) -> Result<()> {
        if let Some(existing) = self.entries.get(&id) {
            return Err(VaultError::InvalidTransition {
                id,
                from: existing.state(),
                to: owner.state(),
            });
        }
        trace!(%id, state = %owner.state(), %geometry, "ledger insert");
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            id,
            Entry {
                geometry,
                owner,
                seq,
            },
        );
        Ok(())
    }

    /// Moves `id` from `from` to `to`, returning the previous owner.
    ///
    /// Fails without committing anything if `id` is unknown, is not currently
    /// in `from`, or `from -> to` is not an edge of the ownership graph.
    pub(crate) fn transition(&mut self, id: BufferId, from: OwnerState, to: Owner) -> Result<Owner> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(VaultError::UnknownBuffer(id))?;
        let current = entry.state();
        if current != from || !from.can_become(to.state()) {
            return Err(VaultError::InvalidTransition {
                id,
                from: current,
                to: to.state(),
            });
        }
        trace!(%id, %from, to = %to.state(), "ledger transition");
        Ok(std::mem::replace(&mut entry.owner, to))
    }

    /// Returns the oldest-inserted free entry with the given geometry.
    pub(crate) fn find_free(&self, geometry: Geometry) -> Option<BufferId> {
        self.entries
            .iter()
            .filter(|(_, e)| e.state() == OwnerState::Free && e.geometry == geometry)
            .min_by_key(|(_, e)| e.seq)
            .map(|(id, _)| *id)
    }

    /// Moves the oldest matching free entry to `CheckedOut` and hands back its storage.
    pub(crate) fn checkout_free(
        &mut self,
        geometry: Geometry,
    ) -> Option<(BufferId, Arc<dyn ClientBuffer>)> {
        let id = self.find_free(geometry)?;
        let storage = self
            .transition(id, OwnerState::Free, Owner::CheckedOut)
            .ok()?
            .into_storage()?;
        Some((id, storage))
    }

    pub(crate) fn lookup(&self, id: BufferId) -> Option<&Entry> {
        self.entries.get(&id)
    }

    pub(crate) fn state_of(&self, id: BufferId) -> Option<OwnerState> {
        self.lookup(id).map(Entry::state)
    }

    pub(crate) fn remove(&mut self, id: BufferId) -> Option<Entry> {
        let entry = self.entries.remove(&id);
        if entry.is_some() {
            trace!(%id, "ledger remove");
        }
        entry
    }

    /// Removes every free entry, oldest first.
    pub(crate) fn drain_free(&mut self) -> Vec<BufferId> {
        let mut free: Vec<(u64, BufferId)> = self
            .entries
            .iter()
            .filter(|(_, e)| e.state() == OwnerState::Free)
            .map(|(id, e)| (e.seq, *id))
            .collect();
        free.sort_unstable();
        free.into_iter()
            .map(|(_, id)| {
                self.remove(id);
                id
            })
            .collect()
    }

    pub(crate) fn note_requested(&mut self, count: usize) {
        self.outstanding += count;
    }

    pub(crate) const fn has_outstanding(&self) -> bool {
        self.outstanding > 0
    }

    /// Records the first delivery of an id the remote side allocated for us.
    pub(crate) fn claim_requested(&mut self, id: BufferId, geometry: Geometry) -> Result<()> {
        if self.outstanding == 0 {
            return Err(VaultError::UnknownBuffer(id));
        }
        self.insert(id, Owner::Requested, geometry)?;
        self.outstanding -= 1;
        Ok(())
    }

    pub(crate) fn census(&self) -> OwnershipCensus {
        let mut census = OwnershipCensus {
            requested: self.outstanding,
            ..OwnershipCensus::default()
        };
        for entry in self.entries.values() {
            match entry.state() {
                OwnerState::Requested => census.requested += 1,
                OwnerState::Free => census.free += 1,
                OwnerState::CheckedOut => census.checked_out += 1,
                OwnerState::InFlightToServer => census.in_flight += 1,
                OwnerState::AtServer => census.at_server += 1,
            }
        }
        census
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestBuffer, geometry};

    fn storage() -> Arc<dyn ClientBuffer> {
        Arc::new(TestBuffer::new(0, geometry(10, 10)))
    }

    fn id(raw: i32) -> BufferId {
        BufferId::new(raw)
    }

    #[test]
    fn test_ownership_graph() {
        use OwnerState::*;
        assert!(Requested.can_become(CheckedOut));
        assert!(Free.can_become(CheckedOut));
        assert!(CheckedOut.can_become(InFlightToServer));
        assert!(InFlightToServer.can_become(AtServer));
        assert!(AtServer.can_become(Free));

        assert!(!Free.can_become(AtServer));
        assert!(!AtServer.can_become(InFlightToServer));
        assert!(!Requested.can_become(InFlightToServer));
        assert!(!CheckedOut.can_become(CheckedOut));
    }

    #[test]
    fn test_transition_checks_current_state() {
        let mut ledger = Ledger::new();
        ledger.insert(id(1), Owner::Requested, geometry(10, 10)).unwrap();

        let err = ledger
            .transition(id(1), OwnerState::Free, Owner::CheckedOut)
            .unwrap_err();
        assert_eq!(
            err,
            VaultError::InvalidTransition {
                id: id(1),
                from: OwnerState::Requested,
                to: OwnerState::CheckedOut,
            }
        );
        assert_eq!(ledger.state_of(id(1)), Some(OwnerState::Requested));

        ledger
            .transition(id(1), OwnerState::Requested, Owner::Free(storage()))
            .unwrap();
        assert_eq!(ledger.state_of(id(1)), Some(OwnerState::Free));
    }

    #[test]
    fn test_invalid_edge_commits_nothing() {
        let mut ledger = Ledger::new();
        ledger.insert(id(1), Owner::Free(storage()), geometry(10, 10)).unwrap();

        let err = ledger
            .transition(id(1), OwnerState::Free, Owner::AtServer)
            .unwrap_err();
        assert!(matches!(err, VaultError::InvalidTransition { .. }));
        assert_eq!(ledger.state_of(id(1)), Some(OwnerState::Free));
        assert!(ledger.checkout_free(geometry(10, 10)).is_some());
    }

    #[test]
    fn test_unknown_id() {
        let mut ledger = Ledger::new();
        let err = ledger
            .transition(id(9), OwnerState::Free, Owner::CheckedOut)
            .unwrap_err();
        assert_eq!(err, VaultError::UnknownBuffer(id(9)));
        assert!(ledger.lookup(id(9)).is_none());
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut ledger = Ledger::new();
        ledger.insert(id(1), Owner::CheckedOut, geometry(10, 10)).unwrap();
        assert!(ledger.insert(id(1), Owner::Requested, geometry(10, 10)).is_err());
        assert_eq!(ledger.state_of(id(1)), Some(OwnerState::CheckedOut));
    }

    #[test]
    fn test_find_free_prefers_oldest_matching() {
        let mut ledger = Ledger::new();
        ledger.insert(id(5), Owner::Free(storage()), geometry(20, 20)).unwrap();
        ledger.insert(id(3), Owner::Free(storage()), geometry(10, 10)).unwrap();
        ledger.insert(id(1), Owner::Free(storage()), geometry(10, 10)).unwrap();
        ledger.insert(id(2), Owner::CheckedOut, geometry(10, 10)).unwrap();

        assert_eq!(ledger.find_free(geometry(10, 10)), Some(id(3)));
        let (first, _) = ledger.checkout_free(geometry(10, 10)).unwrap();
        assert_eq!(first, id(3));
        assert_eq!(ledger.find_free(geometry(10, 10)), Some(id(1)));
        assert_eq!(ledger.find_free(geometry(30, 30)), None);
    }

    #[test]
    fn test_drain_free_and_census() {
        let mut ledger = Ledger::new();
        ledger.note_requested(2);
        ledger.claim_requested(id(1), geometry(10, 10)).unwrap();
        ledger.insert(id(2), Owner::Free(storage()), geometry(10, 10)).unwrap();
        ledger.insert(id(3), Owner::AtServer, geometry(10, 10)).unwrap();
        ledger.insert(id(4), Owner::Free(storage()), geometry(10, 10)).unwrap();

        let census = ledger.census();
        assert_eq!(census.requested, 2);
        assert_eq!(census.free, 2);
        assert_eq!(census.at_server, 1);

        assert_eq!(ledger.drain_free(), vec![id(2), id(4)]);
        assert_eq!(ledger.census().free, 0);
        assert_eq!(ledger.state_of(id(3)), Some(OwnerState::AtServer));
    }

    #[test]
    fn test_claim_requires_outstanding_allocation() {
        let mut ledger = Ledger::new();
        assert_eq!(
            ledger.claim_requested(id(1), geometry(10, 10)),
            Err(VaultError::UnknownBuffer(id(1)))
        );
        ledger.note_requested(1);
        ledger.claim_requested(id(1), geometry(10, 10)).unwrap();
        assert_eq!(ledger.census().requested, 1);
        assert!(ledger.claim_requested(id(2), geometry(10, 10)).is_err());
    }
}

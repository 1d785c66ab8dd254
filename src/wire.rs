//! Wire transfer adapter: remote deliveries in, submissions out.
//!
//! Inbound packages are turned into local buffers with the injected factory
//! before the vault lock is taken, then settled into the ledger. Outbound
//! submissions are forwarded to the [`ServerBufferRequests`] sink.
//!
//! [`ServerBufferRequests`]: crate::ServerBufferRequests

use std::sync::{Arc, Weak};

use tracing::{debug, trace, warn};

use crate::buffer::{BufferId, BufferPackage, ClientBuffer};
use crate::error::{ConstructionError, Result, VaultError};
use crate::ledger::{Owner, OwnerState};
use crate::vault::{ConstructionPolicy, Deferred, VaultShared, VaultState};

/// Registration handle through which the I/O layer delivers remote messages.
///
/// Holds only a weak reference: after the vault is torn down every method is
/// a no-op that returns `Ok(())`.
#[derive(Clone)]
pub struct WireEndpoint {
    vault: Weak<VaultShared>,
}

impl WireEndpoint {
    pub(crate) const fn new(vault: Weak<VaultShared>) -> Self {
        Self { vault }
    }

    /// Delivers a buffer from the remote side: either the answer to an
    /// allocation request or a buffer the compositor has finished with.
    ///
    /// A buffer at the current target geometry goes to the oldest pending
    /// withdrawal, or into the free pool if none is waiting. A stale buffer is
    /// freed remotely and replaced by an allocation at the current geometry.
    ///
    /// # Errors
    ///
    /// - [`VaultError::UnknownBuffer`] if the id is new while no allocation is
    ///   outstanding
    /// - [`VaultError::InvalidTransition`] if the client side already holds
    ///   the buffer
    /// - [`VaultError::Construction`] if the package was unusable and the
    ///   policy is [`ConstructionPolicy::Surface`]
    pub fn wire_transfer_inbound(&self, package: BufferPackage) -> Result<()> {
        match self.vault.upgrade() {
            Some(vault) => vault.wire_transfer_inbound(package),
            None => {
                trace!(id = %package.id, "inbound delivery after teardown ignored");
                Ok(())
            }
        }
    }

    /// Records that the compositor accepted a submitted buffer
    /// (`InFlightToServer -> AtServer`).
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::UnknownBuffer`] if the id is not in the ledger
    /// and [`VaultError::InvalidTransition`] if it is not in flight.
    pub fn submit_acknowledged(&self, id: BufferId) -> Result<()> {
        self.vault
            .upgrade()
            .map_or(Ok(()), |vault| vault.submit_acknowledged(id))
    }

    /// Returns `true` while the vault has not been torn down.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.vault
            .upgrade()
            .is_some_and(|vault| !vault.state.lock().closed)
    }
}

impl std::fmt::Debug for WireEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireEndpoint")
            .field("live", &self.is_live())
            .finish()
    }
}

impl VaultShared {
    pub(crate) fn wire_transfer_inbound(self: &Arc<Self>, package: BufferPackage) -> Result<()> {
        // Refuse what the ledger would refuse before importing the handle.
        {
            let state = self.state.lock();
            if state.closed {
                trace!(id = %package.id, "inbound delivery after teardown ignored");
                return Ok(());
            }
            state.screen_inbound(package.id)?;
        }

        let constructed = self.factory.create_buffer(&package);
        let mut deferred = Deferred::default();
        let outcome = {
            let mut state = self.state.lock();
            state.accept_inbound(self, &package, constructed, &mut deferred)
        };
        deferred.run(self.requests.as_ref());
        outcome
    }

    pub(crate) fn wire_transfer_outbound(&self, id: BufferId) {
        debug!(%id, "submitting buffer");
        self.requests.submit(id);
    }

    pub(crate) fn submit_acknowledged(&self, id: BufferId) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        state
            .ledger
            .transition(id, OwnerState::InFlightToServer, Owner::AtServer)
            .map(drop)
    }
}

impl VaultState {
    /// Checks whether a delivery for `id` can be taken in.
    ///
    /// Returns the entry's current state, or `None` for the first delivery of
    /// an outstanding allocation.
    fn screen_inbound(&self, id: BufferId) -> Result<Option<OwnerState>> {
        match self.ledger.state_of(id) {
            None if self.ledger.has_outstanding() => Ok(None),
            None => {
                warn!(%id, "inbound delivery for an id that was never allocated");
                Err(VaultError::UnknownBuffer(id))
            }
            Some(
                state @ (OwnerState::Requested
                | OwnerState::InFlightToServer
                | OwnerState::AtServer),
            ) => Ok(Some(state)),
            Some(state) => {
                warn!(%id, %state, "inbound delivery for a buffer the client already holds");
                Err(VaultError::InvalidTransition {
                    id,
                    from: state,
                    to: OwnerState::Free,
                })
            }
        }
    }

    fn accept_inbound(
        &mut self,
        home: &Arc<VaultShared>,
        package: &BufferPackage,
        constructed: std::result::Result<Arc<dyn ClientBuffer>, ConstructionError>,
        deferred: &mut Deferred,
    ) -> Result<()> {
        let id = package.id;
        if self.closed {
            trace!(%id, "inbound delivery after teardown ignored");
            return Ok(());
        }

        // Screened again: the ledger may have moved while the factory ran.
        let from = match self.screen_inbound(id)? {
            Some(state) => state,
            None => {
                self.ledger.claim_requested(id, package.geometry)?;
                OwnerState::Requested
            }
        };

        let storage = match constructed {
            Ok(storage) => storage,
            Err(source) => {
                warn!(%id, error = %source, "failed to construct local buffer");
                self.ledger.remove(id);
                deferred.free(id);
                return match home.policy {
                    ConstructionPolicy::Reallocate => {
                        self.replenish(1, deferred);
                        Ok(())
                    }
                    ConstructionPolicy::Surface => Err(VaultError::Construction { id, source }),
                };
            }
        };

        let geometry = self.ledger.lookup(id).map_or(package.geometry, |e| e.geometry());
        if geometry != self.target {
            warn!(%id, %geometry, target = %self.target, "stale buffer returned; retiring");
            self.retire(id, deferred);
            return Ok(());
        }

        self.settle(home, id, from, storage, deferred)
    }
}

//! The buffer vault: withdraw/deposit, resize and teardown.
//!
//! This module provides the [`BufferVault`] and [`VaultBuilder`] types. The
//! vault's ledger, pending withdraw queue and target geometry live behind one
//! mutex. Decisions are made under that lock; remote requests and promise
//! fulfilment are carried out after it is released, so collaborators and
//! woken callers may re-enter the vault freely.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::buffer::{Buffer, BufferId, ClientBuffer};
use crate::error::{Result, VaultError};
use crate::geometry::{Geometry, Size};
use crate::ledger::{Entry, Ledger, Owner, OwnerState, OwnershipCensus};
use crate::requests::{ClientBufferFactory, ServerBufferRequests};
use crate::wire::WireEndpoint;
use crate::withdrawal::{Waiter, Withdrawal};

/// Default number of buffers requested when the vault is built.
const DEFAULT_INITIAL_NBUFFERS: usize = 3;

/// What to do when a delivered package cannot be turned into a local buffer.
///
/// In both cases the id is dropped from the ledger and the remote side is
/// asked to free it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConstructionPolicy {
    /// Request a replacement allocation and report success to the I/O caller.
    #[default]
    Reallocate,
    /// Return [`VaultError::Construction`] to the I/O caller. The pool shrinks
    /// by one buffer.
    Surface,
}

/// Builder for creating a [`BufferVault`].
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use bufvault::{
///     BufferId, BufferPackage, ClientBuffer, ClientBufferFactory, ConstructionError,
///     Geometry, PixelFormat, ServerBufferRequests, Size, VaultBuilder,
/// };
///
/// struct Factory;
/// impl ClientBufferFactory for Factory {
///     fn create_buffer(
///         &self,
///         _package: &BufferPackage,
///     ) -> Result<Arc<dyn ClientBuffer>, ConstructionError> {
///         Err(ConstructionError::new("not in this example"))
///     }
/// }
///
/// struct Wire;
/// impl ServerBufferRequests for Wire {
///     fn allocate(&self, _geometry: Geometry) {}
///     fn free(&self, _id: BufferId) {}
///     fn submit(&self, _id: BufferId) {}
/// }
///
/// let vault = VaultBuilder::new(Arc::new(Factory), Arc::new(Wire))
///     .size(Size::new(640, 480))
///     .pixel_format(PixelFormat::Argb8888)
///     .initial_nbuffers(2)
///     .build();
/// assert_eq!(vault.census().requested, 2);
/// ```
pub struct VaultBuilder {
    factory: Arc<dyn ClientBufferFactory>,
    requests: Arc<dyn ServerBufferRequests>,
    geometry: Geometry,
    initial_nbuffers: usize,
    policy: ConstructionPolicy,
}

impl VaultBuilder {
    /// Creates a builder with the given collaborators.
    ///
    /// Default settings:
    /// - Geometry: `0x0`, invalid format, usage 0
    /// - Initial buffers: 3
    /// - Construction policy: [`ConstructionPolicy::Reallocate`]
    #[must_use]
    pub fn new(
        factory: Arc<dyn ClientBufferFactory>,
        requests: Arc<dyn ServerBufferRequests>,
    ) -> Self {
        Self {
            factory,
            requests,
            geometry: Geometry::default(),
            initial_nbuffers: DEFAULT_INITIAL_NBUFFERS,
            policy: ConstructionPolicy::default(),
        }
    }

    /// Sets the whole target geometry.
    #[must_use]
    pub const fn geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = geometry;
        self
    }

    /// Sets the target size.
    #[must_use]
    pub const fn size(mut self, size: Size) -> Self {
        self.geometry.size = size;
        self
    }

    /// Sets the target pixel format.
    #[must_use]
    pub const fn pixel_format(mut self, format: crate::PixelFormat) -> Self {
        self.geometry.format = format;
        self
    }

    /// Sets the usage hint passed to the remote allocator.
    #[must_use]
    pub const fn usage(mut self, usage: crate::BufferUsage) -> Self {
        self.geometry.usage = usage;
        self
    }

    /// Sets how many buffers are requested up front. The vault keeps its pool
    /// at this size across resizes.
    #[must_use]
    pub const fn initial_nbuffers(mut self, count: usize) -> Self {
        self.initial_nbuffers = count;
        self
    }

    /// Sets the construction failure policy.
    #[must_use]
    pub const fn construction_policy(mut self, policy: ConstructionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Builds the vault and issues the initial allocation requests.
    ///
    /// If the geometry is not valid yet (the default `0x0` with no format),
    /// nothing is requested until a resize sets a valid one.
    #[must_use]
    pub fn build(self) -> BufferVault {
        let mut state = VaultState {
            target: self.geometry,
            ledger: Ledger::new(),
            waiters: VecDeque::new(),
            unallocated: 0,
            closed: false,
        };
        let mut deferred = Deferred::default();
        state.replenish(self.initial_nbuffers, &mut deferred);

        info!(
            geometry = %self.geometry,
            nbuffers = self.initial_nbuffers,
            "buffer vault created"
        );
        if state.unallocated > 0 {
            warn!(geometry = %self.geometry, "invalid geometry; allocations held until resize");
        }

        let shared = Arc::new(VaultShared {
            factory: self.factory,
            requests: self.requests,
            policy: self.policy,
            state: Mutex::new(state),
        });
        deferred.run(shared.requests.as_ref());

        BufferVault { shared }
    }
}

/// Client-side bookkeeping for the buffers exchanged with a remote compositor.
///
/// A render thread calls [`withdraw`](Self::withdraw) and
/// [`deposit`](Self::deposit); an I/O thread feeds remote deliveries through
/// [`wire_transfer_inbound`](Self::wire_transfer_inbound) or a
/// [`WireEndpoint`]. Dropping the vault tears it down: idle buffers are freed
/// remotely and pending withdrawals resolve to [`VaultError::Cancelled`].
pub struct BufferVault {
    shared: Arc<VaultShared>,
}

impl BufferVault {
    /// Creates a vault and requests `initial_nbuffers` buffers of the given
    /// geometry.
    ///
    /// This is equivalent to configuring a [`VaultBuilder`] with the same values.
    #[must_use]
    pub fn new(
        factory: Arc<dyn ClientBufferFactory>,
        requests: Arc<dyn ServerBufferRequests>,
        geometry: Geometry,
        initial_nbuffers: usize,
    ) -> Self {
        VaultBuilder::new(factory, requests)
            .geometry(geometry)
            .initial_nbuffers(initial_nbuffers)
            .build()
    }

    /// Requests a buffer ready for rendering at the current target geometry.
    ///
    /// If an idle buffer exists the returned [`Withdrawal`] is already
    /// resolved. Otherwise the request joins the back of the pending queue and
    /// resolves when a matching buffer arrives; requests are served in call
    /// order.
    pub fn withdraw(&self) -> Withdrawal {
        let (waiter, withdrawal) = Withdrawal::new();
        let mut deferred = Deferred::default();
        {
            let mut state = self.shared.state.lock();
            let target = state.target;
            if let Some((id, storage)) = state.ledger.checkout_free(target) {
                let buffer = Buffer::new(id, target, storage, Arc::downgrade(&self.shared));
                deferred.deliveries.push((waiter, buffer));
            } else {
                state.waiters.push_back(waiter);
                debug!(pending = state.waiters.len(), "no free buffer; withdraw queued");
            }
        }
        deferred.run(self.shared.requests.as_ref());
        withdrawal
    }

    /// Hands a rendered buffer back for submission to the compositor.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::UnknownBuffer`] if the buffer did not come from
    /// this vault or is no longer checked out. A foreign buffer is returned to
    /// the vault it came from.
    pub fn deposit(&self, buffer: Buffer) -> Result<()> {
        let id = buffer.id();
        if !buffer.belongs_to(&self.shared) {
            warn!(%id, "deposit of a buffer from another vault");
            return Err(VaultError::UnknownBuffer(id));
        }

        // The guard must be gone before `buffer` can drop on the error path.
        let moved = {
            let mut state = self.shared.state.lock();
            state
                .ledger
                .transition(id, OwnerState::CheckedOut, Owner::InFlightToServer)
        };
        match moved {
            Ok(_) => {
                buffer.disarm();
                self.shared.wire_transfer_outbound(id);
                Ok(())
            }
            Err(err) => {
                warn!(%id, %err, "rejected deposit");
                Err(VaultError::UnknownBuffer(id))
            }
        }
    }

    /// Feeds a buffer delivered by the remote side into the vault.
    ///
    /// See [`WireEndpoint::wire_transfer_inbound`].
    ///
    /// # Errors
    ///
    /// See [`WireEndpoint::wire_transfer_inbound`].
    pub fn wire_transfer_inbound(&self, package: crate::BufferPackage) -> Result<()> {
        self.shared.wire_transfer_inbound(package)
    }

    /// Records that the compositor accepted a submitted buffer.
    ///
    /// # Errors
    ///
    /// See [`WireEndpoint::submit_acknowledged`].
    pub fn submit_acknowledged(&self, id: BufferId) -> Result<()> {
        self.shared.submit_acknowledged(id)
    }

    /// Returns a handle the I/O layer can hold to deliver remote messages.
    ///
    /// The handle does not keep the vault alive; once the vault is dropped,
    /// every call on it is a no-op.
    #[must_use]
    pub fn wire_endpoint(&self) -> WireEndpoint {
        WireEndpoint::new(Arc::downgrade(&self.shared))
    }

    /// Changes the target geometry.
    ///
    /// Idle buffers are freed remotely and replaced by allocations at the new
    /// geometry. Buffers held by callers or by the compositor are left alone
    /// and retired when they come back. Pending withdrawals stay queued and
    /// are only served at the new geometry.
    pub fn resize(&self, geometry: Geometry) {
        self.retarget(|_| geometry);
    }

    /// Changes only the target size, keeping format and usage.
    pub fn set_size(&self, size: Size) {
        self.retarget(|current| current.with_size(size));
    }

    fn retarget(&self, next: impl FnOnce(Geometry) -> Geometry) {
        let mut deferred = Deferred::default();
        {
            let mut state = self.shared.state.lock();
            let geometry = next(state.target);
            if state.target == geometry {
                return;
            }
            info!(from = %state.target, to = %geometry, "resizing buffer vault");
            state.target = geometry;
            let mut count = std::mem::take(&mut state.unallocated);
            for id in state.ledger.drain_free() {
                deferred.free(id);
                count += 1;
            }
            state.replenish(count, &mut deferred);
        }
        deferred.run(self.shared.requests.as_ref());
    }

    /// Returns the current target geometry.
    #[must_use]
    pub fn geometry(&self) -> Geometry {
        self.shared.state.lock().target
    }

    /// Returns the current owner of `id`, if the vault knows it.
    #[must_use]
    pub fn owner_of(&self, id: BufferId) -> Option<OwnerState> {
        self.shared.state.lock().ledger.state_of(id)
    }

    /// Returns per-state buffer counts.
    #[must_use]
    pub fn census(&self) -> OwnershipCensus {
        let state = self.shared.state.lock();
        OwnershipCensus {
            pending_withdrawals: state.waiters.iter().filter(|w| !w.is_abandoned()).count(),
            unallocated: state.unallocated,
            ..state.ledger.census()
        }
    }
}

impl Drop for BufferVault {
    fn drop(&mut self) {
        self.shared.shut_down();
    }
}

impl std::fmt::Debug for BufferVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferVault")
            .field("geometry", &self.geometry())
            .field("census", &self.census())
            .finish_non_exhaustive()
    }
}

/// State shared between the vault, its buffers and its wire endpoints.
pub(crate) struct VaultShared {
    pub(crate) factory: Arc<dyn ClientBufferFactory>,
    pub(crate) requests: Arc<dyn ServerBufferRequests>,
    pub(crate) policy: ConstructionPolicy,
    pub(crate) state: Mutex<VaultState>,
}

impl VaultShared {
    /// Takes back a checked-out buffer whose handle was dropped.
    pub(crate) fn release(self: &Arc<Self>, id: BufferId, storage: Arc<dyn ClientBuffer>) {
        let mut deferred = Deferred::default();
        {
            let mut state = self.state.lock();
            let Some(geometry) = state
                .ledger
                .lookup(id)
                .filter(|e| e.state() == OwnerState::CheckedOut)
                .map(Entry::geometry)
            else {
                return;
            };

            if state.closed {
                state.ledger.remove(id);
                deferred.free(id);
            } else if geometry != state.target {
                debug!(%id, %geometry, "stale buffer dropped; retiring");
                state.retire(id, &mut deferred);
            } else {
                debug!(%id, "buffer dropped without deposit; returning to pool");
                let settled =
                    state.settle(self, id, OwnerState::CheckedOut, storage, &mut deferred);
                if let Err(err) = settled {
                    warn!(%id, %err, "failed to return dropped buffer");
                }
            }
        }
        deferred.run(self.requests.as_ref());
    }

    fn shut_down(&self) {
        let mut deferred = Deferred::default();
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            for id in state.ledger.drain_free() {
                deferred.free(id);
            }
            deferred.cancellations.extend(state.waiters.drain(..));
            info!(
                freed = deferred.remote.len(),
                cancelled = deferred.cancellations.len(),
                "buffer vault torn down"
            );
        }
        deferred.run(self.requests.as_ref());
    }
}

pub(crate) struct VaultState {
    pub(crate) target: Geometry,
    pub(crate) ledger: Ledger,
    pub(crate) waiters: VecDeque<Waiter>,
    /// Replacements owed while the target geometry is invalid.
    pub(crate) unallocated: usize,
    /// Set once at teardown; every later entry point becomes a no-op.
    pub(crate) closed: bool,
}

impl VaultState {
    /// Pops the oldest waiter whose caller is still listening.
    fn next_waiter(&mut self) -> Option<Waiter> {
        while let Some(waiter) = self.waiters.pop_front() {
            if !waiter.is_abandoned() {
                return Some(waiter);
            }
        }
        None
    }

    /// Puts a buffer the client side now holds to use: straight to the oldest
    /// waiter if there is one, otherwise into the free pool.
    ///
    /// `id` must currently be in `from` and at the target geometry.
    pub(crate) fn settle(
        &mut self,
        home: &Arc<VaultShared>,
        id: BufferId,
        from: OwnerState,
        storage: Arc<dyn ClientBuffer>,
        deferred: &mut Deferred,
    ) -> Result<()> {
        let geometry = self
            .ledger
            .lookup(id)
            .map(Entry::geometry)
            .ok_or(VaultError::UnknownBuffer(id))?;

        let Some(waiter) = self.next_waiter() else {
            self.ledger.transition(id, from, Owner::Free(storage))?;
            return Ok(());
        };

        let moved = if from.can_become(OwnerState::CheckedOut) {
            self.ledger.transition(id, from, Owner::CheckedOut).map(drop)
        } else {
            self.ledger
                .transition(id, from, Owner::Free(Arc::clone(&storage)))
                .and_then(|_| {
                    self.ledger
                        .transition(id, OwnerState::Free, Owner::CheckedOut)
                        .map(drop)
                })
        };
        match moved {
            Ok(()) => {
                let buffer = Buffer::new(id, geometry, storage, Arc::downgrade(home));
                deferred.deliveries.push((waiter, buffer));
                Ok(())
            }
            Err(err) => {
                self.waiters.push_front(waiter);
                Err(err)
            }
        }
    }

    /// Drops `id` from the ledger, frees it remotely and requests a
    /// replacement at the target geometry.
    pub(crate) fn retire(&mut self, id: BufferId, deferred: &mut Deferred) {
        self.ledger.remove(id);
        deferred.free(id);
        self.replenish(1, deferred);
    }

    /// Requests `count` allocations at the target geometry, or owes them
    /// until the target becomes valid.
    pub(crate) fn replenish(&mut self, count: usize, deferred: &mut Deferred) {
        if !self.target.is_valid() {
            self.unallocated += count;
            return;
        }
        self.ledger.note_requested(count);
        for _ in 0..count {
            deferred.allocate(self.target);
        }
    }
}

enum RemoteRequest {
    Allocate(Geometry),
    Free(BufferId),
}

/// Work decided under the vault lock and carried out after releasing it.
///
/// Holds [`Buffer`]s, whose drop re-locks the vault, so it must never be
/// dropped while the lock is held.
#[derive(Default)]
pub(crate) struct Deferred {
    remote: Vec<RemoteRequest>,
    deliveries: Vec<(Waiter, Buffer)>,
    cancellations: Vec<Waiter>,
}

impl Deferred {
    pub(crate) fn allocate(&mut self, geometry: Geometry) {
        self.remote.push(RemoteRequest::Allocate(geometry));
    }

    pub(crate) fn free(&mut self, id: BufferId) {
        self.remote.push(RemoteRequest::Free(id));
    }

    pub(crate) fn run(self, requests: &dyn ServerBufferRequests) {
        for request in self.remote {
            match request {
                RemoteRequest::Allocate(geometry) => {
                    debug!(%geometry, "requesting buffer allocation");
                    requests.allocate(geometry);
                }
                RemoteRequest::Free(id) => {
                    debug!(%id, "requesting buffer free");
                    requests.free(id);
                }
            }
        }
        for waiter in self.cancellations {
            waiter.cancel();
        }
        for (waiter, buffer) in self.deliveries {
            let id = buffer.id();
            if !waiter.fulfil(buffer) {
                warn!(%id, "withdraw request abandoned; buffer returned to pool");
            }
        }
    }
}

//! Collaborator traits the vault is constructed with.
//!
//! This module provides the [`ServerBufferRequests`] trait, the fire-and-forget
//! sink for requests to the remote compositor, and [`ClientBufferFactory`],
//! which turns remote packages into renderable local buffers. Both are
//! injected through [`VaultBuilder`](crate::VaultBuilder).

use std::sync::Arc;

use crate::buffer::{BufferId, BufferPackage, ClientBuffer};
use crate::error::ConstructionError;
use crate::geometry::Geometry;

/// Requests the vault sends to the remote compositor.
///
/// All methods are fire-and-forget: their completion is observed only through
/// later inbound deliveries, never through a return value. The vault never
/// calls them while holding its internal lock, so implementations may call
/// back into the vault.
///
/// # Example
///
/// ```rust
/// use bufvault::{BufferId, Geometry, ServerBufferRequests};
///
/// struct Wire;
///
/// impl ServerBufferRequests for Wire {
///     fn allocate(&self, geometry: Geometry) {
///         // serialize an allocation request onto the transport
///         # let _ = geometry;
///     }
///
///     fn free(&self, id: BufferId) {
///         # let _ = id;
///     }
///
///     fn submit(&self, id: BufferId) {
///         # let _ = id;
///     }
/// }
/// ```
pub trait ServerBufferRequests: Send + Sync {
    /// Asks the remote side for a new buffer with the given size, pixel format
    /// and usage.
    fn allocate(&self, geometry: Geometry);

    /// Tells the remote side the client no longer needs `id`.
    fn free(&self, id: BufferId);

    /// Submits the rendered contents of `id` to the compositor.
    fn submit(&self, id: BufferId);
}

/// Builds local buffers from remote packages.
pub trait ClientBufferFactory: Send + Sync {
    /// Produces a local representation for `package`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConstructionError`] if the platform handle is invalid.
    fn create_buffer(
        &self,
        package: &BufferPackage,
    ) -> Result<Arc<dyn ClientBuffer>, ConstructionError>;
}

//! Buffer identity, remote packages and the handle returned by `withdraw`.
//!
//! This module provides the [`Buffer`] type, which represents exclusive client
//! access to a pooled buffer. Depositing a `Buffer` hands it back to the vault
//! for submission; dropping it without depositing returns it to the pool.

use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use crate::geometry::{Geometry, PixelFormat, Size};
use crate::vault::VaultShared;

/// Identifier assigned to a buffer by the remote compositor.
///
/// Unique for the lifetime of a vault and never reused for a different
/// physical buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferId(i32);

impl BufferId {
    /// Wraps a remote buffer id.
    #[must_use]
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Returns the raw id as carried on the wire.
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Platform-specific handle data that accompanies a remote buffer.
///
/// The vault never interprets it; it is passed to the buffer factory as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformHandle {
    /// File descriptors transferred with the buffer.
    pub fds: Vec<i32>,
    /// Opaque platform words.
    pub data: Vec<i32>,
    /// Row stride in bytes.
    pub stride: u32,
    /// Platform flags.
    pub flags: u32,
}

/// A buffer as delivered by the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferPackage {
    /// Remote id.
    pub id: BufferId,
    /// Parameters the remote side allocated the buffer with.
    pub geometry: Geometry,
    /// Platform handle used to build the local representation.
    pub handle: PlatformHandle,
}

impl BufferPackage {
    /// Creates a package.
    #[must_use]
    pub const fn new(id: BufferId, geometry: Geometry, handle: PlatformHandle) -> Self {
        Self {
            id,
            geometry,
            handle,
        }
    }
}

/// Local, renderable representation of a buffer, produced by a
/// [`ClientBufferFactory`](crate::ClientBufferFactory).
pub trait ClientBuffer: Send + Sync + 'static {
    /// Dimensions of the pixel storage.
    fn size(&self) -> Size;

    /// Row stride in bytes.
    fn stride(&self) -> u32;

    /// Pixel layout of the storage.
    fn pixel_format(&self) -> PixelFormat;

    /// Upcast used by [`Buffer::downcast_ref`].
    fn as_any(&self) -> &dyn Any;
}

/// A buffer withdrawn from the vault.
///
/// The holder has exclusive write access until the buffer is passed to
/// [`BufferVault::deposit`](crate::BufferVault::deposit). Dropping it instead
/// returns it to the pool without submitting it.
pub struct Buffer {
    id: BufferId,
    geometry: Geometry,
    storage: Arc<dyn ClientBuffer>,
    home: Weak<VaultShared>,
}

impl Buffer {
    pub(crate) fn new(
        id: BufferId,
        geometry: Geometry,
        storage: Arc<dyn ClientBuffer>,
        home: Weak<VaultShared>,
    ) -> Self {
        Self {
            id,
            geometry,
            storage,
            home,
        }
    }

    /// Returns the remote id of this buffer.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> BufferId {
        self.id
    }

    /// Returns the geometry this buffer was allocated with.
    #[inline]
    #[must_use]
    pub const fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Returns the local representation.
    #[inline]
    #[must_use]
    pub fn local(&self) -> &dyn ClientBuffer {
        self.storage.as_ref()
    }

    /// Returns the local representation as its concrete factory type.
    #[must_use]
    pub fn downcast_ref<T: ClientBuffer>(&self) -> Option<&T> {
        self.storage.as_any().downcast_ref::<T>()
    }

    pub(crate) fn belongs_to(&self, vault: &Arc<VaultShared>) -> bool {
        std::ptr::eq(self.home.as_ptr(), Arc::as_ptr(vault))
    }

    /// Consumes the handle without returning it to the pool.
    pub(crate) fn disarm(mut self) {
        self.home = Weak::new();
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(vault) = self.home.upgrade() {
            vault.release(self.id, Arc::clone(&self.storage));
        }
    }
}

impl Deref for Buffer {
    type Target = dyn ClientBuffer;

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.storage.as_ref()
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &format_args!("{}", self.id))
            .field("geometry", &self.geometry)
            .field("stride", &self.storage.stride())
            .finish_non_exhaustive()
    }
}

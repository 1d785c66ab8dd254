//! # bufvault
//!
//! Client-side bookkeeping for the pool of pixel buffers a rendering client
//! exchanges with a remote compositor over an asynchronous IPC channel.
//!
//! The [`BufferVault`] tracks, at every instant, who owns each buffer: the
//! client's render thread, the wire, or the compositor. It hands out
//! ready-to-render buffers asynchronously and stays consistent while a render
//! thread and an I/O thread drive it concurrently, across resizes and across
//! teardown with deliveries still in flight.
//!
//! ## Features
//!
//! - **Explicit ownership ledger**: every buffer id has exactly one [`OwnerState`]
//! - **FIFO withdrawals**: callers waiting for a buffer are served in call order
//! - **Async and blocking waits**: a [`Withdrawal`] is a `Future`, or can be
//!   waited on from a plain render thread
//! - **Resize handling**: stale buffers are retired and replaced, never handed out
//! - **Safe teardown**: pending withdrawals resolve to [`VaultError::Cancelled`]
//!   and late deliveries through a [`WireEndpoint`] are no-ops
//! - **Injected collaborators**: the remote request sink and the local buffer
//!   factory are traits supplied at construction
//!
//! ## Example
//!
//! ```rust
//! use std::any::Any;
//! use std::sync::Arc;
//! use bufvault::{
//!     BufferId, BufferPackage, ClientBuffer, ClientBufferFactory, ConstructionError,
//!     Geometry, PixelFormat, PlatformHandle, ServerBufferRequests, Size, VaultBuilder,
//! };
//!
//! struct Pixels(Size);
//!
//! impl ClientBuffer for Pixels {
//!     fn size(&self) -> Size { self.0 }
//!     fn stride(&self) -> u32 { self.0.width * 4 }
//!     fn pixel_format(&self) -> PixelFormat { PixelFormat::Abgr8888 }
//!     fn as_any(&self) -> &dyn Any { self }
//! }
//!
//! struct Factory;
//!
//! impl ClientBufferFactory for Factory {
//!     fn create_buffer(
//!         &self,
//!         package: &BufferPackage,
//!     ) -> Result<Arc<dyn ClientBuffer>, ConstructionError> {
//!         Ok(Arc::new(Pixels(package.geometry.size)))
//!     }
//! }
//!
//! struct Wire;
//!
//! impl ServerBufferRequests for Wire {
//!     fn allocate(&self, _geometry: Geometry) {}
//!     fn free(&self, _id: BufferId) {}
//!     fn submit(&self, _id: BufferId) {}
//! }
//!
//! # fn main() -> bufvault::Result<()> {
//! let vault = VaultBuilder::new(Arc::new(Factory), Arc::new(Wire))
//!     .size(Size::new(100, 100))
//!     .pixel_format(PixelFormat::Abgr8888)
//!     .initial_nbuffers(1)
//!     .build();
//!
//! // Nothing has arrived yet, so the request waits.
//! let mut withdrawal = vault.withdraw();
//! assert!(withdrawal.try_take().is_none());
//!
//! // The I/O thread delivers the allocated buffer.
//! let package = BufferPackage::new(BufferId::new(1), vault.geometry(), PlatformHandle::default());
//! vault.wire_transfer_inbound(package)?;
//!
//! let buffer = withdrawal.try_take().expect("delivered")?;
//! assert_eq!(buffer.size(), Size::new(100, 100));
//!
//! // Render, then hand it back for submission.
//! vault.deposit(buffer)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_code)]

mod buffer;
mod error;
mod geometry;
mod ledger;
mod requests;
mod vault;
mod wire;
mod withdrawal;

#[cfg(test)]
mod testing;

pub use buffer::{Buffer, BufferId, BufferPackage, ClientBuffer, PlatformHandle};
pub use error::{ConstructionError, Result, VaultError};
pub use geometry::{BufferUsage, Geometry, PixelFormat, Size};
pub use ledger::{OwnerState, OwnershipCensus};
pub use requests::{ClientBufferFactory, ServerBufferRequests};
pub use vault::{BufferVault, ConstructionPolicy, VaultBuilder};
pub use wire::WireEndpoint;
pub use withdrawal::Withdrawal;

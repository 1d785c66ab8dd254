//! Test doubles shared by the unit tests.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;

use parking_lot::Mutex;

use crate::{
    BufferId, BufferPackage, BufferUsage, BufferVault, ClientBuffer, ClientBufferFactory,
    ConstructionError, ConstructionPolicy, Geometry, PixelFormat, PlatformHandle, Result,
    ServerBufferRequests, Size, VaultBuilder,
};

pub(crate) fn geometry(width: u32, height: u32) -> Geometry {
    Geometry::new(Size::new(width, height), PixelFormat::Abgr8888, BufferUsage(0))
}

pub(crate) fn package(raw: i32, geometry: Geometry) -> BufferPackage {
    BufferPackage::new(
        BufferId::new(raw),
        geometry,
        PlatformHandle {
            fds: vec![raw + 100],
            stride: geometry.size.width * geometry.format.bytes_per_pixel(),
            ..PlatformHandle::default()
        },
    )
}

/// A package whose handle the test factory refuses.
pub(crate) fn broken_package(raw: i32, geometry: Geometry) -> BufferPackage {
    let mut package = package(raw, geometry);
    package.handle.fds = vec![-1];
    package
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Request {
    Allocate(Geometry),
    Free(BufferId),
    Submit(BufferId),
}

#[derive(Default)]
pub(crate) struct RecordingRequests {
    log: Mutex<Vec<Request>>,
}

impl RecordingRequests {
    pub(crate) fn log(&self) -> Vec<Request> {
        self.log.lock().clone()
    }

    pub(crate) fn clear(&self) {
        self.log.lock().clear();
    }

    pub(crate) fn allocations(&self) -> Vec<Geometry> {
        self.log()
            .into_iter()
            .filter_map(|r| match r {
                Request::Allocate(g) => Some(g),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn freed(&self) -> Vec<BufferId> {
        self.log()
            .into_iter()
            .filter_map(|r| match r {
                Request::Free(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn submitted(&self) -> Vec<BufferId> {
        self.log()
            .into_iter()
            .filter_map(|r| match r {
                Request::Submit(id) => Some(id),
                _ => None,
            })
            .collect()
    }
}

impl ServerBufferRequests for RecordingRequests {
    fn allocate(&self, geometry: Geometry) {
        self.log.lock().push(Request::Allocate(geometry));
    }

    fn free(&self, id: BufferId) {
        self.log.lock().push(Request::Free(id));
    }

    fn submit(&self, id: BufferId) {
        self.log.lock().push(Request::Submit(id));
    }
}

#[derive(Debug)]
pub(crate) struct TestBuffer {
    pub(crate) serial: i32,
    geometry: Geometry,
}

impl TestBuffer {
    pub(crate) const fn new(serial: i32, geometry: Geometry) -> Self {
        Self { serial, geometry }
    }
}

impl ClientBuffer for TestBuffer {
    fn size(&self) -> Size {
        self.geometry.size
    }

    fn stride(&self) -> u32 {
        self.geometry.size.width * self.geometry.format.bytes_per_pixel()
    }

    fn pixel_format(&self) -> PixelFormat {
        self.geometry.format
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) struct TestFactory;

impl ClientBufferFactory for TestFactory {
    fn create_buffer(
        &self,
        package: &BufferPackage,
    ) -> std::result::Result<Arc<dyn ClientBuffer>, ConstructionError> {
        if package.handle.fds.iter().any(|fd| *fd < 0) {
            return Err(ConstructionError::new("invalid fd"));
        }
        Ok(Arc::new(TestBuffer::new(package.id.as_raw(), package.geometry)))
    }
}

/// Counts how often the vault asks for a local buffer.
#[derive(Default)]
pub(crate) struct CountingFactory {
    calls: AtomicUsize,
}

impl CountingFactory {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ClientBufferFactory for CountingFactory {
    fn create_buffer(
        &self,
        package: &BufferPackage,
    ) -> std::result::Result<Arc<dyn ClientBuffer>, ConstructionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        TestFactory.create_buffer(package)
    }
}

/// Stalls construction of one id until the test opens the [`Gate`].
pub(crate) struct GatedFactory {
    gated: BufferId,
    entered: Mutex<mpsc::Sender<()>>,
    proceed: Mutex<mpsc::Receiver<()>>,
}

pub(crate) struct Gate {
    entered: mpsc::Receiver<()>,
    proceed: mpsc::Sender<()>,
}

impl GatedFactory {
    pub(crate) fn new(gated: i32) -> (Self, Gate) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (proceed_tx, proceed_rx) = mpsc::channel();
        let factory = Self {
            gated: BufferId::new(gated),
            entered: Mutex::new(entered_tx),
            proceed: Mutex::new(proceed_rx),
        };
        let gate = Gate {
            entered: entered_rx,
            proceed: proceed_tx,
        };
        (factory, gate)
    }
}

impl ClientBufferFactory for GatedFactory {
    fn create_buffer(
        &self,
        package: &BufferPackage,
    ) -> std::result::Result<Arc<dyn ClientBuffer>, ConstructionError> {
        if package.id == self.gated {
            self.entered.lock().send(()).unwrap();
            self.proceed.lock().recv().unwrap();
        }
        TestFactory.create_buffer(package)
    }
}

impl Gate {
    /// Blocks until the gated construction has started.
    pub(crate) fn wait_entered(&self) {
        self.entered.recv().unwrap();
    }

    pub(crate) fn open(&self) {
        self.proceed.send(()).unwrap();
    }
}

pub(crate) struct Harness {
    pub(crate) vault: BufferVault,
    pub(crate) requests: Arc<RecordingRequests>,
}

impl Harness {
    pub(crate) fn new(geometry: Geometry, initial_nbuffers: usize) -> Self {
        Self::with_policy(geometry, initial_nbuffers, ConstructionPolicy::default())
    }

    pub(crate) fn with_policy(
        geometry: Geometry,
        initial_nbuffers: usize,
        policy: ConstructionPolicy,
    ) -> Self {
        Self::build(Arc::new(TestFactory), geometry, initial_nbuffers, policy)
    }

    pub(crate) fn with_factory(
        factory: Arc<dyn ClientBufferFactory>,
        geometry: Geometry,
        initial_nbuffers: usize,
    ) -> Self {
        Self::build(factory, geometry, initial_nbuffers, ConstructionPolicy::default())
    }

    fn build(
        factory: Arc<dyn ClientBufferFactory>,
        geometry: Geometry,
        initial_nbuffers: usize,
        policy: ConstructionPolicy,
    ) -> Self {
        let requests = Arc::new(RecordingRequests::default());
        let vault = VaultBuilder::new(factory, requests.clone())
            .geometry(geometry)
            .initial_nbuffers(initial_nbuffers)
            .construction_policy(policy)
            .build();
        Self { vault, requests }
    }

    pub(crate) fn try_deliver(&self, raw: i32, geometry: Geometry) -> Result<()> {
        self.vault.wire_transfer_inbound(package(raw, geometry))
    }

    pub(crate) fn deliver(&self, raw: i32, geometry: Geometry) {
        self.try_deliver(raw, geometry).unwrap();
    }
}

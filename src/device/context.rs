use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::{BackendKind, ContextConfig};
use crate::error::{Result, StagingError};
use crate::kernel::{ElementwiseFn, ElementwiseKernel, Program, Target, compile};
use crate::tensor::{DataType, HostArray, TensorDesc};

use super::backend::{BufferId, DeviceBackend, DeviceInfo, Launch};
use super::buffer::DeviceBuffer;
use super::emulated::EmulatedDevice;

enum BackendSlot {
    Pending,
    Ready(Arc<dyn DeviceBackend>),
    Shutdown,
}

/// Snapshot of the copies and launches a context has performed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub host_to_device_bytes: u64,
    pub host_to_device_copies: u64,
    pub device_to_host_bytes: u64,
    pub device_to_host_copies: u64,
    pub kernel_launches: u64,
}

impl TransferStats {
    pub fn total_copies(&self) -> u64 {
        self.host_to_device_copies + self.device_to_host_copies
    }

    pub fn total_bytes(&self) -> u64 {
        self.host_to_device_bytes + self.device_to_host_bytes
    }
}

#[derive(Default)]
struct TransferCounters {
    h2d_bytes: AtomicU64,
    h2d_copies: AtomicU64,
    d2h_bytes: AtomicU64,
    d2h_copies: AtomicU64,
    launches: AtomicU64,
}

struct ContextInner {
    config: ContextConfig,
    slot: RwLock<BackendSlot>,
    counters: TransferCounters,
}

/// Explicit handle to one accelerator.
///
/// Cloning is cheap and yields another handle to the same device. The backend is brought up
/// on first use and torn down by [`shutdown`](Self::shutdown); there is no process-wide
/// current device.
#[derive(Clone)]
pub struct DeviceContext {
    inner: Arc<ContextInner>,
}

impl DeviceContext {
    pub fn new(config: ContextConfig) -> Result<Self> {
        let config = config.build()?;
        Ok(Self::from_slot(config, BackendSlot::Pending))
    }

    /// Context over an already constructed backend.
    pub fn with_backend(config: ContextConfig, backend: Arc<dyn DeviceBackend>) -> Result<Self> {
        let config = config.build()?;
        info!("Device context attached to {}", backend.info());
        Ok(Self::from_slot(config, BackendSlot::Ready(backend)))
    }

    /// Emulated device of `capacity_bytes` with the whole capacity usable.
    pub fn emulated(capacity_bytes: u64) -> Result<Self> {
        Self::new(ContextConfig::emulated(capacity_bytes))
    }

    fn from_slot(config: ContextConfig, slot: BackendSlot) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                config,
                slot: RwLock::new(slot),
                counters: TransferCounters::default(),
            }),
        }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.inner.config
    }

    pub fn is_initialized(&self) -> bool {
        matches!(*self.inner.slot.read(), BackendSlot::Ready(_))
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(*self.inner.slot.read(), BackendSlot::Shutdown)
    }

    pub fn same_context(&self, other: &DeviceContext) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn backend(&self) -> Result<Arc<dyn DeviceBackend>> {
        match &*self.inner.slot.read() {
            BackendSlot::Ready(backend) => return Ok(backend.clone()),
            BackendSlot::Shutdown => return Err(StagingError::ContextShutdown),
            BackendSlot::Pending => {}
        }

        let mut slot = self.inner.slot.write();
        match &*slot {
            BackendSlot::Ready(backend) => Ok(backend.clone()),
            BackendSlot::Shutdown => Err(StagingError::ContextShutdown),
            BackendSlot::Pending => {
                let backend = create_backend(&self.inner.config)?;
                info!("Device context initialised on {}", backend.info());
                *slot = BackendSlot::Ready(backend.clone());
                Ok(backend)
            }
        }
    }

    /// Tear the device down. Memory of buffers still alive is reclaimed with it and any
    /// later operation on this context fails with `ContextShutdown`.
    pub fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.inner.slot.write(), BackendSlot::Shutdown);
        if let BackendSlot::Ready(backend) = previous {
            let leaked = backend.memory_in_use();
            if leaked > 0 {
                warn!(
                    "Shutting down device context with {} bytes still allocated",
                    leaked
                );
            }
            info!("Device context shut down");
        }
    }

    pub fn device_info(&self) -> Result<DeviceInfo> {
        Ok(self.backend()?.info())
    }

    pub fn memory_in_use(&self) -> Result<u64> {
        Ok(self.backend()?.memory_in_use())
    }

    pub fn stats(&self) -> TransferStats {
        let c = &self.inner.counters;
        TransferStats {
            host_to_device_bytes: c.h2d_bytes.load(Ordering::Relaxed),
            host_to_device_copies: c.h2d_copies.load(Ordering::Relaxed),
            device_to_host_bytes: c.d2h_bytes.load(Ordering::Relaxed),
            device_to_host_copies: c.d2h_copies.load(Ordering::Relaxed),
            kernel_launches: c.launches.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        let c = &self.inner.counters;
        for counter in [
            &c.h2d_bytes,
            &c.h2d_copies,
            &c.d2h_bytes,
            &c.d2h_copies,
            &c.launches,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Uninitialised device buffer; contents are unspecified until written.
    pub fn allocate(&self, shape: &[usize], data_type: DataType) -> Result<DeviceBuffer> {
        let desc = TensorDesc::new(shape, data_type)?;
        self.allocate_desc(desc)
    }

    pub fn allocate_like(&self, host: &HostArray) -> Result<DeviceBuffer> {
        self.allocate_desc(host.desc().clone())
    }

    pub(crate) fn allocate_desc(&self, desc: TensorDesc) -> Result<DeviceBuffer> {
        let id = self.backend()?.allocate(desc.size_in_bytes())?;
        debug!("Allocated device buffer {} for {}", id, desc);
        Ok(DeviceBuffer::new(self.clone(), desc, id))
    }

    /// Copy a host array into a new device buffer of the same shape and dtype.
    pub fn upload(&self, host: &HostArray) -> Result<DeviceBuffer> {
        let mut buffer = self.allocate_like(host)?;
        buffer.copy_from_host(host)?;
        Ok(buffer)
    }

    /// Compile `func` for this device.
    pub fn vectorize(&self, func: &ElementwiseFn) -> Result<ElementwiseKernel> {
        compile(func, Target::Device(self.clone()))
    }

    pub(crate) fn write_to_device(&self, id: BufferId, data: &[u8]) -> Result<()> {
        let backend = self.backend()?;
        self.with_retries(|| backend.write(id, data))?;

        let c = &self.inner.counters;
        c.h2d_bytes.fetch_add(data.len() as u64, Ordering::Relaxed);
        c.h2d_copies.fetch_add(1, Ordering::Relaxed);
        debug!("Copied {} bytes host -> device buffer {}", data.len(), id);
        Ok(())
    }

    pub(crate) fn read_from_device(&self, id: BufferId, out: &mut [u8]) -> Result<()> {
        let backend = self.backend()?;
        self.with_retries(|| backend.read(id, out))?;

        let c = &self.inner.counters;
        c.d2h_bytes.fetch_add(out.len() as u64, Ordering::Relaxed);
        c.d2h_copies.fetch_add(1, Ordering::Relaxed);
        debug!("Copied {} bytes device buffer {} -> host", out.len(), id);
        Ok(())
    }

    pub(crate) fn launch(
        &self,
        program: &Program,
        data_type: DataType,
        inputs: &[BufferId],
        output: BufferId,
        len: usize,
    ) -> Result<()> {
        self.backend()?.launch(&Launch {
            program,
            data_type,
            inputs,
            output,
            len,
        })?;

        self.inner.counters.launches.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Releasing after shutdown is a no-op: teardown already reclaimed the memory.
    pub(crate) fn release(&self, id: BufferId) -> Result<()> {
        let backend = match &*self.inner.slot.read() {
            BackendSlot::Ready(backend) => backend.clone(),
            BackendSlot::Pending | BackendSlot::Shutdown => return Ok(()),
        };

        backend.release(id)?;
        debug!("Released device buffer {}", id);
        Ok(())
    }

    fn with_retries<T>(&self, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let retries = self.inner.config.transfer_retries;
        let mut attempt = 0;

        loop {
            match op() {
                Err(err @ StagingError::Transfer { .. }) if attempt < retries => {
                    attempt += 1;
                    warn!("{} (retry {}/{})", err, attempt, retries);
                }
                other => return other,
            }
        }
    }
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.inner.slot.read() {
            BackendSlot::Pending => "pending".to_string(),
            BackendSlot::Ready(backend) => backend.info().to_string(),
            BackendSlot::Shutdown => "shut down".to_string(),
        };
        f.debug_struct("DeviceContext")
            .field("backend", &self.inner.config.backend)
            .field("state", &state)
            .finish()
    }
}

fn create_backend(config: &ContextConfig) -> Result<Arc<dyn DeviceBackend>> {
    match config.backend {
        BackendKind::Emulated { .. } => Ok(Arc::new(EmulatedDevice::new(
            config.emulated_capacity(),
            config.memory_fraction,
            config.parallel_threshold,
        ))),
        #[cfg(feature = "vulkan")]
        BackendKind::Vulkan { device_index } => Ok(Arc::new(crate::gpu::VulkanDevice::new(
            device_index,
            config.memory_fraction,
        )?)),
        #[cfg(not(feature = "vulkan"))]
        BackendKind::Vulkan { .. } => Err(StagingError::InvalidConfig(
            "Vulkan backend requested but built without the `vulkan` feature".to_string(),
        )),
    }
}

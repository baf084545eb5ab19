use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Result, StagingError, TransferDirection};
use crate::kernel::Program;
use crate::tensor::{Scalar, for_dtype};

use super::backend::{BufferId, DeviceBackend, DeviceInfo, Launch};
use super::memory_tracker::MemoryTracker;

/// Device memory is held as 8-byte words so any supported scalar can be viewed in place.
struct Allocation {
    words: Vec<u64>,
    len: usize,
}

impl Allocation {
    fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.words)[..self.len]
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[..self.len]
    }

    fn typed<T: Scalar>(&self, len: usize) -> &[T] {
        &bytemuck::cast_slice::<u64, T>(&self.words)[..len]
    }

    fn typed_mut<T: Scalar>(&mut self, len: usize) -> &mut [T] {
        &mut bytemuck::cast_slice_mut::<u64, T>(&mut self.words)[..len]
    }
}

/// An accelerator simulated in a separate, budgeted memory arena.
///
/// Host code can only reach its memory through `write`/`read`, kernels run data-parallel on
/// the rayon pool, and faults can be injected to exercise the error paths of a real device.
pub struct EmulatedDevice {
    name: String,
    total_memory: u64,
    tracker: MemoryTracker,
    buffers: Mutex<HashMap<BufferId, Allocation>>,
    next_id: AtomicU64,
    online: AtomicBool,
    pending_faults: AtomicU32,
    parallel_threshold: usize,
}

impl EmulatedDevice {
    pub fn new(total_memory: u64, memory_fraction: f64, parallel_threshold: usize) -> Self {
        let budget = (total_memory as f64 * memory_fraction) as u64;

        debug!(
            "Emulated device: {} bytes total, {} bytes budget",
            total_memory, budget
        );

        Self {
            name: "Emulated accelerator".to_string(),
            total_memory,
            tracker: MemoryTracker::new(budget),
            buffers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            online: AtomicBool::new(true),
            pending_faults: AtomicU32::new(0),
            parallel_threshold,
        }
    }

    /// Simulate losing (or regaining) the device. While offline every copy fails with a
    /// transfer error and every launch fails.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Make the next `count` copies fail with a transfer error.
    pub fn inject_transfer_faults(&self, count: u32) {
        self.pending_faults.store(count, Ordering::Release);
    }

    pub fn live_allocations(&self) -> usize {
        self.buffers.lock().len()
    }

    fn check_transfer(&self, direction: TransferDirection, bytes: usize) -> Result<()> {
        if !self.is_online() {
            return Err(StagingError::Transfer {
                direction,
                bytes,
                reason: "device unavailable".to_string(),
            });
        }

        let faulted = self
            .pending_faults
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();

        if faulted {
            return Err(StagingError::Transfer {
                direction,
                bytes,
                reason: "injected fault".to_string(),
            });
        }

        Ok(())
    }

    fn run<T: Scalar>(
        &self,
        buffers: &HashMap<BufferId, Allocation>,
        launch: &Launch<'_>,
        output: &mut Allocation,
    ) -> Result<()> {
        let inputs = launch
            .inputs
            .iter()
            .map(|id| {
                buffers
                    .get(id)
                    .map(|a| a.typed::<T>(launch.len))
                    .ok_or_else(|| unknown_buffer(*id))
            })
            .collect::<Result<Vec<&[T]>>>()?;

        launch.program.execute::<T>(
            &inputs,
            output.typed_mut::<T>(launch.len),
            self.parallel_threshold,
        );

        Ok(())
    }
}

fn unknown_buffer(id: BufferId) -> StagingError {
    StagingError::Backend(format!("unknown device buffer id {}", id))
}

fn size_mismatch(id: BufferId, expected: usize, found: usize) -> StagingError {
    StagingError::Backend(format!(
        "buffer {} holds {} bytes, copy was {} bytes",
        id, expected, found
    ))
}

impl DeviceBackend for EmulatedDevice {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            name: self.name.clone(),
            backend: "emulated",
            total_memory: self.total_memory,
            budget: self.tracker.get_maximum(),
        }
    }

    fn memory_in_use(&self) -> u64 {
        self.tracker.get_current()
    }

    fn allocate(&self, bytes: usize) -> Result<BufferId> {
        self.tracker.try_allocate(bytes as u64)?;

        let mut words = Vec::new();
        if words.try_reserve_exact(bytes.div_ceil(8)).is_err() {
            self.tracker.deallocate(bytes as u64);
            return Err(StagingError::Allocation {
                requested: bytes as u64,
                in_use: self.tracker.get_current(),
                capacity: self.tracker.get_maximum(),
            });
        }
        words.resize(bytes.div_ceil(8), 0u64);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.buffers.lock().insert(id, Allocation { words, len: bytes });

        Ok(id)
    }

    fn release(&self, id: BufferId) -> Result<()> {
        let allocation = self.buffers.lock().remove(&id).ok_or_else(|| unknown_buffer(id))?;
        self.tracker.deallocate(allocation.len as u64);
        Ok(())
    }

    fn write(&self, id: BufferId, data: &[u8]) -> Result<()> {
        self.check_transfer(TransferDirection::HostToDevice, data.len())?;

        let mut buffers = self.buffers.lock();
        let allocation = buffers.get_mut(&id).ok_or_else(|| unknown_buffer(id))?;
        if allocation.len != data.len() {
            return Err(size_mismatch(id, allocation.len, data.len()));
        }

        allocation.bytes_mut().copy_from_slice(data);
        Ok(())
    }

    fn read(&self, id: BufferId, out: &mut [u8]) -> Result<()> {
        self.check_transfer(TransferDirection::DeviceToHost, out.len())?;

        let buffers = self.buffers.lock();
        let allocation = buffers.get(&id).ok_or_else(|| unknown_buffer(id))?;
        if allocation.len != out.len() {
            return Err(size_mismatch(id, allocation.len, out.len()));
        }

        out.copy_from_slice(allocation.bytes());
        Ok(())
    }

    fn check_program(&self, _program: &Program) -> Result<()> {
        // every lowered program can run here
        Ok(())
    }

    fn launch(&self, launch: &Launch<'_>) -> Result<()> {
        if !self.is_online() {
            return Err(StagingError::Backend(
                "kernel launch failed: device unavailable".to_string(),
            ));
        }

        if launch.inputs.contains(&launch.output) {
            return Err(StagingError::Backend(
                "kernel output aliases one of its inputs".to_string(),
            ));
        }

        let needed = launch.len * launch.data_type.size_in_bytes();

        let mut buffers = self.buffers.lock();
        for id in launch.inputs {
            let held = buffers.get(id).ok_or_else(|| unknown_buffer(*id))?.len;
            if held < needed {
                return Err(size_mismatch(*id, held, needed));
            }
        }

        // take the output out of the map so inputs can be borrowed alongside it
        let mut output = buffers
            .remove(&launch.output)
            .ok_or_else(|| unknown_buffer(launch.output))?;

        let result = if output.len < needed {
            Err(size_mismatch(launch.output, output.len, needed))
        } else {
            for_dtype!(launch.data_type, T => self.run::<T>(&buffers, launch, &mut output))
        };

        buffers.insert(launch.output, output);
        result
    }
}

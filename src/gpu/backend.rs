use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::device::memory_tracker::MemoryTracker;
use crate::device::{BufferId, DeviceBackend, DeviceInfo, Launch};
use crate::error::{Result, StagingError};
use crate::kernel::{BinaryOp, Program};
use crate::tensor::DataType;

use super::gpu_memory::GpuMemory;
use super::vk_gpu::Gpu;

/// Vulkan compute backend.
///
/// Runs only the precompiled `f32` add, sub and mul kernels. Any other program is refused
/// when it is compiled for this device; operands of another dtype are refused at launch.
pub struct VulkanDevice {
    // dropped before `gpu` so buffers are destroyed while the device is alive
    buffers: Mutex<HashMap<BufferId, GpuMemory>>,
    gpu: Gpu,
    tracker: MemoryTracker,
    next_id: AtomicU64,
}

impl VulkanDevice {
    pub fn new(device_index: usize, memory_fraction: f64) -> Result<Self> {
        let gpu = Gpu::new(device_index)?;
        let budget = (gpu.total_memory() as f64 * memory_fraction) as u64;

        Ok(Self {
            buffers: Mutex::new(HashMap::new()),
            gpu,
            tracker: MemoryTracker::new(budget),
            next_id: AtomicU64::new(1),
        })
    }

    fn supported_op(&self, program: &Program) -> Option<BinaryOp> {
        program
            .as_binary()
            .filter(|op| self.gpu.compute_pipelines().supports(*op))
    }
}

fn ensure_f32(data_type: DataType) -> Result<()> {
    if data_type != DataType::F32 {
        return Err(StagingError::Unsupported(format!(
            "Vulkan backend has no {} kernels",
            data_type
        )));
    }
    Ok(())
}

fn unknown_buffer(id: BufferId) -> StagingError {
    StagingError::Backend(format!("unknown device buffer id {}", id))
}

impl DeviceBackend for VulkanDevice {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            name: self.gpu.name().to_string(),
            backend: "vulkan",
            total_memory: self.gpu.total_memory(),
            budget: self.tracker.get_maximum(),
        }
    }

    fn memory_in_use(&self) -> u64 {
        self.tracker.get_current()
    }

    fn allocate(&self, bytes: usize) -> Result<BufferId> {
        self.tracker.try_allocate(bytes as u64)?;

        let memory = match self.gpu.allocate_memory(bytes as u64) {
            Ok(memory) => memory,
            Err(StagingError::Vulkan(reason)) => {
                self.tracker.deallocate(bytes as u64);
                debug!("Vulkan allocation of {} bytes failed: {}", bytes, reason);
                return Err(StagingError::Allocation {
                    requested: bytes as u64,
                    in_use: self.tracker.get_current(),
                    capacity: self.tracker.get_maximum(),
                });
            }
            Err(e) => {
                self.tracker.deallocate(bytes as u64);
                return Err(e);
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.buffers.lock().insert(id, memory);
        Ok(id)
    }

    fn release(&self, id: BufferId) -> Result<()> {
        let memory = self
            .buffers
            .lock()
            .remove(&id)
            .ok_or_else(|| unknown_buffer(id))?;
        self.tracker.deallocate(memory.size);
        Ok(())
    }

    fn write(&self, id: BufferId, data: &[u8]) -> Result<()> {
        let buffers = self.buffers.lock();
        buffers
            .get(&id)
            .ok_or_else(|| unknown_buffer(id))?
            .copy_into(data)
    }

    fn read(&self, id: BufferId, out: &mut [u8]) -> Result<()> {
        let buffers = self.buffers.lock();
        buffers
            .get(&id)
            .ok_or_else(|| unknown_buffer(id))?
            .read_into(out)
    }

    fn check_program(&self, program: &Program) -> Result<()> {
        match self.supported_op(program) {
            Some(_) => Ok(()),
            None => Err(StagingError::Unsupported(format!(
                "Vulkan backend only runs plain float32 add, sub and mul kernels, got {:?}",
                program.instrs()
            ))),
        }
    }

    fn launch(&self, launch: &Launch<'_>) -> Result<()> {
        ensure_f32(launch.data_type)?;

        let op = self.supported_op(launch.program).ok_or_else(|| {
            StagingError::Unsupported("program was not compiled for this device".to_string())
        })?;
        let pipeline = self
            .gpu
            .compute_pipelines()
            .get(op)
            .ok_or_else(|| StagingError::Unsupported(format!("no pipeline for {:?}", op)))?;

        let total = u32::try_from(launch.len).map_err(|_| {
            StagingError::Unsupported(format!(
                "{} elements exceed a single Vulkan dispatch",
                launch.len
            ))
        })?;

        let [src1, src2] = launch.inputs else {
            return Err(StagingError::Backend(format!(
                "binary kernel launched with {} inputs",
                launch.inputs.len()
            )));
        };

        let buffers = self.buffers.lock();
        let get = |id: &BufferId| buffers.get(id).ok_or_else(|| unknown_buffer(*id));
        self.gpu
            .dispatch_binary(pipeline, get(src1)?, get(src2)?, get(&launch.output)?, total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_float32_launches() {
        ensure_f32(DataType::F32).unwrap();
        for data_type in [DataType::F64, DataType::I32, DataType::I64] {
            assert!(matches!(
                ensure_f32(data_type),
                Err(StagingError::Unsupported(msg)) if msg.contains(&data_type.to_string())
            ));
        }
    }
}

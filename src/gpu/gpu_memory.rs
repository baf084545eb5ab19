use std::sync::Arc;

use vulkanalia::{Device, vk, vk::DeviceV1_0};

use crate::error::{Result, StagingError, TransferDirection};

/// A host-visible, host-coherent storage buffer and its backing memory.
pub struct GpuMemory {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    device: Arc<Device>,
}

impl GpuMemory {
    pub fn new(
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        size: vk::DeviceSize,
        device: Arc<Device>,
    ) -> Self {
        Self {
            buffer,
            memory,
            size,
            device,
        }
    }

    fn check_len(&self, direction: TransferDirection, len: usize) -> Result<()> {
        if len as vk::DeviceSize != self.size {
            return Err(StagingError::Transfer {
                direction,
                bytes: len,
                reason: format!("buffer holds {} bytes", self.size),
            });
        }
        Ok(())
    }

    /// Copy raw bytes into GPU memory.
    pub fn copy_into(&self, data: &[u8]) -> Result<()> {
        self.check_len(TransferDirection::HostToDevice, data.len())?;

        unsafe {
            let data_ptr = self
                .device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .map_err(|e| StagingError::Transfer {
                    direction: TransferDirection::HostToDevice,
                    bytes: data.len(),
                    reason: format!("map_memory: {:?}", e),
                })? as *mut u8;

            std::ptr::copy_nonoverlapping(data.as_ptr(), data_ptr, data.len());

            self.device.unmap_memory(self.memory);
        }

        Ok(())
    }

    /// Read raw bytes from GPU memory into `out`.
    pub fn read_into(&self, out: &mut [u8]) -> Result<()> {
        self.check_len(TransferDirection::DeviceToHost, out.len())?;

        unsafe {
            let data_ptr = self
                .device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .map_err(|e| StagingError::Transfer {
                    direction: TransferDirection::DeviceToHost,
                    bytes: out.len(),
                    reason: format!("map_memory: {:?}", e),
                })? as *const u8;

            std::ptr::copy_nonoverlapping(data_ptr, out.as_mut_ptr(), out.len());

            self.device.unmap_memory(self.memory);
        }

        Ok(())
    }
}

impl Drop for GpuMemory {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

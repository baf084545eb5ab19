use std::fmt::{Debug, Formatter, Result as FmtResult};

use tracing::warn;

use crate::error::{Result, StagingError};
use crate::tensor::{DataType, HostArray, TensorDesc};

use super::backend::BufferId;
use super::context::DeviceContext;

/// An array resident in accelerator memory.
///
/// The buffer owns its allocation: it is released by [`free`](Self::free) or, failing that, on
/// drop. After `free` the handle stays around so misuse can be reported instead of silently
/// touching released memory.
pub struct DeviceBuffer {
    ctx: DeviceContext,
    desc: TensorDesc,
    id: BufferId,
    freed: bool,
}

impl DeviceBuffer {
    pub(crate) fn new(ctx: DeviceContext, desc: TensorDesc, id: BufferId) -> Self {
        Self {
            ctx,
            desc,
            id,
            freed: false,
        }
    }

    pub fn desc(&self) -> &TensorDesc {
        &self.desc
    }

    pub fn shape(&self) -> &[usize] {
        self.desc.shape()
    }

    pub fn data_type(&self) -> DataType {
        self.desc.data_type()
    }

    pub fn len(&self) -> usize {
        self.desc.num_elements()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size_in_bytes(&self) -> usize {
        self.desc.size_in_bytes()
    }

    pub fn is_freed(&self) -> bool {
        self.freed
    }

    pub fn context(&self) -> &DeviceContext {
        &self.ctx
    }

    pub(crate) fn live_id(&self) -> Result<BufferId> {
        if self.freed {
            return Err(StagingError::UseAfterFree {
                desc: self.desc.clone(),
            });
        }
        Ok(self.id)
    }

    /// Copy the device contents into a new host array.
    pub fn download(&self) -> Result<HostArray> {
        let mut host = HostArray::zeros_like(&self.desc);
        self.copy_to_host(&mut host)?;
        Ok(host)
    }

    /// Copy the device contents into an existing host array of the same shape and dtype.
    pub fn copy_to_host(&self, host: &mut HostArray) -> Result<()> {
        let id = self.live_id()?;
        self.desc.expect_matches(host.desc())?;
        self.ctx.read_from_device(id, host.as_bytes_mut())
    }

    /// Overwrite the device contents with a host array of the same shape and dtype.
    pub fn copy_from_host(&mut self, host: &HostArray) -> Result<()> {
        let id = self.live_id()?;
        self.desc.expect_matches(host.desc())?;
        self.ctx.write_to_device(id, host.as_bytes())
    }

    /// Release the device memory now. Freeing twice is an error.
    pub fn free(&mut self) -> Result<()> {
        if self.freed {
            return Err(StagingError::DoubleFree {
                desc: self.desc.clone(),
            });
        }

        self.freed = true;
        self.ctx.release(self.id)
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        if self.freed {
            return;
        }

        if let Err(e) = self.ctx.release(self.id) {
            warn!("Failed to release device buffer {}: {}", self.desc, e);
        }
    }
}

impl Debug for DeviceBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("DeviceBuffer")
            .field("desc", &format_args!("{}", self.desc))
            .field("id", &self.id)
            .field("freed", &self.freed)
            .finish()
    }
}

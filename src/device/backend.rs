use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::error::Result;
use crate::kernel::Program;
use crate::tensor::DataType;

/// Opaque handle to an allocation owned by a backend.
pub type BufferId = u64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub backend: &'static str,
    /// Memory the device reports.
    pub total_memory: u64,
    /// Share of `total_memory` allocations may use.
    pub budget: u64,
}

impl Display for DeviceInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "{} ({}) - {:.2} MB total, {:.2} MB budget",
            self.name,
            self.backend,
            self.total_memory as f64 / (1024.0 * 1024.0),
            self.budget as f64 / (1024.0 * 1024.0)
        )
    }
}

/// One kernel execution: `output[i] = program(inputs[0][i], ..)` for `i < len`.
pub struct Launch<'a> {
    pub program: &'a Program,
    pub data_type: DataType,
    pub inputs: &'a [BufferId],
    pub output: BufferId,
    pub len: usize,
}

/// Accelerator memory and execution. Every call is synchronous: it returns once the
/// copy or kernel has completed on the device.
pub trait DeviceBackend: Send + Sync {
    fn info(&self) -> DeviceInfo;

    fn memory_in_use(&self) -> u64;

    /// Reserve `bytes` of device memory with unspecified contents.
    fn allocate(&self, bytes: usize) -> Result<BufferId>;

    fn release(&self, id: BufferId) -> Result<()>;

    /// Copy `data` into the allocation; `data.len()` must equal the allocation size.
    fn write(&self, id: BufferId, data: &[u8]) -> Result<()>;

    /// Copy the allocation into `out`; `out.len()` must equal the allocation size.
    fn read(&self, id: BufferId, out: &mut [u8]) -> Result<()>;

    /// Called once when a kernel is compiled for this device.
    fn check_program(&self, program: &Program) -> Result<()>;

    fn launch(&self, launch: &Launch<'_>) -> Result<()>;
}

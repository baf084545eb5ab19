mod backend;
mod buffer;
mod context;
mod emulated;
pub(crate) mod memory_tracker;

pub use backend::{BufferId, DeviceBackend, DeviceInfo, Launch};
pub use buffer::DeviceBuffer;
pub use context::{DeviceContext, TransferStats};
pub use emulated::EmulatedDevice;

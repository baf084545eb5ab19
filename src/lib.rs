//! vkstage - Explicit host/device staging for elementwise compute
//!
//! Arrays live either in host memory ([`HostArray`]) or in accelerator memory
//! ([`DeviceBuffer`]). Copies between the two only happen when asked for, so data can be
//! uploaded once and reused by many kernel launches. Elementwise functions are built as small
//! expressions, compiled for a [`Target`] and applied to any mix of host and device operands.
//!
//! ```
//! use vkstage::{DeviceContext, ElementwiseFn, HostArray, Operand};
//!
//! # fn main() -> vkstage::Result<()> {
//! let ctx = DeviceContext::emulated(1 << 20)?;
//! let x = ctx.upload(&HostArray::from_slice(&[1.0f32, 2.0, 3.0])?)?;
//! let y = ctx.upload(&HostArray::from_slice(&[10.0f32, 20.0, 30.0])?)?;
//!
//! let add = ctx.vectorize(&ElementwiseFn::add())?;
//! let sum = add.call(&[Operand::from(&x), Operand::from(&y)])?;
//! assert_eq!(sum.into_host()?.to_vec::<f32>()?, vec![11.0, 22.0, 33.0]);
//! # Ok(())
//! # }
//! ```

pub mod config;

mod device;

mod error;

#[cfg(feature = "vulkan")]
mod gpu;

mod kernel;

mod tensor;

pub use config::{BackendKind, ContextConfig};
pub use device::{
    BufferId, DeviceBackend, DeviceBuffer, DeviceContext, DeviceInfo, EmulatedDevice, Launch,
    TransferStats,
};
pub use error::{Result, StagingError, TransferDirection};
#[cfg(feature = "vulkan")]
pub use gpu::VulkanDevice;
pub use kernel::{
    Array, BinaryOp, ElementwiseFn, ElementwiseKernel, Expr, Instr, Operand, Program, Target,
    UnaryOp, compile,
};
pub use tensor::{DataType, HostArray, HostData, Scalar, TensorDesc};

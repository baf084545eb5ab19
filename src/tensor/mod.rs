mod desc;
mod dtype;
mod host;
mod scalar;

pub use desc::TensorDesc;
pub(crate) use dtype::for_dtype;
pub use dtype::DataType;
pub use host::{HostArray, HostData};
pub use scalar::Scalar;

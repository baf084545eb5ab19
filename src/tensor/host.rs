use crate::error::{Result, StagingError};

use super::{DataType, Scalar, TensorDesc, for_dtype};

/// Typed backing storage of a host array.
#[derive(Clone, Debug)]
pub enum HostData {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I32(Vec<i32>),
    I64(Vec<i64>),
}

impl HostData {
    fn zeros(data_type: DataType, len: usize) -> Self {
        for_dtype!(data_type, T => T::wrap(vec![<T as bytemuck::Zeroable>::zeroed(); len]))
    }

    fn as_bytes(&self) -> &[u8] {
        match self {
            HostData::F32(v) => bytemuck::cast_slice(v),
            HostData::F64(v) => bytemuck::cast_slice(v),
            HostData::I32(v) => bytemuck::cast_slice(v),
            HostData::I64(v) => bytemuck::cast_slice(v),
        }
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        match self {
            HostData::F32(v) => bytemuck::cast_slice_mut(v),
            HostData::F64(v) => bytemuck::cast_slice_mut(v),
            HostData::I32(v) => bytemuck::cast_slice_mut(v),
            HostData::I64(v) => bytemuck::cast_slice_mut(v),
        }
    }
}

/// Fixed-shape, fixed-dtype contiguous array in process memory.
///
/// Equality is bitwise: two arrays are equal when their descriptors match and their bytes
/// are identical, so NaN payloads compare equal to themselves.
#[derive(Clone, Debug)]
pub struct HostArray {
    desc: TensorDesc,
    data: HostData,
}

impl HostArray {
    pub fn from_vec<T: Scalar>(shape: &[usize], data: Vec<T>) -> Result<Self> {
        let desc = TensorDesc::new(shape, T::DTYPE)?;
        if data.len() != desc.num_elements() {
            return Err(StagingError::ByteLength {
                expected: desc.size_in_bytes(),
                found: data.len() * desc.data_type().size_in_bytes(),
                desc,
            });
        }

        Ok(Self {
            desc,
            data: T::wrap(data),
        })
    }

    /// One-dimensional array taking its shape from the data length.
    pub fn from_slice<T: Scalar>(data: &[T]) -> Result<Self> {
        Self::from_vec(&[data.len()], data.to_vec())
    }

    pub fn zeros(shape: &[usize], data_type: DataType) -> Result<Self> {
        let desc = TensorDesc::new(shape, data_type)?;
        let data = HostData::zeros(data_type, desc.num_elements());
        Ok(Self { desc, data })
    }

    pub fn zeros_like(desc: &TensorDesc) -> Self {
        Self {
            desc: desc.clone(),
            data: HostData::zeros(desc.data_type(), desc.num_elements()),
        }
    }

    /// Build from native-endian bytes; the length must equal `product(shape) * sizeof(dtype)`.
    pub fn from_bytes(shape: &[usize], data_type: DataType, bytes: &[u8]) -> Result<Self> {
        let desc = TensorDesc::new(shape, data_type)?;
        let mut array = Self::zeros_like(&desc);
        array.write_bytes(bytes)?;
        Ok(array)
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

    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }

    /// Overwrite the whole array with raw bytes of exactly the array's size.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.size_in_bytes() {
            return Err(StagingError::ByteLength {
                desc: self.desc.clone(),
                expected: self.size_in_bytes(),
                found: bytes.len(),
            });
        }

        self.data.as_bytes_mut().copy_from_slice(bytes);
        Ok(())
    }

    pub(crate) fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_bytes_mut()
    }

    pub fn as_slice<T: Scalar>(&self) -> Result<&[T]> {
        T::view(&self.data).ok_or(StagingError::DtypeMismatch {
            expected: self.desc.data_type(),
            found: T::DTYPE,
        })
    }

    pub fn as_mut_slice<T: Scalar>(&mut self) -> Result<&mut [T]> {
        let data_type = self.desc.data_type();
        T::view_mut(&mut self.data).ok_or(StagingError::DtypeMismatch {
            expected: data_type,
            found: T::DTYPE,
        })
    }

    pub fn to_vec<T: Scalar>(&self) -> Result<Vec<T>> {
        Ok(self.as_slice::<T>()?.to_vec())
    }
}

impl PartialEq for HostArray {
    fn eq(&self, other: &Self) -> bool {
        self.desc == other.desc && self.as_bytes() == other.as_bytes()
    }
}

impl Eq for HostArray {}

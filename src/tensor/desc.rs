use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::error::{Result, StagingError};

use super::DataType;

/// Shape and element type of a host array or device buffer. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TensorDesc {
    shape: Vec<usize>,
    data_type: DataType,
}

impl TensorDesc {
    pub fn new(shape: &[usize], data_type: DataType) -> Result<Self> {
        if shape.is_empty() || shape.contains(&0) {
            return Err(StagingError::InvalidShape(shape.to_vec()));
        }

        // every later size computation relies on this product fitting
        let bytes = shape
            .iter()
            .try_fold(data_type.size_in_bytes(), |acc, &dim| acc.checked_mul(dim))
            .filter(|&bytes| bytes <= isize::MAX as usize);
        if bytes.is_none() {
            return Err(StagingError::InvalidShape(shape.to_vec()));
        }

        Ok(Self {
            shape: shape.to_vec(),
            data_type,
        })
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    // Size in bytes for the tensor given its DataType
    pub fn size_in_bytes(&self) -> usize {
        self.num_elements() * self.data_type.size_in_bytes()
    }

    /// Shape first, then dtype, so the more fundamental mismatch is the one reported.
    pub fn expect_matches(&self, other: &TensorDesc) -> Result<()> {
        if self.shape != other.shape {
            return Err(StagingError::ShapeMismatch {
                expected: self.shape.clone(),
                found: other.shape.clone(),
            });
        }

        if self.data_type != other.data_type {
            return Err(StagingError::DtypeMismatch {
                expected: self.data_type,
                found: other.data_type,
            });
        }

        Ok(())
    }
}

impl Display for TensorDesc {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{:?}:{}", self.shape, self.data_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_zero_dims() {
        assert!(matches!(
            TensorDesc::new(&[], DataType::F32),
            Err(StagingError::InvalidShape(_))
        ));
        assert!(matches!(
            TensorDesc::new(&[4, 0], DataType::F32),
            Err(StagingError::InvalidShape(_))
        ));
    }

    #[test]
    fn rejects_shapes_whose_size_overflows() {
        for (shape, data_type) in [
            (vec![usize::MAX / 2, 4], DataType::F32),
            (vec![1 << 40, 1 << 40], DataType::F64),
            (vec![usize::MAX], DataType::I32),
            (vec![isize::MAX as usize / 4 + 1], DataType::F32),
        ] {
            assert!(matches!(
                TensorDesc::new(&shape, data_type),
                Err(StagingError::InvalidShape(s)) if s == shape
            ));
        }

        let largest = TensorDesc::new(&[isize::MAX as usize / 8], DataType::I64).unwrap();
        assert_eq!(largest.size_in_bytes(), isize::MAX as usize / 8 * 8);
    }

    #[test]
    fn sizes() {
        let desc = TensorDesc::new(&[2, 3, 4], DataType::F64).unwrap();
        assert_eq!(desc.num_elements(), 24);
        assert_eq!(desc.size_in_bytes(), 192);
        assert_eq!(desc.to_string(), "[2, 3, 4]:float64");
    }

    #[test]
    fn shape_checked_before_dtype() {
        let a = TensorDesc::new(&[3], DataType::F32).unwrap();
        let b = TensorDesc::new(&[4], DataType::I32).unwrap();
        assert!(matches!(
            a.expect_matches(&b),
            Err(StagingError::ShapeMismatch { .. })
        ));

        let c = TensorDesc::new(&[3], DataType::I32).unwrap();
        assert!(matches!(
            a.expect_matches(&c),
            Err(StagingError::DtypeMismatch {
                expected: DataType::F32,
                found: DataType::I32
            })
        ));
    }
}

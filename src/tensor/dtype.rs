use std::fmt::{Display, Formatter, Result as FmtResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    F32,
    F64,
    I32,
    I64,
}

impl DataType {
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DataType::F32 | DataType::I32 => 4,
            DataType::F64 | DataType::I64 => 8,
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            DataType::F32 => "float32",
            DataType::F64 => "float64",
            DataType::I32 => "int32",
            DataType::I64 => "int64",
        };
        write!(f, "{}", name)
    }
}

/// Expands `$body` once per dtype with `$T` bound to the matching Rust scalar type.
macro_rules! for_dtype {
    ($dtype:expr, $T:ident => $body:expr) => {
        match $dtype {
            $crate::tensor::DataType::F32 => {
                type $T = f32;
                $body
            }
            $crate::tensor::DataType::F64 => {
                type $T = f64;
                $body
            }
            $crate::tensor::DataType::I32 => {
                type $T = i32;
                $body
            }
            $crate::tensor::DataType::I64 => {
                type $T = i64;
                $body
            }
        }
    };
}

pub(crate) use for_dtype;

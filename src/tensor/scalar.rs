use std::fmt::Debug;

use bytemuck::Pod;

use crate::kernel::{BinaryOp, UnaryOp};

use super::{DataType, host::HostData};

/// Element types a host array or device buffer can hold.
///
/// Every scalar operation is defined once here; host execution and the emulated device both
/// evaluate through these methods.
pub trait Scalar: Pod + Send + Sync + PartialEq + Debug + 'static {
    const DTYPE: DataType;

    /// Saturating conversion used for expression constants.
    fn from_f64(v: f64) -> Self;

    fn unary(op: UnaryOp, a: Self) -> Self;

    fn binary(op: BinaryOp, a: Self, b: Self) -> Self;

    fn wrap(data: Vec<Self>) -> HostData;

    fn view(data: &HostData) -> Option<&[Self]>;

    fn view_mut(data: &mut HostData) -> Option<&mut [Self]>;
}

macro_rules! float_scalar {
    ($t:ty, $dtype:ident) => {
        impl Scalar for $t {
            const DTYPE: DataType = DataType::$dtype;

            fn from_f64(v: f64) -> Self {
                v as $t
            }

            fn unary(op: UnaryOp, a: Self) -> Self {
                match op {
                    UnaryOp::Neg => -a,
                    UnaryOp::Abs => a.abs(),
                    UnaryOp::Sqrt => a.sqrt(),
                    UnaryOp::Exp => a.exp(),
                    UnaryOp::Relu => {
                        if a > 0.0 {
                            a
                        } else {
                            0.0
                        }
                    }
                }
            }

            fn binary(op: BinaryOp, a: Self, b: Self) -> Self {
                match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                    BinaryOp::Min => a.min(b),
                    BinaryOp::Max => a.max(b),
                }
            }

            fn wrap(data: Vec<Self>) -> HostData {
                HostData::$dtype(data)
            }

            fn view(data: &HostData) -> Option<&[Self]> {
                match data {
                    HostData::$dtype(v) => Some(v),
                    _ => None,
                }
            }

            fn view_mut(data: &mut HostData) -> Option<&mut [Self]> {
                match data {
                    HostData::$dtype(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

// Integers wrap on overflow and divide-by-zero yields 0.
// sqrt and exp go through f64 and saturate back.
macro_rules! int_scalar {
    ($t:ty, $dtype:ident) => {
        impl Scalar for $t {
            const DTYPE: DataType = DataType::$dtype;

            fn from_f64(v: f64) -> Self {
                v as $t
            }

            fn unary(op: UnaryOp, a: Self) -> Self {
                match op {
                    UnaryOp::Neg => a.wrapping_neg(),
                    UnaryOp::Abs => a.wrapping_abs(),
                    UnaryOp::Sqrt => (a as f64).sqrt() as $t,
                    UnaryOp::Exp => (a as f64).exp() as $t,
                    UnaryOp::Relu => a.max(0),
                }
            }

            fn binary(op: BinaryOp, a: Self, b: Self) -> Self {
                match op {
                    BinaryOp::Add => a.wrapping_add(b),
                    BinaryOp::Sub => a.wrapping_sub(b),
                    BinaryOp::Mul => a.wrapping_mul(b),
                    BinaryOp::Div => {
                        if b == 0 {
                            0
                        } else {
                            a.wrapping_div(b)
                        }
                    }
                    BinaryOp::Min => a.min(b),
                    BinaryOp::Max => a.max(b),
                }
            }

            fn wrap(data: Vec<Self>) -> HostData {
                HostData::$dtype(data)
            }

            fn view(data: &HostData) -> Option<&[Self]> {
                match data {
                    HostData::$dtype(v) => Some(v),
                    _ => None,
                }
            }

            fn view_mut(data: &mut HostData) -> Option<&mut [Self]> {
                match data {
                    HostData::$dtype(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

float_scalar!(f32, F32);
float_scalar!(f64, F64);
int_scalar!(i32, I32);
int_scalar!(i64, I64);

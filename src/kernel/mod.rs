mod compiler;
mod dispatch;
mod expr;
mod program;

pub use compiler::{Target, compile};
pub use dispatch::{Array, ElementwiseKernel, Operand};
pub use expr::{BinaryOp, ElementwiseFn, Expr, UnaryOp};
pub use program::{Instr, Program};

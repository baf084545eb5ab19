use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::ops::{Add, Div, Mul, Neg, Sub};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Abs,
    Sqrt,
    Exp,
    Relu,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
}

/// Scalar expression over the positional arguments of an elementwise function.
#[derive(Clone, PartialEq)]
pub enum Expr {
    Arg(usize),
    Const(f64),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn arg(index: usize) -> Self {
        Expr::Arg(index)
    }

    pub fn constant(value: f64) -> Self {
        Expr::Const(value)
    }

    pub fn unary(op: UnaryOp, expr: Expr) -> Self {
        Expr::Unary(op, Box::new(expr))
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn abs(self) -> Self {
        Self::unary(UnaryOp::Abs, self)
    }

    pub fn sqrt(self) -> Self {
        Self::unary(UnaryOp::Sqrt, self)
    }

    pub fn exp(self) -> Self {
        Self::unary(UnaryOp::Exp, self)
    }

    pub fn relu(self) -> Self {
        Self::unary(UnaryOp::Relu, self)
    }

    pub fn min(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Min, self, rhs)
    }

    pub fn max(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Max, self, rhs)
    }
}

impl Debug for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Expr::Arg(i) => write!(f, "x{}", i),
            Expr::Const(v) => write!(f, "{}", v),
            Expr::Unary(op, e) => write!(f, "{:?}({:?})", op, e),
            Expr::Binary(op, a, b) => write!(f, "{:?}({:?}, {:?})", op, a, b),
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Debug::fmt(self, f)
    }
}

macro_rules! expr_binop {
    ($trait:ident, $method:ident, $op:ident) => {
        impl $trait for Expr {
            type Output = Expr;

            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary(BinaryOp::$op, self, rhs)
            }
        }
    };
}

expr_binop!(Add, add, Add);
expr_binop!(Sub, sub, Sub);
expr_binop!(Mul, mul, Mul);
expr_binop!(Div, div, Div);

impl Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::unary(UnaryOp::Neg, self)
    }
}

/// A named pure scalar function of `arity` arguments, the input to [`compile`](super::compile).
#[derive(Clone, Debug, PartialEq)]
pub struct ElementwiseFn {
    name: String,
    arity: usize,
    body: Expr,
}

impl ElementwiseFn {
    pub fn new(name: impl Into<String>, arity: usize, body: Expr) -> Self {
        Self {
            name: name.into(),
            arity,
            body,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn body(&self) -> &Expr {
        &self.body
    }

    fn binary(name: &str, op: BinaryOp) -> Self {
        Self::new(name, 2, Expr::binary(op, Expr::arg(0), Expr::arg(1)))
    }

    pub fn add() -> Self {
        Self::binary("add", BinaryOp::Add)
    }

    pub fn sub() -> Self {
        Self::binary("sub", BinaryOp::Sub)
    }

    pub fn mul() -> Self {
        Self::binary("mul", BinaryOp::Mul)
    }

    pub fn div() -> Self {
        Self::binary("div", BinaryOp::Div)
    }

    pub fn min() -> Self {
        Self::binary("min", BinaryOp::Min)
    }

    pub fn max() -> Self {
        Self::binary("max", BinaryOp::Max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operators_build_trees() {
        let e = Expr::arg(0) * Expr::constant(2.0) + -Expr::arg(1);
        assert_eq!(
            e,
            Expr::binary(
                BinaryOp::Add,
                Expr::binary(BinaryOp::Mul, Expr::Arg(0), Expr::Const(2.0)),
                Expr::unary(UnaryOp::Neg, Expr::Arg(1)),
            )
        );
        assert_eq!(format!("{}", e), "Add(Mul(x0, 2), Neg(x1))");
    }

    #[test]
    fn builtin_functions() {
        let add = ElementwiseFn::add();
        assert_eq!(add.name(), "add");
        assert_eq!(add.arity(), 2);
        assert_eq!(add.body(), &(Expr::arg(0) + Expr::arg(1)));
    }
}

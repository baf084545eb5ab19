use rayon::prelude::*;

use crate::error::{Result, StagingError};
use crate::tensor::Scalar;

use super::expr::{BinaryOp, ElementwiseFn, Expr, UnaryOp};

/// Elements per parallel work item.
const CHUNK_LEN: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Instr {
    Load(usize),
    Const(f64),
    Unary(UnaryOp),
    Binary(BinaryOp),
}

/// Postfix form of an [`ElementwiseFn`], evaluated once per element on a small value stack.
#[derive(Clone, Debug, PartialEq)]
pub struct Program {
    instrs: Vec<Instr>,
    arity: usize,
    max_stack: usize,
}

impl Program {
    pub fn lower(func: &ElementwiseFn) -> Result<Self> {
        if func.arity() == 0 {
            return Err(StagingError::InvalidFunction(format!(
                "'{}' must take at least one operand",
                func.name()
            )));
        }

        let mut instrs = Vec::new();
        Self::emit(func, func.body(), &mut instrs)?;

        let mut depth = 0usize;
        let mut max_stack = 0usize;
        for instr in &instrs {
            match instr {
                Instr::Load(_) | Instr::Const(_) => depth += 1,
                Instr::Unary(_) => {}
                Instr::Binary(_) => depth -= 1,
            }
            max_stack = max_stack.max(depth);
        }

        Ok(Self {
            instrs,
            arity: func.arity(),
            max_stack,
        })
    }

    fn emit(func: &ElementwiseFn, expr: &Expr, out: &mut Vec<Instr>) -> Result<()> {
        match expr {
            Expr::Arg(i) => {
                if *i >= func.arity() {
                    return Err(StagingError::InvalidFunction(format!(
                        "'{}' references argument {} but takes {}",
                        func.name(),
                        i,
                        func.arity()
                    )));
                }
                out.push(Instr::Load(*i));
            }
            Expr::Const(v) => out.push(Instr::Const(*v)),
            Expr::Unary(op, e) => {
                Self::emit(func, e, out)?;
                out.push(Instr::Unary(*op));
            }
            Expr::Binary(op, a, b) => {
                Self::emit(func, a, out)?;
                Self::emit(func, b, out)?;
                out.push(Instr::Binary(*op));
            }
        }
        Ok(())
    }

    pub fn instrs(&self) -> &[Instr] {
        &self.instrs
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn max_stack(&self) -> usize {
        self.max_stack
    }

    /// `Some(op)` when the program is exactly `op(x0, x1)`.
    pub fn as_binary(&self) -> Option<BinaryOp> {
        match self.instrs.as_slice() {
            [Instr::Load(0), Instr::Load(1), Instr::Binary(op)] => Some(*op),
            _ => None,
        }
    }

    fn eval<T: Scalar>(&self, inputs: &[&[T]], index: usize, stack: &mut Vec<T>) -> T {
        stack.clear();

        // lowering guarantees every pop has a matching push
        for instr in &self.instrs {
            match *instr {
                Instr::Load(arg) => stack.push(inputs[arg][index]),
                Instr::Const(v) => stack.push(T::from_f64(v)),
                Instr::Unary(op) => {
                    let top = stack.len() - 1;
                    stack[top] = T::unary(op, stack[top]);
                }
                Instr::Binary(op) => {
                    let rhs = stack[stack.len() - 1];
                    stack.truncate(stack.len() - 1);
                    let top = stack.len() - 1;
                    stack[top] = T::binary(op, stack[top], rhs);
                }
            }
        }

        stack[0]
    }

    /// Evaluate into `out`, element `i` reading `inputs[k][i]`. Below `parallel_threshold`
    /// elements the loop stays on the calling thread.
    pub fn execute<T: Scalar>(&self, inputs: &[&[T]], out: &mut [T], parallel_threshold: usize) {
        debug_assert_eq!(inputs.len(), self.arity);
        debug_assert!(inputs.iter().all(|input| input.len() == out.len()));

        if out.len() < parallel_threshold {
            let mut stack = Vec::with_capacity(self.max_stack);
            for (i, slot) in out.iter_mut().enumerate() {
                *slot = self.eval(inputs, i, &mut stack);
            }
            return;
        }

        out.par_chunks_mut(CHUNK_LEN)
            .enumerate()
            .for_each(|(chunk_idx, chunk)| {
                let base = chunk_idx * CHUNK_LEN;
                let mut stack = Vec::with_capacity(self.max_stack);
                for (j, slot) in chunk.iter_mut().enumerate() {
                    *slot = self.eval(inputs, base + j, &mut stack);
                }
            });
    }
}

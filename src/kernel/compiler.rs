use std::sync::Arc;

use tracing::debug;

use crate::device::DeviceContext;
use crate::error::Result;

use super::dispatch::ElementwiseKernel;
use super::expr::ElementwiseFn;
use super::program::Program;

/// Where a compiled kernel executes.
#[derive(Clone, Debug)]
pub enum Target {
    /// On the calling thread (or the rayon pool for large inputs).
    Host,
    Device(DeviceContext),
}

/// Lower `func` and bind it to `target`.
///
/// Device targets bring the backend up if needed and ask it to accept the program, so a
/// function the device cannot express is rejected here rather than on first use. Programs
/// carry no dtype: a backend limited to some dtypes reports `Unsupported` from `apply`.
pub fn compile(func: &ElementwiseFn, target: Target) -> Result<ElementwiseKernel> {
    let program = Program::lower(func)?;

    if let Target::Device(ctx) = &target {
        ctx.backend()?.check_program(&program)?;
    }

    debug!(
        "Compiled '{}' ({} instructions, stack depth {})",
        func.name(),
        program.instrs().len(),
        program.max_stack()
    );

    Ok(ElementwiseKernel::new(
        func.name().to_string(),
        Arc::new(program),
        target,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StagingError;
    use crate::kernel::Expr;

    #[test]
    fn host_compile_needs_no_device() {
        let kernel = compile(&ElementwiseFn::add(), Target::Host).unwrap();
        assert_eq!(kernel.name(), "add");
        assert_eq!(kernel.arity(), 2);
        assert!(!kernel.is_device());
    }

    #[test]
    fn device_compile_initialises_context() {
        let ctx = DeviceContext::emulated(1024).unwrap();
        let kernel = ctx.vectorize(&ElementwiseFn::mul()).unwrap();
        assert!(ctx.is_initialized());
        assert!(kernel.is_device());
    }

    #[test]
    fn invalid_functions_fail_to_compile() {
        let f = ElementwiseFn::new("oops", 1, Expr::arg(0) * Expr::arg(2));
        assert!(matches!(
            compile(&f, Target::Host),
            Err(StagingError::InvalidFunction(_))
        ));
    }

    #[test]
    fn shut_down_context_rejects_compile() {
        let ctx = DeviceContext::emulated(1024).unwrap();
        ctx.shutdown();
        assert!(matches!(
            ctx.vectorize(&ElementwiseFn::add()),
            Err(StagingError::ContextShutdown)
        ));
    }
}

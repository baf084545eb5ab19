use std::borrow::Cow;
use std::sync::Arc;

use tracing::debug;

use crate::config::DEFAULT_PARALLEL_THRESHOLD;
use crate::device::{BufferId, DeviceBuffer, DeviceContext};
use crate::error::{Result, StagingError};
use crate::tensor::{HostArray, Scalar, TensorDesc, for_dtype};

use super::compiler::Target;
use super::program::Program;

/// Borrowed input to a kernel.
#[derive(Clone, Copy, Debug)]
pub enum Operand<'a> {
    Host(&'a HostArray),
    Device(&'a DeviceBuffer),
}

impl Operand<'_> {
    pub fn desc(&self) -> &TensorDesc {
        match self {
            Operand::Host(h) => h.desc(),
            Operand::Device(d) => d.desc(),
        }
    }

    pub fn is_device(&self) -> bool {
        matches!(self, Operand::Device(_))
    }
}

impl<'a> From<&'a HostArray> for Operand<'a> {
    fn from(h: &'a HostArray) -> Self {
        Operand::Host(h)
    }
}

impl<'a> From<&'a DeviceBuffer> for Operand<'a> {
    fn from(d: &'a DeviceBuffer) -> Self {
        Operand::Device(d)
    }
}

/// Owned kernel result, or an output buffer handed to a kernel to fill.
#[derive(Debug)]
pub enum Array {
    Host(HostArray),
    Device(DeviceBuffer),
}

impl Array {
    pub fn desc(&self) -> &TensorDesc {
        match self {
            Array::Host(h) => h.desc(),
            Array::Device(d) => d.desc(),
        }
    }

    pub fn is_device(&self) -> bool {
        matches!(self, Array::Device(_))
    }

    pub fn as_host(&self) -> Option<&HostArray> {
        match self {
            Array::Host(h) => Some(h),
            Array::Device(_) => None,
        }
    }

    pub fn as_device(&self) -> Option<&DeviceBuffer> {
        match self {
            Array::Device(d) => Some(d),
            Array::Host(_) => None,
        }
    }

    /// Host copy of the result, downloading it if it lives on the device.
    pub fn into_host(self) -> Result<HostArray> {
        match self {
            Array::Host(h) => Ok(h),
            Array::Device(d) => d.download(),
        }
    }
}

impl From<HostArray> for Array {
    fn from(h: HostArray) -> Self {
        Array::Host(h)
    }
}

impl From<DeviceBuffer> for Array {
    fn from(d: DeviceBuffer) -> Self {
        Array::Device(d)
    }
}

/// A compiled elementwise function bound to its execution target.
#[derive(Clone, Debug)]
pub struct ElementwiseKernel {
    name: String,
    program: Arc<Program>,
    target: Target,
}

impl ElementwiseKernel {
    pub(crate) fn new(name: String, program: Arc<Program>, target: Target) -> Self {
        Self {
            name,
            program,
            target,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.program.arity()
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn is_device(&self) -> bool {
        matches!(self.target, Target::Device(_))
    }

    /// Shorthand for `apply(operands, None)`.
    pub fn call(&self, operands: &[Operand<'_>]) -> Result<Array> {
        self.apply(operands, None)
    }

    /// Evaluate the kernel over `operands`, writing into `out` when given.
    ///
    /// With `out` omitted the result lands on the device when every operand is a device
    /// buffer and on the host otherwise. A device kernel whose operands and output are all
    /// device-resident moves no bytes between host and device.
    ///
    /// A supplied `out` is dropped if the call fails; use [`apply_into`](Self::apply_into)
    /// to keep a staged output buffer across failures.
    pub fn apply(&self, operands: &[Operand<'_>], out: Option<Array>) -> Result<Array> {
        match out {
            Some(mut out) => {
                self.apply_into(operands, &mut out)?;
                Ok(out)
            }
            None => {
                let desc = self.validate(operands, None)?;
                self.log_apply(operands, &desc);

                match &self.target {
                    Target::Host => self.new_on_host(operands, desc),
                    Target::Device(ctx) => self.new_on_device(ctx, operands, desc),
                }
            }
        }
    }

    /// Evaluate the kernel into an output the caller keeps, whether or not the call succeeds.
    pub fn apply_into(&self, operands: &[Operand<'_>], out: &mut Array) -> Result<()> {
        let desc = self.validate(operands, Some(&*out))?;
        self.log_apply(operands, &desc);

        match &self.target {
            Target::Host => self.fill_on_host(operands, out, &desc),
            Target::Device(ctx) => self.fill_on_device(ctx, operands, out, &desc),
        }
    }

    fn log_apply(&self, operands: &[Operand<'_>], desc: &TensorDesc) {
        debug!(
            "Applying '{}' to {} operand(s) of {}",
            self.name,
            operands.len(),
            desc
        );
    }

    fn validate(&self, operands: &[Operand<'_>], out: Option<&Array>) -> Result<TensorDesc> {
        if operands.len() != self.arity() {
            return Err(StagingError::ArityMismatch {
                name: self.name.clone(),
                expected: self.arity(),
                found: operands.len(),
            });
        }

        for operand in operands {
            if let Operand::Device(d) = operand {
                self.check_buffer(d)?;
            }
        }

        let first = operands[0].desc();
        for operand in &operands[1..] {
            if operand.desc().shape() != first.shape() {
                return Err(StagingError::ShapeMismatch {
                    expected: first.shape().to_vec(),
                    found: operand.desc().shape().to_vec(),
                });
            }
        }
        for operand in &operands[1..] {
            first.expect_matches(operand.desc())?;
        }

        if let Some(out) = out {
            if let Array::Device(d) = out {
                self.check_buffer(d)?;
            }
            first.expect_matches(out.desc())?;
        }

        Ok(first.clone())
    }

    fn check_buffer(&self, buffer: &DeviceBuffer) -> Result<()> {
        buffer.live_id()?;

        if let Target::Device(ctx) = &self.target {
            if !ctx.same_context(buffer.context()) {
                return Err(StagingError::ContextMismatch);
            }
        }

        Ok(())
    }

    /// Run the program over `operands` into `host`, downloading device operands first.
    fn run_into_host(&self, operands: &[Operand<'_>], host: &mut HostArray) -> Result<()> {
        let inputs = operands
            .iter()
            .map(|operand| match operand {
                Operand::Host(h) => Ok(Cow::Borrowed(*h)),
                Operand::Device(d) => d.download().map(Cow::Owned),
            })
            .collect::<Result<Vec<Cow<'_, HostArray>>>>()?;
        let inputs: Vec<&HostArray> = inputs.iter().map(|h| h.as_ref()).collect();

        run_on_host(&self.program, &inputs, host)
    }

    fn fill_on_host(
        &self,
        operands: &[Operand<'_>],
        out: &mut Array,
        desc: &TensorDesc,
    ) -> Result<()> {
        match out {
            Array::Host(host) => self.run_into_host(operands, host),
            Array::Device(buffer) => {
                let mut result = HostArray::zeros_like(desc);
                self.run_into_host(operands, &mut result)?;
                buffer.copy_from_host(&result)
            }
        }
    }

    fn new_on_host(&self, operands: &[Operand<'_>], desc: TensorDesc) -> Result<Array> {
        let mut result = HostArray::zeros_like(&desc);
        self.run_into_host(operands, &mut result)?;

        match all_device_context(operands) {
            Some(ctx) => Ok(Array::Device(ctx.upload(&result)?)),
            None => Ok(Array::Host(result)),
        }
    }

    /// Device ids for `operands`; host operands are uploaded into the returned temporaries,
    /// which release their memory when dropped.
    fn stage(
        &self,
        ctx: &DeviceContext,
        operands: &[Operand<'_>],
    ) -> Result<(Vec<BufferId>, Vec<DeviceBuffer>)> {
        let mut staged = Vec::new();
        let mut ids = Vec::with_capacity(operands.len());
        for operand in operands {
            match operand {
                Operand::Device(d) => ids.push(d.live_id()?),
                Operand::Host(h) => {
                    let temp = ctx.upload(h)?;
                    ids.push(temp.live_id()?);
                    staged.push(temp);
                }
            }
        }
        Ok((ids, staged))
    }

    fn fill_on_device(
        &self,
        ctx: &DeviceContext,
        operands: &[Operand<'_>],
        out: &mut Array,
        desc: &TensorDesc,
    ) -> Result<()> {
        let (ids, _staged) = self.stage(ctx, operands)?;

        match out {
            Array::Device(buffer) => self.launch(ctx, desc, &ids, buffer),
            Array::Host(host) => {
                let result = ctx.allocate_desc(desc.clone())?;
                self.launch(ctx, desc, &ids, &result)?;
                result.copy_to_host(host)
            }
        }
    }

    fn new_on_device(
        &self,
        ctx: &DeviceContext,
        operands: &[Operand<'_>],
        desc: TensorDesc,
    ) -> Result<Array> {
        let (ids, staged) = self.stage(ctx, operands)?;

        let result = ctx.allocate_desc(desc.clone())?;
        self.launch(ctx, &desc, &ids, &result)?;

        if staged.is_empty() {
            Ok(Array::Device(result))
        } else {
            Ok(Array::Host(result.download()?))
        }
    }

    fn launch(
        &self,
        ctx: &DeviceContext,
        desc: &TensorDesc,
        inputs: &[BufferId],
        output: &DeviceBuffer,
    ) -> Result<()> {
        ctx.launch(
            &self.program,
            desc.data_type(),
            inputs,
            output.live_id()?,
            desc.num_elements(),
        )
    }
}

/// The shared context when every operand is a device buffer.
fn all_device_context<'a>(operands: &[Operand<'a>]) -> Option<&'a DeviceContext> {
    let mut ctx = None;
    for &operand in operands {
        match operand {
            Operand::Device(d) => ctx = Some(d.context()),
            Operand::Host(_) => return None,
        }
    }
    ctx
}

fn run_on_host(program: &Program, inputs: &[&HostArray], out: &mut HostArray) -> Result<()> {
    for_dtype!(out.data_type(), T => run_typed::<T>(program, inputs, out))
}

fn run_typed<T: Scalar>(program: &Program, inputs: &[&HostArray], out: &mut HostArray) -> Result<()> {
    let slices = inputs
        .iter()
        .map(|h| h.as_slice::<T>())
        .collect::<Result<Vec<&[T]>>>()?;

    program.execute::<T>(&slices, out.as_mut_slice::<T>()?, DEFAULT_PARALLEL_THRESHOLD);
    Ok(())
}

use std::collections::HashMap;

use vulkanalia::{
    Device,
    bytecode::Bytecode,
    vk::{self, DeviceV1_0, Handle, HasBuilder},
};

use crate::error::{Result, StagingError};
use crate::kernel::BinaryOp;

macro_rules! include_shader {
    ($name:literal) => {
        include_bytes!(concat!(env!("OUT_DIR"), "/shaders/", $name))
    };
}

const ADD_SHADER_F32: &[u8] = include_shader!("f32_add.spv");
const SUB_SHADER_F32: &[u8] = include_shader!("f32_sub.spv");
const MUL_SHADER_F32: &[u8] = include_shader!("f32_mul.spv");

/// Threads per workgroup; must match `local_size_x` in the shaders.
pub const WORKGROUP_SIZE: u32 = 256;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ElementwisePushConstants {
    pub total: u32,
}

pub struct ComputePipelines {
    pipelines: HashMap<BinaryOp, vk::Pipeline>,
    pipeline_layout: vk::PipelineLayout,
}

impl ComputePipelines {
    pub fn new(device: &Device, descriptor_set_layout: vk::DescriptorSetLayout) -> Result<Self> {
        let push_constant_range = vk::PushConstantRange::builder()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .offset(0)
            .size(std::mem::size_of::<ElementwisePushConstants>() as u32);

        let set_layouts = [descriptor_set_layout];
        let push_constant_ranges = [push_constant_range];
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);

        let pipeline_layout = unsafe { device.create_pipeline_layout(&layout_info, None)? };

        let mut pipelines = ComputePipelines {
            pipelines: HashMap::new(),
            pipeline_layout,
        };

        let ops = [
            BinaryOp::Add,
            BinaryOp::Sub,
            BinaryOp::Mul,
            BinaryOp::Div,
            BinaryOp::Min,
            BinaryOp::Max,
        ];
        for (op, shader) in ops.into_iter().filter_map(|op| Some((op, shader_for(op)?))) {
            match Self::create_pipeline(device, pipeline_layout, shader) {
                Ok(pipeline) => {
                    pipelines.pipelines.insert(op, pipeline);
                }
                Err(e) => {
                    unsafe { pipelines.cleanup(device) };
                    return Err(e);
                }
            }
        }

        Ok(pipelines)
    }

    fn create_pipeline(
        device: &Device,
        pipeline_layout: vk::PipelineLayout,
        shader_code: &[u8],
    ) -> Result<vk::Pipeline> {
        let bytecode = Bytecode::new(shader_code)
            .map_err(|e| StagingError::Vulkan(format!("invalid SPIR-V: {}", e)))?;

        let module_info = vk::ShaderModuleCreateInfo::builder()
            .code_size(bytecode.code_size())
            .code(bytecode.code());

        unsafe {
            let shader_module = device.create_shader_module(&module_info, None)?;

            let stage = vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::COMPUTE)
                .module(shader_module)
                .name(b"main\0");

            let pipeline_info = vk::ComputePipelineCreateInfo::builder()
                .stage(stage)
                .layout(pipeline_layout);

            let created =
                device.create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None);

            device.destroy_shader_module(shader_module, None);

            created?
                .0
                .into_iter()
                .next()
                .ok_or_else(|| StagingError::Vulkan("no compute pipeline created".to_string()))
        }
    }

    pub fn get(&self, op: BinaryOp) -> Option<vk::Pipeline> {
        self.pipelines.get(&op).copied()
    }

    pub fn supports(&self, op: BinaryOp) -> bool {
        self.pipelines.contains_key(&op)
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    pub unsafe fn cleanup(&mut self, device: &Device) {
        unsafe {
            for (_, pipeline) in self.pipelines.drain() {
                device.destroy_pipeline(pipeline, None);
            }
            device.destroy_pipeline_layout(self.pipeline_layout, None);
        }
    }
}

/// SPIR-V for `op`. Only ops that are correctly rounded and NaN-exact in GLSL have one:
/// `min`/`max` return an undefined operand for NaN inputs.
fn shader_for(op: BinaryOp) -> Option<&'static [u8]> {
    match op {
        BinaryOp::Add => Some(ADD_SHADER_F32),
        BinaryOp::Sub => Some(SUB_SHADER_F32),
        BinaryOp::Mul => Some(MUL_SHADER_F32),
        BinaryOp::Div | BinaryOp::Min | BinaryOp::Max => None,
    }
}

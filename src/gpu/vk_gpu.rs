use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use vulkanalia::{
    Device, Entry, Instance,
    loader::{LIBRARY, LibloadingLoader},
    vk::{self, DeviceV1_0, HasBuilder, InstanceV1_0},
};

use crate::error::{Result, StagingError};

use super::compute_pipelines::{ComputePipelines, ElementwisePushConstants, WORKGROUP_SIZE};
use super::gpu_memory::GpuMemory;

const MAX_DESCRIPTOR_SETS: u32 = 64;

/// One Vulkan device with a single compute queue.
///
/// Command recording, submission and descriptor allocation share one lock, so every
/// dispatch completes before the next one is recorded.
pub struct Gpu {
    _entry: Entry,
    instance: Instance,
    device: Arc<Device>,
    physical_device: vk::PhysicalDevice,
    name: String,
    total_memory: u64,
    max_workgroups_x: u32,
    queue: vk::Queue,
    command_pool: vk::CommandPool,
    descriptor_pool: vk::DescriptorPool,
    descriptor_set_layout: vk::DescriptorSetLayout,
    compute_pipelines: ComputePipelines,
    submit_lock: Mutex<()>,
}

// SAFETY: queue, pools and command recording are only touched under `submit_lock`;
// the remaining handles are immutable after construction.
unsafe impl Send for Gpu {}
unsafe impl Sync for Gpu {}

impl Gpu {
    pub fn new(device_index: usize) -> Result<Self> {
        unsafe {
            let loader = LibloadingLoader::new(LIBRARY)
                .map_err(|e| StagingError::Vulkan(format!("failed to load Vulkan: {}", e)))?;
            let entry = Entry::new(loader)
                .map_err(|e| StagingError::Vulkan(format!("failed to load Vulkan: {}", e)))?;

            let app_info = vk::ApplicationInfo::builder()
                .application_name(b"vkstage\0")
                .application_version(vk::make_version(0, 1, 0))
                .engine_name(b"vkstage\0")
                .engine_version(vk::make_version(0, 1, 0))
                .api_version(vk::make_version(1, 0, 0));

            let instance_info = vk::InstanceCreateInfo::builder().application_info(&app_info);
            let instance = entry.create_instance(&instance_info, None)?;

            match Self::with_instance(entry, instance, device_index) {
                Ok(gpu) => Ok(gpu),
                Err((entry, instance, e)) => {
                    instance.destroy_instance(None);
                    drop(entry);
                    Err(e)
                }
            }
        }
    }

    unsafe fn with_instance(
        entry: Entry,
        instance: Instance,
        device_index: usize,
    ) -> std::result::Result<Self, (Entry, Instance, StagingError)> {
        macro_rules! tri {
            ($e:expr) => {
                match $e {
                    Ok(v) => v,
                    Err(e) => return Err((entry, instance, StagingError::from(e))),
                }
            };
        }

        unsafe {
            let physical_devices = tri!(instance.enumerate_physical_devices());
            let physical_device = tri!(physical_devices.get(device_index).copied().ok_or_else(
                || StagingError::InvalidConfig(format!(
                    "GPU index {} out of range ({} devices)",
                    device_index,
                    physical_devices.len()
                ))
            ));

            let queue_family_index = tri!(
                instance
                    .get_physical_device_queue_family_properties(physical_device)
                    .iter()
                    .position(|p| p.queue_flags.contains(vk::QueueFlags::COMPUTE))
                    .map(|i| i as u32)
                    .ok_or_else(|| StagingError::Vulkan("no compute queue family found".to_string()))
            );

            let properties = instance.get_physical_device_properties(physical_device);
            let name = properties.device_name.to_string();
            let max_workgroups_x = properties.limits.max_compute_work_group_count[0];
            let total_memory = device_local_memory(&instance, physical_device);

            let priorities = [1.0];
            let queue_info = vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(queue_family_index)
                .queue_priorities(&priorities);
            let queue_infos = [queue_info];
            let device_info = vk::DeviceCreateInfo::builder().queue_create_infos(&queue_infos);

            let device = tri!(instance.create_device(physical_device, &device_info, None));
            let queue = device.get_device_queue(queue_family_index, 0);

            match Self::create_resources(&device, queue_family_index) {
                Ok((command_pool, descriptor_pool, descriptor_set_layout, compute_pipelines)) => {
                    debug!(
                        "Vulkan device {} ({}): {} bytes device-local",
                        device_index, name, total_memory
                    );

                    Ok(Self {
                        _entry: entry,
                        instance,
                        device: Arc::new(device),
                        physical_device,
                        name,
                        total_memory,
                        max_workgroups_x,
                        queue,
                        command_pool,
                        descriptor_pool,
                        descriptor_set_layout,
                        compute_pipelines,
                        submit_lock: Mutex::new(()),
                    })
                }
                Err(e) => {
                    device.destroy_device(None);
                    Err((entry, instance, e))
                }
            }
        }
    }

    unsafe fn create_resources(
        device: &Device,
        queue_family_index: u32,
    ) -> Result<(
        vk::CommandPool,
        vk::DescriptorPool,
        vk::DescriptorSetLayout,
        ComputePipelines,
    )> {
        unsafe {
            let pool_info = vk::CommandPoolCreateInfo::builder()
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
                .queue_family_index(queue_family_index);
            let command_pool = device.create_command_pool(&pool_info, None)?;

            // src1 = 0, src2 = 1, dst = 2
            let bindings = [0, 1, 2].map(|binding| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE)
            });
            let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
            let descriptor_set_layout = match device.create_descriptor_set_layout(&layout_info, None) {
                Ok(layout) => layout,
                Err(e) => {
                    device.destroy_command_pool(command_pool, None);
                    return Err(e.into());
                }
            };

            let pool_sizes = [vk::DescriptorPoolSize::builder()
                .type_(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(MAX_DESCRIPTOR_SETS * 3)];
            let descriptor_pool_info = vk::DescriptorPoolCreateInfo::builder()
                .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
                .max_sets(MAX_DESCRIPTOR_SETS)
                .pool_sizes(&pool_sizes);
            let descriptor_pool = match device.create_descriptor_pool(&descriptor_pool_info, None) {
                Ok(pool) => pool,
                Err(e) => {
                    device.destroy_descriptor_set_layout(descriptor_set_layout, None);
                    device.destroy_command_pool(command_pool, None);
                    return Err(e.into());
                }
            };

            match ComputePipelines::new(device, descriptor_set_layout) {
                Ok(pipelines) => Ok((
                    command_pool,
                    descriptor_pool,
                    descriptor_set_layout,
                    pipelines,
                )),
                Err(e) => {
                    device.destroy_descriptor_pool(descriptor_pool, None);
                    device.destroy_descriptor_set_layout(descriptor_set_layout, None);
                    device.destroy_command_pool(command_pool, None);
                    Err(e)
                }
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn total_memory(&self) -> u64 {
        self.total_memory
    }

    pub fn compute_pipelines(&self) -> &ComputePipelines {
        &self.compute_pipelines
    }

    fn find_memory_type(&self, type_filter: u32, properties: vk::MemoryPropertyFlags) -> Option<u32> {
        let mem_properties = unsafe {
            self.instance
                .get_physical_device_memory_properties(self.physical_device)
        };

        (0..mem_properties.memory_type_count).find(|&i| {
            (type_filter & (1 << i)) != 0
                && mem_properties.memory_types[i as usize]
                    .property_flags
                    .contains(properties)
        })
    }

    /// Uninitialised host-visible storage buffer of `size` bytes.
    pub fn allocate_memory(&self, size: vk::DeviceSize) -> Result<GpuMemory> {
        unsafe {
            let buffer_info = vk::BufferCreateInfo::builder()
                .size(size)
                .usage(vk::BufferUsageFlags::STORAGE_BUFFER)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);

            let buffer = self.device.create_buffer(&buffer_info, None)?;
            let requirements = self.device.get_buffer_memory_requirements(buffer);

            let memory_type = match self.find_memory_type(
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            ) {
                Some(index) => index,
                None => {
                    self.device.destroy_buffer(buffer, None);
                    return Err(StagingError::Vulkan(
                        "no host-visible coherent memory type".to_string(),
                    ));
                }
            };

            let alloc_info = vk::MemoryAllocateInfo::builder()
                .allocation_size(requirements.size)
                .memory_type_index(memory_type);

            let memory = match self.device.allocate_memory(&alloc_info, None) {
                Ok(memory) => memory,
                Err(e) => {
                    self.device.destroy_buffer(buffer, None);
                    return Err(e.into());
                }
            };

            if let Err(e) = self.device.bind_buffer_memory(buffer, memory, 0) {
                self.device.destroy_buffer(buffer, None);
                self.device.free_memory(memory, None);
                return Err(e.into());
            }

            Ok(GpuMemory::new(buffer, memory, size, self.device.clone()))
        }
    }

    /// Record and run `dst = op(src1, src2)` over `total` elements, waiting for completion.
    pub fn dispatch_binary(
        &self,
        pipeline: vk::Pipeline,
        src1: &GpuMemory,
        src2: &GpuMemory,
        dst: &GpuMemory,
        total: u32,
    ) -> Result<()> {
        let _guard = self.submit_lock.lock();

        unsafe {
            let set_layouts = [self.descriptor_set_layout];
            let set_info = vk::DescriptorSetAllocateInfo::builder()
                .descriptor_pool(self.descriptor_pool)
                .set_layouts(&set_layouts);
            let descriptor_set = self
                .device
                .allocate_descriptor_sets(&set_info)?
                .into_iter()
                .next()
                .ok_or_else(|| StagingError::Vulkan("no descriptor set allocated".to_string()))?;

            let result = self.record_and_submit(pipeline, descriptor_set, [src1, src2, dst], total);

            self.device
                .free_descriptor_sets(self.descriptor_pool, &[descriptor_set])?;

            result
        }
    }

    unsafe fn record_and_submit(
        &self,
        pipeline: vk::Pipeline,
        descriptor_set: vk::DescriptorSet,
        buffers: [&GpuMemory; 3],
        total: u32,
    ) -> Result<()> {
        unsafe {
            let buffer_infos = buffers.map(|mem| {
                [vk::DescriptorBufferInfo::builder()
                    .buffer(mem.buffer)
                    .offset(0)
                    .range(vk::WHOLE_SIZE)]
            });
            let writes: Vec<_> = buffer_infos
                .iter()
                .enumerate()
                .map(|(binding, info)| {
                    vk::WriteDescriptorSet::builder()
                        .dst_set(descriptor_set)
                        .dst_binding(binding as u32)
                        .dst_array_element(0)
                        .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                        .buffer_info(info)
                })
                .collect();
            self.device
                .update_descriptor_sets(&writes, &[] as &[vk::CopyDescriptorSet]);

            let alloc_info = vk::CommandBufferAllocateInfo::builder()
                .command_pool(self.command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let command_buffer = self
                .device
                .allocate_command_buffers(&alloc_info)?
                .into_iter()
                .next()
                .ok_or_else(|| StagingError::Vulkan("no command buffer allocated".to_string()))?;

            let result = self.submit_dispatch(command_buffer, pipeline, descriptor_set, total);

            self.device
                .free_command_buffers(self.command_pool, &[command_buffer]);

            result
        }
    }

    unsafe fn submit_dispatch(
        &self,
        command_buffer: vk::CommandBuffer,
        pipeline: vk::Pipeline,
        descriptor_set: vk::DescriptorSet,
        total: u32,
    ) -> Result<()> {
        let layout = self.compute_pipelines.layout();
        let push_constants = ElementwisePushConstants { total };

        // wrap into a second dimension once the x limit is reached
        let groups = total.div_ceil(WORKGROUP_SIZE).max(1);
        let groups_x = groups.min(self.max_workgroups_x);
        let groups_y = groups.div_ceil(groups_x);

        unsafe {
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device
                .begin_command_buffer(command_buffer, &begin_info)?;

            self.device
                .cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::COMPUTE, pipeline);
            self.device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                layout,
                0,
                &[descriptor_set],
                &[],
            );
            self.device.cmd_push_constants(
                command_buffer,
                layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                bytemuck::bytes_of(&push_constants),
            );
            self.device.cmd_dispatch(command_buffer, groups_x, groups_y, 1);

            // make shader writes visible to host reads
            let barrier = vk::MemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::SHADER_WRITE)
                .dst_access_mask(vk::AccessFlags::HOST_READ);
            self.device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::HOST,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[] as &[vk::BufferMemoryBarrier],
                &[] as &[vk::ImageMemoryBarrier],
            );

            self.device.end_command_buffer(command_buffer)?;

            let fence = self
                .device
                .create_fence(&vk::FenceCreateInfo::builder(), None)?;

            let command_buffers = [command_buffer];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);

            let result = self
                .device
                .queue_submit(self.queue, &[submit_info], fence)
                .and_then(|_| self.device.wait_for_fences(&[fence], true, u64::MAX).map(|_| ()));

            self.device.destroy_fence(fence, None);
            result?;
        }

        Ok(())
    }
}

fn device_local_memory(instance: &Instance, physical_device: vk::PhysicalDevice) -> u64 {
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(physical_device) };

    let heap_index = (0..memory_properties.memory_type_count)
        .find(|&i| {
            memory_properties.memory_types[i as usize]
                .property_flags
                .contains(vk::MemoryPropertyFlags::DEVICE_LOCAL)
        })
        .map(|i| memory_properties.memory_types[i as usize].heap_index)
        .unwrap_or(0);

    memory_properties.memory_heaps[heap_index as usize].size
}

impl Drop for Gpu {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.compute_pipelines.cleanup(&self.device);
            self.device
                .destroy_descriptor_set_layout(self.descriptor_set_layout, None);
            self.device
                .destroy_descriptor_pool(self.descriptor_pool, None);
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

mod backend;
mod compute_pipelines;
mod gpu_memory;
mod vk_gpu;

pub use backend::VulkanDevice;

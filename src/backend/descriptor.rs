// Descriptor set and pipeline layout
//
// One descriptor set with a single uniform buffer at binding 0, visible to
// the vertex stage, and the pipeline layout that references it. Everything a
// pipeline needs to consume the camera matrix.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::buffer::UniformBuffer;
use super::device::VulkanDevice;

pub struct PipelineDescriptors {
    pub set_layout: vk::DescriptorSetLayout,
    pub pipeline_layout: vk::PipelineLayout,
    pub pool: vk::DescriptorPool,
    pub set: vk::DescriptorSet,
    device: Arc<VulkanDevice>,
}

impl PipelineDescriptors {
    pub fn new(device: Arc<VulkanDevice>, uniform: &UniformBuffer) -> Result<Self> {
        // Descriptor set layout: one uniform buffer for the vertex stage
        let bindings = [vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX)];

        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let set_layout = unsafe {
            device
                .device
                .create_descriptor_set_layout(&layout_info, None)
        }
        .context("Failed to create descriptor set layout")?;

        // Pipeline layout referencing that set, no push constants
        let set_layouts = [set_layout];
        let pipeline_layout_info =
            vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        let pipeline_layout = unsafe {
            device
                .device
                .create_pipeline_layout(&pipeline_layout_info, None)
        }
        .context("Failed to create pipeline layout")?;

        // Pool sized for exactly one set
        let pool_sizes = [vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(1)
            .pool_sizes(&pool_sizes);
        let pool = unsafe { device.device.create_descriptor_pool(&pool_info, None) }
            .context("Failed to create descriptor pool")?;

        // Allocate the set and point it at the uniform buffer
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&set_layouts);
        let set = unsafe { device.device.allocate_descriptor_sets(&alloc_info) }
            .context("Failed to allocate descriptor set")?[0];

        let buffer_info = [uniform.descriptor_info()];
        let writes = [vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&buffer_info)];
        unsafe { device.device.update_descriptor_sets(&writes, &[]) };

        log::info!("Descriptor set and pipeline layout created");

        Ok(Self {
            set_layout,
            pipeline_layout,
            pool,
            set,
            device,
        })
    }
}

impl Drop for PipelineDescriptors {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_descriptor_pool(self.pool, None);
            self.device
                .device
                .destroy_pipeline_layout(self.pipeline_layout, None);
            self.device
                .device
                .destroy_descriptor_set_layout(self.set_layout, None);
        }
        log::info!("Descriptor set and pipeline layout destroyed");
    }
}

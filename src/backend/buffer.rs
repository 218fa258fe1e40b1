// Uniform buffer - host-visible storage for the camera matrix
//
// Lives in CpuToGpu memory so the matrix can be rewritten in place when the
// swapchain extent changes.

use anyhow::{Context, Result};
use ash::vk;
use glam::{Mat4, Vec3, Vec4};
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::device::VulkanDevice;

/// Model-view-projection for the fixed demo camera.
///
/// The clip matrix folds in the Vulkan conventions: Y points down and the
/// depth range is [0, 1] instead of GL's [-1, 1].
pub fn default_mvp(aspect_ratio: f32) -> Mat4 {
    let projection = Mat4::perspective_rh_gl(45f32.to_radians(), aspect_ratio, 0.1, 100.0);
    let view = Mat4::look_at_rh(
        Vec3::new(-5.0, 3.0, -10.0),
        Vec3::ZERO,
        Vec3::new(0.0, -1.0, 0.0),
    );
    let model = Mat4::IDENTITY;
    let clip = Mat4::from_cols(
        Vec4::new(1.0, 0.0, 0.0, 0.0),
        Vec4::new(0.0, -1.0, 0.0, 0.0),
        Vec4::new(0.0, 0.0, 0.5, 0.0),
        Vec4::new(0.0, 0.0, 0.5, 1.0),
    );

    clip * projection * view * model
}

pub struct UniformBuffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl UniformBuffer {
    /// Create a host-visible uniform buffer holding one matrix.
    pub fn new(device: Arc<VulkanDevice>, mvp: Mat4) -> Result<Self> {
        let size = std::mem::size_of::<Mat4>() as vk::DeviceSize;

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(vk::BufferUsageFlags::UNIFORM_BUFFER)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .context("Failed to create uniform buffer")?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = device.allocate(&AllocationCreateDesc {
            name: "uniform buffer",
            requirements,
            location: MemoryLocation::CpuToGpu,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;

        unsafe {
            device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                .context("Failed to bind uniform buffer memory")?;
        }

        let mut uniform = Self {
            buffer,
            size,
            allocation: Some(allocation),
            device,
        };
        uniform.write_mvp(mvp)?;

        log::info!("Uniform buffer created ({} bytes)", size);

        Ok(uniform)
    }

    /// Copy a new matrix into the mapped buffer.
    pub fn write_mvp(&mut self, mvp: Mat4) -> Result<()> {
        let allocation = self
            .allocation
            .as_ref()
            .context("Uniform buffer memory already freed")?;
        let ptr = allocation
            .mapped_ptr()
            .context("Uniform buffer memory is not host visible")?;

        unsafe {
            ptr.as_ptr().cast::<Mat4>().copy_from_nonoverlapping(&mvp, 1);
        }

        Ok(())
    }

    /// Descriptor info for binding this buffer.
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo::default()
            .buffer(self.buffer)
            .offset(0)
            .range(self.size)
    }
}

impl Drop for UniformBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
        }
        if let Some(allocation) = self.allocation.take() {
            self.device.free(allocation);
        }
        log::info!("Uniform buffer destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_centers_the_origin() {
        let mvp = default_mvp(1.0);
        let clip = mvp * Vec4::new(0.0, 0.0, 0.0, 1.0);

        // The camera looks straight at the origin
        assert!(clip.w > 0.0);
        assert!((clip.x / clip.w).abs() < 1e-4);
        assert!((clip.y / clip.w).abs() < 1e-4);

        // Depth lands inside the [0, 1] range after the clip correction
        let depth = clip.z / clip.w;
        assert!(depth > 0.0 && depth < 1.0, "depth out of range: {}", depth);
    }

    #[test]
    fn aspect_ratio_scales_horizontal_fov() {
        let square = default_mvp(1.0);
        let wide = default_mvp(2.0);

        // A point off to the side projects closer to center on a wider screen
        let p = Vec4::new(1.0, 0.0, 0.0, 1.0);
        let clip_square = square * p;
        let clip_wide = wide * p;
        let x_square = (clip_square.x / clip_square.w).abs();
        let x_wide = (clip_wide.x / clip_wide.w).abs();
        assert!(x_wide < x_square);
    }
}

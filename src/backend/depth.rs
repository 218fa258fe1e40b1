// Depth buffer - format selection, image, view
//
// The surface never dictates a depth format, so selection walks a candidate
// list and asks the GPU which tiling each format supports. Linear tiling is
// checked first, matching the order drivers report feature support in.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::command::{transition_image_layout, CommandPool};
use super::device::VulkanDevice;

/// A depth format together with the image tiling it supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthFormatChoice {
    pub format: vk::Format,
    pub tiling: vk::ImageTiling,
}

/// Fallback candidates tried after the preferred format.
const DEPTH_FORMAT_CANDIDATES: [vk::Format; 4] = [
    vk::Format::D16_UNORM,
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Pick a depth format and its tiling mode.
///
/// For each candidate, linear tiling wins if the format supports a depth
/// attachment there, then optimal tiling. Candidates that support neither
/// are skipped.
pub fn choose_depth_format(
    preferred: vk::Format,
    format_props: impl Fn(vk::Format) -> vk::FormatProperties,
) -> Result<DepthFormatChoice> {
    let candidates = std::iter::once(preferred)
        .chain(DEPTH_FORMAT_CANDIDATES.into_iter().filter(|&f| f != preferred));

    for format in candidates {
        let props = format_props(format);

        if props
            .linear_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        {
            return Ok(DepthFormatChoice {
                format,
                tiling: vk::ImageTiling::LINEAR,
            });
        }
        if props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        {
            return Ok(DepthFormatChoice {
                format,
                tiling: vk::ImageTiling::OPTIMAL,
            });
        }
    }

    anyhow::bail!("No depth format with depth attachment support")
}

/// Does the format carry a stencil aspect?
pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
    )
}

pub struct DepthBuffer {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub tiling: vk::ImageTiling,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl DepthBuffer {
    /// Create a depth image matching the swapchain extent, cleared and
    /// transitioned to its attachment layout.
    pub fn new(
        device: Arc<VulkanDevice>,
        pool: &CommandPool,
        extent: vk::Extent2D,
        preferred_format: vk::Format,
        clear_depth: f32,
    ) -> Result<Self> {
        let choice = choose_depth_format(preferred_format, |format| unsafe {
            device
                .instance
                .handle
                .get_physical_device_format_properties(device.physical_device, format)
        })?;

        log::info!(
            "Depth buffer: {:?} ({:?} tiling)",
            choice.format,
            choice.tiling
        );

        // Create depth image
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(choice.format)
            .tiling(choice.tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.device.create_image(&image_info, None) }
            .context("Failed to create depth image")?;

        // Allocate and bind memory
        let requirements = unsafe { device.device.get_image_memory_requirements(image) };

        let allocation = device.allocate(&AllocationCreateDesc {
            name: "depth buffer",
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: choice.tiling == vk::ImageTiling::LINEAR,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;

        unsafe {
            device
                .device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
                .context("Failed to bind depth image memory")?;
        }

        let mut aspect_mask = vk::ImageAspectFlags::DEPTH;
        if has_stencil(choice.format) {
            aspect_mask |= vk::ImageAspectFlags::STENCIL;
        }

        // Create image view
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(choice.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = unsafe { device.device.create_image_view(&view_info, None) }
            .context("Failed to create depth image view")?;

        // Clear the image and move it to its attachment layout
        pool.one_time_submit(device.graphics_queue, |command_buffer| {
            transition_image_layout(
                &device.device,
                command_buffer,
                image,
                aspect_mask,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );

            let clear_value = vk::ClearDepthStencilValue {
                depth: clear_depth,
                stencil: 0,
            };
            let range = vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            };
            unsafe {
                device.device.cmd_clear_depth_stencil_image(
                    command_buffer,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &clear_value,
                    &[range],
                );
            }

            transition_image_layout(
                &device.device,
                command_buffer,
                image,
                aspect_mask,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            );
        })?;

        Ok(Self {
            image,
            view,
            format: choice.format,
            tiling: choice.tiling,
            allocation: Some(allocation),
            device,
        })
    }
}

impl Drop for DepthBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_image_view(self.view, None);
            self.device.device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            self.device.free(allocation);
        }
        log::info!("Depth buffer destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(
        linear: vk::FormatFeatureFlags,
        optimal: vk::FormatFeatureFlags,
    ) -> vk::FormatProperties {
        vk::FormatProperties {
            linear_tiling_features: linear,
            optimal_tiling_features: optimal,
            ..Default::default()
        }
    }

    const DS: vk::FormatFeatureFlags = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;

    #[test]
    fn linear_tiling_wins_when_supported() {
        let choice = choose_depth_format(vk::Format::D16_UNORM, |_| props(DS, DS)).unwrap();
        assert_eq!(choice.format, vk::Format::D16_UNORM);
        assert_eq!(choice.tiling, vk::ImageTiling::LINEAR);
    }

    #[test]
    fn optimal_tiling_when_linear_unsupported() {
        let choice = choose_depth_format(vk::Format::D16_UNORM, |_| {
            props(vk::FormatFeatureFlags::empty(), DS)
        })
        .unwrap();
        assert_eq!(choice.format, vk::Format::D16_UNORM);
        assert_eq!(choice.tiling, vk::ImageTiling::OPTIMAL);
    }

    #[test]
    fn unsupported_preferred_falls_through_candidates() {
        let choice = choose_depth_format(vk::Format::D16_UNORM, |format| {
            if format == vk::Format::D32_SFLOAT {
                props(vk::FormatFeatureFlags::empty(), DS)
            } else {
                props(
                    vk::FormatFeatureFlags::empty(),
                    vk::FormatFeatureFlags::empty(),
                )
            }
        })
        .unwrap();
        assert_eq!(choice.format, vk::Format::D32_SFLOAT);
        assert_eq!(choice.tiling, vk::ImageTiling::OPTIMAL);
    }

    #[test]
    fn no_usable_format_is_an_error() {
        let result = choose_depth_format(vk::Format::D16_UNORM, |_| {
            props(
                vk::FormatFeatureFlags::empty(),
                vk::FormatFeatureFlags::empty(),
            )
        });
        assert!(result.is_err());
    }

    #[test]
    fn stencil_aspect_detection() {
        assert!(has_stencil(vk::Format::D24_UNORM_S8_UINT));
        assert!(has_stencil(vk::Format::D32_SFLOAT_S8_UINT));
        assert!(!has_stencil(vk::Format::D16_UNORM));
        assert!(!has_stencil(vk::Format::D32_SFLOAT));
    }
}

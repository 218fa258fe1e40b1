// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Physical device selection (prefer discrete GPU)
// - Queue family selection for graphics and present
// - Logical device + queue creation
// - Memory allocator setup

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use std::ffi::CStr;
use std::mem::ManuallyDrop;
use std::sync::Arc;

use super::instance::Instance;
use super::surface::Surface;

/// Queue family indices for rendering and presentation. On most hardware a
/// single family handles both, but the two may differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn is_unified(&self) -> bool {
        self.graphics == self.present
    }
}

/// Pick queue families for a device, given per-family present support.
///
/// A family that supports both graphics and present wins outright. Failing
/// that, the first graphics family is paired with the first present family.
/// Returns `None` if either capability is missing entirely.
pub fn select_queue_families(
    families: &[vk::QueueFamilyProperties],
    present_support: &[bool],
) -> Option<QueueFamilies> {
    // First pass: a single family that can do both
    for (index, family) in families.iter().enumerate() {
        if family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            && present_support.get(index).copied().unwrap_or(false)
        {
            return Some(QueueFamilies {
                graphics: index as u32,
                present: index as u32,
            });
        }
    }

    // Second pass: separate families for graphics and present
    let graphics = families
        .iter()
        .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))?;
    let present = present_support.iter().position(|&supported| supported)?;

    Some(QueueFamilies {
        graphics: graphics as u32,
        present: present as u32,
    })
}

/// Score a device: discrete beats integrated beats everything else, with
/// the 2D image size limit breaking ties between devices of the same type.
pub fn score_device(properties: &vk::PhysicalDeviceProperties) -> u32 {
    let base = match properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        _ => 1,
    };
    base + properties.limits.max_image_dimension2_d / 1024
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    // The allocator must be torn down before the device (see Drop)
    allocator: Mutex<ManuallyDrop<Allocator>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,

    // Queue handles
    pub queue_families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,

    // Device properties (cached for performance)
    pub properties: vk::PhysicalDeviceProperties,

    pub instance: Arc<Instance>,
}

impl VulkanDevice {
    /// Pick a GPU that can render to `surface` and create the logical device,
    /// its queues and the memory allocator.
    pub fn new(instance: Arc<Instance>, surface: &Surface) -> Result<Self> {
        // Step 1: Pick physical device (GPU)
        let (physical_device, queue_families) = Self::pick_physical_device(&instance, surface)?;

        // Step 2: Create logical device + queues
        let (device, graphics_queue, present_queue) =
            Self::create_logical_device(&instance, physical_device, queue_families)?;

        // Step 3: Cache device properties
        let properties = unsafe {
            instance
                .handle
                .get_physical_device_properties(physical_device)
        };

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        if queue_families.is_unified() {
            log::info!("Queue family {} (graphics + present)", queue_families.graphics);
        } else {
            log::info!(
                "Queue families: graphics {}, present {}",
                queue_families.graphics,
                queue_families.present
            );
        }

        // Step 4: Create memory allocator
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .context("Failed to create GPU memory allocator")?;

        Ok(Self {
            allocator: Mutex::new(ManuallyDrop::new(allocator)),
            device,
            physical_device,
            queue_families,
            graphics_queue,
            present_queue,
            properties,
            instance,
        })
    }

    fn pick_physical_device(
        instance: &Instance,
        surface: &Surface,
    ) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
        let devices = unsafe { instance.handle.enumerate_physical_devices() }?;

        if devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        // Score each device that can render to the surface
        let mut best_device = None;
        let mut best_score = 0;

        for device in devices {
            let props = unsafe { instance.handle.get_physical_device_properties(device) };
            let families = unsafe {
                instance
                    .handle
                    .get_physical_device_queue_family_properties(device)
            };

            let mut present_support = Vec::with_capacity(families.len());
            for index in 0..families.len() as u32 {
                present_support.push(surface.supports_present(device, index)?);
            }

            if let Some(queue_families) = select_queue_families(&families, &present_support) {
                let score = score_device(&props);
                if score > best_score {
                    best_score = score;
                    best_device = Some((device, queue_families));
                }
            }
        }

        best_device.ok_or_else(|| anyhow::anyhow!("No GPU can present to the window surface"))
    }

    fn create_logical_device(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        queue_families: QueueFamilies,
    ) -> Result<(ash::Device, vk::Queue, vk::Queue)> {
        let queue_priorities = [1.0];
        let mut queue_create_infos = vec![vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_families.graphics)
            .queue_priorities(&queue_priorities)];

        // A second queue only when present lives on a different family
        if !queue_families.is_unified() {
            queue_create_infos.push(
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(queue_families.present)
                    .queue_priorities(&queue_priorities),
            );
        }

        // Required device extensions
        #[allow(unused_mut)]
        let mut extensions = vec![ash::khr::swapchain::NAME.as_ptr()];

        #[cfg(target_os = "macos")]
        {
            extensions.push(ash::khr::portability_subset::NAME.as_ptr());
        }

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions);

        let device = unsafe {
            instance
                .handle
                .create_device(physical_device, &create_info, None)
        }
        .context("Failed to create logical device")?;

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

        Ok((device, graphics_queue, present_queue))
    }

    /// Allocate GPU memory through the shared allocator.
    pub fn allocate(&self, desc: &AllocationCreateDesc) -> Result<Allocation> {
        Ok(self.allocator.lock().allocate(desc)?)
    }

    /// Return an allocation to the shared allocator.
    pub fn free(&self, allocation: Allocation) {
        if let Err(e) = self.allocator.lock().free(allocation) {
            log::error!("Failed to free GPU allocation: {}", e);
        }
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        // Wait for device to finish
        let _ = self.wait_idle();

        unsafe {
            // The allocator holds device memory and must go first
            ManuallyDrop::drop(self.allocator.get_mut());
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn prefers_family_with_graphics_and_present() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        // Family 0 cannot present, family 1 can
        let selected = select_queue_families(&families, &[false, true]).unwrap();
        assert_eq!(selected.graphics, 1);
        assert_eq!(selected.present, 1);
        assert!(selected.is_unified());
    }

    #[test]
    fn splits_families_when_no_single_family_does_both() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
        ];
        // Only the transfer-only family can present
        let selected = select_queue_families(&families, &[true, false]).unwrap();
        assert_eq!(selected.graphics, 1);
        assert_eq!(selected.present, 0);
        assert!(!selected.is_unified());
    }

    #[test]
    fn combined_family_beats_earlier_split_pair() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let selected = select_queue_families(&families, &[false, true]).unwrap();
        assert_eq!(selected.graphics, 1);
        assert_eq!(selected.present, 1);
    }

    #[test]
    fn rejects_device_without_required_queues() {
        let families = [family(vk::QueueFlags::COMPUTE)];
        assert!(select_queue_families(&families, &[true]).is_none());

        let families = [family(vk::QueueFlags::GRAPHICS)];
        assert!(select_queue_families(&families, &[false]).is_none());

        assert!(select_queue_families(&[], &[]).is_none());
    }

    fn gpu(device_type: vk::PhysicalDeviceType, max_dim: u32) -> vk::PhysicalDeviceProperties {
        vk::PhysicalDeviceProperties {
            device_type,
            limits: vk::PhysicalDeviceLimits {
                max_image_dimension2_d: max_dim,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn discrete_gpu_scores_highest() {
        let discrete = score_device(&gpu(vk::PhysicalDeviceType::DISCRETE_GPU, 16384));
        let integrated = score_device(&gpu(vk::PhysicalDeviceType::INTEGRATED_GPU, 16384));
        let cpu = score_device(&gpu(vk::PhysicalDeviceType::CPU, 16384));
        assert!(discrete > integrated);
        assert!(integrated > cpu);
    }

    #[test]
    fn image_size_limit_breaks_ties() {
        let big = score_device(&gpu(vk::PhysicalDeviceType::DISCRETE_GPU, 32768));
        let small = score_device(&gpu(vk::PhysicalDeviceType::DISCRETE_GPU, 4096));
        assert!(big > small);
        // But never enough to outrank a better device type
        let weak_discrete = score_device(&gpu(vk::PhysicalDeviceType::DISCRETE_GPU, 1024));
        let strong_integrated = score_device(&gpu(vk::PhysicalDeviceType::INTEGRATED_GPU, 32768));
        assert!(weak_discrete > strong_integrated);
    }
}

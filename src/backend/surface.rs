// =============================================================================
// WINDOW SURFACE - VkSurfaceKHR wrapper and support queries
// =============================================================================
//
// Bridges the window to Vulkan. Every swapchain decision starts from the
// queries on this type, so they live here instead of on the device.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;

use super::instance::Instance;

pub struct Surface {
    pub handle: vk::SurfaceKHR,
    pub loader: ash::khr::surface::Instance,
    _instance: Arc<Instance>,
}

impl Surface {
    /// Create a surface for the given window. The window must outlive the
    /// surface.
    pub fn new(
        instance: Arc<Instance>,
        window: &(impl HasDisplayHandle + HasWindowHandle),
    ) -> Result<Self> {
        let display_handle = window.display_handle()?.as_raw();
        let window_handle = window.window_handle()?.as_raw();

        let handle = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.handle,
                display_handle,
                window_handle,
                None,
            )
        }
        .context("Failed to create window surface")?;

        let loader = ash::khr::surface::Instance::new(&instance.entry, &instance.handle);

        log::info!("Window surface created");

        Ok(Self {
            handle,
            loader,
            _instance: instance,
        })
    }

    /// Can the given queue family present to this surface?
    pub fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> Result<bool> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, queue_family, self.handle)
        }
        .context("Failed to query surface present support")
    }

    pub fn capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.loader
                .get_physical_device_surface_capabilities(physical_device, self.handle)
        }
        .context("Failed to query surface capabilities")
    }

    pub fn formats(&self, physical_device: vk::PhysicalDevice) -> Result<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_formats(physical_device, self.handle)
        }
        .context("Failed to query surface formats")
    }

    pub fn present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_present_modes(physical_device, self.handle)
        }
        .context("Failed to query surface present modes")
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
        log::info!("Window surface destroyed");
    }
}

// =============================================================================
// VULKAN INSTANCE - Entry point, validation layers, debug messenger
// =============================================================================
//
// First Vulkan object created and the last one destroyed. Owns the loaded
// entry point, the VkInstance and the optional debug messenger that routes
// validation layer output into the log.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::RawDisplayHandle;
use std::ffi::{CStr, CString};

/// Validation layer name.
const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Required Vulkan API version.
/// On macOS with MoltenVK, only Vulkan 1.2 is supported.
#[cfg(target_os = "macos")]
const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 2, 0);

#[cfg(not(target_os = "macos"))]
const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 3, 0);

pub struct Instance {
    pub entry: ash::Entry,
    pub handle: ash::Instance,
    debug: Option<DebugMessenger>,
}

struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl Instance {
    /// Create the Vulkan instance with the surface extensions the current
    /// display requires, plus validation layers when requested and available.
    pub fn new(
        app_name: &str,
        display_handle: RawDisplayHandle,
        enable_validation: bool,
    ) -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        // Check if validation layers are actually installed
        let validation_available = enable_validation && check_validation_layer_support(&entry);
        if enable_validation && !validation_available {
            log::warn!("Validation layers requested but not available");
        }

        let app_name = CString::new(app_name)?;
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&app_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(REQUIRED_API_VERSION);

        // Surface extensions for the windowing system we are running under
        let mut extensions = ash_window::enumerate_required_extensions(display_handle)
            .context("Failed to query required surface extensions")?
            .to_vec();

        if validation_available {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        #[allow(unused_mut)]
        let mut create_flags = vk::InstanceCreateFlags::empty();

        #[cfg(target_os = "macos")]
        {
            extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
            create_flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
        }

        let layer_names: Vec<*const std::ffi::c_char> = if validation_available {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .flags(create_flags)
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let handle = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        log::info!(
            "Vulkan instance created (validation: {})",
            validation_available
        );

        // Route validation messages into the log
        let debug = if validation_available {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &handle);
            let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(debug_callback));
            let messenger = unsafe { loader.create_debug_utils_messenger(&messenger_info, None) }
                .context("Failed to create debug messenger")?;
            Some(DebugMessenger { loader, messenger })
        } else {
            None
        };

        Ok(Self {
            entry,
            handle,
            debug,
        })
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some(debug) = self.debug.take() {
                debug
                    .loader
                    .destroy_debug_utils_messenger(debug.messenger, None);
            }
            self.handle.destroy_instance(None);
        }
        log::info!("Vulkan instance destroyed");
    }
}

/// Check if the validation layer is available.
fn check_validation_layer_support(entry: &ash::Entry) -> bool {
    let available_layers = match unsafe { entry.enumerate_instance_layer_properties() } {
        Ok(layers) => layers,
        Err(_) => return false,
    };

    available_layers.iter().any(|layer| {
        let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
        name == VALIDATION_LAYER_NAME
    })
}

/// Forward validation layer messages to the log at a matching level.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() {
        return vk::FALSE;
    }

    let message = unsafe { CStr::from_ptr((*callback_data).p_message) }.to_string_lossy();

    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[vulkan] {}", message);
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("[vulkan] {}", message);
    } else {
        log::debug!("[vulkan] {}", message);
    }

    vk::FALSE
}

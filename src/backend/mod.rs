// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash with safety and ergonomics
// Performance: Zero-cost abstractions, explicit control

pub mod buffer;
pub mod command;
pub mod depth;
pub mod descriptor;
pub mod device;
pub mod instance;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use buffer::UniformBuffer;
pub use command::CommandPool;
pub use depth::DepthBuffer;
pub use descriptor::PipelineDescriptors;
pub use device::VulkanDevice;
pub use instance::Instance;
pub use surface::Surface;
pub use swapchain::Swapchain;
pub use sync::FrameSync;

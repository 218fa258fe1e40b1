// =============================================================================
// VULKAN BOOTSTRAP - Config-driven initialization up to the first clear
// =============================================================================
//
// Brings Vulkan from nothing to a window filled with a solid color. Every
// selection the surface leaves open (queue families, pixel format, present
// mode, depth tiling) is decided by a policy function in the backend.
//
// INITIALIZATION ORDER:
// ┌─────────────────────────────────────────────────────────────────┐
// │  Instance (validation, debug messenger)                         │
// │    └── Surface (window connection)                              │
// │          └── Device (queues, allocator)                         │
// │                └── Swapchain + Depth buffer                     │
// │                      └── Uniform buffer + Descriptors           │
// │                            └── Command buffers + Sync           │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Acquire swapchain image
// 2. Wait for this slot's previous frame
// 3. Submit the pre-recorded clear commands
// 4. Present to screen
//
// =============================================================================

mod backend;
mod config;

use anyhow::{Context, Result};
use ash::vk;
use backend::buffer::default_mvp;
use backend::command::transition_image_layout;
use backend::{
    CommandPool, DepthBuffer, FrameSync, Instance, PipelineDescriptors, Surface, Swapchain,
    UniformBuffer, VulkanDevice,
};
use config::Config;
use raw_window_handle::HasDisplayHandle;
use std::fs::OpenOptions;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    // Initialize logging
    init_logging(&config);
    log::info!("Starting Vulkan bootstrap");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen {
            "fullscreen"
        } else {
            "windowed"
        }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Initialize logging, optionally redirected to a file
fn init_logging(config: &Config) {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let mut builder = Builder::from_default_env();
    builder.filter_level(LevelFilter::Info);

    if config.debug.log_to_file {
        match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => {
                eprintln!("Failed to open log file {}: {}", config.debug.log_file, e);
            }
        }
    }

    builder.init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Main application struct holding all Vulkan resources.
///
/// IMPORTANT: Resources must be destroyed in reverse order of creation to
/// avoid use-after-free. Each component holds an Arc to what it depends on,
/// and Drop tears them down back to front.
pub struct App {
    // ─────────────────────────────────────────────────────────────────────────
    // CONFIGURATION
    // ─────────────────────────────────────────────────────────────────────────
    config: Config,

    // ─────────────────────────────────────────────────────────────────────────
    // WINDOW
    // ─────────────────────────────────────────────────────────────────────────
    window: Option<Arc<Window>>,
    is_fullscreen: bool,

    // ─────────────────────────────────────────────────────────────────────────
    // VULKAN CORE
    // ─────────────────────────────────────────────────────────────────────────
    instance: Option<Arc<Instance>>,
    surface: Option<Surface>,
    device: Option<Arc<VulkanDevice>>,

    // ─────────────────────────────────────────────────────────────────────────
    // PRESENTATION
    // ─────────────────────────────────────────────────────────────────────────
    swapchain: Option<Swapchain>,
    depth_buffer: Option<DepthBuffer>,

    // ─────────────────────────────────────────────────────────────────────────
    // SHADER INTERFACE
    // ─────────────────────────────────────────────────────────────────────────
    uniform_buffer: Option<UniformBuffer>,
    descriptors: Option<PipelineDescriptors>,

    // ─────────────────────────────────────────────────────────────────────────
    // COMMANDS
    // ─────────────────────────────────────────────────────────────────────────
    command_pool: Option<CommandPool>,
    /// One command buffer per swapchain image (pre-recorded clears)
    command_buffers: Vec<vk::CommandBuffer>,

    // ─────────────────────────────────────────────────────────────────────────
    // SYNCHRONIZATION
    // ─────────────────────────────────────────────────────────────────────────
    /// Sync objects for each frame in flight
    frame_sync: Vec<FrameSync>,
    /// Which sync slot we're currently using
    current_frame: usize,

    // ─────────────────────────────────────────────────────────────────────────
    // OPTIMIZATION: Pre-allocated arrays to avoid per-frame heap allocations
    // ─────────────────────────────────────────────────────────────────────────
    wait_stages: [vk::PipelineStageFlags; 1],

    // ─────────────────────────────────────────────────────────────────────────
    // STATE FLAGS
    // ─────────────────────────────────────────────────────────────────────────
    /// Set to true when window is resized - triggers swapchain recreation
    needs_resize: bool,
    /// Set to true when window is minimized (size = 0) - skip rendering
    is_minimized: bool,

    // ─────────────────────────────────────────────────────────────────────────
    // FPS TRACKING
    // ─────────────────────────────────────────────────────────────────────────
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    pub fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let now = Instant::now();
        Self {
            config,
            window: None,
            is_fullscreen,
            instance: None,
            surface: None,
            device: None,
            swapchain: None,
            depth_buffer: None,
            uniform_buffer: None,
            descriptors: None,
            command_pool: None,
            command_buffers: Vec::new(),
            frame_sync: Vec::new(),
            current_frame: 0,
            wait_stages: [vk::PipelineStageFlags::TRANSFER],
            needs_resize: false,
            is_minimized: false,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    /// Initialize all Vulkan resources.
    ///
    /// Called once when the window is created. Sets up:
    /// 1. Instance with validation layers
    /// 2. Surface (window connection)
    /// 3. Device (GPU choice, queues, allocator)
    /// 4. Command pool
    /// 5. Swapchain, depth buffer, pre-recorded commands
    /// 6. Uniform buffer and descriptor/pipeline layouts
    /// 7. Synchronization primitives
    fn init_vulkan(&mut self, window: Arc<Window>) -> Result<()> {
        log::info!("Initializing Vulkan...");

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Create instance
        // ─────────────────────────────────────────────────────────────────────
        // Enable validation layers based on config (and debug build)
        let enable_validation = cfg!(debug_assertions) && self.config.debug.validation_layers;
        let display_handle = window.display_handle()?.as_raw();
        let instance = Arc::new(Instance::new(
            &self.config.window.title,
            display_handle,
            enable_validation,
        )?);

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Create surface (window connection)
        // ─────────────────────────────────────────────────────────────────────
        let surface = Surface::new(instance.clone(), window.as_ref())?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Create device
        // ─────────────────────────────────────────────────────────────────────
        let device = Arc::new(VulkanDevice::new(instance.clone(), &surface)?);

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Create command pool
        // ─────────────────────────────────────────────────────────────────────
        let command_pool = CommandPool::new(device.clone())?;

        self.instance = Some(instance);
        self.surface = Some(surface);
        self.device = Some(device.clone());
        self.command_pool = Some(command_pool);

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Create swapchain and related resources
        // ─────────────────────────────────────────────────────────────────────
        self.create_swapchain_resources(&window)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 6: Create uniform buffer and descriptors
        // ─────────────────────────────────────────────────────────────────────
        let aspect = self
            .swapchain
            .as_ref()
            .map(|s| s.aspect_ratio())
            .unwrap_or(1.0);
        let uniform_buffer = UniformBuffer::new(device.clone(), default_mvp(aspect))?;
        let descriptors = PipelineDescriptors::new(device.clone(), &uniform_buffer)?;
        self.uniform_buffer = Some(uniform_buffer);
        self.descriptors = Some(descriptors);

        // ─────────────────────────────────────────────────────────────────────
        // STEP 7: Create synchronization primitives
        // ─────────────────────────────────────────────────────────────────────
        // These don't need to be recreated on resize
        let max_frames = self.config.graphics.max_frames_in_flight.max(1);
        self.frame_sync = (0..max_frames)
            .map(|_| FrameSync::new(&device))
            .collect::<Result<Vec<_>>>()?;

        log::info!("Vulkan initialized successfully!");
        Ok(())
    }

    /// Create the swapchain, depth buffer and per-image command buffers.
    ///
    /// Separated from init_vulkan because it runs again whenever the window
    /// is resized.
    fn create_swapchain_resources(&mut self, window: &Window) -> Result<()> {
        let device = self.device.as_ref().context("Device not initialized")?;
        let surface = self.surface.as_ref().context("Surface not initialized")?;
        let command_pool = self
            .command_pool
            .as_ref()
            .context("Command pool not initialized")?;

        // Get current window size
        let size = window.inner_size();

        // Don't create swapchain if window is minimized (size = 0)
        if size.width == 0 || size.height == 0 {
            self.is_minimized = true;
            return Ok(());
        }
        self.is_minimized = false;

        // ─────────────────────────────────────────────────────────────────────
        // IMPORTANT: Drop old swapchain BEFORE creating new one
        // ─────────────────────────────────────────────────────────────────────
        // The surface can only have one swapchain at a time
        self.swapchain = None;

        let swapchain = Swapchain::new(
            device.clone(),
            surface,
            size.width,
            size.height,
            self.config.get_surface_format(),
            self.config.get_present_mode(),
        )?;

        // ─────────────────────────────────────────────────────────────────────
        // Depth buffer matching the new extent
        // ─────────────────────────────────────────────────────────────────────
        self.depth_buffer = None;
        let depth_buffer = DepthBuffer::new(
            device.clone(),
            command_pool,
            swapchain.extent,
            self.config.get_depth_format(),
            self.config.graphics.clear_depth,
        )?;

        // ─────────────────────────────────────────────────────────────────────
        // Allocate command buffers (one per swapchain image)
        // ─────────────────────────────────────────────────────────────────────
        if !self.command_buffers.is_empty() {
            command_pool.free_command_buffers(&self.command_buffers);
        }

        let command_buffers =
            command_pool.allocate_command_buffers(swapchain.images.len() as u32)?;

        // ─────────────────────────────────────────────────────────────────────
        // Pre-record the clear commands for each swapchain image
        // ─────────────────────────────────────────────────────────────────────
        self.record_clear_commands(&device.device, &swapchain, &command_buffers)?;

        log::info!("Created {} pre-recorded command buffers", command_buffers.len());

        self.swapchain = Some(swapchain);
        self.depth_buffer = Some(depth_buffer);
        self.command_buffers = command_buffers;
        self.needs_resize = false;

        // Camera follows the new aspect ratio
        if let Some(ref mut uniform_buffer) = self.uniform_buffer {
            let aspect = self
                .swapchain
                .as_ref()
                .map(|s| s.aspect_ratio())
                .unwrap_or(1.0);
            uniform_buffer.write_mvp(default_mvp(aspect))?;
        }

        Ok(())
    }

    /// Recreate swapchain after window resize.
    fn recreate_swapchain(&mut self) -> Result<()> {
        // Wait for GPU to finish all work before destroying resources
        if let Some(ref device) = self.device {
            device.wait_idle()?;
        }

        // Clone the window Arc to avoid borrow conflict
        let window = self.window.clone();
        if let Some(ref win) = window {
            self.create_swapchain_resources(win)?;
        }

        Ok(())
    }

    // =========================================================================
    // COMMAND RECORDING
    // =========================================================================

    /// Pre-record the clear commands for all swapchain images.
    ///
    /// The content is static, so recording once and resubmitting every frame
    /// keeps the hot path free of recording overhead.
    fn record_clear_commands(
        &self,
        device: &ash::Device,
        swapchain: &Swapchain,
        command_buffers: &[vk::CommandBuffer],
    ) -> Result<()> {
        // Clear color from config (RGBA, 0-1 range)
        let clear_color = vk::ClearColorValue {
            float32: self.config.graphics.clear_color,
        };

        let subresource_range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };

        for (i, &cmd) in command_buffers.iter().enumerate() {
            let image = swapchain.images[i];

            unsafe {
                let begin_info = vk::CommandBufferBeginInfo::default();
                device.begin_command_buffer(cmd, &begin_info)?;

                // vkCmdClearColorImage needs the image in TRANSFER_DST layout
                transition_image_layout(
                    device,
                    cmd,
                    image,
                    vk::ImageAspectFlags::COLOR,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                );

                device.cmd_clear_color_image(
                    cmd,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &clear_color,
                    &[subresource_range],
                );

                // Presentation expects PRESENT_SRC
                transition_image_layout(
                    device,
                    cmd,
                    image,
                    vk::ImageAspectFlags::COLOR,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::PRESENT_SRC_KHR,
                );

                device.end_command_buffer(cmd)?;
            }
        }

        Ok(())
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    /// Render a single frame.
    ///
    /// This is the hot path - called every frame. Keep it lean!
    ///
    /// FRAME TIMELINE:
    ///   acquire_image ─> wait_fence ─> submit ─> present ─> next slot
    pub fn render_frame(&mut self) -> Result<bool> {
        // Skip rendering if minimized
        if self.is_minimized {
            return Ok(false);
        }

        // Handle resize if needed
        if self.needs_resize {
            self.recreate_swapchain()?;
            if self.is_minimized {
                return Ok(false);
            }
        }

        let device = self.device.as_ref().context("Device not initialized")?;
        let swapchain = self
            .swapchain
            .as_ref()
            .context("Swapchain not initialized")?;
        let sync = self
            .frame_sync
            .get(self.current_frame)
            .context("Frame sync not initialized")?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Acquire next swapchain image
        // ─────────────────────────────────────────────────────────────────────
        let image_index = match swapchain.acquire_next_image(u64::MAX, sync.image_available)? {
            Some((index, suboptimal)) => {
                // Suboptimal still presents but the swapchain should be rebuilt
                if suboptimal {
                    self.needs_resize = true;
                }
                index
            }
            None => {
                // Out of date, rebuild before the next frame
                self.needs_resize = true;
                return Ok(false);
            }
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Wait for the previous frame using this sync slot
        // ─────────────────────────────────────────────────────────────────────
        sync.wait_and_reset(&device.device)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Submit command buffer
        // ─────────────────────────────────────────────────────────────────────
        let wait_semaphores = [sync.image_available];
        let signal_semaphores = [sync.render_finished];
        let command_buffers = [self.command_buffers[image_index as usize]];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            device.device.queue_submit(
                device.graphics_queue,
                &[submit_info],
                sync.in_flight_fence,
            )?;
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Present the image on the present queue
        // ─────────────────────────────────────────────────────────────────────
        let present_result =
            swapchain.present(device.present_queue, image_index, &signal_semaphores);

        match present_result {
            Ok(suboptimal) => {
                if suboptimal {
                    self.needs_resize = true;
                }
            }
            Err(_) => {
                self.needs_resize = true;
            }
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Advance to next frame slot
        // ─────────────────────────────────────────────────────────────────────
        self.current_frame = (self.current_frame + 1) % self.frame_sync.len();

        Ok(true)
    }

    // =========================================================================
    // FULLSCREEN TOGGLE
    // =========================================================================

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }

            self.needs_resize = true;
        }
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        if now.duration_since(self.last_fps_update).as_secs_f32() >= 1.0 {
            let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                let mode = if self.is_fullscreen {
                    "fullscreen"
                } else {
                    "windowed"
                };
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{}]",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                    mode
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        // Create window with settings from config
        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes =
                window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        // Initialize Vulkan
        if let Err(e) = self.init_vulkan(window.clone()) {
            log::error!("Failed to initialize Vulkan: {:?}", e);
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    /// Handle window events.
    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(ref device) = self.device {
                    let _ = device.wait_idle();
                }
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);

                if size.width == 0 || size.height == 0 {
                    self.is_minimized = true;
                } else {
                    self.is_minimized = false;
                    self.needs_resize = true;
                }
            }

            WindowEvent::RedrawRequested => match self.render_frame() {
                Ok(rendered) => {
                    if rendered {
                        self.update_fps();
                    }
                }
                Err(e) => {
                    log::error!("Render error: {:?}", e);
                }
            },

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match key {
                            // ESC - Quit application
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                event_loop.exit();
                            }
                            // F11 - Toggle fullscreen
                            KeyCode::F11 => {
                                self.toggle_fullscreen();
                            }
                            _ => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Called when the event loop is about to block waiting for events.
    /// We use this to request continuous redraws.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        if let Some(ref device) = self.device {
            // Wait for GPU to finish before destroying anything
            let _ = device.wait_idle();

            // Destroy in reverse order of creation!
            self.descriptors = None;
            self.uniform_buffer = None;

            for sync in &self.frame_sync {
                sync.destroy(&device.device);
            }
            self.frame_sync.clear();

            if let Some(ref pool) = self.command_pool {
                if !self.command_buffers.is_empty() {
                    pool.free_command_buffers(&self.command_buffers);
                }
            }
            self.command_buffers.clear();

            self.depth_buffer = None;
            self.swapchain = None;
            self.command_pool = None;
        }

        // Device, surface and instance unwind through their Drop impls
        self.device = None;
        self.surface = None;
        self.instance = None;

        log::info!("Cleanup complete");
    }
}

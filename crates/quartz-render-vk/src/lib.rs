//! Vulkan presentation core: device discovery, swapchain negotiation, a
//! fixed triangle pipeline, and a double-buffered frame scheduler.

mod commands;
mod context;
mod error;
mod frame;
mod pipeline;
mod swapchain;

pub use context::{DeviceQueues, QueueFamilies};
pub use error::{RenderError, Result};
pub use frame::{FrameScheduler, FrameStatus, MAX_FRAMES_IN_FLIGHT};
pub use swapchain::{
    choose_extent, choose_present_mode, choose_surface_format, image_count, Swapchain,
    SwapchainSupport,
};

use std::time::Duration;

use ash::ext::debug_utils;
use ash::khr::{surface, swapchain as khr_swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{info, warn};

use quartz_render::{RenderSize, Renderer};

use crate::error::VkOp;

// Compiled by build.rs; opaque blobs consumed once at pipeline build.
const VERT_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/triangle.vert.spv"));
const FRAG_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/triangle.frag.spv"));

#[derive(Clone, Copy, Debug)]
pub struct VkConfig {
    /// Enable the validation layer and debug messenger. Fatal at startup if
    /// the layer is not installed.
    pub diagnostics: bool,
    /// Bound for the two per-frame fence waits; `None` waits forever.
    pub frame_timeout: Option<Duration>,
}

impl Default for VkConfig {
    fn default() -> Self {
        Self {
            diagnostics: false,
            frame_timeout: Some(Duration::from_secs(5)),
        }
    }
}

pub struct VkRenderer {
    _entry: Entry,
    instance: Instance,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,

    device: ash::Device,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,

    swapchain_loader: khr_swapchain::Device,
    swapchain: Swapchain,

    render_pass: vk::RenderPass,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    framebuffers: Vec<vk::Framebuffer>,

    cmd_pool: vk::CommandPool,
    cmd_bufs: Vec<vk::CommandBuffer>,

    frames: FrameScheduler,
}

unsafe fn build_renderer(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    size: RenderSize,
    config: VkConfig,
) -> Result<VkRenderer> {
    let entry = Entry::linked();
    let dh = display.display_handle()?.as_raw();
    let wh = window.window_handle()?.as_raw();

    // 1) Instance, then diagnostics, then the surface FROM this instance.
    let instance = context::create_instance(&entry, dh, config.diagnostics)?;
    let debug = if config.diagnostics {
        Some(context::create_debug_messenger(&entry, &instance)?)
    } else {
        None
    };
    let surface_loader = surface::Instance::new(&entry, &instance);
    let surface =
        ash_window::create_surface(&entry, &instance, dh, wh, None).op("create_surface")?;

    // 2) First device whose queues/extensions/swapchain fit the surface.
    let (phys, families) = context::select_physical_device(&instance, &surface_loader, surface)?;
    let DeviceQueues {
        device,
        graphics,
        present,
    } = context::create_device_and_queues(&instance, phys, families)?;

    // 3) Swapchain; the support query here matches the selection-time one
    // for the chosen device.
    let swapchain_loader = khr_swapchain::Device::new(&instance, &device);
    let support = SwapchainSupport::query(&surface_loader, phys, surface)?;
    let chain = Swapchain::create(&device, &swapchain_loader, &support, surface, size, families)?;

    // 4) Fixed pipeline and its per-image attachments.
    let render_pass = pipeline::create_render_pass(&device, chain.format)?;
    let (pipeline_layout, pipe) =
        pipeline::create_pipeline(&device, render_pass, chain.extent, VERT_SPV, FRAG_SPV)?;
    let framebuffers =
        pipeline::create_framebuffers(&device, render_pass, &chain.image_views, chain.extent)?;

    // 5) Static command buffers, recorded once.
    let cmd_pool = commands::create_command_pool(&device, families.graphics)?;
    let cmd_bufs = commands::record_command_buffers(
        &device,
        cmd_pool,
        render_pass,
        pipe,
        &framebuffers,
        chain.extent,
    )?;

    // 6) Frame scheduler, sized independently of the image count.
    let frames = FrameScheduler::new(&device, chain.images.len(), config.frame_timeout)?;

    info!(
        "vulkan renderer ready ({} frames in flight, diagnostics={})",
        MAX_FRAMES_IN_FLIGHT, config.diagnostics
    );

    Ok(VkRenderer {
        _entry: entry,
        instance,
        debug,
        surface_loader,
        surface,
        device,
        graphics_queue: graphics,
        present_queue: present,
        swapchain_loader,
        swapchain: chain,
        render_pass,
        pipeline_layout,
        pipeline: pipe,
        framebuffers,
        cmd_pool,
        cmd_bufs,
        frames,
    })
}

impl VkRenderer {
    pub fn with_config(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: VkConfig,
    ) -> Result<Self> {
        unsafe { build_renderer(window, display, size, config) }
    }

    /// Runs one tick of the frame protocol. A stale swapchain is surfaced
    /// to the caller; every other non-success outcome is fatal.
    pub fn draw_frame(&mut self) -> Result<FrameStatus> {
        unsafe {
            self.frames.tick(
                &self.device,
                &self.swapchain_loader,
                self.swapchain.handle,
                self.graphics_queue,
                self.present_queue,
                &self.cmd_bufs,
            )
        }
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
    ) -> anyhow::Result<Self> {
        Ok(Self::with_config(window, display, size, VkConfig::default())?)
    }

    fn render(&mut self, _elapsed: f64) -> anyhow::Result<()> {
        match self.draw_frame()? {
            FrameStatus::Presented => Ok(()),
            FrameStatus::SwapchainStale => {
                // Rebuilding on resize is not implemented; report and skip.
                warn!("swapchain stale; frame skipped");
                Ok(())
            }
        }
    }
}

// STRICT TEARDOWN ORDER (exact reverse of creation):
// - device_wait_idle() so no submitted work references anything below
// - Frame-sync objects
// - Command pool (frees its buffers)
// - Framebuffers, pipeline, layout, render pass
// - Image views, then swapchain
// - Device
// - Debug messenger, surface; instance last.
impl Drop for VkRenderer {
    fn drop(&mut self) {
        unsafe {
            let d = &self.device;
            d.device_wait_idle().ok();

            self.frames.destroy(d);
            d.destroy_command_pool(self.cmd_pool, None);

            for &fb in &self.framebuffers {
                d.destroy_framebuffer(fb, None);
            }
            d.destroy_pipeline(self.pipeline, None);
            d.destroy_pipeline_layout(self.pipeline_layout, None);
            d.destroy_render_pass(self.render_pass, None);

            self.swapchain.destroy(d, &self.swapchain_loader);

            d.destroy_device(None);

            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
    }
}

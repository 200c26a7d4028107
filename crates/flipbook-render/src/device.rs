// SPDX-License-Identifier: CEPL-1.0
//! The device boundary consumed by the presentation engine.
//!
//! Everything the engine needs from the GPU goes through [`GraphicsDevice`].
//! Handles are plain `ash::vk` handles; the trait only decides who issues the
//! calls. Acquire and present report staleness through [`Acquire`] and
//! [`PresentStatus`] so call sites never compare raw result codes.

use ash::vk;

use crate::error::{DeviceResult, RenderError};
use crate::resources::FrameBindings;

/// Wait "forever". A GPU that never signals is treated as a fatal condition.
pub const WAIT_FOREVER: u64 = u64::MAX;

/// Everything needed to create one image chain.
#[derive(Clone, Copy, Debug)]
pub struct ChainDesc {
    pub min_image_count: u32,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    /// Chain being replaced, or null.
    pub old_chain: vk::SwapchainKHR,
}

/// Result of asking the chain for the next image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    Image { index: u32, suboptimal: bool },
    OutOfDate,
}

/// Result of a present request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentStatus {
    Optimal,
    Suboptimal,
    OutOfDate,
}

impl PresentStatus {
    pub fn is_stale(self) -> bool {
        !matches!(self, PresentStatus::Optimal)
    }
}

/// One queue submission: a single command buffer gated on a single semaphore.
#[derive(Clone, Copy, Debug)]
pub struct Submission {
    pub command_buffer: vk::CommandBuffer,
    pub wait_semaphore: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal_semaphore: vk::Semaphore,
    pub signal_fence: vk::Fence,
}

/// Depth attachment shared by every framebuffer of one chain. Sized to the
/// chain extent, so it is rebuilt with the chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DepthTarget {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
}

/// Framebuffer plus what a render pass needs to begin on it.
#[derive(Clone, Copy, Debug)]
pub struct RenderTarget {
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear: [f32; 4],
}

pub trait GraphicsDevice {
    // --- surface queries ---
    fn surface_capabilities(&self) -> DeviceResult<vk::SurfaceCapabilitiesKHR>;
    fn surface_formats(&self) -> DeviceResult<Vec<vk::SurfaceFormatKHR>>;
    fn surface_present_modes(&self) -> DeviceResult<Vec<vk::PresentModeKHR>>;

    // --- image chain ---
    fn create_swapchain(&mut self, desc: &ChainDesc) -> DeviceResult<vk::SwapchainKHR>;
    fn swapchain_images(&self, chain: vk::SwapchainKHR) -> DeviceResult<Vec<vk::Image>>;
    fn destroy_swapchain(&mut self, chain: vk::SwapchainKHR);

    /// Make the render pass and pipeline match `format`. Called before any
    /// framebuffer of a new chain is created, while the device is idle.
    fn prepare_pipeline(&mut self, format: vk::Format) -> DeviceResult<()>;

    fn create_image_view(&mut self, image: vk::Image, format: vk::Format)
        -> DeviceResult<vk::ImageView>;
    fn destroy_image_view(&mut self, view: vk::ImageView);
    /// Image, memory and view; fails with `NoMemoryType` when no
    /// device-local type fits.
    fn create_depth_target(&mut self, extent: vk::Extent2D) -> Result<DepthTarget, RenderError>;
    fn destroy_depth_target(&mut self, depth: DepthTarget);
    fn create_framebuffer(
        &mut self,
        view: vk::ImageView,
        depth: vk::ImageView,
        extent: vk::Extent2D,
    ) -> DeviceResult<vk::Framebuffer>;
    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer);

    // --- synchronization ---
    fn create_fence(&mut self, signaled: bool) -> DeviceResult<vk::Fence>;
    fn destroy_fence(&mut self, fence: vk::Fence);
    fn create_semaphore(&mut self) -> DeviceResult<vk::Semaphore>;
    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore);
    fn wait_for_fence(&mut self, fence: vk::Fence, timeout: u64) -> DeviceResult<()>;
    fn fence_signaled(&self, fence: vk::Fence) -> DeviceResult<bool>;
    fn reset_fence(&mut self, fence: vk::Fence) -> DeviceResult<()>;

    // --- command buffers ---
    fn allocate_command_buffers(&mut self, count: u32) -> DeviceResult<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&mut self, buffers: &[vk::CommandBuffer]);
    fn begin_commands(&mut self, cmd: vk::CommandBuffer) -> DeviceResult<()>;
    fn cmd_begin_render_pass(&mut self, cmd: vk::CommandBuffer, target: &RenderTarget);
    /// Bind the graphics pipeline and set viewport/scissor to `extent`.
    fn cmd_bind_pipeline(&mut self, cmd: vk::CommandBuffer, extent: vk::Extent2D);
    fn cmd_bind_resources(&mut self, cmd: vk::CommandBuffer, bindings: &FrameBindings);
    fn cmd_draw_indexed(&mut self, cmd: vk::CommandBuffer, index_count: u32);
    fn cmd_end_render_pass(&mut self, cmd: vk::CommandBuffer);
    fn end_commands(&mut self, cmd: vk::CommandBuffer) -> DeviceResult<()>;

    // --- queue ---
    fn queue_submit(&mut self, submission: &Submission) -> DeviceResult<()>;
    fn acquire_next_image(
        &mut self,
        chain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> DeviceResult<Acquire>;
    fn queue_present(
        &mut self,
        chain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> DeviceResult<PresentStatus>;
    fn wait_idle(&mut self) -> DeviceResult<()>;
}

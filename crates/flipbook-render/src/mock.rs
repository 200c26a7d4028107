// SPDX-License-Identifier: CEPL-1.0
//! Test doubles: a scripted device with an in-order fake GPU queue, a
//! window with scripted sizes, and per-image resources that count calls.

use std::cell::Cell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use ash::vk::{self, Handle};

use crate::device::{
    Acquire, ChainDesc, DepthTarget, GraphicsDevice, PresentStatus, RenderTarget, Submission,
};
use crate::error::{DeviceError, DeviceResult, RenderError};
use crate::resources::{FrameBindings, ResourceLoader};
use crate::window::WindowSystem;
use crate::RenderSize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Call {
    CreateSwapchain(vk::SwapchainKHR),
    DestroySwapchain(vk::SwapchainKHR),
    PreparePipeline(vk::Format),
    CreateImageView(vk::ImageView),
    DestroyImageView(vk::ImageView),
    CreateDepthTarget { view: vk::ImageView, extent: vk::Extent2D },
    DestroyDepthTarget(vk::ImageView),
    CreateFramebuffer(vk::Framebuffer),
    DestroyFramebuffer(vk::Framebuffer),
    WaitFence { fence: vk::Fence, was_signaled: bool },
    ResetFence(vk::Fence),
    BeginCommands(vk::CommandBuffer),
    BeginRenderPass(vk::CommandBuffer, vk::Framebuffer),
    BindPipeline(vk::CommandBuffer),
    BindResources(vk::CommandBuffer),
    DrawIndexed(vk::CommandBuffer, u32),
    EndRenderPass(vk::CommandBuffer),
    EndCommands(vk::CommandBuffer),
    Submit { cmd: vk::CommandBuffer, fence: vk::Fence },
    Acquire(Acquire),
    Present { image_index: u32, status: PresentStatus },
    WaitIdle,
}

struct MockChain {
    images: Vec<vk::Image>,
    next: u32,
}

pub struct MockDevice {
    pub caps: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub modes: Vec<vk::PresentModeKHR>,

    pub calls: Vec<Call>,
    pub last_desc: Option<ChainDesc>,
    /// Broken protocol rules observed so far.
    pub violations: Vec<String>,

    /// Submissions the fake GPU may keep unfinished.
    pub latency: usize,
    /// Zero-based acquire calls that report an out-of-date chain.
    pub stale_acquires: HashSet<usize>,
    /// Zero-based acquire calls that hand out an image flagged suboptimal.
    pub suboptimal_acquires: HashSet<usize>,
    /// Zero-based present calls and what they report.
    pub present_results: HashMap<usize, PresentStatus>,
    pub submit_error: Option<vk::Result>,
    pub fail_create_swapchain: Option<vk::Result>,
    pub fail_depth_target: Option<vk::Result>,
    pub fail_framebuffer_after: Option<usize>,
    pub fail_semaphore_after: Option<usize>,

    next_handle: u64,
    live: HashSet<u64>,
    live_count: Rc<Cell<usize>>,
    chains: HashMap<vk::SwapchainKHR, MockChain>,
    fences: HashMap<vk::Fence, bool>,
    pending: VecDeque<vk::Fence>,
    cmd_owner: HashMap<vk::CommandBuffer, vk::Fence>,
    acquires: usize,
    presents: usize,
    framebuffers_made: usize,
    semaphores_made: usize,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    pub fn new() -> Self {
        MockDevice {
            caps: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: vk::Extent2D {
                    width: u32::MAX,
                    height: u32::MAX,
                },
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                ..Default::default()
            },
            formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            calls: Vec::new(),
            last_desc: None,
            violations: Vec::new(),
            latency: 1,
            stale_acquires: HashSet::new(),
            suboptimal_acquires: HashSet::new(),
            present_results: HashMap::new(),
            submit_error: None,
            fail_create_swapchain: None,
            fail_depth_target: None,
            fail_framebuffer_after: None,
            fail_semaphore_after: None,
            next_handle: 1,
            live: HashSet::new(),
            live_count: Rc::new(Cell::new(0)),
            chains: HashMap::new(),
            fences: HashMap::new(),
            pending: VecDeque::new(),
            cmd_owner: HashMap::new(),
            acquires: 0,
            presents: 0,
            framebuffers_made: 0,
            semaphores_made: 0,
        }
    }

    /// Objects created through the device and not yet destroyed.
    pub fn live_objects(&self) -> usize {
        self.live_count.get()
    }

    /// Same count as [`MockDevice::live_objects`], still readable after the
    /// device has been moved into an engine and dropped.
    pub fn live_counter(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.live_count)
    }

    fn sync_live_count(&self) {
        self.live_count.set(self.live.len() + self.chains.len());
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    fn alloc(&mut self) -> u64 {
        let raw = self.next_handle;
        self.next_handle += 1;
        self.live.insert(raw);
        self.sync_live_count();
        raw
    }

    fn free(&mut self, raw: u64, what: &str) {
        if !self.live.remove(&raw) {
            self.violations.push(format!("{what} {raw:#x} freed twice or never created"));
        }
        self.sync_live_count();
    }

    /// The GPU finishes submissions in order; everything up to and including
    /// `fence` completes.
    fn complete_through(&mut self, fence: vk::Fence) {
        while let Some(f) = self.pending.pop_front() {
            self.fences.insert(f, true);
            if f == fence {
                break;
            }
        }
    }

    fn complete_all(&mut self) {
        while let Some(f) = self.pending.pop_front() {
            self.fences.insert(f, true);
        }
    }
}

impl GraphicsDevice for MockDevice {
    fn surface_capabilities(&self) -> DeviceResult<vk::SurfaceCapabilitiesKHR> {
        Ok(self.caps)
    }

    fn surface_formats(&self) -> DeviceResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.formats.clone())
    }

    fn surface_present_modes(&self) -> DeviceResult<Vec<vk::PresentModeKHR>> {
        Ok(self.modes.clone())
    }

    fn create_swapchain(&mut self, desc: &ChainDesc) -> DeviceResult<vk::SwapchainKHR> {
        if let Some(r) = self.fail_create_swapchain {
            return Err(DeviceError::new("create_swapchain", r));
        }
        if desc.old_chain != vk::SwapchainKHR::null() && !self.chains.contains_key(&desc.old_chain) {
            self.violations.push("retired chain is not alive".into());
        }
        let raw = self.next_handle;
        self.next_handle += 1;
        let handle = vk::SwapchainKHR::from_raw(raw);
        let images = (0..desc.min_image_count)
            .map(|i| vk::Image::from_raw(0x1000_0000 + raw * 16 + u64::from(i)))
            .collect();
        self.chains.insert(handle, MockChain { images, next: 0 });
        self.sync_live_count();
        self.last_desc = Some(*desc);
        self.calls.push(Call::CreateSwapchain(handle));
        Ok(handle)
    }

    fn swapchain_images(&self, chain: vk::SwapchainKHR) -> DeviceResult<Vec<vk::Image>> {
        self.chains
            .get(&chain)
            .map(|c| c.images.clone())
            .ok_or(DeviceError::new("get_swapchain_images", vk::Result::ERROR_SURFACE_LOST_KHR))
    }

    fn destroy_swapchain(&mut self, chain: vk::SwapchainKHR) {
        if self.chains.remove(&chain).is_none() {
            self.violations.push("unknown swapchain destroyed".into());
        }
        self.sync_live_count();
        self.calls.push(Call::DestroySwapchain(chain));
    }

    fn prepare_pipeline(&mut self, format: vk::Format) -> DeviceResult<()> {
        self.calls.push(Call::PreparePipeline(format));
        Ok(())
    }

    fn create_image_view(
        &mut self,
        _image: vk::Image,
        _format: vk::Format,
    ) -> DeviceResult<vk::ImageView> {
        let view = vk::ImageView::from_raw(self.alloc());
        self.calls.push(Call::CreateImageView(view));
        Ok(view)
    }

    fn destroy_image_view(&mut self, view: vk::ImageView) {
        self.free(view.as_raw(), "image view");
        self.calls.push(Call::DestroyImageView(view));
    }

    fn create_depth_target(&mut self, extent: vk::Extent2D) -> Result<DepthTarget, RenderError> {
        if let Some(r) = self.fail_depth_target {
            return Err(DeviceError::new("create_image", r).into());
        }
        let depth = DepthTarget {
            image: vk::Image::from_raw(self.alloc()),
            memory: vk::DeviceMemory::from_raw(self.alloc()),
            view: vk::ImageView::from_raw(self.alloc()),
        };
        self.calls.push(Call::CreateDepthTarget {
            view: depth.view,
            extent,
        });
        Ok(depth)
    }

    fn destroy_depth_target(&mut self, depth: DepthTarget) {
        self.free(depth.view.as_raw(), "depth view");
        self.free(depth.image.as_raw(), "depth image");
        self.free(depth.memory.as_raw(), "depth memory");
        self.calls.push(Call::DestroyDepthTarget(depth.view));
    }

    fn create_framebuffer(
        &mut self,
        _view: vk::ImageView,
        depth: vk::ImageView,
        _extent: vk::Extent2D,
    ) -> DeviceResult<vk::Framebuffer> {
        if self.fail_framebuffer_after == Some(self.framebuffers_made) {
            return Err(DeviceError::new(
                "create_framebuffer",
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            ));
        }
        if !self.live.contains(&depth.as_raw()) {
            self.violations.push("framebuffer built on a dead depth view".into());
        }
        self.framebuffers_made += 1;
        let fb = vk::Framebuffer::from_raw(self.alloc());
        self.calls.push(Call::CreateFramebuffer(fb));
        Ok(fb)
    }

    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer) {
        self.free(framebuffer.as_raw(), "framebuffer");
        self.calls.push(Call::DestroyFramebuffer(framebuffer));
    }

    fn create_fence(&mut self, signaled: bool) -> DeviceResult<vk::Fence> {
        let fence = vk::Fence::from_raw(self.alloc());
        self.fences.insert(fence, signaled);
        Ok(fence)
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        if self.pending.contains(&fence) {
            self.violations.push("fence destroyed while in flight".into());
        }
        self.fences.remove(&fence);
        self.free(fence.as_raw(), "fence");
    }

    fn create_semaphore(&mut self) -> DeviceResult<vk::Semaphore> {
        if self.fail_semaphore_after == Some(self.semaphores_made) {
            return Err(DeviceError::new(
                "create_semaphore",
                vk::Result::ERROR_OUT_OF_HOST_MEMORY,
            ));
        }
        self.semaphores_made += 1;
        Ok(vk::Semaphore::from_raw(self.alloc()))
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        self.free(semaphore.as_raw(), "semaphore");
    }

    fn wait_for_fence(&mut self, fence: vk::Fence, _timeout: u64) -> DeviceResult<()> {
        let signaled = self.fences.get(&fence).copied().unwrap_or(false);
        if !signaled {
            if !self.pending.contains(&fence) {
                // Nothing will ever signal it.
                return Err(DeviceError::new("wait_for_fences", vk::Result::TIMEOUT));
            }
            self.complete_through(fence);
        }
        self.calls.push(Call::WaitFence {
            fence,
            was_signaled: signaled,
        });
        Ok(())
    }

    fn fence_signaled(&self, fence: vk::Fence) -> DeviceResult<bool> {
        Ok(self.fences.get(&fence).copied().unwrap_or(false))
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> DeviceResult<()> {
        if self.pending.contains(&fence) {
            self.violations.push("fence reset while in flight".into());
        }
        self.fences.insert(fence, false);
        self.calls.push(Call::ResetFence(fence));
        Ok(())
    }

    fn allocate_command_buffers(&mut self, count: u32) -> DeviceResult<Vec<vk::CommandBuffer>> {
        Ok((0..count)
            .map(|_| vk::CommandBuffer::from_raw(self.alloc()))
            .collect())
    }

    fn free_command_buffers(&mut self, buffers: &[vk::CommandBuffer]) {
        for &cmd in buffers {
            if let Some(f) = self.cmd_owner.remove(&cmd) {
                if self.pending.contains(&f) {
                    self.violations.push("command buffer freed while in flight".into());
                }
            }
            self.free(cmd.as_raw(), "command buffer");
        }
    }

    fn begin_commands(&mut self, cmd: vk::CommandBuffer) -> DeviceResult<()> {
        if let Some(f) = self.cmd_owner.get(&cmd) {
            if self.pending.contains(f) {
                self.violations
                    .push(format!("command buffer {:#x} re-recorded while in flight", cmd.as_raw()));
            }
        }
        self.calls.push(Call::BeginCommands(cmd));
        Ok(())
    }

    fn cmd_begin_render_pass(&mut self, cmd: vk::CommandBuffer, target: &RenderTarget) {
        self.calls.push(Call::BeginRenderPass(cmd, target.framebuffer));
    }

    fn cmd_bind_pipeline(&mut self, cmd: vk::CommandBuffer, _extent: vk::Extent2D) {
        self.calls.push(Call::BindPipeline(cmd));
    }

    fn cmd_bind_resources(&mut self, cmd: vk::CommandBuffer, _bindings: &FrameBindings) {
        self.calls.push(Call::BindResources(cmd));
    }

    fn cmd_draw_indexed(&mut self, cmd: vk::CommandBuffer, index_count: u32) {
        self.calls.push(Call::DrawIndexed(cmd, index_count));
    }

    fn cmd_end_render_pass(&mut self, cmd: vk::CommandBuffer) {
        self.calls.push(Call::EndRenderPass(cmd));
    }

    fn end_commands(&mut self, cmd: vk::CommandBuffer) -> DeviceResult<()> {
        self.calls.push(Call::EndCommands(cmd));
        Ok(())
    }

    fn queue_submit(&mut self, submission: &Submission) -> DeviceResult<()> {
        if let Some(r) = self.submit_error {
            return Err(DeviceError::new("queue_submit", r));
        }
        let fence = submission.signal_fence;
        if self.fences.get(&fence).copied().unwrap_or(false) {
            self.violations.push("submitted with an already signaled fence".into());
        }
        self.pending.push_back(fence);
        self.cmd_owner.insert(submission.command_buffer, fence);
        self.calls.push(Call::Submit {
            cmd: submission.command_buffer,
            fence,
        });
        while self.pending.len() > self.latency {
            if let Some(done) = self.pending.pop_front() {
                self.fences.insert(done, true);
            }
        }
        Ok(())
    }

    fn acquire_next_image(
        &mut self,
        chain: vk::SwapchainKHR,
        _signal: vk::Semaphore,
    ) -> DeviceResult<Acquire> {
        let n = self.acquires;
        self.acquires += 1;
        let result = if self.stale_acquires.contains(&n) {
            Acquire::OutOfDate
        } else {
            let c = self.chains.get_mut(&chain).ok_or(DeviceError::new(
                "acquire_next_image",
                vk::Result::ERROR_SURFACE_LOST_KHR,
            ))?;
            let index = c.next;
            c.next = (c.next + 1) % c.images.len() as u32;
            Acquire::Image {
                index,
                suboptimal: self.suboptimal_acquires.contains(&n),
            }
        };
        self.calls.push(Call::Acquire(result));
        Ok(result)
    }

    fn queue_present(
        &mut self,
        _chain: vk::SwapchainKHR,
        image_index: u32,
        _wait: vk::Semaphore,
    ) -> DeviceResult<PresentStatus> {
        let n = self.presents;
        self.presents += 1;
        let status = self
            .present_results
            .get(&n)
            .copied()
            .unwrap_or(PresentStatus::Optimal);
        self.calls.push(Call::Present {
            image_index,
            status,
        });
        Ok(status)
    }

    fn wait_idle(&mut self) -> DeviceResult<()> {
        self.complete_all();
        self.calls.push(Call::WaitIdle);
        Ok(())
    }
}

pub struct MockWindow {
    pub size: RenderSize,
    /// After this many `wait_events` calls, report the given size.
    pub resize_after_waits: Option<(usize, RenderSize)>,
    pub close_after_waits: Option<usize>,
    pub waits: usize,
    pub closing: bool,
}

impl MockWindow {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: RenderSize::new(width, height),
            resize_after_waits: None,
            close_after_waits: None,
            waits: 0,
            closing: false,
        }
    }
}

impl WindowSystem for MockWindow {
    fn framebuffer_size(&self) -> RenderSize {
        self.size
    }

    fn should_close(&self) -> bool {
        self.closing
    }

    fn wait_events(&mut self) {
        self.waits += 1;
        if let Some((n, size)) = self.resize_after_waits {
            if self.waits >= n {
                self.size = size;
            }
        }
        if self.close_after_waits.is_some_and(|n| self.waits >= n) {
            self.closing = true;
        }
    }
}

#[derive(Default)]
pub struct MockResources {
    pub image_count: usize,
    pub resizes: usize,
    pub updates: Vec<usize>,
    pub released: bool,
}

impl ResourceLoader<MockDevice> for MockResources {
    fn resize(&mut self, _device: &mut MockDevice, image_count: usize) -> Result<(), RenderError> {
        self.image_count = image_count;
        self.resizes += 1;
        Ok(())
    }

    fn update(
        &mut self,
        _device: &mut MockDevice,
        image_index: usize,
        _extent: vk::Extent2D,
    ) -> Result<(), RenderError> {
        if image_index >= self.image_count {
            return Err(RenderError::setup("update", "image index past resource count"));
        }
        self.updates.push(image_index);
        Ok(())
    }

    fn bindings(&self, image_index: usize) -> FrameBindings {
        FrameBindings {
            descriptor_set: vk::DescriptorSet::from_raw(0x2000 + image_index as u64),
            vertex_buffer: vk::Buffer::from_raw(0x3000),
            index_buffer: vk::Buffer::from_raw(0x3001),
            index_count: 3,
        }
    }

    fn release(&mut self, _device: &mut MockDevice) {
        self.image_count = 0;
        self.released = true;
    }
}

// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::khr::swapchain;
use ash::vk;
use flipbook_render::{
    Acquire, ChainDesc, DepthTarget, DeviceError, DeviceResult, FrameBindings, GraphicsDevice,
    PresentStatus, RenderError, RenderTarget, Submission,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::debug;

use crate::depth;
use crate::instance::{self, InstanceBundle};
use crate::pipeline;
use crate::rollback::Rollback;

fn fail(call: &'static str) -> impl FnOnce(vk::Result) -> DeviceError {
    move |r| DeviceError::new(call, r)
}

/// The `ash` implementation of [`GraphicsDevice`]: one instance, one surface,
/// one graphics+present queue.
pub struct AshDevice {
    inst: InstanceBundle,
    phys: vk::PhysicalDevice,
    mem_props: vk::PhysicalDeviceMemoryProperties,
    device: ash::Device,
    queue: vk::Queue,
    swapchain_loader: swapchain::Device,
    cmd_pool: vk::CommandPool,
    depth_format: vk::Format,

    set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    // Rebuilt when the chain's format changes.
    render_pass: vk::RenderPass,
    pipeline: vk::Pipeline,
    pipeline_format: vk::Format,
}

impl AshDevice {
    // Each step registers its undo; a failure releases everything created so
    // far, newest first.
    pub fn new(window: &dyn HasWindowHandle, display: &dyn HasDisplayHandle) -> Result<Self> {
        unsafe {
            let inst = instance::init_instance_and_surface(window, display)?;
            let mut rollback = Rollback::new();
            let bundle = inst.clone();
            rollback.push(move || bundle.destroy());

            let (phys, queue_family) =
                instance::pick_device_and_queue(&inst.instance, &inst.surface_loader, inst.surface)?;
            let (device, queue) = instance::create_device(&inst.instance, phys, queue_family)?;
            let d = device.clone();
            rollback.push(move || d.destroy_device(None));

            let mem_props = inst.instance.get_physical_device_memory_properties(phys);
            let depth_format = depth::pick_depth_format(&inst.instance, phys);
            let swapchain_loader = swapchain::Device::new(&inst.instance, &device);

            let pool_info = vk::CommandPoolCreateInfo {
                s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
                queue_family_index: queue_family,
                flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
                ..Default::default()
            };
            let cmd_pool = device
                .create_command_pool(&pool_info, None)
                .context("create_command_pool")?;
            let d = device.clone();
            rollback.push(move || d.destroy_command_pool(cmd_pool, None));

            let set_layout =
                pipeline::create_uniform_set_layout(&device).context("create_descriptor_set_layout")?;
            let d = device.clone();
            rollback.push(move || d.destroy_descriptor_set_layout(set_layout, None));

            let pipeline_layout = pipeline::create_pipeline_layout(&device, set_layout)
                .context("create_pipeline_layout")?;
            rollback.disarm();
            debug!("depth format {depth_format:?}");

            Ok(AshDevice {
                inst,
                phys,
                mem_props,
                device,
                queue,
                swapchain_loader,
                cmd_pool,
                depth_format,
                set_layout,
                pipeline_layout,
                render_pass: vk::RenderPass::null(),
                pipeline: vk::Pipeline::null(),
                pipeline_format: vk::Format::UNDEFINED,
            })
        }
    }

    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.cmd_pool
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.mem_props
    }

    pub fn uniform_set_layout(&self) -> vk::DescriptorSetLayout {
        self.set_layout
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.phys
    }

    unsafe fn destroy_pipeline_objects(&mut self) {
        if self.pipeline != vk::Pipeline::null() {
            self.device.destroy_pipeline(self.pipeline, None);
            self.pipeline = vk::Pipeline::null();
        }
        if self.render_pass != vk::RenderPass::null() {
            self.device.destroy_render_pass(self.render_pass, None);
            self.render_pass = vk::RenderPass::null();
        }
        self.pipeline_format = vk::Format::UNDEFINED;
    }
}

impl GraphicsDevice for AshDevice {
    fn surface_capabilities(&self) -> DeviceResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.inst
                .surface_loader
                .get_physical_device_surface_capabilities(self.phys, self.inst.surface)
                .map_err(fail("get_surface_capabilities"))
        }
    }

    fn surface_formats(&self) -> DeviceResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.inst
                .surface_loader
                .get_physical_device_surface_formats(self.phys, self.inst.surface)
                .map_err(fail("get_surface_formats"))
        }
    }

    fn surface_present_modes(&self) -> DeviceResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.inst
                .surface_loader
                .get_physical_device_surface_present_modes(self.phys, self.inst.surface)
                .map_err(fail("get_surface_present_modes"))
        }
    }

    fn create_swapchain(&mut self, desc: &ChainDesc) -> DeviceResult<vk::SwapchainKHR> {
        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: self.inst.surface,
            min_image_count: desc.min_image_count,
            image_format: desc.format.format,
            image_color_space: desc.format.color_space,
            image_extent: desc.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            // graphics and present share one queue family
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform: desc.pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: desc.present_mode,
            clipped: vk::TRUE,
            old_swapchain: desc.old_chain,
            ..Default::default()
        };
        unsafe {
            self.swapchain_loader
                .create_swapchain(&swap_info, None)
                .map_err(fail("create_swapchain"))
        }
    }

    fn swapchain_images(&self, chain: vk::SwapchainKHR) -> DeviceResult<Vec<vk::Image>> {
        unsafe {
            self.swapchain_loader
                .get_swapchain_images(chain)
                .map_err(fail("get_swapchain_images"))
        }
    }

    fn destroy_swapchain(&mut self, chain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(chain, None) }
    }

    fn prepare_pipeline(&mut self, format: vk::Format) -> DeviceResult<()> {
        if self.pipeline != vk::Pipeline::null() && self.pipeline_format == format {
            return Ok(());
        }
        debug!("building render pass and pipeline for {format:?}");
        unsafe {
            self.destroy_pipeline_objects();
            self.render_pass =
                pipeline::create_render_pass(&self.device, format, self.depth_format)
                    .map_err(fail("create_render_pass"))?;
            self.pipeline =
                pipeline::create_pipeline(&self.device, self.render_pass, self.pipeline_layout)
                    .map_err(fail("create_graphics_pipelines"))?;
        }
        self.pipeline_format = format;
        Ok(())
    }

    fn create_image_view(
        &mut self,
        image: vk::Image,
        format: vk::Format,
    ) -> DeviceResult<vk::ImageView> {
        let iv_info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        unsafe {
            self.device
                .create_image_view(&iv_info, None)
                .map_err(fail("create_image_view"))
        }
    }

    fn destroy_image_view(&mut self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn create_depth_target(&mut self, extent: vk::Extent2D) -> Result<DepthTarget, RenderError> {
        unsafe { depth::create_depth_target(&self.device, &self.mem_props, self.depth_format, extent) }
    }

    fn destroy_depth_target(&mut self, target: DepthTarget) {
        unsafe { depth::destroy_depth_target(&self.device, target) }
    }

    fn create_framebuffer(
        &mut self,
        view: vk::ImageView,
        depth: vk::ImageView,
        extent: vk::Extent2D,
    ) -> DeviceResult<vk::Framebuffer> {
        // Attachment order matches the render pass: color, depth.
        let attachments = [view, depth];
        let ci = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass: self.render_pass,
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            width: extent.width,
            height: extent.height,
            layers: 1,
            ..Default::default()
        };
        unsafe {
            self.device
                .create_framebuffer(&ci, None)
                .map_err(fail("create_framebuffer"))
        }
    }

    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) }
    }

    fn create_fence(&mut self, signaled: bool) -> DeviceResult<vk::Fence> {
        let ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: if signaled {
                vk::FenceCreateFlags::SIGNALED
            } else {
                vk::FenceCreateFlags::empty()
            },
            ..Default::default()
        };
        unsafe { self.device.create_fence(&ci, None).map_err(fail("create_fence")) }
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn create_semaphore(&mut self) -> DeviceResult<vk::Semaphore> {
        unsafe {
            self.device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
                .map_err(fail("create_semaphore"))
        }
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn wait_for_fence(&mut self, fence: vk::Fence, timeout: u64) -> DeviceResult<()> {
        unsafe {
            self.device
                .wait_for_fences(std::slice::from_ref(&fence), true, timeout)
                .map_err(fail("wait_for_fences"))
        }
    }

    fn fence_signaled(&self, fence: vk::Fence) -> DeviceResult<bool> {
        unsafe {
            self.device
                .get_fence_status(fence)
                .map_err(fail("get_fence_status"))
        }
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> DeviceResult<()> {
        unsafe {
            self.device
                .reset_fences(std::slice::from_ref(&fence))
                .map_err(fail("reset_fences"))
        }
    }

    fn allocate_command_buffers(&mut self, count: u32) -> DeviceResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.cmd_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count,
            ..Default::default()
        };
        unsafe {
            self.device
                .allocate_command_buffers(&alloc_info)
                .map_err(fail("allocate_command_buffers"))
        }
    }

    fn free_command_buffers(&mut self, buffers: &[vk::CommandBuffer]) {
        unsafe { self.device.free_command_buffers(self.cmd_pool, buffers) }
    }

    fn begin_commands(&mut self, cmd: vk::CommandBuffer) -> DeviceResult<()> {
        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            ..Default::default()
        };
        unsafe {
            // The pool allows individual resets; begin implies one.
            self.device
                .begin_command_buffer(cmd, &bi)
                .map_err(fail("begin_command_buffer"))
        }
    }

    fn cmd_begin_render_pass(&mut self, cmd: vk::CommandBuffer, target: &RenderTarget) {
        let clear = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: target.clear,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: self.render_pass,
            framebuffer: target.framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: target.extent,
            },
            clear_value_count: clear.len() as u32,
            p_clear_values: clear.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.device
                .cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE)
        }
    }

    fn cmd_bind_pipeline(&mut self, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        unsafe {
            self.device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            self.device
                .cmd_set_viewport(cmd, 0, std::slice::from_ref(&viewport));
            self.device
                .cmd_set_scissor(cmd, 0, std::slice::from_ref(&scissor));
        }
    }

    fn cmd_bind_resources(&mut self, cmd: vk::CommandBuffer, bindings: &FrameBindings) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(cmd, 0, &[bindings.vertex_buffer], &[0]);
            self.device
                .cmd_bind_index_buffer(cmd, bindings.index_buffer, 0, vk::IndexType::UINT32);
            self.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline_layout,
                0,
                &[bindings.descriptor_set],
                &[],
            );
        }
    }

    fn cmd_draw_indexed(&mut self, cmd: vk::CommandBuffer, index_count: u32) {
        unsafe { self.device.cmd_draw_indexed(cmd, index_count, 1, 0, 0, 0) }
    }

    fn cmd_end_render_pass(&mut self, cmd: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(cmd) }
    }

    fn end_commands(&mut self, cmd: vk::CommandBuffer) -> DeviceResult<()> {
        unsafe {
            self.device
                .end_command_buffer(cmd)
                .map_err(fail("end_command_buffer"))
        }
    }

    fn queue_submit(&mut self, submission: &Submission) -> DeviceResult<()> {
        let si = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &submission.wait_semaphore,
            p_wait_dst_stage_mask: &submission.wait_stage,
            command_buffer_count: 1,
            p_command_buffers: &submission.command_buffer,
            signal_semaphore_count: 1,
            p_signal_semaphores: &submission.signal_semaphore,
            ..Default::default()
        };
        unsafe {
            self.device
                .queue_submit(
                    self.queue,
                    std::slice::from_ref(&si),
                    submission.signal_fence,
                )
                .map_err(fail("queue_submit"))
        }
    }

    fn acquire_next_image(
        &mut self,
        chain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> DeviceResult<Acquire> {
        let r = unsafe {
            self.swapchain_loader
                .acquire_next_image(chain, u64::MAX, signal, vk::Fence::null())
        };
        match r {
            Ok((index, suboptimal)) => Ok(Acquire::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::OutOfDate),
            Err(e) => Err(DeviceError::new("acquire_next_image", e)),
        }
    }

    fn queue_present(
        &mut self,
        chain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> DeviceResult<PresentStatus> {
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &chain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        match unsafe { self.swapchain_loader.queue_present(self.queue, &present) } {
            Ok(false) => Ok(PresentStatus::Optimal),
            Ok(true) => Ok(PresentStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
            Err(e) => Err(DeviceError::new("queue_present", e)),
        }
    }

    fn wait_idle(&mut self) -> DeviceResult<()> {
        unsafe {
            self.device
                .device_wait_idle()
                .map_err(fail("device_wait_idle"))
        }
    }
}

// STRICT TEARDOWN ORDER:
// - device idle
// - pipeline, render pass and layouts
// - command pool (frees any buffer still allocated from it)
// - device
// - debug messenger, surface, instance last
// Chain, frame slots and per-image resources are released by their owners
// before this runs.
impl Drop for AshDevice {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();

            self.destroy_pipeline_objects();
            self.device.destroy_pipeline_layout(self.pipeline_layout, None);
            self.device
                .destroy_descriptor_set_layout(self.set_layout, None);
            self.device.destroy_command_pool(self.cmd_pool, None);

            self.device.destroy_device(None);
            self.inst.destroy();
        }
    }
}

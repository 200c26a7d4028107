// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::device::{GraphicsDevice, RenderTarget, Submission};
use crate::error::DeviceResult;
use crate::resources::FrameBindings;

/// When per-image command buffers are (re)recorded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RecordPolicy {
    /// Once per chain generation; content is static.
    #[default]
    Cached,
    /// Every tick, after the image is owned by the current slot.
    PerFrame,
}

/// Records and submits one primary command buffer per chain image.
pub struct CommandSubmitter {
    buffers: Vec<vk::CommandBuffer>,
    recorded: Vec<bool>,
    policy: RecordPolicy,
    clear: [f32; 4],
}

impl CommandSubmitter {
    pub fn new(policy: RecordPolicy, clear: [f32; 4]) -> Self {
        Self {
            buffers: Vec::new(),
            recorded: Vec::new(),
            policy,
            clear,
        }
    }

    /// Reallocate for a new chain. Device must be idle.
    pub fn resize<D: GraphicsDevice>(
        &mut self,
        device: &mut D,
        image_count: usize,
    ) -> DeviceResult<()> {
        self.release(device);
        self.buffers = device.allocate_command_buffers(image_count as u32)?;
        self.recorded = vec![false; self.buffers.len()];
        Ok(())
    }

    pub fn release<D: GraphicsDevice>(&mut self, device: &mut D) {
        if !self.buffers.is_empty() {
            device.free_command_buffers(&self.buffers);
        }
        self.buffers.clear();
        self.recorded.clear();
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn command_buffer(&self, image_index: usize) -> vk::CommandBuffer {
        self.buffers[image_index]
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear
    }

    /// Takes effect the next time each image is recorded.
    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear = rgba;
        self.invalidate();
    }

    pub fn invalidate(&mut self) {
        self.recorded.iter_mut().for_each(|r| *r = false);
    }

    pub fn needs_record(&self, image_index: usize) -> bool {
        self.policy == RecordPolicy::PerFrame || !self.recorded[image_index]
    }

    /// Caller guarantees no pending submission still reads this buffer.
    pub fn record<D: GraphicsDevice>(
        &mut self,
        device: &mut D,
        image_index: usize,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        bindings: &FrameBindings,
    ) -> DeviceResult<()> {
        let cmd = self.buffers[image_index];
        let target = RenderTarget {
            framebuffer,
            extent,
            clear: self.clear,
        };

        device.begin_commands(cmd)?;
        device.cmd_begin_render_pass(cmd, &target);
        device.cmd_bind_pipeline(cmd, extent);
        if bindings.index_count > 0 {
            device.cmd_bind_resources(cmd, bindings);
            device.cmd_draw_indexed(cmd, bindings.index_count);
        }
        device.cmd_end_render_pass(cmd);
        device.end_commands(cmd)?;

        self.recorded[image_index] = true;
        Ok(())
    }

    /// Enqueue the image's commands. Does not block.
    pub fn submit<D: GraphicsDevice>(
        &self,
        device: &mut D,
        image_index: usize,
        wait_semaphore: vk::Semaphore,
        signal_semaphore: vk::Semaphore,
        signal_fence: vk::Fence,
    ) -> DeviceResult<()> {
        device.queue_submit(&Submission {
            command_buffer: self.buffers[image_index],
            wait_semaphore,
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore,
            signal_fence,
        })
    }
}

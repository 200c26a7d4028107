// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::device::GraphicsDevice;
use crate::error::RenderError;

/// What one image's command buffer binds before drawing.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameBindings {
    pub descriptor_set: vk::DescriptorSet,
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    /// 0 records a clear-only pass.
    pub index_count: u32,
}

/// Owner of per-image resources (uniform buffers, descriptor sets) that must
/// track the image chain's length.
pub trait ResourceLoader<D: GraphicsDevice> {
    /// Reallocate for `image_count` images. Only called while the device is idle.
    fn resize(&mut self, device: &mut D, image_count: usize) -> Result<(), RenderError>;

    /// Write this frame's data for `image_index`. The image is owned by the
    /// calling frame slot and no earlier submission is still reading it.
    fn update(
        &mut self,
        device: &mut D,
        image_index: usize,
        extent: vk::Extent2D,
    ) -> Result<(), RenderError>;

    fn bindings(&self, image_index: usize) -> FrameBindings;

    /// Free everything. The device is idle.
    fn release(&mut self, device: &mut D);
}

// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend for `flipbook-render`, built on `ash`.

mod debug;
mod depth;
mod device;
mod instance;
mod memory;
mod mesh;
mod pipeline;
mod rollback;

pub use device::AshDevice;
pub use memory::find_memory_type;
pub use mesh::{spin_mvp, MeshResources, TransformUbo, QUADS_IDXS, QUADS_VERTS};
pub use pipeline::Vertex;

/// Presentation engine driven by the Vulkan backend.
pub type VkEngine = flipbook_render::PresentationEngine<AshDevice, MeshResources>;

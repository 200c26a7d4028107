// SPDX-License-Identifier: CEPL-1.0
//! Backend-neutral frame presentation: the image chain lifecycle, frame
//! slots, image ownership and the per-frame loop driving them.

pub mod chain;
pub mod device;
pub mod engine;
pub mod error;
pub mod ownership;
pub mod resources;
pub mod slots;
pub mod submit;
pub mod surface;
pub mod window;

#[cfg(test)]
mod mock;

pub use ash::vk;
pub use chain::ImageChain;
pub use device::{
    Acquire, ChainDesc, DepthTarget, GraphicsDevice, PresentStatus, RenderTarget, Submission,
};
pub use engine::{EngineConfig, LoopState, PresentationEngine, TickOutcome};
pub use error::{DeviceError, DeviceResult, ErrorClass, RenderError};
pub use resources::{FrameBindings, ResourceLoader};
pub use submit::RecordPolicy;
pub use surface::PresentPreference;
pub use window::{ResizeContext, StalenessFlag, WindowSystem};

/// Drawable size in physical pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports zero in at least one dimension.
    pub fn is_zero_area(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

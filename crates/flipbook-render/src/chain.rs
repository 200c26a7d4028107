// SPDX-License-Identifier: CEPL-1.0
//! The rebuildable presentation targets: swapchain, image views, the depth
//! target and framebuffers.
//!
//! STRICT ORDER:
//! - framebuffers before the depth target and views (a framebuffer references
//!   both)
//! - views before the swapchain (a view references a swapchain image)
//! - a replacement chain is created while the old one still exists, with the
//!   old handle passed as the retired chain, and the old one destroyed after.

use ash::vk;
use tracing::info;

use crate::device::{ChainDesc, DepthTarget, GraphicsDevice};
use crate::error::RenderError;
use crate::surface::{
    choose_extent, choose_format, choose_present_mode_for, desired_image_count, fmt_name,
    pm_name, PresentPreference,
};
use crate::RenderSize;

pub struct ImageChain {
    handle: vk::SwapchainKHR,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    depth: Option<DepthTarget>,
    framebuffers: Vec<vk::Framebuffer>,
}

impl ImageChain {
    /// A chain with no swapchain behind it; destroying it is a no-op.
    pub(crate) fn empty() -> Self {
        ImageChain {
            handle: vk::SwapchainKHR::null(),
            format: vk::SurfaceFormatKHR::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            extent: vk::Extent2D::default(),
            images: Vec::new(),
            views: Vec::new(),
            depth: None,
            framebuffers: Vec::new(),
        }
    }

    pub fn build<D: GraphicsDevice>(
        device: &mut D,
        pref: PresentPreference,
        window: RenderSize,
        previous: Option<&ImageChain>,
    ) -> Result<Self, RenderError> {
        let caps = device.surface_capabilities()?;
        let formats = device.surface_formats()?;
        let modes = device.surface_present_modes()?;

        let format = choose_format(&formats)
            .ok_or_else(|| RenderError::setup("surface_formats", "surface offers no formats"))?;
        if modes.is_empty() {
            return Err(RenderError::setup(
                "surface_present_modes",
                "surface offers no present modes",
            ));
        }
        let present_mode = choose_present_mode_for(&modes, pref);
        let extent = choose_extent(&caps, window);

        let desc = ChainDesc {
            min_image_count: desired_image_count(&caps),
            format,
            extent,
            present_mode,
            pre_transform: caps.current_transform,
            old_chain: previous.map_or(vk::SwapchainKHR::null(), |p| p.handle),
        };
        let handle = device.create_swapchain(&desc)?;

        let mut chain = ImageChain {
            handle,
            format,
            present_mode,
            extent,
            images: Vec::new(),
            views: Vec::new(),
            depth: None,
            framebuffers: Vec::new(),
        };
        if let Err(e) = chain.create_targets(device) {
            chain.destroy(device);
            return Err(e);
        }

        info!(
            "image chain ready: {} images {}x{} {} {}",
            chain.images.len(),
            extent.width,
            extent.height,
            fmt_name(format.format),
            pm_name(present_mode)
        );
        Ok(chain)
    }

    fn create_targets<D: GraphicsDevice>(&mut self, device: &mut D) -> Result<(), RenderError> {
        self.images = device.swapchain_images(self.handle)?;
        device.prepare_pipeline(self.format.format)?;

        self.views.reserve(self.images.len());
        for &image in &self.images {
            self.views
                .push(device.create_image_view(image, self.format.format)?);
        }
        let depth = device.create_depth_target(self.extent)?;
        self.depth = Some(depth);

        self.framebuffers.reserve(self.views.len());
        for &view in &self.views {
            self.framebuffers
                .push(device.create_framebuffer(view, depth.view, self.extent)?);
        }
        Ok(())
    }

    /// Destroy the per-image targets but keep the swapchain itself, so it can
    /// still be handed to [`ImageChain::build`] as the retired chain.
    pub fn release_targets<D: GraphicsDevice>(&mut self, device: &mut D) {
        for fb in self.framebuffers.drain(..) {
            device.destroy_framebuffer(fb);
        }
        if let Some(depth) = self.depth.take() {
            device.destroy_depth_target(depth);
        }
        for view in self.views.drain(..) {
            device.destroy_image_view(view);
        }
        // Images belong to the swapchain; only our copy of the handles goes.
        self.images.clear();
    }

    pub fn destroy<D: GraphicsDevice>(&mut self, device: &mut D) {
        self.release_targets(device);
        if self.handle != vk::SwapchainKHR::null() {
            device.destroy_swapchain(self.handle);
            self.handle = vk::SwapchainKHR::null();
        }
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn framebuffer(&self, index: usize) -> vk::Framebuffer {
        self.framebuffers[index]
    }

    pub fn depth(&self) -> Option<DepthTarget> {
        self.depth
    }

    /// Images, views and framebuffers all have one entry per image, and a
    /// depth target exists exactly when there are images.
    pub fn is_consistent(&self) -> bool {
        self.views.len() == self.images.len()
            && self.framebuffers.len() == self.images.len()
            && self.depth.is_some() == !self.images.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, MockDevice};

    #[test]
    fn one_view_and_framebuffer_per_image() {
        let mut dev = MockDevice::new();
        let chain =
            ImageChain::build(&mut dev, PresentPreference::Mailbox, RenderSize::new(800, 600), None)
                .unwrap();
        assert_eq!(chain.image_count(), 3);
        assert!(chain.is_consistent());
        assert_eq!(chain.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(chain.format().format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn min_one_unbounded_max_yields_two_images() {
        let mut dev = MockDevice::new();
        dev.caps.min_image_count = 1;
        dev.caps.max_image_count = 0;
        let chain =
            ImageChain::build(&mut dev, PresentPreference::Mailbox, RenderSize::new(800, 600), None)
                .unwrap();
        assert_eq!(chain.image_count(), 2);
        assert!(chain.is_consistent());
    }

    #[test]
    fn destroy_releases_dependents_before_the_chain() {
        let mut dev = MockDevice::new();
        let mut chain =
            ImageChain::build(&mut dev, PresentPreference::Mailbox, RenderSize::new(800, 600), None)
                .unwrap();
        dev.calls.clear();
        chain.destroy(&mut dev);

        let last_fb = dev.calls.iter().rposition(|c| matches!(c, Call::DestroyFramebuffer(_)));
        let depth = dev.calls.iter().position(|c| matches!(c, Call::DestroyDepthTarget(_)));
        let first_view = dev.calls.iter().position(|c| matches!(c, Call::DestroyImageView(_)));
        let last_view = dev.calls.iter().rposition(|c| matches!(c, Call::DestroyImageView(_)));
        let sc = dev.calls.iter().position(|c| matches!(c, Call::DestroySwapchain(_)));
        assert!(last_fb.unwrap() < depth.unwrap());
        assert!(last_fb.unwrap() < first_view.unwrap());
        assert!(last_view.unwrap() < sc.unwrap());
        assert!(chain.depth().is_none());
        assert_eq!(chain.image_count(), 0);
        assert!(chain.is_consistent());
        assert_eq!(dev.live_objects(), 0);

        // idempotent
        dev.calls.clear();
        chain.destroy(&mut dev);
        assert!(dev.calls.is_empty());
    }

    #[test]
    fn depth_target_follows_the_chain_extent() {
        let mut dev = MockDevice::new();
        let mut old =
            ImageChain::build(&mut dev, PresentPreference::Mailbox, RenderSize::new(800, 600), None)
                .unwrap();
        let old_depth = old.depth().unwrap().view;

        old.release_targets(&mut dev);
        assert!(old.depth().is_none());
        let next = ImageChain::build(
            &mut dev,
            PresentPreference::Mailbox,
            RenderSize::new(1024, 768),
            Some(&old),
        )
        .unwrap();
        old.destroy(&mut dev);

        // One depth target per chain; the old one went before the new one.
        let created: Vec<(vk::ImageView, vk::Extent2D)> = dev
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::CreateDepthTarget { view, extent } => Some((*view, *extent)),
                _ => None,
            })
            .collect();
        assert_eq!(created.len(), 2);
        assert_eq!((created[1].1.width, created[1].1.height), (1024, 768));
        assert_eq!(next.depth().unwrap().view, created[1].0);

        let destroyed_old = dev
            .calls
            .iter()
            .position(|c| *c == Call::DestroyDepthTarget(old_depth))
            .unwrap();
        let created_new = dev
            .calls
            .iter()
            .position(|c| matches!(c, Call::CreateDepthTarget { view, .. } if *view == created[1].0))
            .unwrap();
        assert!(destroyed_old < created_new);
        assert!(next.is_consistent());
        assert!(dev.violations.is_empty(), "{:?}", dev.violations);
    }

    #[test]
    fn failed_depth_target_releases_views_and_chain() {
        let mut dev = MockDevice::new();
        dev.fail_depth_target = Some(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let err =
            ImageChain::build(&mut dev, PresentPreference::Mailbox, RenderSize::new(800, 600), None)
                .err()
                .unwrap();
        assert!(matches!(err, RenderError::Setup { call: "create_image", .. }));
        assert_eq!(dev.count(|c| matches!(c, Call::CreateFramebuffer(_))), 0);
        assert_eq!(dev.live_objects(), 0);
    }

    #[test]
    fn rebuild_retires_previous_handle() {
        let mut dev = MockDevice::new();
        let mut old =
            ImageChain::build(&mut dev, PresentPreference::Mailbox, RenderSize::new(800, 600), None)
                .unwrap();
        old.release_targets(&mut dev);
        let next = ImageChain::build(
            &mut dev,
            PresentPreference::Mailbox,
            RenderSize::new(800, 600),
            Some(&old),
        )
        .unwrap();
        assert_eq!(dev.last_desc.unwrap().old_chain, old.handle());
        assert_ne!(next.handle(), old.handle());
        old.destroy(&mut dev);
    }

    #[test]
    fn empty_format_list_is_a_setup_error() {
        let mut dev = MockDevice::new();
        dev.formats.clear();
        let err =
            ImageChain::build(&mut dev, PresentPreference::Mailbox, RenderSize::new(800, 600), None)
                .err()
                .unwrap();
        assert!(matches!(err, RenderError::Setup { call: "surface_formats", .. }));
    }

    #[test]
    fn refused_chain_creation_is_fatal_setup() {
        let mut dev = MockDevice::new();
        dev.fail_create_swapchain = Some(vk::Result::ERROR_SURFACE_LOST_KHR);
        let err =
            ImageChain::build(&mut dev, PresentPreference::Mailbox, RenderSize::new(800, 600), None)
                .err()
                .unwrap();
        assert!(matches!(err, RenderError::Setup { call: "create_swapchain", .. }));
    }

    #[test]
    fn partial_target_failure_releases_what_was_created() {
        let mut dev = MockDevice::new();
        dev.fail_framebuffer_after = Some(1);
        let err =
            ImageChain::build(&mut dev, PresentPreference::Mailbox, RenderSize::new(800, 600), None)
                .err()
                .unwrap();
        assert!(matches!(err, RenderError::Setup { call: "create_framebuffer", .. }));
        assert_eq!(dev.live_objects(), 0);
    }
}

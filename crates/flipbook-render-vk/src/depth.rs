// SPDX-License-Identifier: CEPL-1.0
//! Depth attachment for one image chain: a device-local image, its memory and
//! a view, all sized to the chain extent.

use ash::vk;
use flipbook_render::{DepthTarget, DeviceError, RenderError};

use crate::memory::find_memory_type;

/// Preference order: 32f, 24+S8, 32f+S8, 16.
pub const DEPTH_CANDIDATES: [vk::Format; 4] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D16_UNORM,
];

/// First candidate whose optimal tiling supports depth attachments, per
/// `features_of`. Falls back to `D32_SFLOAT`.
pub fn choose_depth_format(
    features_of: impl Fn(vk::Format) -> vk::FormatFeatureFlags,
) -> vk::Format {
    DEPTH_CANDIDATES
        .into_iter()
        .find(|&f| features_of(f).contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT))
        .unwrap_or(vk::Format::D32_SFLOAT)
}

pub unsafe fn pick_depth_format(instance: &ash::Instance, phys: vk::PhysicalDevice) -> vk::Format {
    choose_depth_format(|f| {
        instance
            .get_physical_device_format_properties(phys, f)
            .optimal_tiling_features
    })
}

pub unsafe fn create_depth_target(
    device: &ash::Device,
    mem_props: &vk::PhysicalDeviceMemoryProperties,
    format: vk::Format,
    extent: vk::Extent2D,
) -> Result<DepthTarget, RenderError> {
    let img_ci = vk::ImageCreateInfo {
        s_type: vk::StructureType::IMAGE_CREATE_INFO,
        image_type: vk::ImageType::TYPE_2D,
        format,
        extent: vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        },
        mip_levels: 1,
        array_layers: 1,
        samples: vk::SampleCountFlags::TYPE_1,
        tiling: vk::ImageTiling::OPTIMAL,
        usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        ..Default::default()
    };
    let mut target = DepthTarget {
        image: device
            .create_image(&img_ci, None)
            .map_err(|r| DeviceError::new("create_image", r))?,
        ..Default::default()
    };
    if let Err(e) = bind_and_view(device, mem_props, format, &mut target) {
        destroy_depth_target(device, target);
        return Err(e);
    }
    Ok(target)
}

unsafe fn bind_and_view(
    device: &ash::Device,
    mem_props: &vk::PhysicalDeviceMemoryProperties,
    format: vk::Format,
    target: &mut DepthTarget,
) -> Result<(), RenderError> {
    let req = device.get_image_memory_requirements(target.image);
    let ty = find_memory_type(
        mem_props,
        req.memory_type_bits,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;
    let alloc = vk::MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
        allocation_size: req.size,
        memory_type_index: ty,
        ..Default::default()
    };
    target.memory = device
        .allocate_memory(&alloc, None)
        .map_err(|r| DeviceError::new("allocate_memory", r))?;
    device
        .bind_image_memory(target.image, target.memory, 0)
        .map_err(|r| DeviceError::new("bind_image_memory", r))?;

    let view_ci = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image: target.image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::DEPTH,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    };
    target.view = device
        .create_image_view(&view_ci, None)
        .map_err(|r| DeviceError::new("create_image_view", r))?;
    Ok(())
}

// STRICT ORDER: view, image, then memory. Null members are skipped.
pub unsafe fn destroy_depth_target(device: &ash::Device, target: DepthTarget) {
    if target.view != vk::ImageView::null() {
        device.destroy_image_view(target.view, None);
    }
    if target.image != vk::Image::null() {
        device.destroy_image(target.image, None);
    }
    if target.memory != vk::DeviceMemory::null() {
        device.free_memory(target.memory, None);
    }
}

// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, CStr};

use anyhow::{anyhow, Context, Result};
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use tracing::{info, warn};

use crate::debug::{self, DebugState};
use crate::rollback::Rollback;

#[derive(Clone)]
pub struct InstanceBundle {
    pub instance: Instance,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
    pub debug: DebugState,
}

impl InstanceBundle {
    /// Debug messenger, surface, then the instance. Every device made from
    /// this instance must already be gone.
    pub unsafe fn destroy(&self) {
        self.debug.destroy();
        self.surface_loader.destroy_surface(self.surface, None);
        self.instance.destroy_instance(None);
    }
}

unsafe fn create_instance(entry: &Entry, display_raw: RawDisplayHandle) -> Result<Instance> {
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: c"flipbook".as_ptr(),
        application_version: 0,
        p_engine_name: c"flipbook".as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let wsi = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?;
    let (debug_exts, wanted_layers) = debug::instance_extras();

    let mut ext_vec: Vec<*const c_char> = wsi.to_vec();
    ext_vec.extend(debug_exts);

    // Only request layers that are installed.
    let available = entry
        .enumerate_instance_layer_properties()
        .unwrap_or_default();
    let layers: Vec<*const c_char> = wanted_layers
        .into_iter()
        .filter(|&want| {
            let found = available
                .iter()
                .any(|l| CStr::from_ptr(l.layer_name.as_ptr()) == CStr::from_ptr(want));
            if !found {
                warn!("layer {:?} not installed", CStr::from_ptr(want));
            }
            found
        })
        .collect();

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: ext_vec.len() as u32,
        pp_enabled_extension_names: ext_vec.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };

    Ok(entry.create_instance(&create_info, None)?)
}

// STRICT ORDER:
// 1) VkInstance (platform WSI + debug ext)
// 2) VkSurfaceKHR from this instance
// 3) physical device/queue chosen against this surface (present support)
// 4) VkDevice for the selected physical device
pub unsafe fn init_instance_and_surface(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
) -> Result<InstanceBundle> {
    let dh = display
        .display_handle()
        .map_err(|e| anyhow!("{e}"))?
        .as_raw();
    let wh = window
        .window_handle()
        .map_err(|e| anyhow!("{e}"))?
        .as_raw();

    let entry = Entry::linked();
    let instance = create_instance(&entry, dh).context("create_instance")?;
    let mut rollback = Rollback::new();
    let i = instance.clone();
    rollback.push(move || i.destroy_instance(None));

    let surface_loader = surface::Instance::new(&entry, &instance);
    let surface = ash_window::create_surface(&entry, &instance, dh, wh, None)
        .context("ash_window::create_surface")?;
    let sl = surface_loader.clone();
    rollback.push(move || sl.destroy_surface(surface, None));

    let debug = debug::create_debug_messenger(&entry, &instance)?;
    rollback.disarm();

    Ok(InstanceBundle {
        instance,
        surface_loader,
        surface,
        debug,
    })
}

/// First physical device with a queue family that does graphics and can
/// present to `surface`.
pub unsafe fn pick_device_and_queue(
    instance: &Instance,
    surf_i: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, u32)> {
    for phys in instance.enumerate_physical_devices()? {
        let has_swapchain = instance
            .enumerate_device_extension_properties(phys)
            .unwrap_or_default()
            .iter()
            .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == swapchain::NAME);
        if !has_swapchain {
            continue;
        }

        let qprops = instance.get_physical_device_queue_family_properties(phys);
        for (i, q) in qprops.iter().enumerate() {
            if q.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                && surf_i
                    .get_physical_device_surface_support(phys, i as u32, surface)
                    .unwrap_or(false)
            {
                let props = instance.get_physical_device_properties(phys);
                info!(
                    "GPU: {:?} (queue family {i})",
                    CStr::from_ptr(props.device_name.as_ptr())
                );
                return Ok((phys, i as u32));
            }
        }
    }
    Err(anyhow!("no suitable physical device/queue family"))
}

pub unsafe fn create_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    queue_family: u32,
) -> Result<(ash::Device, vk::Queue)> {
    let priorities = [1.0_f32];
    let qinfo = vk::DeviceQueueCreateInfo {
        s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
        queue_family_index: queue_family,
        queue_count: 1,
        p_queue_priorities: priorities.as_ptr(),
        ..Default::default()
    };
    let device_exts = [swapchain::NAME.as_ptr()];

    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: 1,
        p_queue_create_infos: &qinfo,
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        ..Default::default()
    };

    let device = instance
        .create_device(phys, &dinfo, None)
        .context("create_device")?;
    let queue = device.get_device_queue(queue_family, 0);
    Ok((device, queue))
}

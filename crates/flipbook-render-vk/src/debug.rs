// SPDX-License-Identifier: CEPL-1.0
//! Validation messages routed into `tracing`. Debug builds only.

use anyhow::Result;

#[cfg(debug_assertions)]
use ash::{ext::debug_utils as ext_debug, vk};

#[cfg(debug_assertions)]
#[derive(Clone)]
pub struct DebugState {
    loader: ext_debug::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

#[cfg(not(debug_assertions))]
#[derive(Clone)]
pub struct DebugState;

#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = std::ffi::CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        tracing::debug!(target: "vulkan", "{msg}");
    } else {
        tracing::trace!(target: "vulkan", "{msg}");
    }
    vk::FALSE
}

#[cfg(debug_assertions)]
pub unsafe fn create_debug_messenger(
    entry: &ash::Entry,
    instance: &ash::Instance,
) -> Result<DebugState> {
    let loader = ext_debug::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let messenger = loader.create_debug_utils_messenger(&ci, None)?;
    Ok(DebugState { loader, messenger })
}

#[cfg(not(debug_assertions))]
pub unsafe fn create_debug_messenger(
    _entry: &ash::Entry,
    _instance: &ash::Instance,
) -> Result<DebugState> {
    Ok(DebugState)
}

impl DebugState {
    /// Must run before the instance is destroyed.
    #[cfg(debug_assertions)]
    pub unsafe fn destroy(&self) {
        self.loader
            .destroy_debug_utils_messenger(self.messenger, None);
    }

    #[cfg(not(debug_assertions))]
    pub unsafe fn destroy(&self) {}
}

/// Instance extensions and layers the messenger needs.
pub fn instance_extras() -> (Vec<*const std::ffi::c_char>, Vec<*const std::ffi::c_char>) {
    #[cfg(debug_assertions)]
    {
        (
            vec![ext_debug::NAME.as_ptr()],
            vec![c"VK_LAYER_KHRONOS_validation".as_ptr()],
        )
    }
    #[cfg(not(debug_assertions))]
    {
        (Vec::new(), Vec::new())
    }
}

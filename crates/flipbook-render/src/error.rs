// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

/// How a failed device call is handled by the presentation engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Chain is stale or suboptimal; handled by a rebuild, never surfaced.
    Transient,
    /// Creation refused or resources exhausted; terminates after cleanup.
    Setup,
    /// Device lost or otherwise unrecoverable.
    Fatal,
}

/// A device call that returned a failure code.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("{call} failed: {result:?}")]
pub struct DeviceError {
    pub call: &'static str,
    pub result: vk::Result,
}

impl DeviceError {
    pub fn new(call: &'static str, result: vk::Result) -> Self {
        Self { call, result }
    }

    pub fn class(&self) -> ErrorClass {
        classify(self.result)
    }
}

pub type DeviceResult<T> = Result<T, DeviceError>;

pub fn classify(result: vk::Result) -> ErrorClass {
    match result {
        vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR => ErrorClass::Transient,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY
        | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
        | vk::Result::ERROR_TOO_MANY_OBJECTS
        | vk::Result::ERROR_OUT_OF_POOL_MEMORY
        | vk::Result::ERROR_FRAGMENTED_POOL
        | vk::Result::ERROR_INITIALIZATION_FAILED
        | vk::Result::ERROR_SURFACE_LOST_KHR
        | vk::Result::ERROR_NATIVE_WINDOW_IN_USE_KHR => ErrorClass::Setup,
        _ => ErrorClass::Fatal,
    }
}

/// Errors that escape the presentation engine. All of them are terminal.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("setup failed in {call}: {reason}")]
    Setup { call: &'static str, reason: String },

    #[error("device failure in {call}: {result:?}")]
    FatalDevice { call: &'static str, result: vk::Result },

    #[error("no memory type matches bits 0b{type_bits:b} with {flags:?}")]
    NoMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },
}

impl RenderError {
    pub fn setup(call: &'static str, reason: impl Into<String>) -> Self {
        RenderError::Setup {
            call,
            reason: reason.into(),
        }
    }
}

impl From<DeviceError> for RenderError {
    fn from(e: DeviceError) -> Self {
        match e.class() {
            // A stale chain that reaches this conversion happened during
            // creation, where it cannot be recovered.
            ErrorClass::Setup | ErrorClass::Transient => RenderError::Setup {
                call: e.call,
                reason: format!("{:?}", e.result),
            },
            ErrorClass::Fatal => RenderError::FatalDevice {
                call: e.call,
                result: e.result,
            },
        }
    }
}

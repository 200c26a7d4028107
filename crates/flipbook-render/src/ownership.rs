// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::debug;

use crate::device::{GraphicsDevice, WAIT_FOREVER};
use crate::error::DeviceResult;

/// Which frame slot's fence is currently writing each chain image.
///
/// Needed whenever the image count differs from the slot count: a slot can
/// cycle back to an image an older, still running frame is rendering into.
#[derive(Debug, Default)]
pub struct ImageOwnershipTable {
    owners: Vec<Option<vk::Fence>>,
}

impl ImageOwnershipTable {
    pub fn new(image_count: usize) -> Self {
        Self {
            owners: vec![None; image_count],
        }
    }

    pub fn resize(&mut self, image_count: usize) {
        self.owners.clear();
        self.owners.resize(image_count, None);
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn owner(&self, image_index: usize) -> Option<vk::Fence> {
        self.owners[image_index]
    }

    /// Waits (unbounded) for a different, unsignaled owner before claiming.
    /// Returns whether a wait was needed.
    pub fn claim<D: GraphicsDevice>(
        &mut self,
        device: &mut D,
        image_index: usize,
        fence: vk::Fence,
    ) -> DeviceResult<bool> {
        let mut waited = false;
        if let Some(prev) = self.owners[image_index] {
            if prev != fence && !device.fence_signaled(prev)? {
                debug!("image {image_index} still in flight, waiting on its owner");
                device.wait_for_fence(prev, WAIT_FOREVER)?;
                waited = true;
            }
        }
        self.owners[image_index] = Some(fence);
        Ok(waited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Submission;
    use crate::mock::MockDevice;

    #[test]
    fn resize_resets_every_entry() {
        let mut dev = MockDevice::new();
        let f = dev.create_fence(true).unwrap();
        let mut table = ImageOwnershipTable::new(2);
        table.claim(&mut dev, 1, f).unwrap();
        table.resize(3);
        assert_eq!(table.len(), 3);
        assert!((0..3).all(|i| table.owner(i).is_none()));
    }

    #[test]
    fn claim_waits_only_for_a_different_busy_fence() {
        let mut dev = MockDevice::new();
        let a = dev.create_fence(true).unwrap();
        let b = dev.create_fence(true).unwrap();
        let mut table = ImageOwnershipTable::new(3);

        assert!(!table.claim(&mut dev, 0, a).unwrap());

        // `a` now has GPU work pending.
        dev.reset_fence(a).unwrap();
        dev.queue_submit(&Submission {
            command_buffer: vk::CommandBuffer::null(),
            wait_semaphore: vk::Semaphore::null(),
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: vk::Semaphore::null(),
            signal_fence: a,
        })
        .unwrap();

        // Same fence re-claiming: no wait.
        assert!(!table.claim(&mut dev, 0, a).unwrap());
        // Different slot: must wait for `a`.
        assert!(table.claim(&mut dev, 0, b).unwrap());
        assert!(dev.fence_signaled(a).unwrap());
        assert_eq!(table.owner(0), Some(b));
    }
}

// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::device::GraphicsDevice;
use crate::error::DeviceResult;

/// Synchronization objects for one frame in flight.
#[derive(Clone, Copy, Debug)]
pub struct FrameSlot {
    /// Signaled once the GPU finished this slot's previous submission.
    pub in_flight: vk::Fence,
    pub image_acquired: vk::Semaphore,
    pub render_finished: vk::Semaphore,
}

/// Fixed pool of frame slots. Independent of the image chain's lifetime:
/// created once, destroyed once at shutdown.
pub struct FrameSlotRing {
    slots: Vec<FrameSlot>,
}

impl FrameSlotRing {
    pub fn new<D: GraphicsDevice>(device: &mut D, frames: usize) -> DeviceResult<Self> {
        let mut ring = FrameSlotRing {
            slots: Vec::with_capacity(frames),
        };
        for _ in 0..frames {
            match Self::create_slot(device) {
                Ok(slot) => ring.slots.push(slot),
                Err(e) => {
                    ring.destroy(device);
                    return Err(e);
                }
            }
        }
        Ok(ring)
    }

    fn create_slot<D: GraphicsDevice>(device: &mut D) -> DeviceResult<FrameSlot> {
        // Signaled so the first wait on every slot returns immediately.
        let in_flight = device.create_fence(true)?;
        let image_acquired = match device.create_semaphore() {
            Ok(s) => s,
            Err(e) => {
                device.destroy_fence(in_flight);
                return Err(e);
            }
        };
        let render_finished = match device.create_semaphore() {
            Ok(s) => s,
            Err(e) => {
                device.destroy_semaphore(image_acquired);
                device.destroy_fence(in_flight);
                return Err(e);
            }
        };
        Ok(FrameSlot {
            in_flight,
            image_acquired,
            render_finished,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, i: usize) -> FrameSlot {
        self.slots[i % self.slots.len()]
    }

    pub fn fences(&self) -> impl Iterator<Item = vk::Fence> + '_ {
        self.slots.iter().map(|s| s.in_flight)
    }

    /// Device must be idle.
    pub fn destroy<D: GraphicsDevice>(&mut self, device: &mut D) {
        for s in self.slots.drain(..) {
            device.destroy_semaphore(s.render_finished);
            device.destroy_semaphore(s.image_acquired);
            device.destroy_fence(s.in_flight);
        }
    }
}

/// Index of the active frame slot, modulo the slot count.
#[derive(Clone, Copy, Debug)]
pub struct FrameCursor {
    current: usize,
    frames: usize,
}

impl FrameCursor {
    pub fn new(frames: usize) -> Self {
        Self {
            current: 0,
            frames: frames.max(1),
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.frames;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDevice;

    #[test]
    fn slots_start_signaled_and_wrap() {
        let mut dev = MockDevice::new();
        let mut ring = FrameSlotRing::new(&mut dev, 2).unwrap();
        assert_eq!(ring.len(), 2);
        for f in ring.fences() {
            assert!(dev.fence_signaled(f).unwrap());
        }
        assert_eq!(ring.slot(0).in_flight, ring.slot(2).in_flight);
        assert_ne!(ring.slot(0).in_flight, ring.slot(1).in_flight);
        assert_ne!(ring.slot(1).image_acquired, ring.slot(1).render_finished);
        ring.destroy(&mut dev);
        assert_eq!(dev.live_objects(), 0);
    }

    #[test]
    fn failed_semaphore_releases_created_objects() {
        let mut dev = MockDevice::new();
        dev.fail_semaphore_after = Some(3);
        let err = FrameSlotRing::new(&mut dev, 2).err().unwrap();
        assert_eq!(err.call, "create_semaphore");
        assert_eq!(dev.live_objects(), 0);
    }

    #[test]
    fn cursor_cycles_modulo_frames() {
        let mut c = FrameCursor::new(2);
        let seen: Vec<usize> = (0..5)
            .map(|_| {
                let i = c.current();
                c.advance();
                i
            })
            .collect();
        assert_eq!(seen, vec![0, 1, 0, 1, 0]);
    }
}

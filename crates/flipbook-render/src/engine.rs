// SPDX-License-Identifier: CEPL-1.0
//! The presentation loop.
//!
//! STRICT PER-TICK ORDER:
//! 1) wait on the slot fence (the GPU is done with this slot's last frame)
//! 2) acquire (signals the slot's image-acquired semaphore)
//! 3) wait on whoever still owns the acquired image
//! 4) claim the image, reset the slot fence
//! 5) update per-image data, record if needed, submit
//!    (waits image-acquired; signals render-finished and the slot fence)
//! 6) present (waits render-finished)
//! 7) rebuild the chain if it went stale
//! 8) advance to the next slot
//!
//! The fence wait in 1) is the only thing stopping the CPU from touching a
//! slot's objects while the GPU may still read them.

use ash::vk;
use tracing::{debug, info, trace, warn};

use crate::chain::ImageChain;
use crate::device::{Acquire, GraphicsDevice, WAIT_FOREVER};
use crate::error::RenderError;
use crate::ownership::ImageOwnershipTable;
use crate::resources::ResourceLoader;
use crate::slots::{FrameCursor, FrameSlotRing};
use crate::submit::{CommandSubmitter, RecordPolicy};
use crate::surface::PresentPreference;
use crate::window::{ResizeContext, StalenessFlag, WindowSystem};
use crate::RenderSize;

pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    pub frames_in_flight: usize,
    pub present: PresentPreference,
    pub record: RecordPolicy,
    pub clear_color: [f32; 4],
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            present: PresentPreference::Mailbox,
            record: RecordPolicy::Cached,
            clear_color: [0.02, 0.02, 0.04, 1.0],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    AcquireWait,
    Acquiring,
    ImageWait,
    Recording,
    Submitting,
    Presenting,
    /// The staleness flag is being acted on.
    Stale,
    Rebuilding,
    Advance,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// The frame reached the present queue.
    Presented {
        slot: usize,
        image_index: u32,
        rebuilt: bool,
    },
    /// The chain was out of date at acquisition; nothing was submitted.
    Skipped { rebuilt: bool },
}

pub struct PresentationEngine<D: GraphicsDevice, R: ResourceLoader<D>> {
    device: D,
    resources: R,
    chain: ImageChain,
    slots: FrameSlotRing,
    owners: ImageOwnershipTable,
    submitter: CommandSubmitter,
    cursor: FrameCursor,
    stale: StalenessFlag,
    cfg: EngineConfig,
    state: LoopState,
    generation: u64,
    #[cfg(test)]
    history: Vec<LoopState>,
}

impl<D: GraphicsDevice, R: ResourceLoader<D>> PresentationEngine<D, R> {
    /// Creates the frame slots and the first image chain. Blocks while the
    /// window has zero area.
    pub fn new<W: WindowSystem>(
        mut device: D,
        resources: R,
        window: &mut W,
        cfg: EngineConfig,
    ) -> Result<Self, RenderError> {
        if cfg.frames_in_flight == 0 {
            return Err(RenderError::setup(
                "PresentationEngine::new",
                "frames_in_flight must be at least 1",
            ));
        }
        let slots = FrameSlotRing::new(&mut device, cfg.frames_in_flight)?;

        let mut engine = PresentationEngine {
            device,
            resources,
            chain: ImageChain::empty(),
            slots,
            owners: ImageOwnershipTable::default(),
            submitter: CommandSubmitter::new(cfg.record, cfg.clear_color),
            cursor: FrameCursor::new(cfg.frames_in_flight),
            stale: StalenessFlag::new(),
            cfg,
            state: LoopState::Idle,
            generation: 0,
            #[cfg(test)]
            history: Vec::new(),
        };

        let size = wait_for_drawable(window).ok_or_else(|| {
            RenderError::setup("PresentationEngine::new", "window closed before first frame")
        })?;
        // On error the engine is dropped here, which releases what exists.
        engine.rebuild_chain(size)?;

        info!(
            "presentation engine ready ({} frames in flight, {} images)",
            engine.slots.len(),
            engine.chain.image_count()
        );
        Ok(engine)
    }

    pub fn tick<W: WindowSystem>(&mut self, window: &mut W) -> Result<TickOutcome, RenderError> {
        let slot_index = self.cursor.current();
        let slot = self.slots.slot(slot_index);

        // 1) slot reuse barrier
        self.enter(LoopState::AcquireWait);
        self.device.wait_for_fence(slot.in_flight, WAIT_FOREVER)?;

        // 2) acquire
        self.enter(LoopState::Acquiring);
        let acquired = self
            .device
            .acquire_next_image(self.chain.handle(), slot.image_acquired)?;
        let image_index = match acquired {
            Acquire::Image { index, suboptimal } => {
                if suboptimal {
                    debug!("acquire: chain suboptimal, rebuilding after present");
                    self.stale.raise();
                }
                index
            }
            Acquire::OutOfDate => {
                // The slot fence was not reset, so the next tick on this slot
                // will not block.
                warn!("acquire: image chain out of date, skipping frame");
                self.stale.raise();
                let rebuilt = self.rebuild_if_stale(window)?;
                self.enter(LoopState::Idle);
                return Ok(TickOutcome::Skipped { rebuilt });
            }
        };
        let img = image_index as usize;

        // 3) + 4) cross-frame image ownership
        self.enter(LoopState::ImageWait);
        self.owners.claim(&mut self.device, img, slot.in_flight)?;
        self.device.reset_fence(slot.in_flight)?;

        // 5) per-image data, commands, submit
        self.enter(LoopState::Recording);
        let extent = self.chain.extent();
        self.resources.update(&mut self.device, img, extent)?;
        if self.submitter.needs_record(img) {
            let bindings = self.resources.bindings(img);
            self.submitter.record(
                &mut self.device,
                img,
                self.chain.framebuffer(img),
                extent,
                &bindings,
            )?;
        }
        self.enter(LoopState::Submitting);
        self.submitter.submit(
            &mut self.device,
            img,
            slot.image_acquired,
            slot.render_finished,
            slot.in_flight,
        )?;

        // 6) present; the frame counts as shown even if the chain is stale
        self.enter(LoopState::Presenting);
        let status =
            self.device
                .queue_present(self.chain.handle(), image_index, slot.render_finished)?;
        if status.is_stale() {
            warn!("present: chain reported {status:?}");
            self.stale.raise();
        }

        // 7)
        let rebuilt = self.rebuild_if_stale(window)?;

        // 8)
        self.enter(LoopState::Advance);
        self.cursor.advance();
        self.enter(LoopState::Idle);

        Ok(TickOutcome::Presented {
            slot: slot_index,
            image_index,
            rebuilt,
        })
    }

    fn rebuild_if_stale<W: WindowSystem>(&mut self, window: &mut W) -> Result<bool, RenderError> {
        if !self.stale.is_raised() {
            return Ok(false);
        }
        self.enter(LoopState::Stale);
        let Some(size) = wait_for_drawable(window) else {
            info!("window closing, chain rebuild abandoned");
            return Ok(false);
        };
        self.enter(LoopState::Rebuilding);
        self.rebuild_chain(size)?;
        self.stale.clear();
        Ok(true)
    }

    // STRICT ORDER (rebuild):
    // 1) device idle, nothing in flight references the old chain
    // 2) old framebuffers, depth target and views
    // 3) new chain created from the old one, then the old one destroyed
    // 4) everything sized by the image count: command buffers, collaborator
    //    resources, ownership table
    fn rebuild_chain(&mut self, size: RenderSize) -> Result<(), RenderError> {
        self.device.wait_idle()?;

        self.chain.release_targets(&mut self.device);
        let previous = (self.chain.handle() != vk::SwapchainKHR::null()).then_some(&self.chain);
        let next = ImageChain::build(&mut self.device, self.cfg.present, size, previous)?;
        let mut old = std::mem::replace(&mut self.chain, next);
        old.destroy(&mut self.device);

        let count = self.chain.image_count();
        self.submitter.resize(&mut self.device, count)?;
        self.resources.resize(&mut self.device, count)?;
        self.owners.resize(count);

        self.generation += 1;
        if self.generation > 1 {
            info!(
                "image chain rebuilt (generation {}, {}x{})",
                self.generation,
                self.chain.extent().width,
                self.chain.extent().height
            );
        }
        Ok(())
    }

    /// Release every GPU object this engine created. Idempotent.
    pub fn shutdown(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            warn!("wait_idle at shutdown: {e}");
        }
        self.chain.destroy(&mut self.device);
        self.submitter.release(&mut self.device);
        self.resources.release(&mut self.device);
        self.slots.destroy(&mut self.device);
        self.owners.resize(0);
    }

    #[inline]
    fn enter(&mut self, state: LoopState) {
        trace!(?state, slot = self.cursor.current());
        self.state = state;
        #[cfg(test)]
        self.history.push(state);
    }

    pub fn staleness_flag(&self) -> StalenessFlag {
        self.stale.clone()
    }

    /// Context to register with the window layer for resize notifications.
    pub fn resize_context(&self) -> ResizeContext {
        ResizeContext {
            stale: self.stale.clone(),
        }
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.submitter.set_clear_color(rgba);
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn current_slot(&self) -> usize {
        self.cursor.current()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    pub fn chain(&self) -> &ImageChain {
        &self.chain
    }

    pub fn owners(&self) -> &ImageOwnershipTable {
        &self.owners
    }

    /// Number of chains built so far, the first one included.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn resources(&self) -> &R {
        &self.resources
    }
}

impl<D: GraphicsDevice, R: ResourceLoader<D>> Drop for PresentationEngine<D, R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Minimized-window policy: pump events until the window has area again.
/// `None` if the window started closing meanwhile.
fn wait_for_drawable<W: WindowSystem>(window: &mut W) -> Option<RenderSize> {
    let mut size = window.framebuffer_size();
    if size.is_zero_area() {
        info!("window has zero area, waiting");
    }
    while size.is_zero_area() {
        if window.should_close() {
            return None;
        }
        window.wait_events();
        size = window.framebuffer_size();
    }
    Some(size)
}

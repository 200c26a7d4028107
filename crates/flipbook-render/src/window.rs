// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use portable_atomic::{AtomicBool, Ordering};

use crate::RenderSize;

/// The window as seen by the presentation engine.
pub trait WindowSystem {
    /// Current drawable size in physical pixels.
    fn framebuffer_size(&self) -> RenderSize;
    fn should_close(&self) -> bool;
    /// Block until at least one window event has been processed.
    fn wait_events(&mut self);
}

/// "The image chain no longer matches the surface."
///
/// The engine owns the flag and is its only consumer. Clones handed to the
/// window layer may only raise it.
#[derive(Clone, Debug, Default)]
pub struct StalenessFlag(Arc<AtomicBool>);

impl StalenessFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handed to the window layer when registering for resize notifications.
#[derive(Clone, Debug)]
pub struct ResizeContext {
    pub stale: StalenessFlag,
}

impl ResizeContext {
    pub fn notify_resized(&self) {
        self.stale.raise();
    }
}

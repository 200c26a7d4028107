// SPDX-License-Identifier: CEPL-1.0
//! Undo steps for multi-step construction. Steps run newest first when the
//! guard drops, unless [`Rollback::disarm`] ran because construction finished.

#[derive(Default)]
pub struct Rollback {
    steps: Vec<Box<dyn FnOnce()>>,
}

impl Rollback {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn push(&mut self, step: impl FnOnce() + 'static) {
        self.steps.push(Box::new(step));
    }

    /// Keep everything created so far.
    pub fn disarm(mut self) {
        self.steps.clear();
    }
}

impl Drop for Rollback {
    fn drop(&mut self) {
        while let Some(step) = self.steps.pop() {
            step();
        }
    }
}

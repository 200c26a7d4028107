// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::time::{Duration, Instant};

/// `RUST_LOG` wins; otherwise `default_filter` (e.g. "info").
pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

/// Counts presented frames and reports once per interval.
#[derive(Debug)]
pub struct FrameCounter {
    frames: u32,
    total: u64,
    last: Instant,
    interval: Duration,
}

impl FrameCounter {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(Instant::now(), interval)
    }

    pub fn starting_at(now: Instant, interval: Duration) -> Self {
        Self {
            frames: 0,
            total: 0,
            last: now,
            interval,
        }
    }

    /// Count one frame. Returns the frame rate when an interval has elapsed.
    pub fn frame_at(&mut self, now: Instant) -> Option<f32> {
        self.frames = self.frames.saturating_add(1);
        self.total += 1;
        let dt = now.duration_since(self.last);
        if dt < self.interval {
            return None;
        }
        let fps = self.frames as f32 / dt.as_secs_f32();
        self.frames = 0;
        self.last = now;
        Some(fps)
    }

    /// Log `fps ~ N` once per interval.
    pub fn tick(&mut self) {
        if let Some(fps) = self.frame_at(Instant::now()) {
            tracing::info!("fps ~ {fps:.0}");
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

// SPDX-License-Identifier: CEPL-1.0
//! winit window driven by event pumping, so the render loop owns the thread
//! and can block on window events while minimized.

use std::time::Duration;

use anyhow::{anyhow, Result};
use flipbook_render::{RenderSize, ResizeContext, WindowSystem};
use tracing::{debug, info};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window, WindowId},
};

pub use winit;

pub fn render_size(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize::new(size.width, size.height)
}

/// Forwards size changes to the registered context. A change seen before
/// registration is reported once, at registration.
#[derive(Default)]
struct ResizeRelay {
    ctx: Option<ResizeContext>,
    missed: bool,
}

impl ResizeRelay {
    fn resized(&mut self) {
        match &self.ctx {
            Some(ctx) => ctx.notify_resized(),
            None => self.missed = true,
        }
    }

    fn register(&mut self, ctx: ResizeContext) {
        if std::mem::take(&mut self.missed) {
            debug!("resize arrived before registration, reporting it now");
            ctx.notify_resized();
        }
        self.ctx = Some(ctx);
    }
}

struct WindowState {
    title: String,
    initial: PhysicalSize<u32>,
    window: Option<Window>,
    size: RenderSize,
    close_requested: bool,
    create_error: Option<String>,
    resize: ResizeRelay,
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        event_loop.set_control_flow(ControlFlow::Wait);
        if self.window.is_some() {
            return;
        }
        let attrs = Window::default_attributes()
            .with_title(self.title.clone())
            .with_inner_size(self.initial);
        match event_loop.create_window(attrs) {
            Ok(window) => {
                self.size = render_size(window.inner_size());
                info!("window {}x{}", self.size.width, self.size.height);
                self.window = Some(window);
            }
            Err(e) => {
                self.create_error = Some(e.to_string());
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if self.window.as_ref().is_some_and(|w| w.id() != window_id) {
            return;
        }
        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.close_requested = true;
                event_loop.exit();
            }
            WindowEvent::Resized(new_size) => {
                let size = render_size(new_size);
                if size != self.size {
                    debug!("Resized → {}x{}", size.width, size.height);
                    self.size = size;
                    self.resize.resized();
                }
            }
            _ => {}
        }
    }
}

pub struct WinitWindow {
    event_loop: EventLoop<()>,
    state: WindowState,
    exited: bool,
}

impl WinitWindow {
    /// Opens the window; returns once it exists.
    pub fn new(title: &str, width: u32, height: u32) -> Result<Self> {
        let event_loop = EventLoop::new()?;
        let mut this = WinitWindow {
            event_loop,
            state: WindowState {
                title: title.to_owned(),
                initial: PhysicalSize::new(width, height),
                window: None,
                size: RenderSize::new(0, 0),
                close_requested: false,
                create_error: None,
                resize: ResizeRelay::default(),
            },
            exited: false,
        };
        while this.state.window.is_none() {
            if this.pump_with(Some(Duration::from_millis(10))) {
                break;
            }
        }
        if let Some(e) = this.state.create_error.take() {
            return Err(anyhow!("create_window: {e}"));
        }
        if this.state.window.is_none() {
            return Err(anyhow!("event loop exited before the window was created"));
        }
        Ok(this)
    }

    /// Resize notifications from now on raise this context's flag. A resize
    /// that happened since the window opened raises it right away.
    pub fn register_resize(&mut self, ctx: ResizeContext) {
        self.state.resize.register(ctx);
    }

    pub fn window(&self) -> Option<&Window> {
        self.state.window.as_ref()
    }

    /// Process pending events without blocking.
    pub fn pump(&mut self) {
        self.pump_with(Some(Duration::ZERO));
    }

    /// True once the loop has exited.
    fn pump_with(&mut self, timeout: Option<Duration>) -> bool {
        if self.exited {
            return true;
        }
        if let PumpStatus::Exit(code) = self.event_loop.pump_app_events(timeout, &mut self.state)
        {
            debug!("event loop exit ({code})");
            self.exited = true;
        }
        self.exited
    }
}

impl WindowSystem for WinitWindow {
    fn framebuffer_size(&self) -> RenderSize {
        self.state.size
    }

    fn should_close(&self) -> bool {
        self.state.close_requested || self.exited
    }

    fn wait_events(&mut self) {
        self.pump_with(None);
    }
}

// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use flipbook_core::{init_tracing, FrameCounter};
use flipbook_platform::WinitWindow;
use flipbook_render::{TickOutcome, WindowSystem};
use flipbook_render_vk::{AshDevice, MeshResources, VkEngine};
use tracing::{error, info};

mod config;

use config::{load_cfg, PresentModeCfg};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file
    #[arg(long, default_value = "flipbook.toml")]
    config: PathBuf,
    /// Frames the CPU may run ahead of the GPU
    #[arg(long)]
    frames_in_flight: Option<usize>,
    #[arg(long, value_enum)]
    present_mode: Option<PresentModeCfg>,
    /// Exit after this many ticks (0 = run until closed)
    #[arg(long, default_value_t = 0)]
    max_frames: u64,
}

fn run(args: Args) -> Result<()> {
    let cfg = load_cfg(&args.config);
    let engine_cfg = cfg
        .render
        .resolve(args.frames_in_flight, args.present_mode);
    info!("config = {engine_cfg:?}");

    let mut window = WinitWindow::new("flipbook", 1280, 720)?;
    let win = window.window().context("window handle")?;
    let device = AshDevice::new(win, win).context("vulkan init")?;
    let resources = MeshResources::quads(&device).context("mesh upload")?;

    let mut engine = VkEngine::new(device, resources, &mut window, engine_cfg)?;
    window.register_resize(engine.resize_context());

    let mut fps = FrameCounter::new(Duration::from_secs(1));
    let mut ticks: u64 = 0;
    while !window.should_close() {
        window.pump();
        if window.should_close() {
            break;
        }
        match engine.tick(&mut window) {
            Ok(TickOutcome::Presented { .. }) => fps.tick(),
            Ok(TickOutcome::Skipped { .. }) => {}
            Err(e) => return Err(e).with_context(|| format!("frame {ticks}")),
        }
        ticks += 1;
        if args.max_frames != 0 && ticks >= args.max_frames {
            info!("reached --max-frames {}", args.max_frames);
            break;
        }
    }

    info!("{} frames presented", fps.total());
    engine.shutdown();
    Ok(())
}

fn main() -> Result<()> {
    init_tracing("info");
    let args = Args::parse();
    run(args).inspect_err(|e| error!("{e:#}"))
}

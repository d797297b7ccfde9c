use anyhow::Result;
use clap::Parser;
use deferred_engine::{
    renderer::{FrameInfo, Renderable, VulkanContext},
    window::App,
    PresentModePreference, RendererConfig,
};
use log::info;
use std::cell::Cell;

#[derive(Parser, Debug)]
#[command(name = "viewer", about = "Opens a window and runs the deferred pass every frame")]
struct Args {
    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    /// low-latency (mailbox when available) or vsync (fifo)
    #[arg(long, default_value_t = PresentModePreference::LowLatency)]
    present_mode: PresentModePreference,

    /// Lower bound on the number of surface images
    #[arg(long, default_value_t = 2)]
    frames_in_flight: u32,
}

/// Logs the frame rate once a second from the lighting subpass.
#[derive(Default)]
struct FrameCounter {
    frames: Cell<u32>,
    elapsed: Cell<f32>,
}

impl Renderable<VulkanContext> for FrameCounter {
    fn subpass(&self) -> u32 {
        1
    }

    fn render(&self, frame: &FrameInfo<'_, VulkanContext>) -> Result<()> {
        self.frames.set(self.frames.get() + 1);
        self.elapsed.set(self.elapsed.get() + frame.dt);
        if self.elapsed.get() >= 1.0 {
            info!(
                "{} fps, {}x{}, slot {}",
                self.frames.get(),
                frame.extent.width,
                frame.extent.height,
                frame.frame_index
            );
            self.frames.set(0);
            self.elapsed.set(0.0);
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = RendererConfig {
        extent: (args.width, args.height),
        present_mode: args.present_mode,
        frames_in_flight: args.frames_in_flight,
        ..Default::default()
    };
    info!("Starting viewer with {:?}", config);

    App::new(config, "Deferred Viewer")
        .with_system(FrameCounter::default())
        .run()?;
    Ok(())
}

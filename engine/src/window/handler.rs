use glam::Mat4;
use log::debug;
use std::sync::Arc;
use std::time::Instant;
use winit::event::WindowEvent;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window, WindowAttributes, WindowId};

use crate::config::RendererConfig;
use crate::renderer::{RenderError, RenderResult, Renderable, Renderer, VulkanContext};

pub struct WindowHandler {
    // Dropped first: the renderer's objects belong to the context it shares.
    renderer: Renderer<VulkanContext>,
    window: Arc<Window>,
    last_frame: Instant,
    view: Mat4,
}

impl WindowHandler {
    pub fn new(
        event_loop: &ActiveEventLoop,
        attributes: WindowAttributes,
        mut config: RendererConfig,
    ) -> RenderResult<Self> {
        let window = Arc::new(
            event_loop
                .create_window(attributes)
                .map_err(|e| RenderError::Window(e.to_string()))?,
        );

        let context = Arc::new(VulkanContext::new(window.clone())?);
        let size = window.inner_size();
        config.extent = (size.width, size.height);
        let renderer = Renderer::new(context, config)?;

        Ok(Self {
            renderer,
            window,
            last_frame: Instant::now(),
            view: Mat4::look_at_rh(glam::Vec3::new(0.0, 2.0, 5.0), glam::Vec3::ZERO, glam::Vec3::Y),
        })
    }

    pub fn renderer(&self) -> &Renderer<VulkanContext> {
        &self.renderer
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    pub fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
        systems: &[Box<dyn Renderable<VulkanContext>>],
    ) -> RenderResult<()> {
        if window_id != self.window.id() {
            return Ok(());
        }
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                self.renderer.handle_resize(size.width, size.height);
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                let dt = now.duration_since(self.last_frame).as_secs_f32();
                self.last_frame = now;

                let systems: Vec<&dyn Renderable<VulkanContext>> =
                    systems.iter().map(|system| system.as_ref()).collect();
                if !self.renderer.render_frame(dt, self.view, &systems)? {
                    debug!("Frame skipped");
                }
            }
            _ => {}
        }
        Ok(())
    }
}

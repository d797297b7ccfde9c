use log::error;
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow};
use winit::window::{WindowAttributes, WindowId};

use crate::config::RendererConfig;
use crate::renderer::{RenderError, RenderResult, Renderable, VulkanContext};

pub use handler::WindowHandler;
pub use winit::event_loop::EventLoop;
pub mod handler;

/// Opens one window on resume and renders into it every time the loop goes idle.
pub struct App {
    config: RendererConfig,
    title: String,
    systems: Vec<Box<dyn Renderable<VulkanContext>>>,
    window_handler: Option<WindowHandler>,
    error: Option<RenderError>,
}

impl App {
    pub fn new(config: RendererConfig, title: impl Into<String>) -> Self {
        Self {
            config,
            title: title.into(),
            systems: Vec::new(),
            window_handler: None,
            error: None,
        }
    }

    pub fn with_system(mut self, system: impl Renderable<VulkanContext> + 'static) -> Self {
        self.systems.push(Box::new(system));
        self
    }

    /// Runs the event loop until the window closes or rendering fails.
    pub fn run(mut self) -> RenderResult<()> {
        let event_loop = EventLoop::new().map_err(|e| RenderError::Window(e.to_string()))?;
        event_loop.set_control_flow(ControlFlow::Poll);
        event_loop
            .run_app(&mut self)
            .map_err(|e| RenderError::Window(e.to_string()))?;

        // Tear the renderer down before the event loop's window goes away.
        self.window_handler = None;
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: RenderError) {
        error!("Renderer failed: {err}");
        self.error = Some(err);
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window_handler.is_some() {
            return;
        }
        let (width, height) = self.config.extent;
        let attributes = WindowAttributes::default()
            .with_title(self.title.clone())
            .with_inner_size(winit::dpi::PhysicalSize::new(width, height));

        match WindowHandler::new(event_loop, attributes, self.config.clone()) {
            Ok(handler) => self.window_handler = Some(handler),
            Err(err) => self.fail(event_loop, err),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        let Some(handler) = self.window_handler.as_mut() else {
            return;
        };
        if let Err(err) = handler.window_event(event_loop, window_id, event, &self.systems) {
            self.fail(event_loop, err);
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(handler) = self.window_handler.as_ref() else {
            return;
        };
        // Sleep until the next resize wakes the loop.
        if handler.renderer().is_suspended() {
            event_loop.set_control_flow(ControlFlow::Wait);
        } else {
            event_loop.set_control_flow(ControlFlow::Poll);
            handler.request_redraw();
        }
    }
}

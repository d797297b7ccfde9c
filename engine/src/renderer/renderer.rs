use ash::vk;
use glam::Mat4;
use log::debug;
use std::sync::Arc;

use super::device::{GpuDevice, PassBegin};
use super::frame_info::{FrameInfo, Renderable};
use super::pacer::{AcquireOutcome, Configured, PresentOutcome, SurfacePacer};
use super::swapchain::is_degenerate;
use super::RenderResult;
use crate::config::RendererConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    FrameStarted,
    PassStarted,
}

/// The per-tick entry point for everything that draws.
///
/// `begin_frame` -> `begin_pass` -> (`next_subpass`)* -> `end_pass` -> `end_frame`.
/// Calling these out of order panics. A stale surface is handled here: the
/// surface is reconfigured and `begin_frame` returns `None` for that tick.
pub struct Renderer<D: GpuDevice> {
    device: Arc<D>,
    pacer: SurfacePacer<D>,
    state: FrameState,
    /// Extent still waiting for a successful configure
    pending_extent: Option<vk::Extent2D>,
    window_resized: bool,
    command_buffer: vk::CommandBuffer,
    image_index: u32,
    subpass: u32,
}

impl<D: GpuDevice> Renderer<D> {
    pub fn new(device: Arc<D>, config: RendererConfig) -> RenderResult<Self> {
        let extent = config.requested_extent();
        let mut pacer = SurfacePacer::new(Arc::clone(&device), config);
        let pending_extent = match pacer.configure(extent)? {
            Configured::Ready => None,
            Configured::Deferred => Some(extent),
        };

        Ok(Self {
            device,
            pacer,
            state: FrameState::Idle,
            pending_extent,
            window_resized: false,
            command_buffer: vk::CommandBuffer::null(),
            image_index: 0,
            subpass: 0,
        })
    }

    /// Records a new window size; the surface is rebuilt on the next tick.
    pub fn handle_resize(&mut self, width: u32, height: u32) {
        debug!("Resize requested: {}x{}", width, height);
        self.pending_extent = Some(vk::Extent2D { width, height });
        self.window_resized = true;
    }

    fn reconfigure(&mut self, extent: vk::Extent2D) -> RenderResult<()> {
        self.window_resized = false;
        self.pending_extent = match self.pacer.configure(extent)? {
            Configured::Ready => None,
            Configured::Deferred => Some(extent),
        };
        Ok(())
    }

    /// Acquires an image and starts recording. `None` means skip this tick:
    /// the surface is minimized or was just rebuilt.
    pub fn begin_frame(&mut self) -> RenderResult<Option<vk::CommandBuffer>> {
        assert_eq!(
            self.state,
            FrameState::Idle,
            "begin_frame called while a frame is in progress"
        );

        if let Some(extent) = self.pending_extent {
            self.reconfigure(extent)?;
            if self.pending_extent.is_some() {
                return Ok(None);
            }
        }

        match self.pacer.acquire_next_image()? {
            AcquireOutcome::Image(image_index) => {
                self.image_index = image_index;
            }
            AcquireOutcome::OutOfDate => {
                self.reconfigure(self.pacer.requested_extent())?;
                return Ok(None);
            }
        }

        self.command_buffer = self.pacer.begin_recording()?;
        self.state = FrameState::FrameStarted;
        Ok(Some(self.command_buffer))
    }

    /// Begins the pass graph on the framebuffer of the acquired image, clears
    /// every attachment and sets a full-surface viewport and scissor.
    pub fn begin_pass(&mut self, command_buffer: vk::CommandBuffer) -> RenderResult<()> {
        assert_eq!(
            self.state,
            FrameState::FrameStarted,
            "begin_pass called outside of a frame"
        );
        assert_eq!(
            command_buffer, self.command_buffer,
            "begin_pass called with a command buffer from another frame"
        );

        let extent = self.pacer.extent();
        let begin = PassBegin {
            render_pass: self.pacer.pass_graph()?.handle(),
            framebuffer: self.pacer.framebuffer(self.image_index)?,
            extent,
            clear_values: self.pacer.clear_values()?,
        };
        self.device.cmd_begin_render_pass(command_buffer, &begin);
        self.device.cmd_set_full_viewport(command_buffer, extent);

        self.subpass = 0;
        self.state = FrameState::PassStarted;
        Ok(())
    }

    pub fn next_subpass(&mut self) {
        assert_eq!(
            self.state,
            FrameState::PassStarted,
            "next_subpass called outside of a pass"
        );
        assert!(
            self.subpass + 1 < self.subpass_count(),
            "next_subpass called on the last subpass"
        );
        self.device.cmd_next_subpass(self.command_buffer);
        self.subpass += 1;
    }

    /// Ends the pass, first stepping through any subpasses not yet entered.
    pub fn end_pass(&mut self) {
        assert_eq!(
            self.state,
            FrameState::PassStarted,
            "end_pass called outside of a pass"
        );
        while self.subpass + 1 < self.subpass_count() {
            self.device.cmd_next_subpass(self.command_buffer);
            self.subpass += 1;
        }
        self.device.cmd_end_render_pass(self.command_buffer);
        self.state = FrameState::FrameStarted;
    }

    /// Ends recording, submits and presents. A stale or resized surface is
    /// rebuilt before returning.
    pub fn end_frame(&mut self) -> RenderResult<()> {
        assert_eq!(
            self.state,
            FrameState::FrameStarted,
            "end_frame called outside of a frame or inside a pass"
        );
        self.state = FrameState::Idle;

        self.device.end_command_buffer(self.command_buffer)?;
        let outcome =
            self.pacer
                .submit_and_present(self.command_buffer, self.image_index, self.window_resized)?;
        if outcome == PresentOutcome::ResizeNeeded {
            let extent = self
                .pending_extent
                .unwrap_or_else(|| self.pacer.requested_extent());
            self.reconfigure(extent)?;
        }
        Ok(())
    }

    /// Runs one whole frame: every system is called in the subpass it asks
    /// for. Returns `false` when the tick was skipped.
    pub fn render_frame(
        &mut self,
        dt: f32,
        view: Mat4,
        systems: &[&dyn Renderable<D>],
    ) -> RenderResult<bool> {
        let Some(command_buffer) = self.begin_frame()? else {
            return Ok(false);
        };
        self.begin_pass(command_buffer)?;

        for subpass in 0..self.subpass_count() {
            if subpass > 0 {
                self.next_subpass();
            }
            let frame = self.frame_info(dt, view);
            for system in systems.iter().filter(|system| system.subpass() == subpass) {
                system.render(&frame)?;
            }
        }

        self.end_pass();
        self.end_frame()?;
        Ok(true)
    }

    fn frame_info(&self, dt: f32, view: Mat4) -> FrameInfo<'_, D> {
        FrameInfo {
            device: self.device.as_ref(),
            command_buffer: self.command_buffer,
            frame_index: self.pacer.frame_index(),
            image_index: self.image_index,
            subpass: self.subpass,
            dt,
            view,
            input_attachments: self.pacer.input_attachment_set(self.image_index),
            extent: self.pacer.extent(),
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// The window is minimized: every tick is skipped until a resize with a
    /// non-zero extent arrives, so there is no point in polling.
    pub fn is_suspended(&self) -> bool {
        self.pending_extent.is_some_and(is_degenerate)
    }

    /// Frame slot the next (or current) frame records into.
    pub fn frame_index(&self) -> usize {
        self.pacer.frame_index()
    }

    /// Image acquired for the current frame.
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    pub fn current_subpass(&self) -> u32 {
        self.subpass
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.pacer.extent()
    }

    pub fn aspect_ratio(&self) -> f32 {
        let extent = self.extent();
        extent.width as f32 / extent.height.max(1) as f32
    }

    pub fn frame_slot_count(&self) -> usize {
        self.pacer.slot_count()
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.pacer
            .pass_graph()
            .map_or(vk::RenderPass::null(), |graph| graph.handle())
    }

    pub fn subpass_count(&self) -> u32 {
        self.pacer
            .pass_graph()
            .map_or(0, |graph| graph.subpass_count())
    }

    pub fn input_attachment_layout(&self) -> vk::DescriptorSetLayout {
        self.pacer.input_attachment_layout()
    }

    pub fn pacer(&self) -> &SurfacePacer<D> {
        &self.pacer
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }
}

//! Surface and frame pacing.
//!
//! The pacer owns the swapchain and everything sized by it, and rebuilds them
//! as one ordered pipeline: swapchain, attachment registry, pass graph,
//! framebuffers, input-attachment sets, sync objects, command buffers.
//! The frame slot count is the swapchain's image count throughout.

use ash::vk;
use log::{debug, info, warn};
use std::sync::Arc;

use super::attachment::deferred_attachments;
use super::command_pool::FrameCommands;
use super::device::{GpuDevice, Submission, SurfaceSupport};
use super::framebuffer::FramebufferSet;
use super::input_attachments::InputAttachmentSets;
use super::pass_graph::{chained_dependencies, PassGraph, PassGraphBuilder};
use super::registry::AttachmentRegistry;
use super::swapchain::{choose_extent, is_degenerate, Swapchain};
use super::sync::FrameSynchronizer;
use super::{RenderError, RenderResult};
use crate::config::RendererConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacerState {
    Uninitialized,
    Configured,
    Recreating,
}

/// Result of [`SurfacePacer::configure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Configured {
    Ready,
    /// The extent has a zero side; nothing was touched. Try again later.
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Image(u32),
    /// The surface must be reconfigured before anything can be acquired
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Out of date, suboptimal, or the window was resized
    ResizeNeeded,
}

/// Everything rebuilt together whenever the surface changes.
struct SurfaceResources {
    pass_graph: PassGraph,
    framebuffers: FramebufferSet,
    input_sets: InputAttachmentSets,
    sync: FrameSynchronizer,
    commands: FrameCommands,
    clear_values: Vec<vk::ClearValue>,
}

pub struct SurfacePacer<D: GpuDevice> {
    device: Arc<D>,
    config: RendererConfig,
    state: PacerState,
    requested_extent: vk::Extent2D,
    swapchain: Option<Swapchain>,
    registry: AttachmentRegistry<D::Allocation>,
    resources: Option<SurfaceResources>,
    depth_format: vk::Format,
    frame_index: usize,
}

impl<D: GpuDevice> SurfacePacer<D> {
    pub fn new(device: Arc<D>, config: RendererConfig) -> Self {
        SurfacePacer {
            device,
            requested_extent: config.requested_extent(),
            config,
            state: PacerState::Uninitialized,
            swapchain: None,
            registry: AttachmentRegistry::new(),
            resources: None,
            depth_format: vk::Format::UNDEFINED,
            frame_index: 0,
        }
    }

    /// Negotiates the surface for `requested` and rebuilds everything sized by it.
    ///
    /// A degenerate extent (a minimized window) returns [`Configured::Deferred`]
    /// without allocating anything or changing state. On any other failure
    /// everything is torn down and the pacer goes back to `Uninitialized`.
    pub fn configure(&mut self, requested: vk::Extent2D) -> RenderResult<Configured> {
        if is_degenerate(requested) {
            debug!(
                "Deferring surface configuration for {}x{}",
                requested.width, requested.height
            );
            return Ok(Configured::Deferred);
        }

        let support = self.device.surface_support()?;
        let extent = choose_extent(&support.capabilities, requested);
        if is_degenerate(extent) {
            debug!("Surface reports a zero extent, deferring configuration");
            return Ok(Configured::Deferred);
        }

        self.requested_extent = requested;
        self.state = PacerState::Recreating;
        match self.rebuild(&support, extent) {
            Ok(()) => {
                self.state = PacerState::Configured;
                Ok(Configured::Ready)
            }
            Err(err) => {
                self.teardown();
                if let Some(old) = self.swapchain.take() {
                    old.destroy(self.device.as_ref());
                }
                self.state = PacerState::Uninitialized;
                Err(err)
            }
        }
    }

    fn rebuild(&mut self, support: &SurfaceSupport, extent: vk::Extent2D) -> RenderResult<()> {
        let device = Arc::clone(&self.device);
        let device = device.as_ref();

        device.wait_idle().map_err(RenderError::Submission)?;
        self.teardown();
        self.depth_format = self.choose_depth_format()?;

        let old = self.swapchain.take();
        let old_handle = old.as_ref().map_or(vk::SwapchainKHR::null(), |s| s.handle);
        let created = Swapchain::new(
            device,
            support,
            self.config.present_mode,
            extent,
            self.config.frames_in_flight,
            old_handle,
        );
        if let Some(old) = old {
            if let Ok(new) = &created {
                if new.surface_format.format != old.surface_format.format {
                    warn!(
                        "Surface format changed from {:?} to {:?}",
                        old.surface_format.format, new.surface_format.format
                    );
                }
            }
            old.destroy(device);
        }
        let swapchain = self.swapchain.insert(created?);
        let slot_count = swapchain.image_count();

        let declarations = deferred_attachments(
            &self.config.formats,
            swapchain.surface_format.format,
            self.depth_format,
        );
        self.registry
            .configure(device, declarations, &swapchain.images, extent)?;

        let subpass_count = self
            .registry
            .attachment_declarations()
            .iter()
            .map(|decl| decl.subpass + 1)
            .max()
            .unwrap_or(1);
        let pass_graph = PassGraphBuilder::new()
            .add_attachments(self.registry.attachment_declarations())
            .add_dependencies(chained_dependencies(subpass_count))
            .build(device)?;

        let framebuffers = match FramebufferSet::build(
            device,
            pass_graph.handle(),
            extent,
            &self.registry.views_per_attachment(),
        ) {
            Ok(framebuffers) => framebuffers,
            Err(err) => {
                pass_graph.destroy(device);
                return Err(err);
            }
        };

        let (input_sets, sync, commands) =
            match build_slot_resources(device, &self.registry, slot_count) {
                Ok(parts) => parts,
                Err(err) => {
                    framebuffers.destroy(device);
                    pass_graph.destroy(device);
                    return Err(err);
                }
            };

        let clear_values = pass_graph.layout().clear_values(self.config.clear_color);
        self.resources = Some(SurfaceResources {
            pass_graph,
            framebuffers,
            input_sets,
            sync,
            commands,
            clear_values,
        });
        self.frame_index = 0;

        info!(
            "Surface configured: {}x{}, {} frame slots, depth {:?}",
            extent.width, extent.height, slot_count, self.depth_format
        );
        Ok(())
    }

    fn choose_depth_format(&self) -> RenderResult<vk::Format> {
        self.config
            .formats
            .depth_candidates
            .iter()
            .copied()
            .find(|&format| self.device.supports_depth_format(format))
            .ok_or_else(|| {
                RenderError::Configuration(format!(
                    "none of the depth formats {:?} is supported",
                    self.config.formats.depth_candidates
                ))
            })
    }

    /// Destroys everything sized by the swapchain, leaving the swapchain itself.
    fn teardown(&mut self) {
        let device = self.device.as_ref();
        if let Some(resources) = self.resources.take() {
            resources.framebuffers.destroy(device);
            resources.input_sets.destroy(device);
            resources.pass_graph.destroy(device);
            resources.sync.destroy(device);
            resources.commands.free(device);
        }
        self.registry.release(device);
    }

    fn resources(&self) -> RenderResult<&SurfaceResources> {
        self.resources.as_ref().ok_or(RenderError::NotConfigured)
    }

    /// Waits for the current slot to retire, then asks for the next image.
    pub fn acquire_next_image(&mut self) -> RenderResult<AcquireOutcome> {
        let (Some(swapchain), Some(resources)) = (&self.swapchain, &self.resources) else {
            return Err(RenderError::NotConfigured);
        };
        let slot = self.frame_index;
        resources.sync.wait_for_slot(self.device.as_ref(), slot)?;

        match self
            .device
            .acquire_next_image(swapchain.handle, resources.sync.image_available(slot))
        {
            Ok((image_index, _suboptimal)) => Ok(AcquireOutcome::Image(image_index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Surface out of date on acquire");
                Ok(AcquireOutcome::OutOfDate)
            }
            Err(err) => Err(RenderError::Submission(err)),
        }
    }

    /// Submits `command_buffer` for the current slot and presents `image_index`.
    /// The frame slot advances whatever the outcome.
    pub fn submit_and_present(
        &mut self,
        command_buffer: vk::CommandBuffer,
        image_index: u32,
        window_resized: bool,
    ) -> RenderResult<PresentOutcome> {
        let slot = self.frame_index;
        let result = self.submit_slot(slot, command_buffer, image_index, window_resized);
        let slot_count = self.slot_count().max(1);
        self.frame_index = (slot + 1) % slot_count;
        result
    }

    fn submit_slot(
        &mut self,
        slot: usize,
        command_buffer: vk::CommandBuffer,
        image_index: u32,
        window_resized: bool,
    ) -> RenderResult<PresentOutcome> {
        let device = self.device.as_ref();
        let (Some(swapchain), Some(resources)) = (&self.swapchain, &mut self.resources) else {
            return Err(RenderError::NotConfigured);
        };
        let sync = &mut resources.sync;

        sync.claim_image(device, image_index, slot)?;
        sync.reset_slot(device, slot)?;
        device
            .queue_submit(&Submission {
                command_buffer,
                wait_semaphore: sync.image_available(slot),
                wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                signal_semaphore: sync.render_finished(image_index),
                fence: sync.fence(slot),
            })
            .map_err(RenderError::Submission)?;

        match device.queue_present(swapchain.handle, image_index, sync.render_finished(image_index)) {
            Ok(false) if !window_resized => Ok(PresentOutcome::Presented),
            Ok(_) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::ResizeNeeded),
            Err(err) => Err(RenderError::Submission(err)),
        }
    }

    /// Tears down every object the pacer owns. The pacer can be configured again.
    pub fn destroy(&mut self) {
        if self.swapchain.is_none() && self.resources.is_none() {
            return;
        }
        if let Err(err) = self.device.wait_idle() {
            warn!("wait_idle failed during teardown: {err}");
        }
        self.teardown();
        if let Some(swapchain) = self.swapchain.take() {
            swapchain.destroy(self.device.as_ref());
        }
        self.state = PacerState::Uninitialized;
    }

    pub fn state(&self) -> PacerState {
        self.state
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn slot_count(&self) -> usize {
        self.swapchain.as_ref().map_or(0, Swapchain::image_count)
    }

    /// Last extent handed to a successful `configure`.
    pub fn requested_extent(&self) -> vk::Extent2D {
        self.requested_extent
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain
            .as_ref()
            .map_or(vk::Extent2D::default(), |swapchain| swapchain.extent)
    }

    pub fn surface_format(&self) -> Option<vk::SurfaceFormatKHR> {
        self.swapchain.as_ref().map(|swapchain| swapchain.surface_format)
    }

    pub fn present_mode(&self) -> Option<vk::PresentModeKHR> {
        self.swapchain.as_ref().map(|swapchain| swapchain.present_mode)
    }

    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    pub fn registry(&self) -> &AttachmentRegistry<D::Allocation> {
        &self.registry
    }

    pub fn pass_graph(&self) -> RenderResult<&PassGraph> {
        self.resources().map(|resources| &resources.pass_graph)
    }

    pub fn framebuffer(&self, image_index: u32) -> RenderResult<vk::Framebuffer> {
        self.resources()?.framebuffers.get(image_index as usize)
    }

    pub fn command_buffer(&self, slot: usize) -> RenderResult<vk::CommandBuffer> {
        self.resources()?.commands.get(slot)
    }

    /// Reset the current slot's command buffer and begin recording into it.
    pub fn begin_recording(&self) -> RenderResult<vk::CommandBuffer> {
        self.resources()?
            .commands
            .begin_recording(self.device.as_ref(), self.frame_index)
    }

    pub fn clear_values(&self) -> RenderResult<&[vk::ClearValue]> {
        self.resources().map(|resources| resources.clear_values.as_slice())
    }

    pub fn input_attachment_set(&self, image_index: u32) -> vk::DescriptorSet {
        self.resources
            .as_ref()
            .map_or(vk::DescriptorSet::null(), |resources| {
                resources.input_sets.set(image_index as usize)
            })
    }

    pub fn input_attachment_layout(&self) -> vk::DescriptorSetLayout {
        self.resources
            .as_ref()
            .map_or(vk::DescriptorSetLayout::null(), |resources| {
                resources.input_sets.layout()
            })
    }
}

/// Input-attachment sets, sync objects and command buffers for `slot_count`
/// slots, or none of them.
fn build_slot_resources<D: GpuDevice>(
    device: &D,
    registry: &AttachmentRegistry<D::Allocation>,
    slot_count: usize,
) -> RenderResult<(InputAttachmentSets, FrameSynchronizer, FrameCommands)> {
    let input_sets = InputAttachmentSets::build(device, registry, 1)?;
    let sync = match FrameSynchronizer::new(device, slot_count) {
        Ok(sync) => sync,
        Err(err) => {
            input_sets.destroy(device);
            return Err(err);
        }
    };
    match FrameCommands::allocate(device, slot_count) {
        Ok(commands) => Ok((input_sets, sync, commands)),
        Err(err) => {
            sync.destroy(device);
            input_sets.destroy(device);
            Err(err)
        }
    }
}

impl<D: GpuDevice> Drop for SurfacePacer<D> {
    fn drop(&mut self) {
        self.destroy();
    }
}

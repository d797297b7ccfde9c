mod attachment;
mod command_pool;
mod context;
mod device;
mod error;
mod frame_info;
mod framebuffer;
mod headless;
mod input_attachments;
mod pacer;
mod pass_graph;
mod registry;
#[allow(clippy::module_inception)]
mod renderer;
mod swapchain;
mod sync;

pub use attachment::{
    deferred_attachments, validate_declarations, AttachmentDecl, AttachmentKind, GBufferChannel,
};
pub use command_pool::FrameCommands;
pub use context::VulkanContext;
pub use device::{GpuDevice, ImageDesc, PassBegin, Submission, SurfaceSupport, SwapchainDesc};
pub use error::{RenderError, RenderResult};
pub use frame_info::{FrameInfo, Renderable};
pub use framebuffer::FramebufferSet;
pub use headless::{HeadlessAllocation, HeadlessDevice, ObjectCounts, RecordedCommand, SubmitRecord};
pub use input_attachments::InputAttachmentSets;
pub use pacer::{AcquireOutcome, Configured, PacerState, PresentOutcome, SurfacePacer};
pub use pass_graph::{chained_dependencies, PassGraph, PassGraphBuilder, PassLayout, SubpassLayout};
pub use registry::{AttachmentRegistry, ImageMemory, ManagedImage};
pub use renderer::{FrameState, Renderer};
pub use swapchain::{
    choose_extent, choose_image_count, choose_present_mode, choose_surface_format, Swapchain,
};
pub use sync::FrameSynchronizer;

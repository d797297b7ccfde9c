//! Error taxonomy for the renderer core.

use ash::vk;
use thiserror::Error;

/// Fatal renderer errors. A stale surface is not one of them: it comes back
/// as [`AcquireOutcome::OutOfDate`](super::AcquireOutcome::OutOfDate) or
/// [`PresentOutcome::ResizeNeeded`](super::PresentOutcome::ResizeNeeded) and
/// the renderer reconfigures on its own.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Attachment declarations or dependencies are inconsistent. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The device refused to create an image, view, framebuffer or pass.
    #[error("Failed to create {what}: {source}")]
    ResourceCreation {
        what: &'static str,
        #[source]
        source: vk::Result,
    },

    /// The memory allocator could not back an owned image.
    #[error("Allocator error: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),

    /// Queue submit, present or fence wait failed for a reason other than staleness.
    #[error("Submission failed: {0}")]
    Submission(vk::Result),

    #[error("Unknown attachment: {0}")]
    UnknownAttachment(String),

    #[error("Frame slot {slot} out of range ({count} slots)")]
    SlotOutOfRange { slot: usize, count: usize },

    #[error("Attachment registry has not been configured")]
    NotConfigured,

    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    #[error("Window error: {0}")]
    Window(String),

    /// Raised by a render system while recording its commands.
    #[error(transparent)]
    System(#[from] anyhow::Error),
}

impl RenderError {
    pub fn creation(what: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |source| RenderError::ResourceCreation { what, source }
    }
}

pub type RenderResult<T> = std::result::Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RenderError::ResourceCreation {
            what: "framebuffer",
            source: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
        };
        assert!(err.to_string().starts_with("Failed to create framebuffer: "));

        let err = RenderError::SlotOutOfRange { slot: 4, count: 3 };
        assert_eq!(err.to_string(), "Frame slot 4 out of range (3 slots)");
    }

    #[test]
    fn test_creation_helper() {
        let err = RenderError::creation("image view")(vk::Result::ERROR_INITIALIZATION_FAILED);
        assert!(matches!(
            err,
            RenderError::ResourceCreation { what: "image view", .. }
        ));
    }
}

//! Renderer configuration.

use ash::vk;
use strum_macros::{Display, EnumString};

/// Which presentation mode the surface should prefer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum PresentModePreference {
    /// Mailbox when available, FIFO otherwise
    #[default]
    LowLatency,
    /// Always FIFO
    Vsync,
}

impl PresentModePreference {
    /// Modes to try in order; FIFO is always supported and closes the list.
    pub fn candidates(self) -> &'static [vk::PresentModeKHR] {
        match self {
            PresentModePreference::LowLatency => {
                &[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO]
            }
            PresentModePreference::Vsync => &[vk::PresentModeKHR::FIFO],
        }
    }
}

/// Formats of the owned G-buffer images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentFormats {
    pub position: vk::Format,
    pub normal: vk::Format,
    pub albedo: vk::Format,
    /// Tried in order; the first one usable as an optimal-tiling depth attachment wins
    pub depth_candidates: Vec<vk::Format>,
}

impl Default for AttachmentFormats {
    fn default() -> Self {
        Self {
            position: vk::Format::R16G16B16A16_SFLOAT,
            normal: vk::Format::R16G16B16A16_SFLOAT,
            albedo: vk::Format::R8G8B8A8_UNORM,
            depth_candidates: vec![
                vk::Format::D32_SFLOAT,
                vk::Format::D32_SFLOAT_S8_UINT,
                vk::Format::D24_UNORM_S8_UINT,
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    /// Requested window extent in physical pixels
    pub extent: (u32, u32),
    pub present_mode: PresentModePreference,
    /// Lower bound on the number of surface images, and so on frame slots
    pub frames_in_flight: u32,
    pub formats: AttachmentFormats,
    /// Clear value for color and presented attachments
    pub clear_color: [f32; 4],
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            extent: (1280, 720),
            present_mode: PresentModePreference::default(),
            frames_in_flight: 2,
            formats: AttachmentFormats::default(),
            clear_color: [0.0, 0.0, 0.0, 0.0],
        }
    }
}

impl RendererConfig {
    pub fn requested_extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.0,
            height: self.extent.1,
        }
    }
}

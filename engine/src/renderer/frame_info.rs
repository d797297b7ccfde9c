use anyhow::Result;
use ash::vk;
use glam::Mat4;

use super::device::GpuDevice;

/// What a render system gets to record one subpass of one frame.
pub struct FrameInfo<'a, D: GpuDevice> {
    pub device: &'a D,
    pub command_buffer: vk::CommandBuffer,
    /// Frame slot being recorded, `0..frame_slot_count`
    pub frame_index: usize,
    /// Surface image being rendered to; picks the framebuffer and G-buffer set
    pub image_index: u32,
    pub subpass: u32,
    /// Seconds since the previous frame
    pub dt: f32,
    pub view: Mat4,
    /// Input attachments of the lighting subpass for this image, null when there are none
    pub input_attachments: vk::DescriptorSet,
    pub extent: vk::Extent2D,
}

impl<'a, D: GpuDevice> FrameInfo<'a, D> {
    pub fn aspect_ratio(&self) -> f32 {
        self.extent.width as f32 / self.extent.height.max(1) as f32
    }

    /// Set viewport and scissor to the full extent
    pub fn set_full_viewport(&self) {
        self.device
            .cmd_set_full_viewport(self.command_buffer, self.extent);
    }
}

/// Trait for anything that records commands into the deferred pass
pub trait Renderable<D: GpuDevice> {
    /// Subpass this system draws in: 0 is geometry, 1 is lighting.
    fn subpass(&self) -> u32 {
        0
    }

    fn render(&self, frame: &FrameInfo<'_, D>) -> Result<()>;
}

//! The device boundary the renderer core is written against.
//!
//! The core never creates the device or its queues. Everything it needs from
//! them goes through [`GpuDevice`]: object creation and destruction, memory
//! for owned images, command-buffer recording, submission and presentation.
//! [`VulkanContext`](super::VulkanContext) is the real implementation and
//! [`HeadlessDevice`](super::HeadlessDevice) the in-memory one used by tests.

use ash::prelude::VkResult;
use ash::vk;

use super::pass_graph::PassLayout;
use super::RenderResult;

/// What the surface supports, queried fresh on every (re)configuration.
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

#[derive(Debug, Clone, Copy)]
pub struct SwapchainDesc {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub min_image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    /// Previous swap object to hand over from, or null
    pub old_swapchain: vk::SwapchainKHR,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageDesc<'a> {
    pub name: &'a str,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub usage: vk::ImageUsageFlags,
}

#[derive(Clone, Copy)]
pub struct PassBegin<'a> {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_values: &'a [vk::ClearValue],
}

#[derive(Debug, Clone, Copy)]
pub struct Submission {
    pub command_buffer: vk::CommandBuffer,
    pub wait_semaphore: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal_semaphore: vk::Semaphore,
    pub fence: vk::Fence,
}

pub trait GpuDevice {
    /// Memory backing an owned image, returned to the device on destruction.
    type Allocation;

    fn surface_support(&self) -> RenderResult<SurfaceSupport>;
    /// Whether `format` can be an optimal-tiling depth/stencil attachment.
    fn supports_depth_format(&self, format: vk::Format) -> bool;

    fn create_swapchain(&self, desc: &SwapchainDesc) -> RenderResult<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RenderResult<Vec<vk::Image>>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);

    fn create_image(&self, desc: &ImageDesc<'_>) -> RenderResult<(vk::Image, Self::Allocation)>;
    fn destroy_image(&self, image: vk::Image, allocation: Self::Allocation);
    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> RenderResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);

    fn create_render_pass(&self, layout: &PassLayout) -> RenderResult<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RenderResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    /// Layout with `binding_count` fragment-stage input-attachment bindings.
    fn create_input_attachment_layout(
        &self,
        binding_count: u32,
    ) -> RenderResult<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn create_input_attachment_pool(
        &self,
        set_count: u32,
        binding_count: u32,
    ) -> RenderResult<vk::DescriptorPool>;
    /// Destroying the pool frees every set allocated from it.
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> RenderResult<Vec<vk::DescriptorSet>>;
    /// Points bindings `0..views.len()` of `set` at `views`.
    fn write_input_attachments(&self, set: vk::DescriptorSet, views: &[vk::ImageView]);

    fn create_semaphore(&self) -> RenderResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn create_fence(&self, signaled: bool) -> RenderResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn wait_for_fence(&self, fence: vk::Fence) -> VkResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;

    fn allocate_command_buffers(&self, count: u32) -> RenderResult<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]);
    /// Resets the buffer and begins one-time-submit recording.
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RenderResult<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RenderResult<()>;

    fn cmd_begin_render_pass(&self, command_buffer: vk::CommandBuffer, begin: &PassBegin<'_>);
    fn cmd_next_subpass(&self, command_buffer: vk::CommandBuffer);
    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer);
    /// Sets a viewport and scissor covering the whole extent.
    fn cmd_set_full_viewport(&self, command_buffer: vk::CommandBuffer, extent: vk::Extent2D);

    /// Returns the image index and whether the swap object is suboptimal.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)>;
    fn queue_submit(&self, submission: &Submission) -> VkResult<()>;
    /// Returns whether the swap object is suboptimal.
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool>;
    fn wait_idle(&self) -> VkResult<()>;
}

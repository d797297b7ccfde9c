//! In-memory device for running the renderer core without a GPU.
//!
//! Hands out unique fake handles, keeps a live/created count per object kind,
//! completes every submission immediately, and can be scripted to fail
//! creation calls or report a stale surface.

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};

use super::device::{GpuDevice, ImageDesc, PassBegin, Submission, SurfaceSupport, SwapchainDesc};
use super::pass_graph::PassLayout;
use super::{RenderError, RenderResult};

/// Number of objects per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectCounts {
    pub swapchains: usize,
    pub images: usize,
    pub image_views: usize,
    pub render_passes: usize,
    pub framebuffers: usize,
    pub descriptor_set_layouts: usize,
    pub descriptor_pools: usize,
    pub semaphores: usize,
    pub fences: usize,
    pub command_buffers: usize,
}

impl ObjectCounts {
    pub fn total(&self) -> usize {
        self.swapchains
            + self.images
            + self.image_views
            + self.render_passes
            + self.framebuffers
            + self.descriptor_set_layouts
            + self.descriptor_pools
            + self.semaphores
            + self.fences
            + self.command_buffers
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Kind {
    Swapchain,
    Image,
    ImageView,
    RenderPass,
    Framebuffer,
    DescriptorSetLayout,
    DescriptorPool,
    Semaphore,
    Fence,
    CommandBuffer,
}

impl ObjectCounts {
    fn slot(&mut self, kind: Kind) -> &mut usize {
        match kind {
            Kind::Swapchain => &mut self.swapchains,
            Kind::Image => &mut self.images,
            Kind::ImageView => &mut self.image_views,
            Kind::RenderPass => &mut self.render_passes,
            Kind::Framebuffer => &mut self.framebuffers,
            Kind::DescriptorSetLayout => &mut self.descriptor_set_layouts,
            Kind::DescriptorPool => &mut self.descriptor_pools,
            Kind::Semaphore => &mut self.semaphores,
            Kind::Fence => &mut self.fences,
            Kind::CommandBuffer => &mut self.command_buffers,
        }
    }
}

/// Memory handed out for owned images.
#[derive(Debug, PartialEq, Eq)]
pub struct HeadlessAllocation {
    id: u64,
}

/// A command recorded into a command buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    Begin,
    BeginPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: usize,
    },
    SetViewport(vk::Extent2D),
    NextSubpass,
    EndPass,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitRecord {
    pub command_buffer: vk::CommandBuffer,
    pub wait_semaphore: vk::Semaphore,
    pub signal_semaphore: vk::Semaphore,
    pub fence: vk::Fence,
}

#[derive(Default)]
struct State {
    next_handle: u64,
    live: HashMap<Kind, HashSet<u64>>,
    created: ObjectCounts,
    surface: SurfaceSupport,
    depth_formats: Vec<vk::Format>,
    swapchain_images: HashMap<u64, Vec<vk::Image>>,
    next_image: HashMap<u64, u32>,
    last_swapchain_desc: Option<SwapchainDesc>,
    signaled_fences: HashSet<u64>,
    live_allocations: HashSet<u64>,
    acquire_script: VecDeque<vk::Result>,
    acquire_images: VecDeque<u32>,
    present_script: VecDeque<vk::Result>,
    fail_after: HashMap<Kind, usize>,
    fence_waits: usize,
    submissions: Vec<SubmitRecord>,
    presents: Vec<u32>,
    commands: HashMap<u64, Vec<RecordedCommand>>,
    descriptor_writes: HashMap<u64, Vec<vk::ImageView>>,
}

impl State {
    fn create(&mut self, kind: Kind) -> RenderResult<u64> {
        if let Some(remaining) = self.fail_after.get_mut(&kind) {
            if *remaining == 0 {
                self.fail_after.remove(&kind);
                return Err(RenderError::ResourceCreation {
                    what: "headless object",
                    source: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
                });
            }
            *remaining -= 1;
        }
        self.next_handle += 1;
        let raw = self.next_handle;
        self.live.entry(kind).or_default().insert(raw);
        *self.created.slot(kind) += 1;
        Ok(raw)
    }

    fn destroy(&mut self, kind: Kind, raw: u64) {
        if raw == 0 {
            return;
        }
        let removed = self.live.get_mut(&kind).is_some_and(|set| set.remove(&raw));
        assert!(removed, "{kind:?} {raw:#x} destroyed twice or never created");
    }

    fn counts(&self) -> ObjectCounts {
        let mut counts = ObjectCounts::default();
        for (kind, set) in &self.live {
            *counts.slot(*kind) = set.len();
        }
        counts
    }
}

/// A [`GpuDevice`] with no GPU behind it.
pub struct HeadlessDevice {
    state: Mutex<State>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    /// A surface with a 1..=3 image range that takes whatever extent is requested.
    pub fn new() -> Self {
        let surface = SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 1,
                max_image_count: 3,
                current_extent: vk::Extent2D {
                    width: u32::MAX,
                    height: u32::MAX,
                },
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                max_image_array_layers: 1,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                ..Default::default()
            },
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        };
        Self {
            state: Mutex::new(State {
                surface,
                depth_formats: vec![
                    vk::Format::D32_SFLOAT,
                    vk::Format::D32_SFLOAT_S8_UINT,
                    vk::Format::D24_UNORM_S8_UINT,
                ],
                ..Default::default()
            }),
        }
    }

    pub fn with_surface(self, surface: SurfaceSupport) -> Self {
        self.state.lock().surface = surface;
        self
    }

    pub fn with_depth_formats(self, formats: Vec<vk::Format>) -> Self {
        self.state.lock().depth_formats = formats;
        self
    }

    pub fn set_surface(&self, surface: SurfaceSupport) {
        self.state.lock().surface = surface;
    }

    /// Objects created and not yet destroyed.
    pub fn live_objects(&self) -> ObjectCounts {
        self.state.lock().counts()
    }

    /// Objects created over the device's lifetime.
    pub fn created_objects(&self) -> ObjectCounts {
        self.state.lock().created
    }

    pub fn live_allocations(&self) -> usize {
        self.state.lock().live_allocations.len()
    }

    /// Makes the next acquire return `result` instead of an image.
    pub fn script_acquire(&self, result: vk::Result) {
        self.state.lock().acquire_script.push_back(result);
    }

    /// Makes the next successful acquire return `image_index`, leaving the
    /// round-robin order untouched.
    pub fn script_acquire_image(&self, image_index: u32) {
        self.state.lock().acquire_images.push_back(image_index);
    }

    /// Makes the next present return `result`.
    pub fn script_present(&self, result: vk::Result) {
        self.state.lock().present_script.push_back(result);
    }

    /// Lets `successes` more framebuffers be created, then fails one.
    pub fn fail_framebuffer_after(&self, successes: usize) {
        self.state.lock().fail_after.insert(Kind::Framebuffer, successes);
    }

    /// Lets `successes` more images be created, then fails one.
    pub fn fail_image_after(&self, successes: usize) {
        self.state.lock().fail_after.insert(Kind::Image, successes);
    }

    pub fn fence_waits(&self) -> usize {
        self.state.lock().fence_waits
    }

    pub fn submissions(&self) -> Vec<SubmitRecord> {
        self.state.lock().submissions.clone()
    }

    /// Image indices in presentation order.
    pub fn presents(&self) -> Vec<u32> {
        self.state.lock().presents.clone()
    }

    pub fn commands(&self, command_buffer: vk::CommandBuffer) -> Vec<RecordedCommand> {
        self.state
            .lock()
            .commands
            .get(&command_buffer.as_raw())
            .cloned()
            .unwrap_or_default()
    }

    pub fn descriptor_writes(&self, set: vk::DescriptorSet) -> Vec<vk::ImageView> {
        self.state
            .lock()
            .descriptor_writes
            .get(&set.as_raw())
            .cloned()
            .unwrap_or_default()
    }

    pub fn last_swapchain_desc(&self) -> Option<SwapchainDesc> {
        self.state.lock().last_swapchain_desc
    }

    fn record(&self, command_buffer: vk::CommandBuffer, command: RecordedCommand) {
        self.state
            .lock()
            .commands
            .entry(command_buffer.as_raw())
            .or_default()
            .push(command);
    }
}

impl GpuDevice for HeadlessDevice {
    type Allocation = HeadlessAllocation;

    fn surface_support(&self) -> RenderResult<SurfaceSupport> {
        Ok(self.state.lock().surface.clone())
    }

    fn supports_depth_format(&self, format: vk::Format) -> bool {
        self.state.lock().depth_formats.contains(&format)
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> RenderResult<vk::SwapchainKHR> {
        let mut state = self.state.lock();
        let raw = state.create(Kind::Swapchain)?;
        let mut images = Vec::with_capacity(desc.min_image_count as usize);
        for _ in 0..desc.min_image_count {
            state.next_handle += 1;
            images.push(vk::Image::from_raw(state.next_handle));
        }
        state.swapchain_images.insert(raw, images);
        state.last_swapchain_desc = Some(*desc);
        Ok(vk::SwapchainKHR::from_raw(raw))
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RenderResult<Vec<vk::Image>> {
        self.state
            .lock()
            .swapchain_images
            .get(&swapchain.as_raw())
            .cloned()
            .ok_or(RenderError::Vulkan(vk::Result::ERROR_SURFACE_LOST_KHR))
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state.lock();
        state.swapchain_images.remove(&swapchain.as_raw());
        state.destroy(Kind::Swapchain, swapchain.as_raw());
    }

    fn create_image(&self, _desc: &ImageDesc<'_>) -> RenderResult<(vk::Image, HeadlessAllocation)> {
        let mut state = self.state.lock();
        let raw = state.create(Kind::Image)?;
        state.live_allocations.insert(raw);
        Ok((vk::Image::from_raw(raw), HeadlessAllocation { id: raw }))
    }

    fn destroy_image(&self, image: vk::Image, allocation: HeadlessAllocation) {
        let mut state = self.state.lock();
        assert_eq!(image.as_raw(), allocation.id, "allocation returned with the wrong image");
        state.live_allocations.remove(&allocation.id);
        state.destroy(Kind::Image, image.as_raw());
    }

    fn create_image_view(
        &self,
        _image: vk::Image,
        _format: vk::Format,
        _aspect: vk::ImageAspectFlags,
    ) -> RenderResult<vk::ImageView> {
        let raw = self.state.lock().create(Kind::ImageView)?;
        Ok(vk::ImageView::from_raw(raw))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.state.lock().destroy(Kind::ImageView, view.as_raw());
    }

    fn create_render_pass(&self, _layout: &PassLayout) -> RenderResult<vk::RenderPass> {
        let raw = self.state.lock().create(Kind::RenderPass)?;
        Ok(vk::RenderPass::from_raw(raw))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.state.lock().destroy(Kind::RenderPass, render_pass.as_raw());
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        _attachments: &[vk::ImageView],
        _extent: vk::Extent2D,
    ) -> RenderResult<vk::Framebuffer> {
        let raw = self.state.lock().create(Kind::Framebuffer)?;
        Ok(vk::Framebuffer::from_raw(raw))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.state.lock().destroy(Kind::Framebuffer, framebuffer.as_raw());
    }

    fn create_input_attachment_layout(
        &self,
        _binding_count: u32,
    ) -> RenderResult<vk::DescriptorSetLayout> {
        let raw = self.state.lock().create(Kind::DescriptorSetLayout)?;
        Ok(vk::DescriptorSetLayout::from_raw(raw))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.state.lock().destroy(Kind::DescriptorSetLayout, layout.as_raw());
    }

    fn create_input_attachment_pool(
        &self,
        _set_count: u32,
        _binding_count: u32,
    ) -> RenderResult<vk::DescriptorPool> {
        let raw = self.state.lock().create(Kind::DescriptorPool)?;
        Ok(vk::DescriptorPool::from_raw(raw))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.state.lock().destroy(Kind::DescriptorPool, pool.as_raw());
    }

    fn allocate_descriptor_sets(
        &self,
        _pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> RenderResult<Vec<vk::DescriptorSet>> {
        let mut state = self.state.lock();
        Ok((0..count)
            .map(|_| {
                state.next_handle += 1;
                vk::DescriptorSet::from_raw(state.next_handle)
            })
            .collect())
    }

    fn write_input_attachments(&self, set: vk::DescriptorSet, views: &[vk::ImageView]) {
        self.state
            .lock()
            .descriptor_writes
            .insert(set.as_raw(), views.to_vec());
    }

    fn create_semaphore(&self) -> RenderResult<vk::Semaphore> {
        let raw = self.state.lock().create(Kind::Semaphore)?;
        Ok(vk::Semaphore::from_raw(raw))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state.lock().destroy(Kind::Semaphore, semaphore.as_raw());
    }

    fn create_fence(&self, signaled: bool) -> RenderResult<vk::Fence> {
        let mut state = self.state.lock();
        let raw = state.create(Kind::Fence)?;
        if signaled {
            state.signaled_fences.insert(raw);
        }
        Ok(vk::Fence::from_raw(raw))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        state.signaled_fences.remove(&fence.as_raw());
        state.destroy(Kind::Fence, fence.as_raw());
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut state = self.state.lock();
        state.fence_waits += 1;
        // Nothing would ever signal it, so a real wait would hang forever.
        if state.signaled_fences.contains(&fence.as_raw()) {
            Ok(())
        } else {
            Err(vk::Result::TIMEOUT)
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        self.state.lock().signaled_fences.remove(&fence.as_raw());
        Ok(())
    }

    fn allocate_command_buffers(&self, count: u32) -> RenderResult<Vec<vk::CommandBuffer>> {
        let mut state = self.state.lock();
        (0..count)
            .map(|_| state.create(Kind::CommandBuffer).map(vk::CommandBuffer::from_raw))
            .collect()
    }

    fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        let mut state = self.state.lock();
        for buffer in buffers {
            state.commands.remove(&buffer.as_raw());
            state.destroy(Kind::CommandBuffer, buffer.as_raw());
        }
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RenderResult<()> {
        self.state
            .lock()
            .commands
            .insert(command_buffer.as_raw(), vec![RecordedCommand::Begin]);
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RenderResult<()> {
        self.record(command_buffer, RecordedCommand::End);
        Ok(())
    }

    fn cmd_begin_render_pass(&self, command_buffer: vk::CommandBuffer, begin: &PassBegin<'_>) {
        self.record(
            command_buffer,
            RecordedCommand::BeginPass {
                render_pass: begin.render_pass,
                framebuffer: begin.framebuffer,
                extent: begin.extent,
                clear_values: begin.clear_values.len(),
            },
        );
    }

    fn cmd_next_subpass(&self, command_buffer: vk::CommandBuffer) {
        self.record(command_buffer, RecordedCommand::NextSubpass);
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        self.record(command_buffer, RecordedCommand::EndPass);
    }

    fn cmd_set_full_viewport(&self, command_buffer: vk::CommandBuffer, extent: vk::Extent2D) {
        self.record(command_buffer, RecordedCommand::SetViewport(extent));
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut state = self.state.lock();
        if let Some(result) = state.acquire_script.pop_front() {
            return match result {
                vk::Result::SUBOPTIMAL_KHR => Ok((0, true)),
                other => Err(other),
            };
        }
        if let Some(index) = state.acquire_images.pop_front() {
            return Ok((index, false));
        }
        let count = state
            .swapchain_images
            .get(&swapchain.as_raw())
            .map(|images| images.len() as u32)
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)?;
        let next = state.next_image.entry(swapchain.as_raw()).or_insert(0);
        let index = *next;
        *next = (index + 1) % count;
        Ok((index, false))
    }

    fn queue_submit(&self, submission: &Submission) -> VkResult<()> {
        let mut state = self.state.lock();
        // Work completes as soon as it is submitted.
        state.signaled_fences.insert(submission.fence.as_raw());
        state.submissions.push(SubmitRecord {
            command_buffer: submission.command_buffer,
            wait_semaphore: submission.wait_semaphore,
            signal_semaphore: submission.signal_semaphore,
            fence: submission.fence,
        });
        Ok(())
    }

    fn queue_present(
        &self,
        _swapchain: vk::SwapchainKHR,
        image_index: u32,
        _wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let mut state = self.state.lock();
        state.presents.push(image_index);
        match state.present_script.pop_front() {
            None => Ok(false),
            Some(vk::Result::SUBOPTIMAL_KHR) => Ok(true),
            Some(other) => Err(other),
        }
    }

    fn wait_idle(&self) -> VkResult<()> {
        Ok(())
    }
}

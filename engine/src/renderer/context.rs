use ash::prelude::VkResult;
use ash::{khr, vk, Device, Entry, Instance};
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::mem::ManuallyDrop;
use std::os::raw::c_char;
use std::sync::Arc;
use winit::raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::Window;

use super::device::{GpuDevice, ImageDesc, PassBegin, Submission, SurfaceSupport, SwapchainDesc};
use super::pass_graph::PassLayout;
use super::{RenderError, RenderResult};

const VALIDATION_LAYER: &std::ffi::CStr = c"VK_LAYER_KHRONOS_validation";

/// The device, its queues and everything the renderer core allocates from.
///
/// Owns the instance, the window surface, the logical device, one graphics
/// and one present queue, the command pool per-slot command buffers come
/// from, and the memory allocator backing owned images.
pub struct VulkanContext {
    pub entry: Entry,
    pub instance: Instance,
    pub physical_device: vk::PhysicalDevice,
    pub surface_loader: khr::surface::Instance,
    pub swapchain_loader: khr::swapchain::Device,
    pub device: Device,
    pub surface: vk::SurfaceKHR,
    pub graphics_family: u32,
    pub present_family: u32,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    command_pool: vk::CommandPool,
    allocator: ManuallyDrop<Mutex<Allocator>>,
    // The surface must not outlive the window.
    _window: Arc<Window>,
}

impl VulkanContext {
    pub fn new(window: Arc<Window>) -> RenderResult<Self> {
        unsafe {
            let entry = Entry::load()?;
            let app_name = c"DeferredViewer";

            let raw_display_handle = window
                .display_handle()
                .map_err(|e| RenderError::Window(e.to_string()))?
                .as_raw();
            let raw_window_handle = window
                .window_handle()
                .map_err(|e| RenderError::Window(e.to_string()))?
                .as_raw();

            let validation_available = cfg!(debug_assertions)
                && entry
                    .enumerate_instance_layer_properties()?
                    .iter()
                    .any(|layer| {
                        layer
                            .layer_name_as_c_str()
                            .is_ok_and(|name| name == VALIDATION_LAYER)
                    });
            let layers_names_raw: Vec<*const c_char> = if validation_available {
                vec![VALIDATION_LAYER.as_ptr()]
            } else {
                Vec::new()
            };

            #[allow(unused_mut)]
            let mut extension_names =
                ash_window::enumerate_required_extensions(raw_display_handle)?.to_vec();

            #[cfg(any(target_os = "macos", target_os = "ios"))]
            {
                extension_names.push(khr::portability_enumeration::NAME.as_ptr());
                extension_names.push(khr::get_physical_device_properties2::NAME.as_ptr());
            }

            let appinfo = vk::ApplicationInfo::default()
                .application_name(app_name)
                .application_version(0)
                .engine_name(app_name)
                .engine_version(0)
                .api_version(vk::API_VERSION_1_2);

            let create_flags = if cfg!(any(target_os = "macos", target_os = "ios")) {
                vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
            } else {
                vk::InstanceCreateFlags::default()
            };

            let create_info = vk::InstanceCreateInfo::default()
                .application_info(&appinfo)
                .enabled_layer_names(&layers_names_raw)
                .enabled_extension_names(&extension_names)
                .flags(create_flags);

            let instance = entry.create_instance(&create_info, None)?;
            let surface_loader = khr::surface::Instance::new(&entry, &instance);

            // window should outlive this
            let surface = ash_window::create_surface(
                &entry,
                &instance,
                raw_display_handle,
                raw_window_handle,
                None,
            )?;

            let Some((physical_device, graphics_family, present_family)) =
                Self::pick_device(&instance, &surface_loader, surface)?
            else {
                surface_loader.destroy_surface(surface, None);
                instance.destroy_instance(None);
                return Err(RenderError::Configuration(
                    "no device can render to this window".into(),
                ));
            };

            let priorities = [1.0f32];
            let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> =
                if graphics_family == present_family {
                    vec![vk::DeviceQueueCreateInfo::default()
                        .queue_family_index(graphics_family)
                        .queue_priorities(&priorities)]
                } else {
                    [graphics_family, present_family]
                        .iter()
                        .map(|&family| {
                            vk::DeviceQueueCreateInfo::default()
                                .queue_family_index(family)
                                .queue_priorities(&priorities)
                        })
                        .collect()
                };

            let device_extension_names_raw = [
                khr::swapchain::NAME.as_ptr(),
                #[cfg(any(target_os = "macos", target_os = "ios"))]
                khr::portability_subset::NAME.as_ptr(),
            ];

            let features = vk::PhysicalDeviceFeatures::default();
            let device_create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_create_infos)
                .enabled_extension_names(&device_extension_names_raw)
                .enabled_features(&features);

            let device = instance.create_device(physical_device, &device_create_info, None)?;
            let graphics_queue = device.get_device_queue(graphics_family, 0);
            let present_queue = device.get_device_queue(present_family, 0);
            debug!(
                "Graphics queue family {}, present queue family {}",
                graphics_family, present_family
            );

            let pool_create_info = vk::CommandPoolCreateInfo::default()
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
                .queue_family_index(graphics_family);
            let command_pool = device
                .create_command_pool(&pool_create_info, None)
                .map_err(RenderError::creation("command pool"))?;

            let allocator = Allocator::new(&AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device,
                debug_settings: Default::default(),
                buffer_device_address: false,
                allocation_sizes: gpu_allocator::AllocationSizes::default(),
            })?;

            let swapchain_loader = khr::swapchain::Device::new(&instance, &device);

            Ok(Self {
                entry,
                instance,
                physical_device,
                surface_loader,
                swapchain_loader,
                device,
                surface,
                graphics_family,
                present_family,
                graphics_queue,
                present_queue,
                command_pool,
                allocator: ManuallyDrop::new(Mutex::new(allocator)),
                _window: window,
            })
        }
    }

    /// Highest-rated device with a graphics family and a family that can
    /// present to `surface`, preferring one family that does both.
    unsafe fn pick_device(
        instance: &Instance,
        surface_loader: &khr::surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> RenderResult<Option<(vk::PhysicalDevice, u32, u32)>> {
        let candidates = instance
            .enumerate_physical_devices()?
            .into_iter()
            .filter_map(|pdevice| {
                let queue_families = instance.get_physical_device_queue_family_properties(pdevice);
                let presents = |family: u32| {
                    surface_loader
                        .get_physical_device_surface_support(pdevice, family, surface)
                        .unwrap_or(false)
                };
                let graphics: Vec<u32> = queue_families
                    .iter()
                    .enumerate()
                    .filter(|(_, info)| info.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                    .map(|(index, _)| index as u32)
                    .collect();

                let graphics_family = graphics
                    .iter()
                    .copied()
                    .find(|&family| presents(family))
                    .or_else(|| graphics.first().copied())?;
                let present_family = if presents(graphics_family) {
                    graphics_family
                } else {
                    (0..queue_families.len() as u32).find(|&family| presents(family))?
                };
                Some((pdevice, graphics_family, present_family))
            });

        Ok(candidates.max_by_key(|(pdevice, _, _)| Self::rate_device(instance, *pdevice)))
    }

    pub fn rate_device(instance: &Instance, device: vk::PhysicalDevice) -> i32 {
        let props = unsafe { instance.get_physical_device_properties(device) };
        let mem_props = unsafe { instance.get_physical_device_memory_properties(device) };

        let mut score = match props.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
            _ => 0,
        };

        let total_mem: u64 = mem_props.memory_heaps[..mem_props.memory_heap_count as usize]
            .iter()
            .map(|heap| heap.size)
            .sum();
        score += (total_mem / (1024 * 1024)) as i32;

        let device_name = props
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!(
            "Found device {} (id {}, {:?}), score {}",
            device_name, props.device_id, props.device_type, score
        );
        score
    }
}

impl GpuDevice for VulkanContext {
    type Allocation = Allocation;

    fn surface_support(&self) -> RenderResult<SurfaceSupport> {
        unsafe {
            Ok(SurfaceSupport {
                capabilities: self
                    .surface_loader
                    .get_physical_device_surface_capabilities(self.physical_device, self.surface)?,
                formats: self
                    .surface_loader
                    .get_physical_device_surface_formats(self.physical_device, self.surface)?,
                present_modes: self
                    .surface_loader
                    .get_physical_device_surface_present_modes(self.physical_device, self.surface)?,
            })
        }
    }

    fn supports_depth_format(&self, format: vk::Format) -> bool {
        let props = unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        };
        props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> RenderResult<vk::SwapchainKHR> {
        let families = [self.graphics_family, self.present_family];
        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(desc.min_image_count)
            .image_format(desc.surface_format.format)
            .image_color_space(desc.surface_format.color_space)
            .image_extent(desc.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(desc.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(desc.present_mode)
            .clipped(true)
            .old_swapchain(desc.old_swapchain);
        create_info = if self.graphics_family != self.present_family {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&families)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(RenderError::creation("swapchain"))
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RenderResult<Vec<vk::Image>> {
        Ok(unsafe { self.swapchain_loader.get_swapchain_images(swapchain)? })
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
    }

    fn create_image(&self, desc: &ImageDesc<'_>) -> RenderResult<(vk::Image, Allocation)> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.create_image(&image_info, None) }
            .map_err(RenderError::creation("image"))?;
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = self.allocator.lock().allocate(&AllocationCreateDesc {
            name: desc.name,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(err.into());
            }
        };

        let bound = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };
        if let Err(err) = bound {
            self.destroy_image(image, allocation);
            return Err(RenderError::creation("image memory binding")(err));
        }
        Ok((image, allocation))
    }

    fn destroy_image(&self, image: vk::Image, allocation: Allocation) {
        if let Err(err) = self.allocator.lock().free(allocation) {
            warn!("Failed to free image memory: {err}");
        }
        unsafe { self.device.destroy_image(image, None) };
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> RenderResult<vk::ImageView> {
        let create_view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        unsafe { self.device.create_image_view(&create_view_info, None) }
            .map_err(RenderError::creation("image view"))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    fn create_render_pass(&self, layout: &PassLayout) -> RenderResult<vk::RenderPass> {
        let subpasses: Vec<vk::SubpassDescription<'_>> = layout
            .subpasses
            .iter()
            .map(|subpass| {
                let description = vk::SubpassDescription::default()
                    .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                    .color_attachments(&subpass.color)
                    .input_attachments(&subpass.input);
                match &subpass.depth {
                    Some(depth) => description.depth_stencil_attachment(depth),
                    None => description,
                }
            })
            .collect();

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&layout.attachments)
            .subpasses(&subpasses)
            .dependencies(&layout.dependencies);

        unsafe { self.device.create_render_pass(&create_info, None) }
            .map_err(RenderError::creation("render pass"))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) };
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RenderResult<vk::Framebuffer> {
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        unsafe { self.device.create_framebuffer(&create_info, None) }
            .map_err(RenderError::creation("framebuffer"))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) };
    }

    fn create_input_attachment_layout(
        &self,
        binding_count: u32,
    ) -> RenderResult<vk::DescriptorSetLayout> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding<'_>> = (0..binding_count)
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding)
                    .descriptor_type(vk::DescriptorType::INPUT_ATTACHMENT)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            })
            .collect();
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        unsafe { self.device.create_descriptor_set_layout(&create_info, None) }
            .map_err(RenderError::creation("descriptor set layout"))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
    }

    fn create_input_attachment_pool(
        &self,
        set_count: u32,
        binding_count: u32,
    ) -> RenderResult<vk::DescriptorPool> {
        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::INPUT_ATTACHMENT,
            descriptor_count: set_count * binding_count,
        }];
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(set_count)
            .pool_sizes(&pool_sizes);
        unsafe { self.device.create_descriptor_pool(&create_info, None) }
            .map_err(RenderError::creation("descriptor pool"))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) };
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> RenderResult<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout; count as usize];
        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        unsafe { self.device.allocate_descriptor_sets(&allocate_info) }
            .map_err(RenderError::creation("descriptor sets"))
    }

    fn write_input_attachments(&self, set: vk::DescriptorSet, views: &[vk::ImageView]) {
        let image_infos: Vec<vk::DescriptorImageInfo> = views
            .iter()
            .map(|&view| {
                vk::DescriptorImageInfo::default()
                    .image_view(view)
                    .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            })
            .collect();
        let writes: Vec<vk::WriteDescriptorSet<'_>> = image_infos
            .iter()
            .enumerate()
            .map(|(binding, info)| {
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(binding as u32)
                    .descriptor_type(vk::DescriptorType::INPUT_ATTACHMENT)
                    .image_info(std::slice::from_ref(info))
            })
            .collect();
        unsafe { self.device.update_descriptor_sets(&writes, &[]) };
    }

    fn create_semaphore(&self) -> RenderResult<vk::Semaphore> {
        unsafe {
            self.device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        }
        .map_err(RenderError::creation("semaphore"))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn create_fence(&self, signaled: bool) -> RenderResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        unsafe {
            self.device
                .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)
        }
        .map_err(RenderError::creation("fence"))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX) }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }
    }

    fn allocate_command_buffers(&self, count: u32) -> RenderResult<Vec<vk::CommandBuffer>> {
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        unsafe { self.device.allocate_command_buffers(&allocate_info) }
            .map_err(RenderError::creation("command buffers"))
    }

    fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        unsafe { self.device.free_command_buffers(self.command_pool, buffers) };
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RenderResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())?;
            self.device.begin_command_buffer(command_buffer, &begin_info)?;
        }
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RenderResult<()> {
        unsafe { self.device.end_command_buffer(command_buffer)? };
        Ok(())
    }

    fn cmd_begin_render_pass(&self, command_buffer: vk::CommandBuffer, begin: &PassBegin<'_>) {
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(begin.render_pass)
            .framebuffer(begin.framebuffer)
            .render_area(vk::Rect2D::default().extent(begin.extent))
            .clear_values(begin.clear_values);
        unsafe {
            self.device
                .cmd_begin_render_pass(command_buffer, &begin_info, vk::SubpassContents::INLINE)
        };
    }

    fn cmd_next_subpass(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device
                .cmd_next_subpass(command_buffer, vk::SubpassContents::INLINE)
        };
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(command_buffer) };
    }

    fn cmd_set_full_viewport(&self, command_buffer: vk::CommandBuffer, extent: vk::Extent2D) {
        let viewport = vk::Viewport::default()
            .width(extent.width as f32)
            .height(extent.height as f32)
            .max_depth(1.0);
        let scissor = vk::Rect2D::default().extent(extent);
        unsafe {
            self.device.cmd_set_viewport(command_buffer, 0, &[viewport]);
            self.device.cmd_set_scissor(command_buffer, 0, &[scissor]);
        }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, u64::MAX, signal, vk::Fence::null())
        }
    }

    fn queue_submit(&self, submission: &Submission) -> VkResult<()> {
        let command_buffers = [submission.command_buffer];
        let wait_semaphores = [submission.wait_semaphore];
        let wait_stages = [submission.wait_stage];
        let signal_semaphores = [submission.signal_semaphore];
        let submit_info = vk::SubmitInfo::default()
            .command_buffers(&command_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores);
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], submission.fence)
        }
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let wait_semaphores = [wait];
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        unsafe {
            self.swapchain_loader
                .queue_present(self.present_queue, &present_info)
        }
    }

    fn wait_idle(&self) -> VkResult<()> {
        unsafe { self.device.device_wait_idle() }
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_command_pool(self.command_pool, None);
            // Allocator must go before the device it allocates from.
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
    }
}

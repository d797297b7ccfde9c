use ash::vk::{self, Handle};
use deferred_engine::renderer::{
    chained_dependencies, AttachmentDecl, AttachmentRegistry, Configured, FramebufferSet,
    GpuDevice, HeadlessDevice, PacerState, PassGraphBuilder, RenderError, Renderer, SurfacePacer,
};
use deferred_engine::RendererConfig;
use std::sync::Arc;

fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

#[test]
fn test_same_extent_twice_is_idempotent() {
    let device = Arc::new(HeadlessDevice::new());
    let mut pacer = SurfacePacer::new(Arc::clone(&device), RendererConfig::default());

    pacer.configure(extent(800, 600)).unwrap();
    let live = device.live_objects();
    let slots = pacer.slot_count();
    let names: Vec<String> = pacer
        .registry()
        .attachment_declarations()
        .iter()
        .map(|decl| decl.name.clone())
        .collect();

    assert_eq!(pacer.configure(extent(800, 600)).unwrap(), Configured::Ready);
    assert_eq!(device.live_objects(), live);
    assert_eq!(pacer.slot_count(), slots);
    let again: Vec<&str> = pacer
        .registry()
        .attachment_declarations()
        .iter()
        .map(|decl| decl.name.as_str())
        .collect();
    assert_eq!(again, names);
    assert_eq!(again, ["Position", "Normal", "Albedo", "Depth", "Output"]);
}

#[test]
fn test_surface_format_change_flows_into_rebuild() {
    let device = Arc::new(HeadlessDevice::new());
    let mut pacer = SurfacePacer::new(Arc::clone(&device), RendererConfig::default());
    pacer.configure(extent(800, 600)).unwrap();
    assert_eq!(
        pacer.surface_format().unwrap().format,
        vk::Format::B8G8R8A8_SRGB
    );
    let live = device.live_objects();

    let mut support = device.surface_support().unwrap();
    support.formats = vec![vk::SurfaceFormatKHR {
        format: vk::Format::R8G8B8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    }];
    device.set_surface(support);
    assert_eq!(pacer.configure(extent(800, 600)).unwrap(), Configured::Ready);

    assert_eq!(
        pacer.surface_format().unwrap().format,
        vk::Format::R8G8B8A8_UNORM
    );
    let output = pacer.registry().attachment_index("Output").unwrap();
    assert_eq!(output, 4);
    assert_eq!(
        pacer.registry().attachment_declarations()[output].format,
        vk::Format::R8G8B8A8_UNORM
    );
    assert_eq!(
        pacer.pass_graph().unwrap().layout().attachments[output].format,
        vk::Format::R8G8B8A8_UNORM
    );
    assert_eq!(device.live_objects(), live);
}

#[test]
fn test_dropping_renderer_releases_everything() {
    let device = Arc::new(HeadlessDevice::new());
    {
        let mut renderer = Renderer::new(Arc::clone(&device), RendererConfig::default()).unwrap();
        let cmd = renderer.begin_frame().unwrap().unwrap();
        renderer.begin_pass(cmd).unwrap();
        renderer.end_pass();
        renderer.end_frame().unwrap();
        renderer.handle_resize(640, 480);
        assert!(renderer.begin_frame().unwrap().is_some());
        assert!(device.live_objects().total() > 0);
    }
    assert_eq!(device.live_objects().total(), 0);
    assert_eq!(device.live_allocations(), 0);
}

#[test]
fn test_minimized_start_allocates_nothing() {
    let device = Arc::new(HeadlessDevice::new());
    let config = RendererConfig {
        extent: (0, 0),
        ..RendererConfig::default()
    };
    let mut renderer = Renderer::new(Arc::clone(&device), config).unwrap();

    assert_eq!(renderer.pacer().state(), PacerState::Uninitialized);
    assert_eq!(renderer.begin_frame().unwrap(), None);
    assert_eq!(device.created_objects().total(), 0);

    renderer.handle_resize(320, 240);
    assert!(renderer.begin_frame().unwrap().is_some());
    assert_eq!(renderer.pacer().state(), PacerState::Configured);
}

#[test]
fn test_surface_reporting_zero_extent_defers() {
    let device = HeadlessDevice::new();
    let mut support = device.surface_support().unwrap();
    support.capabilities.current_extent = extent(0, 0);
    let device = Arc::new(device.with_surface(support));
    let mut pacer = SurfacePacer::new(Arc::clone(&device), RendererConfig::default());

    assert_eq!(pacer.configure(extent(800, 600)).unwrap(), Configured::Deferred);
    assert_eq!(device.created_objects().total(), 0);
}

#[test]
fn test_image_failure_leaks_nothing() {
    let device = Arc::new(HeadlessDevice::new());
    device.fail_image_after(4);

    let err = Renderer::new(Arc::clone(&device), RendererConfig::default())
        .err()
        .unwrap();
    assert!(matches!(err, RenderError::ResourceCreation { .. }));
    assert_eq!(device.live_objects().total(), 0);
    assert_eq!(device.live_allocations(), 0);
}

#[test]
fn test_framebuffer_failure_on_resize_leaves_pacer_reusable() {
    let device = Arc::new(HeadlessDevice::new());
    let mut pacer = SurfacePacer::new(Arc::clone(&device), RendererConfig::default());
    pacer.configure(extent(800, 600)).unwrap();

    device.fail_framebuffer_after(0);
    assert!(pacer.configure(extent(1024, 768)).is_err());
    assert_eq!(pacer.state(), PacerState::Uninitialized);
    assert_eq!(device.live_objects().total(), 0);

    assert_eq!(pacer.configure(extent(1024, 768)).unwrap(), Configured::Ready);
    assert_eq!(pacer.extent(), extent(1024, 768));
}

#[test]
fn test_custom_pass_over_registry() {
    let device = HeadlessDevice::new();
    let swapchain_images = vec![vk::Image::from_raw(0x100), vk::Image::from_raw(0x200)];
    let decls = vec![
        AttachmentDecl::color("Color", vk::Format::R8G8B8A8_UNORM, 0),
        AttachmentDecl::depth("Depth", vk::Format::D32_SFLOAT, 0),
        AttachmentDecl::presented("Output", vk::Format::B8G8R8A8_SRGB, 1),
    ];

    let mut registry = AttachmentRegistry::new();
    registry
        .configure(&device, decls, &swapchain_images, extent(640, 480))
        .unwrap();
    assert_eq!(registry.slot_count(), 2);
    assert_eq!(registry.image("Output", 1).unwrap().image, swapchain_images[1]);
    assert!(!registry.image("Output", 0).unwrap().is_owned());
    assert!(registry.image("Color", 0).unwrap().is_owned());

    let graph = PassGraphBuilder::new()
        .add_attachments(registry.attachment_declarations())
        .add_dependencies(chained_dependencies(2))
        .build(&device)
        .unwrap();
    assert_eq!(graph.subpass_count(), 2);

    let framebuffers = FramebufferSet::build(
        &device,
        graph.handle(),
        registry.extent(),
        &registry.views_per_attachment(),
    )
    .unwrap();
    assert_eq!(framebuffers.len(), 2);
    assert_ne!(framebuffers.get(0).unwrap(), framebuffers.get(1).unwrap());

    framebuffers.destroy(&device);
    graph.destroy(&device);
    registry.release(&device);
    assert_eq!(device.live_objects().total(), 0);
    assert_eq!(device.live_allocations(), 0);
}

use ash::vk;
use deferred_engine::renderer::{
    FrameInfo, FrameState, GpuDevice, HeadlessDevice, RenderError, Renderable, Renderer,
};
use deferred_engine::RendererConfig;
use glam::Mat4;
use std::cell::RefCell;
use std::sync::Arc;

fn renderer_on(device: HeadlessDevice) -> (Arc<HeadlessDevice>, Renderer<HeadlessDevice>) {
    let device = Arc::new(device);
    let renderer = Renderer::new(Arc::clone(&device), RendererConfig::default()).unwrap();
    (device, renderer)
}

fn run_frame(renderer: &mut Renderer<HeadlessDevice>) -> bool {
    let Some(cmd) = renderer.begin_frame().unwrap() else {
        return false;
    };
    renderer.begin_pass(cmd).unwrap();
    renderer.end_pass();
    renderer.end_frame().unwrap();
    true
}

fn three_image_surface() -> HeadlessDevice {
    let device = HeadlessDevice::new();
    let mut support = device.surface_support().unwrap();
    support.capabilities.min_image_count = 2;
    support.capabilities.max_image_count = 3;
    device.with_surface(support)
}

#[test]
fn test_frame_slots_round_robin() {
    let (device, mut renderer) = renderer_on(HeadlessDevice::new());
    assert_eq!(renderer.frame_slot_count(), 2);

    let mut slots = Vec::new();
    for _ in 0..4 {
        slots.push(renderer.frame_index());
        assert!(run_frame(&mut renderer));
    }
    assert_eq!(slots, [0, 1, 0, 1]);

    let fences: Vec<vk::Fence> = device.submissions().iter().map(|s| s.fence).collect();
    assert_ne!(fences[0], fences[1]);
    assert_eq!(fences[0], fences[2]);
    assert_eq!(fences[1], fences[3]);
    assert_eq!(device.presents(), vec![0, 1, 0, 1]);
}

#[test]
fn test_every_slot_used_once_per_cycle() {
    let (device, mut renderer) = renderer_on(three_image_surface());
    assert_eq!(renderer.frame_slot_count(), 3);

    let mut slots = Vec::new();
    for _ in 0..3 {
        slots.push(renderer.frame_index());
        assert!(run_frame(&mut renderer));
    }
    slots.sort_unstable();
    assert_eq!(slots, [0, 1, 2]);
    assert_eq!(renderer.frame_index(), 0);

    // One guard wait per acquire; images line up with slots so no extra waits.
    assert_eq!(device.fence_waits(), 3);
}

#[test]
fn test_reused_image_waits_for_previous_slot() {
    let (device, mut renderer) = renderer_on(HeadlessDevice::new());

    // Both slots get image 0, so the second frame also waits on slot 0's fence.
    device.script_acquire_image(0);
    device.script_acquire_image(0);
    assert!(run_frame(&mut renderer));
    assert!(run_frame(&mut renderer));
    assert_eq!(device.presents(), vec![0, 0]);
    assert_eq!(device.fence_waits(), 3);

    let submissions = device.submissions();
    assert_ne!(submissions[0].fence, submissions[1].fence);
    assert_eq!(submissions[0].signal_semaphore, submissions[1].signal_semaphore);

    // Round robin resumes at image 0, last claimed by slot 1.
    assert!(run_frame(&mut renderer));
    assert!(run_frame(&mut renderer));
    assert_eq!(device.presents(), vec![0, 0, 0, 1]);
    assert_eq!(device.fence_waits(), 6);
}

#[test]
fn test_each_submission_waits_on_its_slot_semaphore() {
    let (device, mut renderer) = renderer_on(HeadlessDevice::new());
    for _ in 0..2 {
        run_frame(&mut renderer);
    }

    let submissions = device.submissions();
    assert_ne!(submissions[0].wait_semaphore, submissions[1].wait_semaphore);
    assert_ne!(submissions[0].signal_semaphore, submissions[1].signal_semaphore);
    assert_ne!(submissions[0].command_buffer, submissions[1].command_buffer);
}

#[test]
fn test_stale_acquire_skips_tick_and_rebuilds() {
    let (device, mut renderer) = renderer_on(HeadlessDevice::new());
    assert!(run_frame(&mut renderer));

    device.script_acquire(vk::Result::ERROR_OUT_OF_DATE_KHR);
    assert_eq!(renderer.begin_frame().unwrap(), None);
    assert_eq!(renderer.state(), FrameState::Idle);
    assert_eq!(device.created_objects().swapchains, 2);
    assert_eq!(device.live_objects().swapchains, 1);

    assert!(run_frame(&mut renderer));
    assert_eq!(renderer.frame_index(), 1);
}

#[test]
fn test_other_acquire_failures_are_fatal() {
    let (device, mut renderer) = renderer_on(HeadlessDevice::new());
    device.script_acquire(vk::Result::ERROR_DEVICE_LOST);
    assert!(matches!(
        renderer.begin_frame(),
        Err(RenderError::Submission(vk::Result::ERROR_DEVICE_LOST))
    ));
}

#[test]
fn test_suboptimal_present_rebuilds_after_frame() {
    let (device, mut renderer) = renderer_on(HeadlessDevice::new());
    device.script_present(vk::Result::SUBOPTIMAL_KHR);

    assert!(run_frame(&mut renderer));
    assert_eq!(device.created_objects().swapchains, 2);
    assert_eq!(renderer.frame_index(), 0);
    assert!(run_frame(&mut renderer));
}

#[test]
fn test_resize_applies_on_next_frame() {
    let (device, mut renderer) = renderer_on(HeadlessDevice::new());
    assert!(run_frame(&mut renderer));

    renderer.handle_resize(800, 600);
    assert!(run_frame(&mut renderer));
    assert_eq!(
        renderer.extent(),
        vk::Extent2D {
            width: 800,
            height: 600
        }
    );
    assert_eq!(device.created_objects().swapchains, 2);
}

#[test]
fn test_minimized_window_skips_until_restored() {
    let (device, mut renderer) = renderer_on(HeadlessDevice::new());
    assert!(run_frame(&mut renderer));
    let created = device.created_objects();

    renderer.handle_resize(0, 0);
    for _ in 0..3 {
        assert_eq!(renderer.begin_frame().unwrap(), None);
    }
    assert_eq!(device.created_objects(), created);

    renderer.handle_resize(1024, 768);
    assert!(run_frame(&mut renderer));
    assert_eq!(renderer.extent().width, 1024);
}

struct Recorder {
    subpass: u32,
    seen: RefCell<Vec<(u32, vk::DescriptorSet, u32)>>,
}

impl Recorder {
    fn new(subpass: u32) -> Self {
        Self {
            subpass,
            seen: RefCell::new(Vec::new()),
        }
    }
}

impl Renderable<HeadlessDevice> for Recorder {
    fn subpass(&self) -> u32 {
        self.subpass
    }

    fn render(&self, frame: &FrameInfo<'_, HeadlessDevice>) -> anyhow::Result<()> {
        self.seen
            .borrow_mut()
            .push((frame.subpass, frame.input_attachments, frame.image_index));
        Ok(())
    }
}

#[test]
fn test_render_frame_runs_systems_in_their_subpass() {
    let (device, mut renderer) = renderer_on(HeadlessDevice::new());
    let geometry = Recorder::new(0);
    let lighting = Recorder::new(1);

    for _ in 0..2 {
        assert!(renderer
            .render_frame(0.016, Mat4::IDENTITY, &[&geometry, &lighting])
            .unwrap());
    }

    let geometry_seen = geometry.seen.borrow();
    let lighting_seen = lighting.seen.borrow();
    assert_eq!(geometry_seen.len(), 2);
    assert!(geometry_seen.iter().all(|(subpass, _, _)| *subpass == 0));
    assert!(lighting_seen.iter().all(|(subpass, _, _)| *subpass == 1));

    // Each image reads its own G-buffer.
    let (_, set0, image0) = lighting_seen[0];
    let (_, set1, image1) = lighting_seen[1];
    assert_ne!(image0, image1);
    assert_ne!(set0, set1);
    assert_eq!(device.descriptor_writes(set0).len(), 3);
}

#[test]
fn test_render_frame_reports_skipped_tick() {
    let (device, mut renderer) = renderer_on(HeadlessDevice::new());
    let lighting = Recorder::new(1);

    device.script_acquire(vk::Result::ERROR_OUT_OF_DATE_KHR);
    assert!(!renderer
        .render_frame(0.016, Mat4::IDENTITY, &[&lighting])
        .unwrap());
    assert!(lighting.seen.borrow().is_empty());
}

struct Failing;

impl Renderable<HeadlessDevice> for Failing {
    fn render(&self, _frame: &FrameInfo<'_, HeadlessDevice>) -> anyhow::Result<()> {
        anyhow::bail!("pipeline missing")
    }
}

#[test]
fn test_system_error_propagates() {
    let (_device, mut renderer) = renderer_on(HeadlessDevice::new());
    let err = renderer
        .render_frame(0.016, Mat4::IDENTITY, &[&Failing])
        .unwrap_err();
    assert!(matches!(err, RenderError::System(_)));
    assert_eq!(err.to_string(), "pipeline missing");
}

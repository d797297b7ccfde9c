use ash::vk;

use super::device::GpuDevice;
use super::{RenderError, RenderResult};

/// Per-slot synchronization for frames in flight.
///
/// "Image available" semaphores and in-flight fences are indexed by frame
/// slot. "Render finished" semaphores are indexed by surface image, since
/// presentation holds on to them until that image comes back.
pub struct FrameSynchronizer {
    image_available: Vec<vk::Semaphore>,
    render_finished: Vec<vk::Semaphore>,
    in_flight: Vec<vk::Fence>,
    /// Fence of the submission that last rendered to each surface image
    images_in_flight: Vec<Option<vk::Fence>>,
}

impl FrameSynchronizer {
    /// Fences start signaled so the first wait on every slot returns at once.
    pub fn new<D: GpuDevice>(device: &D, slot_count: usize) -> RenderResult<Self> {
        let mut sync = FrameSynchronizer {
            image_available: Vec::with_capacity(slot_count),
            render_finished: Vec::with_capacity(slot_count),
            in_flight: Vec::with_capacity(slot_count),
            images_in_flight: vec![None; slot_count],
        };
        if let Err(err) = sync.create_objects(device, slot_count) {
            sync.destroy(device);
            return Err(err);
        }
        Ok(sync)
    }

    fn create_objects<D: GpuDevice>(&mut self, device: &D, slot_count: usize) -> RenderResult<()> {
        for _ in 0..slot_count {
            self.image_available.push(device.create_semaphore()?);
            self.render_finished.push(device.create_semaphore()?);
            self.in_flight.push(device.create_fence(true)?);
        }
        Ok(())
    }

    pub fn slot_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Blocks until the slot's previous submission has retired.
    pub fn wait_for_slot<D: GpuDevice>(&self, device: &D, slot: usize) -> RenderResult<()> {
        device
            .wait_for_fence(self.in_flight[slot])
            .map_err(RenderError::Submission)
    }

    pub fn reset_slot<D: GpuDevice>(&self, device: &D, slot: usize) -> RenderResult<()> {
        device
            .reset_fence(self.in_flight[slot])
            .map_err(RenderError::Submission)
    }

    /// Marks `image_index` as used by `slot`, first waiting for any other
    /// slot's submission still rendering to it.
    pub fn claim_image<D: GpuDevice>(
        &mut self,
        device: &D,
        image_index: u32,
        slot: usize,
    ) -> RenderResult<()> {
        let fence = self.in_flight[slot];
        let entry = self
            .images_in_flight
            .get_mut(image_index as usize)
            .ok_or(RenderError::SlotOutOfRange {
                slot: image_index as usize,
                count: self.in_flight.len(),
            })?;
        if let Some(previous) = *entry {
            if previous != fence {
                device.wait_for_fence(previous).map_err(RenderError::Submission)?;
            }
        }
        *entry = Some(fence);
        Ok(())
    }

    pub fn fence(&self, slot: usize) -> vk::Fence {
        self.in_flight[slot]
    }

    pub fn image_available(&self, slot: usize) -> vk::Semaphore {
        self.image_available[slot]
    }

    pub fn render_finished(&self, image_index: u32) -> vk::Semaphore {
        self.render_finished[image_index as usize]
    }

    pub fn destroy<D: GpuDevice>(self, device: &D) {
        for semaphore in self.image_available.into_iter().chain(self.render_finished) {
            device.destroy_semaphore(semaphore);
        }
        for fence in self.in_flight {
            device.destroy_fence(fence);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::HeadlessDevice;

    #[test]
    fn test_objects_per_slot() {
        let device = HeadlessDevice::new();
        let sync = FrameSynchronizer::new(&device, 3).unwrap();
        let live = device.live_objects();
        assert_eq!(live.semaphores, 6);
        assert_eq!(live.fences, 3);

        // Fresh fences are signaled.
        for slot in 0..3 {
            sync.wait_for_slot(&device, slot).unwrap();
        }

        sync.destroy(&device);
        assert_eq!(device.live_objects().total(), 0);
    }

    #[test]
    fn test_reset_fence_blocks_until_submitted() {
        let device = HeadlessDevice::new();
        let sync = FrameSynchronizer::new(&device, 2).unwrap();
        sync.reset_slot(&device, 0).unwrap();
        assert!(matches!(
            sync.wait_for_slot(&device, 0),
            Err(RenderError::Submission(vk::Result::TIMEOUT))
        ));
        sync.destroy(&device);
    }

    #[test]
    fn test_claim_image_waits_on_other_slot_only() {
        let device = HeadlessDevice::new();
        let mut sync = FrameSynchronizer::new(&device, 2).unwrap();

        sync.claim_image(&device, 1, 0).unwrap();
        assert_eq!(device.fence_waits(), 0);

        // Same slot again: no wait.
        sync.claim_image(&device, 1, 0).unwrap();
        assert_eq!(device.fence_waits(), 0);

        // A different slot picks the image up: waits on slot 0's fence.
        sync.claim_image(&device, 1, 1).unwrap();
        assert_eq!(device.fence_waits(), 1);

        assert!(sync.claim_image(&device, 5, 0).is_err());
        sync.destroy(&device);
    }
}

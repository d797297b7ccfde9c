use ash::vk;

use super::device::GpuDevice;
use super::{RenderError, RenderResult};

/// One primary command buffer per frame slot, allocated from the device's pool.
pub struct FrameCommands {
    buffers: Vec<vk::CommandBuffer>,
}

impl FrameCommands {
    pub fn allocate<D: GpuDevice>(device: &D, slot_count: usize) -> RenderResult<Self> {
        let buffers = device.allocate_command_buffers(slot_count as u32)?;
        Ok(FrameCommands { buffers })
    }

    pub fn get(&self, slot: usize) -> RenderResult<vk::CommandBuffer> {
        self.buffers
            .get(slot)
            .copied()
            .ok_or(RenderError::SlotOutOfRange {
                slot,
                count: self.buffers.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Reset the slot's buffer and begin one-time-submit recording into it.
    pub fn begin_recording<D: GpuDevice>(
        &self,
        device: &D,
        slot: usize,
    ) -> RenderResult<vk::CommandBuffer> {
        let command_buffer = self.get(slot)?;
        device.begin_command_buffer(command_buffer)?;
        Ok(command_buffer)
    }

    pub fn free<D: GpuDevice>(self, device: &D) {
        if !self.buffers.is_empty() {
            device.free_command_buffers(&self.buffers);
        }
    }
}

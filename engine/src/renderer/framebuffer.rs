use ash::vk;
use log::debug;

use super::device::GpuDevice;
use super::{RenderError, RenderResult};

/// One framebuffer per frame slot, all sized to the surface extent.
#[derive(Debug)]
pub struct FramebufferSet {
    framebuffers: Vec<vk::Framebuffer>,
    extent: vk::Extent2D,
}

impl FramebufferSet {
    /// `views` is indexed `[attachment][slot]` in pass-graph attachment order.
    /// If any creation fails, the framebuffers created so far are destroyed
    /// before the error is returned.
    pub fn build<D: GpuDevice>(
        device: &D,
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
        views: &[Vec<vk::ImageView>],
    ) -> RenderResult<Self> {
        let slot_count = views.first().map_or(0, Vec::len);
        if slot_count == 0 {
            return Err(RenderError::Configuration(
                "framebuffers need at least one attachment and one frame slot".into(),
            ));
        }
        if let Some(short) = views.iter().position(|per_slot| per_slot.len() != slot_count) {
            return Err(RenderError::Configuration(format!(
                "attachment {short} has {} views, expected {slot_count}",
                views[short].len()
            )));
        }

        let mut framebuffers = Vec::with_capacity(slot_count);
        for slot in 0..slot_count {
            let attachments: Vec<vk::ImageView> =
                views.iter().map(|per_slot| per_slot[slot]).collect();
            match device.create_framebuffer(render_pass, &attachments, extent) {
                Ok(framebuffer) => framebuffers.push(framebuffer),
                Err(err) => {
                    for framebuffer in framebuffers {
                        device.destroy_framebuffer(framebuffer);
                    }
                    return Err(err);
                }
            }
        }

        debug!(
            "Built {} framebuffers with {} attachments each",
            slot_count,
            views.len()
        );
        Ok(Self {
            framebuffers,
            extent,
        })
    }

    pub fn get(&self, slot: usize) -> RenderResult<vk::Framebuffer> {
        self.framebuffers
            .get(slot)
            .copied()
            .ok_or(RenderError::SlotOutOfRange {
                slot,
                count: self.framebuffers.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.framebuffers.is_empty()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn destroy<D: GpuDevice>(self, device: &D) {
        for framebuffer in self.framebuffers {
            device.destroy_framebuffer(framebuffer);
        }
    }
}

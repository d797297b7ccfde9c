//! Descriptor sets exposing the geometry subpass's color outputs to the
//! lighting subpass as input attachments.

use ash::vk;
use log::debug;

use super::attachment::AttachmentKind;
use super::device::GpuDevice;
use super::registry::AttachmentRegistry;
use super::RenderResult;

/// One set per frame slot. Binding `i` is the `i`-th Color attachment of the
/// producing subpass, in declaration order, viewed from that same slot.
#[derive(Debug)]
pub struct InputAttachmentSets {
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
    bindings: Vec<String>,
}

impl InputAttachmentSets {
    /// Builds the sets read by `consumer_subpass`. When that subpass has no
    /// input attachments nothing is created and every lookup yields a null set.
    pub fn build<D: GpuDevice>(
        device: &D,
        registry: &AttachmentRegistry<D::Allocation>,
        consumer_subpass: u32,
    ) -> RenderResult<Self> {
        let bindings: Vec<String> = match consumer_subpass.checked_sub(1) {
            Some(producer) => registry
                .attachment_declarations()
                .iter()
                .filter(|decl| decl.kind == AttachmentKind::Color && decl.subpass == producer)
                .map(|decl| decl.name.clone())
                .collect(),
            None => Vec::new(),
        };

        let mut sets = Self {
            layout: vk::DescriptorSetLayout::null(),
            pool: vk::DescriptorPool::null(),
            sets: Vec::new(),
            bindings,
        };
        if sets.bindings.is_empty() {
            return Ok(sets);
        }

        if let Err(err) = sets.allocate(device, registry) {
            sets.destroy(device);
            return Err(err);
        }
        debug!(
            "Input attachments for subpass {}: {:?}",
            consumer_subpass, sets.bindings
        );
        Ok(sets)
    }

    fn allocate<D: GpuDevice>(
        &mut self,
        device: &D,
        registry: &AttachmentRegistry<D::Allocation>,
    ) -> RenderResult<()> {
        let binding_count = self.bindings.len() as u32;
        let slot_count = registry.slot_count();

        self.layout = device.create_input_attachment_layout(binding_count)?;
        self.pool = device.create_input_attachment_pool(slot_count as u32, binding_count)?;
        self.sets = device.allocate_descriptor_sets(self.pool, self.layout, slot_count as u32)?;

        for (slot, &set) in self.sets.iter().enumerate() {
            let views = self
                .bindings
                .iter()
                .map(|name| registry.image_view(name, slot))
                .collect::<RenderResult<Vec<_>>>()?;
            device.write_input_attachments(set, &views);
        }
        Ok(())
    }

    /// Null when the consuming subpass reads nothing.
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    pub fn set(&self, slot: usize) -> vk::DescriptorSet {
        self.sets.get(slot).copied().unwrap_or_default()
    }

    pub fn binding_names(&self) -> &[String] {
        &self.bindings
    }

    pub fn destroy<D: GpuDevice>(self, device: &D) {
        // Sets go with the pool.
        if self.pool != vk::DescriptorPool::null() {
            device.destroy_descriptor_pool(self.pool);
        }
        if self.layout != vk::DescriptorSetLayout::null() {
            device.destroy_descriptor_set_layout(self.layout);
        }
    }
}

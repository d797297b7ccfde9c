//! Attachment registry: every image the deferred pipeline renders into.
//!
//! Owned attachments (G-buffer channels, depth) get one device image per frame
//! slot. Presented attachments wrap the surface's own images and only own the
//! views created for them.

use ash::vk;
use log::debug;

use super::attachment::{AttachmentDecl, AttachmentKind};
use super::device::{GpuDevice, ImageDesc};
use super::{RenderError, RenderResult};

/// Where the memory behind a [`ManagedImage`] comes from.
#[derive(Debug)]
pub enum ImageMemory<A> {
    /// Allocated by the registry, returned to the device on destroy
    Owned(A),
    /// Belongs to the surface; only the view is ours
    Borrowed,
}

#[derive(Debug)]
pub struct ManagedImage<A> {
    pub image: vk::Image,
    pub view: vk::ImageView,
    memory: ImageMemory<A>,
}

impl<A> ManagedImage<A> {
    pub fn is_owned(&self) -> bool {
        matches!(self.memory, ImageMemory::Owned(_))
    }

    pub fn destroy<D: GpuDevice<Allocation = A>>(self, device: &D) {
        device.destroy_image_view(self.view);
        match self.memory {
            ImageMemory::Owned(allocation) => device.destroy_image(self.image, allocation),
            ImageMemory::Borrowed => {}
        }
    }
}

fn wrap_surface_image<D: GpuDevice>(
    device: &D,
    decl: &AttachmentDecl,
    image: vk::Image,
) -> RenderResult<ManagedImage<D::Allocation>> {
    let view = device.create_image_view(image, decl.format, decl.kind.aspect(decl.format))?;
    Ok(ManagedImage {
        image,
        view,
        memory: ImageMemory::Borrowed,
    })
}

fn allocate_image<D: GpuDevice>(
    device: &D,
    decl: &AttachmentDecl,
    extent: vk::Extent2D,
) -> RenderResult<ManagedImage<D::Allocation>> {
    let (image, allocation) = device.create_image(&ImageDesc {
        name: &decl.name,
        format: decl.format,
        extent,
        usage: decl.usage,
    })?;
    match device.create_image_view(image, decl.format, decl.kind.aspect(decl.format)) {
        Ok(view) => Ok(ManagedImage {
            image,
            view,
            memory: ImageMemory::Owned(allocation),
        }),
        Err(err) => {
            device.destroy_image(image, allocation);
            Err(err)
        }
    }
}

/// Named, per-slot access to attachment images.
///
/// Images are stored `[attachment][slot]`, attachments in declaration order,
/// so the index of an attachment here is its index in the pass graph.
pub struct AttachmentRegistry<A> {
    declarations: Vec<AttachmentDecl>,
    images: Vec<Vec<ManagedImage<A>>>,
    extent: vk::Extent2D,
}

impl<A> Default for AttachmentRegistry<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> AttachmentRegistry<A> {
    pub fn new() -> Self {
        Self {
            declarations: Vec::new(),
            images: Vec::new(),
            extent: vk::Extent2D::default(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.images.is_empty()
    }

    /// Allocates every attachment for `surface_images.len()` frame slots,
    /// releasing whatever the registry held before.
    ///
    /// On failure everything created by this call is destroyed again and the
    /// registry is left unconfigured.
    pub fn configure<D: GpuDevice<Allocation = A>>(
        &mut self,
        device: &D,
        declarations: Vec<AttachmentDecl>,
        surface_images: &[vk::Image],
        extent: vk::Extent2D,
    ) -> RenderResult<()> {
        self.release(device);

        if surface_images.is_empty() {
            return Err(RenderError::Configuration(
                "surface reported no presentable images".into(),
            ));
        }
        let slot_count = surface_images.len();

        let mut images: Vec<Vec<ManagedImage<A>>> = Vec::with_capacity(declarations.len());
        for decl in &declarations {
            let mut per_slot = Vec::with_capacity(slot_count);
            let mut failure = None;
            for &surface_image in surface_images {
                let created = match decl.kind {
                    AttachmentKind::Presented => wrap_surface_image(device, decl, surface_image),
                    AttachmentKind::Color | AttachmentKind::Depth => {
                        allocate_image(device, decl, extent)
                    }
                };
                match created {
                    Ok(image) => per_slot.push(image),
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }
            images.push(per_slot);

            if let Some(err) = failure {
                for image in images.into_iter().flatten() {
                    image.destroy(device);
                }
                return Err(err);
            }
        }

        debug!(
            "Attachment registry configured: {} attachments x {} slots at {}x{}",
            declarations.len(),
            slot_count,
            extent.width,
            extent.height
        );

        self.declarations = declarations;
        self.images = images;
        self.extent = extent;
        Ok(())
    }

    /// Destroys every view and owned image. The registry can be configured again.
    pub fn release<D: GpuDevice<Allocation = A>>(&mut self, device: &D) {
        for image in self.images.drain(..).flatten() {
            image.destroy(device);
        }
        self.declarations.clear();
    }

    pub fn attachment_declarations(&self) -> &[AttachmentDecl] {
        &self.declarations
    }

    pub fn attachment_index(&self, name: &str) -> Option<usize> {
        self.declarations.iter().position(|decl| decl.name == name)
    }

    pub fn slot_count(&self) -> usize {
        self.images.first().map_or(0, Vec::len)
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn image(&self, name: &str, slot: usize) -> RenderResult<&ManagedImage<A>> {
        if !self.is_configured() {
            return Err(RenderError::NotConfigured);
        }
        let index = self
            .attachment_index(name)
            .ok_or_else(|| RenderError::UnknownAttachment(name.to_owned()))?;
        let count = self.slot_count();
        self.images[index]
            .get(slot)
            .ok_or(RenderError::SlotOutOfRange { slot, count })
    }

    pub fn image_view(&self, name: &str, slot: usize) -> RenderResult<vk::ImageView> {
        self.image(name, slot).map(|image| image.view)
    }

    /// Views indexed `[attachment][slot]`, the shape the framebuffer assembler takes.
    pub fn views_per_attachment(&self) -> Vec<Vec<vk::ImageView>> {
        self.images
            .iter()
            .map(|per_slot| per_slot.iter().map(|image| image.view).collect())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AttachmentFormats;
    use crate::renderer::attachment::deferred_attachments;
    use crate::renderer::{HeadlessAllocation, HeadlessDevice};
    use ash::vk::Handle;

    fn surface_images(count: u64) -> Vec<vk::Image> {
        (0..count).map(|i| vk::Image::from_raw(0xdead_0000 + i)).collect()
    }

    fn declarations() -> Vec<AttachmentDecl> {
        deferred_attachments(
            &AttachmentFormats::default(),
            vk::Format::B8G8R8A8_SRGB,
            vk::Format::D32_SFLOAT,
        )
    }

    fn extent() -> vk::Extent2D {
        vk::Extent2D {
            width: 800,
            height: 600,
        }
    }

    #[test]
    fn test_configure_allocates_per_slot() {
        let device = HeadlessDevice::new();
        let mut registry = AttachmentRegistry::<HeadlessAllocation>::new();
        registry
            .configure(&device, declarations(), &surface_images(3), extent())
            .unwrap();

        assert_eq!(registry.slot_count(), 3);
        let live = device.live_objects();
        // Position, Normal, Albedo and Depth are owned; Output borrows the surface images.
        assert_eq!(live.images, 4 * 3);
        assert_eq!(live.image_views, 5 * 3);

        let output = registry.image("Output", 2).unwrap();
        assert!(!output.is_owned());
        assert_eq!(output.image, surface_images(3)[2]);
        assert!(registry.image("Albedo", 0).unwrap().is_owned());

        registry.release(&device);
        assert_eq!(device.live_objects().total(), 0);
        assert_eq!(device.live_allocations(), 0);
    }

    #[test]
    fn test_lookup_errors() {
        let device = HeadlessDevice::new();
        let mut registry = AttachmentRegistry::<HeadlessAllocation>::new();
        assert!(matches!(
            registry.image_view("Position", 0),
            Err(RenderError::NotConfigured)
        ));

        registry
            .configure(&device, declarations(), &surface_images(2), extent())
            .unwrap();
        assert!(matches!(
            registry.image_view("Specular", 0),
            Err(RenderError::UnknownAttachment(name)) if name == "Specular"
        ));
        assert!(matches!(
            registry.image_view("Position", 2),
            Err(RenderError::SlotOutOfRange { slot: 2, count: 2 })
        ));
        assert_eq!(registry.attachment_index("Depth"), Some(3));

        registry.release(&device);
    }

    #[test]
    fn test_failed_allocation_leaks_nothing() {
        let device = HeadlessDevice::new();
        device.fail_image_after(5);
        let mut registry = AttachmentRegistry::<HeadlessAllocation>::new();

        let result = registry.configure(&device, declarations(), &surface_images(3), extent());
        assert!(matches!(result, Err(RenderError::ResourceCreation { .. })));
        assert!(!registry.is_configured());
        assert_eq!(device.live_objects().total(), 0);
        assert_eq!(device.live_allocations(), 0);
    }

    #[test]
    fn test_reconfigure_replaces_images() {
        let device = HeadlessDevice::new();
        let mut registry = AttachmentRegistry::<HeadlessAllocation>::new();
        registry
            .configure(&device, declarations(), &surface_images(3), extent())
            .unwrap();
        let first = registry.image_view("Normal", 1).unwrap();

        registry
            .configure(&device, declarations(), &surface_images(2), extent())
            .unwrap();
        assert_eq!(registry.slot_count(), 2);
        assert_ne!(registry.image_view("Normal", 1).unwrap(), first);
        assert_eq!(device.live_objects().image_views, 5 * 2);

        registry.release(&device);
        assert_eq!(device.live_objects().total(), 0);
    }

    #[test]
    fn test_views_follow_declaration_order() {
        let device = HeadlessDevice::new();
        let mut registry = AttachmentRegistry::<HeadlessAllocation>::new();
        registry
            .configure(&device, declarations(), &surface_images(2), extent())
            .unwrap();

        let views = registry.views_per_attachment();
        assert_eq!(views.len(), 5);
        for (index, decl) in registry.attachment_declarations().iter().enumerate() {
            assert_eq!(views[index][1], registry.image_view(&decl.name, 1).unwrap());
        }

        registry.release(&device);
    }

    #[test]
    fn test_empty_surface_is_rejected() {
        let device = HeadlessDevice::new();
        let mut registry = AttachmentRegistry::<HeadlessAllocation>::new();
        assert!(matches!(
            registry.configure(&device, declarations(), &[], extent()),
            Err(RenderError::Configuration(_))
        ));
    }
}

//! Render pass and subpass derivation from attachment declarations.
//!
//! Attachment indices are positions in the declaration list. Each subpass gets
//! color references for its Color/Presented attachments, at most one depth
//! reference, and, past the first subpass, input references to every Color
//! attachment of the subpass right before it. That last rule is what turns the
//! geometry subpass's G-buffer into the lighting subpass's inputs.

use ash::vk;

use super::attachment::{validate_declarations, AttachmentDecl, AttachmentKind};
use super::device::GpuDevice;
use super::{RenderError, RenderResult};

/// Attachment references of a single subpass.
#[derive(Debug, Clone, Default)]
pub struct SubpassLayout {
    pub color: Vec<vk::AttachmentReference>,
    pub depth: Option<vk::AttachmentReference>,
    pub input: Vec<vk::AttachmentReference>,
}

/// Everything needed to create the native render pass, in plain data.
#[derive(Debug, Clone)]
pub struct PassLayout {
    pub attachments: Vec<vk::AttachmentDescription>,
    pub kinds: Vec<AttachmentKind>,
    pub subpasses: Vec<SubpassLayout>,
    pub dependencies: Vec<vk::SubpassDependency>,
}

impl PassLayout {
    pub fn derive(
        decls: &[AttachmentDecl],
        dependencies: &[vk::SubpassDependency],
    ) -> RenderResult<Self> {
        let subpass_count = validate_declarations(decls)?;

        if dependencies.len() != subpass_count as usize {
            return Err(RenderError::Configuration(format!(
                "{} subpass dependencies supplied for {} subpasses",
                dependencies.len(),
                subpass_count
            )));
        }
        for dependency in dependencies {
            let src_ok = dependency.src_subpass == vk::SUBPASS_EXTERNAL
                || dependency.src_subpass <= dependency.dst_subpass;
            if dependency.dst_subpass >= subpass_count || !src_ok {
                return Err(RenderError::Configuration(format!(
                    "dependency {} -> {} does not fit {} subpasses",
                    dependency.src_subpass, dependency.dst_subpass, subpass_count
                )));
            }
        }

        let attachments = decls
            .iter()
            .map(|decl| {
                vk::AttachmentDescription::default()
                    .format(decl.format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(vk::AttachmentLoadOp::CLEAR)
                    .store_op(decl.kind.store_op())
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(decl.kind.final_layout())
            })
            .collect();

        let mut subpasses = vec![SubpassLayout::default(); subpass_count as usize];
        for (index, decl) in decls.iter().enumerate() {
            let reference = vk::AttachmentReference {
                attachment: index as u32,
                layout: decl.kind.reference_layout(),
            };
            let subpass = &mut subpasses[decl.subpass as usize];
            match decl.kind {
                AttachmentKind::Color | AttachmentKind::Presented => subpass.color.push(reference),
                AttachmentKind::Depth => subpass.depth = Some(reference),
            }

            if decl.kind == AttachmentKind::Color && decl.subpass + 1 < subpass_count {
                subpasses[decl.subpass as usize + 1]
                    .input
                    .push(vk::AttachmentReference {
                        attachment: index as u32,
                        layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    });
            }
        }

        Ok(Self {
            attachments,
            kinds: decls.iter().map(|d| d.kind).collect(),
            subpasses,
            dependencies: dependencies.to_vec(),
        })
    }

    pub fn subpass_count(&self) -> u32 {
        self.subpasses.len() as u32
    }

    pub fn attachment_count(&self) -> usize {
        self.attachments.len()
    }

    /// One clear value per attachment: depth clears to 1.0/0, everything else to `color`.
    pub fn clear_values(&self, color: [f32; 4]) -> Vec<vk::ClearValue> {
        self.kinds
            .iter()
            .map(|kind| match kind {
                AttachmentKind::Depth => vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: 1.0,
                        stencil: 0,
                    },
                },
                AttachmentKind::Color | AttachmentKind::Presented => vk::ClearValue {
                    color: vk::ClearColorValue { float32: color },
                },
            })
            .collect()
    }
}

/// External -> 0, then i -> i + 1 for every following subpass, all by region.
///
/// The first waits for the previous presentation read before attachment
/// writes; the rest make one subpass's color writes visible to the next
/// subpass's input-attachment reads.
pub fn chained_dependencies(subpass_count: u32) -> Vec<vk::SubpassDependency> {
    let mut dependencies = Vec::with_capacity(subpass_count as usize);
    if subpass_count == 0 {
        return dependencies;
    }

    dependencies.push(
        vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::BOTTOM_OF_PIPE)
            .src_access_mask(vk::AccessFlags::MEMORY_READ)
            .dst_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
            .dependency_flags(vk::DependencyFlags::BY_REGION),
    );

    for subpass in 1..subpass_count {
        dependencies.push(
            vk::SubpassDependency::default()
                .src_subpass(subpass - 1)
                .dst_subpass(subpass)
                .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
                .dst_access_mask(vk::AccessFlags::INPUT_ATTACHMENT_READ)
                .dependency_flags(vk::DependencyFlags::BY_REGION),
        );
    }

    dependencies
}

#[derive(Debug, Default, Clone)]
pub struct PassGraphBuilder {
    attachments: Vec<AttachmentDecl>,
    dependencies: Vec<vk::SubpassDependency>,
}

impl PassGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_attachment(mut self, decl: AttachmentDecl) -> Self {
        self.attachments.push(decl);
        self
    }

    pub fn add_attachments<'a>(mut self, decls: impl IntoIterator<Item = &'a AttachmentDecl>) -> Self {
        self.attachments.extend(decls.into_iter().cloned());
        self
    }

    pub fn add_dependency(mut self, dependency: vk::SubpassDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn add_dependencies(mut self, dependencies: impl IntoIterator<Item = vk::SubpassDependency>) -> Self {
        self.dependencies.extend(dependencies);
        self
    }

    /// Validates and creates the native pass. Nothing is created on the
    /// device when validation fails.
    pub fn build<D: GpuDevice>(&self, device: &D) -> RenderResult<PassGraph> {
        let layout = PassLayout::derive(&self.attachments, &self.dependencies)?;
        let render_pass = device.create_render_pass(&layout)?;

        log::debug!(
            "Built pass graph: {} attachments, {} subpasses",
            layout.attachment_count(),
            layout.subpass_count()
        );

        Ok(PassGraph {
            render_pass,
            layout,
        })
    }
}

pub struct PassGraph {
    render_pass: vk::RenderPass,
    layout: PassLayout,
}

impl PassGraph {
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn layout(&self) -> &PassLayout {
        &self.layout
    }

    pub fn subpass_count(&self) -> u32 {
        self.layout.subpass_count()
    }

    pub fn destroy<D: GpuDevice>(self, device: &D) {
        device.destroy_render_pass(self.render_pass);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::HeadlessDevice;

    fn scenario() -> Vec<AttachmentDecl> {
        vec![
            AttachmentDecl::color("Position", vk::Format::R16G16B16A16_SFLOAT, 0),
            AttachmentDecl::depth("Depth", vk::Format::D32_SFLOAT, 0),
            AttachmentDecl::presented("Output", vk::Format::B8G8R8A8_SRGB, 1),
        ]
    }

    #[test]
    fn test_three_attachment_scenario() {
        let layout = PassLayout::derive(&scenario(), &chained_dependencies(2)).unwrap();

        assert_eq!(layout.subpass_count(), 2);
        assert_eq!(layout.subpasses[0].color.len(), 1);
        assert_eq!(layout.subpasses[0].color[0].attachment, 0);
        assert_eq!(layout.subpasses[0].depth.unwrap().attachment, 1);
        assert!(layout.subpasses[0].input.is_empty());

        assert_eq!(layout.subpasses[1].color.len(), 1);
        assert_eq!(layout.subpasses[1].color[0].attachment, 2);
        assert!(layout.subpasses[1].depth.is_none());
        assert_eq!(layout.subpasses[1].input.len(), 1);
        assert_eq!(layout.subpasses[1].input[0].attachment, 0);
        assert_eq!(
            layout.subpasses[1].input[0].layout,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
    }

    #[test]
    fn test_attachment_descriptions_follow_kind() {
        let layout = PassLayout::derive(&scenario(), &chained_dependencies(2)).unwrap();
        let [color, depth, presented] = &layout.attachments[..] else {
            panic!("expected three attachments");
        };

        assert_eq!(color.final_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(color.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(depth.final_layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        assert_eq!(depth.store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(presented.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        for description in &layout.attachments {
            assert_eq!(description.load_op, vk::AttachmentLoadOp::CLEAR);
        }
    }

    #[test]
    fn test_indices_follow_declaration_order() {
        let decls = vec![
            AttachmentDecl::color("A", vk::Format::R8G8B8A8_UNORM, 0),
            AttachmentDecl::color("B", vk::Format::R8G8B8A8_UNORM, 1),
            AttachmentDecl::color("C", vk::Format::R8G8B8A8_UNORM, 0),
            AttachmentDecl::presented("D", vk::Format::B8G8R8A8_SRGB, 2),
        ];
        let layout = PassLayout::derive(&decls, &chained_dependencies(3)).unwrap();

        assert_eq!(layout.subpass_count(), 3);
        let color0: Vec<u32> = layout.subpasses[0].color.iter().map(|r| r.attachment).collect();
        assert_eq!(color0, [0, 2]);

        // Only the immediately preceding subpass feeds inputs.
        let input1: Vec<u32> = layout.subpasses[1].input.iter().map(|r| r.attachment).collect();
        assert_eq!(input1, [0, 2]);
        let input2: Vec<u32> = layout.subpasses[2].input.iter().map(|r| r.attachment).collect();
        assert_eq!(input2, [1]);
    }

    #[test]
    fn test_presented_is_not_an_input() {
        let decls = vec![
            AttachmentDecl::presented("Out", vk::Format::B8G8R8A8_SRGB, 0),
            AttachmentDecl::color("Late", vk::Format::R8G8B8A8_UNORM, 1),
        ];
        let layout = PassLayout::derive(&decls, &chained_dependencies(2)).unwrap();
        assert!(layout.subpasses[1].input.is_empty());
    }

    #[test]
    fn test_dependency_count_mismatch_creates_nothing() {
        let device = HeadlessDevice::new();
        let result = PassGraphBuilder::new()
            .add_attachments(&scenario())
            .add_dependencies(chained_dependencies(1))
            .build(&device);

        assert!(matches!(result, Err(RenderError::Configuration(_))));
        assert_eq!(device.live_objects().render_passes, 0);
        assert_eq!(device.created_objects().render_passes, 0);
    }

    #[test]
    fn test_dependency_out_of_range() {
        let mut deps = chained_dependencies(2);
        deps[1].dst_subpass = 5;
        assert!(matches!(
            PassLayout::derive(&scenario(), &deps),
            Err(RenderError::Configuration(_))
        ));
    }

    #[test]
    fn test_chained_dependencies() {
        let deps = chained_dependencies(2);
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(deps[0].dst_subpass, 0);
        assert_eq!(deps[1].src_subpass, 0);
        assert_eq!(deps[1].dst_subpass, 1);
        assert_eq!(deps[1].dst_access_mask, vk::AccessFlags::INPUT_ATTACHMENT_READ);
        assert!(deps
            .iter()
            .all(|d| d.dependency_flags == vk::DependencyFlags::BY_REGION));
    }

    #[test]
    fn test_clear_values_per_kind() {
        let layout = PassLayout::derive(&scenario(), &chained_dependencies(2)).unwrap();
        let clears = layout.clear_values([0.1, 0.2, 0.3, 0.4]);
        assert_eq!(clears.len(), 3);
        unsafe {
            assert_eq!(clears[0].color.float32, [0.1, 0.2, 0.3, 0.4]);
            assert_eq!(clears[1].depth_stencil.depth, 1.0);
            assert_eq!(clears[1].depth_stencil.stencil, 0);
            assert_eq!(clears[2].color.float32, [0.1, 0.2, 0.3, 0.4]);
        }
    }

    #[test]
    fn test_build_and_destroy_balance() {
        let device = HeadlessDevice::new();
        let graph = PassGraphBuilder::new()
            .add_attachments(&scenario())
            .add_dependencies(chained_dependencies(2))
            .build(&device)
            .unwrap();

        assert_eq!(graph.subpass_count(), 2);
        assert_eq!(device.live_objects().render_passes, 1);
        graph.destroy(&device);
        assert_eq!(device.live_objects().render_passes, 0);
    }
}

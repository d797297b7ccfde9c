use ash::vk;
use std::collections::HashSet;
use strum_macros::{Display, EnumIter, EnumString};

use super::{RenderError, RenderResult};
use crate::config::AttachmentFormats;

/// How an attachment participates in the pass graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum AttachmentKind {
    /// Off-screen color target, read as an input attachment by the next subpass
    Color,
    /// Depth buffer, one per subpass at most
    Depth,
    /// Wraps the surface's own images
    Presented,
}

impl AttachmentKind {
    /// Parse a kind name, rejecting anything that is not a known kind.
    pub fn parse(name: &str) -> RenderResult<Self> {
        name.parse()
            .map_err(|_| RenderError::Configuration(format!("unknown attachment kind '{name}'")))
    }

    /// Layout the attachment is left in when the pass ends
    pub fn final_layout(self) -> vk::ImageLayout {
        match self {
            AttachmentKind::Color => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            AttachmentKind::Depth => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            AttachmentKind::Presented => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }

    /// Layout used while the owning subpass writes to the attachment
    pub fn reference_layout(self) -> vk::ImageLayout {
        match self {
            AttachmentKind::Color | AttachmentKind::Presented => {
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            }
            AttachmentKind::Depth => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        }
    }

    pub fn store_op(self) -> vk::AttachmentStoreOp {
        match self {
            AttachmentKind::Depth => vk::AttachmentStoreOp::DONT_CARE,
            AttachmentKind::Color | AttachmentKind::Presented => vk::AttachmentStoreOp::STORE,
        }
    }

    pub fn aspect(self, format: vk::Format) -> vk::ImageAspectFlags {
        match self {
            AttachmentKind::Depth if has_stencil(format) => {
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            }
            AttachmentKind::Depth => vk::ImageAspectFlags::DEPTH,
            AttachmentKind::Color | AttachmentKind::Presented => vk::ImageAspectFlags::COLOR,
        }
    }

    pub fn default_usage(self) -> vk::ImageUsageFlags {
        match self {
            AttachmentKind::Color => {
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::INPUT_ATTACHMENT
            }
            AttachmentKind::Depth => vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            AttachmentKind::Presented => vk::ImageUsageFlags::COLOR_ATTACHMENT,
        }
    }
}

fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM_S8_UINT
    )
}

/// One entry of the ordered attachment list shared by the registry and the
/// pass graph builder. Its position in that list is its attachment index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentDecl {
    pub name: String,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub kind: AttachmentKind,
    pub subpass: u32,
}

impl AttachmentDecl {
    pub fn new(name: impl Into<String>, format: vk::Format, kind: AttachmentKind, subpass: u32) -> Self {
        Self {
            name: name.into(),
            format,
            usage: kind.default_usage(),
            kind,
            subpass,
        }
    }

    pub fn color(name: impl Into<String>, format: vk::Format, subpass: u32) -> Self {
        Self::new(name, format, AttachmentKind::Color, subpass)
    }

    pub fn depth(name: impl Into<String>, format: vk::Format, subpass: u32) -> Self {
        Self::new(name, format, AttachmentKind::Depth, subpass)
    }

    pub fn presented(name: impl Into<String>, format: vk::Format, subpass: u32) -> Self {
        Self::new(name, format, AttachmentKind::Presented, subpass)
    }

    pub fn with_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage = usage;
        self
    }
}

/// Checks a declaration list and returns its subpass count.
///
/// Rejects empty lists, duplicate names, gaps in subpass numbering and more
/// than one depth attachment per subpass.
pub fn validate_declarations(decls: &[AttachmentDecl]) -> RenderResult<u32> {
    if decls.is_empty() {
        return Err(RenderError::Configuration(
            "a pass graph needs at least one attachment".into(),
        ));
    }

    let mut names = HashSet::new();
    for decl in decls {
        if !names.insert(decl.name.as_str()) {
            return Err(RenderError::Configuration(format!(
                "attachment '{}' declared twice",
                decl.name
            )));
        }
    }

    let subpass_count = decls.iter().map(|d| d.subpass).max().unwrap_or(0) + 1;

    for subpass in 0..subpass_count {
        let in_subpass = decls.iter().filter(|d| d.subpass == subpass);
        let mut any = false;
        let mut depth_count = 0;
        for decl in in_subpass {
            any = true;
            if decl.kind == AttachmentKind::Depth {
                depth_count += 1;
            }
        }
        if !any {
            return Err(RenderError::Configuration(format!(
                "subpass {subpass} has no attachments; subpass indices must be contiguous from 0"
            )));
        }
        if depth_count > 1 {
            return Err(RenderError::Configuration(format!(
                "subpass {subpass} declares {depth_count} depth attachments"
            )));
        }
    }

    Ok(subpass_count)
}

/// The channels of the default deferred pipeline, in attachment order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, Display)]
pub enum GBufferChannel {
    Position,
    Normal,
    Albedo,
    Depth,
    Output,
}

impl GBufferChannel {
    pub fn declaration(
        self,
        formats: &AttachmentFormats,
        surface_format: vk::Format,
        depth_format: vk::Format,
    ) -> AttachmentDecl {
        let name = self.to_string();
        match self {
            GBufferChannel::Position => AttachmentDecl::color(name, formats.position, 0),
            GBufferChannel::Normal => AttachmentDecl::color(name, formats.normal, 0),
            GBufferChannel::Albedo => AttachmentDecl::color(name, formats.albedo, 0),
            GBufferChannel::Depth => AttachmentDecl::depth(name, depth_format, 0),
            GBufferChannel::Output => AttachmentDecl::presented(name, surface_format, 1),
        }
    }
}

/// Geometry subpass writing position/normal/albedo/depth, lighting subpass
/// reading them and writing the presented image.
pub fn deferred_attachments(
    formats: &AttachmentFormats,
    surface_format: vk::Format,
    depth_format: vk::Format,
) -> Vec<AttachmentDecl> {
    use strum::IntoEnumIterator;

    GBufferChannel::iter()
        .map(|channel| channel.declaration(formats, surface_format, depth_format))
        .collect()
}

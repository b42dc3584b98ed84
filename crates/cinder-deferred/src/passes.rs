//! Render passes owned by the renderer.

use cinder_rhi::{
    AttachmentInfo, Core, DepthAttachmentInfo, Format, RenderPassCreateInfo, RenderPassHandle,
};

use crate::error::Result;

pub const GBUFFER_ALBEDO_FORMAT: Format = Format::R8G8B8A8Unorm;
pub const GBUFFER_NORMAL_FORMAT: Format = Format::R16G16B16A16Snorm;
pub const GBUFFER_SPECULAR_ROUGHNESS_FORMAT: Format = Format::R8G8B8A8Unorm;
pub const DEPTH_FORMAT: Format = Format::D32Sfloat;
pub const HDR_FORMAT: Format = Format::R16G16B16A16Sfloat;
pub const AMBIENT_OCCLUSION_FORMAT: Format = Format::R8Unorm;
pub const BLOOM_FORMAT: Format = Format::R32G32B32A32Sfloat;
pub const SHADOW_MAP_FORMAT: Format = Format::D32Sfloat;

/// Which light a shadow map belongs to. Only affects debug names.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShadowKind {
    Spot,
    Directional,
}

impl ShadowKind {
    pub const fn render_pass_name(self) -> &'static str {
        match self {
            Self::Spot => "Spotlight Shadow Render Pass",
            Self::Directional => "Directional Shadow Render Pass",
        }
    }

    pub const fn depth_image_name(self) -> &'static str {
        match self {
            Self::Spot => "Spot Shadow Map Depth Image",
            Self::Directional => "Directional Shadow Map Depth Image",
        }
    }
}

/// Depth-only pass a shadow map is rendered with.
pub fn create_shadow_pass<C: Core>(core: &mut C, debug_name: &str) -> Result<RenderPassHandle> {
    Ok(core.create_render_pass(&RenderPassCreateInfo {
        debug_name,
        color_attachments: &[],
        depth_attachment: Some(DepthAttachmentInfo {
            format: SHADOW_MAP_FORMAT,
            should_clear: true,
            read_only: false,
        }),
        debug_color: [0.4, 0.4, 0.6, 1.0],
    })?)
}

#[derive(Clone, Copy, Debug)]
pub struct RenderPasses {
    pub gbuffer: RenderPassHandle,
    /// Lit HDR plus the G-buffer depth attached read-only.
    pub lighting: RenderPassHandle,
    pub ssao: RenderPassHandle,
    pub dof_separation: RenderPassHandle,
    pub dof_blur: RenderPassHandle,
    /// Loads the lit HDR target instead of clearing it.
    pub dof_combine: RenderPassHandle,
}

impl RenderPasses {
    pub fn new<C: Core>(core: &mut C) -> Result<Self> {
        let gbuffer = core.create_render_pass(&RenderPassCreateInfo {
            debug_name: "GBuffer Render Pass",
            color_attachments: &[
                AttachmentInfo::cleared(GBUFFER_ALBEDO_FORMAT),
                AttachmentInfo::cleared(GBUFFER_NORMAL_FORMAT),
                AttachmentInfo::cleared(GBUFFER_SPECULAR_ROUGHNESS_FORMAT),
            ],
            depth_attachment: Some(DepthAttachmentInfo {
                format: DEPTH_FORMAT,
                should_clear: true,
                read_only: false,
            }),
            debug_color: [1.0, 0.95, 0.9, 1.0],
        })?;
        let lighting = core.create_render_pass(&RenderPassCreateInfo {
            debug_name: "Main HDR Render Pass",
            color_attachments: &[AttachmentInfo::cleared(HDR_FORMAT)],
            depth_attachment: Some(DepthAttachmentInfo {
                format: DEPTH_FORMAT,
                should_clear: false,
                read_only: true,
            }),
            debug_color: [1.0, 1.0, 0.75, 1.0],
        })?;
        let ssao = core.create_render_pass(&RenderPassCreateInfo {
            debug_name: "SSAO Renderpass",
            color_attachments: &[AttachmentInfo::cleared(AMBIENT_OCCLUSION_FORMAT)],
            depth_attachment: None,
            debug_color: [0.6, 0.6, 0.6, 1.0],
        })?;
        let dof_separation = core.create_render_pass(&RenderPassCreateInfo {
            debug_name: "Depth of Field Separation Render Pass",
            color_attachments: &[
                AttachmentInfo::cleared(HDR_FORMAT),
                AttachmentInfo::cleared(HDR_FORMAT),
            ],
            depth_attachment: None,
            debug_color: [0.3, 0.8, 0.8, 1.0],
        })?;
        let dof_blur = core.create_render_pass(&RenderPassCreateInfo {
            debug_name: "Depth of Field Blur Render Pass",
            color_attachments: &[AttachmentInfo::cleared(HDR_FORMAT)],
            depth_attachment: None,
            debug_color: [0.3, 0.7, 0.9, 1.0],
        })?;
        let dof_combine = core.create_render_pass(&RenderPassCreateInfo {
            debug_name: "Depth of Field Combination Render Pass",
            color_attachments: &[AttachmentInfo::loaded(HDR_FORMAT)],
            depth_attachment: None,
            debug_color: [0.3, 0.6, 1.0, 1.0],
        })?;

        Ok(Self {
            gbuffer,
            lighting,
            ssao,
            dof_separation,
            dof_blur,
            dof_combine,
        })
    }

    pub fn destroy<C: Core>(&self, core: &mut C) -> Result<()> {
        for pass in [
            self.dof_combine,
            self.dof_blur,
            self.dof_separation,
            self.ssao,
            self.lighting,
            self.gbuffer,
        ] {
            core.delete_render_pass(pass)?;
        }
        Ok(())
    }
}

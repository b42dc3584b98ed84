//! CreateInfo structs and the owned descriptions the registry keeps.
//!
//! A `*CreateInfo` borrows everything the caller hands in, including initial
//! data and shader bytecode. Creation validates it and turns it into an owned
//! `*Desc` that lives in the [`ResourceRegistry`](crate::ResourceRegistry) for
//! as long as the resource does.

use crate::descriptor::{Binding, LayoutBinding};
use crate::error::{Result, RhiError};
use crate::flags::{BufferUsage, ImageUsage, MemoryUsage, ShaderStages};
use crate::format::{resolve_mip_levels, Format};
use crate::handles::{BufferHandle, DescriptorSetLayoutHandle, ImageHandle, RenderPassHandle};
use crate::state::{
    BlendState, DepthState, IndexType, PrimitiveTopology, RasterState, TextureFilter,
    TextureWrapMode, VertexInputRate,
};

fn require_name(name: &str, kind: &'static str) -> Result<()> {
    if name.is_empty() {
        tracing::error!("Refusing to create an unnamed {kind}");
        return Err(RhiError::MissingDebugName(kind));
    }
    Ok(())
}

fn invalid(name: &str, reason: impl Into<String>) -> RhiError {
    RhiError::InvalidCreateInfo {
        name: name.to_owned(),
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Buffers
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
pub struct BufferCreateInfo<'a> {
    pub debug_name: &'a str,
    pub size: u64,
    pub usage: BufferUsage,
    pub memory: MemoryUsage,
    pub initial_data: Option<&'a [u8]>,
}

impl<'a> BufferCreateInfo<'a> {
    pub const fn new(debug_name: &'a str, size: u64, usage: BufferUsage, memory: MemoryUsage) -> Self {
        Self {
            debug_name,
            size,
            usage,
            memory,
            initial_data: None,
        }
    }

    /// Uniform buffer the CPU rewrites every frame.
    pub const fn uniform(debug_name: &'a str, size: u64) -> Self {
        Self::new(debug_name, size, BufferUsage::UNIFORM, MemoryUsage::CpuToGpu)
    }

    #[must_use]
    pub const fn with_data(mut self, data: &'a [u8]) -> Self {
        self.initial_data = Some(data);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    pub debug_name: String,
    pub size: u64,
    pub usage: BufferUsage,
    pub memory: MemoryUsage,
}

impl BufferDesc {
    pub fn from_info(info: &BufferCreateInfo<'_>) -> Result<Self> {
        require_name(info.debug_name, "buffer")?;
        if info.size == 0 {
            return Err(invalid(info.debug_name, "size must be non-zero"));
        }
        if let Some(data) = info.initial_data {
            if data.len() as u64 > info.size {
                return Err(RhiError::UploadOutOfRange(format!(
                    "'{}': {} bytes into a {} byte buffer",
                    info.debug_name,
                    data.len(),
                    info.size
                )));
            }
        }
        Ok(Self {
            debug_name: info.debug_name.to_owned(),
            size: info.size,
            usage: info.usage,
            memory: info.memory,
        })
    }
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
pub struct ImageCreateInfo<'a> {
    pub debug_name: &'a str,
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    /// Requested mip levels. 0 means "unset".
    pub mip_levels: u32,
    pub array_layers: u32,
    pub usage: ImageUsage,
    pub initial_data: Option<&'a [u8]>,
}

impl<'a> ImageCreateInfo<'a> {
    pub const fn new(
        debug_name: &'a str,
        format: Format,
        width: u32,
        height: u32,
        usage: ImageUsage,
    ) -> Self {
        Self {
            debug_name,
            format,
            width,
            height,
            depth: 1,
            mip_levels: 0,
            array_layers: 1,
            usage,
            initial_data: None,
        }
    }

    /// Sampled color target written by a render pass.
    pub const fn render_target(debug_name: &'a str, format: Format, width: u32, height: u32) -> Self {
        Self::new(
            debug_name,
            format,
            width,
            height,
            ImageUsage::RENDER_TARGET.union(ImageUsage::SAMPLED),
        )
    }

    /// Sampled depth target written by a render pass.
    pub const fn depth_target(debug_name: &'a str, format: Format, width: u32, height: u32) -> Self {
        Self::new(
            debug_name,
            format,
            width,
            height,
            ImageUsage::DEPTH_STENCIL.union(ImageUsage::SAMPLED),
        )
    }

    /// Sampled image written by compute shaders.
    pub const fn storage(debug_name: &'a str, format: Format, width: u32, height: u32) -> Self {
        Self::new(
            debug_name,
            format,
            width,
            height,
            ImageUsage::STORAGE.union(ImageUsage::SAMPLED),
        )
    }

    #[must_use]
    pub const fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    #[must_use]
    pub const fn with_array_layers(mut self, array_layers: u32) -> Self {
        self.array_layers = array_layers;
        self
    }

    #[must_use]
    pub const fn with_data(mut self, data: &'a [u8]) -> Self {
        self.initial_data = Some(data);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageDesc {
    pub debug_name: String,
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub usage: ImageUsage,
    /// Resolved from `GENERATE_MIPMAPS` and the format.
    pub generate_mipmaps: bool,
}

impl ImageDesc {
    pub fn from_info(info: &ImageCreateInfo<'_>) -> Result<Self> {
        require_name(info.debug_name, "image")?;
        if info.width == 0 || info.height == 0 || info.depth == 0 {
            return Err(invalid(info.debug_name, "extent must be non-zero"));
        }
        if info.usage.is_empty() {
            return Err(invalid(info.debug_name, "usage must not be empty"));
        }
        if info.usage.contains(ImageUsage::DEPTH_STENCIL) != info.format.is_depth() {
            return Err(invalid(
                info.debug_name,
                format!("DEPTH_STENCIL usage does not agree with {:?}", info.format),
            ));
        }
        if info.usage.contains(ImageUsage::CUBEMAP) && info.array_layers % 6 != 0 {
            return Err(invalid(info.debug_name, "cubemaps need a multiple of 6 layers"));
        }

        let plan = resolve_mip_levels(
            info.format,
            info.width,
            info.height,
            info.mip_levels,
            info.usage.contains(ImageUsage::GENERATE_MIPMAPS),
        );
        if info.usage.contains(ImageUsage::GENERATE_MIPMAPS) && !plan.generate {
            tracing::debug!(
                "'{}': {:?} is block compressed, mipmaps will not be generated",
                info.debug_name,
                info.format
            );
        }

        Ok(Self {
            debug_name: info.debug_name.to_owned(),
            format: info.format,
            width: info.width,
            height: info.height,
            depth: info.depth,
            mip_levels: plan.levels,
            array_layers: info.array_layers.max(1),
            usage: info.usage,
            generate_mipmaps: plan.generate,
        })
    }

    /// Number of spatial axes, used to pick 1D/2D/3D native types.
    pub const fn axis_count(&self) -> u32 {
        if self.depth > 1 {
            3
        } else if self.height > 1 {
            2
        } else {
            1
        }
    }

    pub const fn is_cubemap(&self) -> bool {
        self.usage.contains(ImageUsage::CUBEMAP)
    }

    /// The same image at a new extent, with mip levels re-resolved.
    #[must_use]
    pub fn resized(&self, width: u32, height: u32) -> Self {
        let requested = if self.generate_mipmaps { 0 } else { self.mip_levels };
        let plan = resolve_mip_levels(self.format, width, height, requested, self.generate_mipmaps);
        Self {
            width: width.max(1),
            height: height.max(1),
            mip_levels: plan.levels,
            ..self.clone()
        }
    }

    /// Bytes a full upload of every layer and mip must supply.
    pub fn upload_size(&self) -> u64 {
        let mips = if self.generate_mipmaps { 1 } else { self.mip_levels };
        crate::format::subresource_regions(self.format, self.width, self.height, mips, self.array_layers).1
    }
}

// ---------------------------------------------------------------------------
// Samplers
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct SamplerCreateInfo<'a> {
    pub debug_name: &'a str,
    pub min_filter: TextureFilter,
    pub mag_filter: TextureFilter,
    pub mip_filter: TextureFilter,
    pub wrap_u: TextureWrapMode,
    pub wrap_v: TextureWrapMode,
    pub wrap_w: TextureWrapMode,
    /// 0 disables anisotropic filtering.
    pub max_anisotropy: f32,
    pub mip_lod_bias: f32,
    pub min_lod: f32,
    pub max_lod: f32,
}

impl<'a> SamplerCreateInfo<'a> {
    pub const fn new(debug_name: &'a str) -> Self {
        Self {
            debug_name,
            min_filter: TextureFilter::Linear,
            mag_filter: TextureFilter::Linear,
            mip_filter: TextureFilter::Linear,
            wrap_u: TextureWrapMode::Repeat,
            wrap_v: TextureWrapMode::Repeat,
            wrap_w: TextureWrapMode::Repeat,
            max_anisotropy: 0.0,
            mip_lod_bias: 0.0,
            min_lod: 0.0,
            max_lod: 1000.0,
        }
    }

    #[must_use]
    pub const fn with_filter(mut self, filter: TextureFilter) -> Self {
        self.min_filter = filter;
        self.mag_filter = filter;
        self.mip_filter = filter;
        self
    }

    #[must_use]
    pub const fn with_wrap(mut self, wrap: TextureWrapMode) -> Self {
        self.wrap_u = wrap;
        self.wrap_v = wrap;
        self.wrap_w = wrap;
        self
    }

    #[must_use]
    pub const fn with_anisotropy(mut self, max_anisotropy: f32) -> Self {
        self.max_anisotropy = max_anisotropy;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SamplerDesc {
    pub debug_name: String,
    pub min_filter: TextureFilter,
    pub mag_filter: TextureFilter,
    pub mip_filter: TextureFilter,
    pub wrap_u: TextureWrapMode,
    pub wrap_v: TextureWrapMode,
    pub wrap_w: TextureWrapMode,
    pub max_anisotropy: f32,
    pub mip_lod_bias: f32,
    pub min_lod: f32,
    pub max_lod: f32,
}

impl SamplerDesc {
    pub fn from_info(info: &SamplerCreateInfo<'_>) -> Result<Self> {
        require_name(info.debug_name, "sampler")?;
        if info.min_lod > info.max_lod {
            return Err(invalid(info.debug_name, "min_lod exceeds max_lod"));
        }
        Ok(Self {
            debug_name: info.debug_name.to_owned(),
            min_filter: info.min_filter,
            mag_filter: info.mag_filter,
            mip_filter: info.mip_filter,
            wrap_u: info.wrap_u,
            wrap_v: info.wrap_v,
            wrap_w: info.wrap_w,
            max_anisotropy: info.max_anisotropy.max(0.0),
            mip_lod_bias: info.mip_lod_bias,
            min_lod: info.min_lod,
            max_lod: info.max_lod,
        })
    }
}

// ---------------------------------------------------------------------------
// Render passes and framebuffers
// ---------------------------------------------------------------------------

/// One color attachment of a render pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttachmentInfo {
    pub format: Format,
    pub should_clear: bool,
}

impl AttachmentInfo {
    pub const fn cleared(format: Format) -> Self {
        Self {
            format,
            should_clear: true,
        }
    }

    pub const fn loaded(format: Format) -> Self {
        Self {
            format,
            should_clear: false,
        }
    }
}

/// Depth attachment of a render pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthAttachmentInfo {
    pub format: Format,
    pub should_clear: bool,
    /// Attached for depth testing only, so shaders may sample it in the same pass.
    pub read_only: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct RenderPassCreateInfo<'a> {
    pub debug_name: &'a str,
    pub color_attachments: &'a [AttachmentInfo],
    pub depth_attachment: Option<DepthAttachmentInfo>,
    pub debug_color: [f32; 4],
}

#[derive(Clone, Debug, PartialEq)]
pub struct RenderPassDesc {
    pub debug_name: String,
    pub color_attachments: Vec<AttachmentInfo>,
    pub depth_attachment: Option<DepthAttachmentInfo>,
    pub debug_color: [f32; 4],
    /// Set for passes that render straight into swapchain images.
    pub presents: bool,
}

impl RenderPassDesc {
    pub fn from_info(info: &RenderPassCreateInfo<'_>) -> Result<Self> {
        require_name(info.debug_name, "render pass")?;
        if info.color_attachments.is_empty() && info.depth_attachment.is_none() {
            return Err(invalid(info.debug_name, "render pass has no attachments"));
        }
        if let Some(color) = info.color_attachments.iter().find(|a| a.format.is_depth()) {
            return Err(invalid(
                info.debug_name,
                format!("{:?} is not a color format", color.format),
            ));
        }
        if let Some(depth) = info.depth_attachment {
            if !depth.format.is_depth() {
                return Err(invalid(
                    info.debug_name,
                    format!("{:?} is not a depth format", depth.format),
                ));
            }
        }
        Ok(Self {
            debug_name: info.debug_name.to_owned(),
            color_attachments: info.color_attachments.to_vec(),
            depth_attachment: info.depth_attachment,
            debug_color: info.debug_color,
            presents: false,
        })
    }

    /// Clear values a bind of this pass consumes: one per color plus depth.
    pub fn clear_value_count(&self) -> usize {
        self.color_attachments.len() + usize::from(self.depth_attachment.is_some())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FramebufferCreateInfo<'a> {
    pub debug_name: &'a str,
    pub render_pass: RenderPassHandle,
    pub color_attachments: &'a [ImageHandle],
    pub depth_attachment: Option<ImageHandle>,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FramebufferDesc {
    pub debug_name: String,
    pub render_pass: RenderPassHandle,
    pub color_attachments: Vec<ImageHandle>,
    pub depth_attachment: Option<ImageHandle>,
    pub width: u32,
    pub height: u32,
}

impl FramebufferDesc {
    /// Attachment compatibility is checked by the registry, which can see the images.
    pub fn from_info(info: &FramebufferCreateInfo<'_>) -> Result<Self> {
        require_name(info.debug_name, "framebuffer")?;
        if info.width == 0 || info.height == 0 {
            return Err(invalid(info.debug_name, "extent must be non-zero"));
        }
        Ok(Self {
            debug_name: info.debug_name.to_owned(),
            render_pass: info.render_pass,
            color_attachments: info.color_attachments.to_vec(),
            depth_attachment: info.depth_attachment,
            width: info.width,
            height: info.height,
        })
    }

    /// Every attachment, colors first.
    pub fn attachments(&self) -> impl Iterator<Item = ImageHandle> + '_ {
        self.color_attachments
            .iter()
            .copied()
            .chain(self.depth_attachment)
    }
}

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
pub struct DescriptorSetLayoutCreateInfo<'a> {
    pub debug_name: &'a str,
    pub bindings: &'a [LayoutBinding],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DescriptorSetLayoutDesc {
    pub debug_name: String,
    pub bindings: Vec<LayoutBinding>,
}

impl DescriptorSetLayoutDesc {
    pub fn from_info(info: &DescriptorSetLayoutCreateInfo<'_>) -> Result<Self> {
        require_name(info.debug_name, "descriptor set layout")?;
        for (index, binding) in info.bindings.iter().enumerate() {
            match binding.count {
                0 => {
                    return Err(invalid(
                        info.debug_name,
                        format!("binding {} has a count of 0", binding.binding),
                    ))
                }
                1 => {}
                count => {
                    return Err(RhiError::Unsupported(format!(
                        "'{}': binding {} is an array of {count}; descriptor arrays are not supported",
                        info.debug_name, binding.binding
                    )))
                }
            }
            if info.bindings[..index]
                .iter()
                .any(|other| other.binding == binding.binding)
            {
                return Err(invalid(
                    info.debug_name,
                    format!("binding {} declared twice", binding.binding),
                ));
            }
        }
        Ok(Self {
            debug_name: info.debug_name.to_owned(),
            bindings: info.bindings.to_vec(),
        })
    }

    pub fn binding(&self, slot: u32) -> Option<&LayoutBinding> {
        self.bindings.iter().find(|b| b.binding == slot)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DescriptorSetCreateInfo<'a> {
    pub debug_name: &'a str,
    pub layout: DescriptorSetLayoutHandle,
    /// Bindings in layout order; `None` items are left empty.
    pub bindings: &'a [Binding],
}

// ---------------------------------------------------------------------------
// Pipelines and vertex input
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VertexAttribute {
    pub debug_name: String,
    pub location: u32,
    pub offset: u32,
    pub format: Format,
}

impl VertexAttribute {
    pub fn new(debug_name: &str, location: u32, offset: u32, format: Format) -> Self {
        Self {
            debug_name: debug_name.to_owned(),
            location,
            offset,
            format,
        }
    }
}

/// One vertex buffer binding and the attributes read from it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VertexBindingLayout {
    pub stride: u32,
    pub input_rate: VertexInputRate,
    pub attributes: Vec<VertexAttribute>,
}

/// A single shader stage: opaque bytecode plus entry point.
#[derive(Clone, Copy, Debug)]
pub struct ShaderStageInfo<'a> {
    pub stage: ShaderStages,
    pub code: &'a [u8],
    pub entry_point: &'a str,
}

impl<'a> ShaderStageInfo<'a> {
    pub const fn new(stage: ShaderStages, code: &'a [u8]) -> Self {
        Self {
            stage,
            code,
            entry_point: "main",
        }
    }
}

#[derive(Clone, Debug)]
pub struct GraphicsPipelineCreateInfo<'a> {
    pub debug_name: &'a str,
    pub stages: &'a [ShaderStageInfo<'a>],
    pub vertex_bindings: &'a [VertexBindingLayout],
    pub set_layouts: &'a [DescriptorSetLayoutHandle],
    pub render_pass: RenderPassHandle,
    pub topology: PrimitiveTopology,
    pub raster: RasterState,
    pub depth: DepthState,
    /// One per color attachment; a single entry applies to all of them.
    pub blend: &'a [BlendState],
}

#[derive(Clone, Debug, PartialEq)]
pub struct GraphicsPipelineDesc {
    pub debug_name: String,
    pub stages: ShaderStages,
    pub vertex_bindings: Vec<VertexBindingLayout>,
    pub set_layouts: Vec<DescriptorSetLayoutHandle>,
    pub render_pass: RenderPassHandle,
    pub topology: PrimitiveTopology,
    pub raster: RasterState,
    pub depth: DepthState,
    pub blend: Vec<BlendState>,
}

impl GraphicsPipelineDesc {
    pub fn from_info(info: &GraphicsPipelineCreateInfo<'_>) -> Result<Self> {
        require_name(info.debug_name, "graphics pipeline")?;
        let mut stages = ShaderStages::empty();
        for stage in info.stages {
            if stage.stage.bits().count_ones() != 1 || stage.stage.contains(ShaderStages::COMPUTE) {
                return Err(invalid(
                    info.debug_name,
                    format!("{:?} is not a single graphics stage", stage.stage),
                ));
            }
            if stage.code.is_empty() {
                return Err(invalid(info.debug_name, format!("{:?} has no code", stage.stage)));
            }
            stages |= stage.stage;
        }
        if !stages.contains(ShaderStages::VERTEX) {
            return Err(invalid(info.debug_name, "a vertex stage is required"));
        }
        Ok(Self {
            debug_name: info.debug_name.to_owned(),
            stages,
            vertex_bindings: info.vertex_bindings.to_vec(),
            set_layouts: info.set_layouts.to_vec(),
            render_pass: info.render_pass,
            topology: info.topology,
            raster: info.raster,
            depth: info.depth,
            blend: info.blend.to_vec(),
        })
    }

    /// Blend state for color attachment `index`.
    pub fn blend_for(&self, index: usize) -> BlendState {
        match self.blend.as_slice() {
            [] => BlendState::OPAQUE,
            [single] => *single,
            many => many.get(index).copied().unwrap_or(BlendState::OPAQUE),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ComputePipelineCreateInfo<'a> {
    pub debug_name: &'a str,
    pub stage: ShaderStageInfo<'a>,
    pub set_layouts: &'a [DescriptorSetLayoutHandle],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComputePipelineDesc {
    pub debug_name: String,
    pub set_layouts: Vec<DescriptorSetLayoutHandle>,
}

impl ComputePipelineDesc {
    pub fn from_info(info: &ComputePipelineCreateInfo<'_>) -> Result<Self> {
        require_name(info.debug_name, "compute pipeline")?;
        if info.stage.stage != ShaderStages::COMPUTE {
            return Err(invalid(info.debug_name, "stage must be COMPUTE"));
        }
        if info.stage.code.is_empty() {
            return Err(invalid(info.debug_name, "compute stage has no code"));
        }
        Ok(Self {
            debug_name: info.debug_name.to_owned(),
            set_layouts: info.set_layouts.to_vec(),
        })
    }
}

#[derive(Clone, Debug)]
pub struct VertexArrayCreateInfo<'a> {
    pub debug_name: &'a str,
    pub vertex_buffers: &'a [BufferHandle],
    pub layouts: &'a [VertexBindingLayout],
    pub index_buffer: Option<BufferHandle>,
    pub index_type: IndexType,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VertexArrayDesc {
    pub debug_name: String,
    pub vertex_buffers: Vec<BufferHandle>,
    pub layouts: Vec<VertexBindingLayout>,
    pub index_buffer: Option<BufferHandle>,
    pub index_type: IndexType,
}

impl VertexArrayDesc {
    pub fn from_info(info: &VertexArrayCreateInfo<'_>) -> Result<Self> {
        require_name(info.debug_name, "vertex array")?;
        if info.vertex_buffers.len() != info.layouts.len() {
            return Err(invalid(
                info.debug_name,
                format!(
                    "{} vertex buffers but {} layouts",
                    info.vertex_buffers.len(),
                    info.layouts.len()
                ),
            ));
        }
        Ok(Self {
            debug_name: info.debug_name.to_owned(),
            vertex_buffers: info.vertex_buffers.to_vec(),
            layouts: info.layouts.to_vec(),
            index_buffer: info.index_buffer,
            index_type: info.index_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::BindingKind;

    #[test]
    fn unnamed_resources_are_rejected() {
        let info = BufferCreateInfo::uniform("", 64);
        assert!(matches!(
            BufferDesc::from_info(&info),
            Err(RhiError::MissingDebugName("buffer"))
        ));

        let image = ImageCreateInfo::render_target("", Format::R8Unorm, 4, 4);
        assert!(matches!(
            ImageDesc::from_info(&image),
            Err(RhiError::MissingDebugName("image"))
        ));
    }

    #[test]
    fn image_mips_follow_format_rules() {
        let info = ImageCreateInfo::new("Albedo", Format::R8G8B8A8Unorm, 256, 256, ImageUsage::SAMPLED);
        assert_eq!(ImageDesc::from_info(&info).unwrap().mip_levels, 1);

        let generated = ImageCreateInfo::new(
            "Albedo",
            Format::R8G8B8A8Unorm,
            256,
            256,
            ImageUsage::SAMPLED | ImageUsage::GENERATE_MIPMAPS,
        );
        let desc = ImageDesc::from_info(&generated).unwrap();
        assert_eq!(desc.mip_levels, 9);
        assert!(desc.generate_mipmaps);

        let compressed = ImageCreateInfo::new(
            "Compressed",
            Format::Bc3Unorm,
            256,
            256,
            ImageUsage::SAMPLED | ImageUsage::GENERATE_MIPMAPS,
        );
        let desc = ImageDesc::from_info(&compressed).unwrap();
        assert_eq!(desc.mip_levels, 1);
        assert!(!desc.generate_mipmaps);
    }

    #[test]
    fn depth_usage_must_match_format() {
        let info = ImageCreateInfo::depth_target("Depth", Format::R8G8B8A8Unorm, 4, 4);
        assert!(matches!(
            ImageDesc::from_info(&info),
            Err(RhiError::InvalidCreateInfo { .. })
        ));
    }

    #[test]
    fn oversized_initial_data_is_rejected() {
        let data = [0u8; 32];
        let info = BufferCreateInfo::uniform("Small", 16).with_data(&data);
        assert!(matches!(
            BufferDesc::from_info(&info),
            Err(RhiError::UploadOutOfRange(_))
        ));
    }

    #[test]
    fn clear_count_includes_depth_once() {
        let colors = [AttachmentInfo::cleared(Format::R8G8B8A8Unorm); 3];
        let info = RenderPassCreateInfo {
            debug_name: "Three Colors",
            color_attachments: &colors,
            depth_attachment: None,
            debug_color: [1.0; 4],
        };
        assert_eq!(RenderPassDesc::from_info(&info).unwrap().clear_value_count(), 3);

        let with_depth = RenderPassCreateInfo {
            depth_attachment: Some(DepthAttachmentInfo {
                format: Format::D32Sfloat,
                should_clear: true,
                read_only: false,
            }),
            ..info
        };
        assert_eq!(
            RenderPassDesc::from_info(&with_depth).unwrap().clear_value_count(),
            4
        );
    }

    #[test]
    fn descriptor_arrays_are_rejected() {
        fn layout(binding: LayoutBinding) -> Result<DescriptorSetLayoutDesc> {
            DescriptorSetLayoutDesc::from_info(&DescriptorSetLayoutCreateInfo {
                debug_name: "Materials",
                bindings: &[binding],
            })
        }

        let mut textures = LayoutBinding::new(0, BindingKind::SampledImage, ShaderStages::FRAGMENT);
        assert!(layout(textures).is_ok());
        textures.count = 4;
        assert!(matches!(layout(textures), Err(RhiError::Unsupported(_))));
        textures.count = 0;
        assert!(matches!(layout(textures), Err(RhiError::InvalidCreateInfo { .. })));
    }

    #[test]
    fn single_blend_state_applies_to_all_attachments() {
        let code = [0u8; 4];
        let stages = [ShaderStageInfo::new(ShaderStages::VERTEX, &code)];
        let blend = [BlendState::ADDITIVE];
        let info = GraphicsPipelineCreateInfo {
            debug_name: "Light",
            stages: &stages,
            vertex_bindings: &[],
            set_layouts: &[],
            render_pass: RenderPassHandle::default(),
            topology: PrimitiveTopology::TriangleList,
            raster: RasterState::default(),
            depth: DepthState::DISABLED,
            blend: &blend,
        };
        let desc = GraphicsPipelineDesc::from_info(&info).unwrap();
        assert_eq!(desc.blend_for(2), BlendState::ADDITIVE);
    }
}

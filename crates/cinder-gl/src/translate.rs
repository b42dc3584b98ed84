//! Conversion between RHI types and GL enums.

use cinder_rhi::{
    BlendFactor, BlendOperation, BufferAccess, CompareOperation, CullMode, Format, FrontFace,
    ImageAccess, ImageDesc, IndexType, MemoryUsage, PolygonMode, PrimitiveTopology,
    RenderPassDesc, ShaderStages, TextureFilter, TextureWrapMode,
};

/// How a texel format is allocated and uploaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TexelLayout {
    /// `glTexSubImage*` with an external format and type.
    Uncompressed { internal: u32, format: u32, ty: u32 },
    /// `glCompressedTexSubImage*`.
    Compressed { internal: u32 },
}

impl TexelLayout {
    pub const fn internal_format(self) -> u32 {
        match self {
            Self::Uncompressed { internal, .. } | Self::Compressed { internal } => internal,
        }
    }
}

const fn plain(internal: u32, format: u32, ty: u32) -> TexelLayout {
    TexelLayout::Uncompressed { internal, format, ty }
}

pub const fn texel_layout(format: Format) -> TexelLayout {
    match format {
        Format::R8Unorm => plain(glow::R8, glow::RED, glow::UNSIGNED_BYTE),
        Format::R8Snorm => plain(glow::R8_SNORM, glow::RED, glow::BYTE),
        Format::R8Uint => plain(glow::R8UI, glow::RED_INTEGER, glow::UNSIGNED_BYTE),
        Format::R8G8Unorm => plain(glow::RG8, glow::RG, glow::UNSIGNED_BYTE),
        Format::R8G8Snorm => plain(glow::RG8_SNORM, glow::RG, glow::BYTE),
        Format::R8G8B8A8Unorm => plain(glow::RGBA8, glow::RGBA, glow::UNSIGNED_BYTE),
        Format::R8G8B8A8Snorm => plain(glow::RGBA8_SNORM, glow::RGBA, glow::BYTE),
        Format::R8G8B8A8Srgb => plain(glow::SRGB8_ALPHA8, glow::RGBA, glow::UNSIGNED_BYTE),
        Format::B8G8R8A8Unorm => plain(glow::RGBA8, glow::BGRA, glow::UNSIGNED_BYTE),
        Format::B8G8R8A8Srgb => plain(glow::SRGB8_ALPHA8, glow::BGRA, glow::UNSIGNED_BYTE),
        Format::R16Unorm => plain(glow::R16, glow::RED, glow::UNSIGNED_SHORT),
        Format::R16Sfloat => plain(glow::R16F, glow::RED, glow::HALF_FLOAT),
        Format::R16G16Unorm => plain(glow::RG16, glow::RG, glow::UNSIGNED_SHORT),
        Format::R16G16Sfloat => plain(glow::RG16F, glow::RG, glow::HALF_FLOAT),
        Format::R16G16B16A16Unorm => plain(glow::RGBA16, glow::RGBA, glow::UNSIGNED_SHORT),
        Format::R16G16B16A16Snorm => plain(glow::RGBA16_SNORM, glow::RGBA, glow::SHORT),
        Format::R16G16B16A16Sfloat => plain(glow::RGBA16F, glow::RGBA, glow::HALF_FLOAT),
        Format::R32Uint => plain(glow::R32UI, glow::RED_INTEGER, glow::UNSIGNED_INT),
        Format::R32Sfloat => plain(glow::R32F, glow::RED, glow::FLOAT),
        Format::R32G32Sfloat => plain(glow::RG32F, glow::RG, glow::FLOAT),
        Format::R32G32B32Sfloat => plain(glow::RGB32F, glow::RGB, glow::FLOAT),
        Format::R32G32B32A32Sfloat => plain(glow::RGBA32F, glow::RGBA, glow::FLOAT),
        Format::D16Unorm => plain(glow::DEPTH_COMPONENT16, glow::DEPTH_COMPONENT, glow::UNSIGNED_SHORT),
        Format::D24UnormS8Uint => plain(glow::DEPTH24_STENCIL8, glow::DEPTH_STENCIL, glow::UNSIGNED_INT_24_8),
        Format::D32Sfloat => plain(glow::DEPTH_COMPONENT32F, glow::DEPTH_COMPONENT, glow::FLOAT),
        Format::D32SfloatS8Uint => plain(
            glow::DEPTH32F_STENCIL8,
            glow::DEPTH_STENCIL,
            glow::FLOAT_32_UNSIGNED_INT_24_8_REV,
        ),
        Format::Bc1RgbUnorm => TexelLayout::Compressed {
            internal: glow::COMPRESSED_RGB_S3TC_DXT1_EXT,
        },
        Format::Bc1RgbaUnorm => TexelLayout::Compressed {
            internal: glow::COMPRESSED_RGBA_S3TC_DXT1_EXT,
        },
        Format::Bc2Unorm => TexelLayout::Compressed {
            internal: glow::COMPRESSED_RGBA_S3TC_DXT3_EXT,
        },
        Format::Bc3Unorm => TexelLayout::Compressed {
            internal: glow::COMPRESSED_RGBA_S3TC_DXT5_EXT,
        },
        Format::Bc4Unorm => TexelLayout::Compressed {
            internal: glow::COMPRESSED_RED_RGTC1,
        },
        Format::Bc5Unorm => TexelLayout::Compressed {
            internal: glow::COMPRESSED_RG_RGTC2,
        },
        Format::Bc6hUfloat => TexelLayout::Compressed {
            internal: glow::COMPRESSED_RGB_BPTC_UNSIGNED_FLOAT,
        },
        Format::Bc7Unorm => TexelLayout::Compressed {
            internal: glow::COMPRESSED_RGBA_BPTC_UNORM,
        },
    }
}

/// Texture target for an image's shape.
pub const fn texture_target(desc: &ImageDesc) -> u32 {
    if desc.is_cubemap() {
        if desc.array_layers > 6 {
            glow::TEXTURE_CUBE_MAP_ARRAY
        } else {
            glow::TEXTURE_CUBE_MAP
        }
    } else if desc.depth > 1 {
        glow::TEXTURE_3D
    } else if desc.array_layers > 1 {
        glow::TEXTURE_2D_ARRAY
    } else {
        glow::TEXTURE_2D
    }
}

/// Whether the target's storage takes a third extent.
pub const fn is_layered_target(target: u32) -> bool {
    matches!(
        target,
        glow::TEXTURE_3D | glow::TEXTURE_2D_ARRAY | glow::TEXTURE_CUBE_MAP_ARRAY
    )
}

/// Attachment point of a depth format.
pub const fn depth_attachment_point(format: Format) -> u32 {
    if format.has_stencil() {
        glow::DEPTH_STENCIL_ATTACHMENT
    } else {
        glow::DEPTH_ATTACHMENT
    }
}

pub const fn min_filter_to_gl(min: TextureFilter, mip: TextureFilter, mipmapped: bool) -> u32 {
    if !mipmapped {
        return mag_filter_to_gl(min);
    }
    match (min, mip) {
        (TextureFilter::Nearest, TextureFilter::Nearest) => glow::NEAREST_MIPMAP_NEAREST,
        (TextureFilter::Linear, TextureFilter::Nearest) => glow::LINEAR_MIPMAP_NEAREST,
        (TextureFilter::Nearest, TextureFilter::Linear) => glow::NEAREST_MIPMAP_LINEAR,
        (TextureFilter::Linear, TextureFilter::Linear) => glow::LINEAR_MIPMAP_LINEAR,
    }
}

pub const fn mag_filter_to_gl(filter: TextureFilter) -> u32 {
    match filter {
        TextureFilter::Nearest => glow::NEAREST,
        TextureFilter::Linear => glow::LINEAR,
    }
}

pub const fn wrap_to_gl(wrap: TextureWrapMode) -> u32 {
    match wrap {
        TextureWrapMode::Repeat => glow::REPEAT,
        TextureWrapMode::ClampToEdge => glow::CLAMP_TO_EDGE,
        TextureWrapMode::ClampToBorder => glow::CLAMP_TO_BORDER,
        TextureWrapMode::MirroredRepeat => glow::MIRRORED_REPEAT,
        TextureWrapMode::MirrorClampToEdge => glow::MIRROR_CLAMP_TO_EDGE,
    }
}

/// `None` disables face culling.
pub const fn cull_face_to_gl(mode: CullMode) -> Option<u32> {
    match mode {
        CullMode::None => None,
        CullMode::Front => Some(glow::FRONT),
        CullMode::Back => Some(glow::BACK),
        CullMode::Both => Some(glow::FRONT_AND_BACK),
    }
}

pub const fn front_face_to_gl(face: FrontFace) -> u32 {
    match face {
        FrontFace::CounterClockwise => glow::CCW,
        FrontFace::Clockwise => glow::CW,
    }
}

pub const fn polygon_mode_to_gl(mode: PolygonMode) -> u32 {
    match mode {
        PolygonMode::Fill => glow::FILL,
        PolygonMode::Line => glow::LINE,
        PolygonMode::Point => glow::POINT,
    }
}

pub const fn topology_to_gl(topology: PrimitiveTopology) -> u32 {
    match topology {
        PrimitiveTopology::PointList => glow::POINTS,
        PrimitiveTopology::LineList => glow::LINES,
        PrimitiveTopology::LineStrip => glow::LINE_STRIP,
        PrimitiveTopology::TriangleList => glow::TRIANGLES,
        PrimitiveTopology::TriangleStrip => glow::TRIANGLE_STRIP,
        PrimitiveTopology::TriangleFan => glow::TRIANGLE_FAN,
        PrimitiveTopology::PatchList => glow::PATCHES,
    }
}

pub const fn blend_factor_to_gl(factor: BlendFactor) -> u32 {
    match factor {
        BlendFactor::Zero => glow::ZERO,
        BlendFactor::One => glow::ONE,
        BlendFactor::SrcColor => glow::SRC_COLOR,
        BlendFactor::OneMinusSrcColor => glow::ONE_MINUS_SRC_COLOR,
        BlendFactor::DstColor => glow::DST_COLOR,
        BlendFactor::OneMinusDstColor => glow::ONE_MINUS_DST_COLOR,
        BlendFactor::SrcAlpha => glow::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => glow::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstAlpha => glow::DST_ALPHA,
        BlendFactor::OneMinusDstAlpha => glow::ONE_MINUS_DST_ALPHA,
        BlendFactor::ConstantColor => glow::CONSTANT_COLOR,
        BlendFactor::OneMinusConstantColor => glow::ONE_MINUS_CONSTANT_COLOR,
        BlendFactor::ConstantAlpha => glow::CONSTANT_ALPHA,
        BlendFactor::OneMinusConstantAlpha => glow::ONE_MINUS_CONSTANT_ALPHA,
        BlendFactor::SrcAlphaSaturate => glow::SRC_ALPHA_SATURATE,
    }
}

pub const fn blend_op_to_gl(op: BlendOperation) -> u32 {
    match op {
        BlendOperation::Add => glow::FUNC_ADD,
        BlendOperation::Subtract => glow::FUNC_SUBTRACT,
        BlendOperation::ReverseSubtract => glow::FUNC_REVERSE_SUBTRACT,
        BlendOperation::Min => glow::MIN,
        BlendOperation::Max => glow::MAX,
    }
}

pub const fn compare_op_to_gl(op: CompareOperation) -> u32 {
    match op {
        CompareOperation::Never => glow::NEVER,
        CompareOperation::Less => glow::LESS,
        CompareOperation::Equal => glow::EQUAL,
        CompareOperation::LessOrEqual => glow::LEQUAL,
        CompareOperation::Greater => glow::GREATER,
        CompareOperation::NotEqual => glow::NOTEQUAL,
        CompareOperation::GreaterOrEqual => glow::GEQUAL,
        CompareOperation::Always => glow::ALWAYS,
    }
}

pub const fn index_type_to_gl(index_type: IndexType) -> u32 {
    match index_type {
        IndexType::Uint16 => glow::UNSIGNED_SHORT,
        IndexType::Uint32 => glow::UNSIGNED_INT,
    }
}

/// Shader object type of a single stage bit.
pub fn shader_stage_to_gl(stage: ShaderStages) -> Option<u32> {
    const TABLE: [(ShaderStages, u32); 6] = [
        (ShaderStages::VERTEX, glow::VERTEX_SHADER),
        (ShaderStages::TESS_CTRL, glow::TESS_CONTROL_SHADER),
        (ShaderStages::TESS_EVAL, glow::TESS_EVALUATION_SHADER),
        (ShaderStages::GEOMETRY, glow::GEOMETRY_SHADER),
        (ShaderStages::FRAGMENT, glow::FRAGMENT_SHADER),
        (ShaderStages::COMPUTE, glow::COMPUTE_SHADER),
    ];
    TABLE
        .iter()
        .find(|(bit, _)| *bit == stage)
        .map(|&(_, ty)| ty)
}

/// Usage hint for `glBufferData`.
pub const fn buffer_usage_hint(memory: MemoryUsage) -> u32 {
    match memory {
        MemoryUsage::GpuOnly => glow::STATIC_DRAW,
        MemoryUsage::CpuOnly | MemoryUsage::CpuToGpu => glow::DYNAMIC_DRAW,
        MemoryUsage::GpuToCpu => glow::STREAM_READ,
    }
}

/// Layout of one vertex attribute as `glVertexAttribFormat` wants it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttributeFormat {
    pub size: i32,
    pub ty: u32,
    pub normalized: bool,
    /// Routed through `glVertexAttribIFormat`.
    pub integer: bool,
}

pub const fn attribute_format(format: Format) -> Option<AttributeFormat> {
    const fn attr(size: i32, ty: u32, normalized: bool, integer: bool) -> Option<AttributeFormat> {
        Some(AttributeFormat {
            size,
            ty,
            normalized,
            integer,
        })
    }
    match format {
        Format::R8Unorm => attr(1, glow::UNSIGNED_BYTE, true, false),
        Format::R8Snorm => attr(1, glow::BYTE, true, false),
        Format::R8Uint => attr(1, glow::UNSIGNED_BYTE, false, true),
        Format::R8G8Unorm => attr(2, glow::UNSIGNED_BYTE, true, false),
        Format::R8G8Snorm => attr(2, glow::BYTE, true, false),
        Format::R8G8B8A8Unorm | Format::R8G8B8A8Srgb => attr(4, glow::UNSIGNED_BYTE, true, false),
        Format::R8G8B8A8Snorm => attr(4, glow::BYTE, true, false),
        Format::R16Unorm => attr(1, glow::UNSIGNED_SHORT, true, false),
        Format::R16Sfloat => attr(1, glow::HALF_FLOAT, false, false),
        Format::R16G16Unorm => attr(2, glow::UNSIGNED_SHORT, true, false),
        Format::R16G16Sfloat => attr(2, glow::HALF_FLOAT, false, false),
        Format::R16G16B16A16Unorm => attr(4, glow::UNSIGNED_SHORT, true, false),
        Format::R16G16B16A16Snorm => attr(4, glow::SHORT, true, false),
        Format::R16G16B16A16Sfloat => attr(4, glow::HALF_FLOAT, false, false),
        Format::R32Uint => attr(1, glow::UNSIGNED_INT, false, true),
        Format::R32Sfloat => attr(1, glow::FLOAT, false, false),
        Format::R32G32Sfloat => attr(2, glow::FLOAT, false, false),
        Format::R32G32B32Sfloat => attr(3, glow::FLOAT, false, false),
        Format::R32G32B32A32Sfloat => attr(4, glow::FLOAT, false, false),
        _ => None,
    }
}

/// Buffers `glClear`-style clears touch at the start of a pass.
pub fn render_pass_clear_mask(desc: &RenderPassDesc) -> u32 {
    let mut mask = 0;
    if desc.color_attachments.iter().any(|a| a.should_clear) {
        mask |= glow::COLOR_BUFFER_BIT;
    }
    if let Some(depth) = desc.depth_attachment.filter(|d| d.should_clear) {
        mask |= glow::DEPTH_BUFFER_BIT;
        if depth.format.has_stencil() {
            mask |= glow::STENCIL_BUFFER_BIT;
        }
    }
    mask
}

/// `glMemoryBarrier` bits that make an incoherent image write visible to `dst`.
///
/// Attachment and transfer writes are ordered by GL itself, so only
/// image load/store writes need an explicit barrier.
pub const fn image_barrier_bits(src: Option<ImageAccess>, dst: ImageAccess) -> u32 {
    if !matches!(src, Some(ImageAccess::StorageWrite(_))) {
        return 0;
    }
    match dst {
        ImageAccess::SampledRead(_) | ImageAccess::DepthRead => glow::TEXTURE_FETCH_BARRIER_BIT,
        ImageAccess::StorageWrite(_) => glow::SHADER_IMAGE_ACCESS_BARRIER_BIT,
        ImageAccess::ColorAttachment | ImageAccess::DepthAttachment | ImageAccess::Present => {
            glow::FRAMEBUFFER_BARRIER_BIT
        }
        ImageAccess::TransferSrc | ImageAccess::TransferDst => glow::TEXTURE_UPDATE_BARRIER_BIT,
    }
}

/// `glMemoryBarrier` bits for a buffer dependency. Only shader storage writes need one.
pub const fn buffer_barrier_bits(src: Option<BufferAccess>, dst: BufferAccess) -> u32 {
    if !matches!(src, Some(BufferAccess::StorageWrite(_))) {
        return 0;
    }
    match dst {
        BufferAccess::UniformRead(_) => glow::UNIFORM_BARRIER_BIT,
        BufferAccess::StorageRead(_) | BufferAccess::StorageWrite(_) => {
            glow::SHADER_STORAGE_BARRIER_BIT
        }
        BufferAccess::VertexRead => glow::VERTEX_ATTRIB_ARRAY_BARRIER_BIT,
        BufferAccess::IndexRead => glow::ELEMENT_ARRAY_BARRIER_BIT,
        BufferAccess::IndirectRead => glow::COMMAND_BARRIER_BIT,
        BufferAccess::TransferSrc | BufferAccess::TransferDst => glow::BUFFER_UPDATE_BARRIER_BIT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_rhi::{AttachmentInfo, DepthAttachmentInfo, ImageCreateInfo, ImageUsage};

    #[test]
    fn every_format_has_a_texel_layout() {
        for format in Format::ALL {
            let layout = texel_layout(format);
            assert_eq!(
                matches!(layout, TexelLayout::Compressed { .. }),
                format.is_compressed(),
                "{format:?}"
            );
            assert_ne!(layout.internal_format(), 0);
        }
    }

    #[test]
    fn depth_formats_attach_by_stencil() {
        assert_eq!(depth_attachment_point(Format::D32Sfloat), glow::DEPTH_ATTACHMENT);
        assert_eq!(
            depth_attachment_point(Format::D24UnormS8Uint),
            glow::DEPTH_STENCIL_ATTACHMENT
        );
        assert_eq!(
            texel_layout(Format::D24UnormS8Uint).internal_format(),
            glow::DEPTH24_STENCIL8
        );
    }

    #[test]
    fn min_filter_combines_mip_filter() {
        use TextureFilter::{Linear, Nearest};
        assert_eq!(min_filter_to_gl(Linear, Nearest, true), glow::LINEAR_MIPMAP_NEAREST);
        assert_eq!(min_filter_to_gl(Nearest, Linear, true), glow::NEAREST_MIPMAP_LINEAR);
        assert_eq!(min_filter_to_gl(Linear, Linear, true), glow::LINEAR_MIPMAP_LINEAR);
        assert_eq!(min_filter_to_gl(Linear, Linear, false), glow::LINEAR);
    }

    #[test]
    fn targets_follow_image_shape() {
        let flat = ImageDesc::from_info(&ImageCreateInfo::new(
            "Flat",
            Format::R8G8B8A8Unorm,
            4,
            4,
            ImageUsage::SAMPLED,
        ))
        .unwrap();
        assert_eq!(texture_target(&flat), glow::TEXTURE_2D);

        let cube = ImageDesc::from_info(
            &ImageCreateInfo::new(
                "Sky",
                Format::R8G8B8A8Unorm,
                4,
                4,
                ImageUsage::SAMPLED | ImageUsage::CUBEMAP,
            )
            .with_array_layers(6),
        )
        .unwrap();
        assert_eq!(texture_target(&cube), glow::TEXTURE_CUBE_MAP);
        assert!(!is_layered_target(texture_target(&cube)));

        let layers = ImageDesc::from_info(
            &ImageCreateInfo::new("Layers", Format::R8Unorm, 4, 4, ImageUsage::SAMPLED)
                .with_array_layers(4),
        )
        .unwrap();
        assert_eq!(texture_target(&layers), glow::TEXTURE_2D_ARRAY);
        assert!(is_layered_target(texture_target(&layers)));
    }

    #[test]
    fn cull_none_disables_culling() {
        assert_eq!(cull_face_to_gl(CullMode::None), None);
        assert_eq!(cull_face_to_gl(CullMode::Both), Some(glow::FRONT_AND_BACK));
    }

    #[test]
    fn attributes_cover_vertex_formats() {
        let position = attribute_format(Format::R32G32B32Sfloat).unwrap();
        assert_eq!((position.size, position.ty, position.normalized), (3, glow::FLOAT, false));
        let color = attribute_format(Format::R8G8B8A8Unorm).unwrap();
        assert!(color.normalized);
        assert!(attribute_format(Format::R32Uint).unwrap().integer);
        assert!(attribute_format(Format::D32Sfloat).is_none());
        assert!(attribute_format(Format::Bc1RgbUnorm).is_none());
    }

    #[test]
    fn clear_mask_includes_stencil_only_with_stencil_formats() {
        let colors = [AttachmentInfo::loaded(Format::R8G8B8A8Unorm)];
        let mut desc = RenderPassDesc {
            debug_name: "Pass".into(),
            color_attachments: colors.to_vec(),
            depth_attachment: Some(DepthAttachmentInfo {
                format: Format::D24UnormS8Uint,
                should_clear: true,
                read_only: false,
            }),
            debug_color: [1.0; 4],
            presents: false,
        };
        assert_eq!(
            render_pass_clear_mask(&desc),
            glow::DEPTH_BUFFER_BIT | glow::STENCIL_BUFFER_BIT
        );
        desc.color_attachments[0].should_clear = true;
        desc.depth_attachment = None;
        assert_eq!(render_pass_clear_mask(&desc), glow::COLOR_BUFFER_BIT);
    }

    #[test]
    fn only_storage_writes_need_memory_barriers() {
        let fragment = ShaderStages::FRAGMENT;
        assert_eq!(
            image_barrier_bits(Some(ImageAccess::ColorAttachment), ImageAccess::SampledRead(fragment)),
            0
        );
        assert_eq!(
            image_barrier_bits(
                Some(ImageAccess::StorageWrite(ShaderStages::COMPUTE)),
                ImageAccess::SampledRead(fragment)
            ),
            glow::TEXTURE_FETCH_BARRIER_BIT
        );
        assert_eq!(image_barrier_bits(None, ImageAccess::SampledRead(fragment)), 0);
        assert_eq!(
            buffer_barrier_bits(
                Some(BufferAccess::StorageWrite(ShaderStages::COMPUTE)),
                BufferAccess::IndirectRead
            ),
            glow::COMMAND_BARRIER_BIT
        );
        assert_eq!(
            buffer_barrier_bits(Some(BufferAccess::TransferDst), BufferAccess::VertexRead),
            0
        );
    }

    #[test]
    fn single_stages_map_to_shader_types() {
        assert_eq!(shader_stage_to_gl(ShaderStages::COMPUTE), Some(glow::COMPUTE_SHADER));
        assert_eq!(shader_stage_to_gl(ShaderStages::ALL_GRAPHICS), None);
    }
}

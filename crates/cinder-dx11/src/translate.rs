//! DXGI and D3D11 equivalents of RHI enums.

use cinder_rhi::{
    BlendFactor, BlendOperation, BufferUsage, CompareOperation, CullMode, Format, ImageUsage,
    IndexType, MemoryUsage, PolygonMode, PrimitiveTopology, TextureFilter, TextureWrapMode,
};
use windows::Win32::Graphics::Direct3D::{
    D3D_PRIMITIVE_TOPOLOGY, D3D_PRIMITIVE_TOPOLOGY_3_CONTROL_POINT_PATCHLIST,
    D3D_PRIMITIVE_TOPOLOGY_LINELIST, D3D_PRIMITIVE_TOPOLOGY_LINESTRIP,
    D3D_PRIMITIVE_TOPOLOGY_POINTLIST, D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
    D3D_PRIMITIVE_TOPOLOGY_TRIANGLESTRIP,
};
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BIND_CONSTANT_BUFFER, D3D11_BIND_DEPTH_STENCIL, D3D11_BIND_FLAG,
    D3D11_BIND_INDEX_BUFFER, D3D11_BIND_RENDER_TARGET, D3D11_BIND_SHADER_RESOURCE,
    D3D11_BIND_UNORDERED_ACCESS, D3D11_BIND_VERTEX_BUFFER, D3D11_BLEND, D3D11_BLEND_BLEND_FACTOR,
    D3D11_BLEND_DEST_ALPHA, D3D11_BLEND_DEST_COLOR, D3D11_BLEND_INV_BLEND_FACTOR,
    D3D11_BLEND_INV_DEST_ALPHA, D3D11_BLEND_INV_DEST_COLOR, D3D11_BLEND_INV_SRC_ALPHA,
    D3D11_BLEND_INV_SRC_COLOR, D3D11_BLEND_ONE, D3D11_BLEND_OP, D3D11_BLEND_OP_ADD,
    D3D11_BLEND_OP_MAX, D3D11_BLEND_OP_MIN, D3D11_BLEND_OP_REV_SUBTRACT,
    D3D11_BLEND_OP_SUBTRACT, D3D11_BLEND_SRC_ALPHA, D3D11_BLEND_SRC_ALPHA_SAT,
    D3D11_BLEND_SRC_COLOR, D3D11_BLEND_ZERO, D3D11_COMPARISON_ALWAYS, D3D11_COMPARISON_EQUAL,
    D3D11_COMPARISON_FUNC, D3D11_COMPARISON_GREATER, D3D11_COMPARISON_GREATER_EQUAL,
    D3D11_COMPARISON_LESS, D3D11_COMPARISON_LESS_EQUAL, D3D11_COMPARISON_NEVER,
    D3D11_COMPARISON_NOT_EQUAL, D3D11_CPU_ACCESS_FLAG, D3D11_CPU_ACCESS_WRITE, D3D11_CULL_BACK,
    D3D11_CULL_FRONT, D3D11_CULL_MODE, D3D11_CULL_NONE,
    D3D11_FILL_MODE, D3D11_FILL_SOLID, D3D11_FILL_WIREFRAME, D3D11_FILTER,
    D3D11_FILTER_ANISOTROPIC, D3D11_TEXTURE_ADDRESS_BORDER, D3D11_TEXTURE_ADDRESS_CLAMP,
    D3D11_TEXTURE_ADDRESS_MIRROR, D3D11_TEXTURE_ADDRESS_MIRROR_ONCE, D3D11_TEXTURE_ADDRESS_MODE,
    D3D11_TEXTURE_ADDRESS_WRAP, D3D11_USAGE, D3D11_USAGE_DEFAULT, D3D11_USAGE_DYNAMIC,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT, DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_B8G8R8A8_UNORM_SRGB,
    DXGI_FORMAT_BC1_UNORM, DXGI_FORMAT_BC2_UNORM, DXGI_FORMAT_BC3_UNORM, DXGI_FORMAT_BC4_UNORM,
    DXGI_FORMAT_BC5_UNORM, DXGI_FORMAT_BC6H_UF16, DXGI_FORMAT_BC7_UNORM,
    DXGI_FORMAT_D16_UNORM, DXGI_FORMAT_D24_UNORM_S8_UINT, DXGI_FORMAT_D32_FLOAT,
    DXGI_FORMAT_D32_FLOAT_S8X24_UINT, DXGI_FORMAT_R16G16B16A16_FLOAT,
    DXGI_FORMAT_R16G16B16A16_SNORM, DXGI_FORMAT_R16G16B16A16_UNORM, DXGI_FORMAT_R16G16_FLOAT,
    DXGI_FORMAT_R16G16_UNORM, DXGI_FORMAT_R16_FLOAT, DXGI_FORMAT_R16_TYPELESS,
    DXGI_FORMAT_R16_UINT, DXGI_FORMAT_R16_UNORM, DXGI_FORMAT_R24G8_TYPELESS,
    DXGI_FORMAT_R24_UNORM_X8_TYPELESS, DXGI_FORMAT_R32G32B32A32_FLOAT,
    DXGI_FORMAT_R32G32B32_FLOAT, DXGI_FORMAT_R32G32_FLOAT, DXGI_FORMAT_R32G8X24_TYPELESS,
    DXGI_FORMAT_R32_FLOAT, DXGI_FORMAT_R32_FLOAT_X8X24_TYPELESS, DXGI_FORMAT_R32_TYPELESS,
    DXGI_FORMAT_R32_UINT, DXGI_FORMAT_R8G8B8A8_SNORM, DXGI_FORMAT_R8G8B8A8_UNORM,
    DXGI_FORMAT_R8G8B8A8_UNORM_SRGB, DXGI_FORMAT_R8G8_SNORM, DXGI_FORMAT_R8G8_UNORM,
    DXGI_FORMAT_R8_SNORM, DXGI_FORMAT_R8_UINT, DXGI_FORMAT_R8_UNORM,
};

use crate::error::{Dx11Error, Result};

pub const fn format_to_dxgi(format: Format) -> DXGI_FORMAT {
    match format {
        Format::R8Unorm => DXGI_FORMAT_R8_UNORM,
        Format::R8Snorm => DXGI_FORMAT_R8_SNORM,
        Format::R8Uint => DXGI_FORMAT_R8_UINT,
        Format::R8G8Unorm => DXGI_FORMAT_R8G8_UNORM,
        Format::R8G8Snorm => DXGI_FORMAT_R8G8_SNORM,
        Format::R8G8B8A8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        Format::R8G8B8A8Snorm => DXGI_FORMAT_R8G8B8A8_SNORM,
        Format::R8G8B8A8Srgb => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        Format::B8G8R8A8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        Format::B8G8R8A8Srgb => DXGI_FORMAT_B8G8R8A8_UNORM_SRGB,
        Format::R16Unorm => DXGI_FORMAT_R16_UNORM,
        Format::R16Sfloat => DXGI_FORMAT_R16_FLOAT,
        Format::R16G16Unorm => DXGI_FORMAT_R16G16_UNORM,
        Format::R16G16Sfloat => DXGI_FORMAT_R16G16_FLOAT,
        Format::R16G16B16A16Unorm => DXGI_FORMAT_R16G16B16A16_UNORM,
        Format::R16G16B16A16Snorm => DXGI_FORMAT_R16G16B16A16_SNORM,
        Format::R16G16B16A16Sfloat => DXGI_FORMAT_R16G16B16A16_FLOAT,
        Format::R32Uint => DXGI_FORMAT_R32_UINT,
        Format::R32Sfloat => DXGI_FORMAT_R32_FLOAT,
        Format::R32G32Sfloat => DXGI_FORMAT_R32G32_FLOAT,
        Format::R32G32B32Sfloat => DXGI_FORMAT_R32G32B32_FLOAT,
        Format::R32G32B32A32Sfloat => DXGI_FORMAT_R32G32B32A32_FLOAT,
        Format::D16Unorm => DXGI_FORMAT_D16_UNORM,
        Format::D24UnormS8Uint => DXGI_FORMAT_D24_UNORM_S8_UINT,
        Format::D32Sfloat => DXGI_FORMAT_D32_FLOAT,
        Format::D32SfloatS8Uint => DXGI_FORMAT_D32_FLOAT_S8X24_UINT,
        Format::Bc1RgbUnorm | Format::Bc1RgbaUnorm => DXGI_FORMAT_BC1_UNORM,
        Format::Bc2Unorm => DXGI_FORMAT_BC2_UNORM,
        Format::Bc3Unorm => DXGI_FORMAT_BC3_UNORM,
        Format::Bc4Unorm => DXGI_FORMAT_BC4_UNORM,
        Format::Bc5Unorm => DXGI_FORMAT_BC5_UNORM,
        Format::Bc6hUfloat => DXGI_FORMAT_BC6H_UF16,
        Format::Bc7Unorm => DXGI_FORMAT_BC7_UNORM,
    }
}

/// Formats for a texture and each kind of view onto it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureFormats {
    pub resource: DXGI_FORMAT,
    pub shader_resource: DXGI_FORMAT,
    pub target: DXGI_FORMAT,
}

/// Sampled depth textures need a typeless resource so that a depth view and
/// a color view can both be created on it.
pub const fn texture_formats(format: Format, usage: ImageUsage) -> TextureFormats {
    let plain = format_to_dxgi(format);
    if !format.is_depth() || !usage.contains(ImageUsage::SAMPLED) {
        return TextureFormats {
            resource: plain,
            shader_resource: plain,
            target: plain,
        };
    }
    let (resource, shader_resource) = match format {
        Format::D16Unorm => (DXGI_FORMAT_R16_TYPELESS, DXGI_FORMAT_R16_UNORM),
        Format::D24UnormS8Uint => (DXGI_FORMAT_R24G8_TYPELESS, DXGI_FORMAT_R24_UNORM_X8_TYPELESS),
        Format::D32Sfloat => (DXGI_FORMAT_R32_TYPELESS, DXGI_FORMAT_R32_FLOAT),
        _ => (DXGI_FORMAT_R32G8X24_TYPELESS, DXGI_FORMAT_R32_FLOAT_X8X24_TYPELESS),
    };
    TextureFormats {
        resource,
        shader_resource,
        target: plain,
    }
}

pub fn image_bind_flags(usage: ImageUsage, generate_mipmaps: bool) -> D3D11_BIND_FLAG {
    let mut flags = 0;
    if usage.contains(ImageUsage::SAMPLED) || generate_mipmaps {
        flags |= D3D11_BIND_SHADER_RESOURCE.0;
    }
    // Mip generation renders into every level.
    if usage.contains(ImageUsage::RENDER_TARGET) || generate_mipmaps {
        flags |= D3D11_BIND_RENDER_TARGET.0;
    }
    if usage.contains(ImageUsage::DEPTH_STENCIL) {
        flags |= D3D11_BIND_DEPTH_STENCIL.0;
    }
    if usage.contains(ImageUsage::STORAGE) {
        flags |= D3D11_BIND_UNORDERED_ACCESS.0;
    }
    D3D11_BIND_FLAG(flags)
}

/// Uniform buffers may carry no other bind flag.
pub fn buffer_bind_flags(usage: BufferUsage) -> D3D11_BIND_FLAG {
    if usage.contains(BufferUsage::UNIFORM) {
        return D3D11_BIND_CONSTANT_BUFFER;
    }
    let mut flags = 0;
    if usage.contains(BufferUsage::VERTEX) {
        flags |= D3D11_BIND_VERTEX_BUFFER.0;
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= D3D11_BIND_INDEX_BUFFER.0;
    }
    if usage.contains(BufferUsage::STORAGE) {
        flags |= D3D11_BIND_UNORDERED_ACCESS.0;
    }
    D3D11_BIND_FLAG(flags)
}

/// Whether a buffer is written from the CPU with `WRITE_DISCARD` maps.
///
/// Dynamic resources need a bind flag and cannot be bound for unordered
/// access or be copied into.
pub fn is_dynamic_buffer(usage: BufferUsage, memory: MemoryUsage) -> bool {
    memory.is_host_coherent()
        && usage.intersects(BufferUsage::VERTEX | BufferUsage::INDEX | BufferUsage::UNIFORM)
        && !usage.intersects(BufferUsage::STORAGE | BufferUsage::TRANSFER_DST)
}

pub fn buffer_usage(dynamic: bool) -> (D3D11_USAGE, D3D11_CPU_ACCESS_FLAG) {
    if dynamic {
        (D3D11_USAGE_DYNAMIC, D3D11_CPU_ACCESS_WRITE)
    } else {
        (D3D11_USAGE_DEFAULT, D3D11_CPU_ACCESS_FLAG(0))
    }
}

/// `D3D11_FILTER` packs min, mag and mip linearity into bits 4, 2 and 0.
pub const fn filter_code(min: TextureFilter, mag: TextureFilter, mip: TextureFilter) -> i32 {
    (linear_bit(min) << 4) | (linear_bit(mag) << 2) | linear_bit(mip)
}

const fn linear_bit(filter: TextureFilter) -> i32 {
    matches!(filter, TextureFilter::Linear) as i32
}

pub fn sampler_filter(
    min: TextureFilter,
    mag: TextureFilter,
    mip: TextureFilter,
    anisotropic: bool,
) -> D3D11_FILTER {
    if anisotropic {
        D3D11_FILTER_ANISOTROPIC
    } else {
        D3D11_FILTER(filter_code(min, mag, mip))
    }
}

pub const fn address_mode(wrap: TextureWrapMode) -> D3D11_TEXTURE_ADDRESS_MODE {
    match wrap {
        TextureWrapMode::Repeat => D3D11_TEXTURE_ADDRESS_WRAP,
        TextureWrapMode::ClampToEdge => D3D11_TEXTURE_ADDRESS_CLAMP,
        TextureWrapMode::ClampToBorder => D3D11_TEXTURE_ADDRESS_BORDER,
        TextureWrapMode::MirroredRepeat => D3D11_TEXTURE_ADDRESS_MIRROR,
        TextureWrapMode::MirrorClampToEdge => D3D11_TEXTURE_ADDRESS_MIRROR_ONCE,
    }
}

pub fn cull_mode(cull: CullMode) -> Result<D3D11_CULL_MODE> {
    match cull {
        CullMode::None => Ok(D3D11_CULL_NONE),
        CullMode::Front => Ok(D3D11_CULL_FRONT),
        CullMode::Back => Ok(D3D11_CULL_BACK),
        CullMode::Both => Err(Dx11Error::Unsupported("culling both faces".into())),
    }
}

pub fn fill_mode(mode: PolygonMode) -> Result<D3D11_FILL_MODE> {
    match mode {
        PolygonMode::Fill => Ok(D3D11_FILL_SOLID),
        PolygonMode::Line => Ok(D3D11_FILL_WIREFRAME),
        PolygonMode::Point => Err(Dx11Error::Unsupported("point fill mode".into())),
    }
}

pub fn topology(topology: PrimitiveTopology) -> Result<D3D_PRIMITIVE_TOPOLOGY> {
    match topology {
        PrimitiveTopology::PointList => Ok(D3D_PRIMITIVE_TOPOLOGY_POINTLIST),
        PrimitiveTopology::LineList => Ok(D3D_PRIMITIVE_TOPOLOGY_LINELIST),
        PrimitiveTopology::LineStrip => Ok(D3D_PRIMITIVE_TOPOLOGY_LINESTRIP),
        PrimitiveTopology::TriangleList => Ok(D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST),
        PrimitiveTopology::TriangleStrip => Ok(D3D_PRIMITIVE_TOPOLOGY_TRIANGLESTRIP),
        PrimitiveTopology::PatchList => Ok(D3D_PRIMITIVE_TOPOLOGY_3_CONTROL_POINT_PATCHLIST),
        PrimitiveTopology::TriangleFan => Err(Dx11Error::Unsupported("triangle fans".into())),
    }
}

/// D3D11 has a single blend constant, so color and alpha constants share it.
pub const fn blend_factor(factor: BlendFactor) -> D3D11_BLEND {
    match factor {
        BlendFactor::Zero => D3D11_BLEND_ZERO,
        BlendFactor::One => D3D11_BLEND_ONE,
        BlendFactor::SrcColor => D3D11_BLEND_SRC_COLOR,
        BlendFactor::OneMinusSrcColor => D3D11_BLEND_INV_SRC_COLOR,
        BlendFactor::DstColor => D3D11_BLEND_DEST_COLOR,
        BlendFactor::OneMinusDstColor => D3D11_BLEND_INV_DEST_COLOR,
        BlendFactor::SrcAlpha => D3D11_BLEND_SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => D3D11_BLEND_INV_SRC_ALPHA,
        BlendFactor::DstAlpha => D3D11_BLEND_DEST_ALPHA,
        BlendFactor::OneMinusDstAlpha => D3D11_BLEND_INV_DEST_ALPHA,
        BlendFactor::ConstantColor | BlendFactor::ConstantAlpha => D3D11_BLEND_BLEND_FACTOR,
        BlendFactor::OneMinusConstantColor | BlendFactor::OneMinusConstantAlpha => {
            D3D11_BLEND_INV_BLEND_FACTOR
        }
        BlendFactor::SrcAlphaSaturate => D3D11_BLEND_SRC_ALPHA_SAT,
    }
}

pub const fn blend_op(op: BlendOperation) -> D3D11_BLEND_OP {
    match op {
        BlendOperation::Add => D3D11_BLEND_OP_ADD,
        BlendOperation::Subtract => D3D11_BLEND_OP_SUBTRACT,
        BlendOperation::ReverseSubtract => D3D11_BLEND_OP_REV_SUBTRACT,
        BlendOperation::Min => D3D11_BLEND_OP_MIN,
        BlendOperation::Max => D3D11_BLEND_OP_MAX,
    }
}

pub const fn comparison(op: CompareOperation) -> D3D11_COMPARISON_FUNC {
    match op {
        CompareOperation::Never => D3D11_COMPARISON_NEVER,
        CompareOperation::Less => D3D11_COMPARISON_LESS,
        CompareOperation::Equal => D3D11_COMPARISON_EQUAL,
        CompareOperation::LessOrEqual => D3D11_COMPARISON_LESS_EQUAL,
        CompareOperation::Greater => D3D11_COMPARISON_GREATER,
        CompareOperation::NotEqual => D3D11_COMPARISON_NOT_EQUAL,
        CompareOperation::GreaterOrEqual => D3D11_COMPARISON_GREATER_EQUAL,
        CompareOperation::Always => D3D11_COMPARISON_ALWAYS,
    }
}

pub const fn index_format(index_type: IndexType) -> DXGI_FORMAT {
    match index_type {
        IndexType::Uint16 => DXGI_FORMAT_R16_UINT,
        IndexType::Uint32 => DXGI_FORMAT_R32_UINT,
    }
}

#[cfg(test)]
mod tests {
    use windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT_UNKNOWN;

    use super::*;

    #[test]
    fn every_format_has_a_dxgi_equivalent() {
        for format in Format::ALL {
            assert_ne!(format_to_dxgi(format), DXGI_FORMAT_UNKNOWN, "{format:?}");
        }
    }

    #[test]
    fn sampled_depth_is_typeless() {
        let sampled = texture_formats(Format::D32Sfloat, ImageUsage::DEPTH_STENCIL | ImageUsage::SAMPLED);
        assert_eq!(sampled.resource, DXGI_FORMAT_R32_TYPELESS);
        assert_eq!(sampled.shader_resource, DXGI_FORMAT_R32_FLOAT);
        assert_eq!(sampled.target, DXGI_FORMAT_D32_FLOAT);

        let attachment = texture_formats(Format::D32Sfloat, ImageUsage::DEPTH_STENCIL);
        assert_eq!(attachment.resource, DXGI_FORMAT_D32_FLOAT);
    }

    #[test]
    fn filter_codes_match_the_headers() {
        use TextureFilter::{Linear, Nearest};
        assert_eq!(filter_code(Nearest, Nearest, Nearest), 0x00);
        assert_eq!(filter_code(Nearest, Nearest, Linear), 0x01);
        assert_eq!(filter_code(Linear, Linear, Nearest), 0x14);
        assert_eq!(filter_code(Linear, Linear, Linear), 0x15);
        assert_eq!(sampler_filter(Nearest, Nearest, Nearest, true), D3D11_FILTER_ANISOTROPIC);
    }

    #[test]
    fn uniform_buffers_bind_alone() {
        let flags = buffer_bind_flags(BufferUsage::UNIFORM | BufferUsage::TRANSFER_DST);
        assert_eq!(flags, D3D11_BIND_CONSTANT_BUFFER);
        assert!(!is_dynamic_buffer(BufferUsage::STORAGE, MemoryUsage::CpuToGpu));
        assert!(is_dynamic_buffer(BufferUsage::UNIFORM, MemoryUsage::CpuToGpu));
        assert!(!is_dynamic_buffer(BufferUsage::UNIFORM, MemoryUsage::GpuOnly));
        assert!(!is_dynamic_buffer(BufferUsage::TRANSFER_SRC, MemoryUsage::CpuOnly));
    }

    #[test]
    fn fans_and_double_culling_are_rejected() {
        assert!(topology(PrimitiveTopology::TriangleFan).is_err());
        assert!(cull_mode(CullMode::Both).is_err());
        assert_eq!(cull_mode(CullMode::Back).unwrap(), D3D11_CULL_BACK);
    }
}

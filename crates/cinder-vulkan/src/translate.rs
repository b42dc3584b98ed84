//! Translation between RHI enums and their Vulkan counterparts.

use ash::vk;
use cinder_rhi::{
    BindingKind, BlendFactor, BlendOperation, BufferAccess, BufferUsage, ColorMask, CompareOperation,
    CullMode, Format, FrontFace, ImageAccess, ImageUsage, IndexType, MemoryUsage, PolygonMode,
    PrimitiveTopology, ShaderStages, TextureFilter, TextureWrapMode, VertexInputRate,
};
use gpu_allocator::MemoryLocation;
use tracing::warn;

pub const fn format_to_vk(format: Format) -> vk::Format {
    match format {
        Format::R8Unorm => vk::Format::R8_UNORM,
        Format::R8Snorm => vk::Format::R8_SNORM,
        Format::R8Uint => vk::Format::R8_UINT,
        Format::R8G8Unorm => vk::Format::R8G8_UNORM,
        Format::R8G8Snorm => vk::Format::R8G8_SNORM,
        Format::R8G8B8A8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::R8G8B8A8Snorm => vk::Format::R8G8B8A8_SNORM,
        Format::R8G8B8A8Srgb => vk::Format::R8G8B8A8_SRGB,
        Format::B8G8R8A8Unorm => vk::Format::B8G8R8A8_UNORM,
        Format::B8G8R8A8Srgb => vk::Format::B8G8R8A8_SRGB,
        Format::R16Unorm => vk::Format::R16_UNORM,
        Format::R16Sfloat => vk::Format::R16_SFLOAT,
        Format::R16G16Unorm => vk::Format::R16G16_UNORM,
        Format::R16G16Sfloat => vk::Format::R16G16_SFLOAT,
        Format::R16G16B16A16Unorm => vk::Format::R16G16B16A16_UNORM,
        Format::R16G16B16A16Snorm => vk::Format::R16G16B16A16_SNORM,
        Format::R16G16B16A16Sfloat => vk::Format::R16G16B16A16_SFLOAT,
        Format::R32Uint => vk::Format::R32_UINT,
        Format::R32Sfloat => vk::Format::R32_SFLOAT,
        Format::R32G32Sfloat => vk::Format::R32G32_SFLOAT,
        Format::R32G32B32Sfloat => vk::Format::R32G32B32_SFLOAT,
        Format::R32G32B32A32Sfloat => vk::Format::R32G32B32A32_SFLOAT,
        Format::D16Unorm => vk::Format::D16_UNORM,
        Format::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
        Format::D32Sfloat => vk::Format::D32_SFLOAT,
        Format::D32SfloatS8Uint => vk::Format::D32_SFLOAT_S8_UINT,
        Format::Bc1RgbUnorm => vk::Format::BC1_RGB_UNORM_BLOCK,
        Format::Bc1RgbaUnorm => vk::Format::BC1_RGBA_UNORM_BLOCK,
        Format::Bc2Unorm => vk::Format::BC2_UNORM_BLOCK,
        Format::Bc3Unorm => vk::Format::BC3_UNORM_BLOCK,
        Format::Bc4Unorm => vk::Format::BC4_UNORM_BLOCK,
        Format::Bc5Unorm => vk::Format::BC5_UNORM_BLOCK,
        Format::Bc6hUfloat => vk::Format::BC6H_UFLOAT_BLOCK,
        Format::Bc7Unorm => vk::Format::BC7_UNORM_BLOCK,
    }
}

/// The RHI format for a native one, if the engine knows it.
pub fn format_from_vk(format: vk::Format) -> Option<Format> {
    Format::ALL.into_iter().find(|f| format_to_vk(*f) == format)
}

/// Depth formats fall back to D24S8 when the native value is unknown.
pub fn depth_format_from_vk(format: vk::Format) -> Format {
    match format_from_vk(format) {
        Some(depth) if depth.is_depth() => depth,
        _ => {
            warn!("Unknown depth format {format:?}, assuming D24_UNORM_S8_UINT");
            Format::D24UnormS8Uint
        }
    }
}

pub const fn aspect_mask(format: Format) -> vk::ImageAspectFlags {
    if format.has_stencil() {
        vk::ImageAspectFlags::from_raw(
            vk::ImageAspectFlags::DEPTH.as_raw() | vk::ImageAspectFlags::STENCIL.as_raw(),
        )
    } else if format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Aspect a view samples through. Stencil is never sampled.
pub const fn view_aspect_mask(format: Format) -> vk::ImageAspectFlags {
    if format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

pub fn image_usage_to_vk(usage: ImageUsage) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::empty();
    if usage.contains(ImageUsage::SAMPLED) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(ImageUsage::RENDER_TARGET) {
        flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(ImageUsage::DEPTH_STENCIL) {
        flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    if usage.contains(ImageUsage::STORAGE) {
        flags |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.intersects(ImageUsage::TRANSFER_SRC | ImageUsage::GENERATE_MIPMAPS) {
        flags |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.intersects(ImageUsage::TRANSFER_DST | ImageUsage::GENERATE_MIPMAPS) {
        flags |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    flags
}

pub fn buffer_usage_to_vk(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsage::VERTEX) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::STORAGE) {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::INDIRECT) {
        flags |= vk::BufferUsageFlags::INDIRECT_BUFFER;
    }
    if usage.contains(BufferUsage::TRANSFER_SRC) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::TRANSFER_DST) {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    flags
}

pub const fn memory_location(memory: MemoryUsage) -> MemoryLocation {
    match memory {
        MemoryUsage::GpuOnly => MemoryLocation::GpuOnly,
        MemoryUsage::CpuOnly | MemoryUsage::CpuToGpu => MemoryLocation::CpuToGpu,
        MemoryUsage::GpuToCpu => MemoryLocation::GpuToCpu,
    }
}

pub const fn filter_to_vk(filter: TextureFilter) -> vk::Filter {
    match filter {
        TextureFilter::Nearest => vk::Filter::NEAREST,
        TextureFilter::Linear => vk::Filter::LINEAR,
    }
}

pub const fn mipmap_mode_to_vk(filter: TextureFilter) -> vk::SamplerMipmapMode {
    match filter {
        TextureFilter::Nearest => vk::SamplerMipmapMode::NEAREST,
        TextureFilter::Linear => vk::SamplerMipmapMode::LINEAR,
    }
}

pub const fn wrap_to_vk(wrap: TextureWrapMode) -> vk::SamplerAddressMode {
    match wrap {
        TextureWrapMode::Repeat => vk::SamplerAddressMode::REPEAT,
        TextureWrapMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        TextureWrapMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
        TextureWrapMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        TextureWrapMode::MirrorClampToEdge => vk::SamplerAddressMode::MIRROR_CLAMP_TO_EDGE,
    }
}

pub const fn compare_to_vk(op: CompareOperation) -> vk::CompareOp {
    match op {
        CompareOperation::Never => vk::CompareOp::NEVER,
        CompareOperation::Less => vk::CompareOp::LESS,
        CompareOperation::Equal => vk::CompareOp::EQUAL,
        CompareOperation::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareOperation::Greater => vk::CompareOp::GREATER,
        CompareOperation::NotEqual => vk::CompareOp::NOT_EQUAL,
        CompareOperation::GreaterOrEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareOperation::Always => vk::CompareOp::ALWAYS,
    }
}

pub const fn blend_factor_to_vk(factor: BlendFactor) -> vk::BlendFactor {
    match factor {
        BlendFactor::Zero => vk::BlendFactor::ZERO,
        BlendFactor::One => vk::BlendFactor::ONE,
        BlendFactor::SrcColor => vk::BlendFactor::SRC_COLOR,
        BlendFactor::OneMinusSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
        BlendFactor::DstColor => vk::BlendFactor::DST_COLOR,
        BlendFactor::OneMinusDstColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
        BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
        BlendFactor::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
        BlendFactor::ConstantColor => vk::BlendFactor::CONSTANT_COLOR,
        BlendFactor::OneMinusConstantColor => vk::BlendFactor::ONE_MINUS_CONSTANT_COLOR,
        BlendFactor::ConstantAlpha => vk::BlendFactor::CONSTANT_ALPHA,
        BlendFactor::OneMinusConstantAlpha => vk::BlendFactor::ONE_MINUS_CONSTANT_ALPHA,
        BlendFactor::SrcAlphaSaturate => vk::BlendFactor::SRC_ALPHA_SATURATE,
    }
}

pub const fn blend_op_to_vk(op: BlendOperation) -> vk::BlendOp {
    match op {
        BlendOperation::Add => vk::BlendOp::ADD,
        BlendOperation::Subtract => vk::BlendOp::SUBTRACT,
        BlendOperation::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
        BlendOperation::Min => vk::BlendOp::MIN,
        BlendOperation::Max => vk::BlendOp::MAX,
    }
}

pub fn color_mask_to_vk(mask: ColorMask) -> vk::ColorComponentFlags {
    let mut flags = vk::ColorComponentFlags::empty();
    if mask.contains(ColorMask::RED) {
        flags |= vk::ColorComponentFlags::R;
    }
    if mask.contains(ColorMask::GREEN) {
        flags |= vk::ColorComponentFlags::G;
    }
    if mask.contains(ColorMask::BLUE) {
        flags |= vk::ColorComponentFlags::B;
    }
    if mask.contains(ColorMask::ALPHA) {
        flags |= vk::ColorComponentFlags::A;
    }
    flags
}

pub const fn cull_mode_to_vk(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
        CullMode::Both => vk::CullModeFlags::FRONT_AND_BACK,
    }
}

pub const fn polygon_mode_to_vk(mode: PolygonMode) -> vk::PolygonMode {
    match mode {
        PolygonMode::Fill => vk::PolygonMode::FILL,
        PolygonMode::Line => vk::PolygonMode::LINE,
        PolygonMode::Point => vk::PolygonMode::POINT,
    }
}

pub const fn front_face_to_vk(face: FrontFace) -> vk::FrontFace {
    match face {
        FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
        FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
    }
}

pub const fn topology_to_vk(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
        PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        PrimitiveTopology::TriangleFan => vk::PrimitiveTopology::TRIANGLE_FAN,
        PrimitiveTopology::PatchList => vk::PrimitiveTopology::PATCH_LIST,
    }
}

pub const fn index_type_to_vk(index_type: IndexType) -> vk::IndexType {
    match index_type {
        IndexType::Uint16 => vk::IndexType::UINT16,
        IndexType::Uint32 => vk::IndexType::UINT32,
    }
}

pub const fn input_rate_to_vk(rate: VertexInputRate) -> vk::VertexInputRate {
    match rate {
        VertexInputRate::Vertex => vk::VertexInputRate::VERTEX,
        VertexInputRate::Instance => vk::VertexInputRate::INSTANCE,
    }
}

pub fn shader_stages_to_vk(stages: ShaderStages) -> vk::ShaderStageFlags {
    let mut flags = vk::ShaderStageFlags::empty();
    if stages.contains(ShaderStages::VERTEX) {
        flags |= vk::ShaderStageFlags::VERTEX;
    }
    if stages.contains(ShaderStages::TESS_EVAL) {
        flags |= vk::ShaderStageFlags::TESSELLATION_EVALUATION;
    }
    if stages.contains(ShaderStages::TESS_CTRL) {
        flags |= vk::ShaderStageFlags::TESSELLATION_CONTROL;
    }
    if stages.contains(ShaderStages::GEOMETRY) {
        flags |= vk::ShaderStageFlags::GEOMETRY;
    }
    if stages.contains(ShaderStages::FRAGMENT) {
        flags |= vk::ShaderStageFlags::FRAGMENT;
    }
    if stages.contains(ShaderStages::COMPUTE) {
        flags |= vk::ShaderStageFlags::COMPUTE;
    }
    flags
}

/// Pipeline stages that run the given shader stages.
pub fn pipeline_stages(stages: ShaderStages) -> vk::PipelineStageFlags {
    let mut flags = vk::PipelineStageFlags::empty();
    if stages.contains(ShaderStages::VERTEX) {
        flags |= vk::PipelineStageFlags::VERTEX_SHADER;
    }
    if stages.contains(ShaderStages::TESS_EVAL) {
        flags |= vk::PipelineStageFlags::TESSELLATION_EVALUATION_SHADER;
    }
    if stages.contains(ShaderStages::TESS_CTRL) {
        flags |= vk::PipelineStageFlags::TESSELLATION_CONTROL_SHADER;
    }
    if stages.contains(ShaderStages::GEOMETRY) {
        flags |= vk::PipelineStageFlags::GEOMETRY_SHADER;
    }
    if stages.contains(ShaderStages::FRAGMENT) {
        flags |= vk::PipelineStageFlags::FRAGMENT_SHADER;
    }
    if stages.contains(ShaderStages::COMPUTE) {
        flags |= vk::PipelineStageFlags::COMPUTE_SHADER;
    }
    if flags.is_empty() {
        vk::PipelineStageFlags::ALL_COMMANDS
    } else {
        flags
    }
}

pub const fn descriptor_type(kind: BindingKind) -> vk::DescriptorType {
    match kind {
        BindingKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        BindingKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        BindingKind::Sampler => vk::DescriptorType::SAMPLER,
        BindingKind::SampledImage | BindingKind::DepthImage => vk::DescriptorType::SAMPLED_IMAGE,
        BindingKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
    }
}

/// Layout an image must be in when read through a descriptor of `kind`.
pub const fn descriptor_image_layout(kind: BindingKind, format: Format) -> vk::ImageLayout {
    match kind {
        BindingKind::StorageImage => vk::ImageLayout::GENERAL,
        BindingKind::DepthImage => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        _ if format.is_depth() => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        _ => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    }
}

/// Native layout, stages and access mask for an image access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageState {
    pub layout: vk::ImageLayout,
    pub stages: vk::PipelineStageFlags,
    pub access: vk::AccessFlags,
}

pub fn image_state(access: ImageAccess, format: Format) -> ImageState {
    match access {
        ImageAccess::SampledRead(stages) => ImageState {
            layout: if format.is_depth() {
                vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
            } else {
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            },
            stages: pipeline_stages(stages),
            access: vk::AccessFlags::SHADER_READ,
        },
        ImageAccess::StorageWrite(stages) => ImageState {
            layout: vk::ImageLayout::GENERAL,
            stages: pipeline_stages(stages),
            access: vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
        },
        ImageAccess::ColorAttachment => ImageState {
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            stages: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            access: vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        },
        ImageAccess::DepthAttachment => ImageState {
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            stages: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        },
        ImageAccess::DepthRead => ImageState {
            layout: vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            stages: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
                | vk::PipelineStageFlags::FRAGMENT_SHADER
                | vk::PipelineStageFlags::COMPUTE_SHADER,
            access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags::SHADER_READ,
        },
        ImageAccess::TransferSrc => ImageState {
            layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            stages: vk::PipelineStageFlags::TRANSFER,
            access: vk::AccessFlags::TRANSFER_READ,
        },
        ImageAccess::TransferDst => ImageState {
            layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            stages: vk::PipelineStageFlags::TRANSFER,
            access: vk::AccessFlags::TRANSFER_WRITE,
        },
        ImageAccess::Present => ImageState {
            layout: vk::ImageLayout::PRESENT_SRC_KHR,
            stages: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            access: vk::AccessFlags::empty(),
        },
    }
}

/// Stages and access mask for a buffer access.
pub fn buffer_state(access: BufferAccess) -> (vk::PipelineStageFlags, vk::AccessFlags) {
    match access {
        BufferAccess::UniformRead(stages) => (pipeline_stages(stages), vk::AccessFlags::UNIFORM_READ),
        BufferAccess::StorageRead(stages) => (pipeline_stages(stages), vk::AccessFlags::SHADER_READ),
        BufferAccess::StorageWrite(stages) => (
            pipeline_stages(stages),
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
        ),
        BufferAccess::VertexRead => (
            vk::PipelineStageFlags::VERTEX_INPUT,
            vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
        ),
        BufferAccess::IndexRead => (vk::PipelineStageFlags::VERTEX_INPUT, vk::AccessFlags::INDEX_READ),
        BufferAccess::IndirectRead => (
            vk::PipelineStageFlags::DRAW_INDIRECT,
            vk::AccessFlags::INDIRECT_COMMAND_READ,
        ),
        BufferAccess::TransferSrc => (vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_READ),
        BufferAccess::TransferDst => (vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_WRITE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_format_round_trips() {
        for format in Format::ALL {
            let native = format_to_vk(format);
            assert_ne!(native, vk::Format::UNDEFINED, "{format:?}");
            assert_eq!(format_from_vk(native), Some(format), "{format:?}");
        }
    }

    #[test]
    fn depth_round_trip_is_exact() {
        assert_eq!(
            depth_format_from_vk(format_to_vk(Format::D24UnormS8Uint)),
            Format::D24UnormS8Uint
        );
        assert_eq!(depth_format_from_vk(vk::Format::D32_SFLOAT), Format::D32Sfloat);
    }

    #[test]
    fn unknown_depth_falls_back_to_d24() {
        assert_eq!(depth_format_from_vk(vk::Format::S8_UINT), Format::D24UnormS8Uint);
        assert_eq!(depth_format_from_vk(vk::Format::R8_UNORM), Format::D24UnormS8Uint);
    }

    #[test]
    fn depth_images_sample_in_read_only_layout() {
        let state = image_state(ImageAccess::SampledRead(ShaderStages::FRAGMENT), Format::D32Sfloat);
        assert_eq!(state.layout, vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL);
        assert_eq!(
            descriptor_image_layout(BindingKind::DepthImage, Format::D32Sfloat),
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
        );
        assert_eq!(
            descriptor_image_layout(BindingKind::StorageImage, Format::R16G16B16A16Sfloat),
            vk::ImageLayout::GENERAL
        );
    }

    #[test]
    fn stage_sets_map_to_pipeline_stages() {
        let stages = pipeline_stages(ShaderStages::COMPUTE | ShaderStages::FRAGMENT);
        assert!(stages.contains(vk::PipelineStageFlags::COMPUTE_SHADER));
        assert!(stages.contains(vk::PipelineStageFlags::FRAGMENT_SHADER));
        assert_eq!(
            pipeline_stages(ShaderStages::empty()),
            vk::PipelineStageFlags::ALL_COMMANDS
        );
    }

    #[test]
    fn mip_generation_enables_both_transfer_directions() {
        let flags = image_usage_to_vk(ImageUsage::SAMPLED | ImageUsage::GENERATE_MIPMAPS);
        assert!(flags.contains(vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST));
    }
}

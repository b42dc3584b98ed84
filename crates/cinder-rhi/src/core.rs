//! The device-level trait every backend implements.

use glam::Mat4;

use crate::command::CommandBuffer;
use crate::descriptor::Binding;
use crate::error::Result;
use crate::handles::{
    BufferHandle, ComputePipelineHandle, DescriptorSetHandle, DescriptorSetLayoutHandle,
    FramebufferHandle, GraphicsPipelineHandle, ImageHandle, RenderPassHandle, SamplerHandle,
    VertexArrayHandle,
};
use crate::info::{
    BufferCreateInfo, ComputePipelineCreateInfo, DescriptorSetCreateInfo,
    DescriptorSetLayoutCreateInfo, FramebufferCreateInfo, GraphicsPipelineCreateInfo,
    ImageCreateInfo, RenderPassCreateInfo, SamplerCreateInfo, VertexArrayCreateInfo,
};
use crate::registry::ResourceRegistry;

/// Which native API a [`Core`] drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GraphicsApi {
    Vulkan,
    OpenGl,
    Direct3D11,
    Headless,
}

/// What the driver reports about the adapter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AdapterInfo {
    pub vendor: String,
    pub renderer: String,
    pub api_version: String,
}

/// Owner of a device and every resource created on it.
///
/// Resources are addressed by handles from [`crate::handles`]. The backend
/// is picked once, so consumers are generic over `C: Core` rather than
/// dispatching per call.
pub trait Core {
    fn api(&self) -> GraphicsApi;

    fn adapter_info(&self) -> &AdapterInfo;

    /// Backend-neutral descriptions of all live resources.
    fn resources(&self) -> &ResourceRegistry;

    /// Fix up a right-handed, GL-style projection for this API's clip space.
    fn adjust_perspective(&self, projection: &mut Mat4);

    fn create_buffer(&mut self, info: &BufferCreateInfo<'_>) -> Result<BufferHandle>;
    fn delete_buffer(&mut self, buffer: BufferHandle) -> Result<()>;
    /// Write `data` at `offset`. Non-coherent memory goes through staging.
    fn upload_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<()>;
    /// Map a host-visible buffer. The mapping stays valid until `unmap_buffer`.
    fn map_buffer(&mut self, buffer: BufferHandle) -> Result<&mut [u8]>;
    fn unmap_buffer(&mut self, buffer: BufferHandle) -> Result<()>;
    /// Reallocate with a new size. Contents are discarded.
    fn resize_buffer(&mut self, buffer: BufferHandle, size: u64) -> Result<()>;

    fn create_image(&mut self, info: &ImageCreateInfo<'_>) -> Result<ImageHandle>;
    fn delete_image(&mut self, image: ImageHandle) -> Result<()>;
    /// Replace every layer and mip of `image` with tightly packed `data`.
    fn upload_image(&mut self, image: ImageHandle, data: &[u8]) -> Result<()>;
    /// Reallocate at a new extent. Contents are discarded.
    fn resize_image(&mut self, image: ImageHandle, width: u32, height: u32) -> Result<()>;
    fn generate_mipmaps(&mut self, image: ImageHandle) -> Result<()>;

    fn create_sampler(&mut self, info: &SamplerCreateInfo<'_>) -> Result<SamplerHandle>;
    fn delete_sampler(&mut self, sampler: SamplerHandle) -> Result<()>;

    fn create_render_pass(&mut self, info: &RenderPassCreateInfo<'_>) -> Result<RenderPassHandle>;
    fn delete_render_pass(&mut self, render_pass: RenderPassHandle) -> Result<()>;

    fn create_framebuffer(&mut self, info: &FramebufferCreateInfo<'_>) -> Result<FramebufferHandle>;
    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) -> Result<()>;
    /// Rebuild after the attachments were resized.
    fn resize_framebuffer(&mut self, framebuffer: FramebufferHandle, width: u32, height: u32) -> Result<()>;

    fn create_descriptor_set_layout(
        &mut self,
        info: &DescriptorSetLayoutCreateInfo<'_>,
    ) -> Result<DescriptorSetLayoutHandle>;
    fn delete_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle) -> Result<()>;

    fn create_descriptor_set(&mut self, info: &DescriptorSetCreateInfo<'_>) -> Result<DescriptorSetHandle>;
    fn delete_descriptor_set(&mut self, set: DescriptorSetHandle) -> Result<()>;
    /// Overwrite the layout bindings starting at index `offset`.
    ///
    /// Kinds must match the layout exactly. `None` items are skipped and
    /// leave the previous resource in place.
    fn change_bindings(&mut self, set: DescriptorSetHandle, bindings: &[Binding], offset: usize) -> Result<()>;

    fn create_graphics_pipeline(
        &mut self,
        info: &GraphicsPipelineCreateInfo<'_>,
    ) -> Result<GraphicsPipelineHandle>;
    fn delete_graphics_pipeline(&mut self, pipeline: GraphicsPipelineHandle) -> Result<()>;

    fn create_compute_pipeline(
        &mut self,
        info: &ComputePipelineCreateInfo<'_>,
    ) -> Result<ComputePipelineHandle>;
    fn delete_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) -> Result<()>;

    fn create_vertex_array(&mut self, info: &VertexArrayCreateInfo<'_>) -> Result<VertexArrayHandle>;
    fn delete_vertex_array(&mut self, vertex_array: VertexArrayHandle) -> Result<()>;

    /// Submit `cmd` and block until the device is idle.
    fn execute_immediate(&mut self, cmd: &mut CommandBuffer) -> Result<()>;

    fn wait_until_idle(&mut self) -> Result<()>;

    /// Upload one plain-old-data value at offset 0.
    fn upload_pod<T: bytemuck::Pod>(&mut self, buffer: BufferHandle, value: &T) -> Result<()>
    where
        Self: Sized,
    {
        self.upload_buffer(buffer, 0, bytemuck::bytes_of(value))
    }
}

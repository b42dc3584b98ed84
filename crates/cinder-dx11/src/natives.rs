//! D3D11 objects keyed by the same handles as the resource registry.
//!
//! COM references release themselves on drop, so removing an entry is
//! enough to free the native object once the context lets go of it.

use cinder_rhi::handles::ResourceKind;
use cinder_rhi::{
    BufferHandle, ClearColor, ComputePipelineHandle, FramebufferHandle, GraphicsPipelineHandle,
    ImageHandle, RenderPassHandle, SamplerHandle,
};
use slotmap::{Key, SecondaryMap};
use windows::Win32::Graphics::Direct3D::D3D_PRIMITIVE_TOPOLOGY;
use windows::Win32::Graphics::Direct3D11::{
    ID3D11BlendState, ID3D11Buffer, ID3D11ComputeShader, ID3D11DepthStencilState,
    ID3D11DepthStencilView, ID3D11DomainShader, ID3D11GeometryShader, ID3D11HullShader,
    ID3D11InputLayout, ID3D11PixelShader, ID3D11RasterizerState, ID3D11RenderTargetView,
    ID3D11Resource, ID3D11SamplerState, ID3D11ShaderResourceView, ID3D11UnorderedAccessView,
    ID3D11VertexShader, D3D11_RASTERIZER_DESC,
};

use crate::error::{Dx11Error, Result};
use crate::registers::RegisterMap;

pub struct Dx11Buffer {
    pub buffer: ID3D11Buffer,
    pub uav: Option<ID3D11UnorderedAccessView>,
    /// CPU copy, padded to the native size. Backs `map_buffer`.
    pub shadow: Option<Vec<u8>>,
    pub dynamic: bool,
}

pub struct Dx11Image {
    pub resource: ID3D11Resource,
    pub srv: Option<ID3D11ShaderResourceView>,
    pub uav: Option<ID3D11UnorderedAccessView>,
    pub rtv: Option<ID3D11RenderTargetView>,
    pub dsv: Option<ID3D11DepthStencilView>,
    /// Lets the same depth be sampled while attached.
    pub dsv_read_only: Option<ID3D11DepthStencilView>,
}

/// Load operations of a render pass. D3D11 has no render pass object.
pub struct Dx11RenderPass {
    pub color_clears: Vec<bool>,
    pub depth_clear: bool,
    pub depth_read_only: bool,
    pub stencil: bool,
}

impl Dx11RenderPass {
    /// Clear colors for the attachments this pass clears, in attachment order.
    pub fn cleared_colors<'a>(
        &'a self,
        values: &'a [ClearColor],
    ) -> impl Iterator<Item = (usize, ClearColor)> + 'a {
        self.color_clears
            .iter()
            .zip(values)
            .enumerate()
            .filter(|(_, (clear, _))| **clear)
            .map(|(index, (_, value))| (index, *value))
    }
}

pub struct Dx11Framebuffer {
    pub rtvs: Vec<Option<ID3D11RenderTargetView>>,
    pub dsv: Option<ID3D11DepthStencilView>,
}

pub struct Dx11GraphicsPipeline {
    pub vertex: ID3D11VertexShader,
    pub hull: Option<ID3D11HullShader>,
    pub domain: Option<ID3D11DomainShader>,
    pub geometry: Option<ID3D11GeometryShader>,
    pub pixel: Option<ID3D11PixelShader>,
    pub input_layout: Option<ID3D11InputLayout>,
    pub rasterizer: ID3D11RasterizerState,
    /// Kept to derive depth-biased variants at replay.
    pub rasterizer_desc: D3D11_RASTERIZER_DESC,
    pub blend: ID3D11BlendState,
    pub depth_stencil: ID3D11DepthStencilState,
    pub topology: D3D_PRIMITIVE_TOPOLOGY,
    pub strides: Vec<u32>,
    pub registers: RegisterMap,
}

pub struct Dx11ComputePipeline {
    pub shader: ID3D11ComputeShader,
    pub registers: RegisterMap,
}

#[derive(Default)]
pub struct NativeObjects {
    pub buffers: SecondaryMap<BufferHandle, Dx11Buffer>,
    pub images: SecondaryMap<ImageHandle, Dx11Image>,
    pub samplers: SecondaryMap<SamplerHandle, ID3D11SamplerState>,
    pub render_passes: SecondaryMap<RenderPassHandle, Dx11RenderPass>,
    pub framebuffers: SecondaryMap<FramebufferHandle, Dx11Framebuffer>,
    pub graphics_pipelines: SecondaryMap<GraphicsPipelineHandle, Dx11GraphicsPipeline>,
    pub compute_pipelines: SecondaryMap<ComputePipelineHandle, Dx11ComputePipeline>,
}

impl NativeObjects {
    pub fn clear(&mut self) {
        self.framebuffers.clear();
        self.graphics_pipelines.clear();
        self.compute_pipelines.clear();
        self.samplers.clear();
        self.images.clear();
        self.buffers.clear();
        self.render_passes.clear();
    }
}

pub fn native<K: Key + ResourceKind, V>(map: &SecondaryMap<K, V>, handle: K) -> Result<&V> {
    map.get(handle).ok_or(Dx11Error::MissingNative(K::KIND))
}

pub fn native_mut<K: Key + ResourceKind, V>(map: &mut SecondaryMap<K, V>, handle: K) -> Result<&mut V> {
    map.get_mut(handle).ok_or(Dx11Error::MissingNative(K::KIND))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_cleared_attachments_get_clear_values() {
        let pass = Dx11RenderPass {
            color_clears: vec![false, true],
            depth_clear: true,
            depth_read_only: false,
            stencil: false,
        };
        let values = [ClearColor::BLACK, ClearColor([0.5; 4])];
        let cleared: Vec<_> = pass.cleared_colors(&values).collect();
        assert_eq!(cleared, vec![(1, ClearColor([0.5; 4]))]);
    }
}

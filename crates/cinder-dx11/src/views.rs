//! Whole-resource views of images.

use cinder_rhi::ImageDesc;
use windows::Win32::Graphics::Direct3D::{
    D3D11_SRV_DIMENSION_TEXTURE2D, D3D11_SRV_DIMENSION_TEXTURE2DARRAY, D3D11_SRV_DIMENSION_TEXTURE3D,
    D3D11_SRV_DIMENSION_TEXTURECUBE, D3D11_SRV_DIMENSION_TEXTURECUBEARRAY,
};
use windows::Win32::Graphics::Direct3D11::{
    ID3D11DepthStencilView, ID3D11Device, ID3D11RenderTargetView, ID3D11Resource,
    ID3D11ShaderResourceView, ID3D11UnorderedAccessView, D3D11_DEPTH_STENCIL_VIEW_DESC,
    D3D11_DEPTH_STENCIL_VIEW_DESC_0, D3D11_DSV_DIMENSION_TEXTURE2D,
    D3D11_DSV_DIMENSION_TEXTURE2DARRAY, D3D11_DSV_READ_ONLY_DEPTH, D3D11_DSV_READ_ONLY_STENCIL,
    D3D11_RENDER_TARGET_VIEW_DESC, D3D11_RENDER_TARGET_VIEW_DESC_0, D3D11_RTV_DIMENSION_TEXTURE2D,
    D3D11_RTV_DIMENSION_TEXTURE2DARRAY, D3D11_RTV_DIMENSION_TEXTURE3D,
    D3D11_SHADER_RESOURCE_VIEW_DESC, D3D11_SHADER_RESOURCE_VIEW_DESC_0, D3D11_TEX2D_ARRAY_DSV,
    D3D11_TEX2D_ARRAY_RTV, D3D11_TEX2D_ARRAY_SRV, D3D11_TEX2D_ARRAY_UAV, D3D11_TEX2D_DSV,
    D3D11_TEX2D_RTV, D3D11_TEX2D_SRV, D3D11_TEX2D_UAV, D3D11_TEX3D_RTV, D3D11_TEX3D_SRV,
    D3D11_TEX3D_UAV, D3D11_TEXCUBE_ARRAY_SRV, D3D11_TEXCUBE_SRV,
    D3D11_UAV_DIMENSION_TEXTURE2D, D3D11_UAV_DIMENSION_TEXTURE2DARRAY,
    D3D11_UAV_DIMENSION_TEXTURE3D, D3D11_UNORDERED_ACCESS_VIEW_DESC,
    D3D11_UNORDERED_ACCESS_VIEW_DESC_0,
};
use windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT;

use crate::error::{Dx11Error, Result};
use crate::subresource::ViewShape;

/// A view over every mip and layer, sampled as its natural shape.
pub fn shader_resource(
    device: &ID3D11Device,
    resource: &ID3D11Resource,
    desc: &ImageDesc,
    format: DXGI_FORMAT,
) -> Result<ID3D11ShaderResourceView> {
    let mips = desc.mip_levels;
    let (dimension, anonymous) = match ViewShape::of(desc) {
        ViewShape::Texture2D => (
            D3D11_SRV_DIMENSION_TEXTURE2D,
            D3D11_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2D: D3D11_TEX2D_SRV {
                    MostDetailedMip: 0,
                    MipLevels: mips,
                },
            },
        ),
        ViewShape::Texture2DArray => (
            D3D11_SRV_DIMENSION_TEXTURE2DARRAY,
            D3D11_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2DArray: D3D11_TEX2D_ARRAY_SRV {
                    MostDetailedMip: 0,
                    MipLevels: mips,
                    FirstArraySlice: 0,
                    ArraySize: desc.array_layers,
                },
            },
        ),
        ViewShape::Cube => (
            D3D11_SRV_DIMENSION_TEXTURECUBE,
            D3D11_SHADER_RESOURCE_VIEW_DESC_0 {
                TextureCube: D3D11_TEXCUBE_SRV {
                    MostDetailedMip: 0,
                    MipLevels: mips,
                },
            },
        ),
        ViewShape::CubeArray => (
            D3D11_SRV_DIMENSION_TEXTURECUBEARRAY,
            D3D11_SHADER_RESOURCE_VIEW_DESC_0 {
                TextureCubeArray: D3D11_TEXCUBE_ARRAY_SRV {
                    MostDetailedMip: 0,
                    MipLevels: mips,
                    First2DArrayFace: 0,
                    NumCubes: desc.array_layers / 6,
                },
            },
        ),
        ViewShape::Texture3D => (
            D3D11_SRV_DIMENSION_TEXTURE3D,
            D3D11_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture3D: D3D11_TEX3D_SRV {
                    MostDetailedMip: 0,
                    MipLevels: mips,
                },
            },
        ),
    };
    let view_desc = D3D11_SHADER_RESOURCE_VIEW_DESC {
        Format: format,
        ViewDimension: dimension,
        Anonymous: anonymous,
    };
    let mut view = None;
    // SAFETY: `view_desc` matches the resource's dimension and format family.
    unsafe { device.CreateShaderResourceView(resource, Some(&view_desc), Some(&mut view))? };
    view.ok_or(Dx11Error::NullObject("shader resource view"))
}

/// A writable view of mip 0. Cubes are written as a face array.
pub fn unordered_access(
    device: &ID3D11Device,
    resource: &ID3D11Resource,
    desc: &ImageDesc,
    format: DXGI_FORMAT,
) -> Result<ID3D11UnorderedAccessView> {
    let shape = ViewShape::of(desc);
    let (dimension, anonymous) = if shape == ViewShape::Texture3D {
        (
            D3D11_UAV_DIMENSION_TEXTURE3D,
            D3D11_UNORDERED_ACCESS_VIEW_DESC_0 {
                Texture3D: D3D11_TEX3D_UAV {
                    MipSlice: 0,
                    FirstWSlice: 0,
                    WSize: desc.depth,
                },
            },
        )
    } else if shape.is_layered() {
        (
            D3D11_UAV_DIMENSION_TEXTURE2DARRAY,
            D3D11_UNORDERED_ACCESS_VIEW_DESC_0 {
                Texture2DArray: D3D11_TEX2D_ARRAY_UAV {
                    MipSlice: 0,
                    FirstArraySlice: 0,
                    ArraySize: desc.array_layers,
                },
            },
        )
    } else {
        (
            D3D11_UAV_DIMENSION_TEXTURE2D,
            D3D11_UNORDERED_ACCESS_VIEW_DESC_0 {
                Texture2D: D3D11_TEX2D_UAV { MipSlice: 0 },
            },
        )
    };
    let view_desc = D3D11_UNORDERED_ACCESS_VIEW_DESC {
        Format: format,
        ViewDimension: dimension,
        Anonymous: anonymous,
    };
    let mut view = None;
    // SAFETY: as above.
    unsafe { device.CreateUnorderedAccessView(resource, Some(&view_desc), Some(&mut view))? };
    view.ok_or(Dx11Error::NullObject("unordered access view"))
}

/// A render target view of mip 0 covering every layer.
pub fn render_target(
    device: &ID3D11Device,
    resource: &ID3D11Resource,
    desc: &ImageDesc,
    format: DXGI_FORMAT,
) -> Result<ID3D11RenderTargetView> {
    let shape = ViewShape::of(desc);
    let (dimension, anonymous) = if shape == ViewShape::Texture3D {
        (
            D3D11_RTV_DIMENSION_TEXTURE3D,
            D3D11_RENDER_TARGET_VIEW_DESC_0 {
                Texture3D: D3D11_TEX3D_RTV {
                    MipSlice: 0,
                    FirstWSlice: 0,
                    WSize: desc.depth,
                },
            },
        )
    } else if shape.is_layered() {
        (
            D3D11_RTV_DIMENSION_TEXTURE2DARRAY,
            D3D11_RENDER_TARGET_VIEW_DESC_0 {
                Texture2DArray: D3D11_TEX2D_ARRAY_RTV {
                    MipSlice: 0,
                    FirstArraySlice: 0,
                    ArraySize: desc.array_layers,
                },
            },
        )
    } else {
        (
            D3D11_RTV_DIMENSION_TEXTURE2D,
            D3D11_RENDER_TARGET_VIEW_DESC_0 {
                Texture2D: D3D11_TEX2D_RTV { MipSlice: 0 },
            },
        )
    };
    let view_desc = D3D11_RENDER_TARGET_VIEW_DESC {
        Format: format,
        ViewDimension: dimension,
        Anonymous: anonymous,
    };
    let mut view = None;
    // SAFETY: as above.
    unsafe { device.CreateRenderTargetView(resource, Some(&view_desc), Some(&mut view))? };
    view.ok_or(Dx11Error::NullObject("render target view"))
}

/// A depth view of mip 0. The read-only variant may be bound while the
/// same image is sampled.
pub fn depth_stencil(
    device: &ID3D11Device,
    resource: &ID3D11Resource,
    desc: &ImageDesc,
    format: DXGI_FORMAT,
    read_only: bool,
) -> Result<ID3D11DepthStencilView> {
    let (dimension, anonymous) = if ViewShape::of(desc).is_layered() {
        (
            D3D11_DSV_DIMENSION_TEXTURE2DARRAY,
            D3D11_DEPTH_STENCIL_VIEW_DESC_0 {
                Texture2DArray: D3D11_TEX2D_ARRAY_DSV {
                    MipSlice: 0,
                    FirstArraySlice: 0,
                    ArraySize: desc.array_layers,
                },
            },
        )
    } else {
        (
            D3D11_DSV_DIMENSION_TEXTURE2D,
            D3D11_DEPTH_STENCIL_VIEW_DESC_0 {
                Texture2D: D3D11_TEX2D_DSV { MipSlice: 0 },
            },
        )
    };
    let mut flags = 0;
    if read_only {
        flags |= D3D11_DSV_READ_ONLY_DEPTH.0;
        if desc.format.has_stencil() {
            flags |= D3D11_DSV_READ_ONLY_STENCIL.0;
        }
    }
    let view_desc = D3D11_DEPTH_STENCIL_VIEW_DESC {
        Format: format,
        ViewDimension: dimension,
        Flags: flags as u32,
        Anonymous: anonymous,
    };
    let mut view = None;
    // SAFETY: as above.
    unsafe { device.CreateDepthStencilView(resource, Some(&view_desc), Some(&mut view))? };
    view.ok_or(Dx11Error::NullObject("depth stencil view"))
}

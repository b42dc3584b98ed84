//! Backend-neutral texel formats and the size math built on them.

use serde::{Deserialize, Serialize};

/// Texel format of an image or vertex attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    R8Unorm,
    R8Snorm,
    R8Uint,
    R8G8Unorm,
    R8G8Snorm,
    R8G8B8A8Unorm,
    R8G8B8A8Snorm,
    R8G8B8A8Srgb,
    B8G8R8A8Unorm,
    B8G8R8A8Srgb,
    R16Unorm,
    R16Sfloat,
    R16G16Unorm,
    R16G16Sfloat,
    R16G16B16A16Unorm,
    R16G16B16A16Snorm,
    R16G16B16A16Sfloat,
    R32Uint,
    R32Sfloat,
    R32G32Sfloat,
    R32G32B32Sfloat,
    R32G32B32A32Sfloat,
    D16Unorm,
    D24UnormS8Uint,
    D32Sfloat,
    D32SfloatS8Uint,
    Bc1RgbUnorm,
    Bc1RgbaUnorm,
    Bc2Unorm,
    Bc3Unorm,
    Bc4Unorm,
    Bc5Unorm,
    Bc6hUfloat,
    Bc7Unorm,
}

/// Which depth/stencil aspects a format carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DepthStencilKind {
    /// A color format.
    None,
    /// Depth only.
    DepthOnly,
    /// Stencil only.
    StencilOnly,
    /// Combined depth and stencil.
    DepthStencil,
}

impl Format {
    /// Every format, in declaration order.
    pub const ALL: [Self; 34] = [
        Self::R8Unorm,
        Self::R8Snorm,
        Self::R8Uint,
        Self::R8G8Unorm,
        Self::R8G8Snorm,
        Self::R8G8B8A8Unorm,
        Self::R8G8B8A8Snorm,
        Self::R8G8B8A8Srgb,
        Self::B8G8R8A8Unorm,
        Self::B8G8R8A8Srgb,
        Self::R16Unorm,
        Self::R16Sfloat,
        Self::R16G16Unorm,
        Self::R16G16Sfloat,
        Self::R16G16B16A16Unorm,
        Self::R16G16B16A16Snorm,
        Self::R16G16B16A16Sfloat,
        Self::R32Uint,
        Self::R32Sfloat,
        Self::R32G32Sfloat,
        Self::R32G32B32Sfloat,
        Self::R32G32B32A32Sfloat,
        Self::D16Unorm,
        Self::D24UnormS8Uint,
        Self::D32Sfloat,
        Self::D32SfloatS8Uint,
        Self::Bc1RgbUnorm,
        Self::Bc1RgbaUnorm,
        Self::Bc2Unorm,
        Self::Bc3Unorm,
        Self::Bc4Unorm,
        Self::Bc5Unorm,
        Self::Bc6hUfloat,
        Self::Bc7Unorm,
    ];

    /// Whether this is a block-compressed (BCn/DXT) format.
    #[inline]
    pub const fn is_compressed(self) -> bool {
        matches!(
            self,
            Self::Bc1RgbUnorm
                | Self::Bc1RgbaUnorm
                | Self::Bc2Unorm
                | Self::Bc3Unorm
                | Self::Bc4Unorm
                | Self::Bc5Unorm
                | Self::Bc6hUfloat
                | Self::Bc7Unorm
        )
    }

    /// Bytes per 4x4 block for compressed formats, 0 otherwise.
    #[inline]
    pub const fn block_size(self) -> u64 {
        match self {
            Self::Bc1RgbUnorm | Self::Bc1RgbaUnorm | Self::Bc4Unorm => 8,
            Self::Bc2Unorm | Self::Bc3Unorm | Self::Bc5Unorm | Self::Bc6hUfloat | Self::Bc7Unorm => {
                16
            }
            _ => 0,
        }
    }

    /// Bytes per texel for uncompressed formats, 0 for compressed ones.
    ///
    /// Packed depth/stencil formats report their staging size, which is
    /// what uploads and readbacks use.
    #[inline]
    pub const fn bytes_per_pixel(self) -> u64 {
        match self {
            Self::R8Unorm | Self::R8Snorm | Self::R8Uint => 1,
            Self::R8G8Unorm | Self::R8G8Snorm | Self::R16Unorm | Self::R16Sfloat | Self::D16Unorm => 2,
            Self::R8G8B8A8Unorm
            | Self::R8G8B8A8Snorm
            | Self::R8G8B8A8Srgb
            | Self::B8G8R8A8Unorm
            | Self::B8G8R8A8Srgb
            | Self::R16G16Unorm
            | Self::R16G16Sfloat
            | Self::R32Uint
            | Self::R32Sfloat
            | Self::D24UnormS8Uint
            | Self::D32Sfloat => 4,
            Self::R16G16B16A16Unorm
            | Self::R16G16B16A16Snorm
            | Self::R16G16B16A16Sfloat
            | Self::R32G32Sfloat
            | Self::D32SfloatS8Uint => 8,
            Self::R32G32B32Sfloat => 12,
            Self::R32G32B32A32Sfloat => 16,
            _ => 0,
        }
    }

    /// Depth/stencil aspects of this format.
    #[inline]
    pub const fn depth_stencil_kind(self) -> DepthStencilKind {
        match self {
            Self::D16Unorm | Self::D32Sfloat => DepthStencilKind::DepthOnly,
            Self::D24UnormS8Uint | Self::D32SfloatS8Uint => DepthStencilKind::DepthStencil,
            _ => DepthStencilKind::None,
        }
    }

    /// Whether the format has a depth or stencil aspect.
    #[inline]
    pub const fn is_depth(self) -> bool {
        !matches!(self.depth_stencil_kind(), DepthStencilKind::None)
    }

    /// Whether the format has a stencil aspect.
    #[inline]
    pub const fn has_stencil(self) -> bool {
        matches!(
            self.depth_stencil_kind(),
            DepthStencilKind::DepthStencil | DepthStencilKind::StencilOnly
        )
    }

    /// Byte size of one `width` x `height` mip level.
    pub const fn mip_size(self, width: u32, height: u32) -> u64 {
        let width = width as u64;
        let height = height as u64;
        if self.is_compressed() {
            width.div_ceil(4) * height.div_ceil(4) * self.block_size()
        } else {
            width * height * self.bytes_per_pixel()
        }
    }
}

/// Length of a full mip chain for the given extent, `floor(log2(max(w, h))) + 1`.
#[inline]
pub const fn full_mip_chain(width: u32, height: u32) -> u32 {
    let largest = if width > height { width } else { height };
    if largest == 0 {
        1
    } else {
        u32::BITS - largest.leading_zeros()
    }
}

/// Extent of `level` for a base dimension, never below 1.
#[inline]
pub const fn mip_extent(base: u32, level: u32) -> u32 {
    let extent = base >> level;
    if extent == 0 {
        1
    } else {
        extent
    }
}

/// Mip level count and generation flag after applying format rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MipPlan {
    /// Number of mip levels to allocate.
    pub levels: u32,
    /// Whether levels past 0 are produced by blitting.
    pub generate: bool,
}

/// Decide how many mip levels an image gets.
///
/// Block-compressed formats never generate mips: they keep the levels the
/// caller supplies (at least 1). Generation on other formats always produces
/// the full chain. Otherwise the request is clamped to `1..=full_chain`.
pub const fn resolve_mip_levels(
    format: Format,
    width: u32,
    height: u32,
    requested: u32,
    generate: bool,
) -> MipPlan {
    let full = full_mip_chain(width, height);
    let clamped = if requested == 0 {
        1
    } else if requested > full {
        full
    } else {
        requested
    };

    if format.is_compressed() {
        MipPlan {
            levels: clamped,
            generate: false,
        }
    } else if generate {
        MipPlan {
            levels: full,
            generate: true,
        }
    } else {
        MipPlan {
            levels: clamped,
            generate: false,
        }
    }
}

/// Placement of one (layer, mip) subresource inside tightly packed upload data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubresourceRegion {
    /// Array layer.
    pub layer: u32,
    /// Mip level.
    pub mip: u32,
    /// Byte offset into the source data.
    pub offset: u64,
    /// Byte length of this subresource.
    pub size: u64,
    /// Texel width of the level.
    pub width: u32,
    /// Texel height of the level.
    pub height: u32,
}

/// Layer-major, then mip, packed layout of a full image upload.
///
/// Returns the regions and the total byte size they cover.
pub fn subresource_regions(
    format: Format,
    width: u32,
    height: u32,
    mip_levels: u32,
    array_layers: u32,
) -> (Vec<SubresourceRegion>, u64) {
    let mut regions = Vec::with_capacity((mip_levels * array_layers) as usize);
    let mut offset = 0;

    for layer in 0..array_layers {
        for mip in 0..mip_levels {
            let level_width = mip_extent(width, mip);
            let level_height = mip_extent(height, mip);
            let size = format.mip_size(level_width, level_height);
            regions.push(SubresourceRegion {
                layer,
                mip,
                offset,
                size,
                width: level_width,
                height: level_height,
            });
            offset += size;
        }
    }

    (regions, offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_format_has_a_size() {
        for format in Format::ALL {
            if format.is_compressed() {
                assert!(format.block_size() > 0, "{format:?}");
                assert_eq!(format.bytes_per_pixel(), 0);
            } else {
                assert!(format.bytes_per_pixel() > 0, "{format:?}");
                assert_eq!(format.block_size(), 0);
            }
        }
    }

    #[test]
    fn depth_aspects() {
        assert_eq!(Format::D32Sfloat.depth_stencil_kind(), DepthStencilKind::DepthOnly);
        assert!(Format::D24UnormS8Uint.has_stencil());
        assert!(!Format::R16G16B16A16Sfloat.is_depth());
    }

    #[test]
    fn full_chain_matches_log2() {
        assert_eq!(full_mip_chain(256, 256), 9);
        assert_eq!(full_mip_chain(1920, 1080), 11);
        assert_eq!(full_mip_chain(1, 1), 1);
        assert_eq!(full_mip_chain(0, 0), 1);
    }

    #[test]
    fn generated_mips_use_the_full_chain() {
        let plan = resolve_mip_levels(Format::R8G8B8A8Unorm, 512, 128, 0, true);
        assert_eq!(plan, MipPlan { levels: 10, generate: true });
    }

    #[test]
    fn compressed_formats_never_generate() {
        let plan = resolve_mip_levels(Format::Bc3Unorm, 512, 512, 0, true);
        assert_eq!(plan, MipPlan { levels: 1, generate: false });

        let explicit = resolve_mip_levels(Format::Bc1RgbaUnorm, 512, 512, 4, true);
        assert_eq!(explicit, MipPlan { levels: 4, generate: false });
    }

    #[test]
    fn requested_mips_are_clamped() {
        let unset = resolve_mip_levels(Format::R8G8B8A8Unorm, 256, 256, 0, false);
        assert_eq!(unset.levels, 1);

        let too_many = resolve_mip_levels(Format::R8G8B8A8Unorm, 256, 256, 20, false);
        assert_eq!(too_many.levels, 9);
    }

    #[test]
    fn compressed_levels_round_up_to_blocks() {
        assert_eq!(Format::Bc1RgbUnorm.mip_size(5, 5), 2 * 2 * 8);
        assert_eq!(Format::Bc7Unorm.mip_size(1, 1), 16);
    }

    #[test]
    fn regions_are_packed_layer_major() {
        let (regions, total) = subresource_regions(Format::R8G8B8A8Unorm, 4, 4, 3, 2);
        assert_eq!(regions.len(), 6);
        // 4x4 + 2x2 + 1x1 texels per layer
        let per_layer = (16 + 4 + 1) * 4;
        assert_eq!(total, per_layer * 2);
        assert_eq!(regions[3].layer, 1);
        assert_eq!(regions[3].mip, 0);
        assert_eq!(regions[3].offset, per_layer);
        assert_eq!(regions[2].width, 1);
    }
}

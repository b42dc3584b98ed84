//! Subresource addressing and pitch arithmetic for `UpdateSubresource`.

use cinder_rhi::{Format, ImageDesc};

/// The view dimension every view of an image shares.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewShape {
    Texture2D,
    Texture2DArray,
    Cube,
    CubeArray,
    Texture3D,
}

impl ViewShape {
    pub const fn of(desc: &ImageDesc) -> Self {
        if desc.is_cubemap() {
            if desc.array_layers > 6 {
                Self::CubeArray
            } else {
                Self::Cube
            }
        } else if desc.depth > 1 {
            Self::Texture3D
        } else if desc.array_layers > 1 {
            Self::Texture2DArray
        } else {
            Self::Texture2D
        }
    }

    /// Render target and UAV views of cubes address their faces as an array.
    pub const fn is_layered(self) -> bool {
        !matches!(self, Self::Texture2D)
    }
}

/// `D3D11CalcSubresource`: mips of layer 0 first, then layer 1, and so on.
pub const fn subresource_index(mip: u32, layer: u32, mip_levels: u32) -> u32 {
    mip + layer * mip_levels
}

/// Bytes between two rows of texels, or of 4x4 blocks when compressed.
pub const fn row_pitch(format: Format, width: u32) -> u32 {
    if format.is_compressed() {
        width.div_ceil(4) * format.block_size() as u32
    } else {
        width * format.bytes_per_pixel() as u32
    }
}

/// Bytes between two depth slices of a tightly packed level.
pub const fn depth_pitch(format: Format, width: u32, height: u32) -> u32 {
    format.mip_size(width, height) as u32
}

/// Byte size of a buffer rounded up to what its bind flags demand.
///
/// Constant buffers come in 16 byte units and raw views address 4 byte words.
pub const fn padded_buffer_size(size: u64, constant: bool) -> u64 {
    if constant {
        size.next_multiple_of(16)
    } else {
        size.next_multiple_of(4)
    }
}

#[cfg(test)]
mod tests {
    use cinder_rhi::format::subresource_regions;

    use super::*;

    #[test]
    fn subresources_are_mip_major_within_a_layer() {
        assert_eq!(subresource_index(0, 0, 5), 0);
        assert_eq!(subresource_index(3, 0, 5), 3);
        assert_eq!(subresource_index(0, 2, 5), 10);
        assert_eq!(subresource_index(1, 5, 1), 6);
    }

    #[test]
    fn compressed_rows_are_block_rows() {
        assert_eq!(row_pitch(Format::R8G8B8A8Unorm, 100), 400);
        assert_eq!(row_pitch(Format::Bc1RgbaUnorm, 100), 25 * 8);
        assert_eq!(row_pitch(Format::Bc7Unorm, 2), 16);
        assert_eq!(depth_pitch(Format::R16Sfloat, 8, 8), 128);
    }

    #[test]
    fn packed_regions_match_pitches() {
        let (regions, _) = subresource_regions(Format::R32Sfloat, 16, 8, 3, 1);
        for region in &regions {
            assert_eq!(
                u64::from(row_pitch(Format::R32Sfloat, region.width)) * u64::from(region.height),
                region.size
            );
        }
    }

    #[test]
    fn view_shapes_follow_usage_and_extent() {
        use cinder_rhi::{ImageCreateInfo, ImageUsage};

        let flat = ImageDesc::from_info(&ImageCreateInfo::render_target("Flat", Format::R8Unorm, 4, 4)).unwrap();
        assert_eq!(ViewShape::of(&flat), ViewShape::Texture2D);
        assert!(!ViewShape::of(&flat).is_layered());

        let mut info = ImageCreateInfo::depth_target("Cube Shadow", Format::D32Sfloat, 64, 64).with_array_layers(6);
        info.usage |= ImageUsage::CUBEMAP;
        let cube = ImageDesc::from_info(&info).unwrap();
        assert_eq!(ViewShape::of(&cube), ViewShape::Cube);
        info.array_layers = 12;
        assert_eq!(ViewShape::of(&ImageDesc::from_info(&info).unwrap()), ViewShape::CubeArray);
    }

    #[test]
    fn buffer_sizes_are_padded() {
        assert_eq!(padded_buffer_size(100, true), 112);
        assert_eq!(padded_buffer_size(64, true), 64);
        assert_eq!(padded_buffer_size(6, false), 8);
    }
}

//! Adapter identification from DXGI descriptions.

use cinder_rhi::AdapterInfo;

/// Display name for a PCI vendor id.
pub fn vendor_name(id: u32) -> String {
    match id {
        0x10DE => "NVIDIA".into(),
        0x1002 | 0x1022 => "AMD".into(),
        0x8086 => "Intel".into(),
        0x1414 => "Microsoft".into(),
        0x5143 => "Qualcomm".into(),
        other => format!("Unknown Vendor (0x{other:04X})"),
    }
}

/// Decode a NUL-terminated UTF-16 adapter description.
pub fn decode_description(wide: &[u16]) -> String {
    let end = wide.iter().position(|&c| c == 0).unwrap_or(wide.len());
    String::from_utf16_lossy(&wide[..end])
}

/// `D3D_FEATURE_LEVEL_11_1` is `0xb100`: major and minor in the high nibbles.
pub const fn feature_level_version(raw: i32) -> (u32, u32) {
    let raw = raw as u32;
    ((raw >> 12) & 0xF, (raw >> 8) & 0xF)
}

pub fn adapter_info(vendor_id: u32, description: &[u16], feature_level: (u32, u32)) -> AdapterInfo {
    AdapterInfo {
        vendor: vendor_name(vendor_id),
        renderer: decode_description(description),
        api_version: format!("Direct3D 11 (feature level {}_{})", feature_level.0, feature_level.1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptions_stop_at_the_terminator() {
        let mut wide = [0u16; 128];
        for (slot, c) in wide.iter_mut().zip("Radeon RX".encode_utf16()) {
            *slot = c;
        }
        assert_eq!(decode_description(&wide), "Radeon RX");
        assert_eq!(decode_description(&[0x57, 0x41, 0x52, 0x50]), "WARP");
    }

    #[test]
    fn feature_levels_decode() {
        assert_eq!(feature_level_version(0xb100), (11, 1));
        assert_eq!(feature_level_version(0xb000), (11, 0));
        assert_eq!(feature_level_version(0xa100), (10, 1));
    }

    #[test]
    fn unknown_vendors_show_their_id() {
        assert_eq!(vendor_name(0x8086), "Intel");
        assert_eq!(vendor_name(0xBEEF), "Unknown Vendor (0xBEEF)");
        let info = adapter_info(0x1414, &[0x42, 0], (11, 1));
        assert_eq!(info.vendor, "Microsoft");
        assert_eq!(info.api_version, "Direct3D 11 (feature level 11_1)");
    }
}

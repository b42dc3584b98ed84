//! Shader blob checks and vertex input naming.

use cinder_rhi::ShaderStages;

use crate::error::{Dx11Error, Result};

const DXBC_MAGIC: &[u8; 4] = b"DXBC";
/// Magic, checksum, version, total size and chunk count.
const DXBC_HEADER_LEN: usize = 32;

/// Every vertex attribute binds to `TEXCOORD<location>`, the naming HLSL
/// cross-compilers emit for location-decorated inputs.
pub const ATTRIBUTE_SEMANTIC: &str = "TEXCOORD";

/// Reject anything that is not a compiled DXBC container.
pub fn check_dxbc(name: &str, stage: ShaderStages, code: &[u8]) -> Result<()> {
    if code.len() < DXBC_HEADER_LEN || !code.starts_with(DXBC_MAGIC) {
        return Err(Dx11Error::Shader {
            name: name.to_owned(),
            reason: format!("{stage:?} stage is not a DXBC blob"),
        });
    }
    let declared = u32::from_le_bytes([code[24], code[25], code[26], code[27]]) as usize;
    if declared != code.len() {
        return Err(Dx11Error::Shader {
            name: name.to_owned(),
            reason: format!("{stage:?} blob declares {declared} bytes, got {}", code.len()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(len: usize) -> Vec<u8> {
        let mut code = vec![0u8; len];
        code[..4].copy_from_slice(DXBC_MAGIC);
        code[4..20].fill(0xAB);
        code[20..24].copy_from_slice(&1u32.to_le_bytes());
        code[24..28].copy_from_slice(&(len as u32).to_le_bytes());
        code
    }

    #[test]
    fn well_formed_containers_pass() {
        assert!(check_dxbc("Quad", ShaderStages::VERTEX, &blob(64)).is_ok());
    }

    #[test]
    fn spirv_and_truncated_blobs_fail() {
        let spirv = 0x0723_0203u32.to_le_bytes().repeat(10);
        assert!(check_dxbc("Quad", ShaderStages::VERTEX, &spirv).is_err());

        let mut truncated = blob(64);
        truncated.truncate(48);
        let err = check_dxbc("Quad", ShaderStages::FRAGMENT, &truncated).unwrap_err();
        assert!(err.to_string().contains("declares 64 bytes"));
    }
}

//! Precompiled SPIR-V looked up by asset address.

use std::fs;
use std::path::{Path, PathBuf};

use cinder_deferred::{RenderError, Result};
use cinder_rhi::ShaderStages;
use tracing::debug;

/// Overrides the shader root.
pub const SHADER_DIR_ENV: &str = "CINDER_SHADER_DIR";

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Address prefixes and the directories they live in.
const ROOTS: [(&str, &str); 2] = [("@CORESHADERS/", "core"), ("@VIEWER/", "viewer")];

fn stage_extension(stage: ShaderStages) -> Option<&'static str> {
    if stage == ShaderStages::VERTEX {
        Some("vert")
    } else if stage == ShaderStages::FRAGMENT {
        Some("frag")
    } else if stage == ShaderStages::COMPUTE {
        Some("comp")
    } else {
        None
    }
}

fn is_spirv(code: &[u8]) -> bool {
    code.len() >= 4
        && code.len() % 4 == 0
        && u32::from_le_bytes([code[0], code[1], code[2], code[3]]) == SPIRV_MAGIC
}

pub struct ShaderDirectory {
    root: PathBuf,
}

impl ShaderDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$CINDER_SHADER_DIR`, else the `shaders` directory of this crate.
    pub fn from_env() -> Self {
        let root = std::env::var_os(SHADER_DIR_ENV)
            .map_or_else(|| Path::new(env!("CARGO_MANIFEST_DIR")).join("shaders"), PathBuf::from);
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding `stage` of the pipeline at `address`.
    pub fn path_for(&self, address: &str, stage: ShaderStages) -> Option<PathBuf> {
        let (relative, dir) = ROOTS
            .iter()
            .copied()
            .find_map(|(prefix, dir)| address.strip_prefix(prefix).map(|rest| (rest, dir)))?;
        let extension = stage_extension(stage)?;
        Some(self.root.join(dir).join(format!("{relative}.{extension}.spv")))
    }

    pub fn read(&self, address: &str, stage: ShaderStages) -> Result<Vec<u8>> {
        let fail = |reason: String| RenderError::ShaderLoad {
            address: address.to_owned(),
            reason,
        };
        let path = self
            .path_for(address, stage)
            .ok_or_else(|| fail(format!("no shader file for {stage:?}")))?;
        let code = fs::read(&path).map_err(|e| fail(format!("{}: {e}", path.display())))?;
        if !is_spirv(&code) {
            return Err(fail(format!("{} is not SPIR-V", path.display())));
        }
        Ok(code)
    }

    /// Loader for pipeline builders: anything unreadable is just absent.
    pub fn load(&self, address: &str, stage: ShaderStages) -> Option<Vec<u8>> {
        match self.read(address, stage) {
            Ok(code) => Some(code),
            Err(e) => {
                debug!("{e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("cinder-viewer-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn addresses_map_onto_stage_files() {
        let shaders = ShaderDirectory::new("/shaders");
        assert_eq!(
            shaders.path_for("@CORESHADERS/lighting/point", ShaderStages::FRAGMENT),
            Some(PathBuf::from("/shaders/core/lighting/point.frag.spv"))
        );
        assert_eq!(
            shaders.path_for("@VIEWER/mesh", ShaderStages::VERTEX),
            Some(PathBuf::from("/shaders/viewer/mesh.vert.spv"))
        );
        assert_eq!(
            shaders.path_for("@CORESHADERS/postProcessing/bloom", ShaderStages::COMPUTE),
            Some(PathBuf::from("/shaders/core/postProcessing/bloom.comp.spv"))
        );
    }

    #[test]
    fn unknown_prefixes_and_combined_stages_have_no_file() {
        let shaders = ShaderDirectory::new("/shaders");
        assert_eq!(shaders.path_for("textures/brdf", ShaderStages::VERTEX), None);
        assert_eq!(
            shaders.path_for("@VIEWER/mesh", ShaderStages::VERTEX | ShaderStages::FRAGMENT),
            None
        );
    }

    #[test]
    fn missing_files_load_as_absent() {
        let shaders = ShaderDirectory::new(scratch_dir("missing"));
        assert!(shaders.load("@VIEWER/mesh", ShaderStages::VERTEX).is_none());
        assert!(matches!(
            shaders.read("@VIEWER/mesh", ShaderStages::VERTEX),
            Err(RenderError::ShaderLoad { .. })
        ));
    }

    #[test]
    fn only_spirv_is_accepted() {
        let root = scratch_dir("spirv");
        fs::create_dir_all(root.join("viewer")).unwrap();
        let mut module = SPIRV_MAGIC.to_le_bytes().to_vec();
        module.extend_from_slice(&[0; 16]);
        fs::write(root.join("viewer/mesh.vert.spv"), &module).unwrap();
        fs::write(root.join("viewer/mesh.frag.spv"), b"#version 450\n").unwrap();

        let shaders = ShaderDirectory::new(&root);
        assert_eq!(shaders.load("@VIEWER/mesh", ShaderStages::VERTEX), Some(module));
        assert!(shaders.load("@VIEWER/mesh", ShaderStages::FRAGMENT).is_none());
        fs::remove_dir_all(root).unwrap();
    }
}

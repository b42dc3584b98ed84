//! Direct3D 11 backend error types.

use cinder_rhi::RhiError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Dx11Error {
    /// A D3D11 or DXGI call returned a failure code.
    #[cfg(windows)]
    #[error("Direct3D error: {0}")]
    Windows(#[from] windows::core::Error),

    /// The device call succeeded but handed back no object.
    #[error("Direct3D returned no {0}")]
    NullObject(&'static str),

    #[error("Shader '{name}': {reason}")]
    Shader { name: String, reason: String },

    /// A pipeline needs more registers of one class than D3D11 provides.
    #[error("'{pipeline}' needs {needed} {class} registers, at most {limit} available")]
    RegisterOverflow {
        pipeline: String,
        class: &'static str,
        needed: u32,
        limit: u32,
    },

    #[error("Swapchain error: {0}")]
    Swapchain(String),

    #[error("No native {0} for handle")]
    MissingNative(&'static str),

    #[error("Not supported by Direct3D 11: {0}")]
    Unsupported(String),
}

impl From<Dx11Error> for RhiError {
    fn from(err: Dx11Error) -> Self {
        match err {
            Dx11Error::Unsupported(what) => Self::Unsupported(what),
            Dx11Error::Swapchain(reason) => Self::Swapchain(reason),
            Dx11Error::MissingNative(kind) => Self::InvalidHandle(kind),
            other => Self::Backend(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Dx11Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_keeps_its_category() {
        let err: RhiError = Dx11Error::Unsupported("tessellation".into()).into();
        assert!(matches!(err, RhiError::Unsupported(what) if what == "tessellation"));

        let err: RhiError = Dx11Error::MissingNative("image").into();
        assert!(matches!(err, RhiError::InvalidHandle("image")));
    }
}

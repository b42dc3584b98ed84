//! Error types for the OpenGL backend.

use cinder_rhi::RhiError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GlError {
    #[error("GL object creation failed: {0}")]
    ObjectCreation(String),

    #[error("Shader '{name}' failed to compile: {log}")]
    Compile { name: String, log: String },

    #[error("Program '{name}' failed to link: {log}")]
    Link { name: String, log: String },

    #[error("Framebuffer '{name}' is incomplete (status {status:#x})")]
    IncompleteFramebuffer { name: String, status: u32 },

    #[error("Surface error: {0}")]
    Surface(String),

    #[error("GL {required} required, context provides {found}")]
    Version { required: String, found: String },

    #[error("Missing native {0} object")]
    MissingNative(&'static str),

    #[error("Not supported by this context: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Rhi(#[from] RhiError),
}

impl From<GlError> for RhiError {
    fn from(err: GlError) -> Self {
        match err {
            GlError::Unsupported(what) => Self::Unsupported(what),
            GlError::Surface(reason) => Self::Swapchain(reason),
            GlError::Rhi(err) => err,
            other => Self::Backend(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, GlError>;

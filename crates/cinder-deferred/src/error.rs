//! Renderer error types.

use cinder_rhi::RhiError;
use thiserror::Error;

/// Errors raised while building or recording the deferred frame.
#[derive(Error, Debug)]
pub enum RenderError {
    /// The RHI rejected a call.
    #[error(transparent)]
    Rhi(#[from] RhiError),

    /// A frame was requested for an image set that does not exist.
    #[error("Image set {index} out of range ({count} sets)")]
    ImageSetOutOfRange {
        /// Requested frame-in-flight index.
        index: usize,
        /// Number of image sets the renderer owns.
        count: usize,
    },

    /// The configuration cannot produce a renderer.
    #[error("Invalid renderer configuration: {0}")]
    InvalidConfig(String),

    /// Shader bytecode could not be loaded.
    #[error("Failed to load shader '{address}': {reason}")]
    ShaderLoad {
        /// Asset address of the pipeline.
        address: String,
        /// What went wrong.
        reason: String,
    },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, RenderError>;

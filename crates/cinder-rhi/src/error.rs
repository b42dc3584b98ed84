//! RHI error types.

use thiserror::Error;

/// Errors raised by the backend-neutral layer and by every backend.
#[derive(Error, Debug)]
pub enum RhiError {
    /// A native API call failed.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// A resource was created without a debug name.
    #[error("Unnamed {0}")]
    MissingDebugName(&'static str),

    /// A handle does not refer to a live resource.
    #[error("Invalid {0} handle")]
    InvalidHandle(&'static str),

    /// A CreateInfo field is out of range or contradictory.
    #[error("Invalid create info for '{name}': {reason}")]
    InvalidCreateInfo {
        /// Debug name of the resource being created.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A descriptor binding does not match its layout slot.
    #[error("Binding mismatch in '{set}' at slot {slot}: {reason}")]
    BindingMismatch {
        /// Debug name of the descriptor set.
        set: String,
        /// Binding slot.
        slot: u32,
        /// What is wrong with it.
        reason: String,
    },

    /// A framebuffer's attachments disagree with its render pass.
    #[error("Framebuffer '{framebuffer}' is incompatible with render pass '{render_pass}': {reason}")]
    IncompatibleFramebuffer {
        /// Debug name of the framebuffer.
        framebuffer: String,
        /// Debug name of the render pass.
        render_pass: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A command was recorded in a state that does not allow it.
    #[error("Invalid command buffer state in '{buffer}': {reason}")]
    InvalidCommandState {
        /// Debug name of the command buffer.
        buffer: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A buffer or image upload does not fit the resource.
    #[error("Upload out of range: {0}")]
    UploadOutOfRange(String),

    /// A format or enum has no native equivalent on this backend.
    #[error("Unsupported on this backend: {0}")]
    Unsupported(String),

    /// Swapchain creation or recreation failed.
    #[error("Swapchain error: {0}")]
    Swapchain(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, RhiError>;

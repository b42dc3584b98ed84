//! Vulkan backend error types.

use ash::vk;
use cinder_rhi::RhiError;
use thiserror::Error;

/// Vulkan-related errors.
#[derive(Error, Debug)]
pub enum VulkanError {
    /// A Vulkan call returned a failure code.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// The Vulkan loader could not be found.
    #[error("Failed to load Vulkan: {0}")]
    Loading(String),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// SPIR-V could not be read or compiled into a module.
    #[error("Shader module creation failed: {0}")]
    ShaderModule(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// A resource has no native object behind it.
    #[error("No native {0} for handle")]
    MissingNative(&'static str),

    /// An RHI-level error raised while replaying commands.
    #[error(transparent)]
    Rhi(#[from] RhiError),
}

impl From<VulkanError> for RhiError {
    fn from(err: VulkanError) -> Self {
        match err {
            VulkanError::AllocationFailed(reason) => Self::AllocationFailed(reason),
            VulkanError::SwapchainCreation(reason) | VulkanError::SurfaceCreation(reason) => {
                Self::Swapchain(reason)
            }
            VulkanError::MissingNative(kind) => Self::InvalidHandle(kind),
            VulkanError::Rhi(err) => err,
            other => Self::Backend(other.to_string()),
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, VulkanError>;

/// Map a raw Vulkan failure straight into the RHI error type.
pub(crate) fn vk_err(result: vk::Result) -> RhiError {
    tracing::error!("Vulkan call failed: {result}");
    VulkanError::Vulkan(result).into()
}

//! Vulkan backend for the Cinder rendering hardware interface.
//!
//! This crate provides:
//! - Instance, device and queue setup with optional validation
//! - Memory allocation via gpu-allocator
//! - [`VulkanCore`], which mirrors every registry resource with a native object
//! - Command buffer replay with image layout tracking
//! - [`VulkanWindowBinding`] for swapchain presentation

pub mod capabilities;
pub mod command;
pub mod context;
pub mod core;
pub mod deletion;
pub mod descriptors;
pub mod error;
pub mod instance;
pub mod memory;
pub mod natives;
pub mod pipeline;
pub mod render_pass;
pub mod replay;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod translate;
pub mod window;

pub use capabilities::{DeviceCapabilities, GpuVendor};
pub use context::VulkanContext;
pub use self::core::{VulkanCore, VulkanCoreBuilder};
pub use error::VulkanError;
pub use window::VulkanWindowBinding;

//! Direct3D 11 backend for the Cinder rendering hardware interface.
//!
//! Shaders are DXBC blobs compiled with descriptor bindings flattened onto
//! HLSL registers the way [`registers`] assigns them. The register, hazard
//! and clip-space logic is portable and builds everywhere; the device and
//! swapchain only exist on Windows.

pub mod adapter;
pub mod clip;
pub mod error;
pub mod hazards;
pub mod registers;
pub mod shader;
pub mod subresource;

#[cfg(windows)]
pub mod core;
#[cfg(windows)]
mod debug;
#[cfg(windows)]
pub mod natives;
#[cfg(windows)]
pub mod replay;
#[cfg(windows)]
pub mod translate;
#[cfg(windows)]
mod views;
#[cfg(windows)]
pub mod window;

#[cfg(windows)]
pub use self::core::{Dx11Core, Dx11CoreBuilder};
pub use error::Dx11Error;
#[cfg(windows)]
pub use window::Dx11WindowBinding;

//! OpenGL 4.3 backend for the Cinder rendering hardware interface.
//!
//! Built on glow. Windowing stays outside this crate: anything that can make
//! a context current and swap buffers implements [`GlSurface`].

pub mod core;
pub mod error;
pub mod natives;
pub mod program;
pub mod replay;
pub mod surface;
pub mod translate;
pub mod window;

pub use self::core::{GlConfig, GlCore};
pub use error::GlError;
pub use surface::GlSurface;
pub use window::GlWindowBinding;

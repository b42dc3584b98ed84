//! The window-system side of a GL context.

use std::ffi::c_void;

/// A drawable with a GL context attached, provided by the windowing layer.
///
/// Errors are reported as strings since every context library has its own
/// error type.
pub trait GlSurface {
    fn make_current(&self) -> Result<(), String>;

    fn swap_buffers(&self) -> Result<(), String>;

    fn get_proc_address(&self, symbol: &str) -> *const c_void;

    /// Drawable size in pixels.
    fn size(&self) -> (u32, u32);

    /// Toggle vsync. Surfaces that cannot change it keep their default.
    fn set_swap_interval(&self, _vsync: bool) -> Result<(), String> {
        Ok(())
    }
}

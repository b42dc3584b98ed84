//! Cinder deferred renderer demo viewer.
//!
//! Orbits a small lit scene: a ground plane, a ring of cubes and one point,
//! spot and directional light.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p cinder-viewer
//! ```
//!
//! ## Controls
//!
//! - `M`: cycle render modes (lit, then the G-buffer debug views)
//! - `Space`: pause the orbit
//! - Mouse wheel: zoom
//! - `Escape`: quit
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)
//! - `CINDER_SHADER_DIR`: Root of the precompiled SPIR-V tree (default: `shaders/` in this crate)

mod geometry;
mod mesh;
mod scene;
mod shaders;
mod viewer;

use cinder_app::{run_app, AppConfig};

use crate::viewer::Viewer;

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

fn main() -> anyhow::Result<()> {
    run_app::<Viewer>(AppConfig::new("Cinder Viewer").with_size(WIDTH, HEIGHT))
}

//! Deferred renderer for the Cinder engine, written against the RHI `Core` trait.
//!
//! This crate provides:
//! - Per-frame-in-flight G-buffer, lit HDR and post-processing targets
//! - Shadow-mapped spot and directional lights, point lights and IBL
//! - SSAO, compute bloom, screen-space reflections and depth of field
//! - Tonemapping into the window's output framebuffer, or a G-buffer debug view
//! - Resizing that reuses allocations when the render area shrinks

pub mod assets;
pub mod bloom;
pub mod config;
pub mod dof;
pub mod error;
pub mod image_set;
pub mod layouts;
pub mod lights;
pub mod passes;
pub mod quad;
pub mod render_mode;
pub mod renderer;
pub mod ssao;
pub mod uniforms;

pub use assets::{queues, GeometryRenderer, PipelineAssets, PipelineLibrary};
pub use bloom::{bloom_mip_count, BloomLevels};
pub use config::{PostProcessSettings, RendererConfig};
pub use error::{RenderError, Result};
pub use image_set::ImageSet;
pub use layouts::DescriptorLayouts;
pub use passes::RenderPasses;
pub use render_mode::DeferredRenderMode;
pub use renderer::{DeferredRenderer, FrameInput};

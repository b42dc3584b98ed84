//! Backend-neutral rendering hardware interface for the Cinder engine.
//!
//! This crate provides:
//! - Texel formats, usage flags and fixed-function state shared by all backends
//! - CreateInfo structs and typed generational handles
//! - A slot-map [`ResourceRegistry`] that owns every resource description
//! - The descriptor set model used uniformly across backends
//! - A [`CommandBuffer`] recorder with automatic hazard tracking
//! - The [`Core`] and [`WindowGraphicsBinding`] traits backends implement
//! - A headless backend for tests (feature `headless`)

pub mod command;
pub mod core;
pub mod descriptor;
pub mod error;
pub mod flags;
pub mod format;
pub mod handles;
pub mod hazard;
pub mod info;
pub mod registry;
pub mod state;
pub mod validate;
pub mod window;

#[cfg(any(test, feature = "headless"))]
pub mod headless;

pub use command::{
    BindPoint, ClearColor, ClearDepthStencil, Command, CommandBuffer, CommandBufferLevel,
    CommandBufferState, Scissor, Viewport,
};
pub use self::core::{AdapterInfo, Core, GraphicsApi};
pub use descriptor::{Binding, BindingKind, BoundResource, DescriptorSetDesc, LayoutBinding};
pub use error::{Result, RhiError};
pub use flags::{BufferUsage, ImageUsage, MemoryUsage, ShaderStages};
pub use format::{full_mip_chain, resolve_mip_levels, DepthStencilKind, Format, MipPlan};
pub use handles::{
    BufferHandle, ComputePipelineHandle, DescriptorSetHandle, DescriptorSetLayoutHandle,
    FramebufferHandle, GraphicsPipelineHandle, ImageHandle, RenderPassHandle, SamplerHandle,
    VertexArrayHandle,
};
pub use hazard::{BufferAccess, BufferBarrier, HazardTracker, ImageAccess, ImageBarrier};
pub use info::*;
pub use registry::ResourceRegistry;
pub use state::*;
pub use validate::{validate_command_buffer, CommandStats};
pub use window::{AcquireOutcome, FrameCounter, WindowGraphicsBinding, DEFAULT_MAX_FRAMES_IN_FLIGHT};

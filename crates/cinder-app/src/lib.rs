//! Application framework for the Cinder engine.
//!
//! This crate handles the boilerplate every windowed Cinder program needs:
//! - Window creation and the winit event loop
//! - Vulkan core and swapchain setup
//! - A command buffer per frame in flight
//! - Acquire, submit and present, with stale swapchains reported as resizes
//!
//! # Example
//!
//! ```no_run
//! use cinder_app::{run_app, App, AppConfig, AppContext, FrameContext};
//!
//! struct MyApp;
//!
//! impl App for MyApp {
//!     fn init(_ctx: &mut AppContext) -> anyhow::Result<Self> {
//!         Ok(MyApp)
//!     }
//!
//!     fn update(&mut self, _ctx: &AppContext, _dt: f32) {}
//!
//!     fn render(&mut self, _ctx: &mut AppContext, _frame: &mut FrameContext<'_>) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(AppConfig::default())
//! }
//! ```

mod app;
mod context;
mod frame;
mod runner;

pub use app::App;
pub use context::AppContext;
pub use frame::FrameContext;
pub use runner::{run_app, AppConfig};

pub use cinder_core::Camera;
pub use cinder_vulkan::{VulkanCore, VulkanCoreBuilder, VulkanWindowBinding};
pub use winit::event::{DeviceEvent, DeviceId, WindowEvent};

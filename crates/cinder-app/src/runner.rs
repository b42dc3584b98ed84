//! Application runner and event loop.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use cinder_rhi::{AcquireOutcome, Core, WindowGraphicsBinding, DEFAULT_MAX_FRAMES_IN_FLIGHT};
use cinder_vulkan::VulkanCoreBuilder;
use raw_window_handle::HasDisplayHandle;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{DeviceEvent, DeviceId, ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};

use crate::app::App;
use crate::context::AppContext;
use crate::frame::FrameContext;

/// Application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Frame rate cap; `None` renders as fast as presentation allows.
    pub target_fps: Option<u32>,
    pub vsync: bool,
    /// Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    pub frames_in_flight: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Cinder".to_string(),
            width: 1280,
            height: 720,
            target_fps: None,
            vsync: true,
            validation: cfg!(debug_assertions),
            frames_in_flight: DEFAULT_MAX_FRAMES_IN_FLIGHT,
        }
    }
}

impl AppConfig {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    #[must_use]
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }

    #[must_use]
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    #[must_use]
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    #[must_use]
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    fn target_frame_time(&self) -> Option<Duration> {
        self.target_fps
            .filter(|&fps| fps > 0)
            .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps)))
    }
}

/// Run an [`App`] until its window closes.
///
/// Installs the tracing subscriber (`RUST_LOG`, default `info`), then
/// creates the window, the Vulkan core and the swapchain.
pub fn run_app<A: App + 'static>(config: AppConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new().context("creating the event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
        failure: None,
    };
    event_loop.run_app(&mut runner)?;

    match runner.failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

struct AppRunner<A: App> {
    config: AppConfig,
    state: Option<AppState<A>>,
    /// Initialization error reported once the loop exits.
    failure: Option<anyhow::Error>,
}

struct AppState<A: App> {
    ctx: AppContext,
    app: A,
    target_frame_time: Option<Duration>,
    min_fps: f64,
    max_fps: f64,
    fps_sum: f64,
}

fn is_escape_press(event: &WindowEvent) -> bool {
    matches!(
        event,
        WindowEvent::KeyboardInput {
            event: KeyEvent {
                logical_key: Key::Named(NamedKey::Escape),
                state: ElementState::Pressed,
                ..
            },
            ..
        }
    )
}

impl<A: App + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating application state...");
        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready");
            }
            Err(e) => {
                error!("Failed to initialize application: {e:#}");
                self.failure = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if let Some(state) = &mut self.state {
            if state.app.on_event(&mut state.ctx, &event) {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                self.shutdown(event_loop);
            }
            ref key if is_escape_press(key) => {
                info!("Escape pressed");
                self.shutdown(event_loop);
            }
            WindowEvent::RedrawRequested => {
                if let Some(state) = &mut self.state {
                    if let Err(e) = state.render_frame() {
                        error!("Render error: {e:#}");
                    }
                    state.ctx.window.request_redraw();
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    // The binding rebuilds on the next acquire, which then
                    // reports the swapchain as out of date.
                    state.ctx.binding.resize(size.width, size.height);
                }
            }
            _ => {}
        }
    }

    fn device_event(&mut self, _event_loop: &ActiveEventLoop, device_id: DeviceId, event: DeviceEvent) {
        if let Some(state) = &mut self.state {
            state.app.on_device_event(device_id, &event);
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.ctx.window.request_redraw();
        }
    }
}

impl<A: App + 'static> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));
        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let display = event_loop.display_handle()?.as_raw();
        let core = VulkanCoreBuilder::new()
            .app_name(&self.config.title)
            .validation(self.config.validation)
            .frames_in_flight(self.config.frames_in_flight)
            .with_display_handle(display)
            .build()
            .context("creating the Vulkan core")?;
        info!("GPU: {}", core.adapter_info().renderer);

        let mut ctx = AppContext::new(window, core, self.config.vsync)?;
        let app = A::init(&mut ctx)?;

        Ok(AppState {
            ctx,
            app,
            target_frame_time: self.config.target_frame_time(),
            min_fps: f64::MAX,
            max_fps: 0.0,
            fps_sum: 0.0,
        })
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(mut state) = self.state.take() {
            state.cleanup();
        }
        event_loop.exit();
    }
}

impl<A: App> AppState<A> {
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn render_frame(&mut self) -> anyhow::Result<()> {
        let frame_start = Instant::now();

        let dt = {
            let now = Instant::now();
            let dt = now.duration_since(self.ctx.last_frame_time).as_secs_f32();
            self.ctx.last_frame_time = now;
            if dt > 0.0 {
                let fps = 1.0 / f64::from(dt);
                self.min_fps = self.min_fps.min(fps);
                self.max_fps = self.max_fps.max(fps);
                self.fps_sum += fps;
            }
            dt
        };

        self.app.update(&self.ctx, dt);

        let image_index = match self.ctx.binding.acquire_next_image(&mut self.ctx.core)? {
            AcquireOutcome::Acquired { image_index } => image_index,
            AcquireOutcome::OutOfDate => return self.handle_resize(),
        };

        let frame_index = self.ctx.binding.current_frame_index();
        let mut cmd = self.ctx.take_command_buffer(frame_index)?;
        let submitted = self.record_and_submit(&mut cmd, image_index, frame_index, dt);
        self.ctx.restore_command_buffer(frame_index, cmd)?;
        submitted?;

        {
            #[cfg(feature = "profiling-tracy")]
            let _span = tracing::trace_span!("frame.present").entered();
            if !self.ctx.binding.present_swapchain(&mut self.ctx.core)? {
                debug!("Swapchain stale after present");
            }
        }
        self.ctx.frame_count += 1;

        if let Some(target) = self.target_frame_time {
            let elapsed = frame_start.elapsed();
            if elapsed < target {
                thread::sleep(target - elapsed);
            }
        }
        Ok(())
    }

    fn record_and_submit(
        &mut self,
        cmd: &mut cinder_rhi::CommandBuffer,
        image_index: u32,
        frame_index: usize,
        dt: f32,
    ) -> anyhow::Result<()> {
        {
            #[cfg(feature = "profiling-tracy")]
            let _span = tracing::trace_span!("frame.record").entered();
            cmd.begin()?;
            let mut frame = FrameContext {
                command_buffer: &mut *cmd,
                image_index,
                frame_index,
                framebuffer: self.ctx.binding.current_framebuffer(),
                render_pass: self.ctx.binding.render_pass(),
                extent: self.ctx.binding.extent(),
                dt,
                frame_number: self.ctx.frame_count,
            };
            self.app.render(&mut self.ctx, &mut frame)?;
            cmd.end()?;
        }

        #[cfg(feature = "profiling-tracy")]
        let _span = tracing::trace_span!("frame.submit").entered();
        self.ctx
            .binding
            .submit_command_buffer_for_current_frame(&mut self.ctx.core, cmd)?;
        Ok(())
    }

    /// The swapchain was rebuilt; pass its new extent on to the app.
    fn handle_resize(&mut self) -> anyhow::Result<()> {
        let (width, height) = self.ctx.binding.extent();
        if width == 0 || height == 0 {
            return Ok(());
        }
        self.app.on_resize(&mut self.ctx, width, height)?;
        info!("Resized to {width}x{height}");
        Ok(())
    }

    fn cleanup(&mut self) {
        if self.ctx.frame_count > 0 {
            let avg_fps = self.fps_sum / self.ctx.frame_count as f64;
            info!("FPS Statistics:");
            info!("  Min: {:.1}", self.min_fps);
            info!("  Max: {:.1}", self.max_fps);
            info!("  Avg: {avg_fps:.1}");
            info!("  Total frames: {}", self.ctx.frame_count);
        }

        info!("Starting cleanup...");
        if let Err(e) = self.ctx.core.wait_until_idle() {
            error!("Failed to wait idle: {e}");
        }
        self.app.cleanup(&mut self.ctx);
        if let Err(e) = self.ctx.cleanup() {
            error!("Failed to destroy the swapchain: {e:#}");
        }
        info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builders_override_defaults() {
        let config = AppConfig::new("Test")
            .with_size(800, 600)
            .with_vsync(false)
            .with_frames_in_flight(2)
            .with_target_fps(60);
        assert_eq!(config.title, "Test");
        assert_eq!((config.width, config.height), (800, 600));
        assert!(!config.vsync);
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.target_frame_time(), Some(Duration::from_nanos(16_666_666)));
    }

    #[test]
    fn zero_fps_target_is_uncapped() {
        let config = AppConfig {
            target_fps: Some(0),
            ..AppConfig::default()
        };
        assert_eq!(config.target_frame_time(), None);
    }

    #[test]
    fn default_config_uses_standard_frames_in_flight() {
        assert_eq!(AppConfig::default().frames_in_flight, DEFAULT_MAX_FRAMES_IN_FLIGHT);
    }
}

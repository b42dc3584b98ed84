//! The viewer application.

use cinder_app::{App, AppContext, Camera, FrameContext, WindowEvent};
use cinder_deferred::{DeferredRenderer, FrameInput, PipelineLibrary, RendererConfig};
use cinder_rhi::{RenderPassHandle, WindowGraphicsBinding};
use glam::Vec3;
use hecs::World;
use tracing::{error, info};
use winit::event::{ElementState, KeyEvent, MouseScrollDelta};
use winit::keyboard::{Key, NamedKey};

use crate::geometry::SceneGeometry;
use crate::scene::{animate, build_scene};
use crate::shaders::ShaderDirectory;

const ORBIT_CENTER: Vec3 = Vec3::new(0.0, 1.0, 0.0);
const MIN_RADIUS: f32 = 3.0;
const MAX_RADIUS: f32 = 40.0;

/// Camera circling the scene center.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Orbit {
    pub yaw: f32,
    pub pitch: f32,
    pub radius: f32,
    /// Radians per second.
    pub speed: f32,
    pub paused: bool,
}

impl Default for Orbit {
    fn default() -> Self {
        Self {
            yaw: 0.6,
            pitch: 0.45,
            radius: 11.0,
            speed: 0.15,
            paused: false,
        }
    }
}

impl Orbit {
    pub fn advance(&mut self, dt: f32) {
        if !self.paused {
            self.yaw = (self.yaw + self.speed * dt).rem_euclid(std::f32::consts::TAU);
        }
    }

    /// Move closer for positive `steps`.
    pub fn zoom(&mut self, steps: f32) {
        self.radius = (self.radius * 0.9_f32.powf(steps)).clamp(MIN_RADIUS, MAX_RADIUS);
    }

    pub fn apply(&self, camera: &mut Camera) {
        camera.orbit(ORBIT_CENTER, self.radius, self.yaw, self.pitch);
    }
}

pub struct Viewer {
    renderer: DeferredRenderer,
    library: PipelineLibrary,
    output_pass: RenderPassHandle,
    shaders: ShaderDirectory,
    geometry: SceneGeometry,
    world: World,
    camera: Camera,
    orbit: Orbit,
    time: f32,
}

impl Viewer {
    fn cycle_render_mode(&mut self) {
        let next = self.renderer.render_mode().next();
        self.renderer.set_render_mode(next);
    }

    /// Rebuild the standard pipelines if the swapchain's pass changed.
    fn sync_output_pass(&mut self, ctx: &mut AppContext) -> anyhow::Result<()> {
        let output_pass = ctx.binding.render_pass();
        if output_pass == self.output_pass {
            return Ok(());
        }
        info!("Output render pass changed; rebuilding pipelines");
        self.library.destroy(&mut ctx.core)?;
        self.library = self
            .renderer
            .build_pipelines(&mut ctx.core, output_pass, |address, stage| self.shaders.load(address, stage))?;
        self.output_pass = output_pass;
        Ok(())
    }
}

impl App for Viewer {
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
        let (width, height) = ctx.extent();
        let frames_in_flight = ctx.frames_in_flight();
        let renderer = DeferredRenderer::new(
            &mut ctx.core,
            RendererConfig::new(width, height).with_frames_in_flight(frames_in_flight),
        )?;

        let shaders = ShaderDirectory::from_env();
        info!("Loading shaders from {}", shaders.root().display());
        let output_pass = ctx.binding.render_pass();
        let library = renderer.build_pipelines(&mut ctx.core, output_pass, |address, stage| {
            shaders.load(address, stage)
        })?;
        let geometry = SceneGeometry::new(&mut ctx.core, &renderer, frames_in_flight, |address, stage| {
            shaders.load(address, stage)
        })?;

        let world = build_scene();
        let mut camera = Camera::default();
        camera.set_viewport(width, height);
        let orbit = Orbit::default();
        orbit.apply(&mut camera);

        info!("Press M to cycle render modes, Space to pause the orbit, scroll to zoom");
        Ok(Self {
            renderer,
            library,
            output_pass,
            shaders,
            geometry,
            world,
            camera,
            orbit,
            time: 0.0,
        })
    }

    fn update(&mut self, _ctx: &AppContext, dt: f32) {
        self.time += dt;
        self.orbit.advance(dt);
        self.orbit.apply(&mut self.camera);
        animate(&mut self.world, dt);
    }

    fn render(&mut self, ctx: &mut AppContext, frame: &mut FrameContext<'_>) -> anyhow::Result<()> {
        self.geometry.prepare(&mut ctx.core, &self.world, frame.frame_index)?;
        let input = FrameInput {
            projection: self.camera.projection_matrix(),
            view: self.camera.view_matrix(),
            eye: self.camera.position,
            time: self.time,
            frame_index: frame.frame_index,
            output_framebuffer: frame.framebuffer,
            output_render_pass: frame.render_pass,
        };
        self.renderer.render(
            &mut ctx.core,
            frame.command_buffer,
            &self.world,
            &input,
            &self.library,
            &mut self.geometry,
        )?;
        if frame.frame_number == 0 {
            info!("First frame drew {} instances", self.geometry.instance_count());
        }
        Ok(())
    }

    fn on_resize(&mut self, ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        self.sync_output_pass(ctx)?;
        self.renderer.resize(&mut ctx.core, width, height)?;
        self.camera.set_viewport(width, height);
        Ok(())
    }

    fn on_event(&mut self, _ctx: &mut AppContext, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key,
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => match logical_key {
                Key::Character(c) if c.eq_ignore_ascii_case("m") => {
                    self.cycle_render_mode();
                    true
                }
                Key::Named(NamedKey::Space) => {
                    self.orbit.paused = !self.orbit.paused;
                    true
                }
                _ => false,
            },
            WindowEvent::MouseWheel { delta, .. } => {
                let steps = match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(position) => position.y as f32 / 40.0,
                };
                self.orbit.zoom(steps);
                true
            }
            _ => false,
        }
    }

    fn cleanup(&mut self, ctx: &mut AppContext) {
        let core = &mut ctx.core;
        let results = [
            self.library.destroy(core),
            self.geometry.destroy(core),
            self.renderer.destroy(core),
        ];
        for result in results {
            if let Err(e) = result {
                error!("Cleanup failed: {e}");
            }
        }
        info!("Final render mode: {}", self.renderer.render_mode());
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn orbit_wraps_yaw() {
        let mut orbit = Orbit {
            yaw: 6.0,
            speed: 1.0,
            ..Orbit::default()
        };
        orbit.advance(1.0);
        assert_relative_eq!(orbit.yaw, 7.0 - std::f32::consts::TAU, epsilon = 1e-5);
    }

    #[test]
    fn paused_orbit_holds_still() {
        let mut orbit = Orbit {
            paused: true,
            ..Orbit::default()
        };
        let before = orbit;
        orbit.advance(10.0);
        assert_eq!(orbit, before);
    }

    #[test]
    fn zoom_is_clamped() {
        let mut orbit = Orbit::default();
        orbit.zoom(100.0);
        assert_relative_eq!(orbit.radius, MIN_RADIUS);
        orbit.zoom(-100.0);
        assert_relative_eq!(orbit.radius, MAX_RADIUS);
    }

    #[test]
    fn applied_orbit_keeps_radius() {
        let orbit = Orbit::default();
        let mut camera = Camera::default();
        orbit.apply(&mut camera);
        assert_relative_eq!(camera.position.distance(ORBIT_CENTER), orbit.radius, epsilon = 1e-4);
    }
}

//! The OpenGL implementation of [`Core`].

use std::collections::HashSet;

use cinder_rhi::format::subresource_regions;
use cinder_rhi::{
    AdapterInfo, Binding, BufferCreateInfo, BufferDesc, BufferHandle, CommandBuffer,
    ComputePipelineCreateInfo, ComputePipelineDesc, ComputePipelineHandle, Core,
    DescriptorSetCreateInfo, DescriptorSetDesc, DescriptorSetHandle,
    DescriptorSetLayoutCreateInfo, DescriptorSetLayoutDesc, DescriptorSetLayoutHandle,
    FramebufferCreateInfo, FramebufferDesc, FramebufferHandle, GraphicsApi,
    GraphicsPipelineCreateInfo, GraphicsPipelineDesc, GraphicsPipelineHandle, ImageCreateInfo,
    ImageDesc, ImageHandle, RenderPassCreateInfo, RenderPassDesc, RenderPassHandle,
    ResourceRegistry, Result, RhiError, SamplerCreateInfo, SamplerDesc, SamplerHandle,
    VertexArrayCreateInfo, VertexArrayDesc, VertexArrayHandle, DEFAULT_MAX_FRAMES_IN_FLIGHT,
};
use glam::Mat4;
use glow::HasContext;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use crate::error::GlError;
use crate::natives::{
    native, native_mut, GlBuffer, GlFramebuffer, GlGraphicsPipeline, GlRenderPass, GlTexture,
    NativeObjects,
};
use crate::program::{apply_vertex_formats, link_program};
use crate::replay::{upload_regions, BlitTargets, Replayer};
use crate::surface::GlSurface;
use crate::translate::{
    buffer_usage_hint, depth_attachment_point, mag_filter_to_gl, min_filter_to_gl,
    render_pass_clear_mask, texel_layout, texture_target, wrap_to_gl,
};

/// Driver messages that only report buffer placement or shader recompiles.
const IGNORED_DEBUG_IDS: [u32; 4] = [131_169, 131_185, 131_218, 131_204];

const MAX_ANISOTROPY: f32 = 16.0;

/// Context requirements and debug switches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlConfig {
    /// Route `KHR_debug` output to tracing and label objects.
    pub debug: bool,
    pub frames_in_flight: usize,
    /// Lowest acceptable `(major, minor)` version. Compute needs 4.3.
    pub min_version: (u32, u32),
}

impl Default for GlConfig {
    fn default() -> Self {
        Self {
            debug: cfg!(debug_assertions),
            frames_in_flight: DEFAULT_MAX_FRAMES_IN_FLIGHT,
            min_version: (4, 3),
        }
    }
}

impl GlConfig {
    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub const fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }
}

/// Whether a reported `(major, minor)` version satisfies `required`.
pub const fn version_satisfies(found: (u32, u32), required: (u32, u32)) -> bool {
    found.0 > required.0 || (found.0 == required.0 && found.1 >= required.1)
}

/// A GL context plus GL objects mirroring every registry resource.
pub struct GlCore {
    registry: ResourceRegistry,
    natives: NativeObjects,
    adapter: AdapterInfo,
    config: GlConfig,
    debug_output: bool,
    max_anisotropy: Option<f32>,
    blit: BlitTargets,
    gl: glow::Context,
}

impl GlCore {
    /// Load GL through `surface` and set up default state.
    pub fn new(config: GlConfig, surface: &impl GlSurface) -> Result<Self> {
        surface.make_current().map_err(GlError::Surface)?;
        // SAFETY: the surface's context was just made current on this thread.
        let mut gl = unsafe { glow::Context::from_loader_function(|symbol| surface.get_proc_address(symbol)) };

        let version = gl.version();
        let found = (version.major, version.minor);
        if version.is_embedded || !version_satisfies(found, config.min_version) {
            return Err(GlError::Version {
                required: format!("{}.{}", config.min_version.0, config.min_version.1),
                found: format!(
                    "{}.{}{}",
                    found.0,
                    found.1,
                    if version.is_embedded { " ES" } else { "" }
                ),
            }
            .into());
        }

        // SAFETY: the context is current; only queries and global state follow.
        let (adapter, extensions) = unsafe {
            let adapter = AdapterInfo {
                vendor: gl.get_parameter_string(glow::VENDOR),
                renderer: gl.get_parameter_string(glow::RENDERER),
                api_version: gl.get_parameter_string(glow::VERSION),
            };
            (adapter, gl.supported_extensions().clone())
        };
        info!(
            "OpenGL {} on {} ({})",
            adapter.api_version, adapter.renderer, adapter.vendor
        );

        let debug_output = config.debug && gl.supports_debug();
        // SAFETY: as above.
        let (max_anisotropy, blit) = unsafe {
            if debug_output {
                install_debug_callback(&mut gl);
            }
            gl.enable(glow::TEXTURE_CUBE_MAP_SEAMLESS);
            gl.enable(glow::FRAMEBUFFER_SRGB);
            gl.depth_func(glow::LEQUAL);
            gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);

            let max_anisotropy = anisotropy_supported(&extensions)
                .then(|| gl.get_parameter_f32(glow::MAX_TEXTURE_MAX_ANISOTROPY_EXT));
            let blit = BlitTargets {
                read: gl.create_framebuffer().map_err(GlError::ObjectCreation)?,
                draw: gl.create_framebuffer().map_err(GlError::ObjectCreation)?,
            };
            (max_anisotropy, blit)
        };

        Ok(Self {
            registry: ResourceRegistry::new(),
            natives: NativeObjects::default(),
            adapter,
            config,
            debug_output,
            max_anisotropy,
            blit,
            gl,
        })
    }

    pub const fn gl(&self) -> &glow::Context {
        &self.gl
    }

    pub const fn config(&self) -> &GlConfig {
        &self.config
    }

    /// Validate `cmd` and execute it on the context.
    pub fn submit(&mut self, cmd: &mut CommandBuffer) -> Result<()> {
        cmd.mark_pending()?;
        let result = cinder_rhi::validate_command_buffer(&self.registry, cmd).and_then(|_| {
            let mut replayer = Replayer::new(
                &self.gl,
                &self.registry,
                &self.natives,
                &self.blit,
                self.debug_output,
            );
            // SAFETY: the context is current and the command buffer validated
            // against the registry every native object mirrors.
            unsafe { replayer.replay(cmd.commands()) }.map_err(RhiError::from)
        });
        cmd.mark_complete();
        result
    }

    /// Register the default framebuffer's color buffer as an image.
    pub(crate) fn insert_default_framebuffer_image(&mut self, desc: ImageDesc) -> ImageHandle {
        let internal_format = texel_layout(desc.format).internal_format();
        let handle = self.registry.insert_image(desc);
        self.natives.textures.insert(
            handle,
            GlTexture {
                texture: None,
                target: glow::TEXTURE_2D,
                internal_format,
            },
        );
        handle
    }

    pub(crate) fn create_presenting_render_pass(
        &mut self,
        info: &RenderPassCreateInfo<'_>,
    ) -> Result<RenderPassHandle> {
        let handle = self.create_render_pass(info)?;
        self.registry.render_pass_mut(handle)?.presents = true;
        Ok(handle)
    }

    /// Update the extent of default-framebuffer resources without touching GL.
    pub(crate) fn resize_default_framebuffer(
        &mut self,
        image: ImageHandle,
        framebuffer: FramebufferHandle,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let desc = self.registry.image_mut(image)?;
        *desc = desc.resized(width, height);
        let fb = self.registry.framebuffer_mut(framebuffer)?;
        fb.width = width;
        fb.height = height;
        Ok(())
    }

    fn label(&self, identifier: u32, name: u32, label: &str) {
        if self.debug_output {
            // SAFETY: `name` is a live object of kind `identifier`.
            unsafe { self.gl.object_label(identifier, name, Some(label)) };
        }
    }

    fn allocate_texture(&self, desc: &ImageDesc) -> Result<GlTexture> {
        let gl = &self.gl;
        let target = texture_target(desc);
        let internal_format = texel_layout(desc.format).internal_format();
        let levels = desc.mip_levels as i32;
        let (width, height) = (desc.width as i32, desc.height as i32);

        // SAFETY: the context is current; the texture is fresh.
        let texture = unsafe {
            let texture = gl.create_texture().map_err(GlError::ObjectCreation)?;
            gl.bind_texture(target, Some(texture));
            match target {
                glow::TEXTURE_2D | glow::TEXTURE_CUBE_MAP => {
                    gl.tex_storage_2d(target, levels, internal_format, width, height);
                }
                glow::TEXTURE_3D => {
                    gl.tex_storage_3d(target, levels, internal_format, width, height, desc.depth as i32);
                }
                _ => gl.tex_storage_3d(
                    target,
                    levels,
                    internal_format,
                    width,
                    height,
                    desc.array_layers as i32,
                ),
            }
            gl.tex_parameter_i32(target, glow::TEXTURE_BASE_LEVEL, 0);
            gl.tex_parameter_i32(target, glow::TEXTURE_MAX_LEVEL, levels - 1);
            gl.bind_texture(target, None);
            texture
        };
        self.label(glow::TEXTURE, texture.0.get(), &desc.debug_name);
        Ok(GlTexture {
            texture: Some(texture),
            target,
            internal_format,
        })
    }

    fn build_framebuffer(&self, desc: &FramebufferDesc) -> Result<GlFramebuffer> {
        let gl = &self.gl;
        let colors = desc
            .color_attachments
            .iter()
            .map(|&image| native(&self.natives.textures, image))
            .collect::<crate::error::Result<Vec<_>>>()?;
        let depth = match desc.depth_attachment {
            Some(image) => Some((
                self.registry.image(image)?.format,
                native(&self.natives.textures, image)?,
            )),
            None => None,
        };

        let uses_default = colors
            .iter()
            .copied()
            .chain(depth.map(|(_, texture)| texture))
            .any(|texture| texture.texture.is_none());
        if uses_default {
            return Ok(GlFramebuffer {
                framebuffer: None,
                color_count: colors.len(),
            });
        }

        // SAFETY: the context is current and every attachment texture is live.
        unsafe {
            let framebuffer = gl.create_framebuffer().map_err(GlError::ObjectCreation)?;
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(framebuffer));
            let mut draw_buffers = Vec::with_capacity(colors.len());
            for (index, texture) in (0u32..).zip(&colors) {
                attach(gl, glow::COLOR_ATTACHMENT0 + index, texture);
                draw_buffers.push(glow::COLOR_ATTACHMENT0 + index);
            }
            if let Some((format, texture)) = depth {
                attach(gl, depth_attachment_point(format), texture);
            }
            if draw_buffers.is_empty() {
                gl.draw_buffer(glow::NONE);
                gl.read_buffer(glow::NONE);
            } else {
                gl.draw_buffers(&draw_buffers);
            }

            let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            if status != glow::FRAMEBUFFER_COMPLETE {
                gl.delete_framebuffer(framebuffer);
                return Err(GlError::IncompleteFramebuffer {
                    name: desc.debug_name.clone(),
                    status,
                }
                .into());
            }
            self.label(glow::FRAMEBUFFER, framebuffer.0.get(), &desc.debug_name);
            Ok(GlFramebuffer {
                framebuffer: Some(framebuffer),
                color_count: colors.len(),
            })
        }
    }

    fn check_image_data(desc: &ImageDesc, data: &[u8]) -> Result<u64> {
        let needed = desc.upload_size();
        if (data.len() as u64) < needed {
            return Err(RhiError::UploadOutOfRange(format!(
                "'{}' needs {needed} bytes, got {}",
                desc.debug_name,
                data.len()
            )));
        }
        Ok(needed)
    }

    fn check_set_layouts(&self, layouts: &[DescriptorSetLayoutHandle]) -> Result<()> {
        for layout in layouts {
            self.registry.set_layout(*layout)?;
        }
        Ok(())
    }
}

/// Attach a whole texture mip 0, layered when the target has layers.
unsafe fn attach(gl: &glow::Context, attachment: u32, texture: &GlTexture) {
    if texture.target == glow::TEXTURE_2D {
        gl.framebuffer_texture_2d(glow::FRAMEBUFFER, attachment, glow::TEXTURE_2D, texture.texture, 0);
    } else {
        gl.framebuffer_texture(glow::FRAMEBUFFER, attachment, texture.texture, 0);
    }
}

fn anisotropy_supported(extensions: &HashSet<String>) -> bool {
    extensions.contains("GL_EXT_texture_filter_anisotropic")
        || extensions.contains("GL_ARB_texture_filter_anisotropic")
}

unsafe fn install_debug_callback(gl: &mut glow::Context) {
    gl.enable(glow::DEBUG_OUTPUT);
    gl.enable(glow::DEBUG_OUTPUT_SYNCHRONOUS);
    gl.debug_message_callback(|source, ty, id, severity, message| {
        if IGNORED_DEBUG_IDS.contains(&id) {
            return;
        }
        match severity {
            glow::DEBUG_SEVERITY_HIGH => {
                error!("GL [{source:#x}/{ty:#x}] {id}: {message}");
            }
            glow::DEBUG_SEVERITY_MEDIUM => {
                warn!("GL [{source:#x}/{ty:#x}] {id}: {message}");
            }
            glow::DEBUG_SEVERITY_LOW => debug!("GL {id}: {message}"),
            _ => trace!("GL {id}: {message}"),
        }
    });
    debug!("GL debug output enabled");
}

impl Core for GlCore {
    fn api(&self) -> GraphicsApi {
        GraphicsApi::OpenGl
    }

    fn adapter_info(&self) -> &AdapterInfo {
        &self.adapter
    }

    fn resources(&self) -> &ResourceRegistry {
        &self.registry
    }

    fn adjust_perspective(&self, _projection: &mut Mat4) {}

    fn create_buffer(&mut self, info: &BufferCreateInfo<'_>) -> Result<BufferHandle> {
        let desc = BufferDesc::from_info(info)?;
        let gl = &self.gl;
        // SAFETY: the context is current; the buffer is fresh.
        let buffer = unsafe {
            let buffer = gl.create_buffer().map_err(GlError::ObjectCreation)?;
            gl.bind_buffer(glow::COPY_WRITE_BUFFER, Some(buffer));
            gl.buffer_data_size(
                glow::COPY_WRITE_BUFFER,
                desc.size as i32,
                buffer_usage_hint(desc.memory),
            );
            if let Some(data) = info.initial_data {
                gl.buffer_sub_data_u8_slice(glow::COPY_WRITE_BUFFER, 0, data);
            }
            gl.bind_buffer(glow::COPY_WRITE_BUFFER, None);
            buffer
        };
        self.label(glow::BUFFER, buffer.0.get(), &desc.debug_name);

        let shadow = desc.memory.is_host_visible().then(|| {
            let mut bytes = vec![0; desc.size as usize];
            if let Some(data) = info.initial_data {
                bytes[..data.len()].copy_from_slice(data);
            }
            bytes
        });
        debug!("Created buffer '{}' ({} bytes)", desc.debug_name, desc.size);
        let handle = self.registry.insert_buffer(desc);
        self.natives.buffers.insert(handle, GlBuffer { buffer, shadow });
        Ok(handle)
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) -> Result<()> {
        self.registry.remove_buffer(buffer)?;
        if let Some(native) = self.natives.buffers.remove(buffer) {
            // SAFETY: GL defers the free until pending commands are done.
            unsafe { self.gl.delete_buffer(native.buffer) };
        }
        Ok(())
    }

    fn upload_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<()> {
        let desc = self.registry.buffer(buffer)?;
        let end = offset + data.len() as u64;
        if end > desc.size {
            return Err(RhiError::UploadOutOfRange(format!(
                "'{}': bytes {offset}..{end} of {}",
                desc.debug_name, desc.size
            )));
        }
        let native = native_mut(&mut self.natives.buffers, buffer)?;
        // SAFETY: the range was checked against the buffer size.
        unsafe {
            self.gl.bind_buffer(glow::COPY_WRITE_BUFFER, Some(native.buffer));
            self.gl
                .buffer_sub_data_u8_slice(glow::COPY_WRITE_BUFFER, offset as i32, data);
            self.gl.bind_buffer(glow::COPY_WRITE_BUFFER, None);
        }
        if let Some(shadow) = native.shadow.as_mut() {
            shadow[offset as usize..end as usize].copy_from_slice(data);
        }
        Ok(())
    }

    fn map_buffer(&mut self, buffer: BufferHandle) -> Result<&mut [u8]> {
        let desc = self.registry.buffer(buffer)?;
        let name = desc.debug_name.clone();
        native_mut(&mut self.natives.buffers, buffer)?
            .shadow
            .as_deref_mut()
            .ok_or_else(|| RhiError::Unsupported(format!("'{name}' is not host visible")))
    }

    fn unmap_buffer(&mut self, buffer: BufferHandle) -> Result<()> {
        self.registry.buffer(buffer)?;
        let native = native(&self.natives.buffers, buffer)?;
        if let Some(shadow) = &native.shadow {
            // SAFETY: the shadow is exactly as large as the buffer.
            unsafe {
                self.gl.bind_buffer(glow::COPY_WRITE_BUFFER, Some(native.buffer));
                self.gl.buffer_sub_data_u8_slice(glow::COPY_WRITE_BUFFER, 0, shadow);
                self.gl.bind_buffer(glow::COPY_WRITE_BUFFER, None);
            }
        }
        Ok(())
    }

    fn resize_buffer(&mut self, buffer: BufferHandle, size: u64) -> Result<()> {
        let desc = self.registry.buffer_mut(buffer)?;
        if size == 0 {
            return Err(RhiError::InvalidCreateInfo {
                name: desc.debug_name.clone(),
                reason: "size must be non-zero".into(),
            });
        }
        desc.size = size;
        let hint = buffer_usage_hint(desc.memory);
        let native = native_mut(&mut self.natives.buffers, buffer)?;
        // Respecifying the store keeps the buffer name, so bound sets stay valid.
        // SAFETY: the buffer is live.
        unsafe {
            self.gl.bind_buffer(glow::COPY_WRITE_BUFFER, Some(native.buffer));
            self.gl.buffer_data_size(glow::COPY_WRITE_BUFFER, size as i32, hint);
            self.gl.bind_buffer(glow::COPY_WRITE_BUFFER, None);
        }
        if let Some(shadow) = native.shadow.as_mut() {
            shadow.clear();
            shadow.resize(size as usize, 0);
        }
        Ok(())
    }

    fn create_image(&mut self, info: &ImageCreateInfo<'_>) -> Result<ImageHandle> {
        let desc = ImageDesc::from_info(info)?;
        if let Some(data) = info.initial_data {
            Self::check_image_data(&desc, data)?;
        }
        let texture = self.allocate_texture(&desc)?;
        debug!(
            "Created image '{}' {}x{} {:?}",
            desc.debug_name, desc.width, desc.height, desc.format
        );
        let handle = self.registry.insert_image(desc);
        self.natives.textures.insert(handle, texture);
        if let Some(data) = info.initial_data {
            self.upload_image(handle, data)?;
        }
        Ok(handle)
    }

    fn delete_image(&mut self, image: ImageHandle) -> Result<()> {
        self.registry.remove_image(image)?;
        if let Some(GlTexture {
            texture: Some(texture),
            ..
        }) = self.natives.textures.remove(image)
        {
            // SAFETY: GL defers the free until pending commands are done.
            unsafe { self.gl.delete_texture(texture) };
        }
        Ok(())
    }

    fn upload_image(&mut self, image: ImageHandle, data: &[u8]) -> Result<()> {
        let desc = self.registry.image(image)?;
        let needed = Self::check_image_data(desc, data)?;
        let texture = native(&self.natives.textures, image)?;
        let mips = if desc.generate_mipmaps { 1 } else { desc.mip_levels };
        let (regions, _) = subresource_regions(desc.format, desc.width, desc.height, mips, desc.array_layers);
        let gl = &self.gl;

        // SAFETY: the staging buffer holds every region, checked above.
        unsafe {
            let staging = gl.create_buffer().map_err(GlError::ObjectCreation)?;
            gl.bind_buffer(glow::PIXEL_UNPACK_BUFFER, Some(staging));
            gl.buffer_data_u8_slice(
                glow::PIXEL_UNPACK_BUFFER,
                &data[..needed as usize],
                glow::STREAM_DRAW,
            );
            let uploaded = upload_regions(gl, desc, texture, &regions);
            gl.bind_buffer(glow::PIXEL_UNPACK_BUFFER, None);
            gl.delete_buffer(staging);
            uploaded?;
        }
        trace!("Uploaded {} regions into '{}'", regions.len(), desc.debug_name);

        if desc.generate_mipmaps {
            self.generate_mipmaps(image)?;
        }
        Ok(())
    }

    fn resize_image(&mut self, image: ImageHandle, width: u32, height: u32) -> Result<()> {
        let desc = self.registry.image(image)?.resized(width, height);
        let texture = self.allocate_texture(&desc)?;
        if let Some(GlTexture {
            texture: Some(old), ..
        }) = self.natives.textures.insert(image, texture)
        {
            // SAFETY: GL defers the free until pending commands are done.
            unsafe { self.gl.delete_texture(old) };
        }
        *self.registry.image_mut(image)? = desc;
        Ok(())
    }

    fn generate_mipmaps(&mut self, image: ImageHandle) -> Result<()> {
        let desc = self.registry.image(image)?;
        if desc.format.is_compressed() {
            warn!("'{}' is block compressed, skipping mip generation", desc.debug_name);
            return Ok(());
        }
        let texture = native(&self.natives.textures, image)?;
        let raw = texture.texture.ok_or(GlError::MissingNative("texture"))?;
        // SAFETY: the texture is live.
        unsafe {
            self.gl.bind_texture(texture.target, Some(raw));
            self.gl.generate_mipmap(texture.target);
            self.gl.bind_texture(texture.target, None);
        }
        Ok(())
    }

    fn create_sampler(&mut self, info: &SamplerCreateInfo<'_>) -> Result<SamplerHandle> {
        let desc = SamplerDesc::from_info(info)?;
        let gl = &self.gl;
        let mipmapped = desc.max_lod > 0.0;
        // SAFETY: the sampler is fresh.
        let sampler = unsafe {
            let sampler = gl.create_sampler().map_err(GlError::ObjectCreation)?;
            let min = min_filter_to_gl(desc.min_filter, desc.mip_filter, mipmapped);
            gl.sampler_parameter_i32(sampler, glow::TEXTURE_MIN_FILTER, min as i32);
            gl.sampler_parameter_i32(
                sampler,
                glow::TEXTURE_MAG_FILTER,
                mag_filter_to_gl(desc.mag_filter) as i32,
            );
            gl.sampler_parameter_i32(sampler, glow::TEXTURE_WRAP_S, wrap_to_gl(desc.wrap_u) as i32);
            gl.sampler_parameter_i32(sampler, glow::TEXTURE_WRAP_T, wrap_to_gl(desc.wrap_v) as i32);
            gl.sampler_parameter_i32(sampler, glow::TEXTURE_WRAP_R, wrap_to_gl(desc.wrap_w) as i32);
            gl.sampler_parameter_f32(sampler, glow::TEXTURE_MIN_LOD, desc.min_lod);
            gl.sampler_parameter_f32(sampler, glow::TEXTURE_MAX_LOD, desc.max_lod);
            gl.sampler_parameter_f32(sampler, glow::TEXTURE_LOD_BIAS, desc.mip_lod_bias);
            if desc.max_anisotropy > 1.0 {
                if let Some(device_max) = self.max_anisotropy {
                    let level = desc.max_anisotropy.min(MAX_ANISOTROPY).min(device_max);
                    gl.sampler_parameter_f32(sampler, glow::TEXTURE_MAX_ANISOTROPY_EXT, level);
                }
            }
            sampler
        };
        self.label(glow::SAMPLER, sampler.0.get(), &desc.debug_name);
        let handle = self.registry.insert_sampler(desc);
        self.natives.samplers.insert(handle, sampler);
        Ok(handle)
    }

    fn delete_sampler(&mut self, sampler: SamplerHandle) -> Result<()> {
        self.registry.remove_sampler(sampler)?;
        if let Some(native) = self.natives.samplers.remove(sampler) {
            // SAFETY: GL defers the free until pending commands are done.
            unsafe { self.gl.delete_sampler(native) };
        }
        Ok(())
    }

    fn create_render_pass(&mut self, info: &RenderPassCreateInfo<'_>) -> Result<RenderPassHandle> {
        let desc = RenderPassDesc::from_info(info)?;
        let native = GlRenderPass {
            clear_mask: render_pass_clear_mask(&desc),
            color_clears: desc.color_attachments.iter().map(|a| a.should_clear).collect(),
            depth_clear: desc.depth_attachment.is_some_and(|d| d.should_clear),
        };
        let handle = self.registry.insert_render_pass(desc);
        self.natives.render_passes.insert(handle, native);
        Ok(handle)
    }

    fn delete_render_pass(&mut self, render_pass: RenderPassHandle) -> Result<()> {
        self.registry.remove_render_pass(render_pass)?;
        self.natives.render_passes.remove(render_pass);
        Ok(())
    }

    fn create_framebuffer(&mut self, info: &FramebufferCreateInfo<'_>) -> Result<FramebufferHandle> {
        let desc = FramebufferDesc::from_info(info)?;
        self.registry.check_framebuffer(&desc)?;
        let native = self.build_framebuffer(&desc)?;
        let handle = self.registry.insert_framebuffer(desc);
        self.natives.framebuffers.insert(handle, native);
        Ok(handle)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) -> Result<()> {
        self.registry.remove_framebuffer(framebuffer)?;
        if let Some(GlFramebuffer {
            framebuffer: Some(native),
            ..
        }) = self.natives.framebuffers.remove(framebuffer)
        {
            // SAFETY: the framebuffer is no longer referenced.
            unsafe { self.gl.delete_framebuffer(native) };
        }
        Ok(())
    }

    fn resize_framebuffer(&mut self, framebuffer: FramebufferHandle, width: u32, height: u32) -> Result<()> {
        let mut desc = self.registry.framebuffer(framebuffer)?.clone();
        desc.width = width;
        desc.height = height;
        self.registry.check_framebuffer(&desc)?;
        let native = self.build_framebuffer(&desc)?;
        if let Some(GlFramebuffer {
            framebuffer: Some(old),
            ..
        }) = self.natives.framebuffers.insert(framebuffer, native)
        {
            // SAFETY: the old framebuffer is no longer referenced.
            unsafe { self.gl.delete_framebuffer(old) };
        }
        *self.registry.framebuffer_mut(framebuffer)? = desc;
        Ok(())
    }

    fn create_descriptor_set_layout(
        &mut self,
        info: &DescriptorSetLayoutCreateInfo<'_>,
    ) -> Result<DescriptorSetLayoutHandle> {
        let desc = DescriptorSetLayoutDesc::from_info(info)?;
        Ok(self.registry.insert_set_layout(desc))
    }

    fn delete_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle) -> Result<()> {
        self.registry.remove_set_layout(layout).map(|_| ())
    }

    fn create_descriptor_set(&mut self, info: &DescriptorSetCreateInfo<'_>) -> Result<DescriptorSetHandle> {
        if info.debug_name.is_empty() {
            return Err(RhiError::MissingDebugName("descriptor set"));
        }
        let layout = self.registry.set_layout(info.layout)?;
        let mut desc = DescriptorSetDesc::new(info.debug_name, info.layout, layout);
        self.registry
            .check_binding_resources(info.debug_name, info.bindings, 0)?;
        desc.apply(info.bindings, 0)?;
        Ok(self.registry.insert_descriptor_set(desc))
    }

    fn delete_descriptor_set(&mut self, set: DescriptorSetHandle) -> Result<()> {
        self.registry.remove_descriptor_set(set).map(|_| ())
    }

    fn change_bindings(&mut self, set: DescriptorSetHandle, bindings: &[Binding], offset: usize) -> Result<()> {
        // Sets are resolved against the registry at bind time.
        self.registry
            .update_descriptor_set(set, bindings, offset)
            .map(|_| ())
    }

    fn create_graphics_pipeline(
        &mut self,
        info: &GraphicsPipelineCreateInfo<'_>,
    ) -> Result<GraphicsPipelineHandle> {
        let desc = GraphicsPipelineDesc::from_info(info)?;
        self.registry.render_pass(desc.render_pass)?;
        self.check_set_layouts(&desc.set_layouts)?;

        let gl = &self.gl;
        // SAFETY: the context is current; objects are fresh.
        let native = unsafe {
            let program = link_program(gl, &desc.debug_name, info.stages)?;
            let vertex_array = match gl.create_vertex_array() {
                Ok(vertex_array) => vertex_array,
                Err(e) => {
                    gl.delete_program(program);
                    return Err(GlError::ObjectCreation(e).into());
                }
            };
            gl.bind_vertex_array(Some(vertex_array));
            let strides = apply_vertex_formats(gl, &desc.debug_name, &desc.vertex_bindings);
            gl.bind_vertex_array(None);
            match strides {
                Ok(strides) => GlGraphicsPipeline {
                    program,
                    vertex_array,
                    strides,
                },
                Err(err) => {
                    gl.delete_vertex_array(vertex_array);
                    gl.delete_program(program);
                    return Err(err.into());
                }
            }
        };
        self.label(glow::PROGRAM, native.program.0.get(), &desc.debug_name);
        let handle = self.registry.insert_graphics_pipeline(desc);
        self.natives.graphics_pipelines.insert(handle, native);
        Ok(handle)
    }

    fn delete_graphics_pipeline(&mut self, pipeline: GraphicsPipelineHandle) -> Result<()> {
        self.registry.remove_graphics_pipeline(pipeline)?;
        if let Some(native) = self.natives.graphics_pipelines.remove(pipeline) {
            // SAFETY: GL defers the free until pending commands are done.
            unsafe {
                self.gl.delete_program(native.program);
                self.gl.delete_vertex_array(native.vertex_array);
            }
        }
        Ok(())
    }

    fn create_compute_pipeline(
        &mut self,
        info: &ComputePipelineCreateInfo<'_>,
    ) -> Result<ComputePipelineHandle> {
        let desc = ComputePipelineDesc::from_info(info)?;
        self.check_set_layouts(&desc.set_layouts)?;
        // SAFETY: the context is current.
        let program = unsafe { link_program(&self.gl, &desc.debug_name, &[info.stage])? };
        self.label(glow::PROGRAM, program.0.get(), &desc.debug_name);
        let handle = self.registry.insert_compute_pipeline(desc);
        self.natives.compute_pipelines.insert(handle, program);
        Ok(handle)
    }

    fn delete_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) -> Result<()> {
        self.registry.remove_compute_pipeline(pipeline)?;
        if let Some(program) = self.natives.compute_pipelines.remove(pipeline) {
            // SAFETY: GL defers the free until pending commands are done.
            unsafe { self.gl.delete_program(program) };
        }
        Ok(())
    }

    fn create_vertex_array(&mut self, info: &VertexArrayCreateInfo<'_>) -> Result<VertexArrayHandle> {
        let desc = VertexArrayDesc::from_info(info)?;
        let buffers = desc
            .vertex_buffers
            .iter()
            .map(|&buffer| {
                self.registry.buffer(buffer)?;
                Ok(native(&self.natives.buffers, buffer)?.buffer)
            })
            .collect::<Result<Vec<_>>>()?;
        let index_buffer = match desc.index_buffer {
            Some(buffer) => {
                self.registry.buffer(buffer)?;
                Some(native(&self.natives.buffers, buffer)?.buffer)
            }
            None => None,
        };

        let gl = &self.gl;
        // SAFETY: the context is current and every buffer is live.
        let vertex_array = unsafe {
            let vertex_array = gl.create_vertex_array().map_err(GlError::ObjectCreation)?;
            gl.bind_vertex_array(Some(vertex_array));
            let formats = apply_vertex_formats(gl, &desc.debug_name, &desc.layouts).map(|strides| {
                for ((binding, buffer), stride) in (0u32..).zip(&buffers).zip(strides) {
                    gl.bind_vertex_buffer(binding, Some(*buffer), 0, stride);
                }
                if index_buffer.is_some() {
                    gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, index_buffer);
                }
            });
            gl.bind_vertex_array(None);
            gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, None);
            if let Err(err) = formats {
                gl.delete_vertex_array(vertex_array);
                return Err(err.into());
            }
            vertex_array
        };
        self.label(glow::VERTEX_ARRAY, vertex_array.0.get(), &desc.debug_name);
        let handle = self.registry.insert_vertex_array(desc);
        self.natives.vertex_arrays.insert(handle, vertex_array);
        Ok(handle)
    }

    fn delete_vertex_array(&mut self, vertex_array: VertexArrayHandle) -> Result<()> {
        self.registry.remove_vertex_array(vertex_array)?;
        if let Some(native) = self.natives.vertex_arrays.remove(vertex_array) {
            // SAFETY: GL defers the free until pending commands are done.
            unsafe { self.gl.delete_vertex_array(native) };
        }
        Ok(())
    }

    fn execute_immediate(&mut self, cmd: &mut CommandBuffer) -> Result<()> {
        self.submit(cmd)?;
        self.wait_until_idle()
    }

    fn wait_until_idle(&mut self) -> Result<()> {
        // SAFETY: the context is current.
        unsafe { self.gl.finish() };
        Ok(())
    }
}

impl Drop for GlCore {
    fn drop(&mut self) {
        // SAFETY: the context is still current; nothing references these objects.
        unsafe {
            self.gl.finish();
            self.natives.destroy_all(&self.gl);
            self.gl.delete_framebuffer(self.blit.read);
            self.gl.delete_framebuffer(self.blit.draw);
        }
        debug!("GL core destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_compare_major_first() {
        assert!(version_satisfies((4, 6), (4, 3)));
        assert!(version_satisfies((4, 3), (4, 3)));
        assert!(!version_satisfies((4, 1), (4, 3)));
        assert!(version_satisfies((5, 0), (4, 3)));
        assert!(!version_satisfies((3, 3), (4, 3)));
    }

    #[test]
    fn config_defaults_to_compute_capable_contexts() {
        let config = GlConfig::default();
        assert_eq!(config.min_version, (4, 3));
        assert_eq!(config.frames_in_flight, DEFAULT_MAX_FRAMES_IN_FLIGHT);
        assert!(!config.with_debug(false).debug);
    }

    #[test]
    fn anisotropy_is_detected_from_either_extension() {
        let mut extensions = HashSet::new();
        assert!(!anisotropy_supported(&extensions));
        extensions.insert("GL_ARB_texture_filter_anisotropic".to_owned());
        assert!(anisotropy_supported(&extensions));
    }
}

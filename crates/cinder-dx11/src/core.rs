//! The Direct3D 11 implementation of [`Core`].

use std::ffi::c_void;
use std::time::{Duration, Instant};

use cinder_rhi::format::subresource_regions;
use cinder_rhi::{
    AdapterInfo, Binding, BufferCreateInfo, BufferDesc, BufferHandle, BufferUsage, CommandBuffer,
    ComputePipelineCreateInfo, ComputePipelineDesc, ComputePipelineHandle, Core,
    DescriptorSetCreateInfo, DescriptorSetDesc, DescriptorSetHandle,
    DescriptorSetLayoutCreateInfo, DescriptorSetLayoutDesc, DescriptorSetLayoutHandle,
    FramebufferCreateInfo, FramebufferDesc, FramebufferHandle, GraphicsApi,
    GraphicsPipelineCreateInfo, GraphicsPipelineDesc, GraphicsPipelineHandle, ImageCreateInfo,
    ImageDesc, ImageHandle, ImageUsage, MemoryUsage, RenderPassCreateInfo, RenderPassDesc,
    RenderPassHandle, ResourceRegistry, Result, RhiError, SamplerCreateInfo, SamplerDesc,
    SamplerHandle, ShaderStages, VertexArrayCreateInfo, VertexArrayDesc, VertexArrayHandle,
    VertexInputRate, DEFAULT_MAX_FRAMES_IN_FLIGHT,
};
use glam::Mat4;
use tracing::{debug, info, trace, warn};
use windows::core::{Interface, PCSTR};
use windows::Win32::Foundation::{BOOL, E_INVALIDARG, HMODULE};
use windows::Win32::Graphics::Direct3D::{
    D3D_DRIVER_TYPE_HARDWARE, D3D_FEATURE_LEVEL, D3D_FEATURE_LEVEL_11_0, D3D_FEATURE_LEVEL_11_1,
};
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDevice, ID3D11Buffer, ID3D11ClassLinkage, ID3D11Device, ID3D11DeviceContext, ID3D11InfoQueue,
    ID3D11Query, ID3D11Resource, ID3D11Texture2D, ID3D11Texture3D, ID3DUserDefinedAnnotation,
    D3D11_BLEND_DESC, D3D11_BOX, D3D11_BUFFER_DESC, D3D11_BUFFER_UAV, D3D11_BUFFER_UAV_FLAG_RAW,
    D3D11_COMPARISON_NEVER, D3D11_CPU_ACCESS_READ, D3D11_CREATE_DEVICE_BGRA_SUPPORT,
    D3D11_CREATE_DEVICE_DEBUG, D3D11_CREATE_DEVICE_FLAG, D3D11_DEPTH_STENCIL_DESC,
    D3D11_DEPTH_WRITE_MASK_ALL, D3D11_DEPTH_WRITE_MASK_ZERO, D3D11_INPUT_ELEMENT_DESC,
    D3D11_INPUT_PER_INSTANCE_DATA, D3D11_INPUT_PER_VERTEX_DATA, D3D11_MAPPED_SUBRESOURCE,
    D3D11_MAP_READ, D3D11_MAP_WRITE_DISCARD, D3D11_QUERY_DESC, D3D11_QUERY_EVENT,
    D3D11_RASTERIZER_DESC, D3D11_RENDER_TARGET_BLEND_DESC, D3D11_RESOURCE_MISC_BUFFER_ALLOW_RAW_VIEWS,
    D3D11_RESOURCE_MISC_GENERATE_MIPS, D3D11_RESOURCE_MISC_TEXTURECUBE,
    D3D11_SAMPLER_DESC, D3D11_SDK_VERSION, D3D11_SUBRESOURCE_DATA, D3D11_TEXTURE2D_DESC,
    D3D11_TEXTURE3D_DESC, D3D11_UAV_DIMENSION_BUFFER, D3D11_UNORDERED_ACCESS_VIEW_DESC,
    D3D11_UNORDERED_ACCESS_VIEW_DESC_0, D3D11_USAGE_DEFAULT, D3D11_USAGE_STAGING,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_R32_TYPELESS, DXGI_SAMPLE_DESC};
use windows::Win32::Graphics::Dxgi::{
    IDXGIAdapter, IDXGIDevice, IDXGIFactory2, DXGI_ERROR_SDK_COMPONENT_MISSING,
};

use crate::adapter::{adapter_info, feature_level_version};
use crate::clip::gl_to_d3d_depth;
use crate::debug::{drain_messages, set_debug_name};
use crate::error::Dx11Error;
use crate::natives::{
    native, native_mut, Dx11Buffer, Dx11ComputePipeline, Dx11Framebuffer, Dx11GraphicsPipeline,
    Dx11Image, Dx11RenderPass, NativeObjects,
};
use crate::registers::RegisterMap;
use crate::replay::Replayer;
use crate::shader::{check_dxbc, ATTRIBUTE_SEMANTIC};
use crate::subresource::{
    depth_pitch, padded_buffer_size, row_pitch, subresource_index, ViewShape,
};
use crate::translate::{
    address_mode, blend_factor, blend_op, buffer_bind_flags, buffer_usage, comparison, cull_mode,
    fill_mode, format_to_dxgi, image_bind_flags, is_dynamic_buffer, sampler_filter,
    texture_formats, topology,
};
use crate::views;

const MAX_ANISOTROPY: f32 = 16.0;
/// Polling interval after which a stalled GPU wait is reported.
const STALL_WARNING: Duration = Duration::from_secs(1);

/// Configures and creates a [`Dx11Core`].
pub struct Dx11CoreBuilder {
    debug_layer: bool,
    debug_names: bool,
    frames_in_flight: usize,
}

impl Default for Dx11CoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Dx11CoreBuilder {
    pub fn new() -> Self {
        Self {
            debug_layer: cfg!(debug_assertions),
            debug_names: cfg!(debug_assertions),
            frames_in_flight: DEFAULT_MAX_FRAMES_IN_FLIGHT,
        }
    }

    /// Create the device with the D3D11 debug layer and log its messages.
    #[must_use]
    pub const fn debug_layer(mut self, enable: bool) -> Self {
        self.debug_layer = enable;
        self
    }

    /// Name native objects and emit debug label events.
    #[must_use]
    pub const fn debug_names(mut self, enable: bool) -> Self {
        self.debug_names = enable;
        self
    }

    #[must_use]
    pub const fn frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    pub fn build(self) -> Result<Dx11Core> {
        let mut flags = D3D11_CREATE_DEVICE_BGRA_SUPPORT.0;
        if self.debug_layer {
            flags |= D3D11_CREATE_DEVICE_DEBUG.0;
        }
        let (device, context, level) = match create_device(D3D11_CREATE_DEVICE_FLAG(flags)) {
            Err(e) if self.debug_layer && e.code() == DXGI_ERROR_SDK_COMPONENT_MISSING => {
                warn!("D3D11 debug layer is not installed, continuing without it");
                create_device(D3D11_CREATE_DEVICE_FLAG(flags & !D3D11_CREATE_DEVICE_DEBUG.0))
            }
            other => other,
        }
        .map_err(Dx11Error::from)?;

        let dxgi_device: IDXGIDevice = device.cast().map_err(Dx11Error::from)?;
        // SAFETY: plain queries on a live device.
        let (adapter, factory) = unsafe {
            let adapter = dxgi_device.GetAdapter().map_err(Dx11Error::from)?;
            let desc = adapter.GetDesc().map_err(Dx11Error::from)?;
            let factory: IDXGIFactory2 = adapter.GetParent().map_err(Dx11Error::from)?;
            (
                adapter_info(desc.VendorId, &desc.Description, feature_level_version(level.0)),
                factory,
            )
        };
        info!(
            "Direct3D 11 core ready: {} ({}), {}",
            adapter.renderer, adapter.vendor, adapter.api_version
        );

        let info_queue = if self.debug_layer {
            device.cast::<ID3D11InfoQueue>().ok()
        } else {
            None
        };
        let annotation = if self.debug_names {
            context.cast::<ID3DUserDefinedAnnotation>().ok()
        } else {
            None
        };

        Ok(Dx11Core {
            registry: ResourceRegistry::new(),
            natives: NativeObjects::default(),
            adapter,
            frames_in_flight: self.frames_in_flight.max(1),
            debug_names: self.debug_names,
            info_queue,
            annotation,
            factory,
            context,
            device,
        })
    }
}

fn create_device(
    flags: D3D11_CREATE_DEVICE_FLAG,
) -> windows::core::Result<(ID3D11Device, ID3D11DeviceContext, D3D_FEATURE_LEVEL)> {
    // Runtimes without 11.1 reject the whole list.
    match try_create_device(flags, &[D3D_FEATURE_LEVEL_11_1, D3D_FEATURE_LEVEL_11_0]) {
        Err(e) if e.code() == E_INVALIDARG => try_create_device(flags, &[D3D_FEATURE_LEVEL_11_0]),
        other => other,
    }
}

fn try_create_device(
    flags: D3D11_CREATE_DEVICE_FLAG,
    levels: &[D3D_FEATURE_LEVEL],
) -> windows::core::Result<(ID3D11Device, ID3D11DeviceContext, D3D_FEATURE_LEVEL)> {
    let mut device = None;
    let mut context = None;
    let mut level = D3D_FEATURE_LEVEL::default();
    // SAFETY: every out pointer is a live local.
    unsafe {
        D3D11CreateDevice(
            None::<&IDXGIAdapter>,
            D3D_DRIVER_TYPE_HARDWARE,
            HMODULE::default(),
            flags,
            Some(levels),
            D3D11_SDK_VERSION,
            Some(&mut device),
            Some(&mut level),
            Some(&mut context),
        )?;
    }
    match (device, context) {
        (Some(device), Some(context)) => Ok((device, context, level)),
        _ => Err(windows::core::Error::from(E_INVALIDARG)),
    }
}

/// A D3D11 device plus native objects mirroring every registry resource.
pub struct Dx11Core {
    registry: ResourceRegistry,
    natives: NativeObjects,
    adapter: AdapterInfo,
    frames_in_flight: usize,
    debug_names: bool,
    info_queue: Option<ID3D11InfoQueue>,
    annotation: Option<ID3DUserDefinedAnnotation>,
    factory: IDXGIFactory2,
    context: ID3D11DeviceContext,
    device: ID3D11Device,
}

impl Dx11Core {
    pub fn builder() -> Dx11CoreBuilder {
        Dx11CoreBuilder::new()
    }

    pub const fn device(&self) -> &ID3D11Device {
        &self.device
    }

    pub const fn context(&self) -> &ID3D11DeviceContext {
        &self.context
    }

    pub const fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    pub(crate) const fn factory(&self) -> &IDXGIFactory2 {
        &self.factory
    }

    /// Validate `cmd` and replay it on the immediate context.
    pub fn submit(&mut self, cmd: &mut CommandBuffer) -> Result<()> {
        cmd.mark_pending()?;
        let result = cinder_rhi::validate_command_buffer(&self.registry, cmd).and_then(|_| {
            let mut replayer = Replayer::new(
                &self.device,
                &self.context,
                &self.registry,
                &self.natives,
                self.annotation.as_ref(),
            );
            // SAFETY: the command buffer validated against the registry every
            // native object mirrors.
            unsafe { replayer.replay(cmd.commands()) }.map_err(RhiError::from)
        });
        cmd.mark_complete();
        self.drain_debug_messages();
        result
    }

    pub(crate) fn drain_debug_messages(&self) {
        if let Some(queue) = &self.info_queue {
            drain_messages(queue);
        }
    }

    pub(crate) fn create_event_query(&self) -> Result<ID3D11Query> {
        let desc = D3D11_QUERY_DESC {
            Query: D3D11_QUERY_EVENT,
            MiscFlags: 0,
        };
        let mut query = None;
        // SAFETY: `desc` and the out pointer are live locals.
        unsafe { self.device.CreateQuery(&desc, Some(&mut query)) }.map_err(Dx11Error::from)?;
        Ok(query.ok_or(Dx11Error::NullObject("query"))?)
    }

    /// Block until the GPU has passed the point where `query` was ended.
    pub(crate) fn wait_for_query(&self, query: &ID3D11Query) -> Result<()> {
        let start = Instant::now();
        let mut warned = false;
        loop {
            let mut done = BOOL(0);
            // SAFETY: `done` is exactly the size event queries write.
            unsafe {
                self.context.GetData(
                    query,
                    Some(std::ptr::addr_of_mut!(done).cast::<c_void>()),
                    std::mem::size_of::<BOOL>() as u32,
                    0,
                )
            }
            .map_err(Dx11Error::from)?;
            if done.as_bool() {
                return Ok(());
            }
            if !warned && start.elapsed() > STALL_WARNING {
                warn!("GPU has not reached the frame's event query after 1s");
                warned = true;
            }
            std::thread::yield_now();
        }
    }

    /// Register a swapchain back buffer as an image with a render target view.
    pub(crate) fn insert_back_buffer(&mut self, desc: ImageDesc, texture: &ID3D11Texture2D) -> Result<ImageHandle> {
        let image = self.wrap_back_buffer(&desc, texture)?;
        let handle = self.registry.insert_image(desc);
        self.natives.images.insert(handle, image);
        Ok(handle)
    }

    /// Drop every native reference to the back buffer so the swapchain can resize.
    pub(crate) fn release_back_buffer(&mut self, image: ImageHandle, framebuffer: FramebufferHandle) {
        self.natives.framebuffers.remove(framebuffer);
        self.natives.images.remove(image);
        // SAFETY: unbinding and flushing release the context's own references.
        unsafe {
            self.context.OMSetRenderTargets(None, None);
            self.context.ClearState();
            self.context.Flush();
        }
    }

    /// Point the image and framebuffer at a resized back buffer.
    pub(crate) fn attach_back_buffer(
        &mut self,
        image: ImageHandle,
        framebuffer: FramebufferHandle,
        texture: &ID3D11Texture2D,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let desc = self.registry.image(image)?.resized(width, height);
        let native = self.wrap_back_buffer(&desc, texture)?;
        self.natives.images.insert(image, native);
        *self.registry.image_mut(image)? = desc;
        self.resize_framebuffer(framebuffer, width, height)
    }

    pub(crate) fn create_presenting_render_pass(
        &mut self,
        info: &RenderPassCreateInfo<'_>,
    ) -> Result<RenderPassHandle> {
        let handle = self.create_render_pass(info)?;
        self.registry.render_pass_mut(handle)?.presents = true;
        Ok(handle)
    }

    fn wrap_back_buffer(&self, desc: &ImageDesc, texture: &ID3D11Texture2D) -> Result<Dx11Image> {
        let resource: ID3D11Resource = texture.cast().map_err(Dx11Error::from)?;
        let rtv = views::render_target(&self.device, &resource, desc, format_to_dxgi(desc.format))?;
        self.label(&resource, &desc.debug_name);
        Ok(Dx11Image {
            resource,
            srv: None,
            uav: None,
            rtv: Some(rtv),
            dsv: None,
            dsv_read_only: None,
        })
    }

    fn label<T: Interface>(&self, object: &T, name: &str) {
        if self.debug_names {
            if let Ok(child) = object.cast() {
                set_debug_name(&child, name);
            }
        }
    }

    fn allocate_buffer(&self, desc: &BufferDesc, initial: Option<&[u8]>) -> Result<Dx11Buffer> {
        let constant = desc.usage.contains(BufferUsage::UNIFORM);
        let storage = desc.usage.contains(BufferUsage::STORAGE);
        let dynamic = is_dynamic_buffer(desc.usage, desc.memory);
        let size = padded_buffer_size(desc.size, constant) as usize;
        let (usage, cpu_access) = buffer_usage(dynamic);
        let misc = if storage {
            D3D11_RESOURCE_MISC_BUFFER_ALLOW_RAW_VIEWS.0
        } else {
            0
        };
        let native_desc = D3D11_BUFFER_DESC {
            ByteWidth: size as u32,
            Usage: usage,
            BindFlags: buffer_bind_flags(desc.usage).0 as u32,
            CPUAccessFlags: cpu_access.0 as u32,
            MiscFlags: misc as u32,
            StructureByteStride: 0,
        };

        let mut contents = vec![0u8; size];
        if let Some(data) = initial {
            contents[..data.len()].copy_from_slice(data);
        }
        let init = D3D11_SUBRESOURCE_DATA {
            pSysMem: contents.as_ptr().cast(),
            SysMemPitch: 0,
            SysMemSlicePitch: 0,
        };
        let mut buffer = None;
        // SAFETY: `contents` covers the whole native buffer.
        unsafe { self.device.CreateBuffer(&native_desc, Some(&init), Some(&mut buffer)) }
            .map_err(Dx11Error::from)?;
        let buffer: ID3D11Buffer = buffer.ok_or(Dx11Error::NullObject("buffer"))?;
        self.label(&buffer, &desc.debug_name);

        let uav = if storage {
            let view = D3D11_UNORDERED_ACCESS_VIEW_DESC {
                Format: DXGI_FORMAT_R32_TYPELESS,
                ViewDimension: D3D11_UAV_DIMENSION_BUFFER,
                Anonymous: D3D11_UNORDERED_ACCESS_VIEW_DESC_0 {
                    Buffer: D3D11_BUFFER_UAV {
                        FirstElement: 0,
                        NumElements: (size / 4) as u32,
                        Flags: D3D11_BUFFER_UAV_FLAG_RAW.0 as u32,
                    },
                },
            };
            let mut uav = None;
            // SAFETY: the buffer allows raw views and `view` covers it.
            unsafe { self.device.CreateUnorderedAccessView(&buffer, Some(&view), Some(&mut uav)) }
                .map_err(Dx11Error::from)?;
            uav
        } else {
            None
        };

        let shadow = (desc.memory.is_host_visible() || constant).then_some(contents);
        Ok(Dx11Buffer {
            buffer,
            uav,
            shadow,
            dynamic,
        })
    }

    /// Push a buffer's whole shadow to the GPU.
    fn flush_shadow(&self, buffer: &Dx11Buffer) -> Result<()> {
        let Some(shadow) = &buffer.shadow else {
            return Ok(());
        };
        // SAFETY: the shadow is exactly as large as the native buffer.
        unsafe {
            if buffer.dynamic {
                let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
                self.context
                    .Map(&buffer.buffer, 0, D3D11_MAP_WRITE_DISCARD, 0, Some(&mut mapped))
                    .map_err(Dx11Error::from)?;
                std::ptr::copy_nonoverlapping(shadow.as_ptr(), mapped.pData.cast::<u8>(), shadow.len());
                self.context.Unmap(&buffer.buffer, 0);
            } else {
                self.context
                    .UpdateSubresource(&buffer.buffer, 0, None, shadow.as_ptr().cast(), 0, 0);
            }
        }
        Ok(())
    }

    /// Copy GPU contents of a readback buffer into its shadow.
    fn read_back(&mut self, handle: BufferHandle) -> Result<()> {
        let size = self.registry.buffer(handle)?.size as usize;
        let source = native(&self.natives.buffers, handle)?.buffer.clone();
        let mut desc = D3D11_BUFFER_DESC::default();
        // SAFETY: `desc` is a live local.
        unsafe { source.GetDesc(&mut desc) };
        desc.Usage = D3D11_USAGE_STAGING;
        desc.BindFlags = 0;
        desc.CPUAccessFlags = D3D11_CPU_ACCESS_READ.0 as u32;
        desc.MiscFlags = 0;

        let mut staging = None;
        // SAFETY: the staging buffer matches the source size; the map is
        // released before returning.
        unsafe {
            self.device
                .CreateBuffer(&desc, None, Some(&mut staging))
                .map_err(Dx11Error::from)?;
            let staging: ID3D11Buffer = staging.ok_or(Dx11Error::NullObject("staging buffer"))?;
            self.context.CopyResource(&staging, &source);
            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            self.context
                .Map(&staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
                .map_err(Dx11Error::from)?;
            let bytes = std::slice::from_raw_parts(mapped.pData.cast::<u8>(), size);
            if let Some(shadow) = native_mut(&mut self.natives.buffers, handle)?.shadow.as_mut() {
                shadow[..size].copy_from_slice(bytes);
            }
            self.context.Unmap(&staging, 0);
        }
        Ok(())
    }

    fn allocate_image(&self, desc: &ImageDesc) -> Result<Dx11Image> {
        let formats = texture_formats(desc.format, desc.usage);
        let bind = image_bind_flags(desc.usage, desc.generate_mipmaps).0 as u32;
        let mut misc = 0;
        if desc.is_cubemap() {
            misc |= D3D11_RESOURCE_MISC_TEXTURECUBE.0;
        }
        if desc.generate_mipmaps {
            misc |= D3D11_RESOURCE_MISC_GENERATE_MIPS.0;
        }
        let misc = misc as u32;
        let shape = ViewShape::of(desc);

        // SAFETY: descriptors and out pointers are live locals.
        let resource: ID3D11Resource = unsafe {
            if shape == ViewShape::Texture3D {
                let native_desc = D3D11_TEXTURE3D_DESC {
                    Width: desc.width,
                    Height: desc.height,
                    Depth: desc.depth,
                    MipLevels: desc.mip_levels,
                    Format: formats.resource,
                    Usage: D3D11_USAGE_DEFAULT,
                    BindFlags: bind,
                    CPUAccessFlags: 0,
                    MiscFlags: misc,
                };
                let mut texture: Option<ID3D11Texture3D> = None;
                self.device
                    .CreateTexture3D(&native_desc, None, Some(&mut texture))
                    .map_err(Dx11Error::from)?;
                texture
                    .ok_or(Dx11Error::NullObject("texture"))?
                    .cast()
                    .map_err(Dx11Error::from)?
            } else {
                let native_desc = D3D11_TEXTURE2D_DESC {
                    Width: desc.width,
                    Height: desc.height,
                    MipLevels: desc.mip_levels,
                    ArraySize: desc.array_layers,
                    Format: formats.resource,
                    SampleDesc: DXGI_SAMPLE_DESC {
                        Count: 1,
                        Quality: 0,
                    },
                    Usage: D3D11_USAGE_DEFAULT,
                    BindFlags: bind,
                    CPUAccessFlags: 0,
                    MiscFlags: misc,
                };
                let mut texture: Option<ID3D11Texture2D> = None;
                self.device
                    .CreateTexture2D(&native_desc, None, Some(&mut texture))
                    .map_err(Dx11Error::from)?;
                texture
                    .ok_or(Dx11Error::NullObject("texture"))?
                    .cast()
                    .map_err(Dx11Error::from)?
            }
        };
        self.label(&resource, &desc.debug_name);

        let usage = desc.usage;
        let srv = if usage.contains(ImageUsage::SAMPLED) || desc.generate_mipmaps {
            Some(views::shader_resource(&self.device, &resource, desc, formats.shader_resource)?)
        } else {
            None
        };
        let uav = if usage.contains(ImageUsage::STORAGE) {
            Some(views::unordered_access(&self.device, &resource, desc, formats.target)?)
        } else {
            None
        };
        let rtv = if usage.contains(ImageUsage::RENDER_TARGET) {
            Some(views::render_target(&self.device, &resource, desc, formats.target)?)
        } else {
            None
        };
        let (dsv, dsv_read_only) = if usage.contains(ImageUsage::DEPTH_STENCIL) {
            (
                Some(views::depth_stencil(&self.device, &resource, desc, formats.target, false)?),
                Some(views::depth_stencil(&self.device, &resource, desc, formats.target, true)?),
            )
        } else {
            (None, None)
        };
        Ok(Dx11Image {
            resource,
            srv,
            uav,
            rtv,
            dsv,
            dsv_read_only,
        })
    }

    fn build_framebuffer(&self, desc: &FramebufferDesc) -> Result<Dx11Framebuffer> {
        let read_only = native(&self.natives.render_passes, desc.render_pass)?.depth_read_only;
        let rtvs = desc
            .color_attachments
            .iter()
            .map(|&image| {
                let view = native(&self.natives.images, image)?.rtv.clone();
                view.map(Some)
                    .ok_or(Dx11Error::MissingNative("render target view"))
            })
            .collect::<crate::error::Result<Vec<_>>>()?;
        let dsv = match desc.depth_attachment {
            Some(image) => {
                let image = native(&self.natives.images, image)?;
                let view = if read_only {
                    image.dsv_read_only.clone()
                } else {
                    image.dsv.clone()
                };
                Some(view.ok_or(Dx11Error::MissingNative("depth stencil view"))?)
            }
            None => None,
        };
        Ok(Dx11Framebuffer { rtvs, dsv })
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

    fn set_layout_descs(&self, layouts: &[DescriptorSetLayoutHandle]) -> Result<Vec<&DescriptorSetLayoutDesc>> {
        layouts.iter().map(|&layout| self.registry.set_layout(layout)).collect()
    }
}

impl Core for Dx11Core {
    fn api(&self) -> GraphicsApi {
        GraphicsApi::Direct3D11
    }

    fn adapter_info(&self) -> &AdapterInfo {
        &self.adapter
    }

    fn resources(&self) -> &ResourceRegistry {
        &self.registry
    }

    fn adjust_perspective(&self, projection: &mut Mat4) {
        gl_to_d3d_depth(projection);
    }

    fn create_buffer(&mut self, info: &BufferCreateInfo<'_>) -> Result<BufferHandle> {
        let desc = BufferDesc::from_info(info)?;
        if let Some(data) = info.initial_data {
            if data.len() as u64 > desc.size {
                return Err(RhiError::UploadOutOfRange(format!(
                    "'{}': {} initial bytes for a {} byte buffer",
                    desc.debug_name,
                    data.len(),
                    desc.size
                )));
            }
        }
        let native = self.allocate_buffer(&desc, info.initial_data)?;
        debug!("Created buffer '{}' ({} bytes)", desc.debug_name, desc.size);
        let handle = self.registry.insert_buffer(desc);
        self.natives.buffers.insert(handle, native);
        Ok(handle)
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) -> Result<()> {
        self.registry.remove_buffer(buffer)?;
        self.natives.buffers.remove(buffer);
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
        let target = native_mut(&mut self.natives.buffers, buffer)?;
        if let Some(shadow) = target.shadow.as_mut() {
            shadow[offset as usize..end as usize].copy_from_slice(data);
            return self.flush_shadow(native(&self.natives.buffers, buffer)?);
        }
        let region = D3D11_BOX {
            left: offset as u32,
            top: 0,
            front: 0,
            right: end as u32,
            bottom: 1,
            back: 1,
        };
        // SAFETY: the box lies inside the buffer and `data` covers it.
        unsafe {
            self.context
                .UpdateSubresource(&target.buffer, 0, Some(&region), data.as_ptr().cast(), 0, 0);
        }
        Ok(())
    }

    fn map_buffer(&mut self, buffer: BufferHandle) -> Result<&mut [u8]> {
        let desc = self.registry.buffer(buffer)?;
        let (name, size, memory) = (desc.debug_name.clone(), desc.size as usize, desc.memory);
        if !memory.is_host_visible() {
            return Err(RhiError::Unsupported(format!("'{name}' is not host visible")));
        }
        if memory == MemoryUsage::GpuToCpu {
            self.read_back(buffer)?;
        }
        let shadow = native_mut(&mut self.natives.buffers, buffer)?
            .shadow
            .as_deref_mut()
            .ok_or(Dx11Error::MissingNative("buffer shadow"))?;
        Ok(&mut shadow[..size])
    }

    fn unmap_buffer(&mut self, buffer: BufferHandle) -> Result<()> {
        let memory = self.registry.buffer(buffer)?.memory;
        if memory == MemoryUsage::GpuToCpu {
            return Ok(());
        }
        let native = native(&self.natives.buffers, buffer)?;
        self.flush_shadow(native)
    }

    fn resize_buffer(&mut self, buffer: BufferHandle, size: u64) -> Result<()> {
        let desc = self.registry.buffer(buffer)?;
        if size == 0 {
            return Err(RhiError::InvalidCreateInfo {
                name: desc.debug_name.clone(),
                reason: "size must be non-zero".into(),
            });
        }
        let mut resized = desc.clone();
        resized.size = size;
        let native = self.allocate_buffer(&resized, None)?;
        // Sets resolve natives by handle at bind time, so they pick this up.
        self.natives.buffers.insert(buffer, native);
        *self.registry.buffer_mut(buffer)? = resized;
        Ok(())
    }

    fn create_image(&mut self, info: &ImageCreateInfo<'_>) -> Result<ImageHandle> {
        let desc = ImageDesc::from_info(info)?;
        if let Some(data) = info.initial_data {
            Self::check_image_data(&desc, data)?;
        }
        let native = self.allocate_image(&desc)?;
        debug!(
            "Created image '{}' {}x{} {:?}",
            desc.debug_name, desc.width, desc.height, desc.format
        );
        let handle = self.registry.insert_image(desc);
        self.natives.images.insert(handle, native);
        if let Some(data) = info.initial_data {
            self.upload_image(handle, data)?;
        }
        Ok(handle)
    }

    fn delete_image(&mut self, image: ImageHandle) -> Result<()> {
        self.registry.remove_image(image)?;
        self.natives.images.remove(image);
        Ok(())
    }

    fn upload_image(&mut self, image: ImageHandle, data: &[u8]) -> Result<()> {
        let desc = self.registry.image(image)?;
        Self::check_image_data(desc, data)?;
        let native = native(&self.natives.images, image)?;
        let mips = if desc.generate_mipmaps { 1 } else { desc.mip_levels };
        let (regions, _) = subresource_regions(desc.format, desc.width, desc.height, mips, desc.array_layers);
        let volume = ViewShape::of(desc) == ViewShape::Texture3D;

        for region in &regions {
            let subresource = subresource_index(region.mip, region.layer, desc.mip_levels);
            let slice = D3D11_BOX {
                left: 0,
                top: 0,
                front: 0,
                right: region.width,
                bottom: region.height,
                back: 1,
            };
            // SAFETY: `data` covers every region, checked above.
            unsafe {
                self.context.UpdateSubresource(
                    &native.resource,
                    subresource,
                    volume.then_some(std::ptr::addr_of!(slice)),
                    data[region.offset as usize..].as_ptr().cast(),
                    row_pitch(desc.format, region.width),
                    depth_pitch(desc.format, region.width, region.height),
                );
            }
        }
        trace!("Uploaded {} regions into '{}'", regions.len(), desc.debug_name);

        if desc.generate_mipmaps {
            self.generate_mipmaps(image)?;
        }
        Ok(())
    }

    fn resize_image(&mut self, image: ImageHandle, width: u32, height: u32) -> Result<()> {
        let desc = self.registry.image(image)?.resized(width, height);
        let native = self.allocate_image(&desc)?;
        self.natives.images.insert(image, native);
        *self.registry.image_mut(image)? = desc;
        Ok(())
    }

    fn generate_mipmaps(&mut self, image: ImageHandle) -> Result<()> {
        let desc = self.registry.image(image)?;
        if desc.format.is_compressed() {
            warn!("'{}' is block compressed, skipping mip generation", desc.debug_name);
            return Ok(());
        }
        if !desc.generate_mipmaps {
            return Err(RhiError::Unsupported(format!(
                "'{}' was created without GENERATE_MIPMAPS",
                desc.debug_name
            )));
        }
        let srv = native(&self.natives.images, image)?
            .srv
            .as_ref()
            .ok_or(Dx11Error::MissingNative("shader resource view"))?;
        // SAFETY: the texture was created with GENERATE_MIPS and render target binding.
        unsafe { self.context.GenerateMips(srv) };
        Ok(())
    }

    fn create_sampler(&mut self, info: &SamplerCreateInfo<'_>) -> Result<SamplerHandle> {
        let desc = SamplerDesc::from_info(info)?;
        let anisotropic = desc.max_anisotropy > 1.0;
        let native_desc = D3D11_SAMPLER_DESC {
            Filter: sampler_filter(desc.min_filter, desc.mag_filter, desc.mip_filter, anisotropic),
            AddressU: address_mode(desc.wrap_u),
            AddressV: address_mode(desc.wrap_v),
            AddressW: address_mode(desc.wrap_w),
            MipLODBias: desc.mip_lod_bias,
            MaxAnisotropy: desc.max_anisotropy.clamp(1.0, MAX_ANISOTROPY) as u32,
            ComparisonFunc: D3D11_COMPARISON_NEVER,
            BorderColor: [0.0; 4],
            MinLOD: desc.min_lod,
            MaxLOD: desc.max_lod,
        };
        let mut sampler = None;
        // SAFETY: `native_desc` and the out pointer are live locals.
        unsafe { self.device.CreateSamplerState(&native_desc, Some(&mut sampler)) }
            .map_err(Dx11Error::from)?;
        let sampler = sampler.ok_or(Dx11Error::NullObject("sampler"))?;
        self.label(&sampler, &desc.debug_name);
        let handle = self.registry.insert_sampler(desc);
        self.natives.samplers.insert(handle, sampler);
        Ok(handle)
    }

    fn delete_sampler(&mut self, sampler: SamplerHandle) -> Result<()> {
        self.registry.remove_sampler(sampler)?;
        self.natives.samplers.remove(sampler);
        Ok(())
    }

    fn create_render_pass(&mut self, info: &RenderPassCreateInfo<'_>) -> Result<RenderPassHandle> {
        let desc = RenderPassDesc::from_info(info)?;
        let native = Dx11RenderPass {
            color_clears: desc.color_attachments.iter().map(|a| a.should_clear).collect(),
            depth_clear: desc.depth_attachment.is_some_and(|d| d.should_clear),
            depth_read_only: desc.depth_attachment.is_some_and(|d| d.read_only),
            stencil: desc.depth_attachment.is_some_and(|d| d.format.has_stencil()),
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
        self.natives.framebuffers.remove(framebuffer);
        Ok(())
    }

    fn resize_framebuffer(&mut self, framebuffer: FramebufferHandle, width: u32, height: u32) -> Result<()> {
        let mut desc = self.registry.framebuffer(framebuffer)?.clone();
        desc.width = width;
        desc.height = height;
        self.registry.check_framebuffer(&desc)?;
        let native = self.build_framebuffer(&desc)?;
        self.natives.framebuffers.insert(framebuffer, native);
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
        // Views are looked up from the registry each time a set is applied.
        self.registry
            .update_descriptor_set(set, bindings, offset)
            .map(|_| ())
    }

    fn create_graphics_pipeline(
        &mut self,
        info: &GraphicsPipelineCreateInfo<'_>,
    ) -> Result<GraphicsPipelineHandle> {
        let desc = GraphicsPipelineDesc::from_info(info)?;
        let color_count = self.registry.render_pass(desc.render_pass)?.color_attachments.len();
        let registers = RegisterMap::new(&desc.debug_name, &self.set_layout_descs(&desc.set_layouts)?)?;
        if registers.has_graphics_storage() {
            return Err(Dx11Error::Unsupported(format!(
                "'{}' binds storage resources in a graphics stage",
                desc.debug_name
            ))
            .into());
        }
        let device = &self.device;
        let name = desc.debug_name.as_str();

        let mut vertex = None;
        let mut vertex_code: &[u8] = &[];
        let (mut hull, mut domain, mut geometry, mut pixel) = (None, None, None, None);
        // SAFETY: every blob passed the DXBC container check first.
        unsafe {
            for stage in info.stages {
                check_dxbc(name, stage.stage, stage.code)?;
                let kind = stage.stage;
                let result = if kind == ShaderStages::VERTEX {
                    vertex_code = stage.code;
                    device.CreateVertexShader(stage.code, None::<&ID3D11ClassLinkage>, Some(&mut vertex))
                } else if kind == ShaderStages::TESS_CTRL {
                    device.CreateHullShader(stage.code, None::<&ID3D11ClassLinkage>, Some(&mut hull))
                } else if kind == ShaderStages::TESS_EVAL {
                    device.CreateDomainShader(stage.code, None::<&ID3D11ClassLinkage>, Some(&mut domain))
                } else if kind == ShaderStages::GEOMETRY {
                    device.CreateGeometryShader(stage.code, None::<&ID3D11ClassLinkage>, Some(&mut geometry))
                } else if kind == ShaderStages::FRAGMENT {
                    device.CreatePixelShader(stage.code, None::<&ID3D11ClassLinkage>, Some(&mut pixel))
                } else {
                    return Err(Dx11Error::Shader {
                        name: name.to_owned(),
                        reason: format!("{kind:?} is not a graphics stage"),
                    }
                    .into());
                };
                result.map_err(Dx11Error::from)?;
            }
        }
        let vertex = vertex.ok_or_else(|| Dx11Error::Shader {
            name: name.to_owned(),
            reason: "no vertex stage".into(),
        })?;

        let mut elements = Vec::new();
        for (slot, layout) in (0u32..).zip(&desc.vertex_bindings) {
            let (class, step) = match layout.input_rate {
                VertexInputRate::Vertex => (D3D11_INPUT_PER_VERTEX_DATA, 0),
                VertexInputRate::Instance => (D3D11_INPUT_PER_INSTANCE_DATA, 1),
            };
            for attribute in &layout.attributes {
                elements.push(D3D11_INPUT_ELEMENT_DESC {
                    SemanticName: PCSTR(SEMANTIC.as_ptr()),
                    SemanticIndex: attribute.location,
                    Format: format_to_dxgi(attribute.format),
                    InputSlot: slot,
                    AlignedByteOffset: attribute.offset,
                    InputSlotClass: class,
                    InstanceDataStepRate: step,
                });
            }
        }
        let input_layout = if elements.is_empty() {
            None
        } else {
            let mut layout = None;
            // SAFETY: the semantic string is static and NUL terminated.
            unsafe { device.CreateInputLayout(&elements, vertex_code, Some(&mut layout)) }
                .map_err(Dx11Error::from)?;
            layout
        };

        let rasterizer_desc = D3D11_RASTERIZER_DESC {
            FillMode: fill_mode(desc.raster.polygon_mode)?,
            CullMode: cull_mode(desc.raster.cull_mode)?,
            FrontCounterClockwise: BOOL::from(
                desc.raster.front_face == cinder_rhi::FrontFace::CounterClockwise,
            ),
            DepthBias: 0,
            DepthBiasClamp: 0.0,
            SlopeScaledDepthBias: 0.0,
            DepthClipEnable: BOOL::from(!desc.raster.depth_clamp),
            ScissorEnable: BOOL::from(true),
            MultisampleEnable: BOOL::from(false),
            AntialiasedLineEnable: BOOL::from(false),
        };
        let mut blend_desc = D3D11_BLEND_DESC {
            AlphaToCoverageEnable: BOOL::from(false),
            IndependentBlendEnable: BOOL::from(true),
            ..Default::default()
        };
        for (index, target) in blend_desc.RenderTarget.iter_mut().enumerate().take(color_count) {
            let blend = desc.blend_for(index);
            *target = D3D11_RENDER_TARGET_BLEND_DESC {
                BlendEnable: BOOL::from(blend.enabled),
                SrcBlend: blend_factor(blend.src_color),
                DestBlend: blend_factor(blend.dst_color),
                BlendOp: blend_op(blend.color_op),
                SrcBlendAlpha: blend_factor(blend.src_alpha),
                DestBlendAlpha: blend_factor(blend.dst_alpha),
                BlendOpAlpha: blend_op(blend.alpha_op),
                RenderTargetWriteMask: blend.color_mask.bits(),
            };
        }
        let depth_desc = D3D11_DEPTH_STENCIL_DESC {
            DepthEnable: BOOL::from(desc.depth.test),
            DepthWriteMask: if desc.depth.write {
                D3D11_DEPTH_WRITE_MASK_ALL
            } else {
                D3D11_DEPTH_WRITE_MASK_ZERO
            },
            DepthFunc: comparison(desc.depth.compare),
            StencilEnable: BOOL::from(false),
            StencilReadMask: 0xFF,
            StencilWriteMask: 0xFF,
            ..Default::default()
        };

        let (mut rasterizer, mut blend, mut depth_stencil) = (None, None, None);
        // SAFETY: descriptors and out pointers are live locals.
        unsafe {
            device
                .CreateRasterizerState(&rasterizer_desc, Some(&mut rasterizer))
                .map_err(Dx11Error::from)?;
            device
                .CreateBlendState(&blend_desc, Some(&mut blend))
                .map_err(Dx11Error::from)?;
            device
                .CreateDepthStencilState(&depth_desc, Some(&mut depth_stencil))
                .map_err(Dx11Error::from)?;
        }
        self.label(&vertex, name);

        let native = Dx11GraphicsPipeline {
            vertex,
            hull,
            domain,
            geometry,
            pixel,
            input_layout,
            rasterizer: rasterizer.ok_or(Dx11Error::NullObject("rasterizer state"))?,
            rasterizer_desc,
            blend: blend.ok_or(Dx11Error::NullObject("blend state"))?,
            depth_stencil: depth_stencil.ok_or(Dx11Error::NullObject("depth stencil state"))?,
            topology: topology(desc.topology)?,
            strides: desc.vertex_bindings.iter().map(|b| b.stride).collect(),
            registers,
        };
        debug!("Created graphics pipeline '{}'", desc.debug_name);
        let handle = self.registry.insert_graphics_pipeline(desc);
        self.natives.graphics_pipelines.insert(handle, native);
        Ok(handle)
    }

    fn delete_graphics_pipeline(&mut self, pipeline: GraphicsPipelineHandle) -> Result<()> {
        self.registry.remove_graphics_pipeline(pipeline)?;
        self.natives.graphics_pipelines.remove(pipeline);
        Ok(())
    }

    fn create_compute_pipeline(
        &mut self,
        info: &ComputePipelineCreateInfo<'_>,
    ) -> Result<ComputePipelineHandle> {
        let desc = ComputePipelineDesc::from_info(info)?;
        let registers = RegisterMap::new(&desc.debug_name, &self.set_layout_descs(&desc.set_layouts)?)?;
        check_dxbc(&desc.debug_name, info.stage.stage, info.stage.code)?;
        let mut shader = None;
        // SAFETY: the blob passed the DXBC container check.
        unsafe { self.device.CreateComputeShader(info.stage.code, None::<&ID3D11ClassLinkage>, Some(&mut shader)) }
            .map_err(Dx11Error::from)?;
        let shader = shader.ok_or(Dx11Error::NullObject("compute shader"))?;
        self.label(&shader, &desc.debug_name);
        let handle = self.registry.insert_compute_pipeline(desc);
        self.natives
            .compute_pipelines
            .insert(handle, Dx11ComputePipeline { shader, registers });
        Ok(handle)
    }

    fn delete_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) -> Result<()> {
        self.registry.remove_compute_pipeline(pipeline)?;
        self.natives.compute_pipelines.remove(pipeline);
        Ok(())
    }

    fn create_vertex_array(&mut self, info: &VertexArrayCreateInfo<'_>) -> Result<VertexArrayHandle> {
        // Buffers are bound from the registry description at replay, which
        // keeps vertex arrays valid across buffer resizes.
        let desc = VertexArrayDesc::from_info(info)?;
        for &buffer in desc.vertex_buffers.iter().chain(&desc.index_buffer) {
            self.registry.buffer(buffer)?;
        }
        Ok(self.registry.insert_vertex_array(desc))
    }

    fn delete_vertex_array(&mut self, vertex_array: VertexArrayHandle) -> Result<()> {
        self.registry.remove_vertex_array(vertex_array).map(|_| ())
    }

    fn execute_immediate(&mut self, cmd: &mut CommandBuffer) -> Result<()> {
        self.submit(cmd)?;
        self.wait_until_idle()
    }

    fn wait_until_idle(&mut self) -> Result<()> {
        let query = self.create_event_query()?;
        // SAFETY: the query is live.
        unsafe {
            self.context.End(&query);
            self.context.Flush();
        }
        self.wait_for_query(&query)
    }
}

/// NUL-terminated form of [`ATTRIBUTE_SEMANTIC`] for input element descriptions.
const SEMANTIC: &[u8] = b"TEXCOORD\0";
const _: () = assert!(SEMANTIC.len() == ATTRIBUTE_SEMANTIC.len() + 1);

impl Drop for Dx11Core {
    fn drop(&mut self) {
        // SAFETY: unbinding everything lets the natives release their objects.
        unsafe {
            self.context.ClearState();
            self.context.Flush();
        }
        self.natives.clear();
        self.drain_debug_messages();
        debug!("D3D11 core destroyed");
    }
}

//! Execution of recorded RHI commands on the immediate context.
//!
//! Descriptor sets are remembered when bound and applied right before the
//! next draw or dispatch, once the pipeline's [`RegisterMap`] is known.
//! Barriers unbind the views D3D11 would otherwise refuse to alias and mark
//! the sets for re-application.

use cinder_rhi::format::mip_extent;
use cinder_rhi::{
    BindPoint, BindingKind, BoundResource, ClearDepthStencil, Command, ComputePipelineHandle,
    DescriptorSetHandle, GraphicsPipelineHandle, ResourceRegistry, ShaderStages,
};
use tracing::trace;
use windows::core::HSTRING;
use windows::Win32::Foundation::RECT;
use windows::Win32::Graphics::Direct3D11::{
    ID3D11Buffer, ID3D11DepthStencilView, ID3D11Device, ID3D11DeviceContext,
    ID3D11RasterizerState, ID3D11SamplerState, ID3D11ShaderResourceView,
    ID3D11UnorderedAccessView, ID3DUserDefinedAnnotation, D3D11_BOX, D3D11_CLEAR_DEPTH,
    D3D11_CLEAR_STENCIL, D3D11_VIEWPORT,
};

use crate::error::{Dx11Error, Result};
use crate::hazards::{unbind_for_buffer, unbind_for_image, Unbind};
use crate::natives::{native, NativeObjects};
use crate::registers::{RegisterClass, RegisterMap};
use crate::subresource::{depth_pitch, row_pitch, subresource_index, ViewShape};
use crate::translate::index_format;

const GRAPHICS_STAGES: [ShaderStages; 5] = [
    ShaderStages::VERTEX,
    ShaderStages::TESS_CTRL,
    ShaderStages::TESS_EVAL,
    ShaderStages::GEOMETRY,
    ShaderStages::FRAGMENT,
];

/// A resolved native view for one register.
enum View {
    Constant(ID3D11Buffer),
    ShaderResource(ID3D11ShaderResourceView),
    UnorderedAccess(ID3D11UnorderedAccessView),
    Sampler(ID3D11SamplerState),
}

#[derive(Default)]
struct BoundSets {
    sets: Vec<Option<DescriptorSetHandle>>,
    dirty: bool,
}

impl BoundSets {
    fn bind(&mut self, first_set: u32, sets: &[DescriptorSetHandle]) {
        let end = first_set as usize + sets.len();
        if self.sets.len() < end {
            self.sets.resize(end, None);
        }
        for (slot, set) in self.sets[first_set as usize..end].iter_mut().zip(sets) {
            *slot = Some(*set);
        }
        self.dirty = true;
    }
}

#[derive(Default)]
struct DrawState {
    graphics: Option<GraphicsPipelineHandle>,
    compute: Option<ComputePipelineHandle>,
    graphics_sets: BoundSets,
    compute_sets: BoundSets,
    depth_bias: Option<(f32, f32, f32)>,
    /// One past the highest shader resource slot bound so far.
    srv_high: u32,
    uav_high: u32,
}

/// Issues one RHI command list on the immediate context.
pub struct Replayer<'a> {
    device: &'a ID3D11Device,
    context: &'a ID3D11DeviceContext,
    registry: &'a ResourceRegistry,
    natives: &'a NativeObjects,
    annotation: Option<&'a ID3DUserDefinedAnnotation>,
    state: DrawState,
}

impl<'a> Replayer<'a> {
    pub fn new(
        device: &'a ID3D11Device,
        context: &'a ID3D11DeviceContext,
        registry: &'a ResourceRegistry,
        natives: &'a NativeObjects,
        annotation: Option<&'a ID3DUserDefinedAnnotation>,
    ) -> Self {
        Self {
            device,
            context,
            registry,
            natives,
            annotation,
            state: DrawState::default(),
        }
    }

    /// # Safety
    /// Every handle in `commands` must have a live native object.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub unsafe fn replay(&mut self, commands: &[Command]) -> Result<()> {
        for command in commands {
            self.replay_one(command)?;
        }
        Ok(())
    }

    unsafe fn replay_one(&mut self, command: &Command) -> Result<()> {
        let context = self.context;
        match command {
            Command::BeginRenderPass {
                render_pass,
                framebuffer,
                width,
                height,
                clear_colors,
                clear_depth,
            } => {
                let pass = native(&self.natives.render_passes, *render_pass)?;
                let fb = native(&self.natives.framebuffers, *framebuffer)?;
                let targets = (!fb.rtvs.is_empty()).then_some(fb.rtvs.as_slice());
                context.OMSetRenderTargets(targets, fb.dsv.as_ref());
                context.RSSetViewports(Some(&[full_viewport(*width, *height)]));
                context.RSSetScissorRects(Some(&[RECT {
                    left: 0,
                    top: 0,
                    right: *width as i32,
                    bottom: *height as i32,
                }]));

                for (index, color) in pass.cleared_colors(clear_colors) {
                    if let Some(Some(rtv)) = fb.rtvs.get(index) {
                        context.ClearRenderTargetView(rtv, &color.0);
                    }
                }
                if pass.depth_clear {
                    if let Some(dsv) = &fb.dsv {
                        let value = clear_depth.unwrap_or(ClearDepthStencil::FAR);
                        let mut flags = D3D11_CLEAR_DEPTH.0;
                        if pass.stencil {
                            flags |= D3D11_CLEAR_STENCIL.0;
                        }
                        context.ClearDepthStencilView(dsv, flags as u32, value.depth, value.stencil as u8);
                    }
                }
            }
            Command::EndRenderPass => {}
            Command::BindGraphicsPipeline(handle) => {
                let desc = self.registry.graphics_pipeline(*handle)?;
                let pipeline = native(&self.natives.graphics_pipelines, *handle)?;
                context.VSSetShader(&pipeline.vertex, None);
                context.HSSetShader(pipeline.hull.as_ref(), None);
                context.DSSetShader(pipeline.domain.as_ref(), None);
                context.GSSetShader(pipeline.geometry.as_ref(), None);
                context.PSSetShader(pipeline.pixel.as_ref(), None);
                context.IASetInputLayout(pipeline.input_layout.as_ref());
                context.IASetPrimitiveTopology(pipeline.topology);
                context.OMSetBlendState(&pipeline.blend, Some(&[1.0; 4]), u32::MAX);
                context.OMSetDepthStencilState(&pipeline.depth_stencil, 0);
                context.RSSetState(&pipeline.rasterizer);
                self.state.graphics = Some(*handle);
                self.state.graphics_sets.dirty = true;
                if desc.raster.depth_bias {
                    self.apply_depth_bias()?;
                }
            }
            Command::BindComputePipeline(handle) => {
                let pipeline = native(&self.natives.compute_pipelines, *handle)?;
                context.CSSetShader(&pipeline.shader, None);
                self.state.compute = Some(*handle);
                self.state.compute_sets.dirty = true;
            }
            Command::BindDescriptorSets {
                bind_point,
                first_set,
                sets,
            } => match bind_point {
                BindPoint::Graphics => self.state.graphics_sets.bind(*first_set, sets),
                BindPoint::Compute => self.state.compute_sets.bind(*first_set, sets),
            },
            Command::BindVertexBuffers {
                first_binding,
                buffers,
            } => {
                let strides = match self.state.graphics {
                    Some(pipeline) => native(&self.natives.graphics_pipelines, pipeline)?.strides.as_slice(),
                    None => &[],
                };
                let mut natives = Vec::with_capacity(buffers.len());
                let mut offsets = Vec::with_capacity(buffers.len());
                let mut slot_strides = Vec::with_capacity(buffers.len());
                for (binding, (buffer, offset)) in (*first_binding..).zip(buffers) {
                    natives.push(Some(native(&self.natives.buffers, *buffer)?.buffer.clone()));
                    offsets.push(*offset as u32);
                    slot_strides.push(strides.get(binding as usize).copied().unwrap_or(0));
                }
                context.IASetVertexBuffers(
                    *first_binding,
                    natives.len() as u32,
                    Some(natives.as_ptr()),
                    Some(slot_strides.as_ptr()),
                    Some(offsets.as_ptr()),
                );
            }
            Command::BindIndexBuffer {
                buffer,
                offset,
                index_type,
            } => {
                let buffer = native(&self.natives.buffers, *buffer)?;
                context.IASetIndexBuffer(&buffer.buffer, index_format(*index_type), *offset as u32);
            }
            Command::BindVertexArray(handle) => {
                let desc = self.registry.vertex_array(*handle)?;
                let natives = desc
                    .vertex_buffers
                    .iter()
                    .map(|&buffer| Ok(Some(native(&self.natives.buffers, buffer)?.buffer.clone())))
                    .collect::<Result<Vec<_>>>()?;
                let strides: Vec<u32> = desc.layouts.iter().map(|layout| layout.stride).collect();
                let offsets = vec![0u32; natives.len()];
                context.IASetVertexBuffers(
                    0,
                    natives.len() as u32,
                    Some(natives.as_ptr()),
                    Some(strides.as_ptr()),
                    Some(offsets.as_ptr()),
                );
                if let Some(index) = desc.index_buffer {
                    let buffer = native(&self.natives.buffers, index)?;
                    context.IASetIndexBuffer(&buffer.buffer, index_format(desc.index_type), 0);
                }
            }
            Command::SetViewport(viewport) => {
                context.RSSetViewports(Some(&[D3D11_VIEWPORT {
                    TopLeftX: viewport.x,
                    TopLeftY: viewport.y,
                    Width: viewport.width,
                    Height: viewport.height,
                    MinDepth: viewport.min_depth,
                    MaxDepth: viewport.max_depth,
                }]));
            }
            Command::SetScissor(scissor) => {
                context.RSSetScissorRects(Some(&[RECT {
                    left: scissor.x,
                    top: scissor.y,
                    right: scissor.x + scissor.width as i32,
                    bottom: scissor.y + scissor.height as i32,
                }]));
            }
            Command::SetDepthBias {
                constant,
                clamp,
                slope,
            } => {
                self.state.depth_bias = Some((*constant, *clamp, *slope));
                if self.state.graphics.is_some() {
                    self.apply_depth_bias()?;
                }
            }
            Command::DrawVertices {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => {
                self.flush_graphics_sets()?;
                context.DrawInstanced(*vertex_count, *instance_count, *first_vertex, *first_instance);
            }
            Command::DrawIndices {
                first_index,
                index_count,
                vertex_offset,
                instance_count,
                first_instance,
            } => {
                self.flush_graphics_sets()?;
                context.DrawIndexedInstanced(
                    *index_count,
                    *instance_count,
                    *first_index,
                    *vertex_offset,
                    *first_instance,
                );
            }
            Command::Dispatch { x, y, z } => {
                self.flush_compute_sets()?;
                context.Dispatch(*x, *y, *z);
            }
            Command::ImageBarrier(barrier) => self.unbind(unbind_for_image(barrier.src, barrier.dst)),
            Command::BufferBarrier(barrier) => self.unbind(unbind_for_buffer(barrier.src, barrier.dst)),
            Command::BlitImage {
                src,
                src_mip,
                dst,
                dst_mip,
            } => self.copy_image(*src, *src_mip, *dst, *dst_mip)?,
            Command::CopyBuffer {
                src,
                dst,
                src_offset,
                dst_offset,
                size,
            } => {
                let src = native(&self.natives.buffers, *src)?;
                let dst = native(&self.natives.buffers, *dst)?;
                let region = D3D11_BOX {
                    left: *src_offset as u32,
                    top: 0,
                    front: 0,
                    right: (*src_offset + *size) as u32,
                    bottom: 1,
                    back: 1,
                };
                context.CopySubresourceRegion(
                    &dst.buffer,
                    0,
                    *dst_offset as u32,
                    0,
                    0,
                    &src.buffer,
                    0,
                    Some(&region),
                );
            }
            Command::CopyBufferToImage { src, dst, regions } => {
                let src_desc = self.registry.buffer(*src)?;
                let shadow = native(&self.natives.buffers, *src)?.shadow.as_ref().ok_or_else(|| {
                    Dx11Error::Unsupported(format!(
                        "'{}' is copied to an image but is not host visible",
                        src_desc.debug_name
                    ))
                })?;
                let desc = self.registry.image(*dst)?;
                let image = native(&self.natives.images, *dst)?;
                let volume = ViewShape::of(desc) == ViewShape::Texture3D;
                for region in regions {
                    let slice = D3D11_BOX {
                        left: 0,
                        top: 0,
                        front: 0,
                        right: region.width,
                        bottom: region.height,
                        back: 1,
                    };
                    context.UpdateSubresource(
                        &image.resource,
                        subresource_index(region.mip, region.layer, desc.mip_levels),
                        volume.then_some(std::ptr::addr_of!(slice)),
                        shadow[region.offset as usize..].as_ptr().cast(),
                        row_pitch(desc.format, region.width),
                        depth_pitch(desc.format, region.width, region.height),
                    );
                }
            }
            Command::BeginDebugLabel { name, .. } => {
                if let Some(annotation) = self.annotation {
                    annotation.BeginEvent(&HSTRING::from(name.as_str()));
                }
            }
            Command::EndDebugLabel => {
                if let Some(annotation) = self.annotation {
                    annotation.EndEvent();
                }
            }
        }
        Ok(())
    }

    unsafe fn apply_depth_bias(&mut self) -> Result<()> {
        let (Some(pipeline), Some((constant, clamp, slope))) = (self.state.graphics, self.state.depth_bias) else {
            return Ok(());
        };
        let pipeline = native(&self.natives.graphics_pipelines, pipeline)?;
        let mut desc = pipeline.rasterizer_desc;
        desc.DepthBias = constant as i32;
        desc.DepthBiasClamp = clamp;
        desc.SlopeScaledDepthBias = slope;
        let mut biased: Option<ID3D11RasterizerState> = None;
        // The device deduplicates identical rasterizer descriptions.
        self.device.CreateRasterizerState(&desc, Some(&mut biased))?;
        self.context.RSSetState(biased.as_ref());
        Ok(())
    }

    unsafe fn copy_image(
        &self,
        src: cinder_rhi::ImageHandle,
        src_mip: u32,
        dst: cinder_rhi::ImageHandle,
        dst_mip: u32,
    ) -> Result<()> {
        let src_desc = self.registry.image(src)?;
        let dst_desc = self.registry.image(dst)?;
        let src_extent = (mip_extent(src_desc.width, src_mip), mip_extent(src_desc.height, src_mip));
        let dst_extent = (mip_extent(dst_desc.width, dst_mip), mip_extent(dst_desc.height, dst_mip));
        if src_extent != dst_extent || src_desc.format != dst_desc.format {
            return Err(Dx11Error::Unsupported(format!(
                "blit from '{}' {src_extent:?} to '{}' {dst_extent:?} needs scaling or conversion",
                src_desc.debug_name, dst_desc.debug_name
            )));
        }
        let src_image = native(&self.natives.images, src)?;
        let dst_image = native(&self.natives.images, dst)?;
        for layer in 0..src_desc.array_layers.min(dst_desc.array_layers) {
            self.context.CopySubresourceRegion(
                &dst_image.resource,
                subresource_index(dst_mip, layer, dst_desc.mip_levels),
                0,
                0,
                0,
                &src_image.resource,
                subresource_index(src_mip, layer, src_desc.mip_levels),
                None,
            );
        }
        Ok(())
    }

    unsafe fn unbind(&mut self, unbind: Unbind) {
        if !unbind.any() {
            return;
        }
        let context = self.context;
        if unbind.shader_resources && self.state.srv_high > 0 {
            let nulls: Vec<Option<ID3D11ShaderResourceView>> = vec![None; self.state.srv_high as usize];
            context.VSSetShaderResources(0, Some(&nulls));
            context.HSSetShaderResources(0, Some(&nulls));
            context.DSSetShaderResources(0, Some(&nulls));
            context.GSSetShaderResources(0, Some(&nulls));
            context.PSSetShaderResources(0, Some(&nulls));
            context.CSSetShaderResources(0, Some(&nulls));
            self.state.srv_high = 0;
        }
        if unbind.unordered_access && self.state.uav_high > 0 {
            let nulls: Vec<Option<ID3D11UnorderedAccessView>> = vec![None; self.state.uav_high as usize];
            context.CSSetUnorderedAccessViews(0, self.state.uav_high, Some(nulls.as_ptr()), None);
            self.state.uav_high = 0;
        }
        if unbind.render_targets {
            context.OMSetRenderTargets(None, None::<&ID3D11DepthStencilView>);
        }
        self.state.graphics_sets.dirty = true;
        self.state.compute_sets.dirty = true;
        trace!("Unbound views for barrier: {unbind:?}");
    }

    unsafe fn flush_graphics_sets(&mut self) -> Result<()> {
        if !self.state.graphics_sets.dirty {
            return Ok(());
        }
        let Some(pipeline) = self.state.graphics else {
            return Ok(());
        };
        let natives = self.natives;
        let registers = &native(&natives.graphics_pipelines, pipeline)?.registers;
        let sets = std::mem::take(&mut self.state.graphics_sets.sets);
        let result = self.apply_sets(&sets, registers, false);
        self.state.graphics_sets = BoundSets { sets, dirty: false };
        result
    }

    unsafe fn flush_compute_sets(&mut self) -> Result<()> {
        if !self.state.compute_sets.dirty {
            return Ok(());
        }
        let Some(pipeline) = self.state.compute else {
            return Ok(());
        };
        let natives = self.natives;
        let registers = &native(&natives.compute_pipelines, pipeline)?.registers;
        let sets = std::mem::take(&mut self.state.compute_sets.sets);
        let result = self.apply_sets(&sets, registers, true);
        self.state.compute_sets = BoundSets { sets, dirty: false };
        result
    }

    unsafe fn apply_sets(
        &mut self,
        sets: &[Option<DescriptorSetHandle>],
        registers: &RegisterMap,
        compute: bool,
    ) -> Result<()> {
        for (set_index, set) in (0u32..).zip(sets) {
            let Some(set) = set else {
                continue;
            };
            let desc = self.registry.descriptor_set(*set)?;
            for slot in &desc.slots {
                let (Some(item), Some(register)) = (slot.item, registers.get(set_index, slot.binding)) else {
                    continue;
                };
                let Some(view) = self.resolve(slot.kind, item)? else {
                    continue;
                };
                match register.class {
                    RegisterClass::ShaderResource => {
                        self.state.srv_high = self.state.srv_high.max(register.slot + 1);
                    }
                    RegisterClass::UnorderedAccess => {
                        self.state.uav_high = self.state.uav_high.max(register.slot + 1);
                    }
                    RegisterClass::ConstantBuffer | RegisterClass::Sampler => {}
                }
                if compute {
                    if register.stages.contains(ShaderStages::COMPUTE) {
                        bind_view(self.context, ShaderStages::COMPUTE, register.slot, &view);
                    }
                } else {
                    for stage in GRAPHICS_STAGES {
                        if register.stages.contains(stage) {
                            bind_view(self.context, stage, register.slot, &view);
                        }
                    }
                }
            }
            trace!("Applied set '{}' at {}", desc.debug_name, set_index);
        }
        Ok(())
    }

    fn resolve(&self, kind: BindingKind, item: BoundResource) -> Result<Option<View>> {
        let view = match (kind, item) {
            (BindingKind::UniformBuffer, BoundResource::Buffer(buffer)) => {
                Some(View::Constant(native(&self.natives.buffers, buffer)?.buffer.clone()))
            }
            (BindingKind::StorageBuffer, BoundResource::Buffer(buffer)) => native(&self.natives.buffers, buffer)?
                .uav
                .clone()
                .map(View::UnorderedAccess),
            (BindingKind::SampledImage | BindingKind::DepthImage, BoundResource::Image(image)) => {
                native(&self.natives.images, image)?.srv.clone().map(View::ShaderResource)
            }
            (BindingKind::StorageImage, BoundResource::Image(image)) => {
                native(&self.natives.images, image)?.uav.clone().map(View::UnorderedAccess)
            }
            (BindingKind::Sampler, BoundResource::Sampler(sampler)) => {
                Some(View::Sampler(native(&self.natives.samplers, sampler)?.clone()))
            }
            _ => None,
        };
        Ok(view)
    }
}

fn full_viewport(width: u32, height: u32) -> D3D11_VIEWPORT {
    D3D11_VIEWPORT {
        TopLeftX: 0.0,
        TopLeftY: 0.0,
        Width: width as f32,
        Height: height as f32,
        MinDepth: 0.0,
        MaxDepth: 1.0,
    }
}

macro_rules! bind_stage {
    ($context:expr, $slot:expr, $view:expr, $cb:ident, $srv:ident, $sampler:ident) => {
        match $view {
            View::Constant(buffer) => $context.$cb($slot, Some(&[Some(buffer.clone())])),
            View::ShaderResource(srv) => $context.$srv($slot, Some(&[Some(srv.clone())])),
            View::Sampler(sampler) => $context.$sampler($slot, Some(&[Some(sampler.clone())])),
            View::UnorderedAccess(_) => {}
        }
    };
}

/// Bind `view` at `slot` of one stage's register file.
unsafe fn bind_view(context: &ID3D11DeviceContext, stage: ShaderStages, slot: u32, view: &View) {
    if stage == ShaderStages::VERTEX {
        bind_stage!(context, slot, view, VSSetConstantBuffers, VSSetShaderResources, VSSetSamplers);
    } else if stage == ShaderStages::TESS_CTRL {
        bind_stage!(context, slot, view, HSSetConstantBuffers, HSSetShaderResources, HSSetSamplers);
    } else if stage == ShaderStages::TESS_EVAL {
        bind_stage!(context, slot, view, DSSetConstantBuffers, DSSetShaderResources, DSSetSamplers);
    } else if stage == ShaderStages::GEOMETRY {
        bind_stage!(context, slot, view, GSSetConstantBuffers, GSSetShaderResources, GSSetSamplers);
    } else if stage == ShaderStages::FRAGMENT {
        bind_stage!(context, slot, view, PSSetConstantBuffers, PSSetShaderResources, PSSetSamplers);
    } else if stage == ShaderStages::COMPUTE {
        if let View::UnorderedAccess(uav) = view {
            let views = [Some(uav.clone())];
            context.CSSetUnorderedAccessViews(slot, 1, Some(views.as_ptr()), None);
        } else {
            bind_stage!(context, slot, view, CSSetConstantBuffers, CSSetShaderResources, CSSetSamplers);
        }
    }
}

#[cfg(test)]
mod tests {
    use cinder_rhi::DescriptorSetHandle;
    use slotmap::KeyData;

    use super::*;

    fn set(index: u64) -> DescriptorSetHandle {
        DescriptorSetHandle::from(KeyData::from_ffi(index))
    }

    #[test]
    fn binding_sets_grows_and_keeps_lower_sets() {
        let mut bound = BoundSets::default();
        bound.bind(0, &[set(1)]);
        bound.dirty = false;
        bound.bind(2, &[set(2)]);
        assert_eq!(bound.sets, vec![Some(set(1)), None, Some(set(2))]);
        assert!(bound.dirty);
    }

    #[test]
    fn rebinding_replaces_only_the_given_range() {
        let mut bound = BoundSets::default();
        bound.bind(0, &[set(1), set(2)]);
        bound.bind(1, &[set(3)]);
        assert_eq!(bound.sets, vec![Some(set(1)), Some(set(3))]);
    }
}

//! Graphics and compute pipeline creation.

use std::ffi::CString;
use std::io::Cursor;

use ash::vk;
use cinder_rhi::{GraphicsPipelineDesc, ShaderStageInfo, VertexBindingLayout};

use crate::error::{Result, VulkanError};
use crate::translate::{
    blend_factor_to_vk, blend_op_to_vk, color_mask_to_vk, compare_to_vk, cull_mode_to_vk,
    format_to_vk, front_face_to_vk, input_rate_to_vk, polygon_mode_to_vk, shader_stages_to_vk,
    topology_to_vk,
};

/// A pipeline and the layout it was built against.
#[derive(Clone, Copy, Debug)]
pub struct NativePipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

/// Shader modules of one pipeline, destroyed once the pipeline exists.
struct ShaderModules<'d> {
    device: &'d ash::Device,
    modules: Vec<vk::ShaderModule>,
    entry_points: Vec<CString>,
}

impl<'d> ShaderModules<'d> {
    unsafe fn new(device: &'d ash::Device, stages: &[ShaderStageInfo<'_>], pipeline: &str) -> Result<Self> {
        let mut modules = Self {
            device,
            modules: Vec::with_capacity(stages.len()),
            entry_points: Vec::with_capacity(stages.len()),
        };
        for stage in stages {
            let code = ash::util::read_spv(&mut Cursor::new(stage.code)).map_err(|e| {
                VulkanError::ShaderModule(format!("'{pipeline}' {:?}: {e}", stage.stage))
            })?;
            let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
            let module = device.create_shader_module(&create_info, None).map_err(|e| {
                VulkanError::ShaderModule(format!("'{pipeline}' {:?}: {e}", stage.stage))
            })?;
            modules.modules.push(module);
            modules.entry_points.push(
                CString::new(stage.entry_point)
                    .map_err(|e| VulkanError::ShaderModule(format!("'{pipeline}': {e}")))?,
            );
        }
        Ok(modules)
    }

    fn stage_infos(&self, stages: &[ShaderStageInfo<'_>]) -> Vec<vk::PipelineShaderStageCreateInfo<'_>> {
        stages
            .iter()
            .zip(&self.modules)
            .zip(&self.entry_points)
            .map(|((stage, &module), entry)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(shader_stages_to_vk(stage.stage))
                    .module(module)
                    .name(entry)
            })
            .collect()
    }
}

impl Drop for ShaderModules<'_> {
    fn drop(&mut self) {
        for module in self.modules.drain(..) {
            unsafe { self.device.destroy_shader_module(module, None) };
        }
    }
}

unsafe fn create_layout(
    device: &ash::Device,
    set_layouts: &[vk::DescriptorSetLayout],
) -> Result<vk::PipelineLayout> {
    let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(set_layouts);
    device
        .create_pipeline_layout(&layout_info, None)
        .map_err(|e| VulkanError::PipelineCreation(e.to_string()))
}

fn vertex_input(
    layouts: &[VertexBindingLayout],
) -> (
    Vec<vk::VertexInputBindingDescription>,
    Vec<vk::VertexInputAttributeDescription>,
) {
    let bindings = layouts
        .iter()
        .enumerate()
        .map(|(binding, layout)| vk::VertexInputBindingDescription {
            binding: binding as u32,
            stride: layout.stride,
            input_rate: input_rate_to_vk(layout.input_rate),
        })
        .collect();
    let attributes = layouts
        .iter()
        .enumerate()
        .flat_map(|(binding, layout)| {
            layout
                .attributes
                .iter()
                .map(move |attribute| vk::VertexInputAttributeDescription {
                    location: attribute.location,
                    binding: binding as u32,
                    format: format_to_vk(attribute.format),
                    offset: attribute.offset,
                })
        })
        .collect();
    (bindings, attributes)
}

fn dynamic_states(desc: &GraphicsPipelineDesc) -> Vec<vk::DynamicState> {
    let mut states = vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    if desc.raster.depth_bias {
        states.push(vk::DynamicState::DEPTH_BIAS);
    }
    states
}

/// Build a graphics pipeline for subpass 0 of `render_pass`.
///
/// # Safety
/// The device, render pass and set layouts must be valid.
#[allow(clippy::too_many_arguments)]
pub unsafe fn create_graphics_pipeline(
    device: &ash::Device,
    desc: &GraphicsPipelineDesc,
    stages: &[ShaderStageInfo<'_>],
    render_pass: vk::RenderPass,
    color_attachment_count: usize,
    set_layouts: &[vk::DescriptorSetLayout],
    supports_wide_lines: bool,
    supports_depth_clamp: bool,
) -> Result<NativePipeline> {
    let modules = ShaderModules::new(device, stages, &desc.debug_name)?;
    let stage_infos = modules.stage_infos(stages);

    let (vertex_bindings, vertex_attributes) = vertex_input(&desc.vertex_bindings);
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&vertex_bindings)
        .vertex_attribute_descriptions(&vertex_attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(topology_to_vk(desc.topology))
        .primitive_restart_enable(false);

    // Viewport and scissor are dynamic.
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let line_width = match desc.raster.line_width {
        Some(width) if supports_wide_lines => width,
        _ => 1.0,
    };
    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(desc.raster.depth_clamp && supports_depth_clamp)
        .rasterizer_discard_enable(false)
        .polygon_mode(polygon_mode_to_vk(desc.raster.polygon_mode))
        .cull_mode(cull_mode_to_vk(desc.raster.cull_mode))
        .front_face(front_face_to_vk(desc.raster.front_face))
        .depth_bias_enable(desc.raster.depth_bias)
        .line_width(line_width);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1)
        .sample_shading_enable(false);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(desc.depth.test)
        .depth_write_enable(desc.depth.write)
        .depth_compare_op(compare_to_vk(desc.depth.compare))
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let color_blend_attachments: Vec<_> = (0..color_attachment_count)
        .map(|index| {
            let blend = desc.blend_for(index);
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(blend.enabled)
                .src_color_blend_factor(blend_factor_to_vk(blend.src_color))
                .dst_color_blend_factor(blend_factor_to_vk(blend.dst_color))
                .color_blend_op(blend_op_to_vk(blend.color_op))
                .src_alpha_blend_factor(blend_factor_to_vk(blend.src_alpha))
                .dst_alpha_blend_factor(blend_factor_to_vk(blend.dst_alpha))
                .alpha_blend_op(blend_op_to_vk(blend.alpha_op))
                .color_write_mask(color_mask_to_vk(blend.color_mask))
        })
        .collect();
    let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let dynamic_states = dynamic_states(desc);
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let layout = create_layout(device, set_layouts)?;

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stage_infos)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0);

    let pipelines = device
        .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        .map_err(|(_pipelines, e)| {
            device.destroy_pipeline_layout(layout, None);
            VulkanError::PipelineCreation(format!("'{}': {e}", desc.debug_name))
        })?;

    Ok(NativePipeline {
        pipeline: pipelines[0],
        layout,
    })
}

/// Build a compute pipeline.
///
/// # Safety
/// The device and set layouts must be valid.
pub unsafe fn create_compute_pipeline(
    device: &ash::Device,
    debug_name: &str,
    stage: &ShaderStageInfo<'_>,
    set_layouts: &[vk::DescriptorSetLayout],
) -> Result<NativePipeline> {
    let stages = std::slice::from_ref(stage);
    let modules = ShaderModules::new(device, stages, debug_name)?;
    let stage_info = modules.stage_infos(stages)[0];

    let layout = create_layout(device, set_layouts)?;
    let pipeline_info = vk::ComputePipelineCreateInfo::default()
        .stage(stage_info)
        .layout(layout);

    let pipelines = device
        .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        .map_err(|(_pipelines, e)| {
            device.destroy_pipeline_layout(layout, None);
            VulkanError::PipelineCreation(format!("'{debug_name}': {e}"))
        })?;

    Ok(NativePipeline {
        pipeline: pipelines[0],
        layout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_rhi::{
        DepthState, Format, PrimitiveTopology, RasterState, RenderPassHandle, ShaderStages,
        VertexAttribute, VertexInputRate,
    };

    fn desc(raster: RasterState, vertex_bindings: Vec<VertexBindingLayout>) -> GraphicsPipelineDesc {
        GraphicsPipelineDesc {
            debug_name: "Shadow".into(),
            stages: ShaderStages::VERTEX,
            vertex_bindings,
            set_layouts: Vec::new(),
            render_pass: RenderPassHandle::default(),
            topology: PrimitiveTopology::TriangleList,
            raster,
            depth: DepthState::READ_WRITE,
            blend: Vec::new(),
        }
    }

    #[test]
    fn depth_bias_is_dynamic_only_when_enabled() {
        let plain = desc(RasterState::default(), Vec::new());
        assert_eq!(dynamic_states(&plain).len(), 2);

        let biased = desc(
            RasterState {
                depth_bias: true,
                ..RasterState::default()
            },
            Vec::new(),
        );
        assert!(dynamic_states(&biased).contains(&vk::DynamicState::DEPTH_BIAS));
    }

    #[test]
    fn attributes_follow_their_binding_index() {
        let layouts = vec![
            VertexBindingLayout {
                stride: 12,
                input_rate: VertexInputRate::Vertex,
                attributes: vec![VertexAttribute::new("Position", 0, 0, Format::R32G32B32Sfloat)],
            },
            VertexBindingLayout {
                stride: 64,
                input_rate: VertexInputRate::Instance,
                attributes: vec![
                    VertexAttribute::new("Model Row 0", 1, 0, Format::R32G32B32A32Sfloat),
                    VertexAttribute::new("Model Row 1", 2, 16, Format::R32G32B32A32Sfloat),
                ],
            },
        ];
        let (bindings, attributes) = vertex_input(&layouts);
        assert_eq!(bindings[1].input_rate, vk::VertexInputRate::INSTANCE);
        assert_eq!(attributes.len(), 3);
        assert_eq!(attributes[2].binding, 1);
        assert_eq!(attributes[2].offset, 16);
    }
}

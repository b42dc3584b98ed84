//! Submit-time validation of recorded commands against live resources.
//!
//! Recording only enforces the state machine. This pass replays the command
//! list with the registry in hand and checks that every draw and dispatch has
//! a pipeline and compatible, fully populated descriptor sets bound.

use crate::command::{formats_match, BindPoint, Command, CommandBuffer};
use crate::error::{Result, RhiError};
use crate::handles::{
    ComputePipelineHandle, DescriptorSetHandle, DescriptorSetLayoutHandle, GraphicsPipelineHandle,
    RenderPassHandle,
};
use crate::registry::ResourceRegistry;

#[derive(Default)]
struct BindState {
    graphics: Option<GraphicsPipelineHandle>,
    compute: Option<ComputePipelineHandle>,
    graphics_sets: Vec<Option<DescriptorSetHandle>>,
    compute_sets: Vec<Option<DescriptorSetHandle>>,
    render_pass: Option<RenderPassHandle>,
    index_bound: bool,
}

fn bind_sets(slots: &mut Vec<Option<DescriptorSetHandle>>, first: u32, sets: &[DescriptorSetHandle]) {
    let end = first as usize + sets.len();
    if slots.len() < end {
        slots.resize(end, None);
    }
    for (i, set) in sets.iter().enumerate() {
        slots[first as usize + i] = Some(*set);
    }
}

/// Counts gathered while validating, useful to tests and debug overlays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommandStats {
    pub render_passes: u32,
    pub draws: u32,
    pub dispatches: u32,
    pub barriers: u32,
}

/// Validate `cmd` against `resources`.
pub fn validate_command_buffer(resources: &ResourceRegistry, cmd: &CommandBuffer) -> Result<CommandStats> {
    let mut state = BindState::default();
    let mut stats = CommandStats::default();
    let fail = |reason: String| RhiError::InvalidCommandState {
        buffer: cmd.debug_name().to_owned(),
        reason,
    };

    for (index, command) in cmd.commands().iter().enumerate() {
        match command {
            Command::BeginRenderPass {
                render_pass,
                framebuffer,
                clear_colors,
                clear_depth,
                ..
            } => {
                let pass = resources.render_pass(*render_pass)?;
                let fb = resources.framebuffer(*framebuffer)?;
                resources.check_framebuffer(fb)?;
                if !formats_match(resources.render_pass(fb.render_pass)?, pass) {
                    return Err(RhiError::IncompatibleFramebuffer {
                        framebuffer: fb.debug_name.clone(),
                        render_pass: pass.debug_name.clone(),
                        reason: "attachment formats differ".into(),
                    });
                }
                let clears = clear_colors.len() + usize::from(clear_depth.is_some());
                if clears != 0 && clears != pass.clear_value_count() {
                    return Err(fail(format!(
                        "command {index}: {clears} clear values for '{}' which needs {}",
                        pass.debug_name,
                        pass.clear_value_count()
                    )));
                }
                state.render_pass = Some(*render_pass);
                stats.render_passes += 1;
            }
            Command::EndRenderPass => state.render_pass = None,
            Command::BindGraphicsPipeline(pipeline) => {
                resources.graphics_pipeline(*pipeline)?;
                state.graphics = Some(*pipeline);
            }
            Command::BindComputePipeline(pipeline) => {
                resources.compute_pipeline(*pipeline)?;
                state.compute = Some(*pipeline);
            }
            Command::BindDescriptorSets {
                bind_point,
                first_set,
                sets,
            } => {
                for set in sets {
                    resources.descriptor_set(*set)?;
                }
                let slots = match bind_point {
                    BindPoint::Graphics => &mut state.graphics_sets,
                    BindPoint::Compute => &mut state.compute_sets,
                };
                bind_sets(slots, *first_set, sets);
            }
            Command::BindVertexBuffers { buffers, .. } => {
                for (buffer, _) in buffers {
                    resources.buffer(*buffer)?;
                }
            }
            Command::BindIndexBuffer { buffer, .. } => {
                resources.buffer(*buffer)?;
                state.index_bound = true;
            }
            Command::BindVertexArray(vertex_array) => {
                let desc = resources.vertex_array(*vertex_array)?;
                for buffer in &desc.vertex_buffers {
                    resources.buffer(*buffer)?;
                }
                if let Some(index) = desc.index_buffer {
                    resources.buffer(index)?;
                    state.index_bound = true;
                }
            }
            Command::DrawVertices { .. } | Command::DrawIndices { .. } => {
                let Some(pipeline) = state.graphics else {
                    return Err(fail(format!("command {index}: draw without a graphics pipeline")));
                };
                if matches!(command, Command::DrawIndices { .. }) && !state.index_bound {
                    return Err(fail(format!("command {index}: indexed draw without an index buffer")));
                }
                let desc = resources.graphics_pipeline(pipeline)?;
                if let Some(current) = state.render_pass {
                    let pipeline_pass = resources.render_pass(desc.render_pass)?;
                    if !formats_match(pipeline_pass, resources.render_pass(current)?) {
                        return Err(fail(format!(
                            "command {index}: '{}' was built for '{}'",
                            desc.debug_name, pipeline_pass.debug_name
                        )));
                    }
                }
                check_sets(resources, &desc.debug_name, &desc.set_layouts, &state.graphics_sets)
                    .map_err(|reason| fail(format!("command {index}: {reason}")))?;
                stats.draws += 1;
            }
            Command::Dispatch { x, y, z } => {
                let Some(pipeline) = state.compute else {
                    return Err(fail(format!("command {index}: dispatch without a compute pipeline")));
                };
                if *x == 0 || *y == 0 || *z == 0 {
                    return Err(fail(format!("command {index}: empty dispatch {x}x{y}x{z}")));
                }
                let desc = resources.compute_pipeline(pipeline)?;
                check_sets(resources, &desc.debug_name, &desc.set_layouts, &state.compute_sets)
                    .map_err(|reason| fail(format!("command {index}: {reason}")))?;
                stats.dispatches += 1;
            }
            Command::ImageBarrier(barrier) => {
                resources.image(barrier.image)?;
                stats.barriers += 1;
            }
            Command::BufferBarrier(barrier) => {
                resources.buffer(barrier.buffer)?;
                stats.barriers += 1;
            }
            Command::BlitImage { src, src_mip, dst, dst_mip } => {
                let src_desc = resources.image(*src)?;
                let dst_desc = resources.image(*dst)?;
                if *src_mip >= src_desc.mip_levels || *dst_mip >= dst_desc.mip_levels {
                    return Err(fail(format!("command {index}: blit mip out of range")));
                }
            }
            Command::CopyBuffer {
                src,
                dst,
                src_offset,
                dst_offset,
                size,
            } => {
                let src_desc = resources.buffer(*src)?;
                let dst_desc = resources.buffer(*dst)?;
                if src_offset + size > src_desc.size || dst_offset + size > dst_desc.size {
                    return Err(RhiError::UploadOutOfRange(format!(
                        "copy of {size} bytes from '{}' to '{}'",
                        src_desc.debug_name, dst_desc.debug_name
                    )));
                }
            }
            Command::CopyBufferToImage { src, dst, regions } => {
                let src_desc = resources.buffer(*src)?;
                resources.image(*dst)?;
                if let Some(last) = regions.iter().map(|r| r.offset + r.size).max() {
                    if last > src_desc.size {
                        return Err(RhiError::UploadOutOfRange(format!(
                            "image copy reads {last} bytes from '{}' ({} bytes)",
                            src_desc.debug_name, src_desc.size
                        )));
                    }
                }
            }
            Command::SetViewport(_)
            | Command::SetScissor(_)
            | Command::SetDepthBias { .. }
            | Command::BeginDebugLabel { .. }
            | Command::EndDebugLabel => {}
        }
    }
    Ok(stats)
}

fn check_sets(
    resources: &ResourceRegistry,
    pipeline: &str,
    layouts: &[DescriptorSetLayoutHandle],
    bound: &[Option<DescriptorSetHandle>],
) -> std::result::Result<(), String> {
    for (index, &layout) in layouts.iter().enumerate() {
        let Some(set) = bound.get(index).copied().flatten() else {
            return Err(format!("'{pipeline}' needs a descriptor set at index {index}"));
        };
        let set = resources.descriptor_set(set).map_err(|e| e.to_string())?;
        if set.layout != layout {
            let expected = resources.set_layout(layout).map_err(|e| e.to_string())?;
            let actual = resources.set_layout(set.layout).map_err(|e| e.to_string())?;
            if expected.bindings != actual.bindings {
                return Err(format!(
                    "'{}' at index {index} uses layout '{}', '{pipeline}' expects '{}'",
                    set.debug_name, actual.debug_name, expected.debug_name
                ));
            }
        }
        if let Some(empty) = set.first_empty_slot() {
            return Err(format!(
                "'{}' slot {} ({:?}) is empty",
                set.debug_name, empty.binding, empty.kind
            ));
        }
    }
    Ok(())
}

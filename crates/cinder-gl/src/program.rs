//! Shader compilation, program linking and vertex formats.
//!
//! Shader code is GLSL source text. Each stage is compiled separately and
//! linked into one program; the shader objects are released right after.

use cinder_rhi::{ShaderStageInfo, VertexBindingLayout, VertexInputRate};
use glow::HasContext;
use tracing::debug;

use crate::error::{GlError, Result};
use crate::translate::{attribute_format, shader_stage_to_gl};

/// Compile and link `stages` into a program.
///
/// # Safety
/// The context must be current.
pub unsafe fn link_program(
    gl: &glow::Context,
    name: &str,
    stages: &[ShaderStageInfo<'_>],
) -> Result<glow::Program> {
    let program = gl.create_program().map_err(GlError::ObjectCreation)?;
    let mut shaders = Vec::with_capacity(stages.len());

    let mut linked = Ok(());
    for stage in stages {
        match compile_shader(gl, name, stage) {
            Ok(shader) => {
                gl.attach_shader(program, shader);
                shaders.push(shader);
            }
            Err(err) => {
                linked = Err(err);
                break;
            }
        }
    }

    if linked.is_ok() {
        gl.link_program(program);
        if !gl.get_program_link_status(program) {
            linked = Err(GlError::Link {
                name: name.to_owned(),
                log: gl.get_program_info_log(program),
            });
        }
    }

    for shader in shaders {
        gl.detach_shader(program, shader);
        gl.delete_shader(shader);
    }

    match linked {
        Ok(()) => {
            debug!("Linked program '{name}' from {} stages", stages.len());
            Ok(program)
        }
        Err(err) => {
            gl.delete_program(program);
            Err(err)
        }
    }
}

unsafe fn compile_shader(
    gl: &glow::Context,
    name: &str,
    stage: &ShaderStageInfo<'_>,
) -> Result<glow::Shader> {
    let ty = shader_stage_to_gl(stage.stage)
        .ok_or_else(|| GlError::Unsupported(format!("{:?} is not a single stage", stage.stage)))?;
    let source = std::str::from_utf8(stage.code).map_err(|e| GlError::Compile {
        name: name.to_owned(),
        log: format!("{:?} code is not GLSL text: {e}", stage.stage),
    })?;

    let shader = gl.create_shader(ty).map_err(GlError::ObjectCreation)?;
    gl.shader_source(shader, source);
    gl.compile_shader(shader);
    if !gl.get_shader_compile_status(shader) {
        let log = gl.get_shader_info_log(shader);
        gl.delete_shader(shader);
        return Err(GlError::Compile {
            name: format!("{name} ({:?})", stage.stage),
            log,
        });
    }
    Ok(shader)
}

/// Describe `layouts` on the currently bound vertex array.
///
/// Binding index `i` of the VAO corresponds to `layouts[i]`. Returns the
/// stride of each binding.
///
/// # Safety
/// The context must be current and a vertex array bound.
pub unsafe fn apply_vertex_formats(
    gl: &glow::Context,
    name: &str,
    layouts: &[VertexBindingLayout],
) -> Result<Vec<i32>> {
    let mut strides = Vec::with_capacity(layouts.len());
    for (binding, layout) in (0u32..).zip(layouts) {
        for attribute in &layout.attributes {
            let format = attribute_format(attribute.format).ok_or_else(|| {
                GlError::Unsupported(format!(
                    "'{name}': attribute '{}' uses {:?}",
                    attribute.debug_name, attribute.format
                ))
            })?;
            gl.enable_vertex_attrib_array(attribute.location);
            if format.integer {
                gl.vertex_attrib_format_i32(attribute.location, format.size, format.ty, attribute.offset);
            } else {
                gl.vertex_attrib_format_f32(
                    attribute.location,
                    format.size,
                    format.ty,
                    format.normalized,
                    attribute.offset,
                );
            }
            gl.vertex_attrib_binding(attribute.location, binding);
        }
        let divisor = match layout.input_rate {
            VertexInputRate::Vertex => 0,
            VertexInputRate::Instance => 1,
        };
        gl.vertex_binding_divisor(binding, divisor);
        strides.push(layout.stride as i32);
    }
    Ok(strides)
}

//! Depth of field: split the lit image into near and far layers, blur each
//! at quarter resolution, then blend them back over the lit image.

use cinder_rhi::{
    Binding, ClearColor, CommandBuffer, Core, DescriptorSetCreateInfo, DescriptorSetHandle,
    FramebufferCreateInfo, FramebufferHandle, GraphicsPipelineHandle, ImageAccess, ImageCreateInfo,
    ImageHandle, ResourceRegistry, Scissor, ShaderStages, Viewport,
};

use crate::error::Result;
use crate::layouts::DescriptorLayouts;
use crate::passes::{RenderPasses, HDR_FORMAT};

const DOF_DEBUG_COLOR: [f32; 4] = [0.3, 0.8, 0.8, 1.0];

fn half(extent: (u32, u32)) -> (u32, u32) {
    ((extent.0 / 2).max(1), (extent.1 / 2).max(1))
}

/// Graphics pipelines for the three DOF steps.
#[derive(Clone, Copy, Debug)]
pub struct DofPipelines {
    pub separation: GraphicsPipelineHandle,
    pub blur: GraphicsPipelineHandle,
    pub combination: GraphicsPipelineHandle,
}

#[derive(Debug)]
pub struct DepthOfField {
    pub near: ImageHandle,
    pub far: ImageHandle,
    pub near_blurred: ImageHandle,
    pub far_blurred: ImageHandle,
    pub separation_framebuffer: FramebufferHandle,
    pub near_blur_framebuffer: FramebufferHandle,
    pub far_blur_framebuffer: FramebufferHandle,
    pub combination_framebuffer: FramebufferHandle,
    pub source_set: DescriptorSetHandle,
    pub near_blur_set: DescriptorSetHandle,
    pub far_blur_set: DescriptorSetHandle,
    pub combination_set: DescriptorSetHandle,
}

impl DepthOfField {
    pub fn new<C: Core>(
        core: &mut C,
        passes: &RenderPasses,
        layouts: &DescriptorLayouts,
        framebuffer: (u32, u32),
        depth: ImageHandle,
        lit_hdr: ImageHandle,
    ) -> Result<Self> {
        let (half_w, half_h) = half(framebuffer);
        let (quarter_w, quarter_h) = half((half_w, half_h));
        let mut target = |name: &str| core.create_image(&ImageCreateInfo::render_target(name, HDR_FORMAT, half_w, half_h));
        let near = target("Near DOF Render Target")?;
        let far = target("Far DOF Render Target")?;
        let near_blurred = target("Near Blurred DOF Render Target")?;
        let far_blurred = target("Far Blurred DOF Render Target")?;

        let separation_framebuffer = core.create_framebuffer(&FramebufferCreateInfo {
            debug_name: "Depth of Field Separation Framebuffer",
            render_pass: passes.dof_separation,
            color_attachments: &[near, far],
            depth_attachment: None,
            width: half_w,
            height: half_h,
        })?;
        let near_blur_framebuffer = core.create_framebuffer(&FramebufferCreateInfo {
            debug_name: "Depth of Field Near Blur Framebuffer",
            render_pass: passes.dof_blur,
            color_attachments: &[near_blurred],
            depth_attachment: None,
            width: quarter_w,
            height: quarter_h,
        })?;
        let far_blur_framebuffer = core.create_framebuffer(&FramebufferCreateInfo {
            debug_name: "Depth of Field Far Blur Framebuffer",
            render_pass: passes.dof_blur,
            color_attachments: &[far_blurred],
            depth_attachment: None,
            width: quarter_w,
            height: quarter_h,
        })?;
        let combination_framebuffer = core.create_framebuffer(&FramebufferCreateInfo {
            debug_name: "Depth of Field Combination Framebuffer",
            render_pass: passes.dof_combine,
            color_attachments: &[lit_hdr],
            depth_attachment: None,
            width: framebuffer.0,
            height: framebuffer.1,
        })?;

        let source_set = core.create_descriptor_set(&DescriptorSetCreateInfo {
            debug_name: "Depth of Field Source Descriptor",
            layout: layouts.dof_source,
            bindings: &[Binding::depth_image(depth), Binding::sampled_image(lit_hdr)],
        })?;
        let near_blur_set = core.create_descriptor_set(&DescriptorSetCreateInfo {
            debug_name: "Depth of Field Blur Near Descriptor",
            layout: layouts.dof_blur,
            bindings: &[Binding::sampled_image(near)],
        })?;
        let far_blur_set = core.create_descriptor_set(&DescriptorSetCreateInfo {
            debug_name: "Depth of Field Blur Far Descriptor",
            layout: layouts.dof_blur,
            bindings: &[Binding::sampled_image(far)],
        })?;
        let combination_set = core.create_descriptor_set(&DescriptorSetCreateInfo {
            debug_name: "Depth of Field Combination Descriptor",
            layout: layouts.dof_combine,
            bindings: &[Binding::sampled_image(near_blurred), Binding::sampled_image(far_blurred)],
        })?;

        Ok(Self {
            near,
            far,
            near_blurred,
            far_blurred,
            separation_framebuffer,
            near_blur_framebuffer,
            far_blur_framebuffer,
            combination_framebuffer,
            source_set,
            near_blur_set,
            far_blur_set,
            combination_set,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        resources: &ResourceRegistry,
        cmd: &mut CommandBuffer,
        passes: &RenderPasses,
        pipelines: DofPipelines,
        engine_set: DescriptorSetHandle,
        gbuffer_set: DescriptorSetHandle,
        depth: ImageHandle,
        lit_hdr: ImageHandle,
        render: (u32, u32),
    ) -> Result<()> {
        let half_extent = half(render);
        let quarter_extent = half(half_extent);
        let fragment = ImageAccess::SampledRead(ShaderStages::FRAGMENT);

        cmd.begin_debug_label("Depth of Field Pass", Some(DOF_DEBUG_COLOR))?;

        cmd.use_image(depth, ImageAccess::DepthRead)?;
        cmd.use_image(lit_hdr, fragment)?;
        cmd.bind_render_pass(
            resources,
            passes.dof_separation,
            self.separation_framebuffer,
            half_extent.0,
            half_extent.1,
            &[ClearColor::TRANSPARENT; 2],
            None,
        )?;
        cmd.set_viewport(Viewport::from_size(half_extent.0, half_extent.1))?;
        cmd.set_scissor(Scissor::from_size(half_extent.0, half_extent.1))?;
        cmd.bind_graphics_pipeline(pipelines.separation)?;
        cmd.bind_graphics_descriptor_sets(0, &[engine_set, self.source_set])?;
        cmd.draw_vertices(6, 1, 0, 0)?;
        cmd.unbind_render_pass()?;

        for (source, framebuffer, set) in [
            (self.near, self.near_blur_framebuffer, self.near_blur_set),
            (self.far, self.far_blur_framebuffer, self.far_blur_set),
        ] {
            cmd.use_image(source, fragment)?;
            cmd.bind_render_pass(
                resources,
                passes.dof_blur,
                framebuffer,
                quarter_extent.0,
                quarter_extent.1,
                &[ClearColor::TRANSPARENT],
                None,
            )?;
            cmd.set_viewport(Viewport::from_size(quarter_extent.0, quarter_extent.1))?;
            cmd.set_scissor(Scissor::from_size(quarter_extent.0, quarter_extent.1))?;
            cmd.bind_graphics_pipeline(pipelines.blur)?;
            cmd.bind_graphics_descriptor_sets(0, &[engine_set, set])?;
            cmd.draw_vertices(6, 1, 0, 0)?;
            cmd.unbind_render_pass()?;
        }

        cmd.use_image(self.near_blurred, fragment)?;
        cmd.use_image(self.far_blurred, fragment)?;
        cmd.bind_render_pass(
            resources,
            passes.dof_combine,
            self.combination_framebuffer,
            render.0,
            render.1,
            &[],
            None,
        )?;
        cmd.set_viewport(Viewport::from_size(render.0, render.1))?;
        cmd.set_scissor(Scissor::from_size(render.0, render.1))?;
        cmd.bind_graphics_pipeline(pipelines.combination)?;
        cmd.bind_graphics_descriptor_sets(0, &[engine_set, gbuffer_set, self.combination_set])?;
        cmd.draw_vertices(6, 1, 0, 0)?;
        cmd.unbind_render_pass()?;

        cmd.end_debug_label()?;
        Ok(())
    }

    pub fn destroy<C: Core>(&self, core: &mut C) -> Result<()> {
        for set in [
            self.combination_set,
            self.far_blur_set,
            self.near_blur_set,
            self.source_set,
        ] {
            core.delete_descriptor_set(set)?;
        }
        for framebuffer in [
            self.combination_framebuffer,
            self.far_blur_framebuffer,
            self.near_blur_framebuffer,
            self.separation_framebuffer,
        ] {
            core.delete_framebuffer(framebuffer)?;
        }
        for image in [self.far_blurred, self.near_blurred, self.far, self.near] {
            core.delete_image(image)?;
        }
        Ok(())
    }
}

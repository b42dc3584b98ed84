//! Single-subpass render passes and their framebuffers.

use ash::vk;
use cinder_rhi::RenderPassDesc;

use crate::error::Result;
use crate::translate::format_to_vk;

/// A native render pass plus the layouts its attachments enter and leave in.
///
/// Attachments are ordered colors first, then depth.
pub struct NativeRenderPass {
    pub pass: vk::RenderPass,
    /// Layout a loaded attachment must already be in; `None` when it is cleared.
    pub initial_layouts: Vec<Option<vk::ImageLayout>>,
    pub final_layouts: Vec<vk::ImageLayout>,
}

struct AttachmentPlan {
    description: vk::AttachmentDescription,
    initial: Option<vk::ImageLayout>,
}

fn plan_attachments(desc: &RenderPassDesc) -> Vec<AttachmentPlan> {
    let color_final = if desc.presents {
        vk::ImageLayout::PRESENT_SRC_KHR
    } else {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    };

    let mut plans: Vec<AttachmentPlan> = desc
        .color_attachments
        .iter()
        .map(|attachment| {
            let (load_op, initial) = if attachment.should_clear {
                (vk::AttachmentLoadOp::CLEAR, None)
            } else {
                (
                    vk::AttachmentLoadOp::LOAD,
                    Some(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
                )
            };
            AttachmentPlan {
                description: vk::AttachmentDescription::default()
                    .format(format_to_vk(attachment.format))
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(load_op)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(initial.unwrap_or(vk::ImageLayout::UNDEFINED))
                    .final_layout(color_final),
                initial,
            }
        })
        .collect();

    if let Some(depth) = desc.depth_attachment {
        let attached = if depth.read_only {
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
        } else {
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        };
        let (load_op, initial) = if depth.should_clear {
            (vk::AttachmentLoadOp::CLEAR, None)
        } else {
            (vk::AttachmentLoadOp::LOAD, Some(attached))
        };
        let store_op = if depth.read_only {
            vk::AttachmentStoreOp::NONE
        } else {
            vk::AttachmentStoreOp::STORE
        };
        let stencil_load = if depth.format.has_stencil() {
            load_op
        } else {
            vk::AttachmentLoadOp::DONT_CARE
        };
        plans.push(AttachmentPlan {
            description: vk::AttachmentDescription::default()
                .format(format_to_vk(depth.format))
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(load_op)
                .store_op(store_op)
                .stencil_load_op(stencil_load)
                .stencil_store_op(store_op)
                .initial_layout(initial.unwrap_or(vk::ImageLayout::UNDEFINED))
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL),
            initial,
        });
    }
    plans
}

impl NativeRenderPass {
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device, desc: &RenderPassDesc) -> Result<Self> {
        let plans = plan_attachments(desc);
        let attachments: Vec<_> = plans.iter().map(|p| p.description).collect();

        let color_refs: Vec<_> = (0..desc.color_attachments.len() as u32)
            .map(|index| {
                vk::AttachmentReference::default()
                    .attachment(index)
                    .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            })
            .collect();
        let depth_ref = desc.depth_attachment.map(|depth| {
            vk::AttachmentReference::default()
                .attachment(desc.color_attachments.len() as u32)
                .layout(if depth.read_only {
                    vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
                } else {
                    vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
                })
        });

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if let Some(depth_ref) = depth_ref.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }

        let dependency = vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            )
            .dst_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            );

        let subpasses = [subpass];
        let dependencies = [dependency];
        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        let pass = device.create_render_pass(&create_info, None)?;

        Ok(Self {
            pass,
            initial_layouts: plans.iter().map(|p| p.initial).collect(),
            final_layouts: plans.iter().map(|p| p.description.final_layout).collect(),
        })
    }
}

/// # Safety
/// The device, render pass and views must be valid.
pub unsafe fn create_framebuffer(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    views: &[vk::ImageView],
    width: u32,
    height: u32,
) -> Result<vk::Framebuffer> {
    let create_info = vk::FramebufferCreateInfo::default()
        .render_pass(render_pass)
        .attachments(views)
        .width(width)
        .height(height)
        .layers(1);
    Ok(device.create_framebuffer(&create_info, None)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_rhi::{AttachmentInfo, DepthAttachmentInfo, Format};

    fn desc(presents: bool, read_only: bool) -> RenderPassDesc {
        RenderPassDesc {
            debug_name: "Lighting".into(),
            color_attachments: vec![
                AttachmentInfo::cleared(Format::R16G16B16A16Sfloat),
                AttachmentInfo::loaded(Format::R8G8B8A8Unorm),
            ],
            depth_attachment: Some(DepthAttachmentInfo {
                format: Format::D24UnormS8Uint,
                should_clear: false,
                read_only,
            }),
            debug_color: [1.0; 4],
            presents,
        }
    }

    #[test]
    fn cleared_attachments_start_undefined() {
        let plans = plan_attachments(&desc(false, false));
        assert_eq!(plans[0].initial, None);
        assert_eq!(plans[0].description.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(plans[1].initial, Some(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL));
        assert_eq!(
            plans[2].initial,
            Some(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        );
    }

    #[test]
    fn final_layouts_are_readable() {
        let plans = plan_attachments(&desc(false, true));
        assert_eq!(
            plans[0].description.final_layout,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
        assert_eq!(
            plans[2].description.final_layout,
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
        );
        assert_eq!(
            plans[2].initial,
            Some(vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL)
        );
    }

    #[test]
    fn presenting_passes_end_in_present_layout() {
        let plans = plan_attachments(&desc(true, false));
        assert_eq!(plans[0].description.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }
}

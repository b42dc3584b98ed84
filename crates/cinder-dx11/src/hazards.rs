//! Binding hygiene at barriers.
//!
//! D3D11 tracks hazards itself, but refuses to bind a resource for reading
//! while it is still bound for writing and silently nulls the read binding
//! instead. Barriers therefore clear the binding tables whose contents
//! could collide with the next access.

use cinder_rhi::{BufferAccess, ImageAccess};

/// Binding tables to clear before the next access.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Unbind {
    pub shader_resources: bool,
    pub unordered_access: bool,
    pub render_targets: bool,
}

impl Unbind {
    pub const fn any(self) -> bool {
        self.shader_resources || self.unordered_access || self.render_targets
    }
}

pub const fn unbind_for_image(src: Option<ImageAccess>, dst: ImageAccess) -> Unbind {
    let was_read = matches!(
        src,
        None | Some(ImageAccess::SampledRead(_) | ImageAccess::DepthRead)
    );
    Unbind {
        shader_resources: was_read && dst.is_write(),
        unordered_access: matches!(src, Some(ImageAccess::StorageWrite(_))),
        render_targets: matches!(
            src,
            Some(ImageAccess::ColorAttachment | ImageAccess::DepthAttachment)
        ),
    }
}

pub const fn unbind_for_buffer(src: Option<BufferAccess>, _dst: BufferAccess) -> Unbind {
    Unbind {
        shader_resources: false,
        unordered_access: matches!(src, Some(BufferAccess::StorageWrite(_))),
        render_targets: false,
    }
}

#[cfg(test)]
mod tests {
    use cinder_rhi::ShaderStages;

    use super::*;

    const CS: ShaderStages = ShaderStages::COMPUTE;
    const FS: ShaderStages = ShaderStages::FRAGMENT;

    #[test]
    fn storage_writes_release_their_views() {
        let unbind = unbind_for_image(Some(ImageAccess::StorageWrite(CS)), ImageAccess::SampledRead(CS));
        assert!(unbind.unordered_access);
        assert!(!unbind.shader_resources);
        assert!(!unbind.render_targets);
    }

    #[test]
    fn attachments_release_render_targets_before_sampling() {
        let unbind = unbind_for_image(Some(ImageAccess::ColorAttachment), ImageAccess::SampledRead(FS));
        assert_eq!(
            unbind,
            Unbind {
                render_targets: true,
                ..Unbind::default()
            }
        );
        let depth = unbind_for_image(Some(ImageAccess::DepthAttachment), ImageAccess::DepthRead);
        assert!(depth.render_targets);
    }

    #[test]
    fn sampled_images_are_released_before_writes() {
        let unbind = unbind_for_image(Some(ImageAccess::SampledRead(FS)), ImageAccess::ColorAttachment);
        assert!(unbind.shader_resources);
        let first_use = unbind_for_image(None, ImageAccess::StorageWrite(CS));
        assert!(first_use.shader_resources);
    }

    #[test]
    fn transfers_need_nothing() {
        let unbind = unbind_for_image(Some(ImageAccess::TransferDst), ImageAccess::TransferSrc);
        assert!(!unbind.any());
        assert!(!unbind_for_buffer(Some(BufferAccess::TransferDst), BufferAccess::VertexRead).any());
        assert!(unbind_for_buffer(Some(BufferAccess::StorageWrite(CS)), BufferAccess::IndirectRead).unordered_access);
    }
}

//! Descriptor set layouts, allocation and writes.

use ash::vk;
use cinder_rhi::{BindingKind, DescriptorSetLayoutDesc};

use crate::error::Result;
use crate::translate::{descriptor_type, shader_stages_to_vk};

/// # Safety
/// The device must be valid.
pub unsafe fn create_set_layout(
    device: &ash::Device,
    desc: &DescriptorSetLayoutDesc,
) -> Result<vk::DescriptorSetLayout> {
    let bindings: Vec<_> = desc
        .bindings
        .iter()
        .map(|binding| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding.binding)
                .descriptor_type(descriptor_type(binding.kind))
                .descriptor_count(binding.count)
                .stage_flags(shader_stages_to_vk(binding.stages))
        })
        .collect();
    let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
    Ok(device.create_descriptor_set_layout(&create_info, None)?)
}

/// # Safety
/// The device, pool and layout must be valid.
pub unsafe fn allocate_set(
    device: &ash::Device,
    pool: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
) -> Result<vk::DescriptorSet> {
    let layouts = [layout];
    let alloc_info = vk::DescriptorSetAllocateInfo::default()
        .descriptor_pool(pool)
        .set_layouts(&layouts);
    Ok(device.allocate_descriptor_sets(&alloc_info)?[0])
}

/// A slot update with every handle already resolved to its native object.
#[derive(Clone, Copy, Debug)]
pub enum SlotWrite {
    Buffer {
        binding: u32,
        kind: BindingKind,
        buffer: vk::Buffer,
        range: u64,
    },
    Image {
        binding: u32,
        kind: BindingKind,
        view: vk::ImageView,
        layout: vk::ImageLayout,
    },
    Sampler {
        binding: u32,
        sampler: vk::Sampler,
    },
}

/// Write resolved slots into `set`.
///
/// # Safety
/// The device, set and every referenced object must be valid.
pub unsafe fn write_slots(device: &ash::Device, set: vk::DescriptorSet, slots: &[SlotWrite]) {
    if slots.is_empty() {
        return;
    }

    // Info arrays must stay put while the writes point into them.
    let buffer_infos: Vec<_> = slots
        .iter()
        .map(|slot| match *slot {
            SlotWrite::Buffer { buffer, range, .. } => [vk::DescriptorBufferInfo::default()
                .buffer(buffer)
                .offset(0)
                .range(range)],
            _ => [vk::DescriptorBufferInfo::default()],
        })
        .collect();
    let image_infos: Vec<_> = slots
        .iter()
        .map(|slot| match *slot {
            SlotWrite::Image { view, layout, .. } => [vk::DescriptorImageInfo::default()
                .image_view(view)
                .image_layout(layout)],
            SlotWrite::Sampler { sampler, .. } => {
                [vk::DescriptorImageInfo::default().sampler(sampler)]
            }
            SlotWrite::Buffer { .. } => [vk::DescriptorImageInfo::default()],
        })
        .collect();

    let writes: Vec<_> = slots
        .iter()
        .enumerate()
        .map(|(index, slot)| {
            let write = vk::WriteDescriptorSet::default().dst_set(set).dst_array_element(0);
            match *slot {
                SlotWrite::Buffer { binding, kind, .. } => write
                    .dst_binding(binding)
                    .descriptor_type(descriptor_type(kind))
                    .buffer_info(&buffer_infos[index]),
                SlotWrite::Image { binding, kind, .. } => write
                    .dst_binding(binding)
                    .descriptor_type(descriptor_type(kind))
                    .image_info(&image_infos[index]),
                SlotWrite::Sampler { binding, .. } => write
                    .dst_binding(binding)
                    .descriptor_type(vk::DescriptorType::SAMPLER)
                    .image_info(&image_infos[index]),
            }
        })
        .collect();

    device.update_descriptor_sets(&writes, &[]);
}

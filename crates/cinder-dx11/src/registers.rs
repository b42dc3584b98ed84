//! Flattening of `(set, binding)` onto HLSL register slots.
//!
//! D3D11 has four register files per stage: `b` for constant buffers, `t`
//! for shader resource views, `u` for unordered access views and `s` for
//! samplers. A pipeline's set layouts are walked in set order and each
//! binding takes the next free register of its class, so shaders are
//! compiled with registers numbered the same way.

use cinder_rhi::{BindingKind, DescriptorSetLayoutDesc, ShaderStages};

use crate::error::{Dx11Error, Result};

/// One of the four HLSL register files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegisterClass {
    ConstantBuffer,
    ShaderResource,
    UnorderedAccess,
    Sampler,
}

impl RegisterClass {
    pub const ALL: [Self; 4] = [
        Self::ConstantBuffer,
        Self::ShaderResource,
        Self::UnorderedAccess,
        Self::Sampler,
    ];

    pub const fn for_kind(kind: BindingKind) -> Self {
        match kind {
            BindingKind::UniformBuffer => Self::ConstantBuffer,
            BindingKind::SampledImage | BindingKind::DepthImage => Self::ShaderResource,
            BindingKind::StorageBuffer | BindingKind::StorageImage => Self::UnorderedAccess,
            BindingKind::Sampler => Self::Sampler,
        }
    }

    /// Slots available per stage at feature level 11.0.
    pub const fn limit(self) -> u32 {
        match self {
            Self::ConstantBuffer => 14,
            Self::ShaderResource => 128,
            Self::UnorderedAccess => 8,
            Self::Sampler => 16,
        }
    }

    pub const fn prefix(self) -> &'static str {
        match self {
            Self::ConstantBuffer => "b",
            Self::ShaderResource => "t",
            Self::UnorderedAccess => "u",
            Self::Sampler => "s",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Register {
    pub class: RegisterClass,
    pub slot: u32,
    pub stages: ShaderStages,
}

/// Registers assigned to every binding of a pipeline's set layouts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegisterMap {
    /// Per set, `(binding number, register)` in layout order.
    sets: Vec<Vec<(u32, Register)>>,
    used: [u32; 4],
}

impl RegisterMap {
    pub fn new(pipeline: &str, layouts: &[&DescriptorSetLayoutDesc]) -> Result<Self> {
        let mut used = [0u32; 4];
        let mut sets = Vec::with_capacity(layouts.len());
        for layout in layouts {
            let mut registers = Vec::with_capacity(layout.bindings.len());
            for binding in &layout.bindings {
                let class = RegisterClass::for_kind(binding.kind);
                let next = &mut used[class.index()];
                registers.push((
                    binding.binding,
                    Register {
                        class,
                        slot: *next,
                        stages: binding.stages,
                    },
                ));
                *next += 1;
            }
            sets.push(registers);
        }

        for class in RegisterClass::ALL {
            let needed = used[class.index()];
            if needed > class.limit() {
                return Err(Dx11Error::RegisterOverflow {
                    pipeline: pipeline.to_owned(),
                    class: class.prefix(),
                    needed,
                    limit: class.limit(),
                });
            }
        }
        Ok(Self { sets, used })
    }

    pub fn get(&self, set: u32, binding: u32) -> Option<Register> {
        self.sets
            .get(set as usize)?
            .iter()
            .find(|(number, _)| *number == binding)
            .map(|(_, register)| *register)
    }

    /// Registers of `class` in use, which is also one past the highest slot.
    pub const fn count(&self, class: RegisterClass) -> u32 {
        self.used[class.index()]
    }

    pub fn set_count(&self) -> usize {
        self.sets.len()
    }

    /// Whether any storage binding is visible to a graphics stage.
    pub fn has_graphics_storage(&self) -> bool {
        self.sets.iter().flatten().any(|(_, register)| {
            register.class == RegisterClass::UnorderedAccess
                && register.stages.intersects(ShaderStages::ALL_GRAPHICS)
        })
    }
}

#[cfg(test)]
mod tests {
    use cinder_rhi::LayoutBinding;

    use super::*;

    fn layout(bindings: &[LayoutBinding]) -> DescriptorSetLayoutDesc {
        DescriptorSetLayoutDesc {
            debug_name: "Test Layout".into(),
            bindings: bindings.to_vec(),
        }
    }

    #[test]
    fn classes_count_independently_across_sets() {
        let fs = ShaderStages::FRAGMENT;
        let engine = layout(&[LayoutBinding::new(0, BindingKind::UniformBuffer, fs)]);
        let gbuffer = layout(&[
            LayoutBinding::new(0, BindingKind::Sampler, fs),
            LayoutBinding::new(1, BindingKind::DepthImage, fs),
            LayoutBinding::new(2, BindingKind::SampledImage, fs),
            LayoutBinding::new(3, BindingKind::UniformBuffer, fs),
        ]);
        let map = RegisterMap::new("Lighting", &[&engine, &gbuffer]).unwrap();

        let cb = |set, binding| map.get(set, binding).map(|r| (r.class, r.slot));
        assert_eq!(cb(0, 0), Some((RegisterClass::ConstantBuffer, 0)));
        assert_eq!(cb(1, 0), Some((RegisterClass::Sampler, 0)));
        assert_eq!(cb(1, 1), Some((RegisterClass::ShaderResource, 0)));
        assert_eq!(cb(1, 2), Some((RegisterClass::ShaderResource, 1)));
        assert_eq!(cb(1, 3), Some((RegisterClass::ConstantBuffer, 1)));
        assert_eq!(map.get(2, 0), None);
        assert_eq!(map.count(RegisterClass::ShaderResource), 2);
        assert_eq!(map.set_count(), 2);
    }

    #[test]
    fn constant_buffer_overflow_is_reported() {
        let bindings: Vec<_> = (0..15)
            .map(|i| LayoutBinding::new(i, BindingKind::UniformBuffer, ShaderStages::VERTEX))
            .collect();
        let err = RegisterMap::new("Greedy", &[&layout(&bindings)]).unwrap_err();
        assert!(matches!(
            err,
            Dx11Error::RegisterOverflow { needed: 15, limit: 14, .. }
        ));
    }

    #[test]
    fn storage_in_graphics_stages_is_detected() {
        let compute = layout(&[LayoutBinding::new(0, BindingKind::StorageImage, ShaderStages::COMPUTE)]);
        assert!(!RegisterMap::new("Bloom", &[&compute]).unwrap().has_graphics_storage());

        let fragment = layout(&[LayoutBinding::new(0, BindingKind::StorageBuffer, ShaderStages::FRAGMENT)]);
        assert!(RegisterMap::new("Scatter", &[&fragment]).unwrap().has_graphics_storage());
    }
}

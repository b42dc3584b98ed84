//! Physical device identification.

use std::ffi::CStr;

use ash::vk;
use cinder_rhi::AdapterInfo;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub const fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }

    pub fn name(self) -> String {
        match self {
            Self::Nvidia => "NVIDIA".into(),
            Self::Amd => "AMD".into(),
            Self::Intel => "Intel".into(),
            Self::Apple => "Apple".into(),
            Self::Other(id) => format!("Vendor 0x{id:04X}"),
        }
    }
}

/// What the engine needs to know about the selected device.
#[derive(Debug, Clone)]
pub struct DeviceCapabilities {
    pub vendor: GpuVendor,
    pub device_name: String,
    pub api_version: u32,
    pub driver_version: u32,
    pub device_local_memory_mb: u64,
    pub max_sampler_anisotropy: f32,
    pub supports_anisotropy: bool,
    pub supports_fill_mode_non_solid: bool,
    pub supports_depth_clamp: bool,
    pub supports_wide_lines: bool,
}

impl DeviceCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = instance.get_physical_device_properties(physical_device);
        let features = instance.get_physical_device_features(physical_device);
        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        let device_name = CStr::from_ptr(properties.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();

        Self {
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name,
            api_version: properties.api_version,
            driver_version: properties.driver_version,
            device_local_memory_mb: device_local_memory_mb(&memory_properties),
            max_sampler_anisotropy: properties.limits.max_sampler_anisotropy,
            supports_anisotropy: features.sampler_anisotropy == vk::TRUE,
            supports_fill_mode_non_solid: features.fill_mode_non_solid == vk::TRUE,
            supports_depth_clamp: features.depth_clamp == vk::TRUE,
            supports_wide_lines: features.wide_lines == vk::TRUE,
        }
    }

    /// Vendor, renderer and API version strings for [`AdapterInfo`].
    pub fn adapter_info(&self) -> AdapterInfo {
        AdapterInfo {
            vendor: self.vendor.name(),
            renderer: self.device_name.clone(),
            api_version: format_version(self.api_version),
        }
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}) - Vulkan {} - {} MB VRAM",
            self.device_name,
            self.vendor,
            format_version(self.api_version),
            self.device_local_memory_mb,
        )
    }
}

pub(crate) fn device_local_memory_mb(memory: &vk::PhysicalDeviceMemoryProperties) -> u64 {
    memory
        .memory_heaps
        .iter()
        .take(memory.memory_heap_count as usize)
        .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|heap| heap.size / (1024 * 1024))
        .sum()
}

pub fn format_version(version: u32) -> String {
    format!(
        "{}.{}.{}",
        vk::api_version_major(version),
        vk::api_version_minor(version),
        vk::api_version_patch(version)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0x1234).name(), "Vendor 0x1234");
    }

    #[test]
    fn versions_print_as_triples() {
        assert_eq!(format_version(vk::make_api_version(0, 1, 1, 42)), "1.1.42");
    }
}

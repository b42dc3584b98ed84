//! Device-level Vulkan state shared by the core and its window bindings.

use std::ffi::{c_char, CString};
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;
use raw_window_handle::RawDisplayHandle;
use tracing::{debug, info};

use crate::capabilities::DeviceCapabilities;
use crate::command::CommandPool;
use crate::error::{Result, VulkanError};
use crate::instance::{create_instance, select_physical_device, DebugMessenger};
use crate::memory::GpuAllocator;

const DESCRIPTOR_POOL_SIZES: [(vk::DescriptorType, u32); 5] = [
    (vk::DescriptorType::UNIFORM_BUFFER, 1024),
    (vk::DescriptorType::STORAGE_BUFFER, 256),
    (vk::DescriptorType::SAMPLER, 1024),
    (vk::DescriptorType::SAMPLED_IMAGE, 4096),
    (vk::DescriptorType::STORAGE_IMAGE, 512),
];
const DESCRIPTOR_POOL_MAX_SETS: u32 = 2048;

/// Instance, device, queue and the pools everything else allocates from.
pub struct VulkanContext {
    // Keeps the loader alive for the lifetime of the instance.
    #[allow(dead_code)]
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    debug_messenger: Option<DebugMessenger>,
    debug_utils: Option<ash::ext::debug_utils::Device>,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: Arc<ash::Device>,
    pub(crate) capabilities: DeviceCapabilities,
    pub(crate) allocator: Mutex<GpuAllocator>,
    pub(crate) queue_family: u32,
    pub(crate) queue: vk::Queue,
    pub(crate) command_pool: CommandPool,
    pub(crate) descriptor_pool: vk::DescriptorPool,
}

/// Options for [`VulkanContext::new`].
pub(crate) struct ContextOptions<'a> {
    pub app_name: &'a str,
    pub enable_validation: bool,
    pub debug_names: bool,
    pub display: Option<RawDisplayHandle>,
}

impl VulkanContext {
    pub(crate) fn new(options: &ContextOptions<'_>) -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| VulkanError::Loading(e.to_string()))?;

        // Debug utils are needed for object names as well as validation output.
        let want_debug_utils = options.enable_validation || options.debug_names;
        let instance = unsafe {
            create_instance(
                &entry,
                options.app_name,
                options.display,
                options.enable_validation,
                want_debug_utils,
            )
        }?;

        let debug_messenger = if options.enable_validation {
            Some(unsafe { DebugMessenger::new(&entry, &instance) }?)
        } else {
            None
        };

        let physical_device = unsafe { select_physical_device(&instance) }?;
        let capabilities = unsafe { DeviceCapabilities::query(&instance, physical_device) };
        info!("Selected GPU: {}", capabilities.summary());

        let queue_family = unsafe { find_graphics_queue_family(&instance, physical_device) }?;
        let device = unsafe {
            create_device(
                &instance,
                physical_device,
                queue_family,
                &capabilities,
                options.display.is_some(),
            )
        }?;
        let queue = unsafe { device.get_device_queue(queue_family, 0) };
        let device = Arc::new(device);

        let allocator = unsafe { GpuAllocator::new(&instance, device.clone(), physical_device) }?;
        let command_pool = unsafe { CommandPool::new(&device, queue_family) }?;
        let descriptor_pool = unsafe { create_descriptor_pool(&device) }?;

        let debug_utils = want_debug_utils
            .then(|| ash::ext::debug_utils::Device::new(&instance, &device));

        Ok(Self {
            entry,
            instance,
            debug_messenger,
            debug_utils,
            physical_device,
            device,
            capabilities,
            allocator: Mutex::new(allocator),
            queue_family,
            queue,
            command_pool,
            descriptor_pool,
        })
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    pub(crate) fn debug_utils(&self) -> Option<&ash::ext::debug_utils::Device> {
        self.debug_utils.as_ref()
    }

    /// Attach a debug name to a native object. A no-op without debug utils.
    pub fn set_name<T: vk::Handle>(&self, object: T, name: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(object)
            .object_name(&name);
        if let Err(e) = unsafe { debug_utils.set_debug_utils_object_name(&info) } {
            debug!("Could not name object {name:?}: {e}");
        }
    }

    /// Wait for the device to be idle.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            self.device
                .destroy_descriptor_pool(self.descriptor_pool, None);
            self.command_pool.destroy(&self.device);

            // Frees every VkDeviceMemory, so it has to happen before the device goes.
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            if let Some(messenger) = self.debug_messenger.take() {
                messenger.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// First queue family with graphics and compute support.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn find_graphics_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<u32> {
    instance
        .get_physical_device_queue_family_properties(physical_device)
        .iter()
        .position(|family| {
            family
                .queue_flags
                .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        })
        .map(|index| index as u32)
        .ok_or(VulkanError::NoSuitableDevice)
}

/// Create the logical device with one graphics queue.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
    capabilities: &DeviceCapabilities,
    presents: bool,
) -> Result<ash::Device> {
    let queue_priority = 1.0_f32;
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(std::slice::from_ref(&queue_priority))];

    let mut extension_names: Vec<*const c_char> = Vec::new();
    if presents {
        extension_names.push(ash::khr::swapchain::NAME.as_ptr());
    }
    #[cfg(target_os = "macos")]
    extension_names.push(ash::khr::portability_subset::NAME.as_ptr());

    let features = vk::PhysicalDeviceFeatures::default()
        .sampler_anisotropy(capabilities.supports_anisotropy)
        .fill_mode_non_solid(capabilities.supports_fill_mode_non_solid)
        .depth_clamp(capabilities.supports_depth_clamp)
        .wide_lines(capabilities.supports_wide_lines);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .enabled_features(&features);

    Ok(instance.create_device(physical_device, &device_create_info, None)?)
}

/// # Safety
/// The device must be valid.
unsafe fn create_descriptor_pool(device: &ash::Device) -> Result<vk::DescriptorPool> {
    let pool_sizes: Vec<_> = DESCRIPTOR_POOL_SIZES
        .iter()
        .map(|&(ty, descriptor_count)| vk::DescriptorPoolSize {
            ty,
            descriptor_count,
        })
        .collect();
    let create_info = vk::DescriptorPoolCreateInfo::default()
        .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
        .max_sets(DESCRIPTOR_POOL_MAX_SETS)
        .pool_sizes(&pool_sizes);
    Ok(device.create_descriptor_pool(&create_info, None)?)
}

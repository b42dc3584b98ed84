//! Native command pools and one-shot submission.

use ash::vk;

use crate::error::{Result, VulkanError};

/// Command pool whose buffers can be reset individually.
pub struct CommandPool {
    pool: vk::CommandPool,
}

impl CommandPool {
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(device: &ash::Device, queue_family: u32) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = device.create_command_pool(&create_info, None)?;
        Ok(Self { pool })
    }

    pub const fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate(&self, device: &ash::Device, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        Ok(device.allocate_command_buffers(&alloc_info)?)
    }

    /// # Safety
    /// The buffers must come from this pool and must not be pending.
    pub unsafe fn free(&self, device: &ash::Device, buffers: &[vk::CommandBuffer]) {
        if !buffers.is_empty() {
            device.free_command_buffers(self.pool, buffers);
        }
    }

    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_command_pool(self.pool, None);
    }
}

/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn begin_command_buffer(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    flags: vk::CommandBufferUsageFlags,
) -> Result<()> {
    let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
    device.begin_command_buffer(cmd, &begin_info)?;
    Ok(())
}

/// Submit one command buffer.
///
/// # Safety
/// All handles must be valid.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn submit(
    device: &ash::Device,
    queue: vk::Queue,
    cmd: vk::CommandBuffer,
    wait: Option<(vk::Semaphore, vk::PipelineStageFlags)>,
    signal: Option<vk::Semaphore>,
    fence: vk::Fence,
) -> Result<()> {
    let command_buffers = [cmd];
    let (wait_semaphores, wait_stages) = match wait {
        Some((semaphore, stage)) => (vec![semaphore], vec![stage]),
        None => (Vec::new(), Vec::new()),
    };
    let signal_semaphores: Vec<_> = signal.into_iter().collect();

    let submit_info = vk::SubmitInfo::default()
        .command_buffers(&command_buffers)
        .wait_semaphores(&wait_semaphores)
        .wait_dst_stage_mask(&wait_stages)
        .signal_semaphores(&signal_semaphores);
    device.queue_submit(queue, &[submit_info], fence)?;
    Ok(())
}

/// Record with `f`, submit, and block until the queue is idle.
///
/// The recording closure may fail; the command buffer is freed either way.
///
/// # Safety
/// All handles must be valid.
pub unsafe fn execute_single_time_commands<E, F>(
    device: &ash::Device,
    pool: &CommandPool,
    queue: vk::Queue,
    f: F,
) -> std::result::Result<(), E>
where
    E: From<VulkanError>,
    F: FnOnce(vk::CommandBuffer) -> std::result::Result<(), E>,
{
    let cmd = pool.allocate(device, 1)?[0];
    let result = record_and_wait(device, queue, cmd, f);
    pool.free(device, &[cmd]);
    result
}

unsafe fn record_and_wait<E, F>(
    device: &ash::Device,
    queue: vk::Queue,
    cmd: vk::CommandBuffer,
    f: F,
) -> std::result::Result<(), E>
where
    E: From<VulkanError>,
    F: FnOnce(vk::CommandBuffer) -> std::result::Result<(), E>,
{
    begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
    f(cmd)?;
    device.end_command_buffer(cmd).map_err(VulkanError::from)?;
    submit(device, queue, cmd, None, None, vk::Fence::null())?;
    device.queue_wait_idle(queue).map_err(VulkanError::from)?;
    Ok(())
}

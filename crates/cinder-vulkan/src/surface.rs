//! Window surfaces.

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::context::VulkanContext;
use crate::error::{Result, VulkanError};

/// A window surface plus the extension loaders that talk to it.
pub struct SurfaceContext {
    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::khr::surface::Instance,
    pub swapchain_loader: ash::khr::swapchain::Device,
}

impl SurfaceContext {
    /// Create a surface for `window`.
    ///
    /// # Safety
    /// The window must outlive the surface.
    pub unsafe fn from_window<W>(ctx: &VulkanContext, window: &W) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| VulkanError::SurfaceCreation(format!("no display handle: {e}")))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| VulkanError::SurfaceCreation(format!("no window handle: {e}")))?;

        let surface = ash_window::create_surface(
            &ctx.entry,
            &ctx.instance,
            display.as_raw(),
            window_handle.as_raw(),
            None,
        )
        .map_err(|e| VulkanError::SurfaceCreation(e.to_string()))?;

        let surface_loader = ash::khr::surface::Instance::new(&ctx.entry, &ctx.instance);
        let supported = surface_loader.get_physical_device_surface_support(
            ctx.physical_device,
            ctx.queue_family,
            surface,
        )?;
        if !supported {
            surface_loader.destroy_surface(surface, None);
            return Err(VulkanError::SurfaceCreation(
                "graphics queue cannot present to this surface".into(),
            ));
        }

        let swapchain_loader = ash::khr::swapchain::Device::new(&ctx.instance, ctx.device());
        Ok(Self {
            surface,
            surface_loader,
            swapchain_loader,
        })
    }

    /// # Safety
    /// The context must be the one the surface was created with.
    pub unsafe fn capabilities(&self, ctx: &VulkanContext) -> Result<SurfaceCapabilities> {
        let physical_device = ctx.physical_device;
        Ok(SurfaceCapabilities {
            capabilities: self
                .surface_loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)?,
            formats: self
                .surface_loader
                .get_physical_device_surface_formats(physical_device, self.surface)?,
            present_modes: self
                .surface_loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)?,
        })
    }

    /// # Safety
    /// Every swapchain on the surface must already be destroyed.
    pub unsafe fn destroy(&self) {
        self.surface_loader.destroy_surface(self.surface, None);
    }
}

pub struct SurfaceCapabilities {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

//! Swapchain management.
//!
//! # Overview
//!
//! [`Swapchain`] owns the chain of presentable images and their views. It is
//! rebuilt in place by [`Swapchain::recreate`], which bumps
//! [`Swapchain::generation`] so that swapchain-dependent resources can be
//! keyed by the chain they were built for.
//!
//! Acquisition and presentation report staleness as values
//! ([`AcquireOutcome::Stale`], [`PresentOutcome::Stale`]) rather than
//! errors; any other failure is returned as an [`RhiError`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use kiln_rhi::device::Device;
//! use kiln_rhi::swapchain::{AcquireOutcome, Swapchain, SwapchainPreferences};
//!
//! # fn example(
//! #     device: Arc<Device>,
//! #     surface: vk::SurfaceKHR,
//! #     surface_loader: ash::khr::surface::Instance,
//! #     semaphore: vk::Semaphore,
//! # ) -> kiln_rhi::RhiResult<()> {
//! let mut swapchain = Swapchain::new(
//!     device,
//!     surface,
//!     surface_loader,
//!     vk::Extent2D { width: 800, height: 600 },
//!     SwapchainPreferences::default(),
//! )?;
//!
//! match swapchain.acquire_next_image(semaphore)? {
//!     AcquireOutcome::Acquired { index, .. } => { /* render to image `index` */ }
//!     AcquireOutcome::Stale => swapchain.recreate(vk::Extent2D { width: 1024, height: 768 })?,
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Surface capabilities, formats and present modes for one GPU.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries swapchain support for a physical device and surface.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the surface queries fail.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// At least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// User-selectable swapchain policy.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainPreferences {
    /// Use MAILBOX when supported; otherwise FIFO is always used.
    pub prefer_mailbox: bool,
}

impl Default for SwapchainPreferences {
    fn default() -> Self {
        Self {
            prefer_mailbox: true,
        }
    }
}

/// Result of [`Swapchain::acquire_next_image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired. A suboptimal image is still usable this frame.
    Acquired { index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface and must be recreated.
    Stale,
}

/// Result of [`Swapchain::present`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Out of date or suboptimal; recreate before the next frame.
    Stale,
}

impl AcquireOutcome {
    /// Maps the native acquire result onto an outcome.
    pub fn from_native(result: Result<(u32, bool), vk::Result>) -> RhiResult<Self> {
        match result {
            Ok((index, suboptimal)) => Ok(Self::Acquired { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Self::Stale),
            Err(e) => Err(e.into()),
        }
    }
}

impl PresentOutcome {
    /// Maps the native present result onto an outcome.
    pub fn from_native(result: Result<bool, vk::Result>) -> RhiResult<Self> {
        match result {
            Ok(false) => Ok(Self::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Self::Stale),
            Err(e) => Err(e.into()),
        }
    }
}

/// Vulkan swapchain wrapper.
///
/// # Thread Safety
///
/// Not thread-safe; driven by the single frame-loop thread.
pub struct Swapchain {
    device: Arc<Device>,
    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::Format,
    color_space: vk::ColorSpaceKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    preferences: SwapchainPreferences,
    generation: u64,
}

impl Swapchain {
    /// Creates the swapchain for `surface`.
    ///
    /// `framebuffer_extent` is the live window size in pixels; it is used
    /// only when the surface leaves the extent to the application.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - surface queries fail or report no format or present mode
    /// - swapchain or image view creation fails
    pub fn new(
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        surface_loader: ash::khr::surface::Instance,
        framebuffer_extent: vk::Extent2D,
        preferences: SwapchainPreferences,
    ) -> RhiResult<Self> {
        let swapchain_loader = ash::khr::swapchain::Device::new(device.instance(), device.handle());

        let mut swapchain = Self {
            device,
            surface,
            surface_loader,
            swapchain_loader,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            extent: vk::Extent2D::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            preferences,
            generation: 0,
        };
        swapchain.build(framebuffer_extent)?;

        Ok(swapchain)
    }

    /// Rebuilds the chain in place for a new framebuffer size and bumps the
    /// generation.
    ///
    /// The old handle is passed as `oldSwapchain` and destroyed once the
    /// new one exists.
    ///
    /// # Safety
    ///
    /// Not `unsafe`, but the caller must have waited for the device to go
    /// idle: the old images and views are destroyed here.
    pub fn recreate(&mut self, framebuffer_extent: vk::Extent2D) -> RhiResult<()> {
        info!(
            "Recreating swapchain for framebuffer {}x{}",
            framebuffer_extent.width, framebuffer_extent.height
        );

        self.destroy_image_views();
        self.images.clear();
        self.build(framebuffer_extent)?;
        self.generation += 1;

        Ok(())
    }

    fn build(&mut self, framebuffer_extent: vk::Extent2D) -> RhiResult<()> {
        let support = SwapchainSupportDetails::query(
            self.device.physical_device(),
            self.surface,
            &self.surface_loader,
        )?;

        let surface_format = choose_surface_format(&support.formats).ok_or_else(|| {
            RhiError::SwapchainError("Surface reports no formats".to_string())
        })?;
        let present_mode =
            choose_present_mode(&support.present_modes, self.preferences.prefer_mailbox);
        let extent = choose_extent(&support.capabilities, framebuffer_extent);
        let image_count = choose_image_count(&support.capabilities);

        let families = self.device.queue_families();
        let (Some(graphics_family), Some(present_family)) =
            (families.graphics_family, families.present_family)
        else {
            return Err(RhiError::SwapchainError(
                "Device has no graphics or present queue family".to_string(),
            ));
        };
        let family_indices = [graphics_family, present_family];
        let sharing_mode = choose_sharing_mode(graphics_family, present_family);
        let shared_families: &[u32] = if sharing_mode == vk::SharingMode::CONCURRENT {
            &family_indices
        } else {
            &[]
        };

        info!(
            "Creating swapchain: {}x{}, {:?}/{:?}, {:?}, {} images requested, {:?} sharing",
            extent.width,
            extent.height,
            surface_format.format,
            surface_format.color_space,
            present_mode,
            image_count,
            sharing_mode
        );

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(shared_families)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None)? };

        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.swapchain_loader.destroy_swapchain(old_swapchain, None) };
            debug!("Retired previous swapchain");
        }
        self.swapchain = swapchain;

        self.images = unsafe { self.swapchain_loader.get_swapchain_images(swapchain)? };
        self.image_views = create_image_views(&self.device, &self.images, surface_format.format)?;
        self.format = surface_format.format;
        self.color_space = surface_format.color_space;
        self.extent = extent;
        self.present_mode = present_mode;

        info!("Swapchain ready with {} images", self.images.len());
        Ok(())
    }

    /// Acquires the next presentable image, signaling `semaphore` when the
    /// presentation engine releases it. Blocks without timeout.
    ///
    /// # Errors
    ///
    /// Native failures other than `ERROR_OUT_OF_DATE_KHR` are returned as
    /// errors and are fatal to the frame loop.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> RhiResult<AcquireOutcome> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };
        AcquireOutcome::from_native(result)
    }

    /// Queues image `image_index` for presentation after `wait_semaphore`.
    ///
    /// # Errors
    ///
    /// Native failures other than out-of-date/suboptimal are returned as
    /// errors.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> RhiResult<PresentOutcome> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };
        PresentOutcome::from_native(result)
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn color_space(&self) -> vk::ColorSpaceKHR {
        self.color_space
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Incremented by every [`Swapchain::recreate`].
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of presentable images. Fixed between recreations.
    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    #[inline]
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    fn destroy_image_views(&mut self) {
        for image_view in self.image_views.drain(..) {
            unsafe {
                self.device.handle().destroy_image_view(image_view, None);
            }
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_image_views();

        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.swapchain_loader
                    .destroy_swapchain(self.swapchain, None);
            }
            info!(
                "Swapchain destroyed (generation {}, {}x{})",
                self.generation, self.extent.width, self.extent.height
            );
        }
    }
}

/// Prefers `B8G8R8A8_SRGB` with `SRGB_NONLINEAR`, else the first format.
///
/// Returns `None` only for an empty list.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    let preferred = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });

    if let Some(&format) = preferred {
        return Some(format);
    }

    let first = formats.first().copied();
    if let Some(format) = first {
        warn!("Preferred surface format unavailable, using {:?}", format);
    }
    first
}

/// MAILBOX when present (and wanted), otherwise FIFO, which every
/// implementation must support.
pub fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    prefer_mailbox: bool,
) -> vk::PresentModeKHR {
    if prefer_mailbox && present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Uses the surface's current extent unless it is the `u32::MAX`
/// sentinel, in which case the framebuffer size is clamped to the
/// surface limits.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    framebuffer: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: framebuffer.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: framebuffer.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, capped by the maximum (0 = unbounded).
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;

    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

/// Concurrent sharing when graphics and present live in different families.
pub fn choose_sharing_mode(graphics_family: u32, present_family: u32) -> vk::SharingMode {
    if graphics_family != present_family {
        vk::SharingMode::CONCURRENT
    } else {
        vk::SharingMode::EXCLUSIVE
    }
}

fn create_image_views(
    device: &Device,
    images: &[vk::Image],
    format: vk::Format,
) -> RhiResult<Vec<vk::ImageView>> {
    let mut image_views = Vec::with_capacity(images.len());

    for &image in images {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .level_count(1)
                    .layer_count(1),
            );

        match unsafe { device.handle().create_image_view(&create_info, None) } {
            Ok(view) => image_views.push(view),
            Err(e) => {
                for view in image_views {
                    unsafe { device.handle().destroy_image_view(view, None) };
                }
                return Err(e.into());
            }
        }
    }

    debug!("Created {} swapchain image views", image_views.len());
    Ok(image_views)
}

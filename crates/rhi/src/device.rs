//! Vulkan logical device and queue management.
//!
//! # Overview
//!
//! [`Device`] is the GraphicsContext of the engine: it owns the logical
//! device, the graphics and present queues, and the `gpu-allocator`
//! allocator every buffer and image draws memory from. It is shared as
//! `Arc<Device>` by every resource wrapper so that resources can release
//! themselves on drop.
//!
//! # Example
//!
//! ```no_run
//! use ash::vk;
//! use kiln_rhi::device::Device;
//! use kiln_rhi::instance::Instance;
//! use kiln_rhi::physical_device::select_physical_device;
//!
//! # fn example(instance: &Instance, surface: vk::SurfaceKHR) -> kiln_rhi::RhiResult<()> {
//! let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
//! let gpu = select_physical_device(instance.handle(), surface, &surface_loader)?;
//! let device = Device::new(instance, gpu)?;
//! let graphics_queue = device.graphics_queue();
//! # Ok(())
//! # }
//! ```

use std::ffi::{CStr, c_char};
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, error, info};

use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices};

/// Required device extensions.
const DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

/// Vulkan logical device wrapper.
///
/// # Thread Safety
///
/// Shared across threads via `Arc`. The allocator sits behind a `Mutex`;
/// queue submission must still be externally synchronized.
pub struct Device {
    device: ash::Device,
    instance: ash::Instance,
    physical: PhysicalDeviceInfo,
    /// Dropped explicitly before the device is destroyed.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
}

impl Device {
    /// Creates the logical device, retrieves its queues and initializes
    /// the memory allocator.
    ///
    /// Enables `samplerAnisotropy`, plus `sampleRateShading` when the GPU
    /// offers it.
    ///
    /// # Errors
    ///
    /// Returns an error if device creation or allocator initialization fails.
    pub fn new(instance: &Instance, physical: PhysicalDeviceInfo) -> RhiResult<Arc<Self>> {
        let queue_families = physical.queue_families;
        let (Some(graphics_family), Some(present_family)) =
            (queue_families.graphics_family, queue_families.present_family)
        else {
            return Err(RhiError::NoSuitableGpu);
        };

        let unique_families = queue_families.unique_families();
        let queue_priorities = [1.0f32];

        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        debug!(
            "Creating {} queue(s) for families: {:?}",
            queue_create_infos.len(),
            unique_families
        );

        let features = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(true)
            .sample_rate_shading(physical.features.sample_rate_shading == vk::TRUE);

        let extension_names: Vec<*const c_char> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical.device, &create_info, None)?
        };

        info!(
            "Logical device created with {} extension(s)",
            DEVICE_EXTENSIONS.len()
        );

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };
        debug!(
            "Queues retrieved: graphics family {}, present family {}",
            graphics_family, present_family
        );

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        });
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };

        info!("GPU memory allocator initialized");

        Ok(Arc::new(Self {
            device,
            instance: instance.handle().clone(),
            physical,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            graphics_queue,
            present_queue,
        }))
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// Returns the instance the device was created from.
    #[inline]
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Returns the physical device handle.
    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical.device
    }

    /// Returns the selected GPU's properties and capabilities.
    #[inline]
    pub fn physical_info(&self) -> &PhysicalDeviceInfo {
        &self.physical
    }

    /// Returns the graphics queue handle.
    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Returns the presentation queue handle.
    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Returns the queue family indices.
    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.physical.queue_families
    }

    /// Locks the memory allocator.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::AllocatorPoisoned`] if another thread panicked
    /// while holding the lock.
    pub fn allocator(&self) -> RhiResult<MutexGuard<'_, Allocator>> {
        self.allocator.lock().map_err(|_| RhiError::AllocatorPoisoned)
    }

    /// Blocks until all queues are idle.
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Blocks until the graphics queue is idle.
    pub fn wait_graphics_idle(&self) -> RhiResult<()> {
        unsafe { self.device.queue_wait_idle(self.graphics_queue)? };
        Ok(())
    }

    /// Submits command buffers to the graphics queue.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    /// - All command buffers are valid and fully recorded
    /// - Wait and signal semaphores follow the frame protocol
    /// - The fence (if not null) is unsignaled and not in use
    pub unsafe fn submit_graphics(
        &self,
        submit_infos: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> RhiResult<()> {
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, submit_infos, fence)?;
        }
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }

            // The allocator frees its memory blocks through the device.
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// ash::Device and the queue handles are plain dispatch tables and handles;
// the allocator is behind a Mutex.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_swapchain_extension_required() {
        assert_eq!(DEVICE_EXTENSIONS, &[ash::khr::swapchain::NAME]);
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}

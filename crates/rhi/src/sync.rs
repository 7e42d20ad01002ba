//! Synchronization primitives.
//!
//! - [`Semaphore`]: GPU-to-GPU ordering, never observed by the CPU
//! - [`Fence`]: GPU-to-CPU completion signal
//! - [`FrameSlot`]: the primitives one frame in flight needs
//!
//! Frame slots are created once at startup and survive swapchain
//! recreation; they are not tied to any particular swapchain image.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use kiln_rhi::device::Device;
//! use kiln_rhi::sync::FrameSlot;
//!
//! # fn example(device: Arc<Device>) -> kiln_rhi::RhiResult<()> {
//! let slots = FrameSlot::create_many(&device, 2)?;
//!
//! let slot = &slots[0];
//! slot.in_flight.wait(u64::MAX)?;
//! // acquire with slot.image_available, submit signaling slot.render_finished
//! // and slot.in_flight, present waiting on slot.render_finished
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::RhiResult;

/// Vulkan semaphore wrapper.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates an unsignaled binary semaphore.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };

        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Vulkan fence wrapper.
///
/// The only CPU-observable completion signal.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a fence, optionally already signaled so that the first wait
    /// returns immediately.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.handle().create_fence(&create_info, None)? };

        Ok(Self { device, fence })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence is signaled or `timeout` nanoseconds pass.
    /// `u64::MAX` waits forever.
    ///
    /// # Errors
    ///
    /// Returns `VulkanError(TIMEOUT)` when the timeout expires.
    pub fn wait(&self, timeout: u64) -> RhiResult<()> {
        let fences = [self.fence];
        unsafe {
            self.device
                .handle()
                .wait_for_fences(&fences, true, timeout)?
        };
        Ok(())
    }

    /// Returns the fence to the unsignaled state.
    ///
    /// The fence must not be pending on any queue.
    pub fn reset(&self) -> RhiResult<()> {
        let fences = [self.fence];
        unsafe { self.device.handle().reset_fences(&fences)? };
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
    }
}

/// Synchronization objects for one frame slot.
///
/// ```text
/// wait in_flight -> acquire (signals image_available)
///   -> submit (waits image_available, signals render_finished + in_flight)
///   -> present (waits render_finished)
/// ```
pub struct FrameSlot {
    /// Signaled when the acquired swapchain image is ready to be rendered.
    pub image_available: Semaphore,
    /// Signaled when the slot's submission finishes rendering.
    pub render_finished: Semaphore,
    /// Signaled when the slot's submission completes; created signaled.
    pub in_flight: Fence,
}

impl FrameSlot {
    /// Creates the primitives for one slot.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        Ok(Self {
            image_available: Semaphore::new(device.clone())?,
            render_finished: Semaphore::new(device.clone())?,
            in_flight: Fence::new(device, true)?,
        })
    }

    /// Creates `count` slots.
    pub fn create_many(device: &Arc<Device>, count: usize) -> RhiResult<Vec<Self>> {
        let slots = (0..count)
            .map(|_| Self::new(device.clone()))
            .collect::<RhiResult<Vec<_>>>()?;

        info!("Created {} frame slot(s)", slots.len());
        debug!("Frame slot fences start signaled");

        Ok(slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_sync_primitives_are_send_sync() {
        assert_send_sync::<Semaphore>();
        assert_send_sync::<Fence>();
        assert_send_sync::<FrameSlot>();
    }
}

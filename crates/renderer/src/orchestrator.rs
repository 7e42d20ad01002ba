//! Frame orchestration.
//!
//! # Overview
//!
//! [`FrameOrchestrator`] runs one tick of the frame loop per
//! [`draw_frame`](FrameOrchestrator::draw_frame) call:
//!
//! 1. Wait on the current slot's fence
//! 2. Acquire the next swapchain image (stale: recreate and retry once)
//! 3. Wait on the fence of the slot that last rendered into that image
//! 4. Register the image to the current slot and reset the slot fence
//! 5. Write the image's per-frame data
//! 6. Submit the image's command buffer
//! 7. Present (stale or external resize: recreate)
//! 8. Advance the slot
//!
//! The native work behind each step is delegated to a [`FrameBackend`],
//! so the ordering and recovery rules can be driven by a mock backend.
//!
//! # Example
//!
//! ```no_run
//! use kiln_renderer::orchestrator::{FrameBackend, FrameOrchestrator, FrameStatus};
//!
//! # fn example<B: FrameBackend>(backend: B, image_count: usize) -> kiln_renderer::RendererResult<()> {
//! let mut orchestrator = FrameOrchestrator::new(backend, 2, image_count);
//! match orchestrator.draw_frame()? {
//!     FrameStatus::Presented { image } => println!("presented image {image}"),
//!     FrameStatus::Skipped => println!("window minimized or surface stale"),
//! }
//! # Ok(())
//! # }
//! ```

use std::mem;

use ash::vk;
use tracing::{debug, info, warn};

use kiln_rhi::swapchain::{AcquireOutcome, PresentOutcome};

use crate::error::RendererResult;
use crate::sync_manager::SyncManager;

/// Native operations the frame loop is built from.
///
/// `slot` indexes the frame-slot primitives, `image` the swapchain images
/// and everything replicated per image.
pub trait FrameBackend {
    /// Blocks until the fence of `slot` is signaled.
    fn wait_for_slot(&mut self, slot: usize) -> RendererResult<()>;

    /// Returns the fence of `slot` to the unsignaled state.
    fn reset_slot(&mut self, slot: usize) -> RendererResult<()>;

    /// Acquires the next image, signaling the slot's image-available semaphore.
    fn acquire(&mut self, slot: usize) -> RendererResult<AcquireOutcome>;

    /// Writes the per-frame data of `image` from the host.
    fn update_frame_data(&mut self, image: usize) -> RendererResult<()>;

    /// Submits the command buffer of `image`, waiting on the slot's
    /// image-available semaphore and signaling its render-finished
    /// semaphore and fence.
    fn submit(&mut self, slot: usize, image: usize) -> RendererResult<()>;

    /// Presents `image` after the slot's render-finished semaphore.
    fn present(&mut self, slot: usize, image: usize) -> RendererResult<PresentOutcome>;

    /// Current framebuffer size of the window in pixels.
    fn framebuffer_extent(&self) -> vk::Extent2D;

    /// Blocks until the device has no pending work.
    fn wait_idle(&mut self) -> RendererResult<()>;

    /// Rebuilds the swapchain and everything that depends on it. Returns
    /// the new image count.
    fn rebuild_swapchain(&mut self) -> RendererResult<usize>;
}

/// Result of one [`FrameOrchestrator::draw_frame`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame was submitted and queued for presentation.
    Presented { image: usize },
    /// Nothing was rendered: the window has no area or the surface stayed
    /// stale after one recreation.
    Skipped,
}

/// Drives a [`FrameBackend`] through the per-frame state machine.
pub struct FrameOrchestrator<B: FrameBackend> {
    backend: B,
    sync: SyncManager,
    resize_requested: bool,
    recreate_pending: bool,
    recreations: u64,
}

impl<B: FrameBackend> FrameOrchestrator<B> {
    /// Creates an orchestrator with `frames_in_flight` slots for a
    /// swapchain of `image_count` images.
    pub fn new(backend: B, frames_in_flight: usize, image_count: usize) -> Self {
        Self {
            backend,
            sync: SyncManager::new(frames_in_flight, image_count),
            resize_requested: false,
            recreate_pending: false,
            recreations: 0,
        }
    }

    /// Runs one tick of the frame loop.
    ///
    /// Stale surfaces and zero-sized windows are recovered here and
    /// reported as [`FrameStatus::Skipped`]; every other failure is
    /// returned and is fatal to the loop.
    pub fn draw_frame(&mut self) -> RendererResult<FrameStatus> {
        if self.recreate_pending && !self.recreate_swapchain()? {
            return Ok(FrameStatus::Skipped);
        }

        let slot = self.sync.current_slot();
        let Some(image) = self.acquire_with_retry(slot)? else {
            return Ok(FrameStatus::Skipped);
        };

        if let Some(previous) = self.sync.claim_image(image)? {
            self.backend.wait_for_slot(previous)?;
        }
        // Reset only once an image is in hand, so an early return never
        // leaves the slot fence unsignaled.
        self.backend.reset_slot(slot)?;

        self.backend.update_frame_data(image)?;
        self.backend.submit(slot, image)?;

        let outcome = self.backend.present(slot, image)?;
        let resized = mem::take(&mut self.resize_requested);
        if outcome == PresentOutcome::Stale || resized {
            debug!(
                "Recreating after present (stale: {}, resized: {})",
                outcome == PresentOutcome::Stale,
                resized
            );
            self.recreate_swapchain()?;
        }

        self.sync.advance();
        Ok(FrameStatus::Presented { image })
    }

    /// Waits on the slot fence and acquires an image. A stale surface gets
    /// one recreation and one more attempt.
    fn acquire_with_retry(&mut self, slot: usize) -> RendererResult<Option<usize>> {
        for attempt in 0..2 {
            self.backend.wait_for_slot(slot)?;

            match self.backend.acquire(slot)? {
                AcquireOutcome::Acquired { index, suboptimal } => {
                    if suboptimal {
                        debug!("Acquired suboptimal image {}", index);
                    }
                    return Ok(Some(index as usize));
                }
                AcquireOutcome::Stale if attempt == 0 => {
                    debug!("Swapchain stale on acquire, recreating");
                    if !self.recreate_swapchain()? {
                        return Ok(None);
                    }
                }
                AcquireOutcome::Stale => {
                    warn!("Swapchain still stale after recreation, skipping frame");
                }
            }
        }
        Ok(None)
    }

    /// Rebuilds the swapchain and its dependents.
    ///
    /// Returns `false` when the framebuffer has zero area; the rebuild is
    /// then deferred until a later [`draw_frame`](Self::draw_frame) finds a
    /// non-zero size.
    pub fn recreate_swapchain(&mut self) -> RendererResult<bool> {
        let extent = self.backend.framebuffer_extent();
        if extent.width == 0 || extent.height == 0 {
            if !self.recreate_pending {
                info!("Framebuffer has zero area, deferring swapchain recreation");
            }
            self.recreate_pending = true;
            return Ok(false);
        }

        self.backend.wait_idle()?;
        let image_count = self.backend.rebuild_swapchain()?;
        self.sync.resize_images(image_count);

        // A rebuild at the current extent also satisfies any pending resize.
        self.recreate_pending = false;
        self.resize_requested = false;
        self.recreations += 1;
        info!(
            "Swapchain recreated for {}x{} with {} images",
            extent.width, extent.height, image_count
        );
        Ok(true)
    }

    /// Requests a recreation after the next present.
    pub fn notify_resized(&mut self) {
        self.resize_requested = true;
    }

    #[inline]
    pub fn current_slot(&self) -> usize {
        self.sync.current_slot()
    }

    #[inline]
    pub fn sync(&self) -> &SyncManager {
        &self.sync
    }

    /// Number of completed swapchain recreations.
    #[inline]
    pub fn recreations(&self) -> u64 {
        self.recreations
    }

    /// Whether a recreation is waiting for a non-zero framebuffer.
    #[inline]
    pub fn is_recreate_pending(&self) -> bool {
        self.recreate_pending
    }

    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[inline]
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

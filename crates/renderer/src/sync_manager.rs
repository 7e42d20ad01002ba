//! Frame-slot and image-in-flight bookkeeping.
//!
//! The CPU may run up to N frames ahead of the GPU. Each frame slot owns a
//! fence; in addition every swapchain image remembers which slot last
//! rendered into it, because the presentation engine may hand images back
//! out of order. Before an image is reused, the fence of that slot must be
//! waited on.
//!
//! [`SyncManager`] holds only indices. The fences themselves live with the
//! backend, so this type is testable without a device.

use tracing::debug;

use crate::error::{RendererError, RendererResult};

/// Tracks the current frame slot and which slot guards each swapchain image.
#[derive(Debug, Clone)]
pub struct SyncManager {
    frames_in_flight: usize,
    current: usize,
    images_in_flight: Vec<Option<usize>>,
}

impl SyncManager {
    /// Creates the bookkeeping for `frames_in_flight` slots (at least one)
    /// and `image_count` swapchain images, none of them in flight.
    pub fn new(frames_in_flight: usize, image_count: usize) -> Self {
        Self {
            frames_in_flight: frames_in_flight.max(1),
            current: 0,
            images_in_flight: vec![None; image_count],
        }
    }

    /// Slot used by the frame being recorded.
    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images_in_flight.len()
    }

    /// Slot registered for `image`, if any.
    pub fn slot_for_image(&self, image: usize) -> Option<usize> {
        self.images_in_flight.get(image).copied().flatten()
    }

    /// Registers the current slot as the guard of `image`.
    ///
    /// Returns the slot that guarded the image before, whose fence the
    /// caller must wait on before touching the image. This includes the
    /// current slot itself.
    ///
    /// # Errors
    ///
    /// [`RendererError::ImageOutOfRange`] if `image` is not tracked.
    pub fn claim_image(&mut self, image: usize) -> RendererResult<Option<usize>> {
        let count = self.images_in_flight.len();
        let entry = self
            .images_in_flight
            .get_mut(image)
            .ok_or(RendererError::ImageOutOfRange { index: image, count })?;

        Ok(entry.replace(self.current))
    }

    /// Moves to the next slot, wrapping at `frames_in_flight`.
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.frames_in_flight;
    }

    /// Clears the image table and sizes it for a rebuilt swapchain.
    ///
    /// The current slot is kept; its fence state is still valid.
    pub fn resize_images(&mut self, image_count: usize) {
        self.images_in_flight.clear();
        self.images_in_flight.resize(image_count, None);
        debug!("Image-in-flight table reset for {} images", image_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_clamps_zero_frames() {
        let sync = SyncManager::new(0, 3);
        assert_eq!(sync.frames_in_flight(), 1);
        assert_eq!(sync.image_count(), 3);
        assert_eq!(sync.current_slot(), 0);
    }

    #[test]
    fn test_advance_wraps() {
        let mut sync = SyncManager::new(2, 3);
        let slots: Vec<usize> = (0..5)
            .map(|_| {
                let slot = sync.current_slot();
                sync.advance();
                slot
            })
            .collect();
        assert_eq!(slots, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn test_claim_unregistered_image() {
        let mut sync = SyncManager::new(2, 3);
        assert_eq!(sync.claim_image(1).unwrap(), None);
        assert_eq!(sync.slot_for_image(1), Some(0));
    }

    #[test]
    fn test_claim_returns_previous_slot() {
        let mut sync = SyncManager::new(2, 3);
        sync.claim_image(2).unwrap();
        sync.advance();
        assert_eq!(sync.claim_image(2).unwrap(), Some(0));
        assert_eq!(sync.slot_for_image(2), Some(1));
    }

    #[test]
    fn test_claim_reports_current_slot() {
        let mut sync = SyncManager::new(1, 2);
        sync.claim_image(0).unwrap();
        sync.advance();
        assert_eq!(sync.claim_image(0).unwrap(), Some(0));
    }

    #[test]
    fn test_claim_out_of_range() {
        let mut sync = SyncManager::new(2, 3);
        let err = sync.claim_image(3).unwrap_err();
        assert!(matches!(
            err,
            RendererError::ImageOutOfRange { index: 3, count: 3 }
        ));
    }

    #[test]
    fn test_resize_images_clears_table() {
        let mut sync = SyncManager::new(2, 2);
        sync.claim_image(0).unwrap();
        sync.advance();
        sync.resize_images(4);

        assert_eq!(sync.image_count(), 4);
        assert!((0..4).all(|i| sync.slot_for_image(i).is_none()));
        assert_eq!(sync.current_slot(), 1);
    }
}

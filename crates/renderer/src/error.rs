//! Renderer error types.

use thiserror::Error;

use kiln_resources::ResourceError;
use kiln_rhi::RhiError;

/// Error raised by the frame loop and its bootstrap.
#[derive(Error, Debug)]
pub enum RendererError {
    /// Native or resource-state failure from the RHI layer
    #[error(transparent)]
    Rhi(#[from] RhiError),

    /// Asset decoding or validation failure
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Window or surface failure
    #[error(transparent)]
    Platform(#[from] kiln_core::Error),

    /// The presentation engine returned an image the bookkeeping does not know
    #[error("Swapchain image {index} out of range ({count} images)")]
    ImageOutOfRange {
        /// Image index returned by acquire.
        index: usize,
        /// Images tracked for the current swapchain.
        count: usize,
    },

    /// A frame slot index past the created slots
    #[error("Frame slot {index} out of range ({count} slots)")]
    SlotOutOfRange {
        /// Requested slot.
        index: usize,
        /// Slots created at startup.
        count: usize,
    },

    /// A swapchain resource arena came out with per-image vectors of the
    /// wrong length
    #[error("Per-image resources {counts:?} do not match {expected} swapchain images")]
    PerImageMismatch {
        /// Swapchain image count.
        expected: usize,
        /// Command buffers, descriptor sets, uniform buffers, framebuffers.
        counts: [usize; 4],
    },

    /// A frame was driven while no swapchain resources exist
    #[error("Swapchain resources are not built")]
    MissingSwapchainResources,
}

/// Result type alias for renderer operations.
pub type RendererResult<T> = std::result::Result<T, RendererError>;

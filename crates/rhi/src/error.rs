//! RHI-specific error types.

use ash::vk;
use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error not covered by a recoverable status
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    /// Failed to load Vulkan
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// The allocator mutex was poisoned by a panicking thread
    #[error("Allocator lock poisoned")]
    AllocatorPoisoned,

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// A required instance or device extension is missing
    #[error("Missing required extension: {0}")]
    MissingExtension(String),

    /// Shader module error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Surface creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Write or copy on a resource that was never allocated
    #[error("{0} is not allocated")]
    NotAllocated(&'static str),

    /// Second allocation on a resource that is already allocated
    #[error("{0} is already allocated")]
    AlreadyAllocated(&'static str),

    /// Payload does not fit the allocation
    #[error("Insufficient memory allocated. Allocated: {allocated} bytes. Requested: {requested} bytes.")]
    InsufficientCapacity {
        /// Bytes available in the destination.
        allocated: u64,
        /// Bytes the caller tried to write.
        requested: u64,
    },

    /// Write of an empty slice
    #[error("Cannot write an empty array to {0}")]
    EmptyPayload(&'static str),

    /// The memory behind a resource is not host visible
    #[error("{0} is not host visible")]
    NotHostVisible(&'static str),

    /// Invalid resource description
    #[error("Invalid resource description: {0}")]
    InvalidDescription(String),

    /// Command recorded in the wrong recording state
    #[error("Cannot {operation} while command buffer is {state}")]
    InvalidCommandState {
        /// Operation that was attempted.
        operation: &'static str,
        /// State the recorder was in.
        state: &'static str,
    },

    /// Image layout transition not in the supported table
    #[error("Unsupported image layout transition: {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        /// Current layout.
        old: vk::ImageLayout,
        /// Requested layout.
        new: vk::ImageLayout,
    },

    /// Format cannot be used as a linear-filtered blit source
    #[error("Texture image format {0:?} does not support linear blitting")]
    LinearBlitUnsupported(vk::Format),

    /// None of the candidate formats has the requested features
    #[error("No supported format among {0:?}")]
    NoSupportedFormat(Vec<vk::Format>),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// Render pass creation error
    #[error("Render pass error: {0}")]
    RenderPassError(String),

    /// Descriptor layout, pool or update error
    #[error("Descriptor error: {0}")]
    DescriptorError(String),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_capacity_message() {
        let err = RhiError::InsufficientCapacity {
            allocated: 64,
            requested: 128,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient memory allocated. Allocated: 64 bytes. Requested: 128 bytes."
        );
    }

    #[test]
    fn test_invalid_command_state_message() {
        let err = RhiError::InvalidCommandState {
            operation: "end render pass",
            state: "recording",
        };
        assert_eq!(
            err.to_string(),
            "Cannot end render pass while command buffer is recording"
        );
    }
}

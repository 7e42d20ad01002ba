//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate wraps `ash` with owned handles and explicit state machines:
//! - Instance, physical device selection and logical device
//! - Swapchain with acquire/present outcomes and generations
//! - Allocate-once buffers and images, textures and samplers
//! - Render passes, framebuffers, descriptors and graphics pipelines
//! - Command recording gated by a recording state machine
//! - Semaphores, fences and frame slots

mod error;

pub mod allocation;
pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod framebuffer;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod render_pass;
pub mod sampler;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod vertex;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;

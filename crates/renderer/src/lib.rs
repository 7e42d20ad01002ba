//! Frame loop for the Kiln engine.
//!
//! This crate turns the RHI building blocks into a running frame loop:
//! - Frame-slot and image-in-flight bookkeeping
//! - The per-frame state machine with stale-surface recovery
//! - The swapchain resource arena rebuilt on every recreation
//! - The Vulkan backend and the application-facing renderer

mod error;

pub mod frame_resources;
pub mod orchestrator;
pub mod renderer;
pub mod sync_manager;
pub mod ubo;

pub use error::{RendererError, RendererResult};
pub use frame_resources::SceneAssets;
pub use orchestrator::{FrameBackend, FrameOrchestrator, FrameStatus};
pub use renderer::Renderer;
pub use sync_manager::SyncManager;

//! Platform layer for the Kiln engine.
//!
//! This crate provides:
//! - Window creation via winit
//! - Live framebuffer size and a resize flag
//! - Vulkan surface creation and the instance extensions it needs

mod window;

pub use window::{ResizeFlag, Surface, Window};

// Re-export winit types that users might need
pub use winit::event::WindowEvent;
pub use winit::event_loop::{ActiveEventLoop, EventLoop};

//! Window management using winit.
//!
//! This module provides window creation, the live framebuffer size, a
//! resize flag shared with the renderer, and Vulkan surface creation.

use std::ffi::{CStr, c_char};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use kiln_core::{Error, Result, WindowConfig};

/// RAII wrapper for a Vulkan surface.
///
/// # Ownership
/// The surface is destroyed when this struct is dropped. The caller must
/// ensure that the Vulkan instance outlives it and that every swapchain
/// built on it is destroyed first.
pub struct Surface {
    handle: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Raw surface handle, valid while this `Surface` exists.
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Loader for capability, format and present-mode queries.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: created by ash_window::create_surface with this loader's
        // instance; destroyed only here.
        unsafe {
            self.surface_loader.destroy_surface(self.handle, None);
        }
        tracing::debug!("Vulkan surface destroyed");
    }
}

/// Set by the event loop on resize, consumed by the frame loop.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct ResizeFlag(Arc<AtomicBool>);

impl ResizeFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns whether a resize was marked, clearing the flag.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A winit window with the handles needed for Vulkan surface creation.
///
/// Cloning is cheap; clones refer to the same window and resize flag.
#[derive(Clone)]
pub struct Window {
    window: Arc<WinitWindow>,
    resized: ResizeFlag,
}

impl Window {
    /// Creates a window from `config`.
    ///
    /// # Errors
    /// Returns [`Error::Window`] if the platform refuses to create it.
    pub fn new(event_loop: &ActiveEventLoop, config: &WindowConfig) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(config.title.as_str())
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(config.resizable);

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        tracing::info!(
            "Window created: \"{}\" {}x{}",
            config.title,
            config.width,
            config.height
        );

        Ok(Self {
            window: Arc::new(window),
            resized: ResizeFlag::new(),
        })
    }

    /// Get a reference to the underlying winit window.
    #[inline]
    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    /// Live framebuffer size in pixels. Zero in either dimension while
    /// minimized on some platforms.
    pub fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    /// Width over height of the framebuffer, 1.0 when it has no height.
    pub fn aspect_ratio(&self) -> f32 {
        let (width, height) = self.framebuffer_size();
        if height == 0 {
            1.0
        } else {
            width as f32 / height as f32
        }
    }

    /// Records that the framebuffer was resized.
    pub fn mark_resized(&self) {
        self.resized.mark();
        tracing::debug!("Window resize marked");
    }

    /// Returns and clears the resize flag.
    pub fn take_resized(&self) -> bool {
        self.resized.take()
    }

    /// Request a redraw of the window.
    #[inline]
    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Instance extensions needed to create a surface for this window.
    ///
    /// The pointers refer to static strings owned by `ash_window`.
    ///
    /// # Errors
    /// Returns [`Error::Window`] if the display handle is unavailable or
    /// the platform has no Vulkan surface support.
    pub fn required_extensions(&self) -> Result<Vec<*const c_char>> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;

        let extensions = ash_window::enumerate_required_extensions(display_handle.as_raw())
            .map_err(|e| {
                Error::Window(format!("Failed to enumerate required extensions: {}", e))
            })?;

        tracing::debug!(
            "Required Vulkan extensions for surface: {:?}",
            extensions
                .iter()
                // SAFETY: ash_window returns pointers to static,
                // null-terminated extension names.
                .map(|&ext| unsafe { CStr::from_ptr(ext) })
                .collect::<Vec<_>>()
        );

        Ok(extensions.to_vec())
    }

    /// Creates a Vulkan surface for this window.
    ///
    /// # Errors
    /// Returns [`Error::Window`] if the window handles are unavailable or
    /// surface creation fails.
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;

        let window_handle = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("Failed to get window handle: {}", e)))?;

        // SAFETY: entry and instance are valid; the handles come from a live
        // winit window. The surface is destroyed in Surface::drop.
        let handle = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| Error::Window(format!("Failed to create Vulkan surface: {}", e)))?
        };

        let surface_loader = ash::khr::surface::Instance::new(entry, instance);

        tracing::info!("Vulkan surface created");

        Ok(Surface {
            handle,
            surface_loader,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_flag_take_clears() {
        let flag = ResizeFlag::new();
        assert!(!flag.take());

        flag.mark();
        assert!(flag.is_set());
        assert!(flag.take());
        assert!(!flag.take());
    }

    #[test]
    fn test_resize_flag_shared_between_clones() {
        let flag = ResizeFlag::new();
        let observer = flag.clone();

        flag.mark();
        flag.mark();
        assert!(observer.take());
        assert!(!flag.is_set());
    }

    #[test]
    fn test_resize_flag_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ResizeFlag>();
    }
}

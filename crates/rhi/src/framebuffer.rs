//! Framebuffers binding image views to a render pass.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::render_pass::RenderPass;

/// Owned `VkFramebuffer`.
pub struct Framebuffer {
    device: Arc<Device>,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl Framebuffer {
    /// Creates a framebuffer for `render_pass`.
    ///
    /// `attachments` must follow the render pass attachment order: colors,
    /// then depth, then resolve.
    ///
    /// # Errors
    ///
    /// [`RhiError::RenderPassError`] if the view count does not match the
    /// render pass, or native failure.
    pub fn new(
        device: Arc<Device>,
        render_pass: &RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        if attachments.len() != render_pass.attachment_count() {
            return Err(RhiError::RenderPassError(format!(
                "Framebuffer has {} attachments, render pass expects {}.",
                attachments.len(),
                render_pass.attachment_count()
            )));
        }

        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.handle())
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe { device.handle().create_framebuffer(&create_info, None)? };
        debug!("Framebuffer created: {}x{}", extent.width, extent.height);

        Ok(Self {
            device,
            framebuffer,
            extent,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_framebuffer(self.framebuffer, None);
        }
    }
}

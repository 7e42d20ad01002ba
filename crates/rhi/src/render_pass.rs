//! Single-subpass render passes.
//!
//! # Overview
//!
//! A [`RenderPassDesc`] lists color attachments, an optional depth
//! attachment and an optional resolve attachment. [`plan_attachments`]
//! turns it into attachment descriptions and subpass references without
//! touching the device; [`RenderPass::new`] creates the native object from
//! that plan.
//!
//! Attachment indices are assigned colors first, then depth, then resolve.
//! Framebuffers must supply views in the same order.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use kiln_rhi::device::Device;
//! use kiln_rhi::render_pass::{
//!     ColorAttachment, DepthAttachment, RenderPass, RenderPassDesc, ResolveAttachment,
//! };
//!
//! # fn example(device: Arc<Device>, swapchain_format: vk::Format) -> kiln_rhi::RhiResult<()> {
//! let samples = vk::SampleCountFlags::TYPE_4;
//! let desc = RenderPassDesc {
//!     colors: vec![ColorAttachment::new(swapchain_format, samples)],
//!     depth: Some(DepthAttachment::new(vk::Format::D32_SFLOAT, samples)),
//!     resolve: Some(ResolveAttachment::new(swapchain_format)),
//! };
//! let render_pass = RenderPass::new(device, &desc)?;
//! assert_eq!(render_pass.attachment_count(), 3);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Color attachment written by the subpass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorAttachment {
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub final_layout: vk::ImageLayout,
}

impl ColorAttachment {
    /// Cleared and stored, left in `COLOR_ATTACHMENT_OPTIMAL`.
    pub fn new(format: vk::Format, samples: vk::SampleCountFlags) -> Self {
        Self {
            format,
            samples,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            final_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }
    }

    /// Single-sampled color attachment that is presented directly.
    pub fn presentable(format: vk::Format) -> Self {
        Self {
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Self::new(format, vk::SampleCountFlags::TYPE_1)
        }
    }
}

/// Depth attachment tested and written by the subpass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthAttachment {
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
}

impl DepthAttachment {
    /// Cleared, contents discarded after the pass.
    pub fn new(format: vk::Format, samples: vk::SampleCountFlags) -> Self {
        Self {
            format,
            samples,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
        }
    }
}

/// Single-sampled target the first color attachment resolves into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolveAttachment {
    pub format: vk::Format,
    pub final_layout: vk::ImageLayout,
}

impl ResolveAttachment {
    /// Not loaded, stored, left in `PRESENT_SRC_KHR`.
    pub fn new(format: vk::Format) -> Self {
        Self {
            format,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }
}

/// Attachments of a single-subpass render pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderPassDesc {
    pub colors: Vec<ColorAttachment>,
    pub depth: Option<DepthAttachment>,
    pub resolve: Option<ResolveAttachment>,
}

/// Attachment descriptions and subpass references derived from a
/// [`RenderPassDesc`].
#[derive(Clone, Debug)]
pub struct AttachmentPlan {
    pub descriptions: Vec<vk::AttachmentDescription>,
    pub color_refs: Vec<vk::AttachmentReference>,
    pub depth_ref: Option<vk::AttachmentReference>,
    /// Empty, or one entry per color reference.
    pub resolve_refs: Vec<vk::AttachmentReference>,
}

fn attachment_ref(index: usize, layout: vk::ImageLayout) -> vk::AttachmentReference {
    vk::AttachmentReference::default()
        .attachment(index as u32)
        .layout(layout)
}

/// Assigns attachment indices (colors, then depth, then resolve) and
/// builds the subpass references.
///
/// # Errors
///
/// [`RhiError::RenderPassError`] if there is neither a color nor a depth
/// attachment, or if a resolve attachment has no color attachment to
/// resolve.
pub fn plan_attachments(desc: &RenderPassDesc) -> RhiResult<AttachmentPlan> {
    if desc.colors.is_empty() && desc.depth.is_none() {
        return Err(RhiError::RenderPassError(
            "Render pass needs at least one color or depth attachment.".to_string(),
        ));
    }
    if desc.resolve.is_some() && desc.colors.is_empty() {
        return Err(RhiError::RenderPassError(
            "Resolve attachment declared without a color attachment.".to_string(),
        ));
    }

    let mut descriptions = Vec::with_capacity(desc.colors.len() + 2);
    let mut color_refs = Vec::with_capacity(desc.colors.len());

    for color in &desc.colors {
        color_refs.push(attachment_ref(
            descriptions.len(),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ));
        descriptions.push(
            vk::AttachmentDescription::default()
                .format(color.format)
                .samples(color.samples)
                .load_op(color.load_op)
                .store_op(color.store_op)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(color.final_layout),
        );
    }

    let depth_ref = desc.depth.map(|depth| {
        let reference = attachment_ref(
            descriptions.len(),
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        );
        descriptions.push(
            vk::AttachmentDescription::default()
                .format(depth.format)
                .samples(depth.samples)
                .load_op(depth.load_op)
                .store_op(depth.store_op)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        );
        reference
    });

    let mut resolve_refs = Vec::new();
    if let Some(resolve) = desc.resolve {
        let index = descriptions.len();
        descriptions.push(
            vk::AttachmentDescription::default()
                .format(resolve.format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::DONT_CARE)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(resolve.final_layout),
        );

        // Only the first color attachment is resolved.
        resolve_refs.push(attachment_ref(index, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL));
        resolve_refs.extend(
            std::iter::repeat(
                vk::AttachmentReference::default()
                    .attachment(vk::ATTACHMENT_UNUSED)
                    .layout(vk::ImageLayout::UNDEFINED),
            )
            .take(desc.colors.len() - 1),
        );
    }

    Ok(AttachmentPlan {
        descriptions,
        color_refs,
        depth_ref,
        resolve_refs,
    })
}

/// The external dependency that orders this frame's attachment writes
/// after the previous use of the same images.
pub fn external_dependency() -> vk::SubpassDependency {
    let stages =
        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;

    vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(stages)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(stages)
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )
}

/// Owned `VkRenderPass` with one graphics subpass.
pub struct RenderPass {
    device: Arc<Device>,
    render_pass: vk::RenderPass,
    attachment_count: usize,
    color_count: usize,
    has_depth: bool,
}

impl RenderPass {
    /// Creates the render pass described by `desc`.
    ///
    /// # Errors
    ///
    /// Planning errors from [`plan_attachments`], or native failure.
    pub fn new(device: Arc<Device>, desc: &RenderPassDesc) -> RhiResult<Self> {
        let plan = plan_attachments(desc)?;

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&plan.color_refs);
        if let Some(depth_ref) = plan.depth_ref.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }
        if !plan.resolve_refs.is_empty() {
            subpass = subpass.resolve_attachments(&plan.resolve_refs);
        }

        let subpasses = [subpass];
        let dependencies = [external_dependency()];
        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&plan.descriptions)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe { device.handle().create_render_pass(&create_info, None)? };

        info!(
            "Render pass created: {} color, depth {}, resolve {}",
            desc.colors.len(),
            desc.depth.is_some(),
            desc.resolve.is_some()
        );

        Ok(Self {
            device,
            render_pass,
            attachment_count: plan.descriptions.len(),
            color_count: desc.colors.len(),
            has_depth: desc.depth.is_some(),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Number of views a compatible framebuffer must supply.
    #[inline]
    pub fn attachment_count(&self) -> usize {
        self.attachment_count
    }

    #[inline]
    pub fn color_count(&self) -> usize {
        self.color_count
    }

    #[inline]
    pub fn has_depth(&self) -> bool {
        self.has_depth
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_render_pass(self.render_pass, None);
        }
        debug!("Render pass destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLOR: vk::Format = vk::Format::B8G8R8A8_SRGB;
    const DEPTH: vk::Format = vk::Format::D32_SFLOAT;
    const MSAA: vk::SampleCountFlags = vk::SampleCountFlags::TYPE_4;

    fn msaa_desc() -> RenderPassDesc {
        RenderPassDesc {
            colors: vec![ColorAttachment::new(COLOR, MSAA)],
            depth: Some(DepthAttachment::new(DEPTH, MSAA)),
            resolve: Some(ResolveAttachment::new(COLOR)),
        }
    }

    #[test]
    fn test_indices_are_colors_then_depth_then_resolve() {
        let plan = plan_attachments(&msaa_desc()).unwrap();

        assert_eq!(plan.descriptions.len(), 3);
        assert_eq!(plan.color_refs[0].attachment, 0);
        assert_eq!(plan.depth_ref.unwrap().attachment, 1);
        assert_eq!(plan.resolve_refs.len(), 1);
        assert_eq!(plan.resolve_refs[0].attachment, 2);
    }

    #[test]
    fn test_default_ops_and_layouts() {
        let plan = plan_attachments(&msaa_desc()).unwrap();
        let [color, depth, resolve] = [plan.descriptions[0], plan.descriptions[1], plan.descriptions[2]];

        assert_eq!(color.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(color.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(color.samples, MSAA);
        assert_eq!(color.final_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        assert_eq!(depth.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(depth.store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(depth.final_layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

        assert_eq!(resolve.load_op, vk::AttachmentLoadOp::DONT_CARE);
        assert_eq!(resolve.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(resolve.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(resolve.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);

        for description in &plan.descriptions {
            assert_eq!(description.initial_layout, vk::ImageLayout::UNDEFINED);
        }
    }

    #[test]
    fn test_depth_only_pass_is_valid() {
        let plan = plan_attachments(&RenderPassDesc {
            depth: Some(DepthAttachment::new(DEPTH, vk::SampleCountFlags::TYPE_1)),
            ..Default::default()
        })
        .unwrap();
        assert!(plan.color_refs.is_empty());
        assert_eq!(plan.depth_ref.unwrap().attachment, 0);
    }

    #[test]
    fn test_empty_pass_is_rejected() {
        assert!(matches!(
            plan_attachments(&RenderPassDesc::default()),
            Err(RhiError::RenderPassError(_))
        ));
    }

    #[test]
    fn test_resolve_without_color_is_rejected() {
        let desc = RenderPassDesc {
            colors: Vec::new(),
            depth: Some(DepthAttachment::new(DEPTH, MSAA)),
            resolve: Some(ResolveAttachment::new(COLOR)),
        };
        assert!(matches!(
            plan_attachments(&desc),
            Err(RhiError::RenderPassError(_))
        ));
    }

    #[test]
    fn test_resolve_refs_match_color_count() {
        let desc = RenderPassDesc {
            colors: vec![ColorAttachment::new(COLOR, MSAA), ColorAttachment::new(COLOR, MSAA)],
            depth: None,
            resolve: Some(ResolveAttachment::new(COLOR)),
        };
        let plan = plan_attachments(&desc).unwrap();
        assert_eq!(plan.resolve_refs.len(), 2);
        assert_eq!(plan.resolve_refs[0].attachment, 2);
        assert_eq!(plan.resolve_refs[1].attachment, vk::ATTACHMENT_UNUSED);
    }

    #[test]
    fn test_external_dependency() {
        let dependency = external_dependency();
        assert_eq!(dependency.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(dependency.dst_subpass, 0);
        assert_eq!(dependency.src_access_mask, vk::AccessFlags::empty());
        assert!(
            dependency
                .dst_stage_mask
                .contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
        );
        assert!(
            dependency
                .dst_access_mask
                .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        );
    }
}

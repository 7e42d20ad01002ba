//! GPU image management.
//!
//! # Overview
//!
//! - [`ImageDesc`] describes a 2D image: extent, mip levels, samples,
//!   format, tiling and [`ImageUsageClass`].
//! - [`GpuImage`] is allocated once from its description; allocation
//!   creates the image, binds memory and creates a view covering every mip
//!   level.
//! - [`layout_transition_barrier`] is the table of supported layout
//!   transitions. Anything outside it is an error, never a silent no-op.
//! - [`GpuImage::generate_mipmaps`] fills levels `1..L` by successive
//!   linear blits.
//!
//! All transfer operations go through [`CommandPool::submit_one_shot`] and
//! block until the graphics queue is idle.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::allocation::AllocationState;
use crate::command::CommandPool;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// What an image is used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageUsageClass {
    /// Sampled texture, filled by upload and mip generation.
    Texture,
    /// Transient multisampled color target, resolved each frame.
    ColorAttachment,
    /// Depth target.
    DepthAttachment,
}

impl ImageUsageClass {
    pub fn usage_flags(self) -> vk::ImageUsageFlags {
        use vk::ImageUsageFlags as F;
        match self {
            Self::Texture => F::TRANSFER_SRC | F::TRANSFER_DST | F::SAMPLED,
            Self::ColorAttachment => F::TRANSIENT_ATTACHMENT | F::COLOR_ATTACHMENT,
            Self::DepthAttachment => F::DEPTH_STENCIL_ATTACHMENT,
        }
    }

    pub fn aspect(self) -> vk::ImageAspectFlags {
        match self {
            Self::Texture | Self::ColorAttachment => vk::ImageAspectFlags::COLOR,
            Self::DepthAttachment => vk::ImageAspectFlags::DEPTH,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Texture => "texture image",
            Self::ColorAttachment => "color attachment",
            Self::DepthAttachment => "depth attachment",
        }
    }
}

/// Number of mip levels for a full chain down to 1x1:
/// `floor(log2(max(width, height))) + 1`.
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    u32::BITS - largest.leading_zeros()
}

/// Description of a 2D image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub mip_levels: u32,
    pub samples: vk::SampleCountFlags,
    pub format: vk::Format,
    pub tiling: vk::ImageTiling,
    pub usage: ImageUsageClass,
}

impl ImageDesc {
    /// Single-sampled texture with a full mip chain.
    pub fn texture(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            extent,
            mip_levels: mip_level_count(extent.width, extent.height),
            samples: vk::SampleCountFlags::TYPE_1,
            format,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: ImageUsageClass::Texture,
        }
    }

    pub fn color_attachment(
        extent: vk::Extent2D,
        format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> Self {
        Self {
            extent,
            mip_levels: 1,
            samples,
            format,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: ImageUsageClass::ColorAttachment,
        }
    }

    pub fn depth_attachment(
        extent: vk::Extent2D,
        format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> Self {
        Self {
            usage: ImageUsageClass::DepthAttachment,
            ..Self::color_attachment(extent, format, samples)
        }
    }

    #[inline]
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.usage.aspect()
    }

    /// Checks the extent and mip level count.
    pub fn validate(&self) -> RhiResult<()> {
        let vk::Extent2D { width, height } = self.extent;
        if width == 0 || height == 0 {
            return Err(RhiError::InvalidDescription(format!(
                "{} extent must be non-zero, got {}x{}",
                self.usage.name(),
                width,
                height
            )));
        }

        let max_levels = mip_level_count(width, height);
        if self.mip_levels == 0 || self.mip_levels > max_levels {
            return Err(RhiError::InvalidDescription(format!(
                "{} mip levels must be in 1..={}, got {}",
                self.usage.name(),
                max_levels,
                self.mip_levels
            )));
        }

        if self.mip_levels > 1 && self.samples != vk::SampleCountFlags::TYPE_1 {
            return Err(RhiError::InvalidDescription(format!(
                "{} cannot be multisampled with {} mip levels",
                self.usage.name(),
                self.mip_levels
            )));
        }

        Ok(())
    }
}

/// Access masks and stages of a layout transition barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionBarrier {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Barrier parameters for a supported layout transition.
///
/// Supported:
/// - `UNDEFINED -> TRANSFER_DST_OPTIMAL`: nothing to wait for, transfer
///   writes after.
/// - `TRANSFER_DST_OPTIMAL -> SHADER_READ_ONLY_OPTIMAL`: transfer writes
///   become visible to fragment shader reads.
///
/// # Errors
///
/// [`RhiError::UnsupportedLayoutTransition`] for every other pair.
pub fn layout_transition_barrier(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> RhiResult<TransitionBarrier> {
    match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => {
            Ok(TransitionBarrier {
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::TRANSFER_WRITE,
                src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst_stage: vk::PipelineStageFlags::TRANSFER,
            })
        }
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
            Ok(TransitionBarrier {
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::SHADER_READ,
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            })
        }
        _ => Err(RhiError::UnsupportedLayoutTransition { old, new }),
    }
}

/// One step of mip generation: blit level `src_level` (of `src_extent`)
/// into level `src_level + 1` (of `dst_extent`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MipBlit {
    pub src_level: u32,
    pub src_extent: vk::Extent2D,
    pub dst_extent: vk::Extent2D,
}

/// Blit sequence for a chain of `mip_levels` starting at `extent`. Each
/// dimension halves, floored, never below 1.
pub fn mip_blit_plan(extent: vk::Extent2D, mip_levels: u32) -> Vec<MipBlit> {
    let mut plan = Vec::with_capacity(mip_levels.saturating_sub(1) as usize);
    let mut current = extent;

    for src_level in 0..mip_levels.saturating_sub(1) {
        let next = vk::Extent2D {
            width: (current.width / 2).max(1),
            height: (current.height / 2).max(1),
        };
        plan.push(MipBlit {
            src_level,
            src_extent: current,
            dst_extent: next,
        });
        current = next;
    }

    plan
}

fn far_corner(extent: vk::Extent2D) -> vk::Offset3D {
    vk::Offset3D {
        x: extent.width as i32,
        y: extent.height as i32,
        z: 1,
    }
}

/// Native state of an allocated image.
struct ImageMemory {
    device: Arc<Device>,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
}

impl Drop for ImageMemory {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.handle().destroy_image_view(self.view, None);
            }
        }

        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free image allocation: {:?}", e);
                    }
                }
                Err(e) => error!("Leaking image allocation: {}", e),
            }
        }

        unsafe {
            self.device.handle().destroy_image(self.image, None);
        }
    }
}

/// GPU image with allocator-managed memory and a view.
pub struct GpuImage {
    desc: ImageDesc,
    state: AllocationState<ImageMemory>,
}

impl GpuImage {
    /// Creates an unallocated image.
    pub fn new(desc: ImageDesc) -> Self {
        Self {
            desc,
            state: AllocationState::Unallocated,
        }
    }

    /// Shorthand for [`GpuImage::new`] followed by [`GpuImage::allocate`].
    pub fn create(device: &Arc<Device>, desc: ImageDesc) -> RhiResult<Self> {
        let mut image = Self::new(desc);
        image.allocate(device)?;
        Ok(image)
    }

    /// Creates the image, binds device-local memory and creates its view.
    ///
    /// # Errors
    ///
    /// - [`RhiError::AlreadyAllocated`] on a second call
    /// - [`RhiError::InvalidDescription`] if the description is invalid
    /// - native or allocator failures
    pub fn allocate(&mut self, device: &Arc<Device>) -> RhiResult<()> {
        let desc = self.desc;
        self.state
            .allocate_with(desc.usage.name(), || create_image_memory(device, &desc))?;

        debug!(
            "Allocated {}: {}x{}, {} mip level(s), {:?}",
            desc.usage.name(),
            desc.extent.width,
            desc.extent.height,
            desc.mip_levels,
            desc.samples
        );
        Ok(())
    }

    /// Transitions every mip level from `old` to `new`.
    ///
    /// # Errors
    ///
    /// [`RhiError::UnsupportedLayoutTransition`] for pairs outside
    /// [`layout_transition_barrier`], checked before anything is recorded.
    pub fn transition_layout(
        &self,
        pool: &CommandPool,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) -> RhiResult<()> {
        let memory = self.memory()?;
        let barrier = layout_transition_barrier(old, new)?;

        let image_barrier = vk::ImageMemoryBarrier::default()
            .old_layout(old)
            .new_layout(new)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(memory.image)
            .subresource_range(self.subresource_range(0, self.desc.mip_levels))
            .src_access_mask(barrier.src_access)
            .dst_access_mask(barrier.dst_access);

        pool.submit_one_shot(|recorder| {
            recorder.pipeline_barrier(barrier.src_stage, barrier.dst_stage, &[image_barrier])
        })
    }

    /// Copies tightly packed texels from `buffer` into mip level 0. The
    /// image must be in `TRANSFER_DST_OPTIMAL`.
    pub fn copy_from_buffer(&self, pool: &CommandPool, buffer: vk::Buffer) -> RhiResult<()> {
        let memory = self.memory()?;
        let (image, aspect, extent) = (memory.image, self.desc.aspect(), self.desc.extent);

        pool.submit_one_shot(|recorder| recorder.copy_buffer_to_image(buffer, image, aspect, extent))
    }

    /// Generates mip levels `1..L` from level 0 and leaves every level in
    /// `SHADER_READ_ONLY_OPTIMAL`.
    ///
    /// All levels must be in `TRANSFER_DST_OPTIMAL` with level 0 filled.
    ///
    /// # Errors
    ///
    /// [`RhiError::LinearBlitUnsupported`] if the format cannot be blitted
    /// with linear filtering in optimal tiling. Nothing is recorded in that
    /// case.
    pub fn generate_mipmaps(&self, pool: &CommandPool) -> RhiResult<()> {
        let memory = self.memory()?;
        let format = self.desc.format;

        let features = memory
            .device
            .physical_info()
            .optimal_tiling_features(memory.device.instance(), format);
        if !features.contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR) {
            return Err(RhiError::LinearBlitUnsupported(format));
        }

        let image = memory.image;
        let mip_levels = self.desc.mip_levels;
        let plan = mip_blit_plan(self.desc.extent, mip_levels);

        pool.submit_one_shot(|recorder| {
            for step in &plan {
                let level = self.subresource_range(step.src_level, 1);

                let to_src = vk::ImageMemoryBarrier::default()
                    .image(image)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .subresource_range(level)
                    .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                    .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                    .dst_access_mask(vk::AccessFlags::TRANSFER_READ);
                recorder.pipeline_barrier(
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::TRANSFER,
                    &[to_src],
                )?;

                let blit = vk::ImageBlit::default()
                    .src_offsets([vk::Offset3D::default(), far_corner(step.src_extent)])
                    .src_subresource(self.subresource_layers(step.src_level))
                    .dst_offsets([vk::Offset3D::default(), far_corner(step.dst_extent)])
                    .dst_subresource(self.subresource_layers(step.src_level + 1));
                recorder.blit_image(image, &blit, vk::Filter::LINEAR)?;

                let to_shader = to_src
                    .old_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                    .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    .src_access_mask(vk::AccessFlags::TRANSFER_READ)
                    .dst_access_mask(vk::AccessFlags::SHADER_READ);
                recorder.pipeline_barrier(
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                    &[to_shader],
                )?;
            }

            let last = vk::ImageMemoryBarrier::default()
                .image(image)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .subresource_range(self.subresource_range(mip_levels - 1, 1))
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ);
            recorder.pipeline_barrier(
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                &[last],
            )
        })?;

        debug!("Generated {} mip level(s) for {:?}", mip_levels, format);
        Ok(())
    }

    /// Releases the image, view and memory. The caller must ensure the GPU
    /// no longer uses them.
    pub fn destroy(&mut self) {
        if self.state.release().is_some() {
            debug!("Destroyed {}", self.desc.usage.name());
        }
    }

    pub fn handle(&self) -> RhiResult<vk::Image> {
        Ok(self.memory()?.image)
    }

    pub fn view(&self) -> RhiResult<vk::ImageView> {
        Ok(self.memory()?.view)
    }

    #[inline]
    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    #[inline]
    pub fn is_allocated(&self) -> bool {
        self.state.is_allocated()
    }

    fn memory(&self) -> RhiResult<&ImageMemory> {
        self.state.get(self.desc.usage.name())
    }

    fn subresource_range(&self, base_mip_level: u32, level_count: u32) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange::default()
            .aspect_mask(self.desc.aspect())
            .base_mip_level(base_mip_level)
            .level_count(level_count)
            .base_array_layer(0)
            .layer_count(1)
    }

    fn subresource_layers(&self, mip_level: u32) -> vk::ImageSubresourceLayers {
        vk::ImageSubresourceLayers::default()
            .aspect_mask(self.desc.aspect())
            .mip_level(mip_level)
            .base_array_layer(0)
            .layer_count(1)
    }
}

fn create_image_memory(device: &Arc<Device>, desc: &ImageDesc) -> RhiResult<ImageMemory> {
    desc.validate()?;

    let image_info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(desc.format)
        .extent(vk::Extent3D {
            width: desc.extent.width,
            height: desc.extent.height,
            depth: 1,
        })
        .mip_levels(desc.mip_levels)
        .array_layers(1)
        .samples(desc.samples)
        .tiling(desc.tiling)
        .usage(desc.usage.usage_flags())
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);

    let image = unsafe { device.handle().create_image(&image_info, None)? };
    // From here on, dropping `memory` destroys what exists so far.
    let mut memory = ImageMemory {
        device: device.clone(),
        image,
        view: vk::ImageView::null(),
        allocation: None,
    };

    let requirements = unsafe { device.handle().get_image_memory_requirements(image) };
    let allocation = device.allocator()?.allocate(&AllocationCreateDesc {
        name: desc.usage.name(),
        requirements,
        location: MemoryLocation::GpuOnly,
        linear: desc.tiling == vk::ImageTiling::LINEAR,
        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
    })?;

    let allocation = memory.allocation.insert(allocation);
    unsafe {
        device
            .handle()
            .bind_image_memory(image, allocation.memory(), allocation.offset())?;
    }

    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(desc.format)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(desc.aspect())
                .base_mip_level(0)
                .level_count(desc.mip_levels)
                .base_array_layer(0)
                .layer_count(1),
        );

    memory.view = unsafe { device.handle().create_image_view(&view_info, None)? };

    Ok(memory)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_mip_level_count() {
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(2, 2), 2);
        assert_eq!(mip_level_count(512, 512), 10);
        assert_eq!(mip_level_count(1024, 512), 11);
        assert_eq!(mip_level_count(300, 17), 9);
        assert_eq!(mip_level_count(0, 0), 1);
    }

    #[test]
    fn test_supported_transitions() {
        let upload = layout_transition_barrier(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert_eq!(upload.src_access, vk::AccessFlags::empty());
        assert_eq!(upload.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(upload.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(upload.dst_stage, vk::PipelineStageFlags::TRANSFER);

        let sample = layout_transition_barrier(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(sample.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(sample.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(sample.src_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(sample.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn test_unsupported_transition_is_an_error() {
        let err = layout_transition_barrier(
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RhiError::UnsupportedLayoutTransition {
                old: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                new: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            }
        ));

        assert!(
            layout_transition_barrier(
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            )
            .is_err()
        );
    }

    #[test]
    fn test_mip_blit_plan_halves_with_floor_of_one() {
        let plan = mip_blit_plan(extent(8, 2), mip_level_count(8, 2));
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].dst_extent, extent(4, 1));
        assert_eq!(plan[1].src_extent, extent(4, 1));
        assert_eq!(plan[1].dst_extent, extent(2, 1));
        assert_eq!(plan[2].dst_extent, extent(1, 1));
        assert_eq!(
            plan.iter().map(|step| step.src_level).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_single_level_needs_no_blits() {
        assert!(mip_blit_plan(extent(1, 1), 1).is_empty());
    }

    #[test]
    fn test_usage_classes() {
        assert!(
            ImageUsageClass::Texture
                .usage_flags()
                .contains(vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::SAMPLED)
        );
        assert!(
            ImageUsageClass::ColorAttachment
                .usage_flags()
                .contains(vk::ImageUsageFlags::TRANSIENT_ATTACHMENT)
        );
        assert_eq!(
            ImageUsageClass::DepthAttachment.aspect(),
            vk::ImageAspectFlags::DEPTH
        );
    }

    #[test]
    fn test_desc_validation() {
        let texture = ImageDesc::texture(extent(256, 128), vk::Format::R8G8B8A8_SRGB);
        assert_eq!(texture.mip_levels, 9);
        assert!(texture.validate().is_ok());

        let zero = ImageDesc::texture(extent(0, 128), vk::Format::R8G8B8A8_SRGB);
        assert!(matches!(zero.validate(), Err(RhiError::InvalidDescription(_))));

        let too_many = ImageDesc {
            mip_levels: 10,
            ..texture
        };
        assert!(too_many.validate().is_err());

        let depth = ImageDesc::depth_attachment(
            extent(800, 600),
            vk::Format::D32_SFLOAT,
            vk::SampleCountFlags::TYPE_4,
        );
        assert!(depth.validate().is_ok());
        assert_eq!(depth.mip_levels, 1);
    }

    #[test]
    fn test_operations_before_allocate_fail() {
        let image = GpuImage::new(ImageDesc::texture(extent(4, 4), vk::Format::R8G8B8A8_SRGB));
        assert!(matches!(image.handle(), Err(RhiError::NotAllocated("texture image"))));
        assert!(image.view().is_err());
        assert!(!image.is_allocated());
    }
}

//! Descriptor set layouts, pools and sets.
//!
//! # Overview
//!
//! - [`DescriptorBinder`] accumulates `(binding, kind, stages)` declarations
//!   and derives the layout bindings and pool sizes from them.
//! - [`DescriptorSetLayout`] is created once and outlives swapchain
//!   recreation.
//! - [`DescriptorSets`] owns a pool sized for exactly `set_count` sets and
//!   the sets themselves. It is rebuilt with the swapchain.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use kiln_rhi::descriptor::{DescriptorBinder, DescriptorKind, DescriptorResource};
//! use kiln_rhi::device::Device;
//!
//! # fn example(
//! #     device: Arc<Device>,
//! #     uniform: vk::Buffer,
//! #     view: vk::ImageView,
//! #     sampler: vk::Sampler,
//! # ) -> kiln_rhi::RhiResult<()> {
//! let mut binder = DescriptorBinder::new();
//! binder
//!     .add(0, DescriptorKind::UniformBuffer, vk::ShaderStageFlags::VERTEX)?
//!     .add(1, DescriptorKind::CombinedImageSampler, vk::ShaderStageFlags::FRAGMENT)?;
//!
//! let layout = binder.build_layout(device)?;
//! let sets = layout.allocate_sets(3)?;
//! sets.update(
//!     0,
//!     &[
//!         DescriptorResource::UniformBuffer { buffer: uniform, range: 192 },
//!         DescriptorResource::CombinedImageSampler { view, sampler },
//!     ],
//! )?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Kind of resource behind a binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorKind {
    UniformBuffer,
    CombinedImageSampler,
}

impl DescriptorKind {
    #[inline]
    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            Self::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            Self::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }
}

/// One declared binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub kind: DescriptorKind,
    pub stages: vk::ShaderStageFlags,
}

/// Accumulates binding declarations for a single set layout.
#[derive(Clone, Debug, Default)]
pub struct DescriptorBinder {
    bindings: Vec<DescriptorBinding>,
}

impl DescriptorBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `binding` of `kind`, visible to `stages`.
    ///
    /// # Errors
    ///
    /// [`RhiError::DescriptorError`] if `binding` is already declared.
    pub fn add(
        &mut self,
        binding: u32,
        kind: DescriptorKind,
        stages: vk::ShaderStageFlags,
    ) -> RhiResult<&mut Self> {
        if self.bindings.iter().any(|existing| existing.binding == binding) {
            return Err(RhiError::DescriptorError(format!(
                "Binding {binding} is declared twice."
            )));
        }

        self.bindings.push(DescriptorBinding {
            binding,
            kind,
            stages,
        });
        Ok(self)
    }

    #[inline]
    pub fn bindings(&self) -> &[DescriptorBinding] {
        &self.bindings
    }

    /// One layout binding per declaration, each holding a single descriptor.
    pub fn layout_bindings(&self) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        self.bindings
            .iter()
            .map(|declared| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(declared.binding)
                    .descriptor_type(declared.kind.descriptor_type())
                    .descriptor_count(1)
                    .stage_flags(declared.stages)
            })
            .collect()
    }

    /// Pool sizes for `set_count` sets: per descriptor kind, `set_count`
    /// times the number of bindings of that kind.
    pub fn pool_sizes(&self, set_count: u32) -> Vec<vk::DescriptorPoolSize> {
        pool_sizes(&self.bindings, set_count)
    }

    /// Creates the set layout.
    ///
    /// # Errors
    ///
    /// [`RhiError::DescriptorError`] if nothing was declared, or native
    /// failure.
    pub fn build_layout(&self, device: Arc<Device>) -> RhiResult<DescriptorSetLayout> {
        if self.bindings.is_empty() {
            return Err(RhiError::DescriptorError(
                "Descriptor set layout bindings must be set.".to_string(),
            ));
        }

        let layout_bindings = self.layout_bindings();
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&layout_bindings);

        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!(
            "Created descriptor set layout with {} binding(s)",
            self.bindings.len()
        );

        Ok(DescriptorSetLayout {
            device,
            layout,
            bindings: self.bindings.clone(),
        })
    }
}

fn pool_sizes(bindings: &[DescriptorBinding], set_count: u32) -> Vec<vk::DescriptorPoolSize> {
    let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();

    for declared in bindings {
        let ty = declared.kind.descriptor_type();
        match sizes.iter_mut().find(|size| size.ty == ty) {
            Some(size) => size.descriptor_count += set_count,
            None => sizes.push(
                vk::DescriptorPoolSize::default()
                    .ty(ty)
                    .descriptor_count(set_count),
            ),
        }
    }

    sizes
}

/// Descriptor set layout together with its declarations.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
    bindings: Vec<DescriptorBinding>,
}

impl DescriptorSetLayout {
    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    #[inline]
    pub fn bindings(&self) -> &[DescriptorBinding] {
        &self.bindings
    }

    /// Creates a pool sized for `set_count` sets of this layout and
    /// allocates all of them.
    pub fn allocate_sets(&self, set_count: u32) -> RhiResult<DescriptorSets> {
        let sizes = pool_sizes(&self.bindings, set_count);
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(set_count)
            .pool_sizes(&sizes);

        let pool = unsafe {
            self.device
                .handle()
                .create_descriptor_pool(&create_info, None)?
        };
        // From here on, dropping `sets` destroys the pool.
        let mut sets = DescriptorSets {
            device: self.device.clone(),
            pool,
            sets: Vec::new(),
            bindings: self.bindings.clone(),
        };

        let layouts = vec![self.layout; set_count as usize];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        sets.sets = unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info)? };

        debug!("Allocated {} descriptor set(s)", set_count);
        Ok(sets)
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
        debug!("Destroyed descriptor set layout");
    }
}

/// A resource written into one binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorResource {
    UniformBuffer {
        buffer: vk::Buffer,
        range: vk::DeviceSize,
    },
    /// Image view in `SHADER_READ_ONLY_OPTIMAL` with its sampler.
    CombinedImageSampler {
        view: vk::ImageView,
        sampler: vk::Sampler,
    },
}

impl DescriptorResource {
    #[inline]
    pub fn kind(&self) -> DescriptorKind {
        match self {
            Self::UniformBuffer { .. } => DescriptorKind::UniformBuffer,
            Self::CombinedImageSampler { .. } => DescriptorKind::CombinedImageSampler,
        }
    }
}

/// Checks that `resources` match the declared bindings one-to-one, in order.
pub fn check_resources(
    bindings: &[DescriptorBinding],
    resources: &[DescriptorResource],
) -> RhiResult<()> {
    if bindings.len() != resources.len() {
        return Err(RhiError::DescriptorError(format!(
            "Expected {} resources, got {}.",
            bindings.len(),
            resources.len()
        )));
    }

    for (declared, resource) in bindings.iter().zip(resources) {
        if declared.kind != resource.kind() {
            return Err(RhiError::DescriptorError(format!(
                "Binding {} expects {:?}, got {:?}.",
                declared.binding,
                declared.kind,
                resource.kind()
            )));
        }
    }

    Ok(())
}

enum WriteInfo {
    Buffer([vk::DescriptorBufferInfo; 1]),
    Image([vk::DescriptorImageInfo; 1]),
}

/// Descriptor pool and the sets allocated from it.
pub struct DescriptorSets {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
    bindings: Vec<DescriptorBinding>,
}

impl DescriptorSets {
    #[inline]
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Set `index`.
    pub fn get(&self, index: usize) -> RhiResult<vk::DescriptorSet> {
        self.sets.get(index).copied().ok_or_else(|| {
            RhiError::DescriptorError(format!(
                "Descriptor set {} out of range ({} allocated).",
                index,
                self.sets.len()
            ))
        })
    }

    /// Writes `resources` into set `index`, one per declared binding.
    ///
    /// # Errors
    ///
    /// [`RhiError::DescriptorError`] if `index` is out of range or the
    /// resources do not match the declared binding kinds.
    pub fn update(&self, index: usize, resources: &[DescriptorResource]) -> RhiResult<()> {
        let set = self.get(index)?;
        check_resources(&self.bindings, resources)?;

        let infos: Vec<WriteInfo> = resources
            .iter()
            .map(|resource| match *resource {
                DescriptorResource::UniformBuffer { buffer, range } => WriteInfo::Buffer([
                    vk::DescriptorBufferInfo::default()
                        .buffer(buffer)
                        .offset(0)
                        .range(range),
                ]),
                DescriptorResource::CombinedImageSampler { view, sampler } => WriteInfo::Image([
                    vk::DescriptorImageInfo::default()
                        .sampler(sampler)
                        .image_view(view)
                        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
                ]),
            })
            .collect();

        let writes: Vec<vk::WriteDescriptorSet> = self
            .bindings
            .iter()
            .zip(&infos)
            .map(|(declared, info)| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(declared.binding)
                    .dst_array_element(0)
                    .descriptor_type(declared.kind.descriptor_type());
                match info {
                    WriteInfo::Buffer(buffer_info) => write.buffer_info(buffer_info),
                    WriteInfo::Image(image_info) => write.image_info(image_info),
                }
            })
            .collect();

        unsafe {
            self.device.handle().update_descriptor_sets(&writes, &[]);
        }
        Ok(())
    }
}

impl Drop for DescriptorSets {
    fn drop(&mut self) {
        // Sets are released with the pool.
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_pool(self.pool, None);
        }
        debug!("Destroyed descriptor pool");
    }
}

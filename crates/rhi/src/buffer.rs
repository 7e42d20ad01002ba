//! GPU buffer management.
//!
//! # Overview
//!
//! - [`BufferUsageClass`] fixes the usage flags and memory locality of each
//!   kind of buffer.
//! - [`GpuBuffer`] starts unallocated, is allocated exactly once, and only
//!   then accepts writes.
//! - [`GpuBuffer::upload_slice`] fills a device-local buffer through a
//!   staging copy.
//!
//! Uploads submit and block until the graphics queue is idle. That is fine
//! at load time but serializes every transfer; a dedicated transfer queue
//! with its own fence would be needed for streaming.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use kiln_rhi::buffer::{BufferUsageClass, GpuBuffer};
//! use kiln_rhi::command::CommandPool;
//! use kiln_rhi::device::Device;
//!
//! # fn example(device: Arc<Device>, pool: &CommandPool) -> kiln_rhi::RhiResult<()> {
//! let indices: [u32; 6] = [0, 1, 2, 2, 3, 0];
//! let index_buffer = GpuBuffer::upload_slice(&device, pool, BufferUsageClass::Index, &indices)?;
//!
//! let mut uniforms = GpuBuffer::new(BufferUsageClass::Uniform);
//! uniforms.allocate(&device, 192)?;
//! uniforms.write(&[0.0f32; 48])?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::allocation::{AllocationState, check_capacity};
use crate::command::CommandPool;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// What a buffer is used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsageClass {
    /// Device-local vertex data, filled by staging upload.
    Vertex,
    /// Device-local index data, filled by staging upload.
    Index,
    /// Host-visible uniform data, written every frame.
    Uniform,
    /// Host-visible transfer source.
    Staging,
}

impl BufferUsageClass {
    /// Vulkan usage flags.
    pub fn usage_flags(self) -> vk::BufferUsageFlags {
        match self {
            Self::Vertex => vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::VERTEX_BUFFER,
            Self::Index => vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::INDEX_BUFFER,
            Self::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            Self::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    /// Memory locality. `CpuToGpu` memory is host-visible and coherent, and
    /// stays persistently mapped.
    pub fn memory_location(self) -> MemoryLocation {
        match self {
            Self::Vertex | Self::Index => MemoryLocation::GpuOnly,
            Self::Uniform | Self::Staging => MemoryLocation::CpuToGpu,
        }
    }

    /// Name used in errors and allocator debug output.
    pub fn name(self) -> &'static str {
        match self {
            Self::Vertex => "vertex buffer",
            Self::Index => "index buffer",
            Self::Uniform => "uniform buffer",
            Self::Staging => "staging buffer",
        }
    }
}

/// Native state of an allocated buffer.
struct BufferMemory {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
}

impl Drop for BufferMemory {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free buffer allocation: {:?}", e);
                    }
                }
                Err(e) => error!("Leaking buffer allocation: {}", e),
            }
        }

        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }
    }
}

/// GPU buffer with allocator-managed memory.
pub struct GpuBuffer {
    usage: BufferUsageClass,
    state: AllocationState<BufferMemory>,
}

impl GpuBuffer {
    /// Creates an unallocated buffer of the given class.
    pub fn new(usage: BufferUsageClass) -> Self {
        Self {
            usage,
            state: AllocationState::Unallocated,
        }
    }

    /// Creates the native buffer, allocates and binds its memory.
    ///
    /// # Errors
    ///
    /// - [`RhiError::AlreadyAllocated`] on a second call
    /// - [`RhiError::InvalidDescription`] for a zero size
    /// - native or allocator failures
    pub fn allocate(&mut self, device: &Arc<Device>, size: vk::DeviceSize) -> RhiResult<()> {
        let usage = self.usage;
        self.state
            .allocate_with(usage.name(), || create_buffer_memory(device, usage, size))?;

        debug!("Allocated {}: {} bytes", usage.name(), size);
        Ok(())
    }

    /// Writes a single value at offset 0.
    pub fn write<T: Pod>(&mut self, value: &T) -> RhiResult<()> {
        self.write_bytes(bytemuck::bytes_of(value))
    }

    /// Writes a slice at offset 0.
    ///
    /// # Errors
    ///
    /// Fails if unallocated, if `data` is empty, or if the slice is larger
    /// than the allocation.
    pub fn write_slice<T: Pod>(&mut self, data: &[T]) -> RhiResult<()> {
        let name = self.usage.name();
        self.state.get(name)?;
        if data.is_empty() {
            return Err(RhiError::EmptyPayload(name));
        }
        self.write_bytes(bytemuck::cast_slice(data))
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> RhiResult<()> {
        let name = self.usage.name();
        let memory = self.state.get_mut(name)?;

        check_capacity(memory.size, bytes.len() as u64)?;

        let mapped = memory
            .allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .ok_or(RhiError::NotHostVisible(name))?;

        // Host-coherent memory: no flush needed.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), mapped.as_ptr().cast::<u8>(), bytes.len());
        }

        Ok(())
    }

    /// Releases the native buffer and memory. The buffer may then be
    /// allocated again. The caller must ensure the GPU no longer uses it.
    pub fn destroy(&mut self) {
        if self.state.release().is_some() {
            debug!("Destroyed {}", self.usage.name());
        }
    }

    /// Creates a device-local buffer of class `usage` holding `data`.
    ///
    /// Stages through a host-visible buffer and a one-shot copy that blocks
    /// until the graphics queue is idle.
    pub fn upload_slice<T: Pod>(
        device: &Arc<Device>,
        pool: &CommandPool,
        usage: BufferUsageClass,
        data: &[T],
    ) -> RhiResult<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let size = bytes.len() as vk::DeviceSize;

        let mut staging = Self::new(BufferUsageClass::Staging);
        staging.allocate(device, size)?;
        staging.write_slice(bytes)?;

        let mut destination = Self::new(usage);
        destination.allocate(device, size)?;

        let src = staging.handle()?;
        let dst = destination.handle()?;
        pool.submit_one_shot(|recorder| recorder.copy_buffer(src, dst, size))?;

        debug!("Uploaded {} bytes into {}", size, usage.name());
        Ok(destination)
    }

    /// Native handle.
    pub fn handle(&self) -> RhiResult<vk::Buffer> {
        Ok(self.state.get(self.usage.name())?.buffer)
    }

    /// Allocated size in bytes.
    pub fn size(&self) -> RhiResult<vk::DeviceSize> {
        Ok(self.state.get(self.usage.name())?.size)
    }

    #[inline]
    pub fn usage(&self) -> BufferUsageClass {
        self.usage
    }

    #[inline]
    pub fn is_allocated(&self) -> bool {
        self.state.is_allocated()
    }
}

fn create_buffer_memory(
    device: &Arc<Device>,
    usage: BufferUsageClass,
    size: vk::DeviceSize,
) -> RhiResult<BufferMemory> {
    if size == 0 {
        return Err(RhiError::InvalidDescription(format!(
            "{} size must be greater than 0",
            usage.name()
        )));
    }

    let buffer_info = vk::BufferCreateInfo::default()
        .size(size)
        .usage(usage.usage_flags())
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
    // From here on, dropping `memory` destroys the buffer.
    let mut memory = BufferMemory {
        device: device.clone(),
        buffer,
        allocation: None,
        size,
    };

    let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };
    let allocation = device.allocator()?.allocate(&AllocationCreateDesc {
        name: usage.name(),
        requirements,
        location: usage.memory_location(),
        linear: true,
        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
    })?;

    let allocation = memory.allocation.insert(allocation);
    unsafe {
        device
            .handle()
            .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())?;
    }

    Ok(memory)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_CLASSES: [BufferUsageClass; 4] = [
        BufferUsageClass::Vertex,
        BufferUsageClass::Index,
        BufferUsageClass::Uniform,
        BufferUsageClass::Staging,
    ];

    #[test]
    fn test_usage_table() {
        use vk::BufferUsageFlags as F;

        assert_eq!(
            BufferUsageClass::Vertex.usage_flags(),
            F::TRANSFER_DST | F::VERTEX_BUFFER
        );
        assert_eq!(
            BufferUsageClass::Index.usage_flags(),
            F::TRANSFER_DST | F::INDEX_BUFFER
        );
        assert_eq!(BufferUsageClass::Uniform.usage_flags(), F::UNIFORM_BUFFER);
        assert_eq!(BufferUsageClass::Staging.usage_flags(), F::TRANSFER_SRC);
    }

    #[test]
    fn test_memory_locality() {
        assert_eq!(BufferUsageClass::Vertex.memory_location(), MemoryLocation::GpuOnly);
        assert_eq!(BufferUsageClass::Index.memory_location(), MemoryLocation::GpuOnly);
        assert_eq!(BufferUsageClass::Uniform.memory_location(), MemoryLocation::CpuToGpu);
        assert_eq!(BufferUsageClass::Staging.memory_location(), MemoryLocation::CpuToGpu);
    }

    #[test]
    fn test_write_before_allocate_fails_for_every_class() {
        for usage in ALL_CLASSES {
            let mut buffer = GpuBuffer::new(usage);
            assert!(matches!(buffer.write(&1u32), Err(RhiError::NotAllocated(_))));
            assert!(matches!(
                buffer.write_slice(&[1.0f32, 2.0]),
                Err(RhiError::NotAllocated(_))
            ));
            assert!(buffer.handle().is_err());
            assert!(!buffer.is_allocated());
        }
    }

    #[test]
    fn test_empty_slice_before_allocate_reports_allocation_first() {
        let mut buffer = GpuBuffer::new(BufferUsageClass::Uniform);
        let empty: [u32; 0] = [];
        assert!(matches!(
            buffer.write_slice(&empty),
            Err(RhiError::NotAllocated("uniform buffer"))
        ));
    }

    #[test]
    fn test_destroy_unallocated_is_noop() {
        let mut buffer = GpuBuffer::new(BufferUsageClass::Vertex);
        buffer.destroy();
        assert!(!buffer.is_allocated());
    }
}

//! Sampled textures.
//!
//! [`Texture::upload`] runs the full texture upload path:
//!
//! 1. copy the RGBA8 pixels into a staging buffer
//! 2. transition every mip level `UNDEFINED -> TRANSFER_DST_OPTIMAL`
//! 3. copy the staging buffer into level 0
//! 4. generate the remaining levels, leaving all of them shader-readable
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use kiln_rhi::command::CommandPool;
//! use kiln_rhi::device::Device;
//! use kiln_rhi::texture::Texture;
//!
//! # fn example(device: Arc<Device>, pool: &CommandPool) -> kiln_rhi::RhiResult<()> {
//! let pixels = vec![255u8; 4 * 64 * 64];
//! let texture = Texture::upload(&device, pool, &pixels, 64, 64)?;
//! assert_eq!(texture.mip_levels(), 7);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::info;

use crate::buffer::{BufferUsageClass, GpuBuffer};
use crate::command::CommandPool;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::image::{GpuImage, ImageDesc};
use crate::sampler::{Sampler, SamplerDesc};

/// Format of uploaded textures: 8-bit RGBA, sRGB encoded.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Mip-mapped sampled image with its sampler.
pub struct Texture {
    image: GpuImage,
    sampler: Sampler,
}

impl Texture {
    /// Uploads `width * height` RGBA8 texels and builds the mip chain.
    ///
    /// # Errors
    ///
    /// - [`RhiError::InvalidDescription`] if `rgba8` does not hold exactly
    ///   `width * height * 4` bytes
    /// - [`RhiError::LinearBlitUnsupported`] if the device cannot blit the
    ///   texture format with linear filtering
    pub fn upload(
        device: &Arc<Device>,
        pool: &CommandPool,
        rgba8: &[u8],
        width: u32,
        height: u32,
    ) -> RhiResult<Self> {
        let expected = width as usize * height as usize * 4;
        if rgba8.len() != expected {
            return Err(RhiError::InvalidDescription(format!(
                "texture of {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                rgba8.len()
            )));
        }

        let mut staging = GpuBuffer::new(BufferUsageClass::Staging);
        staging.allocate(device, expected as vk::DeviceSize)?;
        staging.write_slice(rgba8)?;

        let desc = ImageDesc::texture(vk::Extent2D { width, height }, TEXTURE_FORMAT);
        let image = GpuImage::create(device, desc)?;

        image.transition_layout(
            pool,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;
        image.copy_from_buffer(pool, staging.handle()?)?;
        image.generate_mipmaps(pool)?;

        let sampler = Sampler::new(device.clone(), &SamplerDesc::for_mip_levels(desc.mip_levels))?;

        info!(
            "Uploaded texture {}x{} with {} mip levels",
            width, height, desc.mip_levels
        );

        Ok(Self { image, sampler })
    }

    #[inline]
    pub fn image(&self) -> &GpuImage {
        &self.image
    }

    #[inline]
    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.image.desc().mip_levels
    }

    /// View for descriptor writes.
    pub fn view(&self) -> RhiResult<vk::ImageView> {
        self.image.view()
    }
}

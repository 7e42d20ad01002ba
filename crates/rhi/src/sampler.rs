//! Texture samplers.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Sampler parameters that vary per texture.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplerDesc {
    /// Number of mip levels; becomes `max_lod`.
    pub mip_levels: u32,
    /// Maximum anisotropy. `None` uses the device limit.
    pub max_anisotropy: Option<f32>,
}

impl SamplerDesc {
    pub fn for_mip_levels(mip_levels: u32) -> Self {
        Self {
            mip_levels,
            max_anisotropy: None,
        }
    }

    /// Create info: linear filtering and mipmapping, `REPEAT` on every axis,
    /// opaque black border, compare op `ALWAYS` (comparison disabled).
    pub fn create_info(&self, device_max_anisotropy: f32) -> vk::SamplerCreateInfo<'static> {
        let anisotropy = self
            .max_anisotropy
            .map_or(device_max_anisotropy, |requested| requested.min(device_max_anisotropy));

        vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(true)
            .max_anisotropy(anisotropy)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(self.mip_levels as f32)
    }
}

/// Owned `VkSampler`.
pub struct Sampler {
    device: Arc<Device>,
    sampler: vk::Sampler,
}

impl Sampler {
    pub fn new(device: Arc<Device>, desc: &SamplerDesc) -> RhiResult<Self> {
        let create_info = desc.create_info(device.physical_info().max_sampler_anisotropy());
        let sampler = unsafe { device.handle().create_sampler(&create_info, None)? };

        debug!("Created sampler with max LOD {}", desc.mip_levels);
        Ok(Self { device, sampler })
    }

    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_sampler(self.sampler, None);
        }
        debug!("Destroyed sampler");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_info_defaults() {
        let info = SamplerDesc::for_mip_levels(9).create_info(16.0);
        assert_eq!(info.mag_filter, vk::Filter::LINEAR);
        assert_eq!(info.min_filter, vk::Filter::LINEAR);
        assert_eq!(info.address_mode_u, vk::SamplerAddressMode::REPEAT);
        assert_eq!(info.address_mode_w, vk::SamplerAddressMode::REPEAT);
        assert_eq!(info.anisotropy_enable, vk::TRUE);
        assert_eq!(info.max_anisotropy, 16.0);
        assert_eq!(info.border_color, vk::BorderColor::INT_OPAQUE_BLACK);
        assert_eq!(info.compare_op, vk::CompareOp::ALWAYS);
        assert_eq!(info.mipmap_mode, vk::SamplerMipmapMode::LINEAR);
        assert_eq!(info.max_lod, 9.0);
    }

    #[test]
    fn test_requested_anisotropy_is_clamped_to_device_limit() {
        let desc = SamplerDesc {
            mip_levels: 1,
            max_anisotropy: Some(32.0),
        };
        assert_eq!(desc.create_info(8.0).max_anisotropy, 8.0);

        let desc = SamplerDesc {
            mip_levels: 1,
            max_anisotropy: Some(4.0),
        };
        assert_eq!(desc.create_info(8.0).max_anisotropy, 4.0);
    }
}

//! Physical device (GPU) selection and capability queries.
//!
//! # Overview
//!
//! Selection enumerates every GPU, rejects the ones that cannot drive the
//! frame loop (no graphics or present queue, no `VK_KHR_swapchain`, no
//! surface formats or present modes, no sampler anisotropy) and picks the
//! highest-scoring survivor.
//!
//! # Example
//!
//! ```no_run
//! use ash::vk;
//! use kiln_rhi::physical_device::select_physical_device;
//!
//! # fn example(
//! #     instance: &ash::Instance,
//! #     surface: vk::SurfaceKHR,
//! #     surface_loader: &ash::khr::surface::Instance,
//! # ) -> kiln_rhi::RhiResult<()> {
//! let gpu = select_physical_device(instance, surface, surface_loader)?;
//! println!("Selected GPU: {} ({:?} MSAA)", gpu.device_name(), gpu.max_usable_sample_count());
//! # Ok(())
//! # }
//! ```

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};
use crate::swapchain::SwapchainSupportDetails;

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Queue family indices required by the frame loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family that supports graphics (and therefore transfer) operations.
    pub graphics_family: Option<u32>,
    /// Family that can present to the target surface.
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Both graphics and present families were found.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Unique family indices, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);

        if let Some(graphics) = self.graphics_family {
            families.push(graphics);
        }
        if let Some(present) = self.present_family
            && !families.contains(&present)
        {
            families.push(present);
        }

        families
    }
}

/// Information about the selected physical device.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle.
    pub device: vk::PhysicalDevice,
    /// Device properties (name, limits, API version, etc.).
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported device features.
    pub features: vk::PhysicalDeviceFeatures,
    /// Queue family indices.
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    /// Returns the device name as a string.
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown Device")
    }

    /// Highest sample count usable for both color and depth framebuffer
    /// attachments.
    pub fn max_usable_sample_count(&self) -> vk::SampleCountFlags {
        max_usable_sample_count(
            self.properties.limits.framebuffer_color_sample_counts,
            self.properties.limits.framebuffer_depth_sample_counts,
        )
    }

    /// Maximum sampler anisotropy supported by the device.
    #[inline]
    pub fn max_sampler_anisotropy(&self) -> f32 {
        self.properties.limits.max_sampler_anisotropy
    }

    /// Returns the first of `candidates` whose tiling features contain
    /// `features`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::NoSupportedFormat`] if none qualifies.
    pub fn find_supported_format(
        &self,
        instance: &ash::Instance,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> RhiResult<vk::Format> {
        pick_supported_format(candidates, tiling, features, |format| unsafe {
            instance.get_physical_device_format_properties(self.device, format)
        })
    }

    /// Preferred depth attachment format.
    pub fn find_depth_format(&self, instance: &ash::Instance) -> RhiResult<vk::Format> {
        self.find_supported_format(
            instance,
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )
    }

    /// Format features for `format` with optimal tiling.
    pub fn optimal_tiling_features(
        &self,
        instance: &ash::Instance,
        format: vk::Format,
    ) -> vk::FormatFeatureFlags {
        unsafe {
            instance
                .get_physical_device_format_properties(self.device, format)
                .optimal_tiling_features
        }
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.properties.device_type)
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Picks the highest single sample count present in both masks.
pub fn max_usable_sample_count(
    color: vk::SampleCountFlags,
    depth: vk::SampleCountFlags,
) -> vk::SampleCountFlags {
    let counts = color & depth;
    [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .find(|&count| counts.contains(count))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

/// Returns the first candidate whose format properties, queried through
/// `properties_of`, advertise `features` for `tiling`.
pub fn pick_supported_format(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    mut properties_of: impl FnMut(vk::Format) -> vk::FormatProperties,
) -> RhiResult<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|&format| {
            let props = properties_of(format);
            match tiling {
                vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
                vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
                _ => false,
            }
        })
        .ok_or_else(|| RhiError::NoSupportedFormat(candidates.to_vec()))
}

/// Selects the most suitable physical device for rendering to `surface`.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no GPU meets the requirements.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    }

    info!("Found {} GPU(s)", devices.len());

    let best = devices
        .into_iter()
        .filter_map(|device| check_device_suitability(instance, device, surface, surface_loader))
        .map(|info| {
            let score = rate_device(&info.properties);
            debug!("GPU '{}' - score {}", info.device_name(), score);
            (info, score)
        })
        .max_by_key(|(_, score)| *score);

    let Some((selected, score)) = best else {
        warn!("No suitable GPU found with required capabilities");
        return Err(RhiError::NoSuitableGpu);
    };

    let version = selected.properties.api_version;
    info!(
        "Selected GPU: '{}' ({:?}) - Vulkan {}.{}.{}, score {}",
        selected.device_name(),
        selected.properties.device_type,
        vk::api_version_major(version),
        vk::api_version_minor(version),
        vk::api_version_patch(version),
        score
    );

    Ok(selected)
}

fn check_device_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let features = unsafe { instance.get_physical_device_features(device) };
    let name = properties
        .device_name_as_c_str()
        .map(CStr::to_string_lossy)
        .unwrap_or_default();

    let queue_families = find_queue_families(instance, device, surface, surface_loader);
    if !queue_families.is_complete() {
        debug!("GPU '{}' skipped: missing graphics or present queue", name);
        return None;
    }

    if !supports_swapchain_extension(instance, device) {
        debug!("GPU '{}' skipped: VK_KHR_swapchain not supported", name);
        return None;
    }

    let adequate = SwapchainSupportDetails::query(device, surface, surface_loader)
        .map(|support| support.is_adequate())
        .unwrap_or(false);
    if !adequate {
        debug!("GPU '{}' skipped: no surface formats or present modes", name);
        return None;
    }

    if features.sampler_anisotropy == vk::FALSE {
        debug!("GPU '{}' skipped: sampler anisotropy not supported", name);
        return None;
    }

    Some(PhysicalDeviceInfo {
        device,
        properties,
        features,
        queue_families,
    })
}

fn supports_swapchain_extension(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
    let Ok(extensions) = (unsafe { instance.enumerate_device_extension_properties(device) }) else {
        return false;
    };

    extensions.iter().any(|ext| {
        ext.extension_name_as_c_str()
            .is_ok_and(|name| name == ash::khr::swapchain::NAME)
    })
}

fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> QueueFamilyIndices {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

    let mut indices = QueueFamilyIndices::default();

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;

        if family.queue_count == 0 {
            continue;
        }

        if indices.graphics_family.is_none()
            && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        {
            indices.graphics_family = Some(i);
        }

        if indices.present_family.is_none() {
            let present_support = unsafe {
                surface_loader
                    .get_physical_device_surface_support(device, i, surface)
                    .unwrap_or(false)
            };
            if present_support {
                indices.present_family = Some(i);
            }
        }

        if indices.is_complete() {
            break;
        }
    }

    indices
}

/// Scores a device; higher is better.
fn rate_device(properties: &vk::PhysicalDeviceProperties) -> u32 {
    let type_score = match properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 100_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 10_000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 1_000,
        vk::PhysicalDeviceType::CPU => 100,
        _ => 1,
    };

    type_score + properties.limits.max_image_dimension2_d.min(65_536)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_family_indices_complete() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
        };
        assert!(indices.is_complete());
        assert!(!QueueFamilyIndices::default().is_complete());
        assert!(
            !QueueFamilyIndices {
                graphics_family: None,
                present_family: Some(1),
            }
            .is_complete()
        );
    }

    #[test]
    fn test_unique_families() {
        let shared = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
        };
        assert_eq!(shared.unique_families(), vec![0]);

        let split = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(2),
        };
        assert_eq!(split.unique_families(), vec![0, 2]);
    }

    #[test]
    fn test_max_usable_sample_count_intersects_masks() {
        use vk::SampleCountFlags as S;
        let color = S::TYPE_1 | S::TYPE_2 | S::TYPE_4 | S::TYPE_8;
        let depth = S::TYPE_1 | S::TYPE_2 | S::TYPE_4;
        assert_eq!(max_usable_sample_count(color, depth), S::TYPE_4);
        assert_eq!(max_usable_sample_count(S::TYPE_1, S::TYPE_1), S::TYPE_1);
        assert_eq!(
            max_usable_sample_count(S::empty(), S::TYPE_8),
            S::TYPE_1
        );
    }

    #[test]
    fn test_pick_supported_format_respects_order_and_tiling() {
        let props = |format: vk::Format| match format {
            vk::Format::D32_SFLOAT => vk::FormatProperties::default(),
            vk::Format::D32_SFLOAT_S8_UINT => vk::FormatProperties {
                optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                ..Default::default()
            },
            _ => vk::FormatProperties {
                linear_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                ..Default::default()
            },
        };

        let optimal = pick_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            props,
        )
        .unwrap();
        assert_eq!(optimal, vk::Format::D32_SFLOAT_S8_UINT);

        let linear = pick_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::LINEAR,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            props,
        )
        .unwrap();
        assert_eq!(linear, vk::Format::D24_UNORM_S8_UINT);
    }

    #[test]
    fn test_pick_supported_format_none() {
        let err = pick_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |_| vk::FormatProperties::default(),
        )
        .unwrap_err();
        assert!(matches!(err, RhiError::NoSupportedFormat(ref c) if c.len() == 3));
    }

    #[test]
    fn test_discrete_outranks_integrated() {
        let mut discrete = vk::PhysicalDeviceProperties::default();
        discrete.device_type = vk::PhysicalDeviceType::DISCRETE_GPU;
        discrete.limits.max_image_dimension2_d = 4096;

        let mut integrated = vk::PhysicalDeviceProperties::default();
        integrated.device_type = vk::PhysicalDeviceType::INTEGRATED_GPU;
        integrated.limits.max_image_dimension2_d = 16384;

        assert!(rate_device(&discrete) > rate_device(&integrated));
    }
}

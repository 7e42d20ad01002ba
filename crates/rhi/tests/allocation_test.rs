//! Allocation paths against a real device.
//!
//! Each test skips when no Vulkan loader or graphics-capable GPU is present.

use std::sync::Arc;

use ash::vk;

use kiln_rhi::buffer::{BufferUsageClass, GpuBuffer};
use kiln_rhi::device::Device;
use kiln_rhi::image::{GpuImage, ImageDesc};
use kiln_rhi::instance::{Instance, InstanceDesc};
use kiln_rhi::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices};

/// Device plus the instance it was created from, dropped in that order.
struct Headless {
    device: Arc<Device>,
    _instance: Instance,
}

fn headless() -> Option<Headless> {
    let instance = match Instance::new(&InstanceDesc {
        application_name: c"kiln-allocation-test",
        enable_validation: false,
        window_extensions: &[],
    }) {
        Ok(instance) => instance,
        Err(e) => {
            eprintln!("Skipping test: Vulkan not available ({e})");
            return None;
        }
    };

    let handle = instance.handle();
    let physical = unsafe { handle.enumerate_physical_devices() }
        .ok()?
        .into_iter()
        .find_map(|device| {
            let families = unsafe { handle.get_physical_device_queue_family_properties(device) };
            let graphics = families
                .iter()
                .position(|f| f.queue_flags.contains(vk::QueueFlags::GRAPHICS))?
                as u32;
            Some(PhysicalDeviceInfo {
                device,
                properties: unsafe { handle.get_physical_device_properties(device) },
                features: unsafe { handle.get_physical_device_features(device) },
                queue_families: QueueFamilyIndices {
                    graphics_family: Some(graphics),
                    present_family: Some(graphics),
                },
            })
        });
    let Some(physical) = physical else {
        eprintln!("Skipping test: no graphics-capable GPU");
        return None;
    };

    match Device::new(&instance, physical) {
        Ok(device) => Some(Headless {
            device,
            _instance: instance,
        }),
        Err(e) => {
            eprintln!("Skipping test: device creation failed ({e})");
            None
        }
    }
}

#[test]
fn test_uniform_buffer_binds_and_maps() {
    let Some(gpu) = headless() else {
        return;
    };

    let mut buffer = GpuBuffer::new(BufferUsageClass::Uniform);
    buffer.allocate(&gpu.device, 192).unwrap();
    assert!(buffer.is_allocated());
    assert_eq!(buffer.size().unwrap(), 192);

    buffer.write_slice(&[1.0f32; 48]).unwrap();
    buffer.destroy();
    assert!(!buffer.is_allocated());
}

#[test]
fn test_color_attachment_binds_and_gets_a_view() {
    let Some(gpu) = headless() else {
        return;
    };

    let extent = vk::Extent2D {
        width: 64,
        height: 32,
    };
    let image = GpuImage::create(
        &gpu.device,
        ImageDesc::color_attachment(
            extent,
            vk::Format::R8G8B8A8_UNORM,
            vk::SampleCountFlags::TYPE_1,
        ),
    )
    .unwrap();

    assert!(image.is_allocated());
    assert_ne!(image.view().unwrap(), vk::ImageView::null());
}

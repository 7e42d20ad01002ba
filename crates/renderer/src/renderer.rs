//! Vulkan frame backend and the renderer facade.
//!
//! [`Renderer::initialize`] builds the whole chain once: instance, surface,
//! device, swapchain, frame slots, shared scene resources and the first
//! swapchain resource arena. [`Renderer::draw_frame`] runs one tick of the
//! [`FrameOrchestrator`].
//!
//! # Resource Destruction Order
//!
//! [`VulkanBackend`] fields are declared in destruction order:
//! 1. Swapchain resource arena
//! 2. Shared scene resources
//! 3. Frame slots
//! 4. Command pool
//! 5. Swapchain
//! 6. Surface
//! 7. Device
//! 8. Instance
//!
//! [`Renderer`] waits for the device to go idle before any of them drop.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info};

use kiln_core::{EngineConfig, Timer};
use kiln_platform::{Surface, Window};
use kiln_rhi::command::CommandPool;
use kiln_rhi::device::Device;
use kiln_rhi::instance::{Instance, InstanceDesc};
use kiln_rhi::physical_device::select_physical_device;
use kiln_rhi::swapchain::{AcquireOutcome, PresentOutcome, Swapchain, SwapchainPreferences};
use kiln_rhi::sync::FrameSlot;

use crate::error::{RendererError, RendererResult};
use crate::frame_resources::{SceneAssets, SharedResources, SwapchainResources, TargetSettings};
use crate::orchestrator::{FrameBackend, FrameOrchestrator, FrameStatus};
use crate::ubo::UniformBufferObject;

/// Native implementation of [`FrameBackend`].
pub struct VulkanBackend {
    resources: Option<SwapchainResources>,
    shared: SharedResources,
    slots: Vec<FrameSlot>,
    pool: CommandPool,
    swapchain: Swapchain,
    surface: Surface,
    device: Arc<Device>,
    instance: Instance,
    window: Window,
    timer: Timer,
}

impl VulkanBackend {
    fn slot(&self, slot: usize) -> RendererResult<&FrameSlot> {
        self.slots.get(slot).ok_or(RendererError::SlotOutOfRange {
            index: slot,
            count: self.slots.len(),
        })
    }

    fn resources(&self) -> RendererResult<&SwapchainResources> {
        self.resources
            .as_ref()
            .ok_or(RendererError::MissingSwapchainResources)
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

fn extent_of(window: &Window) -> vk::Extent2D {
    let (width, height) = window.framebuffer_size();
    vk::Extent2D { width, height }
}

impl FrameBackend for VulkanBackend {
    fn wait_for_slot(&mut self, slot: usize) -> RendererResult<()> {
        self.slot(slot)?.in_flight.wait(u64::MAX)?;
        Ok(())
    }

    fn reset_slot(&mut self, slot: usize) -> RendererResult<()> {
        self.slot(slot)?.in_flight.reset()?;
        Ok(())
    }

    fn acquire(&mut self, slot: usize) -> RendererResult<AcquireOutcome> {
        let semaphore = self.slot(slot)?.image_available.handle();
        Ok(self.swapchain.acquire_next_image(semaphore)?)
    }

    fn update_frame_data(&mut self, image: usize) -> RendererResult<()> {
        let extent = self.swapchain.extent();
        let aspect_ratio = extent.width as f32 / extent.height.max(1) as f32;
        let ubo = UniformBufferObject::at_time(self.timer.elapsed_secs(), aspect_ratio);

        self.resources
            .as_mut()
            .ok_or(RendererError::MissingSwapchainResources)?
            .write_uniforms(image, &ubo)?;
        Ok(())
    }

    fn submit(&mut self, slot: usize, image: usize) -> RendererResult<()> {
        let resources = self.resources()?;
        let command_buffer =
            resources
                .command_buffer(image)
                .ok_or(RendererError::ImageOutOfRange {
                    index: image,
                    count: resources.image_count(),
                })?;
        let frame = self.slot(slot)?;

        let wait_semaphores = [frame.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [command_buffer];
        let signal_semaphores = [frame.render_finished.handle()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        // The fence was reset by the orchestrator after a successful acquire.
        unsafe {
            self.device
                .submit_graphics(std::slice::from_ref(&submit_info), frame.in_flight.handle())?;
        }
        Ok(())
    }

    fn present(&mut self, slot: usize, image: usize) -> RendererResult<PresentOutcome> {
        let semaphore = self.slot(slot)?.render_finished.handle();
        Ok(self
            .swapchain
            .present(self.device.present_queue(), image as u32, semaphore)?)
    }

    fn framebuffer_extent(&self) -> vk::Extent2D {
        extent_of(&self.window)
    }

    fn wait_idle(&mut self) -> RendererResult<()> {
        self.device.wait_idle()?;
        Ok(())
    }

    fn rebuild_swapchain(&mut self) -> RendererResult<usize> {
        // The old arena references the old swapchain's image views.
        self.resources = None;

        self.swapchain.recreate(extent_of(&self.window))?;
        let resources =
            SwapchainResources::build(&self.device, &self.pool, &self.swapchain, &self.shared)?;
        let image_count = resources.image_count();
        debug!(
            "Arena generation {} rebuilt at {}x{} (multisampled: {})",
            resources.generation(),
            resources.extent().width,
            resources.extent().height,
            resources.is_multisampled()
        );
        self.resources = Some(resources);

        Ok(image_count)
    }
}

/// Renderer facade driven by the application.
pub struct Renderer {
    orchestrator: FrameOrchestrator<VulkanBackend>,
    window: Window,
}

impl Renderer {
    /// Builds every GPU object needed to draw `scene` into `window`.
    ///
    /// # Errors
    ///
    /// Returns an error if no suitable GPU exists, a required extension is
    /// missing, the scene fails validation, or any native call fails. All
    /// of these are fatal at startup.
    pub fn initialize(
        window: &Window,
        config: &EngineConfig,
        scene: SceneAssets,
    ) -> RendererResult<Self> {
        let frames_in_flight = config.renderer.frames_in_flight;
        let extent = extent_of(window);
        info!(
            "Initializing renderer ({}x{}, {} frame(s) in flight)",
            extent.width, extent.height, frames_in_flight
        );

        let window_extensions = window.required_extensions()?;
        let instance = Instance::new(&InstanceDesc {
            application_name: c"Kiln",
            enable_validation: config.renderer.validation,
            window_extensions: &window_extensions,
        })?;

        let surface = window.create_surface(instance.entry(), instance.handle())?;
        let physical =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;

        let settings = TargetSettings {
            samples: if config.renderer.msaa {
                physical.max_usable_sample_count()
            } else {
                vk::SampleCountFlags::TYPE_1
            },
            depth_format: physical.find_depth_format(instance.handle())?,
            sample_shading: physical.features.sample_rate_shading == vk::TRUE,
        };
        info!(
            "Render targets: {:?} samples, depth {:?}",
            settings.samples, settings.depth_format
        );

        let device = Device::new(&instance, physical)?;

        let swapchain = Swapchain::new(
            device.clone(),
            surface.handle(),
            surface.loader().clone(),
            extent,
            SwapchainPreferences {
                prefer_mailbox: config.renderer.prefer_mailbox,
            },
        )?;

        let pool = CommandPool::new(device.clone())?;
        let slots = FrameSlot::create_many(&device, frames_in_flight)?;
        let shared = SharedResources::new(&device, &pool, &scene, settings)?;
        let resources = SwapchainResources::build(&device, &pool, &swapchain, &shared)?;
        let image_count = resources.image_count();

        let backend = VulkanBackend {
            resources: Some(resources),
            shared,
            slots,
            pool,
            swapchain,
            surface,
            device,
            instance,
            window: window.clone(),
            timer: Timer::new(),
        };

        info!(
            "Renderer initialized: {} swapchain images, {} frames in flight",
            image_count, frames_in_flight
        );

        Ok(Self {
            orchestrator: FrameOrchestrator::new(backend, frames_in_flight, image_count),
            window: window.clone(),
        })
    }

    /// Runs one frame. A pending window resize is picked up first.
    ///
    /// # Errors
    ///
    /// Any error is fatal to the frame loop; stale surfaces are handled
    /// internally.
    pub fn draw_frame(&mut self) -> RendererResult<FrameStatus> {
        if self.window.take_resized() {
            self.orchestrator.notify_resized();
        }
        self.orchestrator.draw_frame()
    }

    /// Rebuilds the swapchain now. Returns `false` if the window has no
    /// area and the rebuild was deferred.
    pub fn recreate_swapchain(&mut self) -> RendererResult<bool> {
        self.orchestrator.recreate_swapchain()
    }

    /// Requests a swapchain rebuild after the next present.
    pub fn notify_resized(&mut self) {
        self.orchestrator.notify_resized();
    }

    #[inline]
    pub fn current_slot(&self) -> usize {
        self.orchestrator.current_slot()
    }

    #[inline]
    pub fn recreations(&self) -> u64 {
        self.orchestrator.recreations()
    }

    #[inline]
    pub fn backend(&self) -> &VulkanBackend {
        self.orchestrator.backend()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.orchestrator.backend_mut().wait_idle() {
            error!("Failed to wait for device idle during renderer drop: {:?}", e);
        }
        info!("Renderer shutting down");
    }
}

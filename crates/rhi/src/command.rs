//! Command pool and command buffer recording.
//!
//! # Overview
//!
//! - [`CommandPool`] allocates [`CommandRecorder`]s for the graphics queue
//!   family and runs one-shot transfer submissions.
//! - [`CommandRecorder`] wraps a `VkCommandBuffer` and gates every command
//!   through [`RecordingState`], so call-order mistakes surface as
//!   [`RhiError::InvalidCommandState`] instead of undefined behavior in the
//!   driver.
//!
//! ```text
//! Idle --begin--> Recording --begin_render_pass--> RecordingInRenderPass
//!                     ^                                   |
//!                     +---------end_render_pass-----------+
//! Recording --end--> Ended --reset--> Idle
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use kiln_rhi::command::{ClearValues, CommandPool};
//! use kiln_rhi::device::Device;
//!
//! # fn example(
//! #     device: Arc<Device>,
//! #     render_pass: vk::RenderPass,
//! #     framebuffer: vk::Framebuffer,
//! #     pipeline: vk::Pipeline,
//! #     extent: vk::Extent2D,
//! # ) -> kiln_rhi::RhiResult<()> {
//! let pool = CommandPool::new(device)?;
//! let mut cmd = pool.allocate_recorders(1)?.remove(0);
//!
//! cmd.begin()?;
//! cmd.begin_render_pass(render_pass, framebuffer, extent, &ClearValues::default().to_vk(1, true))?;
//! cmd.bind_pipeline(pipeline)?;
//! cmd.draw(3, 1, 0, 0)?;
//! cmd.end_render_pass()?;
//! cmd.end()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Recording state of a command buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording,
    RecordingInRenderPass,
    Ended,
}

impl RecordingState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::RecordingInRenderPass => "recording in a render pass",
            Self::Ended => "ended",
        }
    }

    fn invalid(self, operation: &'static str) -> RhiError {
        RhiError::InvalidCommandState {
            operation,
            state: self.name(),
        }
    }

    /// `Idle -> Recording`.
    pub fn begin(self) -> RhiResult<Self> {
        match self {
            Self::Idle => Ok(Self::Recording),
            other => Err(other.invalid("begin")),
        }
    }

    /// `Recording -> RecordingInRenderPass`.
    pub fn begin_render_pass(self) -> RhiResult<Self> {
        match self {
            Self::Recording => Ok(Self::RecordingInRenderPass),
            other => Err(other.invalid("begin render pass")),
        }
    }

    /// `RecordingInRenderPass -> Recording`.
    pub fn end_render_pass(self) -> RhiResult<Self> {
        match self {
            Self::RecordingInRenderPass => Ok(Self::Recording),
            other => Err(other.invalid("end render pass")),
        }
    }

    /// `Recording -> Ended`. Fails while a render pass is open.
    pub fn end(self) -> RhiResult<Self> {
        match self {
            Self::Recording => Ok(Self::Ended),
            other => Err(other.invalid("end")),
        }
    }

    /// Draw and bind commands are only valid inside a render pass.
    pub fn require_render_pass(self, operation: &'static str) -> RhiResult<()> {
        match self {
            Self::RecordingInRenderPass => Ok(()),
            other => Err(other.invalid(operation)),
        }
    }

    /// Copies, blits and barriers are only valid outside a render pass.
    pub fn require_outside_render_pass(self, operation: &'static str) -> RhiResult<()> {
        match self {
            Self::Recording => Ok(()),
            other => Err(other.invalid(operation)),
        }
    }
}

/// Clear values for a render pass: color `(0, 0, 0, 1)`, depth `1.0`,
/// stencil `0` by default.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearValues {
    pub color: [f32; 4],
    pub depth: f32,
    pub stencil: u32,
}

impl Default for ClearValues {
    fn default() -> Self {
        Self {
            color: [0.0, 0.0, 0.0, 1.0],
            depth: 1.0,
            stencil: 0,
        }
    }
}

impl ClearValues {
    /// One clear value per color attachment, then one for depth.
    pub fn to_vk(&self, color_attachments: usize, has_depth: bool) -> Vec<vk::ClearValue> {
        let mut values = vec![
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.color,
                },
            };
            color_attachments
        ];

        if has_depth {
            values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: self.depth,
                    stencil: self.stencil,
                },
            });
        }

        values
    }
}

/// Command pool for the graphics queue family.
///
/// Created with `RESET_COMMAND_BUFFER` so recorders can be reset
/// individually.
///
/// # Thread Safety
///
/// Not thread-safe; use one pool per recording thread.
pub struct CommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
}

impl CommandPool {
    /// Creates a pool for the device's graphics queue family.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let family = device
            .queue_families()
            .graphics_family
            .ok_or(RhiError::NoSuitableGpu)?;

        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };

        info!("Command pool created for queue family {}", family);

        Ok(Self { device, pool })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Allocates `count` primary command buffers, each in the `Idle` state.
    ///
    /// The recorders free their buffers on drop and must not outlive the
    /// pool.
    pub fn allocate_recorders(&self, count: u32) -> RhiResult<Vec<CommandRecorder>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let buffers = unsafe { self.device.handle().allocate_command_buffers(&alloc_info)? };
        debug!("Allocated {} command buffer(s)", buffers.len());

        Ok(buffers
            .into_iter()
            .map(|buffer| CommandRecorder {
                device: self.device.clone(),
                pool: self.pool,
                buffer,
                state: RecordingState::Idle,
            })
            .collect())
    }

    /// Records a one-time command buffer with `record`, submits it to the
    /// graphics queue and blocks until the queue is idle. The buffer is
    /// freed whether or not recording succeeds.
    pub fn submit_one_shot(
        &self,
        record: impl FnOnce(&mut CommandRecorder) -> RhiResult<()>,
    ) -> RhiResult<()> {
        let mut recorder = self
            .allocate_recorders(1)?
            .pop()
            .ok_or_else(|| RhiError::InvalidDescription("no command buffer allocated".into()))?;

        recorder.begin_with(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        record(&mut recorder)?;
        recorder.end()?;

        let command_buffers = [recorder.handle()];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);

        unsafe {
            self.device
                .submit_graphics(std::slice::from_ref(&submit_info), vk::Fence::null())?;
        }
        self.device.wait_graphics_idle()
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
        info!("Command pool destroyed");
    }
}

/// Primary command buffer with a recording state machine.
pub struct CommandRecorder {
    device: Arc<Device>,
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
    state: RecordingState,
}

impl CommandRecorder {
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    #[inline]
    pub fn state(&self) -> RecordingState {
        self.state
    }

    // ===== Recording control =====

    /// Begins recording a buffer that may be submitted many times.
    pub fn begin(&mut self) -> RhiResult<()> {
        self.begin_with(vk::CommandBufferUsageFlags::empty())
    }

    /// Begins recording with explicit usage flags.
    pub fn begin_with(&mut self, flags: vk::CommandBufferUsageFlags) -> RhiResult<()> {
        let next = self.state.begin()?;
        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
        unsafe {
            self.device
                .handle()
                .begin_command_buffer(self.buffer, &begin_info)?;
        }
        self.state = next;
        Ok(())
    }

    /// Finishes recording.
    pub fn end(&mut self) -> RhiResult<()> {
        let next = self.state.end()?;
        unsafe {
            self.device.handle().end_command_buffer(self.buffer)?;
        }
        self.state = next;
        Ok(())
    }

    /// Returns the buffer to `Idle`. It must not be pending execution.
    pub fn reset(&mut self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?;
        }
        self.state = RecordingState::Idle;
        Ok(())
    }

    // ===== Render pass =====

    /// Begins `render_pass` on `framebuffer`, covering the full `extent`.
    pub fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) -> RhiResult<()> {
        let next = self.state.begin_render_pass()?;
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            })
            .clear_values(clear_values);

        unsafe {
            self.device.handle().cmd_begin_render_pass(
                self.buffer,
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }
        self.state = next;
        Ok(())
    }

    pub fn end_render_pass(&mut self) -> RhiResult<()> {
        let next = self.state.end_render_pass()?;
        unsafe {
            self.device.handle().cmd_end_render_pass(self.buffer);
        }
        self.state = next;
        Ok(())
    }

    // ===== Binding and drawing (inside a render pass) =====

    pub fn bind_pipeline(&mut self, pipeline: vk::Pipeline) -> RhiResult<()> {
        self.state.require_render_pass("bind pipeline")?;
        unsafe {
            self.device.handle().cmd_bind_pipeline(
                self.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline,
            );
        }
        Ok(())
    }

    pub fn bind_vertex_buffers(
        &mut self,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) -> RhiResult<()> {
        self.state.require_render_pass("bind vertex buffers")?;
        unsafe {
            self.device
                .handle()
                .cmd_bind_vertex_buffers(self.buffer, first_binding, buffers, offsets);
        }
        Ok(())
    }

    /// Binds a buffer of `u32` indices.
    pub fn bind_index_buffer(&mut self, buffer: vk::Buffer) -> RhiResult<()> {
        self.state.require_render_pass("bind index buffer")?;
        unsafe {
            self.device.handle().cmd_bind_index_buffer(
                self.buffer,
                buffer,
                0,
                vk::IndexType::UINT32,
            );
        }
        Ok(())
    }

    pub fn bind_descriptor_sets(
        &mut self,
        layout: vk::PipelineLayout,
        descriptor_sets: &[vk::DescriptorSet],
    ) -> RhiResult<()> {
        self.state.require_render_pass("bind descriptor sets")?;
        unsafe {
            self.device.handle().cmd_bind_descriptor_sets(
                self.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                descriptor_sets,
                &[],
            );
        }
        Ok(())
    }

    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> RhiResult<()> {
        self.state.require_render_pass("draw")?;
        unsafe {
            self.device.handle().cmd_draw(
                self.buffer,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
        Ok(())
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> RhiResult<()> {
        self.state.require_render_pass("draw indexed")?;
        unsafe {
            self.device.handle().cmd_draw_indexed(
                self.buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
        Ok(())
    }

    // ===== Transfer and synchronization (outside a render pass) =====

    /// Copies `size` bytes from the start of `src` to the start of `dst`.
    pub fn copy_buffer(
        &mut self,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) -> RhiResult<()> {
        self.state.require_outside_render_pass("copy buffer")?;
        let region = vk::BufferCopy::default().size(size);
        unsafe {
            self.device
                .handle()
                .cmd_copy_buffer(self.buffer, src, dst, std::slice::from_ref(&region));
        }
        Ok(())
    }

    /// Copies tightly packed pixels from `src` into mip level 0 of `dst`,
    /// which must be in `TRANSFER_DST_OPTIMAL`.
    pub fn copy_buffer_to_image(
        &mut self,
        src: vk::Buffer,
        dst: vk::Image,
        aspect: vk::ImageAspectFlags,
        extent: vk::Extent2D,
    ) -> RhiResult<()> {
        self.state.require_outside_render_pass("copy buffer to image")?;
        let region = vk::BufferImageCopy::default()
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(aspect)
                    .layer_count(1),
            )
            .image_extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            });

        unsafe {
            self.device.handle().cmd_copy_buffer_to_image(
                self.buffer,
                src,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            );
        }
        Ok(())
    }

    pub fn pipeline_barrier(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier],
    ) -> RhiResult<()> {
        self.state.require_outside_render_pass("record a pipeline barrier")?;
        unsafe {
            self.device.handle().cmd_pipeline_barrier(
                self.buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                image_barriers,
            );
        }
        Ok(())
    }

    /// Blits within one image from `TRANSFER_SRC_OPTIMAL` to
    /// `TRANSFER_DST_OPTIMAL` regions.
    pub fn blit_image(
        &mut self,
        image: vk::Image,
        region: &vk::ImageBlit,
        filter: vk::Filter,
    ) -> RhiResult<()> {
        self.state.require_outside_render_pass("blit image")?;
        unsafe {
            self.device.handle().cmd_blit_image(
                self.buffer,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(region),
                filter,
            );
        }
        Ok(())
    }
}

impl Drop for CommandRecorder {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .free_command_buffers(self.pool, &[self.buffer]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use RecordingState::*;

    #[test]
    fn test_full_recording_cycle() {
        let state = Idle.begin().unwrap();
        assert_eq!(state, Recording);
        let state = state.begin_render_pass().unwrap();
        assert_eq!(state, RecordingInRenderPass);
        state.require_render_pass("draw").unwrap();
        let state = state.end_render_pass().unwrap();
        assert_eq!(state, Recording);
        assert_eq!(state.end().unwrap(), Ended);
    }

    #[test]
    fn test_begin_requires_idle() {
        for state in [Recording, RecordingInRenderPass, Ended] {
            assert!(matches!(
                state.begin(),
                Err(RhiError::InvalidCommandState {
                    operation: "begin",
                    ..
                })
            ));
        }
    }

    #[test]
    fn test_end_render_pass_before_begin_render_pass_fails() {
        assert!(Recording.end_render_pass().is_err());
        assert!(Idle.end_render_pass().is_err());
    }

    #[test]
    fn test_begin_render_pass_twice_fails() {
        assert!(RecordingInRenderPass.begin_render_pass().is_err());
        assert!(Idle.begin_render_pass().is_err());
    }

    #[test]
    fn test_draw_and_bind_outside_render_pass_fail() {
        for state in [Idle, Recording, Ended] {
            let err = state.require_render_pass("draw indexed").unwrap_err();
            assert!(matches!(
                err,
                RhiError::InvalidCommandState {
                    operation: "draw indexed",
                    ..
                }
            ));
        }
    }

    #[test]
    fn test_end_while_render_pass_active_fails() {
        let err = RecordingInRenderPass.end().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot end while command buffer is recording in a render pass"
        );
        assert!(Idle.end().is_err());
        assert!(Ended.end().is_err());
    }

    #[test]
    fn test_transfers_rejected_inside_render_pass() {
        assert!(Recording.require_outside_render_pass("copy buffer").is_ok());
        assert!(
            RecordingInRenderPass
                .require_outside_render_pass("copy buffer")
                .is_err()
        );
        assert!(Idle.require_outside_render_pass("copy buffer").is_err());
    }

    #[test]
    fn test_clear_values_layout() {
        let values = ClearValues::default().to_vk(1, true);
        assert_eq!(values.len(), 2);
        unsafe {
            assert_eq!(values[0].color.float32, [0.0, 0.0, 0.0, 1.0]);
            assert_eq!(values[1].depth_stencil.depth, 1.0);
            assert_eq!(values[1].depth_stencil.stencil, 0);
        }
        assert_eq!(ClearValues::default().to_vk(2, false).len(), 2);
    }

    #[test]
    fn test_recorder_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CommandRecorder>();
        assert_send::<CommandPool>();
    }
}

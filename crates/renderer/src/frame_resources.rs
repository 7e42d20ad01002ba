//! Resources that survive swapchain recreation and the per-generation
//! arena of everything that does not.
//!
//! # Overview
//!
//! [`SharedResources`] holds what is created once at startup: shader
//! modules, the descriptor set layout, vertex and index buffers, and the
//! texture with its sampler.
//!
//! [`SwapchainResources`] holds everything whose shape depends on the
//! swapchain's format, extent or image count. It is built in one step for
//! a swapchain generation and dropped as a whole when the swapchain is
//! rebuilt, after the device has gone idle.
//!
//! ```text
//! render pass -> pipeline -> attachments + framebuffers
//!             -> uniform buffers -> descriptor sets -> command buffers
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use kiln_resources::{MeshData, TextureData};
use kiln_rhi::RhiResult;
use kiln_rhi::buffer::{BufferUsageClass, GpuBuffer};
use kiln_rhi::command::{ClearValues, CommandPool, CommandRecorder};
use kiln_rhi::descriptor::{
    DescriptorBinder, DescriptorKind, DescriptorResource, DescriptorSetLayout, DescriptorSets,
};
use kiln_rhi::device::Device;
use kiln_rhi::framebuffer::Framebuffer;
use kiln_rhi::image::{GpuImage, ImageDesc};
use kiln_rhi::pipeline::{
    DepthStencilState, GraphicsPipeline, GraphicsPipelineDesc, MultisampleState,
    RasterizationState, VertexInputState,
};
use kiln_rhi::render_pass::{
    ColorAttachment, DepthAttachment, RenderPass, RenderPassDesc, ResolveAttachment,
};
use kiln_rhi::shader::{Shader, ShaderStage};
use kiln_rhi::swapchain::Swapchain;
use kiln_rhi::texture::Texture;
use kiln_rhi::vertex::Vertex;

use crate::error::{RendererError, RendererResult};
use crate::ubo::UniformBufferObject;

/// Minimum fraction of samples shaded per fragment when sample shading is on.
pub const MIN_SAMPLE_SHADING: f32 = 0.2;

/// Decoded inputs for [`SharedResources::new`].
pub struct SceneAssets {
    pub mesh: MeshData,
    pub texture: TextureData,
    /// SPIR-V bytecode of the vertex stage.
    pub vertex_spirv: Vec<u8>,
    /// SPIR-V bytecode of the fragment stage.
    pub fragment_spirv: Vec<u8>,
}

/// Multisampling and depth settings shared by every generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSettings {
    pub samples: vk::SampleCountFlags,
    pub depth_format: vk::Format,
    pub sample_shading: bool,
}

/// Resources created once and reused across swapchain generations.
pub struct SharedResources {
    vertex_shader: Shader,
    fragment_shader: Shader,
    set_layout: DescriptorSetLayout,
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    index_count: u32,
    texture: Texture,
    settings: TargetSettings,
}

impl SharedResources {
    /// Validates and uploads the scene, creates the shader modules and the
    /// descriptor set layout.
    ///
    /// # Errors
    ///
    /// Returns an error if the mesh fails validation, the bytecode is not
    /// SPIR-V, or any upload fails.
    pub fn new(
        device: &Arc<Device>,
        pool: &CommandPool,
        assets: &SceneAssets,
        settings: TargetSettings,
    ) -> RendererResult<Self> {
        assets.mesh.validate()?;

        let vertex_shader =
            Shader::from_spirv(device.clone(), &assets.vertex_spirv, ShaderStage::Vertex)?;
        let fragment_shader =
            Shader::from_spirv(device.clone(), &assets.fragment_spirv, ShaderStage::Fragment)?;

        let set_layout = descriptor_binder()?.build_layout(device.clone())?;

        let vertex_buffer =
            GpuBuffer::upload_slice(device, pool, BufferUsageClass::Vertex, &assets.mesh.vertices)?;
        let index_buffer =
            GpuBuffer::upload_slice(device, pool, BufferUsageClass::Index, &assets.mesh.indices)?;

        let texture = Texture::upload(
            device,
            pool,
            &assets.texture.pixels,
            assets.texture.width,
            assets.texture.height,
        )?;

        info!(
            "Scene uploaded: {} vertices, {} indices, {}x{} texture",
            assets.mesh.vertices.len(),
            assets.mesh.indices.len(),
            assets.texture.width,
            assets.texture.height
        );

        Ok(Self {
            vertex_shader,
            fragment_shader,
            set_layout,
            vertex_buffer,
            index_buffer,
            index_count: assets.mesh.indices.len() as u32,
            texture,
            settings,
        })
    }

    #[inline]
    pub fn settings(&self) -> TargetSettings {
        self.settings
    }

    #[inline]
    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

/// Binding 0: per-image uniform buffer (vertex). Binding 1: texture
/// sampler (fragment).
pub fn descriptor_binder() -> RhiResult<DescriptorBinder> {
    let mut binder = DescriptorBinder::new();
    binder
        .add(0, DescriptorKind::UniformBuffer, vk::ShaderStageFlags::VERTEX)?
        .add(
            1,
            DescriptorKind::CombinedImageSampler,
            vk::ShaderStageFlags::FRAGMENT,
        )?;
    Ok(binder)
}

/// Render pass layout for a swapchain `format`.
///
/// Multisampled: a transient color target resolved into the swapchain
/// image. Single-sampled: the swapchain image is the color target.
pub fn render_pass_desc(
    format: vk::Format,
    depth_format: vk::Format,
    samples: vk::SampleCountFlags,
) -> RenderPassDesc {
    if samples == vk::SampleCountFlags::TYPE_1 {
        RenderPassDesc {
            colors: vec![ColorAttachment::presentable(format)],
            depth: Some(DepthAttachment::new(depth_format, samples)),
            resolve: None,
        }
    } else {
        RenderPassDesc {
            colors: vec![ColorAttachment::new(format, samples)],
            depth: Some(DepthAttachment::new(depth_format, samples)),
            resolve: Some(ResolveAttachment::new(format)),
        }
    }
}

/// Framebuffer views in render pass attachment order.
pub fn framebuffer_views(
    msaa_color: Option<vk::ImageView>,
    depth: vk::ImageView,
    swapchain_image: vk::ImageView,
) -> Vec<vk::ImageView> {
    match msaa_color {
        Some(color) => vec![color, depth, swapchain_image],
        None => vec![swapchain_image, depth],
    }
}

/// Everything that is rebuilt with the swapchain.
///
/// Every per-image vector has exactly one entry per swapchain image.
/// Fields drop in declaration order: command buffers first, render pass
/// last.
pub struct SwapchainResources {
    command_buffers: Vec<CommandRecorder>,
    descriptor_sets: DescriptorSets,
    uniform_buffers: Vec<GpuBuffer>,
    framebuffers: Vec<Framebuffer>,
    /// `None` when rendering single-sampled.
    color_attachment: Option<GpuImage>,
    depth_attachment: GpuImage,
    pipeline: GraphicsPipeline,
    render_pass: RenderPass,
    generation: u64,
    extent: vk::Extent2D,
}

impl SwapchainResources {
    /// Builds the dependent chain for the current swapchain generation and
    /// records one command buffer per image.
    ///
    /// # Errors
    ///
    /// Returns the first RHI failure; everything created so far is dropped.
    pub fn build(
        device: &Arc<Device>,
        pool: &CommandPool,
        swapchain: &Swapchain,
        shared: &SharedResources,
    ) -> RendererResult<Self> {
        let extent = swapchain.extent();
        let format = swapchain.format();
        let image_count = swapchain.image_count();
        let TargetSettings {
            samples,
            depth_format,
            sample_shading,
        } = shared.settings;

        let render_pass = RenderPass::new(
            device.clone(),
            &render_pass_desc(format, depth_format, samples),
        )?;

        let multisample = if sample_shading && samples != vk::SampleCountFlags::TYPE_1 {
            MultisampleState::new(samples).with_sample_shading(MIN_SAMPLE_SHADING)
        } else {
            MultisampleState::new(samples)
        };
        let pipeline = GraphicsPipeline::new(
            device.clone(),
            GraphicsPipelineDesc::new()
                .shaders(&shared.vertex_shader, &shared.fragment_shader)
                .vertex_input(VertexInputState::of::<Vertex>())
                .viewport_for(extent)
                .rasterization(RasterizationState::default())
                .multisample(multisample)
                .depth_stencil(DepthStencilState::default())
                .set_layout(shared.set_layout.handle())
                .render_pass(render_pass.handle(), 0),
        )?;

        let color_attachment = if samples == vk::SampleCountFlags::TYPE_1 {
            None
        } else {
            Some(GpuImage::create(
                device,
                ImageDesc::color_attachment(extent, format, samples),
            )?)
        };
        let depth_attachment = GpuImage::create(
            device,
            ImageDesc::depth_attachment(extent, depth_format, samples),
        )?;

        let color_view = color_attachment.as_ref().map(GpuImage::view).transpose()?;
        let depth_view = depth_attachment.view()?;
        let framebuffers = swapchain
            .image_views()
            .iter()
            .map(|&view| {
                Framebuffer::new(
                    device.clone(),
                    &render_pass,
                    &framebuffer_views(color_view, depth_view, view),
                    extent,
                )
            })
            .collect::<RhiResult<Vec<_>>>()?;

        let uniform_buffers = (0..image_count)
            .map(|_| {
                let mut buffer = GpuBuffer::new(BufferUsageClass::Uniform);
                buffer.allocate(device, UniformBufferObject::SIZE as vk::DeviceSize)?;
                Ok(buffer)
            })
            .collect::<RhiResult<Vec<_>>>()?;

        let descriptor_sets = shared.set_layout.allocate_sets(image_count as u32)?;
        let texture_view = shared.texture.view()?;
        let sampler = shared.texture.sampler().handle();
        for (index, buffer) in uniform_buffers.iter().enumerate() {
            descriptor_sets.update(
                index,
                &[
                    DescriptorResource::UniformBuffer {
                        buffer: buffer.handle()?,
                        range: UniformBufferObject::SIZE as vk::DeviceSize,
                    },
                    DescriptorResource::CombinedImageSampler {
                        view: texture_view,
                        sampler,
                    },
                ],
            )?;
        }

        let mut command_buffers = pool.allocate_recorders(image_count as u32)?;
        let clear_values = ClearValues::default().to_vk(1, true);
        let vertex_buffer = shared.vertex_buffer.handle()?;
        let index_buffer = shared.index_buffer.handle()?;
        for (index, recorder) in command_buffers.iter_mut().enumerate() {
            recorder.begin()?;
            recorder.begin_render_pass(
                render_pass.handle(),
                framebuffers[index].handle(),
                extent,
                &clear_values,
            )?;
            recorder.bind_pipeline(pipeline.handle())?;
            recorder.bind_vertex_buffers(0, &[vertex_buffer], &[0])?;
            recorder.bind_index_buffer(index_buffer)?;
            recorder.bind_descriptor_sets(pipeline.layout(), &[descriptor_sets.get(index)?])?;
            recorder.draw_indexed(shared.index_count, 1, 0, 0, 0)?;
            recorder.end_render_pass()?;
            recorder.end()?;
        }

        debug!(
            "Recorded {} command buffer(s) for {} indices",
            command_buffers.len(),
            shared.index_count
        );
        info!(
            "Swapchain resources built for generation {} ({}x{}, {} images, {:?})",
            swapchain.generation(),
            extent.width,
            extent.height,
            image_count,
            samples
        );

        let resources = Self {
            command_buffers,
            descriptor_sets,
            uniform_buffers,
            framebuffers,
            color_attachment,
            depth_attachment,
            pipeline,
            render_pass,
            generation: swapchain.generation(),
            extent,
        };
        check_per_image(image_count, resources.per_image_counts())?;
        Ok(resources)
    }

    /// Writes `ubo` into the uniform buffer of `image`.
    pub fn write_uniforms(&mut self, image: usize, ubo: &UniformBufferObject) -> RhiResult<()> {
        let buffer = self.uniform_buffers.get_mut(image).ok_or_else(|| {
            kiln_rhi::RhiError::InvalidDescription(format!("no uniform buffer for image {image}"))
        })?;
        buffer.write(ubo)
    }

    /// Pre-recorded command buffer of `image`.
    pub fn command_buffer(&self, image: usize) -> Option<vk::CommandBuffer> {
        self.command_buffers.get(image).map(CommandRecorder::handle)
    }

    /// Number of swapchain images the arena was built for.
    #[inline]
    pub fn image_count(&self) -> usize {
        self.command_buffers.len()
    }

    /// Lengths of the per-image vectors: command buffers, descriptor sets,
    /// uniform buffers, framebuffers.
    pub fn per_image_counts(&self) -> [usize; 4] {
        [
            self.command_buffers.len(),
            self.descriptor_sets.len(),
            self.uniform_buffers.len(),
            self.framebuffers.len(),
        ]
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn is_multisampled(&self) -> bool {
        self.color_attachment.is_some()
    }
}

/// Fails unless every per-image vector holds exactly `image_count` entries.
pub fn check_per_image(image_count: usize, counts: [usize; 4]) -> RendererResult<()> {
    if counts.iter().all(|&count| count == image_count) {
        Ok(())
    } else {
        Err(RendererError::PerImageMismatch {
            expected: image_count,
            counts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use kiln_rhi::render_pass::plan_attachments;

    const FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;
    const DEPTH: vk::Format = vk::Format::D32_SFLOAT;

    #[test]
    fn test_single_sample_presents_color_directly() {
        let desc = render_pass_desc(FORMAT, DEPTH, vk::SampleCountFlags::TYPE_1);
        assert!(desc.resolve.is_none());
        assert_eq!(
            desc.colors[0].final_layout,
            vk::ImageLayout::PRESENT_SRC_KHR
        );

        let plan = plan_attachments(&desc).unwrap();
        assert_eq!(plan.descriptions.len(), 2);
        assert!(plan.resolve_refs.is_empty());
    }

    #[test]
    fn test_multisample_resolves_into_swapchain() {
        let desc = render_pass_desc(FORMAT, DEPTH, vk::SampleCountFlags::TYPE_4);
        assert_eq!(desc.colors[0].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(
            desc.colors[0].final_layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(desc.resolve.map(|r| r.format), Some(FORMAT));

        let plan = plan_attachments(&desc).unwrap();
        assert_eq!(plan.descriptions.len(), 3);
        assert_eq!(plan.resolve_refs[0].attachment, 2);
    }

    #[test]
    fn test_framebuffer_views_follow_attachment_order() {
        let color = vk::ImageView::from_raw(1);
        let depth = vk::ImageView::from_raw(2);
        let swap = vk::ImageView::from_raw(3);

        assert_eq!(
            framebuffer_views(Some(color), depth, swap),
            vec![color, depth, swap]
        );
        assert_eq!(framebuffer_views(None, depth, swap), vec![swap, depth]);
    }

    #[test]
    fn test_descriptor_binder_layout() {
        let binder = descriptor_binder().unwrap();
        let bindings = binder.layout_bindings();
        assert_eq!(bindings.len(), 2);
        assert_eq!(
            bindings[0].descriptor_type,
            vk::DescriptorType::UNIFORM_BUFFER
        );
        assert_eq!(bindings[0].stage_flags, vk::ShaderStageFlags::VERTEX);
        assert_eq!(
            bindings[1].descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
        assert_eq!(bindings[1].stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_clear_values_cover_color_and_depth() {
        // Attachment 2 (resolve) is not cleared, so two values suffice for
        // both layouts.
        assert_eq!(ClearValues::default().to_vk(1, true).len(), 2);
    }

    #[test]
    fn test_per_image_counts_must_match_image_count() {
        assert!(check_per_image(3, [3; 4]).is_ok());
        // A rebuild that shrinks from three images to two.
        assert!(check_per_image(2, [2; 4]).is_ok());

        match check_per_image(2, [2, 2, 3, 2]) {
            Err(RendererError::PerImageMismatch { expected, counts }) => {
                assert_eq!(expected, 2);
                assert_eq!(counts, [2, 2, 3, 2]);
            }
            other => panic!("Expected PerImageMismatch, got {:?}", other),
        }
        assert!(check_per_image(0, [0; 4]).is_ok());
    }

    #[test]
    fn test_resources_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<SwapchainResources>();
        assert_send::<SharedResources>();
    }
}

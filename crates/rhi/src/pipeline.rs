//! Graphics pipelines.
//!
//! # Overview
//!
//! - [`GraphicsPipelineDesc`] collects every piece of fixed-function and
//!   shader state. Required state is `Option`-typed; [`validate`] reports
//!   the first piece that is missing.
//! - [`GraphicsPipeline::new`] consumes a description, validates it, and
//!   creates the pipeline layout and the pipeline. There is no way to
//!   change state on a created pipeline.
//!
//! The helper constructors carry the defaults: triangle lists, filled
//! polygons with back-face culling and counter-clockwise front faces,
//! `LESS` depth testing with writes, and one opaque color attachment.
//!
//! [`validate`]: GraphicsPipelineDesc::validate
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use kiln_rhi::device::Device;
//! use kiln_rhi::pipeline::{
//!     DepthStencilState, GraphicsPipeline, GraphicsPipelineDesc, MultisampleState,
//!     RasterizationState, VertexInputState,
//! };
//! use kiln_rhi::shader::Shader;
//! use kiln_rhi::vertex::Vertex;
//!
//! # fn example(
//! #     device: Arc<Device>,
//! #     vert: &Shader,
//! #     frag: &Shader,
//! #     set_layout: vk::DescriptorSetLayout,
//! #     render_pass: vk::RenderPass,
//! #     extent: vk::Extent2D,
//! # ) -> kiln_rhi::RhiResult<()> {
//! let desc = GraphicsPipelineDesc::new()
//!     .shaders(vert, frag)
//!     .vertex_input(VertexInputState::of::<Vertex>())
//!     .viewport_for(extent)
//!     .rasterization(RasterizationState::default())
//!     .multisample(MultisampleState::new(vk::SampleCountFlags::TYPE_4))
//!     .depth_stencil(DepthStencilState::default())
//!     .set_layout(set_layout)
//!     .render_pass(render_pass, 0);
//!
//! let pipeline = GraphicsPipeline::new(device, desc)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::shader::Shader;
use crate::vertex::VertexLayout;

/// Vertex buffer bindings and attributes.
#[derive(Clone, Debug, Default)]
pub struct VertexInputState {
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

impl VertexInputState {
    /// Single per-vertex binding of `V`.
    pub fn of<V: VertexLayout>() -> Self {
        Self {
            bindings: vec![V::binding_description()],
            attributes: V::attribute_descriptions(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RasterizationState {
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub line_width: f32,
}

impl Default for RasterizationState {
    fn default() -> Self {
        Self {
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            line_width: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MultisampleState {
    pub samples: vk::SampleCountFlags,
    /// Minimum fraction of samples shaded individually. `None` disables
    /// sample shading.
    pub min_sample_shading: Option<f32>,
}

impl MultisampleState {
    pub fn new(samples: vk::SampleCountFlags) -> Self {
        Self {
            samples,
            min_sample_shading: None,
        }
    }

    pub fn with_sample_shading(mut self, min_sample_shading: f32) -> Self {
        self.min_sample_shading = Some(min_sample_shading);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthStencilState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub compare_op: vk::CompareOp,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            compare_op: vk::CompareOp::LESS,
        }
    }
}

/// Blend state of one color attachment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorBlendAttachment {
    pub blend_enable: bool,
    pub src_color: vk::BlendFactor,
    pub dst_color: vk::BlendFactor,
    pub src_alpha: vk::BlendFactor,
    pub dst_alpha: vk::BlendFactor,
    pub write_mask: vk::ColorComponentFlags,
}

impl Default for ColorBlendAttachment {
    fn default() -> Self {
        Self::opaque()
    }
}

impl ColorBlendAttachment {
    /// Blending disabled, all channels written.
    pub fn opaque() -> Self {
        Self {
            blend_enable: false,
            src_color: vk::BlendFactor::ONE,
            dst_color: vk::BlendFactor::ZERO,
            src_alpha: vk::BlendFactor::ONE,
            dst_alpha: vk::BlendFactor::ZERO,
            write_mask: vk::ColorComponentFlags::RGBA,
        }
    }

    fn to_vk(self) -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(self.blend_enable)
            .src_color_blend_factor(self.src_color)
            .dst_color_blend_factor(self.dst_color)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(self.src_alpha)
            .dst_alpha_blend_factor(self.dst_alpha)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(self.write_mask)
    }
}

/// Viewport covering `extent` with depth range `0..1`.
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Scissor covering `extent`.
pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D::default(),
        extent,
    }
}

/// Complete description of a graphics pipeline.
#[derive(Clone)]
pub struct GraphicsPipelineDesc<'a> {
    pub vertex_shader: Option<&'a Shader>,
    pub fragment_shader: Option<&'a Shader>,
    pub vertex_input: Option<VertexInputState>,
    pub topology: vk::PrimitiveTopology,
    pub viewport: Option<vk::Viewport>,
    pub scissor: Option<vk::Rect2D>,
    pub rasterization: Option<RasterizationState>,
    pub multisample: Option<MultisampleState>,
    pub depth_stencil: Option<DepthStencilState>,
    /// One entry per color attachment of the subpass.
    pub color_blend: Vec<ColorBlendAttachment>,
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    pub render_pass: Option<vk::RenderPass>,
    pub subpass: u32,
}

impl Default for GraphicsPipelineDesc<'_> {
    fn default() -> Self {
        Self {
            vertex_shader: None,
            fragment_shader: None,
            vertex_input: None,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            viewport: None,
            scissor: None,
            rasterization: None,
            multisample: None,
            depth_stencil: None,
            color_blend: vec![ColorBlendAttachment::opaque()],
            set_layouts: Vec::new(),
            render_pass: None,
            subpass: 0,
        }
    }
}

impl<'a> GraphicsPipelineDesc<'a> {
    /// Empty description with triangle-list topology and one opaque color
    /// attachment.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shaders(mut self, vertex: &'a Shader, fragment: &'a Shader) -> Self {
        self.vertex_shader = Some(vertex);
        self.fragment_shader = Some(fragment);
        self
    }

    pub fn vertex_input(mut self, state: VertexInputState) -> Self {
        self.vertex_input = Some(state);
        self
    }

    pub fn topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    /// Sets viewport and scissor to cover `extent`.
    pub fn viewport_for(mut self, extent: vk::Extent2D) -> Self {
        self.viewport = Some(full_viewport(extent));
        self.scissor = Some(full_scissor(extent));
        self
    }

    pub fn rasterization(mut self, state: RasterizationState) -> Self {
        self.rasterization = Some(state);
        self
    }

    pub fn multisample(mut self, state: MultisampleState) -> Self {
        self.multisample = Some(state);
        self
    }

    pub fn depth_stencil(mut self, state: DepthStencilState) -> Self {
        self.depth_stencil = Some(state);
        self
    }

    pub fn color_blend(mut self, attachments: Vec<ColorBlendAttachment>) -> Self {
        self.color_blend = attachments;
        self
    }

    pub fn set_layout(mut self, layout: vk::DescriptorSetLayout) -> Self {
        self.set_layouts.push(layout);
        self
    }

    pub fn render_pass(mut self, render_pass: vk::RenderPass, subpass: u32) -> Self {
        self.render_pass = Some(render_pass);
        self.subpass = subpass;
        self
    }

    /// Which pieces of required state are present.
    pub fn required_state(&self) -> RequiredState {
        RequiredState {
            shaders: self.vertex_shader.is_some() && self.fragment_shader.is_some(),
            vertex_input: self.vertex_input.is_some(),
            viewport_and_scissor: self.viewport.is_some() && self.scissor.is_some(),
            rasterization: self.rasterization.is_some(),
            multisample: self.multisample.is_some(),
            depth_stencil: self.depth_stencil.is_some(),
            set_layouts: !self.set_layouts.is_empty(),
            render_pass: self.render_pass.is_some(),
        }
    }

    /// Reports the first missing piece of required state.
    ///
    /// # Errors
    ///
    /// [`RhiError::PipelineError`] naming what is missing.
    pub fn validate(&self) -> RhiResult<()> {
        match self.required_state().first_missing() {
            Some(message) => Err(RhiError::PipelineError(message.to_string())),
            None => Ok(()),
        }
    }
}

/// Presence of each piece of state a pipeline cannot be built without.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RequiredState {
    pub shaders: bool,
    pub vertex_input: bool,
    pub viewport_and_scissor: bool,
    pub rasterization: bool,
    pub multisample: bool,
    pub depth_stencil: bool,
    pub set_layouts: bool,
    pub render_pass: bool,
}

impl RequiredState {
    /// Message for the first missing piece, in declaration order.
    pub fn first_missing(&self) -> Option<&'static str> {
        [
            (self.shaders, "Vertex and fragment shaders must be set."),
            (self.vertex_input, "Vertex input state not set."),
            (self.viewport_and_scissor, "Viewport and scissor must be set."),
            (self.rasterization, "Rasterization state must be set."),
            (self.multisample, "Multisample state must be set."),
            (self.depth_stencil, "Depth stencil state must be set."),
            (self.set_layouts, "Descriptor set layout bindings must be set."),
            (self.render_pass, "Render pass must be set."),
        ]
        .into_iter()
        .find_map(|(present, message)| (!present).then_some(message))
    }
}

/// Graphics pipeline and its layout.
pub struct GraphicsPipeline {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    /// Validates `desc` and creates the pipeline layout and pipeline.
    ///
    /// # Errors
    ///
    /// [`RhiError::PipelineError`] from validation, or native failure.
    pub fn new(device: Arc<Device>, desc: GraphicsPipelineDesc<'_>) -> RhiResult<Self> {
        desc.validate()?;

        let (
            Some(vertex_shader),
            Some(fragment_shader),
            Some(vertex_input),
            Some(viewport),
            Some(scissor),
            Some(rasterization),
            Some(multisample),
            Some(depth_stencil),
            Some(render_pass),
        ) = (
            desc.vertex_shader,
            desc.fragment_shader,
            desc.vertex_input.as_ref(),
            desc.viewport,
            desc.scissor,
            desc.rasterization,
            desc.multisample,
            desc.depth_stencil,
            desc.render_pass,
        )
        else {
            return Err(RhiError::PipelineError(
                "Pipeline description is incomplete.".to_string(),
            ));
        };

        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&desc.set_layouts);
        let layout = unsafe { device.handle().create_pipeline_layout(&layout_info, None)? };
        debug!(
            "Created pipeline layout with {} descriptor set layout(s)",
            desc.set_layouts.len()
        );

        // From here on, dropping `pipeline` destroys the layout.
        let mut pipeline = Self {
            device,
            pipeline: vk::Pipeline::null(),
            layout,
        };

        let stages = [
            vertex_shader.stage_create_info(),
            fragment_shader.stage_create_info(),
        ];

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_input.bindings)
            .vertex_attribute_descriptions(&vertex_input.attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(desc.topology)
            .primitive_restart_enable(false);

        let viewports = [viewport];
        let scissors = [scissor];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(rasterization.polygon_mode)
            .line_width(rasterization.line_width)
            .cull_mode(rasterization.cull_mode)
            .front_face(rasterization.front_face)
            .depth_bias_enable(false);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(multisample.samples)
            .sample_shading_enable(multisample.min_sample_shading.is_some())
            .min_sample_shading(multisample.min_sample_shading.unwrap_or(1.0));

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(depth_stencil.depth_test)
            .depth_write_enable(depth_stencil.depth_write)
            .depth_compare_op(depth_stencil.compare_op)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> =
            desc.color_blend.iter().map(|attachment| attachment.to_vk()).collect();
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(desc.subpass);

        let pipelines = unsafe {
            pipeline
                .device
                .handle()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, result)| result)?
        };
        pipeline.pipeline = pipelines.into_iter().next().ok_or_else(|| {
            RhiError::PipelineError("Driver returned no pipeline.".to_string())
        })?;

        info!(
            "Graphics pipeline created ({:?}, {:?})",
            desc.topology, multisample.samples
        );

        Ok(pipeline)
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                self.device.handle().destroy_pipeline(self.pipeline, None);
            }
            self.device
                .handle()
                .destroy_pipeline_layout(self.layout, None);
        }
        info!("Graphics pipeline destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vertex::Vertex;

    fn extent() -> vk::Extent2D {
        vk::Extent2D {
            width: 800,
            height: 600,
        }
    }

    #[test]
    fn test_defaults() {
        let desc = GraphicsPipelineDesc::new();
        assert_eq!(desc.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(desc.subpass, 0);
        assert_eq!(desc.color_blend, vec![ColorBlendAttachment::opaque()]);

        let raster = RasterizationState::default();
        assert_eq!(raster.polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(raster.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(raster.front_face, vk::FrontFace::COUNTER_CLOCKWISE);

        let depth = DepthStencilState::default();
        assert!(depth.depth_test && depth.depth_write);
        assert_eq!(depth.compare_op, vk::CompareOp::LESS);

        let blend = ColorBlendAttachment::opaque();
        assert!(!blend.blend_enable);
        assert_eq!(blend.write_mask, vk::ColorComponentFlags::RGBA);
    }

    #[test]
    fn test_empty_description_reports_shaders_first() {
        let err = GraphicsPipelineDesc::new().validate().unwrap_err();
        assert!(matches!(
            err,
            RhiError::PipelineError(ref message) if message == "Vertex and fragment shaders must be set."
        ));
    }

    #[test]
    fn test_missing_state_reported_in_order() {
        let mut state = RequiredState::default();
        let steps: [(&str, fn(&mut RequiredState)); 8] = [
            ("Vertex and fragment shaders must be set.", |s| s.shaders = true),
            ("Vertex input state not set.", |s| s.vertex_input = true),
            ("Viewport and scissor must be set.", |s| s.viewport_and_scissor = true),
            ("Rasterization state must be set.", |s| s.rasterization = true),
            ("Multisample state must be set.", |s| s.multisample = true),
            ("Depth stencil state must be set.", |s| s.depth_stencil = true),
            ("Descriptor set layout bindings must be set.", |s| s.set_layouts = true),
            ("Render pass must be set.", |s| s.render_pass = true),
        ];

        for (expected, fill) in steps {
            assert_eq!(state.first_missing(), Some(expected));
            fill(&mut state);
        }
        assert_eq!(state.first_missing(), None);
    }

    #[test]
    fn test_required_state_tracks_description() {
        let desc = GraphicsPipelineDesc::new()
            .vertex_input(VertexInputState::of::<Vertex>())
            .viewport_for(extent())
            .rasterization(RasterizationState::default())
            .multisample(MultisampleState::new(vk::SampleCountFlags::TYPE_4).with_sample_shading(0.2))
            .depth_stencil(DepthStencilState::default())
            .set_layout(vk::DescriptorSetLayout::null())
            .render_pass(vk::RenderPass::null(), 0);

        let state = desc.required_state();
        assert!(!state.shaders);
        assert!(state.vertex_input && state.viewport_and_scissor && state.render_pass);
        assert_eq!(desc.viewport.unwrap().width, 800.0);
        assert_eq!(desc.scissor.unwrap().extent, extent());
        assert_eq!(desc.vertex_input.as_ref().unwrap().attributes.len(), 3);
    }

    #[test]
    fn test_only_viewport_without_scissor_is_incomplete() {
        let mut desc = GraphicsPipelineDesc::new().viewport_for(extent());
        desc.scissor = None;
        assert!(!desc.required_state().viewport_and_scissor);
    }
}

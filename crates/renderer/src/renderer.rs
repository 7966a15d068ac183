//! Main renderer orchestration.
//!
//! [`Renderer`] is the surface scene and UI code talk to. It owns the
//! [`FrameSync`] over a [`VulkanBackend`] and adds the resource helpers used
//! by mesh, material and overlay code: images, views, samplers, pipelines,
//! descriptor sets, uploads and per-slot camera uniforms.
//!
//! # Example
//!
//! ```no_run
//! use vkframe_core::RendererConfig;
//! use vkframe_platform::Window;
//! use vkframe_renderer::{BeginFrame, ClearValues, PassId, Renderer, DEFAULT_CLEAR_COLOR};
//!
//! # fn example(window: &Window) -> vkframe_renderer::RendererResult<()> {
//! let mut renderer = Renderer::new(window, RendererConfig::default())?;
//!
//! if let BeginFrame::Ready(_) = renderer.begin_frame()? {
//!     for pass in renderer.passes() {
//!         renderer.begin_pass(pass, &ClearValues::for_pass(pass, DEFAULT_CLEAR_COLOR))?;
//!         // renderer.draw(&draw_call);
//!         renderer.end_pass();
//!     }
//!     renderer.end_frame()?;
//! }
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info};

use vkframe_core::RendererConfig;
use vkframe_platform::Window;
use vkframe_rhi::allocator::ResourceAllocator;
use vkframe_rhi::buffer::{Buffer, BufferUsage};
use vkframe_rhi::command::CommandBuffer;
use vkframe_rhi::descriptor::{
    DescriptorBindingBuilder, DescriptorPool, DescriptorSet, DescriptorSetLayout, buffer_info,
};
use vkframe_rhi::device::Device;
use vkframe_rhi::image::{Image, ImageDesc, ImageView, Sampler};
use vkframe_rhi::pipeline::{
    BlendMode, CullMode, GraphicsPipelineBuilder, Pipeline, PipelineLayout, VertexLayout,
};
use vkframe_rhi::shader::{Shader, ShaderStage};
use vkframe_rhi::vk;

use crate::backend::FrameBackend;
use crate::draw::{CameraUniform, DrawCall, ScenePushConstants};
use crate::error::RendererResult;
use crate::frame_sync::{BeginFrame, EndFrame, FrameSync};
use crate::passes::{ClearValues, PassId};
use crate::vulkan_backend::VulkanBackend;

/// Capacity of the pool behind [`Renderer::create_descriptor_set`].
const MAX_DESCRIPTOR_SETS: u32 = 256;

/// Graphics pipeline request against one of the renderer's passes.
pub struct PipelineDesc<'a> {
    pub pass: PassId,
    pub layout: &'a PipelineLayout,
    pub vertex_shader: &'a Shader,
    pub fragment_shader: &'a Shader,
    pub vertex_layout: &'a VertexLayout,
    pub cull_mode: CullMode,
    /// `Alpha` for overlays drawn over the post-processed image.
    pub blend: BlendMode,
}

/// Frame loop plus resource construction helpers.
pub struct Renderer {
    config: RendererConfig,

    // Dropped in declaration order, the backend last.
    camera_sets: Vec<DescriptorSet>,
    camera_buffers: Vec<Buffer>,
    descriptor_pool: DescriptorPool,
    camera_layout: DescriptorSetLayout,
    sync: FrameSync<VulkanBackend>,
}

impl Renderer {
    /// Creates the Vulkan context, swapchain, render targets and frame slots
    /// for `window`.
    pub fn new(window: &Window, config: RendererConfig) -> RendererResult<Self> {
        config.validate()?;

        let backend = VulkanBackend::new(window, &config)?;
        let device = backend.device().clone();
        let sync = FrameSync::new(backend);

        let camera_layout = DescriptorSetLayout::new(
            device.clone(),
            &[DescriptorBindingBuilder::uniform_buffer(
                0,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            )],
        )?;

        let slot_count = sync.backend().slot_count();
        let pool_sizes = [
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(MAX_DESCRIPTOR_SETS),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(MAX_DESCRIPTOR_SETS),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(MAX_DESCRIPTOR_SETS),
        ];
        let descriptor_pool = DescriptorPool::new(
            device.clone(),
            MAX_DESCRIPTOR_SETS + slot_count as u32,
            &pool_sizes,
        )?;

        let mut camera_buffers = Vec::with_capacity(slot_count);
        let mut camera_sets = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            let buffer = Buffer::with_usage(
                device.clone(),
                BufferUsage::Uniform,
                CameraUniform::SIZE as vk::DeviceSize,
            )?;
            buffer.write_data(0, bytemuck::bytes_of(&CameraUniform::default()))?;

            let set = descriptor_pool.allocate(&camera_layout)?;
            set.write_buffer(
                &device,
                0,
                buffer_info(buffer.handle(), 0, CameraUniform::SIZE as vk::DeviceSize),
            );

            camera_buffers.push(buffer);
            camera_sets.push(set);
        }

        let renderer = Self {
            config,
            camera_sets,
            camera_buffers,
            descriptor_pool,
            camera_layout,
            sync,
        };
        info!(
            "Renderer initialized: {} frame slot(s), passes {:?}",
            slot_count,
            renderer.passes()
        );
        Ok(renderer)
    }

    // =========================================================================
    // Frame lifecycle
    // =========================================================================

    /// See [`FrameSync::begin_frame`].
    pub fn begin_frame(&mut self) -> RendererResult<BeginFrame> {
        self.sync.begin_frame()
    }

    /// See [`FrameSync::end_frame`]. A resize flagged on the window forces
    /// recreation after present.
    pub fn end_frame(&mut self) -> RendererResult<EndFrame> {
        self.sync.end_frame()
    }

    /// See [`FrameSync::begin_pass`].
    pub fn begin_pass(&mut self, pass: PassId, clear: &ClearValues) -> RendererResult<()> {
        self.sync.begin_pass(pass, clear)
    }

    /// See [`FrameSync::end_pass`].
    pub fn end_pass(&mut self) {
        self.sync.end_pass();
    }

    /// Command buffer of the open frame.
    ///
    /// # Panics
    ///
    /// Panics outside a frame.
    pub fn current_command_buffer(&self) -> &CommandBuffer {
        self.sync.current_command_buffer()
    }

    /// Records `call` into the open pass.
    ///
    /// # Panics
    ///
    /// Panics unless `call.pass` is the open pass.
    pub fn draw(&self, call: &DrawCall<'_>) {
        self.sync.require_open_pass(call.pass);
        call.record(self.sync.current_command_buffer());
    }

    /// Passes this renderer records, in order.
    pub fn passes(&self) -> Vec<PassId> {
        self.sync
            .backend()
            .targets()
            .layout()
            .passes()
            .iter()
            .map(|layout| layout.pass)
            .collect()
    }

    /// Flags the swapchain for recreation after the next present.
    pub fn notify_resized(&mut self) {
        self.sync.notify_resized();
    }

    /// Rebuilds the swapchain now. Must not be called inside a frame.
    pub fn recreate_swapchain(&mut self) -> RendererResult<()> {
        self.sync.recreate_swapchain()
    }

    pub fn wait_idle(&mut self) -> RendererResult<()> {
        self.sync.wait_idle()
    }

    // =========================================================================
    // Per-slot camera uniforms
    // =========================================================================

    /// Writes the camera uniform of the open frame's slot.
    ///
    /// # Panics
    ///
    /// Panics outside a frame, since only then is the slot's previous use
    /// known to be complete.
    pub fn update_camera(&self, camera: &CameraUniform) -> RendererResult<()> {
        let Some(frame) = self.sync.current_frame() else {
            panic!("update_camera called outside begin_frame/end_frame");
        };
        self.camera_buffers[frame.slot].write_data(0, bytemuck::bytes_of(camera))?;
        Ok(())
    }

    /// Camera descriptor set of the open frame's slot.
    ///
    /// # Panics
    ///
    /// Panics outside a frame.
    pub fn camera_descriptor_set(&self) -> &DescriptorSet {
        let Some(frame) = self.sync.current_frame() else {
            panic!("camera descriptor set requested outside begin_frame/end_frame");
        };
        &self.camera_sets[frame.slot]
    }

    #[inline]
    pub fn camera_set_layout(&self) -> &DescriptorSetLayout {
        &self.camera_layout
    }

    // =========================================================================
    // Resource construction
    // =========================================================================

    pub fn create_image(&self, desc: &ImageDesc) -> RendererResult<Image> {
        Ok(self.allocator().create_image(desc)?)
    }

    /// Creates an additional view of `image`.
    pub fn create_image_view(
        &self,
        image: &Image,
        aspect: vk::ImageAspectFlags,
    ) -> RendererResult<ImageView> {
        Ok(ImageView::new(
            self.device().clone(),
            image.handle(),
            image.format(),
            aspect,
        )?)
    }

    pub fn create_sampler(&self) -> RendererResult<Sampler> {
        Ok(self.allocator().create_sampler()?)
    }

    /// Uploads RGBA8 pixels into a sampled texture, blocking until done.
    ///
    /// Staging buffers of uploads still recorded into a caller's command
    /// buffer are left queued.
    pub fn create_texture(&mut self, pixels: &[u8], extent: vk::Extent2D) -> RendererResult<Image> {
        let allocator = self.allocator_mut();
        let image = allocator.create_texture_image(pixels, extent)?;
        allocator.release_completed_staging();
        Ok(image)
    }

    /// Uploads `data` into a new device-local buffer, blocking until done.
    pub fn upload_buffer(
        &mut self,
        data: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> RendererResult<Buffer> {
        let allocator = self.allocator_mut();
        let cmd = allocator.begin_single_time_commands()?;
        let buffer = allocator.create_device_local_buffer(&cmd, data, usage)?;
        allocator.end_single_time_commands(cmd)?;
        let released = allocator.release_completed_staging();
        debug!(
            "Uploaded {} byte(s), released {} staging buffer(s)",
            data.len(),
            released
        );
        Ok(buffer)
    }

    pub fn load_shader(&self, path: &Path, stage: ShaderStage) -> RendererResult<Shader> {
        Ok(Shader::from_spirv_file(self.device().clone(), path, stage)?)
    }

    pub fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'static>],
    ) -> RendererResult<DescriptorSetLayout> {
        Ok(DescriptorSetLayout::new(self.device().clone(), bindings)?)
    }

    /// Allocates a set of `layout` from the renderer's shared pool.
    pub fn create_descriptor_set(&self, layout: &DescriptorSetLayout) -> RendererResult<DescriptorSet> {
        Ok(self.descriptor_pool.allocate(layout)?)
    }

    /// Pipeline layout with `set_layouts` and the [`ScenePushConstants`] range.
    pub fn create_pipeline_layout(
        &self,
        set_layouts: &[&DescriptorSetLayout],
    ) -> RendererResult<PipelineLayout> {
        let handles: Vec<_> = set_layouts.iter().map(|layout| layout.handle()).collect();
        Ok(PipelineLayout::new(
            self.device().clone(),
            &handles,
            &[ScenePushConstants::range()],
        )?)
    }

    /// Builds a pipeline for `desc.pass`.
    ///
    /// Sample count and depth testing follow the pass. Viewport and scissor
    /// are dynamic, so the pipeline survives swapchain recreation.
    ///
    /// # Panics
    ///
    /// Panics if the renderer was built without `desc.pass`.
    pub fn create_pipeline(&self, desc: &PipelineDesc<'_>) -> RendererResult<Pipeline> {
        let Some(render_pass) = self.sync.backend().targets().render_pass(desc.pass) else {
            panic!(
                "pipeline requested for the {} pass, which this renderer was built without",
                desc.pass
            );
        };
        let has_depth = render_pass.desc().depth.is_some();

        let pipeline = GraphicsPipelineBuilder::new()
            .vertex_shader(desc.vertex_shader)
            .fragment_shader(desc.fragment_shader)
            .vertex_layout(desc.vertex_layout)
            .cull_mode(desc.cull_mode)
            .blend(desc.blend)
            .depth_test(has_depth, has_depth)
            .render_pass(render_pass)
            .build(self.device().clone(), desc.layout)?;

        info!("Pipeline created for the {} pass", desc.pass);
        Ok(pipeline)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Resolved offscreen color target, sampled in `GENERAL` layout.
    ///
    /// Rewritten in place when the swapchain is recreated.
    pub fn offscreen_color_descriptor(&self) -> &DescriptorSet {
        self.sync.backend().descriptors().offscreen()
    }

    /// Post pass output, or the offscreen target when the post pass is off.
    pub fn post_color_descriptor(&self) -> &DescriptorSet {
        self.sync.backend().descriptors().post()
    }

    /// Layout of the two target descriptor sets.
    pub fn target_set_layout(&self) -> &DescriptorSetLayout {
        self.sync.backend().descriptors().layout()
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        self.sync.backend().device()
    }

    #[inline]
    pub fn allocator(&self) -> &ResourceAllocator {
        self.sync.backend().allocator()
    }

    #[inline]
    pub fn allocator_mut(&mut self) -> &mut ResourceAllocator {
        self.sync.backend_mut().allocator_mut()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.sync.backend().swapchain().extent()
    }

    pub fn swapchain_format(&self) -> vk::Format {
        self.sync.backend().swapchain().format()
    }

    #[inline]
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    #[inline]
    pub fn frame_sync(&self) -> &FrameSync<VulkanBackend> {
        &self.sync
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.sync.wait_idle() {
            error!(
                "Failed to wait for device idle during renderer drop: {:?}",
                e
            );
        }
        info!("Renderer destroyed");
    }
}

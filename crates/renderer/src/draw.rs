//! Shader payloads and draw call recording.
//!
//! All payload structures use `#[repr(C)]` with explicit padding and
//! implement `Pod` so they can be pushed or written as raw bytes.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use vkframe_rhi::buffer::Buffer;
use vkframe_rhi::command::CommandBuffer;
use vkframe_rhi::pipeline::{Pipeline, PipelineLayout};
use vkframe_rhi::vk;

use crate::passes::PassId;

/// Per-draw push constants, visible to the vertex and fragment stages.
///
/// # Memory Layout
///
/// - Offset 0: model transform (64 bytes)
/// - Offset 64: light position (12 bytes) + padding (4 bytes)
/// - Offset 80: light color (12 bytes) + padding (4 bytes)
/// - Total size: 96 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct ScenePushConstants {
    pub transform: Mat4,
    pub light_position: Vec3,
    pub _padding0: f32,
    pub light_color: Vec3,
    pub _padding1: f32,
}

impl ScenePushConstants {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Stages the push constant range is declared for.
    pub const STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
        vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw(),
    );

    pub fn new(transform: Mat4, light_position: Vec3, light_color: Vec3) -> Self {
        Self {
            transform,
            light_position,
            _padding0: 0.0,
            light_color,
            _padding1: 0.0,
        }
    }

    /// Range to declare in the pipeline layout.
    pub fn range() -> vk::PushConstantRange {
        vk::PushConstantRange {
            stage_flags: Self::STAGES,
            offset: 0,
            size: Self::SIZE as u32,
        }
    }
}

/// Camera uniform buffer data, one buffer per frame slot.
///
/// # Memory Layout
///
/// - Offset 0: view matrix (64 bytes)
/// - Offset 64: projection matrix (64 bytes)
/// - Offset 128: view-projection matrix (64 bytes)
/// - Offset 192: camera position (12 bytes) + padding (4 bytes)
/// - Total size: 208 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CameraUniform {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub camera_position: Vec3,
    pub _padding: f32,
}

impl CameraUniform {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(view: Mat4, projection: Mat4, camera_position: Vec3) -> Self {
        Self {
            view,
            projection,
            view_projection: projection * view,
            camera_position,
            _padding: 0.0,
        }
    }
}

/// Everything needed to draw one indexed mesh into the open pass.
///
/// The pipeline must have been built for `pass` and its descriptor sets must
/// already be written.
pub struct DrawCall<'a> {
    pub pass: PassId,
    pub pipeline: &'a Pipeline,
    pub layout: &'a PipelineLayout,
    pub descriptor_sets: &'a [vk::DescriptorSet],
    pub vertex_buffer: &'a Buffer,
    pub index_buffer: &'a Buffer,
    pub index_count: u32,
    pub push_constants: ScenePushConstants,
}

impl DrawCall<'_> {
    /// Binds state and records an indexed draw with 32-bit indices.
    pub fn record(&self, cmd: &CommandBuffer) {
        cmd.bind_graphics_pipeline(self.pipeline.handle());
        cmd.bind_graphics_descriptor_sets(self.layout.handle(), 0, self.descriptor_sets);
        cmd.bind_mesh(
            self.vertex_buffer.handle(),
            self.index_buffer.handle(),
            vk::IndexType::UINT32,
        );
        cmd.push_constants(
            self.layout.handle(),
            ScenePushConstants::STAGES,
            &self.push_constants,
        );
        cmd.draw_indexed(self.index_count);
    }
}

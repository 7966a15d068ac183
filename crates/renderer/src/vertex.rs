//! Mesh vertex format.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

use vkframe_rhi::pipeline::VertexLayout;
use vkframe_rhi::vk;

/// Interleaved vertex with position, normal, color and texture coordinate.
///
/// # Memory Layout
///
/// - Offset 0: position (12 bytes)
/// - Offset 12: normal (12 bytes)
/// - Offset 24: color (12 bytes)
/// - Offset 36: texture coordinate (8 bytes)
/// - Total size: 44 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub color: Vec3,
    pub tex_coord: Vec2,
}

impl MeshVertex {
    #[inline]
    pub const fn new(position: Vec3, normal: Vec3, color: Vec3, tex_coord: Vec2) -> Self {
        Self {
            position,
            normal,
            color,
            tex_coord,
        }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 4] {
        let attribute = |location, format, offset| vk::VertexInputAttributeDescription {
            binding: 0,
            location,
            format,
            offset,
        };

        [
            attribute(0, vk::Format::R32G32B32_SFLOAT, 0),
            attribute(1, vk::Format::R32G32B32_SFLOAT, 12),
            attribute(2, vk::Format::R32G32B32_SFLOAT, 24),
            attribute(3, vk::Format::R32G32_SFLOAT, 36),
        ]
    }

    /// Layout for [`GraphicsPipelineBuilder::vertex_layout`](vkframe_rhi::pipeline::GraphicsPipelineBuilder::vertex_layout).
    pub fn layout() -> VertexLayout {
        VertexLayout {
            bindings: vec![Self::binding_description()],
            attributes: Self::attribute_descriptions().to_vec(),
        }
    }
}

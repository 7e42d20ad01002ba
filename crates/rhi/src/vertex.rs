//! Vertex layout.
//!
//! [`VertexLayout`] ties a `#[repr(C)]` vertex type to its input
//! descriptions so pipelines can be built with
//! [`VertexInputState::of`](crate::pipeline::VertexInputState::of).

use std::mem::{offset_of, size_of};

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// A vertex type bound at binding 0, one element per vertex.
pub trait VertexLayout: Pod {
    fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription>;
}

/// Position, vertex color and texture coordinate.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub color: Vec3,
    pub tex_coord: Vec2,
}

impl Vertex {
    #[inline]
    pub const fn new(position: Vec3, color: Vec3, tex_coord: Vec2) -> Self {
        Self {
            position,
            color,
            tex_coord,
        }
    }
}

impl VertexLayout for Vertex {
    /// Locations 0, 1 and 2: position, color, texture coordinate.
    fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, color) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 2,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex, tex_coord) as u32,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_is_tightly_packed() {
        // 3 + 3 + 2 floats
        assert_eq!(size_of::<Vertex>(), 32);
    }

    #[test]
    fn test_binding_description() {
        let binding = Vertex::binding_description();
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.stride, 32);
        assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);
    }

    #[test]
    fn test_attribute_descriptions() {
        let attrs = Vertex::attribute_descriptions();
        assert_eq!(attrs.len(), 3);

        let locations: Vec<u32> = attrs.iter().map(|a| a.location).collect();
        assert_eq!(locations, vec![0, 1, 2]);

        let offsets: Vec<u32> = attrs.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);

        assert_eq!(attrs[2].format, vk::Format::R32G32_SFLOAT);
        assert!(attrs.iter().all(|a| a.binding == 0));
    }

    #[test]
    fn test_vertex_bytes() {
        let vertex = Vertex::new(Vec3::new(1.0, 2.0, 3.0), Vec3::ONE, Vec2::new(0.5, 0.25));
        let bytes = bytemuck::bytes_of(&vertex);
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[0..4], &1.0f32.to_le_bytes());
    }
}

//! Triangle mesh data ready for upload.
//!
//! # Example
//!
//! ```no_run
//! use kiln_resources::MeshData;
//!
//! # fn example() -> kiln_resources::ResourceResult<()> {
//! let mesh = MeshData::load_obj("assets/models/viking_room.obj")?;
//! mesh.validate()?;
//! println!("{} triangles", mesh.triangle_count());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use glam::{Vec2, Vec3};
use tracing::{debug, info};

use kiln_rhi::vertex::Vertex;

use crate::error::{ResourceError, ResourceResult};

/// Vertex and 32-bit index arrays of an indexed triangle list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Two textured quads stacked along -Z, half a unit apart.
    pub fn textured_quads() -> Self {
        let quad = |z: f32| {
            [
                Vertex::new(Vec3::new(-0.5, -0.5, z), Vec3::X, Vec2::new(1.0, 0.0)),
                Vertex::new(Vec3::new(0.5, -0.5, z), Vec3::Y, Vec2::new(0.0, 0.0)),
                Vertex::new(Vec3::new(0.5, 0.5, z), Vec3::Z, Vec2::new(0.0, 1.0)),
                Vertex::new(Vec3::new(-0.5, 0.5, z), Vec3::ONE, Vec2::new(1.0, 1.0)),
            ]
        };

        let vertices = quad(0.0).into_iter().chain(quad(-0.5)).collect();
        let indices = vec![0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4];

        Self { vertices, indices }
    }

    /// Loads a triangulated mesh from a Wavefront OBJ file.
    ///
    /// All models in the file are merged. Identical vertices are shared
    /// through the index buffer, vertex colors are white and texture
    /// coordinates are flipped vertically.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::FileNotFound`] if `path` does not exist, or
    /// [`ResourceError::ObjLoad`] if it cannot be parsed.
    pub fn load_obj(path: impl AsRef<Path>) -> ResourceResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ResourceError::FileNotFound(path.to_path_buf()));
        }

        let mut reader = BufReader::new(File::open(path)?);
        let (models, _) =
            tobj::load_obj_buf(&mut reader, &tobj::GPU_LOAD_OPTIONS, |_| {
                Ok(Default::default())
            })
            .map_err(|source| ResourceError::ObjLoad {
                path: path.to_path_buf(),
                source,
            })?;

        let mut mesh = Self::default();
        let mut unique: HashMap<[u32; 8], u32> = HashMap::new();

        for model in &models {
            let positions = &model.mesh.positions;
            let texcoords = &model.mesh.texcoords;

            for &index in &model.mesh.indices {
                let i = index as usize;
                let position = Vec3::new(
                    positions[3 * i],
                    positions[3 * i + 1],
                    positions[3 * i + 2],
                );
                let tex_coord = if texcoords.len() >= 2 * i + 2 {
                    Vec2::new(texcoords[2 * i], 1.0 - texcoords[2 * i + 1])
                } else {
                    Vec2::ZERO
                };

                let vertex = Vertex::new(position, Vec3::ONE, tex_coord);
                mesh.push_deduplicated(vertex, &mut unique);
            }
            debug!(
                "OBJ model '{}': {} indices",
                model.name,
                model.mesh.indices.len()
            );
        }

        info!(
            "Loaded '{}': {} unique vertices, {} triangles",
            path.display(),
            mesh.vertices.len(),
            mesh.triangle_count()
        );

        Ok(mesh)
    }

    fn push_deduplicated(&mut self, vertex: Vertex, unique: &mut HashMap<[u32; 8], u32>) {
        // Bitwise key: Vertex is Pod and exactly eight 32-bit floats.
        let key: [u32; 8] = bytemuck::cast(vertex);
        let index = *unique.entry(key).or_insert_with(|| {
            self.vertices.push(vertex);
            (self.vertices.len() - 1) as u32
        });
        self.indices.push(index);
    }

    /// Checks that the mesh is a non-empty, in-range triangle list.
    ///
    /// # Errors
    ///
    /// - [`ResourceError::EmptyMesh`] for missing vertices or indices
    /// - [`ResourceError::NotTriangulated`] if the index count is not a
    ///   multiple of three
    /// - [`ResourceError::IndexOutOfRange`] for the first bad index
    pub fn validate(&self) -> ResourceResult<()> {
        if self.vertices.is_empty() {
            return Err(ResourceError::EmptyMesh("vertices"));
        }
        if self.indices.is_empty() {
            return Err(ResourceError::EmptyMesh("indices"));
        }
        if !self.indices.len().is_multiple_of(3) {
            return Err(ResourceError::NotTriangulated(self.indices.len()));
        }

        let vertex_count = self.vertices.len();
        if let Some(&index) = self
            .indices
            .iter()
            .find(|&&index| index as usize >= vertex_count)
        {
            return Err(ResourceError::IndexOutOfRange {
                index,
                vertex_count,
            });
        }

        Ok(())
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_textured_quads_layout() {
        let mesh = MeshData::textured_quads();
        assert_eq!(mesh.vertices.len(), 8);
        assert_eq!(mesh.indices, vec![0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4]);
        assert!(mesh.vertices[..4].iter().all(|v| v.position.z == 0.0));
        assert!(mesh.vertices[4..].iter().all(|v| v.position.z == -0.5));
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_non_triangles() {
        let mut mesh = MeshData::textured_quads();
        mesh.indices.pop();
        assert!(matches!(
            mesh.validate(),
            Err(ResourceError::NotTriangulated(11))
        ));
    }

    #[test]
    fn test_validate_rejects_out_of_range_index() {
        let mut mesh = MeshData::textured_quads();
        mesh.indices[4] = 8;
        assert!(matches!(
            mesh.validate(),
            Err(ResourceError::IndexOutOfRange {
                index: 8,
                vertex_count: 8
            })
        ));
    }

    #[test]
    fn test_validate_rejects_empty() {
        assert!(matches!(
            MeshData::default().validate(),
            Err(ResourceError::EmptyMesh("vertices"))
        ));

        let mesh = MeshData {
            vertices: vec![Vertex::default()],
            indices: Vec::new(),
        };
        assert!(matches!(
            mesh.validate(),
            Err(ResourceError::EmptyMesh("indices"))
        ));
    }

    #[test]
    fn test_duplicate_vertices_share_an_index() {
        let mut mesh = MeshData::default();
        let mut unique = HashMap::new();
        let a = Vertex::new(Vec3::ZERO, Vec3::ONE, Vec2::ZERO);
        let b = Vertex::new(Vec3::X, Vec3::ONE, Vec2::ZERO);

        for vertex in [a, b, a, b, a] {
            mesh.push_deduplicated(vertex, &mut unique);
        }

        assert_eq!(mesh.vertices, vec![a, b]);
        assert_eq!(mesh.indices, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn test_load_obj_missing_file() {
        let err = MeshData::load_obj("does/not/exist.obj").unwrap_err();
        assert!(matches!(err, ResourceError::FileNotFound(_)));
    }
}

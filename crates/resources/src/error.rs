//! Error types for resource loading.

use std::path::PathBuf;
use thiserror::Error;

/// Error type for resource loading operations.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// Failed to parse a Wavefront OBJ file.
    #[error("Failed to load OBJ file '{path}': {source}")]
    ObjLoad {
        /// Path to the file that failed to load.
        path: PathBuf,
        /// Parser error.
        #[source]
        source: tobj::LoadError,
    },

    /// Mesh has no vertices or no indices.
    #[error("Mesh has no {0}")]
    EmptyMesh(&'static str),

    /// Index count is not a multiple of three.
    #[error("Mesh is not triangulated: {0} indices")]
    NotTriangulated(usize),

    /// An index refers past the end of the vertex array.
    #[error("Index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange {
        /// Offending index value.
        index: u32,
        /// Number of vertices in the mesh.
        vertex_count: usize,
    },

    /// Texture dimensions or pixel buffer are unusable.
    #[error("Invalid texture: {0}")]
    InvalidTexture(String),

    /// Shader bytecode is not SPIR-V.
    #[error("Invalid SPIR-V in '{path}': {message}")]
    InvalidSpirv {
        /// Path to the shader file.
        path: PathBuf,
        /// What is wrong with it.
        message: String,
    },

    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image loading error.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// File not found.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
}

/// Result type alias for resource operations.
pub type ResourceResult<T> = Result<T, ResourceError>;

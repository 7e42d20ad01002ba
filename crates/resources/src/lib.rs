//! Asset loading for the Kiln engine.
//!
//! This crate decodes assets into upload-ready data:
//! - Triangle meshes (Wavefront OBJ or built-in geometry)
//! - RGBA8 textures (image files or a generated checkerboard)
//! - SPIR-V shader bytecode

mod error;

pub mod mesh;
pub mod shader;
pub mod texture;

pub use error::{ResourceError, ResourceResult};
pub use mesh::MeshData;
pub use shader::load_spirv;
pub use texture::TextureData;

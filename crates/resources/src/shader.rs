//! Pre-compiled shader bytecode.

use std::path::Path;

use tracing::debug;

use kiln_rhi::shader::spirv_words;

use crate::error::{ResourceError, ResourceResult};

/// Reads a SPIR-V module from disk and checks its header.
///
/// # Errors
///
/// Returns [`ResourceError::FileNotFound`] if `path` does not exist, or
/// [`ResourceError::InvalidSpirv`] if the bytes are not a SPIR-V module.
pub fn load_spirv(path: impl AsRef<Path>) -> ResourceResult<Vec<u8>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ResourceError::FileNotFound(path.to_path_buf()));
    }

    let bytes = std::fs::read(path)?;
    spirv_words(&bytes).map_err(|e| ResourceError::InvalidSpirv {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    debug!("Loaded SPIR-V '{}' ({} bytes)", path.display(), bytes.len());
    Ok(bytes)
}

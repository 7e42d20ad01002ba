//! Shader modules.
//!
//! Shaders arrive as pre-compiled SPIR-V bytes (see
//! `kiln_resources::load_spirv`). [`spirv_words`] checks the byte stream
//! before it reaches the driver; [`Shader`] owns the resulting module.

use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Entry point every module is expected to export.
pub const ENTRY_POINT: &CStr = c"main";

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Pipeline stage a module runs in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    #[inline]
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Fragment => "fragment",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Reinterprets little-endian SPIR-V bytes as 32-bit words.
///
/// # Errors
///
/// [`RhiError::ShaderError`] if the stream is empty, not a whole number of
/// words, or does not start with the SPIR-V magic number.
pub fn spirv_words(bytes: &[u8]) -> RhiResult<Vec<u32>> {
    if bytes.is_empty() || !bytes.len().is_multiple_of(4) {
        return Err(RhiError::ShaderError(format!(
            "SPIR-V code must be a non-empty multiple of 4 bytes, got {} bytes",
            bytes.len()
        )));
    }

    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    if words[0] != SPIRV_MAGIC {
        return Err(RhiError::ShaderError(format!(
            "Bad SPIR-V magic number {:#010x}",
            words[0]
        )));
    }

    Ok(words)
}

/// Owned `VkShaderModule` for one stage.
pub struct Shader {
    device: Arc<Device>,
    module: vk::ShaderModule,
    stage: ShaderStage,
}

impl Shader {
    /// Creates a module from SPIR-V bytes.
    pub fn from_spirv(device: Arc<Device>, bytes: &[u8], stage: ShaderStage) -> RhiResult<Self> {
        let code = spirv_words(bytes)?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.handle().create_shader_module(&create_info, None)? };

        info!("Created {} shader module ({} bytes)", stage, bytes.len());

        Ok(Self {
            device,
            module,
            stage,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Stage info for pipeline creation.
    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'static> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.to_vk_stage())
            .module(self.module)
            .name(ENTRY_POINT)
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_shader_module(self.module, None);
        }
        debug!("Destroyed {} shader module", self.stage);
    }
}

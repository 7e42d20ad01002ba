//! Engine configuration loaded from `kiln.toml`.
//!
//! Every section falls back to defaults, so a partial file (or no file at
//! all) is valid input.
//!
//! ```toml
//! [window]
//! title = "Kiln"
//! width = 1280
//! height = 720
//!
//! [renderer]
//! frames_in_flight = 2
//! prefer_mailbox = true
//!
//! [assets]
//! vertex_shader = "shaders/shader.vert.spv"
//! fragment_shader = "shaders/shader.frag.spv"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Upper bound for `renderer.frames_in_flight`.
pub const MAX_FRAMES_IN_FLIGHT: usize = 4;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub window: WindowConfig,
    pub renderer: RendererConfig,
    pub assets: AssetConfig,
    pub logging: LoggingConfig,
}

/// Window settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Kiln".to_string(),
            width: 1280,
            height: 720,
            resizable: true,
        }
    }
}

/// Frame loop and device settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Number of frame slots (CPU may run this many frames ahead of the GPU).
    pub frames_in_flight: usize,
    /// Enable `VK_LAYER_KHRONOS_validation` and the debug messenger.
    pub validation: bool,
    /// Use MAILBOX when available; `false` pins FIFO.
    pub prefer_mailbox: bool,
    /// Render with the maximum usable MSAA sample count.
    pub msaa: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            validation: cfg!(debug_assertions),
            prefer_mailbox: true,
            msaa: true,
        }
    }
}

/// Paths to pre-compiled shaders, the model and the texture image.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    /// Wavefront OBJ model. When absent the built-in quads are drawn.
    pub model: Option<PathBuf>,
    /// When absent a generated checkerboard is used.
    pub texture: Option<PathBuf>,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            vertex_shader: PathBuf::from("shaders/shader.vert.spv"),
            fragment_shader: PathBuf::from("shaders/shader.frag.spv"),
            model: None,
            texture: None,
        }
    }
}

/// Log filter settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, overridden by `RUST_LOG`.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: crate::DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from `path`, falling back to defaults when the
    /// file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the parsed values fail [`EngineConfig::validate`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content).map_err(|e| match e {
            Error::ConfigParse { source, .. } => Error::ConfigParse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;

        Ok(config)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|source| Error::ConfigParse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::InvalidConfig(format!(
                "window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }

        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&self.renderer.frames_in_flight) {
            return Err(Error::InvalidConfig(format!(
                "renderer.frames_in_flight must be in 1..={}, got {}",
                MAX_FRAMES_IN_FLIGHT, self.renderer.frames_in_flight
            )));
        }

        Ok(())
    }
}

//! Decoded RGBA8 texture data.

use std::path::Path;

use tracing::info;

use crate::error::{ResourceError, ResourceResult};

/// Tightly packed RGBA8 pixels, row-major, top row first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    /// Wraps `pixels` after checking they hold `width * height` texels.
    ///
    /// # Errors
    ///
    /// [`ResourceError::InvalidTexture`] for a zero dimension or a buffer
    /// of the wrong length.
    pub fn from_rgba8(width: u32, height: u32, pixels: Vec<u8>) -> ResourceResult<Self> {
        if width == 0 || height == 0 {
            return Err(ResourceError::InvalidTexture(format!(
                "dimensions must be non-zero, got {}x{}",
                width, height
            )));
        }

        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(ResourceError::InvalidTexture(format!(
                "{}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            )));
        }

        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Decodes an image file and converts it to RGBA8.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::FileNotFound`] if `path` does not exist, or
    /// [`ResourceError::Image`] if decoding fails.
    pub fn load(path: impl AsRef<Path>) -> ResourceResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ResourceError::FileNotFound(path.to_path_buf()));
        }

        let image = image::open(path)?.into_rgba8();
        let (width, height) = image.dimensions();
        info!("Loaded texture '{}' ({}x{})", path.display(), width, height);

        Self::from_rgba8(width, height, image.into_raw())
    }

    /// Square black and white checkerboard with `cell`-pixel squares.
    pub fn checkerboard(size: u32, cell: u32) -> Self {
        let size = size.max(1);
        let cell = cell.max(1);

        let pixels = (0..size)
            .flat_map(|y| (0..size).map(move |x| (x, y)))
            .flat_map(|(x, y)| {
                let value = if (x / cell + y / cell) % 2 == 0 { 255 } else { 0 };
                [value, value, value, 255]
            })
            .collect();

        Self {
            width: size,
            height: size,
            pixels,
        }
    }

    /// Number of mip levels a full chain for this texture has.
    #[inline]
    pub fn mip_levels(&self) -> u32 {
        kiln_rhi::image::mip_level_count(self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(texture: &TextureData, x: u32, y: u32) -> [u8; 4] {
        let offset = ((y * texture.width + x) * 4) as usize;
        let mut out = [0; 4];
        out.copy_from_slice(&texture.pixels[offset..offset + 4]);
        out
    }

    #[test]
    fn test_checkerboard_cells() {
        let texture = TextureData::checkerboard(8, 2);
        assert_eq!(texture.pixels.len(), 8 * 8 * 4);
        assert_eq!(pixel(&texture, 0, 0), [255, 255, 255, 255]);
        assert_eq!(pixel(&texture, 1, 1), [255, 255, 255, 255]);
        assert_eq!(pixel(&texture, 2, 0), [0, 0, 0, 255]);
        assert_eq!(pixel(&texture, 2, 2), [255, 255, 255, 255]);
    }

    #[test]
    fn test_checkerboard_mip_levels() {
        assert_eq!(TextureData::checkerboard(512, 64).mip_levels(), 10);
    }

    #[test]
    fn test_from_rgba8_checks_length() {
        assert!(TextureData::from_rgba8(2, 2, vec![0; 16]).is_ok());
        assert!(matches!(
            TextureData::from_rgba8(2, 2, vec![0; 15]),
            Err(ResourceError::InvalidTexture(_))
        ));
        assert!(matches!(
            TextureData::from_rgba8(0, 2, Vec::new()),
            Err(ResourceError::InvalidTexture(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            TextureData::load("no/such/texture.png"),
            Err(ResourceError::FileNotFound(_))
        ));
    }
}

//! Raster images and the browser-less page rasterizer
//!
//! [`RasterImage`] is the currency between the renderer and the analysis
//! stages. The `layout` module (static backend only) turns a parsed document
//! into paint commands which `raster` turns into pixels.

#[cfg(feature = "static")]
pub mod layout;
pub mod paint;
pub mod raster;

use crate::error::RenderError;

/// Hard cap on a captured page height in pixels, for every backend.
pub const MAX_PAGE_HEIGHT: u32 = 32_768;

/// A captured page: row-major RGB, three bytes per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RasterImage {
    /// Wrap a raw RGB buffer. Returns `None` when the buffer length does not
    /// match `width * height * 3`.
    pub fn from_raw(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(3)?;
        if pixels.len() != expected {
            return None;
        }
        Some(Self { width, height, pixels })
    }

    /// A uniformly filled image.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let count = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(count * 3);
        for _ in 0..count {
            pixels.extend_from_slice(&rgb);
        }
        Self { width, height, pixels }
    }

    /// Decode an encoded capture (PNG from a browser backend).
    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, RenderError> {
        if bytes.is_empty() {
            return Err(RenderError::BlankPage("capture returned no data".into()));
        }
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| RenderError::BlankPage(format!("undecodable capture: {}", e)))?
            .to_rgb8();
        let (width, height) = decoded.dimensions();
        if width == 0 || height == 0 {
            return Err(RenderError::BlankPage("capture has zero area".into()));
        }
        Ok(Self {
            width,
            height,
            pixels: decoded.into_raw(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Raw RGB bytes
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]]
    }

    /// Copy into an `image` buffer for encoding and resizing.
    pub fn to_rgb_image(&self) -> image::RgbImage {
        // Length is validated at construction, so from_raw cannot fail here.
        image::RgbImage::from_raw(self.width, self.height, self.pixels.clone())
            .unwrap_or_else(|| image::RgbImage::new(self.width, self.height))
    }
}

impl From<image::RgbImage> for RasterImage {
    fn from(img: image::RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            pixels: img.into_raw(),
        }
    }
}

//! Raster artifacts: palette swatches, thumbnails and PNG encoding

use std::io::Cursor;
use std::path::Path;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use crate::error::{Error, Result};
use crate::quantize::ColorCluster;

pub const SWATCH_WIDTH: u32 = 600;
pub const SWATCH_HEIGHT: u32 = 100;

/// Horizontal bands, one per cluster, each as wide as its proportion. Band
/// edges are placed on the rounded cumulative proportion so the bands always
/// fill the full width.
pub fn palette_swatch(clusters: &[ColorCluster], width: u32, height: u32) -> RgbImage {
    let mut img = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    let mut cumulative = 0f64;
    let mut start = 0u32;
    for (i, cluster) in clusters.iter().enumerate() {
        cumulative += cluster.proportion;
        let end = if i + 1 == clusters.len() {
            width
        } else {
            ((cumulative * width as f64).round() as u32).min(width)
        };
        for x in start..end {
            for y in 0..height {
                img.put_pixel(x, y, Rgb(cluster.rgb));
            }
        }
        start = end;
    }
    img
}

/// Scale `img` to `max_width` (never up), keeping at most `max_height`
/// rows of the scaled result from the top.
pub fn top_thumbnail(img: &RgbImage, max_width: u32, max_height: u32) -> RgbImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return RgbImage::new(1, 1);
    }
    let scale = (max_width as f64 / w as f64).min(1.0);
    // Crop first so a very tall page is not resized in full
    let crop_h = ((max_height as f64 / scale).round() as u32).clamp(1, h);
    let cropped = imageops::crop_imm(img, 0, 0, w, crop_h).to_image();
    let tw = ((w as f64 * scale).round() as u32).max(1);
    let th = ((crop_h as f64 * scale).round() as u32).max(1);
    imageops::resize(&cropped, tw, th, FilterType::Triangle)
}

pub fn encode_png(img: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img.clone()).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

pub fn write_png(path: &Path, img: &RgbImage) -> Result<()> {
    let bytes = encode_png(img)?;
    std::fs::write(path, bytes).map_err(|e| Error::io(path, e))
}

pub fn read_png(path: &Path) -> Result<RgbImage> {
    let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
    Ok(image::load_from_memory_with_format(&bytes, ImageFormat::Png)?.to_rgb8())
}

//! Rasterizer for paint command lists

use crate::rendering::paint::{PaintCommand, CELL};
use crate::rendering::RasterImage;

/// Paint `commands` in order over a `background` canvas.
pub fn rasterize(width: u32, height: u32, background: [u8; 3], commands: &[PaintCommand]) -> RasterImage {
    let mut canvas = Canvas {
        width,
        height,
        pixels: RasterImage::solid(width, height, background).pixels().to_vec(),
    };
    for cmd in commands {
        match cmd {
            PaintCommand::SolidRect { x, y, width, height, rgb } => {
                canvas.fill(*x, *y, *width, *height, *rgb);
            }
            PaintCommand::Text { x, y, lines, scale, rgb } => {
                let cell = CELL * (*scale).max(1);
                // glyph blocks leave a one-pixel gutter per scale step
                let glyph = cell.saturating_sub((*scale).max(1) * 2).max(1);
                for (row, line) in lines.iter().enumerate() {
                    let gy = *y + (row as u32 * cell) as i32;
                    for (col, ch) in line.chars().enumerate() {
                        if ch.is_whitespace() {
                            continue;
                        }
                        let gx = *x + (col as u32 * cell) as i32;
                        canvas.fill(gx, gy, glyph, glyph, *rgb);
                    }
                }
            }
        }
    }
    RasterImage::from_raw(width, height, canvas.pixels).unwrap_or_else(|| RasterImage::solid(width, height, background))
}

struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Canvas {
    fn fill(&mut self, x: i32, y: i32, w: u32, h: u32, rgb: [u8; 3]) {
        let x0 = x.max(0) as u32;
        let y0 = y.max(0) as u32;
        let x1 = ((x as i64 + w as i64).max(0) as u64).min(self.width as u64) as u32;
        let y1 = ((y as i64 + h as i64).max(0) as u64).min(self.height as u64) as u32;
        for py in y0..y1 {
            let row = py as usize * self.width as usize;
            for px in x0..x1 {
                let i = (row + px as usize) * 3;
                self.pixels[i..i + 3].copy_from_slice(&rgb);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rasterize_without_commands_is_uniform() {
        let img = rasterize(16, 8, [255, 255, 255], &[]);
        assert_eq!(img.width(), 16);
        assert_eq!(img.height(), 8);
        assert!(img.pixels().chunks(3).all(|p| p == [255, 255, 255]));
    }

    #[test]
    fn rects_are_clipped_to_canvas() {
        let cmd = PaintCommand::SolidRect { x: -4, y: 6, width: 10, height: 10, rgb: [255, 0, 0] };
        let img = rasterize(8, 8, [0, 0, 0], &[cmd]);
        assert_eq!(img.pixel(0, 7), [255, 0, 0]);
        assert_eq!(img.pixel(5, 7), [255, 0, 0]);
        assert_eq!(img.pixel(6, 7), [0, 0, 0]);
        assert_eq!(img.pixel(0, 5), [0, 0, 0]);
    }

    #[test]
    fn text_paints_glyph_blocks() {
        let cmd = PaintCommand::Text { x: 0, y: 0, lines: vec!["a b".into()], scale: 1, rgb: [0, 0, 0] };
        let img = rasterize(32, 8, [255, 255, 255], &[cmd]);
        assert_eq!(img.pixel(1, 1), [0, 0, 0]);
        // the space leaves its cell untouched
        assert_eq!(img.pixel(9, 1), [255, 255, 255]);
        assert_eq!(img.pixel(17, 1), [0, 0, 0]);
    }
}

//! Spectral-residual saliency
//!
//! The log-amplitude spectrum of a downscaled grayscale page, minus its local
//! average, keeps only the "unexpected" frequencies. Transforming that residual
//! back with the original phase highlights the regions that stand out.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};

use crate::error::SaliencyError;
use crate::rendering::RasterImage;

/// Side of the square working grid
const GRID: usize = 64;
const BLANK_STDDEV: f32 = 1e-3;
const BLUR_SIGMA: f32 = 2.5;
const BLUR_RADIUS: usize = 4;
/// Scores at or above this count towards the focus fraction
pub const FOCUS_THRESHOLD: f32 = 0.5;

/// Per-pixel attention scores in `[0, 1]`, same size as the source image.
#[derive(Debug, Clone, PartialEq)]
pub struct SaliencyMap {
    width: u32,
    height: u32,
    scores: Vec<f32>,
}

impl SaliencyMap {
    fn zeros(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            scores: vec![0.0; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row-major scores
    pub fn scores(&self) -> &[f32] {
        &self.scores
    }

    pub fn score(&self, x: u32, y: u32) -> f32 {
        self.scores[y as usize * self.width as usize + x as usize]
    }

    pub fn is_blank(&self) -> bool {
        self.scores.iter().all(|s| *s == 0.0)
    }
}

/// Compact statistics of a map, as written into tables and reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaliencySummary {
    pub mean: f32,
    pub max: f32,
    /// Coordinates of the first pixel holding `max`
    pub peak: (u32, u32),
    /// Share of pixels scoring at least [`FOCUS_THRESHOLD`]
    pub focus_fraction: f32,
}

/// Compute the saliency map of `image`.
pub fn estimate(image: &RasterImage) -> Result<SaliencyMap, SaliencyError> {
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return Err(SaliencyError::UnsupportedFormat(format!("{}x{} image", width, height)));
    }
    if image.pixels().len() != image.pixel_count() * 3 {
        return Err(SaliencyError::UnsupportedFormat("pixel buffer does not match dimensions".into()));
    }

    let gray = DynamicImage::ImageRgb8(image.to_rgb_image()).to_luma8();
    if luminance_stddev(&gray) < BLANK_STDDEV {
        return Ok(SaliencyMap::zeros(width, height));
    }

    let small = imageops::resize(&gray, GRID as u32, GRID as u32, FilterType::Triangle);
    let mut grid = spectral_residual(&small);
    gaussian_blur(&mut grid);

    let (min, max) = grid
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    let range = max - min;
    if !range.is_finite() || range <= f32::EPSILON * max.abs().max(1.0) {
        return Ok(SaliencyMap::zeros(width, height));
    }
    for v in grid.iter_mut() {
        *v = (*v - min) / range;
    }

    Ok(SaliencyMap {
        width,
        height,
        scores: upsample(&grid, width, height),
    })
}

fn luminance_stddev(gray: &GrayImage) -> f32 {
    let n = (gray.width() as f64) * (gray.height() as f64);
    if n == 0.0 {
        return 0.0;
    }
    let (sum, sum_sq) = gray.pixels().fold((0f64, 0f64), |(s, sq), p| {
        let v = p.0[0] as f64 / 255.0;
        (s + v, sq + v * v)
    });
    let mean = sum / n;
    ((sum_sq / n - mean * mean).max(0.0)).sqrt() as f32
}

/// 2-D FFT in place: rows, then columns via transposition.
fn fft_2d(data: &mut [Complex<f32>], inverse: bool) {
    let mut planner = FftPlanner::<f32>::new();
    let fft = if inverse {
        planner.plan_fft_inverse(GRID)
    } else {
        planner.plan_fft_forward(GRID)
    };
    fft.process(data);
    transpose(data);
    fft.process(data);
    transpose(data);
}

fn transpose(data: &mut [Complex<f32>]) {
    for y in 0..GRID {
        for x in (y + 1)..GRID {
            data.swap(y * GRID + x, x * GRID + y);
        }
    }
}

fn spectral_residual(small: &GrayImage) -> Vec<f32> {
    let mut spectrum: Vec<Complex<f32>> = small
        .pixels()
        .map(|p| Complex::new(p.0[0] as f32 / 255.0, 0.0))
        .collect();
    fft_2d(&mut spectrum, false);

    let log_amplitude: Vec<f32> = spectrum.iter().map(|c| (c.norm() + 1e-8).ln()).collect();
    let averaged = box_mean_3x3(&log_amplitude);

    let mut residual: Vec<Complex<f32>> = spectrum
        .iter()
        .zip(log_amplitude.iter().zip(averaged.iter()))
        .map(|(c, (la, avg))| Complex::from_polar((la - avg).exp(), c.arg()))
        .collect();
    fft_2d(&mut residual, true);

    residual.iter().map(|c| c.norm_sqr()).collect()
}

fn clamp_index(i: isize) -> usize {
    i.clamp(0, GRID as isize - 1) as usize
}

fn box_mean_3x3(values: &[f32]) -> Vec<f32> {
    let mut out = vec![0f32; values.len()];
    for y in 0..GRID as isize {
        for x in 0..GRID as isize {
            let mut sum = 0f32;
            for dy in -1..=1 {
                for dx in -1..=1 {
                    sum += values[clamp_index(y + dy) * GRID + clamp_index(x + dx)];
                }
            }
            out[y as usize * GRID + x as usize] = sum / 9.0;
        }
    }
    out
}

/// Separable Gaussian with clamped edges
fn gaussian_blur(values: &mut [f32]) {
    let kernel: Vec<f32> = {
        let raw: Vec<f32> = (-(BLUR_RADIUS as isize)..=BLUR_RADIUS as isize)
            .map(|i| (-((i * i) as f32) / (2.0 * BLUR_SIGMA * BLUR_SIGMA)).exp())
            .collect();
        let total: f32 = raw.iter().sum();
        raw.into_iter().map(|w| w / total).collect()
    };
    let r = BLUR_RADIUS as isize;

    let mut tmp = vec![0f32; values.len()];
    for y in 0..GRID {
        for x in 0..GRID as isize {
            tmp[y * GRID + x as usize] = (-r..=r)
                .map(|d| kernel[(d + r) as usize] * values[y * GRID + clamp_index(x + d)])
                .sum();
        }
    }
    for y in 0..GRID as isize {
        for x in 0..GRID {
            values[y as usize * GRID + x] = (-r..=r)
                .map(|d| kernel[(d + r) as usize] * tmp[clamp_index(y + d) * GRID + x])
                .sum();
        }
    }
}

/// Bilinear resample of the working grid to `width` x `height`.
fn upsample(grid: &[f32], width: u32, height: u32) -> Vec<f32> {
    let sx = GRID as f32 / width as f32;
    let sy = GRID as f32 / height as f32;
    let max = (GRID - 1) as f32;
    let mut out = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height {
        let fy = ((y as f32 + 0.5) * sy - 0.5).clamp(0.0, max);
        let y0 = fy.floor() as usize;
        let y1 = (y0 + 1).min(GRID - 1);
        let ty = fy - y0 as f32;
        for x in 0..width {
            let fx = ((x as f32 + 0.5) * sx - 0.5).clamp(0.0, max);
            let x0 = fx.floor() as usize;
            let x1 = (x0 + 1).min(GRID - 1);
            let tx = fx - x0 as f32;
            let top = grid[y0 * GRID + x0] * (1.0 - tx) + grid[y0 * GRID + x1] * tx;
            let bottom = grid[y1 * GRID + x0] * (1.0 - tx) + grid[y1 * GRID + x1] * tx;
            out.push((top * (1.0 - ty) + bottom * ty).clamp(0.0, 1.0));
        }
    }
    out
}

pub fn summarize(map: &SaliencyMap) -> SaliencySummary {
    let n = map.scores.len().max(1) as f64;
    let mut sum = 0f64;
    let mut max = 0f32;
    let mut peak_index = 0usize;
    let mut focused = 0usize;
    for (i, s) in map.scores.iter().enumerate() {
        sum += *s as f64;
        if *s > max {
            max = *s;
            peak_index = i;
        }
        if *s >= FOCUS_THRESHOLD {
            focused += 1;
        }
    }
    let w = map.width.max(1) as usize;
    SaliencySummary {
        mean: (sum / n) as f32,
        max,
        peak: ((peak_index % w) as u32, (peak_index / w) as u32),
        focus_fraction: (focused as f64 / n) as f32,
    }
}

/// JET colormap: blue for 0 through green to red for 1.
pub fn jet(score: f32) -> [u8; 3] {
    let s = score.clamp(0.0, 1.0) * 4.0;
    let channel = |center: f32| ((1.5 - (s - center).abs()).clamp(0.0, 1.0) * 255.0).round() as u8;
    [channel(3.0), channel(2.0), channel(1.0)]
}

/// Blend the colorized map over the page, 60% page and 40% heat.
pub fn overlay(image: &RasterImage, map: &SaliencyMap) -> RgbImage {
    let mut out = RgbImage::new(image.width(), image.height());
    for (x, y, px) in out.enumerate_pixels_mut() {
        let base = image.pixel(x, y);
        let heat = if x < map.width && y < map.height {
            jet(map.score(x, y))
        } else {
            jet(0.0)
        };
        let mut blended = [0u8; 3];
        for c in 0..3 {
            blended[c] = (base[c] as f32 * 0.6 + heat[c] as f32 * 0.4).round() as u8;
        }
        *px = Rgb(blended);
    }
    out
}

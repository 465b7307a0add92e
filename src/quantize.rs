//! Dominant-color extraction
//!
//! Seeded weighted k-means over the distinct colors of a grid-subsampled
//! image. The same image, `k` and seed always produce the same clusters in the
//! same order.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::QuantizationError;
use crate::rendering::RasterImage;

/// Default upper bound on the number of pixels fed to clustering.
pub const DEFAULT_MAX_SAMPLES: usize = 65_536;

const MAX_ITERATIONS: usize = 64;
const CONVERGENCE_SHIFT: f64 = 0.5;

/// One representative color and the share of the page it covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorCluster {
    /// `#rrggbb`
    pub hex: String,
    pub rgb: [u8; 3],
    /// Share of sampled pixels assigned to this cluster, in `[0, 1]`
    pub proportion: f64,
    /// Number of sampled pixels assigned to this cluster
    pub pixel_count: u64,
}

impl ColorCluster {
    fn new(rgb: [u8; 3], pixel_count: u64, total: u64) -> Self {
        Self {
            hex: to_hex(rgb),
            rgb,
            proportion: pixel_count as f64 / total as f64,
            pixel_count,
        }
    }
}

pub fn to_hex(rgb: [u8; 3]) -> String {
    format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2])
}

/// Quantize `image` into at most `k` clusters using the default sample budget.
pub fn quantize(image: &RasterImage, k: usize, seed: u64) -> Result<Vec<ColorCluster>, QuantizationError> {
    quantize_sampled(image, k, seed, DEFAULT_MAX_SAMPLES)
}

/// Quantize `image` into at most `k` clusters, sampling at most
/// `max_samples` pixels on a regular grid.
pub fn quantize_sampled(
    image: &RasterImage,
    k: usize,
    seed: u64,
    max_samples: usize,
) -> Result<Vec<ColorCluster>, QuantizationError> {
    if k == 0 {
        return Err(QuantizationError::InvalidClusterCount(k));
    }
    if image.pixel_count() == 0 {
        return Err(QuantizationError::EmptyImage);
    }

    let histogram = sample_histogram(image, max_samples.max(1));
    let total: u64 = histogram.values().sum();
    if total == 0 {
        return Err(QuantizationError::EmptyImage);
    }

    // Few enough colors to report them exactly
    if histogram.len() <= k {
        let clusters = histogram
            .into_iter()
            .map(|(rgb, count)| ColorCluster::new(rgb, count, total))
            .collect();
        return Ok(sorted(clusters));
    }

    let points: Vec<([f64; 3], f64)> = histogram
        .iter()
        .map(|(rgb, &count)| ([rgb[0] as f64, rgb[1] as f64, rgb[2] as f64], count as f64))
        .collect();

    let mut rng = StdRng::seed_from_u64(seed);
    let centroids = kmeans(&points, k, &mut rng);

    // Final assignment; centroids rounding to the same color are merged.
    let mut merged: BTreeMap<[u8; 3], u64> = BTreeMap::new();
    let mut counts = vec![0u64; centroids.len()];
    for (point, weight) in &points {
        counts[nearest(point, &centroids).0] += *weight as u64;
    }
    for (centroid, count) in centroids.iter().zip(counts) {
        if count == 0 {
            continue;
        }
        *merged.entry(round_rgb(centroid)).or_insert(0) += count;
    }

    let clusters = merged
        .into_iter()
        .map(|(rgb, count)| ColorCluster::new(rgb, count, total))
        .collect();
    Ok(sorted(clusters))
}

/// The smallest grid stride whose sample count stays within `max_samples`.
fn grid_stride(width: u32, height: u32, max_samples: usize) -> u32 {
    let pixel_count = width as f64 * height as f64;
    let mut stride = ((pixel_count / max_samples as f64).sqrt().floor() as u32).max(1);
    loop {
        let cols = (width as u64).div_ceil(stride as u64);
        let rows = (height as u64).div_ceil(stride as u64);
        if cols * rows <= max_samples as u64 {
            return stride;
        }
        stride += 1;
    }
}

fn sample_histogram(image: &RasterImage, max_samples: usize) -> BTreeMap<[u8; 3], u64> {
    let stride = grid_stride(image.width(), image.height(), max_samples) as usize;
    let mut histogram = BTreeMap::new();
    for y in (0..image.height()).step_by(stride) {
        for x in (0..image.width()).step_by(stride) {
            *histogram.entry(image.pixel(x, y)).or_insert(0u64) += 1;
        }
    }
    histogram
}

fn distance_sq(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    let dr = a[0] - b[0];
    let dg = a[1] - b[1];
    let db = a[2] - b[2];
    dr * dr + dg * dg + db * db
}

/// Index of and squared distance to the closest centroid. Ties go to the
/// lower index.
fn nearest(point: &[f64; 3], centroids: &[[f64; 3]]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (i, c) in centroids.iter().enumerate() {
        let d = distance_sq(point, c);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

/// Draw an index with probability proportional to `weights`.
fn weighted_pick(weights: &[f64], rng: &mut StdRng) -> usize {
    let sum: f64 = weights.iter().sum();
    if sum <= 0.0 {
        return 0;
    }
    let mut target = rng.gen::<f64>() * sum;
    for (i, w) in weights.iter().enumerate() {
        if target < *w {
            return i;
        }
        target -= w;
    }
    // Rounding left a sliver past the end; take the last non-zero weight.
    weights.iter().rposition(|w| *w > 0.0).unwrap_or(0)
}

fn kmeans_plus_plus(points: &[([f64; 3], f64)], k: usize, rng: &mut StdRng) -> Vec<[f64; 3]> {
    let weights: Vec<f64> = points.iter().map(|(_, w)| *w).collect();
    let mut centroids = vec![points[weighted_pick(&weights, rng)].0];

    while centroids.len() < k {
        let scores: Vec<f64> = points
            .iter()
            .map(|(p, w)| w * nearest(p, &centroids).1)
            .collect();
        centroids.push(points[weighted_pick(&scores, rng)].0);
    }
    centroids
}

fn kmeans(points: &[([f64; 3], f64)], k: usize, rng: &mut StdRng) -> Vec<[f64; 3]> {
    let mut centroids = kmeans_plus_plus(points, k, rng);
    let mut assignment = vec![0usize; points.len()];
    let mut distances = vec![0f64; points.len()];

    for _ in 0..MAX_ITERATIONS {
        for (i, (p, _)) in points.iter().enumerate() {
            let (idx, d) = nearest(p, &centroids);
            assignment[i] = idx;
            distances[i] = d;
        }

        let mut sums = vec![[0f64; 3]; k];
        let mut weights = vec![0f64; k];
        for (i, (p, w)) in points.iter().enumerate() {
            let c = assignment[i];
            sums[c][0] += p[0] * w;
            sums[c][1] += p[1] * w;
            sums[c][2] += p[2] * w;
            weights[c] += w;
        }

        let mut max_shift = 0f64;
        for c in 0..k {
            let next = if weights[c] > 0.0 {
                [sums[c][0] / weights[c], sums[c][1] / weights[c], sums[c][2] / weights[c]]
            } else {
                // Re-seed an empty cluster with the worst-served point
                let far = distances
                    .iter()
                    .enumerate()
                    .fold((0, -1.0), |best, (i, d)| if *d > best.1 { (i, *d) } else { best })
                    .0;
                distances[far] = 0.0;
                points[far].0
            };
            max_shift = max_shift.max(distance_sq(&centroids[c], &next).sqrt());
            centroids[c] = next;
        }

        if max_shift < CONVERGENCE_SHIFT {
            break;
        }
    }
    centroids
}

fn round_rgb(c: &[f64; 3]) -> [u8; 3] {
    [
        c[0].round().clamp(0.0, 255.0) as u8,
        c[1].round().clamp(0.0, 255.0) as u8,
        c[2].round().clamp(0.0, 255.0) as u8,
    ]
}

fn sorted(mut clusters: Vec<ColorCluster>) -> Vec<ColorCluster> {
    clusters.sort_by(|a, b| b.pixel_count.cmp(&a.pixel_count).then_with(|| a.hex.cmp(&b.hex)));
    clusters
}

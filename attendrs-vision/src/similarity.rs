//! The five classical similarity measures. Every score lands in `[0, 1]`,
//! with 1 meaning indistinguishable.

use image::GrayImage;
use imageproc::{edges, gradients};
use ndarray::Array2;

/// Below this much variance a grid is treated as flat.
const FLAT_EPSILON: f64 = 1e-9;

/// Zero-mean normalized cross-correlation of two same-shaped grids.
/// Anti-correlation counts as no similarity.
pub fn template_match(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    correlation(a, b)
}

/// Normalized intensity histogram with `bins` buckets.
pub fn intensity_histogram(img: &GrayImage, bins: usize) -> Vec<f64> {
    let bins = bins.clamp(1, 256);
    let mut hist = vec![0.0; bins];
    for px in img.pixels() {
        hist[px[0] as usize * bins / 256] += 1.0;
    }
    let total = (img.width() as f64) * (img.height() as f64);
    if total > 0.0 {
        hist.iter_mut().for_each(|h| *h /= total);
    }
    hist
}

/// Mean of histogram correlation and inverted symmetric chi-square.
pub fn histogram_similarity(a: &[f64], b: &[f64]) -> f64 {
    let correl = pearson(a.iter().copied(), b.iter().copied(), a.len().min(b.len()));

    // For normalized histograms this chi-square lies in [0, 2].
    let chi: f64 = a
        .iter()
        .zip(b)
        .filter(|(x, y)| *x + *y > 0.0)
        .map(|(x, y)| (x - y).powi(2) / (x + y))
        .sum();
    let chi_score = (1.0 - chi / 2.0).clamp(0.0, 1.0);

    (correl + chi_score) / 2.0
}

/// Inverse of the mean squared pixel error: `1 / (1 + mse / mse_scale)`.
pub fn structural_similarity(a: &Array2<f64>, b: &Array2<f64>, mse_scale: f64) -> f64 {
    let diff = a - b;
    let mse = diff.mapv(|d| d * d).mean().unwrap_or(0.0);
    1.0 / (1.0 + mse / mse_scale)
}

pub fn edge_map(img: &GrayImage, low: f32, high: f32) -> GrayImage {
    edges::canny(img, low, high)
}

/// Dice overlap of two edge maps. Two maps without any edge are identical.
pub fn edge_similarity(a: &GrayImage, b: &GrayImage) -> f64 {
    let mut count_a = 0usize;
    let mut count_b = 0usize;
    let mut both = 0usize;
    for (pa, pb) in a.pixels().zip(b.pixels()) {
        let ea = pa[0] > 0;
        let eb = pb[0] > 0;
        count_a += ea as usize;
        count_b += eb as usize;
        both += (ea && eb) as usize;
    }
    if count_a + count_b == 0 {
        return 1.0;
    }
    2.0 * both as f64 / (count_a + count_b) as f64
}

/// Sobel gradient magnitude.
pub fn gradient_magnitude(img: &GrayImage) -> Array2<f64> {
    let grad = gradients::sobel_gradients(img);
    let (width, height) = grad.dimensions();
    Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
        grad.get_pixel(x as u32, y as u32)[0] as f64
    })
}

pub fn gradient_similarity(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    correlation(a, b)
}

fn correlation(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    pearson(a.iter().copied(), b.iter().copied(), a.len().min(b.len()))
}

/// Pearson correlation clamped to `[0, 1]`. Two flat inputs are similar
/// only when their levels agree.
fn pearson<A, B>(a: A, b: B, len: usize) -> f64
where
    A: Iterator<Item = f64> + Clone,
    B: Iterator<Item = f64> + Clone,
{
    if len == 0 {
        return 0.0;
    }
    let n = len as f64;
    let mean_a = a.clone().take(len).sum::<f64>() / n;
    let mean_b = b.clone().take(len).sum::<f64>() / n;

    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (x, y) in a.zip(b).take(len) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    let flat_a = var_a / n < FLAT_EPSILON;
    let flat_b = var_b / n < FLAT_EPSILON;
    match (flat_a, flat_b) {
        (true, true) => {
            if (mean_a - mean_b).abs() < 0.5 {
                1.0
            } else {
                0.0
            }
        }
        (true, false) | (false, true) => 0.0,
        (false, false) => (cov / (var_a.sqrt() * var_b.sqrt())).clamp(0.0, 1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::to_array;
    use image::Luma;

    fn template_match_images(a: &GrayImage, b: &GrayImage) -> f64 {
        template_match(&to_array(a), &to_array(b))
    }

    fn ramp(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| Luma([((x * 7 + y * 3) % 256) as u8]))
    }

    fn flat(width: u32, height: u32, level: u8) -> GrayImage {
        GrayImage::from_pixel(width, height, Luma([level]))
    }

    #[test]
    fn test_template_identity_and_inversion() {
        let img = ramp(32, 32);
        let inverted = GrayImage::from_fn(32, 32, |x, y| Luma([255 - img.get_pixel(x, y)[0]]));
        assert!((template_match_images(&img, &img) - 1.0).abs() < 1e-9);
        assert_eq!(template_match_images(&img, &inverted), 0.0);
    }

    #[test]
    fn test_template_flat_inputs() {
        assert_eq!(template_match_images(&flat(8, 8, 40), &flat(8, 8, 40)), 1.0);
        assert_eq!(template_match_images(&flat(8, 8, 40), &flat(8, 8, 200)), 0.0);
        assert_eq!(template_match_images(&flat(8, 8, 40), &ramp(8, 8)), 0.0);
    }

    #[test]
    fn test_histogram_bins_sum_to_one() {
        let hist = intensity_histogram(&ramp(16, 16), 64);
        assert_eq!(hist.len(), 64);
        assert!((hist.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_histogram_disjoint_is_zero() {
        let dark = intensity_histogram(&flat(8, 8, 10), 64);
        let bright = intensity_histogram(&flat(8, 8, 240), 64);
        assert!(histogram_similarity(&dark, &bright) < 1e-9);
        assert!((histogram_similarity(&dark, &dark) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_structural_scale() {
        let a = to_array(&flat(4, 4, 100));
        let b = to_array(&flat(4, 4, 110));
        // mse == 100 == mse_scale
        assert!((structural_similarity(&a, &b, 100.0) - 0.5).abs() < 1e-9);
        assert_eq!(structural_similarity(&a, &a, 100.0), 1.0);
    }

    #[test]
    fn test_edge_dice() {
        let empty = flat(8, 8, 0);
        assert_eq!(edge_similarity(&empty, &empty), 1.0);

        let mut left = flat(8, 8, 0);
        let mut right = flat(8, 8, 0);
        left.put_pixel(1, 1, Luma([255]));
        left.put_pixel(2, 2, Luma([255]));
        right.put_pixel(2, 2, Luma([255]));
        assert!((edge_similarity(&left, &right) - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(edge_similarity(&left, &empty), 0.0);
    }

    #[test]
    fn test_gradient_of_flat_is_zero() {
        let grad = gradient_magnitude(&flat(10, 10, 77));
        assert!(grad.iter().all(|g| *g == 0.0));
        assert_eq!(gradient_similarity(&grad, &grad), 1.0);
    }
}

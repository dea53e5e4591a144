use image::GrayImage;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VisionError};
use crate::face::{resize_square, to_array, FaceImage};
use crate::similarity;

/// Relative weight of each measure in the fused score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionWeights {
    pub template: f64,
    pub histogram: f64,
    pub structural: f64,
    pub edge: f64,
    pub gradient: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        // Template and structural carry most of the discrimination.
        Self {
            template: 0.30,
            histogram: 0.10,
            structural: 0.30,
            edge: 0.15,
            gradient: 0.15,
        }
    }
}

impl FusionWeights {
    fn as_array(&self) -> [f64; 5] {
        [
            self.template,
            self.histogram,
            self.structural,
            self.edge,
            self.gradient,
        ]
    }

    pub fn validate(&self) -> Result<()> {
        let weights = self.as_array();
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(VisionError::InvalidConfig(
                "fusion weights must be finite and non-negative".into(),
            ));
        }
        let total: f64 = weights.iter().sum();
        if (total - 1.0).abs() > 1e-6 {
            return Err(VisionError::InvalidConfig(format!(
                "fusion weights must sum to 1, got {total:.6}"
            )));
        }
        Ok(())
    }

    pub fn fuse(&self, scores: &MethodScores) -> f64 {
        let fused: f64 = self
            .as_array()
            .iter()
            .zip(scores.as_array())
            .map(|(w, s)| w * s)
            .sum();
        fused.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Side of the square every face is resampled to before comparing.
    pub base_size: u32,
    /// Fractions of `base_size` at which every measure is evaluated.
    pub scales: Vec<f32>,
    /// Faces with a shorter side are rejected as unusable.
    pub min_face_side: u32,
    pub histogram_bins: usize,
    /// MSE at which the structural score drops to 0.5.
    pub mse_scale: f64,
    pub canny_low: f32,
    pub canny_high: f32,
    pub weights: FusionWeights,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            base_size: 128,
            scales: vec![1.0, 0.5, 0.25],
            min_face_side: 24,
            histogram_bins: 64,
            mse_scale: 100.0,
            canny_low: 50.0,
            canny_high: 150.0,
            weights: FusionWeights::default(),
        }
    }
}

const MIN_SCALED_SIDE: u32 = 8;
const MAX_BASE_SIZE: u32 = 1024;

impl SimilarityConfig {
    pub fn validate(&self) -> Result<()> {
        self.weights.validate()?;
        if !(16..=MAX_BASE_SIZE).contains(&self.base_size) {
            return Err(VisionError::InvalidConfig(format!(
                "base_size must be within 16..={MAX_BASE_SIZE}, got {}",
                self.base_size
            )));
        }
        if self.scales.is_empty() {
            return Err(VisionError::InvalidConfig(
                "at least one scale is required".into(),
            ));
        }
        for &scale in &self.scales {
            if !(scale > 0.0 && scale <= 1.0) {
                return Err(VisionError::InvalidConfig(format!(
                    "scale {scale} outside (0, 1]"
                )));
            }
            if self.scaled_side(scale) < MIN_SCALED_SIDE {
                return Err(VisionError::InvalidConfig(format!(
                    "scale {scale} shrinks faces below {MIN_SCALED_SIDE}px"
                )));
            }
        }
        if !(1..=256).contains(&self.histogram_bins) {
            return Err(VisionError::InvalidConfig(format!(
                "histogram_bins must be within 1..=256, got {}",
                self.histogram_bins
            )));
        }
        if !(self.mse_scale.is_finite() && self.mse_scale > 0.0) {
            return Err(VisionError::InvalidConfig(
                "mse_scale must be positive".into(),
            ));
        }
        if !(self.canny_low >= 0.0 && self.canny_low <= self.canny_high) {
            return Err(VisionError::InvalidConfig(
                "canny thresholds must satisfy 0 <= low <= high".into(),
            ));
        }
        Ok(())
    }

    fn scaled_side(&self, scale: f32) -> u32 {
        (self.base_size as f32 * scale).round() as u32
    }
}

/// Per-method scores, each already averaged over all scales.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MethodScores {
    pub template: f64,
    pub histogram: f64,
    pub structural: f64,
    pub edge: f64,
    pub gradient: f64,
}

impl MethodScores {
    fn as_array(&self) -> [f64; 5] {
        [
            self.template,
            self.histogram,
            self.structural,
            self.edge,
            self.gradient,
        ]
    }

    fn accumulate(&mut self, other: &MethodScores) {
        self.template += other.template;
        self.histogram += other.histogram;
        self.structural += other.structural;
        self.edge += other.edge;
        self.gradient += other.gradient;
    }

    fn scaled(self, factor: f64) -> Self {
        Self {
            template: self.template * factor,
            histogram: self.histogram * factor,
            structural: self.structural * factor,
            edge: self.edge * factor,
            gradient: self.gradient * factor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PairScore {
    pub methods: MethodScores,
    pub fused: f64,
}

struct ScaleFeatures {
    pixels: Array2<f64>,
    histogram: Vec<f64>,
    edges: GrayImage,
    gradient: Array2<f64>,
}

/// A face resampled to every configured scale with its derived maps.
/// Built once per face and reused for every pair it takes part in.
pub struct PreparedFace {
    scales: Vec<ScaleFeatures>,
}

impl PreparedFace {
    pub fn scale_count(&self) -> usize {
        self.scales.len()
    }
}

/// Multi-resolution comparison of two faces fused into one score.
#[derive(Debug, Clone)]
pub struct PairScorer {
    config: SimilarityConfig,
}

impl PairScorer {
    pub fn new(config: SimilarityConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn prepare(&self, face: &FaceImage) -> Result<PreparedFace> {
        let min_side = self.config.min_face_side;
        if face.width() < min_side || face.height() < min_side {
            return Err(VisionError::TooSmall {
                width: face.width(),
                height: face.height(),
                min_side,
            });
        }

        let base = face.resized(self.config.base_size);
        let scales = self
            .config
            .scales
            .iter()
            .map(|&scale| {
                let gray = resize_square(&base, self.config.scaled_side(scale));
                ScaleFeatures {
                    pixels: to_array(&gray),
                    histogram: similarity::intensity_histogram(&gray, self.config.histogram_bins),
                    edges: similarity::edge_map(
                        &gray,
                        self.config.canny_low,
                        self.config.canny_high,
                    ),
                    gradient: similarity::gradient_magnitude(&gray),
                }
            })
            .collect();

        Ok(PreparedFace { scales })
    }

    pub fn score(&self, a: &PreparedFace, b: &PreparedFace) -> Result<PairScore> {
        if a.scales.len() != b.scales.len() {
            return Err(VisionError::LayoutMismatch(format!(
                "{} vs {} scales",
                a.scales.len(),
                b.scales.len()
            )));
        }
        if a.scales.is_empty() {
            return Err(VisionError::LayoutMismatch("no scales prepared".into()));
        }

        let mut sum = MethodScores::default();
        for (sa, sb) in a.scales.iter().zip(&b.scales) {
            if sa.pixels.dim() != sb.pixels.dim() {
                return Err(VisionError::LayoutMismatch(format!(
                    "{:?} vs {:?} pixels",
                    sa.pixels.dim(),
                    sb.pixels.dim()
                )));
            }
            sum.accumulate(&MethodScores {
                template: similarity::template_match(&sa.pixels, &sb.pixels),
                histogram: similarity::histogram_similarity(&sa.histogram, &sb.histogram),
                structural: similarity::structural_similarity(
                    &sa.pixels,
                    &sb.pixels,
                    self.config.mse_scale,
                ),
                edge: similarity::edge_similarity(&sa.edges, &sb.edges),
                gradient: similarity::gradient_similarity(&sa.gradient, &sb.gradient),
            });
        }

        let methods = sum.scaled(1.0 / a.scales.len() as f64);
        let fused = self.config.weights.fuse(&methods);
        log::trace!("pair score {fused:.4} from {methods:?}");
        Ok(PairScore { methods, fused })
    }

    pub fn compare(&self, a: &FaceImage, b: &FaceImage) -> Result<PairScore> {
        let a = self.prepare(a)?;
        let b = self.prepare(b)?;
        self.score(&a, &b)
    }
}

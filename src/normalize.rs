use serde::{Deserialize, Serialize};

use crate::constants::normalize::{CLIP_HIGH, CLIP_LOW};
use crate::distribution::Distributions;

/// Transformation applied to probabilistic features as they are written into a batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationStrategy {
    /// Values are copied unchanged.
    Raw,
    /// Subtract the per-property mean.
    #[default]
    Center,
    /// Subtract the per-property mean and divide by its RMS scale.
    Standardize,
    /// Clamp to the clip window, then stretch it back to [0, 1].
    Clip,
    /// Divide the whole vector by its Euclidean norm, optionally after centering.
    VectorNorm {
        /// Subtract the per-property mean before taking the norm.
        center: bool,
    },
}

/// Applies a [`NormalizationStrategy`] using statistics of the ingested corpus.
#[derive(Clone, Debug)]
pub struct PlattNormalizer {
    strategy: NormalizationStrategy,
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl PlattNormalizer {
    /// Precompute per-property statistics for `strategy`.
    pub fn new(strategy: NormalizationStrategy, distributions: &Distributions) -> Self {
        let (means, scales) = distributions
            .platt_statistics()
            .into_iter()
            .map(|stats| {
                let scale = if stats.scale > 0.0 { stats.scale } else { 1.0 };
                (stats.mean, scale)
            })
            .unzip();
        Self {
            strategy,
            means,
            scales,
        }
    }

    /// Strategy applied by this normalizer.
    pub fn strategy(&self) -> NormalizationStrategy {
        self.strategy
    }

    /// Normalize `values` into `out`; both must span the schema.
    pub fn write(&self, values: &[f64], out: &mut [f32]) {
        debug_assert_eq!(values.len(), out.len());
        match self.strategy {
            NormalizationStrategy::Raw => {
                for (slot, value) in out.iter_mut().zip(values) {
                    *slot = *value as f32;
                }
            }
            NormalizationStrategy::Center => {
                for ((slot, value), mean) in out.iter_mut().zip(values).zip(&self.means) {
                    *slot = (value - mean) as f32;
                }
            }
            NormalizationStrategy::Standardize => {
                for (index, (slot, value)) in out.iter_mut().zip(values).enumerate() {
                    *slot = ((value - self.means[index]) / self.scales[index]) as f32;
                }
            }
            NormalizationStrategy::Clip => {
                for (slot, value) in out.iter_mut().zip(values) {
                    *slot = clip(*value) as f32;
                }
            }
            NormalizationStrategy::VectorNorm { center } => {
                let shifted: Vec<f64> = values
                    .iter()
                    .zip(&self.means)
                    .map(|(value, mean)| if center { value - mean } else { *value })
                    .collect();
                let norm = shifted.iter().map(|v| v * v).sum::<f64>().sqrt();
                for (slot, value) in out.iter_mut().zip(&shifted) {
                    *slot = if norm > 0.0 { (value / norm) as f32 } else { 0.0 };
                }
            }
        }
    }

    /// Normalize one sampled fingerprint into a feature row.
    pub fn normalize(&self, values: &[f64]) -> Vec<f32> {
        let mut out = vec![0.0; values.len()];
        self.write(values, &mut out);
        out
    }
}

fn clip(value: f64) -> f64 {
    (value.clamp(CLIP_LOW, CLIP_HIGH) - CLIP_LOW) / (CLIP_HIGH - CLIP_LOW)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::{EmpiricalBucket, PropertyBuckets};

    fn distributions() -> Distributions {
        let property = |positive: Vec<f64>, negative: Vec<f64>| PropertyBuckets {
            positive: EmpiricalBucket::from_values(positive),
            negative: EmpiricalBucket::from_values(negative),
            ..PropertyBuckets::default()
        };
        Distributions::from_buckets(vec![
            property(vec![0.8], vec![0.4]),
            property(vec![], vec![]),
        ])
    }

    fn close(actual: &[f32], expected: &[f32]) -> bool {
        actual.iter().zip(expected).all(|(a, e)| (a - e).abs() < 1e-6)
    }

    #[test]
    fn center_and_standardize_use_corpus_statistics() {
        let dists = distributions();
        let center = PlattNormalizer::new(NormalizationStrategy::Center, &dists);
        assert!(close(&center.normalize(&[0.9, 0.3]), &[0.3, 0.3]));
        let standardize = PlattNormalizer::new(NormalizationStrategy::Standardize, &dists);
        let scale = (0.4f64).sqrt();
        assert!(close(
            &standardize.normalize(&[0.9, 0.3]),
            &[(0.3 / scale) as f32, 0.3]
        ));
    }

    #[test]
    fn clip_rescales_window() {
        let normalizer = PlattNormalizer::new(NormalizationStrategy::Clip, &distributions());
        assert!(close(&normalizer.normalize(&[0.1, 0.5]), &[0.0, 0.5]));
        assert!(close(&normalizer.normalize(&[0.95, 0.8]), &[1.0, 1.0]));
    }

    #[test]
    fn vector_norm_yields_unit_length() {
        let normalizer = PlattNormalizer::new(
            NormalizationStrategy::VectorNorm { center: false },
            &distributions(),
        );
        assert!(close(&normalizer.normalize(&[0.3, 0.4]), &[0.6, 0.8]));
        assert!(close(&normalizer.normalize(&[0.0, 0.0]), &[0.0, 0.0]));
    }
}

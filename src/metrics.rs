use crate::constants::distribution::DECISION_THRESHOLD;
use crate::fingerprint::{Fingerprint, ProbabilityFingerprint};

/// How far synthetic fingerprints stray from their ground truth.
#[derive(Clone, Debug, PartialEq)]
pub struct SamplingFidelity {
    /// Number of pairs summarized.
    pub samples: usize,
    /// Mean expectation-style Tanimoto between each sample and its truth.
    pub mean_soft_tanimoto: f64,
    /// Mean absolute difference between values and truth bits.
    pub mean_absolute_error: f64,
    /// Share of properties whose call disagrees with the truth bit.
    pub flip_rate: f64,
    /// Share of set truth bits called absent.
    pub miss_rate: f64,
}

/// Summarize `(truth, sample)` pairs; `None` when there are no properties to compare.
pub fn sampling_fidelity<'a, I>(pairs: I) -> Option<SamplingFidelity>
where
    I: IntoIterator<Item = (&'a Fingerprint, &'a ProbabilityFingerprint)>,
{
    let mut samples = 0usize;
    let mut soft_tanimoto = 0.0;
    let mut absolute_error = 0.0;
    let mut properties = 0usize;
    let mut flips = 0usize;
    let mut positives = 0usize;
    let mut misses = 0usize;
    for (truth, sample) in pairs {
        samples += 1;
        soft_tanimoto += sample.soft_tanimoto(truth);
        for (index, &value) in sample.as_slice().iter().enumerate() {
            let set = truth.is_set(index);
            let called = value >= DECISION_THRESHOLD;
            absolute_error += (value - if set { 1.0 } else { 0.0 }).abs();
            properties += 1;
            if called != set {
                flips += 1;
            }
            if set {
                positives += 1;
                if !called {
                    misses += 1;
                }
            }
        }
    }
    if properties == 0 {
        return None;
    }
    Some(SamplingFidelity {
        samples,
        mean_soft_tanimoto: soft_tanimoto / samples as f64,
        mean_absolute_error: absolute_error / properties as f64,
        flip_rate: flips as f64 / properties as f64,
        miss_rate: if positives == 0 {
            0.0
        } else {
            misses as f64 / positives as f64
        },
    })
}

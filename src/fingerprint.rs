use serde::{Deserialize, Serialize};

use crate::errors::SamplerError;
use crate::types::PropertyIndex;

const WORD_BITS: usize = 64;

/// Binary ground-truth fingerprint over a fixed property schema.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    len: usize,
    words: Vec<u64>,
}

impl Fingerprint {
    /// All-unset fingerprint of `len` properties.
    pub fn empty(len: usize) -> Self {
        Self {
            len,
            words: vec![0; len.div_ceil(WORD_BITS)],
        }
    }

    /// Build from one boolean per property.
    pub fn from_bools(bits: &[bool]) -> Self {
        let mut fp = Self::empty(bits.len());
        for (index, bit) in bits.iter().enumerate() {
            if *bit {
                fp.set(index, true);
            }
        }
        fp
    }

    /// Build from the indices of set properties.
    pub fn from_indices(len: usize, indices: &[PropertyIndex]) -> Result<Self, SamplerError> {
        let mut fp = Self::empty(len);
        for &index in indices {
            if index >= len {
                return Err(SamplerError::SchemaMismatch {
                    expected: len,
                    found: index + 1,
                });
            }
            fp.set(index, true);
        }
        Ok(fp)
    }

    /// Parse a `0`/`1` string; `None` on any other character.
    pub fn parse_bits(bits: &str) -> Option<Self> {
        let bools = bits
            .chars()
            .map(|ch| match ch {
                '0' => Some(false),
                '1' => Some(true),
                _ => None,
            })
            .collect::<Option<Vec<bool>>>()?;
        Some(Self::from_bools(&bools))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether property `index` is present.
    pub fn is_set(&self, index: PropertyIndex) -> bool {
        debug_assert!(index < self.len);
        self.words[index / WORD_BITS] & (1u64 << (index % WORD_BITS)) != 0
    }

    /// Set or clear property `index`.
    pub fn set(&mut self, index: PropertyIndex, value: bool) {
        assert!(index < self.len, "property {index} outside schema of {}", self.len);
        let mask = 1u64 << (index % WORD_BITS);
        if value {
            self.words[index / WORD_BITS] |= mask;
        } else {
            self.words[index / WORD_BITS] &= !mask;
        }
    }

    /// Number of set properties.
    pub fn cardinality(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Number of properties set in both fingerprints.
    pub fn common_bits(&self, other: &Fingerprint) -> usize {
        self.words
            .iter()
            .zip(&other.words)
            .map(|(a, b)| (a & b).count_ones() as usize)
            .sum()
    }

    /// Jaccard overlap of the set properties. Two empty fingerprints score 1.
    pub fn tanimoto(&self, other: &Fingerprint) -> f64 {
        let common = self.common_bits(other);
        let union = self.cardinality() + other.cardinality() - common;
        if union == 0 {
            1.0
        } else {
            common as f64 / union as f64
        }
    }

    /// Indices of set properties in ascending order.
    pub fn ones(&self) -> impl Iterator<Item = PropertyIndex> + '_ {
        (0..self.len).filter(|&index| self.is_set(index))
    }

    /// One flag per property.
    pub fn to_bools(&self) -> Vec<bool> {
        (0..self.len).map(|index| self.is_set(index)).collect()
    }

    /// Noise-free probabilistic rendition: 1 for set properties, 0 otherwise.
    pub fn to_probabilistic(&self) -> ProbabilityFingerprint {
        ProbabilityFingerprint {
            values: (0..self.len)
                .map(|index| if self.is_set(index) { 1.0 } else { 0.0 })
                .collect(),
        }
    }

    pub(crate) fn ensure_len(&self, expected: usize) -> Result<(), SamplerError> {
        if self.len == expected {
            Ok(())
        } else {
            Err(SamplerError::SchemaMismatch {
                expected,
                found: self.len,
            })
        }
    }
}

/// Continuous per-property confidence vector with values in [0, 1].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityFingerprint {
    values: Vec<f64>,
}

impl ProbabilityFingerprint {
    /// Wrap values, rejecting NaN and anything outside [0, 1].
    pub fn new(values: Vec<f64>) -> Result<Self, SamplerError> {
        if let Some(index) = values
            .iter()
            .position(|value| !(0.0..=1.0).contains(value))
        {
            return Err(SamplerError::Configuration(format!(
                "probability {} at property {index} is outside [0, 1]",
                values[index]
            )));
        }
        Ok(Self { values })
    }

    /// Wrap freshly sampled values. Panics on unresolved entries.
    pub(crate) fn from_sampled(values: Vec<f64>) -> Self {
        if let Some(index) = values.iter().position(|value| value.is_nan()) {
            panic!("property {index} left unresolved after sampling");
        }
        debug_assert!(values.iter().all(|value| (0.0..=1.0).contains(value)));
        Self { values }
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the schema is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of property `index`.
    pub fn probability(&self, index: PropertyIndex) -> f64 {
        self.values[index]
    }

    /// All values in schema order.
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    /// Consume into the row-major storage.
    pub fn into_vec(self) -> Vec<f64> {
        self.values
    }

    /// Properties called present (probability at or above `threshold`).
    pub fn called(&self, threshold: f64) -> Fingerprint {
        let bools: Vec<bool> = self.values.iter().map(|value| *value >= threshold).collect();
        Fingerprint::from_bools(&bools)
    }

    /// Expectation-style Tanimoto against a binary fingerprint.
    pub fn soft_tanimoto(&self, truth: &Fingerprint) -> f64 {
        let mut intersection = 0.0;
        let mut mass = 0.0;
        for (index, value) in self.values.iter().enumerate() {
            mass += value;
            if truth.is_set(index) {
                intersection += value;
            }
        }
        let union = mass + truth.cardinality() as f64 - intersection;
        if union <= 0.0 { 1.0 } else { intersection / union }
    }
}

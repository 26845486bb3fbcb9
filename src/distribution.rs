use rand::Rng;

use crate::constants::distribution::{DECISION_THRESHOLD, PSEUDO_COUNTS};
use crate::errors::SamplerError;
use crate::fingerprint::{Fingerprint, ProbabilityFingerprint};
use crate::types::PropertyIndex;

/// Which observed outcome a bucket collects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Property present in the ground truth.
    Positive,
    /// Property absent in the ground truth.
    Negative,
    /// Present and called present.
    TruePositive,
    /// Absent but called present.
    FalsePositive,
    /// Absent and called absent.
    TrueNegative,
    /// Present but called absent.
    FalseNegative,
}

impl Outcome {
    /// Confusion outcome for a truth bit and a predicted call.
    pub fn confusion(truth: bool, called: bool) -> Self {
        match (truth, called) {
            (true, true) => Outcome::TruePositive,
            (true, false) => Outcome::FalseNegative,
            (false, true) => Outcome::FalsePositive,
            (false, false) => Outcome::TrueNegative,
        }
    }

    /// Marginal outcome for a truth bit.
    pub fn marginal(truth: bool) -> Self {
        if truth {
            Outcome::Positive
        } else {
            Outcome::Negative
        }
    }
}

/// Sorted sample of observed probabilities used for inverse-CDF style draws.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EmpiricalBucket {
    values: Vec<f64>,
}

impl EmpiricalBucket {
    /// Build from unsorted observations.
    pub fn from_values(mut values: Vec<f64>) -> Self {
        values.sort_by(f64::total_cmp);
        Self { values }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sorted observed values.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Sum of all values.
    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    /// Draw a value between two adjacent order statistics.
    ///
    /// Picks `k` uniformly from `[-1, n-1]` and interpolates uniformly between
    /// `values[k]` (0 when `k = -1`) and `values[k + 1]` (1 when `k = n - 1`).
    /// An empty bucket degenerates to a uniform draw on [0, 1].
    pub fn draw<R: Rng>(&self, rng: &mut R) -> f64 {
        let n = self.values.len();
        let slot = rng.random_range(0..=n);
        let q: f64 = rng.random();
        let start = if slot == 0 { 0.0 } else { self.values[slot - 1] };
        let end = if slot == n { 1.0 } else { self.values[slot] };
        start + (end - start) * q
    }

    /// Fraction of values at or below `x`.
    pub fn cdf(&self, x: f64) -> f64 {
        if self.values.is_empty() {
            return x.clamp(0.0, 1.0);
        }
        let below = self.values.partition_point(|value| *value <= x);
        below as f64 / self.values.len() as f64
    }
}

/// The six buckets of one property.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PropertyBuckets {
    /// Observed values where the property is present.
    pub positive: EmpiricalBucket,
    /// Observed values where the property is absent.
    pub negative: EmpiricalBucket,
    /// Present and called present.
    pub true_positive: EmpiricalBucket,
    /// Absent but called present.
    pub false_positive: EmpiricalBucket,
    /// Absent and called absent.
    pub true_negative: EmpiricalBucket,
    /// Present but called absent.
    pub false_negative: EmpiricalBucket,
}

impl PropertyBuckets {
    /// Bucket holding values of `outcome`.
    pub fn bucket(&self, outcome: Outcome) -> &EmpiricalBucket {
        match outcome {
            Outcome::Positive => &self.positive,
            Outcome::Negative => &self.negative,
            Outcome::TruePositive => &self.true_positive,
            Outcome::FalsePositive => &self.false_positive,
            Outcome::TrueNegative => &self.true_negative,
            Outcome::FalseNegative => &self.false_negative,
        }
    }

    /// Share of positives among all observations of this property.
    pub fn frequency(&self) -> f64 {
        let total = self.positive.len() + self.negative.len();
        if total == 0 {
            0.0
        } else {
            self.positive.len() as f64 / total as f64
        }
    }

    /// Recall and precision derived from the confusion bucket sizes.
    pub fn rates(&self) -> PropertyRates {
        let tp = self.true_positive.len() as f64;
        let fp = self.false_positive.len() as f64;
        let fn_ = self.false_negative.len() as f64;
        PropertyRates {
            recall: ratio(tp, tp + fn_),
            precision: ratio(tp, tp + fp),
        }
    }
}

/// Per-property confusion rates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PropertyRates {
    /// tp / (tp + fn), 0 when there are no positives.
    pub recall: f64,
    /// tp / (tp + fp), 0 when nothing was called.
    pub precision: f64,
}

/// Mean and root-mean-square of all observed values of one property.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlattStatistics {
    /// Mean of all observed values.
    pub mean: f64,
    /// Root mean square of the centered values.
    pub scale: f64,
}

/// Empirical buckets for every property of the schema. Immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct Distributions {
    properties: Vec<PropertyBuckets>,
    rates: Vec<PropertyRates>,
}

impl Distributions {
    /// Assemble from already-built buckets. No pseudo-counts are added.
    pub fn from_buckets(properties: Vec<PropertyBuckets>) -> Self {
        let rates = properties.iter().map(PropertyBuckets::rates).collect();
        Self { properties, rates }
    }

    /// Number of properties in the schema.
    pub fn schema_len(&self) -> usize {
        self.properties.len()
    }

    /// Buckets of one property. Panics outside the schema.
    pub fn property(&self, index: PropertyIndex) -> &PropertyBuckets {
        &self.properties[index]
    }

    /// Confusion rates of property `index`.
    pub fn rates(&self, index: PropertyIndex) -> PropertyRates {
        self.rates[index]
    }

    /// Draw for property `index` from the bucket of `outcome`.
    pub fn draw<R: Rng>(&self, index: PropertyIndex, outcome: Outcome, rng: &mut R) -> f64 {
        self.properties[index].bucket(outcome).draw(rng)
    }

    /// Draw from the positive or negative bucket matching the truth bit.
    pub fn draw_marginal<R: Rng>(&self, index: PropertyIndex, truth: bool, rng: &mut R) -> f64 {
        self.draw(index, Outcome::marginal(truth), rng)
    }

    /// Mean and RMS scale of every property over positive and negative values.
    pub fn platt_statistics(&self) -> Vec<PlattStatistics> {
        self.properties
            .iter()
            .map(|buckets| {
                let count = (buckets.positive.len() + buckets.negative.len()) as f64;
                if count == 0.0 {
                    return PlattStatistics {
                        mean: 0.0,
                        scale: 1.0,
                    };
                }
                let mean = (buckets.positive.sum() + buckets.negative.sum()) / count;
                let squares: f64 = buckets
                    .positive
                    .values()
                    .iter()
                    .chain(buckets.negative.values())
                    .map(|value| value * value)
                    .sum();
                PlattStatistics {
                    mean,
                    scale: (squares / count).sqrt(),
                }
            })
            .collect()
    }
}

/// Accumulates observations before buckets are frozen.
#[derive(Debug)]
pub struct DistributionBuilder {
    schema_len: usize,
    positive: Vec<Vec<f64>>,
    negative: Vec<Vec<f64>>,
    true_positive: Vec<Vec<f64>>,
    false_positive: Vec<Vec<f64>>,
    true_negative: Vec<Vec<f64>>,
    false_negative: Vec<Vec<f64>>,
}

impl DistributionBuilder {
    /// Empty builder with six buckets per property.
    pub fn new(schema_len: usize) -> Self {
        Self {
            schema_len,
            positive: vec![Vec::new(); schema_len],
            negative: vec![Vec::new(); schema_len],
            true_positive: vec![Vec::new(); schema_len],
            false_positive: vec![Vec::new(); schema_len],
            true_negative: vec![Vec::new(); schema_len],
            false_negative: vec![Vec::new(); schema_len],
        }
    }

    /// Record one truth/prediction pair into the marginal and confusion buckets.
    pub fn observe(
        &mut self,
        truth: &Fingerprint,
        predicted: &ProbabilityFingerprint,
    ) -> Result<(), SamplerError> {
        truth.ensure_len(self.schema_len)?;
        if predicted.len() != self.schema_len {
            return Err(SamplerError::SchemaMismatch {
                expected: self.schema_len,
                found: predicted.len(),
            });
        }
        for (index, &value) in predicted.as_slice().iter().enumerate() {
            let set = truth.is_set(index);
            if set {
                self.positive[index].push(value);
            } else {
                self.negative[index].push(value);
            }
            let target = match Outcome::confusion(set, value >= DECISION_THRESHOLD) {
                Outcome::TruePositive => &mut self.true_positive,
                Outcome::FalsePositive => &mut self.false_positive,
                Outcome::TrueNegative => &mut self.true_negative,
                _ => &mut self.false_negative,
            };
            target[index].push(value);
        }
        Ok(())
    }

    /// Add pseudo-counts, sort every bucket, and compute rates.
    pub fn build(self) -> Distributions {
        let Self {
            mut positive,
            negative,
            true_positive,
            false_positive,
            true_negative,
            mut false_negative,
            ..
        } = self;
        for values in positive.iter_mut().chain(false_negative.iter_mut()) {
            values.extend_from_slice(&PSEUDO_COUNTS);
        }
        let properties = positive
            .into_iter()
            .zip(negative)
            .zip(true_positive)
            .zip(false_positive)
            .zip(true_negative)
            .zip(false_negative)
            .map(|(((((pos, neg), tp), fp), tn), fn_)| PropertyBuckets {
                positive: EmpiricalBucket::from_values(pos),
                negative: EmpiricalBucket::from_values(neg),
                true_positive: EmpiricalBucket::from_values(tp),
                false_positive: EmpiricalBucket::from_values(fp),
                true_negative: EmpiricalBucket::from_values(tn),
                false_negative: EmpiricalBucket::from_values(fn_),
            })
            .collect();
        Distributions::from_buckets(properties)
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

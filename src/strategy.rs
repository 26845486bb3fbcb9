use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::constants::strategy::WARMUP_ITERATIONS;
use crate::errors::SamplerError;
use crate::fingerprint::{Fingerprint, ProbabilityFingerprint};
use crate::sampler::FingerprintSampler;
use crate::types::Iteration;

/// How one training row's probabilistic features are produced from its truth.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingStrategy {
    /// Independent per-property draws.
    Independent,
    /// Independent draws with occasional false-positive values on set properties.
    IndependentNoisy,
    /// The truth itself rendered as 0/1 probabilities.
    Perfect,
    /// Error patterns borrowed from similar observed structures.
    Template,
    /// Template sampling plus simulated misses and copied false positives.
    TemplateNoisy,
    /// Correlated draws along the covariance tree.
    Conditional,
}

impl SamplingStrategy {
    /// Produce one probabilistic fingerprint for `truth` with this strategy.
    pub fn sample<R: Rng>(
        self,
        sampler: &FingerprintSampler,
        truth: &Fingerprint,
        rng: &mut R,
    ) -> Result<ProbabilityFingerprint, SamplerError> {
        match self {
            SamplingStrategy::Independent => sampler.sample_independently(truth, false, rng),
            SamplingStrategy::IndependentNoisy => sampler.sample_independently(truth, true, rng),
            SamplingStrategy::Perfect => {
                truth.ensure_len(sampler.schema_len())?;
                Ok(truth.to_probabilistic())
            }
            SamplingStrategy::Template => sampler.sample(truth, false, rng),
            SamplingStrategy::TemplateNoisy => sampler.sample(truth, true, rng),
            SamplingStrategy::Conditional => sampler.sample_from_covariance(truth, rng),
        }
    }
}

/// Strategy assignment used by batch synthesis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyMode {
    /// The iteration-dependent mix of [`StrategySchedule`].
    #[default]
    Scheduled,
    /// Every row uses the same strategy.
    Fixed(SamplingStrategy),
}

/// Shuffled list of strategies for one iteration; row `n` uses entry `n % len`.
#[derive(Clone, Debug, PartialEq)]
pub struct StrategySchedule {
    strategies: Vec<SamplingStrategy>,
}

impl StrategySchedule {
    /// Early iterations favor independent and clean rows; later ones lean on templates.
    pub fn for_iteration<R: Rng>(iteration: Iteration, rng: &mut R) -> Self {
        let mix: &[(SamplingStrategy, usize)] = if iteration < WARMUP_ITERATIONS {
            &[
                (SamplingStrategy::Independent, 66),
                (SamplingStrategy::Template, 24),
                (SamplingStrategy::Perfect, 10),
            ]
        } else {
            &[
                (SamplingStrategy::Independent, 70),
                (SamplingStrategy::IndependentNoisy, 10),
                (SamplingStrategy::Template, 100),
                (SamplingStrategy::TemplateNoisy, 19),
                (SamplingStrategy::Perfect, 1),
            ]
        };
        let mut strategies: Vec<SamplingStrategy> = mix
            .iter()
            .flat_map(|&(strategy, count)| std::iter::repeat_n(strategy, count))
            .collect();
        strategies.shuffle(rng);
        Self { strategies }
    }

    /// Schedule for `iteration`, shuffled with `rng`.
    pub fn from_mode<R: Rng>(mode: StrategyMode, iteration: Iteration, rng: &mut R) -> Self {
        match mode {
            StrategyMode::Scheduled => Self::for_iteration(iteration, rng),
            StrategyMode::Fixed(strategy) => Self {
                strategies: vec![strategy],
            },
        }
    }

    /// Strategy of batch row `row`.
    pub fn get(&self, row: usize) -> SamplingStrategy {
        self.strategies[row % self.strategies.len()]
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// How many entries use `strategy`.
    pub fn count(&self, strategy: SamplingStrategy) -> usize {
        self.strategies.iter().filter(|s| **s == strategy).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn warmup_mix_has_exact_counts() {
        let mut rng = StdRng::seed_from_u64(3);
        let schedule = StrategySchedule::for_iteration(0, &mut rng);
        assert_eq!(schedule.len(), 100);
        assert_eq!(schedule.count(SamplingStrategy::Independent), 66);
        assert_eq!(schedule.count(SamplingStrategy::Template), 24);
        assert_eq!(schedule.count(SamplingStrategy::Perfect), 10);
        assert_eq!(schedule.count(SamplingStrategy::TemplateNoisy), 0);
    }

    #[test]
    fn full_mix_starts_at_warmup_boundary() {
        let mut rng = StdRng::seed_from_u64(3);
        let schedule = StrategySchedule::for_iteration(WARMUP_ITERATIONS, &mut rng);
        assert_eq!(schedule.len(), 200);
        assert_eq!(schedule.count(SamplingStrategy::Independent), 70);
        assert_eq!(schedule.count(SamplingStrategy::IndependentNoisy), 10);
        assert_eq!(schedule.count(SamplingStrategy::Template), 100);
        assert_eq!(schedule.count(SamplingStrategy::TemplateNoisy), 19);
        assert_eq!(schedule.count(SamplingStrategy::Perfect), 1);
    }

    #[test]
    fn fixed_mode_repeats_one_strategy() {
        let mut rng = StdRng::seed_from_u64(3);
        let schedule = StrategySchedule::from_mode(
            StrategyMode::Fixed(SamplingStrategy::Conditional),
            500,
            &mut rng,
        );
        assert_eq!(schedule.get(0), SamplingStrategy::Conditional);
        assert_eq!(schedule.get(17), SamplingStrategy::Conditional);
    }

    #[test]
    fn mode_serializes_in_snake_case() {
        let json = serde_json::to_string(&StrategyMode::Fixed(SamplingStrategy::TemplateNoisy)).unwrap();
        assert_eq!(json, r#"{"fixed":"template_noisy"}"#);
        let mode: StrategyMode = serde_json::from_str(r#""scheduled""#).unwrap();
        assert_eq!(mode, StrategyMode::Scheduled);
    }
}

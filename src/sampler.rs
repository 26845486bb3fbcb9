use std::cmp::Reverse;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, info};

use crate::config::SamplerConfig;
use crate::constants::distribution::DECISION_THRESHOLD;
use crate::constants::noise::{INDEPENDENT_FP_PROBABILITY, RECALL_FREQUENCY_SATURATION};
use crate::constants::template::{
    CANDIDATE_STOP_PROBABILITY, MAX_CANDIDATES, MAX_NOISE_SIMILARITY, MIN_ROUND_SIMILARITY,
    MIN_UNRESOLVED_BITS, NOISE_CANDIDATE_ROUNDS, NOISE_CANDIDATES_PER_ROUND, REFINEMENT_ROUNDS,
    SELF_MATCH_SIMILARITY, SIMILARITY_STEPS,
};
use crate::covariance::{CovarianceTree, read_edges};
use crate::distribution::{DistributionBuilder, Distributions, Outcome, PropertyRates};
use crate::errors::SamplerError;
use crate::fingerprint::{Fingerprint, ProbabilityFingerprint};
use crate::templates::{Candidate, OverlapRatio, Tanimoto, TemplateIndex};
use crate::types::{PropertyIndex, RecordId};
use crate::validation::{RecordFilter, ValidationRecord, read_records};

/// One ingested upstream prediction.
#[derive(Clone, Debug)]
pub struct Observation {
    /// Record identifier.
    pub id: RecordId,
    /// Index of the template holding this observation's ground truth.
    pub template: usize,
    /// Upstream prediction for this record.
    pub predicted: ProbabilityFingerprint,
}

/// Turns ground-truth fingerprints into synthetic probabilistic ones that
/// carry the upstream classifier's error statistics.
///
/// Everything is built once at ingest and read-only afterwards, so a sampler
/// can be shared behind an `Arc` by any number of threads. Each call takes its
/// own random source.
#[derive(Debug)]
pub struct FingerprintSampler {
    schema_len: usize,
    distributions: Distributions,
    templates: TemplateIndex,
    observations: Vec<Observation>,
    covariance: Option<CovarianceTree>,
}

impl FingerprintSampler {
    /// Ingest already-parsed records.
    pub fn from_records<I>(schema_len: usize, records: I) -> Result<Self, SamplerError>
    where
        I: IntoIterator<Item = ValidationRecord>,
    {
        let mut builder = DistributionBuilder::new(schema_len);
        let mut templates = TemplateIndex::new();
        let mut observations = Vec::new();
        for record in records {
            builder.observe(&record.truth, &record.predicted)?;
            let template = templates.insert(&record.key, &record.truth, observations.len())?;
            observations.push(Observation {
                id: record.id,
                template,
                predicted: record.predicted,
            });
        }
        let distributions = builder.build();
        info!(
            records = observations.len(),
            templates = templates.len(),
            properties = schema_len,
            "ingested validation records"
        );
        Ok(Self {
            schema_len,
            distributions,
            templates,
            observations,
            covariance: None,
        })
    }

    /// Parse and ingest records from a reader.
    pub fn from_reader<R: BufRead>(
        reader: R,
        schema_len: usize,
        config: &SamplerConfig,
    ) -> Result<Self, SamplerError> {
        let filter = RecordFilter::from_config(config)?;
        let records = read_records(reader, schema_len, &filter)?;
        Self::from_records(schema_len, records)
    }

    /// Parse and ingest a validation record file.
    pub fn from_path(
        path: impl AsRef<Path>,
        schema_len: usize,
        config: &SamplerConfig,
    ) -> Result<Self, SamplerError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "reading validation records");
        let reader = BufReader::new(File::open(path)?);
        Self::from_reader(reader, schema_len, config)
    }

    /// Build the covariance tree from `(parent, child)` edges over this sampler's corpus.
    pub fn build_covariance_tree(
        &mut self,
        edges: &[(PropertyIndex, PropertyIndex)],
    ) -> Result<(), SamplerError> {
        let tree = CovarianceTree::build(edges, self.schema_len, self.corpus())?;
        self.covariance = Some(tree);
        Ok(())
    }

    /// Build the covariance tree from an edge-list file.
    pub fn build_covariance_tree_from_path(
        &mut self,
        path: impl AsRef<Path>,
    ) -> Result<(), SamplerError> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let edges = read_edges(reader)?;
        self.build_covariance_tree(&edges)
    }

    /// Number of properties in the schema.
    pub fn schema_len(&self) -> usize {
        self.schema_len
    }

    /// Per-property value buckets.
    pub fn distributions(&self) -> &Distributions {
        &self.distributions
    }

    /// Template index built at ingest.
    pub fn templates(&self) -> &TemplateIndex {
        &self.templates
    }

    /// Observations in ingest order.
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// Covariance tree, once built.
    pub fn covariance_tree(&self) -> Option<&CovarianceTree> {
        self.covariance.as_ref()
    }

    /// Recall and precision of one property.
    pub fn rates(&self, index: PropertyIndex) -> PropertyRates {
        self.distributions.rates(index)
    }

    /// Ground truth paired with every observed prediction.
    pub fn corpus(&self) -> impl Iterator<Item = (&Fingerprint, &ProbabilityFingerprint)> {
        self.observations.iter().filter_map(|observation| {
            self.templates
                .get(observation.template)
                .map(|entry| (&entry.truth, &observation.predicted))
        })
    }

    /// Draw every property independently from its positive or negative bucket.
    ///
    /// With `noisy`, a set property draws from the false-positive bucket with a
    /// small fixed probability instead.
    pub fn sample_independently<R: Rng>(
        &self,
        truth: &Fingerprint,
        noisy: bool,
        rng: &mut R,
    ) -> Result<ProbabilityFingerprint, SamplerError> {
        truth.ensure_len(self.schema_len)?;
        let sampled = (0..self.schema_len)
            .map(|index| {
                if !truth.is_set(index) {
                    self.distributions.draw(index, Outcome::Negative, rng)
                } else if noisy && rng.random::<f64>() < INDEPENDENT_FP_PROBABILITY {
                    self.distributions.draw(index, Outcome::FalsePositive, rng)
                } else {
                    self.distributions.draw(index, Outcome::Positive, rng)
                }
            })
            .collect();
        Ok(ProbabilityFingerprint::from_sampled(sampled))
    }

    /// Borrow error patterns from the most similar observed structures.
    ///
    /// Each round picks a near template, replays the confusion outcome of one of
    /// its recorded predictions on every property where the template's truth
    /// agrees with the query, and narrows the query to the set properties still
    /// unresolved. Whatever stays unresolved falls back to independent draws.
    pub fn sample<R: Rng>(
        &self,
        truth: &Fingerprint,
        noisy: bool,
        rng: &mut R,
    ) -> Result<ProbabilityFingerprint, SamplerError> {
        truth.ensure_len(self.schema_len)?;
        let mut sampled = vec![f64::NAN; self.schema_len];
        let mut donors: Vec<Candidate> = Vec::new();

        let mut query = self.template_round(truth, &mut sampled, 0, Some(&mut donors), rng);
        for round in 1..=REFINEMENT_ROUNDS {
            let Some(current) = query.take().filter(worth_refining) else {
                break;
            };
            let round_donors = donates_noise(round).then_some(&mut donors);
            query = self.template_round(&current, &mut sampled, round, round_donors, rng);
        }

        for (index, value) in sampled.iter_mut().enumerate() {
            let set = truth.is_set(index);
            if value.is_nan() {
                *value = self.distributions.draw_marginal(index, set, rng);
            }
            if noisy && set && *value >= DECISION_THRESHOLD {
                let simulated = self.simulated_recall(index);
                if rng.random::<f64>() > simulated {
                    *value = self.distributions.draw(index, Outcome::FalseNegative, rng);
                }
            }
        }

        if noisy {
            self.inject_false_positives(truth, &mut donors, &mut sampled, rng);
        }
        Ok(ProbabilityFingerprint::from_sampled(sampled))
    }

    /// Draw a correlated fingerprint from the covariance tree.
    pub fn sample_from_covariance<R: Rng>(
        &self,
        truth: &Fingerprint,
        rng: &mut R,
    ) -> Result<ProbabilityFingerprint, SamplerError> {
        truth.ensure_len(self.schema_len)?;
        let tree = self
            .covariance
            .as_ref()
            .ok_or(SamplerError::MissingCovarianceTree)?;
        Ok(ProbabilityFingerprint::from_sampled(tree.draw(
            &self.distributions,
            truth,
            rng,
        )))
    }

    /// One search-and-resolve round. Returns the narrowed query, or `None`
    /// when no usable template was found.
    fn template_round<R: Rng>(
        &self,
        query: &Fingerprint,
        sampled: &mut [f64],
        round: usize,
        donors: Option<&mut Vec<Candidate>>,
        rng: &mut R,
    ) -> Option<Fingerprint> {
        let mut ranked = if round == 0 {
            self.templates
                .nearest(query, &Tanimoto, MAX_CANDIDATES, SELF_MATCH_SIMILARITY)
        } else {
            self.templates
                .nearest(query, &OverlapRatio, MAX_CANDIDATES, SELF_MATCH_SIMILARITY)
        };
        if ranked.is_empty() {
            return None;
        }
        ranked.shuffle(rng);
        ranked.sort_by_key(|candidate| Reverse(similarity_step(candidate.score)));
        if let Some(donors) = donors {
            donors.extend(ranked.iter().take(NOISE_CANDIDATES_PER_ROUND).copied());
        }
        if ranked[0].score < MIN_ROUND_SIMILARITY {
            return None;
        }

        let chosen = soft_greedy_pick(&ranked, rng)?;
        let entry = self.templates.get(chosen.template)?;
        let picked = entry.observations[rng.random_range(0..entry.observations.len())];
        let predicted = &self.observations[picked].predicted;

        let mut unresolved = query.clone();
        for (index, value) in sampled.iter_mut().enumerate() {
            if !value.is_nan() {
                continue;
            }
            let set = query.is_set(index);
            if set != entry.truth.is_set(index) {
                continue;
            }
            let called = predicted.probability(index) >= DECISION_THRESHOLD;
            *value = self
                .distributions
                .draw(index, Outcome::confusion(set, called), rng);
            if set {
                unresolved.set(index, false);
            }
        }
        Some(unresolved)
    }

    /// Harmonic blend of a saturating class-frequency term and the measured recall.
    fn simulated_recall(&self, index: PropertyIndex) -> f64 {
        let frequency = self.distributions.property(index).frequency();
        let saturation = (frequency / RECALL_FREQUENCY_SATURATION).min(1.0);
        let recall = self.distributions.rates(index).recall;
        let denominator = saturation + recall;
        if denominator == 0.0 {
            1.0
        } else {
            2.0 * saturation * recall / denominator
        }
    }

    /// Copy a near structure's extra properties in as false positives, each
    /// with probability `1 - precision`.
    fn inject_false_positives<R: Rng>(
        &self,
        truth: &Fingerprint,
        donors: &mut [Candidate],
        sampled: &mut [f64],
        rng: &mut R,
    ) {
        donors.sort_by(|a, b| b.score.total_cmp(&a.score));
        let mut chosen = None;
        for donor in donors.iter() {
            chosen = Some(*donor);
            if donor.score >= MAX_NOISE_SIMILARITY {
                continue;
            }
            if rng.random::<f64>() < donor.score {
                break;
            }
        }
        let Some(entry) = chosen.and_then(|donor| self.templates.get(donor.template)) else {
            return;
        };
        for index in entry.truth.ones() {
            if truth.is_set(index) {
                continue;
            }
            if rng.random::<f64>() > self.distributions.rates(index).precision {
                sampled[index] = self.distributions.draw(index, Outcome::FalsePositive, rng);
            }
        }
    }
}

/// Another refinement round runs only while enough set bits remain unresolved.
fn worth_refining(query: &Fingerprint) -> bool {
    query.cardinality() >= MIN_UNRESOLVED_BITS
}

/// Whether candidates of `round` join the false-positive donor pool.
fn donates_noise(round: usize) -> bool {
    round < NOISE_CANDIDATE_ROUNDS
}

fn similarity_step(score: f64) -> i64 {
    (score * SIMILARITY_STEPS) as i64
}

/// Walk the ranked list, stopping at each candidate with a fixed probability;
/// the last candidate is taken when none stops the walk.
fn soft_greedy_pick<R: Rng>(ranked: &[Candidate], rng: &mut R) -> Option<Candidate> {
    let mut chosen = None;
    for candidate in ranked {
        chosen = Some(*candidate);
        if rng.random::<f64>() < CANDIDATE_STOP_PROBABILITY {
            break;
        }
    }
    chosen
}

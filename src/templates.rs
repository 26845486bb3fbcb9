use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use indexmap::IndexMap;
use indexmap::map::Entry;

use crate::errors::SamplerError;
use crate::fingerprint::Fingerprint;
use crate::types::StructureKey;

/// Set-overlap score between a query and a template truth.
pub trait Similarity {
    /// Similarity of `template` to `query`; higher is closer.
    fn score(&self, query: &Fingerprint, template: &Fingerprint) -> f64;
}

/// Jaccard overlap; used for the first search round.
#[derive(Clone, Copy, Debug, Default)]
pub struct Tanimoto;

impl Similarity for Tanimoto {
    fn score(&self, query: &Fingerprint, template: &Fingerprint) -> f64 {
        template.tanimoto(query)
    }
}

/// Common bits over the geometric mean of both cardinalities; used for refinement rounds.
///
/// Undefined (NaN) when either side is empty.
#[derive(Clone, Copy, Debug, Default)]
pub struct OverlapRatio;

impl Similarity for OverlapRatio {
    fn score(&self, query: &Fingerprint, template: &Fingerprint) -> f64 {
        let denominator = (template.cardinality() as f64 * query.cardinality() as f64).sqrt();
        query.common_bits(template) as f64 / denominator
    }
}

/// Canonical truth of one structure plus every observation measured for it.
#[derive(Clone, Debug)]
pub struct TemplateEntry {
    /// Structure key.
    pub key: StructureKey,
    /// Ground-truth fingerprint.
    pub truth: Fingerprint,
    /// Indices into the sampler's observation list.
    pub observations: Vec<usize>,
}

/// A template scored against a query.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    /// Index of the template in insertion order.
    pub template: usize,
    /// Similarity to the query.
    pub score: f64,
}

#[derive(Clone, Copy, Debug)]
struct Ranked(Candidate);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .score
            .total_cmp(&other.0.score)
            .then_with(|| other.0.template.cmp(&self.0.template))
    }
}

/// Templates keyed by structure, in first-seen order.
#[derive(Clone, Debug, Default)]
pub struct TemplateIndex {
    entries: IndexMap<StructureKey, TemplateEntry>,
}

impl TemplateIndex {
    /// Empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observation; duplicates must carry identical truth.
    pub fn insert(
        &mut self,
        key: &str,
        truth: &Fingerprint,
        observation: usize,
    ) -> Result<usize, SamplerError> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().truth != *truth {
                    return Err(SamplerError::InconsistentTemplate {
                        key: key.to_string(),
                    });
                }
                let index = occupied.index();
                occupied.get_mut().observations.push(observation);
                Ok(index)
            }
            Entry::Vacant(vacant) => {
                let index = vacant.index();
                vacant.insert(TemplateEntry {
                    key: key.to_string(),
                    truth: truth.clone(),
                    observations: vec![observation],
                });
                Ok(index)
            }
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Template at insertion index `template`.
    pub fn get(&self, template: usize) -> Option<&TemplateEntry> {
        self.entries.get_index(template).map(|(_, entry)| entry)
    }

    /// Template for structure `key`.
    pub fn by_key(&self, key: &str) -> Option<&TemplateEntry> {
        self.entries.get(key)
    }

    /// Templates in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &TemplateEntry> {
        self.entries.values()
    }

    /// Up to `capacity` best-scoring templates strictly below `ceiling`.
    ///
    /// Keeps a bounded min-heap of the current best; once full, its minimum
    /// becomes the admission threshold. Templates with an undefined (NaN)
    /// score are never admitted. Result order is unspecified.
    pub fn nearest<S: Similarity>(
        &self,
        query: &Fingerprint,
        similarity: &S,
        capacity: usize,
        ceiling: f64,
    ) -> Vec<Candidate> {
        if capacity == 0 {
            return Vec::new();
        }
        let mut heap: BinaryHeap<Reverse<Ranked>> = BinaryHeap::with_capacity(capacity + 1);
        let mut threshold = f64::NEG_INFINITY;
        for (template, entry) in self.entries.values().enumerate() {
            let score = similarity.score(query, &entry.truth);
            if score.is_nan() || score >= ceiling || score <= threshold {
                continue;
            }
            heap.push(Reverse(Ranked(Candidate { template, score })));
            if heap.len() > capacity {
                heap.pop();
                if let Some(Reverse(Ranked(lowest))) = heap.peek() {
                    threshold = lowest.score;
                }
            }
        }
        heap.into_iter().map(|Reverse(Ranked(c))| c).collect()
    }
}

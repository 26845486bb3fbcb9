//! Tree-structured conditional sampler.
//!
//! Every edge carries the soft confusion statistics of its child, computed once
//! over the training corpus: one aggregate weighted by the parent's observed
//! probability and one weighted by its complement. A draw walks the tree from
//! the root and blends the two aggregates by the parent's freshly drawn value.

use std::io::BufRead;

use rand::Rng;
use tracing::{debug, warn};

use crate::constants::covariance::{EDGE_SEPARATORS, EMPTY_RATE, EXTREME_SNAP};
use crate::constants::validation::COMMENT_PREFIX;
use crate::distribution::{Distributions, Outcome};
use crate::errors::SamplerError;
use crate::fingerprint::{Fingerprint, ProbabilityFingerprint};
use crate::types::PropertyIndex;

/// Soft confusion counts of a child property.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ConfusionAggregate {
    /// Soft count of present and called present.
    pub true_positive: f64,
    /// Soft count of absent but called present.
    pub false_positive: f64,
    /// Soft count of absent and called absent.
    pub true_negative: f64,
    /// Soft count of present but called absent.
    pub false_negative: f64,
}

impl ConfusionAggregate {
    fn accumulate(&mut self, weight: f64, truth: bool, value: f64) {
        if truth {
            self.true_positive += weight * value;
            self.false_negative += weight * (1.0 - value);
        } else {
            self.false_positive += weight * value;
            self.true_negative += weight * (1.0 - value);
        }
    }

    /// Soft recall; 0.5 without positive mass.
    pub fn recall(&self) -> f64 {
        rate(self.true_positive, self.true_positive + self.false_negative)
    }

    /// Soft specificity; 0.5 without negative mass.
    pub fn specificity(&self) -> f64 {
        rate(self.true_negative, self.true_negative + self.false_positive)
    }
}

fn rate(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        EMPTY_RATE
    }
}

/// Parent to child link with its two cached aggregates.
#[derive(Clone, Debug, PartialEq)]
pub struct CovarianceEdge {
    /// Parent property.
    pub parent: PropertyIndex,
    /// Child property.
    pub child: PropertyIndex,
    /// Child outcomes weighted by the parent being called present.
    pub parent_present: ConfusionAggregate,
    /// Child outcomes weighted by the parent being called absent.
    pub parent_absent: ConfusionAggregate,
}

impl CovarianceEdge {
    /// Probability of drawing the "correct" outcome (tp for a set child, tn for
    /// an unset one) given the parent's drawn probability.
    pub fn blended_rate(&self, parent_value: f64, truth: bool) -> f64 {
        let q = snap_extreme(parent_value);
        if truth {
            q * self.parent_present.recall() + (1.0 - q) * self.parent_absent.recall()
        } else {
            q * self.parent_present.specificity() + (1.0 - q) * self.parent_absent.specificity()
        }
    }
}

/// Round a probability to 0 or 1 when it lies within the snap margin of either.
pub fn snap_extreme(value: f64) -> f64 {
    if value <= EXTREME_SNAP {
        0.0
    } else if value >= 1.0 - EXTREME_SNAP {
        1.0
    } else {
        value
    }
}

/// Directed tree over schema properties, each edge carrying conditional confusion rates.
#[derive(Debug)]
pub struct CovarianceTree {
    schema_len: usize,
    root: PropertyIndex,
    edges: Vec<CovarianceEdge>,
    /// Outgoing edge indices per property, in edge-list order.
    children: Vec<Vec<usize>>,
    /// Incoming edge index per property.
    incoming: Vec<Option<usize>>,
}

impl CovarianceTree {
    /// Validate the edge list and compute every edge's aggregates over `corpus`.
    pub fn build<'a, I>(
        edges: &[(PropertyIndex, PropertyIndex)],
        schema_len: usize,
        corpus: I,
    ) -> Result<Self, SamplerError>
    where
        I: IntoIterator<Item = (&'a Fingerprint, &'a ProbabilityFingerprint)>,
    {
        let mut incoming: Vec<Option<usize>> = vec![None; schema_len];
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); schema_len];
        let mut mentioned = vec![false; schema_len];
        for (edge_index, &(parent, child)) in edges.iter().enumerate() {
            if parent >= schema_len || child >= schema_len {
                return Err(SamplerError::Covariance(format!(
                    "edge {parent} -> {child} is outside the schema of {schema_len} properties"
                )));
            }
            if parent == child {
                return Err(SamplerError::Covariance(format!(
                    "property {parent} cannot be its own parent"
                )));
            }
            if let Some(existing) = incoming[child] {
                return Err(SamplerError::Covariance(format!(
                    "property {child} has two parents: {} and {parent}",
                    edges[existing].0
                )));
            }
            incoming[child] = Some(edge_index);
            children[parent].push(edge_index);
            mentioned[parent] = true;
            mentioned[child] = true;
        }

        let roots: Vec<PropertyIndex> = (0..schema_len)
            .filter(|&index| mentioned[index] && incoming[index].is_none())
            .collect();
        let Some(&root) = roots.first() else {
            return Err(SamplerError::Covariance(
                "edge list has no root property".into(),
            ));
        };
        if roots.len() > 1 {
            warn!(?roots, kept = root, "covariance tree has several roots; keeping the first");
        }

        let mut aggregates = vec![
            (ConfusionAggregate::default(), ConfusionAggregate::default());
            edges.len()
        ];
        let mut points = 0usize;
        for (truth, predicted) in corpus {
            truth.ensure_len(schema_len)?;
            if predicted.len() != schema_len {
                return Err(SamplerError::SchemaMismatch {
                    expected: schema_len,
                    found: predicted.len(),
                });
            }
            for (&(parent, child), (present, absent)) in edges.iter().zip(aggregates.iter_mut()) {
                let weight = predicted.probability(parent);
                let value = predicted.probability(child);
                let set = truth.is_set(child);
                present.accumulate(weight, set, value);
                absent.accumulate(1.0 - weight, set, value);
            }
            points += 1;
        }

        let edges = edges
            .iter()
            .zip(aggregates)
            .map(|(&(parent, child), (parent_present, parent_absent))| CovarianceEdge {
                parent,
                child,
                parent_present,
                parent_absent,
            })
            .collect::<Vec<_>>();
        debug!(root, edges = edges.len(), points, "built covariance tree");
        Ok(Self {
            schema_len,
            root,
            edges,
            children,
            incoming,
        })
    }

    /// Property the draw starts from.
    pub fn root(&self) -> PropertyIndex {
        self.root
    }

    /// Edges in the order they were given.
    pub fn edges(&self) -> &[CovarianceEdge] {
        &self.edges
    }

    /// The edge feeding `child`, if any.
    pub fn parent_edge(&self, child: PropertyIndex) -> Option<&CovarianceEdge> {
        self.incoming
            .get(child)
            .copied()
            .flatten()
            .map(|edge| &self.edges[edge])
    }

    /// Draw one value per property, parents before children.
    ///
    /// Properties outside the root's subtree are drawn independently from their
    /// positive/negative buckets, in index order, after the traversal.
    pub fn draw<R: Rng>(
        &self,
        distributions: &Distributions,
        truth: &Fingerprint,
        rng: &mut R,
    ) -> Vec<f64> {
        let mut values = vec![f64::NAN; self.schema_len];
        values[self.root] = distributions.draw_marginal(self.root, truth.is_set(self.root), rng);

        let mut stack: Vec<usize> = self.children[self.root].iter().rev().copied().collect();
        while let Some(edge_index) = stack.pop() {
            let edge = &self.edges[edge_index];
            let set = truth.is_set(edge.child);
            let hit = rng.random::<f64>() < edge.blended_rate(values[edge.parent], set);
            let outcome = match (set, hit) {
                (true, true) => Outcome::TruePositive,
                (true, false) => Outcome::FalseNegative,
                (false, true) => Outcome::TrueNegative,
                (false, false) => Outcome::FalsePositive,
            };
            values[edge.child] = distributions.draw(edge.child, outcome, rng);
            stack.extend(self.children[edge.child].iter().rev().copied());
        }

        for (index, value) in values.iter_mut().enumerate() {
            if value.is_nan() {
                *value = distributions.draw_marginal(index, truth.is_set(index), rng);
            }
        }
        values
    }
}

/// Read `parent<TAB>child` pairs; blank and `#` lines are skipped.
pub fn read_edges<R: BufRead>(reader: R) -> Result<Vec<(PropertyIndex, PropertyIndex)>, SamplerError> {
    let mut edges = Vec::new();
    for (offset, line) in reader.lines().enumerate() {
        let line = line?;
        let text = line.trim();
        if text.is_empty() || text.starts_with(COMMENT_PREFIX) {
            continue;
        }
        let malformed = |reason: String| SamplerError::MalformedRecord {
            line: offset + 1,
            reason,
        };
        let fields: Vec<&str> = text
            .split(EDGE_SEPARATORS)
            .filter(|field| !field.is_empty())
            .collect();
        let [parent, child] = fields.as_slice() else {
            return Err(malformed(format!(
                "expected 2 property indices, found {}",
                fields.len()
            )));
        };
        let parse = |field: &str| {
            field
                .parse::<PropertyIndex>()
                .map_err(|err| malformed(format!("property index '{field}': {err}")))
        };
        edges.push((parse(*parent)?, parse(*child)?));
    }
    Ok(edges)
}

use std::collections::HashSet;

use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::constants::dataset::{DEFAULT_PER_CLASS, DEFAULT_ROTATING_WINDOW, SMALL_CLASS_FACTOR};
use crate::errors::SamplerError;
use crate::fingerprint::Fingerprint;
use crate::types::{CompoundId, CompoundIndex, Iteration};

/// Column counts of every batch matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchemaSizes {
    /// Probabilistic fingerprint width; equals the sampler's schema length.
    pub platts: usize,
    /// Formula feature columns.
    pub formulas: usize,
    /// Label columns.
    pub labels: usize,
    /// Auxiliary label width, when the dataset carries a second label set.
    pub aux_labels: Option<usize>,
}

/// Source of labeled compounds for batch synthesis.
///
/// Row writers receive slices exactly as wide as the matching [`SchemaSizes`] entry.
pub trait Dataset: Send + Sync {
    /// Column widths of every row this dataset writes.
    fn schema(&self) -> SchemaSizes;

    /// Number of compounds addressable by index.
    fn len(&self) -> usize;

    /// Whether no compound is addressable.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ground-truth fingerprint the sampler turns into probabilistic features.
    fn truth(&self, index: CompoundIndex) -> Result<&Fingerprint, SamplerError>;

    /// Fill `out` with the formula features of compound `index`.
    fn write_formula_features(
        &self,
        index: CompoundIndex,
        out: &mut [f32],
    ) -> Result<(), SamplerError>;

    /// Fill `out` with the class labels of compound `index`.
    fn write_labels(&self, index: CompoundIndex, out: &mut [f32]) -> Result<(), SamplerError>;

    /// Auxiliary labels; only called when `schema().aux_labels` is set.
    fn write_aux_labels(
        &self,
        index: CompoundIndex,
        _out: &mut [f32],
    ) -> Result<(), SamplerError> {
        Err(SamplerError::Dataset(format!(
            "compound {index} has no auxiliary labels"
        )))
    }

    /// Compounds to synthesize for `iteration`, in row order.
    fn balanced_selection(
        &self,
        iteration: Iteration,
        rng: &mut StdRng,
    ) -> Result<Vec<CompoundIndex>, SamplerError>;
}

/// One compound of an [`InMemoryDataset`].
#[derive(Clone, Debug, PartialEq)]
pub struct LabeledCompound {
    /// Compound identifier.
    pub id: CompoundId,
    /// Ground-truth fingerprint.
    pub truth: Fingerprint,
    /// Precomputed formula features, copied verbatim into each row.
    pub formula_features: Vec<f32>,
    /// Indices of the classes this compound belongs to.
    pub classes: Vec<usize>,
    /// Auxiliary class per auxiliary label, if any.
    pub aux_classes: Option<Vec<usize>>,
}

/// Dataset held entirely in memory with a per-class balanced selection.
///
/// Each iteration takes up to `per_class` compounds from every class, then adds
/// a window of `rotating_window` consecutive compounds that advances with the
/// iteration number, skipping any compound already taken.
#[derive(Debug)]
pub struct InMemoryDataset {
    schema: SchemaSizes,
    compounds: Vec<LabeledCompound>,
    class_members: Vec<Vec<CompoundIndex>>,
    per_class: usize,
    rotating_window: usize,
}

impl InMemoryDataset {
    /// Validate every compound against `schema`.
    pub fn new(schema: SchemaSizes, compounds: Vec<LabeledCompound>) -> Result<Self, SamplerError> {
        if compounds.is_empty() {
            return Err(SamplerError::Dataset("dataset has no compounds".into()));
        }
        let mut class_members = vec![Vec::new(); schema.labels];
        for (index, compound) in compounds.iter().enumerate() {
            compound.truth.ensure_len(schema.platts)?;
            if compound.formula_features.len() != schema.formulas {
                return Err(SamplerError::Dataset(format!(
                    "compound '{}' has {} formula features, expected {}",
                    compound.id,
                    compound.formula_features.len(),
                    schema.formulas
                )));
            }
            for &class in &compound.classes {
                let members = class_members.get_mut(class).ok_or_else(|| {
                    SamplerError::Dataset(format!(
                        "compound '{}' names class {class} outside {} labels",
                        compound.id, schema.labels
                    ))
                })?;
                members.push(index);
            }
            match (&compound.aux_classes, schema.aux_labels) {
                (None, None) => {}
                (Some(aux), Some(width)) if aux.iter().all(|&class| class < width) => {}
                _ => {
                    return Err(SamplerError::Dataset(format!(
                        "compound '{}' auxiliary labels do not match the schema",
                        compound.id
                    )));
                }
            }
        }
        Ok(Self {
            schema,
            compounds,
            class_members,
            per_class: DEFAULT_PER_CLASS,
            rotating_window: DEFAULT_ROTATING_WINDOW,
        })
    }

    /// Set the per-class draw count and the rotating window of balanced selection.
    pub fn with_selection(mut self, per_class: usize, rotating_window: usize) -> Self {
        self.per_class = per_class;
        self.rotating_window = rotating_window;
        self
    }

    /// Compound at `index`, if in range.
    pub fn compound(&self, index: CompoundIndex) -> Option<&LabeledCompound> {
        self.compounds.get(index)
    }

    fn get(&self, index: CompoundIndex) -> Result<&LabeledCompound, SamplerError> {
        self.compounds.get(index).ok_or_else(|| {
            SamplerError::Dataset(format!(
                "compound {index} outside dataset of {}",
                self.compounds.len()
            ))
        })
    }

    fn select_from_class(
        &self,
        members: &[CompoundIndex],
        chosen: &mut HashSet<CompoundIndex>,
        selection: &mut Vec<CompoundIndex>,
        rng: &mut StdRng,
    ) {
        if members.len() < self.per_class * SMALL_CLASS_FACTOR {
            let mut shuffled = members.to_vec();
            shuffled.shuffle(rng);
            let mut taken = 0;
            for index in shuffled {
                if taken >= self.per_class {
                    break;
                }
                if chosen.insert(index) {
                    selection.push(index);
                    taken += 1;
                }
            }
            return;
        }
        // large class: bounded random probing
        let mut visited = HashSet::new();
        let attempts = self.per_class * SMALL_CLASS_FACTOR;
        for _ in 1..attempts {
            if visited.len() >= self.per_class {
                break;
            }
            let slot = rng.random_range(0..members.len());
            let index = members[slot];
            if !visited.contains(&slot) && chosen.insert(index) {
                visited.insert(slot);
                selection.push(index);
            }
        }
    }
}

/// `+1` for every listed class, `-1` elsewhere.
pub fn label_vector(classes: &[usize], out: &mut [f32]) {
    out.fill(-1.0);
    for &class in classes {
        out[class] = 1.0;
    }
}

impl Dataset for InMemoryDataset {
    fn schema(&self) -> SchemaSizes {
        self.schema
    }

    fn len(&self) -> usize {
        self.compounds.len()
    }

    fn truth(&self, index: CompoundIndex) -> Result<&Fingerprint, SamplerError> {
        Ok(&self.get(index)?.truth)
    }

    fn write_formula_features(
        &self,
        index: CompoundIndex,
        out: &mut [f32],
    ) -> Result<(), SamplerError> {
        out.copy_from_slice(&self.get(index)?.formula_features);
        Ok(())
    }

    fn write_labels(&self, index: CompoundIndex, out: &mut [f32]) -> Result<(), SamplerError> {
        label_vector(&self.get(index)?.classes, out);
        Ok(())
    }

    fn write_aux_labels(
        &self,
        index: CompoundIndex,
        out: &mut [f32],
    ) -> Result<(), SamplerError> {
        let compound = self.get(index)?;
        let aux = compound.aux_classes.as_deref().ok_or_else(|| {
            SamplerError::Dataset(format!("compound '{}' has no auxiliary labels", compound.id))
        })?;
        label_vector(aux, out);
        Ok(())
    }

    fn balanced_selection(
        &self,
        iteration: Iteration,
        rng: &mut StdRng,
    ) -> Result<Vec<CompoundIndex>, SamplerError> {
        let total = self.compounds.len();
        let mut chosen = HashSet::new();
        let mut selection = Vec::new();
        for members in self.class_members.iter().filter(|m| !m.is_empty()) {
            self.select_from_class(members, &mut chosen, &mut selection, rng);
        }
        let offset = ((iteration as u128 * self.rotating_window as u128) % total as u128) as usize;
        for step in 0..self.rotating_window.min(total) {
            let index = (offset + step) % total;
            if chosen.insert(index) {
                selection.push(index);
            }
        }
        selection.shuffle(rng);
        Ok(selection)
    }
}

/// Constants used by empirical distribution buckets.
pub mod distribution {
    /// Low-value pseudo-counts appended to every false-negative and positive bucket.
    ///
    /// They keep rare properties from reaching a perfect simulated recall.
    pub const PSEUDO_COUNTS: [f64; 5] = [5e-6, 1e-5, 1e-5, 1e-4, 1e-3];
    /// Predicted probability at or above which a property counts as called present.
    pub const DECISION_THRESHOLD: f64 = 0.5;
}

/// Constants used when parsing validation records.
pub mod validation {
    /// Columns preceding the probabilities: id, structure key, ground-truth bits.
    pub const LEADING_COLUMNS: usize = 3;
    /// Number of leading structure-key characters that identify a structure.
    pub const STRUCTURE_KEY_LEN: usize = 14;
    /// Column separator for validation records.
    pub const FIELD_SEPARATOR: char = '\t';
    /// Prefix marking comment lines in edge lists.
    pub const COMMENT_PREFIX: char = '#';
}

/// Constants used by the nearest-template sampling strategy.
pub mod template {
    /// Number of nearest templates retained per search round.
    pub const MAX_CANDIDATES: usize = 30;
    /// Templates this similar to the query are treated as the query itself and skipped.
    pub const SELF_MATCH_SIMILARITY: f64 = 0.95;
    /// Per-candidate stop probability while walking the similarity-sorted list.
    pub const CANDIDATE_STOP_PROBABILITY: f64 = 0.25;
    /// Similarity scores are bucketed into this many steps before sorting.
    pub const SIMILARITY_STEPS: f64 = 20.0;
    /// Refinement rounds following the initial search.
    pub const REFINEMENT_ROUNDS: usize = 5;
    /// Refinement continues only while at least this many set bits are unresolved.
    pub const MIN_UNRESOLVED_BITS: usize = 20;
    /// A round whose best candidate scores below this falls back to independent draws.
    pub const MIN_ROUND_SIMILARITY: f64 = 0.2;
    /// Top candidates per round kept for false-positive injection.
    pub const NOISE_CANDIDATES_PER_ROUND: usize = 5;
    /// Number of leading rounds that contribute false-positive donors.
    pub const NOISE_CANDIDATE_ROUNDS: usize = 3;
    /// Donors at or above this similarity are passed over for false-positive injection.
    pub const MAX_NOISE_SIMILARITY: f64 = 0.98;
}

/// Constants used by noisy sampling variants.
pub mod noise {
    /// Chance that an independent draw of a set property comes from the false-positive bucket.
    pub const INDEPENDENT_FP_PROBABILITY: f64 = 0.05;
    /// Class frequency at which the frequency term of the simulated recall saturates.
    pub const RECALL_FREQUENCY_SATURATION: f64 = 0.025;
}

/// Constants used by the covariance tree.
pub mod covariance {
    /// Parent probabilities within this distance of 0 or 1 are snapped to the extreme.
    pub const EXTREME_SNAP: f64 = 0.05;
    /// Rate reported by an aggregate without any weight.
    pub const EMPTY_RATE: f64 = 0.5;
    /// Characters accepted between the two indices of an edge line.
    pub const EDGE_SEPARATORS: [char; 2] = ['\t', ' '];
}

/// Constants used by batch producers.
pub mod producer {
    /// Default bound of the batch queue.
    pub const DEFAULT_QUEUE_CAPACITY: usize = 20;
    /// Default number of concurrent producer loops.
    pub const DEFAULT_PRODUCER_THREADS: usize = 2;
    /// Default synthesis seed.
    pub const DEFAULT_SEED: u64 = 42;
    /// Salt mixed into per-sample seeds so they differ from batch seeds.
    pub const SAMPLE_SEED_SALT: u64 = 0x5EED_F1A7;
}

/// Constants used by the strategy schedule.
pub mod strategy {
    /// Iterations before the full strategy mix is enabled.
    pub const WARMUP_ITERATIONS: u64 = 200;
}

/// Constants used by feature normalization.
pub mod normalize {
    /// Lower clip bound of the clipping normalizer.
    pub const CLIP_LOW: f64 = 0.2;
    /// Upper clip bound of the clipping normalizer.
    pub const CLIP_HIGH: f64 = 0.8;
}

/// Constants used by the in-memory dataset's balanced selection.
pub mod dataset {
    /// Compounds drawn per class.
    pub const DEFAULT_PER_CLASS: usize = 6;
    /// Classes with fewer than `per_class * SMALL_CLASS_FACTOR` members are shuffled instead of drawn slot by slot.
    pub const SMALL_CLASS_FACTOR: usize = 10;
    /// Width of the rotating window over all compounds.
    pub const DEFAULT_ROTATING_WINDOW: usize = 1000;
}

/// Constants used by buffer pools.
pub mod buffer_pool {
    /// Default number of concurrently filling buffers.
    pub const DEFAULT_SLOTS: usize = 4;
    /// Default rows per pooled buffer.
    pub const DEFAULT_ROWS: usize = 256;
    /// Default extra buffers beyond the filling slots.
    pub const DEFAULT_SPARE: usize = 8;
}

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::constants::buffer_pool::{DEFAULT_ROWS, DEFAULT_SLOTS, DEFAULT_SPARE};
use crate::constants::producer::{
    DEFAULT_PRODUCER_THREADS, DEFAULT_QUEUE_CAPACITY, DEFAULT_SEED,
};
use crate::errors::SamplerError;
use crate::normalize::NormalizationStrategy;
use crate::strategy::StrategyMode;

/// Options applied while ingesting validation records.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Only records whose id matches this pattern are ingested.
    pub include: Option<String>,
    /// Records whose id matches this pattern are skipped.
    pub exclude: Option<String>,
}

/// Sizing of the optional buffer pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferPoolConfig {
    /// Buffers receiving rows at the same time.
    pub slots: usize,
    /// Rows per buffer.
    pub rows: usize,
    /// Extra buffers that may be allocated for hand-off beyond `slots`.
    pub spare: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            slots: DEFAULT_SLOTS,
            rows: DEFAULT_ROWS,
            spare: DEFAULT_SPARE,
        }
    }
}

/// Top-level batch production configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Root seed; every batch and sample seed is derived from it.
    pub seed: u64,
    /// Bound of the batch queue between producers and the consumer.
    pub queue_capacity: usize,
    /// Number of concurrent producer loops.
    pub producer_threads: usize,
    /// Worker pool size; `None` uses the available hardware parallelism.
    pub worker_threads: Option<usize>,
    /// How sampling strategies are assigned to rows.
    pub strategy: StrategyMode,
    /// Transformation applied to probabilistic features when written into batches.
    pub normalization: NormalizationStrategy,
    /// When set, synthesized rows are also staged into a buffer pool.
    pub buffer_pool: Option<BufferPoolConfig>,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            producer_threads: DEFAULT_PRODUCER_THREADS,
            worker_threads: None,
            strategy: StrategyMode::default(),
            normalization: NormalizationStrategy::default(),
            buffer_pool: None,
        }
    }
}

impl ProducerConfig {
    /// Reject settings that would leave the pipeline unable to make progress.
    pub fn validate(&self) -> Result<(), SamplerError> {
        if self.queue_capacity == 0 {
            return Err(SamplerError::Configuration(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if self.producer_threads == 0 {
            return Err(SamplerError::Configuration(
                "producer_threads must be at least 1".into(),
            ));
        }
        if self.worker_threads == Some(0) {
            return Err(SamplerError::Configuration(
                "worker_threads must be at least 1 when set".into(),
            ));
        }
        if let Some(pool) = &self.buffer_pool {
            if pool.slots == 0 || pool.rows == 0 {
                return Err(SamplerError::Configuration(
                    "buffer pool slots and rows must be at least 1".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Load a JSON configuration file.
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, SamplerError> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|err| {
        SamplerError::Configuration(format!("failed to parse {}: {err}", path.display()))
    })
}

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Dense training batch types.
pub mod batch;
/// Fixed arena of reusable column buffers.
pub mod buffer_pool;
/// Ingest and production configuration types.
pub mod config;
/// Centralized constants used across samplers, producers, and pools.
pub mod constants;
/// Property dependency tree for correlated sampling.
pub mod covariance;
/// Dataset seam and an in-memory implementation.
pub mod dataset;
/// Per-property empirical value distributions.
pub mod distribution;
mod errors;
/// Binary and probabilistic fingerprint types.
pub mod fingerprint;
mod hash;
/// Sampling fidelity summaries.
pub mod metrics;
/// Feature normalization applied when writing batches.
pub mod normalize;
/// Background batch synthesis and the consumer-facing producer.
pub mod producer;
mod queue;
/// Ingested sampler and its sampling strategies.
pub mod sampler;
/// Strategy selection per training row.
pub mod strategy;
/// Nearest-template index and similarity measures.
pub mod templates;
/// Shared type aliases.
pub mod types;
/// Validation record parsing and filtering.
pub mod validation;

pub use batch::{Matrix, TrainingBatch};
pub use buffer_pool::{BufferPool, BufferPoolSnapshot, DoneBuffer};
pub use config::{BufferPoolConfig, ProducerConfig, SamplerConfig};
pub use covariance::CovarianceTree;
pub use dataset::{Dataset, InMemoryDataset, LabeledCompound, SchemaSizes};
pub use distribution::{Distributions, EmpiricalBucket, Outcome, PropertyRates};
pub use errors::SamplerError;
pub use fingerprint::{Fingerprint, ProbabilityFingerprint};
pub use normalize::{NormalizationStrategy, PlattNormalizer};
pub use producer::{BatchProducer, BatchSynthesizer, ProducerStats};
pub use sampler::FingerprintSampler;
pub use strategy::{SamplingStrategy, StrategyMode, StrategySchedule};
pub use types::{CompoundId, CompoundIndex, Iteration, PropertyIndex, RecordId, StructureKey};

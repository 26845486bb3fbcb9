use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, trace, warn};

use crate::batch::TrainingBatch;
use crate::buffer_pool::BufferPool;
use crate::config::ProducerConfig;
use crate::dataset::Dataset;
use crate::errors::SamplerError;
use crate::fingerprint::ProbabilityFingerprint;
use crate::hash::{batch_seed, sample_seed};
use crate::normalize::PlattNormalizer;
use crate::queue::BoundedQueue;
use crate::sampler::FingerprintSampler;
use crate::strategy::{SamplingStrategy, StrategyMode, StrategySchedule};
use crate::types::{CompoundIndex, Iteration};

/// Builds training batches from a dataset selection and a shared sampler.
///
/// Per-sample work runs on a dedicated rayon pool. Each sample seeds its own
/// RNG from `(seed, iteration, index)`, so a batch depends only on the
/// configuration seed and its iteration number.
pub struct BatchSynthesizer<D> {
    sampler: Arc<FingerprintSampler>,
    dataset: Arc<D>,
    config: ProducerConfig,
    normalizer: PlattNormalizer,
    workers: RwLock<Option<Arc<ThreadPool>>>,
    buffer_pool: Option<Arc<BufferPool>>,
}

impl<D: Dataset> BatchSynthesizer<D> {
    /// Check the dataset schema against the sampler and build the worker pool.
    pub fn new(
        sampler: Arc<FingerprintSampler>,
        dataset: Arc<D>,
        config: ProducerConfig,
    ) -> Result<Self, SamplerError> {
        config.validate()?;
        let schema = dataset.schema();
        if schema.platts != sampler.schema_len() {
            return Err(SamplerError::SchemaMismatch {
                expected: sampler.schema_len(),
                found: schema.platts,
            });
        }
        if config.buffer_pool.is_some() && schema.aux_labels.is_some() {
            return Err(SamplerError::Configuration(
                "buffer pools stage platt, formula and label columns only; \
                 datasets with auxiliary labels cannot use one"
                    .into(),
            ));
        }
        if config.strategy == StrategyMode::Fixed(SamplingStrategy::Conditional)
            && sampler.covariance_tree().is_none()
        {
            return Err(SamplerError::MissingCovarianceTree);
        }
        let threads = config.worker_threads.unwrap_or_else(|| {
            thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        });
        let workers = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("platt-sampler-worker-{index}"))
            .build()
            .map_err(|err| {
                SamplerError::Configuration(format!("failed to build worker pool: {err}"))
            })?;
        let normalizer = PlattNormalizer::new(config.normalization, sampler.distributions());
        let buffer_pool = config
            .buffer_pool
            .as_ref()
            .map(|pool| Arc::new(BufferPool::new(pool, schema)));
        debug!(threads, seed = config.seed, "batch synthesizer ready");
        Ok(Self {
            sampler,
            dataset,
            config,
            normalizer,
            workers: RwLock::new(Some(Arc::new(workers))),
            buffer_pool,
        })
    }

    /// Configuration the synthesizer was built with.
    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    /// Shared fingerprint sampler.
    pub fn sampler(&self) -> &Arc<FingerprintSampler> {
        &self.sampler
    }

    /// Shared dataset.
    pub fn dataset(&self) -> &Arc<D> {
        &self.dataset
    }

    /// Pool the producer stages rows in, if configured.
    pub fn buffer_pool(&self) -> Option<&Arc<BufferPool>> {
        self.buffer_pool.as_ref()
    }

    /// Batch for `iteration`: balanced selection, scheduled strategies, shuffled rows.
    pub fn synthesize(&self, iteration: Iteration) -> Result<TrainingBatch, SamplerError> {
        let mut rng = StdRng::seed_from_u64(batch_seed(self.config.seed, iteration));
        let compounds = self.dataset.balanced_selection(iteration, &mut rng)?;
        let schedule = StrategySchedule::from_mode(self.config.strategy, iteration, &mut rng);
        let strategies: Vec<SamplingStrategy> =
            (0..compounds.len()).map(|row| schedule.get(row)).collect();
        self.assemble(self.config.seed, iteration, &compounds, &strategies, &mut rng)
    }

    /// Batch for an explicit compound list, every row sampled with `strategy`.
    pub fn resample(
        &self,
        compounds: &[CompoundIndex],
        strategy: SamplingStrategy,
        seed: u64,
    ) -> Result<TrainingBatch, SamplerError> {
        let mut rng = StdRng::seed_from_u64(batch_seed(seed, 0));
        let strategies = vec![strategy; compounds.len()];
        self.assemble(seed, 0, compounds, &strategies, &mut rng)
    }

    /// Drop the worker pool; later synthesis calls fail with [`SamplerError::Stopped`].
    pub fn release_workers(&self) {
        self.workers
            .write()
            .expect("worker pool lock poisoned")
            .take();
    }

    fn worker_pool(&self) -> Result<Arc<ThreadPool>, SamplerError> {
        self.workers
            .read()
            .expect("worker pool lock poisoned")
            .clone()
            .ok_or(SamplerError::Stopped)
    }

    fn assemble(
        &self,
        seed: u64,
        iteration: Iteration,
        compounds: &[CompoundIndex],
        strategies: &[SamplingStrategy],
        rng: &mut StdRng,
    ) -> Result<TrainingBatch, SamplerError> {
        let workers = self.worker_pool()?;
        let sampler = self.sampler.as_ref();
        let dataset = self.dataset.as_ref();
        let samples: Vec<ProbabilityFingerprint> = workers.install(|| {
            compounds
                .par_iter()
                .zip(strategies.par_iter())
                .enumerate()
                .map(|(index, (&compound, &strategy))| {
                    let mut sample_rng = StdRng::seed_from_u64(sample_seed(seed, iteration, index));
                    strategy.sample(sampler, dataset.truth(compound)?, &mut sample_rng)
                })
                .collect::<Result<Vec<_>, SamplerError>>()
        })?;

        let mut batch = TrainingBatch::zeros(compounds.len(), &dataset.schema());
        let mut order: Vec<usize> = (0..compounds.len()).collect();
        order.shuffle(rng);
        for (row, &index) in order.iter().enumerate() {
            let compound = compounds[index];
            self.normalizer
                .write(samples[index].as_slice(), batch.platts.row_mut(row));
            dataset.write_formula_features(compound, batch.formulas.row_mut(row))?;
            dataset.write_labels(compound, batch.labels.row_mut(row))?;
            if let Some(aux) = batch.aux_labels.as_mut() {
                dataset.write_aux_labels(compound, aux.row_mut(row))?;
            }
            if let Some(pool) = &self.buffer_pool {
                pool.fill(
                    row,
                    batch.platts.row(row),
                    batch.formulas.row(row),
                    batch.labels.row(row),
                );
            }
        }
        trace!(iteration, rows = compounds.len(), "assembled batch");
        Ok(batch)
    }
}

#[derive(Default)]
/// Producer runtime counters.
pub struct ProducerStats {
    produced: AtomicUsize,
    errors: AtomicUsize,
}

impl ProducerStats {
    /// Batches pushed onto the queue, not counting failures.
    pub fn produced(&self) -> usize {
        self.produced.load(Ordering::Relaxed)
    }

    /// Synthesis errors and worker panics, whether delivered or dropped after stop.
    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }
}

/// State shared by every producer loop and the consumer.
struct Shared<D> {
    synthesizer: BatchSynthesizer<D>,
    queue: BoundedQueue<Result<TrainingBatch, SamplerError>>,
    stopped: AtomicBool,
    next_iteration: AtomicU64,
    stats: ProducerStats,
}

impl<D: Dataset> Shared<D> {
    fn run(&self, worker: usize) {
        debug!(worker, "batch producer started");
        while !self.stopped.load(Ordering::Acquire) {
            let iteration = self.next_iteration.fetch_add(1, Ordering::Relaxed);
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| self.synthesizer.synthesize(iteration)))
                    .unwrap_or(Err(SamplerError::WorkerPanic { iteration }));
            let failed = outcome.is_err();
            if let Err(err) = &outcome {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                if !self.stopped.load(Ordering::Acquire) {
                    warn!(worker, iteration, error = %err, "batch synthesis failed");
                }
            }
            // errors travel to the consumer like batches; a closed queue drops them
            if self.queue.push(outcome).is_err() {
                break;
            }
            if !failed {
                self.stats.produced.fetch_add(1, Ordering::Relaxed);
            }
        }
        debug!(worker, "batch producer exiting");
    }
}

/// Background producer loops publishing batches through a bounded queue.
///
/// Loops share one iteration counter, so every iteration is synthesized
/// exactly once, though batches may arrive out of iteration order.
pub struct BatchProducer<D: Dataset + 'static> {
    shared: Arc<Shared<D>>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl<D: Dataset + 'static> BatchProducer<D> {
    /// Spawn `producer_threads` loops starting at iteration 0.
    pub fn start(synthesizer: BatchSynthesizer<D>) -> Result<Self, SamplerError> {
        let threads = synthesizer.config().producer_threads;
        let capacity = synthesizer.config().queue_capacity;
        let producer = Self {
            shared: Arc::new(Shared {
                synthesizer,
                queue: BoundedQueue::new(capacity),
                stopped: AtomicBool::new(false),
                next_iteration: AtomicU64::new(0),
                stats: ProducerStats::default(),
            }),
            handles: Mutex::new(Vec::with_capacity(threads)),
        };
        for worker in 0..threads {
            let shared = Arc::clone(&producer.shared);
            let handle = thread::Builder::new()
                .name(format!("batch-producer-{worker}"))
                .spawn(move || shared.run(worker))?;
            producer
                .handles
                .lock()
                .expect("producer handles poisoned")
                .push(handle);
        }
        debug!(threads, capacity, "batch producers running");
        Ok(producer)
    }

    /// Next batch, blocking until one is available.
    ///
    /// Completed pooled buffers are served first. A synthesis failure is
    /// returned in place of the batch it would have produced. Returns `None`
    /// once stopped.
    pub fn poll(&self, hint: u64) -> Option<Result<TrainingBatch, SamplerError>> {
        if self.is_stopped() {
            return None;
        }
        trace!(hint, "polling for batch");
        if let Some(done) = self
            .shared
            .synthesizer
            .buffer_pool()
            .and_then(|pool| pool.pop())
        {
            return Some(Ok(done.materialize()));
        }
        self.shared.queue.pop()
    }

    /// Stop every loop, drop queued batches, and release the worker pool. Idempotent.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        self.shared.queue.close();
        let handles = std::mem::take(&mut *self.handles.lock().expect("producer handles poisoned"));
        if handles.is_empty() {
            return;
        }
        for handle in handles {
            if handle.join().is_err() {
                self.shared.stats.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.shared.synthesizer.release_workers();
        debug!(
            produced = self.shared.stats.produced(),
            errors = self.shared.stats.errors(),
            "batch producers stopped"
        );
    }

    /// Whether `stop` has been called or the producer was dropped.
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    /// Live counters shared with the producer thread.
    pub fn stats(&self) -> &ProducerStats {
        &self.shared.stats
    }

    /// Batches currently waiting in the queue.
    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    /// Synthesizer driving the producer thread.
    pub fn synthesizer(&self) -> &BatchSynthesizer<D> {
        &self.shared.synthesizer
    }
}

impl<D: Dataset + 'static> Drop for BatchProducer<D> {
    fn drop(&mut self) {
        self.stop();
    }
}

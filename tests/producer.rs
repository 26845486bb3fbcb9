use std::io::Cursor;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;

use platt_sampler::{
    BatchProducer, BatchSynthesizer, BufferPoolConfig, CompoundIndex, Dataset, Fingerprint,
    FingerprintSampler, InMemoryDataset, Iteration, LabeledCompound, NormalizationStrategy,
    ProducerConfig, SamplerConfig, SamplerError, SamplingStrategy, SchemaSizes, StrategyMode,
    TrainingBatch,
};

const SCHEMA: usize = 6;
const CLASSES: usize = 3;

fn sampler() -> Arc<FingerprintSampler> {
    let records = [
        "a\tKA\t110000\t0.9\t0.7\t0.1\t0.2\t0.0\t0.3",
        "b\tKB\t011000\t0.2\t0.8\t0.6\t0.1\t0.1\t0.0",
        "c\tKC\t001100\t0.1\t0.4\t0.9\t0.7\t0.2\t0.1",
        "d\tKD\t000110\t0.0\t0.1\t0.3\t0.8\t0.9\t0.2",
        "e\tKE\t100011\t0.6\t0.0\t0.1\t0.2\t0.7\t0.4",
    ]
    .join("\n");
    let mut sampler =
        FingerprintSampler::from_reader(Cursor::new(records), SCHEMA, &SamplerConfig::default())
            .unwrap();
    sampler
        .build_covariance_tree(&[(0, 1), (1, 2), (1, 3), (0, 4), (4, 5)])
        .unwrap();
    Arc::new(sampler)
}

/// Formula feature 0 carries the compound index so rows can be traced back.
fn dataset(size: usize) -> Arc<InMemoryDataset> {
    let schema = SchemaSizes {
        platts: SCHEMA,
        formulas: 2,
        labels: CLASSES,
        aux_labels: None,
    };
    let compounds = (0..size)
        .map(|i| LabeledCompound {
            id: format!("C{i}"),
            truth: Fingerprint::from_indices(SCHEMA, &[i % SCHEMA, (i + 3) % SCHEMA]).unwrap(),
            formula_features: vec![i as f32, 0.5],
            classes: vec![i % CLASSES],
            aux_classes: None,
        })
        .collect();
    Arc::new(
        InMemoryDataset::new(schema, compounds)
            .unwrap()
            .with_selection(2, 8),
    )
}

fn config(queue_capacity: usize) -> ProducerConfig {
    ProducerConfig {
        queue_capacity,
        worker_threads: Some(2),
        ..ProducerConfig::default()
    }
}

fn compound_of(batch: &TrainingBatch, row: usize) -> usize {
    batch.formulas.row(row)[0] as usize
}

#[test]
fn rows_stay_aligned_across_matrices() {
    let data = dataset(40);
    let config = ProducerConfig {
        strategy: StrategyMode::Fixed(SamplingStrategy::Perfect),
        normalization: NormalizationStrategy::Raw,
        ..config(2)
    };
    let synthesizer = BatchSynthesizer::new(sampler(), Arc::clone(&data), config).unwrap();
    let batch = synthesizer.synthesize(3).unwrap();
    assert!(batch.rows() > 0);
    assert_eq!(batch.platts.cols(), SCHEMA);
    for row in 0..batch.rows() {
        let compound = data.compound(compound_of(&batch, row)).unwrap();
        let expected: Vec<f32> = compound
            .truth
            .to_bools()
            .iter()
            .map(|&bit| if bit { 1.0 } else { 0.0 })
            .collect();
        assert_eq!(batch.platts.row(row), expected.as_slice());
        let mut labels = vec![0.0; CLASSES];
        data.write_labels(compound_of(&batch, row), &mut labels).unwrap();
        assert_eq!(batch.labels.row(row), labels.as_slice());
    }
}

#[test]
fn synthesis_is_deterministic_per_iteration() {
    let data = dataset(40);
    let synthesizer = BatchSynthesizer::new(sampler(), data, config(2)).unwrap();
    assert_eq!(
        synthesizer.synthesize(250).unwrap(),
        synthesizer.synthesize(250).unwrap()
    );
    let resampled = synthesizer
        .resample(&[3, 1, 4], SamplingStrategy::Conditional, 11)
        .unwrap();
    assert_eq!(resampled.rows(), 3);
    let mut compounds: Vec<usize> = (0..3).map(|row| compound_of(&resampled, row)).collect();
    compounds.sort_unstable();
    assert_eq!(compounds, vec![1, 3, 4]);
}

#[test]
fn conditional_mode_requires_a_tree() {
    let bare = FingerprintSampler::from_reader(
        Cursor::new("a\tKA\t110000\t0.9\t0.7\t0.1\t0.2\t0.0\t0.3"),
        SCHEMA,
        &SamplerConfig::default(),
    )
    .unwrap();
    let config = ProducerConfig {
        strategy: StrategyMode::Fixed(SamplingStrategy::Conditional),
        ..config(1)
    };
    assert!(matches!(
        BatchSynthesizer::new(Arc::new(bare), dataset(10), config),
        Err(SamplerError::MissingCovarianceTree)
    ));
}

#[test]
fn stop_never_deadlocks_for_small_capacities() {
    for capacity in 1..=3 {
        for polls in [0usize, 1, 5] {
            let synthesizer = BatchSynthesizer::new(sampler(), dataset(30), config(capacity)).unwrap();
            let producer = BatchProducer::start(synthesizer).unwrap();
            for step in 0..polls {
                let batch = producer
                    .poll(step as u64)
                    .expect("producer is running")
                    .unwrap();
                assert!(batch.rows() > 0);
                batch.release();
            }
            // give producers time to block on a full queue
            let deadline = Instant::now() + Duration::from_secs(5);
            while producer.queue_len() < capacity && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(2));
            }
            producer.stop();
            producer.stop();
            assert!(producer.poll(99).is_none());
            assert!(producer.is_stopped());
            assert_eq!(producer.queue_len(), 0);
        }
    }
}

#[test]
fn blocked_consumer_is_released_by_stop() {
    let synthesizer = BatchSynthesizer::new(sampler(), dataset(30), config(1)).unwrap();
    let producer = Arc::new(BatchProducer::start(synthesizer).unwrap());
    let consumer = {
        let producer = Arc::clone(&producer);
        thread::spawn(move || {
            let mut received = 0usize;
            while producer.poll(received as u64).is_some() {
                received += 1;
            }
            received
        })
    };
    let deadline = Instant::now() + Duration::from_secs(5);
    while producer.stats().produced() < 3 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(2));
    }
    producer.stop();
    let received = consumer.join().unwrap();
    assert!(received <= producer.stats().produced());
    assert!(producer.poll(0).is_none());
}

#[test]
fn dropping_a_running_producer_joins_its_threads() {
    let synthesizer = BatchSynthesizer::new(sampler(), dataset(30), config(2)).unwrap();
    let producer = BatchProducer::start(synthesizer).unwrap();
    assert!(producer.poll(0).unwrap().is_ok());
    drop(producer);
}

#[test]
fn pooled_buffers_are_served_and_partitioned() {
    let config = ProducerConfig {
        buffer_pool: Some(BufferPoolConfig {
            slots: 2,
            rows: 3,
            spare: 2,
        }),
        ..config(2)
    };
    let synthesizer = BatchSynthesizer::new(sampler(), dataset(30), config).unwrap();
    let producer = BatchProducer::start(synthesizer).unwrap();
    for step in 0..6 {
        let batch = producer.poll(step).expect("producer is running").unwrap();
        assert_eq!(batch.labels.cols(), CLASSES);
    }
    producer.stop();

    let pool = producer.synthesizer().buffer_pool().unwrap();
    let snapshot = pool.snapshot();
    assert_eq!(snapshot.filling, 2);
    assert_eq!(
        snapshot.filling + snapshot.done + snapshot.recycled,
        snapshot.allocated
    );
    assert!(snapshot.allocated <= 4);
    while let Some(done) = pool.pop() {
        assert_eq!(done.materialize().rows(), 3);
    }
    assert_eq!(pool.snapshot().done, 0);
}

/// Dataset whose selection always fails.
struct BrokenSelection {
    truth: Fingerprint,
}

impl Dataset for BrokenSelection {
    fn schema(&self) -> SchemaSizes {
        SchemaSizes {
            platts: SCHEMA,
            formulas: 1,
            labels: 1,
            aux_labels: None,
        }
    }

    fn len(&self) -> usize {
        1
    }

    fn truth(&self, _index: CompoundIndex) -> Result<&Fingerprint, SamplerError> {
        Ok(&self.truth)
    }

    fn write_formula_features(
        &self,
        _index: CompoundIndex,
        out: &mut [f32],
    ) -> Result<(), SamplerError> {
        out.fill(0.0);
        Ok(())
    }

    fn write_labels(&self, _index: CompoundIndex, out: &mut [f32]) -> Result<(), SamplerError> {
        out.fill(1.0);
        Ok(())
    }

    fn balanced_selection(
        &self,
        iteration: Iteration,
        _rng: &mut StdRng,
    ) -> Result<Vec<CompoundIndex>, SamplerError> {
        Err(SamplerError::Dataset(format!("selection {iteration} unavailable")))
    }
}

#[test]
fn synthesis_errors_reach_the_consumer() {
    let dataset = Arc::new(BrokenSelection {
        truth: Fingerprint::empty(SCHEMA),
    });
    let synthesizer = BatchSynthesizer::new(sampler(), dataset, config(2)).unwrap();
    let producer = Arc::new(BatchProducer::start(synthesizer).unwrap());
    let consumer = {
        let producer = Arc::clone(&producer);
        thread::spawn(move || producer.poll(0))
    };
    let deadline = Instant::now() + Duration::from_secs(5);
    while !consumer.is_finished() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(2));
    }
    assert!(consumer.is_finished(), "poll never returned the failure");
    let outcome = consumer.join().unwrap().expect("producer is running");
    assert!(matches!(outcome, Err(SamplerError::Dataset(_))));

    // failures queue up under the same bound as batches
    let deadline = Instant::now() + Duration::from_secs(5);
    while producer.queue_len() < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(2));
    }
    thread::sleep(Duration::from_millis(20));
    let errors = producer.stats().errors();
    assert!(errors <= 2 + 1 + 2, "producers kept spinning: {errors} errors");
    assert_eq!(producer.stats().produced(), 0);

    producer.stop();
    assert!(producer.poll(1).is_none());
}

#[test]
fn buffer_pool_is_rejected_for_auxiliary_labels() {
    let schema = SchemaSizes {
        platts: SCHEMA,
        formulas: 2,
        labels: CLASSES,
        aux_labels: Some(2),
    };
    let compounds = (0..6)
        .map(|i| LabeledCompound {
            id: format!("C{i}"),
            truth: Fingerprint::from_indices(SCHEMA, &[i % SCHEMA]).unwrap(),
            formula_features: vec![i as f32, 0.5],
            classes: vec![i % CLASSES],
            aux_classes: Some(vec![i % 2]),
        })
        .collect();
    let data = Arc::new(InMemoryDataset::new(schema, compounds).unwrap());
    let pooled = ProducerConfig {
        buffer_pool: Some(BufferPoolConfig {
            slots: 1,
            rows: 2,
            spare: 1,
        }),
        ..config(2)
    };
    assert!(matches!(
        BatchSynthesizer::new(sampler(), Arc::clone(&data), pooled),
        Err(SamplerError::Configuration(_))
    ));

    let synthesizer = BatchSynthesizer::new(sampler(), data, config(2)).unwrap();
    let producer = BatchProducer::start(synthesizer).unwrap();
    for step in 0..4 {
        let batch = producer.poll(step).expect("producer is running").unwrap();
        assert_eq!(batch.aux_labels.as_ref().map(|aux| aux.cols()), Some(2));
        assert_eq!(batch.aux_labels.as_ref().map(|aux| aux.rows()), Some(batch.rows()));
    }
    producer.stop();
}

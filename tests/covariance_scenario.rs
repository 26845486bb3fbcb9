use std::io::Write;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::NamedTempFile;

use platt_sampler::distribution::PropertyBuckets;
use platt_sampler::{
    CovarianceTree, Distributions, EmpiricalBucket, Fingerprint, FingerprintSampler,
    ProbabilityFingerprint, SamplerConfig, SamplerError,
};

fn singleton_buckets() -> Distributions {
    let property = || PropertyBuckets {
        positive: EmpiricalBucket::from_values(vec![0.9]),
        negative: EmpiricalBucket::from_values(vec![0.1]),
        true_positive: EmpiricalBucket::from_values(vec![0.9]),
        false_positive: EmpiricalBucket::from_values(vec![0.2]),
        true_negative: EmpiricalBucket::from_values(vec![0.1]),
        false_negative: EmpiricalBucket::from_values(vec![0.8]),
    };
    Distributions::from_buckets((0..4).map(|_| property()).collect())
}

fn corpus() -> Vec<(Fingerprint, ProbabilityFingerprint)> {
    [
        ("1100", [1.0, 0.9, 0.2, 0.0]),
        ("1010", [1.0, 0.3, 0.6, 0.0]),
        ("0100", [0.0, 0.6, 0.5, 0.0]),
        ("0000", [0.0, 0.2, 0.1, 0.0]),
    ]
    .into_iter()
    .map(|(bits, probs)| {
        (
            Fingerprint::parse_bits(bits).unwrap(),
            ProbabilityFingerprint::new(probs.to_vec()).unwrap(),
        )
    })
    .collect()
}

/// Root 0 feeds property 1, which feeds property 2; property 3 is outside the tree.
fn chain() -> CovarianceTree {
    let corpus = corpus();
    CovarianceTree::build(&[(0, 1), (1, 2)], 4, corpus.iter().map(|(t, p)| (t, p))).unwrap()
}

fn close(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() < 1e-9
}

#[test]
fn edge_aggregates_match_hand_computation() {
    let tree = chain();
    assert_eq!(tree.root(), 0);

    let first = tree.parent_edge(1).unwrap();
    assert!(close(first.parent_present.recall(), 0.9));
    assert!(close(first.parent_present.specificity(), 0.7));
    assert!(close(first.parent_absent.recall(), 0.6));
    assert!(close(first.parent_absent.specificity(), 0.8));

    let second = tree.parent_edge(2).unwrap();
    assert!(close(second.parent_present.recall(), 0.6));
    assert!(close(second.parent_present.specificity(), 1.2 / 1.7));
    assert!(close(second.parent_absent.recall(), 0.6));
    assert!(close(second.parent_absent.specificity(), 1.0 / 1.3));

    assert!(close(second.blended_rate(0.97, false), 1.2 / 1.7));
    assert!(close(
        second.blended_rate(0.5, false),
        0.5 * 1.2 / 1.7 + 0.5 * 1.0 / 1.3
    ));
}

/// Draw from a one-value bucket `[v]`: uniform below `v` or uniform above it.
fn draw_singleton(v: f64, rng: &mut StdRng) -> f64 {
    let above = rng.random_range(0..=1usize) == 1;
    let q: f64 = rng.random();
    if above { v + (1.0 - v) * q } else { v * q }
}

fn snapped(v: f64) -> f64 {
    if v <= 0.05 {
        0.0
    } else if v >= 0.95 {
        1.0
    } else {
        v
    }
}

#[test]
fn draw_replays_branch_decisions_top_down() {
    let tree = chain();
    let dists = singleton_buckets();
    let truth = Fingerprint::parse_bits("1100").unwrap();
    let mut branches = [0usize; 2];

    for seed in 0..64 {
        let values = tree.draw(&dists, &truth, &mut StdRng::seed_from_u64(seed));

        let mut replay = StdRng::seed_from_u64(seed);
        let root = draw_singleton(0.9, &mut replay);
        assert_eq!(values[0], root, "seed {seed}: root");

        // property 1 is set: recall 0.9 under a present parent, 0.6 under an absent one
        let q = snapped(root);
        let hit = replay.random::<f64>() < q * 0.9 + (1.0 - q) * 0.6;
        branches[usize::from(hit)] += 1;
        let a = draw_singleton(if hit { 0.9 } else { 0.8 }, &mut replay);
        assert_eq!(values[1], a, "seed {seed}: property 1");

        // property 2 is unset: specificity 1.2/1.7 and 1.0/1.3
        let q = snapped(a);
        let hit = replay.random::<f64>() < q * 1.2 / 1.7 + (1.0 - q) * 1.0 / 1.3;
        let b = draw_singleton(if hit { 0.1 } else { 0.2 }, &mut replay);
        assert_eq!(values[2], b, "seed {seed}: property 2");

        // property 3 hangs off no edge and takes its negative marginal
        assert_eq!(values[3], draw_singleton(0.1, &mut replay), "seed {seed}: property 3");
    }
    assert!(branches[0] > 0 && branches[1] > 0, "{branches:?}");
}

#[test]
fn draw_is_deterministic_for_a_seed() {
    let tree = chain();
    let dists = singleton_buckets();
    let truth = Fingerprint::parse_bits("1100").unwrap();
    let first = tree.draw(&dists, &truth, &mut StdRng::seed_from_u64(5));
    let second = tree.draw(&dists, &truth, &mut StdRng::seed_from_u64(5));
    assert_eq!(first, second);
    assert!(first.iter().all(|v| (0.0..=1.0).contains(v)));
}

#[test]
fn sampler_builds_tree_from_edge_file() {
    let mut records = NamedTempFile::new().unwrap();
    for (index, (truth, predicted)) in corpus().iter().enumerate() {
        let bits: String = truth
            .to_bools()
            .iter()
            .map(|&bit| if bit { '1' } else { '0' })
            .collect();
        let probs: Vec<String> = predicted.as_slice().iter().map(f64::to_string).collect();
        writeln!(records, "r{index}\tKEY{index}\t{bits}\t{}", probs.join("\t")).unwrap();
    }
    let mut edges = NamedTempFile::new().unwrap();
    writeln!(edges, "# parent\tchild\n0\t1\n\n1\t2").unwrap();

    let mut sampler =
        FingerprintSampler::from_path(records.path(), 4, &SamplerConfig::default()).unwrap();
    let truth = Fingerprint::parse_bits("1100").unwrap();
    let mut rng = StdRng::seed_from_u64(1);
    assert!(matches!(
        sampler.sample_from_covariance(&truth, &mut rng),
        Err(SamplerError::MissingCovarianceTree)
    ));

    sampler.build_covariance_tree_from_path(edges.path()).unwrap();
    let tree = sampler.covariance_tree().unwrap();
    assert!(close(tree.parent_edge(1).unwrap().parent_present.recall(), 0.9));
    let sample = sampler.sample_from_covariance(&truth, &mut rng).unwrap();
    assert_eq!(sample.len(), 4);
}

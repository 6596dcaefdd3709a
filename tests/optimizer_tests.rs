use gradnet::backend::ndarray::NdArray;
use gradnet::backend::Backend;
use gradnet::engine::optimizer::{AdaptiveSgd, AdaptiveSgdConfig};
use gradnet::engine::persist::{self, Checkpoint};
use gradnet::Error;

fn dummy_split(samples: usize) -> (<NdArray as Backend>::Tensor, <NdArray as Backend>::Tensor) {
    (
        NdArray::from_vec(vec![0.0; samples], &[samples, 1]),
        NdArray::from_vec(vec![0.0; samples], &[samples, 1]),
    )
}

#[test]
fn converges_on_a_quadratic_bowl() {
    // Minimize sum((p - 3)^2); the data tensors only drive batching.
    let (data, labels) = dummy_split(16);
    let mut optimizer = AdaptiveSgd::new(AdaptiveSgdConfig {
        epochs: 300,
        mini_batch_size: 8,
        initial_learning_rate: 0.05,
        test_frequency: 0,
        seed: Some(1),
        ..AdaptiveSgdConfig::default()
    })
    .unwrap();

    let params = optimizer
        .minimize::<NdArray, _>(
            |p, _, _| {
                let cost = p.iter().map(|v| (v - 3.0) * (v - 3.0)).sum::<f32>();
                let grad = p.iter().map(|v| 2.0 * (v - 3.0)).collect();
                Ok((cost, grad))
            },
            vec![0.0, 5.0, -2.0],
            &data,
            &labels,
        )
        .unwrap();

    for p in params {
        assert!((p - 3.0).abs() < 0.1, "parameter {} did not converge", p);
    }
}

#[test]
fn objective_sees_mini_batches_of_the_configured_size() {
    let (data, labels) = dummy_split(10);
    let mut optimizer = AdaptiveSgd::new(AdaptiveSgdConfig {
        epochs: 1,
        mini_batch_size: 4,
        test_frequency: 0,
        seed: Some(2),
        ..AdaptiveSgdConfig::default()
    })
    .unwrap();

    let mut batch_sizes = Vec::new();
    optimizer
        .minimize::<NdArray, _>(
            |p, d, _| {
                batch_sizes.push(NdArray::shape(d)[0]);
                Ok((0.0, vec![0.0; p.len()]))
            },
            vec![1.0],
            &data,
            &labels,
        )
        .unwrap();

    // 10 samples in chunks of 4: two full batches and a remainder.
    batch_sizes.sort_unstable();
    assert_eq!(batch_sizes, vec![2, 4, 4]);
}

#[test]
fn invalid_hyperparameters_are_configuration_errors() {
    let bad_lr = AdaptiveSgd::new(AdaptiveSgdConfig {
        initial_learning_rate: 0.0,
        ..AdaptiveSgdConfig::default()
    });
    assert!(matches!(bad_lr.unwrap_err(), Error::Configuration(_)));

    let bad_beta = AdaptiveSgd::new(AdaptiveSgdConfig {
        beta1: 1.0,
        ..AdaptiveSgdConfig::default()
    });
    assert!(matches!(bad_beta.unwrap_err(), Error::Configuration(_)));
}

#[test]
fn checkpoints_are_written_and_resumable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("checkpoint.bin");
    let (data, labels) = dummy_split(8);

    let mut optimizer = AdaptiveSgd::new(AdaptiveSgdConfig {
        epochs: 2,
        mini_batch_size: 4,
        test_frequency: 0,
        checkpoint: Some(path.clone()),
        seed: Some(3),
        ..AdaptiveSgdConfig::default()
    })
    .unwrap();
    let params = optimizer
        .minimize::<NdArray, _>(
            |p, _, _| Ok((0.5, p.iter().map(|v| *v * 0.1).collect())),
            vec![1.0, 2.0],
            &data,
            &labels,
        )
        .unwrap();

    let ck = persist::read_checkpoint(&path).unwrap();
    // 2 epochs x 2 mini-batches.
    assert_eq!(ck.step, 4);
    assert_eq!(ck.params, params);
    assert_eq!(ck.first_moment.len(), params.len());
    assert_eq!(ck.second_moment.len(), params.len());

    // Restoring hands back the checkpointed parameters and step counter.
    let mut resumed = AdaptiveSgd::new(AdaptiveSgdConfig {
        epochs: 1,
        mini_batch_size: 4,
        test_frequency: 0,
        seed: Some(4),
        ..AdaptiveSgdConfig::default()
    })
    .unwrap();
    let restored = resumed.restore(ck);
    assert_eq!(restored, params);
}

#[test]
fn checkpoint_roundtrip_preserves_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.bin");
    let original = Checkpoint {
        step: 42,
        params: vec![1.0, -2.5, 3.25],
        first_moment: vec![0.1, 0.2, 0.3],
        second_moment: vec![0.01, 0.02, 0.03],
    };
    persist::write_checkpoint(&path, &original).unwrap();
    let loaded = persist::read_checkpoint(&path).unwrap();
    assert_eq!(loaded, original);
}

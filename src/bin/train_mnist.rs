//! Trains the LeNet-style convolution network on MNIST, persists the
//! architecture descriptor and parameter blob, and prints accuracy for the
//! train/validation/test splits.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

use gradnet::backend::ndarray::NdArray;
use gradnet::data::{collate, mnist::MnistData};
use gradnet::engine::arch::{LayerSpec, NetworkSpec};
use gradnet::engine::layer::Conv2dLayerConfig;
use gradnet::engine::metric::calculate_accuracy;
use gradnet::engine::node::{Activation, Padding, Pooling};
use gradnet::engine::optimizer::{AdaptiveSgd, AdaptiveSgdConfig};
use gradnet::engine::persist;

const DATA_ROOT: &str = "data/mnist";
const VALIDATION_SAMPLES: usize = 5_000;
const BATCH: usize = 32;
const CLASSES: usize = 10;

#[derive(Parser)]
#[command(about = "Train a convolution network on MNIST")]
struct Args {
    /// Run index used to suffix the output artifacts.
    #[arg(default_value_t = 0)]
    run: usize,

    /// Resume from this run's checkpoint if present.
    #[arg(long)]
    resume: bool,
}

fn network() -> NetworkSpec {
    let conv = |n_filters| {
        LayerSpec::Conv2d(Conv2dLayerConfig {
            n_filters,
            filter_h: 5,
            filter_w: 5,
            padding: Padding::Same,
            stride: 1,
            activation: Activation::Relu,
            batch_norm: false,
            pooling: Pooling::Max,
            pool_h: 2,
            pool_w: 2,
            pool_stride: 2,
        })
    };
    NetworkSpec {
        layers: vec![
            LayerSpec::Input {
                shape: vec![BATCH, 1, 28, 28],
            },
            LayerSpec::Dropout { rate: 0.05 },
            conv(20),
            conv(50),
            LayerSpec::Flatten,
            LayerSpec::Dropout { rate: 0.1 },
            LayerSpec::Dense {
                width: 500,
                activation: Activation::Relu,
                dropout: 0.1,
                batch_norm: false,
            },
            LayerSpec::Dense {
                width: CLASSES,
                activation: Activation::Softmax,
                dropout: 0.0,
                batch_norm: false,
            },
            LayerSpec::SoftmaxCrossEntropy,
        ],
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    println!("training run {}", args.run);

    let train = MnistData::new(DATA_ROOT, true, true).context("loading MNIST training set")?;
    let test = MnistData::new(DATA_ROOT, false, true).context("loading MNIST test set")?;
    let split_at = train.len() - VALIDATION_SAMPLES;
    let (train, valid) = train.split(split_at);

    let (x_train, y_train) = collate::to_tensors::<NdArray>(&train, CLASSES);
    let (x_valid, y_valid) = collate::to_tensors::<NdArray>(&valid, CLASSES);
    let (x_test, y_test) = collate::to_tensors::<NdArray>(&test, CLASSES);

    let spec = network();
    let mut graph = spec.build::<NdArray>(None)?;
    println!("{}", graph.summary());

    let checkpoint_path = PathBuf::from(format!("checkpoint_{}.bin", args.run));
    let mut optimizer = AdaptiveSgd::new(AdaptiveSgdConfig {
        epochs: 10,
        mini_batch_size: BATCH,
        initial_learning_rate: 1e-3,
        checkpoint: Some(checkpoint_path.clone()),
        ..AdaptiveSgdConfig::default()
    })?;

    let mut params0 = graph.unroll_gradient_parameters();
    if args.resume && checkpoint_path.exists() {
        let ck = persist::read_checkpoint(&checkpoint_path)
            .with_context(|| format!("reading {}", checkpoint_path.display()))?;
        println!("resuming from step {}", ck.step);
        params0 = optimizer.restore(ck);
    }

    let params = optimizer.minimize::<NdArray, _>(
        |p, d, l| graph.cost_and_gradient(p, d, l),
        params0,
        &x_train,
        &y_train,
    )?;
    graph.attach_parameters(&params)?;

    spec.save(Path::new(&format!("architecture_{}.json", args.run)))?;
    persist::write_parameters(Path::new(&format!("parameters_{}.bin", args.run)), &graph)?;

    println!("trained run {}", args.run);
    println!(
        "accuracy on the train set: {:.4}",
        calculate_accuracy(&mut graph, &x_train, &y_train)?
    );
    println!(
        "accuracy on the validation set: {:.4}",
        calculate_accuracy(&mut graph, &x_valid, &y_valid)?
    );
    println!(
        "accuracy on the test set: {:.4}",
        calculate_accuracy(&mut graph, &x_test, &y_test)?
    );
    Ok(())
}

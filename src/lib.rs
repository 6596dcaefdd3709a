//! Computation-graph neural networks: layer builders over a closed set of
//! tensor operations, driven by an adaptive mini-batch training loop.

pub mod backend;
pub mod data;
pub mod engine;
pub mod error;

pub use error::{Error, Result};

#[cfg(test)]
mod tests {
    use crate::backend::ndarray::NdArray;
    use crate::backend::Backend;
    use crate::engine::layer::add_dense_layer;
    use crate::engine::node::Activation;
    use crate::engine::optimizer::{AdaptiveSgd, AdaptiveSgdConfig};
    use crate::engine::Graph;

    // Two gaussian blobs, linearly separable.
    fn toy_data() -> (<NdArray as Backend>::Tensor, <NdArray as Backend>::Tensor) {
        let mut pixels = Vec::new();
        let mut labels = Vec::new();
        for i in 0..16 {
            let (center, class) = if i % 2 == 0 { (1.0, 0) } else { (-1.0, 1) };
            let jitter = (i as f32) * 0.01;
            pixels.extend([center + jitter, center - jitter]);
            let mut one_hot = [0.0, 0.0];
            one_hot[class] = 1.0;
            labels.extend(one_hot);
        }
        (
            NdArray::from_vec(pixels, &[16, 2]),
            NdArray::from_vec(labels, &[16, 2]),
        )
    }

    #[test]
    fn dense_network_trains_on_toy_data() {
        let (data, labels) = toy_data();

        let mut graph = Graph::<NdArray>::with_seed(11);
        let input = graph.add_feeder(vec![16, 2]).unwrap();
        let h = add_dense_layer(&mut graph, input, 8, Activation::Relu, 0.0, false).unwrap();
        let out = add_dense_layer(&mut graph, h, 2, Activation::Softmax, 0.0, false).unwrap();
        graph.add_cost(out).unwrap();

        let params0 = graph.unroll_gradient_parameters();
        let (initial_cost, _) = graph.cost_and_gradient(&params0, &data, &labels).unwrap();

        let mut optimizer = AdaptiveSgd::new(AdaptiveSgdConfig {
            epochs: 80,
            mini_batch_size: 8,
            initial_learning_rate: 1e-2,
            test_frequency: 0,
            seed: Some(3),
            ..AdaptiveSgdConfig::default()
        })
        .unwrap();
        let params = optimizer
            .minimize::<NdArray, _>(
                |p, d, l| graph.cost_and_gradient(p, d, l),
                params0,
                &data,
                &labels,
            )
            .unwrap();

        let (final_cost, _) = graph.cost_and_gradient(&params, &data, &labels).unwrap();
        assert!(
            final_cost < initial_cost,
            "training did not reduce the cost: {} -> {}",
            initial_cost,
            final_cost
        );

        graph.attach_parameters(&params).unwrap();
        let acc = crate::engine::metric::calculate_accuracy(&mut graph, &data, &labels).unwrap();
        assert!(acc > 0.9, "accuracy {} too low for separable blobs", acc);
    }
}

use gradnet::backend::ndarray::NdArray;
use gradnet::backend::Backend;
use gradnet::engine::layer::add_dense_layer;
use gradnet::engine::node::Activation;
use gradnet::engine::Graph;
use gradnet::Error;

type Tensor = <NdArray as Backend>::Tensor;

fn toy_batch(samples: usize, features: usize, classes: usize) -> (Tensor, Tensor) {
    // Deterministic, well away from relu kinks.
    let pixels: Vec<f32> = (0..samples * features)
        .map(|i| ((i * 7 + 3) % 11) as f32 / 11.0 + 0.2)
        .collect();
    let mut one_hot = vec![0.0; samples * classes];
    for s in 0..samples {
        one_hot[s * classes + s % classes] = 1.0;
    }
    (
        NdArray::from_vec(pixels, &[samples, features]),
        NdArray::from_vec(one_hot, &[samples, classes]),
    )
}

fn dense_net(seed: u64, batch: usize, features: usize, classes: usize) -> Graph<NdArray> {
    let mut graph = Graph::<NdArray>::with_seed(seed);
    let input = graph.add_feeder(vec![batch, features]).unwrap();
    let h = add_dense_layer(&mut graph, input, 6, Activation::Relu, 0.0, false).unwrap();
    let out = add_dense_layer(&mut graph, h, classes, Activation::Softmax, 0.0, false).unwrap();
    graph.add_cost(out).unwrap();
    graph
}

#[test]
fn flatten_then_restore_is_idempotent() {
    let mut graph = dense_net(5, 4, 3, 2);
    let params = graph.unroll_gradient_parameters();
    graph.attach_parameters(&params).unwrap();
    let round_tripped = graph.unroll_gradient_parameters();
    assert_eq!(params, round_tripped);
}

#[test]
fn cost_and_gradient_is_deterministic() {
    let mut graph = dense_net(9, 4, 3, 2);
    let (data, labels) = toy_batch(4, 3, 2);
    let params = graph.unroll_gradient_parameters();

    let (c1, g1) = graph.cost_and_gradient(&params, &data, &labels).unwrap();
    let (c2, g2) = graph.cost_and_gradient(&params, &data, &labels).unwrap();
    assert_eq!(c1, c2);
    assert_eq!(g1, g2);
}

#[test]
fn gradients_match_finite_differences() {
    // Softmax everywhere keeps the objective smooth.
    let mut graph = Graph::<NdArray>::with_seed(17);
    let input = graph.add_feeder(vec![4, 3]).unwrap();
    let h = add_dense_layer(&mut graph, input, 5, Activation::Softmax, 0.0, false).unwrap();
    let out = add_dense_layer(&mut graph, h, 2, Activation::Softmax, 0.0, false).unwrap();
    graph.add_cost(out).unwrap();

    let (data, labels) = toy_batch(4, 3, 2);
    let params = graph.unroll_gradient_parameters();
    let (_, grad) = graph.cost_and_gradient(&params, &data, &labels).unwrap();

    let h_step = 1e-2f32;
    for k in (0..params.len()).step_by(5) {
        let mut plus = params.clone();
        plus[k] += h_step;
        let (c_plus, _) = graph.cost_and_gradient(&plus, &data, &labels).unwrap();
        let mut minus = params.clone();
        minus[k] -= h_step;
        let (c_minus, _) = graph.cost_and_gradient(&minus, &data, &labels).unwrap();

        let numeric = (c_plus - c_minus) / (2.0 * h_step);
        let tolerance = 2e-2 * grad[k].abs().max(0.05);
        assert!(
            (numeric - grad[k]).abs() < tolerance,
            "param {}: analytic {} vs numeric {}",
            k,
            grad[k],
            numeric
        );
    }
}

#[test]
fn batch_norm_gradients_match_finite_differences() {
    let mut graph = Graph::<NdArray>::with_seed(23);
    let input = graph.add_feeder(vec![4, 3]).unwrap();
    let out = add_dense_layer(&mut graph, input, 2, Activation::Softmax, 0.0, true).unwrap();
    graph.add_cost(out).unwrap();

    let (data, labels) = toy_batch(4, 3, 2);
    let params = graph.unroll_gradient_parameters();
    let (_, grad) = graph.cost_and_gradient(&params, &data, &labels).unwrap();

    let h_step = 1e-2f32;
    for k in 0..params.len() {
        let mut plus = params.clone();
        plus[k] += h_step;
        let (c_plus, _) = graph.cost_and_gradient(&plus, &data, &labels).unwrap();
        let mut minus = params.clone();
        minus[k] -= h_step;
        let (c_minus, _) = graph.cost_and_gradient(&minus, &data, &labels).unwrap();

        let numeric = (c_plus - c_minus) / (2.0 * h_step);
        let tolerance = 3e-2 * grad[k].abs().max(0.05);
        assert!(
            (numeric - grad[k]).abs() < tolerance,
            "param {}: analytic {} vs numeric {}",
            k,
            grad[k],
            numeric
        );
    }
}

#[test]
fn smaller_mini_batches_may_rebind_the_feeder() {
    let mut graph = dense_net(3, 16, 3, 2);
    // The graph was declared with batch 16 but accepts a batch of 4.
    let (data, labels) = toy_batch(4, 3, 2);
    let params = graph.unroll_gradient_parameters();
    let (cost, grad) = graph.cost_and_gradient(&params, &data, &labels).unwrap();
    assert!(cost.is_finite());
    assert_eq!(grad.len(), params.len());
}

#[test]
fn predict_returns_class_scores() {
    let mut graph = dense_net(3, 4, 3, 2);
    let (data, _) = toy_batch(4, 3, 2);
    let scores = graph.predict(data).unwrap();
    assert_eq!(NdArray::shape(&scores), vec![4, 2]);
    // The softmax output sums to one per row.
    let v = NdArray::to_vec(&scores);
    for row in v.chunks(2) {
        assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }
}

#[test]
fn second_feeder_is_rejected() {
    let mut graph = Graph::<NdArray>::new();
    graph.add_feeder(vec![4, 3]).unwrap();
    let err = graph.add_feeder(vec![4, 3]).unwrap_err();
    assert!(matches!(err, Error::State(_)));
}

#[test]
fn second_cost_is_rejected() {
    let mut graph = Graph::<NdArray>::with_seed(2);
    let input = graph.add_feeder(vec![4, 3]).unwrap();
    let out = add_dense_layer(&mut graph, input, 2, Activation::Softmax, 0.0, false).unwrap();
    graph.add_cost(out).unwrap();
    let err = graph.add_cost(out).unwrap_err();
    assert!(matches!(err, Error::State(_)));
}

#[test]
fn forward_before_binding_data_is_a_state_error() {
    let mut graph = dense_net(2, 4, 3, 2);
    graph
        .bind_labels(NdArray::from_vec(vec![1.0, 0.0], &[1, 2]))
        .unwrap();
    let err = graph.feed_forward().unwrap_err();
    assert!(matches!(err, Error::State(_)));
}

#[test]
fn forward_before_binding_labels_is_a_state_error() {
    let mut graph = dense_net(2, 4, 3, 2);
    let (data, _) = toy_batch(4, 3, 2);
    graph.bind_input(data).unwrap();
    let err = graph.feed_forward().unwrap_err();
    assert!(matches!(err, Error::State(_)));
}

#[test]
fn backward_before_forward_is_a_state_error() {
    let mut graph = dense_net(2, 4, 3, 2);
    let err = graph.feed_backward().unwrap_err();
    assert!(matches!(err, Error::State(_)));
}

#[test]
fn mismatched_data_shape_is_a_shape_error() {
    let mut graph = dense_net(2, 4, 3, 2);
    let err = graph
        .bind_input(NdArray::from_vec(vec![0.0; 8], &[4, 2]))
        .unwrap_err();
    assert!(matches!(err, Error::Shape(_)));
}

#[test]
fn mismatched_parameter_vector_is_a_shape_error() {
    let mut graph = dense_net(2, 4, 3, 2);
    let err = graph.attach_parameters(&[0.0; 3]).unwrap_err();
    assert!(matches!(err, Error::Shape(_)));
}

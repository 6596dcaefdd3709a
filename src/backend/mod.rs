use std::fmt::Debug;

pub mod ndarray;

/// Element type shared by every backend.
pub type Elm = f32;

/// Numeric kernels behind the computation graph.
///
/// The graph layer composes these primitives and never touches element data
/// directly. Shape agreement is validated by the caller before a kernel is
/// invoked; kernels may assume well-formed inputs.
pub trait Backend: Clone + Debug + 'static {
    type Tensor: Clone + Debug;

    fn zeros(shape: &[usize]) -> Self::Tensor;
    fn random_normal(shape: &[usize], mean: Elm, std: Elm, seed: Option<u64>) -> Self::Tensor;
    fn random_uniform(shape: &[usize], low: Elm, high: Elm, seed: Option<u64>) -> Self::Tensor;

    fn from_vec(vec: Vec<Elm>, shape: &[usize]) -> Self::Tensor;
    // Flattening to a CPU vector; row-major order.
    fn to_vec(tensor: &Self::Tensor) -> Vec<Elm>;

    fn shape(tensor: &Self::Tensor) -> Vec<usize>;

    // Elementwise arithmetic; the right-hand side may broadcast into the left.
    fn add(a: &Self::Tensor, b: &Self::Tensor) -> Self::Tensor;
    fn sub(a: &Self::Tensor, b: &Self::Tensor) -> Self::Tensor;
    fn mul(a: &Self::Tensor, b: &Self::Tensor) -> Self::Tensor;
    fn div(a: &Self::Tensor, b: &Self::Tensor) -> Self::Tensor;
    fn scale(a: &Self::Tensor, k: Elm) -> Self::Tensor;

    /// 2-D matrix product.
    fn matmul(a: &Self::Tensor, b: &Self::Tensor) -> Self::Tensor;
    /// Swap the two axes of a 2-D tensor.
    fn transpose(a: &Self::Tensor) -> Self::Tensor;

    fn reshape(a: &Self::Tensor, shape: &[usize]) -> Self::Tensor;

    fn sum(a: &Self::Tensor, axis: Option<usize>, keep_dims: bool) -> Self::Tensor;

    /// Elementwise a > b as a 1.0/0.0 mask; b may broadcast.
    fn gt(a: &Self::Tensor, b: &Self::Tensor) -> Self::Tensor;
    fn sqrt(a: &Self::Tensor) -> Self::Tensor;
    fn log(a: &Self::Tensor) -> Self::Tensor;

    fn relu(a: &Self::Tensor) -> Self::Tensor;
    fn softmax(a: &Self::Tensor, axis: Option<usize>) -> Self::Tensor;

    /// Select rows along axis 0, in the given order. Used for mini-batching.
    fn take_rows(a: &Self::Tensor, indices: &[usize]) -> Self::Tensor;

    /// 2-D convolution over NCHW input with an (F, C, fh, fw) filter bank.
    /// Padding is explicit: (top, bottom, left, right).
    fn conv2d(
        input: &Self::Tensor,
        filters: &Self::Tensor,
        stride: usize,
        pads: (usize, usize, usize, usize),
    ) -> Self::Tensor;

    /// Gradients of `conv2d` with respect to (input, filters).
    fn conv2d_backward(
        input: &Self::Tensor,
        filters: &Self::Tensor,
        grad_out: &Self::Tensor,
        stride: usize,
        pads: (usize, usize, usize, usize),
    ) -> (Self::Tensor, Self::Tensor);

    /// 2-D max pooling over NCHW input; windows never cross the input edge.
    fn max_pool2d(
        input: &Self::Tensor,
        pool_h: usize,
        pool_w: usize,
        stride: usize,
    ) -> Self::Tensor;

    /// Gradient of `max_pool2d`: routes each upstream value to the first
    /// maximum of its window.
    fn max_pool2d_backward(
        input: &Self::Tensor,
        grad_out: &Self::Tensor,
        pool_h: usize,
        pool_w: usize,
        stride: usize,
    ) -> Self::Tensor;
}

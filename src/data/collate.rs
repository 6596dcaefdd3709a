use crate::backend::{Backend, Elm};
use crate::data::mnist::MnistData;

/// Collates a whole split into backend tensors.
///
/// Images become `(N, 1, rows, cols)` with pixels normalized to [0, 1];
/// labels become one-hot `(N, classes)`.
pub fn to_tensors<B: Backend>(data: &MnistData, classes: usize) -> (B::Tensor, B::Tensor) {
    let n = data.len();
    let (rows, cols) = (data.num_rows, data.num_cols);

    let mut pixels = Vec::with_capacity(n * rows * cols);
    let mut one_hot = vec![0.0 as Elm; n * classes];
    for i in 0..n {
        pixels.extend(data.image(i).iter().map(|&p| p as Elm / 255.0));
        one_hot[i * classes + data.label(i) as usize] = 1.0;
    }

    (
        B::from_vec(pixels, &[n, 1, rows, cols]),
        B::from_vec(one_hot, &[n, classes]),
    )
}

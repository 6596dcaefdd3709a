use crate::backend::{Backend, Elm};
use crate::error::{Error, Result};

/// Produces a parameter tensor for a layer builder.
///
/// With `scaled`, values are drawn from a normal distribution whose spread
/// shrinks with the fan-in (`1/sqrt(fan_in)`). Deep stacks diverge without
/// this scaling. Without `scaled` (bias-style parameters) the tensor is
/// zero-filled.
pub fn generate<B: Backend>(
    shape: &[usize],
    scaled: bool,
    fan_in: usize,
    seed: Option<u64>,
) -> Result<B::Tensor> {
    if shape.is_empty() || shape.iter().any(|&d| d == 0) {
        return Err(Error::shape(format!(
            "requested parameter shape {:?} has a non-positive dimension",
            shape
        )));
    }
    if scaled {
        if fan_in == 0 {
            return Err(Error::shape("fan-in must be positive".to_string()));
        }
        let std = 1.0 / (fan_in as Elm).sqrt();
        Ok(B::random_normal(shape, 0.0, std, seed))
    } else {
        Ok(B::zeros(shape))
    }
}

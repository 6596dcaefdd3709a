//! Forward/backward dispatch for the closed operation set.
//!
//! Each arm maps one `OpKind` tag onto backend kernels. The graph validates
//! shapes at registration time; this module assumes well-formed inputs and
//! only raises `State` errors for missing runtime bindings.

use crate::backend::{Backend, Elm};
use crate::engine::node::{OpKind, Padding};
use crate::engine::shape;
use crate::error::{Error, Result};

/// Evaluates one operation. Returns the output value together with optional
/// per-call auxiliary state (dropout mask, cached class probabilities) that
/// the backward sweep reuses.
///
/// `dropout_seed` is `Some` during training; `None` turns dropout nodes into
/// pass-throughs for inference.
pub(crate) fn forward<B: Backend>(
    op: &OpKind,
    inputs: &[&B::Tensor],
    labels: Option<&B::Tensor>,
    dropout_seed: Option<u64>,
) -> Result<(B::Tensor, Option<B::Tensor>)> {
    match op {
        OpKind::Variable => Err(Error::state("variables are bound, not evaluated")),
        OpKind::Linear => {
            let (x, w) = (inputs[0], inputs[1]);
            Ok((B::matmul(x, &B::transpose(w)), None))
        }
        OpKind::Add => Ok((B::add(inputs[0], inputs[1]), None)),
        OpKind::Dropout { rate } => {
            let x = inputs[0];
            match dropout_seed {
                Some(seed) => {
                    let threshold = B::from_vec(vec![*rate], &[1]);
                    let u = B::random_uniform(&B::shape(x), 0.0, 1.0, Some(seed));
                    // Inverted dropout: surviving units are rescaled so the
                    // expected activation is unchanged.
                    let mask = B::scale(&B::gt(&u, &threshold), 1.0 / (1.0 - rate));
                    Ok((B::mul(x, &mask), Some(mask)))
                }
                None => Ok((x.clone(), None)),
            }
        }
        OpKind::BatchNorm { epsilon } => {
            let (x, beta, gamma) = (inputs[0], inputs[1], inputs[2]);
            let (xhat, _, _) = normalize::<B>(x, gamma, *epsilon)?;
            Ok((B::add(&B::mul(&xhat, gamma), beta), None))
        }
        OpKind::Conv2d { stride, padding } => {
            let (x, f) = (inputs[0], inputs[1]);
            let pads = conv_pads::<B>(x, f, *padding, *stride)?;
            Ok((B::conv2d(x, f, *stride, pads), None))
        }
        OpKind::MaxPool2d {
            pool_h,
            pool_w,
            stride,
        } => Ok((B::max_pool2d(inputs[0], *pool_h, *pool_w, *stride), None)),
        OpKind::Relu => Ok((B::relu(inputs[0]), None)),
        OpKind::Softmax => Ok((B::softmax(inputs[0], None), None)),
        OpKind::Flatten => {
            let x = inputs[0];
            let xs = B::shape(x);
            let features: usize = xs[1..].iter().product();
            Ok((B::reshape(x, &[xs[0], features]), None))
        }
        OpKind::SoftmaxCrossEntropy => {
            let x = inputs[0];
            let labels =
                labels.ok_or_else(|| Error::state("cost evaluated before labels were bound"))?;
            let p = B::softmax(x, None);
            if B::shape(labels) != B::shape(&p) {
                return Err(Error::shape(format!(
                    "labels shape {:?} does not match class scores {:?}",
                    B::shape(labels),
                    B::shape(&p)
                )));
            }
            let n = B::shape(x)[0] as Elm;
            let eps = B::from_vec(vec![1e-12], &[1]);
            let logp = B::log(&B::add(&p, &eps));
            let cost = B::scale(&B::sum(&B::mul(labels, &logp), None, false), -1.0 / n);
            Ok((cost, Some(p)))
        }
    }
}

/// Computes the gradients with respect to each input, given the gradient of
/// the output. Gradients are returned in input order.
pub(crate) fn backward<B: Backend>(
    op: &OpKind,
    gy: &B::Tensor,
    inputs: &[&B::Tensor],
    output: Option<&B::Tensor>,
    aux: Option<&B::Tensor>,
    labels: Option<&B::Tensor>,
) -> Result<Vec<B::Tensor>> {
    match op {
        OpKind::Variable => Ok(vec![]),
        OpKind::Linear => {
            let (x, w) = (inputs[0], inputs[1]);
            let gx = B::matmul(gy, w);
            let gw = B::matmul(&B::transpose(gy), x);
            Ok(vec![gx, gw])
        }
        OpKind::Add => {
            let ga = reduce_to::<B>(gy, &B::shape(inputs[0]));
            let gb = reduce_to::<B>(gy, &B::shape(inputs[1]));
            Ok(vec![ga, gb])
        }
        OpKind::Dropout { .. } => {
            let mask = aux.ok_or_else(|| {
                Error::state("dropout backward invoked without a cached forward mask")
            })?;
            Ok(vec![B::mul(gy, mask)])
        }
        OpKind::BatchNorm { epsilon } => {
            let (x, beta, gamma) = (inputs[0], inputs[1], inputs[2]);
            let (xhat, std, axes) = normalize::<B>(x, gamma, *epsilon)?;
            let x_shape = B::shape(x);
            let m: Elm = axes.iter().map(|&a| x_shape[a]).product::<usize>() as Elm;

            let dbeta = reduce_to::<B>(gy, &B::shape(beta));
            let dgamma = reduce_to::<B>(&B::mul(gy, &xhat), &B::shape(gamma));

            let dxhat = B::mul(gy, gamma);
            let sum_dxhat = sum_axes::<B>(&dxhat, &axes);
            let sum_dxhat_xhat = sum_axes::<B>(&B::mul(&dxhat, &xhat), &axes);
            let inner = B::add(&B::mul(&xhat, &sum_dxhat_xhat), &sum_dxhat);
            let dx = B::div(&B::sub(&dxhat, &B::scale(&inner, 1.0 / m)), &std);
            Ok(vec![dx, dbeta, dgamma])
        }
        OpKind::Conv2d { stride, padding } => {
            let (x, f) = (inputs[0], inputs[1]);
            let pads = conv_pads::<B>(x, f, *padding, *stride)?;
            let (gx, gf) = B::conv2d_backward(x, f, gy, *stride, pads);
            Ok(vec![gx, gf])
        }
        OpKind::MaxPool2d {
            pool_h,
            pool_w,
            stride,
        } => Ok(vec![B::max_pool2d_backward(
            inputs[0], gy, *pool_h, *pool_w, *stride,
        )]),
        OpKind::Relu => {
            let x = inputs[0];
            let mask = B::gt(x, &B::zeros(&B::shape(x)));
            Ok(vec![B::mul(gy, &mask)])
        }
        OpKind::Softmax => {
            let p = output
                .ok_or_else(|| Error::state("softmax backward invoked before its forward pass"))?;
            let last = B::shape(p).len() - 1;
            let s = B::sum(&B::mul(gy, p), Some(last), true);
            Ok(vec![B::mul(p, &B::sub(gy, &s))])
        }
        OpKind::Flatten => Ok(vec![B::reshape(gy, &B::shape(inputs[0]))]),
        OpKind::SoftmaxCrossEntropy => {
            let labels =
                labels.ok_or_else(|| Error::state("cost backward invoked without bound labels"))?;
            let p = aux.ok_or_else(|| {
                Error::state("cost backward invoked before its forward pass")
            })?;
            let n = B::shape(p)[0] as Elm;
            let upstream = B::to_vec(gy)[0];
            Ok(vec![B::scale(&B::sub(p, labels), upstream / n)])
        }
    }
}

/// Padding amounts for a convolution, derived from the actual tensor shapes
/// so re-bound batches of any size work.
fn conv_pads<B: Backend>(
    x: &B::Tensor,
    filters: &B::Tensor,
    padding: Padding,
    stride: usize,
) -> Result<(usize, usize, usize, usize)> {
    let xs = B::shape(x);
    let fs = B::shape(filters);
    shape::conv2d_pads((xs[2], xs[3]), (fs[2], fs[3]), padding, stride)
}

/// Shared batch-normalization statistics: returns (xhat, std, normalized
/// axes). The axes are those where gamma carries a 1-sized dim.
fn normalize<B: Backend>(
    x: &B::Tensor,
    gamma: &B::Tensor,
    epsilon: f32,
) -> Result<(B::Tensor, B::Tensor, Vec<usize>)> {
    let x_shape = B::shape(x);
    let axes = shape::broadcast_into(&x_shape, &B::shape(gamma))?;
    let m: Elm = axes.iter().map(|&a| x_shape[a]).product::<usize>() as Elm;
    let mean = B::scale(&sum_axes::<B>(x, &axes), 1.0 / m);
    let xc = B::sub(x, &mean);
    let var = B::scale(&sum_axes::<B>(&B::mul(&xc, &xc), &axes), 1.0 / m);
    let eps = B::from_vec(vec![epsilon], &[1]);
    let std = B::sqrt(&B::add(&var, &eps));
    Ok((B::div(&xc, &std), std, axes))
}

fn sum_axes<B: Backend>(t: &B::Tensor, axes: &[usize]) -> B::Tensor {
    let mut cur = t.clone();
    for &ax in axes {
        cur = B::sum(&cur, Some(ax), true);
    }
    cur
}

/// Sums `t` down to `target` (the reverse of broadcasting), used to fold an
/// upstream gradient back onto a bias-shaped input.
fn reduce_to<B: Backend>(t: &B::Tensor, target: &[usize]) -> B::Tensor {
    let mut cur = t.clone();
    let mut shape = B::shape(&cur);
    while shape.len() > target.len() {
        cur = B::sum(&cur, Some(0), false);
        shape = B::shape(&cur);
    }
    for ax in 0..target.len() {
        if target[ax] == 1 && shape[ax] != 1 {
            cur = B::sum(&cur, Some(ax), true);
            shape = B::shape(&cur);
        }
    }
    cur
}

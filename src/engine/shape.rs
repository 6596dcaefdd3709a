use crate::engine::node::{OpKind, Padding};
use crate::error::{Error, Result};

/// Infers the output shape of an operation from its input shapes, or fails
/// with a `Shape` error when the inputs are incompatible.
pub fn infer(op: &OpKind, inputs: &[&[usize]]) -> Result<Vec<usize>> {
    match op {
        OpKind::Variable => Err(Error::state(
            "variables carry their own shape and are not inferred",
        )),
        OpKind::Linear => {
            expect_arity(op, inputs, 2)?;
            let (x, w) = (inputs[0], inputs[1]);
            if x.len() != 2 || w.len() != 2 {
                return Err(Error::shape(format!(
                    "Linear expects rank-2 inputs, got {:?} and {:?}",
                    x, w
                )));
            }
            if x[1] != w[1] {
                return Err(Error::shape(format!(
                    "Linear feature mismatch: input {:?} vs weight {:?}",
                    x, w
                )));
            }
            Ok(vec![x[0], w[0]])
        }
        OpKind::Add => {
            expect_arity(op, inputs, 2)?;
            broadcast_into(inputs[0], inputs[1]).map(|_| inputs[0].to_vec())
        }
        OpKind::Dropout { .. } | OpKind::Relu | OpKind::Softmax => {
            expect_arity(op, inputs, 1)?;
            Ok(inputs[0].to_vec())
        }
        OpKind::BatchNorm { .. } => {
            expect_arity(op, inputs, 3)?;
            let x = inputs[0];
            for scale in &inputs[1..] {
                if scale.len() != x.len() {
                    return Err(Error::shape(format!(
                        "BatchNorm scale rank {:?} does not match input {:?}",
                        scale, x
                    )));
                }
                broadcast_into(x, scale)?;
            }
            Ok(x.to_vec())
        }
        OpKind::Conv2d { stride, padding } => {
            expect_arity(op, inputs, 2)?;
            let (x, f) = (inputs[0], inputs[1]);
            if x.len() != 4 || f.len() != 4 {
                return Err(Error::shape(format!(
                    "Conv2d expects rank-4 inputs, got {:?} and {:?}",
                    x, f
                )));
            }
            if x[1] != f[1] {
                return Err(Error::shape(format!(
                    "Conv2d channel mismatch: input {:?} vs filters {:?}",
                    x, f
                )));
            }
            let (oh, ow) = conv2d_output((x[2], x[3]), (f[2], f[3]), *padding, *stride)?;
            Ok(vec![x[0], f[0], oh, ow])
        }
        OpKind::MaxPool2d {
            pool_h,
            pool_w,
            stride,
        } => {
            expect_arity(op, inputs, 1)?;
            let x = inputs[0];
            if x.len() != 4 {
                return Err(Error::shape(format!(
                    "MaxPool2d expects a rank-4 input, got {:?}",
                    x
                )));
            }
            let (oh, ow) = pool2d_output((x[2], x[3]), (*pool_h, *pool_w), *stride)?;
            Ok(vec![x[0], x[1], oh, ow])
        }
        OpKind::Flatten => {
            expect_arity(op, inputs, 1)?;
            let x = inputs[0];
            if x.len() < 2 {
                return Err(Error::shape(format!(
                    "Flatten expects at least rank 2, got {:?}",
                    x
                )));
            }
            Ok(vec![x[0], x[1..].iter().product()])
        }
        OpKind::SoftmaxCrossEntropy => {
            expect_arity(op, inputs, 1)?;
            let x = inputs[0];
            if x.len() != 2 {
                return Err(Error::shape(format!(
                    "SoftmaxCrossEntropy expects rank-2 class scores, got {:?}",
                    x
                )));
            }
            Ok(vec![])
        }
    }
}

/// Spatial output size of a convolution for the given padding mode.
pub fn conv2d_output(
    input: (usize, usize),
    filter: (usize, usize),
    padding: Padding,
    stride: usize,
) -> Result<(usize, usize)> {
    let oh = conv_dim(input.0, filter.0, padding, stride)?;
    let ow = conv_dim(input.1, filter.1, padding, stride)?;
    Ok((oh, ow))
}

fn conv_dim(dim: usize, filter: usize, padding: Padding, stride: usize) -> Result<usize> {
    match padding {
        Padding::Same => Ok((dim + stride - 1) / stride),
        Padding::Valid => {
            if filter > dim {
                return Err(Error::shape(format!(
                    "VALID convolution with filter {} over dimension {} \
                     yields a non-positive output size",
                    filter, dim
                )));
            }
            Ok((dim - filter) / stride + 1)
        }
    }
}

/// Explicit (top, bottom, left, right) padding realizing the padding mode.
/// SAME follows the usual convention: total padding `(out-1)*stride + filter
/// - dim`, split with the smaller half leading.
pub fn conv2d_pads(
    input: (usize, usize),
    filter: (usize, usize),
    padding: Padding,
    stride: usize,
) -> Result<(usize, usize, usize, usize)> {
    match padding {
        Padding::Valid => Ok((0, 0, 0, 0)),
        Padding::Same => {
            let (oh, ow) = conv2d_output(input, filter, padding, stride)?;
            let total_h = ((oh - 1) * stride + filter.0).saturating_sub(input.0);
            let total_w = ((ow - 1) * stride + filter.1).saturating_sub(input.1);
            Ok((
                total_h / 2,
                total_h - total_h / 2,
                total_w / 2,
                total_w - total_w / 2,
            ))
        }
    }
}

/// Spatial output size of a pooling window; windows never cross the edge.
pub fn pool2d_output(
    input: (usize, usize),
    pool: (usize, usize),
    stride: usize,
) -> Result<(usize, usize)> {
    if pool.0 > input.0 || pool.1 > input.1 {
        return Err(Error::shape(format!(
            "pooling window {:?} exceeds input {:?}",
            pool, input
        )));
    }
    Ok((
        (input.0 - pool.0) / stride + 1,
        (input.1 - pool.1) / stride + 1,
    ))
}

fn expect_arity(op: &OpKind, inputs: &[&[usize]], arity: usize) -> Result<()> {
    if inputs.len() != arity {
        return Err(Error::shape(format!(
            "{} requires {} input(s), got {}",
            op.name(),
            arity,
            inputs.len()
        )));
    }
    Ok(())
}

/// Checks that `b` broadcasts into `a` (trailing-aligned, 1-sized dims
/// stretch). Returns the broadcast axes of `b`.
pub fn broadcast_into(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    if b.len() > a.len() {
        return Err(Error::shape(format!(
            "cannot broadcast {:?} into lower-rank {:?}",
            b, a
        )));
    }
    let offset = a.len() - b.len();
    let mut axes: Vec<usize> = (0..offset).collect();
    for (i, (&ad, &bd)) in a[offset..].iter().zip(b).enumerate() {
        if bd == ad {
            continue;
        }
        if bd == 1 {
            axes.push(offset + i);
        } else {
            return Err(Error::shape(format!(
                "cannot broadcast {:?} into {:?} (axis {})",
                b,
                a,
                offset + i
            )));
        }
    }
    Ok(axes)
}

//! Layer builders: compose operation nodes into dense and convolution
//! layers, returning the terminal node as the next layer's input.
//!
//! Builders validate their configuration eagerly and fail before any node is
//! registered with the graph.

use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::engine::node::{Activation, NodeId, OpKind, Padding, Pooling};
use crate::engine::{init, shape, Graph};
use crate::error::{Error, Result};

const BATCH_NORM_EPSILON: f32 = 1e-5;

/// Appends a fully-connected layer: linear transform, bias, optional
/// dropout, optional batch normalization, activation. Returns the activation
/// node; its shape is `(batch, output_width)`.
pub fn add_dense_layer<B: Backend>(
    graph: &mut Graph<B>,
    input: NodeId,
    output_width: usize,
    activation: Activation,
    dropout_rate: f32,
    batch_norm: bool,
) -> Result<NodeId> {
    if output_width == 0 {
        return Err(Error::config("dense layer output width must be positive"));
    }
    if !(0.0..1.0).contains(&dropout_rate) {
        return Err(Error::config(format!(
            "dense layer dropout rate must lie in [0, 1), got {}",
            dropout_rate
        )));
    }
    let in_shape = graph.node_shape(input)?.to_vec();
    if in_shape.len() != 2 {
        return Err(Error::shape(format!(
            "dense layer expects a rank-2 input, got {:?} (node {})",
            in_shape, input
        )));
    }
    let in_features = in_shape[1];

    let seed = graph.next_seed();
    let w = init::generate::<B>(&[output_width, in_features], true, in_features, Some(seed))?;
    let b = init::generate::<B>(&[output_width], false, 1, None)?;
    let wo = graph.add_variable(w, true);
    let bo = graph.add_variable(b, true);

    let mm = graph.add_op(OpKind::Linear, vec![input, wo])?;
    let mut cur = graph.add_op(OpKind::Add, vec![mm, bo])?;

    // A zero rate adds no node at all rather than an inert pass-through.
    if dropout_rate > 0.0 {
        cur = graph.add_op(
            OpKind::Dropout {
                rate: dropout_rate,
            },
            vec![cur],
        )?;
    }
    if batch_norm {
        cur = add_batch_norm(graph, cur, &[1, output_width])?;
    }
    graph.add_op(activation.op(), vec![cur])
}

/// Configuration of a convolution+pool layer. Defaults mirror a minimal
/// 2x2 ReLU layer with 2x2/2 max pooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conv2dLayerConfig {
    pub n_filters: usize,
    pub filter_h: usize,
    pub filter_w: usize,
    pub padding: Padding,
    pub stride: usize,
    pub activation: Activation,
    #[serde(default)]
    pub batch_norm: bool,
    pub pooling: Pooling,
    pub pool_h: usize,
    pub pool_w: usize,
    pub pool_stride: usize,
}

impl Default for Conv2dLayerConfig {
    fn default() -> Self {
        Conv2dLayerConfig {
            n_filters: 1,
            filter_h: 2,
            filter_w: 2,
            padding: Padding::Same,
            stride: 1,
            activation: Activation::Relu,
            batch_norm: false,
            pooling: Pooling::Max,
            pool_h: 2,
            pool_w: 2,
            pool_stride: 2,
        }
    }
}

/// Appends a convolution layer: convolution, bias, optional batch
/// normalization, activation, pooling. Returns the pooling node.
pub fn add_conv2d_layer<B: Backend>(
    graph: &mut Graph<B>,
    input: NodeId,
    cfg: &Conv2dLayerConfig,
) -> Result<NodeId> {
    if cfg.n_filters == 0 {
        return Err(Error::config("convolution needs a positive filter count"));
    }
    if cfg.filter_h == 0 || cfg.filter_w == 0 {
        return Err(Error::config("convolution filter dims must be positive"));
    }
    if cfg.stride == 0 || cfg.pool_stride == 0 {
        return Err(Error::config("convolution and pooling strides must be positive"));
    }
    if cfg.pool_h == 0 || cfg.pool_w == 0 {
        return Err(Error::config("pooling window dims must be positive"));
    }
    let in_shape = graph.node_shape(input)?.to_vec();
    if in_shape.len() != 4 {
        return Err(Error::shape(format!(
            "convolution layer expects a rank-4 input, got {:?} (node {})",
            in_shape, input
        )));
    }
    let (channels, h, w) = (in_shape[1], in_shape[2], in_shape[3]);

    // Both output sizes are computed up front so an oversized filter or
    // pooling window fails before any node is registered.
    let conv_out = shape::conv2d_output(
        (h, w),
        (cfg.filter_h, cfg.filter_w),
        cfg.padding,
        cfg.stride,
    )?;
    shape::pool2d_output(conv_out, (cfg.pool_h, cfg.pool_w), cfg.pool_stride)?;

    let fan_in = cfg.filter_h * cfg.filter_w * channels;
    let seed = graph.next_seed();
    let filters = init::generate::<B>(
        &[cfg.n_filters, channels, cfg.filter_h, cfg.filter_w],
        true,
        fan_in,
        Some(seed),
    )?;
    let bias = init::generate::<B>(&[1, cfg.n_filters, 1, 1], false, 1, None)?;

    let fo = graph.add_variable(filters, true);
    let conv = graph.add_op(
        OpKind::Conv2d {
            stride: cfg.stride,
            padding: cfg.padding,
        },
        vec![input, fo],
    )?;
    let bo = graph.add_variable(bias, true);
    let mut cur = graph.add_op(OpKind::Add, vec![conv, bo])?;

    if cfg.batch_norm {
        let mut scale_shape = graph.node_shape(cur)?.to_vec();
        scale_shape[0] = 1;
        cur = add_batch_norm(graph, cur, &scale_shape)?;
    }
    cur = graph.add_op(cfg.activation.op(), vec![cur])?;

    match cfg.pooling {
        Pooling::Max => graph.add_op(
            OpKind::MaxPool2d {
                pool_h: cfg.pool_h,
                pool_w: cfg.pool_w,
                stride: cfg.pool_stride,
            },
            vec![cur],
        ),
    }
}

fn add_batch_norm<B: Backend>(
    graph: &mut Graph<B>,
    input: NodeId,
    scale_shape: &[usize],
) -> Result<NodeId> {
    let beta_seed = graph.next_seed();
    let gamma_seed = graph.next_seed();
    let beta = init::generate::<B>(scale_shape, true, 1, Some(beta_seed))?;
    let gamma = init::generate::<B>(scale_shape, true, 1, Some(gamma_seed))?;
    let beta_o = graph.add_variable(beta, true);
    let gamma_o = graph.add_variable(gamma, true);
    graph.add_op(
        OpKind::BatchNorm {
            epsilon: BATCH_NORM_EPSILON,
        },
        vec![input, beta_o, gamma_o],
    )
}

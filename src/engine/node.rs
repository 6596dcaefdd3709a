use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::error::Error;

pub type NodeId = usize;

/// Convolution padding mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Padding {
    /// Spatial dimensions are preserved at stride 1.
    Same,
    /// No padding; spatial dimensions shrink by `filter - 1` at stride 1.
    Valid,
}

impl FromStr for Padding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "SAME" => Ok(Padding::Same),
            "VALID" => Ok(Padding::Valid),
            other => Err(Error::config(format!(
                "unrecognized padding mode {:?}, expected \"SAME\" or \"VALID\"",
                other
            ))),
        }
    }
}

/// Activation applied at the end of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    Softmax,
}

impl Activation {
    pub(crate) fn op(self) -> OpKind {
        match self {
            Activation::Relu => OpKind::Relu,
            Activation::Softmax => OpKind::Softmax,
        }
    }
}

/// Pooling applied at the end of a convolution layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pooling {
    Max,
}

/// The closed set of operations a graph can hold. Layer builders select
/// variants by tag; forward/backward behavior is dispatched in `engine::op`.
#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    /// Data holder: a trainable parameter or an externally fed tensor.
    Variable,
    /// x · wᵀ with the weight stored as (out_features, in_features).
    Linear,
    /// Elementwise add; the right-hand input may broadcast (bias).
    Add,
    Dropout {
        rate: f32,
    },
    /// Inputs: x, beta, gamma. Beta/gamma carry 1-sized dims on the
    /// normalized axes.
    BatchNorm {
        epsilon: f32,
    },
    /// Inputs: x (N, C, H, W), filters (F, C, fh, fw).
    Conv2d {
        stride: usize,
        padding: Padding,
    },
    MaxPool2d {
        pool_h: usize,
        pool_w: usize,
        stride: usize,
    },
    Relu,
    Softmax,
    /// (N, C, H, W) -> (N, C*H*W).
    Flatten,
    /// Scalar cost over class scores; labels are bound on the graph.
    SoftmaxCrossEntropy,
}

impl OpKind {
    /// Name used in error messages and graph summaries.
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Variable => "Variable",
            OpKind::Linear => "Linear",
            OpKind::Add => "Add",
            OpKind::Dropout { .. } => "Dropout",
            OpKind::BatchNorm { .. } => "BatchNorm",
            OpKind::Conv2d { .. } => "Conv2d",
            OpKind::MaxPool2d { .. } => "MaxPool2d",
            OpKind::Relu => "Relu",
            OpKind::Softmax => "Softmax",
            OpKind::Flatten => "Flatten",
            OpKind::SoftmaxCrossEntropy => "SoftmaxCrossEntropy",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node<B: Backend> {
    pub id: NodeId,
    pub op: OpKind,
    pub inputs: Vec<NodeId>,
    /// Shape declared at registration time. The leading batch dimension may
    /// differ at bind time; trailing dimensions are fixed.
    pub shape: Vec<usize>,
    /// Whether this node's value takes part in parameter flattening and
    /// receives a slot in the gradient vector.
    pub do_gradient: bool,
    /// Parameter/feeder data for variables; cached forward result otherwise.
    pub value: Option<B::Tensor>,
    /// Gradient accumulated by the backward sweep.
    pub grad: Option<B::Tensor>,
    /// Per-call auxiliary state (dropout mask, cached class probabilities).
    pub aux: Option<B::Tensor>,
}

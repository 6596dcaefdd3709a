//! Architecture descriptor: an ordered list of layer configurations that can
//! be serialized to JSON and rebuilt into a graph.
//!
//! Together with the parameter blob (`engine::persist`) this replaces
//! whole-model serialization: a kernel implementation can change without
//! invalidating saved models, as long as the descriptor still builds.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::engine::layer::{self, Conv2dLayerConfig};
use crate::engine::node::{Activation, NodeId, OpKind};
use crate::engine::Graph;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "layer", rename_all = "snake_case")]
pub enum LayerSpec {
    /// The external data input; must come first.
    Input { shape: Vec<usize> },
    /// A free-standing dropout stage (e.g. on the raw input).
    Dropout { rate: f32 },
    Conv2d(Conv2dLayerConfig),
    Flatten,
    Dense {
        width: usize,
        activation: Activation,
        #[serde(default)]
        dropout: f32,
        #[serde(default)]
        batch_norm: bool,
    },
    /// The scalar cost; must come last.
    SoftmaxCrossEntropy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub layers: Vec<LayerSpec>,
}

impl NetworkSpec {
    /// Builds a fresh graph from the descriptor. Passing a seed makes the
    /// initialization (and dropout draws) reproducible.
    pub fn build<B: Backend>(&self, seed: Option<u64>) -> Result<Graph<B>> {
        let mut graph = match seed {
            Some(s) => Graph::with_seed(s),
            None => Graph::new(),
        };
        let mut cur: Option<NodeId> = None;
        for spec in &self.layers {
            let next = match spec {
                LayerSpec::Input { shape } => graph.add_feeder(shape.clone())?,
                LayerSpec::Dropout { rate } => {
                    graph.add_op(OpKind::Dropout { rate: *rate }, vec![require(cur)?])?
                }
                LayerSpec::Conv2d(cfg) => layer::add_conv2d_layer(&mut graph, require(cur)?, cfg)?,
                LayerSpec::Flatten => graph.add_op(OpKind::Flatten, vec![require(cur)?])?,
                LayerSpec::Dense {
                    width,
                    activation,
                    dropout,
                    batch_norm,
                } => layer::add_dense_layer(
                    &mut graph,
                    require(cur)?,
                    *width,
                    *activation,
                    *dropout,
                    *batch_norm,
                )?,
                LayerSpec::SoftmaxCrossEntropy => graph.add_cost(require(cur)?)?,
            };
            cur = Some(next);
        }
        Ok(graph)
    }

    pub fn to_json(&self) -> io::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> io::Result<NetworkSpec> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.to_json()?)
    }

    pub fn load(path: &Path) -> io::Result<NetworkSpec> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}

fn require(cur: Option<NodeId>) -> Result<NodeId> {
    cur.ok_or_else(|| Error::config("architecture must start with an input layer"))
}

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::backend::{Backend, Elm};
use crate::error::{Error, Result};

pub mod arch;
pub mod init;
pub mod layer;
pub mod metric;
pub mod node;
pub mod op;
pub mod optimizer;
pub mod persist;
pub mod shape;

use node::{Node, NodeId, OpKind};

/// A directed acyclic computation graph.
///
/// Nodes are registered in topological order (an operation's inputs must
/// already exist), and that registration order is also the execution order
/// of `feed_forward` and the flattening order of the parameter vector.
///
/// The feeder (external data input) and the cost (scalar final operation)
/// are explicit fields rather than flags scattered over the nodes, so one
/// process can hold several independent graphs.
pub struct Graph<B: Backend> {
    nodes: Vec<Node<B>>,
    feeder: Option<NodeId>,
    cost: Option<NodeId>,
    labels: Option<B::Tensor>,
    rng: StdRng,
}

impl<B: Backend> Default for Graph<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> Graph<B> {
    pub fn new() -> Self {
        Graph {
            nodes: Vec::new(),
            feeder: None,
            cost: None,
            labels: None,
            rng: StdRng::from_entropy(),
        }
    }

    /// A graph whose initialization and dropout draws are reproducible.
    pub fn with_seed(seed: u64) -> Self {
        Graph {
            nodes: Vec::new(),
            feeder: None,
            cost: None,
            labels: None,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Result<&Node<B>> {
        self.nodes
            .get(id)
            .ok_or_else(|| Error::state(format!("unknown node id {}", id)))
    }

    pub fn node_shape(&self, id: NodeId) -> Result<&[usize]> {
        self.node(id).map(|n| n.shape.as_slice())
    }

    pub fn feeder(&self) -> Option<NodeId> {
        self.feeder
    }

    pub fn cost(&self) -> Option<NodeId> {
        self.cost
    }

    /// Fresh seed for an initialization or dropout draw.
    pub fn next_seed(&mut self) -> u64 {
        self.rng.gen()
    }

    /// Registers a data-holding node. Trainable variables take part in
    /// parameter flattening.
    pub fn add_variable(&mut self, value: B::Tensor, trainable: bool) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            id,
            op: OpKind::Variable,
            inputs: Vec::new(),
            shape: B::shape(&value),
            do_gradient: trainable,
            value: Some(value),
            grad: None,
            aux: None,
        });
        id
    }

    /// Registers the graph's single external data input. Its value is
    /// supplied per call through `bind_input`; the leading dimension of
    /// `shape` is the nominal batch size and may differ at bind time.
    pub fn add_feeder(&mut self, shape: Vec<usize>) -> Result<NodeId> {
        if let Some(existing) = self.feeder {
            return Err(Error::state(format!(
                "graph already has a feeder operation (node {})",
                existing
            )));
        }
        if shape.iter().any(|&d| d == 0) {
            return Err(Error::shape(format!(
                "feeder shape {:?} has a non-positive dimension",
                shape
            )));
        }
        let id = self.nodes.len();
        self.nodes.push(Node {
            id,
            op: OpKind::Variable,
            inputs: Vec::new(),
            shape,
            do_gradient: false,
            value: None,
            grad: None,
            aux: None,
        });
        self.feeder = Some(id);
        Ok(id)
    }

    /// Registers an operation node. The declared output shape is inferred
    /// from the declared input shapes and validated eagerly.
    pub fn add_op(&mut self, op: OpKind, inputs: Vec<NodeId>) -> Result<NodeId> {
        validate_config(&op)?;
        let mut input_shapes = Vec::with_capacity(inputs.len());
        for &input in &inputs {
            input_shapes.push(self.node_shape(input)?);
        }
        let out_shape = shape::infer(&op, &input_shapes)?;
        let id = self.nodes.len();
        self.nodes.push(Node {
            id,
            op,
            inputs,
            shape: out_shape,
            do_gradient: false,
            value: None,
            grad: None,
            aux: None,
        });
        Ok(id)
    }

    /// Registers the scalar cost operation that seeds backpropagation.
    /// At most one may exist.
    pub fn add_cost(&mut self, input: NodeId) -> Result<NodeId> {
        if let Some(existing) = self.cost {
            return Err(Error::state(format!(
                "graph already has a final operation (node {})",
                existing
            )));
        }
        let id = self.add_op(OpKind::SoftmaxCrossEntropy, vec![input])?;
        self.cost = Some(id);
        Ok(id)
    }

    /// Binds external data to the feeder. Trailing dimensions must match the
    /// declared feeder shape; the batch dimension is free.
    pub fn bind_input(&mut self, data: B::Tensor) -> Result<()> {
        let feeder = self
            .feeder
            .ok_or_else(|| Error::state("graph has no feeder operation"))?;
        let declared = &self.nodes[feeder].shape;
        let got = B::shape(&data);
        if got.len() != declared.len() || got[1..] != declared[1..] {
            return Err(Error::shape(format!(
                "bound data shape {:?} does not match feeder shape {:?} (node {})",
                got, declared, feeder
            )));
        }
        self.nodes[feeder].value = Some(data);
        Ok(())
    }

    /// Binds one-hot labels consumed by the cost operation.
    pub fn bind_labels(&mut self, labels: B::Tensor) -> Result<()> {
        let cost = self
            .cost
            .ok_or_else(|| Error::state("graph has no final operation"))?;
        let scores = self.nodes[cost].inputs[0];
        let classes = self.nodes[scores].shape[1];
        let got = B::shape(&labels);
        if got.len() != 2 || got[1] != classes {
            return Err(Error::shape(format!(
                "labels shape {:?} does not match {} classes (node {})",
                got, classes, cost
            )));
        }
        self.labels = Some(labels);
        Ok(())
    }

    /// Clears every cached forward value, gradient and per-call auxiliary
    /// state. Variable values (parameters and bound feeder data) survive.
    pub fn reset_all(&mut self) {
        for node in &mut self.nodes {
            if node.op != OpKind::Variable {
                node.value = None;
            }
            node.grad = None;
            node.aux = None;
        }
    }

    /// Runs forward evaluation end-to-end and returns the scalar cost.
    pub fn feed_forward(&mut self) -> Result<Elm> {
        let cost = self
            .cost
            .ok_or_else(|| Error::state("graph has no final operation"))?;
        self.run_forward(true)?;
        let value = self.nodes[cost].value.as_ref().unwrap();
        Ok(B::to_vec(value)[0])
    }

    /// Backpropagates from the cost node, accumulating gradients on every
    /// node along the way. Requires a completed forward pass.
    pub fn feed_backward(&mut self) -> Result<()> {
        let cost = self
            .cost
            .ok_or_else(|| Error::state("graph has no final operation"))?;
        if self.nodes[cost].value.is_none() {
            return Err(Error::state(
                "feed_backward invoked before a forward evaluation",
            ));
        }
        self.nodes[cost].grad = Some(B::from_vec(vec![1.0], &[]));

        for id in (0..self.nodes.len()).rev() {
            if self.nodes[id].inputs.is_empty() {
                continue;
            }
            let gy = match self.nodes[id].grad.clone() {
                Some(g) => g,
                None => continue, // not on the path to the cost
            };
            let grads = {
                let node = &self.nodes[id];
                let inputs: Vec<&B::Tensor> = node
                    .inputs
                    .iter()
                    .map(|&i| self.nodes[i].value.as_ref().unwrap())
                    .collect();
                op::backward::<B>(
                    &node.op,
                    &gy,
                    &inputs,
                    node.value.as_ref(),
                    node.aux.as_ref(),
                    self.labels.as_ref(),
                )
                .map_err(|e| annotate(e, &self.nodes[id]))?
            };
            let input_ids = self.nodes[id].inputs.clone();
            for (input, grad) in input_ids.into_iter().zip(grads) {
                self.nodes[input].grad = Some(match self.nodes[input].grad.take() {
                    Some(acc) => B::add(&acc, &grad),
                    None => grad,
                });
            }
        }
        Ok(())
    }

    /// Forward pass for inference: binds `data`, skips the cost node and
    /// dropout, and returns the class scores feeding the cost.
    pub fn predict(&mut self, data: B::Tensor) -> Result<B::Tensor> {
        let cost = self
            .cost
            .ok_or_else(|| Error::state("graph has no final operation"))?;
        self.bind_input(data)?;
        self.reset_all();
        self.run_forward(false)?;
        let scores = self.nodes[cost].inputs[0];
        Ok(self.nodes[scores].value.clone().unwrap())
    }

    /// Current values of every trainable node, flattened in registration
    /// order. This is the optimizer's starting point.
    pub fn unroll_gradient_parameters(&self) -> Vec<Elm> {
        let mut out = Vec::new();
        for node in &self.nodes {
            if node.do_gradient {
                out.extend(B::to_vec(node.value.as_ref().unwrap()));
            }
        }
        out
    }

    /// Accumulated gradients of every trainable node, flattened in the same
    /// order as `unroll_gradient_parameters`. Trainable nodes the cost does
    /// not reach contribute zeros.
    pub fn unroll_gradients(&self) -> Vec<Elm> {
        let mut out = Vec::new();
        for node in &self.nodes {
            if node.do_gradient {
                match &node.grad {
                    Some(g) => out.extend(B::to_vec(g)),
                    None => out.extend(std::iter::repeat(0.0).take(node.shape.iter().product())),
                }
            }
        }
        out
    }

    /// Restores a flat parameter vector into the trainable nodes, mirroring
    /// the flattening order exactly.
    pub fn attach_parameters(&mut self, params: &[Elm]) -> Result<()> {
        let expected = self.parameter_count();
        if params.len() != expected {
            return Err(Error::shape(format!(
                "parameter vector has {} values, graph expects {}",
                params.len(),
                expected
            )));
        }
        let mut offset = 0;
        for node in &mut self.nodes {
            if node.do_gradient {
                let len: usize = node.shape.iter().product();
                let chunk = params[offset..offset + len].to_vec();
                node.value = Some(B::from_vec(chunk, &node.shape));
                offset += len;
            }
        }
        Ok(())
    }

    /// Total number of trainable parameter values.
    pub fn parameter_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.do_gradient)
            .map(|n| n.shape.iter().product::<usize>())
            .sum()
    }

    /// Trainable node values keyed by node index, for persistence.
    pub fn parameters_by_node(&self) -> Vec<(NodeId, Vec<usize>, Vec<Elm>)> {
        self.nodes
            .iter()
            .filter(|n| n.do_gradient)
            .map(|n| {
                (
                    n.id,
                    n.shape.clone(),
                    B::to_vec(n.value.as_ref().unwrap()),
                )
            })
            .collect()
    }

    /// Restores one trainable node from a persisted entry.
    pub fn restore_node_parameter(
        &mut self,
        id: NodeId,
        shape: &[usize],
        values: Vec<Elm>,
    ) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| Error::state(format!("unknown node id {}", id)))?;
        if !node.do_gradient {
            return Err(Error::state(format!(
                "node {} ({}) is not a trainable parameter",
                id,
                node.op.name()
            )));
        }
        if node.shape != shape {
            return Err(Error::shape(format!(
                "stored shape {:?} does not match node {} shape {:?}",
                shape, id, node.shape
            )));
        }
        node.value = Some(B::from_vec(values, shape));
        Ok(())
    }

    /// The objective-and-gradient mapping consumed by the optimizer.
    ///
    /// Given a fixed topology this is pure: every cached value the previous
    /// call left behind is overwritten by the reset and the parameter
    /// restore before evaluation.
    pub fn cost_and_gradient(
        &mut self,
        params: &[Elm],
        data: &B::Tensor,
        labels: &B::Tensor,
    ) -> Result<(Elm, Vec<Elm>)> {
        self.bind_input(data.clone())?;
        self.reset_all();
        self.bind_labels(labels.clone())?;
        self.attach_parameters(params)?;
        let cost = self.feed_forward()?;
        self.feed_backward()?;
        Ok((cost, self.unroll_gradients()))
    }

    /// One-line-per-node description of the graph.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            let role = if Some(node.id) == self.feeder {
                " [feeder]"
            } else if Some(node.id) == self.cost {
                " [final]"
            } else if node.do_gradient {
                " [trainable]"
            } else {
                ""
            };
            out.push_str(&format!(
                "{:>4}  {:<20} {:?}{}\n",
                node.id,
                node.op.name(),
                node.shape,
                role
            ));
        }
        out
    }

    fn run_forward(&mut self, training: bool) -> Result<()> {
        for id in 0..self.nodes.len() {
            if self.nodes[id].op == OpKind::Variable {
                if self.nodes[id].value.is_none() {
                    let msg = if Some(id) == self.feeder {
                        format!("feeder (node {}) evaluated before data was bound", id)
                    } else {
                        format!("variable (node {}) has no value", id)
                    };
                    return Err(Error::state(msg));
                }
                continue;
            }
            if !training && Some(id) == self.cost {
                continue;
            }
            let is_dropout = matches!(self.nodes[id].op, OpKind::Dropout { .. });
            let dropout_seed = if training && is_dropout {
                Some(self.rng.gen())
            } else {
                None
            };
            let (value, aux) = {
                let node = &self.nodes[id];
                let inputs: Vec<&B::Tensor> = node
                    .inputs
                    .iter()
                    .map(|&i| self.nodes[i].value.as_ref().unwrap())
                    .collect();
                op::forward::<B>(&node.op, &inputs, self.labels.as_ref(), dropout_seed)
                    .map_err(|e| annotate(e, &self.nodes[id]))?
            };
            self.nodes[id].value = Some(value);
            self.nodes[id].aux = aux;
        }
        Ok(())
    }
}

fn validate_config(op: &OpKind) -> Result<()> {
    match op {
        OpKind::Dropout { rate } => {
            if !(0.0..1.0).contains(rate) || *rate == 0.0 {
                return Err(Error::config(format!(
                    "dropout rate must lie in (0, 1), got {}",
                    rate
                )));
            }
        }
        OpKind::Conv2d { stride, .. } => {
            if *stride == 0 {
                return Err(Error::config("convolution stride must be positive"));
            }
        }
        OpKind::MaxPool2d {
            pool_h,
            pool_w,
            stride,
        } => {
            if *pool_h == 0 || *pool_w == 0 || *stride == 0 {
                return Err(Error::config(
                    "pooling window and stride must be positive",
                ));
            }
        }
        _ => {}
    }
    Ok(())
}

fn annotate<B: Backend>(err: Error, node: &Node<B>) -> Error {
    match err {
        Error::Shape(msg) => Error::Shape(format!(
            "node {} ({}): {}",
            node.id,
            node.op.name(),
            msg
        )),
        other => other,
    }
}

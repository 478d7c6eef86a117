use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use crate::error::{Error, Result};
use crate::types::{DataType, Device, Shape};
use super::Op;

/// Index of a node in its [`Graph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// What a node computes
#[derive(Debug, Clone)]
pub(crate) enum NodeKind<T> {
    /// Variable slot, `None` until a value is bound at evaluation time
    Variable(Option<T>),
    Constant(T),
    Op { op: Op, inputs: Vec<NodeId> },
}

#[derive(Debug, Clone)]
pub(crate) struct Node<T> {
    pub(crate) kind: NodeKind<T>,
    pub(crate) shape: Shape,
    pub(crate) data_type: DataType,
    pub(crate) device: Device,
}

/// One unit of work produced by [`Graph::plan`]
#[derive(Debug)]
pub(crate) enum Step<T> {
    /// A value already materialised in the graph
    Value(NodeId, T),
    Apply { id: NodeId, op: Op, inputs: Vec<NodeId> },
}

/// # Graph
///
/// Append-only arena of nodes. A node's inputs always precede it, so the graph
/// is acyclic by construction.
#[derive(Debug)]
pub(crate) struct Graph<T> {
    nodes: Vec<Node<T>>,
}

pub(crate) type SharedGraph<T> = Arc<RwLock<Graph<T>>>;

impl<T: Clone> Graph<T> {
    pub(crate) fn new() -> Self {
        Self { nodes: vec![] }
    }

    pub(crate) fn push(&mut self, node: Node<T>) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&Node<T>> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| Error::IllegalState(format!("node {} does not exist", id.0)))
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Orders the work needed to compute `targets`.
    ///
    /// Walks the inputs of every target depth first without recursion and emits
    /// nodes in post-order, so each step only depends on earlier steps or on
    /// `bound` nodes.
    ///
    /// # Parameters
    ///
    /// * `targets` - Nodes whose values are requested
    /// * `bound` - Nodes whose values the caller supplies, their inputs are not visited
    ///
    /// # Returns
    ///
    /// The steps in evaluation order, or [`Error::UnresolvedDependency`] when a
    /// target depends on a variable slot that is neither filled nor bound
    pub(crate) fn plan(&self, targets: &[NodeId], bound: &HashSet<NodeId>) -> Result<Vec<Step<T>>> {
        let mut visited = HashSet::new();
        let mut steps = vec![];
        let mut stack = targets.iter().rev().map(|&id| (id, false)).collect::<Vec<_>>();

        while let Some((id, expanded)) = stack.pop() {
            if bound.contains(&id) {
                continue;
            }
            let node = self.node(id)?;
            if expanded {
                if let NodeKind::Op { op, inputs } = &node.kind {
                    steps.push(Step::Apply { id, op: op.clone(), inputs: inputs.clone() });
                }
                continue;
            }
            if !visited.insert(id) {
                continue;
            }
            match &node.kind {
                NodeKind::Variable(Some(value)) | NodeKind::Constant(value) => {
                    steps.push(Step::Value(id, value.clone()));
                }
                NodeKind::Variable(None) => {
                    return Err(Error::UnresolvedDependency(format!(
                        "node {} is an input with no bound value", id.0
                    )));
                }
                NodeKind::Op { inputs, .. } => {
                    stack.push((id, true));
                    stack.extend(
                        inputs
                            .iter()
                            .rev()
                            .filter(|input| !visited.contains(*input))
                            .map(|&input| (input, false)),
                    );
                }
            }
        }
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{BinaryOp, UnaryOp};

    fn leaf(value: i32) -> Node<i32> {
        Node {
            kind: NodeKind::Constant(value),
            shape: Shape::scalar(),
            data_type: DataType::Int64,
            device: Device::cpu(),
        }
    }

    fn apply(op: Op, inputs: Vec<NodeId>) -> Node<i32> {
        Node {
            kind: NodeKind::Op { op, inputs },
            shape: Shape::scalar(),
            data_type: DataType::Int64,
            device: Device::cpu(),
        }
    }

    fn order(steps: &[Step<i32>]) -> Vec<usize> {
        steps
            .iter()
            .map(|step| match step {
                Step::Value(id, _) | Step::Apply { id, .. } => id.index(),
            })
            .collect()
    }

    #[test]
    fn test_plan_is_post_order_and_shares_inputs() {
        let mut graph = Graph::new();
        let a = graph.push(leaf(1));
        let b = graph.push(leaf(2));
        let sum = graph.push(apply(Op::Binary(BinaryOp::Add), vec![a, b]));
        let both = graph.push(apply(Op::Binary(BinaryOp::Mul), vec![sum, a]));

        let steps = graph.plan(&[both], &HashSet::new()).unwrap();
        assert_eq!(order(&steps), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_plan_skips_unrelated_nodes() {
        let mut graph = Graph::new();
        let a = graph.push(leaf(1));
        let _unused = graph.push(leaf(2));
        let neg = graph.push(apply(Op::Unary(UnaryOp::Neg), vec![a]));

        let steps = graph.plan(&[neg], &HashSet::new()).unwrap();
        assert_eq!(order(&steps), vec![0, 2]);
    }

    #[test]
    fn test_unbound_variable_is_unresolved() {
        let mut graph: Graph<i32> = Graph::new();
        let slot = graph.push(Node {
            kind: NodeKind::Variable(None),
            shape: Shape::scalar(),
            data_type: DataType::Int64,
            device: Device::cpu(),
        });
        let neg = graph.push(apply(Op::Unary(UnaryOp::Neg), vec![slot]));

        let err = graph.plan(&[neg], &HashSet::new()).unwrap_err();
        assert!(matches!(err, Error::UnresolvedDependency(_)));

        let bound = HashSet::from([slot]);
        let steps = graph.plan(&[neg], &bound).unwrap();
        assert_eq!(order(&steps), vec![1]);
    }

    #[test]
    fn test_deep_chain_does_not_recurse() {
        let mut graph = Graph::new();
        let mut last = graph.push(leaf(0));
        for _ in 0..100_000 {
            last = graph.push(apply(Op::Unary(UnaryOp::Neg), vec![last]));
        }
        let steps = graph.plan(&[last], &HashSet::new()).unwrap();
        assert_eq!(steps.len(), graph.len());
    }
}

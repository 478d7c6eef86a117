//! # Graph
//!
//! Lazy computation structure shared by every manager of an [`Engine`](crate::Engine).
//!
//! Creating an array appends a variable or constant node, and every operation
//! on arrays appends an op node whose shape and dtype are inferred right away.
//! Nothing is computed until a value is requested, at which point only the
//! nodes the request depends on are evaluated, in topological order.
//!
//! The graph only ever grows for the life of its engine.

mod node;
mod op;
mod session;

use std::collections::{HashMap, HashSet};
use tracing::trace;
use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::sync::read;

pub use node::NodeId;
pub use op::{ArgReduceOp, BinaryOp, Op, ReduceOp, UnaryOp};
pub use session::Session;
pub(crate) use node::{Graph, Node, NodeKind, SharedGraph, Step};

/// Computes `targets`, substituting `bindings` for the nodes they name.
///
/// The nodes needed are snapshotted under the graph's read lock and computed
/// after it is released. Intermediate values live only for this call.
pub(crate) fn evaluate<B: Backend>(
    backend: &B,
    graph: &SharedGraph<B::Tensor>,
    bindings: HashMap<NodeId, B::Tensor>,
    targets: &[NodeId],
) -> Result<Vec<B::Tensor>> {
    let steps = {
        let bound = bindings.keys().copied().collect::<HashSet<_>>();
        read(graph).plan(targets, &bound)?
    };
    trace!(steps = steps.len(), targets = targets.len(), "evaluating graph");

    let mut values = bindings;
    for step in steps {
        match step {
            Step::Value(id, value) => {
                values.insert(id, value);
            }
            Step::Apply { id, op, inputs } => {
                let output = {
                    let args = inputs
                        .iter()
                        .map(|input| values.get(input).ok_or_else(|| missing(*input)))
                        .collect::<Result<Vec<_>>>()?;
                    backend.apply(&op, &args)?
                };
                values.insert(id, output);
            }
        }
    }

    targets
        .iter()
        .map(|target| values.get(target).cloned().ok_or_else(|| missing(*target)))
        .collect()
}

fn missing(id: NodeId) -> Error {
    Error::UnresolvedDependency(format!("node {} has no value", id.index()))
}

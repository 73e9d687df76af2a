//! Propagation Drivers
//!
//! The three passes over a compiled [`Program`]:
//!
//! - [`evaluate`] walks the order front to back and recomputes every value.
//! - [`push_tangent`] walks front to back and combines operand tangents
//!   (forward mode, Jacobian-vector products).
//! - [`pull_gradient`] walks back to front and distributes each node's
//!   gradient onto its operands (reverse mode, vector-Jacobian products).
//!
//! Sources are never recomputed: their values and tangents are inputs.
//!
//! # Failure
//!
//! Each pass runs inside a journal of the values and derivatives it may
//! overwrite. If any node fails, the journal is restored so the graph holds
//! exactly what it held before the pass started.

use tracing::trace;

use super::compile::Program;
use crate::error::{Error, Result};
use crate::evaluator::{Evaluator, Expression};
use crate::graph::{Arena, NodeId};
use crate::value::{Derivative, Value};

/// Values and derivatives of the program's nodes before a pass.
struct Journal {
    entries: Vec<(NodeId, Value, Derivative)>,
}

impl Journal {
    fn record(arena: &Arena, order: &[NodeId]) -> Self {
        let entries = order
            .iter()
            .map(|&id| {
                let node = &arena[id];
                (id, node.value().clone(), node.derivative().clone())
            })
            .collect();
        Self { entries }
    }

    fn restore(self, arena: &mut Arena) {
        for (id, value, derivative) in self.entries {
            let node = &mut arena[id];
            node.replace_value(value);
            node.replace_derivative(derivative);
        }
    }
}

/// Run `pass`, restoring every node of the program if it fails.
fn journaled(arena: &mut Arena, program: &Program, pass: impl FnOnce(&mut Arena) -> Result<()>) -> Result<()> {
    let journal = Journal::record(arena, &program.order);
    let result = pass(arena);
    if result.is_err() {
        journal.restore(arena);
    }
    result
}

/// Run `step` on the defining expression of `node_id`.
///
/// The expression is taken out of the node for the duration, so the step
/// may mutate other nodes of the arena freely.
fn with_expression<T>(
    arena: &mut Arena,
    node_id: NodeId,
    step: impl FnOnce(&mut Expression, &mut Arena) -> Result<T>,
) -> Result<T> {
    // Only a node that reads itself can find its expression missing
    let Some(mut expression) = arena[node_id].take_expression() else {
        return Err(Error::CyclicDependency { node: node_id });
    };
    let result = step(&mut expression, arena);
    arena[node_id].restore_expression(expression);
    result
}

/// Recompute the value of every non-source node.
pub(crate) fn evaluate(arena: &mut Arena, program: &Program) -> Result<()> {
    journaled(arena, program, |arena| {
        for &node_id in &program.order {
            if program.sources.contains(&node_id) {
                continue;
            }

            let value = with_expression(arena, node_id, |expression, arena| {
                expression.release_cache();
                expression.value(arena).cloned()
            })?;
            trace!(node = %node_id, shape = %value.shape(), "evaluated");
            arena[node_id].replace_value(value);
        }
        Ok(())
    })
}

/// Forward mode.
///
/// With a seed, every source tangent is replaced first: the seed gets the
/// identity of its flat length, every other source gets zero. Without a
/// seed, the tangents already stored at the sources are used.
pub(crate) fn push_tangent(arena: &mut Arena, program: &Program, seed: Option<NodeId>) -> Result<()> {
    journaled(arena, program, |arena| {
        if let Some(seed) = seed {
            for &source in &program.sources {
                let seeded = unit_or_zero(arena, source, seed);
                arena[source].replace_derivative(seeded);
            }
        }

        for &node_id in &program.order {
            if program.sources.contains(&node_id) {
                continue;
            }

            let tangent = with_expression(arena, node_id, |expression, arena| {
                expression.push_forward(arena).cloned()
            })?;
            trace!(node = %node_id, zero = tangent.is_zero(), "pushed tangent");
            arena[node_id].replace_derivative(tangent);
        }
        Ok(())
    })
}

/// Reverse mode.
///
/// Gradients of all non-target nodes are reset to zero before the pass, so
/// repeated calls never accumulate across passes. With a seed, every target
/// gradient is replaced first: the seed gets the identity of its flat
/// length, every other target gets zero. Without a seed, the gradients
/// already stored at the targets are used.
pub(crate) fn pull_gradient(arena: &mut Arena, program: &Program, seed: Option<NodeId>) -> Result<()> {
    journaled(arena, program, |arena| {
        for &node_id in &program.order {
            if !program.targets.contains(&node_id) {
                arena[node_id].replace_derivative(Derivative::Zero);
            }
        }
        if let Some(seed) = seed {
            for &target in &program.targets {
                let seeded = unit_or_zero(arena, target, seed);
                arena[target].replace_derivative(seeded);
            }
        }

        for &node_id in program.order.iter().rev() {
            if program.sources.contains(&node_id) {
                continue;
            }
            let gradient = arena[node_id].derivative().clone();
            if gradient.is_zero() {
                continue;
            }

            with_expression(arena, node_id, |expression, arena| {
                expression.pull_back(&gradient, arena)
            })?;
            trace!(node = %node_id, "pulled gradient");
        }
        Ok(())
    })
}

fn unit_or_zero(arena: &Arena, node_id: NodeId, seed: NodeId) -> Derivative {
    if node_id == seed {
        Derivative::identity(arena[node_id].value().len())
    } else {
        Derivative::Zero
    }
}

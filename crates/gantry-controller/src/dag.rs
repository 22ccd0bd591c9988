//! Dependency graph over a workflow's templates.
//!
//! Validates the declared dependencies and produces a deterministic
//! execution order for the operator's graph walk.

use std::collections::{HashMap, VecDeque};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use gantry_core::workflow::Template;

use crate::error::{Error, Result};

/// The template dependency graph of one workflow.
///
/// Construction validates that every dependency names a declared template
/// and that the graph is acyclic. Ordering is deterministic: ties are broken
/// by template declaration order.
#[derive(Debug)]
pub(crate) struct TemplateGraph {
    order: Vec<String>,
}

impl TemplateGraph {
    /// Builds the graph from the declared templates.
    ///
    /// # Errors
    ///
    /// Returns an invalid-workflow error on duplicate template names,
    /// dependencies on undeclared templates, or cycles.
    pub(crate) fn build(templates: &[Template]) -> Result<Self> {
        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let mut indices: HashMap<&str, NodeIndex> = HashMap::with_capacity(templates.len());
        let mut declaration_order: Vec<NodeIndex> = Vec::with_capacity(templates.len());

        for template in templates {
            if indices.contains_key(template.name.as_str()) {
                return Err(Error::invalid_workflow(format!(
                    "template '{}' is declared more than once",
                    template.name
                )));
            }
            let idx = graph.add_node(template.name.clone());
            indices.insert(template.name.as_str(), idx);
            declaration_order.push(idx);
        }

        for template in templates {
            let to = indices[template.name.as_str()];
            for dependency in &template.dependencies {
                let Some(&from) = indices.get(dependency.as_str()) else {
                    return Err(Error::invalid_workflow(format!(
                        "template '{}' depends on undeclared template '{dependency}'",
                        template.name
                    )));
                };
                graph.add_edge(from, to, ());
            }
        }

        let order = toposort(&graph, &declaration_order)?;
        Ok(Self { order })
    }

    /// Template names in dependency order.
    pub(crate) fn sorted(&self) -> &[String] {
        &self.order
    }
}

/// Kahn's algorithm with declaration-order tie-breaking.
fn toposort(graph: &DiGraph<String, ()>, declaration_order: &[NodeIndex]) -> Result<Vec<String>> {
    let mut in_degree: HashMap<NodeIndex, usize> =
        graph.node_indices().map(|idx| (idx, 0)).collect();
    for edge in graph.edge_references() {
        *in_degree.entry(edge.target()).or_insert(0) += 1;
    }

    let position: HashMap<NodeIndex, usize> = declaration_order
        .iter()
        .enumerate()
        .map(|(pos, &idx)| (idx, pos))
        .collect();

    let mut queue: VecDeque<NodeIndex> = declaration_order
        .iter()
        .copied()
        .filter(|idx| in_degree.get(idx) == Some(&0))
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(idx) = queue.pop_front() {
        if let Some(name) = graph.node_weight(idx) {
            order.push(name.clone());
        }

        let mut unblocked: Vec<NodeIndex> = Vec::new();
        for neighbor in graph.neighbors_directed(idx, Direction::Outgoing) {
            if let Some(degree) = in_degree.get_mut(&neighbor) {
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    unblocked.push(neighbor);
                }
            }
        }
        unblocked.sort_by_key(|idx| position.get(idx).copied().unwrap_or(usize::MAX));
        queue.extend(unblocked);
    }

    if order.len() != graph.node_count() {
        let stuck = declaration_order
            .iter()
            .copied()
            .find(|idx| in_degree.get(idx).copied().unwrap_or(0) > 0)
            .and_then(|idx| graph.node_weight(idx))
            .map_or_else(|| "unknown".to_string(), Clone::clone);
        return Err(Error::invalid_workflow(format!(
            "dependency cycle involving template '{stuck}'"
        )));
    }

    Ok(order)
}

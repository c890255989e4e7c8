// SPDX-License-Identifier: MIT

//! Workflow graph definition and validation
//!
//! A [`GraphBuilder`] collects named steps, unconditional edges, and
//! routers with their allowed destinations, then `compile()` validates the
//! structure and produces a runnable [`CompiledFlow`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::error::GraphDefinitionError;
use super::executor::CompiledFlow;
use super::step::{Router, Step};

/// Reserved start pseudo-node name
pub const START: &str = "__start__";
/// Reserved end pseudo-node name
pub const END: &str = "__end__";

pub(crate) enum NodeKind {
    Step(Arc<dyn Step>),
    Router {
        router: Arc<dyn Router>,
        allowed: Vec<String>,
    },
}

/// Builder for a workflow graph
#[derive(Default)]
pub struct GraphBuilder {
    nodes: HashMap<String, NodeKind>,
    /// Insertion order, for deterministic validation
    order: Vec<String>,
    edges: Vec<(String, String)>,
    duplicates: Vec<String>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step under a unique name
    pub fn add_step(mut self, name: impl Into<String>, step: Arc<dyn Step>) -> Self {
        self.insert(name.into(), NodeKind::Step(step));
        self
    }

    /// Register a routing step with its allowed destinations
    pub fn add_router(
        mut self,
        name: impl Into<String>,
        router: Arc<dyn Router>,
        allowed: &[&str],
    ) -> Self {
        self.insert(
            name.into(),
            NodeKind::Router {
                router,
                allowed: allowed.iter().map(|s| s.to_string()).collect(),
            },
        );
        self
    }

    /// Add an unconditional `from -> to` transition; `from` may be [`START`]
    /// and `to` may be [`END`]
    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    fn insert(&mut self, name: String, node: NodeKind) {
        if self.nodes.contains_key(&name) {
            self.duplicates.push(name);
            return;
        }
        self.order.push(name.clone());
        self.nodes.insert(name, node);
    }

    /// Validate the graph and return a runnable flow
    pub fn compile(self) -> Result<CompiledFlow, GraphDefinitionError> {
        if let Some(name) = self.duplicates.into_iter().next() {
            return Err(GraphDefinitionError::DuplicateStep(name));
        }

        let mut edges: HashMap<String, String> = HashMap::new();
        for (from, to) in self.edges {
            if from != START && !self.nodes.contains_key(&from) {
                return Err(GraphDefinitionError::UnknownStep(from));
            }
            if to != END && !self.nodes.contains_key(&to) {
                return Err(GraphDefinitionError::UnknownStep(to));
            }
            if matches!(self.nodes.get(&from), Some(NodeKind::Router { .. })) {
                // Routers transition through their allowed set, never a
                // static edge
                return Err(GraphDefinitionError::ConflictingEdge(from));
            }
            if edges.insert(from.clone(), to).is_some() {
                return Err(GraphDefinitionError::ConflictingEdge(from));
            }
        }

        if !edges.contains_key(START) {
            return Err(GraphDefinitionError::MissingStart);
        }

        // Router destinations must resolve
        for name in &self.order {
            if let NodeKind::Router { allowed, .. } = &self.nodes[name] {
                for dest in allowed {
                    if dest != END && !self.nodes.contains_key(dest) {
                        return Err(GraphDefinitionError::UnknownStep(dest.clone()));
                    }
                }
            }
        }

        // Every plain step needs exactly one outgoing edge
        for name in &self.order {
            if matches!(self.nodes[name], NodeKind::Step(_)) && !edges.contains_key(name) {
                return Err(GraphDefinitionError::MissingTransition(name.clone()));
            }
        }

        // Reachability walk from START over edges and router destinations
        let mut reached: HashSet<String> = HashSet::new();
        let mut pending = vec![edges[START].clone()];
        let mut end_reachable = false;
        while let Some(name) = pending.pop() {
            if name == END {
                end_reachable = true;
                continue;
            }
            if !reached.insert(name.clone()) {
                continue;
            }
            match &self.nodes[&name] {
                NodeKind::Step(_) => pending.push(edges[&name].clone()),
                NodeKind::Router { allowed, .. } => {
                    pending.extend(allowed.iter().cloned());
                    // Routers may always elect to finish the run
                    end_reachable = true;
                }
            }
        }
        for name in &self.order {
            if !reached.contains(name) {
                return Err(GraphDefinitionError::Unreachable(name.clone()));
            }
        }
        if !end_reachable {
            return Err(GraphDefinitionError::NoTerminal);
        }

        Ok(CompiledFlow::new(self.nodes, edges))
    }
}

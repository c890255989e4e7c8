// SPDX-License-Identifier: MIT

//! Compiled flow runner
//!
//! Walks the graph from the start pseudo-node, wrapping every plain step
//! with the start/success/error lifecycle. A failed step is reported
//! in-band and the run continues along its outgoing edge with the previous
//! state; aborting mid-stream would leave the client without a closing
//! signal. Routers run unwrapped and pick the next node from their declared
//! destination set.

use std::collections::HashMap;

use super::envelope::Envelope;
use super::error::FlowError;
use super::graph::{NodeKind, END, START};
use super::state::{FlowState, StepOutcome};
use super::step::{Next, Step, StepMeta};

/// Default cap on node executions per run, guarding against edge-definition
/// bugs creating infinite loops
pub const DEFAULT_RECURSION_LIMIT: u32 = 50;

/// Invocation options; the recursion limit is always explicit
#[derive(Debug, Clone, Copy)]
pub struct InvokeOptions {
    pub recursion_limit: u32,
}

impl InvokeOptions {
    pub fn new(recursion_limit: u32) -> Self {
        Self { recursion_limit }
    }
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            recursion_limit: DEFAULT_RECURSION_LIMIT,
        }
    }
}

/// A validated, runnable workflow graph
pub struct CompiledFlow {
    nodes: HashMap<String, NodeKind>,
    edges: HashMap<String, String>,
}

impl std::fmt::Debug for CompiledFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledFlow")
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("edges", &self.edges)
            .finish()
    }
}

impl CompiledFlow {
    pub(crate) fn new(nodes: HashMap<String, NodeKind>, edges: HashMap<String, String>) -> Self {
        Self { nodes, edges }
    }

    /// Execute the graph to completion and return the final state
    ///
    /// Step failures are recovered in-band; only graph-level faults reject.
    /// The caller owns the channel and closes it after this settles.
    pub async fn invoke(
        &self,
        mut state: FlowState,
        options: InvokeOptions,
    ) -> Result<FlowState, FlowError> {
        let mut current = self.edges[START].clone();
        let mut executed: u32 = 0;

        while current != END {
            executed += 1;
            if executed > options.recursion_limit {
                log::error!(
                    "run exceeded recursion limit of {} at step '{}'",
                    options.recursion_limit,
                    current
                );
                return Err(FlowError::RecursionLimitExceeded {
                    limit: options.recursion_limit,
                });
            }

            let meta = StepMeta {
                name: current.clone(),
            };

            match &self.nodes[&current] {
                NodeKind::Step(step) => {
                    run_wrapped(step.as_ref(), &mut state, &meta).await;
                    current = self.edges[&current].clone();
                }
                NodeKind::Router { router, allowed } => {
                    let route =
                        router
                            .route(&state, &meta)
                            .await
                            .map_err(|e| FlowError::Router {
                                step: current.clone(),
                                message: e.to_string(),
                            })?;
                    state.apply(route.update.fields);
                    current = match route.next {
                        Next::End => END.to_string(),
                        Next::Step(target) => {
                            if !allowed.contains(&target) {
                                return Err(FlowError::RouteNotAllowed {
                                    step: current.clone(),
                                    target,
                                });
                            }
                            log::debug!("router '{}' -> '{}'", current, target);
                            target
                        }
                    };
                }
            }
        }

        Ok(state)
    }
}

/// Run one step with uniform lifecycle reporting and fault isolation
async fn run_wrapped(step: &dyn Step, state: &mut FlowState, meta: &StepMeta) {
    state.channel().send_lifecycle(Envelope::start(&meta.name));

    match step.run(state, meta).await {
        Ok(update) => {
            let envelope = Envelope::success(&meta.name, update.node_result);
            let stamped = state.channel().send_lifecycle(envelope);
            state.apply(update.fields);
            state.push_trace(stamped);
            state.record_outcome(&meta.name, StepOutcome::Succeeded);
        }
        Err(e) => {
            // The failing step's field updates are fully discarded; only
            // the error envelope lands in the trace and the run goes on
            let message = e.to_string();
            log::error!("step '{}' failed: {}", meta.name, message);
            let envelope = Envelope::error(&meta.name, &message);
            state.channel().send(envelope.clone());
            state.push_trace(envelope);
            state.record_outcome(&meta.name, StepOutcome::Failed { message });
        }
    }
}

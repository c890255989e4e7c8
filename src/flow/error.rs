// SPDX-License-Identifier: MIT

//! Typed error handling for the flow engine
//!
//! Step-level faults never propagate past the step wrapper; they become
//! in-stream error envelopes. Graph-level faults (definition errors, the
//! recursion limit, router failures) propagate to the `invoke` caller.

use thiserror::Error;

/// Run-fatal errors surfaced by [`CompiledFlow::invoke`](crate::flow::CompiledFlow::invoke)
#[derive(Debug, Error)]
pub enum FlowError {
    /// The graph executed more node-steps than the configured cap
    #[error("recursion limit of {limit} node executions exceeded")]
    RecursionLimitExceeded { limit: u32 },

    /// A router chose a destination outside its declared set
    #[error("router '{step}' chose '{target}', not one of its declared destinations")]
    RouteNotAllowed { step: String, target: String },

    /// A routing step failed; routers run unwrapped so this is fatal
    #[error("router '{step}' failed: {message}")]
    Router { step: String, message: String },

    /// A send was attempted on a closed channel (logged, never re-raised
    /// across the workflow boundary)
    #[error("channel closed")]
    ChannelClosed,

    #[error(transparent)]
    Graph(#[from] GraphDefinitionError),
}

/// Compile-time graph validation failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphDefinitionError {
    #[error("duplicate step name '{0}'")]
    DuplicateStep(String),

    #[error("edge references unknown step '{0}'")]
    UnknownStep(String),

    #[error("no edge out of the start node")]
    MissingStart,

    #[error("step '{0}' has more than one outgoing edge")]
    ConflictingEdge(String),

    #[error("step '{0}' has no outgoing transition")]
    MissingTransition(String),

    #[error("step '{0}' is not reachable from the start node")]
    Unreachable(String),

    #[error("the end node is not reachable")]
    NoTerminal,
}

/// Failure of a single step, recovered locally by the step wrapper
///
/// The wrapper reports `to_string()` of this error in-band, so variants
/// carry human-readable message text only.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("{0}")]
    Message(String),

    #[error("language model call failed: {0}")]
    Llm(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StepError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

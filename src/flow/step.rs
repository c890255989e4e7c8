// SPDX-License-Identifier: MIT

//! Step and router traits
//!
//! A step is one named unit of asynchronous work: it reads shared state,
//! optionally pushes interim `process` envelopes through the channel, and
//! returns a partial update for the engine to merge. A router additionally
//! selects the next node from a set declared at graph-definition time.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use super::envelope::StepData;
use super::error::StepError;
use super::state::FlowState;

/// Execution metadata handed to a step; the name is always present
#[derive(Debug, Clone)]
pub struct StepMeta {
    pub name: String,
}

/// Partial state update returned by a step
///
/// `node_result` is the step's client-facing result payload; the wrapper
/// folds it into the success envelope and appends that envelope to the
/// run's trace.
#[derive(Debug, Clone, Default)]
pub struct StepUpdate {
    pub fields: HashMap<String, Value>,
    pub node_result: Option<StepData>,
}

impl StepUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn node_result(mut self, data: StepData) -> Self {
        self.node_result = Some(data);
        self
    }
}

/// One named unit of asynchronous work in a workflow
#[async_trait]
pub trait Step: Send + Sync {
    async fn run(&self, state: &FlowState, meta: &StepMeta) -> Result<StepUpdate, StepError>;
}

/// Destination chosen by a router
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next {
    /// Continue at the named step; must be in the router's declared set
    Step(String),
    /// Jump straight to the end pseudo-node
    End,
}

impl Next {
    pub fn step(name: impl Into<String>) -> Self {
        Self::Step(name.into())
    }
}

/// A router's partial update plus its chosen destination
#[derive(Debug, Clone)]
pub struct Route {
    pub update: StepUpdate,
    pub next: Next,
}

impl Route {
    pub fn to(next: Next, update: StepUpdate) -> Self {
        Self { update, next }
    }
}

/// A step whose outcome selects the next node at runtime
///
/// Routers run unwrapped: they emit no lifecycle envelopes of their own and
/// a router error is fatal to the run.
#[async_trait]
pub trait Router: Send + Sync {
    async fn route(&self, state: &FlowState, meta: &StepMeta) -> Result<Route, StepError>;
}

// SPDX-License-Identifier: MIT

//! Shared workflow state with reducer support
//!
//! One [`FlowState`] is created per incoming request, threaded through every
//! step of the run and discarded when the run settles. Steps never mutate it
//! directly: they return a partial update and the engine folds each field in
//! through the reducer declared for it at schema-definition time.

use std::collections::HashMap;

use serde_json::Value;

use super::channel::StepChannel;
use super::envelope::Envelope;

/// Merge policy applied when folding a step's partial update into state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reducer {
    /// New value overwrites the old; an absent field keeps the old value
    #[default]
    Replace,
    /// New value(s) are concatenated onto an ordered sequence
    Append,
}

/// Declares the fields of a workflow's state and their merge policies
///
/// Fixed at workflow-definition time; fields written by steps without a
/// declaration fall back to [`Reducer::Replace`].
#[derive(Debug, Clone, Default)]
pub struct StateSchema {
    fields: Vec<(String, Reducer, Option<Value>)>,
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, reducer: Reducer) -> Self {
        self.fields.push((name.into(), reducer, None));
        self
    }

    pub fn field_with_default(
        mut self,
        name: impl Into<String>,
        reducer: Reducer,
        default: Value,
    ) -> Self {
        self.fields.push((name.into(), reducer, Some(default)));
        self
    }
}

/// Outcome of one executed step, visible to downstream steps
///
/// A failed step's field updates are discarded, so downstream consumers
/// check here instead of probing for missing fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Succeeded,
    Failed { message: String },
}

/// Runtime state for a single workflow run
#[derive(Debug, Clone)]
pub struct FlowState {
    channel: StepChannel,
    fields: HashMap<String, Value>,
    reducers: HashMap<String, Reducer>,
    /// Accumulated client-visible trace of the run (append-only)
    trace: Vec<Envelope>,
    outcomes: HashMap<String, StepOutcome>,
}

impl FlowState {
    pub fn new(schema: StateSchema, channel: StepChannel) -> Self {
        let mut fields = HashMap::new();
        let mut reducers = HashMap::new();
        for (name, reducer, default) in schema.fields {
            if let Some(default) = default {
                fields.insert(name.clone(), default);
            }
            reducers.insert(name, reducer);
        }
        Self {
            channel,
            fields,
            reducers,
            trace: Vec::new(),
            outcomes: HashMap::new(),
        }
    }

    /// The push channel for this run
    pub fn channel(&self) -> &StepChannel {
        &self.channel
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(|v| v.as_str())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.fields.get(key).and_then(|v| v.as_u64())
    }

    /// Fold a partial update into state, one field at a time, through each
    /// field's declared reducer
    pub fn apply(&mut self, update: HashMap<String, Value>) {
        for (key, value) in update {
            let reducer = self.reducers.get(&key).copied().unwrap_or_default();
            match reducer {
                Reducer::Replace => {
                    self.fields.insert(key, value);
                }
                Reducer::Append => {
                    let seq = self
                        .fields
                        .entry(key)
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if let Value::Array(items) = seq {
                        match value {
                            Value::Array(new_items) => items.extend(new_items),
                            other => items.push(other),
                        }
                    }
                }
            }
        }
    }

    /// Append one envelope to the run's client-visible trace
    pub fn push_trace(&mut self, envelope: Envelope) {
        self.trace.push(envelope);
    }

    pub fn trace(&self) -> &[Envelope] {
        &self.trace
    }

    pub fn record_outcome(&mut self, step: impl Into<String>, outcome: StepOutcome) {
        self.outcomes.insert(step.into(), outcome);
    }

    /// Outcome of a previously executed step, if it ran at all
    pub fn outcome(&self, step: &str) -> Option<&StepOutcome> {
        self.outcomes.get(step)
    }

    pub fn succeeded(&self, step: &str) -> bool {
        matches!(self.outcomes.get(step), Some(StepOutcome::Succeeded))
    }
}

// SPDX-License-Identifier: MIT

//! Streaming workflow engine
//!
//! This module provides:
//! - `StepChannel` - the live push connection for one request
//! - `Envelope` / `StepData` - lifecycle messages streamed to the client
//! - `FlowState` / `StateSchema` - reducer-merged shared state
//! - `Step` / `Router` - the units of work a graph is built from
//! - `GraphBuilder` / `CompiledFlow` - definition, validation and execution

pub mod channel;
pub mod envelope;
pub mod error;
pub mod executor;
pub mod graph;
pub mod state;
pub mod step;

pub use channel::StepChannel;
pub use envelope::{Envelope, StepData, StepStatus};
pub use error::{FlowError, GraphDefinitionError, StepError};
pub use executor::{CompiledFlow, InvokeOptions, DEFAULT_RECURSION_LIMIT};
pub use graph::{GraphBuilder, END, START};
pub use state::{FlowState, Reducer, StateSchema, StepOutcome};
pub use step::{Next, Route, Router, Step, StepMeta, StepUpdate};

// SPDX-License-Identifier: MIT

//! Agent catalog
//!
//! Every agent wraps a compiled flow behind the same entry point: take the
//! raw user input, run the flow, stream lifecycle envelopes through the
//! channel it was handed. The registry is what the server dispatches on.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::flow::{FlowError, FlowState, StepChannel};

pub mod chat;
pub mod report;
pub mod site_seek;
pub mod store;

pub use chat::ChatAgent;
pub use report::ReportAgent;
pub use site_seek::SiteSeekAgent;
pub use store::{LandStore, StaticLandStore, StoreError};

/// A runnable flow with a stable name
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Run the agent's flow to completion, streaming envelopes as it goes.
    ///
    /// Step failures are reported in-band on the channel and do not surface
    /// here; an Err means the run itself could not proceed.
    async fn run(&self, input: String, channel: StepChannel) -> Result<FlowState, FlowError>;
}

/// Name-indexed set of agents served by the API
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.name().to_string(), agent);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }

    /// (name, description) pairs sorted by name
    pub fn list(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = self
            .agents
            .values()
            .map(|a| (a.name().to_string(), a.description().to_string()))
            .collect();
        entries.sort();
        entries
    }
}

// SPDX-License-Identifier: MIT

//! Land evaluation report agent
//!
//! Two linear steps: stream a model summary of the parsed report text, then
//! hand the client a download link for the full document. Document parsing
//! itself is an upstream collaborator; the agent receives plain text.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;

use crate::flow::{
    Envelope, FlowError, FlowState, GraphBuilder, InvokeOptions, Reducer, StateSchema, Step,
    StepChannel, StepData, StepError, StepMeta, StepUpdate, DEFAULT_RECURSION_LIMIT, END, START,
};
use crate::llm::ChatModel;

use super::Agent;

const SUMMARIZE_PROMPT: &str = "A land parcel has been selected on the map. \
Summarize the key findings of its evaluation report below.\n\n";

const REPORT_FILE: &str = "land-evaluation-report";

struct SummarizeStep {
    model: Arc<dyn ChatModel>,
}

#[async_trait]
impl Step for SummarizeStep {
    async fn run(&self, state: &FlowState, meta: &StepMeta) -> Result<StepUpdate, StepError> {
        let document = state
            .get_str("document")
            .ok_or_else(|| StepError::msg("document missing from state"))?;

        let mut stream = self.model.stream(SUMMARIZE_PROMPT, document).await?;
        let mut message = String::new();
        while let Some(token) = stream.next().await {
            let token = token?;
            message.push_str(&token);
            state
                .channel()
                .send(Envelope::process(&meta.name, StepData::text(token)));
        }

        Ok(StepUpdate::new()
            .field("summary", json!(message))
            .node_result(StepData::text(message)))
    }
}

struct ReportLinkStep {
    download_base: String,
}

#[async_trait]
impl Step for ReportLinkStep {
    async fn run(&self, _state: &FlowState, _meta: &StepMeta) -> Result<StepUpdate, StepError> {
        let link = format!(
            "[Land evaluation report (docx)]({}/{}.docx)",
            self.download_base, REPORT_FILE
        );
        Ok(StepUpdate::new().node_result(StepData::text(link)))
    }
}

/// Report summarization agent
pub struct ReportAgent {
    flow: crate::flow::CompiledFlow,
}

impl ReportAgent {
    pub fn new(model: Arc<dyn ChatModel>, download_base: impl Into<String>) -> Result<Self, FlowError> {
        let flow = GraphBuilder::new()
            .add_step("summarize", Arc::new(SummarizeStep { model }))
            .add_step(
                "report-link",
                Arc::new(ReportLinkStep {
                    download_base: download_base.into(),
                }),
            )
            .add_edge(START, "summarize")
            .add_edge("summarize", "report-link")
            .add_edge("report-link", END)
            .compile()?;
        Ok(Self { flow })
    }
}

#[async_trait]
impl Agent for ReportAgent {
    fn name(&self) -> &str {
        "report"
    }

    fn description(&self) -> &str {
        "Summarizes a land evaluation report and links the full document"
    }

    async fn run(&self, document: String, channel: StepChannel) -> Result<FlowState, FlowError> {
        let schema = StateSchema::new()
            .field("document", Reducer::Replace)
            .field("summary", Reducer::Replace);
        let mut state = FlowState::new(schema, channel);
        state.apply(std::collections::HashMap::from([(
            "document".to_string(),
            json!(document),
        )]));

        self.flow
            .invoke(state, InvokeOptions::new(DEFAULT_RECURSION_LIMIT))
            .await
    }
}

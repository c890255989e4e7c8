// SPDX-License-Identifier: MIT

//! Plain streaming chat agent: one step that forwards model tokens

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

const SYSTEM_PROMPT: &str = "You are a helpful planning assistant. \
Answer the user's question directly and concisely.";

struct AnswerStep {
    model: Arc<dyn ChatModel>,
}

#[async_trait]
impl Step for AnswerStep {
    async fn run(&self, state: &FlowState, meta: &StepMeta) -> Result<StepUpdate, StepError> {
        let question = state
            .get_str("question")
            .ok_or_else(|| StepError::msg("question missing from state"))?;

        let mut stream = self.model.stream(SYSTEM_PROMPT, question).await?;
        let mut message = String::new();
        while let Some(token) = stream.next().await {
            let token = token?;
            message.push_str(&token);
            state
                .channel()
                .send(Envelope::process(&meta.name, StepData::text(token)));
        }

        Ok(StepUpdate::new()
            .field("answer", json!(message))
            .node_result(StepData::text(message)))
    }
}

/// Single-step conversational agent
pub struct ChatAgent {
    flow: crate::flow::CompiledFlow,
}

impl ChatAgent {
    pub fn new(model: Arc<dyn ChatModel>) -> Result<Self, FlowError> {
        let flow = GraphBuilder::new()
            .add_step("answer", Arc::new(AnswerStep { model }))
            .add_edge(START, "answer")
            .add_edge("answer", END)
            .compile()?;
        Ok(Self { flow })
    }
}

#[async_trait]
impl Agent for ChatAgent {
    fn name(&self) -> &str {
        "chat"
    }

    fn description(&self) -> &str {
        "Streaming chat over the configured model"
    }

    async fn run(&self, question: String, channel: StepChannel) -> Result<FlowState, FlowError> {
        let schema = StateSchema::new()
            .field("question", Reducer::Replace)
            .field("answer", Reducer::Replace);
        let mut state = FlowState::new(schema, channel);
        state.apply(std::collections::HashMap::from([(
            "question".to_string(),
            json!(question),
        )]));

        self.flow
            .invoke(state, InvokeOptions::new(DEFAULT_RECURSION_LIMIT))
            .await
    }
}

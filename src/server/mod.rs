// SPDX-License-Identifier: MIT

//! HTTP surface
//!
//! Thin axum layer over the agent registry: a health probe, a catalog
//! listing, and one streaming endpoint per run. Each run gets its own
//! [`StepChannel`]; the receiving half becomes the SSE body, so the client
//! sees every lifecycle envelope the flow emits, in order.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::agents::AgentRegistry;
use crate::flow::{Envelope, StepChannel};

pub async fn serve(
    registry: Arc<AgentRegistry>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = router(registry);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    log::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(registry: Arc<AgentRegistry>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/agents", get(list_agents))
        .route("/api/agents/{id}/stream", post(stream_agent))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(registry)
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_agents(State(registry): State<Arc<AgentRegistry>>) -> Json<Value> {
    let agents: Vec<Value> = registry
        .list()
        .into_iter()
        .map(|(name, description)| json!({ "id": name, "description": description }))
        .collect();
    Json(json!(agents))
}

#[derive(Deserialize)]
struct StreamRequest {
    question: String,
}

async fn stream_agent(
    State(registry): State<Arc<AgentRegistry>>,
    Path(id): Path<String>,
    Json(payload): Json<StreamRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (channel, rx) = StepChannel::open();

    tokio::spawn(async move {
        let run_id = Uuid::new_v4();
        log::info!("run {}: starting agent '{}'", run_id, id);

        let Some(agent) = registry.get(&id) else {
            log::warn!("run {}: unknown agent '{}'", run_id, id);
            channel.send(Envelope::error(&id, format!("Unknown agent: {}", id)));
            channel.close();
            return;
        };

        match agent.run(payload.question, channel.clone()).await {
            Ok(_) => log::info!("run {}: agent '{}' finished", run_id, id),
            Err(e) => {
                // Step failures are already on the stream; this is a run-level
                // fault (bad route, recursion limit), surfaced in-band too
                log::error!("run {}: agent '{}' failed: {}", run_id, id, e);
                channel.send(Envelope::error(&id, format!("Execution failed: {}", e)));
            }
        }
        channel.close();
    });

    let stream = UnboundedReceiverStream::new(rx)
        .map(|envelope| Ok(Event::default().json_data(envelope).unwrap()));

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new().interval(std::time::Duration::from_secs(1)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{FlowError, FlowState, StateSchema, StepData, StepStatus};
    use async_trait::async_trait;

    struct EchoAgent;

    #[async_trait]
    impl crate::agents::Agent for EchoAgent {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "echoes its input"
        }

        async fn run(
            &self,
            input: String,
            channel: StepChannel,
        ) -> Result<FlowState, FlowError> {
            channel.send_lifecycle(Envelope::start("echo"));
            channel.send_lifecycle(Envelope::success("echo", Some(StepData::text(input))));
            Ok(FlowState::new(StateSchema::new(), channel))
        }
    }

    fn test_registry() -> Arc<AgentRegistry> {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(EchoAgent));
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_unknown_agent_reports_error_in_stream() {
        let registry = test_registry();
        let (channel, mut rx) = StepChannel::open();

        // Same dispatch the handler performs
        let id = "missing".to_string();
        assert!(registry.get(&id).is_none());
        channel.send(Envelope::error(&id, format!("Unknown agent: {}", id)));
        channel.close();

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.status, StepStatus::Error);
        assert!(envelope
            .data
            .unwrap()
            .data
            .as_str()
            .unwrap()
            .contains("Unknown agent"));
    }

    #[tokio::test]
    async fn test_agent_envelopes_reach_the_stream() {
        let registry = test_registry();
        let agent = registry.get("echo").unwrap();

        let (channel, mut rx) = StepChannel::open();
        agent.run("hi".to_string(), channel.clone()).await.unwrap();
        channel.close();

        assert_eq!(rx.recv().await.unwrap().status, StepStatus::Start);
        let done = rx.recv().await.unwrap();
        assert_eq!(done.status, StepStatus::Success);
        assert_eq!(done.data.unwrap().data, json!("hi"));
    }

    #[test]
    fn test_registry_listing_shape() {
        let registry = test_registry();
        let listed = registry.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, "echo");
    }
}

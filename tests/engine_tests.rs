//! Integration tests for the streaming workflow engine and the agent catalog
//!
//! These tests drive complete runs through the public API using mock models
//! and stores, asserting on the envelope stream a client would observe.

use async_trait::async_trait;
use cadence_rs::agents::{Agent, AgentRegistry, ChatAgent, LandStore, SiteSeekAgent, StoreError};
use cadence_rs::flow::{
    Envelope, FlowError, FlowState, GraphBuilder, InvokeOptions, Reducer, StateSchema, Step,
    StepChannel, StepData, StepError, StepMeta, StepStatus, StepUpdate, END, START,
};
use cadence_rs::llm::{ChatModel, LlmError, TokenStream};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

// ============================================================================
// Mock Components
// ============================================================================

/// Mock model that streams a fixed token sequence
struct ScriptedModel {
    generate_response: String,
    tokens: Vec<&'static str>,
}

impl ScriptedModel {
    fn sql() -> Self {
        Self {
            generate_response: r#"["industrial_land"]"#.to_string(),
            tokens: vec!["SELECT * FROM ", "industrial_land"],
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn generate(&self, _system: &str, _user: &str) -> Result<String, LlmError> {
        Ok(self.generate_response.clone())
    }

    async fn stream(&self, _system: &str, _user: &str) -> Result<TokenStream, LlmError> {
        let (tx, rx) = mpsc::unbounded_channel();
        for token in &self.tokens {
            let _ = tx.send(Ok(token.to_string()));
        }
        Ok(UnboundedReceiverStream::new(rx))
    }
}

fn demo_rows() -> Vec<Value> {
    (0..6).map(|i| json!({ "parcel_id": i })).collect()
}

/// Store that fails its first N queries, then answers normally
struct FlakyStore {
    failures: u32,
    calls: AtomicU32,
}

impl FlakyStore {
    fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl LandStore for FlakyStore {
    async fn query(&self, _sql: &str) -> Result<Vec<Value>, StoreError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(StoreError::Query("syntax error near SELECT".to_string()))
        } else {
            Ok(demo_rows())
        }
    }
}

/// Store whose queries succeed but return too few rows to recommend from
struct SmallStore;

#[async_trait]
impl LandStore for SmallStore {
    async fn query(&self, _sql: &str) -> Result<Vec<Value>, StoreError> {
        Ok((0..2).map(|i| json!({ "parcel_id": i })).collect())
    }
}

/// Store that always fails
struct BrokenStore;

#[async_trait]
impl LandStore for BrokenStore {
    async fn query(&self, _sql: &str) -> Result<Vec<Value>, StoreError> {
        Err(StoreError::Query("relation does not exist".to_string()))
    }
}

struct WriteStep {
    field: &'static str,
    value: Value,
}

#[async_trait]
impl Step for WriteStep {
    async fn run(&self, _state: &FlowState, _meta: &StepMeta) -> Result<StepUpdate, StepError> {
        Ok(StepUpdate::new()
            .field(self.field, self.value.clone())
            .node_result(StepData::new("string", self.value.clone())))
    }
}

struct FailingStep;

#[async_trait]
impl Step for FailingStep {
    async fn run(&self, _state: &FlowState, _meta: &StepMeta) -> Result<StepUpdate, StepError> {
        Err(StepError::msg("mid-run failure"))
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> Vec<Envelope> {
    let mut envelopes = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        envelopes.push(envelope);
    }
    envelopes
}

// ============================================================================
// Envelope Wire Format Tests
// ============================================================================

#[tokio::test]
async fn test_stream_serializes_camel_case_with_duration() {
    let flow = GraphBuilder::new()
        .add_step(
            "extract",
            Arc::new(WriteStep {
                field: "out",
                value: json!("done"),
            }),
        )
        .add_edge(START, "extract")
        .add_edge("extract", END)
        .compile()
        .unwrap();

    let (channel, mut rx) = StepChannel::open();
    let schema = StateSchema::new().field("out", Reducer::Replace);
    flow.invoke(FlowState::new(schema, channel), InvokeOptions::default())
        .await
        .unwrap();

    let envelopes = drain(&mut rx);
    assert_eq!(envelopes.len(), 2);

    let start = serde_json::to_value(&envelopes[0]).unwrap();
    assert_eq!(start["status"], "start");
    assert_eq!(start["stepName"], "extract");
    assert!(start["data"].is_null());
    assert!(start.get("duration").is_none());

    let success = serde_json::to_value(&envelopes[1]).unwrap();
    assert_eq!(success["status"], "success");
    assert_eq!(success["data"]["type"], "string");
    assert!(success["duration"].as_f64().unwrap() >= 0.0);
}

// ============================================================================
// Fault Isolation Tests
// ============================================================================

#[tokio::test]
async fn test_failed_step_is_reported_in_band_and_run_completes() {
    let flow = GraphBuilder::new()
        .add_step(
            "before",
            Arc::new(WriteStep {
                field: "before",
                value: json!(1),
            }),
        )
        .add_step("faulty", Arc::new(FailingStep))
        .add_step(
            "after",
            Arc::new(WriteStep {
                field: "after",
                value: json!(2),
            }),
        )
        .add_edge(START, "before")
        .add_edge("before", "faulty")
        .add_edge("faulty", "after")
        .add_edge("after", END)
        .compile()
        .unwrap();

    let (channel, mut rx) = StepChannel::open();
    let schema = StateSchema::new()
        .field("before", Reducer::Replace)
        .field("after", Reducer::Replace);
    let state = flow
        .invoke(FlowState::new(schema, channel), InvokeOptions::default())
        .await
        .expect("a failed step must not abort the run");

    assert_eq!(state.get("before"), Some(&json!(1)));
    assert_eq!(state.get("after"), Some(&json!(2)));
    assert!(!state.succeeded("faulty"));

    let statuses: Vec<(String, StepStatus)> = drain(&mut rx)
        .into_iter()
        .map(|e| (e.step_name, e.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("before".to_string(), StepStatus::Start),
            ("before".to_string(), StepStatus::Success),
            ("faulty".to_string(), StepStatus::Start),
            ("faulty".to_string(), StepStatus::Error),
            ("after".to_string(), StepStatus::Start),
            ("after".to_string(), StepStatus::Success),
        ]
    );
}

#[tokio::test]
async fn test_run_survives_client_disconnect() {
    let flow = GraphBuilder::new()
        .add_step(
            "only",
            Arc::new(WriteStep {
                field: "out",
                value: json!("finished"),
            }),
        )
        .add_edge(START, "only")
        .add_edge("only", END)
        .compile()
        .unwrap();

    let (channel, rx) = StepChannel::open();
    drop(rx);

    let schema = StateSchema::new().field("out", Reducer::Replace);
    let state = flow
        .invoke(FlowState::new(schema, channel), InvokeOptions::default())
        .await
        .unwrap();
    assert_eq!(state.get("out"), Some(&json!("finished")));
}

// ============================================================================
// Graph Validation Tests
// ============================================================================

#[test]
fn test_compile_rejects_unreachable_step() {
    use cadence_rs::flow::GraphDefinitionError;

    let err = GraphBuilder::new()
        .add_step(
            "a",
            Arc::new(WriteStep {
                field: "a",
                value: json!(0),
            }),
        )
        .add_step(
            "orphan",
            Arc::new(WriteStep {
                field: "b",
                value: json!(0),
            }),
        )
        .add_edge(START, "a")
        .add_edge("a", END)
        .add_edge("orphan", END)
        .compile()
        .unwrap_err();

    assert_eq!(err, GraphDefinitionError::Unreachable("orphan".to_string()));
}

#[test]
fn test_compile_rejects_missing_start() {
    use cadence_rs::flow::GraphDefinitionError;

    let err = GraphBuilder::new()
        .add_step(
            "a",
            Arc::new(WriteStep {
                field: "a",
                value: json!(0),
            }),
        )
        .add_edge("a", END)
        .compile()
        .unwrap_err();

    assert_eq!(err, GraphDefinitionError::MissingStart);
}

// ============================================================================
// Agent Pipeline Tests
// ============================================================================

#[tokio::test]
async fn test_chat_agent_streams_and_closes_cleanly() {
    let agent = ChatAgent::new(Arc::new(ScriptedModel {
        generate_response: String::new(),
        tokens: vec!["par", "cel"],
    }))
    .unwrap();

    let (channel, mut rx) = StepChannel::open();
    let state = agent
        .run("what is a parcel?".to_string(), channel)
        .await
        .unwrap();

    assert_eq!(state.get("answer"), Some(&json!("parcel")));

    let envelopes = drain(&mut rx);
    assert_eq!(envelopes.first().unwrap().status, StepStatus::Start);
    assert_eq!(envelopes.last().unwrap().status, StepStatus::Success);
    let tokens: Vec<String> = envelopes
        .iter()
        .filter(|e| e.status == StepStatus::Process)
        .map(|e| e.data.clone().unwrap().data.as_str().unwrap().to_string())
        .collect();
    assert_eq!(tokens, vec!["par".to_string(), "cel".to_string()]);
}

#[tokio::test]
async fn test_site_seek_recovers_after_one_repair_round() {
    let agent = SiteSeekAgent::new(
        Arc::new(ScriptedModel::sql()),
        Arc::new(FlakyStore::new(1)),
        vec!["industrial_land".to_string()],
    )
    .unwrap();

    let (channel, mut rx) = StepChannel::open();
    let state = agent
        .run("cheap industrial parcels".to_string(), channel)
        .await
        .unwrap();

    assert_eq!(state.get_u64("sql_error_retries"), Some(1));
    assert!(state.succeeded("repair-sql"));
    assert!(state.succeeded("query-results"));
    assert!(state.succeeded("recommend"));

    // The repair step went through the full lifecycle exactly once
    let envelopes = drain(&mut rx);
    let repair_starts = envelopes
        .iter()
        .filter(|e| e.step_name == "repair-sql" && e.status == StepStatus::Start)
        .count();
    assert_eq!(repair_starts, 1);
}

#[tokio::test]
async fn test_site_seek_gives_up_after_bounded_retries() {
    let agent = SiteSeekAgent::new(
        Arc::new(ScriptedModel::sql()),
        Arc::new(BrokenStore),
        vec!["industrial_land".to_string()],
    )
    .unwrap();

    let (channel, _rx) = StepChannel::open();
    let state = agent
        .run("anything".to_string(), channel)
        .await
        .expect("repair loop must terminate under the recursion limit");

    assert_eq!(state.get_u64("sql_error_retries"), Some(2));
    // After the budget is spent the run still reaches the result steps
    assert!(state.succeeded("query-results"));
    assert!(state.succeeded("recommend"));
}

#[tokio::test]
async fn test_site_seek_bounds_retries_on_undersized_results() {
    let agent = SiteSeekAgent::new(
        Arc::new(ScriptedModel::sql()),
        Arc::new(SmallStore),
        vec!["industrial_land".to_string()],
    )
    .unwrap();

    let (channel, _rx) = StepChannel::open();
    let state = agent
        .run("large industrial parcels".to_string(), channel)
        .await
        .expect("undersized-result loop must terminate under the recursion limit");

    // Only the undersized-result counter is spent; queries never erred
    assert_eq!(state.get_u64("too_few_rows_retries"), Some(2));
    assert_eq!(state.get_u64("sql_error_retries"), Some(0));
    assert!(state.succeeded("repair-sql"));
    assert!(state.succeeded("query-results"));
    assert!(state.succeeded("recommend"));
}

// ============================================================================
// Registry Tests
// ============================================================================

#[tokio::test]
async fn test_registry_dispatches_by_name() {
    let mut registry = AgentRegistry::new();
    registry.register(Arc::new(
        ChatAgent::new(Arc::new(ScriptedModel {
            generate_response: String::new(),
            tokens: vec!["ok"],
        }))
        .unwrap(),
    ));

    let agent = registry.get("chat").expect("chat agent registered");
    let (channel, _rx) = StepChannel::open();
    let state = agent.run("hello".to_string(), channel).await.unwrap();
    assert_eq!(state.get("answer"), Some(&json!("ok")));

    assert!(registry.get("nope").is_none());
}

#[test]
fn test_flow_error_messages() {
    let err = FlowError::RecursionLimitExceeded { limit: 50 };
    assert!(err.to_string().contains("50"));

    let err = FlowError::RouteNotAllowed {
        step: "check-query".to_string(),
        target: "nowhere".to_string(),
    };
    assert!(err.to_string().contains("check-query"));
    assert!(err.to_string().contains("nowhere"));
}

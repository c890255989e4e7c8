// SPDX-License-Identifier: MIT

//! Site recommendation agent
//!
//! The longest pipeline in the catalog: pick the land tables the question
//! targets, fan out one streamed text-to-SQL generation per table, validate
//! the queries against the store, loop back through a bounded repair step
//! while they fail, then stream a recommendation per result set.
//!
//! The repair loop is bounded by two independent retry counters carried in
//! typed state: one for hard query errors, one for result sets too small to
//! recommend from. Once a fault's counter is spent the run proceeds to the
//! result step regardless, so the loop always terminates.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};

use crate::flow::{
    Envelope, FlowError, FlowState, GraphBuilder, InvokeOptions, Next, Reducer, Route, Router,
    StateSchema, Step, StepChannel, StepData, StepError, StepMeta, StepUpdate,
    DEFAULT_RECURSION_LIMIT, END, START,
};
use crate::llm::ChatModel;

use super::store::LandStore;
use super::Agent;

/// Result sets smaller than this are sent back for repair
const MIN_RECOMMEND_ROWS: usize = 5;
/// Bound on repair rounds triggered by hard query errors
const MAX_SQL_ERROR_RETRIES: u64 = 2;
/// Bound on repair rounds triggered by undersized result sets
const MAX_TOO_FEW_ROWS_RETRIES: u64 = 2;

const SELECT_LAND: &str = "select-land";
const GENERATE_SQL: &str = "generate-sql";
const CHECK_QUERY: &str = "check-query";
const REPAIR_SQL: &str = "repair-sql";
const QUERY_RESULTS: &str = "query-results";
const RECOMMEND: &str = "recommend";

/// One per-table SQL draft accumulated across stream chunks
#[derive(Debug, Clone)]
struct Draft {
    name: String,
    data: String,
}

fn drafts_to_value(drafts: &[Draft]) -> Value {
    Value::Array(
        drafts
            .iter()
            .map(|d| json!({ "name": d.name, "data": d.data }))
            .collect(),
    )
}

fn value_to_drafts(value: Option<&Value>) -> Vec<Draft> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|v| Draft {
                    name: v["name"].as_str().unwrap_or_default().to_string(),
                    data: v["data"].as_str().unwrap_or_default().to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parse the model's table selection, tolerating a code fence around it
fn parse_table_selection(raw: &str, allowed: &[String]) -> Result<Vec<String>, StepError> {
    let trimmed = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let tables: Vec<String> = serde_json::from_str(trimmed)
        .map_err(|_| StepError::msg(format!("model returned invalid table selection: {}", raw)))?;
    Ok(tables
        .into_iter()
        .filter(|t| allowed.contains(t))
        .collect())
}

struct SelectLandStep {
    model: Arc<dyn ChatModel>,
    tables: Vec<String>,
}

#[async_trait]
impl Step for SelectLandStep {
    async fn run(&self, state: &FlowState, _meta: &StepMeta) -> Result<StepUpdate, StepError> {
        let question = state
            .get_str("question")
            .ok_or_else(|| StepError::msg("question missing from state"))?;

        let system = format!(
            "Determine which land tables the user's question targets.\n\
             Allowed tables: {}.\n\
             Select only tables whose name is implied by the question; if none \
             are, select all of them.\n\
             Respond with a strict JSON array of table names and nothing else.",
            self.tables.join(", ")
        );
        let raw = self.model.generate(&system, question).await?;
        let land = parse_table_selection(&raw, &self.tables)?;

        let land_value = json!(land);
        Ok(StepUpdate::new()
            .field("land", land_value.clone())
            .node_result(StepData::text(land_value.to_string())))
    }
}

fn text2sql_system(table: &str) -> String {
    format!(
        "You translate questions about land parcels into a single PostgreSQL \
         query against the table `{}` with columns parcel_id, area_sqm, \
         price_per_sqm, zoning. Respond with SQL only, no commentary.",
        table
    )
}

struct GenerateSqlStep {
    model: Arc<dyn ChatModel>,
}

#[async_trait]
impl Step for GenerateSqlStep {
    async fn run(&self, state: &FlowState, meta: &StepMeta) -> Result<StepUpdate, StepError> {
        let question = state
            .get_str("question")
            .ok_or_else(|| StepError::msg("question missing from state"))?
            .to_string();
        let lands: Vec<String> = state
            .get("land")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        let drafts = Arc::new(Mutex::new(
            lands
                .iter()
                .map(|name| Draft {
                    name: name.clone(),
                    data: String::new(),
                })
                .collect::<Vec<_>>(),
        ));

        let tasks = lands.iter().enumerate().map(|(i, land)| {
            let model = self.model.clone();
            let drafts = drafts.clone();
            let channel = state.channel().clone();
            let step = meta.name.clone();
            let question = question.clone();
            let system = text2sql_system(land);
            async move {
                let mut stream = model.stream(&system, &question).await?;
                while let Some(token) = stream.next().await {
                    let token = token?;
                    let snapshot = {
                        let mut drafts = drafts.lock().unwrap();
                        drafts[i].data.push_str(&token);
                        drafts_to_value(&drafts)
                    };
                    channel.send(Envelope::process(
                        &step,
                        StepData::new("siteseek-sql-array", snapshot),
                    ));
                }
                Ok::<(), StepError>(())
            }
        });
        for outcome in futures::future::join_all(tasks).await {
            outcome?;
        }

        let drafts = drafts.lock().unwrap().clone();
        let sql = drafts_to_value(&drafts);
        Ok(StepUpdate::new()
            .field("sql", sql.clone())
            .node_result(StepData::new("siteseek-sql-array", sql)))
    }
}

/// Runs the generated queries and decides between the repair loop and the
/// result path, spending the typed retry counters as it goes
struct CheckQueryRouter {
    store: Arc<dyn LandStore>,
}

#[async_trait]
impl Router for CheckQueryRouter {
    async fn route(&self, state: &FlowState, _meta: &StepMeta) -> Result<Route, StepError> {
        let sql_items = value_to_drafts(state.get("sql"));

        let queries = sql_items.iter().map(|item| async {
            (item.name.clone(), self.store.query(&item.data).await)
        });
        let outcomes = futures::future::join_all(queries).await;

        let mut results = Vec::new();
        let mut hard_error = false;
        let mut too_few = false;
        for (name, outcome) in outcomes {
            match outcome {
                Ok(rows) if rows.len() < MIN_RECOMMEND_ROWS => {
                    too_few = true;
                    results.push(json!({
                        "name": name,
                        "data": "",
                        "error": format!("query returned fewer than {} rows", MIN_RECOMMEND_ROWS),
                    }));
                }
                Ok(rows) => results.push(json!({ "name": name, "data": rows })),
                Err(e) => {
                    hard_error = true;
                    results.push(json!({ "name": name, "data": "", "error": e.to_string() }));
                }
            }
        }

        let sql_error_retries = state.get_u64("sql_error_retries").unwrap_or(0);
        let too_few_retries = state.get_u64("too_few_rows_retries").unwrap_or(0);
        let retry = (hard_error && sql_error_retries < MAX_SQL_ERROR_RETRIES)
            || (too_few && too_few_retries < MAX_TOO_FEW_ROWS_RETRIES);

        let mut update = StepUpdate::new().field("query_result", Value::Array(results));
        if retry {
            if hard_error {
                update = update.field("sql_error_retries", json!(sql_error_retries + 1));
            }
            if too_few {
                update = update.field("too_few_rows_retries", json!(too_few_retries + 1));
            }
            Ok(Route::to(Next::step(REPAIR_SQL), update))
        } else {
            Ok(Route::to(Next::step(QUERY_RESULTS), update))
        }
    }
}

struct RepairSqlStep {
    model: Arc<dyn ChatModel>,
}

#[async_trait]
impl Step for RepairSqlStep {
    async fn run(&self, state: &FlowState, meta: &StepMeta) -> Result<StepUpdate, StepError> {
        let question = state
            .get_str("question")
            .ok_or_else(|| StepError::msg("question missing from state"))?
            .to_string();
        let sql_items = value_to_drafts(state.get("sql"));
        let results = state
            .get("query_result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        // Keep healthy queries as-is; failed ones are rewritten from scratch
        let mut failed = Vec::new();
        let drafts: Vec<Draft> = results
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let name = r["name"].as_str().unwrap_or_default().to_string();
                if let Some(error) = r["error"].as_str() {
                    let broken = sql_items
                        .iter()
                        .find(|s| s.name == name)
                        .map(|s| s.data.clone())
                        .unwrap_or_default();
                    failed.push((i, name.clone(), broken, error.to_string()));
                    Draft {
                        name,
                        data: String::new(),
                    }
                } else {
                    sql_items
                        .iter()
                        .find(|s| s.name == name)
                        .cloned()
                        .unwrap_or(Draft {
                            name,
                            data: String::new(),
                        })
                }
            })
            .collect();

        let drafts = Arc::new(Mutex::new(drafts));
        let tasks = failed.into_iter().map(|(i, name, broken, error)| {
            let model = self.model.clone();
            let drafts = drafts.clone();
            let channel = state.channel().clone();
            let step = meta.name.clone();
            let question = question.clone();
            let system = format!(
                "{}\nThe previous query failed and must be fixed.\n\
                 Previous query:\n{}\nFailure: {}",
                text2sql_system(&name),
                broken,
                error
            );
            async move {
                let mut stream = model.stream(&system, &question).await?;
                while let Some(token) = stream.next().await {
                    let token = token?;
                    let snapshot = {
                        let mut drafts = drafts.lock().unwrap();
                        drafts[i].data.push_str(&token);
                        drafts_to_value(&drafts)
                    };
                    channel.send(Envelope::process(
                        &step,
                        StepData::new("siteseek-sql-array", snapshot),
                    ));
                }
                Ok::<(), StepError>(())
            }
        });
        for outcome in futures::future::join_all(tasks).await {
            outcome?;
        }

        let drafts = drafts.lock().unwrap().clone();
        let sql = drafts_to_value(&drafts);
        Ok(StepUpdate::new()
            .field("sql", sql.clone())
            .node_result(StepData::new("siteseek-sql-array", sql)))
    }
}

/// Final query pass once the repair loop has settled
struct QueryResultsStep {
    store: Arc<dyn LandStore>,
}

#[async_trait]
impl Step for QueryResultsStep {
    async fn run(&self, state: &FlowState, _meta: &StepMeta) -> Result<StepUpdate, StepError> {
        let sql_items = value_to_drafts(state.get("sql"));

        let queries = sql_items.iter().map(|item| async {
            (item.name.clone(), self.store.query(&item.data).await)
        });
        let outcomes = futures::future::join_all(queries).await;

        let results: Vec<Value> = outcomes
            .into_iter()
            .map(|(name, outcome)| match outcome {
                Ok(rows) => json!({ "name": name, "data": rows }),
                Err(e) => json!({ "name": name, "data": [], "error": e.to_string() }),
            })
            .collect();

        let value = Value::Array(results);
        Ok(StepUpdate::new()
            .field("query_result", value.clone())
            .node_result(StepData::new("siteseek-table-array", value)))
    }
}

struct RecommendStep {
    model: Arc<dyn ChatModel>,
}

#[async_trait]
impl Step for RecommendStep {
    async fn run(&self, state: &FlowState, meta: &StepMeta) -> Result<StepUpdate, StepError> {
        let question = state
            .get_str("question")
            .ok_or_else(|| StepError::msg("question missing from state"))?
            .to_string();
        let results: Vec<Value> = state
            .get("query_result")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter(|r| r["data"].as_array().is_some_and(|rows| !rows.is_empty()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let drafts = Arc::new(Mutex::new(
            results
                .iter()
                .map(|r| Draft {
                    name: r["name"].as_str().unwrap_or_default().to_string(),
                    data: String::new(),
                })
                .collect::<Vec<_>>(),
        ));

        let tasks = results.iter().enumerate().map(|(i, result)| {
            let model = self.model.clone();
            let drafts = drafts.clone();
            let channel = state.channel().clone();
            let step = meta.name.clone();
            let question = question.clone();
            let system = format!(
                "Recommend the most suitable parcels for the user's question \
                 from the query results below, as a short ranked list.\n\
                 Query results:\n{}",
                result["data"]
            );
            async move {
                let mut stream = model.stream(&system, &question).await?;
                while let Some(token) = stream.next().await {
                    let token = token?;
                    let snapshot = {
                        let mut drafts = drafts.lock().unwrap();
                        drafts[i].data.push_str(&token);
                        drafts_to_value(&drafts).to_string()
                    };
                    channel.send(Envelope::process(
                        &step,
                        StepData::new("siteseek-chart-string", Value::String(snapshot)),
                    ));
                }
                Ok::<(), StepError>(())
            }
        });
        for outcome in futures::future::join_all(tasks).await {
            outcome?;
        }

        // Recommendation text may itself be chart JSON; pass it through
        // parsed when it is, verbatim when it is not
        let drafts = drafts.lock().unwrap().clone();
        let parsed: Vec<Value> = drafts
            .iter()
            .map(|d| {
                let data = serde_json::from_str::<Value>(&d.data)
                    .unwrap_or_else(|_| Value::String(d.data.clone()));
                json!({ "name": d.name, "data": data })
            })
            .collect();

        Ok(StepUpdate::new()
            .node_result(StepData::new("siteseek-chart-array", Value::Array(parsed))))
    }
}

/// Land recommendation agent with the bounded SQL repair loop
pub struct SiteSeekAgent {
    flow: crate::flow::CompiledFlow,
}

impl SiteSeekAgent {
    pub fn new(
        model: Arc<dyn ChatModel>,
        store: Arc<dyn LandStore>,
        tables: Vec<String>,
    ) -> Result<Self, FlowError> {
        let flow = GraphBuilder::new()
            .add_step(
                SELECT_LAND,
                Arc::new(SelectLandStep {
                    model: model.clone(),
                    tables,
                }),
            )
            .add_step(
                GENERATE_SQL,
                Arc::new(GenerateSqlStep {
                    model: model.clone(),
                }),
            )
            .add_router(
                CHECK_QUERY,
                Arc::new(CheckQueryRouter {
                    store: store.clone(),
                }),
                &[REPAIR_SQL, QUERY_RESULTS],
            )
            .add_step(
                REPAIR_SQL,
                Arc::new(RepairSqlStep {
                    model: model.clone(),
                }),
            )
            .add_step(QUERY_RESULTS, Arc::new(QueryResultsStep { store }))
            .add_step(RECOMMEND, Arc::new(RecommendStep { model }))
            .add_edge(START, SELECT_LAND)
            .add_edge(SELECT_LAND, GENERATE_SQL)
            .add_edge(GENERATE_SQL, CHECK_QUERY)
            .add_edge(REPAIR_SQL, CHECK_QUERY)
            .add_edge(QUERY_RESULTS, RECOMMEND)
            .add_edge(RECOMMEND, END)
            .compile()?;
        Ok(Self { flow })
    }

    fn schema() -> StateSchema {
        StateSchema::new()
            .field("question", Reducer::Replace)
            .field_with_default("land", Reducer::Replace, json!([]))
            .field("sql", Reducer::Replace)
            .field("query_result", Reducer::Replace)
            .field_with_default("sql_error_retries", Reducer::Replace, json!(0))
            .field_with_default("too_few_rows_retries", Reducer::Replace, json!(0))
    }
}

#[async_trait]
impl Agent for SiteSeekAgent {
    fn name(&self) -> &str {
        "site-seek"
    }

    fn description(&self) -> &str {
        "Recommends land parcels via generated SQL with a bounded repair loop"
    }

    async fn run(&self, question: String, channel: StepChannel) -> Result<FlowState, FlowError> {
        let mut state = FlowState::new(Self::schema(), channel);
        state.apply(std::collections::HashMap::from([(
            "question".to_string(),
            json!(question),
        )]));

        self.flow
            .invoke(state, InvokeOptions::new(DEFAULT_RECURSION_LIMIT))
            .await
    }
}

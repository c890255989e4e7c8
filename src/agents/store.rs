// SPDX-License-Identifier: MIT

//! Land data store seam
//!
//! The site-seek agent queries land parcel tables through this trait; the
//! real database behind it is an external collaborator. A small in-memory
//! store backs the demo binary and the tests.

use std::collections::HashMap;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use thiserror::Error;

use crate::flow::StepError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("query failed: {0}")]
    Query(String),
}

impl From<StoreError> for StepError {
    fn from(err: StoreError) -> Self {
        StepError::Query(err.to_string())
    }
}

/// Executes generated SQL against the land parcel database
#[async_trait]
pub trait LandStore: Send + Sync {
    /// Run one query and return its rows as JSON objects
    async fn query(&self, sql: &str) -> Result<Vec<Value>, StoreError>;
}

static DEMO_TABLES: Lazy<HashMap<&'static str, Vec<Value>>> = Lazy::new(|| {
    let industrial: Vec<Value> = (1..=6)
        .map(|i| {
            json!({
                "parcel_id": format!("IND-{:03}", i),
                "area_sqm": 12000 + i * 850,
                "price_per_sqm": 310 + i * 12,
                "zoning": "industrial"
            })
        })
        .collect();
    let commercial: Vec<Value> = (1..=6)
        .map(|i| {
            json!({
                "parcel_id": format!("COM-{:03}", i),
                "area_sqm": 4000 + i * 400,
                "price_per_sqm": 980 + i * 45,
                "zoning": "commercial"
            })
        })
        .collect();
    HashMap::from([
        ("industrial_land", industrial),
        ("commercial_land", commercial),
    ])
});

/// In-memory store over a fixed set of demo tables
///
/// Matching is intentionally naive: a query hits the first demo table whose
/// name appears in the SQL text. Good enough to drive the demo agent
/// end-to-end without a database.
pub struct StaticLandStore {
    tables: HashMap<String, Vec<Value>>,
}

impl StaticLandStore {
    pub fn new(tables: HashMap<String, Vec<Value>>) -> Self {
        Self { tables }
    }

    pub fn demo() -> Self {
        Self {
            tables: DEMO_TABLES
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    /// Table names this store can answer for
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl LandStore for StaticLandStore {
    async fn query(&self, sql: &str) -> Result<Vec<Value>, StoreError> {
        for (name, rows) in &self.tables {
            if sql.contains(name.as_str()) {
                return Ok(rows.clone());
            }
        }
        Err(StoreError::Query(format!(
            "no known table referenced in query: {}",
            sql
        )))
    }
}

// SPDX-License-Identifier: MIT

//! Step result envelopes
//!
//! An [`Envelope`] is one lifecycle message describing a step's progress:
//! exactly one `start` and one terminal (`success` or `error`) per step
//! execution, with any number of `process` envelopes in between for
//! incremental token streaming. Envelopes are serialized camelCase, one
//! JSON object per channel message.

use serde::{Deserialize, Serialize};

/// Lifecycle phase of a step execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Start,
    Process,
    Success,
    Error,
}

impl StepStatus {
    /// Terminal statuses close a step's lifecycle segment
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Success | StepStatus::Error)
    }
}

/// Tagged payload carried by an envelope
///
/// The `kind` tag tells the client how to render the data (string, table,
/// chart, ...). The catalog of tags is a domain concern, not an engine one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepData {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: serde_json::Value,
}

impl StepData {
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Plain text payload, tagged `string`
    pub fn text(data: impl Into<String>) -> Self {
        Self {
            kind: "string".to_string(),
            data: serde_json::Value::String(data.into()),
        }
    }
}

/// One lifecycle message for a single step execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub status: StepStatus,
    pub step_name: String,
    /// Elapsed seconds for the step, two-decimal precision; stamped by the
    /// channel on lifecycle sends of terminal envelopes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    pub data: Option<StepData>,
}

impl Envelope {
    pub fn start(step_name: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Start,
            step_name: step_name.into(),
            duration: None,
            data: None,
        }
    }

    pub fn process(step_name: impl Into<String>, data: StepData) -> Self {
        Self {
            status: StepStatus::Process,
            step_name: step_name.into(),
            duration: None,
            data: Some(data),
        }
    }

    pub fn success(step_name: impl Into<String>, data: Option<StepData>) -> Self {
        Self {
            status: StepStatus::Success,
            step_name: step_name.into(),
            duration: None,
            data,
        }
    }

    /// Error envelopes carry the failure message text, never a raw error value
    pub fn error(step_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Error,
            step_name: step_name.into(),
            duration: None,
            data: Some(StepData::text(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_wire_format() {
        let envelope = Envelope::success("extract", Some(StepData::text("done")));
        let wire = serde_json::to_value(&envelope).unwrap();

        assert_eq!(
            wire,
            json!({
                "status": "success",
                "stepName": "extract",
                "data": { "type": "string", "data": "done" }
            })
        );
    }

    #[test]
    fn test_duration_serialized_when_stamped() {
        let mut envelope = Envelope::success("extract", None);
        envelope.duration = Some(1.25);
        let wire = serde_json::to_value(&envelope).unwrap();

        assert_eq!(wire["duration"], json!(1.25));
    }

    #[test]
    fn test_start_envelope_has_null_data() {
        let wire = serde_json::to_value(Envelope::start("extract")).unwrap();
        assert_eq!(wire["status"], "start");
        assert!(wire["data"].is_null());
        assert!(wire.get("duration").is_none());
    }

    #[test]
    fn test_error_envelope_carries_message_text() {
        let envelope = Envelope::error("query", "relation does not exist");
        let data = envelope.data.unwrap();
        assert_eq!(data.kind, "string");
        assert_eq!(data.data, json!("relation does not exist"));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(StepStatus::Success.is_terminal());
        assert!(StepStatus::Error.is_terminal());
        assert!(!StepStatus::Start.is_terminal());
        assert!(!StepStatus::Process.is_terminal());
    }
}

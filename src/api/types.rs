//! Request and response DTOs for the intake API.
//!
//! Kept separate from the domain model so the wire contract and the store
//! can evolve independently.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::{Feedback, FeedbackKind};

/// Payload sent by the feedback widget.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitFeedbackRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub kind: FeedbackKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub console_logs: Option<String>,
    /// Loose browser/device info map; known keys are lifted into typed
    /// fields, the rest is dropped.
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Serialize)]
pub struct SubmitFeedbackResponse {
    pub id: i64,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Lift known metadata keys into typed fields.
pub fn apply_metadata(feedback: &mut Feedback, metadata: &Map<String, Value>) {
    if let Some(email) = metadata.get("userEmail").and_then(Value::as_str) {
        feedback.user_email = Some(email.to_string());
    }
    if let Some(name) = metadata.get("userName").and_then(Value::as_str) {
        feedback.user_name = Some(name.to_string());
    }
    if feedback.url.is_none() {
        if let Some(url) = metadata.get("url").and_then(Value::as_str) {
            feedback.url = Some(url.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_accepts_widget_payload() {
        let request: SubmitFeedbackRequest = serde_json::from_value(json!({
            "title": "Broken button",
            "description": "Nothing happens on click.",
            "type": "bug",
            "consoleLogs": "TypeError: x",
            "metadata": {"userEmail": "a@co", "screenWidth": 1920}
        }))
        .unwrap();

        assert_eq!(request.kind, FeedbackKind::Bug);
        assert_eq!(request.console_logs.as_deref(), Some("TypeError: x"));
        assert!(request.metadata.is_some());
    }

    #[test]
    fn metadata_fills_typed_fields_without_clobbering_url() {
        let mut feedback = Feedback::new("t", "d", FeedbackKind::Bug);
        feedback.url = Some("https://app.test/checkout".to_string());

        let metadata = json!({
            "userEmail": "alice@co",
            "userName": "Alice",
            "url": "https://elsewhere.test"
        });
        apply_metadata(&mut feedback, metadata.as_object().unwrap());

        assert_eq!(feedback.user_email.as_deref(), Some("alice@co"));
        assert_eq!(feedback.user_name.as_deref(), Some("Alice"));
        assert_eq!(feedback.url.as_deref(), Some("https://app.test/checkout"));
    }
}

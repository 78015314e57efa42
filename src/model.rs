//! Domain entities for feedback submissions.
//!
//! `Feedback` is the internal record; the API layer maps its own DTOs onto it
//! (see `api::types`). JSON field names stay camelCase for compatibility with
//! the browser widget.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of a feedback submission.
///
/// Unknown values coming off the wire collapse into `Other` rather than
/// failing the request; triage policy decides what to do with them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    Bug,
    Feature,
    Improvement,
    Question,
    #[default]
    #[serde(other)]
    Other,
}

impl FeedbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackKind::Bug => "bug",
            FeedbackKind::Feature => "feature",
            FeedbackKind::Improvement => "improvement",
            FeedbackKind::Question => "question",
            FeedbackKind::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "bug" => FeedbackKind::Bug,
            "feature" => FeedbackKind::Feature,
            "improvement" => FeedbackKind::Improvement,
            "question" => FeedbackKind::Question,
            _ => FeedbackKind::Other,
        }
    }
}

impl std::fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user feedback submission.
///
/// Immutable once handed to the dispatcher; the only later mutation is the
/// store-side analysis write, which happens by id, not through this value.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub id: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,

    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: FeedbackKind,

    /// Page the user was on when submitting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    /// Browser console history captured by the widget just before submission.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub console_logs: Option<String>,

    /// Markdown report produced by the analysis agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl Feedback {
    /// A bare submission with only the user-provided fields set.
    pub fn new(title: impl Into<String>, description: impl Into<String>, kind: FeedbackKind) -> Self {
        Feedback {
            id: 0,
            user_email: None,
            user_name: None,
            title: title.into(),
            description: description.into(),
            kind,
            url: None,
            user_agent: None,
            console_logs: None,
            analysis: None,
            analysis_at: None,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_roundtrips_through_serde() {
        let kind: FeedbackKind = serde_json::from_str("\"bug\"").unwrap();
        assert_eq!(kind, FeedbackKind::Bug);
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"bug\"");
    }

    #[test]
    fn unknown_kind_becomes_other() {
        let kind: FeedbackKind = serde_json::from_str("\"complaint\"").unwrap();
        assert_eq!(kind, FeedbackKind::Other);
    }
}

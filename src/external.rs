//! External-agent strategy: hand the submission to a containerized agent
//! through a bridge script and scrape its transcript for artifacts.
//!
//! The script receives the JSON-serialized submission as its only argument
//! and owns the transport to the container (base64 encoding, exec, etc.).
//! Stdout is the transcript; exit code 0 means success.

use std::path::PathBuf;
use std::process::Stdio;

use serde_json::json;
use tokio::process::Command;

use crate::model::Feedback;

/// Runs the bridge script for one submission.
pub struct ExternalAgent {
    script: PathBuf,
    container_name: String,
}

impl ExternalAgent {
    pub fn new(script: impl Into<PathBuf>, container_name: impl Into<String>) -> Self {
        ExternalAgent {
            script: script.into(),
            container_name: container_name.into(),
        }
    }

    /// Invoke the script and return its stdout.
    ///
    /// The child is killed if this future is dropped, which is how the
    /// dispatcher's per-run timeout cancels a stuck agent.
    pub async fn run(&self, feedback: &Feedback) -> anyhow::Result<String> {
        let payload = serialize_submission(feedback);

        let output = Command::new(&self.script)
            .arg(payload.to_string())
            .env("AGENT_CONTAINER", &self.container_name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("failed to run {}: {}", self.script.display(), e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{}: {}", output.status, stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// The compact submission object handed to the script.
fn serialize_submission(feedback: &Feedback) -> serde_json::Value {
    json!({
        "id": feedback.id,
        "title": feedback.title,
        "description": feedback.description,
        "type": feedback.kind.as_str(),
        "url": feedback.url.as_deref().unwrap_or(""),
        "consoleLogs": feedback.console_logs.as_deref().unwrap_or(""),
    })
}

/// Probe whether the persistent agent container is up.
pub async fn is_container_running(container_name: &str) -> bool {
    let output = Command::new("docker")
        .args([
            "ps",
            "--filter",
            &format!("name={}", container_name),
            "--format",
            "{{.Names}}",
        ])
        .output()
        .await;

    match output {
        Ok(out) => String::from_utf8_lossy(&out.stdout).trim() == container_name,
        Err(_) => false,
    }
}

/// Artifacts scraped from an agent transcript.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrapedArtifacts {
    pub pr_url: Option<String>,
    pub pr_number: Option<i64>,
    pub branch: Option<String>,
}

/// Scan a transcript line by line for PR URLs and branch names.
///
/// Only two line patterns are recognized; anything else in the transcript is
/// ignored. Within a line the first matching token wins. A later PR line
/// supersedes an earlier one; the first branch sighting is kept.
pub fn scrape_output(output: &str) -> ScrapedArtifacts {
    let mut artifacts = ScrapedArtifacts::default();

    for line in output.lines() {
        let line = line.trim();

        if line.contains("github.com") && line.contains("/pull/") {
            for word in line.split_whitespace() {
                if word.contains("github.com") && word.contains("/pull/") {
                    let url = word.trim_matches(|c| matches!(c, '(' | ')' | '[' | ']' | '<' | '>'));
                    artifacts.pr_url = Some(url.to_string());
                    artifacts.pr_number = parse_pull_number(url);
                    break;
                }
            }
        }

        if let Some(rest) = line.strip_prefix("Branch:") {
            if artifacts.branch.is_none() {
                artifacts.branch = Some(rest.trim().to_string());
            }
        } else if (line.starts_with("fix/") || line.starts_with("feature/"))
            && artifacts.branch.is_none()
        {
            if let Some(word) = line.split_whitespace().next() {
                artifacts.branch = Some(word.to_string());
            }
        }
    }

    artifacts
}

/// Numeric segment after `/pull/`, ignoring any trailing path or punctuation.
fn parse_pull_number(url: &str) -> Option<i64> {
    let after = url.split("/pull/").nth(1)?;
    let digits: String = after.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

//! Trigger policy and asynchronous dispatch for analysis runs.
//!
//! The trigger is a constructed value threaded through the intake, not a
//! process-wide singleton. One mutex guards its two mutable fields
//! (`is_running`, `last_run`); it is held only across direct reads and
//! writes of those fields, never across I/O.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::oneshot;

use crate::agent::Analyzer;
use crate::config::{Mode, SelfHealConfig};
use crate::external::{self, ExternalAgent};
use crate::llm::ChatClient;
use crate::model::Feedback;
use crate::sandbox::SandboxFs;
use crate::store::FeedbackStore;

/// Structured outcome of one analysis run.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub triggered: bool,
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// The raw analysis text (or agent transcript in external mode).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunResult {
    fn started() -> Self {
        RunResult {
            triggered: true,
            success: false,
            message: String::new(),
            pr_number: None,
            pr_url: None,
            branch: None,
            started_at: Utc::now(),
            completed_at: None,
            output: String::new(),
            error: None,
        }
    }
}

#[derive(Debug, Default)]
struct TriggerState {
    is_running: bool,
    last_run: Option<DateTime<Utc>>,
}

/// Clears `is_running` on every exit path, including panics in the worker.
struct RunningGuard<'a> {
    state: &'a Mutex<TriggerState>,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.is_running = false;
    }
}

/// Decides when an analysis may run and owns the single-flight state.
pub struct Trigger {
    config: SelfHealConfig,
    state: Mutex<TriggerState>,
}

impl Trigger {
    pub fn new(config: SelfHealConfig) -> Self {
        Trigger {
            config,
            state: Mutex::new(TriggerState::default()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, TriggerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Policy enforcement point: does this submission qualify for a run?
    ///
    /// Returns the denial reason alongside the verdict so the intake can log
    /// it; the user only ever sees the acceptance message.
    pub async fn can_trigger(&self, feedback: &Feedback) -> (bool, String) {
        if !self.config.enabled {
            return (false, "self-healing disabled".to_string());
        }

        match self.config.mode {
            // The external agent can modify code and open PRs; restrict it to
            // trusted admins and check its infrastructure is up.
            Mode::External => {
                if !self.is_admin(feedback.user_email.as_deref()) {
                    return (false, "external mode requires admin privileges".to_string());
                }
                if !self.config.trigger_script.exists() {
                    return (false, "trigger script not found".to_string());
                }
                if !external::is_container_running(&self.config.container_name).await {
                    return (false, "agent container not running".to_string());
                }
            }
            // Internal analysis is read-only; it just needs a credential.
            Mode::Internal => {
                if self.config.api_key.is_empty() {
                    return (false, "API key not configured".to_string());
                }
            }
        }

        if !self.is_allowed_kind(feedback.kind.as_str()) {
            return (
                false,
                format!("feedback type '{}' not allowed for self-healing", feedback.kind),
            );
        }

        let state = self.lock_state();
        if state.is_running {
            return (false, "self-healing already in progress".to_string());
        }
        if let Some(last_run) = state.last_run {
            let elapsed = elapsed_since(last_run);
            if elapsed < self.config.cooldown {
                let remaining = self.config.cooldown - elapsed;
                return (
                    false,
                    format!("cooldown active, {} remaining", format_minutes(remaining)),
                );
            }
        }

        (true, String::new())
    }

    /// Run one analysis under the single-flight lock and per-run timeout.
    ///
    /// Both success and failure stamp `last_run`; the cooldown window starts
    /// when the run starts, not when it ends.
    pub async fn execute(&self, feedback: &Feedback) -> RunResult {
        let mut result = RunResult::started();

        {
            let mut state = self.lock_state();
            if state.is_running {
                result.message = "already running".to_string();
                return result;
            }
            state.is_running = true;
            state.last_run = Some(Utc::now());
        }
        let _guard = RunningGuard { state: &self.state };

        tracing::info!(
            "starting {} analysis for feedback #{}: {}",
            self.config.mode,
            feedback.id,
            feedback.title
        );

        if self.config.dry_run {
            result.success = true;
            result.message = format!("dry run - would execute {} strategy", self.config.mode);
            result.output = format!("Feedback: {} - {}", feedback.title, feedback.description);
            result.completed_at = Some(Utc::now());
            return result;
        }

        let outcome = match tokio::time::timeout(self.config.timeout, self.run_strategy(feedback)).await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(anyhow::anyhow!(
                "timeout after {}",
                format_duration(self.config.timeout)
            )),
        };

        result.completed_at = Some(Utc::now());

        match outcome {
            Ok(output) => {
                result.success = true;
                result.message = "analysis completed".to_string();
                if self.config.mode == Mode::External {
                    let artifacts = external::scrape_output(&output);
                    result.pr_url = artifacts.pr_url;
                    result.pr_number = artifacts.pr_number;
                    result.branch = artifacts.branch;
                }
                result.output = output;

                tracing::info!("analysis completed for feedback #{}", feedback.id);
                if let Some(pr_url) = &result.pr_url {
                    tracing::info!("PR created: {}", pr_url);
                }
            }
            Err(e) => {
                result.message = format!("{} execution failed", self.config.mode);
                result.error = Some(e.to_string());
                tracing::error!("analysis failed for feedback #{}: {}", feedback.id, e);
            }
        }

        result
    }

    async fn run_strategy(&self, feedback: &Feedback) -> anyhow::Result<String> {
        match self.config.mode {
            Mode::External => {
                ExternalAgent::new(&self.config.trigger_script, &self.config.container_name)
                    .run(feedback)
                    .await
            }
            Mode::Internal => {
                let source_dir = if self.config.source_dir.as_os_str().is_empty() {
                    PathBuf::from(".")
                } else {
                    self.config.source_dir.clone()
                };
                tracing::info!("source directory for file access: {}", source_dir.display());

                let client = ChatClient::new(&self.config.api_key, &self.config.base_url);
                let analyzer = Analyzer::new(client, &self.config.model, SandboxFs::new(source_dir));
                analyzer.analyze(feedback).await
            }
        }
    }

    /// Launch an analysis on a detached task and write the report back into
    /// the store on success.
    ///
    /// Fire-and-forget from the intake's standpoint; the returned channel is
    /// an in-process observation handle only. The task outlives the request
    /// that spawned it and is bounded solely by the per-run timeout.
    pub fn dispatch(
        self: Arc<Self>,
        store: Arc<FeedbackStore>,
        feedback: Feedback,
    ) -> oneshot::Receiver<RunResult> {
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let result = self.execute(&feedback).await;

            if result.success && !result.output.is_empty() {
                match store.update_analysis(feedback.id, &result.output) {
                    Ok(()) => tracing::info!("analysis stored for feedback #{}", feedback.id),
                    Err(e) => {
                        tracing::error!("failed to store analysis for feedback #{}: {}", feedback.id, e)
                    }
                }
            }

            let _ = tx.send(result);
        });

        rx
    }

    /// Snapshot of the trigger's state and strategy health probes.
    pub async fn status(&self) -> serde_json::Value {
        let (is_running, last_run) = {
            let state = self.lock_state();
            (state.is_running, state.last_run)
        };

        let mut status = json!({
            "enabled": self.config.enabled,
            "mode": self.config.mode.as_str(),
            "is_running": is_running,
        });

        if let Some(last_run) = last_run {
            status["last_run"] = json!(last_run.to_rfc3339());
            let remaining = self.config.cooldown.saturating_sub(elapsed_since(last_run));
            status["cooldown_remaining"] = json!(format!("{}s", remaining.as_secs()));
        }

        match self.config.mode {
            Mode::External => {
                status["container_name"] = json!(self.config.container_name);
                status["container_running"] =
                    json!(external::is_container_running(&self.config.container_name).await);
                status["trigger_script_found"] = json!(self.config.trigger_script.exists());
            }
            Mode::Internal => {
                status["api_key_configured"] = json!(!self.config.api_key.is_empty());
                status["source_dir"] = json!(self.config.source_dir.display().to_string());
            }
        }

        status
    }

    fn is_admin(&self, email: Option<&str>) -> bool {
        let Some(email) = email else {
            return false;
        };
        let email = email.trim().to_lowercase();
        self.config
            .admin_emails
            .iter()
            .any(|admin| admin.trim().to_lowercase() == email)
    }

    fn is_allowed_kind(&self, kind: &str) -> bool {
        self.config
            .allowed_types
            .iter()
            .map(|t| t.trim().to_lowercase())
            .any(|t| t == "all" || t == kind)
    }

    #[cfg(test)]
    fn force_state(&self, is_running: bool, last_run: Option<DateTime<Utc>>) {
        let mut state = self.lock_state();
        state.is_running = is_running;
        state.last_run = last_run;
    }
}

fn elapsed_since(t: DateTime<Utc>) -> Duration {
    Utc::now()
        .signed_duration_since(t)
        .to_std()
        .unwrap_or_default()
}

/// "30m" for whole minutes, "90s" below that, "250ms" below a second.
fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs == 0 {
        format!("{}ms", d.as_millis())
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

/// Remaining cooldown rounded to the nearest minute.
fn format_minutes(d: Duration) -> String {
    format!("{}m", (d.as_secs() + 30) / 60)
}

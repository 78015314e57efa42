//! Configuration, loaded once at startup from environment variables.
//!
//! Missing or malformed self-healing settings never crash the intake server;
//! `SelfHealConfig::validate` is checked at construction and a failure simply
//! disables the subsystem.

use std::path::PathBuf;
use std::time::Duration;

/// Which engine executes an admitted analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// In-process agent loop over the chat-completions API. Read-only.
    Internal,
    /// Subprocess bridge to a containerized agent that may open PRs.
    External,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Internal => "internal",
            Mode::External => "external",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for the self-healing subsystem.
#[derive(Debug, Clone)]
pub struct SelfHealConfig {
    /// Master switch. When false nothing below is consulted.
    pub enabled: bool,
    pub mode: Mode,
    /// Sandbox root the internal agent may read (internal mode).
    pub source_dir: PathBuf,
    /// Bridge script invoked with the serialized submission (external mode).
    pub trigger_script: PathBuf,
    /// Name of the persistent agent container probed before dispatch.
    pub container_name: String,
    /// Bypass the injection/safety guards. Development only.
    pub skip_guards: bool,
    /// Run the dispatcher without calling the model; produce synthetic output.
    pub dry_run: bool,
    /// Minimum wall-clock gap between admitted runs.
    pub cooldown: Duration,
    /// Watchdog for a single run.
    pub timeout: Duration,
    /// Who may trigger the external strategy.
    pub admin_emails: Vec<String>,
    /// Feedback types admitted for analysis; "all" is a wildcard.
    pub allowed_types: Vec<String>,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl SelfHealConfig {
    pub fn from_env() -> Self {
        SelfHealConfig {
            enabled: env_bool("SELFHEALING_ENABLED"),
            mode: match env_or("SELFHEALING_MODE", "internal").as_str() {
                "external" => Mode::External,
                _ => Mode::Internal,
            },
            source_dir: PathBuf::from(env_or("SOURCE_DIR", ".")),
            trigger_script: PathBuf::from(env_or("TRIGGER_SCRIPT", "./scripts/trigger-analysis.sh")),
            container_name: env_or("AGENT_CONTAINER", "selfheal-agent"),
            skip_guards: env_bool("SKIP_GUARDS"),
            dry_run: env_bool("DRY_RUN"),
            cooldown: env_duration_secs("SELFHEALING_COOLDOWN_SECS", 60 * 60),
            timeout: env_duration_secs("SELFHEALING_TIMEOUT_SECS", 30 * 60),
            admin_emails: parse_csv(&std::env::var("ADMIN_EMAILS").unwrap_or_default()),
            allowed_types: parse_allowed_types(&std::env::var("SELFHEALING_TYPES").unwrap_or_default()),
            api_key: std::env::var("LLM_API_KEY").unwrap_or_default(),
            base_url: env_or("LLM_BASE_URL", "https://api.openai.com/v1"),
            model: env_or("LLM_MODEL", "gpt-4o-mini"),
        }
    }

    /// Fail-fast sanity check, run before the subsystem is constructed.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }

        match self.mode {
            Mode::External => {
                if !self.trigger_script.exists() {
                    anyhow::bail!("trigger script not found: {}", self.trigger_script.display());
                }
                if self.admin_emails.is_empty() {
                    anyhow::bail!("ADMIN_EMAILS is required for external mode");
                }
            }
            Mode::Internal => {
                if self.api_key.is_empty() {
                    anyhow::bail!("LLM_API_KEY is required for internal mode");
                }
            }
        }

        Ok(())
    }
}

/// Settings for the HTTP server and store, outside the self-healing core.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_path: PathBuf,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        ServerConfig {
            host: env_or("HOST", "0.0.0.0"),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            database_path: PathBuf::from(env_or("DATABASE_PATH", "feedback.db")),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

fn env_bool(key: &str) -> bool {
    std::env::var(key).map(|v| v == "true").unwrap_or(false)
}

fn env_duration_secs(key: &str, default_secs: u64) -> Duration {
    let secs = std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default_secs);
    Duration::from_secs(secs)
}

fn parse_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_allowed_types(s: &str) -> Vec<String> {
    let parsed = parse_csv(s);
    if parsed.is_empty() {
        vec!["bug".to_string()]
    } else {
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_parsing_trims_and_drops_empties() {
        assert_eq!(parse_csv(" a@co , ,b@co,"), vec!["a@co", "b@co"]);
        assert!(parse_csv("").is_empty());
    }

    #[test]
    fn allowed_types_default_to_bug() {
        assert_eq!(parse_allowed_types(""), vec!["bug"]);
        assert_eq!(parse_allowed_types("bug,question"), vec!["bug", "question"]);
    }

    #[test]
    fn validate_requires_key_for_internal_mode() {
        let config = SelfHealConfig {
            enabled: true,
            mode: Mode::Internal,
            source_dir: PathBuf::from("."),
            trigger_script: PathBuf::from("./missing.sh"),
            container_name: "selfheal-agent".into(),
            skip_guards: false,
            dry_run: false,
            cooldown: Duration::from_secs(3600),
            timeout: Duration::from_secs(1800),
            admin_emails: vec![],
            allowed_types: vec!["bug".into()],
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
        };
        assert!(config.validate().is_err());

        let mut ok = config.clone();
        ok.api_key = "sk-test".into();
        assert!(ok.validate().is_ok());

        let mut disabled = config;
        disabled.enabled = false;
        assert!(disabled.validate().is_ok());
    }

    #[test]
    fn validate_requires_admins_for_external_mode() {
        let script = tempfile::NamedTempFile::new().unwrap();
        let config = SelfHealConfig {
            enabled: true,
            mode: Mode::External,
            source_dir: PathBuf::from("."),
            trigger_script: script.path().to_path_buf(),
            container_name: "selfheal-agent".into(),
            skip_guards: false,
            dry_run: false,
            cooldown: Duration::from_secs(3600),
            timeout: Duration::from_secs(1800),
            admin_emails: vec![],
            allowed_types: vec!["bug".into()],
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
        };
        assert!(config.validate().is_err());

        let mut ok = config;
        ok.admin_emails = vec!["alice@co".into()];
        assert!(ok.validate().is_ok());
    }
}

//! The analysis agent: a bounded tool-calling loop over the chat API.
//!
//! One invocation owns one conversation history. The model is re-prompted
//! with accumulated tool results until it produces a terminal answer or the
//! iteration cap is hit. There is no conversation memory across submissions.

pub mod prompts;
pub mod tools;

use crate::llm::{ChatMessage, ChatOptions, LlmClient, Role};
use crate::model::Feedback;
use crate::sandbox::SandboxFs;

/// Upper bound on model turns per analysis.
pub const MAX_ITERATIONS: usize = 10;

const MAX_ANALYSIS_TOKENS: u32 = 4000;
/// Low temperature for stability during tool use.
const ANALYSIS_TEMPERATURE: f64 = 0.2;

/// Drives the conversation state and tool execution loop for one submission.
pub struct Analyzer<C> {
    client: C,
    model: String,
    sandbox: SandboxFs,
}

impl<C: LlmClient> Analyzer<C> {
    pub fn new(client: C, model: impl Into<String>, sandbox: SandboxFs) -> Self {
        Analyzer {
            client,
            model: model.into(),
            sandbox,
        }
    }

    /// Run the agent loop and return the final report text.
    ///
    /// If the iteration cap is reached, the most recent non-empty assistant
    /// text is returned as a best-effort answer; only a run that produced no
    /// assistant text at all fails.
    pub async fn analyze(&self, feedback: &Feedback) -> anyhow::Result<String> {
        let mut history = vec![
            ChatMessage::text(Role::System, prompts::SYSTEM_PROMPT),
            ChatMessage::text(Role::User, prompts::render_user_prompt(feedback)),
        ];
        let catalog = tools::catalog();
        let options = ChatOptions {
            temperature: Some(ANALYSIS_TEMPERATURE),
            max_tokens: Some(MAX_ANALYSIS_TOKENS),
        };

        for _ in 0..MAX_ITERATIONS {
            let response = self
                .client
                .chat_completion(&self.model, &history, Some(&catalog), options)
                .await?;

            let tool_calls = response.tool_calls.clone().unwrap_or_default();
            let done = response.finish_reason.as_deref() == Some("stop") || tool_calls.is_empty();

            history.push(response.to_assistant_message());

            if done {
                return Ok(response.content.unwrap_or_default());
            }

            for call in &tool_calls {
                let result = tools::execute_tool(&self.sandbox, call).await;
                history.push(ChatMessage::tool_result(&call.id, result));
            }
        }

        // Cap reached: salvage whatever the model last said.
        for message in history.iter().rev() {
            if message.role == Role::Assistant {
                if let Some(content) = &message.content {
                    if !content.is_empty() {
                        tracing::warn!(
                            "iteration cap reached, returning last assistant text ({} chars)",
                            content.len()
                        );
                        return Ok(content.clone());
                    }
                }
            }
        }

        anyhow::bail!("analysis incomplete after {} iterations", MAX_ITERATIONS)
    }
}

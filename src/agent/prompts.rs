//! Prompt construction for the analysis agent.

use crate::model::Feedback;

/// Below this description length the model gets nudged to explore the tree
/// instead of guessing from a one-liner.
const MIN_DESCRIPTION_LEN: usize = 20;

/// Persona and mandated output format for the analysis agent.
pub const SYSTEM_PROMPT: &str = "\
You are a senior software engineer analyzing user feedback and bug reports for a web application.

You have read-only access to the project's source code through two tools:
- list_files: list the contents of a directory
- get_file_content: read a specific file

Use the tools to locate the code relevant to the report before drawing conclusions.
Start from the directory listing, follow the most promising files, and stop once you
have enough evidence.

Provide your final answer in this format:

## Summary
One sentence describing what the user is reporting.

## Relevant Files
The files you inspected that relate to the issue, with a short note on why.

## Analysis
Your technical analysis of the issue. Consider:
- What the user is trying to accomplish
- What might be going wrong based on their description and the code
- Common causes for this type of issue

## Suggested Fix
If applicable, suggest what code changes or actions might resolve this.
Use markdown code blocks for any code examples.
If no code change is needed, explain what action to take.

Be helpful and specific based on the information provided.";

/// Render the submission into the opening user message.
pub fn render_user_prompt(feedback: &Feedback) -> String {
    let mut prompt = format!(
        "Analyze this user feedback:\n\n\
         **Title:** {}\n\
         **Type:** {}\n\
         **Page URL:** {}\n\n\
         **User's Description:**\n{}",
        feedback.title,
        feedback.kind,
        feedback.url.as_deref().unwrap_or(""),
        feedback.description,
    );

    if let Some(logs) = feedback.console_logs.as_deref() {
        if !logs.is_empty() {
            prompt.push_str(&format!("\n\n**Console Logs:**\n```\n{}\n```", logs));
        }
    }

    if feedback.description.len() < MIN_DESCRIPTION_LEN {
        prompt.push_str(
            "\n\nNote: The user provided minimal description. \
             Explore the source tree with the available tools and infer the \
             likely cause from the feedback type and title.",
        );
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FeedbackKind;

    #[test]
    fn includes_console_logs_in_fenced_block() {
        let mut feedback = Feedback::new("Crash", "The page crashes on load.", FeedbackKind::Bug);
        feedback.console_logs = Some("TypeError: x is undefined".to_string());

        let prompt = render_user_prompt(&feedback);
        assert!(prompt.contains("**Console Logs:**\n```\nTypeError: x is undefined\n```"));
    }

    #[test]
    fn short_description_gets_steering_note() {
        let feedback = Feedback::new("Broken", "x", FeedbackKind::Bug);
        let prompt = render_user_prompt(&feedback);
        assert!(prompt.contains("minimal description"));
    }

    #[test]
    fn long_description_has_no_steering_note() {
        let feedback = Feedback::new(
            "Broken",
            "Clicking the submit button does nothing at all.",
            FeedbackKind::Bug,
        );
        let prompt = render_user_prompt(&feedback);
        assert!(!prompt.contains("minimal description"));
    }

    #[test]
    fn system_prompt_mandates_output_sections() {
        for section in ["## Summary", "## Relevant Files", "## Analysis", "## Suggested Fix"] {
            assert!(SYSTEM_PROMPT.contains(section), "missing {}", section);
        }
    }
}

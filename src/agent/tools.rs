//! Tool catalog advertised to the model, and the dispatcher that executes
//! its calls against the sandbox.

use std::collections::HashMap;

use serde_json::json;

use crate::llm::{FunctionDefinition, ToolCall, ToolDefinition};
use crate::sandbox::SandboxFs;

/// The static tool catalog, advertised verbatim on every turn.
pub fn catalog() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: "list_files".to_string(),
                description: "List files and directories at the given path inside the \
                              project source tree. Directories are suffixed with '/'. \
                              Use '.' for the project root."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "Directory path relative to the project root, e.g. 'src' or '.'"
                        }
                    },
                    "required": ["path"]
                }),
            },
        },
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: "get_file_content".to_string(),
                description: "Read the contents of a file inside the project source tree. \
                              Files larger than 100KB cannot be read."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "File path relative to the project root, e.g. 'src/main.rs'"
                        }
                    },
                    "required": ["path"]
                }),
            },
        },
    ]
}

/// Execute one tool call. Always produces a string: failures come back as
/// `Error: ...` text the model can read and recover from.
pub async fn execute_tool(sandbox: &SandboxFs, call: &ToolCall) -> String {
    let args: HashMap<String, String> = match serde_json::from_str(&call.function.arguments) {
        Ok(args) => args,
        Err(e) => {
            tracing::warn!("tool {}: error parsing args: {}", call.function.name, e);
            return format!("Error parsing arguments: {}", e);
        }
    };

    let path = args.get("path").map(String::as_str).unwrap_or("");

    match call.function.name.as_str() {
        "list_files" => {
            tracing::info!("tool list_files: {}", path);
            sandbox.list_files(path).await
        }
        "get_file_content" => {
            tracing::info!("tool get_file_content: {}", path);
            sandbox.read_file(path).await
        }
        unknown => {
            tracing::warn!("unknown tool requested: {}", unknown);
            format!("Unknown tool: {}", unknown)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::FunctionCall;
    use tempfile::tempdir;

    fn call(name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }
    }

    #[test]
    fn catalog_advertises_both_tools_with_path_schema() {
        let tools = catalog();
        assert_eq!(tools.len(), 2);
        for tool in &tools {
            assert_eq!(tool.tool_type, "function");
            assert_eq!(tool.function.parameters["required"][0], "path");
            assert_eq!(tool.function.parameters["properties"]["path"]["type"], "string");
        }
        assert_eq!(tools[0].function.name, "list_files");
        assert_eq!(tools[1].function.name, "get_file_content");
    }

    #[tokio::test]
    async fn dispatches_by_function_name() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let sandbox = SandboxFs::new(dir.path());

        let listing = execute_tool(&sandbox, &call("list_files", r#"{"path": "."}"#)).await;
        assert_eq!(listing, "a.txt");

        let content = execute_tool(&sandbox, &call("get_file_content", r#"{"path": "a.txt"}"#)).await;
        assert_eq!(content, "hello");
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_arguments_become_strings() {
        let sandbox = SandboxFs::new(tempdir().unwrap().path());

        let unknown = execute_tool(&sandbox, &call("delete_everything", r#"{"path": "."}"#)).await;
        assert_eq!(unknown, "Unknown tool: delete_everything");

        let bad = execute_tool(&sandbox, &call("list_files", "not json")).await;
        assert!(bad.starts_with("Error parsing arguments:"));

        // Non-string argument values are a parse failure too, not a panic.
        let typed = execute_tool(&sandbox, &call("list_files", r#"{"path": 42}"#)).await;
        assert!(typed.starts_with("Error parsing arguments:"));
    }
}

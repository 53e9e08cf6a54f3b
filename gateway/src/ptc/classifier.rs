//! C5 — decides whether a request enters the PTC orchestration path and
//! partitions its tool list accordingly (SPEC_FULL.md §4.5).

use anthropic_protocol::messages::{Caller, CreateMessageRequest, Tool};

use crate::bedrock::beta_headers::PTC_BETA_HEADER;
use crate::config::Settings;

/// The three-way tool partition a PTC request is built from.
pub struct ToolPartition<'a> {
    pub code_execution_tools: Vec<&'a Tool>,
    pub ptc_callable_tools: Vec<&'a Tool>,
    pub direct_tools: Vec<&'a Tool>,
}

/// True iff PTC is enabled, the beta header opts in, and at least one
/// `code_execution_20250825` tool is present.
pub fn is_ptc_request(
    settings: &Settings,
    request: &CreateMessageRequest,
    beta_header: Option<&str>,
) -> bool {
    if !settings.enable_programmatic_tool_calling {
        return false;
    }

    let beta_present = beta_header
        .map(|raw| raw.split(',').map(str::trim).any(|v| v == PTC_BETA_HEADER))
        .unwrap_or(false);
    if !beta_present {
        return false;
    }

    request
        .tools
        .as_ref()
        .is_some_and(|tools| tools.iter().any(Tool::is_code_execution))
}

/// Splits a request's tool list into code-execution, PTC-callable, and
/// direct-only tools. A tool is PTC-callable when its `allowed_callers`
/// explicitly includes `code_execution_20250825`; everything else that
/// isn't a code-execution tool is direct (including tools silent on
/// `allowed_callers`, which default to `["direct"]`).
pub fn partition_tools(tools: &[Tool]) -> ToolPartition<'_> {
    let mut code_execution_tools = Vec::new();
    let mut ptc_callable_tools = Vec::new();
    let mut direct_tools = Vec::new();

    for tool in tools {
        if tool.is_code_execution() {
            code_execution_tools.push(tool);
            continue;
        }
        let allowed = tool.allowed_callers();
        if allowed.iter().any(|c| c == Caller::CODE_EXECUTION) {
            ptc_callable_tools.push(tool);
        } else {
            direct_tools.push(tool);
        }
    }

    ToolPartition {
        code_execution_tools,
        ptc_callable_tools,
        direct_tools,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anthropic_protocol::messages::{
        CodeExecutionTool, CustomTool, InputContent, InputMessage, InputSchema, Role,
    };

    fn settings_with_ptc() -> Settings {
        use clap::Parser;
        Settings::parse_from(["abgatewayd"])
    }

    fn request_with_tools(tools: Vec<Tool>) -> CreateMessageRequest {
        CreateMessageRequest {
            model: "claude-sonnet-4-5-20250929".to_string(),
            messages: vec![InputMessage {
                role: Role::User,
                content: InputContent::Text("hi".to_string()),
            }],
            max_tokens: 16,
            system: None,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            stream: Some(false),
            tools: Some(tools),
            tool_choice: None,
            thinking: None,
            metadata: None,
            service_tier: None,
            container: None,
        }
    }

    fn code_execution_tool() -> Tool {
        Tool::CodeExecution(CodeExecutionTool {
            tool_type: "code_execution_20250825".to_string(),
            name: "code_execution".to_string(),
        })
    }

    fn custom_tool(name: &str, allowed_callers: Option<Vec<String>>) -> Tool {
        Tool::Custom(CustomTool {
            name: name.to_string(),
            description: None,
            input_schema: InputSchema {
                schema_type: "object".to_string(),
                properties: None,
                required: None,
            },
            cache_control: None,
            allowed_callers,
        })
    }

    #[test]
    fn requires_beta_header_and_code_execution_tool() {
        let settings = settings_with_ptc();
        let request = request_with_tools(vec![code_execution_tool()]);
        assert!(is_ptc_request(&settings, &request, Some(PTC_BETA_HEADER)));
        assert!(!is_ptc_request(&settings, &request, None));
    }

    #[test]
    fn false_without_code_execution_tool() {
        let settings = settings_with_ptc();
        let request = request_with_tools(vec![custom_tool("get_weather", None)]);
        assert!(!is_ptc_request(&settings, &request, Some(PTC_BETA_HEADER)));
    }

    #[test]
    fn partitions_tools_by_allowed_callers() {
        let tools = vec![
            code_execution_tool(),
            custom_tool("sandbox_only", Some(vec!["code_execution_20250825".to_string()])),
            custom_tool("direct_only", None),
        ];
        let partition = partition_tools(&tools);
        assert_eq!(partition.code_execution_tools.len(), 1);
        assert_eq!(partition.ptc_callable_tools.len(), 1);
        assert_eq!(partition.direct_tools.len(), 1);
        assert_eq!(partition.ptc_callable_tools[0].name(), "sandbox_only");
    }
}

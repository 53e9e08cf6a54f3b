//! Synthesizes the `execute_code` tool definition and the PTC system
//! prompt appended to the backend request (SPEC_FULL.md §4.6.1).

use anthropic_protocol::messages::{CustomTool, InputSchema, Tool};

pub const EXECUTE_CODE_TOOL_NAME: &str = "execute_code";

/// Builds the synthesized `execute_code` tool. Its description enumerates
/// the PTC-callable tools available to sandboxed code and documents the
/// parallel-call convention the sandbox actually honors.
pub fn build_execute_code_tool(ptc_callable_tools: &[&Tool]) -> Tool {
    Tool::Custom(CustomTool {
        name: EXECUTE_CODE_TOOL_NAME.to_string(),
        description: Some(execute_code_description(ptc_callable_tools)),
        input_schema: InputSchema {
            schema_type: "object".to_string(),
            properties: Some(
                [(
                    "code".to_string(),
                    serde_json::json!({
                        "type": "string",
                        "description": "Python source to run in the sandbox for this turn.",
                    }),
                )]
                .into_iter()
                .collect(),
            ),
            required: Some(vec!["code".to_string()]),
        },
        cache_control: None,
        allowed_callers: None,
    })
}

fn execute_code_description(ptc_callable_tools: &[&Tool]) -> String {
    let mut out = String::from(
        "Execute Python code in a stateless sandbox. Each call runs in a fresh, isolated \
         environment; variables, imports, and function definitions do not persist between \
         calls — write each submission as a self-contained script.\n\n\
         The sandbox exposes the following async functions for calling tools from within \
         your code. To call several tools concurrently, batch them with \
         `await asyncio.gather(tool_a(...), tool_b(...))` rather than awaiting them one at a \
         time — the host executes a gathered batch as a single parallel fan-out.\n\n\
         Available tools:\n",
    );

    for tool in ptc_callable_tools {
        let Tool::Custom(custom) = tool else { continue };
        out.push_str(&format!("- {}", custom.name));
        if let Some(description) = &custom.description {
            out.push_str(&format!(": {description}"));
        }
        out.push_str(&format!(
            "\n  schema: {}\n",
            serde_json::to_string(&custom.input_schema).unwrap_or_default()
        ));
    }

    out
}

/// The system-prompt fragment describing the PTC contract, appended to any
/// client-supplied system prompt for PTC turns.
pub fn ptc_system_prompt_fragment() -> &'static str {
    "You have access to a code execution sandbox via the `execute_code` tool. Each invocation \
     of `execute_code` runs in a brand-new, isolated environment: nothing persists across \
     calls, so do not assume state from a previous `execute_code` call survives into the next. \
     Use code execution to orchestrate tool calls, combine their results, and perform \
     computation; prefer calling independent tools concurrently via `asyncio.gather` inside \
     your submitted code."
}

#[cfg(test)]
mod tests {
    use super::*;
    use anthropic_protocol::messages::InputSchema as Schema;

    fn sample_tool(name: &str) -> Tool {
        Tool::Custom(CustomTool {
            name: name.to_string(),
            description: Some("looks up the weather".to_string()),
            input_schema: Schema {
                schema_type: "object".to_string(),
                properties: None,
                required: None,
            },
            cache_control: None,
            allowed_callers: None,
        })
    }

    #[test]
    fn execute_code_tool_has_code_string_schema() {
        let tool = build_execute_code_tool(&[]);
        match tool {
            Tool::Custom(custom) => {
                assert_eq!(custom.name, EXECUTE_CODE_TOOL_NAME);
                assert!(custom.input_schema.required.unwrap().contains(&"code".to_string()));
            }
            _ => panic!("expected custom tool"),
        }
    }

    #[test]
    fn description_enumerates_callable_tools() {
        let tool = sample_tool("get_weather");
        let refs = vec![&tool];
        let description = execute_code_description(&refs);
        assert!(description.contains("get_weather"));
        assert!(description.contains("asyncio.gather"));
    }
}

//! C1 — Anthropic request -> Bedrock Converse or native-Anthropic request.
//!
//! Routing, model resolution, beta-header handling, and cache-point
//! projection follow SPEC_FULL.md §4.1. Grounded on
//! `original_source/app/services/bedrock_service.py`'s call sites into the
//! (unread) `anthropic_to_bedrock` converter and on `config.py`'s beta
//! tables (`gateway::bedrock::beta_headers`).

use std::collections::HashMap;

use anthropic_protocol::bedrock::{
    ConverseBytesSource, ConverseCachePoint, ConverseContentBlock, ConverseDocument, ConverseImage,
    ConverseInputSchema, ConverseMessage, ConverseReasoningContent, ConverseRequest,
    ConverseSystemBlock, ConverseTool, ConverseToolResult, ConverseToolResultContent,
    ConverseToolSpec, ConverseToolUse, InferenceConfig, ToolConfig, ANTHROPIC_BEDROCK_VERSION,
};
use anthropic_protocol::messages::{
    CacheControl, CreateMessageRequest, DocumentSource, ImageSource, InputContent,
    InputContentBlock, Role, ServiceTier, SystemContent, Tool, ToolChoice, ToolResultContent,
    ToolResultContentBlock,
};
use serde_json::{json, Value};

use super::beta_headers::expand_beta_header;
use crate::errors::BedrockError;

/// Which Bedrock entry point a prepared request must be sent through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendShape {
    Converse,
    Native,
}

/// The fully-prepared request, ready to hand to the invoker.
#[derive(Debug, Clone)]
pub enum PreparedRequest {
    Converse(Box<ConverseRequest>),
    Native(Value),
}

pub(crate) fn is_anthropic_family(model_id: &str) -> bool {
    let lower = model_id.to_lowercase();
    lower.contains("anthropic") || lower.contains("claude")
}

/// Resolve a client-supplied model name to the concrete backend model id.
pub fn resolve_model_id(requested: &str, mapping: &HashMap<String, String>) -> String {
    mapping
        .get(requested)
        .cloned()
        .unwrap_or_else(|| requested.to_string())
}

/// Build a backend-ready request, choosing Converse or native shape per the
/// routing rule in SPEC_FULL.md §4.1: the Anthropic family goes through the
/// native InvokeModel body (it needs Anthropic-specific fields Converse
/// cannot carry, e.g. PTC betas); every other model family goes through
/// Converse.
pub fn prepare_request(
    request: &CreateMessageRequest,
    resolved_model_id: &str,
    anthropic_beta_header: Option<&str>,
    cache_enabled: bool,
) -> Result<PreparedRequest, BedrockError> {
    let (expanded_beta, _requires_invoke_model) = match anthropic_beta_header {
        Some(raw) => expand_beta_header(raw, resolved_model_id),
        None => (Vec::new(), false),
    };

    if is_anthropic_family(resolved_model_id) {
        Ok(PreparedRequest::Native(to_native_request(
            request,
            resolved_model_id,
            &expanded_beta,
        )?))
    } else {
        Ok(PreparedRequest::Converse(Box::new(to_converse_request(
            request,
            resolved_model_id,
            &expanded_beta,
            cache_enabled,
        )?)))
    }
}

fn empty_converse_block() -> ConverseContentBlock {
    ConverseContentBlock {
        text: None,
        image: None,
        document: None,
        tool_use: None,
        tool_result: None,
        reasoning_content: None,
        cache_point: None,
    }
}

fn service_tier_str(tier: ServiceTier) -> Option<String> {
    serde_json::to_value(tier)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
}

fn converse_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto { .. } => json!({"auto": {}}),
        ToolChoice::Any { .. } => json!({"any": {}}),
        ToolChoice::Tool { name, .. } => json!({"tool": {"name": name}}),
        ToolChoice::None => json!({"none": {}}),
    }
}

// ============================================================================
// Converse shape
// ============================================================================

/// Builds the Converse-shaped request used for Bedrock's `count_tokens` API
/// (SPEC_FULL.md §4.4). The original implementation does this for Claude
/// models too — `count_tokens` always takes Converse input even though the
/// message itself is later dispatched through native InvokeModel — so this
/// reuses the same converter with a throwaway `max_tokens`, mirroring
/// `_count_tokens_sync`'s `MessageRequest(..., max_tokens=1)` stand-in.
pub(crate) fn build_count_tokens_request(
    request: &anthropic_protocol::messages::CountMessageTokensRequest,
    resolved_model_id: &str,
) -> Result<ConverseRequest, BedrockError> {
    let stand_in = CreateMessageRequest {
        model: request.model.clone(),
        messages: request.messages.clone(),
        max_tokens: 1,
        system: request.system.clone(),
        temperature: None,
        top_p: None,
        top_k: None,
        stop_sequences: None,
        stream: None,
        tools: request.tools.clone(),
        tool_choice: None,
        thinking: None,
        metadata: None,
        service_tier: None,
        container: None,
    };
    to_converse_request(&stand_in, resolved_model_id, &[], false)
}

fn to_converse_request(
    request: &CreateMessageRequest,
    resolved_model_id: &str,
    expanded_beta: &[String],
    cache_enabled: bool,
) -> Result<ConverseRequest, BedrockError> {
    let mut messages = Vec::with_capacity(request.messages.len());
    for message in &request.messages {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        let mut content = Vec::new();
        for block in message.content.blocks() {
            content.extend(convert_input_block(&block, cache_enabled)?);
        }
        if content.is_empty() {
            continue;
        }
        messages.push(ConverseMessage {
            role: role.to_string(),
            content,
        });
    }

    let system = request.system.as_ref().map(|system| match system {
        SystemContent::Text(text) => vec![ConverseSystemBlock {
            text: Some(text.clone()),
            cache_point: None,
        }],
        SystemContent::Blocks(blocks) => {
            let mut out = Vec::with_capacity(blocks.len());
            for block in blocks {
                out.push(ConverseSystemBlock {
                    text: Some(block.text.clone()),
                    cache_point: None,
                });
                if cache_enabled && block.cache_control.is_some() {
                    out.push(ConverseSystemBlock {
                        text: None,
                        cache_point: Some(ConverseCachePoint {
                            point_type: "default".to_string(),
                        }),
                    });
                }
            }
            out
        }
    });

    let tool_config = build_tool_config(request)?;

    let mut additional_fields = serde_json::Map::new();
    if let Some(top_k) = request.top_k {
        additional_fields.insert("top_k".to_string(), json!(top_k));
    }
    if let Some(thinking) = &request.thinking {
        additional_fields.insert(
            "thinking".to_string(),
            serde_json::to_value(thinking).unwrap_or(Value::Null),
        );
    }
    if !expanded_beta.is_empty() {
        additional_fields.insert("anthropic_beta".to_string(), json!(expanded_beta));
    }

    Ok(ConverseRequest {
        model_id: resolved_model_id.to_string(),
        messages,
        system,
        inference_config: Some(InferenceConfig {
            max_tokens: Some(request.max_tokens),
            temperature: request.temperature,
            top_p: request.top_p,
            stop_sequences: request.stop_sequences.clone(),
        }),
        tool_config,
        additional_model_request_fields: if additional_fields.is_empty() {
            None
        } else {
            Some(Value::Object(additional_fields))
        },
        service_tier: request.service_tier.and_then(service_tier_str),
    })
}

/// Converts one Anthropic input block into zero, one, or two Converse
/// blocks (a cache-control marker projects as a sibling `cachePoint` block
/// immediately following the content it applies to).
fn convert_input_block(
    block: &InputContentBlock,
    cache_enabled: bool,
) -> Result<Vec<ConverseContentBlock>, BedrockError> {
    let carries_cache_point =
        cache_enabled && block.cache_control() == Some(&CacheControl::Ephemeral);

    let converted = match block {
        InputContentBlock::Text(b) => Some(ConverseContentBlock::text(b.text.clone())),
        InputContentBlock::Image(b) => {
            let (format, bytes) = match &b.source {
                ImageSource::Base64 { media_type, data } => (
                    media_type.split('/').next_back().unwrap_or("png").to_string(),
                    data.clone(),
                ),
                ImageSource::Url { .. } => {
                    return Err(BedrockError::InvalidRequest(
                        "image URLs must be fetched and base64-encoded before reaching Bedrock"
                            .to_string(),
                    ))
                }
            };
            Some(ConverseContentBlock {
                image: Some(ConverseImage {
                    format,
                    source: ConverseBytesSource { bytes },
                }),
                ..empty_converse_block()
            })
        }
        InputContentBlock::Document(b) => {
            let (format, bytes) = match &b.source {
                DocumentSource::Base64 { media_type, data } => (
                    media_type.split('/').next_back().unwrap_or("pdf").to_string(),
                    data.clone(),
                ),
                DocumentSource::Text { data, .. } => ("txt".to_string(), data.clone()),
                DocumentSource::Url { .. } => {
                    return Err(BedrockError::InvalidRequest(
                        "document URLs must be fetched before reaching Bedrock".to_string(),
                    ))
                }
            };
            Some(ConverseContentBlock {
                document: Some(ConverseDocument {
                    format,
                    name: "document".to_string(),
                    source: ConverseBytesSource { bytes },
                }),
                ..empty_converse_block()
            })
        }
        InputContentBlock::ToolUse(b) => Some(ConverseContentBlock {
            tool_use: Some(ConverseToolUse {
                tool_use_id: b.id.clone(),
                name: b.name.clone(),
                input: b.input.clone(),
            }),
            ..empty_converse_block()
        }),
        InputContentBlock::ToolResult(b) => {
            let content = match &b.content {
                Some(ToolResultContent::Text(text)) => vec![ConverseToolResultContent {
                    text: Some(text.clone()),
                    json: None,
                }],
                Some(ToolResultContent::Blocks(blocks)) => blocks
                    .iter()
                    .filter_map(|block| match block {
                        ToolResultContentBlock::Text(t) => Some(ConverseToolResultContent {
                            text: Some(t.text.clone()),
                            json: None,
                        }),
                        ToolResultContentBlock::Image(_) => None,
                    })
                    .collect(),
                None => Vec::new(),
            };
            Some(ConverseContentBlock {
                tool_result: Some(ConverseToolResult {
                    tool_use_id: b.tool_use_id.clone(),
                    content,
                    status: b.is_error.and_then(|e| e.then(|| "error".to_string())),
                }),
                ..empty_converse_block()
            })
        }
        InputContentBlock::Thinking(b) => Some(ConverseContentBlock {
            reasoning_content: Some(ConverseReasoningContent {
                text: Some(b.thinking.clone()),
                signature: b.signature.clone(),
                redacted_content: None,
            }),
            ..empty_converse_block()
        }),
        InputContentBlock::RedactedThinking(b) => Some(ConverseContentBlock {
            reasoning_content: Some(ConverseReasoningContent {
                text: None,
                signature: None,
                redacted_content: Some(b.data.clone()),
            }),
            ..empty_converse_block()
        }),
        // Server-tool echoes and compaction markers never reach the
        // backend — filtered upstream of this converter by the PTC
        // request-preparation pass (SPEC_FULL.md §4.6.1, §9) or dropped
        // here as a defensive fallback for the non-PTC path.
        InputContentBlock::ServerToolUse(_)
        | InputContentBlock::ServerToolResult(_)
        | InputContentBlock::Compaction(_) => None,
    };

    let mut out = Vec::with_capacity(2);
    if let Some(block) = converted {
        out.push(block);
        if carries_cache_point {
            out.push(ConverseContentBlock::cache_point());
        }
    }
    Ok(out)
}

fn build_tool_config(request: &CreateMessageRequest) -> Result<Option<ToolConfig>, BedrockError> {
    let Some(tools) = &request.tools else {
        return Ok(None);
    };

    let mut specs = Vec::new();
    for tool in tools {
        // code_execution is a PTC server tool; it never reaches the
        // backend as a regular tool spec (SPEC_FULL.md §4.1, §4.6.1).
        let Tool::Custom(custom) = tool else {
            continue;
        };

        specs.push(ConverseTool {
            tool_spec: ConverseToolSpec {
                name: custom.name.clone(),
                description: custom.description.clone(),
                input_schema: ConverseInputSchema {
                    json: serde_json::to_value(&custom.input_schema).map_err(|e| {
                        BedrockError::InvalidRequest(format!("invalid tool schema: {e}"))
                    })?,
                },
            },
        });
    }

    if specs.is_empty() {
        return Ok(None);
    }

    let tool_choice = request.tool_choice.as_ref().map(converse_tool_choice);

    Ok(Some(ToolConfig {
        tools: specs,
        tool_choice,
    }))
}

// ============================================================================
// Native (InvokeModel) shape
// ============================================================================

fn to_native_request(
    request: &CreateMessageRequest,
    resolved_model_id: &str,
    expanded_beta: &[String],
) -> Result<Value, BedrockError> {
    let mut body = serde_json::to_value(strip_request_for_native(request))
        .map_err(|e| BedrockError::Internal(format!("failed to encode native request: {e}")))?;

    let object = body.as_object_mut().ok_or_else(|| {
        BedrockError::Internal("request did not encode as a JSON object".to_string())
    })?;

    object.insert(
        "anthropic_version".to_string(),
        json!(ANTHROPIC_BEDROCK_VERSION),
    );
    object.insert("model_id".to_string(), json!(resolved_model_id));
    object.remove("model");
    object.remove("stream");
    object.remove("service_tier");
    if let Some(tier) = request.service_tier.and_then(service_tier_str) {
        object.insert("service_tier".to_string(), json!(tier));
    }
    if !expanded_beta.is_empty() {
        object.insert("anthropic_beta".to_string(), json!(expanded_beta));
    }

    Ok(body)
}

/// A copy of the request with gateway-internal fields stripped (`caller`,
/// `container`) before re-serializing for the native InvokeModel body.
fn strip_request_for_native(request: &CreateMessageRequest) -> CreateMessageRequest {
    let mut cleaned = request.clone();
    cleaned.container = None;
    for message in &mut cleaned.messages {
        if let InputContent::Blocks(blocks) = &mut message.content {
            for block in blocks.iter_mut() {
                if let InputContentBlock::ToolUse(tool_use) = block {
                    tool_use.caller = None;
                }
            }
        }
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use anthropic_protocol::messages::InputMessage;

    fn base_request() -> CreateMessageRequest {
        CreateMessageRequest {
            model: "claude-sonnet-4-5-20250929".to_string(),
            messages: vec![InputMessage {
                role: Role::User,
                content: InputContent::Text("hello".to_string()),
            }],
            max_tokens: 16,
            system: None,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            stream: Some(false),
            tools: None,
            tool_choice: None,
            thinking: None,
            metadata: None,
            service_tier: None,
            container: None,
        }
    }

    #[test]
    fn claude_family_routes_to_native_shape() {
        let request = base_request();
        let prepared = prepare_request(
            &request,
            "us.anthropic.claude-sonnet-4-5-20250929-v1:0",
            None,
            true,
        )
        .unwrap();
        assert!(matches!(prepared, PreparedRequest::Native(_)));
    }

    #[test]
    fn non_claude_model_routes_to_converse_shape() {
        let request = base_request();
        let prepared =
            prepare_request(&request, "meta.llama3-70b-instruct-v1:0", None, true).unwrap();
        assert!(matches!(prepared, PreparedRequest::Converse(_)));
    }

    #[test]
    fn native_shape_has_fixed_anthropic_version() {
        let request = base_request();
        let prepared = prepare_request(
            &request,
            "us.anthropic.claude-sonnet-4-5-20250929-v1:0",
            None,
            true,
        )
        .unwrap();
        match prepared {
            PreparedRequest::Native(value) => {
                assert_eq!(value["anthropic_version"], ANTHROPIC_BEDROCK_VERSION);
                assert!(value.get("model").is_none());
            }
            _ => panic!("expected native shape"),
        }
    }

    #[test]
    fn caller_field_is_stripped_before_forwarding() {
        use anthropic_protocol::messages::{Caller, ToolUseBlock};
        let mut request = base_request();
        request.messages.push(InputMessage {
            role: Role::Assistant,
            content: InputContent::Blocks(vec![InputContentBlock::ToolUse(ToolUseBlock {
                id: "toolu_1".to_string(),
                name: "get_weather".to_string(),
                input: json!({}),
                cache_control: None,
                caller: Some(Caller::direct()),
            })]),
        });
        let prepared = prepare_request(
            &request,
            "us.anthropic.claude-sonnet-4-5-20250929-v1:0",
            None,
            true,
        )
        .unwrap();
        match prepared {
            PreparedRequest::Native(value) => {
                let messages = value["messages"].as_array().unwrap();
                let tool_use = &messages[1]["content"][0];
                assert!(tool_use.get("caller").is_none());
            }
            _ => panic!("expected native shape"),
        }
    }

    #[test]
    fn resolve_model_id_uses_mapping_when_present() {
        let mut mapping = HashMap::new();
        mapping.insert(
            "claude-sonnet-4-5-20250929".to_string(),
            "us.anthropic.claude-sonnet-4-5-20250929-v1:0".to_string(),
        );
        assert_eq!(
            resolve_model_id("claude-sonnet-4-5-20250929", &mapping),
            "us.anthropic.claude-sonnet-4-5-20250929-v1:0"
        );
        assert_eq!(resolve_model_id("unmapped-model", &mapping), "unmapped-model");
    }

    #[test]
    fn converse_cache_control_projects_sibling_cache_point_block() {
        use anthropic_protocol::messages::TextBlock;
        let block = InputContentBlock::Text(TextBlock {
            text: "cached system preamble".to_string(),
            cache_control: Some(CacheControl::Ephemeral),
        });
        let converted = convert_input_block(&block, true).unwrap();
        assert_eq!(converted.len(), 2);
        assert!(converted[1].cache_point.is_some());
    }

    #[test]
    fn converse_tool_config_drops_code_execution_tool() {
        use anthropic_protocol::messages::{CodeExecutionTool, CustomTool, InputSchema};
        let mut request = base_request();
        request.tools = Some(vec![
            Tool::CodeExecution(CodeExecutionTool {
                tool_type: "code_execution_20250825".to_string(),
                name: "code_execution".to_string(),
            }),
            Tool::Custom(CustomTool {
                name: "get_weather".to_string(),
                description: None,
                input_schema: InputSchema {
                    schema_type: "object".to_string(),
                    properties: None,
                    required: None,
                },
                cache_control: None,
                allowed_callers: None,
            }),
        ]);
        let config = build_tool_config(&request).unwrap().unwrap();
        assert_eq!(config.tools.len(), 1);
        assert_eq!(config.tools[0].tool_spec.name, "get_weather");
    }
}

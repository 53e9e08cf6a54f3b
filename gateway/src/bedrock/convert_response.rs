//! C2 — Bedrock Converse/native responses -> Anthropic Messages shapes.
//!
//! Both shapes are non-streaming: the invoker always buffers a complete
//! backend response, and SSE (when the client asked for it) is synthesized
//! from the resulting [`Message`] by `routers::anthropic::sse` — there is
//! exactly one SSE-synthesis code path (SPEC_FULL.md §4.2, §4.6.6).

use anthropic_protocol::bedrock::{map_stop_reason, ConverseUsage};
use anthropic_protocol::messages::{
    ContentBlock, Message, RedactedThinkingBlock, Role, TextBlock, ThinkingBlock, ToolUseBlock, Usage,
};
use serde_json::Value;

use crate::errors::BedrockError;

/// Builds the non-streaming `Message` response from a native (InvokeModel)
/// Anthropic-shaped JSON body. The native body already matches our wire
/// shape almost field-for-field; this re-parses it into our typed
/// [`Message`] so downstream code (PTC) sees one consistent type regardless
/// of which Bedrock entry point served the turn.
pub fn native_response_to_message(body: &Value) -> Result<Message, BedrockError> {
    serde_json::from_value(body.clone())
        .map_err(|e| BedrockError::Internal(format!("failed to parse native response: {e}")))
}

/// Builds the non-streaming `Message` response from a Converse API result.
pub fn converse_response_to_message(
    message_id: &str,
    model: &str,
    role_content: &[anthropic_protocol::bedrock::ConverseContentBlock],
    stop_reason: &str,
    usage: &ConverseUsage,
) -> Message {
    let content = role_content
        .iter()
        .filter_map(converse_block_to_content_block)
        .collect();

    Message {
        id: message_id.to_string(),
        message_type: "message".to_string(),
        role: Role::Assistant,
        content,
        model: model.to_string(),
        stop_reason: Some(map_stop_reason(stop_reason)),
        stop_sequence: None,
        usage: Usage {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_creation_input_tokens: usage.cache_write_input_tokens,
            cache_read_input_tokens: usage.cache_read_input_tokens,
            service_tier: None,
        },
        container: None,
    }
}

fn converse_block_to_content_block(
    block: &anthropic_protocol::bedrock::ConverseContentBlock,
) -> Option<ContentBlock> {
    if let Some(text) = &block.text {
        return Some(ContentBlock::Text(TextBlock {
            text: text.clone(),
            cache_control: None,
        }));
    }
    if let Some(tool_use) = &block.tool_use {
        return Some(ContentBlock::ToolUse(ToolUseBlock {
            id: tool_use.tool_use_id.clone(),
            name: tool_use.name.clone(),
            input: tool_use.input.clone(),
            cache_control: None,
            caller: None,
        }));
    }
    if let Some(reasoning) = &block.reasoning_content {
        return if let Some(redacted) = &reasoning.redacted_content {
            Some(ContentBlock::RedactedThinking(RedactedThinkingBlock {
                data: redacted.clone(),
            }))
        } else {
            Some(ContentBlock::Thinking(ThinkingBlock {
                thinking: reasoning.text.clone().unwrap_or_default(),
                signature: reasoning.signature.clone(),
            }))
        };
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use anthropic_protocol::bedrock::ConverseContentBlock;

    #[test]
    fn native_response_round_trips_through_message() {
        let body = serde_json::json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": "hi"}],
            "model": "us.anthropic.claude-sonnet-4-5-20250929-v1:0",
            "stop_reason": "end_turn",
            "stop_sequence": null,
            "usage": {"input_tokens": 3, "output_tokens": 1}
        });
        let message = native_response_to_message(&body).unwrap();
        assert_eq!(message.id, "msg_1");
        assert_eq!(message.content.len(), 1);
    }

    #[test]
    fn converse_response_maps_text_and_tool_use_blocks() {
        let blocks = vec![
            ConverseContentBlock::text("hello"),
            {
                let mut block = ConverseContentBlock::text("");
                block.text = None;
                block.tool_use = Some(anthropic_protocol::bedrock::ConverseToolUse {
                    tool_use_id: "toolu_1".to_string(),
                    name: "get_weather".to_string(),
                    input: serde_json::json!({"city": "nyc"}),
                });
                block
            },
        ];
        let usage = ConverseUsage {
            input_tokens: 12,
            output_tokens: 4,
            cache_read_input_tokens: None,
            cache_write_input_tokens: None,
        };
        let message = converse_response_to_message(
            "msg_2",
            "meta.llama3-70b-instruct-v1:0",
            &blocks,
            "tool_use",
            &usage,
        );
        assert_eq!(message.content.len(), 2);
        assert_eq!(message.stop_reason, Some(anthropic_protocol::messages::StopReason::ToolUse));
        assert_eq!(message.usage.input_tokens, 12);
    }
}

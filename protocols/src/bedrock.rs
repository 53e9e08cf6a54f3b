//! Bedrock wire shapes: the Converse API's unified cross-model request/response,
//! and the native per-model ("InvokeModel") body used for the Anthropic family.
//!
//! These are intentionally looser than [`crate::messages`] — Bedrock's JSON is
//! camelCase, optional fields vary by model family, and `additionalModelRequestFields`
//! is an open bag the converter writes into directly as a `serde_json::Value`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

/// The fixed `anthropic_version` value Bedrock requires on native-shape
/// InvokeModel bodies for the Anthropic family.
pub const ANTHROPIC_BEDROCK_VERSION: &str = "bedrock-2023-05-31";

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseRequest {
    pub model_id: String,
    pub messages: Vec<ConverseMessage>,
    pub system: Option<Vec<ConverseSystemBlock>>,
    pub inference_config: Option<InferenceConfig>,
    pub tool_config: Option<ToolConfig>,
    pub additional_model_request_fields: Option<Value>,
    pub service_tier: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverseMessage {
    pub role: String,
    pub content: Vec<ConverseContentBlock>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseContentBlock {
    pub text: Option<String>,
    pub image: Option<ConverseImage>,
    pub document: Option<ConverseDocument>,
    pub tool_use: Option<ConverseToolUse>,
    pub tool_result: Option<ConverseToolResult>,
    pub reasoning_content: Option<ConverseReasoningContent>,
    pub cache_point: Option<ConverseCachePoint>,
}

impl ConverseContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            image: None,
            document: None,
            tool_use: None,
            tool_result: None,
            reasoning_content: None,
            cache_point: None,
        }
    }

    pub fn cache_point() -> Self {
        Self {
            text: None,
            image: None,
            document: None,
            tool_use: None,
            tool_result: None,
            reasoning_content: None,
            cache_point: Some(ConverseCachePoint {
                point_type: "default".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverseCachePoint {
    #[serde(rename = "type")]
    pub point_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverseImage {
    pub format: String,
    pub source: ConverseBytesSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverseDocument {
    pub format: String,
    pub name: String,
    pub source: ConverseBytesSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverseBytesSource {
    pub bytes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseToolUse {
    pub tool_use_id: String,
    pub name: String,
    pub input: Value,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseToolResult {
    pub tool_use_id: String,
    pub content: Vec<ConverseToolResultContent>,
    pub status: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverseToolResultContent {
    pub text: Option<String>,
    pub json: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseReasoningContent {
    pub text: Option<String>,
    pub signature: Option<String>,
    pub redacted_content: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseSystemBlock {
    pub text: Option<String>,
    pub cache_point: Option<ConverseCachePoint>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceConfig {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stop_sequences: Option<Vec<String>>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    pub tools: Vec<ConverseTool>,
    pub tool_choice: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseTool {
    pub tool_spec: ConverseToolSpec,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: ConverseInputSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverseInputSchema {
    pub json: Value,
}

// ============================================================================
// Streaming events (Converse API `ConverseStreamOutput` union, as JSON)
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseStreamEvent {
    #[serde(default)]
    pub message_start: Option<MessageStartEvent>,
    #[serde(default)]
    pub content_block_start: Option<ContentBlockStartEvent>,
    #[serde(default)]
    pub content_block_delta: Option<ContentBlockDeltaEvent>,
    #[serde(default)]
    pub content_block_stop: Option<ContentBlockStopEvent>,
    #[serde(default)]
    pub message_stop: Option<MessageStopEvent>,
    #[serde(default)]
    pub metadata: Option<ConverseMetadataEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageStartEvent {
    pub role: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlockStartEvent {
    pub content_block_index: u32,
    #[serde(default)]
    pub start: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlockDeltaEvent {
    pub content_block_index: u32,
    pub delta: ConverseDelta,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConverseDelta {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub tool_use: Option<ConverseToolUseDelta>,
    #[serde(default)]
    pub reasoning_content: Option<ConverseReasoningDelta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConverseToolUseDelta {
    #[serde(default)]
    pub input: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConverseReasoningDelta {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlockStopEvent {
    pub content_block_index: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageStopEvent {
    pub stop_reason: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConverseMetadataEvent {
    #[serde(default)]
    pub usage: Option<ConverseUsage>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(default)]
    pub cache_read_input_tokens: Option<u32>,
    #[serde(default)]
    pub cache_write_input_tokens: Option<u32>,
}

/// Maps a Bedrock Converse `stopReason` value to the Anthropic taxonomy.
pub fn map_stop_reason(bedrock_reason: &str) -> crate::messages::StopReason {
    use crate::messages::StopReason;
    match bedrock_reason {
        "end_turn" => StopReason::EndTurn,
        "max_tokens" => StopReason::MaxTokens,
        "stop_sequence" => StopReason::StopSequence,
        "tool_use" => StopReason::ToolUse,
        "pause_turn" => StopReason::PauseTurn,
        "content_filtered" => StopReason::Refusal,
        _ => StopReason::EndTurn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_stop_reason_known_values() {
        assert_eq!(
            map_stop_reason("tool_use"),
            crate::messages::StopReason::ToolUse
        );
        assert_eq!(
            map_stop_reason("max_tokens"),
            crate::messages::StopReason::MaxTokens
        );
    }

    #[test]
    fn map_stop_reason_unknown_defaults_to_end_turn() {
        assert_eq!(
            map_stop_reason("something_new"),
            crate::messages::StopReason::EndTurn
        );
    }

    #[test]
    fn cache_point_block_serializes_camel_case_without_other_fields() {
        let block = ConverseContentBlock::cache_point();
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value.as_object().unwrap().len(), 1);
        assert_eq!(value["cachePoint"]["type"], "default");
    }

    #[test]
    fn tool_use_block_uses_camel_case_tool_use_id() {
        let mut block = ConverseContentBlock::text("");
        block.text = None;
        block.tool_use = Some(ConverseToolUse {
            tool_use_id: "toolu_1".to_string(),
            name: "get_weather".to_string(),
            input: serde_json::json!({}),
        });
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["toolUse"]["toolUseId"], "toolu_1");
    }
}

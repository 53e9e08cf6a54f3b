//! Anthropic Messages API wire types.
//!
//! These mirror the public Messages API JSON shapes closely enough to
//! deserialize/serialize client traffic without loss, plus two additions
//! that are internal to this gateway and never forwarded upstream: the
//! `caller` field on [`ToolUseBlock`] and the `container` field on
//! [`Message`]/[`CreateMessageRequest`].

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use validator::Validate;

use crate::validated::Normalizable;

// ============================================================================
// Request
// ============================================================================

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateMessageRequest {
    pub model: String,

    #[validate(length(min = 1))]
    pub messages: Vec<InputMessage>,

    #[validate(range(min = 1))]
    pub max_tokens: u32,

    #[serde(default)]
    pub system: Option<SystemContent>,

    #[serde(default)]
    #[validate(range(min = 0.0, max = 1.0))]
    pub temperature: Option<f32>,

    #[serde(default)]
    #[validate(range(min = 0.0, max = 1.0))]
    pub top_p: Option<f32>,

    #[serde(default)]
    pub top_k: Option<u32>,

    #[serde(default)]
    pub stop_sequences: Option<Vec<String>>,

    #[serde(default)]
    pub stream: Option<bool>,

    #[serde(default)]
    pub tools: Option<Vec<Tool>>,

    #[serde(default)]
    pub tool_choice: Option<ToolChoice>,

    #[serde(default)]
    pub thinking: Option<ThinkingConfig>,

    #[serde(default)]
    pub metadata: Option<Metadata>,

    #[serde(default)]
    pub service_tier: Option<ServiceTier>,

    /// Container id echoed back from a prior PTC turn. Not part of the
    /// public Messages API body; populated by the router from the
    /// configured container-id header before validation runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerRef>,
}

impl Normalizable for CreateMessageRequest {
    fn normalize(&mut self) {
        if self.stream.is_none() {
            self.stream = Some(false);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRef {
    pub id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceTier {
    Default,
    Flex,
    Priority,
    Reserved,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemContent {
    Text(String),
    Blocks(Vec<TextBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputMessage {
    pub role: Role,
    pub content: InputContent,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputContent {
    Text(String),
    Blocks(Vec<InputContentBlock>),
}

impl InputContent {
    pub fn blocks(&self) -> Vec<InputContentBlock> {
        match self {
            InputContent::Text(text) => vec![InputContentBlock::Text(TextBlock {
                text: text.clone(),
                cache_control: None,
            })],
            InputContent::Blocks(blocks) => blocks.clone(),
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputContentBlock {
    Text(TextBlock),
    Image(ImageBlock),
    Document(DocumentBlock),
    ToolUse(ToolUseBlock),
    ToolResult(ToolResultBlock),
    Thinking(ThinkingBlock),
    RedactedThinking(RedactedThinkingBlock),
    ServerToolUse(ServerToolUseBlock),
    ServerToolResult(ServerToolResultBlock),
    Compaction(CompactionBlock),
}

impl InputContentBlock {
    pub fn cache_control(&self) -> Option<&CacheControl> {
        match self {
            InputContentBlock::Text(b) => b.cache_control.as_ref(),
            InputContentBlock::Image(b) => b.cache_control.as_ref(),
            InputContentBlock::Document(b) => b.cache_control.as_ref(),
            InputContentBlock::ToolUse(b) => b.cache_control.as_ref(),
            InputContentBlock::ToolResult(b) => b.cache_control.as_ref(),
            _ => None,
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
    #[serde(default)]
    pub cache_control: Option<CacheControl>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageBlock {
    pub source: ImageSource,
    #[serde(default)]
    pub cache_control: Option<CacheControl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentBlock {
    pub source: DocumentSource,
    #[serde(default)]
    pub cache_control: Option<CacheControl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocumentSource {
    Base64 { media_type: String, data: String },
    Text { media_type: String, data: String },
    Url { url: String },
}

/// Identifies who issued a `tool_use` block: the model itself, or code
/// running inside a PTC sandbox. Internal to this gateway — stripped
/// before any request reaches the backend (invariant I-CALLER in
/// SPEC_FULL.md §3/§8).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Caller {
    #[serde(rename = "type")]
    pub caller_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
}

impl Caller {
    pub const DIRECT: &'static str = "direct";
    pub const CODE_EXECUTION: &'static str = "code_execution_20250825";

    pub fn direct() -> Self {
        Self {
            caller_type: Self::DIRECT.to_string(),
            tool_id: None,
        }
    }

    pub fn code_execution(tool_id: impl Into<String>) -> Self {
        Self {
            caller_type: Self::CODE_EXECUTION.to_string(),
            tool_id: Some(tool_id.into()),
        }
    }

    pub fn is_direct(&self) -> bool {
        self.caller_type == Self::DIRECT
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseBlock {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
    #[serde(default)]
    pub cache_control: Option<CacheControl>,
    /// Gateway-internal; never sent upstream. See [`Caller`].
    #[serde(default)]
    pub caller: Option<Caller>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    #[serde(default)]
    pub content: Option<ToolResultContent>,
    #[serde(default)]
    pub is_error: Option<bool>,
    #[serde(default)]
    pub cache_control: Option<CacheControl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<ToolResultContentBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultContentBlock {
    Text(TextBlock),
    Image(ImageBlock),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingBlock {
    pub thinking: String,
    #[serde(default)]
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactedThinkingBlock {
    pub data: String,
}

/// A server-side tool invocation echoed back by the backend (e.g. a PTC
/// `execute_code` call). Filtered out of outbound requests entirely —
/// the backend never needs to see its own prior server-tool calls
/// replayed (SPEC_FULL.md §4.6.1, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerToolUseBlock {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerToolResultBlock {
    pub tool_use_id: String,
    pub content: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionBlock {
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheControl {
    Ephemeral,
}

// ============================================================================
// Tools
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Tool {
    CodeExecution(CodeExecutionTool),
    Custom(CustomTool),
}

impl Tool {
    pub fn name(&self) -> &str {
        match self {
            Tool::CodeExecution(_) => "code_execution",
            Tool::Custom(t) => &t.name,
        }
    }

    pub fn allowed_callers(&self) -> Vec<String> {
        match self {
            Tool::CodeExecution(_) => Vec::new(),
            Tool::Custom(t) => t
                .allowed_callers
                .clone()
                .unwrap_or_else(|| vec![Caller::DIRECT.to_string()]),
        }
    }

    pub fn is_code_execution(&self) -> bool {
        matches!(self, Tool::CodeExecution(_))
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeExecutionTool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub name: String,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub input_schema: InputSchema,
    #[serde(default)]
    pub cache_control: Option<CacheControl>,
    /// Subset of `{"direct", "code_execution_20250825"}`; absent means
    /// `["direct"]` (SPEC_FULL.md §3).
    #[serde(default)]
    pub allowed_callers: Option<Vec<String>>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(default)]
    pub properties: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub required: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    Auto {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        disable_parallel_tool_use: Option<bool>,
    },
    Any {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        disable_parallel_tool_use: Option<bool>,
    },
    Tool {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        disable_parallel_tool_use: Option<bool>,
    },
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThinkingConfig {
    Enabled { budget_tokens: u32 },
    Disabled,
}

// ============================================================================
// Response
// ============================================================================

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub role: Role,
    pub content: Vec<ContentBlock>,
    pub model: String,
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
    pub usage: Usage,
    #[serde(default)]
    pub container: Option<ContainerInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub expires_at: String,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text(TextBlock),
    ToolUse(ToolUseBlock),
    Thinking(ThinkingBlock),
    RedactedThinking(RedactedThinkingBlock),
    ServerToolUse(ServerToolUseBlock),
    ServerToolResult(ServerToolResultBlock),
}

impl ContentBlock {
    pub fn as_tool_use(&self) -> Option<&ToolUseBlock> {
        match self {
            ContentBlock::ToolUse(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_tool_use_mut(&mut self) -> Option<&mut ToolUseBlock> {
        match self {
            ContentBlock::ToolUse(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_thinking(&self) -> bool {
        matches!(self, ContentBlock::Thinking(_) | ContentBlock::RedactedThinking(_))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
    PauseTurn,
    Refusal,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(default)]
    pub cache_creation_input_tokens: Option<u32>,
    #[serde(default)]
    pub cache_read_input_tokens: Option<u32>,
    #[serde(default)]
    pub service_tier: Option<ServiceTier>,
}

// ============================================================================
// Streaming
// ============================================================================

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageStreamEvent {
    MessageStart {
        message: Message,
    },
    ContentBlockStart {
        index: u32,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: ContentBlockDelta,
    },
    ContentBlockStop {
        index: u32,
    },
    MessageDelta {
        delta: MessageDelta,
        usage: MessageDeltaUsage,
    },
    MessageStop,
    Error {
        error: ApiError,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageDelta {
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageDeltaUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "type")]
    pub response_type: String,
    pub error: ApiError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApiError {
    InvalidRequestError { message: String },
    AuthenticationError { message: String },
    PermissionError { message: String },
    NotFoundError { message: String },
    RateLimitError { message: String },
    ApiError { message: String },
    OverloadedError { message: String },
}

impl ApiError {
    pub fn message(&self) -> &str {
        match self {
            ApiError::InvalidRequestError { message }
            | ApiError::AuthenticationError { message }
            | ApiError::PermissionError { message }
            | ApiError::NotFoundError { message }
            | ApiError::RateLimitError { message }
            | ApiError::ApiError { message }
            | ApiError::OverloadedError { message } => message,
        }
    }
}

// ============================================================================
// Token counting
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountMessageTokensRequest {
    pub model: String,
    pub messages: Vec<InputMessage>,
    #[serde(default)]
    pub system: Option<SystemContent>,
    #[serde(default)]
    pub tools: Option<Vec<Tool>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountMessageTokensResponse {
    pub input_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_text_only_message() {
        let msg: InputMessage =
            serde_json::from_str(r#"{"role":"user","content":"hi"}"#).unwrap();
        assert_eq!(msg.role, Role::User);
        assert!(matches!(msg.content, InputContent::Text(_)));
    }

    #[test]
    fn deserializes_block_content_with_tool_use() {
        let msg: InputMessage = serde_json::from_str(
            r#"{"role":"assistant","content":[{"type":"tool_use","id":"toolu_1","name":"get_weather","input":{}}]}"#,
        )
        .unwrap();
        let blocks = msg.content.blocks();
        assert_eq!(blocks.len(), 1);
        match &blocks[0] {
            InputContentBlock::ToolUse(b) => {
                assert_eq!(b.name, "get_weather");
                assert!(b.caller.is_none());
            }
            _ => panic!("expected tool_use"),
        }
    }

    #[test]
    fn caller_field_round_trips_but_is_optional_on_input() {
        let block: InputContentBlock = serde_json::from_str(
            r#"{"type":"tool_use","id":"t1","name":"x","input":{},"caller":{"type":"code_execution_20250825","tool_id":"srvtoolu_abc"}}"#,
        )
        .unwrap();
        match block {
            InputContentBlock::ToolUse(b) => {
                let caller = b.caller.unwrap();
                assert!(!caller.is_direct());
                assert_eq!(caller.tool_id.as_deref(), Some("srvtoolu_abc"));
            }
            _ => panic!("expected tool_use"),
        }
    }

    #[test]
    fn stop_reason_serializes_snake_case() {
        let json = serde_json::to_string(&StopReason::ToolUse).unwrap();
        assert_eq!(json, r#""tool_use""#);
    }

    #[test]
    fn message_stream_event_tags_correctly() {
        let event = MessageStreamEvent::ContentBlockStop { index: 2 };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "content_block_stop");
        assert_eq!(value["index"], 2);
    }
}

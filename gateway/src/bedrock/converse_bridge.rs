//! Bridges our internal [`ConverseRequest`]/response shapes to the AWS SDK's
//! typed `converse` builder surface, for every non-Anthropic model family
//! (SPEC_FULL.md §4.1). The Anthropic family never reaches this module — it
//! goes through the native InvokeModel body in [`super::invoker`] instead.

use std::time::Duration;

use aws_sdk_bedrockruntime::primitives::Blob;
use aws_sdk_bedrockruntime::types as sdk;
use aws_sdk_bedrockruntime::Client as BedrockClient;
use aws_smithy_types::{Document, Number as SmithyNumber};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::{Map, Value};
use uuid::Uuid;

use anthropic_protocol::bedrock::{
    ConverseContentBlock, ConverseMessage, ConverseRequest, ConverseSystemBlock, ConverseUsage,
};
use anthropic_protocol::messages::Message;

use crate::errors::BedrockError;

use super::convert_response::converse_response_to_message;

/// Dispatches one non-streaming Converse request and converts the result
/// back into our [`Message`] shape.
pub async fn dispatch(
    client: &BedrockClient,
    request: &ConverseRequest,
    timeout: Duration,
) -> Result<Message, BedrockError> {
    let mut call = client.converse().model_id(request.model_id.clone());
    for message in &request.messages {
        call = call.messages(message_to_sdk(message)?);
    }
    if let Some(system) = &request.system {
        for block in system {
            call = call.system(system_block_to_sdk(block));
        }
    }
    if let Some(inference) = &request.inference_config {
        call = call.inference_config(
            sdk::InferenceConfiguration::builder()
                .set_max_tokens(inference.max_tokens.map(|v| v as i32))
                .set_temperature(inference.temperature)
                .set_top_p(inference.top_p)
                .set_stop_sequences(inference.stop_sequences.clone())
                .build(),
        );
    }
    if let Some(tool_config) = &request.tool_config {
        let mut builder = sdk::ToolConfiguration::builder();
        for tool in &tool_config.tools {
            builder = builder.tools(sdk::Tool::ToolSpec(
                sdk::ToolSpecification::builder()
                    .name(tool.tool_spec.name.clone())
                    .set_description(tool.tool_spec.description.clone())
                    .input_schema(sdk::ToolInputSchema::Json(json_to_document(
                        &tool.tool_spec.input_schema.json,
                    )))
                    .build()
                    .map_err(|e| BedrockError::Internal(format!("invalid tool spec: {e}")))?,
            ));
        }
        if let Some(choice) = &tool_config.tool_choice {
            builder = builder.tool_choice(tool_choice_to_sdk(choice)?);
        }
        call = call.tool_config(
            builder
                .build()
                .map_err(|e| BedrockError::Internal(format!("invalid tool config: {e}")))?,
        );
    }
    if let Some(fields) = &request.additional_model_request_fields {
        call = call.additional_model_request_fields(json_to_document(fields));
    }
    if let Some(tier) = &request.service_tier {
        call = call.service_tier(tier.as_str());
    }

    let output = tokio::time::timeout(timeout, call.send())
        .await
        .map_err(|_| BedrockError::Timeout)?
        .map_err(|e| BedrockError::ClientError(e.to_string()))?;

    output_to_message(&request.model_id, output)
}

/// Calls Bedrock's `count_tokens` API with a Converse-shaped input — the
/// primary token-counting path for Anthropic-family models (SPEC_FULL.md
/// §4.4). Returns `None` when the backend itself reports zero input tokens,
/// signalling the caller to fall back to the estimator.
pub async fn count_tokens(
    client: &BedrockClient,
    request: &ConverseRequest,
    timeout: Duration,
) -> Result<Option<u32>, BedrockError> {
    let mut messages = Vec::with_capacity(request.messages.len());
    for message in &request.messages {
        messages.push(message_to_sdk(message)?);
    }

    let mut converse_input = sdk::ConverseTokensRequest::builder().set_messages(Some(messages));
    if let Some(system) = &request.system {
        converse_input =
            converse_input.set_system(Some(system.iter().map(system_block_to_sdk).collect()));
    }
    if let Some(tool_config) = &request.tool_config {
        let mut builder = sdk::ToolConfiguration::builder();
        for tool in &tool_config.tools {
            builder = builder.tools(sdk::Tool::ToolSpec(
                sdk::ToolSpecification::builder()
                    .name(tool.tool_spec.name.clone())
                    .set_description(tool.tool_spec.description.clone())
                    .input_schema(sdk::ToolInputSchema::Json(json_to_document(
                        &tool.tool_spec.input_schema.json,
                    )))
                    .build()
                    .map_err(|e| BedrockError::Internal(format!("invalid tool spec: {e}")))?,
            ));
        }
        converse_input = converse_input.set_tool_config(Some(
            builder
                .build()
                .map_err(|e| BedrockError::Internal(format!("invalid tool config: {e}")))?,
        ));
    }

    let input = sdk::CountTokensInput::Converse(
        converse_input
            .build()
            .map_err(|e| BedrockError::Internal(format!("invalid count_tokens input: {e}")))?,
    );

    let output = tokio::time::timeout(
        timeout,
        client
            .count_tokens()
            .model_id(request.model_id.clone())
            .input(input)
            .send(),
    )
    .await
    .map_err(|_| BedrockError::Timeout)?
    .map_err(|e| BedrockError::ClientError(e.to_string()))?;

    let tokens = output.input_tokens.max(0) as u32;
    Ok(if tokens > 0 { Some(tokens) } else { None })
}

fn output_to_message(
    model_id: &str,
    output: sdk::ConverseOutput,
) -> Result<Message, BedrockError> {
    let role_content = match output.output {
        Some(sdk::ConverseOutputType::Message(message)) => {
            message.content.iter().map(content_block_from_sdk).collect::<Vec<_>>()
        }
        _ => {
            return Err(BedrockError::Internal(
                "converse response carried no message output".to_string(),
            ))
        }
    };

    let usage = output.usage.as_ref().map(usage_from_sdk).unwrap_or_default();
    let message_id = format!("msg_{}", Uuid::new_v4().simple());

    Ok(converse_response_to_message(
        &message_id,
        model_id,
        &role_content,
        output.stop_reason.as_str(),
        &usage,
    ))
}

fn usage_from_sdk(usage: &sdk::TokenUsage) -> ConverseUsage {
    ConverseUsage {
        input_tokens: usage.input_tokens.max(0) as u32,
        output_tokens: usage.output_tokens.max(0) as u32,
        cache_read_input_tokens: usage.cache_read_input_tokens.map(|v| v.max(0) as u32),
        cache_write_input_tokens: usage.cache_write_input_tokens.map(|v| v.max(0) as u32),
    }
}

fn message_to_sdk(message: &ConverseMessage) -> Result<sdk::Message, BedrockError> {
    let role = match message.role.as_str() {
        "user" => sdk::ConversationRole::User,
        "assistant" => sdk::ConversationRole::Assistant,
        other => {
            return Err(BedrockError::Internal(format!(
                "unknown converse message role '{other}'"
            )))
        }
    };
    let mut builder = sdk::Message::builder().role(role);
    for block in &message.content {
        if let Some(sdk_block) = content_block_to_sdk(block)? {
            builder = builder.content(sdk_block);
        }
    }
    builder
        .build()
        .map_err(|e| BedrockError::Internal(format!("invalid converse message: {e}")))
}

fn content_block_to_sdk(
    block: &ConverseContentBlock,
) -> Result<Option<sdk::ContentBlock>, BedrockError> {
    if let Some(text) = &block.text {
        return Ok(Some(sdk::ContentBlock::Text(text.clone())));
    }
    if let Some(image) = &block.image {
        let bytes = decode_bytes(&image.source.bytes)?;
        let built = sdk::ImageBlock::builder()
            .format(sdk::ImageFormat::from(image.format.as_str()))
            .source(sdk::ImageSource::Bytes(Blob::new(bytes)))
            .build()
            .map_err(|e| BedrockError::Internal(format!("invalid converse image block: {e}")))?;
        return Ok(Some(sdk::ContentBlock::Image(built)));
    }
    if let Some(document) = &block.document {
        let bytes = decode_bytes(&document.source.bytes)?;
        let built = sdk::DocumentBlock::builder()
            .format(sdk::DocumentFormat::from(document.format.as_str()))
            .name(document.name.clone())
            .source(sdk::DocumentSource::Bytes(Blob::new(bytes)))
            .build()
            .map_err(|e| BedrockError::Internal(format!("invalid converse document block: {e}")))?;
        return Ok(Some(sdk::ContentBlock::Document(built)));
    }
    if let Some(tool_use) = &block.tool_use {
        let built = sdk::ToolUseBlock::builder()
            .tool_use_id(tool_use.tool_use_id.clone())
            .name(tool_use.name.clone())
            .input(json_to_document(&tool_use.input))
            .build()
            .map_err(|e| BedrockError::Internal(format!("invalid converse tool_use block: {e}")))?;
        return Ok(Some(sdk::ContentBlock::ToolUse(built)));
    }
    if let Some(tool_result) = &block.tool_result {
        let mut builder = sdk::ToolResultBlock::builder().tool_use_id(tool_result.tool_use_id.clone());
        for content in &tool_result.content {
            if let Some(text) = &content.text {
                builder = builder.content(sdk::ToolResultContentBlock::Text(text.clone()));
            } else if let Some(json) = &content.json {
                builder = builder.content(sdk::ToolResultContentBlock::Json(json_to_document(json)));
            }
        }
        if tool_result.status.as_deref() == Some("error") {
            builder = builder.status(sdk::ToolResultStatus::Error);
        }
        let built = builder
            .build()
            .map_err(|e| BedrockError::Internal(format!("invalid converse tool_result block: {e}")))?;
        return Ok(Some(sdk::ContentBlock::ToolResult(built)));
    }
    if let Some(reasoning) = &block.reasoning_content {
        let built = if let Some(redacted) = &reasoning.redacted_content {
            sdk::ReasoningContentBlock::RedactedContent(Blob::new(decode_bytes(redacted)?))
        } else {
            sdk::ReasoningContentBlock::ReasoningText(
                sdk::ReasoningTextBlock::builder()
                    .text(reasoning.text.clone().unwrap_or_default())
                    .set_signature(reasoning.signature.clone())
                    .build()
                    .map_err(|e| {
                        BedrockError::Internal(format!("invalid converse reasoning block: {e}"))
                    })?,
            )
        };
        return Ok(Some(sdk::ContentBlock::ReasoningContent(built)));
    }
    if block.cache_point.is_some() {
        let built = sdk::CachePointBlock::builder()
            .cache_point_type(sdk::CachePointType::Default)
            .build()
            .map_err(|e| BedrockError::Internal(format!("invalid converse cache point: {e}")))?;
        return Ok(Some(sdk::ContentBlock::CachePoint(built)));
    }
    Ok(None)
}

fn content_block_from_sdk(block: &sdk::ContentBlock) -> anthropic_protocol::bedrock::ConverseContentBlock {
    let mut out = anthropic_protocol::bedrock::ConverseContentBlock {
        text: None,
        image: None,
        document: None,
        tool_use: None,
        tool_result: None,
        reasoning_content: None,
        cache_point: None,
    };
    match block {
        sdk::ContentBlock::Text(text) => out.text = Some(text.clone()),
        sdk::ContentBlock::ToolUse(tool_use) => {
            out.tool_use = Some(anthropic_protocol::bedrock::ConverseToolUse {
                tool_use_id: tool_use.tool_use_id.clone(),
                name: tool_use.name.clone(),
                input: tool_use
                    .input
                    .as_ref()
                    .map(document_to_json)
                    .unwrap_or(Value::Null),
            })
        }
        sdk::ContentBlock::ReasoningContent(reasoning) => match reasoning {
            sdk::ReasoningContentBlock::ReasoningText(text_block) => {
                out.reasoning_content = Some(anthropic_protocol::bedrock::ConverseReasoningContent {
                    text: text_block.text.clone(),
                    signature: text_block.signature.clone(),
                    redacted_content: None,
                })
            }
            sdk::ReasoningContentBlock::RedactedContent(blob) => {
                out.reasoning_content = Some(anthropic_protocol::bedrock::ConverseReasoningContent {
                    text: None,
                    signature: None,
                    redacted_content: Some(BASE64.encode(blob.as_ref())),
                })
            }
            _ => {}
        },
        _ => {}
    }
    out
}

fn system_block_to_sdk(block: &ConverseSystemBlock) -> sdk::SystemContentBlock {
    if let Some(text) = &block.text {
        return sdk::SystemContentBlock::Text(text.clone());
    }
    sdk::SystemContentBlock::CachePoint(
        sdk::CachePointBlock::builder()
            .cache_point_type(sdk::CachePointType::Default)
            .build()
            .unwrap_or_default(),
    )
}

fn tool_choice_to_sdk(choice: &Value) -> Result<sdk::ToolChoice, BedrockError> {
    let obj = choice.as_object().ok_or_else(|| {
        BedrockError::Internal("tool_choice must serialize as an object".to_string())
    })?;
    if obj.contains_key("any") {
        return Ok(sdk::ToolChoice::Any(sdk::AnyToolChoice::builder().build()));
    }
    if let Some(tool) = obj.get("tool") {
        let name = tool
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BedrockError::Internal("tool_choice.tool missing name".to_string()))?;
        return Ok(sdk::ToolChoice::Tool(
            sdk::SpecificToolChoice::builder()
                .name(name)
                .build()
                .map_err(|e| BedrockError::Internal(format!("invalid tool_choice: {e}")))?,
        ));
    }
    Ok(sdk::ToolChoice::Auto(sdk::AutoToolChoice::builder().build()))
}

fn decode_bytes(base64_data: &str) -> Result<Vec<u8>, BedrockError> {
    BASE64
        .decode(base64_data)
        .map_err(|e| BedrockError::InvalidRequest(format!("invalid base64 payload: {e}")))
}

/// Converts a `serde_json::Value` into the AWS SDK's open `Document` type,
/// used for tool inputs and `additionalModelRequestFields`.
pub fn json_to_document(value: &Value) -> Document {
    match value {
        Value::Null => Document::Null,
        Value::Bool(b) => Document::Bool(*b),
        Value::Number(n) => Document::Number(json_number_to_smithy(n)),
        Value::String(s) => Document::String(s.clone()),
        Value::Array(items) => Document::Array(items.iter().map(json_to_document).collect()),
        Value::Object(map) => Document::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_document(v)))
                .collect(),
        ),
    }
}

fn json_number_to_smithy(n: &serde_json::Number) -> SmithyNumber {
    if let Some(u) = n.as_u64() {
        SmithyNumber::PosInt(u)
    } else if let Some(i) = n.as_i64() {
        SmithyNumber::NegInt(i)
    } else {
        SmithyNumber::Float(n.as_f64().unwrap_or_default())
    }
}

/// The inverse of [`json_to_document`], used to read back tool inputs the
/// Converse API echoes to us as `Document`s.
pub fn document_to_json(doc: &Document) -> Value {
    match doc {
        Document::Null => Value::Null,
        Document::Bool(b) => Value::Bool(*b),
        Document::Number(n) => match n {
            SmithyNumber::PosInt(u) => Value::from(*u),
            SmithyNumber::NegInt(i) => Value::from(*i),
            SmithyNumber::Float(f) => Value::from(*f),
        },
        Document::String(s) => Value::String(s.clone()),
        Document::Array(items) => Value::Array(items.iter().map(document_to_json).collect()),
        Document::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), document_to_json(v)))
                .collect::<Map<_, _>>(),
        ),
    }
}

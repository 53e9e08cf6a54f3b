//! C8 — the SSE emitter (SPEC_FULL.md §4.8). Every streaming response this
//! gateway sends is synthesized from a complete, already-resolved `Message`
//! rather than forwarded from an upstream SSE stream: both the plain
//! hybrid-streaming path and the PTC path call the backend non-streaming
//! and hand their result here (SPEC_FULL.md §4.6.6 "exactly one SSE-
//! synthesis code path"). Grounded on the teacher's
//! `routers::anthropic::sse` event-formatting primitives
//! (`format_sse_event`/`send_event`/`emit_final`); the block-by-block walk
//! itself is authored fresh since the teacher's version forwards an
//! upstream stream rather than synthesizing one from a resolved message.

use std::io;

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::Response,
};
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use anthropic_protocol::messages::{
    ContentBlock, ContentBlockDelta, Message, MessageDelta, MessageDeltaUsage, MessageStreamEvent,
};

/// `event: <name>\ndata: <json>\n\n`, byte-for-byte per SPEC_FULL.md §6.
pub fn format_sse_event(event_type: &str, data: &Value) -> Bytes {
    let json = serde_json::to_string(data).unwrap_or_else(|_| "{}".to_string());
    Bytes::from(format!("event: {event_type}\ndata: {json}\n\n"))
}

pub async fn send_event(tx: &mpsc::Sender<Result<Bytes, io::Error>>, event: &MessageStreamEvent) -> bool {
    let event_type = event_type_name(event);
    let data = serde_json::to_value(event).unwrap_or(Value::Null);
    tx.send(Ok(format_sse_event(event_type, &data))).await.is_ok()
}

fn event_type_name(event: &MessageStreamEvent) -> &'static str {
    match event {
        MessageStreamEvent::MessageStart { .. } => "message_start",
        MessageStreamEvent::ContentBlockStart { .. } => "content_block_start",
        MessageStreamEvent::ContentBlockDelta { .. } => "content_block_delta",
        MessageStreamEvent::ContentBlockStop { .. } => "content_block_stop",
        MessageStreamEvent::MessageDelta { .. } => "message_delta",
        MessageStreamEvent::MessageStop => "message_stop",
        MessageStreamEvent::Error { .. } => "error",
    }
}

/// Builds the full SSE event sequence for a resolved message: `message_start`
/// with an empty-content echo, one `content_block_start`/`_delta`/`_stop`
/// triple per block (indexed from 0), then `message_delta` + `message_stop`
/// carrying the final stop reason and usage (SPEC_FULL.md §4.8).
pub fn synthesize_message_stream(message: &Message) -> Vec<MessageStreamEvent> {
    let mut events = Vec::with_capacity(message.content.len() * 3 + 2);

    let mut start_echo = message.clone();
    start_echo.content = Vec::new();
    start_echo.stop_reason = None;
    events.push(MessageStreamEvent::MessageStart { message: start_echo });

    for (index, block) in message.content.iter().enumerate() {
        let index = index as u32;
        events.push(MessageStreamEvent::ContentBlockStart {
            index,
            content_block: empty_variant_of(block),
        });
        events.push(MessageStreamEvent::ContentBlockDelta {
            index,
            delta: full_delta_of(block),
        });
        events.push(MessageStreamEvent::ContentBlockStop { index });
    }

    events.push(MessageStreamEvent::MessageDelta {
        delta: MessageDelta {
            stop_reason: message.stop_reason,
            stop_sequence: message.stop_sequence.clone(),
        },
        usage: MessageDeltaUsage {
            input_tokens: message.usage.input_tokens,
            output_tokens: message.usage.output_tokens,
            cache_creation_input_tokens: message.usage.cache_creation_input_tokens,
            cache_read_input_tokens: message.usage.cache_read_input_tokens,
        },
    });
    events.push(MessageStreamEvent::MessageStop);

    events
}

/// The `content_block_start` shape carries a block with empty/zeroed
/// payload; the full payload is delivered as a single delta immediately
/// after, matching the "one big chunk" degenerate case of real streaming.
fn empty_variant_of(block: &ContentBlock) -> ContentBlock {
    use anthropic_protocol::messages::{
        RedactedThinkingBlock, ServerToolUseBlock, TextBlock, ThinkingBlock, ToolUseBlock,
    };
    match block {
        ContentBlock::Text(_) => ContentBlock::Text(TextBlock {
            text: String::new(),
            cache_control: None,
        }),
        ContentBlock::ToolUse(b) => ContentBlock::ToolUse(ToolUseBlock {
            id: b.id.clone(),
            name: b.name.clone(),
            input: Value::Object(Default::default()),
            cache_control: None,
            caller: b.caller.clone(),
        }),
        ContentBlock::Thinking(_) => ContentBlock::Thinking(ThinkingBlock {
            thinking: String::new(),
            signature: None,
        }),
        ContentBlock::RedactedThinking(b) => ContentBlock::RedactedThinking(RedactedThinkingBlock {
            data: b.data.clone(),
        }),
        ContentBlock::ServerToolUse(b) => ContentBlock::ServerToolUse(ServerToolUseBlock {
            id: b.id.clone(),
            name: b.name.clone(),
            input: Value::Object(Default::default()),
        }),
        ContentBlock::ServerToolResult(b) => ContentBlock::ServerToolResult(b.clone()),
    }
}

fn full_delta_of(block: &ContentBlock) -> ContentBlockDelta {
    match block {
        ContentBlock::Text(b) => ContentBlockDelta::TextDelta { text: b.text.clone() },
        ContentBlock::ToolUse(b) => ContentBlockDelta::InputJsonDelta {
            partial_json: serde_json::to_string(&b.input).unwrap_or_default(),
        },
        ContentBlock::Thinking(b) => ContentBlockDelta::ThinkingDelta {
            thinking: b.thinking.clone(),
        },
        ContentBlock::RedactedThinking(_) => ContentBlockDelta::ThinkingDelta {
            thinking: String::new(),
        },
        ContentBlock::ServerToolUse(b) => ContentBlockDelta::InputJsonDelta {
            partial_json: serde_json::to_string(&b.input).unwrap_or_default(),
        },
        ContentBlock::ServerToolResult(b) => ContentBlockDelta::InputJsonDelta {
            partial_json: serde_json::to_string(&b.content).unwrap_or_default(),
        },
    }
}

/// Drives `synthesize_message_stream` over a channel, matching the teacher's
/// send-then-check-for-disconnect idiom.
pub async fn emit_message(tx: &mpsc::Sender<Result<Bytes, io::Error>>, message: &Message) {
    for event in synthesize_message_stream(message) {
        if !send_event(tx, &event).await {
            debug!("SSE receiver dropped mid-stream");
            return;
        }
    }
}

pub async fn emit_error(tx: &mpsc::Sender<Result<Bytes, io::Error>>, message: &str) {
    use anthropic_protocol::messages::ApiError;
    send_event(
        tx,
        &MessageStreamEvent::Error {
            error: ApiError::ApiError {
                message: message.to_string(),
            },
        },
    )
    .await;
}

/// Wraps an SSE byte channel into an axum streaming `Response`.
pub fn build_sse_response(rx: mpsc::Receiver<Result<Bytes, io::Error>>) -> Response {
    let stream = tokio_stream::wrappers::ReceiverStream::new(rx);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| {
            crate::routers::error::internal_error("response_build_failed", "failed to build SSE response")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anthropic_protocol::messages::{Role, TextBlock, Usage};

    fn sample_message() -> Message {
        Message {
            id: "msg_1".to_string(),
            message_type: "message".to_string(),
            role: Role::Assistant,
            content: vec![ContentBlock::Text(TextBlock {
                text: "hello".to_string(),
                cache_control: None,
            })],
            model: "claude-sonnet-4-5-20250929".to_string(),
            stop_reason: Some(anthropic_protocol::messages::StopReason::EndTurn),
            stop_sequence: None,
            usage: Usage {
                input_tokens: 3,
                output_tokens: 1,
                ..Default::default()
            },
            container: None,
        }
    }

    #[test]
    fn synthesizes_full_event_sequence_for_single_text_block() {
        let events = synthesize_message_stream(&sample_message());
        assert_eq!(events.len(), 6);
        assert!(matches!(events[0], MessageStreamEvent::MessageStart { .. }));
        assert!(matches!(events[1], MessageStreamEvent::ContentBlockStart { index: 0, .. }));
        assert!(matches!(events[2], MessageStreamEvent::ContentBlockDelta { index: 0, .. }));
        assert!(matches!(events[3], MessageStreamEvent::ContentBlockStop { index: 0 }));
        assert!(matches!(events[4], MessageStreamEvent::MessageDelta { .. }));
        assert!(matches!(events[5], MessageStreamEvent::MessageStop));
    }

    #[test]
    fn format_sse_event_has_expected_framing() {
        let bytes = format_sse_event("ping", &serde_json::json!({"type": "ping"}));
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.starts_with("event: ping\n"));
        assert!(text.ends_with("\n\n"));
    }
}

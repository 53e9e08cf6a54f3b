//! C6 — the PTC state machine (SPEC_FULL.md §4.6). Owns request
//! preparation, the IDLE/RUNNING/WAITING_TOOL/FINALIZING/ABANDONED
//! transitions, batched tool-call fan-out, and continuation-request
//! reconstruction. Streaming clients are served by re-running this same
//! non-streaming driver and handing its result to the SSE emitter (§4.6.6).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use anthropic_protocol::messages::{
    Caller, ContainerInfo, ContentBlock, CreateMessageRequest, CustomTool, InputContent,
    InputContentBlock, InputMessage, Message, Role, ServerToolUseBlock, StopReason, SystemContent,
    TextBlock, Tool, ToolResultBlock, ToolResultContent, ToolResultContentBlock, ToolUseBlock, Usage,
};

use crate::bedrock::convert_response::native_response_to_message;
use crate::bedrock::{prepare_request, resolve_model_id, BackendResponse};
use crate::config::Settings;
use crate::errors::PtcError;

use super::classifier::partition_tools;
use super::sandbox::{BatchToolCallRequest, ExecutionResult, SandboxEvent, SandboxExecutor, ToolCallRequest};
use super::session::{
    new_code_execution_tool_id, new_session_id, PendingToolCall, PtcExecutionState, PtcState,
    SessionStore, TurnSnapshot,
};
use super::system_prompt::{build_execute_code_tool, ptc_system_prompt_fragment, EXECUTE_CODE_TOOL_NAME};
use crate::bedrock::invoker::BedrockInvoker;

/// Result of driving one HTTP-visible PTC turn to completion: either a
/// WAITING_TOOL pause or the final IDLE response.
pub struct PtcTurnOutcome {
    pub message: Message,
}

pub struct PtcOrchestrator {
    invoker: Arc<BedrockInvoker>,
    sessions: SessionStore,
    sandbox: Arc<dyn SandboxExecutor>,
    settings: Arc<Settings>,
    model_mapping: HashMap<String, String>,
}

impl PtcOrchestrator {
    pub fn new(
        invoker: Arc<BedrockInvoker>,
        sessions: SessionStore,
        sandbox: Arc<dyn SandboxExecutor>,
        settings: Arc<Settings>,
        model_mapping: HashMap<String, String>,
    ) -> Self {
        Self {
            invoker,
            sessions,
            sandbox,
            settings,
            model_mapping,
        }
    }

    /// Entry point: dispatches to a fresh session or a continuation based on
    /// whether the request carries a container id (SPEC_FULL.md §4.6.7).
    pub async fn handle(
        &self,
        request: &CreateMessageRequest,
        beta_header: Option<&str>,
    ) -> Result<PtcTurnOutcome, PtcError> {
        match &request.container {
            Some(container) => {
                self.handle_continuation(request, &container.id, beta_header).await
            }
            None => self.handle_initial(request, beta_header).await,
        }
    }

    async fn handle_initial(
        &self,
        request: &CreateMessageRequest,
        beta_header: Option<&str>,
    ) -> Result<PtcTurnOutcome, PtcError> {
        self.start_session(new_session_id(), request, beta_header).await
    }

    /// Starts a fresh PTC session under `session_id`, either for a true
    /// initial turn or for a continuation whose prior session had to be
    /// abandoned per `must_be_recreated` (SPEC_FULL.md §4.6.2) — in the
    /// latter case the client's own container id is reused so it keeps
    /// routing to the same session.
    async fn start_session(
        &self,
        session_id: String,
        request: &CreateMessageRequest,
        beta_header: Option<&str>,
    ) -> Result<PtcTurnOutcome, PtcError> {
        let resolved_model_id = resolve_model_id(&request.model, &self.model_mapping);
        let snapshot = build_snapshot(request, &resolved_model_id, beta_header);
        let code_execution_tool_id = new_code_execution_tool_id();

        let messages = filter_historical_messages(&request.messages);
        let message = self
            .call_backend(snapshot.system.clone(), messages, &snapshot, beta_header)
            .await?;

        match find_execute_code_call(&message) {
            None => {
                let state = PtcExecutionState::new(session_id.clone(), code_execution_tool_id, snapshot);
                self.sessions.insert(state);
                Ok(PtcTurnOutcome {
                    message: self.finish_idle_message(message, &session_id),
                })
            }
            Some(call) => {
                let code = extract_code_argument(&call.input)?;
                let execute_code_id = call.id.clone();

                let ptc_tools: Vec<Tool> = partition_tools(&snapshot.tools)
                    .ptc_callable_tools
                    .into_iter()
                    .cloned()
                    .collect();
                let sandbox_session = self
                    .sandbox
                    .create_session(&ptc_tools)
                    .await
                    .map_err(|_| PtcError::SandboxUnavailable)?;
                let (event_rx, resume_handle) = self
                    .sandbox
                    .execute_code(&code, &sandbox_session)
                    .await
                    .map_err(|e| PtcError::Execution(e.to_string()))?;

                let mut state =
                    PtcExecutionState::new(session_id.clone(), code_execution_tool_id, snapshot);
                state.state = PtcState::Running;
                state.is_busy = true;
                state.pending_message = Some(message);
                state.original_execute_code_id = execute_code_id;
                state.sandbox_session = Some(sandbox_session);
                state.event_rx = Some(event_rx);
                state.resume_handle = Some(resume_handle);

                let handle = self.sessions.insert(state);
                self.run_driver(handle, session_id, request.messages.clone(), beta_header)
                    .await
            }
        }
    }

    async fn handle_continuation(
        &self,
        request: &CreateMessageRequest,
        container_id: &str,
        beta_header: Option<&str>,
    ) -> Result<PtcTurnOutcome, PtcError> {
        let Some(handle) = self.sessions.get(container_id) else {
            return Err(PtcError::SessionNotFound(sticky_routing_message(
                container_id,
                &self.settings,
            )));
        };

        let must_recreate = {
            let state = handle.lock().await;
            if state.state == PtcState::WaitingTool {
                false
            } else if state.must_be_recreated() {
                true
            } else {
                return Err(PtcError::SessionNotFound(format!(
                    "PTC session '{container_id}' is not awaiting a tool result"
                )));
            }
        };

        if must_recreate {
            self.sessions.remove(container_id);
            return self
                .start_session(container_id.to_string(), request, beta_header)
                .await;
        }

        {
            let mut state = handle.lock().await;
            let results = collect_tool_results(&request.messages);
            let pending = state.pending_calls.clone();
            for call in &pending {
                let Some((is_error, text)) = results.get(&call.public_id) else {
                    return Err(PtcError::Execution(format!(
                        "missing tool_result for pending call '{}'",
                        call.public_id
                    )));
                };
                let Some(resume_handle) = state.resume_handle.clone() else {
                    return Err(PtcError::UnexpectedCompletion);
                };
                if *is_error {
                    resume_handle.resume_with_error(call.call_id.clone(), text.clone()).await;
                } else {
                    resume_handle
                        .resume_with_result(call.call_id.clone(), Value::String(text.clone()))
                        .await;
                }
            }

            state.pending_tool_call = None;
            state.pending_batch_ids.clear();
            state.pending_calls.clear();
            state.state = PtcState::Running;
            state.touch();
        }

        let session_id = container_id.to_string();
        self.run_driver(handle, session_id, request.messages.clone(), beta_header)
            .await
    }

    /// Drives a RUNNING session's sandbox generator to its next pause point
    /// (WAITING_TOOL) or completion (FINALIZING, possibly recursing back
    /// into RUNNING when the continuation turn calls `execute_code` again).
    async fn run_driver(
        &self,
        handle: Arc<Mutex<PtcExecutionState>>,
        session_id: String,
        mut raw_client_messages: Vec<InputMessage>,
        beta_header: Option<&str>,
    ) -> Result<PtcTurnOutcome, PtcError> {
        loop {
            let next = {
                let mut state = handle.lock().await;
                next_sandbox_event(&mut state).await
            };

            match next {
                Ok(SandboxOutcome::WaitingTool(calls)) => {
                    let mut state = handle.lock().await;
                    return Ok(PtcTurnOutcome {
                        message: build_waiting_tool_message(&mut state, calls, &session_id, &self.settings),
                    });
                }
                Ok(SandboxOutcome::Finished(result)) => {
                    let (snapshot, pending_message, original_execute_code_id) = {
                        let mut state = handle.lock().await;
                        state.state = PtcState::Finalizing;
                        (
                            state.snapshot.clone(),
                            state
                                .pending_message
                                .take()
                                .ok_or(PtcError::UnexpectedCompletion)?,
                            state.original_execute_code_id.clone(),
                        )
                    };
                    self.close_sandbox(&handle).await;

                    let stdout_or_error = if result.success {
                        if result.stdout.is_empty() {
                            "(no output)".to_string()
                        } else {
                            result.stdout
                        }
                    } else {
                        format!("Error: {}", result.stderr)
                    };

                    let continuation_messages = build_continuation_messages(
                        &raw_client_messages,
                        &pending_message.content,
                        &original_execute_code_id,
                        &stdout_or_error,
                    );

                    let message = self
                        .call_backend(
                            snapshot.system.clone(),
                            continuation_messages.clone(),
                            &snapshot,
                            beta_header,
                        )
                        .await?;

                    match find_execute_code_call(&message) {
                        None => {
                            let mut state = handle.lock().await;
                            state.state = PtcState::Idle;
                            state.touch();
                            drop(state);
                            return Ok(PtcTurnOutcome {
                                message: self.finish_idle_message(message, &session_id),
                            });
                        }
                        Some(call) => {
                            let code = extract_code_argument(&call.input)?;
                            let next_execute_code_id = call.id.clone();

                            let ptc_tools: Vec<Tool> = partition_tools(&snapshot.tools)
                                .ptc_callable_tools
                                .into_iter()
                                .cloned()
                                .collect();
                            let sandbox_session = self
                                .sandbox
                                .create_session(&ptc_tools)
                                .await
                                .map_err(|_| PtcError::SandboxUnavailable)?;
                            let (event_rx, resume_handle) = self
                                .sandbox
                                .execute_code(&code, &sandbox_session)
                                .await
                                .map_err(|e| PtcError::Execution(e.to_string()))?;

                            {
                                let mut state = handle.lock().await;
                                state.state = PtcState::Running;
                                state.is_busy = true;
                                state.pending_message = Some(message);
                                state.original_execute_code_id = next_execute_code_id;
                                state.sandbox_session = Some(sandbox_session);
                                state.event_rx = Some(event_rx);
                                state.resume_handle = Some(resume_handle);
                                state.touch();
                            }

                            raw_client_messages = continuation_messages;
                            continue;
                        }
                    }
                }
                Err(err) => {
                    let mut state = handle.lock().await;
                    state.state = PtcState::Abandoned;
                    drop(state);
                    self.sessions.remove(&session_id);
                    return Err(err);
                }
            }
        }
    }

    async fn close_sandbox(&self, handle: &Arc<Mutex<PtcExecutionState>>) {
        let session = {
            let mut state = handle.lock().await;
            state.is_busy = false;
            state.event_rx = None;
            state.resume_handle = None;
            state.sandbox_session.take()
        };
        if let Some(session) = session {
            self.sandbox.close_session(&session.id).await;
        }
    }

    async fn call_backend(
        &self,
        system: Option<SystemContent>,
        messages: Vec<InputMessage>,
        snapshot: &TurnSnapshot,
        beta_header: Option<&str>,
    ) -> Result<Message, PtcError> {
        let tools = prepare_tools(&snapshot.tools);
        let system = Some(merge_system(system.as_ref(), ptc_system_prompt_fragment()));

        let backend_request = CreateMessageRequest {
            model: snapshot.model.clone(),
            messages,
            max_tokens: snapshot.max_tokens,
            system,
            temperature: snapshot.temperature,
            top_p: snapshot.top_p,
            top_k: snapshot.top_k,
            stop_sequences: snapshot.stop_sequences.clone(),
            stream: Some(false),
            tools: Some(tools),
            tool_choice: snapshot.tool_choice.clone(),
            thinking: snapshot.thinking.clone(),
            metadata: None,
            service_tier: None,
            container: None,
        };

        let beta = beta_header.or(snapshot.beta_header.as_deref());
        let prepared = prepare_request(
            &backend_request,
            &snapshot.resolved_model_id,
            beta,
            self.settings.prompt_caching_enabled,
        )
        .map_err(PtcError::Backend)?;

        match self.invoker.invoke(prepared).await.map_err(PtcError::Backend)? {
            BackendResponse::Native(raw) => native_response_to_message(&raw).map_err(PtcError::Backend),
            BackendResponse::Converse(message) => Ok(message),
        }
    }

    fn finish_idle_message(&self, message: Message, session_id: &str) -> Message {
        let mut message = message;
        add_direct_caller(&mut message);
        message.container = Some(ContainerInfo {
            id: session_id.to_string(),
            expires_at: expires_at(self.settings.ptc_session_timeout),
        });
        message
    }
}

// ============================================================================
// Request preparation (§4.6.1)
// ============================================================================

fn build_snapshot(
    request: &CreateMessageRequest,
    resolved_model_id: &str,
    beta_header: Option<&str>,
) -> TurnSnapshot {
    TurnSnapshot {
        system: request.system.clone(),
        model: request.model.clone(),
        resolved_model_id: resolved_model_id.to_string(),
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: request.top_k,
        stop_sequences: request.stop_sequences.clone(),
        tool_choice: request.tool_choice.clone(),
        thinking: request.thinking.clone(),
        beta_header: beta_header.map(str::to_string),
        tools: request.tools.clone().unwrap_or_default(),
    }
}

fn prepare_tools(tools: &[Tool]) -> Vec<Tool> {
    let partition = partition_tools(tools);
    let mut out = Vec::new();
    for tool in &partition.direct_tools {
        out.push((*tool).clone());
    }
    for tool in &partition.ptc_callable_tools {
        if tool.allowed_callers().iter().any(|c| c == Caller::DIRECT) {
            out.push(strip_allowed_callers(tool));
        }
    }
    if !out.iter().any(|t| t.name() == EXECUTE_CODE_TOOL_NAME) {
        out.push(build_execute_code_tool(&partition.ptc_callable_tools));
    }
    out
}

fn strip_allowed_callers(tool: &Tool) -> Tool {
    match tool {
        Tool::Custom(custom) => Tool::Custom(CustomTool {
            allowed_callers: None,
            ..custom.clone()
        }),
        other => other.clone(),
    }
}

fn merge_system(existing: Option<&SystemContent>, fragment: &str) -> SystemContent {
    match existing {
        None => SystemContent::Text(fragment.to_string()),
        Some(SystemContent::Text(text)) => SystemContent::Text(format!("{text}\n\n{fragment}")),
        Some(SystemContent::Blocks(blocks)) => {
            let mut blocks = blocks.clone();
            blocks.push(TextBlock {
                text: fragment.to_string(),
                cache_control: None,
            });
            SystemContent::Blocks(blocks)
        }
    }
}

/// Strips non-direct tool-use/tool-result pairs, `server_tool_use`/
/// `server_tool_result` blocks, and `caller` fields from a message list,
/// moving any `thinking`/`redacted_thinking` blocks to the front of each
/// message's remaining content. Messages left empty are dropped entirely
/// (SPEC_FULL.md §4.6.1, §8, §9).
fn filter_historical_messages(messages: &[InputMessage]) -> Vec<InputMessage> {
    let internal_ids = collect_internal_tool_use_ids(messages);
    apply_filter(messages, &internal_ids)
}

fn collect_internal_tool_use_ids(messages: &[InputMessage]) -> HashSet<String> {
    let mut ids = HashSet::new();
    for message in messages {
        for block in message.content.blocks() {
            if let InputContentBlock::ToolUse(b) = &block {
                if let Some(caller) = &b.caller {
                    if !caller.is_direct() {
                        ids.insert(b.id.clone());
                    }
                }
            }
        }
    }
    ids
}

fn apply_filter(messages: &[InputMessage], internal_ids: &HashSet<String>) -> Vec<InputMessage> {
    let mut out = Vec::with_capacity(messages.len());
    for message in messages {
        let mut thinking_first = Vec::new();
        let mut rest = Vec::new();
        for block in message.content.blocks() {
            match &block {
                InputContentBlock::ToolUse(b) if internal_ids.contains(&b.id) => continue,
                InputContentBlock::ToolResult(b) if internal_ids.contains(&b.tool_use_id) => continue,
                InputContentBlock::ServerToolUse(_) | InputContentBlock::ServerToolResult(_) => continue,
                InputContentBlock::Thinking(_) | InputContentBlock::RedactedThinking(_) => {
                    thinking_first.push(strip_caller(block));
                }
                _ => rest.push(strip_caller(block)),
            }
        }
        thinking_first.extend(rest);
        if thinking_first.is_empty() {
            continue;
        }
        out.push(InputMessage {
            role: message.role,
            content: InputContent::Blocks(thinking_first),
        });
    }
    out
}

fn strip_caller(mut block: InputContentBlock) -> InputContentBlock {
    if let InputContentBlock::ToolUse(b) = &mut block {
        b.caller = None;
    }
    block
}

// ============================================================================
// Backend response inspection (§4.6.2)
// ============================================================================

fn find_execute_code_call(message: &Message) -> Option<&ToolUseBlock> {
    message.content.iter().find_map(|block| match block {
        ContentBlock::ToolUse(b) if b.name == EXECUTE_CODE_TOOL_NAME => Some(b),
        _ => None,
    })
}

fn extract_code_argument(input: &Value) -> Result<String, PtcError> {
    input
        .get("code")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| PtcError::Execution("execute_code call missing 'code' argument".to_string()))
}

fn add_direct_caller(message: &mut Message) {
    for block in &mut message.content {
        if let ContentBlock::ToolUse(b) = block {
            b.caller = Some(Caller::direct());
        }
    }
}

fn content_block_to_input_block(block: ContentBlock) -> InputContentBlock {
    match block {
        ContentBlock::Text(b) => InputContentBlock::Text(b),
        ContentBlock::ToolUse(b) => InputContentBlock::ToolUse(b),
        ContentBlock::Thinking(b) => InputContentBlock::Thinking(b),
        ContentBlock::RedactedThinking(b) => InputContentBlock::RedactedThinking(b),
        ContentBlock::ServerToolUse(b) => InputContentBlock::ServerToolUse(b),
        ContentBlock::ServerToolResult(b) => InputContentBlock::ServerToolResult(b),
    }
}

// ============================================================================
// Sandbox driving (§4.6.3, §4.6.4)
// ============================================================================

enum SandboxOutcome {
    WaitingTool(Vec<ToolCallRequest>),
    Finished(ExecutionResult),
}

async fn next_sandbox_event(state: &mut PtcExecutionState) -> Result<SandboxOutcome, PtcError> {
    let rx = state
        .event_rx
        .as_mut()
        .ok_or(PtcError::UnexpectedCompletion)?;
    match rx.recv().await {
        Some(SandboxEvent::ToolCall(call)) => Ok(SandboxOutcome::WaitingTool(vec![call])),
        Some(SandboxEvent::BatchToolCall(BatchToolCallRequest { requests })) => {
            Ok(SandboxOutcome::WaitingTool(requests))
        }
        Some(SandboxEvent::Result(result)) => Ok(SandboxOutcome::Finished(result)),
        None => Err(PtcError::UnexpectedCompletion),
    }
}

fn build_waiting_tool_message(
    state: &mut PtcExecutionState,
    calls: Vec<ToolCallRequest>,
    session_id: &str,
    settings: &Settings,
) -> Message {
    let public_ids: Vec<String> = calls.iter().map(|_| format!("toolu_{}", Uuid::new_v4().simple())).collect();
    let pending: Vec<PendingToolCall> = calls
        .iter()
        .zip(&public_ids)
        .map(|(c, pid)| PendingToolCall {
            call_id: c.call_id.clone(),
            public_id: pid.clone(),
            name: c.name.clone(),
        })
        .collect();

    state.pending_tool_call = pending.first().cloned();
    state.pending_batch_ids = if pending.len() > 1 {
        pending.iter().map(|p| p.call_id.clone()).collect()
    } else {
        Vec::new()
    };
    state.pending_calls = pending;
    state.state = PtcState::WaitingTool;
    state.touch();

    let tool_id = state.code_execution_tool_id.clone();
    let execute_code_id = state.original_execute_code_id.clone();
    let template = state
        .pending_message
        .clone()
        .expect("pending_message is set whenever a sandbox run is active");

    let mut content: Vec<ContentBlock> = Vec::new();
    let mut server_tool_input = Value::Object(Default::default());
    for block in &template.content {
        match block {
            ContentBlock::ToolUse(b) if b.id == execute_code_id => {
                server_tool_input = b.input.clone();
            }
            other => content.push(other.clone()),
        }
    }
    content.push(ContentBlock::ServerToolUse(ServerToolUseBlock {
        id: tool_id.clone(),
        name: "code_execution".to_string(),
        input: server_tool_input,
    }));
    for (call, public_id) in calls.iter().zip(&public_ids) {
        content.push(ContentBlock::ToolUse(ToolUseBlock {
            id: public_id.clone(),
            name: call.name.clone(),
            input: call.arguments.clone(),
            cache_control: None,
            caller: Some(Caller::code_execution(tool_id.clone())),
        }));
    }

    Message {
        id: template.id,
        message_type: template.message_type,
        role: Role::Assistant,
        content,
        model: template.model,
        stop_reason: Some(StopReason::ToolUse),
        stop_sequence: None,
        usage: template.usage,
        container: Some(ContainerInfo {
            id: session_id.to_string(),
            expires_at: expires_at(settings.ptc_session_timeout),
        }),
    }
}

fn collect_tool_results(messages: &[InputMessage]) -> HashMap<String, (bool, String)> {
    let mut out = HashMap::new();
    for message in messages {
        if message.role != Role::User {
            continue;
        }
        for block in message.content.blocks() {
            if let InputContentBlock::ToolResult(b) = block {
                let is_error = b.is_error.unwrap_or(false);
                let text = tool_result_text(&b.content);
                out.insert(b.tool_use_id, (is_error, text));
            }
        }
    }
    out
}

fn tool_result_text(content: &Option<ToolResultContent>) -> String {
    match content {
        None => String::new(),
        Some(ToolResultContent::Text(text)) => text.clone(),
        Some(ToolResultContent::Blocks(blocks)) => blocks
            .iter()
            .filter_map(|b| match b {
                ToolResultContentBlock::Text(t) => Some(t.text.clone()),
                ToolResultContentBlock::Image(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

// ============================================================================
// Continuation reconstruction (§4.6.5)
// ============================================================================

fn build_continuation_messages(
    client_messages: &[InputMessage],
    original_assistant_content: &[ContentBlock],
    original_execute_code_id: &str,
    stdout_or_error: &str,
) -> Vec<InputMessage> {
    let internal_ids = collect_internal_tool_use_ids(client_messages);
    let last_assistant_index = client_messages.iter().rposition(|m| m.role == Role::Assistant);

    let mut combined: Vec<InputMessage> = client_messages
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != last_assistant_index)
        .map(|(_, m)| m.clone())
        .collect();

    combined.push(InputMessage {
        role: Role::Assistant,
        content: InputContent::Blocks(
            original_assistant_content
                .iter()
                .cloned()
                .map(content_block_to_input_block)
                .collect(),
        ),
    });
    combined.push(InputMessage {
        role: Role::User,
        content: InputContent::Blocks(vec![InputContentBlock::ToolResult(ToolResultBlock {
            tool_use_id: original_execute_code_id.to_string(),
            content: Some(ToolResultContent::Text(stdout_or_error.to_string())),
            is_error: None,
            cache_control: None,
        })]),
    });

    apply_filter(&combined, &internal_ids)
}

// ============================================================================
// Misc
// ============================================================================

fn expires_at(timeout_secs: u64) -> String {
    let at = Utc::now() + ChronoDuration::seconds(timeout_secs as i64);
    at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// SPEC_FULL.md §4.6.7: a continuation that misses its session on this node
/// must fail loudly, naming the serving instance and the configured
/// session timeout rather than silently starting a fresh session.
fn sticky_routing_message(container_id: &str, settings: &Settings) -> String {
    let instance = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-instance".to_string());
    format!(
        "No PTC session found for container '{container_id}' on instance '{instance}'. \
         Programmatic tool calling requires sticky routing to the node that started the \
         session; sessions expire after {}s of inactivity.",
        settings.ptc_session_timeout
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use anthropic_protocol::messages::{CodeExecutionTool, InputSchema, ThinkingBlock, ToolUseBlock};

    fn direct_tool(name: &str) -> Tool {
        Tool::Custom(CustomTool {
            name: name.to_string(),
            description: Some("d".to_string()),
            input_schema: InputSchema {
                schema_type: "object".to_string(),
                properties: None,
                required: None,
            },
            cache_control: None,
            allowed_callers: None,
        })
    }

    fn sandbox_only_tool(name: &str) -> Tool {
        Tool::Custom(CustomTool {
            name: name.to_string(),
            description: Some("d".to_string()),
            input_schema: InputSchema {
                schema_type: "object".to_string(),
                properties: None,
                required: None,
            },
            cache_control: None,
            allowed_callers: Some(vec!["code_execution_20250825".to_string()]),
        })
    }

    fn dual_tool(name: &str) -> Tool {
        Tool::Custom(CustomTool {
            name: name.to_string(),
            description: Some("d".to_string()),
            input_schema: InputSchema {
                schema_type: "object".to_string(),
                properties: None,
                required: None,
            },
            cache_control: None,
            allowed_callers: Some(vec!["direct".to_string(), "code_execution_20250825".to_string()]),
        })
    }

    #[test]
    fn prepare_tools_synthesizes_execute_code_once() {
        let tools = vec![
            Tool::CodeExecution(CodeExecutionTool {
                tool_type: "code_execution_20250825".to_string(),
                name: "code_execution".to_string(),
            }),
            direct_tool("get_weather"),
            sandbox_only_tool("sandbox_only"),
            dual_tool("dual"),
        ];
        let prepared = prepare_tools(&tools);
        let names: Vec<&str> = prepared.iter().map(Tool::name).collect();
        assert!(names.contains(&"get_weather"));
        assert!(names.contains(&"dual"));
        assert!(!names.contains(&"sandbox_only"));
        assert_eq!(names.iter().filter(|n| **n == EXECUTE_CODE_TOOL_NAME).count(), 1);
    }

    #[test]
    fn prepare_tools_does_not_duplicate_existing_execute_code() {
        let tools = vec![Tool::Custom(CustomTool {
            name: EXECUTE_CODE_TOOL_NAME.to_string(),
            description: None,
            input_schema: InputSchema {
                schema_type: "object".to_string(),
                properties: None,
                required: None,
            },
            cache_control: None,
            allowed_callers: None,
        })];
        let prepared = prepare_tools(&tools);
        assert_eq!(
            prepared.iter().filter(|t| t.name() == EXECUTE_CODE_TOOL_NAME).count(),
            1
        );
    }

    fn user_text(text: &str) -> InputMessage {
        InputMessage {
            role: Role::User,
            content: InputContent::Text(text.to_string()),
        }
    }

    #[test]
    fn filter_drops_internal_tool_use_result_pair_and_strips_caller() {
        let messages = vec![
            user_text("hi"),
            InputMessage {
                role: Role::Assistant,
                content: InputContent::Blocks(vec![InputContentBlock::ToolUse(ToolUseBlock {
                    id: "toolu_internal".to_string(),
                    name: "get_price".to_string(),
                    input: serde_json::json!({}),
                    cache_control: None,
                    caller: Some(Caller::code_execution("srvtoolu_abc")),
                })]),
            },
            InputMessage {
                role: Role::User,
                content: InputContent::Blocks(vec![InputContentBlock::ToolResult(ToolResultBlock {
                    tool_use_id: "toolu_internal".to_string(),
                    content: Some(ToolResultContent::Text("42".to_string())),
                    is_error: None,
                    cache_control: None,
                })]),
            },
            InputMessage {
                role: Role::Assistant,
                content: InputContent::Blocks(vec![InputContentBlock::ToolUse(ToolUseBlock {
                    id: "toolu_direct".to_string(),
                    name: "get_weather".to_string(),
                    input: serde_json::json!({}),
                    cache_control: None,
                    caller: Some(Caller::direct()),
                })]),
            },
        ];
        let filtered = filter_historical_messages(&messages);
        assert_eq!(filtered.len(), 2);
        match &filtered[1].content {
            InputContent::Blocks(blocks) => match &blocks[0] {
                InputContentBlock::ToolUse(b) => {
                    assert_eq!(b.id, "toolu_direct");
                    assert!(b.caller.is_none());
                }
                _ => panic!("expected tool_use"),
            },
            _ => panic!("expected blocks"),
        }
    }

    #[test]
    fn filter_moves_thinking_blocks_to_front() {
        let messages = vec![InputMessage {
            role: Role::Assistant,
            content: InputContent::Blocks(vec![
                InputContentBlock::Text(TextBlock {
                    text: "answer".to_string(),
                    cache_control: None,
                }),
                InputContentBlock::Thinking(ThinkingBlock {
                    thinking: "reasoning".to_string(),
                    signature: None,
                }),
            ]),
        }];
        let filtered = filter_historical_messages(&messages);
        match &filtered[0].content {
            InputContent::Blocks(blocks) => {
                assert!(matches!(blocks[0], InputContentBlock::Thinking(_)));
                assert!(matches!(blocks[1], InputContentBlock::Text(_)));
            }
            _ => panic!("expected blocks"),
        }
    }

    #[test]
    fn filter_drops_messages_left_empty() {
        let messages = vec![InputMessage {
            role: Role::Assistant,
            content: InputContent::Blocks(vec![InputContentBlock::ServerToolUse(
                anthropic_protocol::messages::ServerToolUseBlock {
                    id: "srvtoolu_x".to_string(),
                    name: "code_execution".to_string(),
                    input: serde_json::json!({}),
                },
            )]),
        }];
        assert!(filter_historical_messages(&messages).is_empty());
    }

    #[test]
    fn build_continuation_messages_drops_last_assistant_and_appends_tool_result() {
        let client_messages = vec![
            user_text("hi"),
            InputMessage {
                role: Role::Assistant,
                content: InputContent::Blocks(vec![InputContentBlock::ToolUse(ToolUseBlock {
                    id: "toolu_old".to_string(),
                    name: "execute_code".to_string(),
                    input: serde_json::json!({"code": "..."}),
                    cache_control: None,
                    caller: None,
                })]),
            },
        ];
        let original_assistant_content = vec![ContentBlock::ToolUse(ToolUseBlock {
            id: "toolu_old".to_string(),
            name: "execute_code".to_string(),
            input: serde_json::json!({"code": "..."}),
            cache_control: None,
            caller: None,
        })];
        let result = build_continuation_messages(&client_messages, &original_assistant_content, "toolu_old", "42");
        assert_eq!(result.len(), 3);
        assert_eq!(result[0].role, Role::User);
        assert_eq!(result[1].role, Role::Assistant);
        match &result[2].content {
            InputContent::Blocks(blocks) => match &blocks[0] {
                InputContentBlock::ToolResult(b) => {
                    assert_eq!(b.tool_use_id, "toolu_old");
                }
                _ => panic!("expected tool_result"),
            },
            _ => panic!("expected blocks"),
        }
    }

    #[test]
    fn find_execute_code_call_matches_by_name() {
        let message = Message {
            id: "msg_1".to_string(),
            message_type: "message".to_string(),
            role: Role::Assistant,
            content: vec![ContentBlock::ToolUse(ToolUseBlock {
                id: "toolu_1".to_string(),
                name: EXECUTE_CODE_TOOL_NAME.to_string(),
                input: serde_json::json!({"code": "print(1)"}),
                cache_control: None,
                caller: None,
            })],
            model: "claude-sonnet-4-5-20250929".to_string(),
            stop_reason: Some(StopReason::ToolUse),
            stop_sequence: None,
            usage: Usage::default(),
            container: None,
        };
        let call = find_execute_code_call(&message).unwrap();
        assert_eq!(extract_code_argument(&call.input).unwrap(), "print(1)");
    }
}

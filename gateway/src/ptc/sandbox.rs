//! C7 — the sandbox executor contract plus an in-process reference
//! implementation (SPEC_FULL.md §4.7). A real container-per-session
//! backend is a swappable implementation of [`SandboxExecutor`]; this crate
//! ships only the reference one, sufficient to exercise the full PTC state
//! machine without a real isolated-execution backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

use anthropic_protocol::messages::Tool;

/// A single nested tool call requested by running code.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
}

/// An `asyncio.gather(...)`-shaped batch of concurrent tool calls.
#[derive(Debug, Clone)]
pub struct BatchToolCallRequest {
    pub requests: Vec<ToolCallRequest>,
}

/// Terminal output of a sandbox run.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// One item yielded by a running sandbox.
#[derive(Debug, Clone)]
pub enum SandboxEvent {
    ToolCall(ToolCallRequest),
    BatchToolCall(BatchToolCallRequest),
    Result(ExecutionResult),
}

/// A live, isolated execution context.
#[derive(Debug, Clone)]
pub struct SandboxSession {
    pub id: String,
    pub created_at: Instant,
    pub tool_defs: Vec<String>,
}

#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    async fn create_session(&self, tool_defs: &[Tool]) -> anyhow::Result<SandboxSession>;
    async fn get_session(&self, id: &str) -> Option<SandboxSession>;
    async fn close_session(&self, id: &str);

    /// Starts running `code` under `session`, returning a channel of
    /// [`SandboxEvent`]s plus a handle for injecting results back in.
    async fn execute_code(
        &self,
        code: &str,
        session: &SandboxSession,
    ) -> anyhow::Result<(mpsc::Receiver<SandboxEvent>, SandboxResumeHandle)>;

    async fn inject_tool_error(&self, handle: &SandboxResumeHandle, call_id: &str, message: &str);

    fn is_image_available(&self) -> bool;
    async fn ensure_image_available(&self) -> anyhow::Result<()>;
}

/// Resumes a paused sandbox generator with injected tool results. Cloneable
/// handle so batch fan-out can fire one injection per result without
/// re-threading the whole executor.
#[derive(Clone)]
pub struct SandboxResumeHandle {
    resume_tx: mpsc::Sender<ResumeMessage>,
}

#[derive(Debug)]
enum ResumeMessage {
    ToolResult { call_id: String, value: Value },
    ToolError { call_id: String, message: String },
}

impl SandboxResumeHandle {
    pub async fn resume_with_result(&self, call_id: impl Into<String>, value: Value) {
        let _ = self
            .resume_tx
            .send(ResumeMessage::ToolResult {
                call_id: call_id.into(),
                value,
            })
            .await;
    }

    pub async fn resume_with_error(&self, call_id: impl Into<String>, message: impl Into<String>) {
        let _ = self
            .resume_tx
            .send(ResumeMessage::ToolError {
                call_id: call_id.into(),
                message: message.into(),
            })
            .await;
    }
}

/// In-process reference sandbox. Interprets a tiny, safe "structured call
/// plan" instead of real Python: code submissions are expected to be a
/// JSON object describing the calls to make and a final summary, which is
/// exactly what the orchestrator's tests and any non-production deployment
/// exercise it with. A production deployment swaps this for a real
/// container-backed executor behind the same trait.
pub struct InMemorySandbox {
    sessions: Arc<Mutex<HashMap<String, SandboxSession>>>,
}

impl InMemorySandbox {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for InMemorySandbox {
    fn default() -> Self {
        Self::new()
    }
}

/// The structured call plan this reference sandbox "executes": a sequence
/// of steps, each either a single call, a batch of concurrent calls, or
/// nothing further (implicit completion once steps are exhausted).
#[derive(Debug, Clone, serde::Deserialize)]
struct CallPlan {
    #[serde(default)]
    steps: Vec<PlanStep>,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(untagged)]
enum PlanStep {
    Single { name: String, arguments: Value },
    Batch { batch: Vec<PlanCall> },
}

#[derive(Debug, Clone, serde::Deserialize)]
struct PlanCall {
    name: String,
    arguments: Value,
}

#[async_trait]
impl SandboxExecutor for InMemorySandbox {
    async fn create_session(&self, tool_defs: &[Tool]) -> anyhow::Result<SandboxSession> {
        let session = SandboxSession {
            id: crate::ptc::session::new_session_id(),
            created_at: Instant::now(),
            tool_defs: tool_defs.iter().map(|t| t.name().to_string()).collect(),
        };
        self.sessions
            .lock()
            .await
            .insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: &str) -> Option<SandboxSession> {
        self.sessions.lock().await.get(id).cloned()
    }

    async fn close_session(&self, id: &str) {
        self.sessions.lock().await.remove(id);
    }

    async fn execute_code(
        &self,
        code: &str,
        _session: &SandboxSession,
    ) -> anyhow::Result<(mpsc::Receiver<SandboxEvent>, SandboxResumeHandle)> {
        let plan: CallPlan = serde_json::from_str(code).unwrap_or(CallPlan { steps: Vec::new() });

        let (event_tx, event_rx) = mpsc::channel(16);
        let (resume_tx, mut resume_rx) = mpsc::channel(16);
        let handle = SandboxResumeHandle { resume_tx };

        tokio::spawn(async move {
            let mut stdout = String::new();
            let mut call_counter: u32 = 0;

            for step in plan.steps {
                match step {
                    PlanStep::Single { name, arguments } => {
                        call_counter += 1;
                        let call_id = format!("call_{call_counter}");
                        if event_tx
                            .send(SandboxEvent::ToolCall(ToolCallRequest {
                                call_id: call_id.clone(),
                                name,
                                arguments,
                            }))
                            .await
                            .is_err()
                        {
                            return;
                        }
                        match await_resume(&mut resume_rx, &call_id).await {
                            Some(value) => stdout.push_str(&format!("{value}\n")),
                            None => {
                                let _ = event_tx
                                    .send(SandboxEvent::Result(ExecutionResult {
                                        success: false,
                                        stdout,
                                        stderr: format!("no result injected for {call_id}"),
                                    }))
                                    .await;
                                return;
                            }
                        }
                    }
                    PlanStep::Batch { batch } => {
                        let mut requests = Vec::with_capacity(batch.len());
                        let mut call_ids = Vec::with_capacity(batch.len());
                        for call in batch {
                            call_counter += 1;
                            let call_id = format!("call_{call_counter}");
                            call_ids.push(call_id.clone());
                            requests.push(ToolCallRequest {
                                call_id,
                                name: call.name,
                                arguments: call.arguments,
                            });
                        }
                        if event_tx
                            .send(SandboxEvent::BatchToolCall(BatchToolCallRequest { requests }))
                            .await
                            .is_err()
                        {
                            return;
                        }
                        for call_id in call_ids {
                            match await_resume(&mut resume_rx, &call_id).await {
                                Some(value) => stdout.push_str(&format!("{value}\n")),
                                None => {
                                    let _ = event_tx
                                        .send(SandboxEvent::Result(ExecutionResult {
                                            success: false,
                                            stdout: stdout.clone(),
                                            stderr: format!("no result injected for {call_id}"),
                                        }))
                                        .await;
                                    return;
                                }
                            }
                        }
                    }
                }
            }

            let _ = event_tx
                .send(SandboxEvent::Result(ExecutionResult {
                    success: true,
                    stdout,
                    stderr: String::new(),
                }))
                .await;
        });

        Ok((event_rx, handle))
    }

    async fn inject_tool_error(&self, handle: &SandboxResumeHandle, call_id: &str, message: &str) {
        handle.resume_with_error(call_id, message).await;
    }

    fn is_image_available(&self) -> bool {
        true
    }

    async fn ensure_image_available(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

async fn await_resume(rx: &mut mpsc::Receiver<ResumeMessage>, expected_call_id: &str) -> Option<Value> {
    let timeout = Duration::from_secs(60);
    match tokio::time::timeout(timeout, rx.recv()).await {
        Ok(Some(ResumeMessage::ToolResult { call_id, value })) if call_id == expected_call_id => {
            Some(value)
        }
        Ok(Some(ResumeMessage::ToolError { call_id, message })) if call_id == expected_call_id => {
            Some(Value::String(format!("Error: {message}")))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn single_call_plan_yields_one_tool_call_then_result() {
        let sandbox = InMemorySandbox::new();
        let session = sandbox.create_session(&[]).await.unwrap();
        let code = serde_json::json!({
            "steps": [{"name": "get_weather", "arguments": {"city": "nyc"}}]
        })
        .to_string();
        let (mut events, handle) = sandbox.execute_code(&code, &session).await.unwrap();

        match events.recv().await.unwrap() {
            SandboxEvent::ToolCall(call) => {
                assert_eq!(call.name, "get_weather");
                handle
                    .resume_with_result(call.call_id, serde_json::json!("sunny"))
                    .await;
            }
            other => panic!("unexpected event: {other:?}"),
        }

        match events.recv().await.unwrap() {
            SandboxEvent::Result(result) => assert!(result.success),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn batch_step_yields_single_batch_event() {
        let sandbox = InMemorySandbox::new();
        let session = sandbox.create_session(&[]).await.unwrap();
        let code = serde_json::json!({
            "steps": [{"batch": [
                {"name": "a", "arguments": {}},
                {"name": "b", "arguments": {}}
            ]}]
        })
        .to_string();
        let (mut events, handle) = sandbox.execute_code(&code, &session).await.unwrap();

        let call_ids = match events.recv().await.unwrap() {
            SandboxEvent::BatchToolCall(batch) => {
                assert_eq!(batch.requests.len(), 2);
                batch.requests.iter().map(|r| r.call_id.clone()).collect::<Vec<_>>()
            }
            other => panic!("unexpected event: {other:?}"),
        };
        for id in call_ids {
            handle.resume_with_result(id, serde_json::json!("ok")).await;
        }
        match events.recv().await.unwrap() {
            SandboxEvent::Result(result) => assert!(result.success),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_plan_completes_immediately() {
        let sandbox = InMemorySandbox::new();
        let session = sandbox.create_session(&[]).await.unwrap();
        let (mut events, _handle) = sandbox.execute_code("{}", &session).await.unwrap();
        match events.recv().await.unwrap() {
            SandboxEvent::Result(result) => assert!(result.success),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}

//! PTC session state and the process-local session map (SPEC_FULL.md §4.6.2-
//! §4.6.3, §5 "Shared resources"/"Locking discipline").
//!
//! Sessions are held behind a `DashMap` so unrelated sessions never contend
//! on a shared lock; each entry additionally carries its own async mutex
//! because the orchestrator drives one session's state machine at a time
//! and genuinely needs to hold it across awaits (sandbox generator steps).

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use anthropic_protocol::messages::{Message, SystemContent, ThinkingConfig, Tool, ToolChoice};

use super::sandbox::{SandboxEvent, SandboxResumeHandle, SandboxSession};

/// State machine states per SPEC_FULL.md §4.6.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtcState {
    Idle,
    Running,
    WaitingTool,
    Finalizing,
    Abandoned,
}

/// A single outstanding tool call the session is waiting on.
#[derive(Debug, Clone)]
pub struct PendingToolCall {
    pub call_id: String,
    pub public_id: String,
    pub name: String,
}

/// Parameters taken verbatim from the turn that started this PTC session,
/// never from a later continuation request (SPEC_FULL.md §4.6.5).
#[derive(Debug, Clone)]
pub struct TurnSnapshot {
    pub system: Option<SystemContent>,
    pub model: String,
    pub resolved_model_id: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub stop_sequences: Option<Vec<String>>,
    pub tool_choice: Option<ToolChoice>,
    pub thinking: Option<ThinkingConfig>,
    pub beta_header: Option<String>,
    /// The original, un-prepared tool list, re-prepared via §4.6.1 on every
    /// continuation so edits to the PTC-callable set are picked up.
    pub tools: Vec<Tool>,
}

pub struct PtcExecutionState {
    pub session_id: String,
    pub code_execution_tool_id: String,
    pub state: PtcState,
    pub is_busy: bool,
    pub pending_tool_call: Option<PendingToolCall>,
    /// Full id list for an outstanding batch; `pending_tool_call` tracks
    /// only the first for state-machine purposes (SPEC_FULL.md §4.6.4).
    pub pending_batch_ids: Vec<String>,
    /// Every outstanding call in the current batch (length 1 for a single
    /// call), carrying the public id the client was handed so replies can
    /// be matched back to the sandbox's internal call id.
    pub pending_calls: Vec<PendingToolCall>,
    /// The raw backend message that contained the `execute_code` call this
    /// session is currently running, kept verbatim so its content, usage,
    /// and message id can be reused when building the WAITING_TOOL response
    /// and the eventual continuation request (SPEC_FULL.md §4.6.2, §4.6.5).
    pub pending_message: Option<Message>,
    pub original_execute_code_id: String,
    pub snapshot: TurnSnapshot,
    /// Live handles into the paused sandbox generator. `None` whenever the
    /// session is IDLE, FINALIZING, or ABANDONED.
    pub sandbox_session: Option<SandboxSession>,
    pub event_rx: Option<mpsc::Receiver<SandboxEvent>>,
    pub resume_handle: Option<SandboxResumeHandle>,
    pub created_at: Instant,
    pub last_active: Instant,
}

impl std::fmt::Debug for PtcExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtcExecutionState")
            .field("session_id", &self.session_id)
            .field("code_execution_tool_id", &self.code_execution_tool_id)
            .field("state", &self.state)
            .field("is_busy", &self.is_busy)
            .field("pending_tool_call", &self.pending_tool_call)
            .field("pending_batch_ids", &self.pending_batch_ids)
            .field("pending_calls", &self.pending_calls)
            .field("has_pending_message", &self.pending_message.is_some())
            .field("original_execute_code_id", &self.original_execute_code_id)
            .field("has_sandbox_session", &self.sandbox_session.is_some())
            .finish()
    }
}

impl PtcExecutionState {
    pub fn new(session_id: String, code_execution_tool_id: String, snapshot: TurnSnapshot) -> Self {
        let now = Instant::now();
        Self {
            session_id,
            code_execution_tool_id,
            state: PtcState::Idle,
            is_busy: false,
            pending_tool_call: None,
            pending_batch_ids: Vec::new(),
            pending_calls: Vec::new(),
            pending_message: None,
            original_execute_code_id: String::new(),
            snapshot,
            sandbox_session: None,
            event_rx: None,
            resume_handle: None,
            created_at: now,
            last_active: now,
        }
    }

    /// The reject-and-recreate predicate from SPEC_FULL.md §4.6.2: any of
    /// these set means a prior generator is still (or was left) live.
    pub fn must_be_recreated(&self) -> bool {
        self.is_busy || self.pending_tool_call.is_some() || self.state == PtcState::Running
    }

    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.last_active.elapsed() >= timeout
    }
}

/// Process-local map from container/session id to its PTC state, each
/// entry individually lockable.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<DashMap<String, Arc<Mutex<PtcExecutionState>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn insert(&self, state: PtcExecutionState) -> Arc<Mutex<PtcExecutionState>> {
        let id = state.session_id.clone();
        let handle = Arc::new(Mutex::new(state));
        self.sessions.insert(id, handle.clone());
        handle
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Mutex<PtcExecutionState>>> {
        self.sessions.get(session_id).map(|entry| entry.clone())
    }

    pub fn remove(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    /// Removes every session whose last activity exceeds `timeout`. Safe to
    /// call concurrently with normal session traffic: each entry is only
    /// ever touched by its owning request, so a sweep racing an active
    /// session simply loses the race on `try_lock` and skips it this pass.
    pub async fn sweep_expired(&self, timeout: Duration) -> usize {
        let mut expired = Vec::new();
        for entry in self.sessions.iter() {
            if let Ok(guard) = entry.value().try_lock() {
                if guard.is_expired(timeout) {
                    expired.push(entry.key().clone());
                }
            }
        }
        for id in &expired {
            self.sessions.remove(id);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "swept expired PTC sessions");
        }
        expired.len()
    }

    /// Number of sessions currently tracked, for `/health/ptc` (SPEC_FULL.md §6).
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Up to `limit` session ids, for `/health/ptc`'s diagnostic sample.
    pub fn sample_ids(&self, limit: usize) -> Vec<String> {
        self.sessions.iter().take(limit).map(|entry| entry.key().clone()).collect()
    }

    /// Spawns the background sweeper task described in SPEC_FULL.md §5.
    pub fn spawn_sweeper(self, timeout: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(timeout.min(Duration::from_secs(30)).max(Duration::from_secs(1)));
            loop {
                interval.tick().await;
                self.sweep_expired(timeout).await;
            }
        })
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

pub fn new_session_id() -> String {
    format!("session_{}", uuid::Uuid::new_v4().simple())
}

/// `srvtoolu_<12 lowercase hex chars>`, per SPEC_FULL.md §4.6.2. Sourced
/// from a fresh UUID rather than a dedicated RNG dependency — its simple
/// form is already 32 lowercase hex characters, of which the first 12 are
/// used.
pub fn new_code_execution_tool_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("srvtoolu_{}", &hex[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> TurnSnapshot {
        TurnSnapshot {
            system: None,
            model: "claude-sonnet-4-5-20250929".to_string(),
            resolved_model_id: "us.anthropic.claude-sonnet-4-5-20250929-v1:0".to_string(),
            max_tokens: 16,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            tool_choice: None,
            thinking: None,
            beta_header: None,
            tools: Vec::new(),
        }
    }

    #[test]
    fn new_session_starts_idle_and_not_busy() {
        let state = PtcExecutionState::new("s1".to_string(), "srvtoolu_abc".to_string(), snapshot());
        assert_eq!(state.state, PtcState::Idle);
        assert!(!state.must_be_recreated());
    }

    #[test]
    fn busy_session_must_be_recreated() {
        let mut state = PtcExecutionState::new("s1".to_string(), "srvtoolu_abc".to_string(), snapshot());
        state.is_busy = true;
        assert!(state.must_be_recreated());
    }

    #[tokio::test]
    async fn store_insert_then_get_round_trips() {
        let store = SessionStore::new();
        store.insert(PtcExecutionState::new(
            "s1".to_string(),
            "srvtoolu_abc".to_string(),
            snapshot(),
        ));
        assert!(store.get("s1").is_some());
        store.remove("s1");
        assert!(store.get("s1").is_none());
    }

    #[test]
    fn code_execution_tool_id_has_expected_shape() {
        let id = new_code_execution_tool_id();
        assert!(id.starts_with("srvtoolu_"));
        assert_eq!(id.len(), "srvtoolu_".len() + 12);
    }
}

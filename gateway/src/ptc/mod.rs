//! Programmatic Tool Calling: classification, synthesized tooling, session
//! state, the sandbox executor contract, and the orchestrating state machine
//! (SPEC_FULL.md §4.5-§4.7).

pub mod classifier;
pub mod orchestrator;
pub mod sandbox;
pub mod session;
pub mod system_prompt;

pub use classifier::{is_ptc_request, partition_tools, ToolPartition};
pub use orchestrator::{PtcOrchestrator, PtcTurnOutcome};
pub use sandbox::{InMemorySandbox, SandboxExecutor};
pub use session::{PtcExecutionState, PtcState, SessionStore};

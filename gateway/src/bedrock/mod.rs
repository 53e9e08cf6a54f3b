//! Bedrock-facing translation layer: request/response conversion, beta-header
//! handling, token estimation, and the async invocation bridge (SPEC_FULL.md §4).

pub mod beta_headers;
pub mod convert_request;
pub mod convert_response;
pub mod converse_bridge;
pub mod invoker;
pub mod tokens;

pub use convert_request::{
    build_count_tokens_request, is_anthropic_family, prepare_request, resolve_model_id, BackendShape,
    PreparedRequest,
};
pub use invoker::{BackendResponse, BedrockInvoker};

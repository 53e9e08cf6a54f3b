//! Wire types shared between the Anthropic-compatible HTTP surface and the
//! Bedrock backend it translates to.

pub mod bedrock;
pub mod messages;
pub mod validated;

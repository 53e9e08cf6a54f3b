//! Beta-header mapping tables and the expansion rule described in
//! SPEC_FULL.md §4.1. Default table contents are grounded on the original
//! configuration surface (SPEC_FULL.md §6a).

use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};

pub static BETA_HEADER_MAPPING: Lazy<HashMap<&'static str, Vec<&'static str>>> = Lazy::new(|| {
    let mut map = HashMap::new();
    map.insert(
        "advanced-tool-use-2025-11-20",
        vec!["tool-examples-2025-10-29", "tool-search-tool-2025-10-19"],
    );
    map
});

pub static BETA_HEADERS_PASSTHROUGH: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "fine-grained-tool-streaming-2025-05-14",
        "interleaved-thinking-2025-05-14",
        "context-management-2025-06-27",
        "compact-2026-01-12",
    ]
    .into_iter()
    .collect()
});

pub static BETA_HEADERS_BLOCKLIST: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["prompt-caching-scope-2026-01-05"].into_iter().collect());

pub static BETA_HEADERS_REQUIRING_INVOKE_MODEL: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["tool-examples-2025-10-29", "tool-search-tool-2025-10-19"]
        .into_iter()
        .collect()
});

pub static BETA_HEADER_SUPPORTED_MODELS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "us.anthropic.claude-opus-4-5-20251101-v1:0",
        "us.anthropic.claude-opus-4-1-20250805-v1:0",
        "us.anthropic.claude-sonnet-4-5-20250929-v1:0",
        "us.anthropic.claude-haiku-4-5-20251001-v1:0",
    ]
    .into_iter()
    .collect()
});

/// The PTC feature's own beta flag, distinguished from the general mapping
/// table because it gates tool classification (SPEC_FULL.md §4.5), not just
/// a header rewrite.
pub const PTC_BETA_HEADER: &str = "advanced-tool-use-2025-11-20";

/// Expand a client-supplied comma-separated `anthropic-beta` header into the
/// backend-facing value list, and report whether any resulting value forces
/// native (InvokeModel) shape.
pub fn expand_beta_header(raw: &str, resolved_model_id: &str) -> (Vec<String>, bool) {
    let supported = BETA_HEADER_SUPPORTED_MODELS.contains(resolved_model_id);

    let mut out = Vec::new();
    let mut requires_invoke_model = false;

    for value in raw.split(',').map(str::trim).filter(|v| !v.is_empty()) {
        if !supported {
            out.push(value.to_string());
            continue;
        }

        if BETA_HEADERS_BLOCKLIST.contains(value) {
            continue;
        }

        if let Some(expansion) = BETA_HEADER_MAPPING.get(value) {
            for mapped in expansion {
                if BETA_HEADERS_REQUIRING_INVOKE_MODEL.contains(mapped) {
                    requires_invoke_model = true;
                }
                out.push((*mapped).to_string());
            }
            continue;
        }

        if BETA_HEADERS_PASSTHROUGH.contains(value) {
            out.push(value.to_string());
            continue;
        }

        // Unknown value: forward unchanged.
        out.push(value.to_string());
    }

    (out, requires_invoke_model)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUPPORTED_MODEL: &str = "us.anthropic.claude-opus-4-5-20251101-v1:0";

    #[test]
    fn expands_mapped_value_for_supported_model() {
        let (expanded, requires_invoke_model) =
            expand_beta_header(PTC_BETA_HEADER, SUPPORTED_MODEL);
        assert_eq!(
            expanded,
            vec!["tool-examples-2025-10-29", "tool-search-tool-2025-10-19"]
        );
        assert!(requires_invoke_model);
    }

    #[test]
    fn passthrough_value_is_forwarded_unchanged() {
        let (expanded, requires_invoke_model) =
            expand_beta_header("interleaved-thinking-2025-05-14", SUPPORTED_MODEL);
        assert_eq!(expanded, vec!["interleaved-thinking-2025-05-14"]);
        assert!(!requires_invoke_model);
    }

    #[test]
    fn blocklisted_value_is_dropped() {
        let (expanded, _) = expand_beta_header("prompt-caching-scope-2026-01-05", SUPPORTED_MODEL);
        assert!(expanded.is_empty());
    }

    #[test]
    fn unsupported_model_forwards_everything_unchanged_without_table_lookup() {
        let (expanded, requires_invoke_model) =
            expand_beta_header(PTC_BETA_HEADER, "some-other-model");
        assert_eq!(expanded, vec![PTC_BETA_HEADER]);
        assert!(!requires_invoke_model);
    }

    #[test]
    fn multiple_values_are_all_processed() {
        let (expanded, _) = expand_beta_header(
            &format!("{PTC_BETA_HEADER}, interleaved-thinking-2025-05-14"),
            SUPPORTED_MODEL,
        );
        assert_eq!(expanded.len(), 3);
        assert!(expanded.contains(&"interleaved-thinking-2025-05-14".to_string()));
    }
}

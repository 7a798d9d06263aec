//! Backend identity redaction
//!
//! Any string destined for a response, a log line, or a run record passes
//! through this filter first. It replaces every registered sensitive token
//! (target ids, endpoint URLs, endpoint hosts) with `[backend]`, matching
//! case-insensitively.

use tollgate_shared::ExecutionTarget;

const PLACEHOLDER: &str = "[backend]";

/// Pattern-based substring redaction over a fixed token set
#[derive(Debug, Clone, Default)]
pub struct RedactionFilter {
    /// ASCII-lowercased tokens, longest first so full URLs win over their
    /// host substrings
    tokens: Vec<String>,
}

impl RedactionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the identifying tokens of an operation's target list
    pub fn for_targets(targets: &[ExecutionTarget]) -> Self {
        let mut filter = Self::new();
        for target in targets {
            filter.register(&target.id);
            filter.register(&target.endpoint);
            if let Some(host) = host_of(&target.endpoint) {
                filter.register(host);
            }
        }
        filter
    }

    pub fn register(&mut self, token: &str) {
        let token = token.trim().to_ascii_lowercase();
        if token.is_empty() || self.tokens.contains(&token) {
            return;
        }
        self.tokens.push(token);
        self.tokens.sort_by_key(|t| std::cmp::Reverse(t.len()));
    }

    /// Replace every occurrence of every registered token
    pub fn redact(&self, input: &str) -> String {
        let mut out = input.to_string();
        for token in &self.tokens {
            out = replace_ignore_ascii_case(&out, token, PLACEHOLDER);
        }
        out
    }
}

/// Host portion of an endpoint URL, without scheme, port, or path
fn host_of(endpoint: &str) -> Option<&str> {
    let rest = endpoint
        .split_once("://")
        .map_or(endpoint, |(_, rest)| rest);
    let host = rest.split(['/', '?']).next()?;
    let host = host.rsplit('@').next()?;
    let host = host.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Substring replacement over the ASCII-lowercased haystack. Byte offsets in
/// the lowered copy line up with the original because ASCII lowering never
/// changes lengths.
fn replace_ignore_ascii_case(haystack: &str, needle_lower: &str, replacement: &str) -> String {
    if needle_lower.is_empty() {
        return haystack.to_string();
    }
    let lower = haystack.to_ascii_lowercase();
    let mut result = String::with_capacity(haystack.len());
    let mut rest = 0;
    let mut from = 0;
    while let Some(pos) = lower[from..].find(needle_lower) {
        let start = from + pos;
        result.push_str(&haystack[rest..start]);
        result.push_str(replacement);
        rest = start + needle_lower.len();
        from = rest;
    }
    result.push_str(&haystack[rest..]);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: &str, endpoint: &str) -> ExecutionTarget {
        ExecutionTarget {
            id: id.to_string(),
            endpoint: endpoint.to_string(),
        }
    }

    #[test]
    fn test_redacts_target_id_and_host() {
        let filter = RedactionFilter::for_targets(&[target(
            "openai-gpt4",
            "https://api.openai.example.com/v1/chat",
        )]);

        let redacted = filter.redact(
            "request to https://api.openai.example.com/v1/chat via openai-gpt4 failed",
        );
        assert!(!redacted.contains("openai-gpt4"));
        assert!(!redacted.contains("api.openai.example.com"));
        assert!(redacted.contains(PLACEHOLDER));
    }

    #[test]
    fn test_redaction_is_case_insensitive() {
        let filter = RedactionFilter::for_targets(&[target("Anthropic-Main", "https://Claude.Example.com")]);

        let redacted = filter.redact("ANTHROPIC-MAIN at claude.example.com");
        assert!(!redacted.to_ascii_lowercase().contains("anthropic-main"));
        assert!(!redacted.to_ascii_lowercase().contains("claude.example.com"));
    }

    #[test]
    fn test_host_extraction() {
        assert_eq!(
            host_of("https://api.example.com:8443/v1/run?x=1"),
            Some("api.example.com")
        );
        assert_eq!(host_of("api.example.com/v1"), Some("api.example.com"));
        assert_eq!(host_of("https://"), None);
    }

    #[test]
    fn test_untouched_strings_pass_through() {
        let filter = RedactionFilter::for_targets(&[target("t1", "https://one.example.com")]);
        assert_eq!(filter.redact("timeout after 30s"), "timeout after 30s");
    }

    #[test]
    fn test_redaction_survives_non_ascii_payloads() {
        let mut filter = RedactionFilter::new();
        filter.register("backend-a");
        let redacted = filter.redact("résumé für backend-a fertig");
        assert!(!redacted.contains("backend-a"));
        assert!(redacted.contains("résumé"));
    }
}

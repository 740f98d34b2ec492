//! Shared utilities for use cases.
//!
//! Secret redaction for diagnostic logs and output truncation for results.

use regex::Regex;
use std::sync::LazyLock;

static SECRET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"sk-ant-[A-Za-z0-9_-]+",
        r"|sk-[A-Za-z0-9_-]{20,}",
        r"|AIza[A-Za-z0-9_-]{20,}",
        r"|ghp_[A-Za-z0-9]{36,}",
        r"|glpat-[A-Za-z0-9_-]{20,}",
        r"|xox[bpsa]-[A-Za-z0-9-]{10,}",
        r"|AKIA[0-9A-Z]{16}",
        r"|(?i:bearer)\s+[A-Za-z0-9._~+/-]{16,}=*",
    ))
    .expect("secret pattern is a valid regex")
});

/// Replace anything that looks like an API key or bearer token.
pub(crate) fn redact_secrets(text: &str) -> String {
    SECRET_RE.replace_all(text, "[REDACTED]").into_owned()
}

pub(crate) const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// Cut `output` to at most `max_bytes` on a char boundary, appending a marker.
pub(crate) fn truncate_output(mut output: String, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output;
    }
    let mut cut = max_bytes;
    while !output.is_char_boundary(cut) {
        cut -= 1;
    }
    output.truncate(cut);
    output.push_str(TRUNCATION_MARKER);
    output
}

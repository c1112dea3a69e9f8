//! Helpers for sanitizing data before it enters tracing span attributes.
//!
//! Upload paths embed project and user identifiers, so spans only carry the
//! file name, and prompts are truncated before they are logged.

use std::path::Path;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Truncates a user prompt to at most `max_chars` characters for logging.
///
/// Cuts on a character boundary and appends `...` when anything was removed.
pub fn truncate_prompt(prompt: &str, max_chars: usize) -> String {
    let mut chars = prompt.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

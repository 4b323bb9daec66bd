//! Turning raw compiler output into bounded, caller-safe failure text.
//!
//! Compiler logs can be megabytes long and mention the scratch directory on
//! nearly every line. Everything that leaves this module is scrubbed of the
//! workspace path and cut to a fixed size.

use crate::pipeline::preprocess::Correction;
use std::path::Path;

/// Upper bound on [`crate::FailureRecord::diagnostic_excerpt`], in chars.
pub const MAX_EXCERPT_CHARS: usize = 2000;
/// Marker lines quoted in a failure message.
pub const MAX_MESSAGE_LINES: usize = 3;
/// Fallback message length when no marker line is found.
pub const MESSAGE_PREFIX_CHARS: usize = 500;
/// Bytes of each output stream kept from a compiler process (tail end).
pub const MAX_CAPTURE_BYTES: usize = 256 * 1024;

const TRUNCATION_MARK: &str = "\n[... truncated]";

/// Decode a captured stream, keeping at most the last [`MAX_CAPTURE_BYTES`].
pub fn bounded_capture(bytes: &[u8]) -> String {
    let start = bytes.len().saturating_sub(MAX_CAPTURE_BYTES);
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}

/// Replace every occurrence of the workspace path with `.`.
pub fn scrub(text: &str, workspace: &Path) -> String {
    let ws = workspace.to_string_lossy();
    if ws.is_empty() {
        return text.to_string();
    }
    text.replace(ws.as_ref(), ".")
}

/// First `max` chars of `text`.
pub fn prefix_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_MARK),
        None => text.to_string(),
    }
}

/// Last `max` chars of `text`.
pub fn suffix_chars(text: &str, max: usize) -> String {
    let total = text.chars().count();
    if total <= max {
        return text.to_string();
    }
    match text.char_indices().nth(total - max) {
        Some((cut, _)) => format!("[truncated ...]\n{}", &text[cut..]),
        None => text.to_string(),
    }
}

fn is_marker(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with('!')
        || trimmed.contains("error:")
        || trimmed.contains("Undefined control sequence")
        || trimmed.contains("Missing")
}

/// Up to [`MAX_MESSAGE_LINES`] lines carrying an error marker.
pub fn marker_lines(text: &str) -> Vec<&str> {
    text.lines()
        .filter(|l| is_marker(l))
        .map(str::trim)
        .take(MAX_MESSAGE_LINES)
        .collect()
}

/// Short failure message: marker lines if any, else a bounded prefix.
pub fn summarize(text: &str) -> String {
    let markers = marker_lines(text);
    if !markers.is_empty() {
        return markers.join("\n");
    }
    let trimmed = text.trim();
    if trimmed.is_empty() {
        "Compiler produced no diagnostic output".to_string()
    } else {
        prefix_chars(trimmed, MESSAGE_PREFIX_CHARS)
    }
}

/// Append preprocessing corrections so a reader can tell which edits were
/// made before the compiler saw the source.
pub fn with_hints(excerpt: String, corrections: &[Correction]) -> String {
    if corrections.is_empty() {
        return excerpt;
    }
    let mut out = excerpt;
    out.push_str("\n\nAutomatic fixes applied before compiling:");
    for c in corrections {
        out.push_str("\n- ");
        out.push_str(&c.description);
    }
    out
}

//! Helpers for keeping untrusted text out of paths, logs and filter graphs.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

/// Returns only the filename component of a path (no directory).
///
/// Safe for span fields: reveals the file name without exposing the full path.
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Returns a short deterministic hash of a path for correlation without
/// exposing the actual path.
pub fn hash_path(path: &Path) -> String {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Longest user id accepted by [`is_safe_identifier`].
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// True when `id` may name a per-user cache directory.
///
/// Accepts ASCII letters, digits, `-` and `_`; nothing that could act as a
/// path separator or traversal.
pub fn is_safe_identifier(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_IDENTIFIER_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Reduces a label to characters that survive ffmpeg filter-graph parsing
/// unquoted. Anything else becomes `_`.
pub fn overlay_text(label: &str) -> String {
    label
        .chars()
        .map(|c| match c {
            c if c.is_ascii_alphanumeric() => c,
            ' ' | '@' | '.' | '-' | '_' | '+' | '(' | ')' => c,
            _ => '_',
        })
        .collect()
}

//! Utility functions shared across the scheduling engine: hashing, simple
//! validation, and formatting helpers used by both the `engine` and `query`
//! crates.

use base64::{engine::general_purpose::STANDARD as B64_STANDARD, Engine as _};
use blake3::Hasher;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Calculate BLAKE3 checksum of concatenated configuration text, used by
/// the engine's config reload check to detect on-disk changes without
/// re-parsing TOML on every tick.
pub fn calculate_checksum(parts: &[&str]) -> String {
    let mut hasher = Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// Calculate BLAKE3 checksum of a single string.
pub fn calculate_string_checksum(content: &str) -> String {
    calculate_checksum(&[content])
}

/// Calculate BLAKE3 checksum of file contents.
pub fn calculate_file_checksum<P: AsRef<Path>>(file_path: P) -> crate::Result<String> {
    let content = fs::read_to_string(file_path)?;
    Ok(calculate_string_checksum(&content))
}

/// Validate a workflow, task, or namespace name: non-empty, alphanumeric
/// plus `-`/`_`/`.`, reasonable length.
pub fn validate_identifier(kind: &str, value: &str) -> crate::Result<()> {
    if value.is_empty() {
        anyhow::bail!("{} cannot be empty", kind);
    }
    if value.len() > 255 {
        anyhow::bail!("{} cannot be longer than 255 characters", kind);
    }
    if !value.chars().all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.')) {
        anyhow::bail!(
            "{} can only contain alphanumeric characters, hyphens, underscores, and dots",
            kind
        );
    }
    Ok(())
}

/// Get current Unix timestamp in seconds.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Get current Unix timestamp in milliseconds.
pub fn current_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Encode a string to base64, used for opaque tokens (the contact file's
/// authentication key).
pub fn encode_base64(content: &str) -> String {
    B64_STANDARD.encode(content)
}

/// Decode a base64 string.
pub fn decode_base64(encoded: &str) -> crate::Result<String> {
    let decoded_bytes = B64_STANDARD
        .decode(encoded)
        .map_err(|e| anyhow::anyhow!("invalid base64 sequence: {}", e))?;
    String::from_utf8(decoded_bytes).map_err(|e| anyhow::anyhow!("invalid UTF-8 in base64 decoded data: {}", e))
}

/// Sanitize a relative file path (job log paths built from task name and
/// cycle point) to prevent directory traversal.
pub fn sanitize_file_path(path: &str) -> crate::Result<String> {
    if path.contains("..") || path.starts_with('/') {
        anyhow::bail!("invalid file path: directory traversal not allowed");
    }
    Ok(path.replace('\\', "/"))
}

/// Format a duration in human-readable form, used in state-summary text and
/// log messages.
pub fn format_duration(duration_ms: f64) -> String {
    if duration_ms < 1000.0 {
        format!("{:.1}ms", duration_ms)
    } else if duration_ms < 60_000.0 {
        format!("{:.1}s", duration_ms / 1000.0)
    } else {
        format!("{:.1}m", duration_ms / 60_000.0)
    }
}

/// Calculate exponential backoff delay for retries not governed by an
/// explicit configured retry-delay list.
pub fn calculate_backoff_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    let delay = base_delay_ms * 2_u64.pow(attempt.min(10));
    delay.min(max_delay_ms)
}

/// Truncate a string to a maximum length with an ellipsis, used to keep job
/// stderr/stdout excerpts bounded in summary output.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        format!("{}...", &s[..max_len - 3])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_changes_with_content() {
        let a = calculate_string_checksum("one");
        let b = calculate_string_checksum("two");
        assert_ne!(a, b);
        assert_eq!(a, calculate_string_checksum("one"));
    }

    #[test]
    fn validate_identifier_rejects_bad_chars() {
        assert!(validate_identifier("task name", "foo bar").is_err());
        assert!(validate_identifier("task name", "foo-bar_1.2").is_ok());
    }

    #[test]
    fn sanitize_rejects_traversal() {
        assert!(sanitize_file_path("../etc/passwd").is_err());
        assert!(sanitize_file_path("log/job/1/foo").is_ok());
    }

    #[test]
    fn backoff_caps_at_max() {
        assert_eq!(calculate_backoff_delay(20, 100, 5000), 5000);
    }
}

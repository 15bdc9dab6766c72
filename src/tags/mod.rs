pub mod operations;

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::error::{Result, VaultError};

/// Characters rejected in user-supplied tags
static FORBIDDEN_RAW: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[,<>/?'"`]"#).unwrap());

/// Characters rejected in stored (normalized) tags. Backtick is tolerated here.
static FORBIDDEN_NORMALIZED: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[,<>/?'"]"#).unwrap());

/// Canonical form of a tag: trimmed and lower-cased.
pub fn normalize(tag: &str) -> String {
    tag.trim().to_lowercase()
}

/// Validate a tag as the user typed it. Returns the tag unchanged.
pub fn validate_raw(tag: &str) -> Result<&str> {
    if tag.trim().is_empty() {
        return Err(VaultError::validation("validate_tag", "Tag cannot be empty")
            .with_context("tag", tag));
    }
    if FORBIDDEN_RAW.is_match(tag) {
        return Err(VaultError::validation(
            "validate_tag",
            format!("Tag contains forbidden characters: {}", tag),
        )
        .with_context("tag", tag)
        .with_context("forbidden", ", < > / ? ' \" `"));
    }
    Ok(tag)
}

/// Sanity gate for a tag that has already been normalized.
pub fn validate_normalized(tag: &str) -> bool {
    !tag.is_empty() && !FORBIDDEN_NORMALIZED.is_match(tag)
}

/// Normalize every tag, drop the ones that normalize to nothing, and keep the
/// first occurrence of each duplicate.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut result = Vec::new();
    for tag in tags {
        let normalized = normalize(tag.as_ref());
        if normalized.is_empty() {
            continue;
        }
        if seen.insert(normalized.clone()) {
            result.push(normalized);
        }
    }
    result
}

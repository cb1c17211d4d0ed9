//! Input validation for configuration values and CLI arguments
//!
//! Rejects keyword lists, naming templates and paths that would misbehave
//! at runtime, so problems surface at startup instead of per file.

use anyhow::{bail, Result};

use crate::transfer::naming::PLACEHOLDERS;

/// Validate exclude keyword regexes
///
/// Ensures keywords compile and stay within reasonable limits.
pub fn validate_exclude_keywords(keywords: &[String]) -> Result<()> {
    const MAX_KEYWORDS: usize = 100;
    const MAX_KEYWORD_LENGTH: usize = 255;

    if keywords.len() > MAX_KEYWORDS {
        bail!(
            "Too many exclude keywords: {} (max: {})",
            keywords.len(),
            MAX_KEYWORDS
        );
    }

    for keyword in keywords {
        let trimmed = keyword.trim();

        if trimmed.is_empty() {
            continue;
        }

        if trimmed.len() > MAX_KEYWORD_LENGTH {
            bail!(
                "Keyword too long: '{}' ({} chars, max: {})",
                trimmed.chars().take(20).collect::<String>(),
                trimmed.len(),
                MAX_KEYWORD_LENGTH
            );
        }

        if trimmed.contains('\0') || trimmed.contains('\n') || trimmed.contains('\r') {
            bail!("Keyword contains control characters");
        }

        regex::Regex::new(trimmed)
            .map_err(|e| anyhow::anyhow!("Invalid keyword regex '{}': {}", trimmed, e))?;
    }

    Ok(())
}

/// Validate a naming template
///
/// Every `{placeholder}` must be one the renderer knows and braces must balance.
pub fn validate_rename_format(template: &str) -> Result<()> {
    if template.trim().is_empty() {
        bail!("Rename format cannot be empty");
    }

    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            bail!("Unclosed placeholder in rename format: '{}'", template);
        };
        let name = &after[..close];
        if !PLACEHOLDERS.contains(&name) {
            bail!(
                "Unknown placeholder '{{{}}}' (expected one of: {})",
                name,
                PLACEHOLDERS.join(", ")
            );
        }
        rest = &after[close + 1..];
    }

    if rest.contains('}') {
        bail!("Unbalanced '}}' in rename format: '{}'", template);
    }

    Ok(())
}

/// Validate and sanitize path arguments
pub fn validate_path_argument(path: &str) -> Result<()> {
    // Length check
    if path.len() > 4096 {
        bail!("Path too long: {} bytes (max: 4096)", path.len());
    }

    // Null byte check
    if path.contains('\0') {
        bail!("Path contains null byte");
    }

    // Check for shell metacharacters that could be dangerous
    if path.contains('|')
        || path.contains('&')
        || path.contains(';')
        || path.contains('$')
        || path.contains('`')
        || path.contains('\n')
    {
        bail!("Path contains shell metacharacters");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_exclude_keywords_valid() {
        let keywords = vec![
            "sample".to_string(),
            r"\.part$".to_string(),
            "(?i)trailer".to_string(),
        ];
        assert!(validate_exclude_keywords(&keywords).is_ok());
    }

    #[test]
    fn test_validate_exclude_keywords_too_many() {
        let keywords: Vec<String> = (0..101).map(|i| format!("keyword_{}", i)).collect();
        assert!(validate_exclude_keywords(&keywords).is_err());
    }

    #[test]
    fn test_validate_exclude_keywords_bad_regex() {
        let keywords = vec!["[unclosed".to_string()];
        let result = validate_exclude_keywords(&keywords);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Invalid keyword regex"));
    }

    #[test]
    fn test_validate_exclude_keywords_null_byte() {
        let keywords = vec!["test\0file".to_string()];
        assert!(validate_exclude_keywords(&keywords).is_err());
    }

    #[test]
    fn test_validate_exclude_keywords_empty() {
        let keywords = vec!["".to_string(), "  ".to_string()];
        assert!(validate_exclude_keywords(&keywords).is_ok()); // Empty keywords are skipped
    }

    #[test]
    fn test_validate_rename_format() {
        assert!(validate_rename_format("{actor}/{year} {title}/{code}{subtitle}{fileExt}").is_ok());
        assert!(validate_rename_format("{code}{fileExt}").is_ok());
        assert!(validate_rename_format("{code}{bitrate}").is_err());
        assert!(validate_rename_format("{code").is_err());
        assert!(validate_rename_format("code}").is_err());
        assert!(validate_rename_format("  ").is_err());
    }

    #[test]
    fn test_validate_path_argument_valid() {
        assert!(validate_path_argument("/downloads/ABC-123.mp4").is_ok());
        assert!(validate_path_argument("/mnt/share/media").is_ok());
    }

    #[test]
    fn test_validate_path_argument_invalid() {
        assert!(validate_path_argument("/path\0with\0null").is_err());
        assert!(validate_path_argument("/path | rm -rf /").is_err());
        assert!(validate_path_argument("/path; echo bad").is_err());
        assert!(validate_path_argument("/path`whoami`").is_err());
        assert!(validate_path_argument("/path$HOME").is_err());
    }

    #[test]
    fn test_validate_path_argument_too_long() {
        let long_path = "/".repeat(5000);
        assert!(validate_path_argument(&long_path).is_err());
    }
}

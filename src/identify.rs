//! Content identifier extraction from file and directory names.
//!
//! Names are uppercased and stripped of release noise, then run through an
//! ordered rule table; the first rule that matches produces the identifier.
//! Vendor-specific rules sit ahead of the two generic ones so a name matching
//! both always yields the vendor form.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Tokens removed before matching (resolution tags, release-group markers).
const NOISE_TOKENS: &[&str] = &["SIS001", "1080P", "720P", "2160P"];

/// Marker the release groups put in names of subtitled releases.
const SUBTITLE_MARKER: &str = "字幕";

static SUBTITLE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-[cC](?:$|[^A-Za-z0-9])").expect("subtitle suffix regex should compile")
});

/// One entry of the identification cascade.
pub struct IdentifierRule {
    pub name: &'static str,
    pub pattern: Regex,
    pub normalize: fn(&str) -> String,
}

impl IdentifierRule {
    fn new(name: &'static str, pattern: &str, normalize: fn(&str) -> String) -> Self {
        Self {
            name,
            pattern: Regex::new(pattern).expect("identifier rule should compile"),
            normalize,
        }
    }

    /// Applies the rule to an already uppercased, de-noised name.
    pub fn apply(&self, name: &str) -> Option<String> {
        self.pattern
            .find(name)
            .map(|m| dash_separators(&(self.normalize)(m.as_str())))
    }
}

fn dash_separators(code: &str) -> String {
    code.replace('_', "-")
}

fn keep(code: &str) -> String {
    code.to_string()
}

fn strip_vendor_prefix(code: &str) -> String {
    // "1PONDO_123456_789" and "CARIB-123456-789" are catalogued by date code only
    code.split_once(['-', '_'])
        .map(|(_, rest)| rest.to_string())
        .unwrap_or_else(|| code.to_string())
}

fn heyzo(code: &str) -> String {
    let digits = code.trim_start_matches("HEYZO").trim_start_matches(['-', '_']);
    format!("HEYZO-{digits}")
}

/// The ordered cascade. Vendor rules first, generic rules last.
pub static RULES: LazyLock<Vec<IdentifierRule>> = LazyLock::new(|| {
    vec![
        IdentifierRule::new("t28", r"T28[-_]\d{3,4}", keep),
        IdentifierRule::new("1pondo", r"1PONDO[-_]\d{6}[-_]\d{2,4}", strip_vendor_prefix),
        IdentifierRule::new("heyzo", r"HEYZO[-_]?\d{4}", heyzo),
        IdentifierRule::new("carib", r"CARIB[-_]\d{6}[-_]\d{3}", strip_vendor_prefix),
        IdentifierRule::new("tokyo-hot", r"N[-_]\d{4}", keep),
        IdentifierRule::new("jukujo", r"JUKUJO[-_]\d{4}", keep),
        IdentifierRule::new("generic-alpha", r"[A-Z]{2,5}[-_]\d{3,5}", keep),
        IdentifierRule::new("generic-date", r"\d{6}[-_]\d{2,4}", keep),
    ]
});

/// Uppercases the final path segment and removes noise tokens.
fn normalize_name(name: &str) -> String {
    let name = name.trim_end_matches('/');
    let base = name.rsplit('/').next().unwrap_or(name);
    let mut upper = base.to_uppercase();
    for token in NOISE_TOKENS {
        upper = upper.replace(token, "");
    }
    upper
}

/// Extracts the canonical identifier and the subtitle flag from a name.
pub fn identify(name: &str) -> (Option<String>, bool) {
    let normalized = normalize_name(name);
    let identifier = RULES.iter().find_map(|rule| rule.apply(&normalized));
    (identifier, has_subtitle_marker(name))
}

/// Subtitle markers are checked against the original, non-uppercased name.
pub fn has_subtitle_marker(name: &str) -> bool {
    name.contains(SUBTITLE_MARKER) || SUBTITLE_SUFFIX.is_match(name)
}

/// What identification learned about one file or directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifiedMeta {
    pub identifier: Option<String>,
    pub is_file: bool,
    pub subtitle: bool,
    pub display_title: String,
    pub source_path: PathBuf,
}

impl IdentifiedMeta {
    pub fn from_name(name: &str, source_path: &Path) -> Self {
        let (identifier, subtitle) = identify(name);
        Self {
            identifier,
            is_file: false,
            subtitle,
            display_title: name.to_string(),
            source_path: source_path.to_path_buf(),
        }
    }

    /// Fills fields that are absent here from `other`; present fields win.
    pub fn merge(&mut self, other: &IdentifiedMeta) {
        if self.identifier.is_none() {
            self.identifier = other.identifier.clone();
        }
        if !self.subtitle {
            self.subtitle = other.subtitle;
        }
        if self.display_title.is_empty() {
            self.display_title = other.display_title.clone();
        }
    }

    pub fn code(&self) -> Option<&str> {
        self.identifier.as_deref()
    }
}

/// Identifies a path from its stem, falling back to the parent directory name.
pub fn identify_path(path: &Path) -> IdentifiedMeta {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut meta = IdentifiedMeta::from_name(&stem, path);
    meta.is_file = path.is_file();

    if let Some(parent) = path.parent().and_then(Path::file_name) {
        let parent_meta = IdentifiedMeta::from_name(&parent.to_string_lossy(), path);
        meta.merge(&parent_meta);
    }
    meta
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify_strips_resolution_noise() {
        assert_eq!(
            identify("IPX-001 1080P.mp4"),
            (Some("IPX-001".to_string()), false)
        );
    }

    #[test]
    fn test_identify_subtitle_suffix() {
        assert_eq!(
            identify("IPX-001-C.mp4"),
            (Some("IPX-001".to_string()), true)
        );
        assert_eq!(identify("ipx-001-c"), (Some("IPX-001".to_string()), true));
        assert!(identify("[中文字幕] SSIS-123.mkv").1);
        // "-CD1" is a part marker, not a subtitle marker
        assert!(!identify("ABP-123-CD1.mkv").1);
    }

    #[test]
    fn test_identify_underscore_becomes_dash() {
        assert_eq!(identify("abp_1234.mkv").0.as_deref(), Some("ABP-1234"));
    }

    #[test]
    fn test_vendor_rules_win_over_generic() {
        // CARIB-12345 would satisfy the generic alpha rule too
        assert_eq!(
            identify("carib-123456-789.mp4").0.as_deref(),
            Some("123456-789")
        );
        assert_eq!(
            identify("1pondo_010124_001.mp4").0.as_deref(),
            Some("010124-001")
        );
        assert_eq!(identify("heyzo1234.mp4").0.as_deref(), Some("HEYZO-1234"));
        assert_eq!(identify("T28-567.mp4").0.as_deref(), Some("T28-567"));
    }

    #[test]
    fn test_generic_date_rule() {
        assert_eq!(identify("123456_78.mp4").0.as_deref(), Some("123456-78"));
    }

    #[test]
    fn test_no_identifier() {
        assert_eq!(identify("holiday video.mp4"), (None, false));
    }

    #[test]
    fn test_identify_uses_last_path_segment() {
        assert_eq!(
            identify("/downloads/ABC-111/").0.as_deref(),
            Some("ABC-111")
        );
    }

    #[test]
    fn test_rules_are_individually_testable() {
        let generic = RULES
            .iter()
            .find(|r| r.name == "generic-alpha")
            .expect("generic rule present");
        assert_eq!(generic.apply("XX SNIS_777 YY").as_deref(), Some("SNIS-777"));
        assert_eq!(generic.apply("NOTHING HERE"), None);
    }

    #[test]
    fn test_directory_fills_missing_identifier() {
        let path = Path::new("/watch/MIDE-555-C/video.mp4");
        let meta = identify_path(path);
        assert_eq!(meta.code(), Some("MIDE-555"));
        assert!(meta.subtitle);
        assert_eq!(meta.display_title, "video");
    }

    #[test]
    fn test_directory_never_overrides_file_identifier() {
        let path = Path::new("/watch/MIDE-555/SSNI-100.mp4");
        let meta = identify_path(path);
        assert_eq!(meta.code(), Some("SSNI-100"));
    }

    #[test]
    fn test_merge_only_fills_gaps() {
        let mut file = IdentifiedMeta {
            identifier: Some("AAA-111".to_string()),
            ..Default::default()
        };
        let dir = IdentifiedMeta {
            identifier: Some("BBB-222".to_string()),
            subtitle: true,
            display_title: "BBB-222".to_string(),
            ..Default::default()
        };
        file.merge(&dir);
        assert_eq!(file.code(), Some("AAA-111"));
        assert!(file.subtitle);
        assert_eq!(file.display_title, "BBB-222");
    }
}

//! Destination naming.
//!
//! Templates are plain text with `{placeholder}` substitutions. Substituted
//! values never contain path separators, so only the template itself decides
//! the directory layout under a destination root.

use std::collections::HashMap;

use crate::identify::IdentifiedMeta;
use crate::metadata::ContentRecord;

/// Every placeholder a template may use.
pub const PLACEHOLDERS: &[&str] = &[
    "code",
    "year",
    "title",
    "actor",
    "actors",
    "producer",
    "publisher",
    "fileExt",
    "subtitle",
];

const TITLE_LIMIT: usize = 48;
const TITLE_ELLIPSIS: &str = "……";
const SUBTITLE_TAG: &str = "-C";

/// Values available to a template for one transfer.
#[derive(Debug, Clone, Default)]
pub struct NamingContext {
    values: HashMap<&'static str, String>,
}

impl NamingContext {
    /// `file_ext` includes the leading dot, or is empty for directories.
    pub fn new(meta: &IdentifiedMeta, record: &ContentRecord, file_ext: &str) -> Self {
        let code = meta
            .code()
            .map(str::to_string)
            .unwrap_or_else(|| record.code.clone());

        let mut values = HashMap::new();
        values.insert("code", code);
        values.insert("year", record.year.clone());
        values.insert("title", truncate_title(&record.title));
        values.insert("actor", record.primary_actor().to_string());
        values.insert("actors", record.actor_names().join(","));
        values.insert("producer", record.producer.clone());
        values.insert("publisher", record.publisher.clone());
        values.insert("fileExt", file_ext.to_string());
        values.insert(
            "subtitle",
            if meta.subtitle { SUBTITLE_TAG } else { "" }.to_string(),
        );

        for value in values.values_mut() {
            *value = sanitize_component(value);
        }
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Substitutes known placeholders; unknown ones are left verbatim.
    pub fn render(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len() + 32);
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) => {
                    let name = &after[..close];
                    match self.get(name) {
                        Some(value) => out.push_str(value),
                        None => {
                            out.push('{');
                            out.push_str(name);
                            out.push('}');
                        }
                    }
                    rest = &after[close + 1..];
                }
                None => {
                    out.push_str(&rest[open..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out.trim().to_string()
    }
}

pub fn truncate_title(title: &str) -> String {
    if title.chars().count() > TITLE_LIMIT {
        let mut short: String = title.chars().take(TITLE_LIMIT).collect();
        short.push_str(TITLE_ELLIPSIS);
        short
    } else {
        title.to_string()
    }
}

/// Replaces characters that would split a value into extra path segments.
pub fn sanitize_component(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_RENAME_FORMAT;
    use crate::metadata::Person;

    fn record() -> ContentRecord {
        ContentRecord {
            code: "ABC-123".to_string(),
            title: "Summer Story".to_string(),
            year: "2023".to_string(),
            actors: vec![
                Person {
                    name: "Actor One".to_string(),
                    ..Default::default()
                },
                Person {
                    name: "Actor Two".to_string(),
                    ..Default::default()
                },
            ],
            producer: "Studio".to_string(),
            publisher: "Label".to_string(),
            ..Default::default()
        }
    }

    fn meta(subtitle: bool) -> IdentifiedMeta {
        IdentifiedMeta {
            identifier: Some("ABC-123".to_string()),
            subtitle,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_template() {
        let ctx = NamingContext::new(&meta(false), &record(), ".mp4");
        assert_eq!(
            ctx.render(DEFAULT_RENAME_FORMAT),
            "2023 Summer Story/2023 Summer Story.mp4"
        );
    }

    #[test]
    fn test_all_placeholders() {
        let ctx = NamingContext::new(&meta(true), &record(), ".mkv");
        assert_eq!(
            ctx.render("{actor}/{code}{subtitle} [{actors}] {producer} {publisher}{fileExt}"),
            "Actor One/ABC-123-C [Actor One,Actor Two] Studio Label.mkv"
        );
    }

    #[test]
    fn test_long_title_is_truncated() {
        let long = "x".repeat(60);
        let short = truncate_title(&long);
        assert_eq!(short.chars().count(), 48 + 2);
        assert!(short.ends_with("……"));
        assert_eq!(truncate_title("short"), "short");
    }

    #[test]
    fn test_values_cannot_inject_separators() {
        let mut rec = record();
        rec.title = "AC/DC ../ tribute".to_string();
        let ctx = NamingContext::new(&meta(false), &rec, ".mp4");
        assert_eq!(ctx.render("{title}{fileExt}"), "AC_DC .._ tribute.mp4");
    }

    #[test]
    fn test_unknown_placeholder_left_verbatim() {
        let ctx = NamingContext::new(&meta(false), &record(), "");
        assert_eq!(ctx.render("{code} {nope}"), "ABC-123 {nope}");
    }
}
